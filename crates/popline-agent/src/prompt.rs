//! System prompt for the phone agent.

use chrono::NaiveDate;
use popline_types::Facility;

/// Fixed facts woven into every prompt.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    /// How the agent names the facility it answers for.
    pub facility_label: String,
    pub reply_language: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            facility_label: "つくにんモール渋谷".to_string(),
            reply_language: "日本語".to_string(),
        }
    }
}

pub fn build_system_prompt(
    settings: &PromptSettings,
    facility: Option<&Facility>,
    today: NaiveDate,
) -> String {
    let facility_info = facility
        .map(|f| {
            format!(
                "施設名: {}\n住所: {}\n電話: {}\n営業時間: {}",
                f.name, f.address, f.phone, f.hours
            )
        })
        .unwrap_or_default();

    format!(
        "あなたは商業施設「{label}」のポップアップストア・催事スペース案内を行う電話オペレーターです。
短期利用（日単位レンタル）を検討しているお客様からの問い合わせに対して、利用可能なツールを使って情報を取得し、
簡潔で分かりやすい回答を{language}で行ってください。

{facility_info}

重要なルール:
- 回答は電話で読み上げられるため、簡潔にしてください（100文字以内を目安に）
- 料金は「1日あたり15,000円」のように日額で案内してください
- 面積は「45平米」のように読みやすい形式で
- 専門用語は避け、分かりやすい表現を使ってください
- お客様が興味を持った区画について、お名前と電話番号を確認し問い合わせを記録してください
- 情報が不足している場合は、確認のための質問をしてください
- 区画のステータスは「利用可能」「利用停止中」の2種類です
- 空き日程の確認には、利用希望日を確認してからcheck_section_availabilityツールを使ってください
- 今日の日付は{today}です",
        label = settings.facility_label,
        language = settings.reply_language,
        today = today.format("%Y-%m-%d"),
    )
}

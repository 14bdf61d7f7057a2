//! Tools exposed to the model and their execution against facility data.
//!
//! Every failure a caller could talk their way out of (unknown section,
//! malformed date, missing argument, unknown tool) comes back as an
//! `{"error": ...}` result flagged `is_error` so the model can recover
//! conversationally.

use std::sync::Arc;

use chrono::NaiveDate;
use popline_facility::{FacilityData, FacilityError};
use popline_types::{
    format_rent_price, NewInquiry, Section, SectionFilter, ToolCall, ToolResult,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::provider::ToolDefinition;

#[derive(Debug, Error)]
enum ToolFailure {
    #[error("不明なツールです: {0}")]
    UnknownTool(String),
    #[error("引数が正しくありません: {0}")]
    InvalidArguments(String),
    #[error("「{0}」という区画は見つかりませんでした")]
    SectionNotFound(String),
    #[error("日付の形式が正しくありません: {0}（YYYY-MM-DD形式で指定してください）")]
    InvalidDate(String),
    #[error("終了日が開始日より前になっています")]
    ReversedRange,
    #[error("施設データを取得できませんでした: {0}")]
    Facility(#[from] FacilityError),
}

/// The tool set offered on every reasoning request.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list_sections".into(),
            description: "施設内の区画一覧を取得します。カテゴリ（物販・飲食・サービス・オフィス）でフィルタや、利用可能な区画のみ表示できます".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {
                        "type": "string",
                        "description": "カテゴリでフィルタ（物販、飲食、サービス、オフィス）。指定しない場合は全区画を返します"
                    },
                    "active_only": {
                        "type": "boolean",
                        "description": "trueの場合、利用可能な区画のみを返します"
                    }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "get_section_info".into(),
            description: "特定の区画の詳細情報を取得します".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "section_name": {
                        "type": "string",
                        "description": "区画の名前（例：1F-A、2F-B、3F-C）"
                    }
                },
                "required": ["section_name"]
            }),
        },
        ToolDefinition {
            name: "check_section_availability".into(),
            description: "区画の指定期間の空き状況を確認します。日付を指定して予約可能かどうかを判定します".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "section_name": {"type": "string", "description": "区画の名前（例：1F-A）"},
                    "start_date": {"type": "string", "description": "利用開始日（YYYY-MM-DD形式）"},
                    "end_date": {"type": "string", "description": "利用終了日（YYYY-MM-DD形式、この日を含む）"},
                    "category": {
                        "type": "string",
                        "description": "section_nameを指定しない場合、カテゴリでフィルタして利用可能な区画を探します"
                    }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "create_inquiry".into(),
            description: "区画についての問い合わせを記録します。お客様の名前、電話番号、問い合わせ内容を記録します".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "section_name": {"type": "string", "description": "問い合わせ対象の区画名"},
                    "caller_name": {"type": "string", "description": "お客様のお名前"},
                    "caller_phone": {"type": "string", "description": "お客様の電話番号"},
                    "inquiry_type": {
                        "type": "string",
                        "description": "問い合わせ種別（内見希望、賃料交渉、条件確認、その他）"
                    },
                    "message": {"type": "string", "description": "問い合わせ内容の要約"}
                },
                "required": ["section_name", "caller_name", "caller_phone", "inquiry_type", "message"]
            }),
        },
    ]
}

#[derive(Debug, Default, Deserialize)]
struct ListSectionsArgs {
    category: Option<String>,
    active_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SectionInfoArgs {
    section_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct AvailabilityArgs {
    section_name: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InquiryArgs {
    section_name: String,
    caller_name: String,
    caller_phone: String,
    inquiry_type: String,
    message: String,
}

/// Runs tool calls against a [`FacilityData`] collaborator.
#[derive(Clone)]
pub struct ToolExecutor {
    facility: Arc<dyn FacilityData>,
}

impl ToolExecutor {
    pub fn new(facility: Arc<dyn FacilityData>) -> Self {
        Self { facility }
    }

    /// Executes one call. Never fails; errors become error results.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let outcome = match call.name.as_str() {
            "list_sections" => self.list_sections(&call.arguments).await,
            "get_section_info" => self.get_section_info(&call.arguments).await,
            "check_section_availability" => self.check_availability(&call.arguments).await,
            "create_inquiry" => self.create_inquiry(&call.arguments).await,
            other => Err(ToolFailure::UnknownTool(other.to_string())),
        };

        match outcome {
            Ok(value) => ToolResult {
                tool_call_id: call.id.clone(),
                content: value.to_string(),
                is_error: false,
            },
            Err(failure) => {
                match &failure {
                    ToolFailure::Facility(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool failed on facility data")
                    }
                    other => tracing::info!(tool = %call.name, reason = %other, "tool call rejected"),
                }
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: json!({ "error": failure.to_string() }).to_string(),
                    is_error: true,
                }
            }
        }
    }

    async fn list_sections(&self, args: &Value) -> Result<Value, ToolFailure> {
        let args: ListSectionsArgs = parse_args(args)?;
        let filter = SectionFilter {
            category: non_empty(args.category),
            active_only: args.active_only.unwrap_or(false),
        };
        let sections = self.facility.list_sections(&filter).await?;
        Ok(json!({
            "sections": sections.iter().map(section_summary).collect::<Vec<_>>(),
        }))
    }

    async fn get_section_info(&self, args: &Value) -> Result<Value, ToolFailure> {
        let args: SectionInfoArgs = parse_args(args)?;
        let section = self.find_section(&args.section_name).await?;
        let mut info = section_summary(&section);
        info["description"] = json!(section.description);
        Ok(info)
    }

    async fn check_availability(&self, args: &Value) -> Result<Value, ToolFailure> {
        let args: AvailabilityArgs = parse_args(args)?;

        if let (Some(name), Some(start), Some(end)) = (
            non_empty(args.section_name),
            non_empty(args.start_date),
            non_empty(args.end_date),
        ) {
            let section = self.find_section(&name).await?;
            if !section.is_active() {
                return Ok(json!({
                    "section_name": section.name,
                    "available": false,
                    "reason": "この区画は現在利用停止中です",
                }));
            }

            let start_date = parse_date(&start)?;
            let end_date = parse_date(&end)?;
            if end_date < start_date {
                return Err(ToolFailure::ReversedRange);
            }
            let available = self
                .facility
                .is_section_available(&section.id, start_date, end_date)
                .await?;
            return Ok(json!({
                "section_name": section.name,
                "start_date": start,
                "end_date": end,
                "available": available,
                "rent_daily": format_rent_price(section.rent_price),
            }));
        }

        let filter = SectionFilter {
            category: non_empty(args.category),
            active_only: true,
        };
        let sections = self.facility.list_sections(&filter).await?;
        let active: Vec<Value> = sections
            .iter()
            .map(|s| {
                let mut summary = section_summary(s);
                if let Some(obj) = summary.as_object_mut() {
                    obj.remove("status");
                }
                summary
            })
            .collect();
        Ok(json!({
            "total_active": active.len(),
            "active_sections": active,
        }))
    }

    async fn create_inquiry(&self, args: &Value) -> Result<Value, ToolFailure> {
        let args: InquiryArgs = parse_args(args)?;
        let section = self.find_section(&args.section_name).await?;
        let inquiry = self
            .facility
            .create_inquiry(NewInquiry {
                section_id: section.id,
                caller_name: args.caller_name,
                caller_phone: args.caller_phone,
                inquiry_type: args.inquiry_type,
                message: args.message,
            })
            .await?;
        Ok(json!({
            "success": true,
            "inquiry_id": inquiry.id,
            "message": "問い合わせを受け付けました。担当者より折り返しご連絡いたします。",
        }))
    }

    async fn find_section(&self, name: &str) -> Result<Section, ToolFailure> {
        self.facility
            .get_section_by_name(name)
            .await?
            .ok_or_else(|| ToolFailure::SectionNotFound(name.to_string()))
    }
}

fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolFailure> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| ToolFailure::InvalidArguments(e.to_string()))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ToolFailure> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ToolFailure::InvalidDate(raw.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Caller-friendly rendering of a section.
fn section_summary(section: &Section) -> Value {
    json!({
        "name": section.name,
        "floor": format!("{}F", section.floor),
        "area": format!("{}㎡", section.area),
        "rent_daily": format_rent_price(section.rent_price),
        "category": section.category,
        "status": section.status.label(),
        "features": section.features,
    })
}

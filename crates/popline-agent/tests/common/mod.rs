#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use popline_agent::{AgentError, ProviderResponse, ReasoningProvider, ReasoningRequest};
use popline_facility::{create_pool, run_migrations, store, DbPool, PoolSettings, SqliteFacility};
use popline_types::{HistoryTurn, NewFacility, NewReservation, NewSection, SectionStatus, ToolCall};
use serde_json::Value;
use tempfile::TempDir;

pub struct Fixture {
    pub _dir: TempDir,
    pub pool: DbPool,
    pub facility: Arc<SqliteFacility>,
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Facility with 1F-A (物販, reserved 2026-02-05..=2026-02-11), 1F-B (飲食)
/// and an inactive 3F-C (オフィス).
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.db");
    let pool = create_pool(path.to_str().unwrap(), PoolSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    run_migrations(&conn).unwrap();

    let facility = store::create_facility(
        &conn,
        &NewFacility {
            name: "つくにんモール渋谷".into(),
            address: "東京都渋谷区神南1-2-3".into(),
            phone: "03-1234-5678".into(),
            hours: "10:00〜21:00".into(),
        },
    )
    .unwrap();

    let mut ids = Vec::new();
    for (name, category, price, status) in [
        ("1F-A", "物販", 15_000, SectionStatus::Active),
        ("1F-B", "飲食", 18_000, SectionStatus::Active),
        ("3F-C", "オフィス", 8_000, SectionStatus::Inactive),
    ] {
        let section = store::create_section(
            &conn,
            &facility.id,
            &NewSection {
                name: name.into(),
                floor: name[..1].parse().unwrap(),
                area: 45.0,
                rent_price: price,
                category: category.into(),
                status,
                features: vec!["搬入口あり".into()],
                description: format!("{name}の区画です"),
            },
        )
        .unwrap();
        ids.push(section.id);
    }

    store::create_reservation(
        &conn,
        &NewReservation {
            section_id: ids[0].clone(),
            start_date: date("2026-02-05"),
            end_date: date("2026-02-11"),
            tenant_name: "テスト商店".into(),
            purpose: "ポップアップ".into(),
            note: String::new(),
        },
    )
    .unwrap();
    drop(conn);

    Fixture {
        _dir: dir,
        facility: Arc::new(SqliteFacility::new(pool.clone())),
        pool,
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

/// Replays canned responses and records the history it was shown.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, AgentError>>>,
    pub seen: Mutex<Vec<Vec<HistoryTurn>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, AgentError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn complete(&self, request: ReasoningRequest<'_>) -> Result<ProviderResponse, AgentError> {
        self.seen.lock().unwrap().push(request.history.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ProviderResponse::Text("以上です".into())))
    }
}

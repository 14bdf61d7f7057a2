//! Facility records consumed by the conversation agent.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Operational status of a rentable section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Active,
    Inactive,
}

impl SectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Parses the stored representation. Unknown values are treated as inactive.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            _ => Self::Inactive,
        }
    }

    /// Caller-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "利用可能",
            Self::Inactive => "利用停止中",
        }
    }
}

/// The facility the line answers for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub hours: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFacility {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub hours: String,
}

/// A rentable pop-up space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub facility_id: String,
    pub name: String,
    pub floor: i64,
    /// Floor area in square meters.
    pub area: f64,
    /// Daily rent in yen.
    pub rent_price: i64,
    pub category: String,
    pub status: SectionStatus,
    pub features: Vec<String>,
    pub description: String,
}

impl Section {
    pub fn is_active(&self) -> bool {
        self.status == SectionStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSection {
    pub name: String,
    pub floor: i64,
    pub area: f64,
    pub rent_price: i64,
    pub category: String,
    pub status: SectionStatus,
    pub features: Vec<String>,
    pub description: String,
}

/// A booked date range. Both ends are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub section_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub tenant_name: String,
    pub purpose: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub section_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub tenant_name: String,
    pub purpose: String,
    #[serde(default)]
    pub note: String,
}

/// A caller inquiry recorded through the voice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inquiry {
    pub id: String,
    pub section_id: String,
    pub caller_name: String,
    pub caller_phone: String,
    pub inquiry_type: String,
    pub message: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInquiry {
    pub section_id: String,
    pub caller_name: String,
    pub caller_phone: String,
    pub inquiry_type: String,
    pub message: String,
}

/// Narrowing applied by `list_sections`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFilter {
    pub category: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

/// Formats a daily rent in yen, e.g. `15,000円/日`.
pub fn format_rent_price(yen: i64) -> String {
    let digits = yen.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if yen < 0 { "-" } else { "" };
    format!("{sign}{grouped}円/日")
}

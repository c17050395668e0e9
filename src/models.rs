use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadSource {
    Organic,
    Ads,
    Referral,
}

impl LeadSource {
    pub const ALL: [LeadSource; 3] = [LeadSource::Organic, LeadSource::Ads, LeadSource::Referral];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadSource::Organic => "organic",
            LeadSource::Ads => "ads",
            LeadSource::Referral => "referral",
        }
    }
}

/// Funnel position of a lead. Declaration order is funnel order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Demoed,
    Admitted,
    Rejected,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Demoed,
        LeadStatus::Admitted,
        LeadStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Demoed => "demoed",
            LeadStatus::Admitted => "admitted",
            LeadStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Call,
    Demo,
    Followup,
    Email,
}

impl InteractionType {
    pub const ALL: [InteractionType; 4] = [
        InteractionType::Call,
        InteractionType::Demo,
        InteractionType::Followup,
        InteractionType::Email,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionType::Call => "call",
            InteractionType::Demo => "demo",
            InteractionType::Followup => "followup",
            InteractionType::Email => "email",
        }
    }
}

macro_rules! text_enum {
    ($ty:ty, $label:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ReportError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .into_iter()
                    .find(|value| value.as_str() == s)
                    .ok_or_else(|| {
                        let allowed: Vec<&str> = <$ty>::ALL.iter().map(|v| v.as_str()).collect();
                        ReportError::validation(format!(
                            "{} must be one of {}, got {s:?}",
                            $label,
                            allowed.join(", ")
                        ))
                    })
            }
        }
    };
}

text_enum!(LeadSource, "source");
text_enum!(LeadStatus, "status");
text_enum!(InteractionType, "interaction type");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counselor {
    pub id: Uuid,
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub source: LeadSource,
    pub created_at: DateTime<Utc>,
    pub counselor_id: Option<Uuid>,
    pub status: LeadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub counselor_id: Uuid,
    pub interaction_type: InteractionType,
    pub timestamp: DateTime<Utc>,
    pub notes: String,
    /// Minutes spent.
    pub duration: i32,
}

/// Projection of a counselor embedded in other records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselorSummary {
    pub id: Uuid,
    pub name: String,
    pub region: String,
}

impl From<&Counselor> for CounselorSummary {
    fn from(counselor: &Counselor) -> Self {
        Self {
            id: counselor.id,
            name: counselor.name.clone(),
            region: counselor.region.clone(),
        }
    }
}

/// A lead with its counselor reference resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadView {
    #[serde(flatten)]
    pub lead: Lead,
    pub counselor: Option<CounselorSummary>,
}

/// An interaction with its counselor reference resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionView {
    #[serde(flatten)]
    pub interaction: Interaction,
    pub counselor: Option<CounselorSummary>,
}

/// Rounds to two decimal places, the precision every rate is reported with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole * 100` rounded to two places, or 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_and_display() {
        for status in LeadStatus::ALL {
            assert_eq!(status.to_string().parse::<LeadStatus>().unwrap(), status);
        }
        assert_eq!(LeadStatus::default(), LeadStatus::New);
    }

    #[test]
    fn unknown_source_is_a_validation_error() {
        let err = "billboard".parse::<LeadSource>().unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("organic, ads, referral"));
    }

    #[test]
    fn interaction_type_serializes_lowercase() {
        let json = serde_json::to_string(&InteractionType::Followup).unwrap();
        assert_eq!(json, "\"followup\"");
    }

    #[test]
    fn percentage_guards_zero_denominator() {
        assert_eq!(percentage(3, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
    }
}

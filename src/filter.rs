//! Normalizes caller-supplied report parameters into store predicates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ReportError, ReportResult};
use crate::models::{InteractionType, LeadSource, LeadStatus};

/// Inclusive `[from, to]` window. Both bounds absent matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn parse(from: Option<&str>, to: Option<&str>) -> ReportResult<Self> {
        Ok(Self {
            from: non_empty(from).map(parse_bound).transpose()?,
            to: non_empty(to).map(parse_bound).transpose()?,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_bound(raw: &str) -> ReportResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .ok_or_else(|| ReportError::validation(format!("invalid date {raw:?}")))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilter {
    pub created: DateRange,
    pub source: Option<LeadSource>,
    pub status: Option<LeadStatus>,
    pub counselor_id: Option<Uuid>,
}

impl LeadFilter {
    pub fn with_status(&self, status: LeadStatus) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }

    pub fn with_counselor(&self, counselor_id: Uuid) -> Self {
        Self {
            counselor_id: Some(counselor_id),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounselorFilter {
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionFilter {
    pub timestamp: DateRange,
    pub counselor_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub interaction_type: Option<InteractionType>,
}

/// Raw report parameters as the caller typed them, echoed back in report output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportParams {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl ReportParams {
    pub fn date_range(&self) -> ReportResult<DateRange> {
        DateRange::parse(self.from.as_deref(), self.to.as_deref())
    }

    /// Predicate over lead `created_at` plus the optional source equality.
    pub fn lead_filter(&self) -> ReportResult<LeadFilter> {
        let source = non_empty(self.source.as_deref())
            .map(str::parse::<LeadSource>)
            .transpose()?;
        Ok(LeadFilter {
            created: self.date_range()?,
            source,
            ..LeadFilter::default()
        })
    }

    pub fn counselor_filter(&self) -> CounselorFilter {
        CounselorFilter {
            region: non_empty(self.region.as_deref()).map(str::to_string),
        }
    }

    /// Same window as [`Self::lead_filter`], applied to interaction timestamps.
    pub fn interaction_filter(&self) -> ReportResult<InteractionFilter> {
        Ok(InteractionFilter {
            timestamp: self.date_range()?,
            ..InteractionFilter::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn no_bounds_is_unrestricted() {
        let range = DateRange::parse(None, None).unwrap();
        assert!(range.is_unbounded());
        assert!(range.contains(Utc::now()));
    }

    #[test]
    fn bare_dates_mean_midnight_utc() {
        let at = parse_bound("2024-03-01").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn rfc3339_offsets_are_normalized() {
        let at = parse_bound("2024-03-01T05:30:00+05:30").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn bounds_are_inclusive() {
        let range = DateRange::parse(Some("2024-01-01"), Some("2024-01-31")).unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 1).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn invalid_date_fails_validation() {
        let err = DateRange::parse(Some("last tuesday"), None).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn empty_strings_are_absent() {
        let params = ReportParams {
            from: Some(String::new()),
            source: Some("  ".to_string()),
            region: Some(String::new()),
            ..ReportParams::default()
        };
        let filter = params.lead_filter().unwrap();
        assert!(filter.created.is_unbounded());
        assert_eq!(filter.source, None);
        assert_eq!(params.counselor_filter().region, None);
    }

    #[test]
    fn source_is_validated() {
        let params = ReportParams {
            source: Some("tv".to_string()),
            ..ReportParams::default()
        };
        assert_eq!(params.lead_filter().unwrap_err().kind(), "validation");

        let params = ReportParams {
            source: Some("ads".to_string()),
            ..ReportParams::default()
        };
        assert_eq!(params.lead_filter().unwrap().source, Some(LeadSource::Ads));
    }

    #[test]
    fn lead_filter_builders_keep_window() {
        let base = ReportParams {
            from: Some("2024-01-01".to_string()),
            ..ReportParams::default()
        }
        .lead_filter()
        .unwrap();
        let id = Uuid::new_v4();
        let scoped = base.with_counselor(id).with_status(LeadStatus::Admitted);
        assert_eq!(scoped.created, base.created);
        assert_eq!(scoped.counselor_id, Some(id));
        assert_eq!(scoped.status, Some(LeadStatus::Admitted));
    }
}

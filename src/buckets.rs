use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{ReportError, ReportResult};
use crate::filter::LeadFilter;
use crate::models::{percentage, Lead, LeadStatus};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        }
    }

    /// `(year, period)` key. The year is always the calendar year, so days at the
    /// edge of a year keep it even when their ISO week belongs to the neighbour.
    pub fn key(self, at: DateTime<Utc>) -> (i32, u32) {
        match self {
            Interval::Weekly => (at.year(), at.iso_week().week()),
            Interval::Monthly => (at.year(), at.month()),
        }
    }

    pub fn label(self, (year, period): (i32, u32)) -> String {
        match self {
            Interval::Weekly => format!("{year}-W{period}"),
            Interval::Monthly => format!("{year}-{period}"),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "weekly" => Ok(Interval::Weekly),
            "monthly" => Ok(Interval::Monthly),
            other => Err(ReportError::validation(format!(
                "interval must be weekly or monthly, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadBucket {
    pub period: String,
    pub total_leads: u64,
    pub admitted_leads: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub interval: Interval,
    pub buckets: Vec<LeadBucket>,
}

/// Groups leads by period, ascending. Pure; the store call lives in [`lead_buckets`].
pub fn bucket_leads(leads: &[Lead], interval: Interval) -> Vec<LeadBucket> {
    let mut tally: BTreeMap<(i32, u32), (u64, u64)> = BTreeMap::new();
    for lead in leads {
        let entry = tally.entry(interval.key(lead.created_at)).or_insert((0, 0));
        entry.0 += 1;
        if lead.status == LeadStatus::Admitted {
            entry.1 += 1;
        }
    }

    tally
        .into_iter()
        .map(|(key, (total_leads, admitted_leads))| LeadBucket {
            period: interval.label(key),
            total_leads,
            admitted_leads,
            conversion_rate: percentage(admitted_leads, total_leads),
        })
        .collect()
}

pub async fn lead_buckets(
    store: &dyn RecordStore,
    interval: Interval,
) -> ReportResult<BucketReport> {
    let leads = store.find_leads(&LeadFilter::default()).await?;
    let buckets = bucket_leads(&leads, interval);
    info!(%interval, buckets = buckets.len(), "lead buckets computed");
    Ok(BucketReport { interval, buckets })
}

//! Root-cause attribution for rejected leads.
//!
//! Each rejected lead is classified from its most recent interaction alone:
//!
//! | last interaction             | reason           |
//! |------------------------------|------------------|
//! | none                         | `no_interaction` |
//! | more than 7 whole days old   | `inactivity`     |
//! | recent, not a demo           | `no_demo`        |
//! | recent demo                  | `post_demo`      |
//!
//! Unlike the other reports this one takes no date window: every rejected
//! lead on record is analyzed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{ReportError, ReportResult};
use crate::filter::LeadFilter;
use crate::models::{
    percentage, CounselorSummary, Interaction, InteractionType, Lead, LeadSource, LeadStatus,
};
use crate::store::RecordStore;

pub const INACTIVITY_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropoffReason {
    NoInteraction,
    Inactivity,
    NoDemo,
    PostDemo,
}

impl DropoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropoffReason::NoInteraction => "no_interaction",
            DropoffReason::Inactivity => "inactivity",
            DropoffReason::NoDemo => "no_demo",
            DropoffReason::PostDemo => "post_demo",
        }
    }
}

/// Inactivity is checked before the interaction type.
pub fn classify(last: Option<&Interaction>, now: DateTime<Utc>) -> DropoffReason {
    match last {
        None => DropoffReason::NoInteraction,
        Some(interaction) if (now - interaction.timestamp).num_days() > INACTIVITY_DAYS => {
            DropoffReason::Inactivity
        }
        Some(interaction) if interaction.interaction_type != InteractionType::Demo => {
            DropoffReason::NoDemo
        }
        Some(_) => DropoffReason::PostDemo,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub source: LeadSource,
    pub created_at: DateTime<Utc>,
}

impl From<&Lead> for LeadSummary {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.name.clone(),
            email: lead.email.clone(),
            source: lead.source,
            created_at: lead.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LastInteraction {
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub timestamp: DateTime<Utc>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropoffDetail {
    pub lead: LeadSummary,
    pub counselor: Option<CounselorSummary>,
    pub last_interaction: Option<LastInteraction>,
    pub dropoff_reason: DropoffReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonShare {
    pub reason: DropoffReason,
    pub count: u64,
    /// Share of all rejected leads, in percent.
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropoffReport {
    pub total_rejected_leads: u64,
    /// Reasons in the order they were first encountered.
    pub dropoff_reasons: Vec<ReasonShare>,
    pub detailed_dropoffs: BTreeMap<DropoffReason, Vec<DropoffDetail>>,
}

async fn inspect_lead(
    store: &dyn RecordStore,
    lead: Lead,
    now: DateTime<Utc>,
) -> ReportResult<DropoffDetail> {
    let counselor = match lead.counselor_id {
        Some(id) => Some(
            store
                .counselor(id)
                .await?
                .map(|c| CounselorSummary::from(&c))
                .ok_or_else(|| ReportError::not_found("counselor", id))?,
        ),
        None => None,
    };
    let last = store.latest_interaction(lead.id).await?;
    let dropoff_reason = classify(last.as_ref(), now);

    Ok(DropoffDetail {
        lead: LeadSummary::from(&lead),
        counselor,
        last_interaction: last.map(|interaction| LastInteraction {
            kind: interaction.interaction_type,
            timestamp: interaction.timestamp,
            notes: interaction.notes,
        }),
        dropoff_reason,
    })
}

/// Classifies every rejected lead relative to `now` and groups by reason.
pub async fn dropoff_report(
    store: &dyn RecordStore,
    now: DateTime<Utc>,
    fanout: usize,
) -> ReportResult<DropoffReport> {
    let rejected = store
        .find_leads(&LeadFilter::default().with_status(LeadStatus::Rejected))
        .await?;
    let total_rejected_leads = rejected.len() as u64;

    let details: Vec<DropoffDetail> = stream::iter(rejected)
        .map(|lead| inspect_lead(store, lead, now))
        .buffered(fanout.max(1))
        .try_collect()
        .await?;

    let mut order: Vec<DropoffReason> = Vec::new();
    let mut detailed_dropoffs: BTreeMap<DropoffReason, Vec<DropoffDetail>> = BTreeMap::new();
    for detail in details {
        if !detailed_dropoffs.contains_key(&detail.dropoff_reason) {
            order.push(detail.dropoff_reason);
        }
        detailed_dropoffs
            .entry(detail.dropoff_reason)
            .or_default()
            .push(detail);
    }

    let dropoff_reasons = order
        .into_iter()
        .map(|reason| {
            let count = detailed_dropoffs.get(&reason).map_or(0, Vec::len) as u64;
            ReasonShare {
                reason,
                count,
                percentage: percentage(count, total_rejected_leads),
            }
        })
        .collect();

    info!(total_rejected_leads, "drop-off report computed");

    Ok(DropoffReport {
        total_rejected_leads,
        dropoff_reasons,
        detailed_dropoffs,
    })
}

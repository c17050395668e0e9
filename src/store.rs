//! Record store seam. Analyzers only ever see `&dyn RecordStore` and owned snapshots.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ReportError, ReportResult};
use crate::filter::{CounselorFilter, InteractionFilter, LeadFilter};
use crate::models::{Counselor, Interaction, Lead, LeadStatus};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Leads matching `filter`, oldest first, ties by id.
    async fn find_leads(&self, filter: &LeadFilter) -> ReportResult<Vec<Lead>>;

    async fn count_leads(&self, filter: &LeadFilter) -> ReportResult<u64>;

    /// Matching leads counted per status in a single read. Statuses with no
    /// leads may be left out.
    async fn count_leads_by_status(&self, filter: &LeadFilter)
        -> ReportResult<Vec<(LeadStatus, u64)>>;

    /// Counselors matching `filter`, ordered by name then id.
    async fn find_counselors(&self, filter: &CounselorFilter) -> ReportResult<Vec<Counselor>>;

    /// Interactions matching `filter`, newest first, ties by ascending id.
    async fn find_interactions(&self, filter: &InteractionFilter)
        -> ReportResult<Vec<Interaction>>;

    /// Most recent interaction logged against a lead; the lowest id wins a tie.
    async fn latest_interaction(&self, lead_id: Uuid) -> ReportResult<Option<Interaction>>;

    async fn lead(&self, id: Uuid) -> ReportResult<Option<Lead>>;

    async fn counselor(&self, id: Uuid) -> ReportResult<Option<Counselor>>;

    async fn insert_counselor(&self, counselor: &Counselor) -> ReportResult<()>;

    /// Fails with a validation error when the email is already registered.
    async fn insert_lead(&self, lead: &Lead) -> ReportResult<()>;

    async fn insert_interaction(&self, interaction: &Interaction) -> ReportResult<()>;

    /// Returns the updated lead, or `None` when no lead has that id.
    async fn update_lead_status(&self, id: Uuid, status: LeadStatus)
        -> ReportResult<Option<Lead>>;
}

impl LeadFilter {
    pub fn matches(&self, lead: &Lead) -> bool {
        self.created.contains(lead.created_at)
            && self.source.map_or(true, |source| lead.source == source)
            && self.status.map_or(true, |status| lead.status == status)
            && self
                .counselor_id
                .map_or(true, |id| lead.counselor_id == Some(id))
    }
}

impl CounselorFilter {
    pub fn matches(&self, counselor: &Counselor) -> bool {
        self.region
            .as_deref()
            .map_or(true, |region| counselor.region == region)
    }
}

impl InteractionFilter {
    pub fn matches(&self, interaction: &Interaction) -> bool {
        self.timestamp.contains(interaction.timestamp)
            && self
                .counselor_id
                .map_or(true, |id| interaction.counselor_id == id)
            && self.lead_id.map_or(true, |id| interaction.lead_id == id)
            && self
                .interaction_type
                .map_or(true, |kind| interaction.interaction_type == kind)
    }
}

/// Row order of `ORDER BY timestamp DESC, id`.
fn newest_first(a: &Interaction, b: &Interaction) -> Ordering {
    b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id))
}

#[derive(Default)]
struct Tables {
    counselors: Vec<Counselor>,
    leads: Vec<Lead>,
    interactions: Vec<Interaction>,
}

/// Process-local store with the same integrity rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_leads(&self, filter: &LeadFilter) -> ReportResult<Vec<Lead>> {
        let tables = self.tables.read().await;
        let mut leads: Vec<Lead> = tables
            .leads
            .iter()
            .filter(|lead| filter.matches(lead))
            .cloned()
            .collect();
        leads.sort_by_key(|lead| (lead.created_at, lead.id));
        Ok(leads)
    }

    async fn count_leads(&self, filter: &LeadFilter) -> ReportResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables.leads.iter().filter(|lead| filter.matches(lead)).count() as u64)
    }

    async fn count_leads_by_status(
        &self,
        filter: &LeadFilter,
    ) -> ReportResult<Vec<(LeadStatus, u64)>> {
        let tables = self.tables.read().await;
        let matching: Vec<&Lead> = tables
            .leads
            .iter()
            .filter(|lead| filter.matches(lead))
            .collect();
        Ok(LeadStatus::ALL
            .into_iter()
            .map(|status| {
                let count = matching.iter().filter(|lead| lead.status == status).count();
                (status, count as u64)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    async fn find_counselors(&self, filter: &CounselorFilter) -> ReportResult<Vec<Counselor>> {
        let tables = self.tables.read().await;
        let mut counselors: Vec<Counselor> = tables
            .counselors
            .iter()
            .filter(|counselor| filter.matches(counselor))
            .cloned()
            .collect();
        counselors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(counselors)
    }

    async fn find_interactions(
        &self,
        filter: &InteractionFilter,
    ) -> ReportResult<Vec<Interaction>> {
        let tables = self.tables.read().await;
        let mut interactions: Vec<Interaction> = tables
            .interactions
            .iter()
            .filter(|interaction| filter.matches(interaction))
            .cloned()
            .collect();
        interactions.sort_by(newest_first);
        Ok(interactions)
    }

    async fn latest_interaction(&self, lead_id: Uuid) -> ReportResult<Option<Interaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .interactions
            .iter()
            .filter(|interaction| interaction.lead_id == lead_id)
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    async fn lead(&self, id: Uuid) -> ReportResult<Option<Lead>> {
        let tables = self.tables.read().await;
        Ok(tables.leads.iter().find(|lead| lead.id == id).cloned())
    }

    async fn counselor(&self, id: Uuid) -> ReportResult<Option<Counselor>> {
        let tables = self.tables.read().await;
        Ok(tables.counselors.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_counselor(&self, counselor: &Counselor) -> ReportResult<()> {
        let mut tables = self.tables.write().await;
        tables.counselors.push(counselor.clone());
        Ok(())
    }

    async fn insert_lead(&self, lead: &Lead) -> ReportResult<()> {
        let mut tables = self.tables.write().await;
        if tables.leads.iter().any(|existing| existing.email == lead.email) {
            return Err(ReportError::validation(format!(
                "email {} is already registered",
                lead.email
            )));
        }
        if let Some(counselor_id) = lead.counselor_id {
            if !tables.counselors.iter().any(|c| c.id == counselor_id) {
                return Err(ReportError::not_found("counselor", counselor_id));
            }
        }
        tables.leads.push(lead.clone());
        Ok(())
    }

    async fn insert_interaction(&self, interaction: &Interaction) -> ReportResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.leads.iter().any(|lead| lead.id == interaction.lead_id) {
            return Err(ReportError::not_found("lead", interaction.lead_id));
        }
        if !tables
            .counselors
            .iter()
            .any(|c| c.id == interaction.counselor_id)
        {
            return Err(ReportError::not_found("counselor", interaction.counselor_id));
        }
        tables.interactions.push(interaction.clone());
        Ok(())
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
    ) -> ReportResult<Option<Lead>> {
        let mut tables = self.tables.write().await;
        Ok(tables.leads.iter_mut().find(|lead| lead.id == id).map(|lead| {
            lead.status = status;
            lead.clone()
        }))
    }
}

/// Resolves counselor references for a batch of records with one lookup per distinct id.
pub async fn counselor_index(
    store: &dyn RecordStore,
    ids: impl IntoIterator<Item = Uuid>,
) -> ReportResult<HashMap<Uuid, Counselor>> {
    let mut index = HashMap::new();
    for id in ids {
        if index.contains_key(&id) {
            continue;
        }
        let counselor = store
            .counselor(id)
            .await?
            .ok_or_else(|| ReportError::not_found("counselor", id))?;
        index.insert(id, counselor);
    }
    Ok(index)
}

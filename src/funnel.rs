use serde::Serialize;
use tracing::info;

use crate::error::ReportResult;
use crate::filter::ReportParams;
use crate::models::{percentage, LeadStatus};
use crate::store::RecordStore;

/// Lead counts per status. Every status is always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBreakdown {
    pub new: u64,
    pub contacted: u64,
    pub demoed: u64,
    pub admitted: u64,
    pub rejected: u64,
}

impl StatusBreakdown {
    pub fn get(&self, status: LeadStatus) -> u64 {
        match status {
            LeadStatus::New => self.new,
            LeadStatus::Contacted => self.contacted,
            LeadStatus::Demoed => self.demoed,
            LeadStatus::Admitted => self.admitted,
            LeadStatus::Rejected => self.rejected,
        }
    }

    fn set(&mut self, status: LeadStatus, count: u64) {
        let slot = match status {
            LeadStatus::New => &mut self.new,
            LeadStatus::Contacted => &mut self.contacted,
            LeadStatus::Demoed => &mut self.demoed,
            LeadStatus::Admitted => &mut self.admitted,
            LeadStatus::Rejected => &mut self.rejected,
        };
        *slot = count;
    }

    pub fn total(&self) -> u64 {
        LeadStatus::ALL.iter().map(|status| self.get(*status)).sum()
    }

    /// `(status, count)` pairs in funnel order.
    pub fn rows(&self) -> impl Iterator<Item = (LeadStatus, u64)> + '_ {
        LeadStatus::ALL.into_iter().map(|status| (status, self.get(status)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConversionRates {
    pub new_to_contacted: f64,
    pub contacted_to_demoed: f64,
    pub demoed_to_admitted: f64,
}

impl ConversionRates {
    /// Stage-to-stage rates. The first two stages are gated on the contacted
    /// bucket, the last on the demoed bucket, not on the denominators.
    pub fn from_breakdown(counts: &StatusBreakdown) -> Self {
        let total = counts.total();
        let reached_contact = counts.contacted + counts.demoed + counts.admitted;
        let reached_demo = counts.demoed + counts.admitted;

        let gated = |gate: u64, part: u64, whole: u64| {
            if gate > 0 {
                percentage(part, whole)
            } else {
                0.0
            }
        };

        Self {
            new_to_contacted: gated(counts.contacted, reached_contact, total),
            contacted_to_demoed: gated(counts.contacted, reached_demo, reached_contact),
            demoed_to_admitted: gated(counts.demoed, counts.admitted, reached_demo),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelReport {
    pub total_leads: u64,
    pub status_breakdown: StatusBreakdown,
    pub conversion_rates: ConversionRates,
    pub filters: ReportParams,
}

/// Status distribution and conversion rates for leads matching `params`
/// (`from`/`to` over creation time, optional `source`).
pub async fn funnel_report(
    store: &dyn RecordStore,
    params: &ReportParams,
) -> ReportResult<FunnelReport> {
    let filter = params.lead_filter()?;

    let mut breakdown = StatusBreakdown::default();
    for (status, count) in store.count_leads_by_status(&filter).await? {
        breakdown.set(status, count);
    }

    let total_leads = breakdown.total();
    info!(total_leads, "funnel report computed");

    Ok(FunnelReport {
        total_leads,
        status_breakdown: breakdown,
        conversion_rates: ConversionRates::from_breakdown(&breakdown),
        filters: ReportParams {
            region: None,
            ..params.clone()
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::store::testing::{lead, FailingStore};
    use crate::store::MemoryStore;

    async fn store_with(statuses: &[LeadStatus]) -> MemoryStore {
        let store = MemoryStore::new();
        for status in statuses {
            store.insert_lead(&lead(*status, Utc::now(), None)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn breakdown_covers_every_status() {
        let store = store_with(&[
            LeadStatus::Admitted,
            LeadStatus::Admitted,
            LeadStatus::Rejected,
            LeadStatus::New,
        ])
        .await;

        let report = funnel_report(&store, &ReportParams::default()).await.unwrap();
        assert_eq!(report.total_leads, 4);
        assert_eq!(
            report.status_breakdown,
            StatusBreakdown {
                new: 1,
                contacted: 0,
                demoed: 0,
                admitted: 2,
                rejected: 1,
            }
        );
        assert_eq!(report.status_breakdown.total(), report.total_leads);
        // No contacted or demoed leads: every gated rate collapses to zero.
        assert_eq!(report.conversion_rates, ConversionRates::default());
    }

    #[test]
    fn rates_follow_stage_gates() {
        let counts = StatusBreakdown {
            new: 2,
            contacted: 2,
            demoed: 3,
            admitted: 1,
            rejected: 2,
        };
        let rates = ConversionRates::from_breakdown(&counts);
        assert_eq!(rates.new_to_contacted, 60.0);
        assert_eq!(rates.contacted_to_demoed, 66.67);
        assert_eq!(rates.demoed_to_admitted, 25.0);
    }

    #[test]
    fn zero_contacted_reports_zero_even_with_later_stages() {
        let counts = StatusBreakdown {
            new: 1,
            contacted: 0,
            demoed: 2,
            admitted: 1,
            rejected: 0,
        };
        let rates = ConversionRates::from_breakdown(&counts);
        assert_eq!(rates.new_to_contacted, 0.0);
        assert_eq!(rates.contacted_to_demoed, 0.0);
        assert_eq!(rates.demoed_to_admitted, 33.33);
    }

    #[test]
    fn empty_funnel_has_no_rates() {
        let rates = ConversionRates::from_breakdown(&StatusBreakdown::default());
        assert_eq!(rates, ConversionRates::default());
    }

    #[tokio::test]
    async fn filters_apply_and_are_echoed() {
        let store = MemoryStore::new();
        let march = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let may = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let mut ads = lead(LeadStatus::Contacted, march, None);
        ads.source = crate::models::LeadSource::Ads;
        store.insert_lead(&ads).await.unwrap();
        store.insert_lead(&lead(LeadStatus::Contacted, march, None)).await.unwrap();
        store.insert_lead(&lead(LeadStatus::Admitted, may, None)).await.unwrap();

        let params = ReportParams {
            from: Some("2024-03-01".to_string()),
            to: Some("2024-03-31".to_string()),
            source: Some("organic".to_string()),
            region: None,
        };
        let report = funnel_report(&store, &params).await.unwrap();
        assert_eq!(report.total_leads, 1);
        assert_eq!(report.status_breakdown.contacted, 1);
        assert_eq!(report.filters, params);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalLeads"], 1);
        assert_eq!(json["statusBreakdown"]["contacted"], 1);
        assert_eq!(json["conversionRates"]["new_to_contacted"], 100.0);
        assert_eq!(json["filters"]["source"], "organic");
    }

    #[tokio::test]
    async fn invalid_date_fails_before_querying() {
        let params = ReportParams {
            to: Some("31/03/2024".to_string()),
            ..ReportParams::default()
        };
        let err = funnel_report(&FailingStore, &params).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let err = funnel_report(&FailingStore, &ReportParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");
    }
}

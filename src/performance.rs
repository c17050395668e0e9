use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ReportResult;
use crate::filter::{InteractionFilter, LeadFilter, ReportParams};
use crate::models::{percentage, round2, Counselor, CounselorSummary, InteractionType, LeadStatus};
use crate::store::RecordStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselorPerformance {
    pub counselor: CounselorSummary,
    pub total_leads_handled: u64,
    pub demos_given: u64,
    pub total_interactions: u64,
    /// Mean interaction duration in minutes.
    pub average_time_spent: f64,
    pub leads_converted: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub performance: Vec<CounselorPerformance>,
    pub filters: ReportParams,
}

async fn evaluate_counselor(
    store: &dyn RecordStore,
    counselor: Counselor,
    leads: &LeadFilter,
    interactions: &InteractionFilter,
) -> ReportResult<CounselorPerformance> {
    let owned = leads.with_counselor(counselor.id);
    let total_leads_handled = store.count_leads(&owned).await?;

    let logged = store
        .find_interactions(&InteractionFilter {
            counselor_id: Some(counselor.id),
            ..interactions.clone()
        })
        .await?;
    let demos_given = logged
        .iter()
        .filter(|i| i.interaction_type == InteractionType::Demo)
        .count() as u64;
    let total_interactions = logged.len() as u64;
    let average_time_spent = if logged.is_empty() {
        0.0
    } else {
        let minutes: i64 = logged.iter().map(|i| i64::from(i.duration)).sum();
        round2(minutes as f64 / logged.len() as f64)
    };

    let leads_converted = store
        .count_leads(&owned.with_status(LeadStatus::Admitted))
        .await?;

    debug!(
        counselor = %counselor.name,
        total_leads_handled,
        leads_converted,
        "counselor evaluated"
    );

    Ok(CounselorPerformance {
        counselor: CounselorSummary::from(&counselor),
        total_leads_handled,
        demos_given,
        total_interactions,
        average_time_spent,
        leads_converted,
        conversion_rate: percentage(leads_converted, total_leads_handled),
    })
}

/// Per-counselor volume, engagement and conversion, ranked by admitted leads.
///
/// Counselors are evaluated independently with at most `fanout` in flight.
/// Ties on `leads_converted` keep the store's counselor order.
pub async fn counselor_performance(
    store: &dyn RecordStore,
    params: &ReportParams,
    fanout: usize,
) -> ReportResult<PerformanceReport> {
    let leads = LeadFilter {
        created: params.date_range()?,
        ..LeadFilter::default()
    };
    let interactions = params.interaction_filter()?;
    let counselors = store.find_counselors(&params.counselor_filter()).await?;

    let mut performance: Vec<CounselorPerformance> = stream::iter(counselors)
        .map(|counselor| evaluate_counselor(store, counselor, &leads, &interactions))
        .buffered(fanout.max(1))
        .try_collect()
        .await?;
    performance.sort_by(|a, b| b.leads_converted.cmp(&a.leads_converted));

    info!(counselors = performance.len(), "counselor performance computed");

    Ok(PerformanceReport {
        performance,
        filters: ReportParams {
            source: None,
            ..params.clone()
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::store::testing::{counselor, interaction, lead, FailingStore};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn idle_counselor_has_zero_rates() {
        let store = MemoryStore::new();
        store.insert_counselor(&counselor("Neha Verma", "West")).await.unwrap();

        let report = counselor_performance(&store, &ReportParams::default(), 4)
            .await
            .unwrap();
        let only = &report.performance[0];
        assert_eq!(only.total_leads_handled, 0);
        assert_eq!(only.conversion_rate, 0.0);
        assert_eq!(only.average_time_spent, 0.0);
        assert_eq!(only.total_interactions, 0);
    }

    #[tokio::test]
    async fn metrics_join_leads_and_interactions() {
        let store = MemoryStore::new();
        let amit = counselor("Amit Sharma", "North");
        store.insert_counselor(&amit).await.unwrap();
        let now = Utc::now();

        let admitted = lead(LeadStatus::Admitted, now, Some(amit.id));
        let demoed = lead(LeadStatus::Demoed, now, Some(amit.id));
        let fresh = lead(LeadStatus::New, now, Some(amit.id));
        for l in [&admitted, &demoed, &fresh] {
            store.insert_lead(l).await.unwrap();
        }
        for (l, kind, minutes) in [
            (&admitted, InteractionType::Demo, 30),
            (&admitted, InteractionType::Call, 15),
            (&demoed, InteractionType::Demo, 20),
        ] {
            store
                .insert_interaction(&interaction(l, amit.id, kind, now, minutes))
                .await
                .unwrap();
        }

        let report = counselor_performance(&store, &ReportParams::default(), 4)
            .await
            .unwrap();
        let row = &report.performance[0];
        assert_eq!(row.total_leads_handled, 3);
        assert_eq!(row.demos_given, 2);
        assert_eq!(row.total_interactions, 3);
        assert_eq!(row.average_time_spent, 21.67);
        assert_eq!(row.leads_converted, 1);
        assert_eq!(row.conversion_rate, 33.33);
    }

    #[tokio::test]
    async fn ranking_is_non_increasing_and_ties_keep_store_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let plan = [("Amit Sharma", 1), ("Neha Verma", 3), ("Priya Reddy", 1), ("Rahul Das", 0)];
        for (name, admitted) in plan {
            let c = counselor(name, "North");
            store.insert_counselor(&c).await.unwrap();
            for _ in 0..admitted {
                store
                    .insert_lead(&lead(LeadStatus::Admitted, now, Some(c.id)))
                    .await
                    .unwrap();
            }
        }

        let report = counselor_performance(&store, &ReportParams::default(), 2)
            .await
            .unwrap();
        let ranked: Vec<(&str, u64)> = report
            .performance
            .iter()
            .map(|p| (p.counselor.name.as_str(), p.leads_converted))
            .collect();
        assert_eq!(
            ranked,
            vec![
                ("Neha Verma", 3),
                ("Amit Sharma", 1),
                ("Priya Reddy", 1),
                ("Rahul Das", 0)
            ]
        );
        assert!(report
            .performance
            .windows(2)
            .all(|pair| pair[0].leads_converted >= pair[1].leads_converted));
    }

    #[tokio::test]
    async fn region_and_window_restrict_inputs() {
        let store = MemoryStore::new();
        let north = counselor("Amit Sharma", "North");
        let south = counselor("Priya Reddy", "South");
        store.insert_counselor(&north).await.unwrap();
        store.insert_counselor(&south).await.unwrap();

        let inside = Utc.with_ymd_and_hms(2024, 2, 10, 9, 0, 0).unwrap();
        let outside = inside - Duration::days(60);
        let recent = lead(LeadStatus::Admitted, inside, Some(north.id));
        let old = lead(LeadStatus::Admitted, outside, Some(north.id));
        store.insert_lead(&recent).await.unwrap();
        store.insert_lead(&old).await.unwrap();
        store
            .insert_interaction(&interaction(&old, north.id, InteractionType::Demo, outside, 40))
            .await
            .unwrap();
        store
            .insert_interaction(&interaction(&recent, north.id, InteractionType::Call, inside, 10))
            .await
            .unwrap();

        let params = ReportParams {
            from: Some("2024-02-01".to_string()),
            to: Some("2024-02-29".to_string()),
            region: Some("North".to_string()),
            source: None,
        };
        let report = counselor_performance(&store, &params, 4).await.unwrap();
        assert_eq!(report.performance.len(), 1);
        let row = &report.performance[0];
        assert_eq!(row.counselor.region, "North");
        assert_eq!(row.total_leads_handled, 1);
        assert_eq!(row.leads_converted, 1);
        assert_eq!(row.demos_given, 0);
        assert_eq!(row.average_time_spent, 10.0);
        assert_eq!(row.conversion_rate, 100.0);
        assert_eq!(report.filters.region.as_deref(), Some("North"));
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let err = counselor_performance(&FailingStore, &ReportParams::default(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");
    }
}

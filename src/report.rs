use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::buckets::{lead_buckets, BucketReport, Interval};
use crate::dropoff::{dropoff_report, DropoffReport};
use crate::error::ReportResult;
use crate::filter::ReportParams;
use crate::funnel::{funnel_report, FunnelReport};
use crate::performance::{counselor_performance, PerformanceReport};
use crate::store::RecordStore;

/// Every report at once, as rendered by [`build_digest`].
pub struct Digest {
    pub funnel: FunnelReport,
    pub performance: PerformanceReport,
    pub dropoffs: DropoffReport,
    pub trend: BucketReport,
}

pub async fn collect_digest(
    store: &dyn RecordStore,
    params: &ReportParams,
    now: DateTime<Utc>,
    fanout: usize,
) -> ReportResult<Digest> {
    Ok(Digest {
        funnel: funnel_report(store, params).await?,
        performance: counselor_performance(store, params, fanout).await?,
        dropoffs: dropoff_report(store, now, fanout).await?,
        trend: lead_buckets(store, Interval::Weekly).await?,
    })
}

pub fn build_digest(digest: &Digest, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();
    let filters = &digest.funnel.filters;
    let window = match (filters.from.as_deref(), filters.to.as_deref()) {
        (None, None) => "all time".to_string(),
        (from, to) => format!("{} to {}", from.unwrap_or("start"), to.unwrap_or("now")),
    };

    let _ = writeln!(output, "# Admissions Pipeline Report");
    let _ = writeln!(
        output,
        "Generated {} for {}",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        window
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Funnel");

    let funnel = &digest.funnel;
    if funnel.total_leads == 0 {
        let _ = writeln!(output, "No leads recorded for this window.");
    } else {
        let _ = writeln!(output, "{} leads in total.", funnel.total_leads);
        for (status, count) in funnel.status_breakdown.rows() {
            let _ = writeln!(output, "- {status}: {count}");
        }
        let rates = &funnel.conversion_rates;
        let _ = writeln!(
            output,
            "- conversion: new→contacted {:.2}%, contacted→demoed {:.2}%, demoed→admitted {:.2}%",
            rates.new_to_contacted, rates.contacted_to_demoed, rates.demoed_to_admitted
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Counselor Ranking");

    if digest.performance.performance.is_empty() {
        let _ = writeln!(output, "No counselors match this window.");
    } else {
        for row in digest.performance.performance.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) converted {} of {} leads ({:.2}%), {} demos, avg {:.2} min",
                row.counselor.name,
                row.counselor.region,
                row.leads_converted,
                row.total_leads_handled,
                row.conversion_rate,
                row.demos_given,
                row.average_time_spent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Drop-off Causes");

    if digest.dropoffs.dropoff_reasons.is_empty() {
        let _ = writeln!(output, "No rejected leads on record.");
    } else {
        let _ = writeln!(
            output,
            "{} rejected leads (all time).",
            digest.dropoffs.total_rejected_leads
        );
        for share in &digest.dropoffs.dropoff_reasons {
            let _ = writeln!(
                output,
                "- {}: {} ({:.2}%)",
                share.reason.as_str(),
                share.count,
                share.percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Trend");

    if digest.trend.buckets.is_empty() {
        let _ = writeln!(output, "No leads recorded yet.");
    } else {
        for bucket in digest.trend.buckets.iter().rev().take(8) {
            let _ = writeln!(
                output,
                "- {}: {} leads, {} admitted ({:.2}%)",
                bucket.period, bucket.total_leads, bucket.admitted_leads, bucket.conversion_rate
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::seed;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn digest_covers_every_section() {
        let store = MemoryStore::new();
        let now = Utc::now();
        seed(&store, now).await.unwrap();

        let digest = collect_digest(&store, &ReportParams::default(), now, 4)
            .await
            .unwrap();
        let markdown = build_digest(&digest, now);

        assert!(markdown.starts_with("# Admissions Pipeline Report"));
        assert!(markdown.contains("for all time"));
        assert!(markdown.contains("50 leads in total."));
        assert!(markdown.contains("## Counselor Ranking"));
        assert!(markdown.contains("Amit Sharma (North)"));
        assert!(markdown.contains("## Drop-off Causes"));
        assert!(markdown.contains("## Weekly Trend"));
    }

    #[tokio::test]
    async fn empty_store_renders_placeholders() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let params = ReportParams {
            from: Some("2024-01-01".to_string()),
            ..ReportParams::default()
        };
        let digest = collect_digest(&store, &params, now, 1).await.unwrap();
        let markdown = build_digest(&digest, now);

        assert!(markdown.contains("for 2024-01-01 to now"));
        assert!(markdown.contains("No leads recorded for this window."));
        assert!(markdown.contains("No counselors match this window."));
        assert!(markdown.contains("No rejected leads on record."));
        assert!(markdown.contains("No leads recorded yet."));
    }
}

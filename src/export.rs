use serde::Serialize;
use tracing::info;

use crate::error::{ReportError, ReportResult};
use crate::filter::ReportParams;
use crate::funnel::funnel_report;
use crate::store::RecordStore;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Flattened report ready to hand to a file or response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedReport {
    /// Suggested file name, `<reportType>-report.csv`.
    pub filename: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct StatusRow<'a> {
    status: &'a str,
    count: u64,
}

fn csv_error(err: impl std::fmt::Display) -> ReportError {
    ReportError::Encoding(err.to_string())
}

/// Renders `report_type` as CSV. Only `funnel` can be exported.
pub async fn export_report(
    store: &dyn RecordStore,
    report_type: &str,
    params: &ReportParams,
) -> ReportResult<ExportedReport> {
    let body = match report_type {
        "funnel" => {
            let report = funnel_report(store, params).await?;
            let mut writer = csv::Writer::from_writer(Vec::new());
            for (status, count) in report.status_breakdown.rows() {
                writer
                    .serialize(StatusRow {
                        status: status.as_str(),
                        count,
                    })
                    .map_err(csv_error)?;
            }
            writer.into_inner().map_err(csv_error)?
        }
        other => return Err(ReportError::UnsupportedReport(other.to_string())),
    };

    info!(report_type, bytes = body.len(), "report exported");

    Ok(ExportedReport {
        filename: format!("{report_type}-report.csv"),
        content_type: CSV_CONTENT_TYPE,
        body,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::LeadStatus;
    use crate::store::testing::lead;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn funnel_export_has_one_row_per_status() {
        let store = MemoryStore::new();
        for status in [
            LeadStatus::Admitted,
            LeadStatus::Admitted,
            LeadStatus::Rejected,
            LeadStatus::New,
        ] {
            store.insert_lead(&lead(status, Utc::now(), None)).await.unwrap();
        }

        let export = export_report(&store, "funnel", &ReportParams::default())
            .await
            .unwrap();
        assert_eq!(export.filename, "funnel-report.csv");
        assert_eq!(export.content_type, "text/csv");

        let text = String::from_utf8(export.body).unwrap();
        assert_eq!(
            text,
            "status,count\nnew,1\ncontacted,0\ndemoed,0\nadmitted,2\nrejected,1\n"
        );

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<&str> = reader.headers().unwrap().iter().collect();
        assert_eq!(headers, vec!["status", "count"]);
        assert_eq!(reader.records().count(), LeadStatus::ALL.len());
    }

    #[tokio::test]
    async fn unknown_report_is_unsupported() {
        let store = MemoryStore::new();
        let err = export_report(&store, "dropoffs", &ReportParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_report");
        assert!(err.to_string().contains("dropoffs"));
    }

    #[tokio::test]
    async fn filters_are_validated_for_export() {
        let store = MemoryStore::new();
        let params = ReportParams {
            from: Some("yesterday".to_string()),
            ..ReportParams::default()
        };
        let err = export_report(&store, "funnel", &params).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}

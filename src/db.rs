use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ReportError, ReportResult};
use crate::filter::{CounselorFilter, DateRange, InteractionFilter, LeadFilter};
use crate::models::{Counselor, Interaction, Lead, LeadStatus};
use crate::store::RecordStore;

const LEAD_FIELDS: &str = "id, name, email, phone, source, created_at, counselor_id, status";
const INTERACTION_FIELDS: &str =
    "id, lead_id, counselor_id, interaction_type, timestamp, notes, duration";

/// Postgres-backed record store. Open once at startup, close at shutdown.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> ReportResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to Postgres");
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Removes every interaction, lead and counselor.
    pub async fn reset(&self) -> ReportResult<()> {
        sqlx::query(
            "TRUNCATE admissions.interactions, admissions.leads, admissions.counselors",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn push_range(query: &mut QueryBuilder<'_, Postgres>, column: &str, range: &DateRange) {
    if let Some(from) = range.from {
        query.push(format!(" AND {column} >= ")).push_bind(from);
    }
    if let Some(to) = range.to {
        query.push(format!(" AND {column} <= ")).push_bind(to);
    }
}

fn push_lead_predicates(query: &mut QueryBuilder<'_, Postgres>, filter: &LeadFilter) {
    query.push(" WHERE TRUE");
    push_range(query, "created_at", &filter.created);
    if let Some(source) = filter.source {
        query.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(counselor_id) = filter.counselor_id {
        query.push(" AND counselor_id = ").push_bind(counselor_id);
    }
}

fn status_counts_query(filter: &LeadFilter) -> QueryBuilder<'static, Postgres> {
    let mut query =
        QueryBuilder::<Postgres>::new("SELECT status, COUNT(*) AS leads FROM admissions.leads");
    push_lead_predicates(&mut query, filter);
    query.push(" GROUP BY status");
    query
}

fn decode_text<T>(row: &PgRow, column: &str) -> ReportResult<T>
where
    T: FromStr<Err = ReportError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|err: ReportError| sqlx::Error::Decode(Box::new(err)).into())
}

fn lead_from_row(row: &PgRow) -> ReportResult<Lead> {
    Ok(Lead {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        source: decode_text(row, "source")?,
        created_at: row.try_get("created_at")?,
        counselor_id: row.try_get("counselor_id")?,
        status: decode_text(row, "status")?,
    })
}

fn counselor_from_row(row: &PgRow) -> ReportResult<Counselor> {
    Ok(Counselor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        region: row.try_get("region")?,
    })
}

fn interaction_from_row(row: &PgRow) -> ReportResult<Interaction> {
    Ok(Interaction {
        id: row.try_get("id")?,
        lead_id: row.try_get("lead_id")?,
        counselor_id: row.try_get("counselor_id")?,
        interaction_type: decode_text(row, "interaction_type")?,
        timestamp: row.try_get("timestamp")?,
        notes: row.try_get("notes")?,
        duration: row.try_get("duration")?,
    })
}

/// Turns constraint violations into caller-facing errors.
fn map_write_error(err: sqlx::Error, entity: &'static str, reference: Uuid) -> ReportError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return ReportError::validation(format!(
                "{entity} {reference} conflicts with an existing record: {db_err}"
            ));
        }
        if db_err.is_foreign_key_violation() {
            return ReportError::not_found(
                "referenced record",
                db_err.constraint().unwrap_or("unknown constraint"),
            );
        }
    }
    ReportError::Store(err)
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_leads(&self, filter: &LeadFilter) -> ReportResult<Vec<Lead>> {
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {LEAD_FIELDS} FROM admissions.leads"));
        push_lead_predicates(&mut query, filter);
        query.push(" ORDER BY created_at, id");
        debug!(?filter, "find leads");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(lead_from_row).collect()
    }

    async fn count_leads(&self, filter: &LeadFilter) -> ReportResult<u64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM admissions.leads");
        push_lead_predicates(&mut query, filter);
        debug!(?filter, "count leads");

        let count: i64 = query.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn count_leads_by_status(
        &self,
        filter: &LeadFilter,
    ) -> ReportResult<Vec<(LeadStatus, u64)>> {
        let mut query = status_counts_query(filter);
        debug!(?filter, "count leads by status");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let count: i64 = row.try_get("leads")?;
                Ok((decode_text(row, "status")?, count.max(0) as u64))
            })
            .collect()
    }

    async fn find_counselors(&self, filter: &CounselorFilter) -> ReportResult<Vec<Counselor>> {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT id, name, region FROM admissions.counselors");
        if let Some(region) = &filter.region {
            query.push(" WHERE region = ").push_bind(region.clone());
        }
        query.push(" ORDER BY name, id");
        debug!(?filter, "find counselors");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(counselor_from_row).collect()
    }

    async fn find_interactions(
        &self,
        filter: &InteractionFilter,
    ) -> ReportResult<Vec<Interaction>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {INTERACTION_FIELDS} FROM admissions.interactions"
        ));
        query.push(" WHERE TRUE");
        push_range(&mut query, "timestamp", &filter.timestamp);
        if let Some(counselor_id) = filter.counselor_id {
            query.push(" AND counselor_id = ").push_bind(counselor_id);
        }
        if let Some(lead_id) = filter.lead_id {
            query.push(" AND lead_id = ").push_bind(lead_id);
        }
        if let Some(kind) = filter.interaction_type {
            query.push(" AND interaction_type = ").push_bind(kind.as_str());
        }
        query.push(" ORDER BY timestamp DESC, id");
        debug!(?filter, "find interactions");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(interaction_from_row).collect()
    }

    async fn latest_interaction(&self, lead_id: Uuid) -> ReportResult<Option<Interaction>> {
        let query = format!(
            "SELECT {INTERACTION_FIELDS} FROM admissions.interactions \
             WHERE lead_id = $1 ORDER BY timestamp DESC, id LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(interaction_from_row).transpose()
    }

    async fn lead(&self, id: Uuid) -> ReportResult<Option<Lead>> {
        let query = format!("SELECT {LEAD_FIELDS} FROM admissions.leads WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    async fn counselor(&self, id: Uuid) -> ReportResult<Option<Counselor>> {
        let row = sqlx::query("SELECT id, name, region FROM admissions.counselors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(counselor_from_row).transpose()
    }

    async fn insert_counselor(&self, counselor: &Counselor) -> ReportResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admissions.counselors (id, name, region)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(counselor.id)
        .bind(&counselor.name)
        .bind(&counselor.region)
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "counselor", counselor.id))?;
        Ok(())
    }

    async fn insert_lead(&self, lead: &Lead) -> ReportResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admissions.leads
            (id, name, email, phone, source, created_at, counselor_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(lead.id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(lead.source.as_str())
        .bind(lead.created_at)
        .bind(lead.counselor_id)
        .bind(lead.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "lead", lead.id))?;
        Ok(())
    }

    async fn insert_interaction(&self, interaction: &Interaction) -> ReportResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admissions.interactions
            (id, lead_id, counselor_id, interaction_type, timestamp, notes, duration)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(interaction.id)
        .bind(interaction.lead_id)
        .bind(interaction.counselor_id)
        .bind(interaction.interaction_type.as_str())
        .bind(interaction.timestamp)
        .bind(&interaction.notes)
        .bind(interaction.duration)
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, "interaction", interaction.id))?;
        Ok(())
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
    ) -> ReportResult<Option<Lead>> {
        let query = format!(
            "UPDATE admissions.leads SET status = $2 WHERE id = $1 RETURNING {LEAD_FIELDS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ReportParams;
    use crate::models::LeadSource;

    fn lead_sql(filter: &LeadFilter) -> String {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM admissions.leads");
        push_lead_predicates(&mut query, filter);
        query.sql().to_string()
    }

    #[test]
    fn status_counts_group_in_one_statement() {
        let filter = LeadFilter {
            counselor_id: Some(Uuid::new_v4()),
            ..LeadFilter::default()
        };
        assert_eq!(
            status_counts_query(&filter).sql(),
            "SELECT status, COUNT(*) AS leads FROM admissions.leads WHERE TRUE \
             AND counselor_id = $1 GROUP BY status"
        );
    }

    #[test]
    fn unrestricted_filter_adds_no_predicates() {
        assert_eq!(
            lead_sql(&LeadFilter::default()),
            "SELECT COUNT(*) FROM admissions.leads WHERE TRUE"
        );
    }

    #[test]
    fn every_predicate_is_bound() {
        let filter = ReportParams {
            from: Some("2024-01-01".to_string()),
            to: Some("2024-01-31".to_string()),
            source: Some("ads".to_string()),
            region: None,
        }
        .lead_filter()
        .unwrap()
        .with_status(LeadStatus::Admitted)
        .with_counselor(Uuid::new_v4());
        assert_eq!(filter.source, Some(LeadSource::Ads));

        assert_eq!(
            lead_sql(&filter),
            "SELECT COUNT(*) FROM admissions.leads WHERE TRUE AND created_at >= $1 \
             AND created_at <= $2 AND source = $3 AND status = $4 AND counselor_id = $5"
        );
    }

    #[test]
    fn open_ended_range_binds_one_side() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE TRUE");
        let range = DateRange::parse(None, Some("2024-06-30")).unwrap();
        push_range(&mut query, "timestamp", &range);
        assert_eq!(query.sql(), "SELECT 1 WHERE TRUE AND timestamp <= $1");
    }
}

//! Validated writes and listings for leads, counselors and interactions.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ReportError, ReportResult};
use crate::filter::{parse_bound, CounselorFilter, InteractionFilter, LeadFilter};
use crate::models::{
    Counselor, CounselorSummary, Interaction, InteractionType, InteractionView, Lead, LeadSource,
    LeadStatus, LeadView,
};
use crate::store::{counselor_index, RecordStore};

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9]\d{3,14}$").expect("phone pattern compiles"));

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub source: String,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub counselor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCounselor {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInteraction {
    pub lead_id: Uuid,
    pub counselor_id: Uuid,
    pub interaction_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub duration: Option<i32>,
}

fn require_text(value: &str, min_len: usize, message: &str) -> ReportResult<String> {
    let trimmed = value.trim();
    if trimmed.chars().count() < min_len {
        return Err(ReportError::validation(message));
    }
    Ok(trimmed.to_string())
}

/// Checks a lead's fields without touching the store.
pub fn validate_lead(input: &NewLead) -> ReportResult<(String, LeadSource, LeadStatus)> {
    let name = require_text(
        &input.name,
        2,
        "name is required and must be at least 2 characters",
    )?;
    if !EMAIL.is_match(input.email.trim()) {
        return Err(ReportError::validation("a valid email is required"));
    }
    let phone: String = input.phone.chars().filter(|c| !c.is_whitespace()).collect();
    if !PHONE.is_match(&phone) {
        return Err(ReportError::validation("a valid phone number is required"));
    }
    let source = input.source.trim().parse::<LeadSource>()?;
    let status = match input.status.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.parse::<LeadStatus>()?,
        _ => LeadStatus::default(),
    };
    Ok((name, source, status))
}

pub async fn create_lead(
    store: &dyn RecordStore,
    input: NewLead,
    now: DateTime<Utc>,
) -> ReportResult<Lead> {
    let (name, source, status) = validate_lead(&input)?;
    if let Some(counselor_id) = input.counselor_id {
        if store.counselor(counselor_id).await?.is_none() {
            return Err(ReportError::not_found("counselor", counselor_id));
        }
    }

    let lead = Lead {
        id: Uuid::new_v4(),
        name,
        email: input.email.trim().to_string(),
        phone: input.phone.trim().to_string(),
        source,
        created_at: input.created_at.unwrap_or(now),
        counselor_id: input.counselor_id,
        status,
    };
    store.insert_lead(&lead).await?;
    info!(lead = %lead.id, source = %lead.source, "lead created");
    Ok(lead)
}

pub async fn create_counselor(
    store: &dyn RecordStore,
    input: NewCounselor,
) -> ReportResult<Counselor> {
    let counselor = Counselor {
        id: Uuid::new_v4(),
        name: require_text(&input.name, 2, "counselor name is required")?,
        region: require_text(&input.region, 2, "region is required")?,
    };
    store.insert_counselor(&counselor).await?;
    info!(counselor = %counselor.id, region = %counselor.region, "counselor created");
    Ok(counselor)
}

/// Logs a touchpoint. Both references are checked before the write.
pub async fn create_interaction(
    store: &dyn RecordStore,
    input: NewInteraction,
    now: DateTime<Utc>,
) -> ReportResult<Interaction> {
    let interaction_type = input.interaction_type.trim().parse::<InteractionType>()?;
    let duration = input.duration.unwrap_or(0);
    if duration < 0 {
        return Err(ReportError::validation("duration cannot be negative"));
    }
    if store.lead(input.lead_id).await?.is_none() {
        return Err(ReportError::not_found("lead", input.lead_id));
    }
    if store.counselor(input.counselor_id).await?.is_none() {
        return Err(ReportError::not_found("counselor", input.counselor_id));
    }

    let interaction = Interaction {
        id: Uuid::new_v4(),
        lead_id: input.lead_id,
        counselor_id: input.counselor_id,
        interaction_type,
        timestamp: input.timestamp.unwrap_or(now),
        notes: input.notes.unwrap_or_default(),
        duration,
    };
    store.insert_interaction(&interaction).await?;
    info!(
        interaction = %interaction.id,
        lead = %interaction.lead_id,
        kind = %interaction.interaction_type,
        "interaction logged"
    );
    Ok(interaction)
}

/// Moves a lead to any status; no transition order is enforced.
pub async fn set_status(store: &dyn RecordStore, id: Uuid, status: &str) -> ReportResult<Lead> {
    let status = status.trim().parse::<LeadStatus>()?;
    let lead = store
        .update_lead_status(id, status)
        .await?
        .ok_or_else(|| ReportError::not_found("lead", id))?;
    info!(lead = %id, %status, "lead status updated");
    Ok(lead)
}

pub async fn list_leads(store: &dyn RecordStore) -> ReportResult<Vec<LeadView>> {
    let leads = store.find_leads(&LeadFilter::default()).await?;
    let counselors = counselor_index(store, leads.iter().filter_map(|l| l.counselor_id)).await?;
    Ok(leads
        .into_iter()
        .map(|lead| LeadView {
            counselor: lead
                .counselor_id
                .and_then(|id| counselors.get(&id))
                .map(CounselorSummary::from),
            lead,
        })
        .collect())
}

pub async fn list_counselors(store: &dyn RecordStore) -> ReportResult<Vec<Counselor>> {
    store.find_counselors(&CounselorFilter::default()).await
}

/// Interactions logged against a lead, newest first.
pub async fn lead_interactions(
    store: &dyn RecordStore,
    lead_id: Uuid,
) -> ReportResult<Vec<InteractionView>> {
    if store.lead(lead_id).await?.is_none() {
        return Err(ReportError::not_found("lead", lead_id));
    }
    let interactions = store
        .find_interactions(&InteractionFilter {
            lead_id: Some(lead_id),
            ..InteractionFilter::default()
        })
        .await?;
    let counselors = counselor_index(store, interactions.iter().map(|i| i.counselor_id)).await?;
    Ok(interactions
        .into_iter()
        .map(|interaction| InteractionView {
            counselor: counselors
                .get(&interaction.counselor_id)
                .map(CounselorSummary::from),
            interaction,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub counselors: usize,
    pub leads: usize,
    pub interactions: usize,
}

const SEED_COUNSELORS: [(&str, &str); 4] = [
    ("Amit Sharma", "North"),
    ("Priya Reddy", "South"),
    ("Rahul Das", "East"),
    ("Neha Verma", "West"),
];

const SEED_NAMES: [&str; 10] = [
    "Rohan Mehta",
    "Sneha Kapoor",
    "Ankit Joshi",
    "Divya Nair",
    "Kunal Singh",
    "Isha Agarwal",
    "Varun Rao",
    "Meena Sharma",
    "Arjun Yadav",
    "Pooja Jain",
];

/// Loads a deterministic sample pipeline spread over the 30 days before `now`.
///
/// Writes are not wrapped in a transaction: a store failure partway leaves the
/// rows written so far, and the `seed` command recovers by resetting and seeding
/// again.
pub async fn seed(store: &dyn RecordStore, now: DateTime<Utc>) -> ReportResult<SeedSummary> {
    let mut counselors = Vec::new();
    for (name, region) in SEED_COUNSELORS {
        let counselor = create_counselor(
            store,
            NewCounselor {
                name: name.to_string(),
                region: region.to_string(),
            },
        )
        .await?;
        counselors.push(counselor);
    }

    let mut summary = SeedSummary {
        counselors: counselors.len(),
        ..SeedSummary::default()
    };

    for i in 0..50usize {
        let counselor = &counselors[i % counselors.len()];
        let name = SEED_NAMES[i % SEED_NAMES.len()];
        let created_at = now - Duration::hours(((i * 53) % (30 * 24)) as i64);
        let lead = create_lead(
            store,
            NewLead {
                name: name.to_string(),
                email: format!("{}{i}@gmail.com", name.to_lowercase().replace(' ', ".")),
                phone: format!("+91{}", 9_000_000_000u64 + i as u64),
                source: LeadSource::ALL[i % LeadSource::ALL.len()].to_string(),
                status: Some(LeadStatus::ALL[(i * 3 + i / 5) % LeadStatus::ALL.len()].to_string()),
                created_at: Some(created_at),
                counselor_id: Some(counselor.id),
            },
            now,
        )
        .await?;
        summary.leads += 1;

        for j in 0..(i % 3 + 1) {
            let kind = InteractionType::ALL[j % InteractionType::ALL.len()];
            create_interaction(
                store,
                NewInteraction {
                    lead_id: lead.id,
                    counselor_id: counselor.id,
                    interaction_type: kind.to_string(),
                    timestamp: Some(created_at + Duration::days(j as i64)),
                    notes: Some(format!("{kind} interaction with {}", lead.name)),
                    duration: Some(15 + ((i * 7 + j * 11) % 45) as i32),
                },
                now,
            )
            .await?;
            summary.interactions += 1;
        }
    }

    info!(
        counselors = summary.counselors,
        leads = summary.leads,
        interactions = summary.interactions,
        "sample data seeded"
    );
    Ok(summary)
}

fn at_line(line: usize, err: ReportError) -> ReportError {
    match err {
        ReportError::Validation(message) => {
            ReportError::validation(format!("line {line}: {message}"))
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct CsvLead {
    name: String,
    email: String,
    phone: String,
    source: String,
    status: Option<String>,
    created_at: Option<String>,
    counselor_name: Option<String>,
}

/// Imports leads from CSV (`name,email,phone,source,status,created_at,counselor_name`).
///
/// Rows whose email is already registered are skipped. Every row is checked before
/// the first write, so a bad row aborts the import with its line number and leaves
/// the store untouched. A store failure during the write phase can still leave a
/// prefix of the file committed; rerunning the import skips those rows by email.
pub async fn import_leads<R: Read>(
    store: &dyn RecordStore,
    source: R,
    now: DateTime<Utc>,
) -> ReportResult<ImportSummary> {
    let counselors: HashMap<String, Uuid> = store
        .find_counselors(&CounselorFilter::default())
        .await?
        .into_iter()
        .map(|c| (c.name, c.id))
        .collect();
    let mut known_emails: HashSet<String> = store
        .find_leads(&LeadFilter::default())
        .await?
        .into_iter()
        .map(|l| l.email)
        .collect();

    let mut reader = csv::Reader::from_reader(source);
    let mut summary = ImportSummary::default();
    let mut pending = Vec::new();

    for (index, result) in reader.deserialize::<CsvLead>().enumerate() {
        let line = index + 2;
        let row = result.map_err(|err| at_line(line, ReportError::validation(err.to_string())))?;

        let email = row.email.trim().to_string();
        if known_emails.contains(&email) {
            warn!(line, %email, "skipping lead with registered email");
            summary.skipped += 1;
            continue;
        }

        let counselor_id = match row.counselor_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(
                *counselors
                    .get(name)
                    .ok_or_else(|| ReportError::not_found("counselor", name))?,
            ),
            _ => None,
        };
        let created_at = match row.created_at.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Some(parse_bound(raw).map_err(|err| at_line(line, err))?)
            }
            _ => None,
        };

        let input = NewLead {
            name: row.name,
            email: email.clone(),
            phone: row.phone,
            source: row.source,
            status: row.status,
            created_at,
            counselor_id,
        };
        validate_lead(&input).map_err(|err| at_line(line, err))?;
        known_emails.insert(email);
        pending.push(input);
    }

    for input in pending {
        create_lead(store, input, now).await?;
        summary.inserted += 1;
    }

    info!(inserted = summary.inserted, skipped = summary.skipped, "leads imported");
    Ok(summary)
}

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use admission_pipeline_analytics::buckets::{lead_buckets, Interval};
use admission_pipeline_analytics::config::Config;
use admission_pipeline_analytics::db::PgStore;
use admission_pipeline_analytics::dropoff::dropoff_report;
use admission_pipeline_analytics::export::export_report;
use admission_pipeline_analytics::filter::{parse_bound, ReportParams};
use admission_pipeline_analytics::funnel::funnel_report;
use admission_pipeline_analytics::intake::{self, NewCounselor, NewInteraction, NewLead};
use admission_pipeline_analytics::performance::counselor_performance;
use admission_pipeline_analytics::report;
use admission_pipeline_analytics::{RecordStore, ReportError};

#[derive(Parser)]
#[command(name = "admission-pipeline-analytics")]
#[command(
    about = "Lead, counselor and interaction tracking with admissions funnel analytics",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Window {
    /// Inclusive lower bound, RFC 3339 or YYYY-MM-DD
    #[arg(long)]
    from: Option<String>,
    /// Inclusive upper bound, RFC 3339 or YYYY-MM-DD
    #[arg(long)]
    to: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Replace all data with a deterministic sample pipeline
    Seed,
    /// Import leads from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register a counselor
    AddCounselor {
        #[arg(long)]
        name: String,
        #[arg(long)]
        region: String,
    },
    /// Register a lead
    AddLead {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        counselor: Option<Uuid>,
    },
    /// Log an interaction between a counselor and a lead
    AddInteraction {
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        counselor: Uuid,
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        notes: Option<String>,
        /// Minutes spent
        #[arg(long)]
        duration: Option<i32>,
        /// When it happened; defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Move a lead to another status
    SetStatus {
        #[arg(long)]
        lead: Uuid,
        #[arg(long)]
        status: String,
    },
    /// List leads with their counselors
    Leads,
    /// List counselors
    Counselors,
    /// List a lead's interactions, newest first
    Interactions {
        #[arg(long)]
        lead: Uuid,
    },
    /// Status breakdown and stage conversion rates
    Funnel {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        source: Option<String>,
    },
    /// Per-counselor volume, engagement and conversion, ranked
    CounselorPerformance {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        region: Option<String>,
    },
    /// Drop-off causes for every rejected lead
    Dropoffs,
    /// Lead volume and conversion per week or month
    LeadBuckets {
        #[arg(long, default_value = "weekly")]
        interval: String,
    },
    /// Export a report as CSV
    Export {
        report_type: String,
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        source: Option<String>,
        /// Destination file; defaults to <report-type>-report.csv
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write every report into one markdown document
    Digest {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli, config: &Config, store: &PgStore) -> anyhow::Result<()> {
    let now = Utc::now();
    let records: &dyn RecordStore = store;

    match cli.command {
        Commands::InitDb => {
            store.init_db().await.context("failed to apply migrations")?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.reset().await?;
            let summary = intake::seed(records, now).await?;
            print_json(&summary)?;
        }
        Commands::Import { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = intake::import_leads(records, file, now).await?;
            println!(
                "Inserted {} leads from {} ({} skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped
            );
        }
        Commands::AddCounselor { name, region } => {
            let counselor =
                intake::create_counselor(records, NewCounselor { name, region }).await?;
            print_json(&counselor)?;
        }
        Commands::AddLead {
            name,
            email,
            phone,
            source,
            status,
            counselor,
        } => {
            let input = NewLead {
                name,
                email,
                phone,
                source,
                status,
                created_at: None,
                counselor_id: counselor,
            };
            print_json(&intake::create_lead(records, input, now).await?)?;
        }
        Commands::AddInteraction {
            lead,
            counselor,
            kind,
            notes,
            duration,
            at,
        } => {
            let input = NewInteraction {
                lead_id: lead,
                counselor_id: counselor,
                interaction_type: kind,
                timestamp: at.as_deref().map(parse_bound).transpose()?,
                notes,
                duration,
            };
            print_json(&intake::create_interaction(records, input, now).await?)?;
        }
        Commands::SetStatus { lead, status } => {
            print_json(&intake::set_status(records, lead, &status).await?)?;
        }
        Commands::Leads => print_json(&intake::list_leads(records).await?)?,
        Commands::Counselors => print_json(&intake::list_counselors(records).await?)?,
        Commands::Interactions { lead } => {
            print_json(&intake::lead_interactions(records, lead).await?)?;
        }
        Commands::Funnel { window, source } => {
            let params = ReportParams {
                from: window.from,
                to: window.to,
                source,
                region: None,
            };
            print_json(&funnel_report(records, &params).await?)?;
        }
        Commands::CounselorPerformance { window, region } => {
            let params = ReportParams {
                from: window.from,
                to: window.to,
                source: None,
                region,
            };
            print_json(&counselor_performance(records, &params, config.fanout).await?)?;
        }
        Commands::Dropoffs => {
            print_json(&dropoff_report(records, now, config.fanout).await?)?;
        }
        Commands::LeadBuckets { interval } => {
            let interval: Interval = interval.parse()?;
            print_json(&lead_buckets(records, interval).await?)?;
        }
        Commands::Export {
            report_type,
            window,
            source,
            out,
        } => {
            let params = ReportParams {
                from: window.from,
                to: window.to,
                source,
                region: None,
            };
            let export = export_report(records, &report_type, &params).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(&export.filename));
            std::fs::write(&out, &export.body)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Wrote {} ({}) to {}.",
                export.filename,
                export.content_type,
                out.display()
            );
        }
        Commands::Digest {
            window,
            source,
            region,
            out,
        } => {
            let params = ReportParams {
                from: window.from,
                to: window.to,
                source,
                region,
            };
            let digest = report::collect_digest(records, &params, now, config.fanout).await?;
            std::fs::write(&out, report::build_digest(&digest, now))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn start(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let store = PgStore::connect(&config.database_url, config.max_connections)
        .await
        .context("failed to connect to Postgres")?;

    let result = run(cli, &config, &store).await;
    store.close().await;
    info!("store closed");
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match start(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<ReportError>() {
            Some(report_err) => {
                error!(kind = report_err.kind(), error = %report_err, "request failed");
                let envelope = ErrorEnvelope {
                    error: ErrorBody {
                        kind: report_err.kind(),
                        message: report_err.to_string(),
                    },
                };
                if let Ok(json) = serde_json::to_string(&envelope) {
                    eprintln!("{json}");
                }
                if report_err.is_caller_error() {
                    ExitCode::from(2)
                } else {
                    ExitCode::FAILURE
                }
            }
            None => {
                error!(error = ?err, "command failed");
                eprintln!("Error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

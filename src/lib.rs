//! Admissions pipeline analytics: leads, counselors and interactions in, funnel,
//! counselor performance, drop-off attribution and trend reports out.

pub mod buckets;
pub mod config;
pub mod db;
pub mod dropoff;
pub mod error;
pub mod export;
pub mod filter;
pub mod funnel;
pub mod intake;
pub mod models;
pub mod performance;
pub mod report;
pub mod store;

pub use error::{ReportError, ReportResult};
pub use store::{MemoryStore, RecordStore};

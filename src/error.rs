use thiserror::Error;

/// Failures surfaced by the store, the intake layer and the report analyzers.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Malformed caller input, such as an unparseable date or an unknown source.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced lead or counselor does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("unsupported report type: {0}")]
    UnsupportedReport(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// A computed report could not be serialized for export.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl ReportError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable name for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::UnsupportedReport(_) => "unsupported_report",
            Self::Store(_) => "store",
            Self::Encoding(_) => "encoding",
        }
    }

    /// True when the caller can fix the request.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Encoding(_))
    }
}

pub type ReportResult<T> = Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ReportError::validation("bad date").kind(), "validation");
        assert_eq!(ReportError::not_found("lead", "42").kind(), "not_found");
        assert_eq!(
            ReportError::UnsupportedReport("pdf".to_string()).kind(),
            "unsupported_report"
        );
        assert_eq!(ReportError::Store(sqlx::Error::PoolTimedOut).kind(), "store");
    }

    #[test]
    fn store_errors_are_not_caller_errors() {
        assert!(ReportError::validation("x").is_caller_error());
        assert!(!ReportError::Store(sqlx::Error::PoolClosed).is_caller_error());
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = ReportError::not_found("counselor", "abc");
        assert_eq!(err.to_string(), "counselor abc not found");
    }
}

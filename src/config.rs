use anyhow::Context;

/// Process configuration read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    /// Upper bound on per-entity store queries a single report keeps in flight.
    pub fanout: usize,
}

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_FANOUT: usize = 8;

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().with_context(|| {
                format!("DB_MAX_CONNECTIONS must be a positive integer, got {raw:?}")
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let fanout = match lookup("ANALYTICS_FANOUT") {
            Some(raw) => raw.trim().parse::<usize>().with_context(|| {
                format!("ANALYTICS_FANOUT must be a positive integer, got {raw:?}")
            })?,
            None => DEFAULT_FANOUT,
        };

        Ok(Self {
            database_url,
            max_connections: max_connections.max(1),
            fanout: fanout.max(1),
        })
    }
}

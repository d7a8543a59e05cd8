use serde::{Deserialize, Serialize};

/// Maximum number of entries retained per stream after a bulk insert.
const DEFAULT_MAX_STREAM_LENGTH: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis_url: String,
    pub database_url: String,
    pub streams: StreamConfig,
}

/// Tunables for stream maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Entries kept per stream; lowest-ranked entries beyond this are trimmed.
    pub max_stream_length: usize,
    /// Statuses published further back than this many hours are fanned out
    /// on the backfill queue instead of the interactive one.
    pub backfill_threshold_hours: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_stream_length: DEFAULT_MAX_STREAM_LENGTH,
            backfill_threshold_hours: 24,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database_url: std::env::var("DATABASE_URL")?,
            streams: StreamConfig {
                max_stream_length: std::env::var("MAX_STREAM_LENGTH")
                    .unwrap_or_else(|_| DEFAULT_MAX_STREAM_LENGTH.to_string())
                    .parse()?,
                backfill_threshold_hours: std::env::var("BACKFILL_THRESHOLD_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()?,
            },
        })
    }
}

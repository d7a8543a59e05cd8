pub mod config;
pub mod error;
pub mod fanout;
pub mod models;
pub mod population;
pub mod queries;
pub mod store;
pub mod streams;
pub mod tasks;

pub use config::{Config, StreamConfig};
pub use error::{Result, StreamError};

// Re-export the engine surface
pub use fanout::FanoutEngine;
pub use population::PopulationJob;
pub use queries::{GraphQueries, PgGraphQueries};
pub use store::{RedisStreamStore, SortedSetStore};
pub use streams::audience::AudienceResolver;
pub use streams::{StreamKind, STATUS_STREAMS};
pub use tasks::{run_job, JobQueue, QueueName, StreamJob};

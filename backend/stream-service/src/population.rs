//! Cold-start and repair population.
//!
//! Rebuilds a user's streams from the backing store: one inverse
//! "what is visible to this user" query per variant, bulk-loaded and
//! trimmed. Additive only — existing entries are upserted, never cleared
//! first, so a population run can only converge a stream, not corrupt it.
//! Stale entries from deleted items wait for their own removal events.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::queries::GraphQueries;
use crate::store::SortedSetStore;
use crate::streams::{StreamKind, STATUS_STREAMS};

pub struct PopulationJob {
    store: Arc<dyn SortedSetStore>,
    queries: Arc<dyn GraphQueries>,
    config: StreamConfig,
}

impl PopulationJob {
    pub fn new(
        store: Arc<dyn SortedSetStore>,
        queries: Arc<dyn GraphQueries>,
        config: StreamConfig,
    ) -> Self {
        Self {
            store,
            queries,
            config,
        }
    }

    /// Fill one status stream for a user. Safe to re-run.
    pub async fn populate_status_stream(&self, user_id: Uuid, kind: StreamKind) -> Result<()> {
        let limit = self.config.max_stream_length;
        let started = Instant::now();
        let statuses = match kind {
            StreamKind::Home => self.queries.home_statuses_for(user_id, None, limit).await?,
            StreamKind::Local => self.queries.local_statuses_for(user_id, None, limit).await?,
            StreamKind::Books => self.queries.books_statuses_for(user_id, None, limit).await?,
            StreamKind::Lists => {
                return Err(StreamError::InvalidVariant(
                    "lists streams are populated separately".to_string(),
                ))
            }
        };
        let entries: Vec<(Uuid, f64)> = statuses.iter().map(|s| (s.id, s.rank())).collect();
        let key = kind.stream_id(user_id);
        self.store.bulk_add(&key, &entries).await?;
        self.store.trim(&key, limit).await?;
        info!(
            %user_id,
            stream = %kind,
            entries = entries.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Populated stream"
        );
        Ok(())
    }

    /// Fill the lists stream for a user. Safe to re-run.
    pub async fn populate_lists_stream(&self, user_id: Uuid) -> Result<()> {
        let limit = self.config.max_stream_length;
        let lists = self.queries.lists_for(user_id, None, limit).await?;
        let entries: Vec<(Uuid, f64)> = lists.iter().map(|l| (l.id, l.rank())).collect();
        let key = StreamKind::Lists.stream_id(user_id);
        self.store.bulk_add(&key, &entries).await?;
        self.store.trim(&key, limit).await?;
        info!(%user_id, entries = entries.len(), "Populated lists stream");
        Ok(())
    }

    /// Rebuild every stream for a user; administrative repair entry point.
    /// Continues past per-variant failures so one bad query doesn't leave
    /// the remaining streams empty.
    pub async fn populate_all(&self, user_id: Uuid) -> Result<()> {
        let mut last_err = None;
        for kind in STATUS_STREAMS {
            if let Err(e) = self.populate_status_stream(user_id, kind).await {
                warn!(%user_id, stream = %kind, error = %e, "Stream population failed");
                last_err = Some(e);
            }
        }
        if let Err(e) = self.populate_lists_stream(user_id).await {
            warn!(%user_id, error = %e, "Lists stream population failed");
            last_err = Some(e);
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

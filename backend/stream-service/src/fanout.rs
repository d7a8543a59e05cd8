//! The fan-out engine.
//!
//! Event handlers (`handle_*`) run at the point a domain mutation commits:
//! they decide what work is needed and enqueue it, choosing the interactive
//! or backfill queue. Worker operations (everything else) run later on the
//! pool draining those queues and perform the actual cache mutations.
//!
//! Every worker operation is idempotent: adds are upserts keyed by item id,
//! removes are unconditional, so a redelivered job converges to the same
//! stream state.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::models::Status;
use crate::queries::GraphQueries;
use crate::store::SortedSetStore;
use crate::streams::audience::AudienceResolver;
use crate::streams::{StreamKind, STATUS_STREAMS};
use crate::tasks::{JobQueue, QueueName, StreamJob};

/// Streams re-filled when the last block between two users is lifted.
/// Home is deliberately absent: blocking severed the follow, so home
/// content returns through re-following, not unblocking.
const UNBLOCK_STREAMS: [StreamKind; 2] = [StreamKind::Local, StreamKind::Books];

pub struct FanoutEngine {
    store: Arc<dyn SortedSetStore>,
    queries: Arc<dyn GraphQueries>,
    queue: Arc<dyn JobQueue>,
    resolver: AudienceResolver,
    config: StreamConfig,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn SortedSetStore>,
        queries: Arc<dyn GraphQueries>,
        queue: Arc<dyn JobQueue>,
        config: StreamConfig,
    ) -> Self {
        let resolver = AudienceResolver::new(queries.clone());
        Self {
            store,
            queries,
            queue,
            resolver,
            config,
        }
    }

    pub fn resolver(&self) -> &AudienceResolver {
        &self.resolver
    }

    /// Pick a queue for a freshly saved status. Old publication dates, or a
    /// creation timestamp trailing far behind publication, mean an import or
    /// slow federation; those fan out on the backfill queue.
    fn fanout_queue(&self, status: &Status) -> QueueName {
        let threshold = Duration::hours(self.config.backfill_threshold_hours);
        if status.published_date < Utc::now() - threshold
            || status.created_date > status.published_date + threshold
        {
            QueueName::ImportTriggered
        } else {
            QueueName::Streams
        }
    }

    // ---- event handlers: called where mutations commit ----

    /// A status row was written. `created` distinguishes insert from update.
    pub async fn handle_status_saved(&self, status: &Status, created: bool) -> Result<()> {
        if status.deleted {
            // imports can hand us statuses that are already tombstones
            return self
                .queue
                .enqueue(
                    StreamJob::RemoveStatus {
                        status_id: status.id,
                    },
                    QueueName::Streams,
                )
                .await;
        }
        if created {
            let queue = self.fanout_queue(status);
            debug!(status_id = %status.id, queue = %queue, "Scheduling status fan-out");
            self.queue
                .enqueue(
                    StreamJob::AddStatus {
                        status_id: status.id,
                        increment_unread: true,
                    },
                    queue,
                )
                .await
        } else {
            // edits and privacy changes re-resolve the audience everywhere
            self.queue
                .enqueue(
                    StreamJob::RefreshStatus {
                        status_id: status.id,
                    },
                    QueueName::Streams,
                )
                .await
        }
    }

    pub async fn handle_status_deleted(&self, status_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(StreamJob::RemoveStatus { status_id }, QueueName::Streams)
            .await
    }

    /// A new local account: build every stream from scratch, one job per
    /// variant so a single failure doesn't void the rest.
    pub async fn handle_account_created(&self, user_id: Uuid) -> Result<()> {
        for kind in STATUS_STREAMS {
            self.queue
                .enqueue(
                    StreamJob::PopulateStream {
                        user_id,
                        stream: kind,
                    },
                    QueueName::Streams,
                )
                .await?;
        }
        self.queue
            .enqueue(StreamJob::PopulateLists { user_id }, QueueName::Streams)
            .await
    }

    pub async fn handle_account_deactivated(&self, user_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(StreamJob::DeleteStreams { user_id }, QueueName::Streams)
            .await
    }

    /// Blocks suppress visibility both ways for every stream of the pair.
    pub async fn handle_block_created(&self, subject: Uuid, object: Uuid) -> Result<()> {
        for (viewer, author) in [(subject, object), (object, subject)] {
            if !self.is_local(viewer).await? {
                continue;
            }
            self.queue
                .enqueue(
                    StreamJob::RemoveUserStatuses {
                        viewer_id: viewer,
                        author_id: author,
                        streams: STATUS_STREAMS.to_vec(),
                    },
                    QueueName::Streams,
                )
                .await?;
            self.queue
                .enqueue(
                    StreamJob::RemoveUserLists {
                        viewer_id: viewer,
                        owner_id: author,
                    },
                    QueueName::Streams,
                )
                .await?;
        }
        Ok(())
    }

    /// Lifting a block restores content only when no reciprocal block
    /// remains; restoration recomputes from the backing store, never from a
    /// memory of what was removed.
    pub async fn handle_block_removed(&self, subject: Uuid, object: Uuid) -> Result<()> {
        if self.queries.block_exists(object, subject).await? {
            debug!(%subject, %object, "Reciprocal block still in place, skipping restore");
            return Ok(());
        }
        for (viewer, author) in [(subject, object), (object, subject)] {
            if !self.is_local(viewer).await? {
                continue;
            }
            self.queue
                .enqueue(
                    StreamJob::AddUserStatuses {
                        viewer_id: viewer,
                        author_id: author,
                        streams: UNBLOCK_STREAMS.to_vec(),
                    },
                    QueueName::Streams,
                )
                .await?;
            self.queue
                .enqueue(
                    StreamJob::AddUserLists {
                        viewer_id: viewer,
                        owner_id: author,
                    },
                    QueueName::Streams,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn handle_follow_created(&self, follower: Uuid, followed: Uuid) -> Result<()> {
        if !self.is_local(follower).await? {
            return Ok(());
        }
        self.queue
            .enqueue(
                StreamJob::AddUserStatuses {
                    viewer_id: follower,
                    author_id: followed,
                    streams: vec![StreamKind::Home],
                },
                QueueName::Streams,
            )
            .await?;
        self.queue
            .enqueue(
                StreamJob::AddUserLists {
                    viewer_id: follower,
                    owner_id: followed,
                },
                QueueName::Streams,
            )
            .await
    }

    pub async fn handle_follow_removed(&self, follower: Uuid, followed: Uuid) -> Result<()> {
        if !self.is_local(follower).await? {
            return Ok(());
        }
        self.queue
            .enqueue(
                StreamJob::RemoveUserStatuses {
                    viewer_id: follower,
                    author_id: followed,
                    streams: vec![StreamKind::Home],
                },
                QueueName::Streams,
            )
            .await?;
        self.queue
            .enqueue(
                StreamJob::RemoveUserLists {
                    viewer_id: follower,
                    owner_id: followed,
                },
                QueueName::Streams,
            )
            .await
    }

    pub async fn handle_list_saved(&self, list_id: Uuid, created: bool) -> Result<()> {
        let job = if created {
            StreamJob::AddList { list_id }
        } else {
            StreamJob::RefreshList { list_id }
        };
        self.queue.enqueue(job, QueueName::Streams).await
    }

    pub async fn handle_list_deleted(&self, list_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(StreamJob::RemoveList { list_id }, QueueName::Streams)
            .await
    }

    pub async fn handle_group_member_added(&self, group_id: Uuid, user_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(
                StreamJob::AddGroupLists { group_id, user_id },
                QueueName::Streams,
            )
            .await
    }

    pub async fn handle_group_member_removed(&self, group_id: Uuid, user_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(
                StreamJob::RemoveGroupLists { group_id, user_id },
                QueueName::Streams,
            )
            .await
    }

    // ---- worker operations: called by the pool via run_job ----

    /// Fan a status out into every eligible stream.
    pub async fn add_status(&self, status_id: Uuid, increment_unread: bool) -> Result<()> {
        let Some(status) = self.queries.get_status(status_id).await? else {
            warn!(%status_id, "Status vanished before fan-out, skipping");
            return Ok(());
        };
        if status.deleted {
            return self.remove_status(status_id).await;
        }
        let rank = status.rank();
        let mut fanned_out = 0;
        for kind in STATUS_STREAMS {
            let audience = self.resolver.status_audience(kind, &status).await?;
            for user_id in audience {
                let key = kind.stream_id(user_id);
                self.store.add(&key, status.id, rank).await?;
                self.store.trim(&key, self.config.max_stream_length).await?;
                if increment_unread {
                    self.store
                        .increment_counter(&kind.unread_id(user_id))
                        .await?;
                }
                fanned_out += 1;
            }
        }
        debug!(%status_id, streams = fanned_out, "Status fanned out");
        Ok(())
    }

    /// Drop a status from every stream that could carry it.
    pub async fn remove_status(&self, status_id: Uuid) -> Result<()> {
        let keys = self.all_status_stream_keys().await?;
        self.store.remove_many(&keys, status_id).await?;
        info!(%status_id, "Status removed from all streams");
        Ok(())
    }

    /// Remove-then-add so audience shrinkage (privacy downgrade, book
    /// unlinking) takes effect, not just growth.
    pub async fn refresh_status(&self, status_id: Uuid) -> Result<()> {
        let keys = self.all_status_stream_keys().await?;
        self.store.remove_many(&keys, status_id).await?;
        self.add_status(status_id, false).await
    }

    /// Bulk-load one author's currently visible statuses into a viewer's
    /// streams (follow formed, block lifted).
    pub async fn add_user_statuses(
        &self,
        viewer_id: Uuid,
        author_id: Uuid,
        streams: &[StreamKind],
    ) -> Result<()> {
        let limit = self.config.max_stream_length;
        for kind in streams {
            let statuses = match kind {
                StreamKind::Home => {
                    self.queries
                        .home_statuses_for(viewer_id, Some(author_id), limit)
                        .await?
                }
                StreamKind::Local => {
                    self.queries
                        .local_statuses_for(viewer_id, Some(author_id), limit)
                        .await?
                }
                StreamKind::Books => {
                    self.queries
                        .books_statuses_for(viewer_id, Some(author_id), limit)
                        .await?
                }
                StreamKind::Lists => {
                    return Err(StreamError::InvalidVariant(
                        "lists streams carry book lists, not statuses".to_string(),
                    ))
                }
            };
            let entries: Vec<(Uuid, f64)> = statuses.iter().map(|s| (s.id, s.rank())).collect();
            let key = kind.stream_id(viewer_id);
            self.store.bulk_add(&key, &entries).await?;
            self.store.trim(&key, limit).await?;
            debug!(%viewer_id, %author_id, stream = %kind, added = entries.len(), "Added user statuses");
        }
        Ok(())
    }

    /// Drop every status by one author from a viewer's streams. No
    /// visibility check: removal is unconditional and idempotent.
    pub async fn remove_user_statuses(
        &self,
        viewer_id: Uuid,
        author_id: Uuid,
        streams: &[StreamKind],
    ) -> Result<()> {
        let status_ids = self.queries.status_ids_by_user(author_id).await?;
        if status_ids.is_empty() {
            return Ok(());
        }
        for kind in streams {
            let key = kind.stream_id(viewer_id);
            self.store.bulk_remove(&key, &status_ids).await?;
        }
        debug!(%viewer_id, %author_id, count = status_ids.len(), "Removed user statuses");
        Ok(())
    }

    /// Fan a list out into every audience member's lists stream.
    pub async fn add_list(&self, list_id: Uuid) -> Result<()> {
        let Some(list) = self.queries.get_list(list_id).await? else {
            warn!(%list_id, "List vanished before fan-out, skipping");
            return Ok(());
        };
        let rank = list.rank();
        let audience = self.resolver.list_audience(&list).await?;
        for user_id in audience {
            let key = StreamKind::Lists.stream_id(user_id);
            self.store.add(&key, list.id, rank).await?;
            self.store.trim(&key, self.config.max_stream_length).await?;
        }
        Ok(())
    }

    pub async fn remove_list(&self, list_id: Uuid) -> Result<()> {
        let keys = self.all_lists_stream_keys().await?;
        self.store.remove_many(&keys, list_id).await?;
        info!(%list_id, "List removed from all streams");
        Ok(())
    }

    pub async fn refresh_list(&self, list_id: Uuid) -> Result<()> {
        let keys = self.all_lists_stream_keys().await?;
        self.store.remove_many(&keys, list_id).await?;
        self.add_list(list_id).await
    }

    pub async fn add_user_lists(&self, viewer_id: Uuid, owner_id: Uuid) -> Result<()> {
        let limit = self.config.max_stream_length;
        let lists = self
            .queries
            .lists_for(viewer_id, Some(owner_id), limit)
            .await?;
        let entries: Vec<(Uuid, f64)> = lists.iter().map(|l| (l.id, l.rank())).collect();
        let key = StreamKind::Lists.stream_id(viewer_id);
        self.store.bulk_add(&key, &entries).await?;
        self.store.trim(&key, limit).await?;
        Ok(())
    }

    pub async fn remove_user_lists(&self, viewer_id: Uuid, owner_id: Uuid) -> Result<()> {
        let list_ids = self.queries.list_ids_by_user(owner_id).await?;
        if list_ids.is_empty() {
            return Ok(());
        }
        let key = StreamKind::Lists.stream_id(viewer_id);
        self.store.bulk_remove(&key, &list_ids).await
    }

    /// A user joined a group: surface the group's curated lists for them.
    /// Membership is re-checked through the resolver, not assumed.
    pub async fn add_group_lists(&self, group_id: Uuid, user_id: Uuid) -> Result<()> {
        let lists = self.queries.lists_curated_by_group(group_id).await?;
        let key = StreamKind::Lists.stream_id(user_id);
        for list in lists {
            let audience = self.resolver.list_audience(&list).await?;
            if audience.contains(&user_id) {
                self.store.add(&key, list.id, list.rank()).await?;
            }
        }
        self.store
            .trim(&key, self.config.max_stream_length)
            .await?;
        Ok(())
    }

    /// A user left a group: drop its curated lists, except any they own.
    pub async fn remove_group_lists(&self, group_id: Uuid, user_id: Uuid) -> Result<()> {
        let lists = self.queries.lists_curated_by_group(group_id).await?;
        let ids: Vec<Uuid> = lists
            .iter()
            .filter(|l| l.user_id != user_id)
            .map(|l| l.id)
            .collect();
        let key = StreamKind::Lists.stream_id(user_id);
        self.store.bulk_remove(&key, &ids).await
    }

    /// Tear down every stream a deactivated account owned. The cache is
    /// soft state; reactivation rebuilds it via population.
    pub async fn delete_streams(&self, user_id: Uuid) -> Result<()> {
        for kind in [
            StreamKind::Home,
            StreamKind::Local,
            StreamKind::Books,
            StreamKind::Lists,
        ] {
            self.store.clear(&kind.stream_id(user_id)).await?;
            self.store.reset_counter(&kind.unread_id(user_id)).await?;
        }
        info!(%user_id, "Deleted all streams for user");
        Ok(())
    }

    // ---- unread counters ----

    pub async fn unread_count(&self, user_id: Uuid, kind: StreamKind) -> Result<i64> {
        self.store.get_counter(&kind.unread_id(user_id)).await
    }

    pub async fn mark_stream_read(&self, user_id: Uuid, kind: StreamKind) -> Result<()> {
        self.store.reset_counter(&kind.unread_id(user_id)).await
    }

    // ---- helpers ----

    async fn is_local(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .queries
            .get_user(user_id)
            .await?
            .map(|u| u.local && u.active)
            .unwrap_or(false))
    }

    async fn all_status_stream_keys(&self) -> Result<Vec<String>> {
        let users = self.queries.local_user_ids().await?;
        Ok(users
            .iter()
            .flat_map(|user_id| STATUS_STREAMS.iter().map(|kind| kind.stream_id(*user_id)))
            .collect())
    }

    async fn all_lists_stream_keys(&self) -> Result<Vec<String>> {
        let users = self.queries.local_user_ids().await?;
        Ok(users
            .iter()
            .map(|user_id| StreamKind::Lists.stream_id(*user_id))
            .collect())
    }
}

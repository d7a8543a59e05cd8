//! Deferred work units and the scheduling seam.
//!
//! The engine never executes fan-out inline: every mutation becomes a
//! `StreamJob` handed to a `JobQueue`. The worker pool behind the queue is
//! an external collaborator that owns retry and backoff policy; jobs are
//! safe to re-run, so at-least-once redelivery cannot corrupt streams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;
use crate::fanout::FanoutEngine;
use crate::population::PopulationJob;
use crate::streams::StreamKind;

/// Named priority queues. Interactive fan-out goes on `streams`; imports
/// and other backfill go on `import_triggered` so they don't starve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Streams,
    ImportTriggered,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Streams => "streams",
            QueueName::ImportTriggered => "import_triggered",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of deferred stream maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamJob {
    AddStatus {
        status_id: Uuid,
        increment_unread: bool,
    },
    RemoveStatus {
        status_id: Uuid,
    },
    /// Re-resolve a status everywhere after an edit or privacy change.
    RefreshStatus {
        status_id: Uuid,
    },
    AddUserStatuses {
        viewer_id: Uuid,
        author_id: Uuid,
        streams: Vec<StreamKind>,
    },
    RemoveUserStatuses {
        viewer_id: Uuid,
        author_id: Uuid,
        streams: Vec<StreamKind>,
    },
    PopulateStream {
        user_id: Uuid,
        stream: StreamKind,
    },
    AddList {
        list_id: Uuid,
    },
    RemoveList {
        list_id: Uuid,
    },
    RefreshList {
        list_id: Uuid,
    },
    AddUserLists {
        viewer_id: Uuid,
        owner_id: Uuid,
    },
    RemoveUserLists {
        viewer_id: Uuid,
        owner_id: Uuid,
    },
    PopulateLists {
        user_id: Uuid,
    },
    AddGroupLists {
        group_id: Uuid,
        user_id: Uuid,
    },
    RemoveGroupLists {
        group_id: Uuid,
        user_id: Uuid,
    },
    DeleteStreams {
        user_id: Uuid,
    },
}

/// Fire-and-forget dispatch onto a named queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: StreamJob, queue: QueueName) -> Result<()>;
}

/// Execute one job. Called by whatever worker pool drains the queues.
pub async fn run_job(
    engine: &FanoutEngine,
    population: &PopulationJob,
    job: StreamJob,
) -> Result<()> {
    match job {
        StreamJob::AddStatus {
            status_id,
            increment_unread,
        } => engine.add_status(status_id, increment_unread).await,
        StreamJob::RemoveStatus { status_id } => engine.remove_status(status_id).await,
        StreamJob::RefreshStatus { status_id } => engine.refresh_status(status_id).await,
        StreamJob::AddUserStatuses {
            viewer_id,
            author_id,
            streams,
        } => {
            engine
                .add_user_statuses(viewer_id, author_id, &streams)
                .await
        }
        StreamJob::RemoveUserStatuses {
            viewer_id,
            author_id,
            streams,
        } => {
            engine
                .remove_user_statuses(viewer_id, author_id, &streams)
                .await
        }
        StreamJob::PopulateStream { user_id, stream } => {
            population.populate_status_stream(user_id, stream).await
        }
        StreamJob::AddList { list_id } => engine.add_list(list_id).await,
        StreamJob::RemoveList { list_id } => engine.remove_list(list_id).await,
        StreamJob::RefreshList { list_id } => engine.refresh_list(list_id).await,
        StreamJob::AddUserLists { viewer_id, owner_id } => {
            engine.add_user_lists(viewer_id, owner_id).await
        }
        StreamJob::RemoveUserLists { viewer_id, owner_id } => {
            engine.remove_user_lists(viewer_id, owner_id).await
        }
        StreamJob::PopulateLists { user_id } => population.populate_lists_stream(user_id).await,
        StreamJob::AddGroupLists { group_id, user_id } => {
            engine.add_group_lists(group_id, user_id).await
        }
        StreamJob::RemoveGroupLists { group_id, user_id } => {
            engine.remove_group_lists(group_id, user_id).await
        }
        StreamJob::DeleteStreams { user_id } => engine.delete_streams(user_id).await,
    }
}

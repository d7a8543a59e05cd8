//! Stream variant definitions.
//!
//! A stream is a per-user sorted set of content ids in Redis, keyed
//! `{user_id}-{variant}` and ordered by a timestamp rank. The variant set is
//! closed: dispatch is a match over `StreamKind`, not open inheritance.

pub mod audience;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StreamError;

/// The cached stream variants.
///
/// `Home`, `Local` and `Books` hold statuses; `Lists` holds book lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Home,
    Local,
    Books,
    Lists,
}

/// Variants that carry statuses, in fan-out order.
pub const STATUS_STREAMS: [StreamKind; 3] =
    [StreamKind::Home, StreamKind::Local, StreamKind::Books];

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Home => "home",
            StreamKind::Local => "local",
            StreamKind::Books => "books",
            StreamKind::Lists => "lists",
        }
    }

    /// Key of the user's sorted set for this variant.
    pub fn stream_id(&self, user_id: Uuid) -> String {
        format!("{}-{}", user_id, self.as_str())
    }

    /// Key of the unread counter attached to this stream.
    pub fn unread_id(&self, user_id: Uuid) -> String {
        format!("{}-{}-unread", user_id, self.as_str())
    }

    pub fn is_status_stream(&self) -> bool {
        !matches!(self, StreamKind::Lists)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(StreamKind::Home),
            "local" => Ok(StreamKind::Local),
            "books" => Ok(StreamKind::Books),
            "lists" => Ok(StreamKind::Lists),
            other => Err(StreamError::InvalidVariant(other.to_string())),
        }
    }
}

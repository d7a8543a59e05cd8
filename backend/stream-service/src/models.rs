//! Domain models for stream maintenance.
//!
//! These are read-side projections of the backing store's rows: just the
//! fields audience resolution and ranking need, nothing the web layer owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StreamError;

/// Visibility level of a status or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Unlisted,
    Followers,
    Direct,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Followers => "followers",
            Privacy::Direct => "direct",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            "followers" => Ok(Privacy::Followers),
            "direct" => Ok(Privacy::Direct),
            other => Err(StreamError::Internal(format!(
                "unknown privacy level: {other}"
            ))),
        }
    }
}

/// How entries get onto a book list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curation {
    Closed,
    Open,
    Group,
}

impl FromStr for Curation {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Curation::Closed),
            "open" => Ok(Curation::Open),
            "group" => Ok(Curation::Group),
            other => Err(StreamError::Internal(format!(
                "unknown curation type: {other}"
            ))),
        }
    }
}

/// A user account. Only local, active users own cached streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub local: bool,
    pub active: bool,
}

/// A status (post, comment, review) as seen by the fan-out engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub id: Uuid,
    pub user_id: Uuid,
    pub privacy: Privacy,
    pub deleted: bool,
    pub published_date: DateTime<Utc>,
    pub created_date: DateTime<Utc>,
    /// Users explicitly mentioned in the status.
    #[serde(default)]
    pub mention_user_ids: Vec<Uuid>,
    /// Book editions the status is about or mentions.
    #[serde(default)]
    pub book_ids: Vec<Uuid>,
}

impl Status {
    /// Rank score: published timestamp as epoch seconds.
    pub fn rank(&self) -> f64 {
        self.published_date.timestamp() as f64
    }
}

/// A curated book list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookList {
    pub id: Uuid,
    pub user_id: Uuid,
    pub privacy: Privacy,
    pub curation: Curation,
    pub group_id: Option<Uuid>,
    pub updated_date: DateTime<Utc>,
}

impl BookList {
    /// Rank score: last-updated timestamp as epoch seconds.
    pub fn rank(&self) -> f64 {
        self.updated_date.timestamp() as f64
    }
}

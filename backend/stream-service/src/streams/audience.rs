//! Audience resolution: which local users should see an item.
//!
//! Candidate sets come from the backing store, then an explicit privacy and
//! relationship predicate runs in application code so the rules stay
//! unit-testable. Nothing here is cached; relationships, group membership
//! and book/work linkage are re-derived on every call. Missing references
//! degrade to an empty audience rather than failing the fan-out.

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, StreamError};
use crate::models::{BookList, Curation, Privacy, Status, User};
use crate::queries::GraphQueries;
use crate::streams::StreamKind;

pub struct AudienceResolver {
    queries: Arc<dyn GraphQueries>,
}

/// Does the privacy level let `viewer` see a status by `author`?
///
/// The author counts as trivially following themself, so self-authored
/// items pass wherever the level permits anyone at all.
fn privacy_permits(
    viewer: Uuid,
    author: Uuid,
    privacy: Privacy,
    followers: &HashSet<Uuid>,
    mentioned: &HashSet<Uuid>,
) -> bool {
    if viewer == author {
        return true;
    }
    match privacy {
        Privacy::Public => true,
        Privacy::Unlisted => false,
        Privacy::Followers => followers.contains(&viewer) || mentioned.contains(&viewer),
        Privacy::Direct => mentioned.contains(&viewer),
    }
}

impl AudienceResolver {
    pub fn new(queries: Arc<dyn GraphQueries>) -> Self {
        Self { queries }
    }

    /// Users whose `kind` stream should carry this status.
    pub async fn status_audience(&self, kind: StreamKind, status: &Status) -> Result<Vec<Uuid>> {
        if status.deleted {
            return Ok(Vec::new());
        }
        let Some(author) = self.queries.get_user(status.user_id).await? else {
            return Ok(Vec::new());
        };
        match kind {
            StreamKind::Home => self.home_audience(status, &author).await,
            StreamKind::Local => self.local_audience(status, &author).await,
            StreamKind::Books => self.books_audience(status, &author).await,
            StreamKind::Lists => Err(StreamError::InvalidVariant(
                "lists streams carry book lists, not statuses".to_string(),
            )),
        }
    }

    /// Home: followers and mentioned users, gated by privacy, blocked pairs
    /// excluded. The author sees their own statuses via the self-follow rule.
    async fn home_audience(&self, status: &Status, author: &User) -> Result<Vec<Uuid>> {
        let followers: HashSet<Uuid> = self
            .queries
            .follower_ids(author.id)
            .await?
            .into_iter()
            .collect();
        let mentioned: HashSet<Uuid> = self
            .queries
            .local_active_among(&status.mention_user_ids)
            .await?
            .into_iter()
            .collect();
        let blocked: HashSet<Uuid> = self
            .queries
            .blocked_either_way(author.id)
            .await?
            .into_iter()
            .collect();

        let mut candidates: HashSet<Uuid> = followers.union(&mentioned).copied().collect();
        if author.local && author.active {
            candidates.insert(author.id);
        }

        Ok(candidates
            .into_iter()
            .filter(|viewer| {
                privacy_permits(*viewer, author.id, status.privacy, &followers, &mentioned)
                    && !blocked.contains(viewer)
            })
            .collect())
    }

    /// Local: the whole instance for public statuses by local authors.
    /// Unlisted stays off the shared timeline but remains visible to the
    /// author; remote-authored statuses never appear.
    async fn local_audience(&self, status: &Status, author: &User) -> Result<Vec<Uuid>> {
        if !author.local || !author.active {
            return Ok(Vec::new());
        }
        match status.privacy {
            Privacy::Public => {
                let blocked: HashSet<Uuid> = self
                    .queries
                    .blocked_either_way(author.id)
                    .await?
                    .into_iter()
                    .collect();
                Ok(self
                    .queries
                    .local_user_ids()
                    .await?
                    .into_iter()
                    .filter(|id| !blocked.contains(id))
                    .collect())
            }
            Privacy::Unlisted => Ok(vec![author.id]),
            Privacy::Followers | Privacy::Direct => Ok(Vec::new()),
        }
    }

    /// Books: local users who shelved the referenced work (any edition),
    /// gated by the same privacy predicate as home.
    async fn books_audience(&self, status: &Status, author: &User) -> Result<Vec<Uuid>> {
        if status.book_ids.is_empty() {
            return Ok(Vec::new());
        }
        let shelvers = self.queries.local_shelvers_of(&status.book_ids).await?;
        if shelvers.is_empty() {
            return Ok(Vec::new());
        }
        let followers: HashSet<Uuid> = match status.privacy {
            Privacy::Followers => self
                .queries
                .follower_ids(author.id)
                .await?
                .into_iter()
                .collect(),
            _ => HashSet::new(),
        };
        let mentioned: HashSet<Uuid> = status.mention_user_ids.iter().copied().collect();
        let blocked: HashSet<Uuid> = self
            .queries
            .blocked_either_way(author.id)
            .await?
            .into_iter()
            .collect();

        Ok(shelvers
            .into_iter()
            .filter(|viewer| {
                privacy_permits(*viewer, author.id, status.privacy, &followers, &mentioned)
                    && !blocked.contains(viewer)
            })
            .collect())
    }

    /// Users whose lists stream should carry this list.
    ///
    /// Unlisted lists are never pushed anywhere. An attached group replaces
    /// the follower gate: current members plus the owner, checked at
    /// evaluation time.
    pub async fn list_audience(&self, list: &BookList) -> Result<Vec<Uuid>> {
        if list.privacy == Privacy::Unlisted {
            return Ok(Vec::new());
        }
        let Some(owner) = self.queries.get_user(list.user_id).await? else {
            return Ok(Vec::new());
        };
        let owner_entry = (owner.local && owner.active).then_some(owner.id);

        if list.privacy == Privacy::Direct {
            return Ok(owner_entry.into_iter().collect());
        }

        let blocked: HashSet<Uuid> = self
            .queries
            .blocked_either_way(owner.id)
            .await?
            .into_iter()
            .collect();

        let mut audience: HashSet<Uuid> = match (list.curation, list.group_id) {
            (Curation::Group, Some(group_id)) => self
                .queries
                .group_member_ids(group_id)
                .await?
                .into_iter()
                .collect(),
            _ => match list.privacy {
                Privacy::Public => self.queries.local_user_ids().await?.into_iter().collect(),
                Privacy::Followers => self
                    .queries
                    .follower_ids(owner.id)
                    .await?
                    .into_iter()
                    .collect(),
                // handled above
                Privacy::Unlisted | Privacy::Direct => HashSet::new(),
            },
        };
        if let Some(owner_id) = owner_entry {
            audience.insert(owner_id);
        }

        Ok(audience
            .into_iter()
            .filter(|id| !blocked.contains(id))
            .collect())
    }
}

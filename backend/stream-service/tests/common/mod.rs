//! Shared fixtures: an in-memory sorted-set store, an in-memory social
//! graph, and a recording job queue. The fakes mirror the Redis/Postgres
//! implementations' semantics so engine behavior can be tested end to end
//! without infrastructure.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use stream_service::models::{BookList, Curation, Privacy, Status, User};
use stream_service::{
    run_job, FanoutEngine, GraphQueries, JobQueue, PopulationJob, QueueName, Result,
    SortedSetStore, StreamConfig, StreamJob,
};

// ---------------------------------------------------------------- store

#[derive(Default)]
struct StoreState {
    sets: HashMap<String, HashMap<Uuid, f64>>,
    counters: HashMap<String, i64>,
}

/// In-memory stand-in for the Redis store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Members of a key, descending by score.
    pub fn ids(&self, key: &str) -> Vec<Uuid> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<(Uuid, f64)> = state
            .sets
            .get(key)
            .map(|s| s.iter().map(|(id, score)| (*id, *score)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(b.0.cmp(&a.0)));
        entries.into_iter().map(|(id, _)| id).collect()
    }

    pub fn score(&self, key: &str, item_id: Uuid) -> Option<f64> {
        let state = self.state.lock().unwrap();
        state.sets.get(key).and_then(|s| s.get(&item_id)).copied()
    }

    pub fn len(&self, key: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.sets.get(key).map(HashMap::len).unwrap_or(0)
    }
}

#[async_trait]
impl SortedSetStore for MemoryStore {
    async fn add(&self, key: &str, item_id: Uuid, score: f64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(item_id, score);
        Ok(())
    }

    async fn bulk_add(&self, key: &str, entries: &[(Uuid, f64)]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let set = state.sets.entry(key.to_string()).or_default();
        for (id, score) in entries {
            set.insert(*id, *score);
        }
        Ok(())
    }

    async fn remove(&self, key: &str, item_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(&item_id);
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[String], item_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for key in keys {
            if let Some(set) = state.sets.get_mut(key) {
                set.remove(&item_id);
            }
        }
        Ok(())
    }

    async fn bulk_remove(&self, key: &str, item_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(set) = state.sets.get_mut(key) {
            for id in item_ids {
                set.remove(id);
            }
        }
        Ok(())
    }

    async fn trim(&self, key: &str, max_size: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(set) = state.sets.get_mut(key) {
            if set.len() > max_size {
                let mut entries: Vec<(Uuid, f64)> =
                    set.iter().map(|(id, score)| (*id, *score)).collect();
                // lowest scores go first
                entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
                let excess = entries.len() - max_size;
                for (id, _) in entries.into_iter().take(excess) {
                    set.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.sets.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str, item_id: Uuid) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sets
            .get(key)
            .map(|s| s.contains_key(&item_id))
            .unwrap_or(false))
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Uuid>> {
        let ordered = self.ids(key);
        let len = ordered.len() as isize;
        let clamp = |idx: isize| -> isize {
            let resolved = if idx < 0 { len + idx } else { idx };
            resolved.clamp(0, len)
        };
        let from = clamp(start);
        let to = (clamp(stop) + 1).min(len);
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(ordered[from as usize..to as usize].to_vec())
    }

    async fn increment_counter(&self, key: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }

    async fn reset_counter(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------- graph

#[derive(Default)]
struct World {
    users: HashMap<Uuid, User>,
    /// (follower, followed)
    follows: HashSet<(Uuid, Uuid)>,
    /// (blocker, blocked)
    blocks: HashSet<(Uuid, Uuid)>,
    statuses: HashMap<Uuid, Status>,
    lists: HashMap<Uuid, BookList>,
    /// edition -> work
    editions: HashMap<Uuid, Uuid>,
    /// (user, edition)
    shelves: HashSet<(Uuid, Uuid)>,
    /// (group, user)
    group_members: HashSet<(Uuid, Uuid)>,
}

impl World {
    fn blocked_pair(&self, a: Uuid, b: Uuid) -> bool {
        self.blocks.contains(&(a, b)) || self.blocks.contains(&(b, a))
    }

    fn follows(&self, follower: Uuid, followed: Uuid) -> bool {
        self.follows.contains(&(follower, followed))
    }

    fn works_of(&self, edition_ids: &[Uuid]) -> HashSet<Uuid> {
        edition_ids
            .iter()
            .filter_map(|e| self.editions.get(e).copied())
            .collect()
    }

    fn shelved_works(&self, user_id: Uuid) -> HashSet<Uuid> {
        self.shelves
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, e)| self.editions.get(e).copied())
            .collect()
    }

    fn home_visible(&self, viewer: Uuid, s: &Status) -> bool {
        if s.deleted || self.blocked_pair(viewer, s.user_id) {
            return false;
        }
        let followed = s.user_id == viewer || self.follows(viewer, s.user_id);
        let mentioned = s.mention_user_ids.contains(&viewer);
        (followed && (matches!(s.privacy, Privacy::Public | Privacy::Followers) || s.user_id == viewer))
            || (s.privacy != Privacy::Unlisted && mentioned)
    }

    fn local_visible(&self, viewer: Uuid, s: &Status) -> bool {
        let author_local = self
            .users
            .get(&s.user_id)
            .map(|u| u.local && u.active)
            .unwrap_or(false);
        !s.deleted
            && author_local
            && !self.blocked_pair(viewer, s.user_id)
            && (s.privacy == Privacy::Public
                || (s.user_id == viewer && s.privacy == Privacy::Unlisted))
    }

    fn books_visible(&self, viewer: Uuid, s: &Status) -> bool {
        if s.deleted || self.blocked_pair(viewer, s.user_id) {
            return false;
        }
        let about_shelved = !self
            .works_of(&s.book_ids)
            .is_disjoint(&self.shelved_works(viewer));
        if !about_shelved {
            return false;
        }
        match s.privacy {
            Privacy::Public => true,
            Privacy::Unlisted => s.user_id == viewer,
            Privacy::Followers => {
                s.user_id == viewer
                    || self.follows(viewer, s.user_id)
                    || s.mention_user_ids.contains(&viewer)
            }
            Privacy::Direct => s.user_id == viewer || s.mention_user_ids.contains(&viewer),
        }
    }

    fn list_visible(&self, viewer: Uuid, l: &BookList) -> bool {
        if l.privacy == Privacy::Unlisted || self.blocked_pair(viewer, l.user_id) {
            return false;
        }
        if l.privacy == Privacy::Direct {
            return l.user_id == viewer;
        }
        if l.curation == Curation::Group {
            if let Some(group_id) = l.group_id {
                return l.user_id == viewer || self.group_members.contains(&(group_id, viewer));
            }
        }
        match l.privacy {
            Privacy::Public => true,
            Privacy::Followers => l.user_id == viewer || self.follows(viewer, l.user_id),
            Privacy::Unlisted | Privacy::Direct => false,
        }
    }
}

/// In-memory stand-in for the Postgres read API.
#[derive(Default)]
pub struct MemoryGraph {
    world: Mutex<World>,
}

impl MemoryGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_local_user(&self) -> Uuid {
        self.add_user(true)
    }

    pub fn add_remote_user(&self) -> Uuid {
        self.add_user(false)
    }

    fn add_user(&self, local: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.world.lock().unwrap().users.insert(
            id,
            User {
                id,
                local,
                active: true,
            },
        );
        id
    }

    pub fn follow(&self, follower: Uuid, followed: Uuid) {
        self.world.lock().unwrap().follows.insert((follower, followed));
    }

    pub fn unfollow(&self, follower: Uuid, followed: Uuid) {
        self.world.lock().unwrap().follows.remove(&(follower, followed));
    }

    pub fn block(&self, blocker: Uuid, blocked: Uuid) {
        let mut world = self.world.lock().unwrap();
        world.blocks.insert((blocker, blocked));
        // blocking severs follows both ways
        world.follows.remove(&(blocker, blocked));
        world.follows.remove(&(blocked, blocker));
    }

    pub fn unblock(&self, blocker: Uuid, blocked: Uuid) {
        self.world.lock().unwrap().blocks.remove(&(blocker, blocked));
    }

    pub fn insert_status(&self, status: Status) {
        self.world.lock().unwrap().statuses.insert(status.id, status);
    }

    pub fn delete_status(&self, status_id: Uuid) {
        if let Some(s) = self.world.lock().unwrap().statuses.get_mut(&status_id) {
            s.deleted = true;
        }
    }

    pub fn insert_list(&self, list: BookList) {
        self.world.lock().unwrap().lists.insert(list.id, list);
    }

    /// Create an edition of a new work; returns the edition id.
    pub fn edition(&self) -> Uuid {
        let edition = Uuid::new_v4();
        let work = Uuid::new_v4();
        self.world.lock().unwrap().editions.insert(edition, work);
        edition
    }

    /// Create another edition of the same work as `sibling`.
    pub fn sibling_edition(&self, sibling: Uuid) -> Uuid {
        let mut world = self.world.lock().unwrap();
        let work = world.editions[&sibling];
        let edition = Uuid::new_v4();
        world.editions.insert(edition, work);
        edition
    }

    pub fn shelve(&self, user_id: Uuid, edition_id: Uuid) {
        self.world.lock().unwrap().shelves.insert((user_id, edition_id));
    }

    pub fn join_group(&self, group_id: Uuid, user_id: Uuid) {
        self.world.lock().unwrap().group_members.insert((group_id, user_id));
    }

    pub fn leave_group(&self, group_id: Uuid, user_id: Uuid) {
        self.world.lock().unwrap().group_members.remove(&(group_id, user_id));
    }
}

#[async_trait]
impl GraphQueries for MemoryGraph {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.world.lock().unwrap().users.get(&id).cloned())
    }

    async fn get_status(&self, id: Uuid) -> Result<Option<Status>> {
        Ok(self.world.lock().unwrap().statuses.get(&id).cloned())
    }

    async fn get_list(&self, id: Uuid) -> Result<Option<BookList>> {
        Ok(self.world.lock().unwrap().lists.get(&id).cloned())
    }

    async fn local_user_ids(&self) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        Ok(world
            .users
            .values()
            .filter(|u| u.local && u.active)
            .map(|u| u.id)
            .collect())
    }

    async fn local_active_among(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| {
                world
                    .users
                    .get(id)
                    .map(|u| u.local && u.active)
                    .unwrap_or(false)
            })
            .copied()
            .collect())
    }

    async fn follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        Ok(world
            .follows
            .iter()
            .filter(|(_, followed)| *followed == user_id)
            .filter(|(follower, _)| {
                world
                    .users
                    .get(follower)
                    .map(|u| u.local && u.active)
                    .unwrap_or(false)
            })
            .map(|(follower, _)| *follower)
            .collect())
    }

    async fn blocked_either_way(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        let mut out = HashSet::new();
        for (blocker, blocked) in &world.blocks {
            if *blocker == user_id {
                out.insert(*blocked);
            }
            if *blocked == user_id {
                out.insert(*blocker);
            }
        }
        Ok(out.into_iter().collect())
    }

    async fn block_exists(&self, subject: Uuid, object: Uuid) -> Result<bool> {
        Ok(self.world.lock().unwrap().blocks.contains(&(subject, object)))
    }

    async fn local_shelvers_of(&self, edition_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        let works = world.works_of(edition_ids);
        Ok(world
            .users
            .values()
            .filter(|u| u.local && u.active)
            .filter(|u| !world.shelved_works(u.id).is_disjoint(&works))
            .map(|u| u.id)
            .collect())
    }

    async fn group_member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        Ok(world
            .group_members
            .iter()
            .filter(|(g, _)| *g == group_id)
            .filter(|(_, u)| {
                world
                    .users
                    .get(u)
                    .map(|u| u.local && u.active)
                    .unwrap_or(false)
            })
            .map(|(_, u)| *u)
            .collect())
    }

    async fn status_ids_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        Ok(world
            .statuses
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect())
    }

    async fn list_ids_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let world = self.world.lock().unwrap();
        Ok(world
            .lists
            .values()
            .filter(|l| l.user_id == user_id)
            .map(|l| l.id)
            .collect())
    }

    async fn lists_curated_by_group(&self, group_id: Uuid) -> Result<Vec<BookList>> {
        let world = self.world.lock().unwrap();
        Ok(world
            .lists
            .values()
            .filter(|l| l.curation == Curation::Group && l.group_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn home_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        self.timeline(viewer, from_author, limit, |world, viewer, s| {
            world.home_visible(viewer, s)
        })
    }

    async fn local_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        self.timeline(viewer, from_author, limit, |world, viewer, s| {
            world.local_visible(viewer, s)
        })
    }

    async fn books_statuses_for(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Status>> {
        self.timeline(viewer, from_author, limit, |world, viewer, s| {
            world.books_visible(viewer, s)
        })
    }

    async fn lists_for(
        &self,
        viewer: Uuid,
        from_owner: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<BookList>> {
        let world = self.world.lock().unwrap();
        let mut lists: Vec<BookList> = world
            .lists
            .values()
            .filter(|l| from_owner.map(|o| l.user_id == o).unwrap_or(true))
            .filter(|l| world.list_visible(viewer, l))
            .cloned()
            .collect();
        lists.sort_by_key(|l| std::cmp::Reverse(l.updated_date));
        lists.truncate(limit);
        Ok(lists)
    }
}

impl MemoryGraph {
    fn timeline(
        &self,
        viewer: Uuid,
        from_author: Option<Uuid>,
        limit: usize,
        visible: impl Fn(&World, Uuid, &Status) -> bool,
    ) -> Result<Vec<Status>> {
        let world = self.world.lock().unwrap();
        let mut statuses: Vec<Status> = world
            .statuses
            .values()
            .filter(|s| from_author.map(|a| s.user_id == a).unwrap_or(true))
            .filter(|s| visible(&world, viewer, s))
            .cloned()
            .collect();
        statuses.sort_by_key(|s| std::cmp::Reverse(s.published_date));
        statuses.truncate(limit);
        Ok(statuses)
    }
}

// ---------------------------------------------------------------- queue

/// Records enqueued jobs for assertions; `drain` executes them.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<(StreamJob, QueueName)>>,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorded(&self) -> Vec<(StreamJob, QueueName)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<(StreamJob, QueueName)> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: StreamJob, queue: QueueName) -> Result<()> {
        self.jobs.lock().unwrap().push((job, queue));
        Ok(())
    }
}

// ---------------------------------------------------------------- harness

/// Everything a scenario needs, wired together like production would be.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub graph: Arc<MemoryGraph>,
    pub queue: Arc<RecordingQueue>,
    pub engine: FanoutEngine,
    pub population: PopulationJob,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let store = MemoryStore::new();
        let graph = MemoryGraph::new();
        let queue = RecordingQueue::new();
        let engine = FanoutEngine::new(
            store.clone(),
            graph.clone(),
            queue.clone(),
            config.clone(),
        );
        let population = PopulationJob::new(store.clone(), graph.clone(), config);
        Self {
            store,
            graph,
            queue,
            engine,
            population,
        }
    }

    /// Run every queued job to completion, like the worker pool would.
    /// Jobs enqueued by jobs are drained too.
    pub async fn drain(&self) -> Result<()> {
        loop {
            let batch = self.queue.take();
            if batch.is_empty() {
                return Ok(());
            }
            for (job, _) in batch {
                run_job(&self.engine, &self.population, job).await?;
            }
        }
    }
}

// ---------------------------------------------------------------- fixtures

pub fn public_status(author: Uuid) -> Status {
    status_with_privacy(author, Privacy::Public)
}

pub fn status_with_privacy(author: Uuid, privacy: Privacy) -> Status {
    let now = Utc::now();
    Status {
        id: Uuid::new_v4(),
        user_id: author,
        privacy,
        deleted: false,
        published_date: now,
        created_date: now,
        mention_user_ids: vec![],
        book_ids: vec![],
    }
}

pub fn backdated(mut status: Status, days: i64) -> Status {
    status.published_date = status.published_date - Duration::days(days);
    status.created_date = status.published_date;
    status
}

pub fn list_with_privacy(owner: Uuid, privacy: Privacy) -> BookList {
    BookList {
        id: Uuid::new_v4(),
        user_id: owner,
        privacy,
        curation: Curation::Closed,
        group_id: None,
        updated_date: Utc::now(),
    }
}

//! Change snapshot cache
//!
//! Entries are keyed by (project, change, meta tip). Because a key names an
//! exact tip, an entry can never go stale: a newer tip is simply a different
//! key. Invalidation only frees memory early.
//!
//! Concurrent loads of the same key may both parse; whichever inserts last
//! wins, and both results are equal because parsing is a pure function of the
//! tip. Dropping the whole cache is always safe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use refbatch_core::{ChangeId, ObjectId, ProjectName, RefName, UpdateResult};
use refbatch_storage::Repository;

use crate::notes::{ChangeNotes, ChangeState};
use crate::parser::parse_change;

/// Default number of cached snapshots
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    project: ProjectName,
    change: ChangeId,
    tip: ObjectId,
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Loads served from the cache
    pub hits: u64,
    /// Loads that parsed history
    pub misses: u64,
    /// Entries dropped to stay under capacity
    pub evictions: u64,
    /// Entries currently held
    pub entries: usize,
}

/// Cache of parsed change snapshots
#[derive(Debug)]
pub struct ChangeNotesCache {
    entries: DashMap<CacheKey, Arc<ChangeState>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for ChangeNotesCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ChangeNotesCache {
    /// Create a cache holding at most `max_entries` snapshots (0 disables caching)
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Load the current snapshot of a change, `None` if it has no meta ref
    pub fn load(&self, repo: &Repository, change: ChangeId) -> UpdateResult<Option<ChangeNotes>> {
        match repo.read_ref(&RefName::change_meta(change))? {
            Some(tip) => self.load_at(repo, change, tip).map(Some),
            None => Ok(None),
        }
    }

    /// Load the snapshot of a change as of a specific tip
    pub fn load_at(
        &self,
        repo: &Repository,
        change: ChangeId,
        tip: ObjectId,
    ) -> UpdateResult<ChangeNotes> {
        let key = CacheKey {
            project: repo.name().clone(),
            change,
            tip,
        };

        let cached = self.entries.get(&key).map(|e| Arc::clone(e.value()));
        if let Some(state) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "refbatch::notes",
                change = %change,
                tip = %tip.short(),
                "Snapshot cache hit"
            );
            return Ok(ChangeNotes::new(key.project, tip, state));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "refbatch::notes",
            change = %change,
            tip = %tip.short(),
            "Snapshot cache miss"
        );
        let state = Arc::new(parse_change(repo.objects(), change, tip)?);

        if self.max_entries > 0 {
            self.make_room();
            self.entries.insert(key.clone(), Arc::clone(&state));
        }
        Ok(ChangeNotes::new(key.project, tip, state))
    }

    /// Drop every cached snapshot of a change
    pub fn invalidate(&self, project: &ProjectName, change: ChangeId) {
        self.entries
            .retain(|key, _| !(key.change == change && &key.project == project));
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn make_room(&self) {
        while self.entries.len() >= self.max_entries {
            // Key is cloned out so no shard guard is held during removal.
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}

//! Priority + FIFO queue of coalesced events.
//!
//! Entries are ordered by `(priority, arrival)`. Every path an entry touches
//! (its target, and the source of a move) is indexed in path order, so that
//! coalescing, subtree purges and readiness checks never scan the whole queue.
//!
//! An entry found blocked is parked under the path that blocks it and is
//! only looked at again when that path is released or leaves the queue:
//!
//! ```text
//! push ──> candidates ──pop_ready──> ready? ──yes──> caller (mark_busy ... release)
//!              ▲                       │ no
//!              │                       ▼
//!              └──── wake(path) ── parked[blocking path]
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::event::{Coalesced, EventKind, QueueEvent, coalesce};
use crate::types::{Priority, RootId};

type Key = (Priority, u64);

/// Paths with a mutation somewhere between dispatch and flush acknowledgment.
#[derive(Debug, Default)]
struct BusyPaths {
    paths: BTreeSet<PathBuf>,
}

impl BusyPaths {
    fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    fn ancestor_of<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.ancestors()
            .skip(1)
            .find(|a| self.paths.contains(*a))
    }

    /// Some busy path strictly below `path`.
    fn first_under(&self, path: &Path) -> Option<&Path> {
        self.paths
            .range(path.to_path_buf()..)
            .take_while(|p| p.starts_with(path))
            .find(|p| p.as_path() != path)
            .map(PathBuf::as_path)
    }
}

/// How a push was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Coalesced,
    Annulled,
}

/// Bookkeeping produced by [`EventQueue::push`].
#[derive(Debug)]
pub struct PushResult {
    pub outcome: PushOutcome,
    /// Root of the entry now sitting in the queue, if any.
    pub inserted: Option<RootId>,
    /// Entries that were queued before this push and are gone now.
    pub coalesced: Vec<QueueEvent>,
    /// Entries dropped because a subtree delete or move superseded them.
    pub purged: Vec<QueueEvent>,
    /// Roots of the subtrees whose queued entries were purged.
    pub superseded: Vec<PathBuf>,
}

impl PushResult {
    /// Events restoring what purged moves did across a superseded boundary.
    ///
    /// A move into a superseded subtree still took its source away, so the
    /// source is deleted. A move out of one still put something at its
    /// target, so the target is created.
    pub fn compensations(&self) -> Vec<QueueEvent> {
        let covered = |path: &Path| self.superseded.iter().any(|s| path.starts_with(s));
        self.purged
            .iter()
            .filter_map(|purged| {
                let source = purged.source()?;
                let event = match (covered(source), covered(&purged.path)) {
                    (false, true) => QueueEvent::deleted(purged.root, source, purged.is_dir),
                    (true, false) => QueueEvent::created(purged.root, &purged.path, purged.is_dir),
                    _ => return None,
                };
                Some(event.with_priority(purged.priority))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    entries: BTreeMap<Key, QueueEvent>,
    touched: BTreeMap<PathBuf, BTreeSet<Key>>,
    busy: BusyPaths,
    /// Entries not known to be blocked, checked in key order on pop.
    candidates: BTreeSet<Key>,
    /// Blocked entries by the path they wait on. May hold stale keys.
    parked: HashMap<PathBuf, Vec<Key>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEvent> {
        self.entries.values()
    }

    /// True when some queued entry touches `path`.
    pub fn contains_path(&self, path: &Path) -> bool {
        self.touched.contains_key(path)
    }

    /// Queued events whose target is `path`, oldest first.
    pub fn events_for(&self, path: &Path) -> Vec<&QueueEvent> {
        let mut found: Vec<(u64, &QueueEvent)> = self
            .touched
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|key| self.entries.get(key).map(|e| (key.1, e)))
            .filter(|(_, e)| e.path == path)
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, e)| e).collect()
    }

    /// Hold `path` until [`EventQueue::release`]: nothing touching it, above
    /// it, or (for subtree operations) below it runs meanwhile.
    pub fn mark_busy(&mut self, path: &Path) {
        self.busy.paths.insert(path.to_path_buf());
    }

    pub fn release(&mut self, path: &Path) {
        if self.busy.paths.remove(path) {
            self.wake(path);
        }
    }

    pub fn is_busy(&self, path: &Path) -> bool {
        self.busy.contains(path)
    }

    /// Insert `event`, coalescing it with the latest pending event it follows.
    pub fn push(&mut self, event: QueueEvent) -> PushResult {
        let lookup = event.source().unwrap_or(&event.path).to_path_buf();
        let mut result = PushResult {
            outcome: PushOutcome::Queued,
            inserted: None,
            coalesced: Vec::new(),
            purged: Vec::new(),
            superseded: Vec::new(),
        };

        let previous = self
            .latest_target_key(&lookup)
            .and_then(|key| self.entries.get(&key).map(|queued| (key, coalesce(queued, &event))));
        let merged = match previous {
            Some((key, verdict)) => match verdict {
                Coalesced::Merge(merged) => {
                    if let Some(old) = self.remove_key(key) {
                        result.coalesced.push(old);
                    }
                    result.outcome = PushOutcome::Coalesced;
                    Some((key, merged))
                }
                Coalesced::Annul => {
                    if let Some(old) = self.remove_key(key) {
                        result.coalesced.push(old);
                    }
                    result.outcome = PushOutcome::Annulled;
                    None
                }
                Coalesced::Separate => Some((self.next_key(event.priority), event.clone())),
            },
            None => Some((self.next_key(event.priority), event.clone())),
        };

        // Subtree side effects follow the incoming event, whatever it merged into
        match &event.kind {
            EventKind::Moved { source } if event.is_dir => {
                self.supersede(&event.path, &mut result);
                self.rebase_under(source, &event.path);
            }
            EventKind::Deleted if event.is_dir => {
                self.supersede(&event.path, &mut result);
            }
            _ => {}
        }
        if let Some((_, merged)) = &merged {
            if merged.is_recursive()
                && merged.path != event.path
                && merged.kind == EventKind::Deleted
            {
                self.supersede(&merged.path, &mut result);
            }
        }

        if let Some((key, merged)) = merged {
            result.inserted = Some(merged.root);
            self.insert_at(key, merged);
        }
        result
    }

    /// Pop the first entry, in priority then arrival order, that may run now.
    ///
    /// An entry waits while any path it touches is busy or has an older
    /// queued entry, while an ancestor is busy or queued, and, for subtree
    /// deletes and moves, while anything below it is busy.
    ///
    /// The popped entry's paths are not marked busy; that is up to the caller.
    pub fn pop_ready(&mut self) -> Option<QueueEvent> {
        while let Some(key) = self.candidates.pop_first() {
            let Some(event) = self.entries.get(&key) else {
                continue;
            };
            match self.blocker(key, event) {
                Some(path) => self.parked.entry(path).or_default().push(key),
                None => return self.remove_key(key),
            }
        }
        None
    }

    /// Remove every entry matching `predicate`. Linear in the queue length.
    pub fn remove_matching<F>(&mut self, mut predicate: F) -> Vec<QueueEvent>
    where
        F: FnMut(&QueueEvent) -> bool,
    {
        let keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|(_, e)| predicate(e))
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter().filter_map(|k| self.remove_key(k)).collect()
    }

    /// Remove every entry touching a path at or under `path`.
    pub fn remove_under(&mut self, path: &Path) -> Vec<QueueEvent> {
        let keys = self.keys_touching(path, true);
        keys.into_iter().filter_map(|k| self.remove_key(k)).collect()
    }

    pub fn remove_root(&mut self, root: RootId) -> Vec<QueueEvent> {
        self.remove_matching(|e| e.root == root)
    }

    /// Keys of entries touching `path` (when `inclusive`) or anything below it.
    fn keys_touching(&self, path: &Path, inclusive: bool) -> BTreeSet<Key> {
        self.touched
            .range(path.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| inclusive || p.as_path() != path)
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect()
    }

    fn supersede(&mut self, path: &Path, result: &mut PushResult) {
        let keys = self.keys_touching(path, false);
        if keys.is_empty() {
            return;
        }
        result
            .purged
            .extend(keys.into_iter().filter_map(|k| self.remove_key(k)));
        result.superseded.push(path.to_path_buf());
    }

    fn rebase_under(&mut self, from: &Path, to: &Path) {
        for key in self.keys_touching(from, false) {
            if let Some(mut event) = self.remove_key(key) {
                event.rebase(from, to);
                self.insert_at(key, event);
            }
        }
    }

    /// The path `event` waits on, or None when it may run.
    fn blocker(&self, key: Key, event: &QueueEvent) -> Option<PathBuf> {
        for path in event.paths() {
            if self.busy.contains(path) || self.has_older_entry(path, key) {
                return Some(path.to_path_buf());
            }
            if let Some(ancestor) = self.busy.ancestor_of(path) {
                return Some(ancestor.to_path_buf());
            }
            if event.is_recursive() {
                if let Some(below) = self.busy.first_under(path) {
                    return Some(below.to_path_buf());
                }
            }
            if let Some(ancestor) = self.queued_ancestor(path) {
                return Some(ancestor.to_path_buf());
            }
        }
        None
    }

    fn has_older_entry(&self, path: &Path, key: Key) -> bool {
        self.touched
            .get(path)
            .is_some_and(|keys| keys.iter().any(|k| k.1 < key.1))
    }

    fn queued_ancestor<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.ancestors()
            .skip(1)
            .find(|a| self.touched.contains_key(*a))
    }

    /// Give every entry parked under `path` another look.
    fn wake(&mut self, path: &Path) {
        if let Some(keys) = self.parked.remove(path) {
            for key in keys {
                if self.entries.contains_key(&key) {
                    self.candidates.insert(key);
                }
            }
        }
    }

    fn latest_target_key(&self, path: &Path) -> Option<Key> {
        self.touched
            .get(path)?
            .iter()
            .filter(|k| self.entries.get(k).is_some_and(|e| e.path == path))
            .max_by_key(|k| k.1)
            .copied()
    }

    fn next_key(&mut self, priority: Priority) -> Key {
        self.next_seq += 1;
        (priority, self.next_seq)
    }

    fn insert_at(&mut self, key: Key, event: QueueEvent) {
        for path in event.paths() {
            self.touched.entry(path.to_path_buf()).or_default().insert(key);
        }
        self.entries.insert(key, event);
        self.candidates.insert(key);
    }

    fn remove_key(&mut self, key: Key) -> Option<QueueEvent> {
        let event = self.entries.remove(&key)?;
        self.candidates.remove(&key);
        for path in event.paths() {
            if let Some(keys) = self.touched.get_mut(path) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.touched.remove(path);
                }
            }
            self.wake(path);
        }
        Some(event)
    }
}

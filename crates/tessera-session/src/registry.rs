//! Bounded session-token registry
//!
//! Stores the latest observed [`SessionToken`] per (collection, partition key
//! range). Writers merge into the existing entry under the map's per-key lock,
//! so concurrent responses for the same range never lose an update.
//!
//! Recency is tracked with a stamped access queue: every touch pushes
//! `(key, stamp)` and updates the entry's stamp. Eviction pops from the front
//! and only removes an entry whose current stamp matches, so stale queue
//! records cost one pop each. The queue is compacted when it grows past a
//! multiple of the capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::header::{format_entry, format_header, parse_header_lenient};
use crate::token::SessionToken;

/// Registry key: one partition key range of one collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    /// Resource id of the collection (not its name)
    pub collection_rid: String,
    pub partition_key_range_id: String,
}

impl SessionKey {
    pub fn new(collection_rid: impl Into<String>, partition_key_range_id: impl Into<String>) -> Self {
        Self {
            collection_rid: collection_rid.into(),
            partition_key_range_id: partition_key_range_id.into(),
        }
    }
}

#[derive(Debug)]
struct TokenEntry {
    token: SessionToken,
    stamp: u64,
    pins: Arc<AtomicUsize>,
}

/// A resolved token held by an in-flight read
///
/// While the guard lives the entry is skipped by eviction.
#[derive(Debug)]
pub struct PinnedToken {
    token: SessionToken,
    pins: Arc<AtomicUsize>,
}

impl PinnedToken {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }
}

impl std::ops::Deref for PinnedToken {
    type Target = SessionToken;

    fn deref(&self) -> &SessionToken {
        &self.token
    }
}

impl Drop for PinnedToken {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded, LRU-evicting session-token registry
#[derive(Debug)]
pub struct SessionTokenRegistry {
    entries: DashMap<SessionKey, TokenEntry>,
    access: Mutex<VecDeque<(SessionKey, u64)>>,
    clock: AtomicU64,
    count: AtomicUsize,
    capacity: usize,
    /// Collection name -> resource id
    collections: DashMap<String, String>,
}

impl SessionTokenRegistry {
    /// Create a registry holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            access: Mutex::new(VecDeque::new()),
            clock: AtomicU64::new(0),
            count: AtomicUsize::new(0),
            capacity: capacity.max(1),
            collections: DashMap::new(),
        }
    }

    /// Merge `token` into the entry for `key`, inserting it if absent
    ///
    /// A merge failure keeps the stored token.
    pub fn record_token(&self, key: SessionKey, token: SessionToken) {
        let stamp = self.next_stamp();

        // the count moves under the shard lock, like the removals in
        // `clear_collection` and `evict_overflow`
        let overflow = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                match entry.token.merge(&token) {
                    Ok(merged) => entry.token = merged,
                    Err(e) => {
                        tracing::warn!(
                            collection_rid = %key.collection_rid,
                            partition_key_range_id = %key.partition_key_range_id,
                            error = %e,
                            "keeping existing session token"
                        );
                    }
                }
                entry.stamp = stamp;
                false
            }
            Entry::Vacant(vacant) => {
                let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
                vacant.insert(TokenEntry {
                    token,
                    stamp,
                    pins: Arc::new(AtomicUsize::new(0)),
                });
                count > self.capacity
            }
        };

        self.touch(key, stamp);

        if overflow {
            self.evict_overflow();
        }
    }

    /// Record every `{pkRangeId}:{token}` entry of a response header
    ///
    /// Returns the number of ranges recorded; malformed entries are skipped.
    pub fn record_from_header(&self, collection_rid: &str, header: &str) -> usize {
        let entries = parse_header_lenient(header);
        let recorded = entries.len();
        for (range, token) in entries {
            self.record_token(SessionKey::new(collection_rid, range), token);
        }
        recorded
    }

    /// Look up the token for `key`, marking it most recently used
    pub fn resolve_token(&self, key: &SessionKey) -> Option<SessionToken> {
        let stamp = self.next_stamp();
        let token = {
            let mut entry = self.entries.get_mut(key)?;
            entry.stamp = stamp;
            entry.token.clone()
        };
        self.touch(key.clone(), stamp);
        Some(token)
    }

    /// Resolve and protect the entry from eviction while the guard lives
    pub fn pin(&self, key: &SessionKey) -> Option<PinnedToken> {
        let stamp = self.next_stamp();
        let pinned = {
            let mut entry = self.entries.get_mut(key)?;
            entry.stamp = stamp;
            entry.pins.fetch_add(1, Ordering::AcqRel);
            PinnedToken {
                token: entry.token.clone(),
                pins: Arc::clone(&entry.pins),
            }
        };
        self.touch(key.clone(), stamp);
        Some(pinned)
    }

    /// Every known `(pkRangeId, token)` of a collection, sorted by range id
    pub fn collection_tokens(&self, collection_rid: &str) -> Vec<(String, SessionToken)> {
        let mut tokens: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.key().collection_rid == collection_rid)
            .map(|e| (e.key().partition_key_range_id.clone(), e.token.clone()))
            .collect();
        tokens.sort_by(|a, b| a.0.cmp(&b.0));
        tokens
    }

    /// Composite header covering every known range of a collection
    pub fn resolve_collection_header(&self, collection_rid: &str) -> Option<String> {
        let tokens = self.collection_tokens(collection_rid);
        if tokens.is_empty() {
            return None;
        }
        Some(format_header(tokens.iter().map(|(r, t)| (r.as_str(), t))))
    }

    /// Header for one range when known, else the collection-wide composite
    pub fn resolve_header(
        &self,
        collection_rid: &str,
        partition_key_range_id: Option<&str>,
    ) -> Option<String> {
        if let Some(range) = partition_key_range_id {
            if let Some(token) = self.resolve_token(&SessionKey::new(collection_rid, range)) {
                return Some(format_entry(range, &token));
            }
        }
        self.resolve_collection_header(collection_rid)
    }

    /// Map a collection name to its resource id
    ///
    /// Returns the previous id when it differs, i.e. the collection was
    /// recreated under the same name.
    pub fn register_collection(&self, name: &str, collection_rid: &str) -> Option<String> {
        let previous = self
            .collections
            .insert(name.to_string(), collection_rid.to_string());
        previous.filter(|prev| prev != collection_rid)
    }

    /// Resource id last registered for a collection name
    pub fn collection_rid(&self, name: &str) -> Option<String> {
        self.collections.get(name).map(|rid| rid.clone())
    }

    /// Drop every token of the collection registered under `name`
    pub fn clear_collection_by_name(&self, name: &str) -> usize {
        match self.collections.remove(name) {
            Some((_, rid)) => self.clear_collection(&rid),
            None => 0,
        }
    }

    /// Drop every token of a collection
    pub fn clear_collection(&self, collection_rid: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if key.collection_rid == collection_rid {
                self.count.fetch_sub(1, Ordering::AcqRel);
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::debug!(collection_rid, removed, "cleared session tokens");
        }
        removed
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn touch(&self, key: SessionKey, stamp: u64) {
        let mut queue = self.access.lock();
        queue.push_back((key, stamp));
        if queue.len() > self.capacity.saturating_mul(4).max(64) {
            self.compact(&mut queue);
        }
    }

    /// Drop queue records that no longer match their entry's stamp
    fn compact(&self, queue: &mut VecDeque<(SessionKey, u64)>) {
        queue.retain(|(key, stamp)| {
            self.entries
                .get(key)
                .is_some_and(|entry| entry.stamp == *stamp)
        });
    }

    /// Evict least recently used, unpinned entries until within capacity
    fn evict_overflow(&self) {
        let mut queue = self.access.lock();
        let mut pinned = Vec::new();

        while self.count.load(Ordering::Acquire) > self.capacity {
            let Some((key, stamp)) = queue.pop_front() else {
                break;
            };

            let evicted = self.entries.remove_if(&key, |_, entry| {
                let evict = entry.stamp == stamp && entry.pins.load(Ordering::Acquire) == 0;
                if evict {
                    self.count.fetch_sub(1, Ordering::AcqRel);
                }
                evict
            });

            match evicted {
                Some((key, _)) => {
                    tracing::debug!(
                        collection_rid = %key.collection_rid,
                        partition_key_range_id = %key.partition_key_range_id,
                        "evicted session token"
                    );
                }
                None => {
                    let still_current = self
                        .entries
                        .get(&key)
                        .is_some_and(|entry| entry.stamp == stamp);
                    if still_current {
                        pinned.push((key, stamp));
                    }
                }
            }
        }

        for record in pinned.into_iter().rev() {
            queue.push_front(record);
        }
    }
}

impl Default for SessionTokenRegistry {
    fn default() -> Self {
        Self::new(10_000)
    }
}

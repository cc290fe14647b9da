// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Idempotency cache with per-key expiry.
//!
//! The cache is a fast path in front of the engine. Marks are write-once: of
//! several submissions racing on one key, only the one that created the mark
//! goes on to run, and only that one may clear it again. The cache is not part
//! of the ledger's unit of work, so a lost or unreachable mark still lets a
//! duplicate through; see [`IdempotencyPolicy`](crate::IdempotencyPolicy).

use crate::context::Context;
use crate::error::CacheError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// Key/value contract for the idempotency cache.
pub trait IdempotencyCache: Send + Sync {
    /// Returns `true` while `key` is marked and unexpired.
    fn exists(&self, ctx: &Context, key: &str) -> Result<bool, CacheError>;

    /// Marks `key` as seen for `ttl` unless an unexpired mark already exists.
    ///
    /// Returns `true` when this call created the mark.
    fn set(&self, ctx: &Context, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Clears a mark so the key can be submitted again. Only the caller that
    /// created the mark should clear it.
    fn remove(&self, ctx: &Context, key: &str) -> Result<(), CacheError>;
}

/// In-memory [`IdempotencyCache`].
///
/// Expired entries read as absent and are dropped lazily on lookup or by
/// [`MemoryIdempotencyCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryIdempotencyCache {
    /// Key to expiry instant.
    entries: DashMap<String, Instant>,
}

impl MemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdempotencyCache for MemoryIdempotencyCache {
    fn exists(&self, ctx: &Context, key: &str) -> Result<bool, CacheError> {
        ctx.check()?;
        let now = Instant::now();

        // Use entry API so an expired mark is evicted atomically with the check
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) if *entry.get() > now => Ok(true),
            Entry::Occupied(entry) => {
                entry.remove();
                Ok(false)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    fn set(&self, ctx: &Context, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        ctx.check()?;
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) if *entry.get() > now => Ok(false),
            Entry::Occupied(mut entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
        }
    }

    fn remove(&self, ctx: &Context, key: &str) -> Result<(), CacheError> {
        ctx.check()?;
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Interrupted;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn unknown_key_does_not_exist() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();
        assert_eq!(cache.exists(&ctx, "k1"), Ok(false));
    }

    #[test]
    fn marked_key_exists_until_removed() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();

        assert_eq!(cache.set(&ctx, "k1", Duration::from_secs(60)), Ok(true));
        assert_eq!(cache.exists(&ctx, "k1"), Ok(true));
        assert_eq!(cache.exists(&ctx, "k2"), Ok(false));

        cache.remove(&ctx, "k1").unwrap();
        assert_eq!(cache.exists(&ctx, "k1"), Ok(false));
    }

    #[test]
    fn expired_key_reads_as_absent_and_is_evicted() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();

        cache.set(&ctx, "k1", Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.exists(&ctx, "k1"), Ok(false));
        assert!(cache.is_empty());
    }

    #[test]
    fn set_does_not_replace_a_live_mark() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();

        assert_eq!(cache.set(&ctx, "k1", Duration::from_secs(60)), Ok(true));
        assert_eq!(cache.set(&ctx, "k1", Duration::from_secs(60)), Ok(false));
        assert_eq!(cache.exists(&ctx, "k1"), Ok(true));
    }

    #[test]
    fn set_replaces_an_expired_mark() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();

        cache.set(&ctx, "k1", Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.set(&ctx, "k1", Duration::from_secs(60)), Ok(true));
        assert_eq!(cache.exists(&ctx, "k1"), Ok(true));
    }

    #[test]
    fn only_one_of_many_racing_sets_creates_the_mark() {
        let cache = Arc::new(MemoryIdempotencyCache::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .set(&Context::background(), "k1", Duration::from_secs(60))
                        .unwrap()
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();

        cache.set(&ctx, "short", Duration::from_millis(5)).unwrap();
        cache.set(&ctx, "long", Duration::from_secs(60)).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.exists(&ctx, "long"), Ok(true));
    }

    #[test]
    fn cancelled_context_is_reported() {
        let cache = MemoryIdempotencyCache::new();
        let ctx = Context::background();
        ctx.cancel();
        assert_eq!(
            cache.exists(&ctx, "k1"),
            Err(CacheError::Interrupted(Interrupted::Cancelled))
        );
    }
}

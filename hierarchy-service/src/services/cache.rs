//! In-process cache of resolved scopes keyed by (tenant, user).
//!
//! Each entry is stamped with the tenant's scope generation as read from the
//! store before the scope was computed. The store bumps that generation inside
//! every transaction that can change a scope, so an entry is served only while
//! the stamp still matches the committed value. This holds across service
//! instances sharing one store; the TTL only bounds memory.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::AccessScope;

struct CachedScope {
    scope: AccessScope,
    generation: i64,
    inserted: Instant,
}

pub struct ScopeCache {
    ttl: Duration,
    entries: DashMap<(Uuid, Uuid), CachedScope>,
}

impl ScopeCache {
    /// A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached scope, if it was computed at `current_generation` and has not expired.
    pub fn get(&self, tenant_id: Uuid, user_id: Uuid, current_generation: i64) -> Option<AccessScope> {
        if !self.is_enabled() {
            return None;
        }
        let key = (tenant_id, user_id);

        let fresh = {
            let entry = self.entries.get(&key)?;
            if entry.generation == current_generation && entry.inserted.elapsed() < self.ttl {
                Some(entry.scope.clone())
            } else {
                None
            }
        };

        if fresh.is_none() {
            self.entries
                .remove_if(&key, |_, entry| entry.generation <= current_generation);
        }
        fresh
    }

    /// Store a scope computed after reading `generation` from the store.
    /// An entry stamped with a newer generation is kept. Returns whether the
    /// scope was stored.
    pub fn insert(&self, user_id: Uuid, scope: AccessScope, generation: i64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let tenant_id = scope.tenant_id();
        let mut entry = self
            .entries
            .entry((tenant_id, user_id))
            .or_insert_with(|| CachedScope {
                scope: scope.clone(),
                generation,
                inserted: Instant::now(),
            });
        if entry.generation > generation {
            return false;
        }
        *entry = CachedScope {
            scope,
            generation,
            inserted: Instant::now(),
        };
        true
    }

    /// Drop every cached scope of a tenant held by this instance.
    ///
    /// Other instances notice the change through the store's generation.
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.entries.retain(|(cached_tenant, _), _| *cached_tenant != tenant_id);
        tracing::debug!(%tenant_id, "Invalidated cached scopes");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Per-chain authoritative pool state.
//!
//! Each watcher owns exactly one manager; nothing else mutates its pools.
//! Event application enforces per-pool lexicographic monotonicity on
//! `(blockNumber, transactionIndex, logIndex)`: stale deliveries (expected
//! under reorg) are dropped without error. Pools seen for the first time via
//! an unsolicited event are introspected on the spot and enter the map with
//! that event already folded in.

use crate::adapters::AdapterRegistry;
use crate::errors::EngineError;
use crate::types::{EventMetadata, PoolEvent, TokenPairOnChain, VenueState, VenueStateId};
use ethers::middleware::Middleware;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What applying one event did to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Existing pool mutated.
    Applied,
    /// Pool was unknown; introspected and inserted with the event folded in.
    Discovered,
    /// Metadata not strictly newer; state untouched.
    Outdated,
}

pub struct PoolStateManager<M> {
    chain_id: u64,
    adapters: Arc<AdapterRegistry<M>>,
    pools: HashMap<VenueStateId, VenueState>,
    latest_pool_event_meta: HashMap<VenueStateId, EventMetadata>,
    /// Pool ids touched since the last drain, in first-touch order.
    dirty: IndexSet<VenueStateId>,
}

impl<M: Middleware + 'static> PoolStateManager<M> {
    pub fn new(chain_id: u64, adapters: Arc<AdapterRegistry<M>>) -> Self {
        Self {
            chain_id,
            adapters,
            pools: HashMap::new(),
            latest_pool_event_meta: HashMap::new(),
            dirty: IndexSet::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry<M>> {
        &self.adapters
    }

    pub fn get(&self, id: &VenueStateId) -> Option<&VenueState> {
        self.pools.get(id)
    }

    pub fn contains(&self, id: &VenueStateId) -> bool {
        self.pools.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pool_ids(&self) -> impl Iterator<Item = &VenueStateId> {
        self.pools.keys()
    }

    pub fn states(&self) -> impl Iterator<Item = &VenueState> {
        self.pools.values()
    }

    /// Registers a pool discovered out-of-band (startup discovery or an
    /// explicit add-pool request) and queues it for the outbound batch.
    pub fn insert(&mut self, state: VenueState) {
        let id = state.id().clone();
        if let Some(meta) = state.latest_event_meta() {
            self.latest_pool_event_meta.insert(id.clone(), meta.clone());
        }
        self.pools.insert(id.clone(), state);
        self.dirty.insert(id);
    }

    pub fn remove(&mut self, id: &VenueStateId) -> Option<VenueState> {
        self.latest_pool_event_meta.remove(id);
        self.dirty.shift_remove(id);
        self.pools.remove(id)
    }

    /// Applies one decoded event, introspecting unknown pools first.
    pub async fn apply_event(&mut self, event: &PoolEvent) -> Result<ApplyOutcome, EngineError> {
        if !self.pools.contains_key(&event.pool_id) {
            let adapter = self
                .adapters
                .by_protocol(event.kind.protocol())
                .ok_or_else(|| EngineError::UnknownPool(event.pool_id.clone()))?;
            let state = adapter.introspect_from_event(event).await?;
            info!(
                "[PoolManager] 🔍 introspected unknown pool {} from {}",
                event.pool_id, event.kind.name()
            );
            self.latest_pool_event_meta
                .insert(event.pool_id.clone(), event.meta.clone());
            self.pools.insert(event.pool_id.clone(), state);
            self.dirty.insert(event.pool_id.clone());
            return Ok(ApplyOutcome::Discovered);
        }

        if let Some(known) = self.latest_pool_event_meta.get(&event.pool_id) {
            if !event.meta.is_newer_than(known) {
                debug!(
                    "[PoolManager] outdated event for {} ({:?} <= {:?})",
                    event.pool_id,
                    event.meta.ordinal(),
                    known.ordinal()
                );
                return Ok(ApplyOutcome::Outdated);
            }
        }

        let pool = self
            .pools
            .get_mut(&event.pool_id)
            .expect("checked above");
        let adapter = self
            .adapters
            .by_venue_name(pool.venue().name())
            .ok_or_else(|| EngineError::UnknownPool(event.pool_id.clone()))?;
        adapter.apply_event(pool, event)?;
        pool.set_latest_event_meta(event.meta.clone());
        self.latest_pool_event_meta
            .insert(event.pool_id.clone(), event.meta.clone());
        self.dirty.insert(event.pool_id.clone());
        Ok(ApplyOutcome::Applied)
    }

    /// True iff the manager's metadata and each pool's own metadata agree:
    /// no stored entry lags the state it describes.
    pub fn are_pools_fresh<'a>(&self, ids: impl IntoIterator<Item = &'a VenueStateId>) -> bool {
        ids.into_iter().all(|id| {
            let pool_meta = self.pools.get(id).and_then(|p| p.latest_event_meta());
            let manager_meta = self.latest_pool_event_meta.get(id);
            match (manager_meta, pool_meta) {
                (Some(m), Some(p)) => m.ordinal() >= p.ordinal(),
                (None, Some(_)) => false,
                _ => true,
            }
        })
    }

    /// Startup discovery: every adapter, every configured pair.
    pub async fn discover_and_register(&mut self, watched_pairs: &[TokenPairOnChain]) -> usize {
        let found = self.adapters.discover_all(watched_pairs).await;
        let count = found.len();
        for state in found {
            self.insert(state);
        }
        info!(
            "[PoolManager] ✅ discovery registered {} pools on chain {}",
            count, self.chain_id
        );
        count
    }

    /// Refreshes every pool over RPC. Individual failures are logged and do
    /// not abort the pass; returns the number refreshed.
    pub async fn update_all(&mut self) -> usize {
        let ids: Vec<VenueStateId> = self.pools.keys().cloned().collect();
        let mut refreshed = 0usize;
        for id in ids {
            let Some(pool) = self.pools.get_mut(&id) else {
                continue;
            };
            let Some(adapter) = self.adapters.by_venue_name(pool.venue().name()) else {
                warn!("[PoolManager] no adapter for venue {}", pool.venue().name());
                continue;
            };
            match adapter.refresh(pool).await {
                Ok(()) => {
                    refreshed += 1;
                    self.dirty.insert(id);
                }
                Err(e) => warn!("[PoolManager] ⚠️ refresh failed for {}: {}", id, e),
            }
        }
        refreshed
    }

    /// Takes the pending outbound batch: touched states in first-touch order.
    pub fn drain_dirty(&mut self) -> Vec<VenueState> {
        let ids: Vec<VenueStateId> = self.dirty.drain(..).collect();
        ids.iter()
            .filter_map(|id| self.pools.get(id).cloned())
            .collect()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

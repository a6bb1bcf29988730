//! Central venue-state store with multi-index views and change listeners.
//!
//! The aggregator unit owns this store; watcher deltas land here as
//! structural copies. Every secondary index is an exact inverse of the
//! primary map: membership in `by_chain[c]` iff the stored state's chain is
//! `c`, and likewise for tokens, venues, address pairs and symbol pairs.
//! Index maintenance happens before listener notification, and listeners run
//! synchronously on the writing thread in registration order; a panicking
//! listener is caught and logged, never aborting the write.

use crate::types::{PairId, VenueState, VenueStateId};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Update,
    Remove,
}

/// Payload delivered to change listeners.
#[derive(Debug, Clone)]
pub struct VenueChange {
    pub change: ChangeType,
    pub state: VenueState,
}

/// Registration receipt; feed back to [`AggregatorStore::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Listener = Box<dyn Fn(&VenueChange) + Send>;

/// On-demand aggregate counts over the primary map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatorStats {
    pub total: usize,
    pub disabled: usize,
    pub by_chain: HashMap<u64, usize>,
    pub by_venue: HashMap<String, usize>,
}

#[derive(Default)]
pub struct AggregatorStore {
    states: HashMap<VenueStateId, VenueState>,
    by_chain: HashMap<u64, HashSet<VenueStateId>>,
    /// `"chainId:0xaddr"` → ids of venues trading that token.
    by_token: HashMap<String, HashSet<VenueStateId>>,
    by_venue: HashMap<String, HashSet<VenueStateId>>,
    /// Sorted on-chain address pair key.
    by_address_pair: HashMap<String, HashSet<VenueStateId>>,
    /// Sorted symbol pair key (`PairId`).
    by_symbol_pair: HashMap<String, HashSet<VenueStateId>>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl AggregatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a state; indexes before notifying.
    pub fn set(&mut self, state: VenueState) -> ChangeType {
        let id = state.id().clone();
        let change = if let Some(previous) = self.states.remove(&id) {
            self.unindex(&previous);
            ChangeType::Update
        } else {
            ChangeType::Add
        };
        self.index(&state);
        self.states.insert(id, state.clone());
        self.notify(VenueChange { change, state });
        change
    }

    pub fn set_batch(&mut self, states: Vec<VenueState>) {
        for state in states {
            self.set(state);
        }
    }

    pub fn remove(&mut self, id: &VenueStateId) -> Option<VenueState> {
        let state = self.states.remove(id)?;
        self.unindex(&state);
        self.notify(VenueChange {
            change: ChangeType::Remove,
            state: state.clone(),
        });
        Some(state)
    }

    /// Flips the disabled flag in place. Deliberately does not notify.
    pub fn set_disabled(&mut self, id: &VenueStateId, flag: bool) -> bool {
        match self.states.get_mut(id) {
            Some(state) => {
                state.set_disabled(flag);
                true
            }
            None => false,
        }
    }

    /// Oracle-driven valuation write-back; in place, no notification.
    pub fn set_liquidity_usd(&mut self, id: &VenueStateId, usd: f64) -> bool {
        match self.states.get_mut(id) {
            Some(state) => {
                state.set_total_liquidity_in_usd(usd);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &VenueStateId) -> Option<&VenueState> {
        self.states.get(id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get_by_chain(&self, chain_id: u64) -> Vec<&VenueState> {
        self.collect(self.by_chain.get(&chain_id))
    }

    /// `token_key` is `"chainId:0xaddr"` (see [`crate::types::Token::chain_key`]).
    pub fn get_by_token(&self, token_key: &str) -> Vec<&VenueState> {
        self.collect(self.by_token.get(token_key))
    }

    pub fn get_by_venue(&self, venue_name: &str) -> Vec<&VenueState> {
        self.collect(self.by_venue.get(venue_name))
    }

    /// Lookup by on-chain address pair, either argument order.
    pub fn get_by_pair(
        &self,
        token_a: ethers::types::Address,
        token_b: ethers::types::Address,
    ) -> Vec<&VenueState> {
        let (lo, hi) = if token_a.as_bytes() <= token_b.as_bytes() {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        let key = format!("{:#x}-{:#x}", lo, hi);
        self.collect(self.by_address_pair.get(&key))
    }

    /// Lookup by symbol pair, either argument order.
    pub fn get_by_symbol_pair(&self, symbol_a: &str, symbol_b: &str) -> Vec<&VenueState> {
        let key = PairId::new(symbol_a, symbol_b).0;
        self.collect(self.by_symbol_pair.get(&key))
    }

    /// Scan over enabled states.
    pub fn get_active(&self) -> Vec<&VenueState> {
        self.states.values().filter(|s| !s.disabled()).collect()
    }

    /// Registers a change listener; fires synchronously on every
    /// `set`/`remove` in registration order.
    pub fn subscribe(&mut self, listener: impl Fn(&VenueChange) + Send + 'static) -> ListenerHandle {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        ListenerHandle(id)
    }

    pub fn unsubscribe(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != handle.0);
        before != self.listeners.len()
    }

    /// Aggregate counts, computed by scanning the primary map.
    pub fn stats(&self) -> AggregatorStats {
        let mut stats = AggregatorStats {
            total: self.states.len(),
            ..Default::default()
        };
        for state in self.states.values() {
            if state.disabled() {
                stats.disabled += 1;
            }
            if let Some(chain) = state.venue().chain_id() {
                *stats.by_chain.entry(chain).or_default() += 1;
            }
            *stats
                .by_venue
                .entry(state.venue().name().to_string())
                .or_default() += 1;
        }
        stats
    }

    fn collect(&self, ids: Option<&HashSet<VenueStateId>>) -> Vec<&VenueState> {
        ids.map(|set| set.iter().filter_map(|id| self.states.get(id)).collect())
            .unwrap_or_default()
    }

    fn index(&mut self, state: &VenueState) {
        let id = state.id().clone();
        if let Some(chain) = state.venue().chain_id() {
            self.by_chain.entry(chain).or_default().insert(id.clone());
        }
        self.by_venue
            .entry(state.venue().name().to_string())
            .or_default()
            .insert(id.clone());
        self.by_symbol_pair
            .entry(state.pair_id().0)
            .or_default()
            .insert(id.clone());
        if let Some(pair) = state.token_pair() {
            self.by_token
                .entry(pair.token0().chain_key())
                .or_default()
                .insert(id.clone());
            self.by_token
                .entry(pair.token1().chain_key())
                .or_default()
                .insert(id.clone());
            self.by_address_pair
                .entry(pair.address_key())
                .or_default()
                .insert(id);
        }
    }

    fn unindex(&mut self, state: &VenueState) {
        let id = state.id();
        if let Some(chain) = state.venue().chain_id() {
            prune(&mut self.by_chain, &chain, id);
        }
        prune(&mut self.by_venue, &state.venue().name().to_string(), id);
        prune(&mut self.by_symbol_pair, &state.pair_id().0, id);
        if let Some(pair) = state.token_pair() {
            prune(&mut self.by_token, &pair.token0().chain_key(), id);
            prune(&mut self.by_token, &pair.token1().chain_key(), id);
            prune(&mut self.by_address_pair, &pair.address_key(), id);
        }
    }

    fn notify(&self, change: VenueChange) {
        for (listener_id, listener) in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(&change)));
            if outcome.is_err() {
                error!(
                    "[Aggregator] listener {} panicked on {:?} of {}; continuing",
                    listener_id,
                    change.change,
                    change.state.id()
                );
            }
        }
    }
}

fn prune<K: std::hash::Hash + Eq + Clone>(
    index: &mut HashMap<K, HashSet<VenueStateId>>,
    key: &K,
    id: &VenueStateId,
) {
    if let Some(set) = index.get_mut(key) {
        if !set.remove(id) {
            warn!("[Aggregator] index entry missing for {}", id);
        }
        if set.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DexV2PoolState, Token, TokenPairOnChain, VenueId, VenueState, VenueStateId,
    };
    use ethers::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn token(byte: u8, symbol: &str) -> Token {
        Token {
            chain_id: 1,
            address: Address::from([byte; 20]),
            symbol: symbol.into(),
            name: symbol.into(),
            decimals: 18,
            trusted: true,
        }
    }

    fn pool(addr_byte: u8, venue_name: &str) -> VenueState {
        let pair = TokenPairOnChain::new(token(0x01, "WETH"), token(0x02, "USDC"));
        let address = Address::from([addr_byte; 20]);
        VenueState::DexV2(DexV2PoolState {
            id: VenueStateId::dex(1, address),
            venue: VenueId::Dex {
                name: venue_name.into(),
                chain_id: 1,
            },
            pair,
            address,
            reserve0: 1,
            reserve1: 1,
            fee_bps: 30,
            spot_price_0_to_1: 1.0,
            spot_price_1_to_0: 1.0,
            latest_event_meta: None,
            total_liquidity_in_usd: 0.0,
            disabled: false,
        })
    }

    #[test]
    fn indices_track_membership_exactly() {
        let mut store = AggregatorStore::new();
        let state = pool(0xaa, "uniswap-v3");
        let id = state.id().clone();
        store.set(state);

        let weth = Address::from([0x01; 20]);
        let usdc = Address::from([0x02; 20]);
        assert_eq!(store.get_by_chain(1).len(), 1);
        assert_eq!(store.get_by_token("1:0x0101010101010101010101010101010101010101").len(), 1);
        assert_eq!(store.get_by_venue("uniswap-v3").len(), 1);
        assert_eq!(store.get_by_pair(weth, usdc).len(), 1);
        assert_eq!(store.get_by_pair(usdc, weth).len(), 1);
        assert_eq!(store.get_by_symbol_pair("USDC", "WETH").len(), 1);
        assert_eq!(store.get_by_symbol_pair("WETH", "USDC").len(), 1);

        store.remove(&id);
        assert!(store.get_by_chain(1).is_empty());
        assert!(store.get_by_venue("uniswap-v3").is_empty());
        assert!(store.get_by_pair(weth, usdc).is_empty());
        assert!(store.get_by_symbol_pair("WETH", "USDC").is_empty());
        assert!(store
            .get_by_token("1:0x0101010101010101010101010101010101010101")
            .is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn set_twice_is_add_then_update_with_stable_indices() {
        let mut store = AggregatorStore::new();
        let changes: Arc<Mutex<Vec<ChangeType>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        store.subscribe(move |c| sink.lock().unwrap().push(c.change));

        let state = pool(0xaa, "uniswap-v2");
        assert_eq!(store.set(state.clone()), ChangeType::Add);
        assert_eq!(store.set(state), ChangeType::Update);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![ChangeType::Add, ChangeType::Update]
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_by_chain(1).len(), 1);
        assert_eq!(store.get_by_venue("uniswap-v2").len(), 1);
    }

    #[test]
    fn listeners_fire_in_registration_order_and_survive_panics() {
        let mut store = AggregatorStore::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        store.subscribe(move |_| first.lock().unwrap().push("first"));
        store.subscribe(|_| panic!("listener bug"));
        let third = Arc::clone(&order);
        store.subscribe(move |_| third.lock().unwrap().push("third"));

        store.set(pool(0xaa, "uniswap-v2"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);
        // The write itself survived the panicking listener.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut store = AggregatorStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let handle = store.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        store.set(pool(0xaa, "uniswap-v2"));
        assert!(store.unsubscribe(handle));
        store.set(pool(0xbb, "uniswap-v2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!store.unsubscribe(handle));
    }

    #[test]
    fn set_disabled_flips_without_notification() {
        let mut store = AggregatorStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        store.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        let state = pool(0xaa, "uniswap-v2");
        let id = state.id().clone();
        store.set(state);
        assert_eq!(store.get_active().len(), 1);

        assert!(store.set_disabled(&id, true));
        assert_eq!(count.load(Ordering::SeqCst), 1, "no notify on set_disabled");
        assert!(store.get_active().is_empty());
        assert_eq!(store.stats().disabled, 1);
    }

    #[test]
    fn stats_scan_primary_map() {
        let mut store = AggregatorStore::new();
        store.set(pool(0xaa, "uniswap-v2"));
        store.set(pool(0xbb, "uniswap-v3"));
        let stats = store.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_chain.get(&1), Some(&2));
        assert_eq!(stats.by_venue.get("uniswap-v3"), Some(&1));
    }
}

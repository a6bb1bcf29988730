//! # Poolwatch
//!
//! A multi-venue market-data engine for AMM liquidity pools. Each configured
//! chain gets a watcher unit that subscribes to block heads and a single
//! filtered log stream, decodes pool events, advances an authoritative
//! in-memory state model, and ships deltas over a typed message bus to a
//! central aggregator that indexes venue state by chain, token, venue and
//! symbol pair. A price oracle floods USD prices outward from stable-coin
//! anchors as pools update.
//!
//! ## Architecture
//!
//! The process is N+1 cooperative units: one aggregator plus one watcher per
//! platform. Units are single-threaded internally and share no mutable
//! state; every cross-unit datum crosses the bus as a structural copy with
//! big integers encoded as decimal strings.
//!
//! ### Watcher pipeline
//! Block tracking with reorg recovery, event decoding, per-pool ordered
//! state application, on-first-sight pool introspection, debounced delta
//! batching.
//!
//! ### Aggregation layer
//! Multi-indexed venue store with synchronous change listeners; the USD
//! price oracle is one such listener.
//!
//! ### Protocol adapters
//! One adapter per DEX variant (V2 constant-product, V3/V4 concentrated
//! liquidity) behind a single capability trait.

// Core types
/// Shared data model: tokens, venues, pool states, events.
pub mod types;
/// Typed error taxonomy.
pub mod errors;

// Math
/// Fixed-point AMM math (sqrt prices, tick walking, swap simulation).
pub mod amm_math;

// Protocol layer
/// The DEX adapter capability trait and shared adapter context.
pub mod dex_adapter;
/// Protocol-specific adapters (V2, V3, V4) and their registry.
pub mod adapters;
/// Per-chain token metadata registry.
pub mod token_registry;

// Watcher pipeline
/// Per-chain authoritative pool state with ordered event application.
pub mod pool_manager;
/// Raw log decoding into typed pool events.
pub mod log_decoder;
/// The per-chain watcher unit (blocks, logs, reorg recovery, batching).
pub mod watcher;

// Aggregation layer
/// Multi-indexed venue store with change listeners.
pub mod aggregator;
/// USD price derivation from stable anchors.
pub mod price_oracle;

// Infrastructure
/// Typed request/response/event bus between units.
pub mod bus;
/// Rate-limited chain RPC client.
pub mod rpc;
/// Multicall3 batch executor.
pub mod multicall;
/// Selector-based ABI encode/decode helpers.
pub mod abi;
/// Per-chain on-disk cache for immutable contract reads.
pub mod static_cache;

// Composition
/// Configuration schema and loading.
pub mod settings;
/// Process wiring: aggregator unit, watcher spawning, provider feeds.
pub mod engine;

// Re-exports for convenience
pub use aggregator::AggregatorStore;
pub use bus::MessageBus;
pub use dex_adapter::DexAdapter;
pub use engine::{AggregatorUnit, Engine};
pub use errors::EngineError;
pub use pool_manager::PoolStateManager;
pub use price_oracle::PriceOracle;
pub use settings::Settings;
pub use types::VenueState;
pub use watcher::Watcher;

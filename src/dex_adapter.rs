//! DEX adapter abstraction.
//!
//! One adapter per configured protocol variant. Every adapter exposes the
//! same capability set over its own state shape: discover pools for a pair,
//! initialise a pool from an unsolicited event, refresh dynamic state over
//! RPC, apply a decoded event, simulate, quote and report the fee. Shared
//! infrastructure (chain client, multicall, token registry, static cache) is
//! handed to each adapter as one explicit [`AdapterContext`] at construction.
//!
//! Adding a protocol means implementing this trait and registering the
//! adapter in `adapters::AdapterRegistry`; nothing in the watcher pipeline
//! changes.

use crate::errors::EngineError;
use crate::multicall::Multicall;
use crate::rpc::ChainRpc;
use crate::static_cache::StaticCache;
use crate::token_registry::TokenRegistry;
use crate::types::{
    DexProtocol, PoolEvent, TokenPairOnChain, TradeQuote, VenueId, VenueState,
};
use async_trait::async_trait;
use ethers::middleware::Middleware;
use ethers::types::U256;
use std::sync::Arc;

/// Shared per-chain infrastructure handed to every adapter.
pub struct AdapterContext<M> {
    pub chain_id: u64,
    pub rpc: Arc<ChainRpc<M>>,
    pub multicall: Arc<Multicall<M>>,
    pub tokens: Arc<TokenRegistry<M>>,
    pub cache: Option<Arc<StaticCache>>,
}

impl<M> Clone for AdapterContext<M> {
    fn clone(&self) -> Self {
        Self {
            chain_id: self.chain_id,
            rpc: Arc::clone(&self.rpc),
            multicall: Arc::clone(&self.multicall),
            tokens: Arc::clone(&self.tokens),
            cache: self.cache.clone(),
        }
    }
}

/// Capability set every protocol adapter provides.
///
/// `discover`, `introspect_from_event`, `refresh` and `quote` may suspend on
/// network I/O; `apply_event`, `simulate` and `fee_percent` are pure over the
/// passed state and never block.
#[async_trait]
pub trait DexAdapter<M: Middleware + 'static>: Send + Sync {
    /// Venue this adapter instance watches (one adapter per configured DEX).
    fn venue(&self) -> &VenueId;

    fn protocol(&self) -> DexProtocol;

    /// All pools this venue offers for the pair. "No pool" is an empty
    /// result, not an error; only transport failures error.
    async fn discover(&self, pair: &TokenPairOnChain) -> Result<Vec<VenueState>, EngineError>;

    /// Builds a fully initialised pool state from the first event of an
    /// unknown pool, introspecting static attributes over RPC. Fails with
    /// [`EngineError::UnknownPool`] when token0/token1 cannot be resolved.
    async fn introspect_from_event(&self, event: &PoolEvent) -> Result<VenueState, EngineError>;

    /// Initialises a pool's static identity from a bare contract address,
    /// with dynamic fields zero. Protocols without per-pool contracts (V4)
    /// fail with [`EngineError::UnknownPool`].
    async fn init_from_address(&self, address: ethers::types::Address)
        -> Result<VenueState, EngineError>;

    /// Re-reads dynamic fields (reserves / slot0 / liquidity / tick window)
    /// from the chain, leaving static identity untouched.
    async fn refresh(&self, pool: &mut VenueState) -> Result<(), EngineError>;

    /// Applies a decoded event to the state. Events of a foreign protocol
    /// fail with [`EngineError::EventKindMismatch`]; acknowledged-but-ignored
    /// kinds (mint/burn/modify-liquidity) succeed without touching state.
    fn apply_event(&self, pool: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError>;

    /// Library-math exact-input simulation against the in-memory state.
    fn simulate(
        &self,
        pool: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, EngineError>;

    /// Full quote: output amount, execution price, impact, slippage and a
    /// confidence grade. May consult an external quoter contract.
    async fn quote(
        &self,
        pool: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError>;

    /// Fee as a percentage (0.3 for 30 bps).
    fn fee_percent(&self, pool: &VenueState) -> f64;
}

/// Decimal-adjusted execution price of `amount_out` per `amount_in`.
pub(crate) fn execution_price(
    amount_in: U256,
    amount_out: U256,
    decimals_in: u8,
    decimals_out: u8,
) -> f64 {
    let inp = crate::types::conversions::u256_to_f64_lossy(amount_in)
        / 10f64.powi(decimals_in as i32);
    let out = crate::types::conversions::u256_to_f64_lossy(amount_out)
        / 10f64.powi(decimals_out as i32);
    if inp > 0.0 {
        out / inp
    } else {
        0.0
    }
}

/// Builds a [`TradeQuote`] from an executed amount against the spot price.
pub(crate) fn quote_from_execution(
    amount_in: U256,
    amount_out: U256,
    spot_price: f64,
    decimals_in: u8,
    decimals_out: u8,
    confidence: f64,
) -> TradeQuote {
    let exec = execution_price(amount_in, amount_out, decimals_in, decimals_out);
    let price_impact_pct = if spot_price > 0.0 {
        ((1.0 - exec / spot_price) * 100.0).clamp(0.0, 100.0)
    } else {
        100.0
    };
    TradeQuote {
        amount_out,
        execution_price: exec,
        price_impact_pct,
        slippage_bps: price_impact_pct * 100.0,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_price_adjusts_for_decimals() {
        // 1e18 in (18 decimals) -> 2000e6 out (6 decimals) = price 2000.
        let p = execution_price(
            U256::from(10u64).pow(18u8.into()),
            U256::from(2_000_000_000u64),
            18,
            6,
        );
        assert!((p - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn quote_measures_impact_against_spot() {
        let q = quote_from_execution(
            U256::from(10u64).pow(18u8.into()),
            U256::from(1_960_000_000u64),
            2000.0,
            18,
            6,
            0.95,
        );
        assert!((q.price_impact_pct - 2.0).abs() < 1e-6);
        assert!((q.slippage_bps - 200.0).abs() < 1e-3);
        assert_eq!(q.confidence, 0.95);
    }
}

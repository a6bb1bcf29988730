//! Protocol-specific adapters and their registry.
//!
//! The registry owns one adapter instance per configured DEX. Routing is by
//! venue name for known pools and by protocol family for unsolicited events
//! (the first registered adapter of the family introspects the pool).

pub mod uniswap_v2;
pub mod uniswap_v3;
pub mod uniswap_v4;

pub use uniswap_v2::UniswapV2Adapter;
pub use uniswap_v3::UniswapV3Adapter;
pub use uniswap_v4::UniswapV4Adapter;

use crate::abi;
use crate::dex_adapter::{AdapterContext, DexAdapter};
use crate::errors::EngineError;
use crate::static_cache::{CacheValue, StaticCache};
use crate::types::{DexProtocol, TokenPairOnChain, VenueState};
use ethers::middleware::Middleware;
use ethers::types::{Address, Bytes};
use std::sync::Arc;
use tracing::warn;

pub struct AdapterRegistry<M> {
    adapters: Vec<Arc<dyn DexAdapter<M>>>,
}

impl<M: Middleware + 'static> AdapterRegistry<M> {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn DexAdapter<M>>) {
        self.adapters.push(adapter);
    }

    pub fn all(&self) -> &[Arc<dyn DexAdapter<M>>] {
        &self.adapters
    }

    pub fn by_venue_name(&self, name: &str) -> Option<Arc<dyn DexAdapter<M>>> {
        self.adapters
            .iter()
            .find(|a| a.venue().name() == name)
            .map(Arc::clone)
    }

    /// First registered adapter of the protocol family. Unsolicited events
    /// only identify the family, so this is where they get introspected.
    pub fn by_protocol(&self, protocol: DexProtocol) -> Option<Arc<dyn DexAdapter<M>>> {
        self.adapters
            .iter()
            .find(|a| a.protocol() == protocol)
            .map(Arc::clone)
    }

    /// Fans `discover` out across every adapter for each watched pair.
    /// Per-venue failures are logged and skipped; discovery never aborts.
    pub async fn discover_all(&self, pairs: &[TokenPairOnChain]) -> Vec<VenueState> {
        let mut found = Vec::new();
        for pair in pairs {
            for adapter in &self.adapters {
                match adapter.discover(pair).await {
                    Ok(pools) => found.extend(pools),
                    Err(e) => warn!(
                        "[AdapterRegistry] ⚠️ discover failed on {} for {}: {}",
                        adapter.venue().name(),
                        pair.symbol_key(),
                        e
                    ),
                }
            }
        }
        found
    }
}

impl<M: Middleware + 'static> Default for AdapterRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spot prices of a constant-product pool, decimal-adjusted:
/// `p01 = (r1/r0)·10^(d0−d1)`.
pub(crate) fn v2_spot_prices(r0: u128, r1: u128, d0: u8, d1: u8) -> (f64, f64) {
    if r0 == 0 || r1 == 0 {
        return (0.0, 0.0);
    }
    let p01 = (r1 as f64 / r0 as f64) * 10f64.powi(d0 as i32 - d1 as i32);
    if p01 > 0.0 && p01.is_finite() {
        (p01, 1.0 / p01)
    } else {
        (0.0, 0.0)
    }
}

/// Spot prices of a concentrated-liquidity pool from its sqrt price.
pub(crate) fn sqrt_spot_prices(
    sqrt_price_x96: ethers::types::U256,
    d0: u8,
    d1: u8,
) -> (f64, f64) {
    let p01 = crate::amm_math::sqrt_price_x96_to_price(sqrt_price_x96, d0, d1);
    if p01 > 0.0 && p01.is_finite() {
        (p01, 1.0 / p01)
    } else {
        (0.0, 0.0)
    }
}

/// An address-returning static view call, memoised through the static cache.
pub(crate) async fn cached_address_call<M: Middleware + 'static>(
    ctx: &AdapterContext<M>,
    target: Address,
    method: &str,
    call_data: Bytes,
) -> Result<Address, EngineError> {
    let args = serde_json::json!([]);
    let key = ctx
        .cache
        .as_ref()
        .and_then(|_| StaticCache::contract_key(target, method, &args));
    if let (Some(cache), Some(key)) = (ctx.cache.as_ref(), key.as_ref()) {
        if let Some(hit) = cache.get(key).and_then(|v| {
            v.as_str().and_then(|s| s.parse::<Address>().ok())
        }) {
            return Ok(hit);
        }
    }
    let out = ctx.rpc.call(target, call_data).await?;
    let addr = abi::decode_address(&out, 0)?;
    if let (Some(cache), Some(key)) = (ctx.cache.as_ref(), key) {
        cache.put(key, CacheValue::String(format!("{:#x}", addr)));
    }
    Ok(addr)
}

/// An integer-returning static view call (fee, tickSpacing), memoised.
pub(crate) async fn cached_int_call<M: Middleware + 'static>(
    ctx: &AdapterContext<M>,
    target: Address,
    method: &str,
    call_data: Bytes,
) -> Result<i64, EngineError> {
    let args = serde_json::json!([]);
    let key = ctx
        .cache
        .as_ref()
        .and_then(|_| StaticCache::contract_key(target, method, &args));
    if let (Some(cache), Some(key)) = (ctx.cache.as_ref(), key.as_ref()) {
        if let Some(hit) = cache.get(key).and_then(|v| v.as_int()) {
            return Ok(hit);
        }
    }
    let out = ctx.rpc.call(target, call_data).await?;
    let value = abi::decode_i24(&out, 0).map(|v| v as i64).or_else(|_| {
        abi::decode_u32(&out, 0).map(|v| v as i64)
    })?;
    if let (Some(cache), Some(key)) = (ctx.cache.as_ref(), key) {
        cache.put(key, CacheValue::Int(value));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_spot_prices_adjust_for_decimals() {
        // 100 WETH (18 dec) vs 200_000 USDC (6 dec): price0to1 = 2000.
        let r0 = 100u128 * 10u128.pow(18);
        let r1 = 200_000u128 * 10u128.pow(6);
        let (p01, p10) = v2_spot_prices(r0, r1, 18, 6);
        assert!((p01 - 2000.0).abs() < 1e-6);
        assert!((p10 - 1.0 / 2000.0).abs() < 1e-12);
        assert_eq!(v2_spot_prices(0, r1, 18, 6), (0.0, 0.0));
    }
}

//! USD price derivation across pools.
//!
//! Seeded with stable-coin anchors pinned to exactly 1.0, the oracle floods
//! prices outward through whatever pools the aggregator delivers: knowing one
//! side of a pool prices the other via the spot price. No graph search: the
//! aggregator delivers pools in a deterministic order and successive batches
//! saturate the graph. Keys are per-chain (`"chainId:0xaddr"`); the oracle
//! never unifies prices across chains.

use crate::types::conversions::u256_to_f64_lossy;
use crate::types::VenueState;
use ethers::types::Address;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct PriceOracle {
    /// `"chainId:0xaddr"` → USD price.
    prices: HashMap<String, f64>,
    /// Anchor keys; their price is 1.0 and can never be overwritten.
    anchors: HashSet<String>,
}

impl PriceOracle {
    pub fn new(stable_anchors: impl IntoIterator<Item = (u64, Address)>) -> Self {
        let mut prices = HashMap::new();
        let mut anchors = HashSet::new();
        for (chain_id, address) in stable_anchors {
            let key = Self::key(chain_id, address);
            prices.insert(key.clone(), 1.0);
            anchors.insert(key);
        }
        Self { prices, anchors }
    }

    pub fn key(chain_id: u64, address: Address) -> String {
        format!("{}:{:#x}", chain_id, address)
    }

    pub fn usd_price(&self, chain_id: u64, address: Address) -> Option<f64> {
        self.price_by_key(&Self::key(chain_id, address))
    }

    pub fn price_by_key(&self, key: &str) -> Option<f64> {
        self.prices.get(key).copied()
    }

    pub fn is_anchor(&self, key: &str) -> bool {
        self.anchors.contains(key)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Propagates prices through one delivered batch, in delivery order.
    /// Returns how many prices were written.
    pub fn on_pools_updated(&mut self, pools: &[VenueState]) -> usize {
        let mut written = 0usize;
        for state in pools {
            let Some(pair) = state.token_pair() else {
                continue;
            };
            let (Some(p01), Some(p10)) = (state.spot_price_0_to_1(), state.spot_price_1_to_0())
            else {
                continue;
            };
            let key0 = pair.token0().chain_key();
            let key1 = pair.token1().chain_key();

            if let Some(usd0) = self.price_by_key(&key0) {
                if p01 > 0.0 && !self.is_anchor(&key1) {
                    let usd1 = usd0 / p01;
                    if usd1.is_finite() && usd1 > 0.0 {
                        self.prices.insert(key1.clone(), usd1);
                        written += 1;
                        debug!(
                            "[PriceOracle] {} priced at {:.6} via {}",
                            key1,
                            usd1,
                            state.id()
                        );
                    }
                }
            }
            if let Some(usd1) = self.price_by_key(&key1) {
                if p10 > 0.0 && !self.is_anchor(&key0) {
                    let usd0 = usd1 / p10;
                    if usd0.is_finite() && usd0 > 0.0 {
                        self.prices.insert(key0.clone(), usd0);
                        written += 1;
                        debug!(
                            "[PriceOracle] {} priced at {:.6} via {}",
                            key0,
                            usd0,
                            state.id()
                        );
                    }
                }
            }
        }
        written
    }

    /// USD value of the pool's reserves (virtual reserves for
    /// concentrated-liquidity pools); `None` until both sides are priced.
    pub fn pool_liquidity_usd(&self, state: &VenueState) -> Option<f64> {
        let pair = state.token_pair()?;
        let usd0 = self.price_by_key(&pair.token0().chain_key())?;
        let usd1 = self.price_by_key(&pair.token1().chain_key())?;
        let (d0, d1) = (pair.token0().decimals, pair.token1().decimals);
        let (r0, r1) = match state {
            VenueState::DexV2(p) => (p.reserve0 as f64, p.reserve1 as f64),
            VenueState::DexV3(p) => {
                let (r0, r1) = crate::amm_math::virtual_reserves(p.sqrt_price_x96, p.liquidity);
                (u256_to_f64_lossy(r0), u256_to_f64_lossy(r1))
            }
            VenueState::DexV4(p) => {
                let (r0, r1) = crate::amm_math::virtual_reserves(p.sqrt_price_x96, p.liquidity);
                (u256_to_f64_lossy(r0), u256_to_f64_lossy(r1))
            }
            VenueState::CexMarket(_) => return None,
        };
        Some(r0 / 10f64.powi(d0 as i32) * usd0 + r1 / 10f64.powi(d1 as i32) * usd1)
    }
}

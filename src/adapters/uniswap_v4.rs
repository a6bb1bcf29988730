//! Singleton-manager (V4 family) adapter.
//!
//! V4 pools live inside one pool-manager contract and are identified by the
//! 32-byte `keccak256(abi.encode(currency0, currency1, fee, tickSpacing,
//! hooks))` key. State reads go through the deployed state-view contract.
//! Hooked pools are accepted but their swap behaviour can be arbitrary, so
//! simulation degrades confidence and logs a warning.

use crate::abi::{self, sel};
use crate::amm_math::{self, TickRangeView};
use crate::dex_adapter::{quote_from_execution, AdapterContext, DexAdapter};
use crate::errors::EngineError;
use crate::multicall::Call;
use crate::types::{
    DexProtocol, DexV4PoolState, PoolEvent, PoolEventKind, TokenPairOnChain, TradeQuote, VenueId,
    VenueState, VenueStateId,
};
use async_trait::async_trait;
use ethers::middleware::Middleware;
use ethers::types::{Address, U256};
use tracing::{debug, warn};

/// Standard no-hook `(fee_ppm, tick_spacing)` combinations probed during
/// discovery, mirroring the V3 fee tiers.
pub const STANDARD_POOL_PARAMS: [(u32, i32); 4] = [(100, 1), (500, 10), (3000, 60), (10000, 200)];

const NO_HOOK_CONFIDENCE: f64 = 0.85;
const HOOKED_CONFIDENCE: f64 = 0.50;

pub struct UniswapV4Adapter<M> {
    ctx: AdapterContext<M>,
    venue: VenueId,
    pool_manager: Address,
    state_view: Address,
    #[allow(dead_code)]
    quoter: Address,
}

impl<M: Middleware + 'static> UniswapV4Adapter<M> {
    pub fn new(
        ctx: AdapterContext<M>,
        venue_name: &str,
        pool_manager: Address,
        state_view: Address,
        quoter: Address,
    ) -> Self {
        let venue = VenueId::Dex {
            name: venue_name.to_string(),
            chain_id: ctx.chain_id,
        };
        Self {
            ctx,
            venue,
            pool_manager,
            state_view,
            quoter,
        }
    }

    /// DEX identity for a keyed pool: the key stands in for the address.
    fn state_id(&self, pool_key: [u8; 32]) -> VenueStateId {
        VenueStateId(format!("{}:0x{}", self.ctx.chain_id, hex::encode(pool_key)))
    }

    #[allow(clippy::too_many_arguments)]
    fn make_state(
        &self,
        pool_key: [u8; 32],
        pair: TokenPairOnChain,
        fee_ppm: u32,
        tick_spacing: i32,
        hooks: Option<Address>,
        sqrt_price_x96: U256,
        tick: i32,
        liquidity: u128,
    ) -> DexV4PoolState {
        let (d0, d1) = (pair.token0().decimals, pair.token1().decimals);
        let (p01, p10) = super::sqrt_spot_prices(sqrt_price_x96, d0, d1);
        DexV4PoolState {
            id: self.state_id(pool_key),
            venue: self.venue.clone(),
            pair,
            pool_key,
            manager: self.pool_manager,
            hooks,
            sqrt_price_x96,
            tick,
            liquidity,
            tick_spacing,
            fee_ppm,
            ticks: Vec::new(),
            spot_price_0_to_1: p01,
            spot_price_1_to_0: p10,
            latest_event_meta: None,
            total_liquidity_in_usd: 0.0,
            disabled: false,
        }
    }

    fn as_v4<'a>(&self, pool: &'a VenueState) -> Result<&'a DexV4PoolState, EngineError> {
        match pool {
            VenueState::DexV4(p) => Ok(p),
            _ => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v4",
                event: "foreign-state",
            }),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> DexAdapter<M> for UniswapV4Adapter<M> {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn protocol(&self) -> DexProtocol {
        DexProtocol::V4
    }

    async fn discover(&self, pair: &TokenPairOnChain) -> Result<Vec<VenueState>, EngineError> {
        let mut pools = Vec::new();
        for (fee, spacing) in STANDARD_POOL_PARAMS {
            let key = abi::v4_pool_key(
                pair.token0().address,
                pair.token1().address,
                fee,
                spacing,
                Address::zero(),
            );
            let out = self
                .ctx
                .rpc
                .call(self.state_view, abi::pool_key_call(sel::GET_SLOT0, key))
                .await?;
            if out.len() < 32 {
                continue;
            }
            let (sqrt, _tick, _lp_fee) = abi::decode_v4_slot0(&out)?;
            // Uninitialised pools read back a zero sqrt price.
            if sqrt.is_zero() {
                continue;
            }
            debug!(
                "[UniswapV4] 🔍 {} pool for {} fee {}: 0x{}",
                self.venue.name(),
                pair.symbol_key(),
                fee,
                hex::encode(key)
            );
            pools.push(VenueState::DexV4(self.make_state(
                key,
                pair.clone(),
                fee,
                spacing,
                None,
                U256::zero(),
                0,
                0,
            )));
        }
        Ok(pools)
    }

    async fn introspect_from_event(&self, event: &PoolEvent) -> Result<VenueState, EngineError> {
        // The pool key is a one-way hash: the currencies behind an unseen key
        // cannot be recovered, so an unsolicited V4 event is undecidable.
        match &event.kind {
            PoolEventKind::V4Swap { pool_key, .. }
            | PoolEventKind::V4ModifyLiquidity { pool_key, .. } => {
                warn!(
                    "[UniswapV4] ⚠️ event for unknown pool key 0x{}, cannot resolve currencies",
                    hex::encode(pool_key)
                );
                Err(EngineError::UnknownPool(self.state_id(*pool_key)))
            }
            other => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v4",
                event: other.name(),
            }),
        }
    }

    async fn init_from_address(&self, address: Address) -> Result<VenueState, EngineError> {
        // Keyed pools have no per-pool contract; an address alone cannot
        // identify one.
        Err(EngineError::UnknownPool(VenueStateId::dex(
            self.ctx.chain_id,
            address,
        )))
    }

    async fn refresh(&self, pool: &mut VenueState) -> Result<(), EngineError> {
        let key = self.as_v4(pool)?.pool_key;
        let results = self
            .ctx
            .multicall
            .run(vec![
                Call {
                    target: self.state_view,
                    call_data: abi::pool_key_call(sel::GET_SLOT0, key),
                },
                Call {
                    target: self.state_view,
                    call_data: abi::pool_key_call(sel::GET_LIQUIDITY, key),
                },
            ])
            .await?;
        if results.len() != 2 || results.iter().any(|r| r.is_empty()) {
            return Err(EngineError::rpc(format!(
                "state-view reverted for key 0x{}",
                hex::encode(key)
            )));
        }
        let (sqrt, tick, _lp_fee) = abi::decode_v4_slot0(&results[0])?;
        let liquidity = abi::decode_u128(&results[1], 0)?;
        if let VenueState::DexV4(p) = pool {
            p.sqrt_price_x96 = sqrt;
            p.tick = tick;
            p.liquidity = liquidity;
            let (d0, d1) = (p.pair.token0().decimals, p.pair.token1().decimals);
            let (p01, p10) = super::sqrt_spot_prices(sqrt, d0, d1);
            p.spot_price_0_to_1 = p01;
            p.spot_price_1_to_0 = p10;
        }
        Ok(())
    }

    fn apply_event(&self, pool: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        let p = match pool {
            VenueState::DexV4(p) => p,
            _ => {
                return Err(EngineError::EventKindMismatch {
                    adapter: "uniswap-v4",
                    event: event.kind.name(),
                })
            }
        };
        match &event.kind {
            PoolEventKind::V4Swap {
                sqrt_price_x96,
                liquidity,
                tick,
                ..
            } => {
                p.sqrt_price_x96 = *sqrt_price_x96;
                p.liquidity = *liquidity;
                p.tick = *tick;
                let (d0, d1) = (p.pair.token0().decimals, p.pair.token1().decimals);
                let (p01, p10) = super::sqrt_spot_prices(*sqrt_price_x96, d0, d1);
                p.spot_price_0_to_1 = p01;
                p.spot_price_1_to_0 = p10;
                Ok(())
            }
            // Needs a refresh to matter; acknowledged without touching state.
            PoolEventKind::V4ModifyLiquidity { .. } => Ok(()),
            other => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v4",
                event: other.name(),
            }),
        }
    }

    fn simulate(
        &self,
        pool: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, EngineError> {
        let p = self.as_v4(pool)?;
        if p.hooks.is_some() {
            warn!(
                "[UniswapV4] ⚠️ simulating hooked pool 0x{}; accuracy not guaranteed",
                hex::encode(p.pool_key)
            );
        }
        let view = TickRangeView {
            sqrt_price_x96: p.sqrt_price_x96,
            tick: p.tick,
            liquidity: p.liquidity,
            ticks: &p.ticks,
            fee_ppm: p.fee_ppm,
        };
        amm_math::simulate_multi_tick_swap(&view, amount_in, zero_for_one)
    }

    async fn quote(
        &self,
        pool: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError> {
        let p = self.as_v4(pool)?;
        let amount_out = self.simulate(pool, amount_in, zero_for_one)?;
        let (spot, d_in, d_out) = if zero_for_one {
            (
                p.spot_price_0_to_1,
                p.pair.token0().decimals,
                p.pair.token1().decimals,
            )
        } else {
            (
                p.spot_price_1_to_0,
                p.pair.token1().decimals,
                p.pair.token0().decimals,
            )
        };
        let confidence = if p.hooks.is_some() {
            HOOKED_CONFIDENCE
        } else {
            NO_HOOK_CONFIDENCE
        };
        Ok(quote_from_execution(
            amount_in, amount_out, spot, d_in, d_out, confidence,
        ))
    }

    fn fee_percent(&self, pool: &VenueState) -> f64 {
        match self.as_v4(pool) {
            Ok(p) => p.fee_ppm as f64 / 1_000_000.0 * 100.0,
            Err(_) => 0.0,
        }
    }
}

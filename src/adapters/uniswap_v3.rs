//! Concentrated-liquidity (V3 family) adapter.

use crate::abi::{self, sel};
use crate::amm_math::{self, TickRangeView};
use crate::dex_adapter::{quote_from_execution, AdapterContext, DexAdapter};
use crate::errors::EngineError;
use crate::multicall::Call;
use crate::types::{
    DexProtocol, DexV3PoolState, PoolEvent, PoolEventKind, TickEntry, TokenPairOnChain,
    TradeQuote, VenueId, VenueState, VenueStateId,
};
use async_trait::async_trait;
use ethers::abi::Token as AbiToken;
use ethers::middleware::Middleware;
use ethers::types::{Address, Bytes, H256, U256};
use tracing::debug;

use super::{cached_int_call, sqrt_spot_prices};

/// The closed fee-tier set probed during discovery (parts per million).
pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

/// Initialised-tick window radius, in tick spacings, pulled on refresh.
/// 250 each side keeps the whole window inside one 500-sub-call multicall.
const TICK_WINDOW_RADIUS: i32 = 250;

/// quoteExactInputSingle(address,address,uint24,uint256,uint160)
const QUOTE_EXACT_INPUT_SINGLE: [u8; 4] = [0xf7, 0x72, 0x9d, 0x43];

const QUOTER_CONFIDENCE: f64 = 0.98;
const SIMULATED_CONFIDENCE: f64 = 0.80;

pub struct UniswapV3Adapter<M> {
    ctx: AdapterContext<M>,
    venue: VenueId,
    factory: Address,
    #[allow(dead_code)]
    router: Address,
    quoter: Address,
    #[allow(dead_code)]
    init_code_hash: Option<H256>,
}

impl<M: Middleware + 'static> UniswapV3Adapter<M> {
    pub fn new(
        ctx: AdapterContext<M>,
        venue_name: &str,
        factory: Address,
        router: Address,
        quoter: Address,
        init_code_hash: Option<H256>,
    ) -> Self {
        let venue = VenueId::Dex {
            name: venue_name.to_string(),
            chain_id: ctx.chain_id,
        };
        Self {
            ctx,
            venue,
            factory,
            router,
            quoter,
            init_code_hash,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn make_state(
        &self,
        address: Address,
        pair: TokenPairOnChain,
        fee_ppm: u32,
        tick_spacing: i32,
        sqrt_price_x96: U256,
        tick: i32,
        liquidity: u128,
    ) -> DexV3PoolState {
        let (d0, d1) = (pair.token0().decimals, pair.token1().decimals);
        let (p01, p10) = sqrt_spot_prices(sqrt_price_x96, d0, d1);
        DexV3PoolState {
            id: VenueStateId::dex(self.ctx.chain_id, address),
            venue: self.venue.clone(),
            pair,
            address,
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

    fn as_v3<'a>(&self, pool: &'a VenueState) -> Result<&'a DexV3PoolState, EngineError> {
        match pool {
            VenueState::DexV3(p) => Ok(p),
            _ => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v3",
                event: "foreign-state",
            }),
        }
    }

    async fn resolve_static(
        &self,
        pool: Address,
    ) -> Result<(TokenPairOnChain, u32, i32), EngineError> {
        let unknown = || EngineError::UnknownPool(VenueStateId::dex(self.ctx.chain_id, pool));
        let t0 = super::cached_address_call(&self.ctx, pool, "token0", abi::call_data(sel::TOKEN0))
            .await
            .map_err(|_| unknown())?;
        let t1 = super::cached_address_call(&self.ctx, pool, "token1", abi::call_data(sel::TOKEN1))
            .await
            .map_err(|_| unknown())?;
        let fee = cached_int_call(&self.ctx, pool, "fee", abi::call_data(sel::FEE)).await? as u32;
        let spacing =
            cached_int_call(&self.ctx, pool, "tickSpacing", abi::call_data(sel::TICK_SPACING))
                .await? as i32;
        let token0 = self.ctx.tokens.ensure_registered(t0).await?;
        let token1 = self.ctx.tokens.ensure_registered(t1).await?;
        let pair = TokenPairOnChain::new(token0.as_ref().clone(), token1.as_ref().clone());
        Ok((pair, fee, spacing))
    }

    /// Aligned candidate ticks around `tick`, spanning the window radius.
    fn tick_window(tick: i32, spacing: i32) -> Vec<i32> {
        let spacing = spacing.max(1);
        let anchor = tick.div_euclid(spacing) * spacing;
        (-TICK_WINDOW_RADIUS..TICK_WINDOW_RADIUS)
            .map(|i| anchor + i * spacing)
            .filter(|t| (amm_math::MIN_TICK..=amm_math::MAX_TICK).contains(t))
            .collect()
    }

    async fn fetch_tick_window(
        &self,
        pool: Address,
        tick: i32,
        spacing: i32,
    ) -> Result<Vec<TickEntry>, EngineError> {
        let candidates = Self::tick_window(tick, spacing);
        let calls: Vec<Call> = candidates
            .iter()
            .map(|t| Call {
                target: pool,
                call_data: abi::ticks_call(*t),
            })
            .collect();
        let results = self.ctx.multicall.run(calls).await?;
        let mut entries = Vec::new();
        for (t, data) in candidates.iter().zip(results.iter()) {
            if data.is_empty() {
                continue;
            }
            match abi::decode_tick_liquidity_net(data) {
                Ok(net) if net != 0 => entries.push(TickEntry {
                    tick: *t,
                    liquidity_net: net,
                }),
                Ok(_) => {}
                Err(e) => debug!("[UniswapV3] tick {} decode failed: {}", t, e),
            }
        }
        // Candidates were generated ascending; entries inherit the order.
        Ok(entries)
    }
}

#[async_trait]
impl<M: Middleware + 'static> DexAdapter<M> for UniswapV3Adapter<M> {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn protocol(&self) -> DexProtocol {
        DexProtocol::V3
    }

    async fn discover(&self, pair: &TokenPairOnChain) -> Result<Vec<VenueState>, EngineError> {
        let mut pools = Vec::new();
        for fee in FEE_TIERS {
            let data = abi::get_pool_call(pair.token0().address, pair.token1().address, fee);
            let out = self.ctx.rpc.call(self.factory, data).await?;
            if abi::is_zero_address_word(&out) {
                continue;
            }
            let address = abi::decode_address(&out, 0)?;
            let spacing =
                cached_int_call(&self.ctx, address, "tickSpacing", abi::call_data(sel::TICK_SPACING))
                    .await? as i32;
            debug!(
                "[UniswapV3] 🔍 {} pool for {} fee {}: {:#x}",
                self.venue.name(),
                pair.symbol_key(),
                fee,
                address
            );
            pools.push(VenueState::DexV3(self.make_state(
                address,
                pair.clone(),
                fee,
                spacing,
                U256::zero(),
                0,
                0,
            )));
        }
        Ok(pools)
    }

    async fn introspect_from_event(&self, event: &PoolEvent) -> Result<VenueState, EngineError> {
        let (sqrt, liquidity, tick) = match &event.kind {
            PoolEventKind::V3Swap {
                sqrt_price_x96,
                liquidity,
                tick,
            } => (*sqrt_price_x96, *liquidity, *tick),
            PoolEventKind::V3Mint { .. } | PoolEventKind::V3Burn { .. } => {
                (U256::zero(), 0u128, 0i32)
            }
            other => {
                return Err(EngineError::EventKindMismatch {
                    adapter: "uniswap-v3",
                    event: other.name(),
                })
            }
        };
        let (pair, fee, spacing) = self.resolve_static(event.address).await?;
        let mut state = self.make_state(event.address, pair, fee, spacing, sqrt, tick, liquidity);
        state.latest_event_meta = Some(event.meta.clone());
        Ok(VenueState::DexV3(state))
    }

    async fn init_from_address(&self, address: Address) -> Result<VenueState, EngineError> {
        let (pair, fee, spacing) = self.resolve_static(address).await?;
        Ok(VenueState::DexV3(self.make_state(
            address,
            pair,
            fee,
            spacing,
            U256::zero(),
            0,
            0,
        )))
    }

    async fn refresh(&self, pool: &mut VenueState) -> Result<(), EngineError> {
        let (address, spacing) = {
            let p = self.as_v3(pool)?;
            (p.address, p.tick_spacing)
        };
        let results = self
            .ctx
            .multicall
            .run(vec![
                Call {
                    target: address,
                    call_data: abi::call_data(sel::SLOT0),
                },
                Call {
                    target: address,
                    call_data: abi::call_data(sel::LIQUIDITY),
                },
            ])
            .await?;
        if results.len() != 2 || results.iter().any(|r| r.is_empty()) {
            return Err(EngineError::rpc(format!("slot0/liquidity reverted for {:#x}", address)));
        }
        let (sqrt, tick) = abi::decode_slot0(&results[0])?;
        let liquidity = abi::decode_u128(&results[1], 0)?;
        let ticks = self.fetch_tick_window(address, tick, spacing).await?;

        if let VenueState::DexV3(p) = pool {
            p.sqrt_price_x96 = sqrt;
            p.tick = tick;
            p.liquidity = liquidity;
            p.ticks = ticks;
            let (d0, d1) = (p.pair.token0().decimals, p.pair.token1().decimals);
            let (p01, p10) = sqrt_spot_prices(sqrt, d0, d1);
            p.spot_price_0_to_1 = p01;
            p.spot_price_1_to_0 = p10;
        }
        Ok(())
    }

    fn apply_event(&self, pool: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        let p = match pool {
            VenueState::DexV3(p) => p,
            _ => {
                return Err(EngineError::EventKindMismatch {
                    adapter: "uniswap-v3",
                    event: event.kind.name(),
                })
            }
        };
        match &event.kind {
            PoolEventKind::V3Swap {
                sqrt_price_x96,
                liquidity,
                tick,
            } => {
                p.sqrt_price_x96 = *sqrt_price_x96;
                p.liquidity = *liquidity;
                p.tick = *tick;
                let (d0, d1) = (p.pair.token0().decimals, p.pair.token1().decimals);
                let (p01, p10) = sqrt_spot_prices(*sqrt_price_x96, d0, d1);
                p.spot_price_0_to_1 = p01;
                p.spot_price_1_to_0 = p10;
                Ok(())
            }
            // Liquidity changes need a contract refresh to re-window ticks;
            // acknowledged without touching state.
            PoolEventKind::V3Mint { .. } | PoolEventKind::V3Burn { .. } => Ok(()),
            other => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v3",
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
        let p = self.as_v3(pool)?;
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
        let p = self.as_v3(pool)?;
        if amount_in.is_zero() {
            return Err(EngineError::InvalidAmount);
        }
        let (token_in, token_out, spot, d_in, d_out) = if zero_for_one {
            (
                p.pair.token0().address,
                p.pair.token1().address,
                p.spot_price_0_to_1,
                p.pair.token0().decimals,
                p.pair.token1().decimals,
            )
        } else {
            (
                p.pair.token1().address,
                p.pair.token0().address,
                p.spot_price_1_to_0,
                p.pair.token1().decimals,
                p.pair.token0().decimals,
            )
        };

        // The quoter runs real pool code, so it is exact; the library
        // simulation is the fallback when the quoter call fails.
        let quoter_data = quote_call_data(token_in, token_out, p.fee_ppm, amount_in);
        match self.ctx.rpc.call(self.quoter, quoter_data).await {
            Ok(out) if out.len() >= 32 => {
                let amount_out = abi::decode_u256(&out, 0)?;
                Ok(quote_from_execution(
                    amount_in, amount_out, spot, d_in, d_out, QUOTER_CONFIDENCE,
                ))
            }
            Ok(_) | Err(_) => {
                debug!(
                    "[UniswapV3] quoter unavailable for {:#x}, using library simulation",
                    p.address
                );
                let amount_out = self.simulate(pool, amount_in, zero_for_one)?;
                Ok(quote_from_execution(
                    amount_in,
                    amount_out,
                    spot,
                    d_in,
                    d_out,
                    SIMULATED_CONFIDENCE,
                ))
            }
        }
    }

    fn fee_percent(&self, pool: &VenueState) -> f64 {
        match self.as_v3(pool) {
            Ok(p) => p.fee_ppm as f64 / 1_000_000.0 * 100.0,
            Err(_) => 0.0,
        }
    }
}

fn quote_call_data(token_in: Address, token_out: Address, fee_ppm: u32, amount_in: U256) -> Bytes {
    abi::call_data_with_args(
        QUOTE_EXACT_INPUT_SINGLE,
        &[
            AbiToken::Address(token_in),
            AbiToken::Address(token_out),
            AbiToken::Uint(U256::from(fee_ppm)),
            AbiToken::Uint(amount_in),
            AbiToken::Uint(U256::zero()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multicall::Multicall;
    use crate::rpc::{ChainRpc, RateLimitConfig};
    use crate::token_registry::TokenRegistry;
    use crate::types::Token;
    use ethers::providers::{MockProvider, Provider};
    use std::sync::Arc;

    fn test_adapter() -> (UniswapV3Adapter<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        let rpc = Arc::new(ChainRpc::new(
            Arc::new(provider),
            1,
            RateLimitConfig {
                requests_per_second: 10_000,
                ..Default::default()
            },
        ));
        let multicall = Arc::new(Multicall::new(Arc::clone(&rpc), Address::from([0xcc; 20]), 500));
        let tokens = Arc::new(TokenRegistry::new(1, Arc::clone(&multicall), vec![], None));
        let ctx = AdapterContext {
            chain_id: 1,
            rpc,
            multicall,
            tokens,
            cache: None,
        };
        (
            UniswapV3Adapter::new(
                ctx,
                "uniswap-v3",
                Address::from([0xfa; 20]),
                Address::from([0xfb; 20]),
                Address::from([0xfc; 20]),
                None,
            ),
            mock,
        )
    }

    fn token(byte: u8, symbol: &str, decimals: u8) -> Token {
        Token {
            chain_id: 1,
            address: Address::from([byte; 20]),
            symbol: symbol.into(),
            name: symbol.into(),
            decimals,
            trusted: true,
        }
    }

    fn seeded_pool(adapter: &UniswapV3Adapter<Provider<MockProvider>>) -> VenueState {
        let pair = TokenPairOnChain::new(token(0x01, "WETH", 18), token(0x02, "USDC", 18));
        VenueState::DexV3(adapter.make_state(
            Address::from([0x99; 20]),
            pair,
            3000,
            60,
            amm_math::Q96,
            0,
            10u128.pow(18),
        ))
    }

    fn meta(block: u64) -> crate::types::EventMetadata {
        crate::types::EventMetadata {
            block_number: block,
            transaction_index: 0,
            log_index: 0,
            transaction_hash: Default::default(),
            block_received_timestamp: 0,
        }
    }

    #[test]
    fn swap_event_moves_price_and_tick() {
        let (adapter, _mock) = test_adapter();
        let mut pool = seeded_pool(&adapter);
        // Sqrt price up 1% -> spot up ~2.01%.
        let new_sqrt = amm_math::Q96 * U256::from(101u64) / U256::from(100u64);
        let event = PoolEvent {
            pool_id: pool.id().clone(),
            chain_id: 1,
            address: Address::from([0x99; 20]),
            meta: meta(10),
            kind: PoolEventKind::V3Swap {
                sqrt_price_x96: new_sqrt,
                liquidity: 2 * 10u128.pow(18),
                tick: 199,
            },
        };
        adapter.apply_event(&mut pool, &event).unwrap();
        match &pool {
            VenueState::DexV3(p) => {
                assert_eq!(p.tick, 199);
                assert_eq!(p.liquidity, 2 * 10u128.pow(18));
                assert!((p.spot_price_0_to_1 - 1.0201).abs() < 1e-4);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn mint_and_burn_are_acknowledged_without_state_change() {
        let (adapter, _mock) = test_adapter();
        let mut pool = seeded_pool(&adapter);
        let before = pool.clone();
        let event = PoolEvent {
            pool_id: pool.id().clone(),
            chain_id: 1,
            address: Address::from([0x99; 20]),
            meta: meta(11),
            kind: PoolEventKind::V3Mint {
                tick_lower: -60,
                tick_upper: 60,
                amount: 1000,
            },
        };
        adapter.apply_event(&mut pool, &event).unwrap();
        assert_eq!(pool, before);
    }

    #[test]
    fn tick_window_is_aligned_and_bounded() {
        let window = UniswapV3Adapter::<Provider<MockProvider>>::tick_window(100, 60);
        assert_eq!(window.len(), 500);
        assert!(window.windows(2).all(|w| w[1] - w[0] == 60));
        assert!(window.iter().all(|t| t % 60 == 0));
        // Extreme tick clips against the representable range.
        let clipped =
            UniswapV3Adapter::<Provider<MockProvider>>::tick_window(amm_math::MAX_TICK - 10, 60);
        assert!(clipped.len() < 500);
        assert!(clipped.iter().all(|t| *t <= amm_math::MAX_TICK));
    }

    #[test]
    fn simulate_uses_multi_tick_walker() {
        let (adapter, _mock) = test_adapter();
        let pool = seeded_pool(&adapter);
        let amount_in = U256::from(10u64).pow(15u8.into());
        let out = adapter.simulate(&pool, amount_in, true).unwrap();
        assert!(out > U256::zero());
        assert!(out < amount_in);
    }

    #[test]
    fn fee_percent_is_ppm_based() {
        let (adapter, _mock) = test_adapter();
        let pool = seeded_pool(&adapter);
        assert!((adapter.fee_percent(&pool) - 0.3).abs() < 1e-12);
    }
}

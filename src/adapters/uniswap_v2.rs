//! Constant-product (V2 family) adapter.

use crate::abi::{self, sel};
use crate::dex_adapter::{quote_from_execution, AdapterContext, DexAdapter};
use crate::errors::EngineError;
use crate::types::{
    DexProtocol, DexV2PoolState, PoolEvent, PoolEventKind, TokenPairOnChain, TradeQuote, VenueId,
    VenueState, VenueStateId,
};
use async_trait::async_trait;
use ethers::middleware::Middleware;
use ethers::types::{Address, H256, U256};
use tracing::debug;

use super::{cached_address_call, v2_spot_prices};

/// Fixed V2 fee: 30 parts per 10 000.
pub const V2_FEE_BPS: u32 = 30;
const FEE_DENOMINATOR_BPS: u32 = 10_000;

const QUOTE_CONFIDENCE: f64 = 0.95;

pub struct UniswapV2Adapter<M> {
    ctx: AdapterContext<M>,
    venue: VenueId,
    factory: Address,
    #[allow(dead_code)]
    router: Address,
    #[allow(dead_code)]
    init_code_hash: Option<H256>,
}

impl<M: Middleware + 'static> UniswapV2Adapter<M> {
    pub fn new(
        ctx: AdapterContext<M>,
        venue_name: &str,
        factory: Address,
        router: Address,
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
            init_code_hash,
        }
    }

    fn make_state(
        &self,
        address: Address,
        pair: TokenPairOnChain,
        reserve0: u128,
        reserve1: u128,
    ) -> DexV2PoolState {
        let (d0, d1) = (pair.token0().decimals, pair.token1().decimals);
        let (p01, p10) = v2_spot_prices(reserve0, reserve1, d0, d1);
        DexV2PoolState {
            id: VenueStateId::dex(self.ctx.chain_id, address),
            venue: self.venue.clone(),
            pair,
            address,
            reserve0,
            reserve1,
            fee_bps: V2_FEE_BPS,
            spot_price_0_to_1: p01,
            spot_price_1_to_0: p10,
            latest_event_meta: None,
            total_liquidity_in_usd: 0.0,
            disabled: false,
        }
    }

    async fn resolve_pair(&self, pool: Address) -> Result<TokenPairOnChain, EngineError> {
        let t0 = cached_address_call(&self.ctx, pool, "token0", abi::call_data(sel::TOKEN0))
            .await
            .map_err(|_| EngineError::UnknownPool(VenueStateId::dex(self.ctx.chain_id, pool)))?;
        let t1 = cached_address_call(&self.ctx, pool, "token1", abi::call_data(sel::TOKEN1))
            .await
            .map_err(|_| EngineError::UnknownPool(VenueStateId::dex(self.ctx.chain_id, pool)))?;
        let token0 = self.ctx.tokens.ensure_registered(t0).await?;
        let token1 = self.ctx.tokens.ensure_registered(t1).await?;
        Ok(TokenPairOnChain::new(
            token0.as_ref().clone(),
            token1.as_ref().clone(),
        ))
    }

    fn as_v2<'a>(&self, pool: &'a VenueState) -> Result<&'a DexV2PoolState, EngineError> {
        match pool {
            VenueState::DexV2(p) => Ok(p),
            _ => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v2",
                event: "foreign-state",
            }),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> DexAdapter<M> for UniswapV2Adapter<M> {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn protocol(&self) -> DexProtocol {
        DexProtocol::V2
    }

    async fn discover(&self, pair: &TokenPairOnChain) -> Result<Vec<VenueState>, EngineError> {
        let data = abi::get_pair_call(pair.token0().address, pair.token1().address);
        let out = self.ctx.rpc.call(self.factory, data).await?;
        if abi::is_zero_address_word(&out) {
            return Ok(Vec::new());
        }
        let pool_address = abi::decode_address(&out, 0)?;
        debug!(
            "[UniswapV2] 🔍 {} pool for {}: {:#x}",
            self.venue.name(),
            pair.symbol_key(),
            pool_address
        );
        Ok(vec![VenueState::DexV2(self.make_state(
            pool_address,
            pair.clone(),
            0,
            0,
        ))])
    }

    async fn introspect_from_event(&self, event: &PoolEvent) -> Result<VenueState, EngineError> {
        let (reserve0, reserve1) = match &event.kind {
            PoolEventKind::V2Sync { reserve0, reserve1 } => (*reserve0, *reserve1),
            other => {
                return Err(EngineError::EventKindMismatch {
                    adapter: "uniswap-v2",
                    event: other.name(),
                })
            }
        };
        let pair = self.resolve_pair(event.address).await?;
        let mut state = self.make_state(event.address, pair, reserve0, reserve1);
        state.latest_event_meta = Some(event.meta.clone());
        Ok(VenueState::DexV2(state))
    }

    async fn init_from_address(&self, address: Address) -> Result<VenueState, EngineError> {
        let pair = self.resolve_pair(address).await?;
        Ok(VenueState::DexV2(self.make_state(address, pair, 0, 0)))
    }

    async fn refresh(&self, pool: &mut VenueState) -> Result<(), EngineError> {
        let address = self.as_v2(pool)?.address;
        let out = self
            .ctx
            .rpc
            .call(address, abi::call_data(sel::GET_RESERVES))
            .await?;
        let (reserve0, reserve1) = abi::decode_reserves(&out)?;
        if let VenueState::DexV2(p) = pool {
            p.reserve0 = reserve0;
            p.reserve1 = reserve1;
            let (d0, d1) = (p.pair.token0().decimals, p.pair.token1().decimals);
            let (p01, p10) = v2_spot_prices(reserve0, reserve1, d0, d1);
            p.spot_price_0_to_1 = p01;
            p.spot_price_1_to_0 = p10;
        }
        Ok(())
    }

    fn apply_event(&self, pool: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        let p = match pool {
            VenueState::DexV2(p) => p,
            _ => {
                return Err(EngineError::EventKindMismatch {
                    adapter: "uniswap-v2",
                    event: event.kind.name(),
                })
            }
        };
        match &event.kind {
            PoolEventKind::V2Sync { reserve0, reserve1 } => {
                p.reserve0 = *reserve0;
                p.reserve1 = *reserve1;
                let (d0, d1) = (p.pair.token0().decimals, p.pair.token1().decimals);
                let (p01, p10) = v2_spot_prices(*reserve0, *reserve1, d0, d1);
                p.spot_price_0_to_1 = p01;
                p.spot_price_1_to_0 = p10;
                Ok(())
            }
            other => Err(EngineError::EventKindMismatch {
                adapter: "uniswap-v2",
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
        let p = self.as_v2(pool)?;
        if amount_in.is_zero() {
            return Err(EngineError::InvalidAmount);
        }
        let (reserve_in, reserve_out) = if zero_for_one {
            (U256::from(p.reserve0), U256::from(p.reserve1))
        } else {
            (U256::from(p.reserve1), U256::from(p.reserve0))
        };
        if reserve_in.is_zero() || reserve_out.is_zero() || amount_in > reserve_in {
            return Err(EngineError::InsufficientLiquidity);
        }
        let amount_in_with_fee =
            amount_in * U256::from(FEE_DENOMINATOR_BPS - V2_FEE_BPS) / U256::from(FEE_DENOMINATOR_BPS);
        let out = amount_in_with_fee
            .full_mul(reserve_out)
            .checked_div((reserve_in + amount_in_with_fee).into())
            .and_then(|q| q.try_into().ok())
            .ok_or(EngineError::InsufficientLiquidity)?;
        Ok(out)
    }

    async fn quote(
        &self,
        pool: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError> {
        let p = self.as_v2(pool)?;
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
        Ok(quote_from_execution(
            amount_in,
            amount_out,
            spot,
            d_in,
            d_out,
            QUOTE_CONFIDENCE,
        ))
    }

    fn fee_percent(&self, _pool: &VenueState) -> f64 {
        V2_FEE_BPS as f64 / FEE_DENOMINATOR_BPS as f64 * 100.0
    }
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

    fn test_ctx() -> (AdapterContext<Provider<MockProvider>>, MockProvider) {
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
        (
            AdapterContext {
                chain_id: 1,
                rpc,
                multicall,
                tokens,
                cache: None,
            },
            mock,
        )
    }

    fn adapter() -> UniswapV2Adapter<Provider<MockProvider>> {
        let (ctx, _mock) = test_ctx();
        UniswapV2Adapter::new(
            ctx,
            "uniswap-v2",
            Address::from([0xfa; 20]),
            Address::from([0xfb; 20]),
            None,
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

    fn seeded_pool(adapter: &UniswapV2Adapter<Provider<MockProvider>>) -> VenueState {
        let pair = TokenPairOnChain::new(token(0x01, "WETH", 18), token(0x02, "USDC", 18));
        VenueState::DexV2(adapter.make_state(
            Address::from([0x99; 20]),
            pair,
            10u128.pow(20),
            2 * 10u128.pow(23),
        ))
    }

    #[test]
    fn simulate_constant_product_with_fee() {
        let adapter = adapter();
        let pool = seeded_pool(&adapter);
        let amount_in = U256::from(10u64).pow(18u8.into());
        let out = adapter.simulate(&pool, amount_in, true).unwrap();
        // ~2000 out per 1 in, shaved by the 30 bps fee and the curve.
        let expected = 2000.0 * 0.997;
        let got = crate::types::conversions::u256_to_f64_lossy(out) / 1e18;
        assert!((got - expected).abs() / expected < 0.02, "got {}", got);
    }

    #[test]
    fn simulate_rejects_bad_amounts() {
        let adapter = adapter();
        let pool = seeded_pool(&adapter);
        assert_eq!(
            adapter.simulate(&pool, U256::zero(), true),
            Err(EngineError::InvalidAmount)
        );
        // amount_in > reserve_in
        let too_big = U256::from(10u64).pow(21u8.into());
        assert_eq!(
            adapter.simulate(&pool, too_big, true),
            Err(EngineError::InsufficientLiquidity)
        );
        // Drained reserve.
        let empty_pair = TokenPairOnChain::new(token(0x01, "A", 18), token(0x02, "B", 18));
        let empty = VenueState::DexV2(adapter.make_state(
            Address::from([0x98; 20]),
            empty_pair,
            0,
            0,
        ));
        assert_eq!(
            adapter.simulate(&empty, U256::one(), true),
            Err(EngineError::InsufficientLiquidity)
        );
    }

    #[test]
    fn apply_event_rejects_foreign_kinds() {
        let adapter = adapter();
        let mut pool = seeded_pool(&adapter);
        let event = PoolEvent {
            pool_id: pool.id().clone(),
            chain_id: 1,
            address: Address::from([0x99; 20]),
            meta: crate::types::EventMetadata {
                block_number: 1,
                transaction_index: 0,
                log_index: 0,
                transaction_hash: Default::default(),
                block_received_timestamp: 0,
            },
            kind: PoolEventKind::V3Swap {
                sqrt_price_x96: U256::one(),
                liquidity: 1,
                tick: 0,
            },
        };
        assert!(matches!(
            adapter.apply_event(&mut pool, &event),
            Err(EngineError::EventKindMismatch { .. })
        ));
    }

    #[test]
    fn sync_event_updates_reserves_and_spot() {
        let adapter = adapter();
        let mut pool = seeded_pool(&adapter);
        let event = PoolEvent {
            pool_id: pool.id().clone(),
            chain_id: 1,
            address: Address::from([0x99; 20]),
            meta: crate::types::EventMetadata {
                block_number: 100,
                transaction_index: 0,
                log_index: 0,
                transaction_hash: Default::default(),
                block_received_timestamp: 0,
            },
            kind: PoolEventKind::V2Sync {
                reserve0: 101 * 10u128.pow(18),
                reserve1: 198 * 10u128.pow(21),
            },
        };
        adapter.apply_event(&mut pool, &event).unwrap();
        match &pool {
            VenueState::DexV2(p) => {
                assert_eq!(p.reserve0, 101 * 10u128.pow(18));
                assert!((p.spot_price_0_to_1 - 1960.396).abs() < 0.01);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn fee_is_thirty_bps() {
        let adapter = adapter();
        let pool = seeded_pool(&adapter);
        assert!((adapter.fee_percent(&pool) - 0.3).abs() < 1e-12);
    }
}

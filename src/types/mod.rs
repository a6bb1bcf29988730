//! Core data model shared by watchers, the aggregator and the oracle.
//!
//! Everything in here is a plain value type: states cross thread boundaries
//! as structural copies over the bus, so no variant holds a handle, a
//! back-pointer or a lock. Pools refer to tokens by embedded value and to
//! venues by [`VenueId`]; registries own the authoritative instances.

pub mod conversions;

use crate::types::conversions::{serde_i128_dec, serde_u128_dec, serde_u256_dec};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical token identity on one chain.
///
/// The address is the only primary key; `symbol` is advisory and may collide.
/// A token is created at registration time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Seeded from the configured trusted list; introspected tokens are untrusted.
    pub trusted: bool,
}

impl Token {
    /// `"chainId:0x..."`, the key shape the oracle and token indices use.
    pub fn chain_key(&self) -> String {
        format!("{}:{:#x}", self.chain_id, self.address)
    }
}

/// Closed protocol tag for DEX adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DexProtocol {
    V2,
    V3,
    V4,
}

impl fmt::Display for DexProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexProtocol::V2 => write!(f, "v2"),
            DexProtocol::V3 => write!(f, "v3"),
            DexProtocol::V4 => write!(f, "v4"),
        }
    }
}

/// A place where a pair trades: a DEX on a specific chain or a centralised
/// exchange. Names come from the closed set fixed in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VenueId {
    Dex { name: String, chain_id: u64 },
    Cex { name: String },
}

impl VenueId {
    pub fn name(&self) -> &str {
        match self {
            VenueId::Dex { name, .. } => name,
            VenueId::Cex { name } => name,
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            VenueId::Dex { chain_id, .. } => Some(*chain_id),
            VenueId::Cex { .. } => None,
        }
    }
}

/// Canonical symbol-pair key: symbols sorted alphabetically, joined with `:`.
/// Grouping only; never an input to trading-path math.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId(pub String);

impl PairId {
    pub fn new(symbol_a: &str, symbol_b: &str) -> Self {
        let (lo, hi) = if symbol_a <= symbol_b {
            (symbol_a, symbol_b)
        } else {
            (symbol_b, symbol_a)
        };
        PairId(format!("{}:{}", lo, hi))
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered on-chain token pair. `token0.address < token1.address`
/// byte-lexicographically, always. This is the order AMM math runs in and it
/// must never be flipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPairOnChain {
    token0: Token,
    token1: Token,
}

impl TokenPairOnChain {
    /// Builds the pair in canonical on-chain order regardless of argument order.
    pub fn new(a: Token, b: Token) -> Self {
        if a.address.as_bytes() <= b.address.as_bytes() {
            Self { token0: a, token1: b }
        } else {
            Self { token0: b, token1: a }
        }
    }

    pub fn token0(&self) -> &Token {
        &self.token0
    }

    pub fn token1(&self) -> &Token {
        &self.token1
    }

    /// Advisory display key, `"sym0-sym1"` in on-chain order.
    pub fn symbol_key(&self) -> String {
        format!("{}-{}", self.token0.symbol, self.token1.symbol)
    }

    /// Canonical sorted-address key used by the aggregator's pair index.
    pub fn address_key(&self) -> String {
        format!("{:#x}-{:#x}", self.token0.address, self.token1.address)
    }

    pub fn pair_id(&self) -> PairId {
        PairId::new(&self.token0.symbol, &self.token1.symbol)
    }
}

/// Position of an event in the chain's total order.
///
/// `(block_number, transaction_index, log_index)` is the lexicographic
/// ordinal; hash and receipt timestamp ride along for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub transaction_hash: H256,
    /// Unix millis at which the enclosing block notification arrived.
    pub block_received_timestamp: u64,
}

impl EventMetadata {
    pub fn ordinal(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }

    /// Strictly newer under the lexicographic order.
    pub fn is_newer_than(&self, other: &EventMetadata) -> bool {
        self.ordinal() > other.ordinal()
    }
}

/// Globally unique venue-state identity.
///
/// `"<chainId>:<poolAddress>"` for DEX pools, `"<exchange>:<rawSymbol>"` for
/// CEX markets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueStateId(pub String);

impl VenueStateId {
    pub fn dex(chain_id: u64, pool_address: Address) -> Self {
        VenueStateId(format!("{}:{:#x}", chain_id, pool_address))
    }

    pub fn cex(exchange: &str, raw_symbol: &str) -> Self {
        VenueStateId(format!("{}:{}", exchange, raw_symbol))
    }
}

impl fmt::Display for VenueStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One initialised tick boundary of a concentrated-liquidity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEntry {
    pub tick: i32,
    /// Signed change in active liquidity when crossing this tick upward.
    #[serde(with = "serde_i128_dec")]
    pub liquidity_net: i128,
}

/// Constant-product pool (V2 family). Reserves are 112-bit on chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexV2PoolState {
    pub id: VenueStateId,
    pub venue: VenueId,
    pub pair: TokenPairOnChain,
    pub address: Address,
    #[serde(with = "serde_u128_dec")]
    pub reserve0: u128,
    #[serde(with = "serde_u128_dec")]
    pub reserve1: u128,
    /// Parts per 10 000. Fixed at 30 for the V2 family.
    pub fee_bps: u32,
    pub spot_price_0_to_1: f64,
    pub spot_price_1_to_0: f64,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_in_usd: f64,
    #[serde(default)]
    pub disabled: bool,
}

/// Concentrated-liquidity pool (V3 family).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexV3PoolState {
    pub id: VenueStateId,
    pub venue: VenueId,
    pub pair: TokenPairOnChain,
    pub address: Address,
    #[serde(with = "serde_u256_dec")]
    pub sqrt_price_x96: U256,
    pub tick: i32,
    #[serde(with = "serde_u128_dec")]
    pub liquidity: u128,
    pub tick_spacing: i32,
    /// Parts per million in swap math (100 / 500 / 3000 / 10000 on chain).
    pub fee_ppm: u32,
    /// Strictly sorted by tick, no duplicates.
    pub ticks: Vec<TickEntry>,
    pub spot_price_0_to_1: f64,
    pub spot_price_1_to_0: f64,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_in_usd: f64,
    #[serde(default)]
    pub disabled: bool,
}

/// Singleton-manager pool (V4 family): V3 semantics plus a 32-byte pool key,
/// optional hooks and the shared manager address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexV4PoolState {
    pub id: VenueStateId,
    pub venue: VenueId,
    pub pair: TokenPairOnChain,
    pub pool_key: [u8; 32],
    pub manager: Address,
    pub hooks: Option<Address>,
    #[serde(with = "serde_u256_dec")]
    pub sqrt_price_x96: U256,
    pub tick: i32,
    #[serde(with = "serde_u128_dec")]
    pub liquidity: u128,
    pub tick_spacing: i32,
    pub fee_ppm: u32,
    pub ticks: Vec<TickEntry>,
    pub spot_price_0_to_1: f64,
    pub spot_price_1_to_0: f64,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_in_usd: f64,
    #[serde(default)]
    pub disabled: bool,
}

/// Centralised-exchange market snapshot. Ingestion lives outside the engine;
/// this is the interface shape the aggregator indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CexMarketState {
    pub id: VenueStateId,
    pub venue: VenueId,
    pub pair_id: PairId,
    pub raw_symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    /// `(price, size)` ladders, best level first.
    pub bid_depth: Option<Vec<(f64, f64)>>,
    pub ask_depth: Option<Vec<(f64, f64)>>,
    pub latest_event_meta: Option<EventMetadata>,
    pub total_liquidity_in_usd: f64,
    #[serde(default)]
    pub disabled: bool,
}

/// Discriminated union over everything the aggregator stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VenueState {
    DexV2(DexV2PoolState),
    DexV3(DexV3PoolState),
    DexV4(DexV4PoolState),
    CexMarket(CexMarketState),
}

impl VenueState {
    pub fn id(&self) -> &VenueStateId {
        match self {
            VenueState::DexV2(p) => &p.id,
            VenueState::DexV3(p) => &p.id,
            VenueState::DexV4(p) => &p.id,
            VenueState::CexMarket(m) => &m.id,
        }
    }

    pub fn venue(&self) -> &VenueId {
        match self {
            VenueState::DexV2(p) => &p.venue,
            VenueState::DexV3(p) => &p.venue,
            VenueState::DexV4(p) => &p.venue,
            VenueState::CexMarket(m) => &m.venue,
        }
    }

    pub fn pair_id(&self) -> PairId {
        match self {
            VenueState::DexV2(p) => p.pair.pair_id(),
            VenueState::DexV3(p) => p.pair.pair_id(),
            VenueState::DexV4(p) => p.pair.pair_id(),
            VenueState::CexMarket(m) => m.pair_id.clone(),
        }
    }

    pub fn token_pair(&self) -> Option<&TokenPairOnChain> {
        match self {
            VenueState::DexV2(p) => Some(&p.pair),
            VenueState::DexV3(p) => Some(&p.pair),
            VenueState::DexV4(p) => Some(&p.pair),
            VenueState::CexMarket(_) => None,
        }
    }

    pub fn protocol(&self) -> Option<DexProtocol> {
        match self {
            VenueState::DexV2(_) => Some(DexProtocol::V2),
            VenueState::DexV3(_) => Some(DexProtocol::V3),
            VenueState::DexV4(_) => Some(DexProtocol::V4),
            VenueState::CexMarket(_) => None,
        }
    }

    pub fn latest_event_meta(&self) -> Option<&EventMetadata> {
        match self {
            VenueState::DexV2(p) => p.latest_event_meta.as_ref(),
            VenueState::DexV3(p) => p.latest_event_meta.as_ref(),
            VenueState::DexV4(p) => p.latest_event_meta.as_ref(),
            VenueState::CexMarket(m) => m.latest_event_meta.as_ref(),
        }
    }

    pub fn set_latest_event_meta(&mut self, meta: EventMetadata) {
        match self {
            VenueState::DexV2(p) => p.latest_event_meta = Some(meta),
            VenueState::DexV3(p) => p.latest_event_meta = Some(meta),
            VenueState::DexV4(p) => p.latest_event_meta = Some(meta),
            VenueState::CexMarket(m) => m.latest_event_meta = Some(meta),
        }
    }

    pub fn disabled(&self) -> bool {
        match self {
            VenueState::DexV2(p) => p.disabled,
            VenueState::DexV3(p) => p.disabled,
            VenueState::DexV4(p) => p.disabled,
            VenueState::CexMarket(m) => m.disabled,
        }
    }

    pub fn set_disabled(&mut self, flag: bool) {
        match self {
            VenueState::DexV2(p) => p.disabled = flag,
            VenueState::DexV3(p) => p.disabled = flag,
            VenueState::DexV4(p) => p.disabled = flag,
            VenueState::CexMarket(m) => m.disabled = flag,
        }
    }

    pub fn total_liquidity_in_usd(&self) -> f64 {
        match self {
            VenueState::DexV2(p) => p.total_liquidity_in_usd,
            VenueState::DexV3(p) => p.total_liquidity_in_usd,
            VenueState::DexV4(p) => p.total_liquidity_in_usd,
            VenueState::CexMarket(m) => m.total_liquidity_in_usd,
        }
    }

    pub fn set_total_liquidity_in_usd(&mut self, usd: f64) {
        match self {
            VenueState::DexV2(p) => p.total_liquidity_in_usd = usd,
            VenueState::DexV3(p) => p.total_liquidity_in_usd = usd,
            VenueState::DexV4(p) => p.total_liquidity_in_usd = usd,
            VenueState::CexMarket(m) => m.total_liquidity_in_usd = usd,
        }
    }

    pub fn spot_price_0_to_1(&self) -> Option<f64> {
        match self {
            VenueState::DexV2(p) => Some(p.spot_price_0_to_1),
            VenueState::DexV3(p) => Some(p.spot_price_0_to_1),
            VenueState::DexV4(p) => Some(p.spot_price_0_to_1),
            VenueState::CexMarket(_) => None,
        }
    }

    pub fn spot_price_1_to_0(&self) -> Option<f64> {
        match self {
            VenueState::DexV2(p) => Some(p.spot_price_1_to_0),
            VenueState::DexV3(p) => Some(p.spot_price_1_to_0),
            VenueState::DexV4(p) => Some(p.spot_price_1_to_0),
            VenueState::CexMarket(_) => None,
        }
    }
}

/// Typed pool event, one variant per subscribed topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolEventKind {
    V2Sync {
        #[serde(with = "serde_u128_dec")]
        reserve0: u128,
        #[serde(with = "serde_u128_dec")]
        reserve1: u128,
    },
    V3Swap {
        #[serde(with = "serde_u256_dec")]
        sqrt_price_x96: U256,
        #[serde(with = "serde_u128_dec")]
        liquidity: u128,
        tick: i32,
    },
    /// Decoded and acknowledged; not applied to state.
    V3Mint {
        tick_lower: i32,
        tick_upper: i32,
        #[serde(with = "serde_u128_dec")]
        amount: u128,
    },
    /// Decoded and acknowledged; not applied to state.
    V3Burn {
        tick_lower: i32,
        tick_upper: i32,
        #[serde(with = "serde_u128_dec")]
        amount: u128,
    },
    V4Swap {
        pool_key: [u8; 32],
        #[serde(with = "serde_u256_dec")]
        sqrt_price_x96: U256,
        #[serde(with = "serde_u128_dec")]
        liquidity: u128,
        tick: i32,
        fee_ppm: u32,
    },
    /// Decoded and acknowledged; not applied to state.
    V4ModifyLiquidity {
        pool_key: [u8; 32],
        tick_lower: i32,
        tick_upper: i32,
        #[serde(with = "serde_i128_dec")]
        liquidity_delta: i128,
    },
}

impl PoolEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolEventKind::V2Sync { .. } => "v2-sync",
            PoolEventKind::V3Swap { .. } => "v3-swap",
            PoolEventKind::V3Mint { .. } => "v3-mint",
            PoolEventKind::V3Burn { .. } => "v3-burn",
            PoolEventKind::V4Swap { .. } => "v4-swap",
            PoolEventKind::V4ModifyLiquidity { .. } => "v4-modify-liquidity",
        }
    }

    /// Protocol family this event belongs to.
    pub fn protocol(&self) -> DexProtocol {
        match self {
            PoolEventKind::V2Sync { .. } => DexProtocol::V2,
            PoolEventKind::V3Swap { .. }
            | PoolEventKind::V3Mint { .. }
            | PoolEventKind::V3Burn { .. } => DexProtocol::V3,
            PoolEventKind::V4Swap { .. } | PoolEventKind::V4ModifyLiquidity { .. } => {
                DexProtocol::V4
            }
        }
    }
}

/// A decoded on-chain event addressed to one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub pool_id: VenueStateId,
    pub chain_id: u64,
    /// Emitting contract: the pool itself for V2/V3, the manager for V4.
    pub address: Address,
    pub meta: EventMetadata,
    pub kind: PoolEventKind,
}

/// Result of a quote/simulation against a single pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeQuote {
    #[serde(with = "serde_u256_dec")]
    pub amount_out: U256,
    /// Output per input unit, decimal-adjusted.
    pub execution_price: f64,
    pub price_impact_pct: f64,
    pub slippage_bps: f64,
    /// 0.0–1.0; degraded for hooked V4 pools and tickless V3 estimates.
    pub confidence: f64,
}

/// Block head data broadcast to bus consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockData {
    pub number: u64,
    pub chain_id: u64,
    /// Unix millis at which the notification arrived.
    pub received_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(chain_id: u64, addr_byte: u8, symbol: &str, decimals: u8) -> Token {
        Token {
            chain_id,
            address: Address::from([addr_byte; 20]),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals,
            trusted: true,
        }
    }

    #[test]
    fn token_pair_orders_by_address_bytes() {
        let weth = token(1, 0xaa, "WETH", 18);
        let usdc = token(1, 0x11, "USDC", 6);
        let pair = TokenPairOnChain::new(weth.clone(), usdc.clone());
        assert_eq!(pair.token0().symbol, "USDC");
        assert_eq!(pair.token1().symbol, "WETH");
        // Same pair whichever way the constructor receives them.
        let flipped = TokenPairOnChain::new(usdc, weth);
        assert_eq!(pair, flipped);
        assert!(pair.token0().address.as_bytes() < pair.token1().address.as_bytes());
    }

    #[test]
    fn pair_id_sorts_symbols() {
        assert_eq!(PairId::new("WETH", "USDC").0, "USDC:WETH");
        assert_eq!(PairId::new("USDC", "WETH").0, "USDC:WETH");
    }

    #[test]
    fn event_metadata_lexicographic_order() {
        let base = EventMetadata {
            block_number: 100,
            transaction_index: 2,
            log_index: 5,
            transaction_hash: H256::zero(),
            block_received_timestamp: 0,
        };
        let same_block_later_log = EventMetadata {
            log_index: 6,
            ..base.clone()
        };
        let earlier_block_bigger_indices = EventMetadata {
            block_number: 99,
            transaction_index: 50,
            log_index: 50,
            ..base.clone()
        };
        assert!(same_block_later_log.is_newer_than(&base));
        assert!(!earlier_block_bigger_indices.is_newer_than(&base));
        assert!(!base.is_newer_than(&base));
    }

    #[test]
    fn venue_state_id_formats() {
        let id = VenueStateId::dex(42161, Address::from([0xab; 20]));
        assert_eq!(
            id.0,
            "42161:0xabababababababababababababababababababab"
        );
        assert_eq!(VenueStateId::cex("binance", "ETHUSDT").0, "binance:ETHUSDT");
    }

    #[test]
    fn pool_event_wire_round_trip() {
        let ev = PoolEvent {
            pool_id: VenueStateId::dex(1, Address::from([1u8; 20])),
            chain_id: 1,
            address: Address::from([1u8; 20]),
            meta: EventMetadata {
                block_number: 7,
                transaction_index: 0,
                log_index: 3,
                transaction_hash: H256::from([9u8; 32]),
                block_received_timestamp: 1_700_000_000_000,
            },
            kind: PoolEventKind::V3Swap {
                sqrt_price_x96: U256::from_dec_str("79228162514264337593543950336").unwrap(),
                liquidity: u128::MAX,
                tick: -887272,
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        // Big integers must cross as decimal strings.
        assert!(json.contains("\"79228162514264337593543950336\""));
        assert!(json.contains("\"340282366920938463463374607431768211455\""));
        let back: PoolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}

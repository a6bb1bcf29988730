//! Aggregator-unit flow: watcher batches land in the store, drive the
//! oracle through change notifications, and fan out to broadcast
//! subscribers.

use ethers::types::Address;
use poolwatch::bus::{events, BusEvent, MessageBus, WorkerOutbound};
use poolwatch::engine::{AggregatorExit, AggregatorUnit};
use poolwatch::types::{
    DexV2PoolState, Token, TokenPairOnChain, VenueId, VenueState, VenueStateId,
};
use poolwatch::watcher::PoolUpdateBatch;
use serde_json::Value;
use std::sync::Arc;

const CHAIN: u64 = 1;
const USDC: [u8; 20] = [0x02; 20];
const WETH: [u8; 20] = [0x05; 20];
const DAI: [u8; 20] = [0x07; 20];

fn token(bytes: [u8; 20], symbol: &str) -> Token {
    Token {
        chain_id: CHAIN,
        address: Address::from(bytes),
        symbol: symbol.into(),
        name: symbol.into(),
        decimals: 18,
        trusted: true,
    }
}

fn v2_pool(a: Token, b: Token, addr_byte: u8, venue: &str, p01: f64) -> VenueState {
    let pair = TokenPairOnChain::new(a, b);
    let address = Address::from([addr_byte; 20]);
    VenueState::DexV2(DexV2PoolState {
        id: VenueStateId::dex(CHAIN, address),
        venue: VenueId::Dex {
            name: venue.into(),
            chain_id: CHAIN,
        },
        pair,
        address,
        reserve0: 10u128.pow(18),
        reserve1: (p01 * 1e18) as u128,
        fee_bps: 30,
        spot_price_0_to_1: p01,
        spot_price_1_to_0: 1.0 / p01,
        latest_event_meta: None,
        total_liquidity_in_usd: 0.0,
        disabled: false,
    })
}

fn batch_event(states: Vec<VenueState>) -> WorkerOutbound {
    WorkerOutbound::Event(BusEvent {
        name: events::POOL_UPDATE_BATCH.to_string(),
        data: serde_json::to_value(PoolUpdateBatch {
            block_data: None,
            updated_pool_states: states,
        })
        .unwrap(),
    })
}

#[tokio::test]
async fn batches_index_states_and_flood_prices() {
    let bus = Arc::new(MessageBus::new());
    let (mut aggregator, host_tx) =
        AggregatorUnit::new(Arc::clone(&bus), [(CHAIN, Address::from(USDC))]);
    let mut batches = aggregator.on_pool_events_batch();

    // USDC/WETH pool: token0 = USDC (lower address), 1 USDC = 1/2500 WETH.
    let pool = v2_pool(token(USDC, "USDC"), token(WETH, "WETH"), 0xaa, "uniswap-v2", 1.0 / 2500.0);
    let id = pool.id().clone();
    host_tx.send(("mainnet".into(), batch_event(vec![pool]))).unwrap();
    aggregator.drain_pending();

    // Indexed every way the spec requires.
    let store = aggregator.store();
    assert!(store.get(&id).is_some());
    assert_eq!(store.get_by_chain(CHAIN).len(), 1);
    assert_eq!(store.get_by_venue("uniswap-v2").len(), 1);
    assert_eq!(
        store.get_by_pair(Address::from(WETH), Address::from(USDC)).len(),
        1
    );
    assert_eq!(store.get_by_symbol_pair("WETH", "USDC").len(), 1);
    assert_eq!(
        store
            .get_by_token(&format!("{}:{:#x}", CHAIN, Address::from(WETH)))
            .len(),
        1
    );

    // The change notification drove the oracle: WETH priced off the anchor.
    let oracle = aggregator.oracle();
    let weth_price = oracle
        .lock()
        .unwrap()
        .usd_price(CHAIN, Address::from(WETH))
        .unwrap();
    assert!((weth_price - 2500.0).abs() < 1e-6);

    // Valuation write-back: both sides priced -> ~2 USD of reserves.
    let stored = aggregator.store().get(&id).unwrap();
    assert!((stored.total_liquidity_in_usd() - 2.0).abs() < 1e-6);

    // Broadcast fan-out delivered the same batch.
    let delivered = batches.recv().await.unwrap();
    assert_eq!(delivered.updated_pool_states.len(), 1);
}

#[tokio::test]
async fn second_hop_prices_converge_and_removal_clears_indices() {
    let bus = Arc::new(MessageBus::new());
    let (mut aggregator, host_tx) =
        AggregatorUnit::new(Arc::clone(&bus), [(CHAIN, Address::from(USDC))]);

    let weth_usdc = v2_pool(token(USDC, "USDC"), token(WETH, "WETH"), 0xaa, "uniswap-v2", 1.0 / 2500.0);
    let weth_dai = v2_pool(token(WETH, "WETH"), token(DAI, "DAI"), 0xbb, "uniswap-v3", 2500.0);
    host_tx
        .send(("mainnet".into(), batch_event(vec![weth_usdc, weth_dai])))
        .unwrap();
    aggregator.drain_pending();

    let oracle = aggregator.oracle();
    let dai_price = oracle
        .lock()
        .unwrap()
        .usd_price(CHAIN, Address::from(DAI))
        .unwrap();
    assert!((dai_price - 1.0).abs() < 1e-6);

    // Remove one pool: every index forgets it.
    let id = VenueStateId::dex(CHAIN, Address::from([0xbb; 20]));
    aggregator.store_mut().remove(&id);
    let store = aggregator.store();
    assert!(store.get(&id).is_none());
    assert_eq!(store.get_by_venue("uniswap-v3").len(), 0);
    assert_eq!(store.get_by_symbol_pair("DAI", "WETH").len(), 0);
    assert_eq!(store.get_by_chain(CHAIN).len(), 1);
}

#[tokio::test]
async fn new_block_events_fan_out_to_subscribers() {
    let bus = Arc::new(MessageBus::new());
    let (mut aggregator, host_tx) = AggregatorUnit::new(Arc::clone(&bus), Vec::<(u64, Address)>::new());
    let mut blocks = aggregator.on_new_block();

    host_tx
        .send((
            "mainnet".into(),
            WorkerOutbound::Event(BusEvent {
                name: events::NEW_BLOCK.to_string(),
                data: serde_json::json!({
                    "number": 123, "chainId": CHAIN, "receivedAt": 1_700_000_000_000u64
                }),
            }),
        ))
        .unwrap();
    aggregator.drain_pending();

    let block = blocks.recv().await.unwrap();
    assert_eq!(block.number, 123);
    assert_eq!(block.chain_id, CHAIN);
}

#[tokio::test]
async fn dead_connection_report_stops_the_unit() {
    let bus = Arc::new(MessageBus::new());
    let (mut aggregator, host_tx) = AggregatorUnit::new(Arc::clone(&bus), Vec::<(u64, Address)>::new());
    host_tx
        .send((
            "mainnet".into(),
            WorkerOutbound::Event(BusEvent {
                name: "connection-dead".to_string(),
                data: Value::Null,
            }),
        ))
        .unwrap();
    drop(host_tx);
    assert_eq!(
        aggregator.run().await,
        AggregatorExit::ConnectionDead {
            worker: "mainnet".into()
        }
    );
}

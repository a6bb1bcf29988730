//! Process composition: one aggregator unit plus one watcher unit per
//! enabled platform.
//!
//! The aggregator unit owns the store, the oracle and the host side of the
//! bus. Watcher deltas arrive as bus events, flow into the store (which
//! drives the oracle through its change listener), and fan out to consumers
//! over per-event-kind broadcast channels; dropping a receiver is the
//! unsubscribe. Shutdown is a cascade: stop every worker with a short grace
//! timeout, then fail whatever is still pending.

use crate::adapters::{AdapterRegistry, UniswapV2Adapter, UniswapV3Adapter, UniswapV4Adapter};
use crate::aggregator::{AggregatorStore, ChangeType};
use crate::bus::{events, requests, MessageBus, WorkerOutbound};
use crate::dex_adapter::AdapterContext;
use crate::errors::EngineError;
use crate::log_decoder;
use crate::multicall::Multicall;
use crate::pool_manager::PoolStateManager;
use crate::price_oracle::PriceOracle;
use crate::rpc::ChainRpc;
use crate::settings::{DexProtocolConfig, PlatformConfig, Settings};
use crate::static_cache::StaticCache;
use crate::token_registry::TokenRegistry;
use crate::types::{BlockData, TokenPairOnChain, VenueStateId};
use crate::watcher::{PoolUpdateBatch, RawBlock, Watcher, WatcherConfig, WatcherExit};
use anyhow::{Context, Result};
use ethers::middleware::Middleware;
use ethers::providers::{Provider, PubsubClient, Ws};
use ethers::types::{Address, Filter, Log};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Application-level event fanned out to subscribers.
#[derive(Debug, Clone)]
pub struct AppEvent {
    pub worker: String,
    pub name: String,
    pub data: Value,
}

/// Why the aggregator loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorExit {
    /// All worker channels closed.
    Drained,
    /// A watcher reported a dead connection; the process should exit 1.
    ConnectionDead { worker: String },
}

/// Outcome of consuming one worker message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorStep {
    Handled,
    /// Every worker sender is gone.
    Closed,
    Exit(AggregatorExit),
}

/// The aggregator unit: store + oracle + bus host loop.
pub struct AggregatorUnit {
    store: AggregatorStore,
    oracle: Arc<Mutex<PriceOracle>>,
    bus: Arc<MessageBus>,
    host_rx: mpsc::UnboundedReceiver<(String, WorkerOutbound)>,
    new_block_tx: broadcast::Sender<BlockData>,
    batch_tx: broadcast::Sender<PoolUpdateBatch>,
    app_event_tx: broadcast::Sender<AppEvent>,
}

impl AggregatorUnit {
    /// Builds the unit and the sender every watcher writes into.
    pub fn new(
        bus: Arc<MessageBus>,
        stable_anchors: impl IntoIterator<Item = (u64, Address)>,
    ) -> (Self, mpsc::UnboundedSender<(String, WorkerOutbound)>) {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let oracle = Arc::new(Mutex::new(PriceOracle::new(stable_anchors)));
        let mut store = AggregatorStore::new();

        // C6 change notifications drive C7.
        let oracle_listener = Arc::clone(&oracle);
        store.subscribe(move |change| {
            if matches!(change.change, ChangeType::Add | ChangeType::Update) {
                oracle_listener
                    .lock()
                    .expect("oracle lock")
                    .on_pools_updated(std::slice::from_ref(&change.state));
            }
        });

        let (new_block_tx, _) = broadcast::channel(256);
        let (batch_tx, _) = broadcast::channel(256);
        let (app_event_tx, _) = broadcast::channel(256);
        (
            Self {
                store,
                oracle,
                bus,
                host_rx,
                new_block_tx,
                batch_tx,
                app_event_tx,
            },
            host_tx,
        )
    }

    pub fn store(&self) -> &AggregatorStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AggregatorStore {
        &mut self.store
    }

    pub fn oracle(&self) -> Arc<Mutex<PriceOracle>> {
        Arc::clone(&self.oracle)
    }

    /// New-block channel; drop the receiver to unsubscribe.
    pub fn on_new_block(&self) -> broadcast::Receiver<BlockData> {
        self.new_block_tx.subscribe()
    }

    /// Pool-batch channel; drop the receiver to unsubscribe.
    pub fn on_pool_events_batch(&self) -> broadcast::Receiver<PoolUpdateBatch> {
        self.batch_tx.subscribe()
    }

    /// Application-event channel; drop the receiver to unsubscribe.
    pub fn on_app_event(&self) -> broadcast::Receiver<AppEvent> {
        self.app_event_tx.subscribe()
    }

    /// Consumes worker messages until every channel closes or a watcher dies.
    pub async fn run(&mut self) -> AggregatorExit {
        loop {
            match self.step().await {
                AggregatorStep::Handled => {}
                AggregatorStep::Closed => return AggregatorExit::Drained,
                AggregatorStep::Exit(exit) => return exit,
            }
        }
    }

    /// Receives and handles exactly one worker message.
    pub async fn step(&mut self) -> AggregatorStep {
        match self.host_rx.recv().await {
            Some((worker, message)) => match self.handle_worker_message(&worker, message) {
                Some(exit) => AggregatorStep::Exit(exit),
                None => AggregatorStep::Handled,
            },
            None => AggregatorStep::Closed,
        }
    }

    /// Drains whatever is currently queued without blocking. Test/embedding
    /// hook; production uses [`run`].
    pub fn drain_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((worker, message)) = self.host_rx.try_recv() {
            self.handle_worker_message(&worker, message);
            handled += 1;
        }
        handled
    }

    fn handle_worker_message(
        &mut self,
        worker: &str,
        message: WorkerOutbound,
    ) -> Option<AggregatorExit> {
        match message {
            WorkerOutbound::Response(response) => {
                self.bus.complete(worker, response);
                None
            }
            WorkerOutbound::Event(event) => match event.name.as_str() {
                events::POOL_UPDATE_BATCH => {
                    match serde_json::from_value::<PoolUpdateBatch>(event.data) {
                        Ok(batch) => self.apply_batch(batch),
                        Err(e) => warn!("[Aggregator] undecodable batch from {}: {}", worker, e),
                    }
                    None
                }
                events::NEW_BLOCK => {
                    if let Ok(block) = serde_json::from_value::<BlockData>(event.data) {
                        let _ = self.new_block_tx.send(block);
                    }
                    None
                }
                events::CONNECTION_DEAD => {
                    error!("[Aggregator] ❌ watcher {} reported dead connection", worker);
                    let _ = self.app_event_tx.send(AppEvent {
                        worker: worker.to_string(),
                        name: event.name,
                        data: event.data,
                    });
                    Some(AggregatorExit::ConnectionDead {
                        worker: worker.to_string(),
                    })
                }
                _ => {
                    let _ = self.app_event_tx.send(AppEvent {
                        worker: worker.to_string(),
                        name: event.name,
                        data: event.data,
                    });
                    None
                }
            },
        }
    }

    fn apply_batch(&mut self, batch: PoolUpdateBatch) {
        let ids: Vec<VenueStateId> = batch
            .updated_pool_states
            .iter()
            .map(|s| s.id().clone())
            .collect();
        self.store.set_batch(batch.updated_pool_states.clone());

        // Valuation write-back once the oracle has seen the batch.
        {
            let oracle = self.oracle.lock().expect("oracle lock");
            for id in &ids {
                if let Some(state) = self.store.get(id) {
                    if let Some(usd) = oracle.pool_liquidity_usd(state) {
                        self.store.set_liquidity_usd(id, usd);
                    }
                }
            }
        }
        let _ = self.batch_tx.send(batch);
    }
}

/// Handles for one spawned watcher unit.
pub struct WatcherHandle {
    pub platform: String,
    pub chain_id: u64,
    pub join: tokio::task::JoinHandle<WatcherExit>,
    pub blocks_tx: mpsc::UnboundedSender<RawBlock>,
    pub logs_tx: mpsc::UnboundedSender<Log>,
}

/// Builds the full per-chain stack (rpc, multicall, cache, registry,
/// adapters, manager) and spawns the watcher task.
pub fn spawn_watcher<M: Middleware + 'static>(
    platform_name: &str,
    platform: &PlatformConfig,
    provider: Arc<M>,
    settings: &Settings,
    bus: &MessageBus,
    host_tx: mpsc::UnboundedSender<(String, WorkerOutbound)>,
) -> Result<WatcherHandle> {
    let chain_id = platform.chain_id;
    let rpc = Arc::new(ChainRpc::new(
        provider,
        chain_id,
        (&settings.rate_limit).into(),
    ));
    let multicall = Arc::new(Multicall::new(
        Arc::clone(&rpc),
        platform.multicall(),
        crate::multicall::MAX_BATCH_SIZE,
    ));
    let cache = match StaticCache::open(&settings.cache_dir, chain_id) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!("[Engine] static cache unavailable for chain {}: {:#}", chain_id, e);
            None
        }
    };
    let tokens = Arc::new(TokenRegistry::new(
        chain_id,
        Arc::clone(&multicall),
        platform.trusted_seeds(),
        cache.clone(),
    ));
    let ctx = AdapterContext {
        chain_id,
        rpc: Arc::clone(&rpc),
        multicall,
        tokens: Arc::clone(&tokens),
        cache,
    };

    let mut registry = AdapterRegistry::new();
    for dex in &platform.dexes {
        match &dex.protocol {
            DexProtocolConfig::V2(v2) => registry.register(Arc::new(UniswapV2Adapter::new(
                ctx.clone(),
                &dex.name,
                parse_addr(&v2.factory, "factory")?,
                parse_addr(&v2.router, "router")?,
                v2.init_code_hash.as_deref().and_then(|h| h.parse().ok()),
            ))),
            DexProtocolConfig::V3(v3) => registry.register(Arc::new(UniswapV3Adapter::new(
                ctx.clone(),
                &dex.name,
                parse_addr(&v3.factory, "factory")?,
                parse_addr(&v3.router, "router")?,
                parse_addr(&v3.quoter, "quoter")?,
                v3.init_code_hash.as_deref().and_then(|h| h.parse().ok()),
            ))),
            DexProtocolConfig::V4(v4) => registry.register(Arc::new(UniswapV4Adapter::new(
                ctx.clone(),
                &dex.name,
                parse_addr(&v4.pool_manager, "poolManager")?,
                parse_addr(&v4.state_view, "stateView")?,
                parse_addr(&v4.quoter, "quoter")?,
            ))),
        }
    }
    let manager = PoolStateManager::new(chain_id, Arc::new(registry));

    let watched_pairs = resolve_watched_pairs(platform, chain_id);
    let inbox = bus.register_worker(platform_name);
    let (blocks_tx, blocks_rx) = mpsc::unbounded_channel();
    let (logs_tx, logs_rx) = mpsc::unbounded_channel();

    // V4 events come from the shared manager contract, so it is monitored
    // even before any keyed pool materialises.
    let mut watcher_config = WatcherConfig::new(platform_name, chain_id);
    for dex in &platform.dexes {
        if let DexProtocolConfig::V4(v4) = &dex.protocol {
            if let Ok(manager_addr) = v4.pool_manager.parse::<Address>() {
                watcher_config.extra_addresses.push(manager_addr);
            }
        }
    }

    let watcher = Watcher::new(
        watcher_config,
        manager,
        rpc,
        tokens,
        watched_pairs,
        inbox,
        blocks_rx,
        logs_rx,
        host_tx,
    );
    let platform_owned = platform_name.to_string();
    let join = tokio::spawn(async move {
        let exit = watcher.run().await;
        info!("[Engine] watcher {} exited: {:?}", platform_owned, exit);
        exit
    });

    Ok(WatcherHandle {
        platform: platform_name.to_string(),
        chain_id,
        join,
        blocks_tx,
        logs_tx,
    })
}

/// Watched pairs from the seed list; unresolvable symbols are skipped.
fn resolve_watched_pairs(platform: &PlatformConfig, chain_id: u64) -> Vec<TokenPairOnChain> {
    let seeds = platform.trusted_seeds();
    let find = |symbol: &str| {
        seeds.iter().find(|s| s.symbol == symbol).map(|s| crate::types::Token {
            chain_id,
            address: s.address,
            symbol: s.symbol.clone(),
            name: s.name.clone(),
            decimals: s.decimals,
            trusted: true,
        })
    };
    platform
        .watched_pairs
        .iter()
        .filter_map(|(a, b)| {
            match (find(a), find(b)) {
                (Some(ta), Some(tb)) => Some(TokenPairOnChain::new(ta, tb)),
                _ => {
                    warn!("[Engine] watched pair {}:{} not in seed list, skipping", a, b);
                    None
                }
            }
        })
        .collect()
}

fn parse_addr(raw: &str, what: &str) -> Result<Address> {
    raw.parse::<Address>()
        .with_context(|| format!("bad {} address: {}", what, raw))
}

/// Pumps block heads and filtered logs from a pubsub provider into a
/// watcher's channels. Reconnects with exponential backoff.
pub fn spawn_provider_feed<P>(
    provider: Arc<Provider<P>>,
    addresses: Vec<Address>,
    blocks_tx: mpsc::UnboundedSender<RawBlock>,
    logs_tx: mpsc::UnboundedSender<Log>,
) -> tokio::task::JoinHandle<()>
where
    P: PubsubClient + 'static,
{
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        loop {
            match feed_once(&provider, &addresses, &blocks_tx, &logs_tx).await {
                Ok(()) => backoff = Duration::from_secs(1),
                Err(e) => {
                    warn!("[ProviderFeed] ⚠️ subscription dropped: {:#}; reconnecting in {:?}", e, backoff);
                }
            }
            if blocks_tx.is_closed() {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    })
}

async fn feed_once<P>(
    provider: &Arc<Provider<P>>,
    addresses: &[Address],
    blocks_tx: &mpsc::UnboundedSender<RawBlock>,
    logs_tx: &mpsc::UnboundedSender<Log>,
) -> Result<()>
where
    P: PubsubClient + 'static,
{
    let mut blocks = provider
        .subscribe_blocks()
        .await
        .context("subscribe newHeads")?;
    // One filter for all monitored pools across the six known topics.
    let filter = Filter::new()
        .address(addresses.to_vec())
        .topic0(log_decoder::subscribed_topics());
    let mut logs = provider.subscribe_logs(&filter).await.context("subscribe logs")?;

    info!(
        "[ProviderFeed] 📡 subscribed: newHeads + log filter over {} addresses",
        addresses.len()
    );

    loop {
        tokio::select! {
            block = blocks.next() => match block {
                Some(block) => {
                    let raw = RawBlock {
                        number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
                        base_fee_per_gas: block.base_fee_per_gas.map(|f| f.as_u64()),
                    };
                    if blocks_tx.send(raw).is_err() {
                        return Ok(());
                    }
                }
                None => anyhow::bail!("newHeads stream ended"),
            },
            log = logs.next() => match log {
                Some(log) => {
                    if logs_tx.send(log).is_err() {
                        return Ok(());
                    }
                }
                None => anyhow::bail!("log stream ended"),
            },
        }
    }
}

/// Production entry point: connect, spawn, run until shutdown or a dead
/// connection. Exits the process with status 1 on `ConnectionDead`.
pub struct Engine;

impl Engine {
    pub async fn start(settings: Settings) -> Result<()> {
        settings.validate().map_err(|e| anyhow::anyhow!(e))?;
        let bus = Arc::new(MessageBus::with_timeout(Duration::from_millis(
            settings.request_timeout_ms,
        )));

        let anchors: Vec<(u64, Address)> = settings
            .enabled_platforms
            .iter()
            .filter_map(|name| settings.platform(name))
            .flat_map(|p| p.stable_anchors())
            .collect();
        let (mut aggregator, host_tx) = AggregatorUnit::new(Arc::clone(&bus), anchors);

        // Bring-up and the aggregator loop run concurrently: init responses
        // route through the aggregator, so it must already be pumping.
        let bring_up = async {
            let mut handles = Vec::new();
            for name in &settings.enabled_platforms {
                let platform = settings
                    .platform(name)
                    .context("validated platform disappeared")?;
                let provider = Arc::new(
                    Provider::<Ws>::connect(&platform.ws_rpc_url)
                        .await
                        .with_context(|| format!("connect {}", name))?,
                );
                let handle = spawn_watcher(
                    name,
                    platform,
                    Arc::clone(&provider),
                    &settings,
                    &bus,
                    host_tx.clone(),
                )?;

                // Initialise, then install the provider feed over the
                // monitored address set the watcher reports back.
                let init = bus
                    .send_request(name, requests::INIT, Value::Null)
                    .wait()
                    .await
                    .map_err(|e| anyhow::anyhow!("init {} failed: {}", name, e))?;
                let addresses: Vec<Address> = init
                    .get("addresses")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .filter_map(|s| s.parse().ok())
                            .collect()
                    })
                    .unwrap_or_default();
                spawn_provider_feed(
                    provider,
                    addresses,
                    handle.blocks_tx.clone(),
                    handle.logs_tx.clone(),
                );
                info!("[Engine] ✅ platform {} up (chain {})", name, handle.chain_id);
                handles.push(handle);
            }
            Ok::<Vec<WatcherHandle>, anyhow::Error>(handles)
        };
        tokio::pin!(bring_up);

        let mut watcher_handles: Option<Vec<WatcherHandle>> = None;
        let exit = loop {
            tokio::select! {
                result = &mut bring_up, if watcher_handles.is_none() => match result {
                    Ok(handles) => watcher_handles = Some(handles),
                    Err(e) => {
                        Self::shutdown(&bus).await;
                        return Err(e);
                    }
                },
                step = aggregator.step() => match step {
                    AggregatorStep::Handled => {}
                    AggregatorStep::Closed => break AggregatorExit::Drained,
                    AggregatorStep::Exit(exit) => break exit,
                },
            }
        };

        Self::shutdown(&bus).await;
        if let AggregatorExit::ConnectionDead { worker } = exit {
            error!("[Engine] exiting: watcher {} lost its connection", worker);
            std::process::exit(1);
        }
        Ok(())
    }

    /// Stop every worker with a short grace timeout, then sweep pending.
    pub async fn shutdown(bus: &MessageBus) {
        for worker in bus.worker_ids() {
            let handle = bus.send_request(&worker, requests::STOP, Value::Null);
            let graceful =
                tokio::time::timeout(Duration::from_secs(2), handle.wait()).await;
            match graceful {
                Ok(Ok(_)) => info!("[Engine] worker {} stopped", worker),
                _ => warn!("[Engine] worker {} did not acknowledge stop", worker),
            }
            bus.fail_worker(&worker, EngineError::WorkerTerminated);
        }
    }
}

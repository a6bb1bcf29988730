//! Per-chain watcher unit.
//!
//! One cooperative task per configured platform: it owns the authoritative
//! pool map for its chain and talks to the rest of the process only through
//! the bus. Internally it is a small state machine:
//!
//! | state        | trigger              | next                              |
//! |--------------|----------------------|-----------------------------------|
//! | `init`       | init request done    | `listening` (worker-initialized)  |
//! | `listening`  | in-order block       | `listening` (newBlock)            |
//! | `listening`  | out-of-order block   | `recovering` (reorg-detected)     |
//! | `recovering` | full refresh done    | `listening` (pool-states-updated) |
//! | any          | stop                 | `terminated`                      |
//!
//! Logs are applied to the pool manager immediately and buffered; a 50 ms
//! debounce timer, re-armed on every event, flushes the buffer as one
//! pool-update-batch. Block silence marks the connection degraded after 30 s
//! and dead after 60 s.

use crate::bus::{events, requests, BusEvent, BusRequest, BusResponse, WorkerInbound, WorkerOutbound};
use crate::errors::EngineError;
use crate::log_decoder::{self, DecodeError};
use crate::pool_manager::PoolStateManager;
use crate::rpc::ChainRpc;
use crate::token_registry::TokenRegistry;
use crate::types::{BlockData, PoolEvent, TokenPairOnChain, VenueState, VenueStateId};
use ethers::middleware::Middleware;
use ethers::types::{Address, Log};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Raw block head notification from the provider feed.
#[derive(Debug, Clone, Copy)]
pub struct RawBlock {
    pub number: u64,
    pub base_fee_per_gas: Option<u64>,
}

/// Payload of a `pool-update-batch` bus event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUpdateBatch {
    pub block_data: Option<BlockData>,
    pub updated_pool_states: Vec<VenueState>,
}

/// Why the unit's run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    /// Graceful stop request.
    Stopped,
    /// No blocks for longer than the dead threshold; host should exit 1.
    ConnectionDead,
    /// The bus dropped our inbox.
    InboxClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Listening,
    Recovering,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Worker id on the bus, e.g. `"arbitrum"`.
    pub platform: String,
    pub chain_id: u64,
    pub debounce: Duration,
    pub degraded_after: Duration,
    pub dead_after: Duration,
    /// Monitored beyond the materialised pool set: configured pool
    /// addresses not yet introspected, V4 pool managers. Events from these
    /// are how unknown pools enter the map.
    pub extra_addresses: Vec<Address>,
}

impl WatcherConfig {
    pub fn new(platform: &str, chain_id: u64) -> Self {
        Self {
            platform: platform.to_string(),
            chain_id,
            debounce: Duration::from_millis(50),
            degraded_after: Duration::from_secs(30),
            dead_after: Duration::from_secs(60),
            extra_addresses: Vec::new(),
        }
    }
}

pub struct Watcher<M> {
    config: WatcherConfig,
    manager: PoolStateManager<M>,
    rpc: Arc<ChainRpc<M>>,
    tokens: Arc<TokenRegistry<M>>,
    watched_pairs: Vec<TokenPairOnChain>,
    /// Union of monitored pool/manager addresses the log filter covers.
    active_addresses: HashSet<Address>,
    phase: Phase,
    paused: bool,
    current_block: Option<BlockData>,
    last_block_at: Instant,
    degraded: bool,
    buffer: Vec<PoolEvent>,
    debounce_deadline: Option<Instant>,

    inbox: mpsc::UnboundedReceiver<WorkerInbound>,
    blocks_rx: mpsc::UnboundedReceiver<RawBlock>,
    logs_rx: mpsc::UnboundedReceiver<Log>,
    outbound: mpsc::UnboundedSender<(String, WorkerOutbound)>,
}

impl<M: Middleware + 'static> Watcher<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WatcherConfig,
        manager: PoolStateManager<M>,
        rpc: Arc<ChainRpc<M>>,
        tokens: Arc<TokenRegistry<M>>,
        watched_pairs: Vec<TokenPairOnChain>,
        inbox: mpsc::UnboundedReceiver<WorkerInbound>,
        blocks_rx: mpsc::UnboundedReceiver<RawBlock>,
        logs_rx: mpsc::UnboundedReceiver<Log>,
        outbound: mpsc::UnboundedSender<(String, WorkerOutbound)>,
    ) -> Self {
        Self {
            config,
            manager,
            rpc,
            tokens,
            watched_pairs,
            active_addresses: HashSet::new(),
            phase: Phase::Init,
            paused: false,
            current_block: None,
            last_block_at: Instant::now(),
            degraded: false,
            buffer: Vec::new(),
            debounce_deadline: None,
            inbox,
            blocks_rx,
            logs_rx,
            outbound,
        }
    }

    /// Runs the unit to completion. Single-threaded: every handler runs to
    /// completion before the next message is picked up.
    pub async fn run(mut self) -> WatcherExit {
        let mut health = tokio::time::interval(Duration::from_secs(1));
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut blocks_closed = false;
        let mut logs_closed = false;

        loop {
            if self.phase == Phase::Terminated {
                return WatcherExit::Stopped;
            }
            let deadline = self.debounce_deadline;
            let debounce = async move {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                inbound = self.inbox.recv() => match inbound {
                    Some(WorkerInbound::Request(req)) => {
                        if let Some(exit) = self.handle_request(req).await {
                            return exit;
                        }
                    }
                    Some(WorkerInbound::Event(ev)) => self.handle_host_event(ev),
                    None => return WatcherExit::InboxClosed,
                },
                block = self.blocks_rx.recv(), if !blocks_closed => match block {
                    Some(raw) => self.on_block(raw).await,
                    None => blocks_closed = true,
                },
                log = self.logs_rx.recv(), if !logs_closed => match log {
                    Some(log) => self.on_log(log).await,
                    None => logs_closed = true,
                },
                _ = debounce => self.flush_batch(),
                _ = health.tick() => {
                    if self.check_health() {
                        return WatcherExit::ConnectionDead;
                    }
                }
            }
        }
    }

    // ---- bus handling -----------------------------------------------------

    /// Returns `Some(exit)` when the request terminates the unit.
    async fn handle_request(&mut self, req: BusRequest) -> Option<WatcherExit> {
        let correlation_id = req.correlation_id;
        let result: Result<Value, EngineError> = match req.name.as_str() {
            requests::INIT => self.do_init().await,
            requests::STOP => {
                info!("[Watcher:{}] stop requested", self.config.platform);
                self.respond(correlation_id, Ok(Value::Null));
                self.phase = Phase::Terminated;
                return Some(WatcherExit::Stopped);
            }
            requests::PAUSE => {
                self.paused = true;
                Ok(Value::Null)
            }
            requests::RESUME => {
                self.paused = false;
                Ok(Value::Null)
            }
            requests::FETCH_POOL => self.do_fetch_pool(&req.data),
            requests::FETCH_ALL => {
                serde_json::to_value(self.manager.states().collect::<Vec<_>>())
                    .map_err(|e| EngineError::WorkerFailed(e.to_string()))
            }
            requests::ADD_POOL => self.do_add_pool(&req.data).await,
            requests::REMOVE_POOL => self.do_remove_pool(&req.data),
            requests::UPDATE_CONFIG => self.do_update_config(&req.data).await,
            other => Err(EngineError::WorkerFailed(format!(
                "unknown request {}",
                other
            ))),
        };
        self.respond(correlation_id, result);
        None
    }

    fn handle_host_event(&mut self, ev: BusEvent) {
        debug!(
            "[Watcher:{}] host event {} ignored",
            self.config.platform, ev.name
        );
    }

    async fn do_init(&mut self) -> Result<Value, EngineError> {
        if self.phase != Phase::Init {
            return Ok(serde_json::json!({ "alreadyInitialized": true }));
        }
        let discovered = self.manager.discover_and_register(&self.watched_pairs).await;
        self.rebuild_address_set();
        self.phase = Phase::Listening;
        self.last_block_at = Instant::now();

        self.emit(
            events::WORKER_INITIALIZED,
            serde_json::json!({
                "chainId": self.config.chain_id,
                "pools": discovered,
                "addresses": self
                    .active_addresses
                    .iter()
                    .map(|a| format!("{:#x}", a))
                    .collect::<Vec<_>>(),
            }),
        );
        // Seed the aggregator with everything discovery found.
        self.flush_batch();
        info!(
            "[Watcher:{}] ✅ initialized with {} pools, {} monitored addresses",
            self.config.platform,
            self.manager.len(),
            self.active_addresses.len()
        );
        Ok(serde_json::json!({
            "pools": discovered,
            "addresses": self
                .active_addresses
                .iter()
                .map(|a| format!("{:#x}", a))
                .collect::<Vec<_>>(),
        }))
    }

    fn do_fetch_pool(&self, data: &Value) -> Result<Value, EngineError> {
        let id = parse_pool_ref(self.config.chain_id, data)?;
        match self.manager.get(&id) {
            Some(state) => {
                serde_json::to_value(state).map_err(|e| EngineError::WorkerFailed(e.to_string()))
            }
            None => Err(EngineError::UnknownPool(id)),
        }
    }

    async fn do_add_pool(&mut self, data: &Value) -> Result<Value, EngineError> {
        let venue = data
            .get("venue")
            .and_then(Value::as_str)
            .ok_or(EngineError::InvalidAmount)?;
        let address = parse_address(data.get("address"))?;
        let adapter = self
            .manager
            .adapters()
            .by_venue_name(venue)
            .ok_or_else(|| EngineError::WorkerFailed(format!("unknown venue {}", venue)))?;
        let mut state = adapter.init_from_address(address).await?;
        if let Err(e) = adapter.refresh(&mut state).await {
            warn!(
                "[Watcher:{}] ⚠️ initial refresh failed for {}: {}",
                self.config.platform,
                state.id(),
                e
            );
        }
        let id = state.id().clone();
        self.manager.insert(state);
        self.rebuild_address_set();
        self.flush_batch();
        Ok(serde_json::json!({ "id": id.0 }))
    }

    fn do_remove_pool(&mut self, data: &Value) -> Result<Value, EngineError> {
        let id = parse_pool_ref(self.config.chain_id, data)?;
        let removed = self.manager.remove(&id).is_some();
        if removed {
            self.rebuild_address_set();
        }
        Ok(serde_json::json!({ "removed": removed }))
    }

    async fn do_update_config(&mut self, data: &Value) -> Result<Value, EngineError> {
        // Runtime-tunable subset: the watched pair list.
        if let Some(pairs) = data.get("watchedPairs").and_then(Value::as_array) {
            let mut resolved = Vec::new();
            for entry in pairs {
                let (Some(a), Some(b)) = (
                    entry.get(0).and_then(Value::as_str),
                    entry.get(1).and_then(Value::as_str),
                ) else {
                    continue;
                };
                let (Some(ta), Some(tb)) = (
                    self.tokens.get_by_symbol(a),
                    self.tokens.get_by_symbol(b),
                ) else {
                    warn!(
                        "[Watcher:{}] cannot resolve pair {}:{} against registry",
                        self.config.platform, a, b
                    );
                    continue;
                };
                resolved.push(TokenPairOnChain::new(ta.as_ref().clone(), tb.as_ref().clone()));
            }
            if !resolved.is_empty() {
                self.watched_pairs = resolved;
                let discovered = self.manager.discover_and_register(&self.watched_pairs).await;
                self.rebuild_address_set();
                self.flush_batch();
                return Ok(serde_json::json!({ "pools": discovered }));
            }
        }
        Ok(Value::Null)
    }

    fn respond(&self, correlation_id: u64, result: Result<Value, EngineError>) {
        let response = match result {
            Ok(data) => BusResponse {
                correlation_id,
                data: Some(data),
                error: None,
            },
            Err(e) => BusResponse {
                correlation_id,
                data: None,
                error: Some(e.to_string()),
            },
        };
        let _ = self.outbound.send((
            self.config.platform.clone(),
            WorkerOutbound::Response(response),
        ));
    }

    fn emit(&self, name: &str, data: Value) {
        let _ = self.outbound.send((
            self.config.platform.clone(),
            WorkerOutbound::Event(BusEvent {
                name: name.to_string(),
                data,
            }),
        ));
    }

    // ---- block / log handling --------------------------------------------

    async fn on_block(&mut self, raw: RawBlock) {
        if self.phase == Phase::Init || self.paused {
            return;
        }
        self.last_block_at = Instant::now();
        if self.degraded {
            self.degraded = false;
            info!(
                "[Watcher:{}] ✅ connection recovered at block {}",
                self.config.platform, raw.number
            );
        }

        let out_of_order = self
            .current_block
            .as_ref()
            .map(|b| raw.number <= b.number)
            .unwrap_or(false);
        if out_of_order {
            self.recover_from_reorg(raw.number).await;
            return;
        }

        let block = BlockData {
            number: raw.number,
            chain_id: self.config.chain_id,
            received_at: unix_millis(),
            base_fee_per_gas: raw.base_fee_per_gas,
        };
        self.current_block = Some(block.clone());
        self.emit(
            events::NEW_BLOCK,
            serde_json::to_value(&block).unwrap_or(Value::Null),
        );
    }

    /// Reorg recovery: purge, resync the head, refresh every pool over RPC,
    /// then resume listening.
    async fn recover_from_reorg(&mut self, offending_block: u64) {
        warn!(
            "[Watcher:{}] ⚠️ reorg detected at block {} (current {})",
            self.config.platform,
            offending_block,
            self.current_block.as_ref().map(|b| b.number).unwrap_or(0)
        );
        self.phase = Phase::Recovering;
        self.buffer.clear();
        self.debounce_deadline = None;
        self.emit(
            events::REORG_DETECTED,
            serde_json::json!({ "blockNumber": offending_block }),
        );

        match self.rpc.get_block_number().await {
            Ok(latest) => {
                self.current_block = Some(BlockData {
                    number: latest,
                    chain_id: self.config.chain_id,
                    received_at: unix_millis(),
                    base_fee_per_gas: None,
                });
            }
            Err(e) => warn!(
                "[Watcher:{}] could not resync head after reorg: {}",
                self.config.platform, e
            ),
        }

        let refreshed = self.manager.update_all().await;
        info!(
            "[Watcher:{}] refreshed {} pools after reorg",
            self.config.platform, refreshed
        );
        self.flush_batch();
        self.emit(events::POOL_STATES_UPDATED, Value::Null);
        self.phase = Phase::Listening;
    }

    async fn on_log(&mut self, log: Log) {
        if self.phase != Phase::Listening || self.paused {
            return;
        }
        if !self.active_addresses.contains(&log.address) {
            debug!(
                "[Watcher:{}] dropping log from unmonitored address {:#x}",
                self.config.platform, log.address
            );
            return;
        }
        let received_at = self
            .current_block
            .as_ref()
            .map(|b| b.received_at)
            .unwrap_or_else(unix_millis);
        let event = match log_decoder::decode_log(self.config.chain_id, &log, received_at) {
            Ok(event) => event,
            Err(DecodeError::UnknownTopic(topic)) => {
                debug!(
                    "[Watcher:{}] unknown topic {:#x} from {:#x}",
                    self.config.platform, topic, log.address
                );
                return;
            }
            Err(e) => {
                warn!("[Watcher:{}] undecodable log: {}", self.config.platform, e);
                return;
            }
        };

        match self.manager.apply_event(&event).await {
            Ok(crate::pool_manager::ApplyOutcome::Outdated) => {
                // Expected under reorg; silent drop.
            }
            Ok(_) => {
                self.buffer.push(event);
                self.debounce_deadline = Some(Instant::now() + self.config.debounce);
            }
            Err(e) => warn!(
                "[Watcher:{}] ⚠️ event {} on {} dropped: {}",
                self.config.platform,
                event.kind.name(),
                event.pool_id,
                e
            ),
        }
    }

    /// Emits the buffered batch as one `pool-update-batch` event.
    fn flush_batch(&mut self) {
        self.debounce_deadline = None;
        let updated = self.manager.drain_dirty();
        if updated.is_empty() && self.buffer.is_empty() {
            return;
        }
        self.buffer.clear();
        let batch = PoolUpdateBatch {
            block_data: self.current_block.clone(),
            updated_pool_states: updated,
        };
        debug!(
            "[Watcher:{}] 📡 emitting batch of {} pool states",
            self.config.platform,
            batch.updated_pool_states.len()
        );
        self.emit(
            events::POOL_UPDATE_BATCH,
            serde_json::to_value(&batch).unwrap_or(Value::Null),
        );
    }

    /// Returns true when the connection is dead and the unit must exit.
    fn check_health(&mut self) -> bool {
        if self.phase != Phase::Listening || self.paused {
            return false;
        }
        let silence = self.last_block_at.elapsed();
        if silence > self.config.dead_after {
            warn!(
                "[Watcher:{}] ❌ no blocks for {:?}; connection dead",
                self.config.platform, silence
            );
            self.emit(
                events::CONNECTION_DEAD,
                serde_json::json!({ "silenceMs": silence.as_millis() as u64 }),
            );
            return true;
        }
        if silence > self.config.degraded_after && !self.degraded {
            self.degraded = true;
            warn!(
                "[Watcher:{}] ⚠️ no blocks for {:?}; connection degraded",
                self.config.platform, silence
            );
        }
        false
    }

    fn rebuild_address_set(&mut self) {
        self.active_addresses = self
            .manager
            .states()
            .filter_map(|state| match state {
                VenueState::DexV2(p) => Some(p.address),
                VenueState::DexV3(p) => Some(p.address),
                VenueState::DexV4(p) => Some(p.manager),
                VenueState::CexMarket(_) => None,
            })
            .chain(self.config.extra_addresses.iter().copied())
            .collect();
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Accepts `{"id": "<chainId>:<addr>"}` or `{"address": "0x…"}`.
fn parse_pool_ref(chain_id: u64, data: &Value) -> Result<VenueStateId, EngineError> {
    if let Some(id) = data.get("id").and_then(Value::as_str) {
        return Ok(VenueStateId(id.to_string()));
    }
    let address = parse_address(data.get("address"))?;
    Ok(VenueStateId::dex(chain_id, address))
}

fn parse_address(value: Option<&Value>) -> Result<Address, EngineError> {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Address>().ok())
        .ok_or(EngineError::InvalidAmount)
}

//! Typed request/response/event bus between the aggregator unit and the
//! watcher units.
//!
//! Workers are isolated tasks reachable only through their inbox channel;
//! every payload crosses as a structural copy (`serde_json::Value`, with big
//! integers as decimal strings, see `types::conversions`). Requests carry a
//! fresh correlation id and complete on the matching response, on timeout
//! (default 10 000 ms), on cancellation, or en masse when their worker dies.
//! The pending table is keyed `(worker, correlation)` so sweeping a dead
//! worker is a single O(pending) pass.

use crate::errors::EngineError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Request names accepted by watcher units.
pub mod requests {
    pub const INIT: &str = "init";
    pub const STOP: &str = "stop";
    pub const PAUSE: &str = "pause";
    pub const RESUME: &str = "resume";
    pub const FETCH_POOL: &str = "fetch-pool";
    pub const FETCH_ALL: &str = "fetch-all";
    pub const ADD_POOL: &str = "add-pool";
    pub const REMOVE_POOL: &str = "remove-pool";
    pub const UPDATE_CONFIG: &str = "update-config";
}

/// Event names emitted by watcher units.
pub mod events {
    pub const WORKER_INITIALIZED: &str = "worker-initialized";
    pub const NEW_BLOCK: &str = "newBlock";
    pub const POOL_UPDATE_BATCH: &str = "pool-update-batch";
    pub const REORG_DETECTED: &str = "reorg-detected";
    pub const POOL_STATES_UPDATED: &str = "pool-states-updated";
    pub const CONNECTION_DEAD: &str = "connection-dead";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRequest {
    pub correlation_id: u64,
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusResponse {
    pub correlation_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub name: String,
    pub data: Value,
}

/// Everything a worker can receive.
#[derive(Debug)]
pub enum WorkerInbound {
    Request(BusRequest),
    Event(BusEvent),
}

/// Everything a worker can send back to the host.
#[derive(Debug)]
pub enum WorkerOutbound {
    Response(BusResponse),
    Event(BusEvent),
}

type PendingMap = DashMap<(String, u64), oneshot::Sender<Result<Value, EngineError>>>;

/// Completion handle for an in-flight request.
pub struct ResponseHandle {
    worker_id: String,
    correlation_id: u64,
    rx: oneshot::Receiver<Result<Value, EngineError>>,
    pending: Arc<PendingMap>,
}

impl ResponseHandle {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Resolves with the response data, its error, `Timeout`, `Cancelled` or
    /// a worker-death error.
    pub async fn wait(self) -> Result<Value, EngineError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(EngineError::WorkerFailed("response channel dropped".into())))
    }

    /// Clears the pending entry and fails the handle with `Cancelled`.
    /// An in-flight RPC behind the request may still run; its result is
    /// discarded when the worker's response finds no pending entry.
    pub fn cancel(&self) {
        if let Some((_, tx)) = self
            .pending
            .remove(&(self.worker_id.clone(), self.correlation_id))
        {
            let _ = tx.send(Err(EngineError::Cancelled));
        }
    }
}

struct WorkerEntry {
    tx: mpsc::UnboundedSender<WorkerInbound>,
}

/// Host-side bus endpoint. One per process; owned by the aggregator unit.
pub struct MessageBus {
    workers: DashMap<String, WorkerEntry>,
    pending: Arc<PendingMap>,
    next_correlation: AtomicU64,
    request_timeout: Duration,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self {
            workers: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            next_correlation: AtomicU64::new(1),
            request_timeout,
        }
    }

    /// Registers a worker and returns its inbox.
    pub fn register_worker(&self, worker_id: &str) -> mpsc::UnboundedReceiver<WorkerInbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .workers
            .insert(worker_id.to_string(), WorkerEntry { tx })
            .is_some()
        {
            warn!("[MessageBus] worker {} re-registered", worker_id);
        }
        rx
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }

    /// Posts a request and returns its completion handle.
    pub fn send_request(&self, worker_id: &str, name: &str, data: Value) -> ResponseHandle {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let handle = ResponseHandle {
            worker_id: worker_id.to_string(),
            correlation_id,
            rx,
            pending: Arc::clone(&self.pending),
        };

        let request = BusRequest {
            correlation_id,
            name: name.to_string(),
            data,
        };
        let delivered = self
            .workers
            .get(worker_id)
            .map(|entry| entry.tx.send(WorkerInbound::Request(request)).is_ok())
            .unwrap_or(false);
        if !delivered {
            let _ = tx.send(Err(EngineError::WorkerFailed(format!(
                "worker {} is not reachable",
                worker_id
            ))));
            return handle;
        }

        self.pending
            .insert((worker_id.to_string(), correlation_id), tx);

        // Deadline watchdog: clears the entry and fails the handle.
        let pending = Arc::clone(&self.pending);
        let key = (worker_id.to_string(), correlation_id);
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, tx)) = pending.remove(&key) {
                debug!(
                    "[MessageBus] request {} to {} timed out after {:?}",
                    key.1, key.0, timeout
                );
                let _ = tx.send(Err(EngineError::Timeout));
            }
        });

        handle
    }

    /// Fire-and-forget event to a worker.
    pub fn send_event(&self, worker_id: &str, name: &str, data: Value) -> bool {
        self.workers
            .get(worker_id)
            .map(|entry| {
                entry
                    .tx
                    .send(WorkerInbound::Event(BusEvent {
                        name: name.to_string(),
                        data,
                    }))
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Routes a worker's response to its pending handle. A response with no
    /// pending entry (timed out, cancelled) is discarded.
    pub fn complete(&self, worker_id: &str, response: BusResponse) {
        let key = (worker_id.to_string(), response.correlation_id);
        let Some((_, tx)) = self.pending.remove(&key) else {
            debug!(
                "[MessageBus] discarding late response {} from {}",
                response.correlation_id, worker_id
            );
            return;
        };
        let outcome = match response.error {
            Some(err) => Err(EngineError::WorkerFailed(err)),
            None => Ok(response.data.unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    }

    /// Fails every pending request of a worker and drops its inbox.
    pub fn fail_worker(&self, worker_id: &str, error: EngineError) {
        self.workers.remove(worker_id);
        let keys: Vec<(String, u64)> = self
            .pending
            .iter()
            .filter(|e| e.key().0 == worker_id)
            .map(|e| e.key().clone())
            .collect();
        let count = keys.len();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
        if count > 0 {
            warn!(
                "[MessageBus] failed {} pending requests for dead worker {}",
                count, worker_id
            );
        }
    }

    /// True while the request is still awaiting a response.
    pub fn is_pending(&self, worker_id: &str, correlation_id: u64) -> bool {
        self.pending
            .contains_key(&(worker_id.to_string(), correlation_id))
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_completes_with_response_data() {
        let bus = MessageBus::new();
        let mut inbox = bus.register_worker("polygon");
        let handle = bus.send_request("polygon", requests::FETCH_ALL, Value::Null);

        let WorkerInbound::Request(req) = inbox.recv().await.unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.name, "fetch-all");
        bus.complete(
            "polygon",
            BusResponse {
                correlation_id: req.correlation_id,
                data: Some(serde_json::json!({"pools": 3})),
                error: None,
            },
        );

        let out = handle.wait().await.unwrap();
        assert_eq!(out["pools"], 3);
    }

    #[tokio::test]
    async fn response_error_surfaces_to_caller() {
        let bus = MessageBus::new();
        let mut inbox = bus.register_worker("polygon");
        let handle = bus.send_request("polygon", requests::FETCH_POOL, Value::Null);
        let WorkerInbound::Request(req) = inbox.recv().await.unwrap() else {
            panic!("expected request");
        };
        bus.complete(
            "polygon",
            BusResponse {
                correlation_id: req.correlation_id,
                data: None,
                error: Some("no such pool".into()),
            },
        );
        assert!(matches!(
            handle.wait().await,
            Err(EngineError::WorkerFailed(msg)) if msg == "no such pool"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_and_clears_pending() {
        let bus = MessageBus::new();
        let _inbox = bus.register_worker("polygon");
        let handle = bus.send_request("polygon", requests::FETCH_ALL, Value::Null);
        let cid = handle.correlation_id();
        assert!(bus.is_pending("polygon", cid));

        tokio::time::advance(Duration::from_millis(10_001)).await;
        assert_eq!(handle.wait().await, Err(EngineError::Timeout));
        assert!(!bus.is_pending("polygon", cid));
    }

    #[tokio::test]
    async fn cancel_clears_pending_and_fails_handle() {
        let bus = MessageBus::new();
        let _inbox = bus.register_worker("polygon");
        let handle = bus.send_request("polygon", requests::FETCH_ALL, Value::Null);
        let cid = handle.correlation_id();
        handle.cancel();
        assert!(!bus.is_pending("polygon", cid));
        assert_eq!(handle.wait().await, Err(EngineError::Cancelled));
        // A late response after cancellation is silently discarded.
        bus.complete(
            "polygon",
            BusResponse {
                correlation_id: cid,
                data: Some(Value::Null),
                error: None,
            },
        );
    }

    #[tokio::test]
    async fn dead_worker_fails_all_pending() {
        let bus = MessageBus::new();
        let _inbox = bus.register_worker("polygon");
        let h1 = bus.send_request("polygon", requests::FETCH_ALL, Value::Null);
        let h2 = bus.send_request("polygon", requests::FETCH_POOL, Value::Null);

        bus.fail_worker("polygon", EngineError::WorkerTerminated);
        assert_eq!(h1.wait().await, Err(EngineError::WorkerTerminated));
        assert_eq!(h2.wait().await, Err(EngineError::WorkerTerminated));

        // Worker is gone: new requests fail immediately.
        let h3 = bus.send_request("polygon", requests::FETCH_ALL, Value::Null);
        assert!(matches!(h3.wait().await, Err(EngineError::WorkerFailed(_))));
    }

    #[tokio::test]
    async fn events_are_fire_and_forget() {
        let bus = MessageBus::new();
        let mut inbox = bus.register_worker("polygon");
        assert!(bus.send_event("polygon", "pause", Value::Null));
        let WorkerInbound::Event(ev) = inbox.recv().await.unwrap() else {
            panic!("expected event");
        };
        assert_eq!(ev.name, "pause");
        assert!(!bus.send_event("nobody", "pause", Value::Null));
    }

    #[test]
    fn big_integers_cross_as_decimal_strings() {
        use crate::types::PoolEventKind;
        let kind = PoolEventKind::V2Sync {
            reserve0: u128::MAX,
            reserve1: 7,
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(
            value["reserve0"],
            Value::String("340282366920938463463374607431768211455".into())
        );
        // Integer-preserving decode on the receive side.
        let back: PoolEventKind = serde_json::from_value(value).unwrap();
        assert_eq!(back, kind);
    }
}

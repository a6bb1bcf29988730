//! Engine error taxonomy.
//!
//! Kinds, not call sites: every fallible engine path maps its failure onto one
//! of these variants so policy (retry, drop, surface, terminate) can be
//! decided by kind. Plumbing code outside the taxonomy (bootstrap, config,
//! provider connection) stays on `anyhow`.

use crate::types::VenueStateId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Provider call failed or timed out. Retried at the next event.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// An adapter was handed an event shape belonging to another protocol.
    /// Fatal for that event only.
    #[error("event kind mismatch: adapter {adapter} cannot apply {event}")]
    EventKindMismatch {
        adapter: &'static str,
        event: &'static str,
    },

    /// Introspection could not resolve both tokens of an unseen pool.
    #[error("unknown pool {0}")]
    UnknownPool(VenueStateId),

    /// Non-monotonic event metadata. Expected under reorg; dropped silently.
    #[error("outdated event for pool {0}")]
    OutdatedEvent(VenueStateId),

    /// A math precondition failed: zero denominator, underflow, drained range.
    #[error("insufficient liquidity")]
    InsufficientLiquidity,

    /// Quote/simulate input outside the valid domain.
    #[error("invalid amount")]
    InvalidAmount,

    /// ERC-20 metadata read reverted; the token stays unregistered.
    #[error("token introspection failed: {0}")]
    IntrospectionFailed(String),

    /// Bus request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The watcher unit died with an error; all its pending requests fail.
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// The watcher unit was stopped; all its pending requests fail.
    #[error("worker terminated")]
    WorkerTerminated,

    /// The originator cancelled the request handle.
    #[error("request cancelled")]
    Cancelled,

    /// No blocks for over 60 s. The process exits; the host respawns it.
    #[error("connection dead: no blocks received")]
    ConnectionDead,
}

impl EngineError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        EngineError::Rpc(err.to_string())
    }
}

//! Rate-limited chain RPC client.
//!
//! One `ChainRpc` per watched chain; every adapter call funnels through it so
//! the whole chain shares a single token bucket. The bucket is a governor
//! quota (minimum spacing between dispatches) combined with a semaphore
//! (concurrent in-flight cap); waiters queue FIFO on the semaphore.

use crate::errors::EngineError;
use ethers::middleware::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, TransactionRequest};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-chain token-bucket parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_concurrent: usize,
    pub requests_per_second: u32,
    /// Pause inserted between multicall batches.
    pub batch_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            requests_per_second: 20,
            batch_delay: Duration::from_millis(200),
        }
    }
}

/// Shared, rate-limited handle to one chain's provider.
pub struct ChainRpc<M> {
    provider: Arc<M>,
    chain_id: u64,
    limiter: DirectRateLimiter,
    semaphore: Arc<Semaphore>,
    batch_delay: Duration,
}

impl<M: Middleware + 'static> ChainRpc<M> {
    pub fn new(provider: Arc<M>, chain_id: u64, config: RateLimitConfig) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second.max(1)).expect("non-zero rps");
        // Burst of 1 keeps at least 1000/rps ms between dispatches.
        let quota = Quota::per_second(rps).allow_burst(NonZeroU32::new(1).expect("non-zero burst"));
        Self {
            provider,
            chain_id,
            limiter: RateLimiter::direct(quota),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            batch_delay: config.batch_delay,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn provider(&self) -> Arc<M> {
        Arc::clone(&self.provider)
    }

    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    /// Waits for a concurrency slot, then for the bucket's next dispatch slot.
    async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::rpc("rpc semaphore closed"))?;
        self.limiter.until_ready().await;
        Ok(permit)
    }

    /// Raw `eth_call` against a contract.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, EngineError> {
        let _permit = self.acquire().await?;
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        let out = self
            .provider
            .call(&tx, None)
            .await
            .map_err(EngineError::rpc)?;
        debug!(
            "[ChainRpc] eth_call chain={} to={:#x} -> {} bytes",
            self.chain_id,
            to,
            out.len()
        );
        Ok(out)
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, EngineError> {
        let _permit = self.acquire().await?;
        self.provider
            .get_logs(filter)
            .await
            .map_err(EngineError::rpc)
    }

    pub async fn get_block_number(&self) -> Result<u64, EngineError> {
        let _permit = self.acquire().await?;
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(EngineError::rpc)
    }
}

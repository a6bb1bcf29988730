//! Multicall3 batch executor.
//!
//! Folds many view calls into `aggregate3` round-trips through the chain's
//! rate-limited client. Identical calls are coalesced before batching and the
//! result set is reconstructed in the original order, so callers can index
//! results positionally. Batches never exceed 500 sub-calls.

use crate::abi::{self, sel};
use crate::errors::EngineError;
use crate::rpc::ChainRpc;
use ethers::abi::{self as ethabi, ParamType, Token as AbiToken};
use ethers::middleware::Middleware;
use ethers::types::{Address, Bytes};
use log::debug;
use std::sync::Arc;

/// Upper bound on sub-calls per `aggregate3` dispatch.
pub const MAX_BATCH_SIZE: usize = 500;

/// A single call to be batched.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub target: Address,
    pub call_data: Bytes,
}

pub struct Multicall<M> {
    rpc: Arc<ChainRpc<M>>,
    multicall_address: Address,
    batch_size: usize,
}

impl<M: Middleware + 'static> Multicall<M> {
    pub fn new(rpc: Arc<ChainRpc<M>>, multicall_address: Address, batch_size: usize) -> Self {
        Self {
            rpc,
            multicall_address,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Runs all calls, one result per input call in input order.
    ///
    /// A sub-call that reverts yields empty bytes (`allowFailure = true` on
    /// chain); only transport-level failures error the whole batch.
    pub async fn run(&self, calls: Vec<Call>) -> Result<Vec<Bytes>, EngineError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Coalesce identical calls so hot targets cost one sub-call.
        let mut unique = indexmap::IndexMap::new();
        let mut original_indices = vec![0usize; calls.len()];
        for (i, call) in calls.iter().enumerate() {
            let (index, _) = unique.insert_full((call.target, call.call_data.clone()), ());
            original_indices[i] = index;
        }
        let unique_calls: Vec<Call> = unique
            .into_keys()
            .map(|(target, call_data)| Call { target, call_data })
            .collect();
        if unique_calls.len() < calls.len() {
            debug!(
                "[Multicall] coalesced {} calls into {}",
                calls.len(),
                unique_calls.len()
            );
        }

        let mut unique_results: Vec<Bytes> = Vec::with_capacity(unique_calls.len());
        let mut first = true;
        for chunk in unique_calls.chunks(self.batch_size) {
            if !first {
                tokio::time::sleep(self.rpc.batch_delay()).await;
            }
            first = false;
            unique_results.extend(self.dispatch(chunk).await?);
        }

        Ok(original_indices
            .into_iter()
            .map(|index| unique_results[index].clone())
            .collect())
    }

    /// One `aggregate3((address,bool,bytes)[])` round trip.
    async fn dispatch(&self, calls: &[Call]) -> Result<Vec<Bytes>, EngineError> {
        let call_tokens: Vec<AbiToken> = calls
            .iter()
            .map(|call| {
                AbiToken::Tuple(vec![
                    AbiToken::Address(call.target),
                    AbiToken::Bool(true),
                    AbiToken::Bytes(call.call_data.to_vec()),
                ])
            })
            .collect();
        let data = abi::call_data_with_args(sel::AGGREGATE3, &[AbiToken::Array(call_tokens)]);

        let response = self.rpc.call(self.multicall_address, data).await?;

        let decoded = ethabi::decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bool,
                ParamType::Bytes,
            ])))],
            &response,
        )
        .map_err(EngineError::rpc)?;

        let results = decoded
            .into_iter()
            .next()
            .and_then(|t| t.into_array())
            .ok_or_else(|| EngineError::rpc("malformed aggregate3 response"))?;

        let mut out = Vec::with_capacity(results.len());
        for token in results {
            match token {
                AbiToken::Tuple(mut fields) if fields.len() == 2 => {
                    let data = fields.remove(1);
                    let ok = matches!(fields.remove(0), AbiToken::Bool(true));
                    match (ok, data) {
                        (true, AbiToken::Bytes(bytes)) => out.push(Bytes::from(bytes)),
                        // Reverted sub-call: empty marker, caller skips it.
                        _ => out.push(Bytes::new()),
                    }
                }
                _ => return Err(EngineError::rpc("malformed aggregate3 result tuple")),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(4000usize.clamp(1, MAX_BATCH_SIZE), 500);
        assert_eq!(0usize.clamp(1, MAX_BATCH_SIZE), 1);
    }

    #[test]
    fn calls_hash_by_target_and_data() {
        use std::collections::HashSet;
        let a = Call {
            target: Address::from([1u8; 20]),
            call_data: abi::call_data(sel::SLOT0),
        };
        let b = a.clone();
        let c = Call {
            target: Address::from([1u8; 20]),
            call_data: abi::call_data(sel::LIQUIDITY),
        };
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}

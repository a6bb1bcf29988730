//! Raw log → typed pool event decoding.
//!
//! One parser per subscribed topic-0 signature. The watcher's single filter
//! spans all six topics; anything else arriving here is a provider quirk and
//! is reported as [`DecodeError::UnknownTopic`] so the caller can drop it.

use crate::abi;
use crate::types::{EventMetadata, PoolEvent, PoolEventKind, VenueStateId};
use ethers::types::{Log, H256};
use once_cell::sync::Lazy;
use std::str::FromStr;
use thiserror::Error;

fn topic(hexstr: &str) -> H256 {
    H256::from_str(hexstr).expect("valid topic literal")
}

/// keccak256("Sync(uint112,uint112)")
pub static TOPIC_V2_SYNC: Lazy<H256> =
    Lazy::new(|| topic("0x1c411e9a96e071241c2f21f7726b17ae89e3cab4c78be50e062b03a9fffbbad1"));
/// keccak256("Swap(address,address,int256,int256,uint160,uint128,int24)")
pub static TOPIC_V3_SWAP: Lazy<H256> =
    Lazy::new(|| topic("0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67"));
/// keccak256("Mint(address,address,int24,int24,uint128,uint256,uint256)")
pub static TOPIC_V3_MINT: Lazy<H256> =
    Lazy::new(|| topic("0x7a53080ba414158be7ec69b987b5fb7d07dee101fe85488f0853ae16239d0bde"));
/// keccak256("Burn(address,int24,int24,uint128,uint256,uint256)")
pub static TOPIC_V3_BURN: Lazy<H256> =
    Lazy::new(|| topic("0x0c396cd989a39f4459b5fa1aed6a9a8dcdbc45908acfd67e028cd568da98982c"));
/// keccak256("Swap(bytes32,address,int128,int128,uint160,uint128,int24,uint24)")
pub static TOPIC_V4_SWAP: Lazy<H256> =
    Lazy::new(|| topic("0x40e9cecb9f5f1f1c5b9c97dec2917b7ee92e57ba5563708daca94dd84ad7112f"));
/// keccak256("ModifyLiquidity(bytes32,address,int24,int24,int256,int256)")
pub static TOPIC_V4_MODIFY_LIQUIDITY: Lazy<H256> =
    Lazy::new(|| topic("0xc57aa738a61f858af00fbb2f50ef810a6121a63b18cb4d54525b780b723457f1"));

/// All six subscribed topic-0 signatures, filter order.
pub fn subscribed_topics() -> Vec<H256> {
    vec![
        *TOPIC_V2_SYNC,
        *TOPIC_V3_SWAP,
        *TOPIC_V3_MINT,
        *TOPIC_V3_BURN,
        *TOPIC_V4_SWAP,
        *TOPIC_V4_MODIFY_LIQUIDITY,
    ]
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown topic {0:#x}")]
    UnknownTopic(H256),
    #[error("log missing block metadata (pending log?)")]
    MissingMetadata,
    #[error("malformed {kind} log: {detail}")]
    Malformed {
        kind: &'static str,
        detail: String,
    },
}

/// Decodes one raw log into a typed event.
///
/// `received_at_ms` is the arrival timestamp of the enclosing block
/// notification, carried into [`EventMetadata`].
pub fn decode_log(chain_id: u64, log: &Log, received_at_ms: u64) -> Result<PoolEvent, DecodeError> {
    let topic0 = log
        .topics
        .first()
        .copied()
        .ok_or(DecodeError::MissingMetadata)?;
    let meta = EventMetadata {
        block_number: log.block_number.ok_or(DecodeError::MissingMetadata)?.as_u64(),
        transaction_index: log
            .transaction_index
            .ok_or(DecodeError::MissingMetadata)?
            .as_u64(),
        log_index: log
            .log_index
            .ok_or(DecodeError::MissingMetadata)?
            .as_u64(),
        transaction_hash: log.transaction_hash.ok_or(DecodeError::MissingMetadata)?,
        block_received_timestamp: received_at_ms,
    };
    let data = log.data.as_ref();

    let malformed = |kind: &'static str, detail: String| DecodeError::Malformed { kind, detail };

    let (pool_id, kind) = if topic0 == *TOPIC_V2_SYNC {
        let reserve0 = abi::decode_u128(data, 0)
            .map_err(|e| malformed("Sync", e.to_string()))?;
        let reserve1 = abi::decode_u128(data, 1)
            .map_err(|e| malformed("Sync", e.to_string()))?;
        (
            VenueStateId::dex(chain_id, log.address),
            PoolEventKind::V2Sync { reserve0, reserve1 },
        )
    } else if topic0 == *TOPIC_V3_SWAP {
        // data: amount0, amount1, sqrtPriceX96, liquidity, tick
        let sqrt_price_x96 =
            abi::decode_u256(data, 2).map_err(|e| malformed("Swap", e.to_string()))?;
        let liquidity = abi::decode_u128(data, 3).map_err(|e| malformed("Swap", e.to_string()))?;
        let tick = abi::decode_i24(data, 4).map_err(|e| malformed("Swap", e.to_string()))?;
        (
            VenueStateId::dex(chain_id, log.address),
            PoolEventKind::V3Swap {
                sqrt_price_x96,
                liquidity,
                tick,
            },
        )
    } else if topic0 == *TOPIC_V3_MINT {
        // tick bounds are indexed; data: sender, amount, amount0, amount1
        let tick_lower = indexed_i24(log, 2)?;
        let tick_upper = indexed_i24(log, 3)?;
        let amount = abi::decode_u128(data, 1).map_err(|e| malformed("Mint", e.to_string()))?;
        (
            VenueStateId::dex(chain_id, log.address),
            PoolEventKind::V3Mint {
                tick_lower,
                tick_upper,
                amount,
            },
        )
    } else if topic0 == *TOPIC_V3_BURN {
        let tick_lower = indexed_i24(log, 2)?;
        let tick_upper = indexed_i24(log, 3)?;
        let amount = abi::decode_u128(data, 0).map_err(|e| malformed("Burn", e.to_string()))?;
        (
            VenueStateId::dex(chain_id, log.address),
            PoolEventKind::V3Burn {
                tick_lower,
                tick_upper,
                amount,
            },
        )
    } else if topic0 == *TOPIC_V4_SWAP {
        let pool_key = indexed_bytes32(log, 1)?;
        // data: amount0, amount1, sqrtPriceX96, liquidity, tick, fee
        let sqrt_price_x96 =
            abi::decode_u256(data, 2).map_err(|e| malformed("Swap", e.to_string()))?;
        let liquidity = abi::decode_u128(data, 3).map_err(|e| malformed("Swap", e.to_string()))?;
        let tick = abi::decode_i24(data, 4).map_err(|e| malformed("Swap", e.to_string()))?;
        let fee_ppm = abi::decode_u32(data, 5).map_err(|e| malformed("Swap", e.to_string()))?;
        (
            v4_pool_id(chain_id, pool_key),
            PoolEventKind::V4Swap {
                pool_key,
                sqrt_price_x96,
                liquidity,
                tick,
                fee_ppm,
            },
        )
    } else if topic0 == *TOPIC_V4_MODIFY_LIQUIDITY {
        let pool_key = indexed_bytes32(log, 1)?;
        // data: tickLower, tickUpper, liquidityDelta, salt
        let tick_lower =
            abi::decode_i24(data, 0).map_err(|e| malformed("ModifyLiquidity", e.to_string()))?;
        let tick_upper =
            abi::decode_i24(data, 1).map_err(|e| malformed("ModifyLiquidity", e.to_string()))?;
        let liquidity_delta = abi::decode_i256_as_i128(data, 2)
            .map_err(|e| malformed("ModifyLiquidity", e.to_string()))?;
        (
            v4_pool_id(chain_id, pool_key),
            PoolEventKind::V4ModifyLiquidity {
                pool_key,
                tick_lower,
                tick_upper,
                liquidity_delta,
            },
        )
    } else {
        return Err(DecodeError::UnknownTopic(topic0));
    };

    Ok(PoolEvent {
        pool_id,
        chain_id,
        address: log.address,
        meta,
        kind,
    })
}

/// Keyed V4 identity: the 32-byte pool key stands in for the pool address.
pub fn v4_pool_id(chain_id: u64, pool_key: [u8; 32]) -> VenueStateId {
    VenueStateId(format!("{}:0x{}", chain_id, hex::encode(pool_key)))
}

fn indexed_i24(log: &Log, index: usize) -> Result<i32, DecodeError> {
    let t = log.topics.get(index).ok_or(DecodeError::Malformed {
        kind: "indexed",
        detail: format!("missing topic {}", index),
    })?;
    abi::decode_i24(t.as_bytes(), 0).map_err(|e| DecodeError::Malformed {
        kind: "indexed",
        detail: e.to_string(),
    })
}

fn indexed_bytes32(log: &Log, index: usize) -> Result<[u8; 32], DecodeError> {
    let t = log.topics.get(index).ok_or(DecodeError::Malformed {
        kind: "indexed",
        detail: format!("missing topic {}", index),
    })?;
    Ok(t.to_fixed_bytes())
}

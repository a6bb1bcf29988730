//! Hand-rolled ABI plumbing for the closed set of view calls the engine makes.
//!
//! Selectors are the first four bytes of `keccak256` of the canonical
//! signature, fixed here as constants so call encoding never allocates an ABI
//! object. Decoding goes through `ethers::abi` where the shape is dynamic
//! (strings, tuples) and straight byte slicing where it is a single word.

use crate::errors::EngineError;
use ethers::abi::{self, ParamType, Token as AbiToken};
use ethers::types::{Address, Bytes, U256};

/// Four-byte function selectors (`keccak256(signature)[..4]`).
pub mod sel {
    pub const GET_RESERVES: [u8; 4] = [0x09, 0x02, 0xf1, 0xac]; // getReserves()
    pub const TOKEN0: [u8; 4] = [0x0d, 0xfe, 0x16, 0x81]; // token0()
    pub const TOKEN1: [u8; 4] = [0xd2, 0x12, 0x20, 0xa7]; // token1()
    pub const FEE: [u8; 4] = [0xdd, 0xca, 0x3f, 0x43]; // fee()
    pub const TICK_SPACING: [u8; 4] = [0xd0, 0xc9, 0x3a, 0x7c]; // tickSpacing()
    pub const LIQUIDITY: [u8; 4] = [0x1a, 0x68, 0x65, 0x02]; // liquidity()
    pub const SLOT0: [u8; 4] = [0x38, 0x50, 0xc7, 0xbd]; // slot0()
    pub const TICKS: [u8; 4] = [0xf3, 0x0d, 0xba, 0x93]; // ticks(int24)
    pub const GET_PAIR: [u8; 4] = [0xe6, 0xa4, 0x39, 0x05]; // getPair(address,address)
    pub const GET_POOL: [u8; 4] = [0x16, 0x98, 0xee, 0x82]; // getPool(address,address,uint24)
    pub const NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03]; // name()
    pub const SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41]; // symbol()
    pub const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67]; // decimals()
    pub const AGGREGATE3: [u8; 4] = [0x82, 0xad, 0x56, 0xcb]; // aggregate3((address,bool,bytes)[])
    pub const GET_SLOT0: [u8; 4] = [0xc8, 0x15, 0x64, 0x1c]; // getSlot0(bytes32)
    pub const GET_LIQUIDITY: [u8; 4] = [0xfa, 0x67, 0x93, 0xd5]; // getLiquidity(bytes32)
}

/// Selector-only call data (`name()`, `slot0()`, …).
pub fn call_data(selector: [u8; 4]) -> Bytes {
    Bytes::from(selector.to_vec())
}

/// Selector plus ABI-encoded arguments.
pub fn call_data_with_args(selector: [u8; 4], args: &[AbiToken]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend_from_slice(&abi::encode(args));
    Bytes::from(data)
}

pub fn get_pair_call(token_a: Address, token_b: Address) -> Bytes {
    call_data_with_args(
        sel::GET_PAIR,
        &[AbiToken::Address(token_a), AbiToken::Address(token_b)],
    )
}

pub fn get_pool_call(token_a: Address, token_b: Address, fee_ppm: u32) -> Bytes {
    call_data_with_args(
        sel::GET_POOL,
        &[
            AbiToken::Address(token_a),
            AbiToken::Address(token_b),
            AbiToken::Uint(U256::from(fee_ppm)),
        ],
    )
}

pub fn ticks_call(tick: i32) -> Bytes {
    call_data_with_args(sel::TICKS, &[AbiToken::Int(encode_i32(tick))])
}

pub fn pool_key_call(selector: [u8; 4], pool_key: [u8; 32]) -> Bytes {
    call_data_with_args(selector, &[AbiToken::FixedBytes(pool_key.to_vec())])
}

/// Two's-complement word for a signed 32-bit value (int24 on chain).
fn encode_i32(v: i32) -> U256 {
    if v >= 0 {
        U256::from(v as u64)
    } else {
        // Sign-extend into the full word.
        U256::max_value() - U256::from(v.unsigned_abs() as u64) + U256::one()
    }
}

fn word(data: &[u8], index: usize) -> Result<&[u8], EngineError> {
    let start = index * 32;
    data.get(start..start + 32)
        .ok_or_else(|| EngineError::rpc(format!("short return data: {} bytes", data.len())))
}

/// Address from the rightmost 20 bytes of word `index`.
pub fn decode_address(data: &[u8], index: usize) -> Result<Address, EngineError> {
    let w = word(data, index)?;
    Ok(Address::from_slice(&w[12..]))
}

pub fn decode_u256(data: &[u8], index: usize) -> Result<U256, EngineError> {
    Ok(U256::from_big_endian(word(data, index)?))
}

pub fn decode_u128(data: &[u8], index: usize) -> Result<u128, EngineError> {
    let v = decode_u256(data, index)?;
    v.try_into()
        .map_err(|_| EngineError::rpc("uint128 out of range"))
}

pub fn decode_u32(data: &[u8], index: usize) -> Result<u32, EngineError> {
    let v = decode_u256(data, index)?;
    v.try_into().map_err(|_| EngineError::rpc("uint32 out of range"))
}

pub fn decode_u8(data: &[u8], index: usize) -> Result<u8, EngineError> {
    let v = decode_u256(data, index)?;
    v.try_into().map_err(|_| EngineError::rpc("uint8 out of range"))
}

/// Sign-extended int24 from the low three bytes of word `index`.
pub fn decode_i24(data: &[u8], index: usize) -> Result<i32, EngineError> {
    let w = word(data, index)?;
    let raw = ((w[29] as u32) << 16) | ((w[30] as u32) << 8) | (w[31] as u32);
    Ok(if raw & 0x80_0000 != 0 {
        (raw as i32) | !0xFF_FFFF
    } else {
        raw as i32
    })
}

/// int128 from the low half of word `index`, two's complement.
pub fn decode_i128(data: &[u8], index: usize) -> Result<i128, EngineError> {
    let w = word(data, index)?;
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..32]);
    Ok(i128::from_be_bytes(buf))
}

/// int256 that is known to fit i128 (tick liquidity deltas).
pub fn decode_i256_as_i128(data: &[u8], index: usize) -> Result<i128, EngineError> {
    let w = word(data, index)?;
    let negative = w[0] & 0x80 != 0;
    let extension = if negative { 0xff } else { 0x00 };
    if w[..16].iter().any(|b| *b != extension) {
        return Err(EngineError::rpc("int256 out of i128 range"));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..32]);
    Ok(i128::from_be_bytes(buf))
}

/// ABI dynamic string (offset + length + content).
pub fn decode_string(data: &[u8]) -> Result<String, EngineError> {
    let tokens = abi::decode(&[ParamType::String], data)
        .map_err(|e| EngineError::IntrospectionFailed(e.to_string()))?;
    match tokens.into_iter().next() {
        Some(AbiToken::String(s)) => Ok(s),
        _ => Err(EngineError::IntrospectionFailed("not a string".into())),
    }
}

/// `getReserves()` → `(uint112, uint112, uint32)`; the reserves only.
pub fn decode_reserves(data: &[u8]) -> Result<(u128, u128), EngineError> {
    Ok((decode_u128(data, 0)?, decode_u128(data, 1)?))
}

/// `slot0()` → sqrt price (word 0) and tick (word 1); trailing fields ignored.
pub fn decode_slot0(data: &[u8]) -> Result<(U256, i32), EngineError> {
    Ok((decode_u256(data, 0)?, decode_i24(data, 1)?))
}

/// V4 state-view `getSlot0(bytes32)` → `(sqrtPriceX96, tick, protocolFee, lpFee)`.
pub fn decode_v4_slot0(data: &[u8]) -> Result<(U256, i32, u32), EngineError> {
    Ok((
        decode_u256(data, 0)?,
        decode_i24(data, 1)?,
        decode_u32(data, 3)?,
    ))
}

/// `ticks(int24)` → the `liquidityNet` field (word 1 of the tuple).
pub fn decode_tick_liquidity_net(data: &[u8]) -> Result<i128, EngineError> {
    decode_i128(data, 1)
}

/// `keccak256(abi.encode(currency0, currency1, fee, tickSpacing, hooks))`:
/// the 32-byte V4 pool identity.
pub fn v4_pool_key(
    currency0: Address,
    currency1: Address,
    fee_ppm: u32,
    tick_spacing: i32,
    hooks: Address,
) -> [u8; 32] {
    let encoded = abi::encode(&[
        AbiToken::Address(currency0),
        AbiToken::Address(currency1),
        AbiToken::Uint(U256::from(fee_ppm)),
        AbiToken::Int(encode_i32(tick_spacing)),
        AbiToken::Address(hooks),
    ]);
    ethers::utils::keccak256(encoded)
}

/// True when the returned word is the zero address ("no pool").
pub fn is_zero_address_word(data: &[u8]) -> bool {
    decode_address(data, 0)
        .map(|a| a == Address::zero())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_only_call_is_four_bytes() {
        assert_eq!(call_data(sel::SLOT0).len(), 4);
        assert_eq!(call_data(sel::GET_RESERVES).as_ref(), &[0x09, 0x02, 0xf1, 0xac]);
    }

    #[test]
    fn get_pool_call_encodes_three_words() {
        let data = get_pool_call(Address::from([1u8; 20]), Address::from([2u8; 20]), 3000);
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(&data[..4], &sel::GET_POOL);
    }

    #[test]
    fn i24_sign_extension_round_trips() {
        for tick in [-887272, -1, 0, 1, 887272] {
            let data = ticks_call(tick);
            assert_eq!(decode_i24(&data[4..], 0).unwrap(), tick);
        }
    }

    #[test]
    fn i128_decodes_negative_words() {
        let mut w = vec![0xffu8; 32];
        w[16..].copy_from_slice(&(-42i128).to_be_bytes());
        assert_eq!(decode_i128(&w, 0).unwrap(), -42);
        assert_eq!(decode_i256_as_i128(&w, 0).unwrap(), -42);
    }

    #[test]
    fn v4_pool_key_is_deterministic_and_hook_sensitive(){
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let k1 = v4_pool_key(a, b, 3000, 60, Address::zero());
        let k2 = v4_pool_key(a, b, 3000, 60, Address::zero());
        let k3 = v4_pool_key(a, b, 3000, 60, Address::from([9u8; 20]));
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn string_decoding() {
        let encoded = abi::encode(&[AbiToken::String("WETH".into())]);
        assert_eq!(decode_string(&encoded).unwrap(), "WETH");
    }
}

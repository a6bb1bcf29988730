//! Wire-format helpers for arbitrary-precision integers.
//!
//! Every payload that crosses the bus or hits disk carries big integers as
//! decimal strings. JSON numbers top out at 64 bits (and lose integer
//! precision past 2^53 in most consumers), so `U256`, `u128` and `i128`
//! fields are (de)serialized through the modules below via
//! `#[serde(with = "...")]`.

use ethers::types::U256;
use serde::{de, Deserialize, Deserializer, Serializer};

/// `U256` as a decimal string on the wire.
pub mod serde_u256_dec {
    use super::*;

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        U256::from_dec_str(&raw).map_err(de::Error::custom)
    }
}

/// `u128` as a decimal string on the wire.
pub mod serde_u128_dec {
    use super::*;

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<u128>().map_err(de::Error::custom)
    }
}

/// `i128` as a decimal string on the wire (signed: tick liquidity deltas).
pub mod serde_i128_dec {
    use super::*;

    pub fn serialize<S: Serializer>(v: &i128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<i128>().map_err(de::Error::custom)
    }
}

/// Lossy scientific conversion of a `U256` to `f64`.
///
/// Takes the leading digits as mantissa and the remainder as a base-10
/// exponent, so values far beyond `u128::MAX` still convert without panicking.
/// Display and price-derivation only; swap math never touches the result.
pub fn u256_to_f64_lossy(v: U256) -> f64 {
    if v.is_zero() {
        return 0.0;
    }
    let s = v.to_string();
    let len = s.len();
    let take = len.min(18);
    let (mantissa_str, _rest) = s.split_at(take);
    let mantissa = mantissa_str.parse::<f64>().unwrap_or(0.0);
    mantissa * 10f64.powi((len - take) as i32)
}

/// Lowercase `0x…` form of an address; the canonical textual identity used in
/// pool ids and oracle keys.
pub fn address_to_lowercase_hex(addr: ethers::types::Address) -> String {
    format!("{:#x}", addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wire {
        #[serde(with = "serde_u256_dec")]
        big: U256,
        #[serde(with = "serde_i128_dec")]
        signed: i128,
    }

    #[test]
    fn u256_decimal_string_round_trip() {
        let wire = Wire {
            big: U256::from_dec_str("1461446703485210103287273052203988822378723970341").unwrap(),
            signed: -170141183460469231731687303715884105727i128,
        };
        let json = serde_json::to_string(&wire).unwrap();
        let back: Wire = serde_json::from_str(&json).unwrap();
        assert_eq!(back.big, wire.big);
        assert_eq!(back.signed, wire.signed);
    }

    #[test]
    fn lossy_f64_tracks_magnitude() {
        let q96 = U256::from(2).pow(U256::from(96));
        let approx = u256_to_f64_lossy(q96);
        assert!((approx / 2f64.powi(96) - 1.0).abs() < 1e-12);
        assert_eq!(u256_to_f64_lossy(U256::zero()), 0.0);
    }
}

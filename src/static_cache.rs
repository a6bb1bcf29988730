//! On-disk cache for immutable contract reads.
//!
//! One JSON file per chain (`static-cache-<chainId>.json`) holding values
//! that can never change on chain: token metadata, pool token addresses, fee
//! tiers, factory lookups. Only the closed method set below is ever cached;
//! anything dynamic (reserves, slot0, liquidity) must not go through here.
//!
//! Big integers are stored as `{ "__type__": "bigint", "value": "<decimal>" }`
//! so values survive JSON round trips without precision loss. File writes are
//! atomic: serialize to a sibling temp file, then rename over the target.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::{Address, U256};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Methods whose results are immutable and therefore cacheable.
pub const CACHEABLE_METHODS: &[&str] = &[
    "name",
    "symbol",
    "decimals",
    "token0",
    "token1",
    "fee",
    "tickSpacing",
    "getPair",
    "getPool",
    "factory",
    "router",
];

/// A JSON-shaped value with exact big-integer support.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    BigInt(U256),
    Array(Vec<CacheValue>),
    Object(BTreeMap<String, CacheValue>),
}

impl CacheValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CacheValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<U256> {
        match self {
            CacheValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    fn from_wire(value: serde_json::Value) -> Result<Self> {
        Ok(match value {
            serde_json::Value::Null => CacheValue::Null,
            serde_json::Value::Bool(b) => CacheValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CacheValue::Int(i)
                } else {
                    CacheValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => CacheValue::String(s),
            serde_json::Value::Array(items) => CacheValue::Array(
                items
                    .into_iter()
                    .map(Self::from_wire)
                    .collect::<Result<_>>()?,
            ),
            serde_json::Value::Object(map) => {
                let is_bigint = map.get("__type__").and_then(|v| v.as_str()) == Some("bigint");
                if is_bigint {
                    let raw = map
                        .get("value")
                        .and_then(|v| v.as_str())
                        .context("bigint marker without value")?;
                    CacheValue::BigInt(
                        U256::from_dec_str(raw).context("malformed bigint in cache")?,
                    )
                } else {
                    let mut out = BTreeMap::new();
                    for (k, v) in map {
                        out.insert(k, Self::from_wire(v)?);
                    }
                    CacheValue::Object(out)
                }
            }
        })
    }
}

impl Serialize for CacheValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CacheValue::Null => serializer.serialize_unit(),
            CacheValue::Bool(b) => serializer.serialize_bool(*b),
            CacheValue::Int(i) => serializer.serialize_i64(*i),
            CacheValue::Float(f) => serializer.serialize_f64(*f),
            CacheValue::String(s) => serializer.serialize_str(s),
            CacheValue::BigInt(v) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("__type__", "bigint")?;
                map.serialize_entry("value", &v.to_string())?;
                map.end()
            }
            CacheValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CacheValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CacheValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        CacheValue::from_wire(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: CacheValue,
    /// Unix millis of the write.
    timestamp: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    chain_id: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    entries: BTreeMap<String, CacheEntry>,
}

/// Per-chain static-read cache backed by one JSON file.
pub struct StaticCache {
    chain_id: u64,
    path: PathBuf,
    created_at: DateTime<Utc>,
    entries: DashMap<String, CacheEntry>,
}

impl StaticCache {
    /// Opens (or initialises) the cache for `chain_id` under `dir`.
    pub fn open(dir: impl AsRef<Path>, chain_id: u64) -> Result<Self> {
        let path = dir.as_ref().join(format!("static-cache-{}.json", chain_id));
        let entries = DashMap::new();
        let mut created_at = Utc::now();
        if path.exists() {
            match std::fs::read(&path)
                .context("read cache file")
                .and_then(|bytes| {
                    serde_json::from_slice::<CacheFile>(&bytes).context("parse cache file")
                }) {
                Ok(file) if file.chain_id == chain_id => {
                    created_at = file.created_at;
                    for (k, v) in file.entries {
                        entries.insert(k, v);
                    }
                    debug!(
                        "[StaticCache] loaded {} entries for chain {}",
                        entries.len(),
                        chain_id
                    );
                }
                Ok(file) => {
                    warn!(
                        "[StaticCache] {} belongs to chain {}, starting fresh",
                        path.display(),
                        file.chain_id
                    );
                }
                Err(e) => {
                    warn!("[StaticCache] unreadable cache {}: {:#}", path.display(), e);
                }
            }
        }
        Ok(Self {
            chain_id,
            path,
            created_at,
            entries,
        })
    }

    /// `contract:<address>:<method>:<argsJson>`, or `None` when the method is
    /// not in the cacheable set.
    pub fn contract_key(
        address: Address,
        method: &str,
        args: &serde_json::Value,
    ) -> Option<String> {
        if !CACHEABLE_METHODS.contains(&method) {
            return None;
        }
        Some(format!("contract:{:#x}:{}:{}", address, method, args))
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts and persists. A failed persist keeps the in-memory entry and
    /// logs; the next put retries the whole file.
    pub fn put(&self, key: String, value: CacheValue) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                timestamp: Utc::now().timestamp_millis() as u64,
            },
        );
        if let Err(e) = self.persist() {
            warn!("[StaticCache] persist failed for chain {}: {:#}", self.chain_id, e);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let file = CacheFile {
            chain_id: self.chain_id,
            created_at: self.created_at,
            updated_at: Utc::now(),
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes).context("write temp cache file")?;
        std::fs::rename(&tmp, &self.path).context("rename cache file into place")?;
        Ok(())
    }
}

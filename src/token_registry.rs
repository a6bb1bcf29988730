//! Per-chain token registry.
//!
//! Resolves `(chainId, address)` to canonical token metadata. Resolution
//! order: already registered, then the configured trusted list, then one
//! memoised ERC-20 introspection (`name`, `symbol`, `decimals`) batched into
//! a single multicall. Tokens are immutable once registered and shared via
//! `Arc`; nothing ever unregisters them at runtime.

use crate::abi::{self, sel};
use crate::errors::EngineError;
use crate::multicall::{Call, Multicall};
use crate::static_cache::{CacheValue, StaticCache};
use crate::types::Token;
use dashmap::DashMap;
use ethers::middleware::Middleware;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Trusted-list entry seeded from configuration.
#[derive(Debug, Clone)]
pub struct TrustedTokenSeed {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

pub struct TokenRegistry<M> {
    chain_id: u64,
    multicall: Arc<Multicall<M>>,
    cache: Option<Arc<StaticCache>>,
    tokens: DashMap<Address, Arc<Token>>,
    trusted: HashMap<Address, TrustedTokenSeed>,
}

impl<M: Middleware + 'static> TokenRegistry<M> {
    pub fn new(
        chain_id: u64,
        multicall: Arc<Multicall<M>>,
        trusted_seeds: Vec<TrustedTokenSeed>,
        cache: Option<Arc<StaticCache>>,
    ) -> Self {
        let trusted = trusted_seeds
            .into_iter()
            .map(|seed| (seed.address, seed))
            .collect();
        Self {
            chain_id,
            multicall,
            cache,
            tokens: DashMap::new(),
            trusted,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Returns the registered token, registering it first if needed.
    ///
    /// Exactly one on-chain metadata read ever happens per unknown address;
    /// later calls hit the in-memory map (or the static cache across
    /// restarts).
    pub async fn ensure_registered(&self, address: Address) -> Result<Arc<Token>, EngineError> {
        if let Some(existing) = self.tokens.get(&address) {
            return Ok(Arc::clone(&existing));
        }

        if let Some(seed) = self.trusted.get(&address) {
            let token = Arc::new(Token {
                chain_id: self.chain_id,
                address,
                symbol: seed.symbol.clone(),
                name: seed.name.clone(),
                decimals: seed.decimals,
                trusted: true,
            });
            self.tokens.insert(address, Arc::clone(&token));
            return Ok(token);
        }

        let (name, symbol, decimals) = self.introspect_erc20(address).await?;
        warn!(
            "[TokenRegistry] ⚠️ unknown token {:#x} on chain {} registered as untrusted ({})",
            address, self.chain_id, symbol
        );
        let token = Arc::new(Token {
            chain_id: self.chain_id,
            address,
            symbol,
            name,
            decimals,
            trusted: false,
        });
        self.tokens.insert(address, Arc::clone(&token));
        Ok(token)
    }

    pub fn get_by_address(&self, address: Address) -> Option<Arc<Token>> {
        self.tokens.get(&address).map(|t| Arc::clone(&t))
    }

    /// Advisory lookup: first registered token carrying this symbol.
    pub fn get_by_symbol(&self, symbol: &str) -> Option<Arc<Token>> {
        self.tokens
            .iter()
            .find(|entry| entry.value().symbol == symbol)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    async fn introspect_erc20(
        &self,
        address: Address,
    ) -> Result<(String, String, u8), EngineError> {
        if let Some(cached) = self.cached_metadata(address) {
            debug!("[TokenRegistry] cache hit for token {:#x}", address);
            return Ok(cached);
        }

        let calls = vec![
            Call {
                target: address,
                call_data: abi::call_data(sel::NAME),
            },
            Call {
                target: address,
                call_data: abi::call_data(sel::SYMBOL),
            },
            Call {
                target: address,
                call_data: abi::call_data(sel::DECIMALS),
            },
        ];
        let results = self.multicall.run(calls).await?;
        if results.len() != 3 || results.iter().any(|r| r.is_empty()) {
            return Err(EngineError::IntrospectionFailed(format!(
                "metadata read reverted for {:#x}",
                address
            )));
        }

        let name = abi::decode_string(&results[0])?;
        let symbol = abi::decode_string(&results[1])?;
        let decimals = abi::decode_u8(&results[2], 0)
            .map_err(|e| EngineError::IntrospectionFailed(e.to_string()))?;

        self.store_metadata(address, &name, &symbol, decimals);
        Ok((name, symbol, decimals))
    }

    fn cached_metadata(&self, address: Address) -> Option<(String, String, u8)> {
        let cache = self.cache.as_ref()?;
        let args = serde_json::json!([]);
        let name = cache
            .get(&StaticCache::contract_key(address, "name", &args)?)?
            .as_str()?
            .to_string();
        let symbol = cache
            .get(&StaticCache::contract_key(address, "symbol", &args)?)?
            .as_str()?
            .to_string();
        let decimals = cache
            .get(&StaticCache::contract_key(address, "decimals", &args)?)?
            .as_int()?;
        Some((name, symbol, u8::try_from(decimals).ok()?))
    }

    fn store_metadata(&self, address: Address, name: &str, symbol: &str, decimals: u8) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let args = serde_json::json!([]);
        if let Some(key) = StaticCache::contract_key(address, "name", &args) {
            cache.put(key, CacheValue::String(name.to_string()));
        }
        if let Some(key) = StaticCache::contract_key(address, "symbol", &args) {
            cache.put(key, CacheValue::String(symbol.to_string()));
        }
        if let Some(key) = StaticCache::contract_key(address, "decimals", &args) {
            cache.put(key, CacheValue::Int(decimals as i64));
        }
    }
}

//! Configuration loading.
//!
//! Layered sources: `config/default.toml`, then `config/<RUN_MODE>.toml`,
//! then `POOLWATCH__`-prefixed environment variables (double underscore as
//! the path separator). Two settings are required from the environment for
//! any real deployment: the enabled platform list and each enabled
//! platform's WebSocket RPC URL; `validate()` enforces both.

use crate::rpc::RateLimitConfig;
use crate::token_registry::TrustedTokenSeed;
use config::{Config, ConfigError, Environment, File};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Canonical Multicall3 deployment, identical on most chains.
const DEFAULT_MULTICALL3: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Platforms to spawn watchers for; must all be keys of `platforms`.
    #[serde(default)]
    pub enabled_platforms: Vec<String>,
    #[serde(default)]
    pub platforms: HashMap<String, PlatformConfig>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_cache_dir() -> String {
    "./cache".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_requests_per_second() -> u32 {
    20
}
fn default_batch_delay_ms() -> u64 {
    200
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            requests_per_second: default_requests_per_second(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(s: &RateLimitSettings) -> Self {
        RateLimitConfig {
            max_concurrent: s.max_concurrent,
            requests_per_second: s.requests_per_second,
            batch_delay: Duration::from_millis(s.batch_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    pub chain_id: u64,
    /// WebSocket RPC endpoint; overridable via
    /// `POOLWATCH__PLATFORMS__<name>__WS_RPC_URL`.
    #[serde(default)]
    pub ws_rpc_url: String,
    pub native_symbol: String,
    /// Wrapped-native token address.
    pub wrapped_native: String,
    #[serde(default)]
    pub preferred_borrow_tokens: Vec<String>,
    /// Trusted token seed list.
    #[serde(default)]
    pub tokens: Vec<TokenSeed>,
    pub dexes: Vec<DexEntry>,
    #[serde(default = "default_multicall")]
    pub multicall_address: String,
    /// Symbol pairs to discover pools for at startup.
    #[serde(default)]
    pub watched_pairs: Vec<(String, String)>,
    #[serde(default)]
    pub thresholds: ArbitrageThresholds,
}

fn default_multicall() -> String {
    DEFAULT_MULTICALL3.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenSeed {
    pub address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub decimals: u8,
    /// Stable-coin flag; stable seeds become oracle anchors at 1.0.
    #[serde(default)]
    pub stable: bool,
}

/// One configured DEX. The protocol section is tagged `v2`/`v3`/`v4`.
#[derive(Debug, Deserialize, Clone)]
pub struct DexEntry {
    pub name: String,
    #[serde(flatten)]
    pub protocol: DexProtocolConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DexProtocolConfig {
    V2(V2Config),
    V3(V3Config),
    V4(V4Config),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct V2Config {
    pub factory: String,
    pub router: String,
    #[serde(default)]
    pub init_code_hash: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct V3Config {
    pub factory: String,
    pub router: String,
    pub quoter: String,
    #[serde(default)]
    pub init_code_hash: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct V4Config {
    pub pool_manager: String,
    pub state_view: String,
    pub quoter: String,
}

/// Carried for the downstream arbitrage layer; the engine itself only loads
/// and validates these.
#[derive(Debug, Deserialize, Clone)]
pub struct ArbitrageThresholds {
    #[serde(default = "default_min_gross_profit_usd")]
    pub min_gross_profit_usd: f64,
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
}

fn default_min_gross_profit_usd() -> f64 {
    10.0
}
fn default_max_slippage_bps() -> u32 {
    50
}
fn default_min_liquidity_usd() -> f64 {
    10_000.0
}
fn default_max_hops() -> u32 {
    3
}

impl Default for ArbitrageThresholds {
    fn default() -> Self {
        Self {
            min_gross_profit_usd: default_min_gross_profit_usd(),
            max_slippage_bps: default_max_slippage_bps(),
            min_liquidity_usd: default_min_liquidity_usd(),
            max_hops: default_max_hops(),
        }
    }
}

impl Settings {
    /// Loads the layered configuration and validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "default".into());
        let settings: Settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("POOLWATCH").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_platforms.is_empty() {
            return Err(ConfigError::Message(
                "no enabled platforms configured (set POOLWATCH__ENABLED_PLATFORMS)".into(),
            ));
        }
        for name in &self.enabled_platforms {
            let platform = self.platforms.get(name).ok_or_else(|| {
                ConfigError::Message(format!("enabled platform {} has no configuration", name))
            })?;
            if platform.ws_rpc_url.is_empty() {
                return Err(ConfigError::Message(format!(
                    "platform {} is missing its WebSocket RPC URL",
                    name
                )));
            }
            platform.validate(name)?;
        }
        Ok(())
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformConfig> {
        self.platforms.get(name)
    }
}

impl PlatformConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        self.wrapped_native.parse::<Address>().map_err(|_| {
            ConfigError::Message(format!("platform {}: bad wrapped_native address", name))
        })?;
        self.multicall_address.parse::<Address>().map_err(|_| {
            ConfigError::Message(format!("platform {}: bad multicall address", name))
        })?;
        if self.dexes.is_empty() {
            return Err(ConfigError::Message(format!(
                "platform {} configures no DEXes",
                name
            )));
        }
        for seed in &self.tokens {
            seed.address.parse::<Address>().map_err(|_| {
                ConfigError::Message(format!(
                    "platform {}: bad token address {}",
                    name, seed.address
                ))
            })?;
        }
        Ok(())
    }

    pub fn multicall(&self) -> Address {
        self.multicall_address
            .parse()
            .expect("validated multicall address")
    }

    pub fn trusted_seeds(&self) -> Vec<TrustedTokenSeed> {
        self.tokens
            .iter()
            .filter_map(|seed| {
                let address = seed.address.parse::<Address>().ok()?;
                Some(TrustedTokenSeed {
                    address,
                    symbol: seed.symbol.clone(),
                    name: seed.name.clone().unwrap_or_else(|| seed.symbol.clone()),
                    decimals: seed.decimals,
                })
            })
            .collect()
    }

    /// `(chain_id, address)` oracle anchors from the stable-flagged seeds.
    pub fn stable_anchors(&self) -> Vec<(u64, Address)> {
        self.tokens
            .iter()
            .filter(|seed| seed.stable)
            .filter_map(|seed| Some((self.chain_id, seed.address.parse::<Address>().ok()?)))
            .collect()
    }
}

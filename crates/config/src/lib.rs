mod error;
mod keys;
mod level;

pub use error::ConfigError;
pub use keys::PrivateKeyHex;
pub use level::LogLevel;

use serde::Deserialize;
use std::path::PathBuf;

/// Flat structure for loading from environment variables.
/// This works better with envy than nested structs.
#[derive(Debug, Deserialize)]
struct EnvConfig {
    #[serde(default = "default_log_level")]
    log_level: String,

    ws_urls_para: String,

    ws_urls_relay: String,

    #[serde(default = "default_abi_path")]
    oracle_master_contract_abi_path: String,

    debug_mode: String,

    #[serde(default = "default_era_delay_time")]
    era_delay_time: u64,

    era_duration_in_blocks: u64,

    era_duration_in_seconds: u64,

    #[serde(default = "default_era_update_delay")]
    era_update_delay: u64,

    #[serde(default = "default_frequency_of_requests")]
    frequency_of_requests: u64,

    #[serde(default = "default_gas_limit")]
    gas_limit: u64,

    #[serde(default = "default_max_priority_fee_per_gas")]
    max_priority_fee_per_gas: u128,

    #[serde(default = "default_prometheus_metrics_port")]
    prometheus_metrics_port: u16,

    #[serde(default)]
    prometheus_metrics_prefix: String,

    #[serde(default = "default_ss58_format")]
    ss58_format: u16,

    #[serde(default = "default_timeout")]
    timeout: u64,

    type_registry_preset: String,

    #[serde(default = "default_waiting_time_before_shutdown")]
    waiting_time_before_shutdown: u64,

    contract_address: String,

    #[serde(default)]
    oracle_private_key_path: Option<String>,

    #[serde(default)]
    oracle_private_key: Option<String>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_abi_path() -> String {
    "./assets/OracleMaster.json".to_string()
}

fn default_era_delay_time() -> u64 {
    600
}

fn default_era_update_delay() -> u64 {
    360
}

fn default_frequency_of_requests() -> u64 {
    180
}

fn default_gas_limit() -> u64 {
    10_000_000
}

fn default_max_priority_fee_per_gas() -> u128 {
    0
}

fn default_prometheus_metrics_port() -> u16 {
    8000
}

fn default_ss58_format() -> u16 {
    42
}

fn default_timeout() -> u64 {
    60
}

fn default_waiting_time_before_shutdown() -> u64 {
    600
}

/// Validated service parameters, built once at startup and immutable for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub log_level: LogLevel,
    pub ws_urls_para: Vec<String>,
    pub ws_urls_relay: Vec<String>,
    pub oracle_master_contract_abi_path: PathBuf,
    /// Anything other than the literal `false` (case-insensitive) enables
    /// debug mode, i.e. dry-run only. Historical semantics, kept verbatim.
    pub debug_mode: bool,
    pub era_delay_time: u64,
    pub era_duration_in_blocks: u64,
    pub era_duration_in_seconds: u64,
    pub era_update_delay: u64,
    pub frequency_of_requests: u64,
    pub gas_limit: u64,
    pub max_priority_fee_per_gas: u128,
    pub prometheus_metrics_port: u16,
    pub prometheus_metrics_prefix: String,
    pub ss58_format: u16,
    pub timeout: u64,
    pub type_registry_preset: String,
    pub waiting_time_before_shutdown: u64,
    pub contract_address: String,
    pub oracle_private_key: PrivateKeyHex,
}

impl OracleConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// Required: WS_URLS_PARA, WS_URLS_RELAY, DEBUG_MODE,
    /// ERA_DURATION_IN_BLOCKS, ERA_DURATION_IN_SECONDS, TYPE_REGISTRY_PRESET,
    /// CONTRACT_ADDRESS, and one of ORACLE_PRIVATE_KEY_PATH /
    /// ORACLE_PRIVATE_KEY.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = envy::from_env::<EnvConfig>()?;
        Self::from_env_config(env)
    }

    fn from_env_config(env: EnvConfig) -> Result<Self, ConfigError> {
        let log_level = LogLevel::parse(&env.log_level)?;

        let ws_urls_para = split_urls("WS_URLS_PARA", &env.ws_urls_para)?;
        let ws_urls_relay = split_urls("WS_URLS_RELAY", &env.ws_urls_relay)?;

        let abi_path = PathBuf::from(&env.oracle_master_contract_abi_path);
        if !abi_path.exists() {
            return Err(ConfigError::InvalidParameter(format!(
                "The file with the ABI was not found: {}",
                abi_path.display()
            )));
        }

        let debug_mode = !env.debug_mode.to_lowercase().eq("false");

        require_positive("ERA_DURATION_IN_BLOCKS", env.era_duration_in_blocks)?;
        require_positive("ERA_DURATION_IN_SECONDS", env.era_duration_in_seconds)?;
        require_positive("ERA_UPDATE_DELAY", env.era_update_delay)?;
        require_positive("FREQUENCY_OF_REQUESTS", env.frequency_of_requests)?;
        require_positive("GAS_LIMIT", env.gas_limit)?;
        require_positive(
            "PROMETHEUS_METRICS_PORT",
            env.prometheus_metrics_port as u64,
        )?;

        if env.type_registry_preset.is_empty() {
            return Err(ConfigError::InvalidParameter(
                "The 'TYPE_REGISTRY_PRESET' parameter is not provided".to_string(),
            ));
        }

        validate_contract_address(&env.contract_address)?;

        let oracle_private_key = PrivateKeyHex::resolve(
            env.oracle_private_key_path.as_deref(),
            env.oracle_private_key.as_deref(),
        )?;

        Ok(OracleConfig {
            log_level,
            ws_urls_para,
            ws_urls_relay,
            oracle_master_contract_abi_path: abi_path,
            debug_mode,
            era_delay_time: env.era_delay_time,
            era_duration_in_blocks: env.era_duration_in_blocks,
            era_duration_in_seconds: env.era_duration_in_seconds,
            era_update_delay: env.era_update_delay,
            frequency_of_requests: env.frequency_of_requests,
            gas_limit: env.gas_limit,
            max_priority_fee_per_gas: env.max_priority_fee_per_gas,
            prometheus_metrics_port: env.prometheus_metrics_port,
            prometheus_metrics_prefix: env.prometheus_metrics_prefix,
            ss58_format: env.ss58_format,
            timeout: env.timeout,
            type_registry_preset: env.type_registry_preset,
            waiting_time_before_shutdown: env.waiting_time_before_shutdown,
            contract_address: env.contract_address,
            oracle_private_key,
        })
    }
}

fn require_positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidParameter(format!(
            "The '{name}' parameter must be a positive integer"
        )));
    }
    Ok(())
}

fn split_urls(name: &str, raw: &str) -> Result<Vec<String>, ConfigError> {
    let urls: Vec<String> = raw.split(',').map(str::to_string).collect();
    for candidate in &urls {
        let parsed = url::Url::parse(candidate).map_err(|e| {
            ConfigError::InvalidParameter(format!("Invalid url in '{name}': '{candidate}': {e}"))
        })?;
        let valid = matches!(parsed.scheme(), "ws" | "wss")
            && parsed.host_str().is_some()
            && parsed.query().is_none()
            && parsed.fragment().is_none();
        if !valid {
            return Err(ConfigError::InvalidParameter(format!(
                "Invalid urls were found in the '{name}' parameter"
            )));
        }
    }
    Ok(urls)
}

fn validate_contract_address(address: &str) -> Result<(), ConfigError> {
    let hex_part = address.strip_prefix("0x").ok_or_else(|| {
        ConfigError::InvalidParameter(format!(
            "The OracleMaster address must be 0x-prefixed: {address}"
        ))
    })?;
    if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
        return Err(ConfigError::InvalidParameter(format!(
            "The OracleMaster address is not a valid 20-byte hex address: {address}"
        )));
    }
    Ok(())
}

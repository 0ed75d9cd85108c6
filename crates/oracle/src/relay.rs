// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay-chain session: URL-rotating connection management and the typed
//! storage reads the report reader and era loop depend on.

use crate::error::OracleError;
use crate::metrics::Metrics;
use crate::types::{EraInfo, LedgerData};
use parity_scale_codec::Decode;
use sp_core::crypto::{AccountId32, Ss58Codec};
use staking_oracle_config::OracleConfig;
use std::sync::Arc;
use std::time::Duration;
use subxt::config::RpcConfigFor;
use subxt::utils::H256;
use subxt::{OnlineClient, OnlineClientAtBlock, SubstrateConfig};
use subxt_rpcs::client::reconnecting_rpc_client::{
    ExponentialBackoff, RpcClient as ReconnectingRpcClient,
};
use subxt_rpcs::{LegacyRpcMethods, RpcClient};

/// Type alias for LegacyRpcMethods with the correct RpcConfig wrapper.
pub type RelayLegacyRpc = LegacyRpcMethods<RpcConfigFor<SubstrateConfig>>;

/// Attempts to create a session before startup gives up.
const MAX_ATTEMPTS_TO_RECONNECT: u32 = 20;

/// Per-URL time limit for opening a websocket and passing the liveness probe.
const CONNECT_TIMEOUT_SECS: u64 = 60;

/// Relay-chain operations the controller and report reader depend on.
///
/// The production implementation is [`RelaySession`]; tests drive the
/// controller with scripted in-memory chains.
#[allow(async_fn_in_trait)]
pub trait RelayChain {
    /// `Staking.ActiveEra` at the current best block.
    async fn active_era(&self) -> Result<EraInfo, OracleError>;

    /// `Staking.ActiveEra` at a pinned block.
    async fn active_era_at(&self, hash: H256) -> Result<EraInfo, OracleError>;

    async fn finalized_head_number(&self) -> Result<u64, OracleError>;

    async fn block_hash(&self, number: u64) -> Result<H256, OracleError>;

    /// `System.Account.data.free` at a pinned block; an absent account is an
    /// error.
    async fn free_balance(&self, stash: &AccountId32, hash: H256) -> Result<u128, OracleError>;

    /// Whether the stash has its own `Staking.Nominators` entry.
    async fn is_nominator(&self, stash: &AccountId32, hash: H256) -> Result<bool, OracleError>;

    /// Whether the stash appears in `Session.Validators`.
    async fn is_session_validator(
        &self,
        stash: &AccountId32,
        hash: H256,
    ) -> Result<bool, OracleError>;

    /// `Staking.Bonded(stash)`, or `None` when the stash has no bond.
    async fn bonded_controller(
        &self,
        stash: &AccountId32,
        hash: H256,
    ) -> Result<Option<AccountId32>, OracleError>;

    /// `Staking.Ledger(controller)`; an absent ledger for a bonded controller
    /// is an error, not a missing-ledger case.
    async fn ledger(&self, controller: &AccountId32, hash: H256)
    -> Result<LedgerData, OracleError>;

    /// Number of `prior` entries in `Staking.SlashingSpans(controller)`, 0
    /// when absent.
    async fn slashing_span_count(
        &self,
        controller: &AccountId32,
        hash: H256,
    ) -> Result<u32, OracleError>;

    /// Replace the underlying connection, retrying the URL list forever.
    async fn reconnect(&mut self);
}

// ================================================================================================
// SCALE decode types
// ================================================================================================

#[derive(Debug, Clone, Decode)]
struct ActiveEraInfo {
    index: u32,
    start: Option<u64>,
}

/// Unlocking chunk in the staking ledger (compact encoded).
#[derive(Debug, Clone, Decode)]
struct UnlockChunkCompact {
    #[codec(compact)]
    value: u128,
    #[codec(compact)]
    era: u32,
}

/// Unlocking chunk in the staking ledger (non-compact, older runtimes).
#[derive(Debug, Clone, Decode)]
struct UnlockChunkNonCompact {
    value: u128,
    era: u32,
}

/// Staking ledger (modern runtime).
#[derive(Debug, Clone, Decode)]
#[allow(dead_code)]
struct StakingLedger {
    stash: [u8; 32],
    #[codec(compact)]
    total: u128,
    #[codec(compact)]
    active: u128,
    unlocking: Vec<UnlockChunkCompact>,
}

/// Staking ledger (legacy runtime with claimed rewards, compact chunks).
#[derive(Debug, Clone, Decode)]
#[allow(dead_code)]
struct StakingLedgerLegacyCompact {
    stash: [u8; 32],
    #[codec(compact)]
    total: u128,
    #[codec(compact)]
    active: u128,
    unlocking: Vec<UnlockChunkCompact>,
    legacy_claimed_rewards: Vec<u32>,
}

/// Staking ledger (very old runtime, non-compact chunks).
#[derive(Debug, Clone, Decode)]
#[allow(dead_code)]
struct StakingLedgerOld {
    stash: [u8; 32],
    #[codec(compact)]
    total: u128,
    #[codec(compact)]
    active: u128,
    unlocking: Vec<UnlockChunkNonCompact>,
    claimed_rewards: Vec<u32>,
}

#[derive(Debug, Clone, Decode)]
#[allow(dead_code)]
struct SlashingSpans {
    span_index: u32,
    last_start: u32,
    last_nonzero_slash: u32,
    prior: Vec<u32>,
}

#[derive(Debug, Clone, Decode)]
#[allow(dead_code)]
struct AccountData {
    free: u128,
    reserved: u128,
    frozen: u128,
    flags: u128,
}

#[derive(Debug, Clone, Decode)]
#[allow(dead_code)]
struct AccountInfo {
    nonce: u32,
    consumers: u32,
    providers: u32,
    sufficients: u32,
    data: AccountData,
}

// ================================================================================================
// Session
// ================================================================================================

pub struct RelaySession {
    urls: Vec<String>,
    timeout: Duration,
    ss58_format: u16,
    type_registry_preset: String,
    metrics: Arc<Metrics>,
    client: OnlineClient<SubstrateConfig>,
    rpc: RelayLegacyRpc,
}

impl RelaySession {
    /// Bounded startup connect: up to [`MAX_ATTEMPTS_TO_RECONNECT`] passes
    /// over the URL list, fatal on exhaustion.
    pub async fn connect_forcibly(
        config: &OracleConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, OracleError> {
        let timeout = Duration::from_secs(config.timeout);
        for _ in 0..MAX_ATTEMPTS_TO_RECONNECT {
            match Self::connect_once(&config.ws_urls_relay, &config.type_registry_preset).await {
                Ok((client, rpc)) => {
                    return Ok(RelaySession {
                        urls: config.ws_urls_relay.clone(),
                        timeout,
                        ss58_format: config.ss58_format,
                        type_registry_preset: config.type_registry_preset.clone(),
                        metrics,
                        client,
                        rpc,
                    });
                }
                Err(e @ OracleError::Fatal(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Error: {e}");
                    tracing::info!("Timeout: {} seconds", timeout.as_secs());
                    tokio::time::sleep(timeout).await;
                }
            }
        }

        Err(OracleError::Fatal(
            "Failed to create a relay chain session".to_string(),
        ))
    }

    /// One pass over the URL list, returning the first session whose
    /// liveness probe (any round trip) succeeds.
    async fn connect_once(
        urls: &[String],
        type_registry_preset: &str,
    ) -> Result<(OnlineClient<SubstrateConfig>, RelayLegacyRpc), OracleError> {
        for url in urls {
            match Self::open(url, type_registry_preset).await {
                Ok(pair) => {
                    tracing::info!("[relay] The connection was made at the address: {url}");
                    return Ok(pair);
                }
                Err(e @ OracleError::Fatal(_)) => return Err(e),
                Err(e) => tracing::warn!("[relay] Failed to connect to {url}: {e}"),
            }
        }

        Err(OracleError::relay("failed to connect to any node"))
    }

    async fn open(
        url: &str,
        type_registry_preset: &str,
    ) -> Result<(OnlineClient<SubstrateConfig>, RelayLegacyRpc), OracleError> {
        let subxt_config = legacy_types_config(type_registry_preset)?;

        let connect = ReconnectingRpcClient::builder()
            .retry_policy(
                ExponentialBackoff::from_millis(100).max_delay(Duration::from_secs(10)),
            )
            .request_timeout(Duration::from_secs(30))
            .build(url);
        let reconnecting = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect,
        )
        .await
        .map_err(|_| {
            OracleError::relay(format!(
                "connection to {url} timed out after {CONNECT_TIMEOUT_SECS} seconds"
            ))
        })?
        .map_err(|e| OracleError::relay(format!("failed to connect: {e}")))?;

        let rpc_client = RpcClient::new(reconnecting);
        let rpc: RelayLegacyRpc = LegacyRpcMethods::new(rpc_client.clone());

        // Liveness probe.
        rpc.chain_get_finalized_head()
            .await
            .map_err(|e| OracleError::relay(format!("liveness probe failed: {e}")))?;

        let client = OnlineClient::from_rpc_client_with_config(subxt_config, rpc_client)
            .await
            .map_err(|e| OracleError::relay(format!("failed to initialise the client: {e}")))?;

        Ok((client, rpc))
    }

    pub fn ss58_of(&self, account: &AccountId32) -> String {
        account.to_ss58check_with_version(self.ss58_format.into())
    }

    fn count<T>(&self, res: Result<T, OracleError>) -> Result<T, OracleError> {
        if res.is_err() {
            self.metrics.relay_exceptions_count.inc();
        }
        res
    }

    async fn at(
        &self,
        hash: H256,
    ) -> Result<OnlineClientAtBlock<SubstrateConfig>, OracleError> {
        self.client
            .at_block(hash)
            .await
            .map_err(|e| OracleError::relay(format!("failed to pin block {hash:#x}: {e}")))
    }

    async fn best_head_hash(&self) -> Result<H256, OracleError> {
        self.rpc
            .chain_get_block_hash(None)
            .await
            .map_err(|e| OracleError::relay(format!("failed to get the chain head: {e}")))?
            .ok_or_else(|| OracleError::relay("the chain head is unknown"))
    }

    async fn active_era_inner(&self, at: Option<H256>) -> Result<EraInfo, OracleError> {
        let hash = match at {
            Some(hash) => hash,
            None => self.best_head_hash().await?,
        };
        let at_block = self.at(hash).await?;
        let storage_addr = subxt::dynamic::storage::<(), ()>("Staking", "ActiveEra");
        let value = at_block
            .storage()
            .fetch(storage_addr, ())
            .await
            .map_err(|e| OracleError::relay(format!("Failed to get the active era: {e}")))?;

        let raw_bytes = value.into_bytes();
        // ActiveEra decodes either bare or behind an Option wrapper
        // depending on the runtime.
        if let Ok(era_info) = ActiveEraInfo::decode(&mut &raw_bytes[..]) {
            return Ok(EraInfo {
                index: u64::from(era_info.index),
                start: era_info.start,
            });
        }
        if raw_bytes.len() > 1
            && raw_bytes[0] == 1
            && let Ok(era_info) = ActiveEraInfo::decode(&mut &raw_bytes[1..])
        {
            return Ok(EraInfo {
                index: u64::from(era_info.index),
                start: era_info.start,
            });
        }

        Err(OracleError::relay("Staking.ActiveEra is None"))
    }
}

/// Map the `TYPE_REGISTRY_PRESET` name onto the legacy type registry fed to
/// the client; presets without historic type churn run without one.
fn legacy_types_config(preset: &str) -> Result<SubstrateConfig, OracleError> {
    match preset {
        "polkadot" => Ok(SubstrateConfig::builder()
            .set_legacy_types(frame_decode::legacy_types::polkadot::relay_chain())
            .build()),
        "kusama" => Ok(SubstrateConfig::builder()
            .set_legacy_types(frame_decode::legacy_types::kusama::relay_chain())
            .build()),
        "westend" | "rococo" | "paseo" | "substrate" | "development" => {
            Ok(SubstrateConfig::new())
        }
        other => Err(OracleError::Fatal(format!(
            "Unsupported type registry preset: {other}"
        ))),
    }
}

impl RelayChain for RelaySession {
    async fn active_era(&self) -> Result<EraInfo, OracleError> {
        let res = self.active_era_inner(None).await;
        self.count(res)
    }

    async fn active_era_at(&self, hash: H256) -> Result<EraInfo, OracleError> {
        let res = self.active_era_inner(Some(hash)).await;
        self.count(res)
    }

    async fn finalized_head_number(&self) -> Result<u64, OracleError> {
        let res = async {
            let hash = self.rpc.chain_get_finalized_head().await.map_err(|e| {
                OracleError::relay(format!("Failed to get the finalised head: {e}"))
            })?;
            let header = self
                .rpc
                .chain_get_header(Some(hash))
                .await
                .map_err(|e| {
                    OracleError::relay(format!("Failed to get the finalised head header: {e}"))
                })?
                .ok_or_else(|| OracleError::relay("the finalised head header is missing"))?;
            Ok(u64::from(header.number))
        }
        .await;
        self.count(res)
    }

    async fn block_hash(&self, number: u64) -> Result<H256, OracleError> {
        let res = async {
            let number = u32::try_from(number).map_err(|_| {
                OracleError::relay(format!("block number {number} out of range"))
            })?;
            self.rpc
                .chain_get_block_hash(Some(number.into()))
                .await
                .map_err(|e| OracleError::relay(format!("Can't find the required block: {e}")))?
                .ok_or_else(|| {
                    OracleError::relay(format!("Can't find the required block: {number}"))
                })
        }
        .await;
        self.count(res)
    }

    async fn free_balance(&self, stash: &AccountId32, hash: H256) -> Result<u128, OracleError> {
        let res = async {
            let at_block = self.at(hash).await?;
            let stash_bytes: [u8; 32] = *stash.as_ref();
            let storage_addr = subxt::dynamic::storage::<_, ()>("System", "Account");
            let value = at_block
                .storage()
                .fetch(storage_addr, (stash_bytes,))
                .await
                .map_err(|e| {
                    OracleError::relay(format!(
                        "Failed to get the account '{}' info: {e}",
                        self.ss58_of(stash)
                    ))
                })?;
            let raw_bytes = value.into_bytes();
            let info = AccountInfo::decode(&mut &raw_bytes[..]).map_err(|e| {
                OracleError::relay(format!(
                    "Failed to decode the account '{}' info: {e}",
                    self.ss58_of(stash)
                ))
            })?;
            Ok(info.data.free)
        }
        .await;
        self.count(res)
    }

    async fn is_nominator(&self, stash: &AccountId32, hash: H256) -> Result<bool, OracleError> {
        let at_block = self.count(self.at(hash).await)?;
        let stash_bytes: [u8; 32] = *stash.as_ref();
        let storage_addr = subxt::dynamic::storage::<_, ()>("Staking", "Nominators");
        // A keyed fetch doubles as the membership test: missing entries error.
        Ok(at_block
            .storage()
            .fetch(storage_addr, (stash_bytes,))
            .await
            .is_ok())
    }

    async fn is_session_validator(
        &self,
        stash: &AccountId32,
        hash: H256,
    ) -> Result<bool, OracleError> {
        let res = async {
            let at_block = self.at(hash).await?;
            let storage_addr = subxt::dynamic::storage::<(), ()>("Session", "Validators");
            let value = at_block
                .storage()
                .fetch(storage_addr, ())
                .await
                .map_err(|e| OracleError::relay(format!("Failed to get validators: {e}")))?;
            let raw_bytes = value.into_bytes();
            let validators = Vec::<[u8; 32]>::decode(&mut &raw_bytes[..]).map_err(|e| {
                OracleError::relay(format!("Failed to decode Session.Validators: {e}"))
            })?;
            let stash_bytes: [u8; 32] = *stash.as_ref();
            Ok(validators.contains(&stash_bytes))
        }
        .await;
        self.count(res)
    }

    async fn bonded_controller(
        &self,
        stash: &AccountId32,
        hash: H256,
    ) -> Result<Option<AccountId32>, OracleError> {
        let at_block = self.count(self.at(hash).await)?;
        let stash_bytes: [u8; 32] = *stash.as_ref();
        let storage_addr = subxt::dynamic::storage::<_, [u8; 32]>("Staking", "Bonded");

        let Ok(value) = at_block.storage().fetch(storage_addr, (stash_bytes,)).await else {
            return Ok(None);
        };
        let controller = self.count(value.decode().map_err(|e| {
            OracleError::relay(format!(
                "Failed to decode the controller of the stash '{}': {e}",
                self.ss58_of(stash)
            ))
        }))?;
        Ok(Some(AccountId32::from(controller)))
    }

    async fn ledger(
        &self,
        controller: &AccountId32,
        hash: H256,
    ) -> Result<LedgerData, OracleError> {
        let res = async {
            let at_block = self.at(hash).await?;
            let controller_bytes: [u8; 32] = *controller.as_ref();
            let storage_addr = subxt::dynamic::storage::<_, ()>("Staking", "Ledger");
            let value = at_block
                .storage()
                .fetch(storage_addr, (controller_bytes,))
                .await
                .map_err(|_| {
                    OracleError::relay(format!(
                        "Staking.Ledger is None for '{}'",
                        self.ss58_of(controller)
                    ))
                })?;
            let raw_bytes = value.into_bytes();
            decode_ledger(&raw_bytes).ok_or_else(|| {
                OracleError::relay(format!(
                    "Failed to decode the ledger '{}': unknown layout",
                    self.ss58_of(controller)
                ))
            })
        }
        .await;
        self.count(res)
    }

    async fn slashing_span_count(
        &self,
        controller: &AccountId32,
        hash: H256,
    ) -> Result<u32, OracleError> {
        let at_block = self.count(self.at(hash).await)?;
        let controller_bytes: [u8; 32] = *controller.as_ref();
        let storage_addr = subxt::dynamic::storage::<_, ()>("Staking", "SlashingSpans");

        if let Ok(value) = at_block
            .storage()
            .fetch(storage_addr, (controller_bytes,))
            .await
        {
            let raw_bytes = value.into_bytes();
            if let Ok(spans) = SlashingSpans::decode(&mut &raw_bytes[..]) {
                return Ok(spans.prior.len() as u32);
            }
        }

        Ok(0)
    }

    async fn reconnect(&mut self) {
        loop {
            match Self::connect_once(&self.urls, &self.type_registry_preset).await {
                Ok((client, rpc)) => {
                    self.client = client;
                    self.rpc = rpc;
                    return;
                }
                Err(e) if e.is_expected() => tracing::warn!("An exception occurred: {e}"),
                Err(e) => tracing::error!("An exception occurred: {e}"),
            }
            tracing::info!("Timeout: {} seconds", self.timeout.as_secs());
            tokio::time::sleep(self.timeout).await;
        }
    }
}

/// Try the known ledger layouts from newest to oldest.
fn decode_ledger(raw_bytes: &[u8]) -> Option<LedgerData> {
    if let Ok(ledger) = StakingLedger::decode(&mut &raw_bytes[..]) {
        return Some(LedgerData {
            active: ledger.active,
            total: ledger.total,
            unlocking: ledger
                .unlocking
                .into_iter()
                .map(|chunk| (chunk.value, chunk.era))
                .collect(),
        });
    }
    if let Ok(ledger) = StakingLedgerLegacyCompact::decode(&mut &raw_bytes[..]) {
        return Some(LedgerData {
            active: ledger.active,
            total: ledger.total,
            unlocking: ledger
                .unlocking
                .into_iter()
                .map(|chunk| (chunk.value, chunk.era))
                .collect(),
        });
    }
    if let Ok(ledger) = StakingLedgerOld::decode(&mut &raw_bytes[..]) {
        return Some(LedgerData {
            active: ledger.active,
            total: ledger.total,
            unlocking: ledger
                .unlocking
                .into_iter()
                .map(|chunk| (chunk.value, chunk.era))
                .collect(),
        });
    }

    None
}

// SPDX-License-Identifier: GPL-3.0-or-later

//! Parachain (EVM) session: URL-rotating WS connection, OracleMaster reads
//! and the report transaction path (nonce, dry run, sign, submit, receipt).

use crate::error::OracleError;
use crate::metrics::Metrics;
use crate::types::{OracleMaster, RelayReport, TxOutcome};
use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::{RpcError, TransportErrorKind};
use staking_oracle_config::OracleConfig;
use std::sync::Arc;
use std::time::Duration;

/// Attempts to create a session before startup gives up.
const MAX_ATTEMPTS_TO_RECONNECT: u32 = 20;

/// Parachain operations the controller depends on. The production
/// implementation is [`ParaSession`].
#[allow(async_fn_in_trait)]
pub trait ParaChain {
    fn oracle_address(&self) -> Address;

    /// `OracleMaster.getStashAccounts()`.
    async fn stash_accounts(&self) -> Result<Vec<B256>, OracleError>;

    /// `OracleMaster.getCurrentEraId()`.
    async fn current_era_id(&self) -> Result<u64, OracleError>;

    /// `OracleMaster.isReportedLastEra(oracle, stash)`.
    async fn is_reported_last_era(&self, stash: B256) -> Result<(u64, bool), OracleError>;

    /// Parachain balance of the oracle account, in the smallest unit.
    async fn oracle_balance(&self) -> Result<u128, OracleError>;

    /// Build and dry-run one `reportRelay` transaction, then (outside debug
    /// mode) sign, submit and await its receipt. The dry run executes in
    /// debug mode too; only the signing and submission steps are skipped.
    async fn submit_report(
        &self,
        era_id: u64,
        report: &RelayReport,
    ) -> Result<TxOutcome, OracleError>;

    /// Replace the underlying connection, retrying the URL list forever.
    async fn reconnect(&mut self);
}

pub struct ParaSession {
    urls: Vec<String>,
    timeout: Duration,
    debug_mode: bool,
    gas_limit: u64,
    max_priority_fee_per_gas: u128,
    contract_address: Address,
    oracle_address: Address,
    wallet: EthereumWallet,
    metrics: Arc<Metrics>,
    provider: DynProvider,
}

impl ParaSession {
    /// Bounded startup connect: up to [`MAX_ATTEMPTS_TO_RECONNECT`] passes
    /// over the URL list, fatal on exhaustion.
    pub async fn connect_forcibly(
        config: &OracleConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, OracleError> {
        let signer: PrivateKeySigner = config
            .oracle_private_key
            .expose()
            .parse()
            .map_err(|_| OracleError::Fatal("Failed to parse a private key".to_string()))?;
        let oracle_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let contract_address: Address = config.contract_address.parse().map_err(|_| {
            OracleError::Fatal(format!(
                "The OracleMaster address is invalid: {}",
                config.contract_address
            ))
        })?;

        let timeout = Duration::from_secs(config.timeout);
        for _ in 0..MAX_ATTEMPTS_TO_RECONNECT {
            match Self::connect_once(&config.ws_urls_para, &wallet).await {
                Ok(provider) => {
                    return Ok(ParaSession {
                        urls: config.ws_urls_para.clone(),
                        timeout,
                        debug_mode: config.debug_mode,
                        gas_limit: config.gas_limit,
                        max_priority_fee_per_gas: config.max_priority_fee_per_gas,
                        contract_address,
                        oracle_address,
                        wallet,
                        metrics,
                        provider,
                    });
                }
                Err(e) => {
                    tracing::warn!("Error: {e}");
                    tracing::info!("Timeout: {} seconds", timeout.as_secs());
                    tokio::time::sleep(timeout).await;
                }
            }
        }

        Err(OracleError::Fatal(
            "Failed to create a parachain session".to_string(),
        ))
    }

    /// One pass over the URL list; the liveness probe is an `eth_chainId`
    /// round trip.
    async fn connect_once(
        urls: &[String],
        wallet: &EthereumWallet,
    ) -> Result<DynProvider, OracleError> {
        for url in urls {
            match Self::open(url, wallet).await {
                Ok(provider) => {
                    tracing::info!("[para] Successfully connected to {url}");
                    return Ok(provider);
                }
                Err(e) => tracing::warn!("[para] Failed to connect to the node {url}: {e}"),
            }
        }

        Err(OracleError::para("failed to connect to any node"))
    }

    async fn open(url: &str, wallet: &EthereumWallet) -> Result<DynProvider, OracleError> {
        let provider = ProviderBuilder::new()
            .wallet(wallet.clone())
            .connect_ws(WsConnect::new(url))
            .await
            .map_err(|e| OracleError::para(format!("failed to connect: {e}")))?
            .erased();

        provider
            .get_chain_id()
            .await
            .map_err(|e| OracleError::para(format!("liveness probe failed: {e}")))?;

        Ok(provider)
    }

    pub fn contract(&self) -> OracleMaster::OracleMasterInstance<DynProvider> {
        OracleMaster::new(self.contract_address, self.provider.clone())
    }

    /// Startup check that `contractAddress` refers to deployed bytecode.
    pub async fn check_deployed(&self) -> Result<(), OracleError> {
        let code = self
            .provider
            .get_code_at(self.contract_address)
            .await
            .map_err(|e| self.rpc_err("Failed to get the contract code", e))?;
        if code.len() < 3 {
            return Err(OracleError::Fatal(format!(
                "Incorrect contract address or the contract is not deployed: {}",
                self.contract_address
            )));
        }
        Ok(())
    }

    /// Zero-payload `reportRelay` dry run; confirms the selector is callable.
    /// A revert is fine, anything else is surfaced.
    pub async fn probe_report_relay(&self) -> Result<(), OracleError> {
        match self
            .contract()
            .reportRelay(U256::ZERO, RelayReport::default())
            .call()
            .await
        {
            Ok(_) => Ok(()),
            Err(ref e) if revert_message(e).is_some() => Ok(()),
            Err(e) => Err(self.contract_err("reportRelay probe failed", e)),
        }
    }

    fn count<T>(&self, res: Result<T, OracleError>) -> Result<T, OracleError> {
        if res.is_err() {
            self.metrics.para_exceptions_count.inc();
        }
        res
    }

    fn rpc_err(&self, context: &str, e: RpcError<TransportErrorKind>) -> OracleError {
        if matches!(e, RpcError::ErrorResp(_)) {
            OracleError::para_unexpected(format!("{context}: {e}"))
        } else {
            OracleError::para(format!("{context}: {e}"))
        }
    }

    fn contract_err(&self, context: &str, e: alloy_contract::Error) -> OracleError {
        match e {
            alloy_contract::Error::TransportError(inner) => self.rpc_err(context, inner),
            other => OracleError::para_unexpected(format!("{context}: {other}")),
        }
    }
}

impl ParaChain for ParaSession {
    fn oracle_address(&self) -> Address {
        self.oracle_address
    }

    async fn stash_accounts(&self) -> Result<Vec<B256>, OracleError> {
        let res = self
            .contract()
            .getStashAccounts()
            .call()
            .await
            .map_err(|e| {
                self.contract_err(
                    "Failed to get stash accounts from the OracleMaster contract",
                    e,
                )
            });
        self.count(res)
    }

    async fn current_era_id(&self) -> Result<u64, OracleError> {
        let res = async {
            let era = self.contract().getCurrentEraId().call().await.map_err(|e| {
                self.contract_err(
                    "Failed to get the era id from the OracleMaster contract",
                    e,
                )
            })?;
            u64::try_from(era).map_err(|_| {
                OracleError::para_unexpected(format!("the OracleMaster era id overflows u64: {era}"))
            })
        }
        .await;
        self.count(res)
    }

    async fn is_reported_last_era(&self, stash: B256) -> Result<(u64, bool), OracleError> {
        let res = async {
            let ret = self
                .contract()
                .isReportedLastEra(self.oracle_address, stash)
                .call()
                .await
                .map_err(|e| {
                    self.contract_err(
                        "Failed to call the isReportedLastEra method from the OracleMaster contract",
                        e,
                    )
                })?;
            let era = u64::try_from(ret.eraId).map_err(|_| {
                OracleError::para_unexpected(format!(
                    "the OracleMaster era id overflows u64: {}",
                    ret.eraId
                ))
            })?;
            Ok((era, ret.isReported))
        }
        .await;
        self.count(res)
    }

    async fn oracle_balance(&self) -> Result<u128, OracleError> {
        let res = self
            .provider
            .get_balance(self.oracle_address)
            .await
            .map(|balance| u128::try_from(balance).unwrap_or(u128::MAX))
            .map_err(|e| self.rpc_err("Failed to get the balance of the oracle", e));
        self.count(res)
    }

    async fn submit_report(
        &self,
        era_id: u64,
        report: &RelayReport,
    ) -> Result<TxOutcome, OracleError> {
        let nonce = self.count(
            self.provider
                .get_transaction_count(self.oracle_address)
                .await
                .map_err(|e| self.rpc_err("Failed to get the transaction count", e)),
        )?;

        let contract = self.contract();
        let call = contract
            .reportRelay(U256::from(era_id), report.clone())
            .from(self.oracle_address)
            .gas(self.gas_limit)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .nonce(nonce);

        // Dry run before spending gas. This also runs in debug mode, so a
        // report that would revert on-chain still surfaces as WillRevert.
        if let Err(e) = call.call().await {
            if let Some(message) = revert_message(&e) {
                return Ok(TxOutcome::WillRevert(message));
            }
            self.metrics.para_exceptions_count.inc();
            return Err(self.contract_err("Failed to dry-run the report", e));
        }

        if self.debug_mode {
            tracing::info!(
                "Skipping sending the transaction for era {era_id}: running in debug mode"
            );
            return Ok(TxOutcome::Sent(None));
        }

        let pending = self.count(
            call.send()
                .await
                .map_err(|e| self.contract_err("Failed to send the report transaction", e)),
        )?;
        let tx_hash = *pending.tx_hash();
        tracing::info!("Transaction hash: {tx_hash:#x}");

        let receipt = self.count(pending.get_receipt().await.map_err(|e| {
            OracleError::para(format!("Failed to get the transaction receipt: {e}"))
        }))?;
        tracing::debug!("Transaction receipt: {receipt:?}");

        if receipt.status() {
            Ok(TxOutcome::Sent(Some(tx_hash)))
        } else {
            Ok(TxOutcome::Reverted(tx_hash))
        }
    }

    async fn reconnect(&mut self) {
        loop {
            match Self::connect_once(&self.urls, &self.wallet).await {
                Ok(provider) => {
                    self.provider = provider;
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

/// Extract the node's error message when a call failed with an RPC error
/// response, i.e. an execution revert rather than a transport failure.
fn revert_message(err: &alloy_contract::Error) -> Option<String> {
    if let alloy_contract::Error::TransportError(RpcError::ErrorResp(payload)) = err {
        Some(payload.message.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_json_rpc::ErrorPayload;

    #[test]
    fn error_responses_read_as_reverts() {
        let err = alloy_contract::Error::TransportError(RpcError::ErrorResp(ErrorPayload {
            code: 3,
            message: "execution reverted: stash not registered".into(),
            data: None,
        }));
        assert_eq!(
            revert_message(&err).as_deref(),
            Some("execution reverted: stash not registered")
        );
    }

    #[test]
    fn transport_failures_are_not_reverts() {
        let err = alloy_contract::Error::TransportError(RpcError::NullResp);
        assert!(revert_message(&err).is_none());
    }
}

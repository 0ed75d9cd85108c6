// SPDX-License-Identifier: GPL-3.0-or-later

use staking_oracle::error::OracleError;
use staking_oracle::metrics::Metrics;
use staking_oracle::oracle::Oracle;
use staking_oracle::para::ParaSession;
use staking_oracle::relay::RelaySession;
use staking_oracle::{abi, logging, metrics};
use staking_oracle_config::OracleConfig;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OracleConfig::from_env()?;
    logging::init(config.log_level)?;
    log_parameters(&config);

    let metrics = Arc::new(Metrics::new(&config.prometheus_metrics_prefix)?);
    tokio::spawn(metrics::serve(
        metrics.clone(),
        config.prometheus_metrics_port,
    ));

    tracing::info!("Creating a parachain session");
    let para = ParaSession::connect_forcibly(&config, metrics.clone()).await?;
    tracing::info!("Creating a relay chain session");
    let relay = RelaySession::connect_forcibly(&config, metrics.clone()).await?;

    abi::check_oracle_master(&para, &config.oracle_master_contract_abi_path).await?;

    let mut oracle = Oracle::new(relay, para, metrics, &config);
    tokio::select! {
        res = oracle.run() => match res {
            Ok(()) | Err(OracleError::Shutdown) => {
                tracing::info!("Shutting down");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        signal = shutdown_signal() => {
            tracing::info!("Receiving a signal: {signal}");
            Ok(())
        }
    }
}

fn log_parameters(config: &OracleConfig) {
    tracing::info!("[ENV] LOG_LEVEL: {}", config.log_level);
    tracing::info!(
        "[ENV] WS_URLS_PARA: successfully got {} urls",
        config.ws_urls_para.len()
    );
    tracing::info!(
        "[ENV] WS_URLS_RELAY: successfully got {} urls",
        config.ws_urls_relay.len()
    );
    tracing::info!(
        "[ENV] ORACLE_MASTER_CONTRACT_ABI_PATH: {}",
        config.oracle_master_contract_abi_path.display()
    );
    tracing::info!("[ENV] DEBUG_MODE: {}", config.debug_mode);
    tracing::info!("[ENV] ERA_DELAY_TIME: {}", config.era_delay_time);
    tracing::info!(
        "[ENV] ERA_DURATION_IN_BLOCKS: {}",
        config.era_duration_in_blocks
    );
    tracing::info!(
        "[ENV] ERA_DURATION_IN_SECONDS: {}",
        config.era_duration_in_seconds
    );
    tracing::info!("[ENV] ERA_UPDATE_DELAY: {}", config.era_update_delay);
    tracing::info!(
        "[ENV] FREQUENCY_OF_REQUESTS: {}",
        config.frequency_of_requests
    );
    tracing::info!("[ENV] GAS_LIMIT: {}", config.gas_limit);
    tracing::info!(
        "[ENV] MAX_PRIORITY_FEE_PER_GAS: {}",
        config.max_priority_fee_per_gas
    );
    tracing::info!(
        "[ENV] PROMETHEUS_METRICS_PORT: {}",
        config.prometheus_metrics_port
    );
    tracing::info!("[ENV] SS58_FORMAT: {}", config.ss58_format);
    tracing::info!("[ENV] TIMEOUT: {}", config.timeout);
    tracing::info!(
        "[ENV] TYPE_REGISTRY_PRESET: {}",
        config.type_registry_preset
    );
    tracing::info!(
        "[ENV] WAITING_TIME_BEFORE_SHUTDOWN: {}",
        config.waiting_time_before_shutdown
    );
    tracing::info!("[ENV] CONTRACT_ADDRESS: {}", config.contract_address);
}

/// Resolve on SIGINT or SIGTERM with the signal's name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install the SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install the SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

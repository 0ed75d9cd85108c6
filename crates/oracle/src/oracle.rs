// SPDX-License-Identifier: GPL-3.0-or-later

//! The era-loop controller and its recovery envelope.
//!
//! One task drives the whole loop serially: detect the era transition on the
//! relay chain, pin the last block of the finished era, wait for its
//! finalization, then dispatch one report per stash. The outer loop demotes
//! the expected transient-network class to a reconnect and resumes.

use crate::error::OracleError;
use crate::metrics::Metrics;
use crate::para::ParaChain;
use crate::relay::RelayChain;
use crate::report;
use crate::types::{BlockRef, EraInfo, TxOutcome};
use sp_core::crypto::{AccountId32, Ss58Codec};
use staking_oracle_config::OracleConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const FINALITY_POLL: Duration = Duration::from_secs(1);

pub struct Oracle<R, P> {
    relay: R,
    para: P,
    metrics: Arc<Metrics>,

    ss58_format: u16,
    frequency_of_requests: Duration,
    era_duration_in_blocks: u64,
    /// `ERA_DURATION_IN_SECONDS + ERA_UPDATE_DELAY`: how long the active era
    /// may stay unchanged before the delay-shutdown fires.
    possible_era_update_delay: Duration,
    era_delay_time: Duration,
    waiting_time_before_shutdown: Duration,

    /// Most recent era each stash was reported for (or observed reported).
    /// `-1` marks "nothing reported yet" for era-0 edge states.
    last_reported: HashMap<[u8; 32], i64>,
    previous_active_era_id: i64,
    era_delay_time_start: Option<Instant>,
    time_of_era_immutability: Duration,
    was_recovered: bool,
}

impl<R: RelayChain, P: ParaChain> Oracle<R, P> {
    pub fn new(relay: R, para: P, metrics: Arc<Metrics>, config: &OracleConfig) -> Self {
        Oracle {
            relay,
            para,
            metrics,
            ss58_format: config.ss58_format,
            frequency_of_requests: Duration::from_secs(config.frequency_of_requests),
            era_duration_in_blocks: config.era_duration_in_blocks,
            possible_era_update_delay: Duration::from_secs(
                config.era_duration_in_seconds + config.era_update_delay,
            ),
            era_delay_time: Duration::from_secs(config.era_delay_time),
            waiting_time_before_shutdown: Duration::from_secs(
                config.waiting_time_before_shutdown,
            ),
            last_reported: HashMap::new(),
            previous_active_era_id: -1,
            era_delay_time_start: None,
            time_of_era_immutability: Duration::ZERO,
            was_recovered: false,
        }
    }

    /// Run until shutdown. Expected transient failures trigger recovery;
    /// the closed-socket class and [`OracleError::Shutdown`] propagate.
    pub async fn run(&mut self) -> Result<(), OracleError> {
        loop {
            match self.cycle().await {
                Ok(()) => continue,
                Err(OracleError::Shutdown) => return Err(OracleError::Shutdown),
                Err(e) if e.is_closed_socket() => {
                    tracing::error!("An unexpected exception occurred: {e}");
                    return Err(e);
                }
                Err(e) if e.is_expected() => {
                    tracing::warn!("An expected exception occurred: {e}");
                    self.recover().await;
                }
                Err(e) => {
                    tracing::error!("An unexpected exception occurred: {e}");
                    self.recover().await;
                }
            }
        }
    }

    /// One restore-then-tick session; returns only by error.
    async fn cycle(&mut self) -> Result<(), OracleError> {
        self.restore_state().await?;
        self.update_oracle_balance().await?;

        loop {
            let mut tick_start = Instant::now();

            tracing::debug!(
                "Getting an active era. The previous active era id: {}",
                self.previous_active_era_id
            );
            let era = self.relay.active_era().await?;
            self.assert_era_with_oracle_master(era.index).await?;

            if (era.index as i64) > self.previous_active_era_id {
                tracing::debug!("A new era has started: {}", era.index);
                self.time_of_era_immutability = Duration::ZERO;
                tick_start = Instant::now();
                self.handle_era_change(era).await?;
                self.era_delay_time_start = None;
            } else if self.was_recovered {
                tracing::info!(
                    "Era {} has already been processed. Waiting for the next era",
                    era.index.saturating_sub(1)
                );
                self.was_recovered = false;
            }

            tracing::info!(
                "Sleep for {} seconds until the next request",
                self.frequency_of_requests.as_secs()
            );
            tokio::time::sleep(self.frequency_of_requests).await;

            self.time_of_era_immutability += tick_start.elapsed();
            if self.time_of_era_immutability > self.possible_era_update_delay {
                tracing::warn!("Era update is delayed");
                self.shutdown_after_timeout().await?;
            }
        }
    }

    /// Rehydrate `last_reported` from the OracleMaster view.
    async fn restore_state(&mut self) -> Result<(), OracleError> {
        tracing::info!("Restoring the state for each stash");
        let stashes = self.para.stash_accounts().await?;
        for stash in stashes {
            let (era_id, is_reported) = self.para.is_reported_last_era(stash).await?;
            let last = if is_reported {
                era_id as i64
            } else {
                era_id as i64 - 1
            };
            self.last_reported.insert(stash.0, last);
            tracing::debug!("Stash {}: era {last}", self.ss58(&stash.0));
        }
        tracing::info!("States for each stash restored");
        Ok(())
    }

    /// Cross-check the relay-chain era against the OracleMaster; a
    /// disagreement outlasting `ERA_DELAY_TIME` arms the delay-shutdown.
    async fn assert_era_with_oracle_master(
        &mut self,
        active_era_id: u64,
    ) -> Result<(), OracleError> {
        let oracle_master_era_id = self.para.current_era_id().await?;

        if active_era_id == oracle_master_era_id {
            self.era_delay_time_start = None;
            return Ok(());
        }

        match self.era_delay_time_start {
            None => {
                self.era_delay_time_start = Some(Instant::now());
                Ok(())
            }
            Some(start) if start.elapsed() > self.era_delay_time => {
                tracing::error!("[OracleMaster] Era update is delayed");
                self.shutdown_after_timeout().await
            }
            Some(_) => Ok(()),
        }
    }

    /// Arm the delayed-era metric and hand control back to the supervisor.
    async fn shutdown_after_timeout(&mut self) -> Result<(), OracleError> {
        self.metrics.era_update_delayed.set(1);
        tracing::info!(
            "Sleeping for {} seconds before shutdown",
            self.waiting_time_before_shutdown.as_secs()
        );
        tokio::time::sleep(self.waiting_time_before_shutdown).await;
        Err(OracleError::Shutdown)
    }

    async fn handle_era_change(&mut self, era: EraInfo) -> Result<(), OracleError> {
        tracing::info!(
            "Active era index: {}, start timestamp: {:?}",
            era.index,
            era.start
        );
        self.metrics.active_era_id.set(era.index as i64);

        let stashes = self.para.stash_accounts().await?;
        if stashes.is_empty() {
            tracing::info!("No stash accounts found: waiting for the next era");
            self.previous_active_era_id = era.index as i64;
            return Ok(());
        }

        let Some(report_era) = era.index.checked_sub(1) else {
            self.previous_active_era_id = era.index as i64;
            return Ok(());
        };

        let block = self.find_last_block(era.index).await?;
        self.wait_until_finalized(&block).await?;
        self.metrics
            .previous_era_change_block_number
            .set(block.number as i64);

        for stash in stashes {
            let stash_key: [u8; 32] = stash.0;
            let stash_ss58 = self.ss58(&stash_key);
            if self.last_reported.get(&stash_key).copied().unwrap_or(0) >= report_era as i64 {
                tracing::info!("The report has already been sent for the stash {stash_ss58}");
                continue;
            }

            let account = AccountId32::from(stash_key);
            let staking_parameters =
                report::build_report(&self.relay, &account, block.hash).await?;
            tracing::info!(
                "The parameters are read. Preparing the transaction body. \
                 Stash: {stash_ss58}; Era: {report_era}"
            );

            let outcome = self.para.submit_report(report_era, &staking_parameters).await?;
            match &outcome {
                TxOutcome::Sent(Some(_)) => {
                    tracing::info!(
                        "The report for the stash '{stash_ss58}' era {report_era} was sent \
                         successfully"
                    );
                    self.metrics.tx_success.observe(1.0);
                }
                TxOutcome::Sent(None) => {
                    // debug mode, nothing was submitted
                }
                TxOutcome::Reverted(_) => {
                    tracing::warn!(
                        "[era {report_era}] The transaction status for the stash \
                         '{stash_ss58}': reverted"
                    );
                    self.metrics.last_failed_era.set(report_era as i64);
                    self.metrics.tx_revert.observe(1.0);
                }
                TxOutcome::WillRevert(message) => {
                    tracing::warn!(
                        "The report for '{stash_ss58}' era {report_era} will probably fail \
                         with {message}"
                    );
                    self.metrics.last_failed_era.set(report_era as i64);
                    self.metrics.tx_revert.observe(1.0);
                }
            }

            self.update_oracle_balance().await?;
            // One attempt per era: the entry advances regardless of the
            // outcome; the OracleMaster rejects duplicates anyway.
            self.last_reported.insert(stash_key, report_era as i64);
        }

        tracing::info!("Waiting for the next era");
        self.metrics.last_era_reported.set(report_era as i64);
        self.previous_active_era_id = era.index as i64;
        Ok(())
    }

    /// Binary search for the last block whose active era is `era_id - 1`,
    /// bounded by `ERA_DURATION_IN_BLOCKS` below the finalized head.
    async fn find_last_block(&self, era_id: u64) -> Result<BlockRef, OracleError> {
        let head = self.relay.finalized_head_number().await?;
        let mut low = head.saturating_sub(self.era_duration_in_blocks);
        let mut high = head;
        let mut candidate: Option<BlockRef> = None;

        while low <= high {
            let mid = low + (high - low) / 2;
            let mid_hash = self.relay.block_hash(mid).await?;
            let era_at_mid = self.relay.active_era_at(mid_hash).await?.index;

            if era_at_mid < era_id {
                candidate = Some(BlockRef {
                    number: mid,
                    hash: mid_hash,
                });
                low = mid + 1;
            } else {
                let Some(prev) = mid.checked_sub(1) else {
                    // The whole window already sits in the new era.
                    return Err(OracleError::EraBoundaryNotFound { era: era_id });
                };
                let prev_hash = self.relay.block_hash(prev).await?;
                candidate = Some(BlockRef {
                    number: prev,
                    hash: prev_hash,
                });
                high = prev;
            }
        }

        let block = candidate.ok_or(OracleError::EraBoundaryNotFound { era: era_id })?;
        tracing::info!("Block hash: {:#x}. Block number: {}", block.hash, block.number);
        Ok(block)
    }

    /// Poll the finalized head until it covers `block`, then verify the
    /// canonical hash still matches the one the search picked.
    async fn wait_until_finalized(&self, block: &BlockRef) -> Result<(), OracleError> {
        tracing::debug!("Waiting until the block {} is finalized", block.number);
        let mut finalized_head = self.relay.finalized_head_number().await?;
        while finalized_head < block.number {
            tokio::time::sleep(FINALITY_POLL).await;
            finalized_head = self.relay.finalized_head_number().await?;
        }

        let got = self.relay.block_hash(block.number).await?;
        if got != block.hash {
            return Err(OracleError::BlockNotFound {
                number: block.number,
                expected: block.hash,
                got,
            });
        }
        tracing::debug!("The block is finalized: {} - {:#x}", block.number, block.hash);
        Ok(())
    }

    async fn update_oracle_balance(&self) -> Result<(), OracleError> {
        let balance = self.para.oracle_balance().await?;
        self.metrics
            .oracle_balance
            .with_label_values(&[&self.para.oracle_address().to_string()])
            .set(balance as f64);
        Ok(())
    }

    /// Swap both sessions for fresh connections, retrying forever.
    async fn recover(&mut self) {
        tracing::info!("Starting recovery mode");
        self.metrics.is_recovery_mode_active.set(1);
        self.was_recovered = true;

        tracing::info!("Reconnecting to the relay chain");
        self.relay.reconnect().await;
        tracing::info!("Reconnecting to the parachain");
        self.para.reconnect().await;

        self.metrics.is_recovery_mode_active.set(0);
        tracing::info!("Recovery mode is completed");
    }

    fn ss58(&self, key: &[u8; 32]) -> String {
        AccountId32::from(*key).to_ss58check_with_version(self.ss58_format.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{MockPara, MockRelay, StubAccount, account, hash_of};
    use crate::types::LedgerData;
    use alloy_primitives::B256;
    use staking_oracle_config::{LogLevel, PrivateKeyHex};
    use std::path::PathBuf;
    use subxt::utils::H256;

    const KEY: &str = "e5be9a5092a81bca64be81d212e7f2f9eba183bb7a90954f7b76361f6edb5c0a";

    fn config(frequency: u64, era_delay_time: u64) -> OracleConfig {
        OracleConfig {
            log_level: LogLevel::Info,
            ws_urls_para: vec![],
            ws_urls_relay: vec![],
            oracle_master_contract_abi_path: PathBuf::from("/dev/null"),
            debug_mode: false,
            era_delay_time,
            era_duration_in_blocks: 10_000,
            era_duration_in_seconds: 86_400,
            era_update_delay: 360,
            frequency_of_requests: frequency,
            gas_limit: 10_000_000,
            max_priority_fee_per_gas: 0,
            prometheus_metrics_port: 8000,
            prometheus_metrics_prefix: String::new(),
            ss58_format: 42,
            timeout: 1,
            type_registry_preset: "kusama".to_string(),
            waiting_time_before_shutdown: 600,
            contract_address: "0x84af38b173bb0d9d7ab7f4a9ad2bdaf1dc8b2b1b".to_string(),
            oracle_private_key: PrivateKeyHex::parse(KEY).unwrap(),
        }
    }

    fn make_oracle(
        relay: &MockRelay,
        para: &MockPara,
        cfg: &OracleConfig,
    ) -> (Oracle<MockRelay, MockPara>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new("").unwrap());
        (
            Oracle::new(relay.clone(), para.clone(), metrics.clone(), cfg),
            metrics,
        )
    }

    fn stash_key(seed: u8) -> B256 {
        B256::from([seed; 32])
    }

    fn staked_account(seed: u8, controller_seed: u8) -> StubAccount {
        StubAccount {
            free: 10_000,
            nominator: true,
            controller: Some(account(controller_seed)),
            ledger: Some(LedgerData {
                active: 5_000,
                total: 6_000,
                unlocking: vec![(1_000, 50)],
            }),
            slashing_spans: 0,
        }
    }

    // ============================================================================================
    // find_last_block (P3)
    // ============================================================================================

    #[tokio::test]
    async fn boundary_search_finds_the_last_block_of_the_prior_era() {
        for transition in [1u64, 137, 500, 600] {
            let relay = MockRelay::builder()
                .with_era_starts(&[(10, 0), (11, transition)])
                .with_finalized_head(600)
                .build();
            let para = MockPara::new(vec![], 11);
            let (oracle, _) = make_oracle(&relay, &para, &config(180, 600));

            let block = oracle.find_last_block(11).await.unwrap();
            assert_eq!(block.number, transition - 1, "transition {transition}");
            assert_eq!(block.hash, hash_of(transition - 1));
        }
    }

    #[tokio::test]
    async fn boundary_search_without_prior_era_blocks_is_a_typed_error() {
        // Every block in the window already belongs to the new era.
        let relay = MockRelay::builder()
            .with_era_starts(&[(11, 0)])
            .with_finalized_head(600)
            .build();
        let para = MockPara::new(vec![], 11);
        let (oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        assert!(matches!(
            oracle.find_last_block(11).await,
            Err(OracleError::EraBoundaryNotFound { era: 11 })
        ));
    }

    #[tokio::test]
    async fn boundary_search_skips_over_a_missed_era() {
        // Era 10 never had a block inside the window: 9 jumps to 11.
        let relay = MockRelay::builder()
            .with_era_starts(&[(9, 0), (11, 300)])
            .with_finalized_head(600)
            .build();
        let para = MockPara::new(vec![], 11);
        let (oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        let block = oracle.find_last_block(11).await.unwrap();
        assert_eq!(block.number, 299);
    }

    // ============================================================================================
    // Finalization wait
    // ============================================================================================

    #[tokio::test(start_paused = true)]
    async fn finalization_wait_polls_until_the_head_catches_up() {
        let relay = MockRelay::builder()
            .with_finalized_head(400)
            .with_head_step(50)
            .build();
        let para = MockPara::new(vec![], 11);
        let (oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        let block = BlockRef {
            number: 499,
            hash: hash_of(499),
        };
        oracle.wait_until_finalized(&block).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fork_during_finalization_is_block_not_found() {
        let relay = MockRelay::builder().with_finalized_head(600).build();
        let para = MockPara::new(vec![], 11);
        let (oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        let block = BlockRef {
            number: 499,
            hash: hash_of(499),
        };
        // The canonical hash at 499 changes before the wait completes.
        let fork = H256::from([0xbb; 32]);
        relay.state.lock().unwrap().hash_overrides.insert(499, fork);

        match oracle.wait_until_finalized(&block).await {
            Err(OracleError::BlockNotFound {
                number,
                expected,
                got,
            }) => {
                assert_eq!(number, 499);
                assert_eq!(expected, hash_of(499));
                assert_eq!(got, fork);
            }
            other => panic!("expected BlockNotFound, got {other:?}"),
        }
    }

    // ============================================================================================
    // Restore (P6)
    // ============================================================================================

    #[tokio::test]
    async fn restore_state_is_idempotent() {
        let relay = MockRelay::builder().build();
        let para = MockPara::new(vec![stash_key(1), stash_key(2)], 10);
        para.set_reported(stash_key(1), 10, true);
        para.set_reported(stash_key(2), 9, false);
        let (mut oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        oracle.restore_state().await.unwrap();
        let first = oracle.last_reported.clone();
        oracle.restore_state().await.unwrap();

        assert_eq!(oracle.last_reported, first);
        assert_eq!(oracle.last_reported[&stash_key(1).0], 10);
        assert_eq!(oracle.last_reported[&stash_key(2).0], 8);
    }

    // ============================================================================================
    // Scenario: happy path
    // ============================================================================================

    #[tokio::test(start_paused = true)]
    async fn happy_path_reports_exactly_once_per_stash_per_era() {
        let relay = MockRelay::builder()
            .with_era_sequence(&[10, 11])
            .with_era_starts(&[(9, 0), (10, 100), (11, 500)])
            .with_finalized_head(600)
            .with_account(account(1), staked_account(1, 11))
            .with_account(account(2), staked_account(2, 12))
            .build();
        let para = MockPara::new(vec![stash_key(1), stash_key(2)], 10);
        para.set_reported(stash_key(1), 10, true);
        para.set_reported(stash_key(2), 9, false);
        let cfg = config(180, 600);
        let (mut oracle, metrics) = make_oracle(&relay, &para, &cfg);

        tokio::select! {
            res = oracle.cycle() => panic!("cycle ended early: {res:?}"),
            _ = tokio::time::sleep(Duration::from_secs(500)) => {}
        }

        let submissions = para.submissions();
        // Startup processes era 10 (reporting 9 for the lagging stash), the
        // transition to 11 reports era 10; the restored stash is skipped.
        let era_10_reports: Vec<_> = submissions.iter().filter(|(era, _)| *era == 10).collect();
        assert_eq!(era_10_reports.len(), 1);
        assert_eq!(era_10_reports[0].1.stashAccount, stash_key(2));
        assert!(
            submissions
                .iter()
                .all(|(_, report)| report.stashAccount != stash_key(1))
        );

        assert_eq!(oracle.last_reported[&stash_key(1).0], 10);
        assert_eq!(oracle.last_reported[&stash_key(2).0], 10);
        assert_eq!(oracle.previous_active_era_id, 11);
        assert_eq!(metrics.last_era_reported.get(), 10);
        assert_eq!(metrics.previous_era_change_block_number.get(), 499);
        assert_eq!(metrics.active_era_id.get(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_report_per_stash_per_era_across_many_transitions() {
        let relay = MockRelay::builder()
            .with_era_sequence(&[10, 10, 11, 11, 12])
            .with_era_starts(&[(9, 0), (10, 100), (11, 300), (12, 700)])
            .with_finalized_head(1_000)
            .with_account(account(1), staked_account(1, 11))
            .with_account(account(2), staked_account(2, 12))
            .build();
        let para = MockPara::new(vec![stash_key(1), stash_key(2)], 10);
        para.set_reported(stash_key(1), 10, true);
        para.set_reported(stash_key(2), 9, false);
        let cfg = config(100, 10_000);
        let (mut oracle, _) = make_oracle(&relay, &para, &cfg);

        tokio::select! {
            res = oracle.cycle() => panic!("cycle ended early: {res:?}"),
            _ = tokio::time::sleep(Duration::from_secs(800)) => {}
        }

        let submissions = para.submissions();
        let mut seen = std::collections::HashSet::new();
        for (era, report) in &submissions {
            assert!(
                seen.insert((*era, report.stashAccount)),
                "duplicate report for era {era}"
            );
        }
        // S2 catches up over eras 9, 10 and 11; S1 only owes era 11.
        assert_eq!(submissions.len(), 4);
    }

    // ============================================================================================
    // Scenario: era disagreement shutdown
    // ============================================================================================

    #[tokio::test(start_paused = true)]
    async fn persistent_era_disagreement_shuts_down() {
        let relay = MockRelay::builder()
            .with_era_sequence(&[11])
            .with_era_starts(&[(10, 0), (11, 100)])
            .with_finalized_head(600)
            .build();
        // The OracleMaster stays on era 10 while the relay reports 11. The
        // first tick still reports (previous era id starts below), so the
        // disagreement clock starts on the second tick.
        let para = MockPara::new(vec![], 10);
        let cfg = config(2, 5);
        let (mut oracle, metrics) = make_oracle(&relay, &para, &cfg);

        let started = Instant::now();
        match oracle.cycle().await {
            Err(OracleError::Shutdown) => {}
            other => panic!("expected shutdown, got {other:?}"),
        }

        assert_eq!(metrics.era_update_delayed.get(), 1);
        // The delay window plus the pre-shutdown sleep must both have
        // elapsed (virtual time).
        assert!(started.elapsed() >= Duration::from_secs(5 + 600));
    }

    #[tokio::test(start_paused = true)]
    async fn era_agreement_resets_the_disagreement_clock() {
        let relay = MockRelay::builder().build();
        let para = MockPara::new(vec![], 10);
        let (mut oracle, _) = make_oracle(&relay, &para, &config(180, 5));

        oracle.assert_era_with_oracle_master(11).await.unwrap();
        assert!(oracle.era_delay_time_start.is_some());

        para.set_current_era(11);
        oracle.assert_era_with_oracle_master(11).await.unwrap();
        assert!(oracle.era_delay_time_start.is_none());

        // A fresh disagreement long after the first one starts from zero.
        tokio::time::advance(Duration::from_secs(60)).await;
        para.set_current_era(10);
        oracle.assert_era_with_oracle_master(11).await.unwrap();
        assert!(oracle.era_delay_time_start.is_some());
    }

    // ============================================================================================
    // Scenario: dry-run revert and debug mode
    // ============================================================================================

    #[tokio::test(start_paused = true)]
    async fn dry_run_revert_still_advances_last_reported() {
        let relay = MockRelay::builder()
            .with_era_starts(&[(10, 0), (11, 500)])
            .with_finalized_head(600)
            .with_account(account(1), staked_account(1, 11))
            .build();
        let para = MockPara::new(vec![stash_key(1)], 11);
        para.set_reported(stash_key(1), 9, true);
        para.set_outcome(TxOutcome::WillRevert("stash not registered".to_string()));
        let (mut oracle, metrics) = make_oracle(&relay, &para, &config(180, 600));

        oracle.restore_state().await.unwrap();
        oracle
            .handle_era_change(EraInfo {
                index: 11,
                start: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(metrics.last_failed_era.get(), 10);
        assert_eq!(metrics.tx_revert.get_sample_count(), 1);
        assert_eq!(metrics.tx_success.get_sample_count(), 0);
        // One attempt per era, even though it failed.
        assert_eq!(oracle.last_reported[&stash_key(1).0], 10);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_receipt_is_recorded_like_a_dry_run_revert() {
        let relay = MockRelay::builder()
            .with_era_starts(&[(10, 0), (11, 500)])
            .with_finalized_head(600)
            .with_account(account(1), staked_account(1, 11))
            .build();
        let para = MockPara::new(vec![stash_key(1)], 11);
        para.set_reported(stash_key(1), 9, true);
        para.set_outcome(TxOutcome::Reverted(B256::from([0xfe; 32])));
        let (mut oracle, metrics) = make_oracle(&relay, &para, &config(180, 600));

        oracle.restore_state().await.unwrap();
        oracle
            .handle_era_change(EraInfo {
                index: 11,
                start: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(metrics.last_failed_era.get(), 10);
        assert_eq!(metrics.tx_revert.get_sample_count(), 1);
        assert_eq!(oracle.last_reported[&stash_key(1).0], 10);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_mode_outcome_advances_state_without_success_metrics() {
        let relay = MockRelay::builder()
            .with_era_starts(&[(10, 0), (11, 500)])
            .with_finalized_head(600)
            .with_account(account(1), staked_account(1, 11))
            .build();
        let para = MockPara::new(vec![stash_key(1)], 11);
        para.set_reported(stash_key(1), 9, true);
        para.set_outcome(TxOutcome::Sent(None));
        let (mut oracle, metrics) = make_oracle(&relay, &para, &config(180, 600));

        oracle.restore_state().await.unwrap();
        oracle
            .handle_era_change(EraInfo {
                index: 11,
                start: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(metrics.tx_success.get_sample_count(), 0);
        assert_eq!(metrics.tx_revert.get_sample_count(), 0);
        assert_eq!(oracle.last_reported[&stash_key(1).0], 10);
        assert_eq!(metrics.last_era_reported.get(), 10);
    }

    // ============================================================================================
    // Scenario: recovery
    // ============================================================================================

    #[tokio::test(start_paused = true)]
    async fn expected_failure_triggers_reconnection_of_both_sessions() {
        let relay = MockRelay::builder()
            .with_era_sequence(&[10])
            .with_era_starts(&[(9, 0), (10, 100)])
            .with_finalized_head(600)
            .build();
        let para = MockPara::new(vec![], 10);
        relay.fail_next_active_era(OracleError::relay("connection reset"));
        let (mut oracle, metrics) = make_oracle(&relay, &para, &config(180, 600));

        tokio::select! {
            res = oracle.run() => panic!("run ended early: {res:?}"),
            _ = tokio::time::sleep(Duration::from_secs(30)) => {}
        }

        assert_eq!(relay.reconnects(), 1);
        assert_eq!(para.reconnects(), 1);
        assert_eq!(metrics.is_recovery_mode_active.get(), 0);
        // The loop resumed after recovery.
        assert_eq!(metrics.active_era_id.get(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_socket_class_exits_instead_of_recovering() {
        let relay = MockRelay::builder().build();
        let para = MockPara::new(vec![], 0);
        relay.fail_next_active_era(OracleError::para_unexpected(
            "websocket failure: socket is already closed.",
        ));
        let (mut oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        let err = oracle.run().await.unwrap_err();
        assert!(err.is_closed_socket());
        assert_eq!(relay.reconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_toggles_the_recovery_gauge() {
        let relay = MockRelay::builder().build();
        let para = MockPara::new(vec![], 0);
        let (mut oracle, metrics) = make_oracle(&relay, &para, &config(180, 600));

        oracle.recover().await;

        assert!(oracle.was_recovered);
        assert_eq!(metrics.is_recovery_mode_active.get(), 0);
        assert_eq!(relay.reconnects(), 1);
        assert_eq!(para.reconnects(), 1);
    }

    // ============================================================================================
    // Empty stash set
    // ============================================================================================

    #[tokio::test]
    async fn era_change_with_no_stashes_just_advances() {
        let relay = MockRelay::builder().build();
        let para = MockPara::new(vec![], 11);
        let (mut oracle, _) = make_oracle(&relay, &para, &config(180, 600));

        oracle
            .handle_era_change(EraInfo {
                index: 11,
                start: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(oracle.previous_active_era_id, 11);
        assert!(para.submissions().is_empty());
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later

//! Scripted in-memory chains for driving the controller and report reader
//! in tests.

use crate::error::OracleError;
use crate::para::ParaChain;
use crate::relay::RelayChain;
use crate::types::{EraInfo, LedgerData, RelayReport, TxOutcome};
use alloy_primitives::{Address, B256};
use sp_core::crypto::AccountId32;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use subxt::utils::H256;

pub fn account(seed: u8) -> AccountId32 {
    AccountId32::from([seed; 32])
}

/// Deterministic hash for a block number: the number sits in the first
/// eight bytes, so the mock can invert it.
pub fn hash_of(number: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    H256::from(bytes)
}

fn number_of(hash: H256) -> u64 {
    let bytes: [u8; 32] = hash.0;
    u64::from_be_bytes(bytes[..8].try_into().unwrap())
}

#[derive(Clone)]
pub struct StubAccount {
    pub free: u128,
    pub nominator: bool,
    pub controller: Option<AccountId32>,
    pub ledger: Option<LedgerData>,
    pub slashing_spans: u32,
}

pub struct RelayState {
    /// Successive `Staking.ActiveEra` answers; the last entry repeats.
    pub era_sequence: Vec<u64>,
    era_seq_pos: usize,
    /// (era, first block of that era), ascending. Blocks before the first
    /// entry belong to the era preceding it.
    pub era_starts: Vec<(u64, u64)>,
    pub finalized_head: u64,
    /// Finalized head growth per `finalized_head_number` call.
    pub head_step: u64,
    pub hash_overrides: HashMap<u64, H256>,
    pub accounts: HashMap<AccountId32, StubAccount>,
    pub session_validators: Vec<AccountId32>,
    pub fail_next_active_era: Option<OracleError>,
    pub reconnects: u32,
}

#[derive(Clone)]
pub struct MockRelay {
    pub state: Arc<Mutex<RelayState>>,
}

pub struct MockRelayBuilder {
    state: RelayState,
}

impl MockRelay {
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            state: RelayState {
                era_sequence: vec![0],
                era_seq_pos: 0,
                era_starts: vec![(0, 0)],
                finalized_head: 1_000,
                head_step: 0,
                hash_overrides: HashMap::new(),
                accounts: HashMap::new(),
                session_validators: Vec::new(),
                fail_next_active_era: None,
                reconnects: 0,
            },
        }
    }

    pub fn fail_next_active_era(&self, err: OracleError) {
        self.state.lock().unwrap().fail_next_active_era = Some(err);
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().unwrap().reconnects
    }

    fn era_at(&self, number: u64) -> u64 {
        let state = self.state.lock().unwrap();
        let mut era = state.era_starts.first().map(|(e, _)| e.saturating_sub(1)).unwrap_or(0);
        for (e, first_block) in &state.era_starts {
            if number >= *first_block {
                era = *e;
            }
        }
        era
    }
}

impl MockRelayBuilder {
    pub fn with_account(mut self, account: AccountId32, stub: StubAccount) -> Self {
        self.state.accounts.insert(account, stub);
        self
    }

    pub fn with_session_validator(mut self, account: AccountId32) -> Self {
        self.state.session_validators.push(account);
        self
    }

    pub fn with_era_sequence(mut self, eras: &[u64]) -> Self {
        self.state.era_sequence = eras.to_vec();
        self
    }

    pub fn with_era_starts(mut self, starts: &[(u64, u64)]) -> Self {
        self.state.era_starts = starts.to_vec();
        self
    }

    pub fn with_finalized_head(mut self, head: u64) -> Self {
        self.state.finalized_head = head;
        self
    }

    pub fn with_head_step(mut self, step: u64) -> Self {
        self.state.head_step = step;
        self
    }

    pub fn with_hash_override(mut self, number: u64, hash: H256) -> Self {
        self.state.hash_overrides.insert(number, hash);
        self
    }

    pub fn build(self) -> MockRelay {
        MockRelay {
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

impl RelayChain for MockRelay {
    async fn active_era(&self) -> Result<EraInfo, OracleError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_next_active_era.take() {
            return Err(err);
        }
        let pos = state.era_seq_pos.min(state.era_sequence.len() - 1);
        state.era_seq_pos += 1;
        Ok(EraInfo {
            index: state.era_sequence[pos],
            start: Some(0),
        })
    }

    async fn active_era_at(&self, hash: H256) -> Result<EraInfo, OracleError> {
        Ok(EraInfo {
            index: self.era_at(number_of(hash)),
            start: Some(0),
        })
    }

    async fn finalized_head_number(&self) -> Result<u64, OracleError> {
        let mut state = self.state.lock().unwrap();
        let head = state.finalized_head;
        state.finalized_head += state.head_step;
        Ok(head)
    }

    async fn block_hash(&self, number: u64) -> Result<H256, OracleError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .hash_overrides
            .get(&number)
            .copied()
            .unwrap_or_else(|| hash_of(number)))
    }

    async fn free_balance(&self, stash: &AccountId32, _hash: H256) -> Result<u128, OracleError> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(stash)
            .map(|a| a.free)
            .ok_or_else(|| OracleError::relay("System.Account is None"))
    }

    async fn is_nominator(&self, stash: &AccountId32, _hash: H256) -> Result<bool, OracleError> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(stash).is_some_and(|a| a.nominator))
    }

    async fn is_session_validator(
        &self,
        stash: &AccountId32,
        _hash: H256,
    ) -> Result<bool, OracleError> {
        let state = self.state.lock().unwrap();
        Ok(state.session_validators.contains(stash))
    }

    async fn bonded_controller(
        &self,
        stash: &AccountId32,
        _hash: H256,
    ) -> Result<Option<AccountId32>, OracleError> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(stash).and_then(|a| a.controller.clone()))
    }

    async fn ledger(
        &self,
        controller: &AccountId32,
        _hash: H256,
    ) -> Result<LedgerData, OracleError> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .values()
            .find(|a| a.controller.as_ref() == Some(controller))
            .and_then(|a| a.ledger.clone())
            .ok_or_else(|| OracleError::relay("Staking.Ledger is None"))
    }

    async fn slashing_span_count(
        &self,
        controller: &AccountId32,
        _hash: H256,
    ) -> Result<u32, OracleError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .values()
            .find(|a| a.controller.as_ref() == Some(controller))
            .map(|a| a.slashing_spans)
            .unwrap_or(0))
    }

    async fn reconnect(&mut self) {
        self.state.lock().unwrap().reconnects += 1;
    }
}

pub struct ParaState {
    pub stashes: Vec<B256>,
    pub current_era: u64,
    pub reported: HashMap<B256, (u64, bool)>,
    pub balance: u128,
    pub outcome: TxOutcome,
    pub submissions: Vec<(u64, RelayReport)>,
    pub reconnects: u32,
    pub fail_next_current_era: Option<OracleError>,
}

#[derive(Clone)]
pub struct MockPara {
    pub state: Arc<Mutex<ParaState>>,
}

impl MockPara {
    pub fn new(stashes: Vec<B256>, current_era: u64) -> Self {
        MockPara {
            state: Arc::new(Mutex::new(ParaState {
                stashes,
                current_era,
                reported: HashMap::new(),
                balance: 1_000_000,
                outcome: TxOutcome::Sent(Some(B256::from([0xfe; 32]))),
                submissions: Vec::new(),
                reconnects: 0,
                fail_next_current_era: None,
            })),
        }
    }

    pub fn set_reported(&self, stash: B256, era: u64, is_reported: bool) {
        self.state
            .lock()
            .unwrap()
            .reported
            .insert(stash, (era, is_reported));
    }

    pub fn set_current_era(&self, era: u64) {
        self.state.lock().unwrap().current_era = era;
    }

    pub fn set_outcome(&self, outcome: TxOutcome) {
        self.state.lock().unwrap().outcome = outcome;
    }

    pub fn submissions(&self) -> Vec<(u64, RelayReport)> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().unwrap().reconnects
    }
}

impl ParaChain for MockPara {
    fn oracle_address(&self) -> Address {
        Address::repeat_byte(0xAA)
    }

    async fn stash_accounts(&self) -> Result<Vec<B256>, OracleError> {
        Ok(self.state.lock().unwrap().stashes.clone())
    }

    async fn current_era_id(&self) -> Result<u64, OracleError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_next_current_era.take() {
            return Err(err);
        }
        Ok(state.current_era)
    }

    async fn is_reported_last_era(&self, stash: B256) -> Result<(u64, bool), OracleError> {
        let state = self.state.lock().unwrap();
        Ok(state.reported.get(&stash).copied().unwrap_or((0, false)))
    }

    async fn oracle_balance(&self) -> Result<u128, OracleError> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn submit_report(
        &self,
        era_id: u64,
        report: &RelayReport,
    ) -> Result<TxOutcome, OracleError> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push((era_id, report.clone()));
        Ok(state.outcome.clone())
    }

    async fn reconnect(&mut self) {
        self.state.lock().unwrap().reconnects += 1;
    }
}

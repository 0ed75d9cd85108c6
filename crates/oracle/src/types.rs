// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire and domain types shared across the service.
//!
//! The `sol!` block below is the single source of truth for the OracleMaster
//! ABI surface the oracle calls; `RelayReport` field order is part of the ABI
//! and must not be reordered.

use alloy_sol_types::sol;
use subxt::utils::H256;

sol! {
    /// One unbonding chunk, as the OracleMaster consumes it.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct UnlockingChunk {
        uint128 balance;
        uint32 era;
    }

    /// Canonical per-stash report.
    ///
    /// `claimedRewards` stays empty until storage-proof support lands; the
    /// ledger's claimed-rewards data is read and dropped on purpose.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct RelayReport {
        bytes32 stashAccount;
        bytes32 controllerAccount;
        uint8 stakeStatus;
        uint128 activeBalance;
        uint128 totalBalance;
        UnlockingChunk[] unlocking;
        uint32[] claimedRewards;
        uint128 stashBalance;
        uint32 slashingSpans;
    }

    #[sol(rpc)]
    contract OracleMaster {
        function reportRelay(uint256 eraId, RelayReport calldata report) external;
        function getStashAccounts() external view returns (bytes32[] memory stashes);
        function getCurrentEraId() external view returns (uint256 eraId);
        function isReportedLastEra(address oracleMember, bytes32 stashAccount)
            external
            view
            returns (uint256 eraId, bool isReported);
    }
}

/// Classification of a stash at the pinned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeStatus {
    Idle,
    Nominator,
    Validator,
    /// Emitted only when the stash has no bonded controller.
    Unknown,
}

impl StakeStatus {
    pub fn as_wire(self) -> u8 {
        match self {
            StakeStatus::Idle => 0,
            StakeStatus::Nominator => 1,
            StakeStatus::Validator => 2,
            StakeStatus::Unknown => 3,
        }
    }
}

/// `Staking.ActiveEra` content: the era index and its start timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraInfo {
    pub index: u64,
    pub start: Option<u64>,
}

/// A (number, hash) pair. Hashes of the same number may change until the
/// block is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: H256,
}

/// Decoded `Staking.Ledger` content needed for a report. Unlocking chunks
/// keep the order received from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerData {
    pub active: u128,
    pub total: u128,
    pub unlocking: Vec<(u128, u32)>,
}

/// Outcome of one report submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Accepted on-chain. `None` when running in debug mode: nothing was
    /// actually sent.
    Sent(Option<alloy_primitives::B256>),
    /// Mined but reverted (receipt status 0).
    Reverted(alloy_primitives::B256),
    /// The dry run reverted; nothing was submitted.
    WillRevert(String),
}

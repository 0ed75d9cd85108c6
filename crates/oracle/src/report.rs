// SPDX-License-Identifier: GPL-3.0-or-later

//! Report reader: reconstructs the canonical per-stash report from
//! relay-chain state at a pinned block.

use crate::error::OracleError;
use crate::relay::RelayChain;
use crate::types::{RelayReport, StakeStatus, UnlockingChunk};
use alloy_primitives::B256;
use sp_core::crypto::AccountId32;
use subxt::utils::H256;

/// Build the report for one stash from state at `block_hash`.
///
/// When the stash has no bonded controller the report degrades to the
/// Unknown shape: the controller field repeats the stash key, balances and
/// lists are zeroed, and only the free balance is carried over.
pub async fn build_report<R: RelayChain>(
    relay: &R,
    stash: &AccountId32,
    block_hash: H256,
) -> Result<RelayReport, OracleError> {
    let stash_bytes: [u8; 32] = *stash.as_ref();
    let stash_balance = relay.free_balance(stash, block_hash).await?;
    let stake_status = stake_status(relay, stash, block_hash).await?;

    let Some(controller) = relay.bonded_controller(stash, block_hash).await? else {
        return Ok(RelayReport {
            stashAccount: B256::from(stash_bytes),
            controllerAccount: B256::from(stash_bytes),
            stakeStatus: StakeStatus::Unknown.as_wire(),
            activeBalance: 0,
            totalBalance: 0,
            unlocking: Vec::new(),
            claimedRewards: Vec::new(),
            stashBalance: stash_balance,
            slashingSpans: 0,
        });
    };

    let ledger = relay.ledger(&controller, block_hash).await?;
    let slashing_spans = relay.slashing_span_count(&controller, block_hash).await?;
    let controller_bytes: [u8; 32] = *controller.as_ref();

    Ok(RelayReport {
        stashAccount: B256::from(stash_bytes),
        controllerAccount: B256::from(controller_bytes),
        stakeStatus: stake_status.as_wire(),
        activeBalance: ledger.active,
        totalBalance: ledger.total,
        unlocking: ledger
            .unlocking
            .into_iter()
            .map(|(balance, era)| UnlockingChunk { balance, era })
            .collect(),
        // Put aside until storage proof has been implemented.
        claimedRewards: Vec::new(),
        stashBalance: stash_balance,
        slashingSpans: slashing_spans,
    })
}

async fn stake_status<R: RelayChain>(
    relay: &R,
    stash: &AccountId32,
    block_hash: H256,
) -> Result<StakeStatus, OracleError> {
    if relay.is_nominator(stash, block_hash).await? {
        return Ok(StakeStatus::Nominator);
    }
    if relay.is_session_validator(stash, block_hash).await? {
        return Ok(StakeStatus::Validator);
    }
    Ok(StakeStatus::Idle)
}

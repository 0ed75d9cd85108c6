// SPDX-License-Identifier: GPL-3.0-or-later

use subxt::utils::H256;
use thiserror::Error;

/// Message fragment of the fatal closed-socket class: the transport layer was
/// torn down underneath us after a shutdown began, so the process must exit
/// instead of recovering.
const CLOSED_SOCKET_SENTINEL: &str = "socket is already closed";

#[derive(Debug, Error)]
pub enum OracleError {
    /// Startup/configuration failure; the process exits nonzero.
    #[error("{0}")]
    Fatal(String),

    /// Relay-chain RPC, decoding or connection failure. `expected` marks the
    /// enumerated transient-network class that recovery handles at WARN.
    #[error("[relay] {message}")]
    Relay { message: String, expected: bool },

    /// Parachain RPC, contract or connection failure.
    #[error("[para] {message}")]
    Para { message: String, expected: bool },

    /// The era-boundary search window contained no block of the prior era.
    #[error("no block below era {era} within the search window")]
    EraBoundaryNotFound { era: u64 },

    /// The block picked by the boundary search finalized with a different
    /// hash, i.e. the search ran on a fork that did not finalize.
    #[error("block {number} finalized as {got:#x}, expected {expected:#x}")]
    BlockNotFound {
        number: u64,
        expected: H256,
        got: H256,
    },

    /// Cooperative shutdown: signal receipt or delay-shutdown.
    #[error("shutdown requested")]
    Shutdown,
}

impl OracleError {
    pub fn relay(message: impl Into<String>) -> Self {
        OracleError::Relay {
            message: message.into(),
            expected: true,
        }
    }

    pub fn relay_unexpected(message: impl Into<String>) -> Self {
        OracleError::Relay {
            message: message.into(),
            expected: false,
        }
    }

    pub fn para(message: impl Into<String>) -> Self {
        OracleError::Para {
            message: message.into(),
            expected: true,
        }
    }

    pub fn para_unexpected(message: impl Into<String>) -> Self {
        OracleError::Para {
            message: message.into(),
            expected: false,
        }
    }

    /// Whether the error belongs to the expected transient class that the
    /// recovery envelope demotes to a WARN and a reconnect.
    pub fn is_expected(&self) -> bool {
        match self {
            OracleError::Relay { expected, .. } | OracleError::Para { expected, .. } => *expected,
            OracleError::EraBoundaryNotFound { .. } | OracleError::BlockNotFound { .. } => true,
            OracleError::Fatal(_) | OracleError::Shutdown => false,
        }
    }

    pub fn is_closed_socket(&self) -> bool {
        match self {
            OracleError::Relay { message, .. } | OracleError::Para { message, .. } => {
                message.contains(CLOSED_SOCKET_SENTINEL)
            }
            _ => false,
        }
    }
}

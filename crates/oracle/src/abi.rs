// SPDX-License-Identifier: GPL-3.0-or-later

//! Startup validation of the OracleMaster ABI: the on-disk file must parse
//! and expose the methods the core calls, with selectors matching the
//! compiled bindings, and the configured address must hold deployed code.

use crate::error::OracleError;
use crate::para::ParaSession;
use crate::types::OracleMaster;
use alloy_json_abi::JsonAbi;
use alloy_sol_types::SolCall;
use std::path::Path;

/// Methods the core calls, with the selectors the bindings were compiled
/// against.
fn required_methods() -> [(&'static str, [u8; 4]); 4] {
    [
        ("reportRelay", OracleMaster::reportRelayCall::SELECTOR),
        ("getStashAccounts", OracleMaster::getStashAccountsCall::SELECTOR),
        ("getCurrentEraId", OracleMaster::getCurrentEraIdCall::SELECTOR),
        (
            "isReportedLastEra",
            OracleMaster::isReportedLastEraCall::SELECTOR,
        ),
    ]
}

pub fn load_abi(path: &Path) -> Result<JsonAbi, OracleError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        OracleError::Fatal(format!(
            "The file with the ABI was not found: {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        OracleError::Fatal(format!("Failed to parse the ABI {}: {e}", path.display()))
    })
}

/// Verify the ABI contains every required method with a matching selector.
pub fn check_required_methods(abi: &JsonAbi) -> Result<(), OracleError> {
    for (name, selector) in required_methods() {
        let found = abi
            .function(name)
            .map(|overloads| overloads.iter().any(|f| f.selector().0 == selector))
            .unwrap_or(false);
        if !found {
            return Err(OracleError::Fatal(format!(
                "The contract ABI does not contain the '{name}' function with the expected \
                 signature"
            )));
        }
    }
    Ok(())
}

/// Full startup check: parse the ABI, verify the method set, verify the
/// address holds code, and confirm the `reportRelay` selector is callable
/// (a revert from the zero-payload dry run is ignored).
pub async fn check_oracle_master(
    session: &ParaSession,
    abi_path: &Path,
) -> Result<(), OracleError> {
    tracing::info!("Checking OracleMaster ABI");
    let abi = load_abi(abi_path)?;
    check_required_methods(&abi)?;
    session.check_deployed().await?;
    session.probe_report_relay().await?;
    tracing::info!("The ABI is checked");
    Ok(())
}

// SPDX-License-Identifier: GPL-3.0-or-later

pub mod abi;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod oracle;
pub mod para;
pub mod relay;
pub mod report;
pub mod types;

#[cfg(test)]
pub mod test_fixtures;

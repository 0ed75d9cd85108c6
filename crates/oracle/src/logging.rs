// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;
use staking_oracle_config::LogLevel;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize console tracing from the validated LOG_LEVEL.
pub fn init(level: LogLevel) -> Result<()> {
    let filter = EnvFilter::try_new(level.as_filter())?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

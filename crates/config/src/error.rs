use thiserror::Error;

/// Failures while assembling the service parameters. Every one of these is
/// fatal: the oracle refuses to start on an invalid environment rather than
/// run with a partially-understood configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read the oracle environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid service parameter: {0}")]
    InvalidParameter(String),
}

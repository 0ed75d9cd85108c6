use crate::ConfigError;

/// A validated 32-byte secp256k1 private key in hex form.
///
/// The inner value is only reachable through [`PrivateKeyHex::expose`] and is
/// excluded from `Debug` output so it cannot leak through error or log paths.
#[derive(Clone)]
pub struct PrivateKeyHex(String);

impl PrivateKeyHex {
    /// Resolve the oracle key: the first line of the file at
    /// `ORACLE_PRIVATE_KEY_PATH` when readable, otherwise the
    /// `ORACLE_PRIVATE_KEY` value itself.
    pub fn resolve(
        key_path: Option<&str>,
        key_env: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = key_path
            && let Ok(contents) = std::fs::read_to_string(path)
            && let Some(first_line) = contents.lines().next()
        {
            return Self::parse(first_line.trim());
        }

        match key_env {
            Some(key) => Self::parse(key.trim()),
            None => Err(ConfigError::InvalidParameter(
                "Failed to parse a private key: neither 'ORACLE_PRIVATE_KEY_PATH' nor \
                 'ORACLE_PRIVATE_KEY' yielded a key"
                    .to_string(),
            )),
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(stripped).map_err(|_| {
            ConfigError::InvalidParameter("The private key is not valid hex".to_string())
        })?;
        if bytes.len() != 32 {
            return Err(ConfigError::InvalidParameter(format!(
                "The private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(PrivateKeyHex(stripped.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKeyHex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKeyHex(<redacted>)")
    }
}

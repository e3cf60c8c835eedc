use std::path::Path;

use crate::Config;

/// Characters legal in a server name; the separator must not match, or
/// aggregated tool names stop being injective.
pub const SERVER_NAME_PATTERN: &str = "^[A-Za-z0-9_-]+$";

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, deserializes,
    /// applies direct environment overrides, then validates.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, expansion fails, TOML
    /// parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded = crate::env::expand_env(&raw)
            .map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let mut config: Self =
            toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Build a configuration purely from environment variables
    ///
    /// Used when no config file exists: defaults plus the environment
    /// overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration fails validation
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error on an unusable separator, or on enabled features
    /// missing their required settings
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_separator()?;
        self.validate_auth()?;
        Ok(())
    }

    fn validate_separator(&self) -> anyhow::Result<()> {
        let sep = &self.router.separator;
        if sep.is_empty() {
            anyhow::bail!("router.separator must not be empty");
        }

        let name_chars = regex::Regex::new(SERVER_NAME_PATTERN).expect("name pattern is valid");
        if name_chars.is_match(sep) {
            anyhow::bail!(
                "router.separator {sep:?} is a valid server name; aggregated tool names would be ambiguous"
            );
        }

        Ok(())
    }

    fn validate_auth(&self) -> anyhow::Result<()> {
        if self.server.auth.enabled && self.server.auth.token.is_none() {
            anyhow::bail!("server.auth.token is required when auth is enabled");
        }
        Ok(())
    }
}

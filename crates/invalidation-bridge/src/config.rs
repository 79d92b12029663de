//! # Bridge Configuration
//!
//! Loaded from TOML or built in code.
//!
//! ```toml
//! [bridge]
//! channel_name = "cache-invalidation"
//! primary_election = "lowest-node-id"   # or "membership-service"
//! ```

use crate::domain::{BridgeError, PrimaryElection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default channel the bridge registers under.
pub const DEFAULT_CHANNEL_NAME: &str = "cache-invalidation";

/// Bridge configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Logical channel: RPC handler name, announcement store category and
    /// membership channel.
    pub channel_name: String,
    /// How the node that prunes dead announcements is chosen.
    pub primary_election: PrimaryElection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            primary_election: PrimaryElection::default(),
        }
    }
}

impl BridgeConfig {
    /// Config for a named channel with default election.
    pub fn for_channel(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            ..Self::default()
        }
    }

    /// Override primary election.
    #[must_use]
    pub fn with_primary_election(mut self, election: PrimaryElection) -> Self {
        self.primary_election = election;
        self
    }

    /// Reject configurations the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.channel_name.trim().is_empty() {
            return Err(BridgeError::Config("channel_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parse the `[bridge]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, BridgeError> {
        #[derive(Deserialize)]
        struct ConfigFile {
            #[serde(default)]
            bridge: BridgeConfig,
        }

        let file: ConfigFile =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        file.bridge.validate()?;
        Ok(file.bridge)
    }

    /// Load the `[bridge]` table from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.channel_name, DEFAULT_CHANNEL_NAME);
        assert_eq!(config.primary_election, PrimaryElection::LowestNodeId);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_table() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [bridge]
            channel_name = "orders-bridge"
            primary_election = "membership-service"
            "#,
        )
        .unwrap();

        assert_eq!(config.channel_name, "orders-bridge");
        assert_eq!(config.primary_election, PrimaryElection::MembershipService);
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_empty_channel_rejected() {
        let result = BridgeConfig::from_toml_str("[bridge]\nchannel_name = \"  \"\n");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_unknown_election_rejected() {
        let result = BridgeConfig::from_toml_str("[bridge]\nprimary_election = \"oldest\"\n");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = BridgeConfig::load("/nonexistent/bridge.toml");
        assert!(matches!(result, Err(BridgeError::Config(msg)) if msg.contains("bridge.toml")));
    }
}

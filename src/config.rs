//! Ledger configuration, read from TOML
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use super::store::SledStore;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    /// Throw the database away on drop; for tests and dry runs.
    pub temporary: bool,
    pub cache_capacity_bytes: u64,
    /// Days without deposit activity before a non-permanent reservation expires.
    pub reservation_grace_days: i64,
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("deposit-ledger.db"),
            temporary: false,
            cache_capacity_bytes: 64 * 1024 * 1024,
            reservation_grace_days: 30,
            log_filter: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
    pub fn open_store(&self) -> anyhow::Result<SledStore> {
        let db = sled::Config::new()
            .path(&self.db_path)
            .temporary(self.temporary)
            .cache_capacity(self.cache_capacity_bytes)
            .open()?;
        info!(path = %self.db_path.display(), temporary = self.temporary, "opened ledger store");
        SledStore::new(Arc::new(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = LedgerConfig::from_toml_str("reservation_grace_days = 14").unwrap();

        assert_eq!(config.reservation_grace_days, 14);
        assert_eq!(config.log_filter, "info");
        assert!(!config.temporary);
    }

    #[test]
    fn full_file_parses() {
        let config = LedgerConfig::from_toml_str(
            r#"
            db_path = "/var/lib/ledger/db"
            temporary = true
            cache_capacity_bytes = 1048576
            reservation_grace_days = 7
            log_filter = "deposit_ledger=debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/ledger/db"));
        assert_eq!(config.cache_capacity_bytes, 1_048_576);
        assert_eq!(config.log_filter, "deposit_ledger=debug");
    }

    #[test]
    fn temporary_store_opens() {
        let config = LedgerConfig {
            temporary: true,
            db_path: std::env::temp_dir().join("ledger-config-test"),
            ..LedgerConfig::default()
        };

        assert!(config.open_store().is_ok());
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(LedgerConfig::from_toml_str("reservation_grace_days = \"soon\"").is_err());
    }
}

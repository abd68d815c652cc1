//! Logger configuration.

use raftseal_storage::WalOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for an [`EncryptedRaftLogger`](crate::EncryptedRaftLogger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Directory holding every layout version's WAL and snapshot dirs.
    pub state_dir: PathBuf,

    /// Maximum size of a single WAL segment before a new one is cut.
    pub wal_segment_size: u64,

    /// Whether to fsync the WAL on every save (safer but slower).
    pub sync_writes: bool,

    /// How many earlier keys the logger keeps for decryption after a
    /// rotation. The oldest is dropped first.
    pub retained_decryption_keys: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("raft"),
            wal_segment_size: 64 * 1024 * 1024, // 64 MB
            sync_writes: true,
            retained_decryption_keys: 16,
        }
    }
}

impl LoggerConfig {
    /// Creates a configuration for `state_dir` with default values.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the WAL segment size.
    #[must_use]
    pub const fn wal_segment_size(mut self, size: u64) -> Self {
        self.wal_segment_size = size;
        self
    }

    /// Sets whether to sync the WAL on every save.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets how many earlier decryption keys are kept.
    #[must_use]
    pub const fn retained_decryption_keys(mut self, count: usize) -> Self {
        self.retained_decryption_keys = count;
        self
    }

    /// Options for the raw WAL engine.
    #[must_use]
    pub const fn wal_options(&self) -> WalOptions {
        WalOptions {
            segment_size_bytes: self.wal_segment_size,
            sync_writes: self.sync_writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.wal_segment_size, 64 * 1024 * 1024);
        assert!(config.sync_writes);
        assert_eq!(config.retained_decryption_keys, 16);
        assert_eq!(config.wal_options(), WalOptions::default());
    }

    #[test]
    fn builder_pattern() {
        let config = LoggerConfig::new("/var/lib/node")
            .wal_segment_size(4096)
            .sync_writes(false)
            .retained_decryption_keys(2);

        assert_eq!(config.state_dir, PathBuf::from("/var/lib/node"));
        assert_eq!(config.retained_decryption_keys, 2);
        let options = config.wal_options();
        assert_eq!(options.segment_size_bytes, 4096);
        assert!(!options.sync_writes);
    }

    #[test]
    fn loads_partial_json() {
        let config: LoggerConfig =
            serde_json::from_str(r#"{ "state_dir": "/data/raft", "sync_writes": false }"#)
                .unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/data/raft"));
        assert!(!config.sync_writes);
        assert_eq!(config.wal_segment_size, 64 * 1024 * 1024);
        assert_eq!(config.retained_decryption_keys, 16);
    }
}

//! Store configuration.
//!
//! Loaded from TOML once at startup and validated; there is no hot reload.
//! An external supervisor that wants new settings restarts the process.

use crate::gateway::policy::Role;
use crate::oplog::FlushPolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub memory: MemorySettings,
    pub persistence: PersistenceSettings,
    pub security: SecuritySettings,
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Footprint ceiling in bytes.
    pub ceiling_bytes: usize,
    /// Candidates sampled per eviction round.
    pub eviction_sample_size: usize,
    /// Fixed RNG seed for eviction sampling; reproducible runs only.
    pub eviction_seed: Option<u64>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            ceiling_bytes: 100 * 1024 * 1024,
            eviction_sample_size: 5,
            eviction_seed: None,
        }
    }
}

/// One snapshot trigger rule: at least `mutations` mutations within
/// `within_secs` seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnapshotRule {
    pub mutations: u64,
    pub within_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub data_dir: PathBuf,
    pub flush_policy: FlushPolicy,
    /// Evaluated with OR semantics on every mutation; any rule holding
    /// triggers a snapshot.
    pub snapshot_rules: Vec<SnapshotRule>,
    /// Log size past which a background rewrite is kicked off.
    pub rewrite_min_bytes: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            flush_policy: FlushPolicy::default(),
            snapshot_rules: vec![
                SnapshotRule { mutations: 1, within_secs: 900 },
                SnapshotRule { mutations: 100, within_secs: 300 },
                SnapshotRule { mutations: 10_000, within_secs: 60 },
            ],
            rewrite_min_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A configured user: bcrypt password hash plus permission scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// When set, sessions must AUTH before anything else.
    pub require_auth: bool,
    /// Command renames; an empty target disables the command outright.
    pub renames: HashMap<String, String>,
    /// Commands rejected unconditionally.
    pub denied: Vec<String>,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub slowlog_threshold_ms: u64,
    pub slowlog_capacity: usize,
    pub latency_threshold_us: u64,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            slowlog_threshold_ms: 10,
            slowlog_capacity: 128,
            latency_threshold_us: 100,
        }
    }
}

impl StoreConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: StoreConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.ceiling_bytes == 0 {
            bail!("memory ceiling cannot be 0");
        }
        if self.memory.eviction_sample_size == 0 {
            bail!("eviction sample size cannot be 0");
        }

        for rule in &self.persistence.snapshot_rules {
            if rule.mutations == 0 || rule.within_secs == 0 {
                bail!(
                    "snapshot rule must have non-zero mutations and window, got {} in {}s",
                    rule.mutations,
                    rule.within_secs
                );
            }
        }

        if self.security.require_auth && self.security.users.is_empty() {
            bail!("require_auth is set but no users are configured");
        }
        for user in &self.security.users {
            if user.username.is_empty() {
                bail!("user with empty username");
            }
            if user.password_hash.is_empty() {
                bail!("user '{}' has an empty password hash", user.username);
            }
        }

        if self.observability.slowlog_capacity == 0 {
            bail!("slowlog capacity cannot be 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = StoreConfig::default();
        config.memory.ceiling_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_without_users_rejected() {
        let mut config = StoreConfig::default();
        config.security.require_auth = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [memory]
            ceiling_bytes = 1048576
            eviction_sample_size = 7

            [persistence]
            data_dir = "/tmp/flint"
            flush_policy = "always"

            [[persistence.snapshot_rules]]
            mutations = 5
            within_secs = 30

            [security]
            require_auth = true
            denied = ["FLUSHALL"]

            [security.renames]
            REWRITELOG = ""

            [[security.users]]
            username = "ops"
            password_hash = "$2b$04$abcdefghijklmnopqrstuv"
            role = "admin"

            [observability]
            slowlog_threshold_ms = 25
        "#;

        let config: StoreConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.memory.ceiling_bytes, 1_048_576);
        assert_eq!(config.memory.eviction_sample_size, 7);
        assert_eq!(config.persistence.flush_policy, crate::oplog::FlushPolicy::Always);
        assert_eq!(config.persistence.snapshot_rules.len(), 1);
        assert_eq!(config.security.renames.get("REWRITELOG").unwrap(), "");
        assert_eq!(config.security.users[0].role, Role::Admin);
        assert_eq!(config.observability.slowlog_threshold_ms, 25);
        // Unspecified sections keep their defaults.
        assert_eq!(config.observability.slowlog_capacity, 128);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = StoreConfig::load(Path::new("/nonexistent/flintkv.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}

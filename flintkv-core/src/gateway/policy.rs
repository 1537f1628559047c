//! Security policy: the startup-frozen command table and credential set.
//!
//! Built once from configuration and never mutated afterwards. Command
//! resolution is a plain lookup in a frozen map; there is no runtime
//! dispatch machinery to subvert.

use crate::config::SecuritySettings;
use crate::error::StoreError;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Permission scope attached to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ReadOnly,
    ReadWrite,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ReadOnly => "read_only",
            Role::ReadWrite => "read_write",
            Role::Admin => "admin",
        }
    }

    /// Whether this scope covers `required`.
    pub fn allows(&self, required: Role) -> bool {
        *self >= required
    }
}

/// Canonical command names the gateway knows how to execute.
pub const COMMAND_NAMES: &[&str] = &[
    "AUTH", "PING", "GET", "SET", "DEL", "EXISTS", "EXPIRE", "TTL", "PERSIST", "SCAN", "DBSIZE",
    "LPUSH", "RPUSH", "LRANGE", "SADD", "SMEMBERS", "HSET", "HGET", "HGETALL", "FLUSHALL", "SAVE",
    "REWRITELOG", "SLOWLOG", "LATENCY", "INFO",
];

struct Credential {
    password_hash: String,
    role: Role,
}

/// Frozen rename/deny table plus credentials.
pub struct SecurityPolicy {
    require_auth: bool,
    /// Effective spelling → canonical command. Denied and disabled commands
    /// are simply absent; a renamed command is reachable only under its new
    /// spelling. Lookup is case-sensitive exact match.
    dispatch: HashMap<String, &'static str>,
    users: HashMap<String, Credential>,
}

impl SecurityPolicy {
    /// Build the policy from configuration, validating every referenced
    /// command name.
    pub fn from_settings(settings: &SecuritySettings) -> Result<Self> {
        let mut dispatch: HashMap<String, &'static str> = COMMAND_NAMES
            .iter()
            .map(|&name| (name.to_string(), name))
            .collect();

        for denied in &settings.denied {
            let canonical = canonical_name(denied)?;
            dispatch.remove(canonical);
        }

        for (original, target) in &settings.renames {
            let canonical = canonical_name(original)?;
            if dispatch.remove(canonical).is_none() {
                // Already denied; the rename is moot but not an error.
                continue;
            }
            if target.is_empty() {
                continue;
            }
            if dispatch.contains_key(target) {
                bail!("rename target '{}' collides with an existing command", target);
            }
            dispatch.insert(target.clone(), canonical);
        }

        if settings.require_auth && !dispatch.values().any(|&c| c == "AUTH") {
            bail!("AUTH cannot be denied or disabled while require_auth is set");
        }

        let users = settings
            .users
            .iter()
            .map(|u| {
                (
                    u.username.clone(),
                    Credential {
                        password_hash: u.password_hash.clone(),
                        role: u.role,
                    },
                )
            })
            .collect();

        Ok(Self {
            require_auth: settings.require_auth,
            dispatch,
            users,
        })
    }

    /// Policy with every command allowed and no authentication.
    pub fn open() -> Self {
        Self::from_settings(&SecuritySettings::default()).expect("default settings are valid")
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    /// Resolve a raw command token to its canonical name. Denied, disabled
    /// and unknown spellings are indistinguishable to the caller.
    pub fn resolve(&self, token: &str) -> Result<&'static str, StoreError> {
        self.dispatch
            .get(token)
            .copied()
            .ok_or_else(|| StoreError::CommandRejected(format!("unknown command '{}'", token)))
    }

    /// Verify credentials, returning the granted role.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Role, StoreError> {
        let credential = self.users.get(username).ok_or(StoreError::AuthFailed)?;
        match bcrypt::verify(password, &credential.password_hash) {
            Ok(true) => Ok(credential.role),
            _ => Err(StoreError::AuthFailed),
        }
    }
}

fn canonical_name(name: &str) -> Result<&'static str> {
    COMMAND_NAMES
        .iter()
        .copied()
        .find(|&c| c == name)
        .ok_or_else(|| anyhow::anyhow!("security policy references unknown command '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserEntry;

    fn settings() -> SecuritySettings {
        SecuritySettings::default()
    }

    #[test]
    fn test_open_policy_resolves_all_commands() {
        let policy = SecurityPolicy::open();
        for name in COMMAND_NAMES {
            assert_eq!(policy.resolve(name).unwrap(), *name);
        }
    }

    #[test]
    fn test_denied_command_unresolvable() {
        let mut s = settings();
        s.denied.push("FLUSHALL".into());
        let policy = SecurityPolicy::from_settings(&s).unwrap();

        assert!(matches!(
            policy.resolve("FLUSHALL"),
            Err(StoreError::CommandRejected(_))
        ));
        assert!(policy.resolve("GET").is_ok());
    }

    #[test]
    fn test_rename_moves_spelling() {
        let mut s = settings();
        s.renames.insert("SAVE".into(), "BACKUP-NOW".into());
        let policy = SecurityPolicy::from_settings(&s).unwrap();

        assert_eq!(policy.resolve("BACKUP-NOW").unwrap(), "SAVE");
        assert!(policy.resolve("SAVE").is_err());
    }

    #[test]
    fn test_rename_to_empty_disables_both_spellings() {
        let mut s = settings();
        s.renames.insert("REWRITELOG".into(), "".into());
        let policy = SecurityPolicy::from_settings(&s).unwrap();

        assert!(policy.resolve("REWRITELOG").is_err());
        assert!(policy.resolve("").is_err());
    }

    #[test]
    fn test_resolution_is_case_sensitive() {
        let policy = SecurityPolicy::open();
        assert!(policy.resolve("get").is_err());
        assert!(policy.resolve("GET").is_ok());
    }

    #[test]
    fn test_unknown_command_in_policy_rejected() {
        let mut s = settings();
        s.denied.push("SHUTDOWN".into());
        assert!(SecurityPolicy::from_settings(&s).is_err());
    }

    #[test]
    fn test_rename_collision_rejected() {
        let mut s = settings();
        s.renames.insert("SAVE".into(), "GET".into());
        assert!(SecurityPolicy::from_settings(&s).is_err());
    }

    #[test]
    fn test_auth_cannot_be_disabled_under_require_auth() {
        let mut s = settings();
        s.require_auth = true;
        s.users.push(UserEntry {
            username: "ops".into(),
            password_hash: bcrypt::hash("pw", 4).unwrap(),
            role: Role::Admin,
        });
        s.renames.insert("AUTH".into(), "".into());
        assert!(SecurityPolicy::from_settings(&s).is_err());
    }

    #[test]
    fn test_authenticate_verifies_bcrypt() {
        let mut s = settings();
        s.users.push(UserEntry {
            username: "ops".into(),
            password_hash: bcrypt::hash("secret", 4).unwrap(),
            role: Role::ReadWrite,
        });
        let policy = SecurityPolicy::from_settings(&s).unwrap();

        assert_eq!(policy.authenticate("ops", "secret").unwrap(), Role::ReadWrite);
        assert!(matches!(
            policy.authenticate("ops", "wrong"),
            Err(StoreError::AuthFailed)
        ));
        assert!(matches!(
            policy.authenticate("ghost", "secret"),
            Err(StoreError::AuthFailed)
        ));
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin.allows(Role::ReadOnly));
        assert!(Role::Admin.allows(Role::ReadWrite));
        assert!(Role::ReadWrite.allows(Role::ReadOnly));
        assert!(!Role::ReadOnly.allows(Role::ReadWrite));
        assert!(!Role::ReadWrite.allows(Role::Admin));
    }
}

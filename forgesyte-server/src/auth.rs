//! # Authentication
//!
//! Pre-shared API keys, SHA-256 hashed and compared against a table built
//! once at startup from `FORGESYTE_ADMIN_KEY`/`FORGESYTE_USER_KEY`. The
//! admin key carries `{admin, analyze, stream}`; the user key carries
//! `{analyze, stream}`. When neither is configured, unauthenticated
//! requests are treated as holding `{analyze, stream}` (spec §6.1).
//!
//! No JWT, no sessions, no rate limiting: those are LLM-gateway-specific
//! machinery with no counterpart in this server's permission model.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

/// The permission a caller holds after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    Admin,
    Analyze,
    Stream,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Admin => "admin",
            Permission::Analyze => "analyze",
            Permission::Stream => "stream",
        }
    }
}

fn default_permissions() -> HashSet<Permission> {
    [Permission::Analyze, Permission::Stream].into_iter().collect()
}

fn admin_permissions() -> HashSet<Permission> {
    [Permission::Admin, Permission::Analyze, Permission::Stream]
        .into_iter()
        .collect()
}

fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}

/// A static table of hashed keys to permission sets, built once at startup.
pub struct AuthTable {
    admin_hash: Option<String>,
    user_hash: Option<String>,
}

impl AuthTable {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            admin_hash: config.admin_key.as_deref().map(hash_key),
            user_hash: config.user_key.as_deref().map(hash_key),
        }
    }

    /// Whether any key is configured at all. If not, every request is
    /// treated as the default unauthenticated role.
    pub fn is_configured(&self) -> bool {
        self.admin_hash.is_some() || self.user_hash.is_some()
    }

    /// Resolves a presented key to a permission set, or `None` if it
    /// doesn't match anything in the table.
    pub fn permissions_for(&self, presented_key: &str) -> Option<HashSet<Permission>> {
        let hashed = hash_key(presented_key);
        if self.admin_hash.as_deref() == Some(hashed.as_str()) {
            return Some(admin_permissions());
        }
        if self.user_hash.as_deref() == Some(hashed.as_str()) {
            return Some(default_permissions());
        }
        None
    }

    /// Resolves the effective permission set for a request, honoring the
    /// "no keys configured" fallback from spec §6.1.
    pub fn resolve(&self, presented_key: Option<&str>) -> Option<HashSet<Permission>> {
        if !self.is_configured() {
            return Some(default_permissions());
        }
        presented_key.and_then(|key| self.permissions_for(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(admin: Option<&str>, user: Option<&str>) -> AuthConfig {
        AuthConfig {
            enabled: admin.is_some() || user.is_some(),
            admin_key: admin.map(str::to_string),
            user_key: user.map(str::to_string),
        }
    }

    #[test]
    fn no_keys_configured_grants_default_permissions_unauthenticated() {
        let table = AuthTable::from_config(&config_with(None, None));
        assert!(!table.is_configured());
        let permissions = table.resolve(None).unwrap();
        assert!(permissions.contains(&Permission::Analyze));
        assert!(permissions.contains(&Permission::Stream));
        assert!(!permissions.contains(&Permission::Admin));
    }

    #[test]
    fn admin_key_grants_admin_permission() {
        let table = AuthTable::from_config(&config_with(Some("top-secret-admin"), None));
        let permissions = table.resolve(Some("top-secret-admin")).unwrap();
        assert!(permissions.contains(&Permission::Admin));
    }

    #[test]
    fn user_key_grants_default_permissions_only() {
        let table = AuthTable::from_config(&config_with(Some("admin-key"), Some("user-key")));
        let permissions = table.resolve(Some("user-key")).unwrap();
        assert!(!permissions.contains(&Permission::Admin));
        assert!(permissions.contains(&Permission::Analyze));
    }

    #[test]
    fn unrecognized_key_is_rejected_when_table_is_configured() {
        let table = AuthTable::from_config(&config_with(Some("admin-key"), None));
        assert!(table.resolve(Some("wrong-key")).is_none());
        assert!(table.resolve(None).is_none());
    }
}

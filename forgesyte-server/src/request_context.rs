//! Per-request context attached to `http::Request` extensions by
//! `auth_middleware`, read back by handlers and the logging/metrics layers.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use uuid::Uuid;

use crate::auth::Permission;

/// Identity and bookkeeping for a single in-flight HTTP request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID for tracing.
    pub request_id: String,
    /// Permission set resolved by `auth_middleware` for this request.
    pub permissions: HashSet<Permission>,
    /// Request start time for latency tracking.
    start_time: Instant,
    /// Request metadata.
    metadata: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(permissions: HashSet<Permission>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            permissions,
            start_time: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(HashSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_unique_request_id() {
        let a = RequestContext::new(HashSet::new());
        let b = RequestContext::new(HashSet::new());
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn has_permission_reflects_the_granted_set() {
        let ctx = RequestContext::new([Permission::Analyze].into_iter().collect());
        assert!(ctx.has_permission(&Permission::Analyze));
        assert!(!ctx.has_permission(&Permission::Admin));
    }

    #[test]
    fn metadata_roundtrips() {
        let ctx = RequestContext::new(HashSet::new()).with_metadata("plugin", "ocr");
        assert_eq!(ctx.get_metadata("plugin"), Some(&"ocr".to_string()));
        assert_eq!(ctx.get_metadata("missing"), None);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::principal::Principal;

/// Resolves bearer tokens to principals. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SessionManager {
    by_token: Arc<RwLock<HashMap<String, Principal>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fixed token to `principal`, replacing any earlier binding.
    pub fn register(&self, token: &str, principal: Principal) {
        debug!(target: "drivegate::session", "session.register user={}", principal.display_name());
        self.by_token.write().insert(token.to_string(), principal);
    }

    pub fn validate(&self, token: &str) -> Option<Principal> {
        self.by_token.read().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_token.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.read().is_empty()
    }
}

//! Upload handshake descriptors.
//!
//! A caller first asks the drive for an `UploadPlan` describing how the
//! declared write must be performed, then either streams the bytes through
//! `Drive::save` (provider `local`) or talks to the out-of-band endpoint the
//! plan names. Plans are one-shot and never persisted; nothing between the
//! backend and the caller interprets `config`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Provider name for plans that are fulfilled by a direct `save` call.
pub const PROVIDER_LOCAL: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadPlan {
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

impl UploadPlan {
    pub fn new(provider: impl Into<String>, config: Value) -> Self {
        Self { provider: provider.into(), config }
    }

    /// Plan telling the caller to `PUT` the content back through this service.
    pub fn direct(path: &str, overwrite: bool) -> Self {
        Self::new(PROVIDER_LOCAL, json!({
            "method": "PUT",
            "url": format!("/content{}", path),
            "overwrite": overwrite,
        }))
    }

    pub fn is_direct(&self) -> bool {
        self.provider == PROVIDER_LOCAL
    }
}

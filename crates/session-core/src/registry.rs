//! Active call tracking
//!
//! The embedding application usually juggles several calls (one active,
//! others on hold). The registry maps the dialog identifier the SIP
//! layer uses to the call object, so signalling events can be routed.

use std::sync::Arc;

use dashmap::DashMap;

use crate::call::Call;

/// Concurrent map of dialog id to call
#[derive(Default)]
pub struct CallRegistry {
    calls: DashMap<String, Arc<Call>>,
}

impl CallRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a call under the given dialog id
    pub fn insert(&self, dialog_id: &str, call: Arc<Call>) {
        self.calls.insert(dialog_id.to_string(), call);
    }

    /// Look up a call by dialog id
    pub fn get(&self, dialog_id: &str) -> Option<Arc<Call>> {
        self.calls.get(dialog_id).map(|entry| Arc::clone(&entry))
    }

    /// Remove a finished call; returns it if it was tracked
    pub fn remove(&self, dialog_id: &str) -> Option<Arc<Call>> {
        self.calls.remove(dialog_id).map(|(_, call)| call)
    }

    /// Number of tracked calls
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are tracked
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallConfig;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = CallRegistry::new();
        assert!(registry.is_empty());

        let (call, _events) = Call::new(CallConfig::default());
        registry.insert("dlg-1", Arc::clone(&call));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("dlg-1").is_some());
        assert!(registry.get("dlg-2").is_none());

        assert!(registry.remove("dlg-1").is_some());
        assert!(registry.is_empty());
    }
}

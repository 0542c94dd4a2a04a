//! Duplicate submission guard
//!
//! Remembers a fingerprint of every accepted create request for a short
//! window. A second request with the same fingerprint inside the window is
//! rejected instead of producing a second post.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Entries older than this are purged on the next check
const RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct DuplicateGuard {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DuplicateGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `fingerprint` and return `true`, or `false` if it was already
    /// seen within the window.
    pub fn check(&self, fingerprint: &str) -> bool {
        self.check_at(fingerprint, Instant::now())
    }

    fn check_at(&self, fingerprint: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let retention = RETENTION.max(self.window);
        seen.retain(|_, at| now.saturating_duration_since(*at) < retention);

        if let Some(at) = seen.get(fingerprint) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        seen.insert(fingerprint.to_string(), now);
        true
    }

    /// Drop a fingerprint so the same request may be retried immediately
    pub fn forget(&self, fingerprint: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint);
    }
}

/// SHA-256 over the user and every field that makes two requests "the same"
pub fn fingerprint(user_id: &str, parts: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(parts.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::history::BoundedHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded queue of user-visible notifications, oldest dropped first.
pub struct Toasts {
    entries: Mutex<BoundedHistory<Toast>>,
    enabled: AtomicBool,
}

impl Toasts {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BoundedHistory::new(capacity)),
            enabled: AtomicBool::new(true),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BoundedHistory<Toast>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false when notifications are switched off and the toast was dropped.
    pub fn push(&self, level: ToastLevel, message: impl Into<String>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.entries().push(Toast {
            level,
            message: message.into(),
            at: Utc::now(),
        });
        true
    }

    pub fn snapshot(&self) -> Vec<Toast> {
        self.entries().to_vec()
    }

    pub fn clear(&self) {
        let capacity = self.entries().capacity();
        *self.entries() = BoundedHistory::new(capacity);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_and_ordered() {
        let toasts = Toasts::new(2);
        toasts.push(ToastLevel::Info, "a");
        toasts.push(ToastLevel::Warn, "b");
        toasts.push(ToastLevel::Error, "c");
        let msgs: Vec<_> = toasts.snapshot().into_iter().map(|t| t.message).collect();
        assert_eq!(msgs, vec!["b", "c"]);
    }

    #[test]
    fn test_disabled_drops() {
        let toasts = Toasts::new(5);
        toasts.set_enabled(false);
        assert!(!toasts.push(ToastLevel::Info, "ignored"));
        assert!(toasts.snapshot().is_empty());
        toasts.set_enabled(true);
        assert!(toasts.push(ToastLevel::Info, "kept"));
        toasts.clear();
        assert!(toasts.snapshot().is_empty());
    }
}

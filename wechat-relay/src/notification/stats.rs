//! Delivery statistics and the notices derived from them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::notifier::{Notice, Notifier};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_sent: u64,
    pub total_failed: u64,
    pub last_sent_at: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct LastEvents {
    sent_at: Option<DateTime<Local>>,
    error: Option<String>,
}

/// Recipient-level delivery counters.
///
/// Counters only grow; they live as long as the process, across sessions.
pub struct MessageStats {
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    last: Mutex<LastEvents>,
    notifier: RwLock<Arc<dyn Notifier>>,
}

impl MessageStats {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            last: Mutex::new(LastEvents::default()),
            notifier: RwLock::new(notifier),
        }
    }

    /// Replace the notifier, e.g. after a reconfiguration.
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.write() = notifier;
    }

    pub fn record_success(&self, count: u64) {
        self.total_sent.fetch_add(count, Ordering::Relaxed);
        self.last.lock().sent_at = Some(Local::now());
    }

    pub fn record_failure(&self, count: u64) {
        self.total_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last.lock();
        StatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            last_sent_at: last.sent_at,
            last_error: last.error.clone(),
        }
    }

    fn emit(&self, notice: Notice) {
        let notifier = self.notifier.read().clone();
        notifier.notify(notice);
    }

    /// The relay was enabled or disabled for `user`.
    pub fn notify_status(&self, user: &str, enabled: bool) {
        let state = if enabled { "enabled" } else { "disabled" };
        self.emit(Notice::new(
            "WeChat relay status changed",
            format!("WeChat relay for user {user} is now {state}"),
            Notice::STATUS_PRIORITY,
        ));
    }

    /// `succeeded` of `total` recipients received `title`.
    pub fn notify_delivery(&self, title: &str, succeeded: usize, total: usize) {
        self.emit(Notice::new(
            "WeChat push succeeded",
            format!("Message \"{title}\" pushed to {succeeded}/{total} recipients"),
            Notice::DELIVERY_PRIORITY,
        ));
    }

    /// Delivery of `title` failed with `errors` out of `total` attempts.
    ///
    /// The rendered text is also kept as the last error.
    pub fn notify_error(&self, title: &str, errors: &[String], total: usize) {
        let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        let message = format!(
            "Message \"{title}\" failed for {}/{total}:\n{}",
            errors.len(),
            lines.join("\n")
        );

        self.last.lock().error = Some(message.clone());
        self.emit(Notice::new(
            "WeChat push failed",
            message,
            Notice::ERROR_PRIORITY,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::RecordingNotifier;

    fn stats() -> (MessageStats, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (MessageStats::new(notifier.clone()), notifier)
    }

    #[test]
    fn test_counters_accumulate() {
        let (stats, _) = stats();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        stats.record_success(3);
        stats.record_failure(1);
        stats.record_success(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_sent, 5);
        assert_eq!(snapshot.total_failed, 1);
        assert!(snapshot.last_sent_at.is_some());
    }

    #[test]
    fn test_failure_does_not_touch_last_sent() {
        let (stats, _) = stats();
        stats.record_failure(2);
        assert_eq!(stats.snapshot().last_sent_at, None);
    }

    #[test]
    fn test_notices() {
        let (stats, notifier) = stats();
        stats.notify_status("admin", true);
        stats.notify_delivery("Backup", 2, 3);
        stats.notify_error(
            "Backup",
            &["openid o-ab****wxyz: timeout".to_string()],
            3,
        );

        let notices = notifier.notices();
        assert_eq!(notices.len(), 3);

        assert_eq!(notices[0].priority, Notice::STATUS_PRIORITY);
        assert_eq!(notices[0].message, "WeChat relay for user admin is now enabled");

        assert_eq!(notices[1].priority, Notice::DELIVERY_PRIORITY);
        assert_eq!(notices[1].message, "Message \"Backup\" pushed to 2/3 recipients");

        assert_eq!(notices[2].priority, Notice::ERROR_PRIORITY);
        assert_eq!(
            notices[2].message,
            "Message \"Backup\" failed for 1/3:\n  - openid o-ab****wxyz: timeout"
        );
        assert_eq!(stats.snapshot().last_error.as_deref(), Some(notices[2].message.as_str()));
    }

    #[test]
    fn test_set_notifier() {
        let (stats, first) = stats();
        let second = Arc::new(RecordingNotifier::default());

        stats.notify_status("admin", false);
        stats.set_notifier(second.clone());
        stats.notify_status("admin", true);

        assert_eq!(first.notices().len(), 1);
        assert_eq!(second.notices().len(), 1);
    }
}

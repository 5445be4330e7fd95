//! Concurrent fan-out to many recipients.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::pusher::{PushError, Pusher};
use super::report::{DeliveryReport, RecipientError};
use crate::notification::MessageStats;
use crate::utils::mask;

/// Pushes a message to every recipient and records the outcome.
pub struct Dispatcher {
    pusher: Arc<dyn Pusher>,
    stats: Arc<MessageStats>,
}

impl Dispatcher {
    pub fn new(pusher: Arc<dyn Pusher>, stats: Arc<MessageStats>) -> Self {
        Self { pusher, stats }
    }

    /// Deliver `title`/`body` to every address in `openids`.
    ///
    /// Each recipient gets its own task; all of them finish before the report
    /// is built. An empty list is skipped without touching the statistics.
    pub async fn deliver(&self, openids: &[String], title: &str, body: &str) -> DeliveryReport {
        if openids.is_empty() {
            debug!(title, "No recipients, skipping delivery");
            return DeliveryReport::skipped();
        }

        let title: Arc<str> = Arc::from(title);
        let body: Arc<str> = Arc::from(body);

        let mut tasks = JoinSet::new();
        let mut recipient_of = HashMap::with_capacity(openids.len());
        for openid in openids {
            let pusher = self.pusher.clone();
            let openid_owned = openid.clone();
            let title = title.clone();
            let body = body.clone();
            let handle = tasks.spawn(async move {
                pusher.push(&openid_owned, &title, &body).await
            });
            recipient_of.insert(handle.id(), openid.as_str());
        }

        let mut errors = Vec::new();
        let mut succeeded = 0;
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(PushError::Task(e.to_string()))),
            };
            match outcome {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    let recipient = recipient_of.get(&id).map(|o| mask(o)).unwrap_or_default();
                    warn!(openid = %recipient, error = %e, "Delivery failed");
                    errors.push(RecipientError {
                        recipient,
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = DeliveryReport {
            total: openids.len(),
            succeeded,
            failed: errors.len(),
            skipped: false,
            errors,
        };

        if report.failed > 0 {
            self.stats.record_failure(report.failed as u64);
            self.stats
                .notify_error(&title, &report.error_lines(), report.total);
        }
        if report.succeeded > 0 {
            self.stats.record_success(report.succeeded as u64);
            self.stats
                .notify_delivery(&title, report.succeeded, report.total);
        }

        info!(
            title = %title,
            succeeded = report.succeeded,
            total = report.total,
            "Delivery finished"
        );
        report
    }
}

//! Delivery statistics and relay status notices.

mod notifier;
mod stats;

pub use notifier::{GotifyNotifier, LogNotifier, Notice, Notifier, RecordingNotifier};
pub use stats::{MessageStats, StatsSnapshot};

use std::sync::Arc;

use crate::config::RelayConfig;

/// Build the notifier a config asks for.
///
/// Notices go to Gotify when an application token is configured and to the log
/// otherwise.
pub fn notifier_for(config: &RelayConfig) -> Arc<dyn Notifier> {
    if config.notifier.app_token.is_empty() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(GotifyNotifier::new(
            config.notifier_url(),
            config.notifier.app_token.clone(),
        ))
    }
}

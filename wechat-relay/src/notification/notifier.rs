//! Host notifiers.
//!
//! Status notices are posted back to Gotify as messages of the relay's own
//! application, tagged in `extras` so the stream listener can drop them when
//! they come back. Sending never blocks the caller: the HTTP call runs on its
//! own task and failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::stream::event::RELAY_NOTICE_EXTRA;

/// A human-readable status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub priority: i64,
}

impl Notice {
    pub const STATUS_PRIORITY: i64 = 2;
    pub const DELIVERY_PRIORITY: i64 = 1;
    pub const ERROR_PRIORITY: i64 = 5;

    pub fn new(title: impl Into<String>, message: impl Into<String>, priority: i64) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority,
        }
    }
}

/// Receives relay notices. Implementations must return promptly.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        info!(
            title = %notice.title,
            priority = notice.priority,
            "{}",
            notice.message
        );
    }
}

/// Keeps notices in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Body of `POST /message`.
#[derive(Debug, Serialize)]
struct GotifyPayload {
    #[serde(flatten)]
    notice: Notice,
    extras: serde_json::Value,
}

impl From<Notice> for GotifyPayload {
    fn from(notice: Notice) -> Self {
        Self {
            notice,
            extras: json!({ RELAY_NOTICE_EXTRA: true }),
        }
    }
}

/// Posts notices to `POST {gotify}/message` with an application token.
pub struct GotifyNotifier {
    client: Client,
    endpoint: Arc<str>,
    app_token: Arc<str>,
}

impl GotifyNotifier {
    const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(gotify_url: &str, app_token: impl Into<String>) -> Self {
        wechat_api::install_rustls_provider();
        let client = Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Gotify HTTP client; using defaults");
                Client::new()
            });

        Self {
            client,
            endpoint: Arc::from(message_endpoint(gotify_url)),
            app_token: Arc::from(app_token.into()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Notifier for GotifyNotifier {
    fn notify(&self, notice: Notice) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(title = %notice.title, "No async runtime, dropping notice");
            return;
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let app_token = self.app_token.clone();

        runtime.spawn(async move {
            let payload = GotifyPayload::from(notice);
            let result = client
                .post(endpoint.as_ref())
                .header("X-Gotify-Key", app_token.as_ref())
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(title = %payload.notice.title, "Notice posted to Gotify");
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!(%status, body = %body, "Gotify rejected notice");
                }
                Err(e) => warn!(error = %e, "Failed to post notice to Gotify"),
            }
        });
    }
}

/// `{base}/message`, defaulting the scheme to `http`.
fn message_endpoint(gotify_url: &str) -> String {
    let base = gotify_url.trim();
    let base = if base.is_empty() {
        crate::stream::endpoint::DEFAULT_GOTIFY_HOST.to_string()
    } else if base.contains("://") {
        base.to_string()
    } else {
        format!("http://{base}")
    };
    format!("{}/message", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_message_endpoint() {
        assert_eq!(message_endpoint(""), "http://localhost/message");
        assert_eq!(message_endpoint("gotify.lan"), "http://gotify.lan/message");
        assert_eq!(
            message_endpoint("https://example.com/gotify/"),
            "https://example.com/gotify/message"
        );
    }

    #[test]
    fn test_recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::default();
        notifier.notify(Notice::new("a", "first", 1));
        notifier.notify(Notice::new("b", "second", 5));

        let titles: Vec<_> = notifier.notices().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_gotify_notifier_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(header("X-Gotify-Key", "A-token"))
            .and(body_json(json!({
                "title": "WeChat push failed",
                "message": "details",
                "priority": 5,
                "extras": { "wechat_relay::notice": true },
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = GotifyNotifier::new(&server.uri(), "A-token");
        notifier.notify(Notice::new(
            "WeChat push failed",
            "details",
            Notice::ERROR_PRIORITY,
        ));

        for _ in 0..100 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        server.verify().await;
    }
}

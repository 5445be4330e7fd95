//! Relay lifecycle.
//!
//! A [`Relay`] holds the current configuration and, while enabled, one
//! [`Session`]: the access token cache, dispatcher and stream listener built
//! from that configuration. Enabling builds a session, disabling tears it down,
//! and a new configuration replaces the running session with a fresh one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wechat_api::{AccessTokenCache, WeChatClient, WeChatCredentials};

use crate::config::RelayConfig;
use crate::delivery::{DeliveryReport, Dispatcher, WeChatPusher};
use crate::error::{Error, Result};
use crate::notification::{LogNotifier, MessageStats, Notifier, notifier_for};
use crate::status::{RecipientStatus, RelayStatus, StreamStatus};
use crate::stream::{ListenerConfig, RouteMatcher, StreamHandle, StreamListener};
use crate::utils::mask;

/// Title of the canned test message.
pub const TEST_TITLE: &str = "Test Message";

/// Body of the canned test message.
pub const TEST_BODY: &str = "This is a test message from Gotify WeChat Relay";

/// Default time a stopping session waits for in-flight deliveries.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything built for one enabled period.
struct Session {
    config: Arc<RelayConfig>,
    dispatcher: Arc<Dispatcher>,
    matcher: Arc<RouteMatcher>,
    openids: Vec<String>,
    stream: Option<StreamHandle>,
    tracker: TaskTracker,
}

impl Session {
    fn start(config: Arc<RelayConfig>, stats: Arc<MessageStats>) -> Result<Self> {
        let wechat = &config.wechat;
        let client = Arc::new(WeChatClient::with_options(
            WeChatCredentials::new(&wechat.appid, &wechat.app_secret),
            &wechat.api_base,
            wechat.timeout(),
        ));
        let tokens = Arc::new(AccessTokenCache::new(client.clone()));
        let pusher = Arc::new(WeChatPusher::new(
            client,
            tokens,
            &wechat.template_id,
            &wechat.jump_url,
        ));
        let dispatcher = Arc::new(Dispatcher::new(pusher, stats.clone()));

        let recipients = config.effective_recipients();
        let matcher = Arc::new(RouteMatcher::new(&config.stream.routes, &recipients)?);
        let openids = recipients.into_iter().map(|r| r.openid).collect();
        let tracker = TaskTracker::new();

        let stream = if config.stream_enabled() {
            info!(routes = matcher.len(), "Starting Gotify stream listener");
            Some(StreamListener::start(
                ListenerConfig::from_stream_config(&config.stream),
                matcher.clone(),
                dispatcher.clone(),
                stats,
                tracker.clone(),
            ))
        } else {
            debug!("No client token configured, stream listener not started");
            None
        };

        Ok(Self {
            config,
            dispatcher,
            matcher,
            openids,
            stream,
            tracker,
        })
    }

    /// Stop the stream listener. Deliveries it already spawned keep running.
    async fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop().await;
        }
    }

    /// Wait for in-flight deliveries, at most `grace`.
    async fn drain(self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                pending = self.tracker.len(),
                "Deliveries still running after shutdown grace period"
            );
        }
    }
}

/// The relay: configuration plus an optional running session.
pub struct Relay {
    config: RwLock<Option<Arc<RelayConfig>>>,
    session: Mutex<Option<Session>>,
    enabled: AtomicBool,
    stats: Arc<MessageStats>,
    /// Used when the config names no Gotify application token.
    default_notifier: Arc<dyn Notifier>,
    shutdown_grace: Duration,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    /// Create an unconfigured relay that logs its notices.
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    /// Create an unconfigured relay with a specific notifier.
    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config: RwLock::new(None),
            session: Mutex::new(None),
            enabled: AtomicBool::new(false),
            stats: Arc::new(MessageStats::new(notifier.clone())),
            default_notifier: notifier,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn stats(&self) -> &Arc<MessageStats> {
        &self.stats
    }

    /// The active configuration, if any.
    pub fn config(&self) -> Option<Arc<RelayConfig>> {
        self.config.read().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Validate and install a new configuration.
    ///
    /// An invalid configuration is rejected and the current one stays active.
    /// A running session is restarted with the new configuration.
    pub async fn set_config(&self, config: RelayConfig) -> Result<()> {
        let config = Arc::new(config.prepare()?);
        self.apply_notifier(&config);

        let mut session = self.session.lock().await;
        *self.config.write() = Some(config.clone());

        let Some(mut old) = session.take() else {
            return Ok(());
        };
        info!("Restarting session with new configuration");
        old.stop_stream().await;
        let result = Session::start(config, self.stats.clone()).map(|new| {
            *session = Some(new);
        });
        if result.is_err() {
            self.enabled.store(false, Ordering::Release);
        }
        drop(session);

        old.drain(self.shutdown_grace).await;
        result
    }

    fn apply_notifier(&self, config: &RelayConfig) {
        let notifier = if config.notifier.app_token.is_empty() {
            self.default_notifier.clone()
        } else {
            notifier_for(config)
        };
        self.stats.set_notifier(notifier);
    }

    /// Start a session. Enabling an enabled relay does nothing.
    pub async fn enable(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let config = self
            .config()
            .ok_or_else(|| Error::config("relay is not configured"))?;
        let user = config.user.clone();

        *session = Some(Session::start(config, self.stats.clone())?);
        self.enabled.store(true, Ordering::Release);

        info!(user = %user, "Relay enabled");
        self.stats.notify_status(&user, true);
        Ok(())
    }

    /// Stop the running session, waiting for in-flight deliveries up to the
    /// shutdown grace period. Disabling a disabled relay does nothing.
    ///
    /// The session lock is released before that wait.
    pub async fn disable(&self) -> Result<()> {
        let current = {
            let mut session = self.session.lock().await;
            let Some(mut current) = session.take() else {
                return Ok(());
            };
            self.enabled.store(false, Ordering::Release);
            current.stop_stream().await;
            current
        };

        let user = current.config.user.clone();
        current.drain(self.shutdown_grace).await;

        info!(user = %user, "Relay disabled");
        self.stats.notify_status(&user, false);
        Ok(())
    }

    /// Push a message to every configured recipient.
    pub async fn send(&self, title: &str, body: &str) -> Result<DeliveryReport> {
        let (dispatcher, openids) = {
            let session = self.session.lock().await;
            let session = session.as_ref().ok_or(Error::Disabled)?;
            (session.dispatcher.clone(), session.openids.clone())
        };
        Ok(dispatcher.deliver(&openids, title, body).await)
    }

    /// Push the canned test message to every configured recipient.
    pub async fn test(&self) -> Result<DeliveryReport> {
        self.send(TEST_TITLE, TEST_BODY).await
    }

    /// Snapshot for the status endpoints.
    pub async fn status(&self) -> RelayStatus {
        let config = self.config();
        let session = self.session.lock().await;

        let stream = session.as_ref().and_then(|s| {
            s.config.stream_enabled().then(|| StreamStatus {
                state: s
                    .stream
                    .as_ref()
                    .map(|h| h.state().to_string())
                    .unwrap_or_else(|| "Disconnected".to_string()),
                connected: s.stream.as_ref().is_some_and(StreamHandle::connected),
                routes: s.matcher.describe(),
            })
        });

        RelayStatus {
            configured: config.is_some(),
            enabled: session.is_some(),
            user: config.as_ref().map(|c| c.user.clone()).unwrap_or_default(),
            appid: config
                .as_ref()
                .map(|c| mask(&c.wechat.appid))
                .unwrap_or_default(),
            template_id: config
                .as_ref()
                .map(|c| mask(&c.wechat.template_id))
                .unwrap_or_default(),
            legacy_recipient: config
                .as_ref()
                .is_some_and(|c| c.recipients.is_empty() && !c.wechat.openid.is_empty()),
            recipients: config
                .as_ref()
                .map(|c| {
                    c.effective_recipients()
                        .into_iter()
                        .map(|r| RecipientStatus {
                            name: r.name,
                            openid: mask(&r.openid),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            stats: self.stats.snapshot(),
            stream,
        }
    }

    /// Markdown status page. `base_url` is where the HTTP API is reachable.
    pub async fn display(&self, base_url: &str) -> String {
        crate::status::render(&self.status().await, base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Recipient;
    use crate::notification::{Notice, RecordingNotifier};

    fn config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.user = "admin".to_string();
        config.wechat.appid = "wx1234567890".to_string();
        config.wechat.app_secret = "secret".to_string();
        config.wechat.template_id = "template-0001".to_string();
        config.wechat.api_base = "http://127.0.0.1:9".to_string();
        config.recipients = vec![Recipient::new("alice", "o-alice-0001")];
        config
    }

    fn relay() -> (Relay, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = Relay::with_notifier(notifier.clone()).with_shutdown_grace(Duration::from_secs(1));
        (relay, notifier)
    }

    #[tokio::test]
    async fn test_enable_requires_config() {
        let (relay, _) = relay();
        let err = relay.enable().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!relay.is_enabled());
    }

    #[tokio::test]
    async fn test_send_while_disabled() {
        let (relay, _) = relay();
        relay.set_config(config()).await.unwrap();
        assert!(matches!(relay.send("t", "b").await, Err(Error::Disabled)));
    }

    #[tokio::test]
    async fn test_enable_disable_notices() {
        let (relay, notifier) = relay();
        relay.set_config(config()).await.unwrap();

        relay.enable().await.unwrap();
        relay.enable().await.unwrap();
        assert!(relay.is_enabled());

        relay.disable().await.unwrap();
        relay.disable().await.unwrap();
        assert!(!relay.is_enabled());

        let messages: Vec<_> = notifier.notices().into_iter().map(|n| n.message).collect();
        assert_eq!(
            messages,
            [
                "WeChat relay for user admin is now enabled",
                "WeChat relay for user admin is now disabled",
            ]
        );
        assert!(
            notifier
                .notices()
                .iter()
                .all(|n| n.priority == Notice::STATUS_PRIORITY)
        );
    }

    #[tokio::test]
    async fn test_invalid_config_keeps_previous() {
        let (relay, _) = relay();
        relay.set_config(config()).await.unwrap();

        let mut bad = config();
        bad.wechat.appid = "not-a-wechat-app".to_string();
        assert!(relay.set_config(bad).await.is_err());

        assert_eq!(relay.config().unwrap().wechat.appid, "wx1234567890");
    }

    #[tokio::test]
    async fn test_reconfigure_restarts_session() {
        let (relay, _) = relay();
        relay.set_config(config()).await.unwrap();
        relay.enable().await.unwrap();

        let mut next = config();
        next.recipients.push(Recipient::new("bob", "o-bob-0002"));
        relay.set_config(next).await.unwrap();

        assert!(relay.is_enabled());
        let status = relay.status().await;
        assert_eq!(status.recipients.len(), 2);
        relay.disable().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_masks_identifiers() {
        let (relay, _) = relay();
        relay.set_config(config()).await.unwrap();

        let status = relay.status().await;
        assert!(status.configured);
        assert!(!status.enabled);
        assert_eq!(status.appid, "wx12****7890");
        assert_eq!(status.template_id, "temp****0001");
        assert_eq!(status.recipients[0].openid, "o-al****0001");
        assert!(status.stream.is_none());
    }
}

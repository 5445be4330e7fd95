//! Reconnecting Gotify stream listener.
//!
//! One supervising task owns the websocket. Each decoded event is routed and,
//! when it has recipients, handed to the dispatcher as its own tracked task so a
//! slow delivery never stalls the read loop. In-flight deliveries are bounded by
//! a semaphore; when it is exhausted the read loop waits for a permit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use super::StreamError;
use super::endpoint::resolve_stream_url;
use super::event::GotifyMessage;
use super::router::RouteMatcher;
use crate::config::StreamConfig;
use crate::delivery::Dispatcher;
use crate::notification::MessageStats;

/// Title of the notice sent when the stream drops.
pub const DISCONNECT_NOTICE_TITLE: &str = "Stream disconnected";

/// Connection state of a [`StreamListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: the listener was stopped.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub gotify_url: String,
    pub client_token: String,
    pub max_in_flight: usize,
    pub dial_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ListenerConfig {
    pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(120);

    pub fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            gotify_url: config.gotify_url.clone(),
            client_token: config.client_token.clone(),
            max_in_flight: config.max_in_flight.max(1),
            dial_timeout: Self::DEFAULT_DIAL_TIMEOUT,
            initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
            max_backoff: Self::DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Spawns the supervising loop of a Gotify stream connection.
pub struct StreamListener {
    config: ListenerConfig,
    matcher: Arc<RouteMatcher>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<MessageStats>,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<ConnectionState>>,
    cancel: CancellationToken,
}

impl StreamListener {
    /// Start listening. Deliveries are spawned on `tracker`.
    pub fn start(
        config: ListenerConfig,
        matcher: Arc<RouteMatcher>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<MessageStats>,
        tracker: TaskTracker,
    ) -> StreamHandle {
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));
        let cancel = CancellationToken::new();

        let listener = Self {
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            config,
            matcher,
            dispatcher,
            stats,
            tracker,
            state: state.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(listener.run());

        StreamHandle {
            cancel,
            state,
            task: Some(task),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    async fn run(self) {
        let mut backoff = self.config.initial_backoff;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let result = self.connect_and_listen(&mut backoff).await;
            self.set_state(ConnectionState::Disconnected);

            let err = match result {
                Ok(()) => break,
                Err(e) => e,
            };
            if self.cancel.is_cancelled() {
                break;
            }

            warn!(error = %err, retry_in = ?backoff, "Stream disconnected, reconnecting");
            self.stats
                .notify_error(DISCONNECT_NOTICE_TITLE, &[err.to_string()], 1);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.config.max_backoff);
        }

        self.set_state(ConnectionState::Stopped);
        debug!("Stream listener stopped");
    }

    /// Returns `Ok(())` only when stopped; every other exit is an error.
    async fn connect_and_listen(&self, backoff: &mut Duration) -> Result<(), StreamError> {
        let url = resolve_stream_url(&self.config.gotify_url, &self.config.client_token)?;
        let endpoint = format!(
            "{}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.path()
        );
        debug!(endpoint = %endpoint, "Connecting to Gotify stream");

        let dial = tokio::time::timeout(self.config.dial_timeout, connect_async(url.as_str()));
        let mut ws = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            dialed = dial => match dialed {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => return Err(StreamError::Dial(e)),
                Err(_) => return Err(StreamError::DialTimeout(self.config.dial_timeout)),
            },
        };

        self.set_state(ConnectionState::Connected);
        *backoff = self.config.initial_backoff;
        info!(endpoint = %endpoint, "Connected to Gotify stream");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_frame(text).await,
                        Err(e) => warn!(error = %e, "Skipping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "close frame".to_string());
                        return Err(StreamError::Closed(reason));
                    }
                    Some(Ok(_)) => trace!("Ignoring control frame"),
                    Some(Err(e)) => return Err(StreamError::Read(e)),
                    None => return Err(StreamError::Closed("stream ended".to_string())),
                },
            }
        }
    }

    async fn handle_frame(&self, frame: &str) {
        let event = match GotifyMessage::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to parse stream message");
                return;
            }
        };
        if event.is_relay_notice() {
            trace!(id = event.id, "Skipping the relay's own notice");
            return;
        }

        let recipients = self.matcher.resolve_recipients(event.appid, event.priority);
        if recipients.is_empty() {
            debug!(
                id = event.id,
                appid = event.appid,
                priority = event.priority,
                "No route for stream message"
            );
            return;
        }

        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let dispatcher = self.dispatcher.clone();
        let title = event.display_title().to_string();
        let body = event.display_body().to_string();
        debug!(
            id = event.id,
            appid = event.appid,
            recipients = recipients.len(),
            "Forwarding stream message"
        );

        self.tracker.spawn(async move {
            let _permit = permit;
            let report = dispatcher.deliver(&recipients, &title, &body).await;
            debug!(
                id = event.id,
                succeeded = report.succeeded,
                failed = report.failed,
                "Stream message delivered"
            );
        });
    }
}

/// Delay before the next attempt after another consecutive failure.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Handle to a running [`StreamListener`].
///
/// Dropping the handle signals the listener to stop without waiting for it.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    state: Arc<Mutex<ConnectionState>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether a live connection exists right now.
    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop the listener, close the socket and wait for the loop to exit.
    ///
    /// Deliveries already spawned keep running on the tracker.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Stream listener task failed");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

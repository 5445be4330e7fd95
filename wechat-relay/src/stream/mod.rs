//! Gotify stream ingestion.
//!
//! - [`router`]: which events are forwarded, and to whom
//! - [`endpoint`]: websocket URL of the Gotify `/stream` endpoint
//! - [`listener`]: the reconnecting websocket reader

pub mod endpoint;
pub mod event;
pub mod listener;
pub mod router;

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub use endpoint::resolve_stream_url;
pub use event::GotifyMessage;
pub use listener::{ConnectionState, ListenerConfig, StreamHandle, StreamListener};
pub use router::RouteMatcher;

/// Errors that end one stream connection. All of them are retried.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("invalid gotify_url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("websocket dial failed: {0}")]
    Dial(#[source] tungstenite::Error),

    #[error("websocket dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("read message failed: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("stream closed: {0}")]
    Closed(String),
}

//! Relay Gotify notifications to WeChat Official Account template messages.
//!
//! The library is what the `wechat-relay` binary runs; it is exposed for
//! integration testing.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod notification;
pub mod relay;
pub mod status;
pub mod stream;
pub mod utils;

pub use error::{Error, Result};
pub use relay::Relay;

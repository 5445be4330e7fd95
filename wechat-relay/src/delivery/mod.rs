//! Multi-recipient delivery.
//!
//! The [`Dispatcher`] fans one message out to many recipients concurrently and
//! folds the per-recipient outcomes into a [`DeliveryReport`]. The actual push
//! goes through a [`Pusher`], which is the WeChat template API in production.

pub mod dispatcher;
pub mod pusher;
pub mod report;

pub use dispatcher::Dispatcher;
pub use pusher::{PushError, Pusher, WeChatPusher};
pub use report::{DeliveryReport, RecipientError};

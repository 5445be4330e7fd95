//! WeChat Official Account push API.
//!
//! Provides a thin client for the two calls a notification relay needs:
//!
//! - `POST /cgi-bin/stable_token`: exchange the app id/secret for an access token
//! - `POST /cgi-bin/message/template/send`: deliver a template message to one user
//!
//! and an [`AccessTokenCache`] that keeps the short-lived access token warm,
//! refreshing it five minutes before it expires with at most one exchange in
//! flight at a time.
//!
//! # Example
//!
//! ```ignore
//! use wechat_api::{AccessTokenCache, TemplateMessage, WeChatClient, WeChatCredentials};
//!
//! let client = std::sync::Arc::new(WeChatClient::new(WeChatCredentials::new("wx123", "secret")));
//! let cache = AccessTokenCache::new(client.clone());
//!
//! let token = cache.get_token().await?;
//! let message = TemplateMessage::new("openid", "template", "https://example.com", "Title", "Body");
//! client.send_template(&token, &message).await?;
//! ```

mod client;
mod error;
mod models;
mod token;

pub use client::{
    DEFAULT_API_BASE, DEFAULT_TIMEOUT, TokenSource, WeChatClient, WeChatCredentials,
    install_rustls_provider,
};
pub use error::{ApiError, CredentialError, Result};
pub use models::{
    AccessToken, AccessTokenResponse, StableTokenRequest, TemplateData, TemplateMessage,
    TemplateSendResponse, TemplateValue,
};
pub use token::{AccessTokenCache, REFRESH_MARGIN};

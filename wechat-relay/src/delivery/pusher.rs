//! Single-recipient push.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use wechat_api::{AccessTokenCache, ApiError, CredentialError, TemplateMessage, WeChatClient};

use crate::utils::mask;

/// Failure to deliver to one recipient.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("failed to get access token: {0}")]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("delivery task failed: {0}")]
    Task(String),
}

/// Delivers one message to one recipient.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, openid: &str, title: &str, body: &str) -> Result<(), PushError>;
}

/// Pushes WeChat template messages using a cached access token.
pub struct WeChatPusher {
    client: Arc<WeChatClient>,
    tokens: Arc<AccessTokenCache<Arc<WeChatClient>>>,
    template_id: String,
    jump_url: String,
}

impl WeChatPusher {
    pub fn new(
        client: Arc<WeChatClient>,
        tokens: Arc<AccessTokenCache<Arc<WeChatClient>>>,
        template_id: impl Into<String>,
        jump_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            template_id: template_id.into(),
            jump_url: jump_url.into(),
        }
    }
}

#[async_trait]
impl Pusher for WeChatPusher {
    async fn push(&self, openid: &str, title: &str, body: &str) -> Result<(), PushError> {
        let token = self.tokens.get_token().await?;
        let message = TemplateMessage::new(openid, &self.template_id, &self.jump_url, title, body);

        match self.client.send_template(&token, &message).await {
            Ok(msgid) => {
                debug!(openid = %mask(openid), msgid, "Template message sent");
                Ok(())
            }
            Err(e) => {
                if e.is_invalid_token() {
                    // The next push exchanges a fresh token instead of reusing this one.
                    warn!(error = %e, "WeChat rejected the cached access token");
                    self.tokens.invalidate().await;
                }
                Err(e.into())
            }
        }
    }
}

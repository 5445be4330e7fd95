//! HTTP client for the WeChat Official Account API.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::models::{
    AccessToken, AccessTokenResponse, StableTokenRequest, TemplateMessage, TemplateSendResponse,
};

/// Production API host.
pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

/// Timeout applied to every call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const STABLE_TOKEN_PATH: &str = "/cgi-bin/stable_token";
const TEMPLATE_SEND_PATH: &str = "/cgi-bin/message/template/send";

/// Install the process-wide rustls crypto provider once.
///
/// Must run before the first HTTP client or TLS websocket is built.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// App id and secret of an Official Account.
#[derive(Clone)]
pub struct WeChatCredentials {
    pub appid: String,
    pub secret: String,
}

impl WeChatCredentials {
    pub fn new(appid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            appid: appid.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for WeChatCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeChatCredentials")
            .field("appid", &self.appid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Something that can exchange credentials for a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn fetch_token(&self) -> Result<AccessToken> {
        (**self).fetch_token().await
    }
}

/// WeChat API client.
#[derive(Debug, Clone)]
pub struct WeChatClient {
    client: Client,
    api_base: String,
    credentials: WeChatCredentials,
}

impl WeChatClient {
    /// Create a client against the production API host.
    pub fn new(credentials: WeChatCredentials) -> Self {
        Self::with_options(credentials, DEFAULT_API_BASE, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom API host and timeout.
    pub fn with_options(
        credentials: WeChatCredentials,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        install_rustls_provider();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build WeChat HTTP client; using defaults");
                Client::new()
            });

        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// The configured app id.
    pub fn appid(&self) -> &str {
        &self.credentials.appid
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Exchange the app credentials for an access token.
    pub async fn fetch_access_token(&self) -> Result<AccessToken> {
        let request = StableTokenRequest {
            grant_type: "client_credential",
            appid: &self.credentials.appid,
            secret: &self.credentials.secret,
        };

        let response = self
            .client
            .post(self.endpoint(STABLE_TOKEN_PATH))
            .json(&request)
            .send()
            .await?;

        let body: AccessTokenResponse = read_json(response).await?;

        if body.errcode != 0 {
            return Err(ApiError::api(body.errcode, body.errmsg));
        }
        if body.access_token.is_empty() {
            return Err(ApiError::EmptyToken);
        }

        debug!(expires_in = body.expires_in, "Fetched WeChat access token");
        Ok(AccessToken {
            token: body.access_token,
            expires_in: Duration::from_secs(body.expires_in),
        })
    }

    /// Send a template message. Returns the WeChat message id.
    pub async fn send_template(&self, access_token: &str, message: &TemplateMessage) -> Result<i64> {
        let response = self
            .client
            .post(self.endpoint(TEMPLATE_SEND_PATH))
            .query(&[("access_token", access_token)])
            .json(message)
            .send()
            .await?;

        let body: TemplateSendResponse = read_json(response).await?;

        if body.errcode != 0 {
            return Err(ApiError::api(body.errcode, body.errmsg));
        }

        Ok(body.msgid)
    }
}

#[async_trait]
impl TokenSource for WeChatClient {
    async fn fetch_token(&self) -> Result<AccessToken> {
        self.fetch_access_token().await
    }
}

/// Read a JSON body, keeping the raw text for non-success statuses.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    Ok(serde_json::from_str(&text)?)
}

//! Relay configuration.
//!
//! Loaded from a TOML file, then overridden by environment variables. A config
//! is immutable once loaded: reconfiguration builds a new [`RelayConfig`],
//! validates it and swaps it in whole.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::stream::{RouteMatcher, resolve_stream_url};

/// Landing page opened when a recipient taps a template message.
pub const DEFAULT_JUMP_URL: &str = "https://push.hzz.cool";

/// Name given to the recipient built from the legacy `wechat.openid` field.
pub const LEGACY_RECIPIENT_NAME: &str = "default";

/// Default upper bound on concurrently running stream deliveries.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Default path of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "wechat-relay.toml";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Start a session on boot.
    pub enabled: bool,
    /// Display name used in status notices.
    pub user: String,
    pub wechat: WeChatConfig,
    pub recipients: Vec<Recipient>,
    pub stream: StreamConfig,
    pub notifier: NotifierConfig,
    pub server: ServerConfig,
    pub logging: LoggingSettings,
}

/// WeChat Official Account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeChatConfig {
    pub appid: String,
    pub app_secret: String,
    pub template_id: String,
    pub jump_url: String,
    /// Legacy single recipient, used when no `[[recipients]]` are configured.
    pub openid: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for WeChatConfig {
    fn default() -> Self {
        Self {
            appid: String::new(),
            app_secret: String::new(),
            template_id: String::new(),
            jump_url: DEFAULT_JUMP_URL.to_string(),
            openid: String::new(),
            api_base: wechat_api::DEFAULT_API_BASE.to_string(),
            timeout_secs: wechat_api::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl WeChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// A named push target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub openid: String,
}

impl Recipient {
    pub fn new(name: impl Into<String>, openid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            openid: openid.into(),
        }
    }
}

/// One routing rule, as written in the config file.
///
/// `path` is either `*` (match everything) or a path ending in an application
/// id, e.g. `application/7`. `recipients` names the recipients that receive
/// matching events; leaving it out means everyone, an empty list means no one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub app_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
}

/// Gotify stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub gotify_url: String,
    /// Gotify client token. The stream listener only runs when this is set.
    pub client_token: String,
    pub max_in_flight: usize,
    pub routes: Vec<RouteRule>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            gotify_url: String::new(),
            client_token: String::new(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            routes: Vec::new(),
        }
    }
}

/// Where relay status notices go.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Gotify application token. Notices are only logged when empty.
    pub app_token: String,
    /// Gotify base URL for notices; falls back to `stream.gotify_url`.
    pub gotify_url: String,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12580,
            enable_cors: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
    pub json: bool,
    /// Enables daily-rolling file output when set.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_LOG_FILTER.to_string(),
            json: false,
            directory: None,
        }
    }
}

impl RelayConfig {
    /// Read a config file, apply environment overrides, normalize and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded config file");

        let mut config = Self::from_toml_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.prepare()
    }

    /// Parse a TOML document without validating it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply environment-style overrides. `lookup` returns the value of a variable.
    ///
    /// Supported keys: `WECHAT_APPID`, `WECHAT_APP_SECRET`, `WECHAT_TEMPLATE_ID`,
    /// `WECHAT_OPENID`, `GOTIFY_URL`, `GOTIFY_CLIENT_TOKEN`, `GOTIFY_APP_TOKEN`,
    /// `API_BIND_ADDRESS` and `API_PORT`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WECHAT_APPID") {
            self.wechat.appid = v;
        }
        if let Some(v) = get("WECHAT_APP_SECRET") {
            self.wechat.app_secret = v;
        }
        if let Some(v) = get("WECHAT_TEMPLATE_ID") {
            self.wechat.template_id = v;
        }
        if let Some(v) = get("WECHAT_OPENID") {
            self.wechat.openid = v;
        }
        if let Some(v) = get("GOTIFY_URL") {
            self.stream.gotify_url = v;
        }
        if let Some(v) = get("GOTIFY_CLIENT_TOKEN") {
            self.stream.client_token = v;
        }
        if let Some(v) = get("GOTIFY_APP_TOKEN") {
            self.notifier.app_token = v;
        }
        if let Some(v) = get("API_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(port) = get("API_PORT")
            && let Ok(parsed) = port.trim().parse::<u16>()
        {
            self.server.port = parsed;
        }
    }

    /// Normalize the config and validate it.
    pub fn prepare(mut self) -> Result<Self> {
        self.normalize();
        self.validate()?;
        Ok(self)
    }

    fn normalize(&mut self) {
        let wechat = &mut self.wechat;
        for field in [
            &mut wechat.appid,
            &mut wechat.app_secret,
            &mut wechat.template_id,
            &mut wechat.jump_url,
            &mut wechat.openid,
        ] {
            *field = field.trim().to_string();
        }
        if wechat.jump_url.is_empty() {
            wechat.jump_url = DEFAULT_JUMP_URL.to_string();
        }
        if wechat.api_base.trim().is_empty() {
            wechat.api_base = wechat_api::DEFAULT_API_BASE.to_string();
        }

        for recipient in &mut self.recipients {
            recipient.name = recipient.name.trim().to_string();
            recipient.openid = recipient.openid.trim().to_string();
        }

        self.stream.gotify_url = self.stream.gotify_url.trim().to_string();
        self.stream.client_token = self.stream.client_token.trim().to_string();
        self.notifier.app_token = self.notifier.app_token.trim().to_string();
    }

    /// Check the config for anything that would prevent a session from running.
    pub fn validate(&self) -> Result<()> {
        let wechat = &self.wechat;
        if wechat.appid.trim().is_empty() {
            return Err(Error::validation("wechat.appid is required"));
        }
        if !wechat.appid.trim().starts_with("wx") {
            return Err(Error::validation("wechat.appid must start with 'wx'"));
        }
        if wechat.app_secret.trim().is_empty() {
            return Err(Error::validation("wechat.app_secret is required"));
        }
        if wechat.template_id.trim().is_empty() {
            return Err(Error::validation("wechat.template_id is required"));
        }

        if self.recipients.is_empty() && wechat.openid.trim().is_empty() {
            return Err(Error::validation(
                "at least one recipient (or wechat.openid) is required",
            ));
        }

        let mut names = HashSet::with_capacity(self.recipients.len());
        for (i, recipient) in self.recipients.iter().enumerate() {
            if recipient.name.trim().is_empty() {
                return Err(Error::validation(format!("recipients[{i}]: name is required")));
            }
            if recipient.openid.trim().is_empty() {
                return Err(Error::validation(format!(
                    "recipients[{i}] ({}): openid is required",
                    recipient.name
                )));
            }
            if !names.insert(recipient.name.trim()) {
                return Err(Error::validation(format!(
                    "duplicate recipient name: {}",
                    recipient.name
                )));
            }
        }

        if self.stream.max_in_flight == 0 {
            return Err(Error::validation("stream.max_in_flight must be at least 1"));
        }

        if self.stream_enabled() {
            resolve_stream_url(&self.stream.gotify_url, &self.stream.client_token)
                .map_err(|e| Error::validation(format!("stream: {e}")))?;
        }

        RouteMatcher::new(&self.stream.routes, &self.effective_recipients())?;
        Ok(())
    }

    /// Configured recipients, or the legacy single openid when none are listed.
    pub fn effective_recipients(&self) -> Vec<Recipient> {
        if !self.recipients.is_empty() {
            return self.recipients.clone();
        }
        let openid = self.wechat.openid.trim();
        if openid.is_empty() {
            Vec::new()
        } else {
            vec![Recipient::new(LEGACY_RECIPIENT_NAME, openid)]
        }
    }

    /// Whether a stream listener should run for this config.
    pub fn stream_enabled(&self) -> bool {
        !self.stream.client_token.is_empty()
    }

    /// Gotify base URL used for status notices.
    pub fn notifier_url(&self) -> &str {
        if self.notifier.gotify_url.trim().is_empty() {
            &self.stream.gotify_url
        } else {
            &self.notifier.gotify_url
        }
    }
}

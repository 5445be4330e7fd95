//! Request and response bodies of the WeChat API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Body of `POST /cgi-bin/stable_token`.
#[derive(Debug, Clone, Serialize)]
pub struct StableTokenRequest<'a> {
    pub grant_type: &'a str,
    pub appid: &'a str,
    pub secret: &'a str,
}

/// Response of the token exchange.
///
/// On failure WeChat omits the token fields and only sets `errcode`/`errmsg`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessTokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

/// A freshly exchanged access token and its reported lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: Duration,
}

/// A single `{ "value": ... }` template field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateValue {
    pub value: String,
}

/// Template data with the `title` and `content` keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateData {
    pub title: TemplateValue,
    pub content: TemplateValue,
}

/// Body of `POST /cgi-bin/message/template/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateMessage {
    pub touser: String,
    pub template_id: String,
    pub url: String,
    pub data: TemplateData,
}

impl TemplateMessage {
    pub fn new(
        touser: impl Into<String>,
        template_id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            touser: touser.into(),
            template_id: template_id.into(),
            url: url.into(),
            data: TemplateData {
                title: TemplateValue {
                    value: title.into(),
                },
                content: TemplateValue {
                    value: content.into(),
                },
            },
        }
    }
}

/// Response of the template send call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateSendResponse {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub msgid: i64,
}

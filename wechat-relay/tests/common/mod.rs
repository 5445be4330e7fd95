//! Shared fixtures: a mocked WeChat API and relay configs pointing at it.

#![allow(dead_code)]

use serde_json::json;
use wechat_relay::config::{Recipient, RelayConfig};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ALICE: &str = "o-alice-0001";
pub const BOB: &str = "o-bob-000002";
/// Not subscribed to the account; every push to it fails.
pub const UNSUBSCRIBED: &str = "o-unsubscribed";

/// A WeChat API that issues tokens, accepts pushes to [`ALICE`] and [`BOB`]
/// and rejects pushes to [`UNSUBSCRIBED`].
pub async fn wechat_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/cgi-bin/stable_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ACCESS",
            "expires_in": 7200,
        })))
        .mount(&server)
        .await;

    for openid in [ALICE, BOB] {
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/template/send"))
            .and(body_partial_json(json!({ "touser": openid })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errcode": 0,
                "errmsg": "ok",
                "msgid": 200228332,
            })))
            .mount(&server)
            .await;
    }

    Mock::given(method("POST"))
        .and(path("/cgi-bin/message/template/send"))
        .and(body_partial_json(json!({ "touser": UNSUBSCRIBED })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 43004,
            "errmsg": "require subscribe",
        })))
        .mount(&server)
        .await;

    server
}

/// A valid config whose WeChat calls go to `api_base`.
pub fn relay_config(api_base: &str, recipients: &[(&str, &str)]) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.user = "admin".to_string();
    config.wechat.appid = "wx0123456789".to_string();
    config.wechat.app_secret = "app-secret".to_string();
    config.wechat.template_id = "template-0001".to_string();
    config.wechat.api_base = api_base.to_string();
    config.wechat.timeout_secs = 2;
    config.recipients = recipients
        .iter()
        .map(|(name, openid)| Recipient::new(*name, *openid))
        .collect();
    config
}

/// Template pushes the mock server received for `openid`.
pub async fn pushes_to(server: &MockServer, openid: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/cgi-bin/message/template/send")
        .filter(|r| {
            serde_json::from_slice::<serde_json::Value>(&r.body)
                .map(|body| body["touser"] == openid)
                .unwrap_or(false)
        })
        .count()
}

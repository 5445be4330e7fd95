use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wechat_api::{AccessTokenCache, ApiError, TemplateMessage, WeChatClient, WeChatCredentials};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> WeChatClient {
    WeChatClient::with_options(
        WeChatCredentials::new("wx0123456789", "app-secret"),
        server.uri(),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_fetch_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/stable_token"))
        .and(body_partial_json(json!({
            "grant_type": "client_credential",
            "appid": "wx0123456789",
            "secret": "app-secret",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ACCESS",
            "expires_in": 7200,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client_for(&server).fetch_access_token().await.unwrap();
    assert_eq!(token.token, "ACCESS");
    assert_eq!(token.expires_in, Duration::from_secs(7200));
}

#[tokio::test]
async fn test_fetch_access_token_errcode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/stable_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 40013,
            "errmsg": "invalid appid",
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_access_token().await.unwrap_err();
    match err {
        ApiError::Api { code, message } => {
            assert_eq!(code, 40013);
            assert_eq!(message, "invalid appid");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fetch_access_token_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/stable_token"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_access_token().await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 502, .. }));
}

#[tokio::test]
async fn test_send_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/message/template/send"))
        .and(query_param("access_token", "ACCESS"))
        .and(body_partial_json(json!({
            "touser": "o-alice",
            "template_id": "tpl-1",
            "data": { "title": { "value": "Disk full" }, "content": { "value": "/var at 99%" } },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 0,
            "errmsg": "ok",
            "msgid": 200228332,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let message = TemplateMessage::new(
        "o-alice",
        "tpl-1",
        "https://push.hzz.cool",
        "Disk full",
        "/var at 99%",
    );
    let msgid = client_for(&server)
        .send_template("ACCESS", &message)
        .await
        .unwrap();
    assert_eq!(msgid, 200228332);
}

#[tokio::test]
async fn test_send_template_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/message/template/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 40001,
            "errmsg": "invalid credential",
        })))
        .mount(&server)
        .await;

    let message = TemplateMessage::new("o-alice", "tpl-1", "", "t", "c");
    let err = client_for(&server)
        .send_template("STALE", &message)
        .await
        .unwrap_err();
    assert!(err.is_invalid_token());
}

#[tokio::test]
async fn test_cache_over_http_exchanges_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/stable_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "ACCESS", "expires_in": 7200 }))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(AccessTokenCache::new(Arc::new(client_for(&server))));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_token().await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "ACCESS");
    }
    assert_eq!(cache.exchange_count(), 1);
}

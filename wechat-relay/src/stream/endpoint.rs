//! Gotify stream endpoint resolution.

use url::Url;

use super::StreamError;

/// Host used when no Gotify URL is configured.
pub const DEFAULT_GOTIFY_HOST: &str = "http://localhost";

/// Build the websocket URL of the Gotify `/stream` endpoint.
///
/// `http` becomes `ws` and `https` becomes `wss`; a base without a scheme is
/// treated as `http`. The client token is set as the `token` query parameter.
pub fn resolve_stream_url(base: &str, client_token: &str) -> Result<Url, StreamError> {
    let base = base.trim();
    let base = if base.is_empty() {
        DEFAULT_GOTIFY_HOST.to_string()
    } else if base.contains("://") {
        base.to_string()
    } else {
        format!("http://{base}")
    };

    let parsed = Url::parse(&base).map_err(|e| StreamError::InvalidUrl {
        url: base.clone(),
        reason: e.to_string(),
    })?;

    let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
    let host = parsed.host_str().ok_or_else(|| StreamError::InvalidUrl {
        url: base.clone(),
        reason: "missing host".to_string(),
    })?;

    // Rebuilt rather than `set_scheme`, which refuses to switch between
    // special and non-special schemes (e.g. `tcp://` to `ws://`).
    let mut authority = host.to_string();
    if let Some(port) = parsed.port() {
        authority.push_str(&format!(":{port}"));
    }
    let path = format!("{}/stream", parsed.path().trim_end_matches('/'));

    let mut url = Url::parse(&format!("{scheme}://{authority}{path}")).map_err(|e| {
        StreamError::InvalidUrl {
            url: base.clone(),
            reason: e.to_string(),
        }
    })?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query.append_pair("token", client_token);
    }

    Ok(url)
}

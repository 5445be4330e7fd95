//! Relay status snapshot and its markdown rendering.

use std::fmt::Write;

use serde::Serialize;

use crate::notification::StatsSnapshot;

/// A recipient as shown on the status page. The address is masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientStatus {
    pub name: String,
    pub openid: String,
}

/// Stream listener part of the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub state: String,
    pub connected: bool,
    pub routes: Vec<String>,
}

/// Everything the status endpoints show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStatus {
    pub configured: bool,
    pub enabled: bool,
    pub user: String,
    pub appid: String,
    pub template_id: String,
    /// Recipients come from the single legacy `openid` setting.
    pub legacy_recipient: bool,
    pub recipients: Vec<RecipientStatus>,
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamStatus>,
}

/// Render the markdown status page. `base_url` is the public address of the
/// HTTP API, used for the usage section.
pub fn render(status: &RelayStatus, base_url: &str) -> String {
    if !status.configured {
        return "Relay not configured\n\nPlease configure the relay with your WeChat credentials."
            .to_string();
    }

    let base = base_url.trim_end_matches('/');
    let mut out = String::new();

    let _ = writeln!(out, "# WeChat Template Message Pusher\n");
    let _ = writeln!(
        out,
        "**Status:** {}\n",
        if status.enabled { "Enabled" } else { "Disabled" }
    );

    let _ = writeln!(out, "## Configuration");
    let _ = writeln!(out, "- **AppID:** {}", status.appid);
    let _ = writeln!(out, "- **Template ID:** {}", status.template_id);

    if status.legacy_recipient {
        if let Some(r) = status.recipients.first() {
            let _ = writeln!(out, "\n### Recipient\n- **OpenID:** {}", r.openid);
        }
    } else if !status.recipients.is_empty() {
        let _ = writeln!(out, "\n### Recipients");
        for r in &status.recipients {
            let _ = writeln!(out, "- **{}:** {}", r.name, r.openid);
        }
    }

    let stats = &status.stats;
    let last_sent = stats
        .last_sent_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let _ = writeln!(out, "\n## Statistics");
    let _ = writeln!(out, "- **Total Sent:** {}", stats.total_sent);
    let _ = writeln!(out, "- **Total Failed:** {}", stats.total_failed);
    let _ = writeln!(out, "- **Last Sent:** {last_sent}");
    if let Some(err) = &stats.last_error {
        let _ = writeln!(out, "- **Last Error:** {err}");
    }

    if let Some(stream) = &status.stream {
        let _ = writeln!(out, "\n## Message Stream");
        let _ = writeln!(out, "- **Status:** {}", stream.state);
        let _ = writeln!(out, "- **Routes:**");
        for route in &stream.routes {
            let _ = writeln!(out, "  - `{route}`");
        }
    }

    let _ = writeln!(out, "\n## Usage\n");
    let _ = writeln!(
        out,
        "Messages sent to Gotify will be automatically forwarded to WeChat.\n"
    );
    let _ = writeln!(out, "### Send via /send");
    let _ = writeln!(out, "`POST {base}/api/send`\n");
    let _ = writeln!(
        out,
        "```json\n{{\n  \"title\": \"Message Title\",\n  \"content\": \"Message Content\"\n}}\n```\n"
    );
    let _ = writeln!(out, "### Test Connection");
    let _ = writeln!(out, "Click here to test: [Send Test Message]({base}/api/test)");

    out
}

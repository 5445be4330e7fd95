//! Request and response bodies.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryReport, RecipientError};

/// Body of `POST /api/send`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub title: String,
    pub content: String,
}

impl SendRequest {
    /// Both fields must be non-blank.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.trim().is_empty() {
            return Err("title is required");
        }
        if self.content.trim().is_empty() {
            return Err("content is required");
        }
        Ok(())
    }
}

/// Outcome of a send or test request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<DeliveryErrorItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryErrorItem {
    pub recipient: String,
    pub error: String,
}

impl From<RecipientError> for DeliveryErrorItem {
    fn from(e: RecipientError) -> Self {
        Self {
            recipient: e.recipient,
            error: e.error,
        }
    }
}

impl DeliveryResponse {
    /// Map a report to its HTTP status and body.
    ///
    /// `200` when nothing failed, `207` on partial failure, `502` when every
    /// recipient failed.
    pub fn from_report(report: DeliveryReport, action: &str) -> (StatusCode, Self) {
        let (status, success, message) = if report.is_total_failure() {
            (
                StatusCode::BAD_GATEWAY,
                false,
                format!("{action} failed: {}/{} failed", report.failed, report.total),
            )
        } else if report.is_partial() {
            (
                StatusCode::MULTI_STATUS,
                false,
                format!(
                    "{action} partially failed: {}/{} failed",
                    report.failed, report.total
                ),
            )
        } else if report.skipped {
            (StatusCode::OK, true, "no recipients configured".to_string())
        } else {
            (
                StatusCode::OK,
                true,
                format!("{action} succeeded for {} recipients", report.succeeded),
            )
        };

        let body = Self {
            success,
            message,
            total: report.total,
            succeeded: report.succeeded,
            failed: report.failed,
            errors: report.errors.into_iter().map(Into::into).collect(),
        };
        (status, body)
    }
}

/// Body of `POST /api/enable` and `POST /api/disable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleResponse {
    pub enabled: bool,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(succeeded: usize, failed: usize) -> DeliveryReport {
        DeliveryReport {
            total: succeeded + failed,
            succeeded,
            failed,
            skipped: false,
            errors: (0..failed)
                .map(|_| RecipientError {
                    recipient: "o-ab****wxyz".to_string(),
                    error: "WeChat API error 43004: require subscribe".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_status_mapping() {
        let (status, body) = DeliveryResponse::from_report(report(2, 0), "send");
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.message, "send succeeded for 2 recipients");

        let (status, body) = DeliveryResponse::from_report(report(1, 1), "send");
        assert_eq!(status, StatusCode::MULTI_STATUS);
        assert!(!body.success);
        assert_eq!(body.errors.len(), 1);
        assert_eq!(body.errors[0].recipient, "o-ab****wxyz");

        let (status, body) = DeliveryResponse::from_report(report(0, 2), "test");
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.message, "test failed: 2/2 failed");
    }

    #[test]
    fn test_skipped_report_is_ok() {
        let (status, body) = DeliveryResponse::from_report(DeliveryReport::skipped(), "send");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.total, 0);
    }

    #[test]
    fn test_send_request_validation() {
        let ok: SendRequest =
            serde_json::from_str(r#"{"title": "Backup", "content": "done"}"#).unwrap();
        assert!(ok.validate().is_ok());

        let blank = SendRequest {
            title: "  ".to_string(),
            content: "done".to_string(),
        };
        assert_eq!(blank.validate(), Err("title is required"));

        assert!(serde_json::from_str::<SendRequest>(r#"{"title": "x"}"#).is_err());
    }
}

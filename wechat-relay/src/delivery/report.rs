//! Aggregated delivery outcome.

use serde::Serialize;

/// One failed recipient. The address is always masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientError {
    pub recipient: String,
    pub error: String,
}

/// Outcome of delivering one message to a set of recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when there was nobody to deliver to.
    pub skipped: bool,
    pub errors: Vec<RecipientError>,
}

impl DeliveryReport {
    /// Report for an empty recipient list.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Every recipient received the message.
    pub fn is_complete(&self) -> bool {
        !self.skipped && self.failed == 0
    }

    /// Some recipients received the message and some did not.
    pub fn is_partial(&self) -> bool {
        self.succeeded > 0 && self.failed > 0
    }

    /// Nobody received the message even though there were recipients.
    pub fn is_total_failure(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }

    /// Human-readable error lines, one per failed recipient.
    pub fn error_lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("openid {}: {}", e.recipient, e.error))
            .collect()
    }
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
                .map(|i| RecipientError {
                    recipient: "o-ab****wxyz".to_string(),
                    error: format!("error {i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_classification() {
        assert!(report(3, 0).is_complete());
        assert!(report(2, 1).is_partial());
        assert!(report(0, 2).is_total_failure());
        assert!(!report(0, 2).is_partial());

        let skipped = DeliveryReport::skipped();
        assert!(!skipped.is_complete());
        assert!(!skipped.is_total_failure());
    }

    #[test]
    fn test_error_lines() {
        assert_eq!(
            report(1, 1).error_lines(),
            ["openid o-ab****wxyz: error 0"]
        );
    }
}

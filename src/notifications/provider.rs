//! Push provider contract.
//!
//! A provider delivers one already-serialized payload to one browser endpoint
//! and reports how the push service answered. Encryption and VAPID signing
//! happen behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// The browser endpoint and the keys the payload is encrypted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushTarget {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    pub ttl_seconds: u32,
    pub urgency: Urgency,
}

/// How a single delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The endpoint may work later. `status` is absent when no response arrived.
    TransientFailure { status: Option<u16>, reason: String },
    /// The push service says the endpoint is gone or malformed.
    PermanentFailure { status: u16 },
}

impl SendOutcome {
    /// Classifies a push service status code.
    ///
    /// 410 Gone and 400 Bad Request mean the subscription will never accept
    /// messages again. Everything else non-2xx may recover.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => SendOutcome::Delivered,
            400 | 410 => SendOutcome::PermanentFailure { status },
            _ => SendOutcome::TransientFailure {
                status: Some(status),
                reason: format!("push service responded with status {}", status),
            },
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SendOutcome::Delivered => "delivered",
            SendOutcome::TransientFailure { .. } => "transient_failure",
            SendOutcome::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, target: &PushTarget, payload: &str, options: &PushOptions)
        -> SendOutcome;
}

/// Provider that only logs, used when no relay is configured.
pub struct NoOpPushProvider;

#[async_trait]
impl PushProvider for NoOpPushProvider {
    async fn send(
        &self,
        target: &PushTarget,
        payload: &str,
        options: &PushOptions,
    ) -> SendOutcome {
        info!(
            "[dry-run] push to {} (ttl {}s, urgency {}): {}",
            target.endpoint, options.ttl_seconds, options.urgency, payload
        );
        SendOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(SendOutcome::from_status(201), SendOutcome::Delivered);
        assert_eq!(
            SendOutcome::from_status(410),
            SendOutcome::PermanentFailure { status: 410 }
        );
        assert_eq!(
            SendOutcome::from_status(400),
            SendOutcome::PermanentFailure { status: 400 }
        );
        assert!(matches!(
            SendOutcome::from_status(404),
            SendOutcome::TransientFailure { status: Some(404), .. }
        ));
        assert!(matches!(
            SendOutcome::from_status(429),
            SendOutcome::TransientFailure { status: Some(429), .. }
        ));
        assert!(matches!(
            SendOutcome::from_status(503),
            SendOutcome::TransientFailure { .. }
        ));
    }

    #[test]
    fn test_urgency_serialization() {
        assert_eq!(
            serde_json::to_string(&Urgency::VeryLow).unwrap(),
            "\"very-low\""
        );
        let parsed: Urgency = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, Urgency::High);
        assert_eq!(Urgency::default(), Urgency::Normal);
    }

    #[tokio::test]
    async fn test_noop_provider_reports_delivery() {
        let target = PushTarget {
            endpoint: "https://push.example/abc".to_string(),
            p256dh: "k".to_string(),
            auth: "a".to_string(),
        };
        let options = PushOptions {
            ttl_seconds: 60,
            urgency: Urgency::Normal,
        };
        let outcome = NoOpPushProvider.send(&target, "{}", &options).await;
        assert!(outcome.is_delivered());
    }
}

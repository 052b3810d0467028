//! HTTP client for an external Web Push relay.
//!
//! The relay encrypts the payload for the subscription keys, signs the request
//! with the VAPID credentials and forwards it to the browser's push service.
//!
//! The relay's own HTTP status only says whether it handled the request. The
//! push service's answer comes back in the JSON body as `push_status`, and only
//! that answer can condemn a subscription.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{PushOptions, PushProvider, PushTarget, SendOutcome};

/// Application server identity used to sign push requests.
#[derive(Clone, PartialEq, Eq)]
pub struct VapidCredentials {
    pub public_key: String,
    pub private_key: String,
    /// Contact for the push service, a `mailto:` or `https:` URL.
    pub subject: String,
}

impl fmt::Debug for VapidCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidCredentials")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("subject", &self.subject)
            .finish()
    }
}

#[derive(Serialize)]
struct RelayKeys<'a> {
    p256dh: &'a str,
    auth: &'a str,
}

#[derive(Serialize)]
struct RelaySubscription<'a> {
    endpoint: &'a str,
    keys: RelayKeys<'a>,
}

#[derive(Serialize)]
struct RelayVapid<'a> {
    subject: &'a str,
    public_key: &'a str,
    private_key: &'a str,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: RelaySubscription<'a>,
    payload: &'a str,
    ttl: u32,
    urgency: &'a str,
    vapid: RelayVapid<'a>,
}

#[derive(Deserialize)]
struct RelayResponse {
    #[serde(default)]
    push_status: Option<u16>,
}

/// Maps a relay response to a send outcome.
///
/// A relay that fails or rejects the request is a transient problem of this
/// deployment, never a verdict on the subscription. A 2xx answer without a
/// `push_status` means the push service accepted the message.
fn outcome_from_relay(relay_status: u16, body: &[u8]) -> SendOutcome {
    if !(200..300).contains(&relay_status) {
        return SendOutcome::TransientFailure {
            status: Some(relay_status),
            reason: format!("relay responded with status {}", relay_status),
        };
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return SendOutcome::Delivered;
    }
    match serde_json::from_slice::<RelayResponse>(body) {
        Ok(RelayResponse {
            push_status: Some(push_status),
        }) => SendOutcome::from_status(push_status),
        Ok(RelayResponse { push_status: None }) => SendOutcome::Delivered,
        Err(err) => SendOutcome::TransientFailure {
            status: Some(relay_status),
            reason: format!("unreadable relay response: {}", err),
        },
    }
}

#[derive(Clone)]
pub struct RelayPushProvider {
    client: Client,
    base_url: String,
    vapid: VapidCredentials,
}

impl RelayPushProvider {
    /// Create a provider posting to `{base_url}/send`.
    pub fn new(base_url: String, timeout_secs: u64, vapid: VapidCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            vapid,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body<'a>(
        &'a self,
        target: &'a PushTarget,
        payload: &'a str,
        options: &PushOptions,
    ) -> RelayRequest<'a> {
        RelayRequest {
            subscription: RelaySubscription {
                endpoint: &target.endpoint,
                keys: RelayKeys {
                    p256dh: &target.p256dh,
                    auth: &target.auth,
                },
            },
            payload,
            ttl: options.ttl_seconds,
            urgency: options.urgency.as_str(),
            vapid: RelayVapid {
                subject: &self.vapid.subject,
                public_key: &self.vapid.public_key,
                private_key: &self.vapid.private_key,
            },
        }
    }
}

#[async_trait]
impl PushProvider for RelayPushProvider {
    async fn send(
        &self,
        target: &PushTarget,
        payload: &str,
        options: &PushOptions,
    ) -> SendOutcome {
        let url = format!("{}/send", self.base_url);
        let body = self.request_body(target, payload, options);

        match self.client.post(&url).json(&body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let outcome = match response.bytes().await {
                    Ok(body) => outcome_from_relay(status, &body),
                    Err(err) => SendOutcome::TransientFailure {
                        status: Some(status),
                        reason: err.to_string(),
                    },
                };
                debug!(
                    "Relay answered {} for {}: {}",
                    status,
                    target.endpoint,
                    outcome.label()
                );
                outcome
            }
            Err(err) => SendOutcome::TransientFailure {
                status: None,
                reason: err.to_string(),
            },
        }
    }
}

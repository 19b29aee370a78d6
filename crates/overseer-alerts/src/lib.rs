//! `overseer-alerts` — outbound webhook notifications for failed runs.
//!
//! The scheduler core hands failure events to an [`AlertSink`]; this crate
//! delivers them as signed JSON POSTs to an operator-configured endpoint.
//! Delivery is fire-and-forget: a webhook that is down must never slow down
//! or fail a task run, so every send happens on a detached task and failures
//! are only logged.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use overseer_core::config::AlertsConfig;
use overseer_scheduler::AlertSink;

type HmacSha256 = Hmac<Sha256>;

/// Signature header carried on every signed alert request, GitHub-style:
/// `sha256=<hex of HMAC-SHA256 over the raw body>`.
pub const SIGNATURE_HEADER: &str = "X-Overseer-Signature-256";

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts alert payloads to the configured webhook URL.
///
/// When no URL is configured the alerter is inert and [`notify`] drops
/// events silently, so callers can wire it unconditionally.
///
/// [`notify`]: AlertSink::notify
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: Option<String>,
    secret: Option<String>,
}

impl WebhookAlerter {
    pub fn new(cfg: &AlertsConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url: cfg.url.clone(),
            secret: cfg.secret.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }
}

impl AlertSink for WebhookAlerter {
    fn notify(&self, alert_type: &str, details: &str) {
        let Some(url) = self.url.clone() else {
            debug!(alert_type, "alert dropped: no webhook URL configured");
            return;
        };

        let body = build_payload(alert_type, details);
        let signature = self.secret.as_deref().map(|s| sign(s, body.as_bytes()));
        let client = self.client.clone();
        let alert_type = alert_type.to_string();

        tokio::spawn(async move {
            let mut req = client
                .post(&url)
                .header("content-type", "application/json")
                .body(body);
            if let Some(sig) = signature {
                req = req.header(SIGNATURE_HEADER, sig);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(alert_type = %alert_type, "alert delivered");
                }
                Ok(resp) => {
                    warn!(
                        alert_type = %alert_type,
                        status = resp.status().as_u16(),
                        "alert endpoint returned an error"
                    );
                }
                Err(e) => {
                    warn!(alert_type = %alert_type, error = %e, "alert delivery failed");
                }
            }
        });
    }
}

fn build_payload(alert_type: &str, details: &str) -> String {
    json!({
        "alert_type": alert_type,
        "details": details,
        "timestamp": Utc::now().to_rfc3339(),
        "source": "overseer",
    })
    .to_string()
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_type_and_details() {
        let body = build_payload("task_failed", "exit code 3");
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["alert_type"], "task_failed");
        assert_eq!(v["details"], "exit code 3");
        assert_eq!(v["source"], "overseer");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn signature_is_prefixed_hex() {
        let sig = sign("topsecret", b"{\"a\":1}");
        let hex_part = sig.strip_prefix("sha256=").unwrap();
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
        // Same key and body always produce the same signature.
        assert_eq!(sig, sign("topsecret", b"{\"a\":1}"));
        assert_ne!(sig, sign("otherkey", b"{\"a\":1}"));
    }

    #[test]
    fn unconfigured_alerter_is_inert() {
        let alerter = WebhookAlerter::new(&AlertsConfig::default());
        assert!(!alerter.enabled());
    }
}

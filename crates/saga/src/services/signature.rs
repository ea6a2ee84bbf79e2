//! Webhook signature verification (HMAC-SHA256).
//!
//! Header format: `t=<unix seconds>,v1=<hex signature>[,v1=...]`, where the
//! signature covers `"<t>.<raw payload>"`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::services::payment::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

fn signed_mac(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature("HMAC key error".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds a signature header value for `payload` at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let timestamp = timestamp.to_string();
    let mac = signed_mac(secret, &timestamp, payload)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verifies a signature header against the raw payload.
///
/// Comparison is constant-time; timestamps further than `tolerance` from
/// `now` are rejected to limit replays.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    let Some(timestamp) = timestamp else {
        return Err(WebhookError::InvalidSignature(
            "missing timestamp".to_string(),
        ));
    };
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature(
            "missing v1 signature".to_string(),
        ));
    }

    let mac = signed_mac(secret, timestamp, payload)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(WebhookError::InvalidSignature(
            "signature mismatch".to_string(),
        ));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::InvalidSignature("invalid timestamp".to_string()))?;
    let tolerance = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    if now.saturating_sub(ts).abs() > tolerance {
        return Err(WebhookError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    Ok(())
}

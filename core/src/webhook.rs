//! Provider webhook signatures.
//!
//! Signatures use the Stripe header format `t=<unix seconds>,v1=<hex>`, where
//! the `v1` value is HMAC-SHA256 of `"<t>.<payload>"` keyed with the endpoint
//! secret. Several `v1` entries may be present (secret rotation); any match is
//! accepted. Comparison is constant-time.

use crate::payment::PaymentEvent;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum age of a signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Webhook verification failure. Nothing is written to the store when
/// verification fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No signature header was sent
    #[error("missing signature header")]
    Missing,

    /// Header could not be parsed
    #[error("malformed signature header: {0}")]
    Malformed(String),

    /// Signed timestamp is older (or newer) than the tolerance
    #[error("signature timestamp outside tolerance")]
    Expired,

    /// No signature matched
    #[error("signature mismatch")]
    Mismatch,

    /// Signature is valid but the body is not an event
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Produce a signature header for `payload` at `timestamp`.
#[must_use]
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!("t={timestamp},v1={}", hex::encode(digest(payload, secret, timestamp)))
}

fn digest(payload: &[u8], secret: &str, timestamp: i64) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Verify a signature header against the payload.
///
/// # Errors
///
/// Returns [`SignatureError`] if the header is missing or malformed, the
/// timestamp is outside `tolerance_secs` of `now`, or no signature matches.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    if header.trim().is_empty() {
        return Err(SignatureError::Missing);
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::Malformed(part.to_string()));
        };
        match key {
            "t" => {
                let parsed = value
                    .parse::<i64>()
                    .map_err(|_| SignatureError::Malformed(format!("bad timestamp {value}")))?;
                timestamp = Some(parsed);
            }
            "v1" => {
                let bytes = hex::decode(value)
                    .map_err(|_| SignatureError::Malformed("v1 is not hex".to_string()))?;
                signatures.push(bytes);
            }
            // other schemes (v0) are ignored
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::Malformed("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing v1 signature".to_string()));
    }
    if (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let expected = digest(payload, secret, timestamp);
    if signatures
        .iter()
        .any(|candidate| constant_time_eq::constant_time_eq(candidate, &expected))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    #[serde(default)]
    message: Option<String>,
}

/// Parse a provider event body.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidPayload`] if the body is not an event.
pub fn parse_event(payload: &[u8]) -> Result<PaymentEvent, SignatureError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| SignatureError::InvalidPayload(e.to_string()))?;

    Ok(match raw.event_type.as_str() {
        "payment_intent.succeeded" => PaymentEvent::ChargeSucceeded {
            provider_ref: raw.data.object.id,
        },
        "payment_intent.payment_failed" => PaymentEvent::ChargeFailed {
            provider_ref: raw.data.object.id,
            reason: raw.data.object.last_payment_error.and_then(|e| e.message),
        },
        _ => PaymentEvent::Ignored {
            event_type: raw.event_type,
        },
    })
}

/// Verify then parse. The body is never parsed if the signature fails.
///
/// # Errors
///
/// See [`verify`] and [`parse_event`].
pub fn verify_and_parse(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<PaymentEvent, SignatureError> {
    verify(payload, header, secret, now, tolerance_secs)?;
    parse_event(payload)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_test";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn succeeded_body() -> &'static [u8] {
        br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#
    }

    #[test]
    fn signed_payload_verifies() {
        let header = sign(succeeded_body(), SECRET, now().timestamp());
        let event = verify_and_parse(succeeded_body(), &header, SECRET, now(), 300).unwrap();
        assert_eq!(
            event,
            PaymentEvent::ChargeSucceeded {
                provider_ref: "pi_123".to_string()
            }
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign(succeeded_body(), "other", now().timestamp());
        assert_eq!(
            verify(succeeded_body(), &header, SECRET, now(), 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(succeeded_body(), SECRET, now().timestamp());
        let tampered = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_999"}}}"#;
        assert_eq!(
            verify(tampered, &header, SECRET, now(), 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let header = sign(succeeded_body(), SECRET, now().timestamp() - 301);
        assert_eq!(
            verify(succeeded_body(), &header, SECRET, now(), 300),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn missing_and_malformed_headers() {
        assert_eq!(
            verify(succeeded_body(), "", SECRET, now(), 300),
            Err(SignatureError::Missing)
        );
        assert!(matches!(
            verify(succeeded_body(), "garbage", SECRET, now(), 300),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify(succeeded_body(), "t=1", SECRET, now(), 300),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let good = sign(succeeded_body(), SECRET, now().timestamp());
        let bad_hex = hex::encode([0u8; 32]);
        let header = format!("{good},v1={bad_hex}");
        assert!(verify(succeeded_body(), &header, SECRET, now(), 300).is_ok());
    }

    #[test]
    fn failed_event_carries_reason() {
        let body = br#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_1","last_payment_error":{"message":"card_declined"}}}}"#;
        assert_eq!(
            parse_event(body).unwrap(),
            PaymentEvent::ChargeFailed {
                provider_ref: "pi_1".to_string(),
                reason: Some("card_declined".to_string()),
            }
        );
    }

    #[test]
    fn unknown_event_is_ignored() {
        let body = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        assert!(matches!(
            parse_event(body).unwrap(),
            PaymentEvent::Ignored { .. }
        ));
    }
}

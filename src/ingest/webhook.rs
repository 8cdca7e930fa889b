// =============================================================================
// Webhook Ingestor
// =============================================================================
//
// Given (raw_bytes, headers, client_ip), produces exactly one of
// {ACCEPTED, DUPLICATE, INVALID_SIGNATURE, INVALID_PAYLOAD, ERROR} and the
// matching side effects: at most one Signal row, exactly one WebhookEvent.
// =============================================================================

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::repo::{self, NewSignal};
use crate::error::PipelineError;
use crate::types::{Direction, WebhookPayload, WebhookStatus};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum IngestOutcome {
    Accepted {
        signal_id: Uuid,
        variant_hint: crate::types::Variant,
    },
    Duplicate {
        signal_id: Option<Uuid>,
    },
    InvalidSignature,
    InvalidPayload(Vec<String>),
}

/// Verify, parse, deduplicate, and persist a webhook delivery.
///
/// `hmac_secret` empty disables signature verification (development only).
/// Transient database errors bubble up as `PipelineError::Transient`/
/// `PipelineError::Database` for the caller to map to a 5xx response.
pub async fn ingest(
    pool: &PgPool,
    body: &[u8],
    signature_header: Option<&str>,
    hmac_secret: &str,
    request_id: &str,
    dedup_window_secs: i64,
    policy_version: &str,
    split_percentage: f64,
) -> Result<IngestOutcome, PipelineError> {
    let started = std::time::Instant::now();

    if !hmac_secret.is_empty() {
        if !verify_signature(body, signature_header, hmac_secret) {
            repo::insert_rejected_webhook_event(
                pool,
                WebhookStatus::InvalidSignature,
                request_id,
                elapsed_ms(started),
                None,
                raw_body_as_json(body),
            )
            .await?;
            return Ok(IngestOutcome::InvalidSignature);
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            let errors = vec![format!("malformed JSON body: {e}")];
            repo::insert_rejected_webhook_event(
                pool,
                WebhookStatus::InvalidPayload,
                request_id,
                elapsed_ms(started),
                Some(&errors.join("; ")),
                raw_body_as_json(body),
            )
            .await?;
            return Ok(IngestOutcome::InvalidPayload(errors));
        }
    };

    let errors = validate_payload(&payload);
    if !errors.is_empty() {
        repo::insert_rejected_webhook_event(
            pool,
            WebhookStatus::InvalidPayload,
            request_id,
            elapsed_ms(started),
            Some(&errors.join("; ")),
            raw_body_as_json(body),
        )
        .await?;
        return Ok(IngestOutcome::InvalidPayload(errors));
    }

    let direction: Direction = payload.direction.parse().map_err(|_| {
        PipelineError::InvalidPayload(format!("invalid direction: {}", payload.direction))
    })?;

    let signal_hash = compute_signal_hash(&payload, direction);

    if repo::is_duplicate_signal(pool, &signal_hash, dedup_window_secs).await? {
        repo::insert_rejected_webhook_event(
            pool,
            WebhookStatus::Duplicate,
            request_id,
            elapsed_ms(started),
            None,
            raw_body_as_json(body),
        )
        .await?;
        return Ok(IngestOutcome::Duplicate { signal_id: None });
    }

    let signal_id = Uuid::new_v4();
    let raw_payload = payload_as_json(&payload);

    repo::insert_signal_and_webhook_event(
        pool,
        NewSignal {
            id: signal_id,
            symbol: &payload.symbol,
            direction,
            timeframe: &payload.timeframe,
            source_timestamp: payload.timestamp,
            raw_payload,
            signal_hash: &signal_hash,
            is_test: false,
        },
        request_id,
        elapsed_ms(started),
    )
    .await?;

    let variant_hint = crate::experiment::assign_variant(&signal_hash, policy_version, split_percentage);

    Ok(IngestOutcome::Accepted {
        signal_id,
        variant_hint,
    })
}

fn elapsed_ms(started: std::time::Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

fn raw_body_as_json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap_or_else(|_| serde_json::json!({ "raw": String::from_utf8_lossy(body) }))
}

fn payload_as_json(payload: &WebhookPayload) -> serde_json::Value {
    let mut map = payload.extra.clone();
    map.insert("symbol".to_string(), serde_json::Value::String(payload.symbol.clone()));
    map.insert("direction".to_string(), serde_json::Value::String(payload.direction.clone()));
    map.insert("timeframe".to_string(), serde_json::Value::String(payload.timeframe.clone()));
    map.insert(
        "timestamp".to_string(),
        serde_json::Value::String(payload.timestamp.to_rfc3339()),
    );
    serde_json::Value::Object(map)
}

fn validate_payload(payload: &WebhookPayload) -> Vec<String> {
    let mut errors = Vec::new();
    if payload.symbol.is_empty() || payload.symbol.len() > 20 {
        errors.push("symbol must be 1-20 characters".to_string());
    }
    if !matches!(payload.direction.to_ascii_lowercase().as_str(), "long" | "short") {
        errors.push("direction must be 'long' or 'short'".to_string());
    }
    if payload.timeframe.is_empty() || payload.timeframe.len() > 10 {
        errors.push("timeframe must be 1-10 characters".to_string());
    }
    errors
}

/// signal_hash = SHA-256(symbol || direction || timeframe || timestamp || normalized payload body)
fn compute_signal_hash(payload: &WebhookPayload, direction: Direction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.symbol.as_bytes());
    hasher.update(direction.to_string().as_bytes());
    hasher.update(payload.timeframe.as_bytes());
    hasher.update(payload.timestamp.to_rfc3339().as_bytes());
    let normalized = serde_json::to_vec(&payload_as_json(payload)).unwrap_or_default();
    hasher.update(&normalized);
    hex::encode(hasher.finalize())
}

/// Constant-time HMAC-SHA256 verification of the request body against the
/// `x-webhook-signature` header value.
fn verify_signature(body: &[u8], signature_header: Option<&str>, secret: &str) -> bool {
    let provided = match signature_header {
        Some(s) => s,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[allow(dead_code)]
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_payload_passes() {
        let payload = WebhookPayload {
            symbol: "SPY".to_string(),
            direction: "long".to_string(),
            timeframe: "5m".to_string(),
            timestamp: Utc::now(),
            extra: serde_json::Map::new(),
        };
        assert!(validate_payload(&payload).is_empty());
    }

    #[test]
    fn rejects_bad_direction() {
        let payload = WebhookPayload {
            symbol: "SPY".to_string(),
            direction: "up".to_string(),
            timeframe: "5m".to_string(),
            timestamp: Utc::now(),
            extra: serde_json::Map::new(),
        };
        assert!(!validate_payload(&payload).is_empty());
    }

    #[test]
    fn signature_round_trips() {
        let body = br#"{"symbol":"SPY"}"#;
        let secret = "shared-secret";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature(body, Some(&sig), secret));
        assert!(!verify_signature(body, Some("deadbeef"), secret));
    }

    #[test]
    fn hash_is_deterministic() {
        let payload = WebhookPayload {
            symbol: "SPY".to_string(),
            direction: "long".to_string(),
            timeframe: "5m".to_string(),
            timestamp: "2025-01-02T14:30:00Z".parse().unwrap(),
            extra: serde_json::Map::new(),
        };
        let a = compute_signal_hash(&payload, Direction::Long);
        let b = compute_signal_hash(&payload, Direction::Long);
        assert_eq!(a, b);
    }
}

//! Shared timestamp/id helpers and the command response envelope.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Unix epoch milliseconds; the unit every `*_at` column is stored in.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unix epoch seconds, the unit JWT `iat`/`exp` claims use.
pub fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// The UTC calendar day a quota counter belongs to, e.g. `2026-10-18`.
pub fn utc_day(at: DateTime<Utc>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

pub fn today_utc() -> String {
    utc_day(Utc::now())
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_ms(),
        "event_id": new_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

//! Scheduling intent carried in the assistant's speech.
//!
//! The assistant is instructed to append a fenced ```json block when a
//! booking, cancellation or reschedule is confirmed. The block is never meant
//! to be spoken.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

const BOOKING_KEYS: [&str; 3] = [
    "booking_confirmed",
    "cancellation_confirmed",
    "reschedule_confirmed",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingAction {
    Confirm {
        customer_name: String,
        date: NaiveDate,
        time: NaiveTime,
        details: String,
    },
    Cancel {
        date: NaiveDate,
        time: NaiveTime,
    },
    Reschedule {
        date: NaiveDate,
        old_time: NaiveTime,
        new_time: NaiveTime,
    },
}

impl BookingAction {
    pub fn is_confirmation(&self) -> bool {
        matches!(self, BookingAction::Confirm { .. })
    }
}

/// True once streamed assistant text has started to contain a booking payload
pub fn mentions_booking_payload(text: &str) -> bool {
    text.contains(FENCE_OPEN) || BOOKING_KEYS.iter().any(|key| text.contains(key))
}

/// Split a finished transcript into its spoken part and any booking action.
///
/// Dates default to `today`; times accept `3:30 PM` and `15:30`.
pub fn extract_booking_action(transcript: &str, today: NaiveDate) -> (String, Option<BookingAction>) {
    let Some(start) = transcript.find(FENCE_OPEN) else {
        return (transcript.to_string(), None);
    };
    let body_start = start + FENCE_OPEN.len();
    let Some(body_len) = transcript[body_start..].find(FENCE_CLOSE) else {
        return (transcript.to_string(), None);
    };
    let body_end = body_start + body_len;

    let Ok(value) = serde_json::from_str::<Value>(transcript[body_start..body_end].trim()) else {
        return (transcript.to_string(), None);
    };

    let spoken = format!(
        "{}{}",
        &transcript[..start],
        &transcript[body_end + FENCE_CLOSE.len()..]
    )
    .trim()
    .to_string();

    (spoken, parse_action(&value, today))
}

fn parse_action(value: &Value, today: NaiveDate) -> Option<BookingAction> {
    if let Some(b) = value.get("booking_confirmed") {
        return Some(BookingAction::Confirm {
            customer_name: str_field(b, "name").unwrap_or("Unknown").to_string(),
            date: parse_date(str_field(b, "date"), today),
            time: parse_time(str_field(b, "time")?)?,
            details: str_field(b, "details").unwrap_or_default().to_string(),
        });
    }

    if let Some(c) = value.get("cancellation_confirmed") {
        return Some(BookingAction::Cancel {
            date: parse_date(str_field(c, "date"), today),
            time: parse_time(str_field(c, "time")?)?,
        });
    }

    if let Some(r) = value.get("reschedule_confirmed") {
        return Some(BookingAction::Reschedule {
            date: parse_date(str_field(r, "date"), today),
            old_time: parse_time(str_field(r, "old_time")?)?,
            new_time: parse_time(str_field(r, "new_time")?)?,
        });
    }

    None
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn parse_date(raw: Option<&str>, today: NaiveDate) -> NaiveDate {
    raw.and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        .unwrap_or(today)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

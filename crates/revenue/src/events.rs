//! RevenueCat subscription events and their storage projections
//!
//! Events arrive untyped. Only `id` and `event_timestamp_ms` are expected to be
//! present; every other field is read best-effort and omitted from the
//! projections when missing.

use serde::Serialize;
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{RevenueError, RevenueResult};

/// Rendered in place of an ISO timestamp when `event_timestamp_ms` is unusable
pub const INVALID_DATE: &str = "Invalid Date";

/// Largest magnitude (in ms) a wall-clock date may have, same bound as ECMAScript dates
const MAX_EPOCH_MILLIS: f64 = 8.64e15;

/// Event time derived from `event_timestamp_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTimestamp {
    Valid(OffsetDateTime),
    /// Missing, non-numeric or out of range. Passed downstream as-is.
    Invalid,
}

impl EventTimestamp {
    pub fn from_millis_value(value: Option<&Value>) -> Self {
        let millis = match value {
            Some(Value::Number(n)) => match n.as_i64() {
                Some(ms) => ms as f64,
                None => match n.as_f64() {
                    Some(ms) if ms.is_finite() => ms.trunc(),
                    _ => return Self::Invalid,
                },
            },
            _ => return Self::Invalid,
        };

        if millis.abs() > MAX_EPOCH_MILLIS {
            return Self::Invalid;
        }

        let nanos = (millis as i128) * 1_000_000;
        match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
            Ok(datetime) => Self::Valid(datetime),
            Err(_) => Self::Invalid,
        }
    }

    pub fn as_datetime(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Valid(datetime) => Some(*datetime),
            Self::Invalid => None,
        }
    }

    /// ISO-8601 with millisecond precision and a `Z` suffix, or [`INVALID_DATE`]
    pub fn to_iso_string(&self) -> String {
        match self {
            Self::Valid(datetime) => format_iso_millis(*datetime),
            Self::Invalid => INVALID_DATE.to_string(),
        }
    }
}

/// Format a UTC datetime as `YYYY-MM-DDTHH:MM:SS.mmmZ`
pub fn format_iso_millis(datetime: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    datetime
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| INVALID_DATE.to_string())
}

/// A subscription lifecycle event as delivered by RevenueCat
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    pub id: Option<String>,
    pub app_user_id: Option<String>,
    pub product_id: Option<String>,
    pub price: Option<f64>,
    pub price_in_usd: Option<f64>,
    pub store: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: EventTimestamp,
    /// The complete event object as received
    pub raw: Map<String, Value>,
}

impl SubscriptionEvent {
    /// Extract the event from a webhook body of shape `{ "event": { ... } }`
    ///
    /// An empty body or a missing, null, non-object or empty `event` is
    /// [`RevenueError::NoEventData`]. A body that is not JSON at all is
    /// [`RevenueError::MalformedPayload`].
    pub fn from_envelope(body: &[u8]) -> RevenueResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(RevenueError::NoEventData);
        }

        let envelope: Value = serde_json::from_slice(body)
            .map_err(|e| RevenueError::MalformedPayload(e.to_string()))?;

        match envelope.get("event") {
            Some(Value::Object(event)) if !event.is_empty() => Ok(Self::from_object(event.clone())),
            _ => Err(RevenueError::NoEventData),
        }
    }

    pub fn from_object(raw: Map<String, Value>) -> Self {
        Self {
            id: string_field(&raw, "id"),
            app_user_id: string_field(&raw, "app_user_id"),
            product_id: string_field(&raw, "product_id"),
            price: number_field(&raw, "price"),
            price_in_usd: number_field(&raw, "price_in_usd"),
            store: string_field(&raw, "store"),
            event_type: string_field(&raw, "type"),
            timestamp: EventTimestamp::from_millis_value(raw.get("event_timestamp_ms")),
            raw,
        }
    }

    /// Stored amount: `price` wins over `price_in_usd`, falling back to 0.0
    pub fn amount_usd(&self) -> f64 {
        self.price.or(self.price_in_usd).unwrap_or(0.0)
    }

    pub fn analytics_row(&self) -> AnalyticsRow {
        AnalyticsRow {
            event_id: self.id.clone(),
            user_id: self.app_user_id.clone(),
            product_id: self.product_id.clone(),
            amount_usd: self.amount_usd(),
            store: self.store.clone(),
            event_type: self.event_type.clone(),
            timestamp: self.timestamp.to_iso_string(),
        }
    }

    pub fn document(&self) -> EventDocument {
        EventDocument {
            event_id: self.id.clone(),
            user_id: self.app_user_id.clone(),
            product_id: self.product_id.clone(),
            amount_usd: self.amount_usd(),
            store: self.store.clone(),
            event_type: self.event_type.clone(),
            raw_event: self.raw.clone(),
            event_timestamp: self.timestamp.as_datetime(),
        }
    }
}

/// Strings pass through; numbers and bools are stringified; anything else is dropped
fn string_field(raw: &Map<String, Value>, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_field(raw: &Map<String, Value>, key: &str) -> Option<f64> {
    raw.get(key).and_then(Value::as_f64)
}

/// Row appended to `analytics.revenue_events`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub amount_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub timestamp: String,
}

/// A single document field, either plain JSON or a native timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Json(Value),
    Timestamp(OffsetDateTime),
}

/// Document merged into `RevenuecatEvents/{eventId}`
///
/// `createdAt` and `updatedAt` are not part of the projection; the document
/// store assigns them at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDocument {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub product_id: Option<String>,
    pub amount_usd: f64,
    pub store: Option<String>,
    pub event_type: Option<String>,
    pub raw_event: Map<String, Value>,
    pub event_timestamp: Option<OffsetDateTime>,
}

impl EventDocument {
    /// Document key, validated against the store's path rules
    pub fn document_id(&self) -> RevenueResult<&str> {
        let id = self.event_id.as_deref().unwrap_or_default();
        if id.is_empty() || id.contains('/') || id == "." || id == ".." {
            return Err(RevenueError::InvalidDocumentId(id.to_string()));
        }
        Ok(id)
    }

    /// Top-level fields in write order. Absent optional fields are left out so a
    /// merge keeps whatever an earlier delivery stored.
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        let mut fields = Vec::with_capacity(8);
        push_string(&mut fields, "eventId", &self.event_id);
        push_string(&mut fields, "userId", &self.user_id);
        push_string(&mut fields, "productId", &self.product_id);
        fields.push(("amountUsd", FieldValue::Json(Value::from(self.amount_usd))));
        push_string(&mut fields, "store", &self.store);
        push_string(&mut fields, "type", &self.event_type);
        fields.push((
            "rawEvent",
            FieldValue::Json(Value::Object(self.raw_event.clone())),
        ));
        fields.push((
            "eventTimestamp",
            match self.event_timestamp {
                Some(ts) => FieldValue::Timestamp(ts),
                None => FieldValue::Json(Value::Null),
            },
        ));
        fields
    }
}

fn push_string(
    fields: &mut Vec<(&'static str, FieldValue)>,
    name: &'static str,
    value: &Option<String>,
) {
    if let Some(v) = value {
        fields.push((name, FieldValue::Json(Value::String(v.clone()))));
    }
}

//! Event records and the builder that stamps them
//!
//! An [`EventRecord`] is the unit that moves through the delivery queue and
//! the exact JSON body posted to `{api_url}/sdk/event`. Field names are
//! camelCase. Fields that do not apply to a record's [`EventType`] are
//! omitted from the body; `userId` is always present and is `null` until a
//! user id has been set.
//!
//! | eventType       | type-specific fields                      |
//! |-----------------|-------------------------------------------|
//! | `custom`        | `eventData`                               |
//! | `session_start` | `sessionId`, `appName`                    |
//! | `session_end`   | `sessionId`, `sessionDuration` (seconds)  |
//! | `performance`   | `fps`, `memoryUsage`, `batteryLevel`      |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::identity::{Clock, Identity};

/// Name of the custom event produced for errors and panics
pub const ERROR_EVENT_NAME: &str = "error";

/// Name given to performance records
pub const PERFORMANCE_EVENT_NAME: &str = "performance_snapshot";

/// Kind of telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Custom,
    SessionStart,
    SessionEnd,
    Performance,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Custom => "custom",
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::Performance => "performance",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value in a custom event payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    #[serde(serialize_with = "serialize_timestamp")]
    Timestamp(DateTime<Utc>),
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::Text(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Integer(value)
    }
}

impl From<i32> for PayloadValue {
    fn from(value: i32) -> Self {
        PayloadValue::Integer(value.into())
    }
}

impl From<u32> for PayloadValue {
    fn from(value: u32) -> Self {
        PayloadValue::Integer(value.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Float(value)
    }
}

impl From<f32> for PayloadValue {
    fn from(value: f32) -> Self {
        PayloadValue::Float(value.into())
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for PayloadValue {
    fn from(value: DateTime<Utc>) -> Self {
        PayloadValue::Timestamp(value)
    }
}

/// String-keyed payload of a custom event
///
/// Keys serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any previous value under the same key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<PayloadValue>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One performance sample; unknown readings are `None`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceSample {
    pub fps: Option<f32>,
    /// Resident process memory in bytes
    pub memory_usage: Option<u64>,
    /// Battery charge in `0.0..=1.0`
    pub battery_level: Option<f32>,
}

/// Telemetry record as posted to the collector
///
/// Records are never modified after the builder returns them; a failed
/// delivery puts the same record back on the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub api_key: String,
    pub device_id: String,
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub event_type: EventType,
    pub event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Payload>,
    /// Whole seconds, `session_end` only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f32>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// JSON request body
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// ISO-8601 UTC with microsecond precision and a `Z` suffix
fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Builds fully populated records from identity state and the clock
///
/// Construction never fails and has no side effects; the caller decides
/// whether to enqueue the result.
#[derive(Clone)]
pub struct EventBuilder {
    identity: Arc<Identity>,
    clock: Arc<dyn Clock>,
}

impl EventBuilder {
    pub fn new(identity: Arc<Identity>, clock: Arc<dyn Clock>) -> Self {
        Self { identity, clock }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn base(&self, event_type: EventType, event_name: impl Into<String>) -> EventRecord {
        EventRecord {
            api_key: self.identity.api_key().to_string(),
            device_id: self.identity.device_id().to_string(),
            user_id: self.identity.user_id(),
            app_name: None,
            session_id: None,
            event_type,
            event_name: event_name.into(),
            event_data: None,
            session_duration: None,
            fps: None,
            memory_usage: None,
            battery_level: None,
            timestamp: self.clock.now(),
        }
    }

    /// Record of any type carrying only the common fields and a payload
    ///
    /// Used for the generic `enqueue(type, name, payload)` entry point; the
    /// type-specific constructors below fill in their own fields.
    pub fn record(
        &self,
        event_type: EventType,
        event_name: impl Into<String>,
        payload: Option<Payload>,
    ) -> EventRecord {
        EventRecord {
            event_data: payload,
            ..self.base(event_type, event_name)
        }
    }

    /// Arbitrary named event with an optional free-form payload
    pub fn custom(&self, event_name: impl Into<String>, payload: Option<Payload>) -> EventRecord {
        self.record(EventType::Custom, event_name, payload)
    }

    pub fn session_start(&self, session_id: &str, app_name: Option<&str>) -> EventRecord {
        EventRecord {
            session_id: Some(session_id.to_string()),
            app_name: app_name.map(str::to_string),
            ..self.base(EventType::SessionStart, "session_start")
        }
    }

    /// Duration is truncated to whole seconds
    pub fn session_end(&self, session_id: &str, duration: Duration) -> EventRecord {
        EventRecord {
            session_id: Some(session_id.to_string()),
            session_duration: Some(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)),
            ..self.base(EventType::SessionEnd, "session_end")
        }
    }

    pub fn performance(&self, sample: PerformanceSample) -> EventRecord {
        EventRecord {
            fps: sample.fps,
            memory_usage: sample.memory_usage,
            battery_level: sample.battery_level,
            ..self.base(EventType::Performance, PERFORMANCE_EVENT_NAME)
        }
    }

    /// `error` custom event carrying a message, stack trace and severity
    pub fn error(&self, message: &str, stack_trace: &str, kind: &str) -> EventRecord {
        let payload = Payload::new()
            .with("message", message)
            .with("stackTrace", stack_trace)
            .with("type", kind);
        self.custom(ERROR_EVENT_NAME, Some(payload))
    }
}

impl std::fmt::Debug for EventBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuilder")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

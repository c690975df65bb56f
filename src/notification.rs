//! Notification model, backend wire records and type classification.
//!
//! # Classification
//!
//! The backend does not transmit a notification type, so one is inferred:
//!
//! - **Pushes** are typed by the hub event they arrived on
//!   ([`NotificationType::for_event`]): admin events are `info`, student
//!   events are `success`.
//! - **History records** are typed from their text by an ordered rule list
//!   ([`classify_message`]), first match wins, case-insensitive.

// Rust guideline compliant 2026-02

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visual category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    /// Something completed successfully.
    Success,
    /// Neutral information.
    Info,
    /// Needs attention but nothing failed.
    Warning,
    /// Something failed.
    Error,
}

impl NotificationType {
    /// Returns the lowercase name used on the wire and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Type of a live push, decided by the hub event name.
    ///
    /// Admin channels carry informational traffic; everything else is the
    /// student channel, whose events confirm completed actions.
    pub fn for_event(event: &str) -> Self {
        if event.to_ascii_lowercase().contains("admin") {
            Self::Info
        } else {
            Self::Success
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keyword rules for history classification, evaluated in order.
const CLASSIFICATION_RULES: &[(&[&str], NotificationType)] = &[
    (&["submitted", "completed"], NotificationType::Success),
    (&["score", "scored"], NotificationType::Info),
    (&["warning", "expired"], NotificationType::Warning),
    (&["error", "failed"], NotificationType::Error),
];

/// Infer a type from message text. Falls through to `Info`.
pub fn classify_message(message: &str) -> NotificationType {
    let lower = message.to_lowercase();
    CLASSIFICATION_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(NotificationType::Info, |(_, kind)| *kind)
}

/// A notification as held by the store and shown to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Server identifier; absent for pushes and local notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display text.
    pub message: String,
    /// When the event was generated (server clock for history, receipt time for pushes).
    pub timestamp: DateTime<Utc>,
    /// Visual category.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Read state.
    pub is_read: bool,
}

impl Notification {
    /// New unread notification without an id, stamped now.
    pub fn transient(kind: NotificationType, message: impl Into<String>) -> Self {
        Self {
            id: None,
            message: message.into(),
            timestamp: Utc::now(),
            kind,
            is_read: false,
        }
    }

    /// Whether this notification carries the given server id.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

impl From<BackendNotification> for Notification {
    fn from(record: BackendNotification) -> Self {
        let timestamp = parse_timestamp(&record.timestamp).unwrap_or_else(|| {
            log::warn!(
                "[Store] Unparseable timestamp {:?} on notification {}, using now",
                record.timestamp,
                record.id
            );
            Utc::now()
        });
        Self {
            kind: classify_message(&record.message),
            id: Some(record.id),
            message: record.message,
            timestamp,
            is_read: record.is_read,
        }
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Notification record as returned by the history endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendNotification {
    /// Server identifier.
    pub id: String,
    /// Display text.
    pub message: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// Server-side read state.
    #[serde(default)]
    pub is_read: bool,
}

/// Envelope of the history endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    /// Records, most recent first.
    #[serde(default)]
    pub data: Option<Vec<BackendNotification>>,
    /// Status code echoed by the backend.
    #[serde(default)]
    pub status_code: i32,
    /// Status message echoed by the backend.
    #[serde(default)]
    pub message: String,
}

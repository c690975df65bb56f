//! JSON hub protocol codec.
//!
//! Frames are JSON records terminated by the ASCII record separator `0x1E`;
//! one WebSocket text frame may carry several records.
//!
//! # Protocol
//!
//! - Client opens with `{"protocol":"json","version":1}` and waits for `{}`
//!   (or `{"error": "..."}`).
//! - `type: 1` invocation: `target` names the event, `arguments` the payload.
//! - `type: 6` ping: keep-alive in both directions.
//! - `type: 7` close: optional `error`, optional `allowReconnect`.
//!
//! Other message types (stream items, completions, acks) are not used by the
//! notification hub and decode to [`HubMessage::Other`].

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

use super::TransportError;

/// Record terminator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Debug, Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

/// Decoded hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server invoked a client event.
    Invocation {
        /// Event name, e.g. `ReceiveMessage`.
        target: String,
        /// Event arguments.
        arguments: Vec<serde_json::Value>,
    },
    /// Keep-alive.
    Ping,
    /// Server is closing the connection.
    Close {
        /// Error the server reported, if any.
        error: Option<String>,
        /// Whether the client may reconnect.
        allow_reconnect: bool,
    },
    /// Any other message type.
    Other(u8),
}

impl HubMessage {
    /// The single string payload notification events carry.
    ///
    /// Non-string first arguments are rendered as JSON text.
    pub fn payload(arguments: &[serde_json::Value]) -> String {
        match arguments.first() {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Handshake record sent right after the socket opens.
pub fn handshake_request() -> String {
    let request = HandshakeRequest {
        protocol: "json",
        version: 1,
    };
    frame(&serde_json::json!(request))
}

/// Keep-alive ping record.
pub fn ping() -> String {
    frame(&serde_json::json!({ "type": PING }))
}

fn frame(value: &serde_json::Value) -> String {
    format!("{value}{RECORD_SEPARATOR}")
}

/// Split a text frame into its records, dropping empty trailing pieces.
pub fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR).filter(|r| !r.trim().is_empty())
}

/// Check the handshake response record.
pub fn parse_handshake_response(record: &str) -> Result<(), TransportError> {
    let response: HandshakeResponse = serde_json::from_str(record)
        .map_err(|e| TransportError::Handshake(format!("malformed handshake response: {e}")))?;
    match response.error {
        Some(error) => Err(TransportError::Handshake(error)),
        None => Ok(()),
    }
}

/// Decode one record.
pub fn parse_message(record: &str) -> Result<HubMessage, serde_json::Error> {
    let raw: RawMessage = serde_json::from_str(record)?;
    Ok(match raw.kind {
        INVOCATION => HubMessage::Invocation {
            target: raw.target.unwrap_or_default(),
            arguments: raw.arguments,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        other => HubMessage::Other(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_format() {
        let request = handshake_request();
        assert!(request.ends_with(RECORD_SEPARATOR));
        let parsed: serde_json::Value =
            serde_json::from_str(request.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(parsed["protocol"], "json");
        assert_eq!(parsed["version"], 1);
    }

    #[test]
    fn test_handshake_response() {
        assert!(parse_handshake_response("{}").is_ok());
        assert_eq!(
            parse_handshake_response(r#"{"error":"Requested protocol 'json' is not available."}"#),
            Err(TransportError::Handshake(
                "Requested protocol 'json' is not available.".to_string()
            ))
        );
        assert!(matches!(
            parse_handshake_response("nope"),
            Err(TransportError::Handshake(_))
        ));
    }

    #[test]
    fn test_records_split_batched_frame() {
        let frame = "{}\u{1e}{\"type\":6}\u{1e}";
        let parts: Vec<&str> = records(frame).collect();
        assert_eq!(parts, vec!["{}", "{\"type\":6}"]);
    }

    #[test]
    fn test_parse_invocation() {
        let msg = parse_message(
            r#"{"type":1,"target":"ReceiveMessage","arguments":["Exam submitted"]}"#,
        )
        .unwrap();
        let HubMessage::Invocation { target, arguments } = msg else {
            panic!("expected invocation");
        };
        assert_eq!(target, "ReceiveMessage");
        assert_eq!(HubMessage::payload(&arguments), "Exam submitted");
    }

    #[test]
    fn test_payload_non_string_argument() {
        let args = vec![serde_json::json!({ "text": "hi" })];
        assert_eq!(HubMessage::payload(&args), r#"{"text":"hi"}"#);
        assert_eq!(HubMessage::payload(&[]), "");
    }

    #[test]
    fn test_parse_close_and_ping() {
        assert_eq!(parse_message(r#"{"type":6}"#).unwrap(), HubMessage::Ping);
        assert_eq!(
            parse_message(r#"{"type":7,"error":"Unauthorized","allowReconnect":false}"#).unwrap(),
            HubMessage::Close {
                error: Some("Unauthorized".to_string()),
                allow_reconnect: false,
            }
        );
        assert_eq!(parse_message(r#"{"type":3}"#).unwrap(), HubMessage::Other(3));
        assert!(parse_message("garbage").is_err());
    }

    #[test]
    fn test_ping_record() {
        assert_eq!(ping(), "{\"type\":6}\u{1e}");
    }
}

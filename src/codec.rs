// Wire codec for the consoled line-delimited JSON protocol - separates the
// wire format from the Router/Client Session logic that use it. Each message
// is a single JSON object terminated by CR LF; `Message` models the closed
// set of identifiers the protocol recognizes as a tagged enum rather than a
// duck-typed field mapping, so `validate` is exhaustive pattern matching
// once the frame parses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::error::ConsoledError;

/// Protocol major version this crate implements. Inbound frames with a
/// greater major version are rejected.
pub const PROTOCOL_MAJOR: u32 = 0;
/// Protocol minor version. Encoded on the wire as `MAJOR + MINOR / 100`.
pub const PROTOCOL_MINOR: u32 = 51;

/// The fixed TCP port the consoled server listens on.
pub const SERVER_PORT: u16 = 29168;

fn protocol_version() -> f64 {
    PROTOCOL_MAJOR as f64 + (PROTOCOL_MINOR as f64) / 100.0
}

/// A single decoded/encodable protocol frame.
///
/// Tagged on the wire by the lower-case `identifier` field. Variants carry
/// only the fields the wire protocol specifies for that identifier;
/// unrecognized fields on the wire are ignored, unrecognized identifiers
/// fail to parse and surface as `ConsoledError::Protocol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "identifier", rename_all = "kebab-case")]
pub enum Message {
    /// client -> server: request general status.
    Status,
    /// client -> server: subscribe to a stream.
    Open {
        stream: String,
        #[serde(default = "default_mode")]
        mode: String,
    },
    /// client -> server: unsubscribe from a stream.
    Close { stream: String },
    /// client -> server: inject data into a stream.
    Write { stream: String, data: String },
    /// client -> server: autonomous reply to a `ping-request`.
    PingResponse,
    /// server -> client: raw stream bytes.
    Data { stream: String, data: String },
    /// server -> client: acknowledgement of a prior request.
    Ok {
        command: AckCommand,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        listener_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        writer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        streams: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uptime: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_count: Option<u32>,
    },
    /// server -> client: request failed.
    Fail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        error: String,
    },
    /// server -> client: liveness probe; the Router answers it directly.
    PingRequest,
}

fn default_mode() -> String {
    "read".to_string()
}

/// The `command` a `Message::Ok` acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckCommand {
    Open,
    Close,
    Status,
    Write,
}

impl Message {
    /// Encode this message to a JSON frame, stamping the local protocol
    /// version and appending the CR LF frame terminator. The codec never
    /// fails to encode a well-formed `Message`; fallibility is kept in the
    /// signature because `serde_json` serialization is fallible in general.
    pub fn encode(&self) -> Result<Vec<u8>, ConsoledError> {
        let mut value = serde_json::to_value(self).map_err(ConsoledError::Encode)?;
        let obj = value
            .as_object_mut()
            .expect("Message always serializes to a JSON object");
        obj.insert(
            "version".to_string(),
            serde_json::json!(protocol_version()),
        );

        let mut bytes = serde_json::to_vec(&value).map_err(ConsoledError::Encode)?;
        bytes.extend_from_slice(b"\r\n");
        Ok(bytes)
    }

    /// Decode and validate one frame's worth of bytes (without the CR LF
    /// terminator, which the Router strips during frame reassembly).
    pub fn decode(bytes: &[u8]) -> Result<Message, ConsoledError> {
        let value: Value = serde_json::from_slice(bytes).map_err(ConsoledError::Decode)?;
        validate(&value)?;
        serde_json::from_value(value)
            .map_err(|e| ConsoledError::Protocol(format!("unrecognized frame: {e}")))
    }
}

/// Validate that a parsed JSON value is a well-formed frame header: an
/// object carrying a numeric `version` whose major part is supported and a
/// string `identifier`. Does not validate identifier-specific fields; that
/// happens when the value is subsequently deserialized into a `Message`.
pub fn validate(value: &Value) -> Result<(), ConsoledError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ConsoledError::Protocol("frame is not a JSON object".to_string()))?;

    let version = obj
        .get("version")
        .and_then(Value::as_f64)
        .ok_or_else(|| ConsoledError::Protocol("frame missing numeric version".to_string()))?;

    if version.trunc() as u32 > PROTOCOL_MAJOR {
        return Err(ConsoledError::Protocol(format!(
            "unsupported protocol major version {}",
            version.trunc() as u32
        )));
    }

    if !obj.get("identifier").is_some_and(Value::is_string) {
        return Err(ConsoledError::Protocol(
            "frame missing string identifier".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_injects_version_and_terminator() {
        let frame = Message::Status.encode().unwrap();
        assert!(frame.ends_with(b"\r\n"));
        let value: Value = serde_json::from_slice(&frame[..frame.len() - 2]).unwrap();
        assert_eq!(value["version"].as_f64().unwrap(), 0.51);
        assert_eq!(value["identifier"].as_str().unwrap(), "status");
    }

    #[test]
    fn round_trip_open() {
        let msg = Message::Open {
            stream: "A".to_string(),
            mode: "read write".to_string(),
        };
        let frame = msg.encode().unwrap();
        let decoded = Message::decode(&frame[..frame.len() - 2]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn open_defaults_mode_to_read() {
        let raw = br#"{"version":0.51,"identifier":"open","stream":"A"}"#;
        let decoded = Message::decode(raw).unwrap();
        assert_eq!(
            decoded,
            Message::Open {
                stream: "A".to_string(),
                mode: "read".to_string(),
            }
        );
    }

    #[test]
    fn decode_rejects_missing_version() {
        let raw = br#"{"identifier":"status"}"#;
        let err = Message::decode(raw).unwrap_err();
        assert!(matches!(err, ConsoledError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_future_major_version() {
        let raw = br#"{"version":1.0,"identifier":"status"}"#;
        let err = Message::decode(raw).unwrap_err();
        assert!(matches!(err, ConsoledError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_non_object() {
        let raw = br#"[1,2,3]"#;
        let err = Message::decode(raw).unwrap_err();
        assert!(matches!(err, ConsoledError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let raw = br#"{not json"#;
        let err = Message::decode(raw).unwrap_err();
        assert!(matches!(err, ConsoledError::Decode(_)));
    }

    #[test]
    fn decode_rejects_unknown_identifier() {
        let raw = br#"{"version":0.51,"identifier":"teleport"}"#;
        let err = Message::decode(raw).unwrap_err();
        assert!(matches!(err, ConsoledError::Protocol(_)));
    }

    #[test]
    fn ok_status_round_trip_with_stream() {
        let msg = Message::Ok {
            command: AckCommand::Status,
            stream: Some("A".to_string()),
            mode: None,
            listener_count: Some(2),
            writer: Some("alice".to_string()),
            streams: None,
            uptime: None,
            client_count: None,
        };
        let frame = msg.encode().unwrap();
        let decoded = Message::decode(&frame[..frame.len() - 2]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn fail_without_command() {
        let raw = br#"{"version":0.51,"identifier":"fail","error":"no such stream"}"#;
        let decoded = Message::decode(raw).unwrap();
        assert_eq!(
            decoded,
            Message::Fail {
                command: None,
                error: "no such stream".to_string(),
            }
        );
    }
}

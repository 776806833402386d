// =============================================================================
// Command/response envelope codec — pure functions, no I/O
// =============================================================================
//
// `decode_command` / `encode_response` are the only place that understands
// the wire shape of the host <-> engine channel. Keeping them pure (no
// transport, no dispatch) makes the round-trip law in the test suite below
// exhaustive: `encode_response(r)` followed by re-parsing it as JSON must
// reproduce the same structure for every well-formed `r`.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Maximum accepted frame size; larger frames are rejected as `PAYLOAD_TOO_LARGE`.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Maximum length of a command identifier string.
pub const MAX_COMMAND_LEN: usize = 64;

/// A decoded request. `id` is kept as a raw [`Value`] — the engine never
/// interprets it, only echoes it back verbatim.
#[derive(Debug, Clone)]
pub struct Command {
    pub command: String,
    pub id: Value,
    pub payload: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    command: Option<Value>,
    id: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

/// Outcome of decoding a single input line.
pub enum DecodedLine {
    /// An empty (or whitespace-only) line — the transport ignores it.
    Blank,
    Command(Command),
    Error(DecodeError),
}

#[derive(Debug, Clone)]
pub struct DecodeError {
    pub code: ErrorCode,
    pub message: String,
    /// The request id, if it could be recovered even though the envelope was
    /// otherwise malformed. `None` means the response cannot be correlated.
    pub id: Option<Value>,
    pub command_name: Option<String>,
}

/// Decode one line of input (without its trailing newline) into a [`Command`].
pub fn decode_line(line: &[u8]) -> DecodedLine {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return DecodedLine::Blank;
    }

    if line.len() > MAX_FRAME_BYTES {
        return DecodedLine::Error(DecodeError {
                code: ErrorCode::PayloadTooLarge,
                message: format!("frame of {} bytes exceeds the {} byte limit", line.len(), MAX_FRAME_BYTES),
                id: None,
                command_name: None,
            });
    }

    let raw: RawCommand = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(e) => {
            return DecodedLine::Error(DecodeError {
                    code: ErrorCode::InvalidCommand,
                    message: format!("malformed JSON: {e}"),
                    id: None,
                    command_name: None,
                })
        }
    };

    let id = raw.id;

    let command = match raw.command {
        Some(Value::String(s)) if is_valid_command_name(&s) => s,
        Some(Value::String(s)) => {
            return DecodedLine::Error(DecodeError {
                    code: ErrorCode::InvalidCommand,
                    message: "command must be lowercase, underscores only, length <= 64".to_string(),
                    id,
                    command_name: Some(sanitize_for_log(&s)),
                })
        }
        _ => {
            return DecodedLine::Error(DecodeError {
                    code: ErrorCode::InvalidCommand,
                    message: "command must be a non-empty string".to_string(),
                    id,
                    command_name: None,
                })
        }
    };

    if id.is_none() {
        return DecodedLine::Error(DecodeError {
                code: ErrorCode::InvalidCommand,
                message: "id is required".to_string(),
                id: None,
                command_name: Some(command),
            });
    }

    let payload = match raw.payload {
        None => serde_json::Map::new(),
        Some(Value::Object(m)) => m,
        Some(_) => {
            return DecodedLine::Error(DecodeError {
                    code: ErrorCode::InvalidCommand,
                    message: "payload must be a JSON object".to_string(),
                    id,
                    command_name: Some(command),
                })
        }
    };

    DecodedLine::Command(Command {
            command,
            id: id.unwrap(),
            payload,
        })
}

fn is_valid_command_name(s: &str) -> bool {
    !s.is_empty()
    && s.len() <= MAX_COMMAND_LEN
    && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Escape control characters and bound the length of a string before it is
/// placed in a log line or an error message derived from untrusted input.
pub fn sanitize_for_log(s: &str) -> String {
    const MAX_LEN: usize = 200;
    let escaped: String = s
    .chars()
    .map(|c| if c.is_control() { '\u{fffd}' } else { c })
    .take(MAX_LEN)
    .collect();
    if s.chars().count() > MAX_LEN {
        format!("{escaped}...")
    } else {
        escaped
    }
}

/// Status discriminant of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Warning,
}

/// A structured error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The response envelope. Exactly one of `data`/`error` is present,
/// enforced by the constructors rather than by the type itself (JSON has no
/// sum types, and the wire shape must stay a flat object).
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(command: impl Into<String>, id: Value, data: Value) -> Self {
        Self {
            status: Status::Success,
            command: Some(command.into()),
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn warning(command: impl Into<String>, id: Value, data: Value) -> Self {
        Self {
            status: Status::Warning,
            command: Some(command.into()),
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(command: Option<String>, id: Value, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            command,
            id,
            data: None,
            error: Some(ResponseError {
                    code: code.as_str().to_string(),
                    message: message.into(),
                    data: None,
                }),
        }
    }
}

/// Serialize a [`Response`] as a single line of JSON with no embedded
/// newlines and exactly one trailing `\n`.
pub fn encode_response(r: &Response) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(r).expect("Response serialization is infallible");
    bytes.push(b'\n');
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_ok(s: &str) -> Command {
        match decode_line(s.as_bytes()) {
            DecodedLine::Command(c) => c,
            DecodedLine::Error(e) => panic!("expected command, got error: {e:?}"),
            DecodedLine::Blank => panic!("expected command, got blank"),
        }
    }

    fn decode_err(s: &str) -> DecodeError {
        match decode_line(s.as_bytes()) {
            DecodedLine::Error(e) => e,
            other => panic!("expected error, got {other:?}"),
        }
    }

    impl std::fmt::Debug for DecodedLine {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                DecodedLine::Blank => write!(f, "Blank"),
                DecodedLine::Command(c) => write!(f, "Command({})", c.command),
                DecodedLine::Error(e) => write!(f, "Error({:?})", e.code),
            }
        }
    }

    #[test]
    fn decodes_minimal_command() {
        let c = decode_ok(r#"{"command":"get_health","id":1}"#);
        assert_eq!(c.command, "get_health");
        assert_eq!(c.id, Value::from(1));
        assert!(c.payload.is_empty());
    }

    #[test]
    fn decodes_with_payload() {
        let c = decode_ok(r#"{"command":"tr_login","id":"abc","payload":{"phone":"+1555"}}"#);
        assert_eq!(c.command, "tr_login");
        assert_eq!(c.id, Value::from("abc"));
        assert_eq!(c.payload.get("phone").unwrap(), "+1555");
    }

    #[test]
    fn blank_line_is_ignored() {
        assert!(matches!(decode_line(b" "), DecodedLine::Blank));
        assert!(matches!(decode_line(b""), DecodedLine::Blank));
    }

    #[test]
    fn rejects_malformed_json() {
        let e = decode_err("not json");
        assert_eq!(e.code, ErrorCode::InvalidCommand);
    }

    #[test]
    fn rejects_missing_command() {
        let e = decode_err(r#"{"id":1}"#);
        assert_eq!(e.code, ErrorCode::InvalidCommand);
    }

    #[test]
    fn rejects_uppercase_command() {
        let e = decode_err(r#"{"command":"GetHealth","id":1}"#);
        assert_eq!(e.code, ErrorCode::InvalidCommand);
    }

    #[test]
    fn rejects_oversize_frame() {
        let huge = format!(r#"{{"command":"x","id":1,"payload":{{"a":"{}"}}}}"#, "a".repeat(MAX_FRAME_BYTES));
        let e = decode_err(&huge);
        assert_eq!(e.code, ErrorCode::PayloadTooLarge);
    }

    #[test]
    fn rejects_non_object_payload() {
        let e = decode_err(r#"{"command":"x","id":1,"payload":[1,2]}"#);
        assert_eq!(e.code, ErrorCode::InvalidCommand);
    }

    #[test]
    fn sanitizes_control_characters_in_log() {
        let s = sanitize_for_log("abc\u{0007}def");
        assert!(!s.contains('\u{0007}'));
    }

    #[test]
    fn encode_response_has_single_trailing_newline() {
        let r = Response::success("get_health", Value::from(1), serde_json::json!({"ok": true}));
        let bytes = encode_response(&r);
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn success_and_error_are_mutually_exclusive_in_json() {
        let r = Response::error(Some("x".into()), Value::from(1), ErrorCode::UnknownCommand, "nope");
        let v: Value = serde_json::from_slice(&encode_response(&r)).unwrap();
        assert!(v.get("data").is_none());
        assert!(v.get("error").is_some());

        let r = Response::success("x", Value::from(1), serde_json::json!({}));
        let v: Value = serde_json::from_slice(&encode_response(&r)).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("data").is_some());
    }

    #[test]
    fn response_echoes_request_id() {
        for id in [Value::from(42), Value::from("abc-123")] {
            let r = Response::success("get_health", id.clone(), serde_json::json!({}));
            assert_eq!(r.id, id);
        }
    }
}

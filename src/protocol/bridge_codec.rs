// =============================================================================
// Broker-bridge wire codec — JSON-RPC-shaped request/response, internal only
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest {
    pub method: String,
    pub params: Value,
    pub id: String,
}

pub fn encode_bridge_request(r: &BridgeRequest) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(r).expect("BridgeRequest serialization is infallible");
    bytes.push(b'\n');
    bytes
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<BridgeError>,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeReadyHandshake {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug)]
pub enum BridgeDecodeError {
    Malformed(String),
}

pub fn decode_bridge_response(line: &[u8]) -> Result<BridgeResponse, BridgeDecodeError> {
    serde_json::from_slice(line).map_err(|e| BridgeDecodeError::Malformed(e.to_string()))
}

pub fn decode_handshake(line: &[u8]) -> Result<BridgeReadyHandshake, BridgeDecodeError> {
    serde_json::from_slice(line).map_err(|e| BridgeDecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_request() {
        let req = BridgeRequest {
            method: "login".into(),
            params: serde_json::json!({"phone": "+1555", "pin": "1234"}),
            id: "req-1".into(),
        };
        let bytes = encode_bridge_request(&req);
        assert_eq!(bytes.last(), Some(&b'\n'));
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["method"], "login");
        assert_eq!(v["id"], "req-1");
    }

    #[test]
    fn decodes_success_response() {
        let line = br#"{"result":{"needs_2fa":true},"error":null,"id":"req-1"}"#;
        let resp = decode_bridge_response(line).unwrap();
        assert_eq!(resp.id, "req-1");
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn decodes_error_response() {
        let line = br#"{"result":null,"error":{"message":"bad pin","code":"AUTH"},"id":"req-2"}"#;
        let resp = decode_bridge_response(line).unwrap();
        assert_eq!(resp.id, "req-2");
        assert!(resp.error.is_some());
    }

    #[test]
    fn decodes_ready_handshake() {
        let line = br#"{"status":"ready","version":"1.0"}"#;
        let hs = decode_handshake(line).unwrap();
        assert_eq!(hs.status, "ready");
    }

    #[test]
    fn rejects_malformed_handshake() {
        assert!(decode_handshake(b"not json").is_err());
    }
}

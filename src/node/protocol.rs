//! Node wire protocol.
//!
//! The node speaks a JSON-RPC dialect over the websocket. Outgoing calls
//! carry a numeric `id` for correlation; the node answers with a frame
//! holding the same `id` and either `result` or `error`. Server push arrives
//! as id-less frames carrying `method` + `params`.
//!
//! ## Frames
//!
//! ```text
//! → {"jsonrpc":"2.0","id":7,"method":"Atoms.subscribe","params":{...}}
//! ← {"jsonrpc":"2.0","id":7,"result":{...}}
//! ← {"jsonrpc":"2.0","method":"Atoms.subscribeUpdate","params":{...}}
//! ```

use serde::Deserialize;
use serde_json::{json, Value};

use crate::atom::AtomPayload;
use crate::error::ClientError;

pub const ATOMS_SUBSCRIBE: &str = "Atoms.subscribe";
pub const ATOMS_CANCEL: &str = "Atoms.cancel";
pub const ATOMS_GET_ATOM_INFO: &str = "Atoms.getAtomInfo";
pub const UNIVERSE_SUBMIT_ATOM_AND_SUBSCRIBE: &str = "Universe.submitAtomAndSubscribe";
pub const NETWORK_GET_SELF: &str = "Network.getSelf";

/// Server-push notification methods.
pub const NOTIFY_ATOM_UPDATE: &str = "Atoms.subscribeUpdate";
pub const NOTIFY_SUBMISSION_STATE: &str = "AtomSubmissionState.onNext";

/// Encode an outgoing call.
pub fn encode_request(id: u64, method: &str, params: Value) -> Result<String, ClientError> {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    Ok(serde_json::to_string(&frame)?)
}

/// An error reported by the node for a call.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// A decoded incoming frame.
#[derive(Debug)]
pub enum Incoming {
    /// Answer to an outgoing call, routed by id.
    Response {
        id: u64,
        result: Result<Value, RpcError>,
    },
    /// Server push.
    Notification { method: String, params: Value },
}

/// Decode an incoming frame.
pub fn decode_frame(text: &str) -> Result<Incoming, ClientError> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = match value.get("error") {
            Some(error) => Err(RpcError {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
            }),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Ok(Incoming::Response { id, result });
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        return Ok(Incoming::Notification {
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        });
    }

    Err(ClientError::Internal(
        "frame is neither a response nor a notification".to_string(),
    ))
}

/// Payload of an `Atoms.subscribeUpdate` push.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomUpdateNotification {
    pub subscriber_id: u64,
    pub atoms: Vec<AtomPayload>,
}

/// Payload of an `AtomSubmissionState.onNext` push.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStateNotification {
    pub subscriber_id: u64,
    pub value: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_shape() {
        let frame = encode_request(7, ATOMS_CANCEL, json!({"subscriberId": 3})).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "Atoms.cancel");
        assert_eq!(value["params"]["subscriberId"], 3);
    }

    #[test]
    fn test_decode_response_ok() {
        let frame = r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#;
        match decode_frame(frame).unwrap() {
            Incoming::Response { id, result } => {
                assert_eq!(id, 7);
                assert_eq!(result.unwrap()["ok"], true);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_response_error() {
        let frame = r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32000,"message":"boom"}}"#;
        match decode_frame(frame).unwrap() {
            Incoming::Response { id, result } => {
                assert_eq!(id, 9);
                let error = result.unwrap_err();
                assert_eq!(error.code, -32000);
                assert_eq!(error.message, "boom");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let frame = r#"{"jsonrpc":"2.0","method":"AtomSubmissionState.onNext","params":{"subscriberId":4,"value":"STORED"}}"#;
        match decode_frame(frame).unwrap() {
            Incoming::Notification { method, params } => {
                assert_eq!(method, NOTIFY_SUBMISSION_STATE);
                let note: SubmissionStateNotification = serde_json::from_value(params).unwrap();
                assert_eq!(note.subscriber_id, 4);
                assert_eq!(note.value, "STORED");
                assert!(note.message.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_frame() {
        assert!(decode_frame(r#"{"jsonrpc":"2.0"}"#).is_err());
    }
}

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::Error;

/*
    Every message on the wire is a single JSON object on its own line:

        {"src": "c1", "dest": "n1", "body": {"type": "echo", "msg_id": 1, "echo": "hi"}}

    The body always names its `type`. Requests that expect an answer carry a
    `msg_id`; the answer echoes it back as `in_reply_to`. Every other body
    field is payload and is decoded by the handler that owns the type.
*/

pub type NodeId = String;

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Body {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Builds a body whose payload fields come from a serializable struct.
    pub fn with_payload<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, Error> {
        let fields = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "payload must serialize to an object, got {other}"
                )))
            }
        };
        Ok(Body {
            kind: kind.into(),
            fields,
            ..Default::default()
        })
    }

    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        let mut body = Body::new("error");
        body.fields.insert("code".into(), Value::from(code.0));
        body.fields.insert("text".into(), Value::from(text.into()));
        body
    }

    /// Decodes the payload fields into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// Turns an `error` body into `Error::Remote`, leaving other bodies alone.
    pub fn into_result(self) -> Result<Body, Error> {
        if !self.is_error() {
            return Ok(self);
        }
        let payload: ErrorPayload = self.decode()?;
        Err(Error::Remote {
            code: ErrorCode(payload.code),
            text: payload.text.unwrap_or_default(),
        })
    }

    /// A zero or missing `msg_id` means the sender is not waiting for an answer.
    pub fn expects_reply(&self) -> bool {
        matches!(self.msg_id, Some(id) if id != 0)
    }
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: u16,
    #[serde(default)]
    text: Option<String>,
}

/// Numeric error code carried in `error` bodies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const TIMEOUT: ErrorCode = ErrorCode(0);
    pub const NODE_NOT_FOUND: ErrorCode = ErrorCode(1);
    pub const NOT_SUPPORTED: ErrorCode = ErrorCode(10);
    pub const TEMPORARILY_UNAVAILABLE: ErrorCode = ErrorCode(11);
    pub const MALFORMED_REQUEST: ErrorCode = ErrorCode(12);
    pub const CRASH: ErrorCode = ErrorCode(13);
    pub const ABORT: ErrorCode = ErrorCode(14);
    pub const KEY_DOES_NOT_EXIST: ErrorCode = ErrorCode(20);
    pub const KEY_ALREADY_EXISTS: ErrorCode = ErrorCode(21);
    pub const PRECONDITION_FAILED: ErrorCode = ErrorCode(22);
    pub const TXN_CONFLICT: ErrorCode = ErrorCode(30);

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            ErrorCode::TIMEOUT => "timeout",
            ErrorCode::NODE_NOT_FOUND => "node-not-found",
            ErrorCode::NOT_SUPPORTED => "not-supported",
            ErrorCode::TEMPORARILY_UNAVAILABLE => "temporarily-unavailable",
            ErrorCode::MALFORMED_REQUEST => "malformed-request",
            ErrorCode::CRASH => "crash",
            ErrorCode::ABORT => "abort",
            ErrorCode::KEY_DOES_NOT_EXIST => "key-does-not-exist",
            ErrorCode::KEY_ALREADY_EXISTS => "key-already-exists",
            ErrorCode::PRECONDITION_FAILED => "precondition-failed",
            ErrorCode::TXN_CONFLICT => "txn-conflict",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::Error;
use crate::network::{Body, NodeId};

/// `broadcast` payload. Copies forwarded between nodes set `forwarded`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub message: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forwarded: bool,
}

impl BroadcastRequest {
    /// Body of a copy sent to a neighbor.
    pub fn forward(value: i64) -> Result<Body, Error> {
        Body::with_payload(
            "broadcast",
            &BroadcastRequest {
                message: value,
                forwarded: true,
            },
        )
    }
}

/// Where a broadcast came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Origin {
    Client,
    /// A neighbor's forwarded copy. `ack` is set when the neighbor sent it
    /// as an RPC and is waiting for the acknowledgement to stop retrying.
    Forwarded { ack: bool },
}

impl Origin {
    /// Reads the origin off a decoded `broadcast` body. A zero or missing
    /// `msg_id` is the older convention for a forwarded copy that nobody
    /// waits on.
    pub fn of(request: &BroadcastRequest, body: &Body) -> Self {
        match (request.forwarded, body.expects_reply()) {
            (false, true) => Origin::Client,
            (_, ack) => Origin::Forwarded { ack },
        }
    }
}

/// Whether a handled broadcast is answered with `broadcast_ok`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Acknowledge {
    Reply,
    Silent,
}

impl Acknowledge {
    pub fn into_body(self) -> Option<Body> {
        match self {
            Acknowledge::Reply => Some(Body::new("broadcast_ok")),
            Acknowledge::Silent => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct TopologyRequest {
    pub topology: HashMap<NodeId, Vec<NodeId>>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct ReadMessagesReply {
    pub messages: Vec<i64>,
}

pub mod message;
pub mod node;
pub mod stdio;

#[cfg(test)]
pub mod memory;
#[cfg(test)]
pub mod testing;

pub use message::*;
pub use node::*;

use async_trait::async_trait;

use crate::common::Error;

/*
    Network communication is point-to-point and unreliable: a message sent
    from one node to another may be delayed, reordered or lost outright, and
    a partitioned peer may stay unreachable for an unbounded time. Nothing
    here retries on its own. Components that need delivery (gossip forwards,
    KV calls) wrap `rpc` in their own timeout and retry loop, relying on the
    receiver being idempotent so that a duplicate is harmless.
*/

/// Outbound side of the network, as seen by the components.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity assigned by `init`.
    fn node_id(&self) -> Result<NodeId, Error>;

    /// Fire-and-forget send.
    async fn send(&self, dest: &str, body: Body) -> Result<(), Error>;

    /// Answers `request`, tying the reply to it through `in_reply_to`.
    async fn reply(&self, request: &Message, body: Body) -> Result<(), Error>;

    /// Sends a request and waits for its reply. There is no deadline here;
    /// callers bound the wait with `tokio::time::timeout`.
    async fn rpc(&self, dest: &str, body: Body) -> Result<Message, Error>;
}

/// Inbound side: what the node runtime calls for each request it receives.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Runs once after the node has its identity and has answered `init`.
    async fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Handles one request. `Ok(None)` means no reply is sent.
    async fn handle(&self, request: &Message) -> Result<Option<Body>, Error>;
}

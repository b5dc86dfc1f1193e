use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{Body, Handler, Message, NodeId, Transport};
use crate::common::Error;

/// The local end of the network: owns this node's identity, allocates
/// message ids, and matches replies to the RPCs waiting on them.
///
/// A `Node` does no I/O itself. Outbound messages go into the channel
/// returned by [`Node::new`]; inbound messages are pushed in through
/// [`Node::dispatch`]. The stdio runtime and the in-memory test cluster
/// differ only in how they wire those two ends.
pub struct Node {
    id: OnceLock<NodeId>,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    outbound: mpsc::UnboundedSender<Message>,
}

#[derive(Deserialize)]
struct InitRequest {
    node_id: NodeId,
    #[serde(default)]
    node_ids: Vec<NodeId>,
}

impl Node {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let node = Node {
            id: OnceLock::new(),
            // 0 is reserved: a zero msg_id marks a message nobody waits on.
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound,
        };
        (Arc::new(node), outbound_rx)
    }

    /// Fixes this node's identity. The identity never changes afterwards;
    /// returns false if a different one was already assigned.
    pub fn assign_identity(&self, id: NodeId) -> bool {
        match self.id.set(id) {
            Ok(()) => true,
            Err(id) => self.id.get() == Some(&id),
        }
    }

    /// Routes one inbound message. Replies complete their pending RPC in
    /// place; requests are handled on their own task.
    pub fn dispatch<H: Handler>(self: &Arc<Self>, message: Message, handler: &Arc<H>) {
        if let Some(in_reply_to) = message.body.in_reply_to {
            self.complete(in_reply_to, message);
            return;
        }

        let node = Arc::clone(self);
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            if message.body.kind == "init" {
                node.handle_init(message, handler).await;
            } else {
                let result = handler.handle(&message).await;
                node.respond(&message, result).await;
            }
        });
    }

    /// Number of RPCs still waiting for a reply.
    #[cfg(test)]
    pub fn pending_rpcs(&self) -> usize {
        self.pending_table().len()
    }

    fn pending_table(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Message>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, in_reply_to: u64, message: Message) {
        let slot = self.pending_table().remove(&in_reply_to);
        match slot {
            // The caller may have given up already; that is fine.
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!(in_reply_to, src = %message.src, "dropping reply with no pending rpc"),
        }
    }

    async fn handle_init<H: Handler>(&self, request: Message, handler: Arc<H>) {
        let init: InitRequest = match request.body.decode() {
            Ok(init) => init,
            Err(e) => {
                self.respond(&request, Err(e)).await;
                return;
            }
        };

        let peers = init.node_ids.len();
        if self.assign_identity(init.node_id.clone()) {
            info!(node_id = %init.node_id, peers, "node initialized");
        } else {
            warn!(node_id = %init.node_id, "ignoring init for a different identity");
        }
        self.respond(&request, Ok(Some(Body::new("init_ok")))).await;

        if let Err(e) = handler.init().await {
            warn!(error = %e, "init hook failed");
        }
    }

    async fn respond(&self, request: &Message, result: Result<Option<Body>, Error>) {
        let body = match result {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(e) => {
                warn!(kind = %request.body.kind, src = %request.src, error = %e, "request failed");
                if !request.body.expects_reply() {
                    return;
                }
                Body::error(e.code(), e.to_string())
            }
        };

        if let Err(e) = self.reply(request, body).await {
            warn!(dest = %request.src, error = %e, "failed to send reply");
        }
    }
}

/// Removes an RPC's pending slot when the waiting future finishes or is
/// dropped (for instance by a timeout), so abandoned calls do not pile up.
struct PendingGuard<'a> {
    node: &'a Node,
    msg_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.node.pending_table().remove(&self.msg_id);
    }
}

#[async_trait]
impl Transport for Node {
    fn node_id(&self) -> Result<NodeId, Error> {
        self.id.get().cloned().ok_or(Error::NotInitialized)
    }

    async fn send(&self, dest: &str, body: Body) -> Result<(), Error> {
        let message = Message {
            src: self.node_id()?,
            dest: dest.to_string(),
            body,
        };
        self.outbound.send(message).map_err(|_| Error::TransportClosed)
    }

    async fn reply(&self, request: &Message, mut body: Body) -> Result<(), Error> {
        body.in_reply_to = request.body.msg_id;
        self.send(&request.src, body).await
    }

    async fn rpc(&self, dest: &str, mut body: Body) -> Result<Message, Error> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        body.msg_id = Some(msg_id);

        let (tx, rx) = oneshot::channel();
        self.pending_table().insert(msg_id, tx);
        let _guard = PendingGuard { node: self, msg_id };

        self.send(dest, body).await?;
        let mut reply = rx.await.map_err(|_| Error::TransportClosed)?;
        reply.body = reply.body.into_result()?;
        Ok(reply)
    }
}

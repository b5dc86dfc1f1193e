use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Body, Handler, Message, Node, NodeId, Transport};
use crate::common::Error;
use crate::kv::memory::MemoryKv;

pub const CLIENT: &str = "c1";
pub const KV_SERVICE: &str = "seq-kv";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A cluster of nodes wired together in memory. Links between cluster
/// nodes can drop messages at random or be cut entirely; traffic to and
/// from the client and the key-value service is always delivered.
pub struct Cluster<H: Handler> {
    router: Arc<Router<H>>,
    cancel: CancellationToken,
}

struct Router<H: Handler> {
    nodes: HashMap<NodeId, (Arc<Node>, Arc<H>)>,
    client: Arc<Node>,
    client_handler: Arc<Unhandled>,
    kv: Arc<MemoryKv>,
    links: Links,
}

#[derive(Default)]
struct Links {
    loss: Mutex<f64>,
    cut: Mutex<HashSet<(NodeId, NodeId)>>,
}

/// The client only ever receives replies.
struct Unhandled;

#[async_trait]
impl Handler for Unhandled {
    async fn handle(&self, request: &Message) -> Result<Option<Body>, Error> {
        Err(Error::NotSupported(request.body.kind.clone()))
    }
}

impl<H: Handler> Cluster<H> {
    /// Starts one node per id, building each node's handler with `build`.
    pub fn start<F>(node_ids: &[&str], kv: Arc<MemoryKv>, build: F) -> Self
    where
        F: Fn(Arc<Node>, CancellationToken) -> Arc<H>,
    {
        let cancel = CancellationToken::new();
        let mut nodes = HashMap::new();
        let mut outbounds = Vec::new();
        for id in node_ids {
            let (node, outbound) = Node::new();
            let handler = build(Arc::clone(&node), cancel.clone());
            nodes.insert(id.to_string(), (node, handler));
            outbounds.push(outbound);
        }

        let (client, outbound) = Node::new();
        client.assign_identity(CLIENT.to_string());
        outbounds.push(outbound);

        let router = Arc::new(Router {
            nodes,
            client,
            client_handler: Arc::new(Unhandled),
            kv,
            links: Links::default(),
        });
        for outbound in outbounds {
            tokio::spawn(pump(Arc::clone(&router), outbound, cancel.clone()));
        }

        Cluster { router, cancel }
    }

    /// Sends `init` to every node and waits for each `init_ok`.
    pub async fn init(&self) -> Result<(), Error> {
        let mut node_ids: Vec<NodeId> = self.router.nodes.keys().cloned().collect();
        node_ids.sort();
        for id in &node_ids {
            let body = Body::with_payload("init", &json!({"node_id": id, "node_ids": node_ids}))?;
            let reply = self.request(id, body).await?;
            debug_assert_eq!(reply.body.kind, "init_ok");
        }
        Ok(())
    }

    /// Sends `body` from the client to `dest` and waits for the reply.
    pub async fn request(&self, dest: &str, body: Body) -> Result<Message, Error> {
        timeout(REQUEST_TIMEOUT, self.router.client.rpc(dest, body))
            .await
            .map_err(|_| Error::Timeout {
                dest: dest.to_string(),
                after: REQUEST_TIMEOUT,
            })?
    }

    /// Builds a request body from a JSON object literal.
    pub async fn call(&self, dest: &str, kind: &str, fields: Value) -> Result<Message, Error> {
        self.request(dest, Body::with_payload(kind, &fields)?).await
    }

    pub fn handler(&self, id: &str) -> &Arc<H> {
        &self.router.nodes[id].1
    }

    /// Probability in [0, 1] that a message between two nodes is dropped.
    pub fn set_loss(&self, probability: f64) {
        *self.router.links.loss.lock().unwrap() = probability;
    }

    /// Drops everything between `a` and `b`, both directions.
    pub fn partition(&self, a: &str, b: &str) {
        let mut cut = self.router.links.cut.lock().unwrap();
        cut.insert((a.to_string(), b.to_string()));
        cut.insert((b.to_string(), a.to_string()));
    }

    pub fn heal(&self) {
        self.router.links.cut.lock().unwrap().clear();
    }
}

impl<H: Handler> Drop for Cluster<H> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<H: Handler> Router<H> {
    async fn route(&self, message: Message) {
        if message.dest == KV_SERVICE {
            let mut body = self.kv.serve(&message.body).await;
            body.in_reply_to = message.body.msg_id;
            self.deliver(Message {
                src: KV_SERVICE.to_string(),
                dest: message.src,
                body,
            });
            return;
        }

        if self.drops(&message.src, &message.dest) {
            trace!(src = %message.src, dest = %message.dest, kind = %message.body.kind, "dropped");
            return;
        }
        self.deliver(message);
    }

    fn drops(&self, src: &str, dest: &str) -> bool {
        if !self.nodes.contains_key(src) || !self.nodes.contains_key(dest) {
            return false;
        }
        if self.links.cut.lock().unwrap().contains(&(src.to_string(), dest.to_string())) {
            return true;
        }
        let loss = *self.links.loss.lock().unwrap();
        loss > 0.0 && rand::random::<f64>() < loss
    }

    fn deliver(&self, message: Message) {
        if message.dest == CLIENT {
            self.client.dispatch(message, &self.client_handler);
        } else if let Some((node, handler)) = self.nodes.get(&message.dest) {
            node.dispatch(message, handler);
        } else {
            debug!(dest = %message.dest, "no such node");
        }
    }
}

async fn pump<H: Handler>(
    router: Arc<Router<H>>,
    mut outbound: UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        router.route(message).await;
    }
}

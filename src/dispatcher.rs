use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{BroadcastRequest, Disseminator, Origin, ReadMessagesReply, TopologyRequest};
use crate::common::Error;
use crate::config::{NodeConfig, Workload};
use crate::counter::GrowOnlyCounter;
use crate::kv::KvStore;
use crate::network::{Body, Handler, Message, Transport};

/// Routes each request type to the component that owns it.
pub struct Dispatcher<T: Transport, K: KvStore> {
    transport: Arc<T>,
    workload: Workload,
    next_id: AtomicU64,
    gossip: Disseminator<T>,
    counter: GrowOnlyCounter<K>,
}

#[derive(Deserialize)]
struct AddRequest {
    delta: i64,
}

#[derive(Serialize)]
struct GenerateReply {
    id: String,
}

#[derive(Serialize)]
struct ReadValueReply {
    value: i64,
}

impl<T: Transport, K: KvStore> Dispatcher<T, K> {
    pub fn new(transport: Arc<T>, kv: Arc<K>, config: &NodeConfig, cancel: CancellationToken) -> Self {
        Dispatcher {
            gossip: Disseminator::new(Arc::clone(&transport), config.gossip.clone(), cancel.clone()),
            counter: GrowOnlyCounter::new(kv, config.counter.clone(), cancel),
            transport,
            workload: config.workload,
            next_id: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn gossip(&self) -> &Disseminator<T> {
        &self.gossip
    }

    #[cfg(test)]
    pub fn counter(&self) -> &GrowOnlyCounter<K> {
        &self.counter
    }

    /// `<node id>-<sequence>`; unique as long as node ids are.
    fn generate_id(&self) -> Result<String, Error> {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{}-{}", self.transport.node_id()?, sequence))
    }

    fn require(&self, workload: Workload, kind: &str) -> Result<(), Error> {
        if self.workload == workload {
            Ok(())
        } else {
            Err(Error::NotSupported(format!("{kind} outside the {workload:?} workload")))
        }
    }
}

#[async_trait]
impl<T: Transport, K: KvStore> Handler for Dispatcher<T, K> {
    async fn init(&self) -> Result<(), Error> {
        match self.workload {
            Workload::Counter => self.counter.initialize().await,
            Workload::Broadcast => Ok(()),
        }
    }

    async fn handle(&self, request: &Message) -> Result<Option<Body>, Error> {
        let body = &request.body;
        match body.kind.as_str() {
            "echo" => {
                let mut reply = Body::new("echo_ok");
                reply.fields = body.fields.clone();
                Ok(Some(reply))
            }
            "generate" => {
                let id = self.generate_id()?;
                Ok(Some(Body::with_payload("generate_ok", &GenerateReply { id })?))
            }
            "broadcast" => {
                self.require(Workload::Broadcast, "broadcast")?;
                let broadcast: BroadcastRequest = body.decode()?;
                let origin = Origin::of(&broadcast, body);
                let ack = self
                    .gossip
                    .handle_broadcast(broadcast.message, &request.src, origin)
                    .await;
                Ok(ack.into_body())
            }
            "topology" => {
                let topology: TopologyRequest = body.decode()?;
                self.gossip.handle_topology(&topology.topology).await?;
                Ok(Some(Body::new("topology_ok")))
            }
            "read" => match self.workload {
                Workload::Broadcast => {
                    let messages = self.gossip.handle_read().await;
                    Ok(Some(Body::with_payload("read_ok", &ReadMessagesReply { messages })?))
                }
                Workload::Counter => {
                    let value = self.counter.read().await?;
                    Ok(Some(Body::with_payload("read_ok", &ReadValueReply { value })?))
                }
            },
            "add" => {
                self.require(Workload::Counter, "add")?;
                let AddRequest { delta } = body.decode()?;
                self.counter.add(delta).await?;
                Ok(Some(Body::new("add_ok")))
            }
            other => Err(Error::NotSupported(other.to_string())),
        }
    }
}

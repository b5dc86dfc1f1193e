use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    message::{Acknowledge, BroadcastRequest, Origin},
    peers::Peers,
    store::SeenStore,
};
use crate::common::Error;
use crate::config::GossipConfig;
use crate::network::{NodeId, Transport};

/*
    A value is accepted once per node. The node that accepts it hands it to
    every neighbor except the one it came from, each through its own
    forward task. A forward task keeps sending until the neighbor answers
    with broadcast_ok, waiting a fixed interval between attempts. There is
    no retry limit: redelivery is a no-op at the receiver, so retrying can
    only cost traffic. Cycles in the topology are cut by the seen check at
    every hop, not by the sender exclusion.
*/

pub struct Disseminator<T: Transport> {
    transport: Arc<T>,
    seen: SeenStore,
    peers: Peers,
    config: GossipConfig,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

/// One value on its way to one neighbor.
#[derive(Clone, Debug)]
pub struct PendingForward {
    target: NodeId,
    value: i64,
    acknowledged: bool,
    attempts: u32,
}

impl<T: Transport> Disseminator<T> {
    pub fn new(transport: Arc<T>, config: GossipConfig, cancel: CancellationToken) -> Self {
        Disseminator {
            transport,
            seen: SeenStore::new(),
            peers: Peers::new(),
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    pub async fn handle_broadcast(&self, value: i64, sender: &str, origin: Origin) -> Acknowledge {
        let ack = match origin {
            Origin::Client | Origin::Forwarded { ack: true } => Acknowledge::Reply,
            Origin::Forwarded { ack: false } => Acknowledge::Silent,
        };

        if self.seen.has_seen(value).await {
            debug!(value, sender, "duplicate broadcast");
            return ack;
        }
        // Lost the race to a concurrent delivery of the same value.
        if !self.seen.mark_seen(value).await {
            return ack;
        }

        let targets = self.peers.neighbors_except(sender).await;
        debug!(value, sender, ?origin, fanout = targets.len(), "accepted new value");
        for target in targets {
            self.spawn_forward(PendingForward::new(target, value));
        }
        ack
    }

    pub async fn handle_read(&self) -> Vec<i64> {
        self.seen.snapshot().await
    }

    pub async fn handle_topology(&self, topology: &HashMap<NodeId, Vec<NodeId>>) -> Result<(), Error> {
        let node_id = self.transport.node_id()?;
        self.peers.assign(&node_id, topology).await;
        Ok(())
    }

    /// Forward tasks that have not been acknowledged yet.
    #[cfg(test)]
    pub fn pending_forwards(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn spawn_forward(&self, pending: PendingForward) {
        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let in_flight = InFlight::enter(&self.in_flight);

        tokio::spawn(async move {
            let _in_flight = in_flight;
            pending.deliver(transport.as_ref(), &config, &cancel).await;
        });
    }
}

impl PendingForward {
    pub fn new(target: NodeId, value: i64) -> Self {
        PendingForward {
            target,
            value,
            acknowledged: false,
            attempts: 0,
        }
    }

    /// Sends until acknowledged or until `cancel` fires.
    async fn deliver<T: Transport>(mut self, transport: &T, config: &GossipConfig, cancel: &CancellationToken) {
        let body = match BroadcastRequest::forward(self.value) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, value = self.value, "cannot encode forward");
                return;
            }
        };

        while !self.acknowledged {
            self.attempts += 1;
            let attempt = timeout(config.rpc_timeout, transport.rpc(&self.target, body.clone()));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = attempt => outcome,
            };

            match outcome {
                Ok(Ok(reply)) if reply.body.kind == "broadcast_ok" => self.acknowledged = true,
                Ok(Ok(reply)) => {
                    warn!(peer = %self.target, kind = %reply.body.kind, "unexpected reply to forward")
                }
                Ok(Err(e)) => debug!(peer = %self.target, value = self.value, error = %e, "forward failed"),
                Err(_) => debug!(peer = %self.target, value = self.value, "forward timed out"),
            }

            if !self.acknowledged {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(config.retry_interval) => {}
                }
            }
        }

        if self.acknowledged {
            debug!(peer = %self.target, value = self.value, attempts = self.attempts, "forward acknowledged");
        } else {
            debug!(peer = %self.target, value = self.value, attempts = self.attempts, "forward abandoned at shutdown");
        }
    }
}

/// Counts a forward task for as long as it lives.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

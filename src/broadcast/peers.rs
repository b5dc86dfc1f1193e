use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::network::NodeId;

/// This node's neighbor list, fixed by the first topology assignment.
pub struct Peers {
    members: RwLock<Option<Vec<NodeId>>>,
}

impl Peers {
    pub fn new() -> Self {
        Peers {
            members: RwLock::new(None),
        }
    }

    /// Stores `topology[node_id]`. A node missing from the map gets no
    /// neighbors. Later assignments with the same list are no-ops; a
    /// different list is ignored.
    pub async fn assign(&self, node_id: &str, topology: &HashMap<NodeId, Vec<NodeId>>) {
        let neighbors = match topology.get(node_id) {
            Some(neighbors) => neighbors.clone(),
            None => {
                warn!(node_id, "topology has no entry for this node");
                Vec::new()
            }
        };

        let mut members = self.members.write().await;
        if let Some(current) = members.as_ref() {
            if *current != neighbors {
                warn!(?current, ?neighbors, "ignoring topology reassignment");
            }
            return;
        }
        info!(?neighbors, "topology assigned");
        *members = Some(neighbors);
    }

    /// Neighbors to forward to, excluding `sender`.
    pub async fn neighbors_except(&self, sender: &str) -> Vec<NodeId> {
        self.members
            .read()
            .await
            .iter()
            .flatten()
            .filter(|peer| peer.as_str() != sender)
            .cloned()
            .collect()
    }
}

impl Default for Peers {
    fn default() -> Self {
        Self::new()
    }
}

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Which protocol this node is serving. Both share `read`, which answers
/// with the seen messages for broadcast and the counter value for counter.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum Workload {
    #[default]
    Broadcast,
    Counter,
}

#[derive(Parser, Debug)]
#[command(name = "simple-gossip")]
#[command(version, about = "Gossip broadcast and grow-only counter node", long_about = None)]
pub struct Args {
    #[arg(long, value_enum, env = "GOSSIP_WORKLOAD", default_value_t = Workload::Broadcast)]
    pub workload: Workload,

    /// Delay between attempts to forward a value to a neighbor.
    #[arg(long, env = "GOSSIP_RETRY_INTERVAL_MS", default_value_t = 500)]
    pub retry_interval_ms: u64,

    /// How long a single forward waits for its acknowledgement.
    #[arg(long, env = "GOSSIP_RPC_TIMEOUT_MS", default_value_t = 1000)]
    pub rpc_timeout_ms: u64,

    #[arg(long, env = "GOSSIP_KV_SERVICE", default_value = "seq-kv")]
    pub kv_service: String,

    #[arg(long, env = "GOSSIP_KV_TIMEOUT_MS", default_value_t = 1000)]
    pub kv_timeout_ms: u64,

    /// Backoff between failed key-value reads and compare-and-swaps.
    #[arg(long, env = "GOSSIP_KV_RETRY_MS", default_value_t = 10)]
    pub kv_retry_ms: u64,

    #[arg(long, env = "GOSSIP_COUNTER_KEY", default_value = "count")]
    pub counter_key: String,
}

#[derive(Clone, Debug)]
pub struct GossipConfig {
    pub retry_interval: Duration,
    pub rpc_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(500),
            rpc_timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct KvConfig {
    /// Node id of the key-value service.
    pub service: String,
    pub timeout: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            service: "seq-kv".to_string(),
            timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CounterConfig {
    pub key: String,
    pub retry_delay: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            key: "count".to_string(),
            retry_delay: Duration::from_millis(10),
        }
    }
}

/// Everything a node needs, resolved from the command line.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    pub workload: Workload,
    pub gossip: GossipConfig,
    pub kv: KvConfig,
    pub counter: CounterConfig,
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        NodeConfig {
            workload: args.workload,
            gossip: GossipConfig {
                retry_interval: Duration::from_millis(args.retry_interval_ms),
                rpc_timeout: Duration::from_millis(args.rpc_timeout_ms),
            },
            kv: KvConfig {
                service: args.kv_service,
                timeout: Duration::from_millis(args.kv_timeout_ms),
            },
            counter: CounterConfig {
                key: args.counter_key,
                retry_delay: Duration::from_millis(args.kv_retry_ms),
            },
        }
    }
}

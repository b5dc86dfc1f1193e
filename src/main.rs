/*
    A node for a cluster that talks JSON over stdin/stdout. It serves two
    workloads on top of an unreliable network.

    Broadcast: a value handed to any node must reach every node. Each node
    remembers the values it has seen and forwards a new one to its
    neighbors, retrying each neighbor until it acknowledges. A value is
    accepted and forwarded at most once per node, so redelivery and cycles
    in the topology are harmless.

    Counter: many nodes add to one total held in a shared, sequentially
    consistent key-value service. Each add reads the total and swaps in the
    new one only if nobody changed it in between, retrying otherwise, so no
    add is lost or applied twice.
*/

mod broadcast;
mod common;
mod config;
mod counter;
mod dispatcher;
mod kv;
mod network;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Args, NodeConfig};
use crate::dispatcher::Dispatcher;
use crate::kv::SeqKv;
use crate::network::{stdio, Node};

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from(Args::parse());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol, so logs go to stderr.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(workload = ?config.workload, "starting node");

    let cancel = CancellationToken::new();
    let (node, outbound) = Node::new();
    let kv = Arc::new(SeqKv::new(Arc::clone(&node), config.kv.clone()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&node), kv, &config, cancel.clone()));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                cancel.cancel();
            }
        });
    }

    stdio::serve(node, outbound, dispatcher, cancel)
        .await
        .context("node runtime failed")?;
    info!("node stopped");
    Ok(())
}

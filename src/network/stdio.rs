use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Handler, Message, Node};
use crate::common::Error;

/// Serves `node` over stdin/stdout, one JSON message per line, until stdin
/// closes or `cancel` fires. Cancels `cancel` on the way out so background
/// work tied to it stops too.
pub async fn serve<H: Handler>(
    node: Arc<Node>,
    outbound: UnboundedReceiver<Message>,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let writer = tokio::spawn(write_loop(outbound, cancel.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let result = loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<Message>(&line) {
                Ok(message) => {
                    debug!(src = %message.src, kind = %message.body.kind, "received");
                    node.dispatch(message, &handler);
                }
                Err(e) => warn!(error = %e, "dropping undecodable line"),
            },
            Ok(None) => {
                info!("stdin closed, shutting down");
                break Ok(());
            }
            Err(e) => break Err(Error::Io(e)),
        }
    };

    cancel.cancel();
    match writer.await {
        Ok(written) => written.and(result),
        Err(e) => {
            warn!(error = %e, "stdout writer task failed");
            result
        }
    }
}

async fn write_loop(
    mut outbound: UnboundedReceiver<Message>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut stdout = tokio::io::stdout();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }

    // Flush whatever was queued before shutdown, e.g. the last replies.
    while let Ok(message) = outbound.try_recv() {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;
    Ok(())
}

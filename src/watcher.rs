//! Connection watcher announce
//!
//! Tells a local connection watcher which node came up. Fire-and-forget: the
//! task is detached, bounded by a timeout, and any failure is only logged.

use crate::bootstrap::NodeIdentity;

use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct Announce<'a> {
    node: &'a str,
    instance_id: String,
    shard_count: u32,
    version: &'static str,
}

/// Spawn the announce to `127.0.0.1:port`. Port 0 disables it.
pub fn spawn_announce(port: u16, node: &NodeIdentity, shard_count: u32) -> Option<JoinHandle<()>> {
    if port == 0 {
        return None;
    }

    let line = match announce_line(node, shard_count) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "Failed to encode connection watcher announce");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        let result = tokio::time::timeout(ANNOUNCE_TIMEOUT, async {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(port, "Announced node to connection watcher"),
            Ok(Err(e)) => error!(port, error = %e, "Error connecting to connection watcher"),
            Err(_) => error!(port, "Connection watcher announce timed out"),
        }
    }))
}

fn announce_line(node: &NodeIdentity, shard_count: u32) -> Result<String, serde_json::Error> {
    let label = node.label();
    let mut line = serde_json::to_string(&Announce {
        node: &label,
        instance_id: node.instance_id.to_string(),
        shard_count,
        version: env!("CARGO_PKG_VERSION"),
    })?;
    line.push('\n');
    Ok(line)
}

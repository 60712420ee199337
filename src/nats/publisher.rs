//! NATS message bus client
//!
//! Connects with `async-nats` when a server URL is configured. Without one the
//! process runs in local mode and bus messages are dropped.

use crate::error::GatewayError;
use crate::nats::{BusConnector, MessageBus};

use async_nats::Client;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subject prefixes
pub mod subjects {
    /// Periodic node stats: stats.node.{node}
    pub const NODE_STATS: &str = "stats.node";
    /// Lifecycle announcements: lifecycle.{event}
    pub const LIFECYCLE: &str = "lifecycle";
}

/// Connects to NATS, or falls back to local mode
pub struct NatsConnector {
    servers: Option<String>,
    client_name: String,
}

impl NatsConnector {
    pub fn new(servers: Option<String>, client_name: impl Into<String>) -> Self {
        Self {
            servers,
            client_name: client_name.into(),
        }
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    async fn connect(&self) -> Result<Arc<dyn MessageBus>, GatewayError> {
        match self.servers.as_deref() {
            Some(servers) => {
                let bus: Arc<dyn MessageBus> = NatsBus::connect(servers, &self.client_name).await?;
                Ok(bus)
            }
            None => {
                info!("No NATS URL configured - running in local mode");
                let bus: Arc<dyn MessageBus> = Arc::new(LocalBus);
                Ok(bus)
            }
        }
    }
}

/// NATS publisher
pub struct NatsBus {
    client: Client,
    connected: AtomicBool,
}

impl NatsBus {
    /// Connect to NATS server(s), comma-separated
    pub async fn connect(servers: &str, client_name: &str) -> Result<Arc<Self>, GatewayError> {
        info!(servers, client_name, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name(client_name)
            .connect(servers)
            .await
            .map_err(|e| GatewayError::NatsConnectionFailed(Box::new(e)))?;

        info!("Connected to NATS");

        Ok(Arc::new(Self {
            client,
            connected: AtomicBool::new(true),
        }))
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        debug!(subject, bytes = payload.len(), "Publishing message");

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| {
                warn!(subject, error = %e, "Failed to publish message");
                GatewayError::NatsPublishFailed {
                    subject: subject.to_string(),
                    source: Box::new(e),
                }
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && matches!(
                self.client.connection_state(),
                async_nats::connection::State::Connected
            )
    }

    async fn close(&self) {
        info!("Closing NATS connection");
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection");
        }
    }
}

/// Local mode: no broker, messages are dropped
#[derive(Debug, Default)]
pub struct LocalBus;

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        debug!(subject, bytes = payload.len(), "Local mode: dropping message");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// Subject for a node's stats
pub fn node_stats_subject(node_label: &str) -> String {
    format!("{}.{}", subjects::NODE_STATS, node_label.replace('.', "_"))
}

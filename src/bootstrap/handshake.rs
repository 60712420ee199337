//! Remote control-plane handshake
//!
//! Registers this process with the coordination service and obtains a node
//! identifier. Runs before any shard connects, so a rejected node never leaves
//! gateway sessions behind.

use crate::error::GatewayError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// What this process tells the control plane about itself
#[derive(Debug, Clone, Serialize)]
pub struct NodeRegistration {
    pub instance_id: Uuid,
    pub version: &'static str,
    pub profile: &'static str,
    /// Configured shard count, 0 when it will be negotiated with Discord
    pub shard_count: u32,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    node_id: String,
}

/// Control-plane registration
#[async_trait]
pub trait RemoteHandshake: Send + Sync {
    /// Human-readable endpoint for diagnostics
    fn endpoint(&self) -> &str;

    /// Register and return the assigned node identifier
    async fn register(&self, registration: &NodeRegistration) -> Result<String, GatewayError>;
}

/// Handshake over HTTP: `POST {base_url}/v1/nodes` with a JSON registration
pub struct HttpHandshake {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpHandshake {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("arrakis-shards/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::HandshakeFailed {
                endpoint: base_url.to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/nodes", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RemoteHandshake for HttpHandshake {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn register(&self, registration: &NodeRegistration) -> Result<String, GatewayError> {
        let failed = |e: reqwest::Error| GatewayError::HandshakeFailed {
            endpoint: self.endpoint.clone(),
            source: Box::new(e),
        };

        debug!(endpoint = %self.endpoint, instance_id = %registration.instance_id, "Sending node registration");

        let response: RegisterResponse = self
            .client
            .post(&self.endpoint)
            .json(registration)
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?
            .json()
            .await
            .map_err(failed)?;

        validate_node_id(&self.endpoint, response.node_id)
    }
}

fn validate_node_id(endpoint: &str, node_id: String) -> Result<String, GatewayError> {
    if node_id.trim().is_empty() {
        return Err(GatewayError::HandshakeFailed {
            endpoint: endpoint.to_string(),
            source: "control plane returned an empty node id".into(),
        });
    }
    Ok(node_id)
}

/// Run the handshake, bounded by `timeout`
pub async fn perform(
    handshake: &dyn RemoteHandshake,
    registration: &NodeRegistration,
    timeout: Duration,
) -> Result<String, GatewayError> {
    info!(endpoint = handshake.endpoint(), timeout_ms = timeout.as_millis() as u64, "Performing remote handshake");

    match tokio::time::timeout(timeout, handshake.register(registration)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::HandshakeTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

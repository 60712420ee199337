//! Message bus integration
//!
//! Downstream subsystems publish through [`MessageBus`]; the bootstrap only
//! needs a [`BusConnector`] that either yields a bus or a reportable error.

mod publisher;

pub use publisher::{node_stats_subject, subjects, LocalBus, NatsBus, NatsConnector};

use crate::error::GatewayError;
use async_trait::async_trait;
use std::sync::Arc;

/// Publish side of the message broker
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    /// Graceful shutdown
    async fn close(&self);
}

/// Builds the message bus during startup
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn MessageBus>, GatewayError>;
}

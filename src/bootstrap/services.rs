//! Startup seams for subsystems built on top of the shard core
//!
//! Dependent services (audio, moderation timers, ...) start after the shard
//! registry is live and before POSTLOAD. Outward listeners start after POSTLOAD
//! and only in full deployments.

use crate::context::GatewayContext;
use crate::error::GatewayError;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// A subsystem that holds references into the shard registry
#[async_trait]
pub trait DependentService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once, in registration order, while the load state is LOADING.
    ///
    /// Services may keep clones of the context but must not perform guild or
    /// user lookups until POSTLOAD.
    async fn start(&self, ctx: &GatewayContext) -> Result<(), GatewayError>;
}

/// A network-facing service started once the process is ready
#[async_trait]
pub trait OutwardListener: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bind and spawn the listener. The handle finishes when it stops serving.
    async fn start(&self, ctx: &GatewayContext) -> Result<JoinHandle<()>, GatewayError>;
}

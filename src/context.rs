//! Gateway context
//!
//! The one per-process bundle of shared resources, built by the bootstrap and
//! handed to every subsystem explicitly. Cloning is cheap.

use crate::bootstrap::NodeIdentity;
use crate::config::GatewayConfig;
use crate::load_state::{LoadState, LoadStateCell};
use crate::metrics::GatewayMetrics;
use crate::nats::MessageBus;
use crate::router::ShardRouter;
use crate::shard::ShardRegistry;
use crate::tasks::TaskPool;

use std::sync::Arc;

#[derive(Clone)]
pub struct GatewayContext {
    pub config: Arc<GatewayConfig>,
    pub node: NodeIdentity,
    pub load_state: LoadStateCell,
    pub router: Arc<ShardRouter>,
    pub tasks: TaskPool,
    pub bus: Arc<dyn MessageBus>,
    pub metrics: Arc<GatewayMetrics>,
}

impl GatewayContext {
    pub fn registry(&self) -> &Arc<ShardRegistry> {
        self.router.registry()
    }

    /// True once platform lookups are valid
    pub fn is_ready(&self) -> bool {
        self.load_state.get() == LoadState::PostLoad
    }
}

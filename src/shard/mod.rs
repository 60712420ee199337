//! Shard management module
//!
//! Gateway sessions, their visibility caches, and the fixed-size registry
//! that owns them.

mod cache;
mod registry;
mod session;
mod twilight;

pub use cache::{ShardCache, ShardHealth};
pub use registry::{ShardHandle, ShardRegistry};
pub use session::{GatewayConnector, GatewaySession};
pub use twilight::{TwilightConnector, TwilightSession};

//! Arrakis shard core
//!
//! Owns the Discord shards of one process, routes guild and user lookups to
//! the shard that holds them, and drives the gated startup sequence that makes
//! those lookups valid.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod load_state;
pub mod metrics;
pub mod model;
pub mod nats;
pub mod router;
pub mod shard;
pub mod tasks;
pub mod updaters;
pub mod watcher;

pub use error::GatewayError;
pub use load_state::{LoadState, LoadStateCell};
pub use router::ShardRouter;

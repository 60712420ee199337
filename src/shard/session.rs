//! Gateway capability interfaces
//!
//! The core never speaks the Discord wire protocol. It only needs a way to
//! open one session per shard and to read what that session can see.

use crate::error::GatewayError;
use crate::model::{Guild, User};
use crate::shard::ShardHealth;

use async_trait::async_trait;
use std::sync::Arc;

/// Read access to one live gateway connection
pub trait GatewaySession: Send + Sync {
    /// Index of this shard in `[0, shard_total)`
    fn shard_id(&self) -> u32;

    /// Total shard count the session identified with
    fn shard_total(&self) -> u32;

    fn health(&self) -> ShardHealth;

    /// Guilds currently visible on this connection
    fn guild_ids(&self) -> Vec<u64>;

    /// Users currently visible on this connection
    fn user_ids(&self) -> Vec<u64>;

    fn guild(&self, guild_id: u64) -> Option<Guild>;

    fn user(&self, user_id: u64) -> Option<User>;

    /// Queue a presence update on this connection
    fn set_presence(&self, text: &str) -> Result<(), GatewayError>;
}

/// Opens gateway sessions
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open the session for `shard_index` out of `shard_count`.
    ///
    /// Resolves once the shard is ready, or fails if it dies first.
    async fn connect(
        &self,
        shard_index: u32,
        shard_count: u32,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError>;

    /// Shard count the platform recommends for this application
    async fn recommended_shards(&self) -> Result<u32, GatewayError>;

    /// Close every session this connector opened
    fn shutdown(&self);
}

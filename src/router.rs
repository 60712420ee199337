//! Shard router
//!
//! Maps guild IDs to their owning shard and gives a single, duplicate-free view
//! over every shard in the registry.
//!
//! Ownership follows Discord's sharding formula: `(guild_id >> 22) % shard_count`.
//! The shift drops the worker/process/increment bits of the snowflake so the
//! partition is driven by the creation timestamp. The formula is only correct
//! when `shard_count` matches the count the shards identified with, which is
//! why [`ShardRouter::new`] cross-checks the registry.

use crate::error::GatewayError;
use crate::load_state::{LoadState, LoadStateCell};
use crate::model::{Guild, User};
use crate::shard::{ShardHandle, ShardRegistry};

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Bits below the snowflake timestamp
const SNOWFLAKE_TIMESTAMP_SHIFT: u32 = 22;

/// Owning shard index for `guild_id`.
///
/// Pure and total for any `shard_count > 0`.
pub fn shard_index_for(guild_id: u64, shard_count: u32) -> Result<u32, GatewayError> {
    if shard_count == 0 {
        return Err(GatewayError::NoShards);
    }
    // Result is < shard_count, so it always fits in u32
    Ok(((guild_id >> SNOWFLAKE_TIMESTAMP_SHIFT) % u64::from(shard_count)) as u32)
}

/// Aggregate counts across all shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub shards_total: u32,
    pub shards_ready: usize,
    pub shards_healthy: usize,
    pub guilds: usize,
    /// Distinct users, however many shards see them
    pub users: usize,
}

/// Routes lookups to shards
pub struct ShardRouter {
    registry: Arc<ShardRegistry>,
    load_state: LoadStateCell,
}

impl ShardRouter {
    pub fn new(registry: Arc<ShardRegistry>, load_state: LoadStateCell) -> Result<Self, GatewayError> {
        check_registry_shape(registry.len(), registry.shard_count())?;
        Ok(Self {
            registry,
            load_state,
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.registry.shard_count()
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state.get()
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    pub fn shard_index_for(&self, guild_id: u64) -> Result<u32, GatewayError> {
        shard_index_for(guild_id, self.shard_count())
    }

    /// Shard that owns `guild_id`
    pub fn shard_for(&self, guild_id: u64) -> Result<&ShardHandle, GatewayError> {
        let index = self.shard_index_for(guild_id)?;
        self.registry
            .get(index)
            .ok_or(GatewayError::ShardOutOfBounds {
                index,
                shard_count: self.shard_count(),
            })
    }

    /// Shard by index
    pub fn shard(&self, index: u32) -> Option<&ShardHandle> {
        self.registry.get(index)
    }

    /// All shards in index order. Each call starts a fresh pass.
    pub fn shards(&self) -> std::slice::Iter<'_, ShardHandle> {
        self.registry.iter()
    }

    /// Guild as seen by its owning shard only.
    ///
    /// `Ok(None)` when that shard does not see the guild.
    pub fn guild_by_id(&self, guild_id: u64) -> Result<Option<Guild>, GatewayError> {
        self.load_state.require(LoadState::PostLoad)?;
        Ok(self.shard_for(guild_id)?.guild(guild_id))
    }

    /// First shard, in index order, that sees `user_id`
    pub fn user_by_id(&self, user_id: u64) -> Result<Option<User>, GatewayError> {
        self.load_state.require(LoadState::PostLoad)?;
        Ok(self.registry.iter().find_map(|shard| shard.user(user_id)))
    }

    /// Distinct user IDs across every shard
    pub fn user_ids(&self) -> Result<BTreeSet<u64>, GatewayError> {
        self.load_state.require(LoadState::PostLoad)?;
        Ok(self
            .registry
            .iter()
            .flat_map(|shard| shard.user_ids())
            .collect())
    }

    /// Guild IDs across every shard
    pub fn guild_ids(&self) -> Result<BTreeSet<u64>, GatewayError> {
        self.load_state.require(LoadState::PostLoad)?;
        Ok(self
            .registry
            .iter()
            .flat_map(|shard| shard.guild_ids())
            .collect())
    }

    pub fn stats(&self) -> RouterStats {
        let users: BTreeSet<u64> = self.registry.iter().flat_map(|s| s.user_ids()).collect();
        RouterStats {
            shards_total: self.shard_count(),
            shards_ready: self.registry.ready_shards(),
            shards_healthy: self.registry.healthy_shards(),
            guilds: self.registry.iter().map(|s| s.guild_ids().len()).sum(),
            users: users.len(),
        }
    }
}

/// One handle per index in `[0, shard_count)`; reports the first index that breaks it
fn check_registry_shape(len: usize, shard_count: u32) -> Result<(), GatewayError> {
    if shard_count == 0 {
        return Err(GatewayError::NoShards);
    }
    if len != shard_count as usize {
        return Err(GatewayError::ShardOutOfBounds {
            index: len.min(shard_count as usize) as u32,
            shard_count,
        });
    }
    Ok(())
}

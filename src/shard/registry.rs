//! Shard registry
//!
//! Ordered, fixed-size collection of shard handles, populated once at startup.

use crate::error::GatewayError;
use crate::model::{Guild, User};
use crate::shard::session::{GatewayConnector, GatewaySession};
use crate::shard::ShardHealth;

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// One shard: its index and its live gateway session
#[derive(Clone)]
pub struct ShardHandle {
    index: u32,
    session: Arc<dyn GatewaySession>,
}

impl ShardHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn health(&self) -> ShardHealth {
        self.session.health()
    }

    pub fn guild_ids(&self) -> Vec<u64> {
        self.session.guild_ids()
    }

    pub fn user_ids(&self) -> Vec<u64> {
        self.session.user_ids()
    }

    pub fn guild(&self, guild_id: u64) -> Option<Guild> {
        self.session.guild(guild_id)
    }

    pub fn user(&self, user_id: u64) -> Option<User> {
        self.session.user(user_id)
    }

    pub fn set_presence(&self, text: &str) -> Result<(), GatewayError> {
        self.session.set_presence(text)
    }
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle")
            .field("index", &self.index)
            .field("health", &self.health())
            .finish()
    }
}

impl std::fmt::Debug for ShardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRegistry")
            .field("shard_count", &self.shard_count)
            .field("shards", &self.shards)
            .finish()
    }
}

/// Exactly `shard_count` shards, in index order
pub struct ShardRegistry {
    shards: Vec<ShardHandle>,
    shard_count: u32,
    connector: Arc<dyn GatewayConnector>,
}

impl ShardRegistry {
    /// Open every shard and wait until all of them are ready
    ///
    /// Shards connect concurrently. Any failure shuts the connector down so no
    /// half-started sessions are left behind.
    pub async fn start(
        connector: Arc<dyn GatewayConnector>,
        shard_count: u32,
    ) -> Result<Self, GatewayError> {
        if shard_count == 0 {
            return Err(GatewayError::NoShards);
        }

        info!(shard_count, "Starting shard registry");

        let mut pending = JoinSet::new();
        for index in 0..shard_count {
            let connector = Arc::clone(&connector);
            pending.spawn(async move { (index, connector.connect(index, shard_count).await) });
        }

        let mut slots: Vec<Option<Arc<dyn GatewaySession>>> = vec![None; shard_count as usize];

        while let Some(joined) = pending.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(session))) => validate_session(index, shard_count, session.as_ref())
                    .map(|()| (index, session)),
                Ok((_, Err(e))) => Err(e),
                Err(join_error) => Err(GatewayError::ShardConnectFailed {
                    shard_id: u32::MAX,
                    reason: join_error.to_string(),
                }),
            };

            match outcome {
                Ok((index, session)) => {
                    info!(shard_id = index, "Shard registered");
                    slots[index as usize] = Some(session);
                }
                Err(e) => {
                    error!(error = %e, "Shard registry startup failed");
                    // Shut down first so a connect that is still starting is refused
                    connector.shutdown();
                    pending.abort_all();
                    return Err(e);
                }
            }
        }

        let shards = slots
            .into_iter()
            .enumerate()
            .map(|(index, session)| {
                session
                    .map(|session| ShardHandle {
                        index: index as u32,
                        session,
                    })
                    .ok_or(GatewayError::ShardConnectFailed {
                        shard_id: index as u32,
                        reason: "no session registered".to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            shards,
            shard_count,
            connector,
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn get(&self, index: u32) -> Option<&ShardHandle> {
        self.shards.get(index as usize)
    }

    /// Shards in index order
    pub fn iter(&self) -> std::slice::Iter<'_, ShardHandle> {
        self.shards.iter()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn ready_shards(&self) -> usize {
        self.shards.iter().filter(|s| s.health().is_ready()).count()
    }

    pub fn healthy_shards(&self) -> usize {
        self.shards.iter().filter(|s| s.health().is_healthy()).count()
    }

    /// Close every gateway session
    pub fn shutdown(&self) {
        info!(shard_count = self.shard_count, "Shutting down shard registry");
        self.connector.shutdown();
    }
}

fn validate_session(
    index: u32,
    shard_count: u32,
    session: &dyn GatewaySession,
) -> Result<(), GatewayError> {
    if session.shard_total() != shard_count {
        return Err(GatewayError::ShardCountMismatch {
            shard_id: index,
            expected: shard_count,
            actual: session.shard_total(),
        });
    }
    if session.shard_id() != index {
        return Err(GatewayError::ShardConnectFailed {
            shard_id: index,
            reason: format!("session reports shard id {}", session.shard_id()),
        });
    }
    Ok(())
}

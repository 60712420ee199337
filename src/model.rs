//! Snapshot views of platform entities
//!
//! The core never owns guilds or users; these are copies taken from a shard's
//! cache at lookup time.

use serde::Serialize;

/// A guild (tenant) as seen by one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guild {
    pub id: u64,
    pub name: String,
    pub member_count: Option<u64>,
    /// Discord reported an outage for this guild
    pub unavailable: bool,
}

impl Guild {
    /// Placeholder for a guild announced in Ready before its GuildCreate arrives
    pub fn unavailable(id: u64) -> Self {
        Self {
            id,
            name: String::new(),
            member_count: None,
            unavailable: true,
        }
    }
}

/// A user visible through at least one guild on a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub bot: bool,
}

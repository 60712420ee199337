//! Per-shard visibility cache
//!
//! Tracks health plus the guilds and users one gateway connection can see.
//! Writers are the shard's event loop; readers are the router. Both go through
//! `DashMap`, so a lookup never waits on a global lock.

use crate::model::{Guild, User};

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use twilight_model::gateway::event::Event;
use twilight_model::gateway::payload::incoming::GuildCreate;
use twilight_model::guild::Member;

/// Health status for a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardHealth {
    /// Shard is connecting
    Connecting,
    /// Shard is ready and receiving events
    Ready,
    /// Shard is resuming after disconnect
    Resuming,
    /// Shard is disconnected
    Disconnected,
    /// Shard encountered a fatal error
    Dead,
}

impl ShardHealth {
    /// Returns true if the shard is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, ShardHealth::Ready | ShardHealth::Resuming)
    }

    /// Returns true if the shard is ready to receive events
    pub fn is_ready(&self) -> bool {
        matches!(self, ShardHealth::Ready)
    }

    fn as_u8(self) -> u8 {
        match self {
            ShardHealth::Connecting => 0,
            ShardHealth::Ready => 1,
            ShardHealth::Resuming => 2,
            ShardHealth::Disconnected => 3,
            ShardHealth::Dead => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShardHealth::Connecting,
            1 => ShardHealth::Ready,
            2 => ShardHealth::Resuming,
            3 => ShardHealth::Disconnected,
            _ => ShardHealth::Dead,
        }
    }
}

#[derive(Debug)]
struct UserEntry {
    user: User,
    /// Guilds on this shard through which the user is visible
    guilds: HashSet<u64>,
}

/// Guild and user visibility for a single shard
#[derive(Debug)]
pub struct ShardCache {
    health: AtomicU8,
    guilds: DashMap<u64, Guild>,
    users: DashMap<u64, UserEntry>,
}

impl Default for ShardCache {
    fn default() -> Self {
        Self {
            health: AtomicU8::new(ShardHealth::Connecting.as_u8()),
            guilds: DashMap::new(),
            users: DashMap::new(),
        }
    }
}

impl ShardCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> ShardHealth {
        ShardHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    pub fn set_health(&self, health: ShardHealth) {
        self.health.store(health.as_u8(), Ordering::Release);
    }

    pub fn guild(&self, guild_id: u64) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    pub fn user(&self, user_id: u64) -> Option<User> {
        self.users.get(&user_id).map(|e| e.user.clone())
    }

    pub fn guild_ids(&self) -> Vec<u64> {
        self.guilds.iter().map(|g| *g.key()).collect()
    }

    pub fn user_ids(&self) -> Vec<u64> {
        self.users.iter().map(|e| *e.key()).collect()
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Insert or replace a guild
    pub fn insert_guild(&self, guild: Guild) {
        self.guilds.insert(guild.id, guild);
    }

    /// Forget a guild and every membership that came through it
    pub fn remove_guild(&self, guild_id: u64) {
        self.guilds.remove(&guild_id);
        self.users.retain(|_, entry| {
            entry.guilds.remove(&guild_id);
            !entry.guilds.is_empty()
        });
    }

    /// Record that `user` is visible through `guild_id`
    pub fn upsert_member(&self, guild_id: u64, user: User) {
        self.users
            .entry(user.id)
            .and_modify(|entry| {
                entry.guilds.insert(guild_id);
                entry.user = user.clone();
            })
            .or_insert_with(|| UserEntry {
                user: user.clone(),
                guilds: HashSet::from([guild_id]),
            });
    }

    /// Drop one membership; the user leaves the cache with its last guild
    pub fn remove_member(&self, guild_id: u64, user_id: u64) {
        self.users.remove_if_mut(&user_id, |_, entry| {
            entry.guilds.remove(&guild_id);
            entry.guilds.is_empty()
        });
    }

    /// Apply a gateway event to the cache
    ///
    /// Only events that change guild or user visibility are handled.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::Ready(ready) => {
                let listed: HashSet<u64> = ready.guilds.iter().map(|g| g.id.get()).collect();
                // A fresh session replaces the guild list; drop what it no longer carries
                for id in self.guild_ids() {
                    if !listed.contains(&id) {
                        self.remove_guild(id);
                    }
                }
                for id in listed {
                    if !self.guilds.contains_key(&id) {
                        self.insert_guild(Guild::unavailable(id));
                    }
                }
            }
            Event::GuildCreate(create) => self.apply_guild_create(create),
            Event::GuildUpdate(update) => {
                let id = update.0.id.get();
                if let Some(mut guild) = self.guilds.get_mut(&id) {
                    guild.name = update.0.name.clone();
                    if update.0.member_count.is_some() {
                        guild.member_count = update.0.member_count;
                    }
                }
            }
            Event::GuildDelete(delete) => {
                let id = delete.id.get();
                // Outage: keep the guild, it will come back with a GuildCreate
                if delete.unavailable == Some(true) {
                    if let Some(mut guild) = self.guilds.get_mut(&id) {
                        guild.unavailable = true;
                    }
                } else {
                    self.remove_guild(id);
                }
            }
            Event::MemberAdd(add) => {
                self.upsert_member(add.guild_id.get(), user_from_member(&add.member));
            }
            Event::MemberChunk(chunk) => {
                let guild_id = chunk.guild_id.get();
                for member in &chunk.members {
                    self.upsert_member(guild_id, user_from_member(member));
                }
            }
            Event::MemberRemove(remove) => {
                self.remove_member(remove.guild_id.get(), remove.user.id.get());
            }
            _ => {}
        }
    }

    fn apply_guild_create(&self, create: &GuildCreate) {
        match create {
            GuildCreate::Available(guild) => {
                let id = guild.id.get();
                self.insert_guild(Guild {
                    id,
                    name: guild.name.clone(),
                    member_count: guild.member_count,
                    unavailable: false,
                });
                for member in &guild.members {
                    self.upsert_member(id, user_from_member(member));
                }
            }
            GuildCreate::Unavailable(guild) => {
                let id = guild.id.get();
                if !self.guilds.contains_key(&id) {
                    self.insert_guild(Guild::unavailable(id));
                }
            }
        }
    }
}

fn user_from_member(member: &Member) -> User {
    User {
        id: member.user.id.get(),
        name: member.user.name.clone(),
        bot: member.user.bot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64, name: &str) -> User {
        User {
            id,
            name: name.to_string(),
            bot: false,
        }
    }

    fn guild(id: u64, name: &str) -> Guild {
        Guild {
            id,
            name: name.to_string(),
            member_count: Some(2),
            unavailable: false,
        }
    }

    #[test]
    fn test_health_round_trips_through_atomic() {
        let cache = ShardCache::new();
        assert_eq!(cache.health(), ShardHealth::Connecting);
        for health in [
            ShardHealth::Ready,
            ShardHealth::Resuming,
            ShardHealth::Disconnected,
            ShardHealth::Dead,
        ] {
            cache.set_health(health);
            assert_eq!(cache.health(), health);
        }
    }

    #[test]
    fn test_health_predicates() {
        assert!(ShardHealth::Ready.is_ready());
        assert!(ShardHealth::Resuming.is_healthy());
        assert!(!ShardHealth::Resuming.is_ready());
        assert!(!ShardHealth::Dead.is_healthy());
    }

    #[test]
    fn test_user_shared_by_two_guilds_is_one_entry() {
        let cache = ShardCache::new();
        cache.insert_guild(guild(1, "one"));
        cache.insert_guild(guild(2, "two"));
        cache.upsert_member(1, user(10, "kaito"));
        cache.upsert_member(2, user(10, "kaito"));

        assert_eq!(cache.user_count(), 1);

        cache.remove_member(1, 10);
        assert!(cache.user(10).is_some(), "still visible through guild 2");

        cache.remove_member(2, 10);
        assert!(cache.user(10).is_none());
    }

    #[test]
    fn test_remove_guild_drops_its_only_members() {
        let cache = ShardCache::new();
        cache.insert_guild(guild(1, "one"));
        cache.insert_guild(guild(2, "two"));
        cache.upsert_member(1, user(10, "only-in-one"));
        cache.upsert_member(1, user(11, "in-both"));
        cache.upsert_member(2, user(11, "in-both"));

        cache.remove_guild(1);

        assert!(cache.guild(1).is_none());
        assert!(cache.user(10).is_none());
        assert!(cache.user(11).is_some());
    }

    #[test]
    fn test_member_upsert_refreshes_name() {
        let cache = ShardCache::new();
        cache.upsert_member(1, user(10, "old"));
        cache.upsert_member(1, user(10, "new"));
        assert_eq!(cache.user(10).map(|u| u.name), Some("new".to_string()));
    }

    mod events {
        use super::super::*;
        use twilight_model::gateway::payload::incoming::{
            GuildDelete, MemberAdd, MemberChunk, MemberRemove, Ready,
        };
        use twilight_model::guild::{
            AfkTimeout, DefaultMessageNotificationLevel, ExplicitContentFilter,
            Guild as TwilightGuild, MemberFlags, MfaLevel, NSFWLevel, PremiumTier,
            SystemChannelFlags, UnavailableGuild, VerificationLevel,
        };
        use twilight_model::id::Id;
        use twilight_model::oauth::{ApplicationFlags, PartialApplication};
        use twilight_model::user::{CurrentUser, User as TwilightUser};

        fn twilight_user(id: u64, name: &str) -> TwilightUser {
            TwilightUser {
                accent_color: None,
                avatar: None,
                avatar_decoration: None,
                avatar_decoration_data: None,
                banner: None,
                bot: false,
                discriminator: 1,
                email: None,
                flags: None,
                global_name: None,
                id: Id::new(id),
                locale: None,
                mfa_enabled: None,
                name: name.to_owned(),
                premium_type: None,
                primary_guild: None,
                public_flags: None,
                system: None,
                verified: None,
            }
        }

        fn member(id: u64, name: &str) -> Member {
            Member {
                avatar: None,
                avatar_decoration_data: None,
                banner: None,
                communication_disabled_until: None,
                deaf: false,
                flags: MemberFlags::empty(),
                joined_at: None,
                mute: false,
                nick: None,
                pending: false,
                premium_since: None,
                roles: Vec::new(),
                user: twilight_user(id, name),
            }
        }

        fn available_guild(id: u64, name: &str, members: Vec<Member>) -> Event {
            Event::GuildCreate(Box::new(GuildCreate::Available(TwilightGuild {
                afk_channel_id: None,
                afk_timeout: AfkTimeout::FIFTEEN_MINUTES,
                application_id: None,
                approximate_member_count: None,
                approximate_presence_count: None,
                banner: None,
                channels: Vec::new(),
                default_message_notifications: DefaultMessageNotificationLevel::Mentions,
                description: None,
                discovery_splash: None,
                emojis: Vec::new(),
                explicit_content_filter: ExplicitContentFilter::None,
                features: Vec::new(),
                guild_scheduled_events: Vec::new(),
                icon: None,
                id: Id::new(id),
                joined_at: None,
                large: false,
                max_members: None,
                max_presences: None,
                max_stage_video_channel_users: None,
                max_video_channel_users: None,
                member_count: Some(members.len() as u64),
                members,
                mfa_level: MfaLevel::None,
                name: name.to_owned(),
                nsfw_level: NSFWLevel::Default,
                owner_id: Id::new(1),
                owner: None,
                permissions: None,
                preferred_locale: "en-us".to_owned(),
                premium_progress_bar_enabled: false,
                premium_subscription_count: None,
                premium_tier: PremiumTier::None,
                presences: Vec::new(),
                public_updates_channel_id: None,
                roles: Vec::new(),
                rules_channel_id: None,
                safety_alerts_channel_id: None,
                splash: None,
                stage_instances: Vec::new(),
                stickers: Vec::new(),
                system_channel_flags: SystemChannelFlags::empty(),
                system_channel_id: None,
                threads: Vec::new(),
                unavailable: None,
                vanity_url_code: None,
                verification_level: VerificationLevel::None,
                voice_states: Vec::new(),
                widget_channel_id: None,
                widget_enabled: None,
            })))
        }

        fn unavailable(id: u64) -> UnavailableGuild {
            UnavailableGuild {
                id: Id::new(id),
                unavailable: true,
            }
        }

        fn ready(guild_ids: &[u64]) -> Event {
            Event::Ready(Ready {
                application: PartialApplication {
                    flags: ApplicationFlags::empty(),
                    id: Id::new(100),
                },
                guilds: guild_ids.iter().map(|id| unavailable(*id)).collect(),
                resume_gateway_url: "wss://gateway.discord.gg".to_owned(),
                session_id: "session".to_owned(),
                shard: None,
                user: CurrentUser {
                    accent_color: None,
                    avatar: None,
                    banner: None,
                    bot: true,
                    discriminator: 1,
                    email: None,
                    flags: None,
                    global_name: None,
                    id: Id::new(3),
                    locale: None,
                    mfa_enabled: false,
                    name: "arrakis".to_owned(),
                    premium_type: None,
                    public_flags: None,
                    verified: None,
                },
                version: 10,
            })
        }

        fn delete(id: u64, outage: bool) -> Event {
            Event::GuildDelete(GuildDelete {
                id: Id::new(id),
                unavailable: outage.then_some(true),
            })
        }

        #[test]
        fn test_ready_adds_placeholders() {
            let cache = ShardCache::new();
            cache.apply(&ready(&[1, 2]));

            assert_eq!(cache.guild_count(), 2);
            assert_eq!(cache.guild(1), Some(Guild::unavailable(1)));
        }

        #[test]
        fn test_new_ready_drops_guilds_it_no_longer_lists() {
            let cache = ShardCache::new();
            cache.apply(&available_guild(1, "one", vec![member(10, "kaito")]));
            cache.apply(&available_guild(2, "two", vec![member(11, "mika")]));

            cache.apply(&ready(&[2, 3]));

            assert!(cache.guild(1).is_none());
            assert!(cache.user(10).is_none());
            assert_eq!(cache.guild(2).map(|g| g.name), Some("two".to_string()));
            assert!(cache.user(11).is_some());
            assert_eq!(cache.guild(3), Some(Guild::unavailable(3)));
        }

        #[test]
        fn test_available_guild_create_fills_guild_and_members() {
            let cache = ShardCache::new();
            cache.apply(&ready(&[1]));
            cache.apply(&available_guild(1, "dunes", vec![member(10, "kaito"), member(11, "mika")]));

            let guild = cache.guild(1).unwrap();
            assert_eq!(guild.name, "dunes");
            assert_eq!(guild.member_count, Some(2));
            assert!(!guild.unavailable);
            assert_eq!(cache.user(11).map(|u| u.name), Some("mika".to_string()));
        }

        #[test]
        fn test_unavailable_guild_create_keeps_known_guild() {
            let cache = ShardCache::new();
            cache.apply(&Event::GuildCreate(Box::new(GuildCreate::Unavailable(unavailable(5)))));
            assert_eq!(cache.guild(5), Some(Guild::unavailable(5)));

            cache.apply(&available_guild(6, "known", Vec::new()));
            cache.apply(&Event::GuildCreate(Box::new(GuildCreate::Unavailable(unavailable(6)))));
            assert_eq!(cache.guild(6).map(|g| g.name), Some("known".to_string()));
        }

        #[test]
        fn test_outage_keeps_guild_but_leave_removes_members() {
            let cache = ShardCache::new();
            cache.apply(&available_guild(1, "one", vec![member(10, "kaito")]));
            cache.apply(&available_guild(2, "two", vec![member(11, "mika")]));

            cache.apply(&delete(1, true));
            let kept = cache.guild(1).unwrap();
            assert!(kept.unavailable);
            assert!(cache.user(10).is_some());

            cache.apply(&delete(2, false));
            assert!(cache.guild(2).is_none());
            assert!(cache.user(11).is_none());
        }

        #[test]
        fn test_member_events_track_visibility() {
            let cache = ShardCache::new();
            cache.apply(&available_guild(1, "one", Vec::new()));

            cache.apply(&Event::MemberAdd(Box::new(MemberAdd {
                guild_id: Id::new(1),
                member: member(10, "kaito"),
            })));
            assert!(cache.user(10).is_some());

            cache.apply(&Event::MemberChunk(MemberChunk {
                chunk_count: 1,
                chunk_index: 0,
                guild_id: Id::new(1),
                members: vec![member(11, "mika"), member(12, "rei")],
                nonce: None,
                not_found: Vec::new(),
                presences: Vec::new(),
            }));
            assert_eq!(cache.user_count(), 3);

            cache.apply(&Event::MemberRemove(MemberRemove {
                guild_id: Id::new(1),
                user: twilight_user(10, "kaito"),
            }));
            assert!(cache.user(10).is_none());
            assert_eq!(cache.user_count(), 2);
        }
    }

    #[test]
    fn test_heartbeat_event_leaves_cache_untouched() {
        let cache = ShardCache::new();
        cache.apply(&Event::GatewayHeartbeatAck);
        assert_eq!(cache.guild_count(), 0);
        assert_eq!(cache.user_count(), 0);
    }
}

//! In-memory collaborators for integration tests
#![allow(dead_code)]

use arrakis_shards::bootstrap::{
    Collaborators, DependentService, NodeIdentity, NodeRegistration, OutwardListener,
    RemoteHandshake, StartupSignal,
};
use arrakis_shards::config::{DeploymentProfile, GatewayConfig};
use arrakis_shards::context::GatewayContext;
use arrakis_shards::error::GatewayError;
use arrakis_shards::model::{Guild, User};
use arrakis_shards::nats::{BusConnector, MessageBus};
use arrakis_shards::router::shard_index_for;
use arrakis_shards::shard::{GatewayConnector, GatewaySession, ShardCache, ShardHealth};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Shared, ordered record of what the collaborators saw
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Guild `n` routes to shard `n % shard_count`
pub fn guild_id(n: u64) -> u64 {
    n << 22
}

pub fn config(profile: DeploymentProfile, shard_count: u32) -> GatewayConfig {
    let mut config = GatewayConfig {
        discord_token: "test-token".to_string(),
        shard_count,
        profile,
        ..GatewayConfig::default()
    };
    config.handshake.url = Some("https://control.test".to_string());
    config
}

pub struct MockSession {
    index: u32,
    total: u32,
    pub cache: ShardCache,
    pub presences: Mutex<Vec<String>>,
}

impl GatewaySession for MockSession {
    fn shard_id(&self) -> u32 {
        self.index
    }

    fn shard_total(&self) -> u32 {
        self.total
    }

    fn health(&self) -> ShardHealth {
        self.cache.health()
    }

    fn guild_ids(&self) -> Vec<u64> {
        self.cache.guild_ids()
    }

    fn user_ids(&self) -> Vec<u64> {
        self.cache.user_ids()
    }

    fn guild(&self, guild_id: u64) -> Option<Guild> {
        self.cache.guild(guild_id)
    }

    fn user(&self, user_id: u64) -> Option<User> {
        self.cache.user(user_id)
    }

    fn set_presence(&self, text: &str) -> Result<(), GatewayError> {
        self.presences.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Opens in-memory sessions populated from a fixed guild membership table
#[derive(Default)]
pub struct MockConnector {
    /// (guild id, member user ids)
    pub guilds: Vec<(u64, Vec<u64>)>,
    pub recommended: u32,
    /// Total reported by every session instead of the requested one
    pub reported_total: Option<u32>,
    pub fail_index: Option<u32>,
    pub connects: Mutex<Vec<u32>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
    pub shutdowns: AtomicUsize,
}

impl MockConnector {
    pub fn with_guilds(guilds: Vec<(u64, Vec<u64>)>) -> Self {
        Self {
            guilds,
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: u32) -> Option<Arc<MockSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.index == index)
            .cloned()
    }
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(
        &self,
        shard_index: u32,
        shard_count: u32,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        self.connects.lock().unwrap().push(shard_index);

        if self.fail_index == Some(shard_index) {
            return Err(GatewayError::ShardConnectFailed {
                shard_id: shard_index,
                reason: "refused".to_string(),
            });
        }

        let cache = ShardCache::new();
        for (guild_id, members) in &self.guilds {
            if shard_index_for(*guild_id, shard_count)? != shard_index {
                continue;
            }
            cache.insert_guild(Guild {
                id: *guild_id,
                name: format!("guild-{guild_id}"),
                member_count: Some(members.len() as u64),
                unavailable: false,
            });
            for user_id in members {
                cache.upsert_member(
                    *guild_id,
                    User {
                        id: *user_id,
                        name: format!("user-{user_id}"),
                        bot: false,
                    },
                );
            }
        }
        cache.set_health(ShardHealth::Ready);

        let session = Arc::new(MockSession {
            index: shard_index,
            total: self.reported_total.unwrap_or(shard_count),
            cache,
            presences: Mutex::new(Vec::new()),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }

    async fn recommended_shards(&self) -> Result<u32, GatewayError> {
        Ok(self.recommended)
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockHandshake {
    pub fail: bool,
    /// Never answers, so only the caller's timeout ends the call
    pub hang: bool,
    pub calls: AtomicUsize,
}

impl MockHandshake {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::succeeding()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::succeeding()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteHandshake for MockHandshake {
    fn endpoint(&self) -> &str {
        "mock://control"
    }

    async fn register(&self, _: &NodeRegistration) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(GatewayError::HandshakeFailed {
                endpoint: self.endpoint().to_string(),
                source: "node rejected".into(),
            });
        }
        Ok("node-7".to_string())
    }
}

pub struct MockSignal {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl MockSignal {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StartupSignal for MockSignal {
    async fn notify(&self, _: &NodeIdentity) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GatewayError::SignalFailed("webhook down".into()));
        }
        Ok(())
    }
}

/// Bus that keeps every published message
#[derive(Default)]
pub struct RecordingBus {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub closed: AtomicBool,
}

impl RecordingBus {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subjects(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockBusConnector {
    pub bus: Arc<RecordingBus>,
    pub fail: bool,
}

impl MockBusConnector {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(RecordingBus::default()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl BusConnector for MockBusConnector {
    async fn connect(&self) -> Result<Arc<dyn MessageBus>, GatewayError> {
        if self.fail {
            return Err(GatewayError::NatsConnectionFailed("connection refused".into()));
        }
        let bus: Arc<dyn MessageBus> = self.bus.clone();
        Ok(bus)
    }
}

/// Records the load state it was started under
pub struct RecordingService {
    pub name: &'static str,
    pub log: EventLog,
    pub fail: bool,
}

#[async_trait]
impl DependentService for RecordingService {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self, ctx: &GatewayContext) -> Result<(), GatewayError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("service:{}:{}", self.name, ctx.load_state.get()));
        if self.fail {
            return Err(GatewayError::ServiceStartFailed {
                service: self.name,
                source: "boom".into(),
            });
        }
        Ok(())
    }
}

pub struct RecordingListener {
    pub name: &'static str,
    pub log: EventLog,
}

#[async_trait]
impl OutwardListener for RecordingListener {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self, ctx: &GatewayContext) -> Result<JoinHandle<()>, GatewayError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("listener:{}:{}", self.name, ctx.load_state.get()));
        Ok(tokio::spawn(std::future::pending::<()>()))
    }
}

pub fn collaborators(
    handshake: Option<Arc<MockHandshake>>,
    signal: Option<Arc<MockSignal>>,
    bus: Arc<MockBusConnector>,
    gateway: Arc<MockConnector>,
) -> Collaborators {
    Collaborators {
        handshake: handshake.map(|h| h as Arc<dyn RemoteHandshake>),
        signal: signal.map(|s| s as Arc<dyn StartupSignal>),
        bus,
        gateway,
    }
}

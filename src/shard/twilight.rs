//! Twilight-backed gateway sessions
//!
//! One `twilight_gateway::Shard` per index, each driven by its own event loop
//! task that keeps the shard's [`ShardCache`] current.

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::model::{Guild, User};
use crate::shard::cache::{ShardCache, ShardHealth};
use crate::shard::session::{GatewayConnector, GatewaySession};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use twilight_gateway::queue::InMemoryQueue;
use twilight_gateway::{Config, ConfigBuilder, EventTypeFlags, Intents, MessageSender, Shard, StreamExt as _};
use twilight_model::gateway::event::Event;
use twilight_model::gateway::payload::outgoing::UpdatePresence;
use twilight_model::gateway::presence::{Activity, ActivityType, MinimalActivity, Status};
use twilight_model::gateway::ShardId;

/// Circuit breaker: mark shard dead after N consecutive errors without success
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Opens Discord gateway sessions through Twilight
///
/// Every shard is built from one [`Config`], so all of them identify through
/// the same [`InMemoryQueue`] and respect the bot's `max_concurrency`.
pub struct TwilightConnector {
    config: Config,
    queue: InMemoryQueue,
    http: twilight_http::Client,
    metrics: Arc<GatewayMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
}

impl TwilightConnector {
    /// Must be called inside a Tokio runtime; the identify queue spawns its runner.
    pub fn new(token: String, intents: Intents, metrics: Arc<GatewayMetrics>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let queue = InMemoryQueue::default();
        let config = ConfigBuilder::new(token.clone(), intents)
            .queue(queue.clone())
            .build();

        Self {
            http: twilight_http::Client::new(token),
            config,
            queue,
            metrics,
            shutdown_tx,
            shut_down: AtomicBool::new(false),
        }
    }

    fn closed(shard_index: u32) -> GatewayError {
        GatewayError::ShardConnectFailed {
            shard_id: shard_index,
            reason: "connector is shut down".to_string(),
        }
    }
}

#[async_trait]
impl GatewayConnector for TwilightConnector {
    async fn connect(
        &self,
        shard_index: u32,
        shard_count: u32,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        let id = ShardId::new_checked(shard_index, shard_count).ok_or(
            GatewayError::ShardOutOfBounds {
                index: shard_index,
                shard_count,
            },
        )?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        // Checked after subscribing, so a concurrent shutdown is never missed
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Self::closed(shard_index));
        }

        let shard = Shard::with_config(id, self.config.clone());
        let cache = Arc::new(ShardCache::new());
        let (health_tx, mut health_rx) = watch::channel(ShardHealth::Connecting);

        let session = Arc::new(TwilightSession {
            shard_id: shard_index,
            shard_total: shard_count,
            cache: Arc::clone(&cache),
            sender: shard.sender(),
        });

        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            tokio::select! {
                result = run_shard(shard, cache, health_tx, metrics) => {
                    if let Err(e) = result {
                        error!(shard_id = shard_index, error = %e, "Shard task failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(shard_id = shard_index, "Shard received shutdown signal");
                }
            }
        });

        let health = health_rx
            .wait_for(|h| h.is_healthy() || *h == ShardHealth::Dead)
            .await
            .map(|h| *h);

        match health {
            Ok(ShardHealth::Dead) => Err(GatewayError::ShardConnectFailed {
                shard_id: shard_index,
                reason: "shard died before becoming ready".to_string(),
            }),
            Ok(_) => Ok(session),
            Err(_) => Err(GatewayError::ShardConnectFailed {
                shard_id: shard_index,
                reason: "event loop ended before ready".to_string(),
            }),
        }
    }

    async fn recommended_shards(&self) -> Result<u32, GatewayError> {
        let info = self
            .http
            .gateway()
            .authed()
            .await
            .map_err(|e| GatewayError::ShardCountUnavailable(Box::new(e)))?
            .model()
            .await
            .map_err(|e| GatewayError::ShardCountUnavailable(Box::new(e)))?;

        let limit = &info.session_start_limit;
        if limit.total >= limit.remaining {
            self.queue.update(
                limit.max_concurrency,
                limit.remaining,
                Duration::from_millis(limit.reset_after),
                limit.total,
            );
            debug!(
                max_concurrency = limit.max_concurrency,
                remaining = limit.remaining,
                "Identify queue sized from session start limit"
            );
        } else {
            warn!(
                total = limit.total,
                remaining = limit.remaining,
                "Inconsistent session start limit, keeping identify queue defaults"
            );
        }

        Ok(info.shards)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }
}

/// Session handle for one Twilight shard
pub struct TwilightSession {
    shard_id: u32,
    shard_total: u32,
    cache: Arc<ShardCache>,
    sender: MessageSender,
}

impl GatewaySession for TwilightSession {
    fn shard_id(&self) -> u32 {
        self.shard_id
    }

    fn shard_total(&self) -> u32 {
        self.shard_total
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
        let activity: Activity = MinimalActivity {
            kind: ActivityType::Playing,
            name: text.to_owned(),
            url: None,
        }
        .into();

        let presence = UpdatePresence::new(vec![activity], false, None::<u64>, Status::Online)
            .map_err(|e| GatewayError::PresenceUpdateFailed {
                shard_id: self.shard_id,
                source: Box::new(e),
            })?;

        self.sender
            .command(&presence)
            .map_err(|e| GatewayError::PresenceUpdateFailed {
                shard_id: self.shard_id,
                source: Box::new(e),
            })
    }
}

fn publish_health(cache: &ShardCache, health_tx: &watch::Sender<ShardHealth>, health: ShardHealth) {
    cache.set_health(health);
    health_tx.send_replace(health);
}

/// Run a single shard's event loop
async fn run_shard(
    mut shard: Shard,
    cache: Arc<ShardCache>,
    health_tx: watch::Sender<ShardHealth>,
    metrics: Arc<GatewayMetrics>,
) -> Result<(), GatewayError> {
    let shard_id = shard.id().number();

    publish_health(&cache, &health_tx, ShardHealth::Connecting);
    info!(shard_id, total = shard.id().total(), "Shard starting");

    let mut consecutive_errors: u32 = 0;

    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        let event = match item {
            Ok(event) => {
                consecutive_errors = 0;
                event
            }
            Err(source) => {
                consecutive_errors += 1;
                warn!(shard_id, error = %source, consecutive = consecutive_errors, "Error receiving event");

                // Immediate fatal: reconnect failure
                if matches!(source.kind(), twilight_gateway::error::ReceiveMessageErrorType::Reconnect) {
                    let err = GatewayError::ShardReconnectFailed {
                        shard_id,
                        source: Box::new(source),
                    };
                    metrics.record_error(err.error_type_label());
                    publish_health(&cache, &health_tx, ShardHealth::Dead);
                    error!(shard_id, "Fatal gateway error (reconnect failed)");
                    return Err(err);
                }

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    let err = GatewayError::ShardCircuitBroken {
                        shard_id,
                        count: consecutive_errors,
                        max: MAX_CONSECUTIVE_ERRORS,
                    };
                    metrics.record_error(err.error_type_label());
                    publish_health(&cache, &health_tx, ShardHealth::Dead);
                    error!(shard_id, consecutive = consecutive_errors, "Shard dead: consecutive error threshold exceeded");
                    return Err(err);
                }

                // Non-fatal transient error
                metrics.record_error("receive_error");
                publish_health(&cache, &health_tx, ShardHealth::Disconnected);
                continue;
            }
        };

        metrics.record_event(shard_id, &event);
        cache.apply(&event);

        match &event {
            Event::Ready(ready) => {
                publish_health(&cache, &health_tx, ShardHealth::Ready);
                metrics.set_guilds(shard_id, cache.guild_count() as u64);
                info!(
                    shard_id,
                    guilds = ready.guilds.len(),
                    session_id = %ready.session_id,
                    "Shard ready"
                );
            }
            Event::Resumed => {
                publish_health(&cache, &health_tx, ShardHealth::Ready);
                info!(shard_id, "Shard resumed");
            }
            Event::GatewayReconnect | Event::GatewayInvalidateSession(_) => {
                publish_health(&cache, &health_tx, ShardHealth::Resuming);
                debug!(shard_id, "Shard resuming");
            }
            Event::GatewayHeartbeatAck => {
                metrics.record_heartbeat(shard_id);
            }
            Event::GuildCreate(_) | Event::GuildDelete(_) => {
                metrics.set_guilds(shard_id, cache.guild_count() as u64);
            }
            _ => {}
        }
    }

    // Stream ended, shard closed
    publish_health(&cache, &health_tx, ShardHealth::Dead);
    info!(shard_id, "Shard event stream ended");
    Ok(())
}

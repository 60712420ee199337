//! Prometheus metrics module
//!
//! Without an installed recorder the `metrics` macros are no-ops, so a
//! detached [`GatewayMetrics`] is safe anywhere a recorder cannot be installed
//! (tests, embedding).

use crate::error::GatewayError;
use crate::load_state::LoadState;
use crate::router::RouterStats;

use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use twilight_model::gateway::event::Event;

/// Gateway metrics collector
#[derive(Clone, Default)]
pub struct GatewayMetrics {
    handle: Option<PrometheusHandle>,
}

impl GatewayMetrics {
    /// Install the Prometheus recorder. Only one recorder may exist per process.
    pub fn install() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::Config(format!("failed to install Prometheus recorder: {e}")))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Metrics without a recorder; every update is dropped
    pub fn detached() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "shards_events_received_total",
            Unit::Count,
            "Total events received from Discord"
        );
        describe_counter!(
            "shards_errors_total",
            Unit::Count,
            "Total gateway errors"
        );
        describe_histogram!(
            "shards_startup_duration_seconds",
            Unit::Seconds,
            "Time from process start to POSTLOAD"
        );
        describe_gauge!(
            "shards_load_state",
            Unit::Count,
            "Load state (0=PRELOAD, 1=LOADING, 2=POSTLOAD)"
        );
        describe_gauge!(
            "shards_shards_ready",
            Unit::Count,
            "Number of shards in ready state"
        );
        describe_gauge!(
            "shards_guilds_total",
            Unit::Count,
            "Guilds visible per shard"
        );
        describe_gauge!(
            "shards_users_distinct",
            Unit::Count,
            "Distinct users across all shards"
        );
        describe_gauge!(
            "shards_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );
    }

    /// Record an event received
    pub fn record_event(&self, shard_id: u32, event: &Event) {
        let event_type = match event {
            Event::GuildCreate(_) => "guild_create",
            Event::GuildDelete(_) => "guild_delete",
            Event::GuildUpdate(_) => "guild_update",
            Event::MemberAdd(_) => "member_add",
            Event::MemberRemove(_) => "member_remove",
            Event::MemberChunk(_) => "member_chunk",
            Event::Ready(_) => "ready",
            Event::Resumed => "resumed",
            Event::GatewayHeartbeatAck => "heartbeat_ack",
            _ => "other",
        };

        counter!(
            "shards_events_received_total",
            "shard_id" => shard_id.to_string(),
            "event_type" => event_type
        )
        .increment(1);
    }

    /// Record gateway error by type label
    pub fn record_error(&self, error_type: &'static str) {
        counter!("shards_errors_total", "error_type" => error_type).increment(1);
    }

    /// Record heartbeat
    pub fn record_heartbeat(&self, shard_id: u32) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        gauge!(
            "shards_last_heartbeat_timestamp",
            "shard_id" => shard_id.to_string()
        )
        .set(now);
    }

    /// Set guild count for a shard
    pub fn set_guilds(&self, shard_id: u32, count: u64) {
        gauge!(
            "shards_guilds_total",
            "shard_id" => shard_id.to_string()
        )
        .set(count as f64);
    }

    pub fn set_load_state(&self, state: LoadState) {
        let value = match state {
            LoadState::PreLoad => 0.0,
            LoadState::Loading => 1.0,
            LoadState::PostLoad => 2.0,
        };
        gauge!("shards_load_state").set(value);
    }

    /// Publish router-wide counts
    pub fn record_stats(&self, stats: &RouterStats) {
        gauge!("shards_shards_ready").set(stats.shards_ready as f64);
        gauge!("shards_users_distinct").set(stats.users as f64);
    }

    pub fn record_startup(&self, duration: Duration) {
        histogram!("shards_startup_duration_seconds").record(duration.as_secs_f64());
    }

    /// Set NATS connection status
    pub fn set_nats_connected(&self, connected: bool) {
        gauge!("shards_nats_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }
}

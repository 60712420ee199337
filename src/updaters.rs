//! Periodic background updaters
//!
//! Scheduled on the task pool once the process reaches POSTLOAD:
//! - presence refresh on every shard
//! - router stats flushed to metrics and the message bus

use crate::context::GatewayContext;
use crate::error::GatewayError;
use crate::nats::node_stats_subject;
use crate::router::RouterStats;

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Stats message published on `stats.node.{node}`
#[derive(Debug, Serialize)]
pub struct StatsPayload<'a> {
    pub node: &'a str,
    pub version: &'static str,
    pub load_state: String,
    #[serde(flatten)]
    pub stats: RouterStats,
}

/// Schedule every updater on the context's task pool
pub fn start(ctx: &GatewayContext) -> Result<(), GatewayError> {
    let cfg = &ctx.config.updaters;

    let presence_ctx = ctx.clone();
    ctx.tasks.schedule_at_fixed_rate(
        "presence_refresh",
        Duration::ZERO,
        Duration::from_secs(cfg.presence_interval_secs),
        move || {
            let ctx = presence_ctx.clone();
            async move {
                refresh_presence(&ctx);
            }
        },
    )?;

    let stats_ctx = ctx.clone();
    let period = Duration::from_secs(cfg.stats_interval_secs);
    ctx.tasks.schedule_at_fixed_rate("stats_flush", period, period, move || {
        let ctx = stats_ctx.clone();
        async move {
            if let Err(e) = flush_stats(&ctx).await {
                warn!(error = %e, "Stats flush failed");
            }
        }
    })?;

    Ok(())
}

/// Presence text for one shard
pub fn presence_text(base: &str, index: u32, shard_count: u32) -> String {
    format!("{base} | shard {index}/{shard_count}")
}

/// Push the presence to every shard; returns how many accepted it
pub fn refresh_presence(ctx: &GatewayContext) -> usize {
    let base = &ctx.config.updaters.presence_text;
    let shard_count = ctx.router.shard_count();
    let mut updated = 0;

    for shard in ctx.router.shards() {
        match shard.set_presence(&presence_text(base, shard.index(), shard_count)) {
            Ok(()) => updated += 1,
            Err(e) => {
                ctx.metrics.record_error(e.error_type_label());
                debug!(shard_id = shard.index(), error = %e, "Presence update skipped");
            }
        }
    }

    updated
}

/// Record router stats and publish them for the node
pub async fn flush_stats(ctx: &GatewayContext) -> Result<RouterStats, GatewayError> {
    let stats = ctx.router.stats();
    ctx.metrics.record_stats(&stats);
    ctx.metrics.set_nats_connected(ctx.bus.is_connected());

    let label = ctx.node.label();
    let payload = StatsPayload {
        node: &label,
        version: env!("CARGO_PKG_VERSION"),
        load_state: ctx.load_state.get().to_string(),
        stats: stats.clone(),
    };
    let bytes = serde_json::to_vec(&payload).map_err(|e| GatewayError::NatsPublishFailed {
        subject: node_stats_subject(&label),
        source: Box::new(e),
    })?;

    ctx.bus.publish(&node_stats_subject(&label), bytes).await?;
    Ok(stats)
}

//! Domain error types for the Arrakis shard core
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, GatewayError>.

use crate::load_state::LoadState;
use thiserror::Error;

/// Boxed source error carried by variants that wrap a collaborator failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shard core domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// On-call engineers can pattern-match on the variant to understand
/// the failure mode without parsing error message strings.
///
/// Example log output:
/// ```text
/// GatewayError::ShardCountMismatch { shard_id: 3, expected: 16, actual: 8 }
/// → "shard 3 negotiated 8 total shards but the registry holds 16"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error (value missing, malformed or out of range)
    #[error("configuration error: {0}")]
    Config(String),

    /// Platform lookup attempted before the process reached PostLoad
    #[error("lookup attempted while load state is {state}, requires {required}")]
    NotReady { state: LoadState, required: LoadState },

    /// Routing with a shard count of zero
    #[error("no shards registered: shard count is 0")]
    NoShards,

    /// Computed shard index has no registry entry. Indicates a routing bug.
    #[error("shard index {index} is outside the registry (shard count {shard_count})")]
    ShardOutOfBounds { index: u32, shard_count: u32 },

    /// Load state may only advance one step at a time
    #[error("invalid load state transition {from} -> {to}")]
    InvalidLoadTransition { from: LoadState, to: LoadState },

    /// Control-plane handshake rejected or unreachable
    #[error("remote handshake with {endpoint} failed")]
    HandshakeFailed {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// Control-plane handshake did not answer in time
    #[error("remote handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// Best-effort startup signal failed (never escalated)
    #[error("startup signal failed")]
    SignalFailed(#[source] BoxError),

    /// Shard could not reach Ready during startup
    #[error("shard {shard_id} failed to connect: {reason}")]
    ShardConnectFailed { shard_id: u32, reason: String },

    /// Session negotiated a different shard layout than the registry
    #[error("shard {shard_id} negotiated {actual} total shards but the registry holds {expected}")]
    ShardCountMismatch {
        shard_id: u32,
        expected: u32,
        actual: u32,
    },

    /// Recommended shard count could not be fetched from Discord
    #[error("recommended shard count unavailable")]
    ShardCountUnavailable(#[source] BoxError),

    /// Shard exceeded consecutive error threshold (circuit breaker tripped)
    #[error("shard {shard_id} exceeded consecutive error threshold ({count}/{max})")]
    ShardCircuitBroken { shard_id: u32, count: u32, max: u32 },

    /// Shard reconnection failed (fatal, shard marked dead)
    #[error("shard {shard_id} reconnection failed")]
    ShardReconnectFailed {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// Presence command could not be queued on the shard
    #[error("presence update failed on shard {shard_id}")]
    PresenceUpdateFailed {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] BoxError),

    /// NATS publish failed for a specific subject
    #[error("NATS publish failed for subject '{subject}'")]
    NatsPublishFailed {
        subject: String,
        #[source]
        source: BoxError,
    },

    /// Dependent service failed to start
    #[error("service '{service}' failed to start")]
    ServiceStartFailed {
        service: &'static str,
        #[source]
        source: BoxError,
    },

    /// Outward listener failed to bind or start
    #[error("listener '{listener}' failed to start")]
    ListenerFailed {
        listener: &'static str,
        #[source]
        source: BoxError,
    },

    /// Task submitted after the pool shut down
    #[error("scheduled task pool is shut down")]
    TaskPoolClosed,
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `shards_errors_total` counter,
    /// enabling per-error-type monitoring and alerting.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::NotReady { .. } => "not_ready",
            Self::NoShards => "no_shards",
            Self::ShardOutOfBounds { .. } => "shard_out_of_bounds",
            Self::InvalidLoadTransition { .. } => "load_transition",
            Self::HandshakeFailed { .. } => "handshake_failed",
            Self::HandshakeTimeout { .. } => "handshake_timeout",
            Self::SignalFailed(_) => "signal",
            Self::ShardConnectFailed { .. } => "shard_connect",
            Self::ShardCountMismatch { .. } => "shard_count_mismatch",
            Self::ShardCountUnavailable(_) => "shard_count_unavailable",
            Self::ShardCircuitBroken { .. } => "circuit_broken",
            Self::ShardReconnectFailed { .. } => "reconnect_failed",
            Self::PresenceUpdateFailed { .. } => "presence",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::NatsPublishFailed { .. } => "nats_publish",
            Self::ServiceStartFailed { .. } => "service_start",
            Self::ListenerFailed { .. } => "listener",
            Self::TaskPoolClosed => "task_pool_closed",
        }
    }
}

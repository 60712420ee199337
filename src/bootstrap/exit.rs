//! Startup failure classes and their process exit codes
//!
//! Supervisors tell failure classes apart by exit code alone. Each class maps
//! to exactly one code and the codes are used nowhere else.

use crate::error::GatewayError;
use thiserror::Error;

/// Generic unrecoverable startup failure (bad config, steps after the handshake)
pub const FATAL_FAILURE: u8 = 70;

/// The control plane rejected this node or did not answer in time
pub const HANDSHAKE_FAILURE: u8 = 69;

/// Why startup was aborted
#[derive(Error, Debug)]
pub enum StartupFailure {
    /// Configuration missing or malformed; no network I/O happened
    #[error("configuration rejected")]
    Config(#[source] GatewayError),

    /// Remote handshake failed or timed out; no shard was opened
    #[error("remote handshake failed")]
    Handshake(#[source] GatewayError),

    /// Anything else during startup
    #[error("startup aborted")]
    Fatal(#[source] GatewayError),
}

impl StartupFailure {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupFailure::Config(_) | StartupFailure::Fatal(_) => FATAL_FAILURE,
            StartupFailure::Handshake(_) => HANDSHAKE_FAILURE,
        }
    }

    /// Underlying domain error
    pub fn error(&self) -> &GatewayError {
        match self {
            StartupFailure::Config(e) | StartupFailure::Handshake(e) | StartupFailure::Fatal(e) => e,
        }
    }
}

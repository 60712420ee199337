//! Command line surface
//!
//! The process takes at most one positional argument: the connection watcher
//! port. Anything missing or unparsable falls back to the configured port.

use tracing::info;

/// Resolve the watcher port from the first positional argument
pub fn watcher_port(arg: Option<&str>, configured: u16) -> u16 {
    match arg {
        Some(raw) => match raw.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                info!(
                    argument = raw,
                    port = configured,
                    "Invalid connection watcher port specified in arguments, using value in config"
                );
                configured
            }
        },
        None => {
            info!(port = configured, "No connection watcher port specified, using value in config");
            configured
        }
    }
}

//! Process-wide load state
//!
//! Gates every platform-dependent lookup: guild and user resolution is only
//! valid once the process reaches [`LoadState::PostLoad`].

use crate::error::GatewayError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Ordered readiness marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadState {
    /// Process started, nothing connected yet
    PreLoad,
    /// Shards are connecting
    Loading,
    /// Shards and dependent services are up; lookups are valid
    PostLoad,
}

impl LoadState {
    /// The only state this one may advance to
    pub fn next(self) -> Option<LoadState> {
        match self {
            LoadState::PreLoad => Some(LoadState::Loading),
            LoadState::Loading => Some(LoadState::PostLoad),
            LoadState::PostLoad => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoadState::PreLoad => 0,
            LoadState::Loading => 1,
            LoadState::PostLoad => 2,
        }
    }

    fn from_u8(value: u8) -> LoadState {
        match value {
            0 => LoadState::PreLoad,
            1 => LoadState::Loading,
            _ => LoadState::PostLoad,
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadState::PreLoad => "PRELOAD",
            LoadState::Loading => "LOADING",
            LoadState::PostLoad => "POSTLOAD",
        })
    }
}

/// Shared, monotonic load state cell
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct LoadStateCell {
    inner: Arc<AtomicU8>,
}

impl LoadStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> LoadState {
        LoadState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Advance to `to`, which must be the immediate successor of the current state.
    pub fn advance(&self, to: LoadState) -> Result<(), GatewayError> {
        let from = self.get();
        if from.next() != Some(to) {
            return Err(GatewayError::InvalidLoadTransition { from, to });
        }

        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| GatewayError::InvalidLoadTransition {
                from: LoadState::from_u8(current),
                to,
            })
    }

    /// Fail with [`GatewayError::NotReady`] unless the state is at least `required`.
    pub fn require(&self, required: LoadState) -> Result<(), GatewayError> {
        let state = self.get();
        if state >= required {
            Ok(())
        } else {
            Err(GatewayError::NotReady { state, required })
        }
    }
}

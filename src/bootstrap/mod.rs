//! Bootstrap orchestration
//!
//! Drives the ordered startup sequence and classifies every abort into a
//! [`StartupFailure`] whose exit code is applied by `main` alone.

mod exit;
pub mod handshake;
mod orchestrator;
mod services;
pub mod signal;

pub use exit::{StartupFailure, FATAL_FAILURE, HANDSHAKE_FAILURE};
pub use handshake::{HttpHandshake, NodeRegistration, RemoteHandshake};
pub use orchestrator::{Bootstrap, BootstrapStep, Collaborators, Running};
pub use services::{DependentService, OutwardListener};
pub use signal::{StartupSignal, WebhookSignal};

use uuid::Uuid;

/// Identity of this running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Random per-process id, always present
    pub instance_id: Uuid,
    /// Assigned by the control plane; absent when the handshake was skipped
    pub node_id: Option<String>,
}

impl NodeIdentity {
    /// Identity without a control-plane node id
    pub fn local() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            node_id: None,
        }
    }

    pub fn registered(node_id: String) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            node_id: Some(node_id),
        }
    }

    /// Node id when registered, otherwise `local-<first 8 hex of the instance id>`
    pub fn label(&self) -> String {
        match &self.node_id {
            Some(id) => id.clone(),
            None => {
                let simple = self.instance_id.simple().to_string();
                format!("local-{}", &simple[..8])
            }
        }
    }
}

//! Best-effort startup signal
//!
//! Posts a short notice to a Discord webhook when a node starts. The signal is
//! advisory: it runs detached with its own timeout, never blocks startup, and
//! failures are logged and dropped.

use crate::bootstrap::NodeIdentity;
use crate::error::GatewayError;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use twilight_model::id::marker::WebhookMarker;
use twilight_model::id::Id;

/// Advisory notification sink
#[async_trait]
pub trait StartupSignal: Send + Sync {
    async fn notify(&self, node: &NodeIdentity) -> Result<(), GatewayError>;
}

/// Discord webhook signal
pub struct WebhookSignal {
    http: twilight_http::Client,
    webhook_id: Id<WebhookMarker>,
    token: String,
}

impl WebhookSignal {
    /// `None` when the webhook id is zero
    pub fn new(webhook_id: u64, token: impl Into<String>) -> Option<Self> {
        Some(Self {
            http: twilight_http::Client::builder().build(),
            webhook_id: Id::new_checked(webhook_id)?,
            token: token.into(),
        })
    }
}

#[async_trait]
impl StartupSignal for WebhookSignal {
    async fn notify(&self, node: &NodeIdentity) -> Result<(), GatewayError> {
        let content = startup_message(node);

        self.http
            .execute_webhook(self.webhook_id, &self.token)
            .content(&content)
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::SignalFailed(Box::new(e)))
    }
}

fn startup_message(node: &NodeIdentity) -> String {
    format!(
        "**Received startup trigger on node {}** (v{})",
        node.label(),
        env!("CARGO_PKG_VERSION")
    )
}

/// Fire the signal on a detached task. The returned handle never yields an error.
pub fn spawn_signal(
    signal: Arc<dyn StartupSignal>,
    node: NodeIdentity,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, signal.notify(&node)).await {
            Ok(Ok(())) => debug!(node = %node.label(), "Startup signal sent"),
            Ok(Err(e)) => warn!(error = %e, "Startup signal failed"),
            Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "Startup signal timed out"),
        }
    })
}

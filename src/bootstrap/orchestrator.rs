//! Bootstrap orchestrator
//!
//! Linear startup, each step gated on the previous one:
//!
//! ```text
//! config ─► handshake ─► signal ─► message bus ─► shards ─► services ─► POSTLOAD ─► background
//!   │           │                      └──────────────┴─────────┴───────────┴──────────┘
//!   │           │                                     StartupFailure::Fatal (70)
//!   │           └─ StartupFailure::Handshake (69), before any shard connects
//!   └─ StartupFailure::Config (70), before any network I/O
//! ```
//!
//! The signal step never fails: it is detached and its errors are only logged.

use crate::bootstrap::handshake::{self, NodeRegistration, RemoteHandshake};
use crate::bootstrap::services::{DependentService, OutwardListener};
use crate::bootstrap::signal::{self, StartupSignal};
use crate::bootstrap::{NodeIdentity, StartupFailure};
use crate::config::{GatewayConfig, MAX_SHARD_COUNT};
use crate::context::GatewayContext;
use crate::error::GatewayError;
use crate::load_state::{LoadState, LoadStateCell};
use crate::metrics::GatewayMetrics;
use crate::nats::{subjects, BusConnector, MessageBus};
use crate::router::ShardRouter;
use crate::shard::{GatewayConnector, ShardRegistry};
use crate::tasks::TaskPool;
use crate::{updaters, watcher};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Startup steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    Config,
    Handshake,
    Signal,
    MessageBus,
    Shards,
    Services,
    Ready,
    Background,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootstrapStep::Config => "config",
            BootstrapStep::Handshake => "handshake",
            BootstrapStep::Signal => "signal",
            BootstrapStep::MessageBus => "message_bus",
            BootstrapStep::Shards => "shards",
            BootstrapStep::Services => "services",
            BootstrapStep::Ready => "ready",
            BootstrapStep::Background => "background",
        })
    }
}

/// External systems the bootstrap talks to
pub struct Collaborators {
    /// Required in full profiles, ignored in restricted ones
    pub handshake: Option<Arc<dyn RemoteHandshake>>,
    pub signal: Option<Arc<dyn StartupSignal>>,
    pub bus: Arc<dyn BusConnector>,
    pub gateway: Arc<dyn GatewayConnector>,
}

/// Startup sequence for one process
pub struct Bootstrap {
    config: Arc<GatewayConfig>,
    collaborators: Collaborators,
    metrics: Arc<GatewayMetrics>,
    services: Vec<Arc<dyn DependentService>>,
    listeners: Vec<Arc<dyn OutwardListener>>,
    load_state: LoadStateCell,
    steps: Vec<BootstrapStep>,
}

/// A fully started process
pub struct Running {
    pub context: GatewayContext,
    /// Steps completed, in order
    pub steps: Vec<BootstrapStep>,
    pub startup: Duration,
    listeners: JoinSet<&'static str>,
    listener_aborts: Vec<AbortHandle>,
}

impl Bootstrap {
    pub fn new(config: GatewayConfig, collaborators: Collaborators, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            metrics,
            services: Vec::new(),
            listeners: Vec::new(),
            load_state: LoadStateCell::new(),
            steps: Vec::new(),
        }
    }

    /// Register a service started between shard startup and POSTLOAD
    pub fn with_service(mut self, service: Arc<dyn DependentService>) -> Self {
        self.services.push(service);
        self
    }

    /// Register a listener started after POSTLOAD in full profiles
    pub fn with_listener(mut self, listener: Arc<dyn OutwardListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Shared view of the load state this bootstrap will advance
    pub fn load_state(&self) -> LoadStateCell {
        self.load_state.clone()
    }

    fn complete(&mut self, step: BootstrapStep) {
        debug!(%step, "Bootstrap step complete");
        self.steps.push(step);
    }

    /// Run every step. Returns once the process is serving.
    pub async fn run(mut self) -> Result<Running, StartupFailure> {
        let started = Instant::now();
        let restricted = self.config.profile.is_restricted();

        info!(
            version = env!("CARGO_PKG_VERSION"),
            profile = self.config.profile.as_str(),
            "Starting bootstrap"
        );

        // 1. Configuration
        self.config.validate().map_err(StartupFailure::Config)?;
        self.metrics.set_load_state(self.load_state.get());
        self.complete(BootstrapStep::Config);

        // 2. Remote handshake
        let node = if restricted {
            info!(profile = self.config.profile.as_str(), "Restricted profile, skipping remote handshake");
            NodeIdentity::local()
        } else {
            self.handshake().await?
        };
        self.complete(BootstrapStep::Handshake);

        info!(node = %node.label(), instance_id = %node.instance_id, "Starting up Arrakis shards");

        // 3. Advisory signals
        if !restricted {
            if let Some(signal) = &self.collaborators.signal {
                signal::spawn_signal(Arc::clone(signal), node.clone(), self.config.signal.timeout());
            }
        }
        watcher::spawn_announce(self.config.watcher_port, &node, self.config.shard_count);
        self.complete(BootstrapStep::Signal);

        // 4. Message bus
        let bus = self.collaborators.bus.connect().await.map_err(|e| {
            error!(error = %e, "Message bus connection failed");
            StartupFailure::Fatal(e)
        })?;
        self.metrics.set_nats_connected(bus.is_connected());
        self.complete(BootstrapStep::MessageBus);

        let loaded = self.load(node, Arc::clone(&bus), restricted, started).await;
        if loaded.is_err() {
            bus.close().await;
            self.metrics.set_nats_connected(false);
        }
        loaded
    }

    /// Steps from shard startup onwards. The caller owns closing the bus on failure.
    async fn load(
        &mut self,
        node: NodeIdentity,
        bus: Arc<dyn MessageBus>,
        restricted: bool,
        started: Instant,
    ) -> Result<Running, StartupFailure> {
        // 5. Shards
        self.advance(LoadState::Loading)?;
        let shard_count = self.resolve_shard_count().await.map_err(StartupFailure::Fatal)?;
        let registry = ShardRegistry::start(Arc::clone(&self.collaborators.gateway), shard_count)
            .await
            .map_err(|e| {
                self.metrics.record_error(e.error_type_label());
                StartupFailure::Fatal(e)
            })?;
        let registry = Arc::new(registry);
        let router = ShardRouter::new(Arc::clone(&registry), self.load_state.clone())
            .map_err(|e| self.abort(&registry, None, e))?;
        self.complete(BootstrapStep::Shards);

        let context = GatewayContext {
            config: Arc::clone(&self.config),
            node,
            load_state: self.load_state.clone(),
            router: Arc::new(router),
            tasks: TaskPool::new(self.config.task_pool_size),
            bus,
            metrics: Arc::clone(&self.metrics),
        };

        // 6. Dependent services
        for service in &self.services {
            info!(service = service.name(), "Starting dependent service");
            if let Err(e) = service.start(&context).await {
                error!(service = service.name(), error = %e, "Dependent service failed to start");
                return Err(self.abort(&registry, Some(&context), e));
            }
        }
        self.complete(BootstrapStep::Services);

        // 7. Readiness
        self.advance(LoadState::PostLoad)
            .map_err(|f| self.abort(&registry, Some(&context), into_error(f)))?;
        self.complete(BootstrapStep::Ready);

        // 8. Background work and outward listeners
        updaters::start(&context).map_err(|e| self.abort(&registry, Some(&context), e))?;

        let mut listeners = JoinSet::new();
        let mut listener_aborts = Vec::new();
        if restricted {
            info!("Restricted profile, outward listeners disabled");
        } else {
            for listener in &self.listeners {
                let name = listener.name();
                let handle = match listener.start(&context).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        error!(listener = name, error = %e, "Outward listener failed to start");
                        listener_aborts.iter().for_each(AbortHandle::abort);
                        return Err(self.abort(&registry, Some(&context), e));
                    }
                };
                info!(listener = name, "Outward listener started");
                listener_aborts.push(handle.abort_handle());
                listeners.spawn(async move {
                    let _ = handle.await;
                    name
                });
            }
        }
        self.complete(BootstrapStep::Background);

        let startup = started.elapsed();
        self.metrics.record_startup(startup);
        announce_started(&context, shard_count, startup).await;

        info!(
            node = %context.node.label(),
            shards = shard_count,
            services = self.services.len(),
            load_state = %context.load_state.get(),
            startup_secs = startup.as_secs(),
            "Loaded {} shards. Woke up in {} seconds",
            shard_count,
            startup.as_secs()
        );

        Ok(Running {
            context,
            steps: std::mem::take(&mut self.steps),
            startup,
            listeners,
            listener_aborts,
        })
    }

    async fn handshake(&self) -> Result<NodeIdentity, StartupFailure> {
        let Some(remote) = &self.collaborators.handshake else {
            return Err(StartupFailure::Config(GatewayError::Config(format!(
                "the '{}' profile requires a remote handshake endpoint",
                self.config.profile.as_str()
            ))));
        };

        let registration = NodeRegistration {
            instance_id: Uuid::new_v4(),
            version: env!("CARGO_PKG_VERSION"),
            profile: self.config.profile.as_str(),
            shard_count: self.config.shard_count,
        };

        match handshake::perform(remote.as_ref(), &registration, self.config.handshake.timeout()).await {
            Ok(node_id) => {
                info!(node_id = %node_id, "Remote handshake complete");
                Ok(NodeIdentity {
                    instance_id: registration.instance_id,
                    node_id: Some(node_id),
                })
            }
            Err(e) => {
                self.metrics.record_error(e.error_type_label());
                error!(error = %e, "Cannot send node data to the remote server or ping timed out, exiting");
                Err(StartupFailure::Handshake(e))
            }
        }
    }

    /// Configured count, or the platform's recommendation when configured as 0.
    ///
    /// Routing is only correct when every shard identified with the same total,
    /// so an explicit count below the recommendation is flagged loudly.
    async fn resolve_shard_count(&self) -> Result<u32, GatewayError> {
        let gateway = &self.collaborators.gateway;

        if self.config.shard_count == 0 {
            let recommended = gateway.recommended_shards().await?;
            if recommended == 0 {
                return Err(GatewayError::NoShards);
            }
            if recommended > MAX_SHARD_COUNT {
                return Err(GatewayError::Config(format!(
                    "recommended shard count {recommended} exceeds the maximum of {MAX_SHARD_COUNT}"
                )));
            }
            info!(shard_count = recommended, "Using recommended shard count");
            return Ok(recommended);
        }

        let configured = self.config.shard_count;
        match gateway.recommended_shards().await {
            Ok(recommended) if recommended > configured => warn!(
                configured,
                recommended,
                "Configured shard count is below the recommended count; the platform may refuse to identify"
            ),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not cross-check shard count"),
        }
        Ok(configured)
    }

    fn advance(&self, to: LoadState) -> Result<(), StartupFailure> {
        self.load_state.advance(to).map_err(StartupFailure::Fatal)?;
        self.metrics.set_load_state(to);
        info!(load_state = %to, "Load state advanced");
        Ok(())
    }

    /// Stop what was started so far and classify the failure as fatal
    fn abort(
        &self,
        registry: &ShardRegistry,
        context: Option<&GatewayContext>,
        error: GatewayError,
    ) -> StartupFailure {
        self.metrics.record_error(error.error_type_label());
        if let Some(context) = context {
            context.tasks.shutdown();
        }
        registry.shutdown();
        StartupFailure::Fatal(error)
    }
}

fn into_error(failure: StartupFailure) -> GatewayError {
    match failure {
        StartupFailure::Config(e) | StartupFailure::Handshake(e) | StartupFailure::Fatal(e) => e,
    }
}

async fn announce_started(context: &GatewayContext, shard_count: u32, startup: Duration) {
    let payload = serde_json::json!({
        "node": context.node.label(),
        "instance_id": context.node.instance_id.to_string(),
        "shard_count": shard_count,
        "startup_ms": startup.as_millis() as u64,
        "version": env!("CARGO_PKG_VERSION"),
    });
    let subject = format!("{}.started", subjects::LIFECYCLE);

    if let Err(e) = context.bus.publish(&subject, payload.to_string().into_bytes()).await {
        warn!(error = %e, "Failed to announce startup on the message bus");
    }
}

impl Running {
    /// Resolves when an outward listener stops serving; never resolves without listeners
    pub async fn listener_stopped(&mut self) -> &'static str {
        match self.listeners.join_next().await {
            Some(Ok(name)) => name,
            Some(Err(_)) => "unknown",
            None => std::future::pending().await,
        }
    }

    /// Stop listeners, timers, shards and the bus
    pub async fn shutdown(mut self) {
        info!("Shutting down shard core...");
        for abort in &self.listener_aborts {
            abort.abort();
        }
        self.listeners.abort_all();
        self.context.tasks.shutdown();
        self.context.registry().shutdown();
        self.context.bus.close().await;
        info!("Shutdown complete");
    }
}

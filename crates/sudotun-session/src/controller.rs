//! Session lifecycle controller.
//!
//! Coordinates three otherwise-independent pieces — the relay process, the
//! virtual interface and the packet forwarder bound to it — into one
//! consistent, observable, restartable session.
//!
//! The controller is a single-consumer actor: every lifecycle intent goes
//! through one command channel, so at most one transition runs at a time and
//! the process/interface handles are never touched concurrently. A `stop`
//! issued while a start is in flight simply queues behind it.
//!
//! Start acquires resources in a fixed order (relay, interface, forwarder)
//! and rolls back in reverse on any failure, so the session never claims to
//! be running partially. A node switch restarts only the relay: the bound
//! local proxy port is preserved, which keeps the already-established
//! interface and forwarder wiring valid.

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use sudotun_net::{RelayError, RelayProcess, ResolveError, Resolver, build_config};
use sudotun_proto::NodeProfile;

use crate::monitor::{self, TrafficReading};
use crate::store::{NodeStore, StoreError};
use crate::tun::{InterfaceError, InterfaceSpec, TunDevice, TunProvider};
use crate::tunnel::{TunnelProcess, render_config};

/// Lifecycle phase of the single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Switching,
    Stopping,
}

/// Session errors surfaced from start/switch.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no server profile available")]
    NoProfile,

    #[error("server profile not found: {0}")]
    ProfileNotFound(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("packet forwarder exited with code {0}")]
    Forwarder(i32),

    #[error(transparent)]
    Interface(#[from] InterfaceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to write forwarder config: {0}")]
    ConfigWrite(String),

    #[error("session controller is gone")]
    Closed,
}

/// External collaborators the controller drives.
pub struct SessionDeps {
    pub store: Arc<dyn NodeStore>,
    pub relay: Arc<dyn RelayProcess>,
    pub tunnel: Arc<dyn TunnelProcess>,
    pub tun: Arc<dyn TunProvider>,
    pub resolver: Resolver,
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where the rendered forwarder config lands.
    pub runtime_dir: PathBuf,
    pub interface: InterfaceSpec,
    pub monitor_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            runtime_dir: std::env::temp_dir(),
            interface: InterfaceSpec::default(),
            monitor_period: Duration::from_secs(1),
        }
    }
}

/// Point-in-time controller status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    /// Id of the active profile, if any.
    pub active_id: Option<String>,
    pub active_name: Option<String>,
    /// Last start/switch failure, cleared by the next successful start.
    pub last_error: Option<String>,
}

enum Command {
    Start {
        node_id: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Switch {
        node_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Handle to the session actor.
///
/// The actor is the sole owner of the interface descriptor and both process
/// handles; dropping the last handle triggers the same best-effort teardown
/// an explicit stop performs.
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    running: watch::Receiver<bool>,
    traffic: watch::Receiver<Option<TrafficReading>>,
    actor: JoinHandle<()>,
}

impl SessionController {
    /// Spawn the actor onto the current runtime.
    pub fn spawn(deps: SessionDeps, config: SessionConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(16);
        let (running_tx, running) = watch::channel(false);
        let (traffic_tx, traffic) = watch::channel(None);

        let actor = Actor {
            deps,
            config,
            phase: SessionPhase::Idle,
            active: None,
            device: None,
            tunnel_started: false,
            last_error: None,
            running_tx: Arc::new(running_tx),
            traffic_tx: Arc::new(traffic_tx),
            monitor: None,
        };
        let actor = tokio::spawn(actor.run(command_rx));

        Self {
            commands,
            running,
            traffic,
            actor,
        }
    }

    /// Start a session for `node_id`, or for the active/first profile.
    pub async fn start(&self, node_id: Option<&str>) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start {
                node_id: node_id.map(str::to_owned),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Swap the relay over to another profile without touching the interface.
    pub async fn switch_node(&self, node_id: &str) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Switch {
                node_id: node_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Tear the session down. Never fails; teardown errors are logged.
    pub async fn stop(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = response.await;
        }
    }

    /// The platform revoked tunneling permission: behaves as a stop.
    pub async fn revoke(&self) {
        warn!("tunneling permission revoked, stopping session");
        self.stop().await;
    }

    /// Snapshot of phase, active profile and last failure.
    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Running-state observable. The actor is its only writer.
    pub fn running_watch(&self) -> watch::Receiver<bool> {
        self.running.clone()
    }

    /// Traffic readings published while running.
    pub fn traffic_watch(&self) -> watch::Receiver<Option<TrafficReading>> {
        self.traffic.clone()
    }

    /// Close the controller and wait for the actor's final teardown.
    pub async fn shutdown(self) {
        drop(self.commands);
        let _ = self.actor.await;
    }
}

struct Actor {
    deps: SessionDeps,
    config: SessionConfig,
    phase: SessionPhase,
    active: Option<NodeProfile>,
    device: Option<Box<dyn TunDevice>>,
    tunnel_started: bool,
    last_error: Option<String>,
    running_tx: Arc<watch::Sender<bool>>,
    traffic_tx: Arc<watch::Sender<Option<TrafficReading>>>,
    monitor: Option<AbortHandle>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Start { node_id, reply } => {
                    let _ = reply.send(self.handle_start(node_id.as_deref()).await);
                }
                Command::Switch { node_id, reply } => {
                    let _ = reply.send(self.handle_switch(&node_id).await);
                }
                Command::Stop { reply } => {
                    self.handle_stop().await;
                    let _ = reply.send(());
                }
                Command::Status { reply } => {
                    let _ = reply.send(SessionStatus {
                        phase: self.phase,
                        active_id: self.active.as_ref().map(|n| n.id.clone()),
                        active_name: self
                            .active
                            .as_ref()
                            .map(|n| n.display_name().to_string()),
                        last_error: self.last_error.clone(),
                    });
                }
            }
        }
        // Every handle is gone; run the same best-effort teardown before the
        // task exits so the descriptor and processes never outlive us.
        self.handle_stop().await;
    }

    async fn handle_start(&mut self, node_id: Option<&str>) -> Result<(), SessionError> {
        if matches!(self.phase, SessionPhase::Starting | SessionPhase::Running) {
            info!("session already up, ignoring duplicate start");
            return Ok(());
        }

        self.phase = SessionPhase::Starting;
        self.last_error = None;

        let node = match self.select_node(node_id).await {
            Ok(node) => node,
            Err(e) => {
                error!(error = %e, "cannot start session: no usable profile");
                self.phase = SessionPhase::Idle;
                return Err(e);
            }
        };

        info!(node = %node.display_name(), "starting session");
        match self.bring_up(&node).await {
            Ok(()) => {
                if let Err(e) = self.deps.store.set_active_id(Some(&node.id)).await {
                    warn!(error = %e, "failed to persist active profile");
                }
                self.active = Some(node);
                self.tunnel_started = true;
                self.phase = SessionPhase::Running;
                let _ = self.running_tx.send(true);
                self.monitor = Some(monitor::spawn(
                    self.deps.relay.clone(),
                    self.running_tx.subscribe(),
                    self.traffic_tx.clone(),
                    self.config.monitor_period,
                ));
                info!("session running");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "session start failed, rolled back");
                self.last_error = Some(e.to_string());
                self.phase = SessionPhase::Idle;
                let _ = self.running_tx.send(false);
                Err(e)
            }
        }
    }

    /// Relay, then interface, then forwarder. Any failure unwinds what is
    /// already up, in reverse, before returning.
    async fn bring_up(&mut self, node: &NodeProfile) -> Result<(), SessionError> {
        let relay_config = build_config(node, &self.deps.resolver).await?;
        self.deps.relay.start(&relay_config.to_json()).await?;
        self.deps.relay.reset_traffic_stats().await;

        let device = match self.deps.tun.open(&self.config.interface).await {
            Ok(device) => device,
            Err(e) => {
                self.deps.relay.stop().await;
                return Err(e.into());
            }
        };

        match self.start_forwarder(node, device.raw_fd()).await {
            Ok(()) => {
                self.device = Some(device);
                Ok(())
            }
            Err(e) => {
                // stop() is safe even though the forwarder never came up.
                self.deps.tunnel.stop().await;
                self.deps.relay.stop().await;
                drop(device);
                Err(e)
            }
        }
    }

    async fn start_forwarder(&self, node: &NodeProfile, fd: RawFd) -> Result<(), SessionError> {
        let rendered = render_config(&self.config.interface, node.local_port);
        let path = self.config.runtime_dir.join("tproxy.conf");
        if let Err(e) = tokio::fs::create_dir_all(&self.config.runtime_dir).await {
            return Err(SessionError::ConfigWrite(e.to_string()));
        }
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| SessionError::ConfigWrite(e.to_string()))?;

        let code = self.deps.tunnel.start(&path, fd).await;
        if code != 0 {
            return Err(SessionError::Forwarder(code));
        }
        Ok(())
    }

    async fn select_node(&self, node_id: Option<&str>) -> Result<NodeProfile, SessionError> {
        if let Some(id) = node_id {
            return self
                .deps
                .store
                .get(id)
                .await?
                .ok_or_else(|| SessionError::ProfileNotFound(id.to_string()));
        }
        if let Some(id) = self.deps.store.active_id().await? {
            if let Some(node) = self.deps.store.get(&id).await? {
                return Ok(node);
            }
        }
        self.deps
            .store
            .list()
            .await?
            .into_iter()
            .next()
            .ok_or(SessionError::NoProfile)
    }

    async fn handle_switch(&mut self, node_id: &str) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Running {
            warn!("switch requested while not running, ignoring");
            return Ok(());
        }
        let Some(current) = self.active.clone() else {
            warn!("switch requested with no active profile, ignoring");
            return Ok(());
        };

        let node = self
            .deps
            .store
            .get(node_id)
            .await?
            .ok_or_else(|| SessionError::ProfileNotFound(node_id.to_string()))?;
        if node.id == current.id {
            info!("switch requested to the active profile, skipping");
            return Ok(());
        }

        // Keep the bound local port so the interface and forwarder wiring
        // stays valid across the swap.
        let mut effective = node;
        effective.local_port = current.local_port;

        self.phase = SessionPhase::Switching;
        let result = self.restart_relay(&effective).await;

        // Selection bookkeeping moves regardless of restart success; a status
        // surface reads it as the user's choice, not as relay ground truth.
        if let Err(e) = self.deps.store.set_active_id(Some(&effective.id)).await {
            warn!(error = %e, "failed to persist active profile");
        }
        let name = effective.display_name().to_string();
        self.active = Some(effective);
        self.phase = SessionPhase::Running;

        match result {
            Ok(()) => {
                info!(node = %name, "switched relay");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, node = %name, "relay restart failed during switch");
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn restart_relay(&self, node: &NodeProfile) -> Result<(), SessionError> {
        let relay_config = build_config(node, &self.deps.resolver).await?;
        self.deps.relay.stop().await;
        self.deps.relay.start(&relay_config.to_json()).await?;
        self.deps.relay.reset_traffic_stats().await;
        Ok(())
    }

    /// Best-effort teardown: every step runs regardless of the others.
    async fn handle_stop(&mut self) {
        if self.phase == SessionPhase::Idle && self.device.is_none() && !self.tunnel_started {
            let _ = self.running_tx.send(false);
            return;
        }

        info!("stopping session");
        self.phase = SessionPhase::Stopping;

        if let Some(handle) = self.monitor.take() {
            handle.abort();
        }
        let _ = self.traffic_tx.send(None);

        self.deps.tunnel.stop().await;
        self.deps.relay.stop().await;
        // Dropping the device closes the descriptor.
        self.device = None;

        self.tunnel_started = false;
        self.active = None;
        self.phase = SessionPhase::Idle;
        let _ = self.running_tx.send(false);
        info!("session stopped");
    }
}

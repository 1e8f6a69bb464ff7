//! ZeroMQ fan-out of reload signals across instances.
//!
//! Wire format is a two-frame PUB/SUB message: the topic string (what SUB
//! sockets filter on) followed by a MessagePack-encoded [`ReloadSignal`].

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use dynlog_scheduler::{Scheduler, TriggerStore};

use crate::error::PropagateError;
use crate::traits::{reload_scheduler, Propagator};

/// Topic for reload fan-out, used as the ZMQ subscription prefix.
pub const RELOAD_TOPIC: &str = "dynlog.config.reload";

/// Envelope published when the window set changes anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadSignal {
    /// Node that observed the mutation. Informational; reloads are
    /// idempotent so receivers do not filter on it.
    pub origin: Uuid,
    pub at: DateTime<Utc>,
}

impl ReloadSignal {
    pub fn new(origin: Uuid) -> Self {
        Self {
            origin,
            at: Utc::now(),
        }
    }

    /// Two-frame wire form: `[topic, envelope]`.
    pub fn to_frames(&self) -> Result<ZmqMessage, PropagateError> {
        let mut msg = ZmqMessage::from(RELOAD_TOPIC);
        msg.push_back(rmp_serde::to_vec(self)?.into());
        Ok(msg)
    }

    /// Decode from wire form. Peers that inline the topic into a single
    /// frame are not expected, but the envelope is the last frame either
    /// way.
    pub fn from_frames(msg: &ZmqMessage) -> Result<Self, PropagateError> {
        let frames: Vec<_> = msg.iter().collect();
        let envelope = frames
            .last()
            .ok_or_else(|| PropagateError::Transport("empty reload message".to_string()))?;
        Ok(rmp_serde::from_slice(envelope.as_ref())?)
    }
}

/// ZeroMQ endpoint for the reload bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "address", rename_all = "snake_case")]
pub enum BusEndpoint {
    /// Unix domain socket under `/tmp/dynlog/`, for same-host fan-out.
    Ipc(String),

    /// TCP, for fan-out across hosts.
    Tcp { host: String, port: u16 },
}

impl BusEndpoint {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/dynlog/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// IPC sockets are plain files: make sure the directory exists and no
    /// stale socket from a crashed process blocks the bind. No-op for TCP.
    pub fn prepare(&self) -> io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path, "removed stale bus socket"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for BusEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

/// Socket wiring for the bus strategy.
///
/// A deployment with an external XPUB/XSUB forwarder points both endpoints
/// at it and leaves `bind_publisher` off; a direct two-node setup (or a
/// test) binds the publisher on one node and subscribes everyone to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Endpoint for the PUB socket.
    pub publish: BusEndpoint,

    /// Endpoint the SUB socket connects to.
    pub subscribe: BusEndpoint,

    /// Bind instead of connect on the PUB side.
    #[serde(default)]
    pub bind_publisher: bool,
}

struct BusInner {
    config: BusConfig,
    origin: Uuid,
    scheduler: Arc<Scheduler>,
    debounce: Option<Duration>,
    publisher: Mutex<Option<PubSocket>>,
    shutdown: Notify,
}

impl BusInner {
    async fn publish_signal(&self) -> Result<(), PropagateError> {
        let signal = ReloadSignal::new(self.origin);
        let frames = signal.to_frames()?;

        let mut guard = self.publisher.lock().await;
        let socket = guard
            .as_mut()
            .ok_or_else(|| PropagateError::Transport("bus not set up".to_string()))?;
        socket.send(frames).await?;
        debug!(origin = %signal.origin, "published reload signal");
        Ok(())
    }
}

/// Multi-instance strategy: every node publishes a [`ReloadSignal`] when
/// its local store mutates, and every node (the publisher included, via
/// its own subscription) reloads on any signal.
pub struct BusPropagator {
    inner: Arc<BusInner>,
    store: Arc<dyn TriggerStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BusPropagator {
    pub fn new(
        config: BusConfig,
        store: Arc<dyn TriggerStore>,
        scheduler: Arc<Scheduler>,
        debounce: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                origin: Uuid::new_v4(),
                scheduler,
                debounce,
                publisher: Mutex::new(None),
                shutdown: Notify::new(),
            }),
            store,
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn connect_publisher(&self) -> Result<(), PropagateError> {
        let mut socket = PubSocket::new();
        let endpoint = self.inner.config.publish.endpoint();
        if self.inner.config.bind_publisher {
            self.inner.config.publish.prepare()?;
            info!(endpoint = %endpoint, "binding reload PUB socket");
            socket.bind(&endpoint).await?;
        } else {
            info!(endpoint = %endpoint, "connecting reload PUB socket");
            socket.connect(&endpoint).await?;
        }
        *self.inner.publisher.lock().await = Some(socket);
        Ok(())
    }

    async fn spawn_listener(&self) -> Result<JoinHandle<()>, PropagateError> {
        let mut socket = SubSocket::new();
        let endpoint = self.inner.config.subscribe.endpoint();
        info!(endpoint = %endpoint, "connecting reload SUB socket");
        socket.connect(&endpoint).await?;
        socket.subscribe(RELOAD_TOPIC).await?;

        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = socket.recv() => match received {
                        Ok(msg) => match ReloadSignal::from_frames(&msg) {
                            Ok(signal) => {
                                debug!(origin = %signal.origin, sent_at = %signal.at, "reload signal received");
                                reload_scheduler(&inner.scheduler, inner.debounce).await;
                            }
                            Err(err) => warn!(error = %err, "undecodable reload signal dropped"),
                        },
                        Err(err) => {
                            warn!(error = %err, "bus recv error");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    },
                    _ = inner.shutdown.notified() => break,
                }
            }
            info!("bus listener stopped");
        }))
    }

    /// Bridge the local store feed onto the bus, so a mutation through this
    /// node reaches every instance without the mutating code calling
    /// [`Propagator::propagate`] itself.
    fn spawn_store_bridge(&self) -> JoinHandle<()> {
        let mut feed = self.store.watch();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = feed.recv() => match event {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if let Err(err) = inner.publish_signal().await {
                                warn!(error = %err, "failed to publish reload signal");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = inner.shutdown.notified() => break,
                }
            }
            info!("bus store bridge stopped");
        })
    }
}

#[async_trait]
impl Propagator for BusPropagator {
    async fn setup(&self) -> Result<(), PropagateError> {
        self.connect_publisher().await?;
        let listener = self.spawn_listener().await?;
        let bridge = self.spawn_store_bridge();
        let mut tasks = self.tasks.lock().await;
        tasks.push(listener);
        tasks.push(bridge);
        Ok(())
    }

    async fn teardown(&self) {
        self.inner.shutdown.notify_waiters();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        *self.inner.publisher.lock().await = None;
    }

    async fn propagate(&self) -> Result<(), PropagateError> {
        self.inner.publish_signal().await
    }

    fn name(&self) -> &str {
        "bus"
    }
}

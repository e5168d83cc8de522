//! Orchestration facade over the registered backends.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{AdapterError, Result};
use crate::traits::VirtBackend;
use crate::types::{BackendKind, Instance};

/// A single-instance control verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Start,
    Stop,
    Pause,
    Resume,
    Reset,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Pause => "pause",
            Verb::Resume => "resume",
            Verb::Reset => "reset",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Verb::Start),
            "stop" => Ok(Verb::Stop),
            "pause" => Ok(Verb::Pause),
            "resume" => Ok(Verb::Resume),
            "reset" => Ok(Verb::Reset),
            other => Err(format!("unknown verb: {}", other)),
        }
    }
}

/// One backend's slice of a refresh.
#[derive(Debug, Clone, Default)]
pub struct BackendInventory {
    pub available: bool,
    pub instances: Vec<Instance>,
}

/// Result of one full refresh, keyed by backend.
pub type InventorySnapshot = BTreeMap<BackendKind, BackendInventory>;

/// Single entry point the surrounding application drives.
///
/// Holds the adapters constructed once at process start; fans "refresh all"
/// out to every backend and fans single-instance commands in to the one
/// backend the caller names.
pub struct Orchestrator {
    backends: Vec<Arc<dyn VirtBackend>>,
}

impl Orchestrator {
    pub fn new(backends: Vec<Arc<dyn VirtBackend>>) -> Self {
        Self { backends }
    }

    /// The adapter for `kind`, if one was registered.
    pub fn backend(&self, kind: BackendKind) -> Option<Arc<dyn VirtBackend>> {
        self.backends.iter().find(|b| b.kind() == kind).cloned()
    }

    /// Query every backend concurrently and collect the combined inventory.
    ///
    /// An unavailable backend contributes an empty, unavailable entry; a
    /// backend whose listing fails degrades the same way instead of sinking
    /// the whole refresh. Total latency is bounded by the slowest backend,
    /// not their sum.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> InventorySnapshot {
        let queries = self.backends.iter().map(|backend| {
            let backend = Arc::clone(backend);
            async move {
                let available = backend.is_available();
                let instances = if available {
                    match backend.list(true).await {
                        Ok(instances) => instances,
                        Err(e) => {
                            warn!(backend = %backend.kind(), error = %e, "Inventory query failed");
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                };

                (backend.kind(), BackendInventory { available, instances })
            }
        });

        let snapshot: InventorySnapshot = join_all(queries).await.into_iter().collect();
        debug!(
            backends = snapshot.len(),
            instances = snapshot.values().map(|b| b.instances.len()).sum::<usize>(),
            "Inventory refreshed"
        );
        snapshot
    }

    /// Spawn the background auto-refresh worker.
    ///
    /// Fire-and-forget: snapshots are posted over the channel on every tick
    /// and the worker exits when the receiver is dropped. The interaction
    /// surface never waits on it.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        interval: Duration,
        tx: mpsc::Sender<InventorySnapshot>,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = orchestrator.refresh_all().await;
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Apply a control verb to one instance of one backend.
    ///
    /// `kind` is required input: instance identifiers are not globally
    /// unique and the facade never guesses by probing all backends.
    #[instrument(skip(self), fields(backend = %kind, verb = %verb))]
    pub async fn act(&self, kind: BackendKind, target: &str, verb: Verb) -> Result<()> {
        let backend = self
            .backend(kind)
            .ok_or(AdapterError::Unavailable(kind))?;

        // The UI only knows VirtualBox machines by display name; map it to
        // the native UUID through a fresh listing before dispatch.
        let id = if kind == BackendKind::VirtualBox {
            let instances = backend.list(true).await?;
            instances
                .iter()
                .find(|i| i.name == target || i.id == target)
                .map(|i| i.id.clone())
                .ok_or_else(|| AdapterError::NotFound(target.to_string()))?
        } else {
            target.to_string()
        };

        match verb {
            Verb::Start => backend.start(&id).await,
            Verb::Stop => backend.stop(&id).await,
            Verb::Pause => backend.pause(&id).await,
            Verb::Resume => backend.resume(&id).await,
            Verb::Reset => backend.reset(&id).await,
        }
    }
}

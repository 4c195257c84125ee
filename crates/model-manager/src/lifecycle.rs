//! Lifecycle management for the serving model
//!
//! This module owns the readiness state machine:
//! `Uninitialized -> Loading -> Ready | Failed`, with an explicit reload
//! re-entering `Loading` from `Ready` or `Failed`.
//!
//! The state and the model handle are published together as one
//! [`ServingSnapshot`] through a watch channel, so readers never observe a
//! `Ready` state without its model. Only one load runs at a time; a caller that
//! loses the race observes the in-flight transition instead of starting another.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::utils::format_duration;
use common::{ModelReference, Result, ServingError, ServingState};

use crate::loader::{LoadedModel, ModelLoader};
use crate::resolver::ArtifactResolver;

/// Point-in-time view of the lifecycle
#[derive(Debug, Clone)]
pub struct ServingSnapshot {
    pub state: ServingState,
    /// Present exactly when `state` is `Ready`
    pub model: Option<Arc<LoadedModel>>,
    /// Cause of the most recent failed load
    pub last_error: Option<ServingError>,
    pub transitioned_at: DateTime<Utc>,
    /// Number of load attempts started so far
    pub generation: u64,
}

impl ServingSnapshot {
    fn initial() -> Self {
        Self {
            state: ServingState::Uninitialized,
            model: None,
            last_error: None,
            transitioned_at: Utc::now(),
            generation: 0,
        }
    }

    /// Returns true if a model is loaded and serving
    pub fn is_ready(&self) -> bool {
        self.state.is_ready() && self.model.is_some()
    }
}

/// Lifecycle manager for the single serving model
pub struct LifecycleManager {
    /// Artifact to serve
    reference: ModelReference,

    resolver: Arc<ArtifactResolver>,

    loader: ModelLoader,

    /// Published state
    snapshot: watch::Sender<ServingSnapshot>,

    /// Held for the duration of a load
    transition_lock: Mutex<()>,
}

impl LifecycleManager {
    /// Creates a new lifecycle manager in the `Uninitialized` state
    pub fn new(reference: ModelReference, resolver: Arc<ArtifactResolver>, loader: ModelLoader) -> Self {
        let (snapshot, _) = watch::channel(ServingSnapshot::initial());
        Self {
            reference,
            resolver,
            loader,
            snapshot,
            transition_lock: Mutex::new(()),
        }
    }

    pub fn reference(&self) -> &ModelReference {
        &self.reference
    }

    /// Returns the current snapshot without blocking
    pub fn current(&self) -> ServingSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Returns the current state without blocking
    pub fn state(&self) -> ServingState {
        self.snapshot.borrow().state
    }

    /// Subscribes to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<ServingSnapshot> {
        self.snapshot.subscribe()
    }

    /// Performs the initial load
    ///
    /// Only acts from `Uninitialized`; from any other state the current
    /// snapshot is returned unchanged.
    pub async fn start(&self) -> ServingSnapshot {
        let Ok(_guard) = self.transition_lock.try_lock() else {
            debug!("Start requested while a load is in flight");
            return self.observe_in_flight().await;
        };

        // Re-check under the lock. `Loading` here means an earlier load was
        // dropped before it published an outcome.
        let current = self.current();
        match current.state {
            ServingState::Uninitialized => {}
            ServingState::Loading => warn!(generation = current.generation, "Restarting an interrupted load"),
            _ => {
                debug!(state = %current.state, "Ignoring start, model already initialized");
                return current;
            }
        }

        self.run_load("start").await
    }

    /// Reloads the configured artifact
    ///
    /// Acts from `Ready` or `Failed`, and behaves like [`start`](Self::start)
    /// from `Uninitialized`. While a load is in flight the in-flight snapshot
    /// is returned instead of starting a second load.
    pub async fn reload(&self) -> ServingSnapshot {
        let Ok(_guard) = self.transition_lock.try_lock() else {
            debug!("Reload requested while a load is in flight");
            return self.observe_in_flight().await;
        };

        let current = self.current();
        if current.state == ServingState::Loading {
            warn!(generation = current.generation, "Restarting an interrupted load");
        }

        self.run_load("reload").await
    }

    /// Runs [`start`](Self::start) on a background task
    pub fn spawn_start(self: &Arc<Self>) -> JoinHandle<ServingSnapshot> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.start().await })
    }

    /// Runs [`reload`](Self::reload) on a background task
    pub fn spawn_reload(self: &Arc<Self>) -> JoinHandle<ServingSnapshot> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.reload().await })
    }

    /// Waits until a model is ready
    ///
    /// Returns `LoadFailed` at once if the last load failed, and `NotReady` if
    /// `timeout` elapses first. A zero timeout checks the current state only.
    pub async fn await_ready(&self, timeout: Duration) -> Result<Arc<LoadedModel>> {
        let mut rx = self.snapshot.subscribe();

        let wait = async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    match (&snapshot.state, &snapshot.model) {
                        (ServingState::Ready, Some(model)) => return Ok(Arc::clone(model)),
                        (ServingState::Failed, _) => return Err(load_failed(&snapshot)),
                        _ => {}
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(ServingError::NotReady("Lifecycle manager shut down".to_string()));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ServingError::NotReady(format!(
                "Model state is {} after waiting {}",
                self.state(),
                format_duration(timeout)
            ))),
        }
    }

    /// Waits until the winner of a transition race has published `Loading`
    async fn observe_in_flight(&self) -> ServingSnapshot {
        let mut rx = self.snapshot.subscribe();
        let snapshot = match rx.wait_for(|s| s.state != ServingState::Uninitialized).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.current(),
        };
        snapshot
    }

    /// Resolves and loads the artifact, publishing each transition
    ///
    /// Must be called with the transition lock held.
    async fn run_load(&self, trigger: &str) -> ServingSnapshot {
        let previous = self.current();
        let generation = previous.generation + 1;

        self.publish(ServingSnapshot {
            state: ServingState::Loading,
            model: None,
            last_error: previous.last_error,
            transitioned_at: Utc::now(),
            generation,
        });
        info!(
            trigger,
            generation,
            version = %self.reference.version,
            "Model state {} -> {}",
            previous.state,
            ServingState::Loading
        );

        let started = std::time::Instant::now();
        let outcome = match self.resolver.resolve(&self.reference).await {
            Ok(artifact) => self.loader.load(&artifact).await,
            Err(e) => Err(e),
        };
        let elapsed = format_duration(started.elapsed());

        let snapshot = match outcome {
            Ok(model) => {
                info!(
                    generation,
                    version = %model.version(),
                    elapsed = %elapsed,
                    "Model state {} -> {}",
                    ServingState::Loading,
                    ServingState::Ready
                );
                ServingSnapshot {
                    state: ServingState::Ready,
                    model: Some(Arc::new(model)),
                    last_error: None,
                    transitioned_at: Utc::now(),
                    generation,
                }
            }
            Err(e) => {
                error!(
                    generation,
                    code = %e.code(),
                    elapsed = %elapsed,
                    "Failed to load model {}: {}",
                    self.reference,
                    e
                );
                warn!("Model state {} -> {}", ServingState::Loading, ServingState::Failed);
                ServingSnapshot {
                    state: ServingState::Failed,
                    model: None,
                    last_error: Some(e),
                    transitioned_at: Utc::now(),
                    generation,
                }
            }
        };

        self.publish(snapshot.clone());
        snapshot
    }

    fn publish(&self, snapshot: ServingSnapshot) {
        self.snapshot.send_replace(snapshot);
    }
}

fn load_failed(snapshot: &ServingSnapshot) -> ServingError {
    let cause = snapshot
        .last_error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown cause".to_string());
    ServingError::LoadFailed(cause)
}

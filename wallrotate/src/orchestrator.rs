//! The update loop and its start/stop control.
//!
//! One background task at a time picks a random enabled source, runs its
//! handler, and sleeps for `check_interval`. Cancellation is cooperative:
//! handlers check the token between steps, child processes are killed when it
//! fires, and the interval sleep wakes as soon as it is raised.

use crate::config::{Config, ConfigStore, Source};
use crate::error::{Result, WallError};
use crate::events::{EventSender, UpdateEvent};
use crate::sources::WallpaperItem;
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex as SyncMutex;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const EMPTY_SELECTION_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// What a handler sees for one cycle: the configuration as reloaded at the
/// top of the cycle, and the run's cancel token.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub config: Config,
    pub cancel: CancellationToken,
}

impl CycleContext {
    /// Fails with `Cancelled` once the run has been asked to stop. Called
    /// before every externally visible step.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(WallError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Awaits `fut` unless the run is cancelled first.
    pub async fn cancellable<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(WallError::Cancelled),
            out = fut => out,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub applied: Option<WallpaperItem>,
    pub cleaned: usize,
    /// Why nothing was applied, when nothing was.
    pub note: Option<String>,
}

/// Runs one source's fetch/save/apply/cleanup sequence.
pub trait SourceDispatch: Send + Sync + 'static {
    fn run(
        &self,
        source: Source,
        ctx: &CycleContext,
    ) -> impl Future<Output = Result<CycleOutcome>> + Send;

    /// Terminates external helpers the handlers may have left behind.
    fn release(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The task observed the signal and exited in time.
    Graceful,
    /// The timeout elapsed; the task was aborted and shutdown went ahead.
    Forced,
    NotRunning,
}

/// A spawned update loop.
#[derive(Debug)]
pub struct RunHandle {
    id: u64,
    cancel: CancellationToken,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Raises the cancel signal and waits up to `timeout` for the loop to
    /// exit. Calling it again, or concurrently, returns `NotRunning` at once.
    pub async fn stop(&self, timeout: Duration) -> StopOutcome {
        self.cancel.cancel();
        let Some(mut task) = self.task.lock().take() else {
            return StopOutcome::NotRunning;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => StopOutcome::Graceful,
            Ok(Err(e)) => {
                if e.is_panic() {
                    error!("Update run #{} panicked: {}", self.id, e);
                }
                StopOutcome::Graceful
            }
            Err(_) => {
                warn!(
                    "Update run #{} did not stop within {:?}, forcing shutdown",
                    self.id, timeout
                );
                task.abort();
                // Aborting lands at the task's next await point.
                let _ = tokio::time::timeout(ABORT_GRACE, task).await;
                StopOutcome::Forced
            }
        }
    }
}

pub struct Orchestrator<D> {
    store: Arc<ConfigStore>,
    dispatch: Arc<D>,
    events: EventSender,
    active: Mutex<Option<Arc<RunHandle>>>,
    stop_timeout: Duration,
    idle_backoff: Duration,
    next_run: AtomicU64,
    shutdown_requested: AtomicBool,
}

impl<D: SourceDispatch> Orchestrator<D> {
    pub fn new(store: Arc<ConfigStore>, dispatch: Arc<D>, events: EventSender) -> Self {
        Orchestrator {
            store,
            dispatch,
            events,
            active: Mutex::new(None),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            idle_backoff: EMPTY_SELECTION_BACKOFF,
            next_run: AtomicU64::new(1),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// How long the loop waits before re-checking when no source is selected.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Persists `sources` as the selection and spawns a new update loop,
    /// stopping any run that is still active first.
    pub async fn start(&self, sources: BTreeSet<Source>) -> Result<Arc<RunHandle>> {
        if sources.is_empty() {
            return Err(WallError::InvalidSelection);
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!("Stopping update run #{} before starting a new one", previous.id());
            previous.stop(self.stop_timeout).await;
        }

        self.store
            .update(|c| {
                c.enabled_sources = sources.clone();
                c.running = true;
            })
            .await?;

        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            id,
            self.store.clone(),
            self.dispatch.clone(),
            cancel.clone(),
            self.events.clone(),
            self.idle_backoff,
        ));
        let handle = Arc::new(RunHandle {
            id,
            cancel,
            task: SyncMutex::new(Some(task)),
        });
        *active = Some(handle.clone());
        info!(
            "Wallpaper update run #{} started with sources {:?}",
            id, sources
        );
        Ok(handle)
    }

    /// Stops the active run, if any, and persists `running = false`.
    pub async fn stop(&self) -> StopOutcome {
        let handle = self.active.lock().await.take();
        let outcome = match handle {
            Some(handle) => handle.stop(self.stop_timeout).await,
            None => StopOutcome::NotRunning,
        };
        if let Err(e) = self.store.update(|c| c.running = false).await {
            error!("Failed to persist stopped state: {}", e);
        }
        info!("Wallpaper update process stopped.");
        outcome
    }

    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.is_alive())
    }

    /// Process-exit path: cancel, kill external helpers, bounded join, kill
    /// again, and persist whether a run was active so it resumes next launch.
    /// Only the first call does anything.
    pub async fn request_shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Initiating shutdown sequence");

        let handle = self.active.lock().await.take();
        let was_running = handle.as_ref().is_some_and(|h| h.is_alive());
        if let Some(handle) = &handle {
            handle.cancel();
        }
        self.dispatch.release().await;
        if let Some(handle) = handle {
            handle.stop(self.stop_timeout).await;
        }
        self.dispatch.release().await;

        if let Err(e) = self.store.update(|c| c.running = was_running).await {
            error!("Failed to persist configuration at shutdown: {}", e);
        }
    }
}

/// Uniform choice over the selected sources.
pub fn pick_source<R: Rng + ?Sized>(sources: &BTreeSet<Source>, rng: &mut R) -> Option<Source> {
    sources.iter().copied().choose(rng)
}

/// Sleeps for `duration` unless cancelled. Returns false when cancelled.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

async fn run_loop<D: SourceDispatch>(
    id: u64,
    store: Arc<ConfigStore>,
    dispatch: Arc<D>,
    cancel: CancellationToken,
    events: EventSender,
    idle_backoff: Duration,
) {
    let mut rng = StdRng::from_entropy();
    let _ = events.send(UpdateEvent::Started { run: id });

    while !cancel.is_cancelled() {
        let config = store.load().await;

        let Some(source) = pick_source(&config.enabled_sources, &mut rng) else {
            warn!("No sources selected in current iteration");
            let _ = events.send(UpdateEvent::Idle);
            if !pause(&cancel, idle_backoff).await {
                break;
            }
            continue;
        };

        info!(
            "Randomly chosen source: {} from {:?}",
            source, config.enabled_sources
        );
        let _ = events.send(UpdateEvent::CycleStarted { source });

        let interval = config.check_interval;
        let ctx = CycleContext {
            config,
            cancel: cancel.clone(),
        };
        let result = AssertUnwindSafe(dispatch.run(source, &ctx))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => match outcome.applied {
                Some(item) => {
                    let _ = events.send(UpdateEvent::Applied { item });
                }
                None => {
                    let reason = outcome.note.unwrap_or_else(|| "no new wallpaper".to_string());
                    let _ = events.send(UpdateEvent::NothingApplied { source, reason });
                }
            },
            Ok(Err(WallError::Cancelled)) => {
                debug!("{} handler observed cancellation", source);
                break;
            }
            Ok(Err(e)) => {
                error!("{} update failed: {}", source, e);
                let _ = events.send(UpdateEvent::CycleFailed {
                    source,
                    error: e.to_string(),
                });
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("{} handler panicked: {}", source, message);
                let _ = events.send(UpdateEvent::CycleFailed {
                    source,
                    error: message,
                });
            }
        }

        info!("Sleeping for {} seconds before the next update.", interval);
        let _ = events.send(UpdateEvent::Sleeping { seconds: interval });
        if !pause(&cancel, Duration::from_secs(interval)).await {
            break;
        }
    }

    info!("Wallpaper update run #{} exited", id);
    let _ = events.send(UpdateEvent::Stopped { run: id });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

use crate::credentials::CredentialStore;
use crate::events::{EventReceiver, LoggedEvent, UpdateEvent};
use crate::orchestrator::Orchestrator;
use crate::sources::{SourceRouter, WallpaperItem};
use chrono::Local;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

pub const RECENT_EVENTS: usize = 200;

pub struct AppState<D = SourceRouter> {
    pub orchestrator: Orchestrator<D>,
    pub credentials: Arc<CredentialStore>,
    pub app_data_dir: PathBuf,
    recent: Mutex<VecDeque<LoggedEvent>>,
    last_applied: Mutex<Option<WallpaperItem>>,
}

impl<D> AppState<D> {
    pub fn new(
        orchestrator: Orchestrator<D>,
        credentials: Arc<CredentialStore>,
        app_data_dir: PathBuf,
    ) -> Self {
        AppState {
            orchestrator,
            credentials,
            app_data_dir,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS)),
            last_applied: Mutex::new(None),
        }
    }

    /// Stamps `event` and appends it to the ring, dropping the oldest entry
    /// once the ring is full.
    pub fn record(&self, event: UpdateEvent) {
        if let UpdateEvent::Applied { item } = &event {
            *self.last_applied.lock() = Some(item.clone());
        }
        let mut recent = self.recent.lock();
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(LoggedEvent {
            at: Local::now(),
            event,
        });
    }

    /// Newest first.
    pub fn recent_events(&self) -> Vec<LoggedEvent> {
        self.recent.lock().iter().rev().cloned().collect()
    }

    pub fn last_applied(&self) -> Option<WallpaperItem> {
        self.last_applied.lock().clone()
    }
}

/// Moves events from the update loop into `state` until every sender is gone.
pub async fn drain_events<D>(state: Arc<AppState<D>>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        log::debug!("Update event: {}", event);
        state.record(event);
    }
}

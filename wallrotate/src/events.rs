//! Progress reports from the update loop to whoever is watching it.

use crate::config::Source;
use crate::sources::WallpaperItem;
use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<UpdateEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<UpdateEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone)]
pub enum UpdateEvent {
    Started { run: u64 },
    CycleStarted { source: Source },
    Applied { item: WallpaperItem },
    NothingApplied { source: Source, reason: String },
    CycleFailed { source: Source, error: String },
    /// No sources are selected right now; the loop keeps polling.
    Idle,
    Sleeping { seconds: u64 },
    Stopped { run: u64 },
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateEvent::Started { run } => write!(f, "update run #{} started", run),
            UpdateEvent::CycleStarted { source } => write!(f, "selected {}", source),
            UpdateEvent::Applied { item } => write!(
                f,
                "applied {} wallpaper {} ({})",
                item.source,
                item.identifier,
                item.local_path.display()
            ),
            UpdateEvent::NothingApplied { source, reason } => {
                write!(f, "{}: nothing applied, {}", source, reason)
            }
            UpdateEvent::CycleFailed { source, error } => write!(f, "{} failed: {}", source, error),
            UpdateEvent::Idle => f.write_str("no sources selected, waiting"),
            UpdateEvent::Sleeping { seconds } => write!(f, "sleeping {}s", seconds),
            UpdateEvent::Stopped { run } => write!(f, "update run #{} stopped", run),
        }
    }
}

/// An event stamped with the time the foreground received it.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub at: DateTime<Local>,
    pub event: UpdateEvent,
}

impl fmt::Display for LoggedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.event)
    }
}

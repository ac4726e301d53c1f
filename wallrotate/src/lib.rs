//! Background wallpaper rotator.
//!
//! An [`orchestrator::Orchestrator`] runs one cancellable update loop that
//! picks a random enabled source each cycle, applies what it fetched and
//! trims old downloads. The daemon binary wraps it with a local HTTP panel.

pub mod autostart;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod file_manager;
pub mod logger;
pub mod orchestrator;
pub mod process;
pub mod retention;
pub mod sources;
pub mod state;
pub mod wallpaper;
pub mod web_server;

pub use error::{Result, WallError};

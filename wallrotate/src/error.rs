//! Error type shared by every wallpaper source and the update loop.
//!
//! None of these escape a single source-handler invocation: the orchestrator
//! logs them and moves on to the next cycle. Only `InvalidSelection` is
//! surfaced to the caller, synchronously, by `Orchestrator::start`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WallError {
    /// `start` was called with no sources selected.
    #[error("No sources selected")]
    InvalidSelection,
    /// Missing or corrupt configuration store, or a missing API key.
    #[error("Configuration error: {0}")]
    Config(String),
    /// HTTP request failed or returned a non-success status.
    #[error("Network error: {0}")]
    Network(String),
    /// The workshop credential pool is empty.
    #[error("No downloader credentials configured")]
    NoCredentials,
    /// A fetch completed but yielded nothing usable.
    #[error("No results: {0}")]
    NoResults(String),
    /// An external tool was not found or exited unsuccessfully.
    #[error("Process error: {0}")]
    Process(String),
    /// Permission or IO failure while saving or cleaning up.
    #[error("File system error: {0}")]
    FileSystem(String),
    /// The cancel signal was observed before the next side effect.
    #[error("Cancelled")]
    Cancelled,
}

impl WallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for WallError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem(err.to_string())
    }
}

impl From<reqwest::Error> for WallError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for WallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_selection_display() {
        assert_eq!(WallError::InvalidSelection.to_string(), "No sources selected");
    }

    #[test]
    fn test_io_error_maps_to_file_system() {
        let err: WallError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, WallError::FileSystem(ref msg) if msg.contains("denied")));
    }

    #[test]
    fn test_json_error_maps_to_config() {
        let err: WallError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, WallError::Config(_)));
    }

    #[test]
    fn test_cancelled_is_flagged() {
        assert!(WallError::Cancelled.is_cancelled());
        assert!(!WallError::NoCredentials.is_cancelled());
    }
}

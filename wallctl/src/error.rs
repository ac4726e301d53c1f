//! CLI error types.

use std::fmt;

#[derive(Debug)]
pub enum CliError {
    /// Nothing is listening on the panel port.
    DaemonNotRunning(String),
    /// The daemon answered with a non-success status.
    Rejected(String),
    Request(reqwest::Error),
    Browser(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DaemonNotRunning(url) => {
                write!(f, "wallrotate is not reachable at {url}. Is the daemon running?")
            }
            Self::Rejected(msg) => write!(f, "{msg}"),
            Self::Request(err) => write!(f, "request failed: {err}"),
            Self::Browser(err) => write!(f, "failed to open browser: {err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<reqwest::Error> for CliError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err)
    }
}

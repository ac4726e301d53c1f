//! API keys and workshop downloader accounts.
//!
//! Secrets live in `<app-data>/.env` rather than in `config.json` so the
//! config file can be shown in the control panel. Values missing from the
//! file fall back to the process environment.

use crate::error::{Result, WallError};
use log::{info, warn};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

pub mod keys {
    pub const UNSPLASH_ACCESS_KEY: &str = "UNSPLASH_ACCESS_KEY";
    pub const PEXELS_API_KEY: &str = "PEXELS_API_KEY";
    pub const USERNAMES: &str = "USERNAMES";
    pub const PASSWORDS: &str = "PASSWORDS";
}

const ENV_TEMPLATE: &str = "# Add your API keys below\nUNSPLASH_ACCESS_KEY=\nPEXELS_API_KEY=\n# Comma separated, paired by position\nUSERNAMES=\nPASSWORDS=\n";

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Username/password pairs for the workshop downloader, paired by index.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    pairs: Vec<Credential>,
}

impl CredentialPool {
    pub fn from_lists(usernames: &str, passwords: &str) -> Self {
        let users: Vec<&str> = split_list(usernames);
        let pass: Vec<&str> = split_list(passwords);
        if users.len() != pass.len() {
            warn!(
                "{} usernames but {} passwords configured; extra entries are ignored",
                users.len(),
                pass.len()
            );
        }
        let pairs = users
            .into_iter()
            .zip(pass)
            .map(|(u, p)| Credential {
                username: u.to_string(),
                password: p.to_string(),
            })
            .collect();
        CredentialPool { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Credential> {
        if self.pairs.is_empty() {
            return Err(WallError::NoCredentials);
        }
        Ok(&self.pairs[rng.gen_range(0..self.pairs.len())])
    }
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub unsplash_key: Option<String>,
    pub pexels_key: Option<String>,
    pub pool: CredentialPool,
}

impl Credentials {
    /// Reads `env_path`, creating an empty template there if it is missing.
    pub fn load(env_path: &Path) -> Self {
        if !env_path.exists() {
            match std::fs::write(env_path, ENV_TEMPLATE) {
                Ok(()) => info!("Created credentials template at {}", env_path.display()),
                Err(e) => warn!("Could not create {}: {}", env_path.display(), e),
            }
        }
        let vars = parse_env_file(env_path);
        Self::from_vars(|key| {
            vars.get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let creds = Credentials {
            unsplash_key: non_empty(keys::UNSPLASH_ACCESS_KEY),
            pexels_key: non_empty(keys::PEXELS_API_KEY),
            pool: CredentialPool::from_lists(
                &lookup(keys::USERNAMES).unwrap_or_default(),
                &lookup(keys::PASSWORDS).unwrap_or_default(),
            ),
        };
        if creds.unsplash_key.is_none() {
            warn!("Unsplash access key is missing");
        }
        if creds.pexels_key.is_none() {
            warn!("Pexels API key is missing");
        }
        creds
    }
}

fn parse_env_file(path: &Path) -> HashMap<String, String> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.filter_map(std::result::Result::ok).collect(),
        Err(e) => {
            if path.exists() {
                warn!("Failed to read env file {}: {}", path.display(), e);
            }
            HashMap::new()
        }
    }
}

/// Replacement values for `.env`. Fields left out keep their current value.
#[derive(Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsplash_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pexels_api_key: Option<String>,
    /// Comma separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usernames: Option<String>,
    /// Comma separated, paired with `usernames` by position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passwords: Option<String>,
}

impl fmt::Debug for CredentialsUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsUpdate")
            .field("unsplash_access_key", &self.unsplash_access_key.as_ref().map(|_| "***"))
            .field("pexels_api_key", &self.pexels_api_key.as_ref().map(|_| "***"))
            .field("usernames", &self.usernames)
            .field("passwords", &self.passwords.as_ref().map(|_| "***"))
            .finish()
    }
}

impl CredentialsUpdate {
    fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            (keys::UNSPLASH_ACCESS_KEY, &self.unsplash_access_key),
            (keys::PEXELS_API_KEY, &self.pexels_api_key),
            (keys::USERNAMES, &self.usernames),
            (keys::PASSWORDS, &self.passwords),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v.trim())))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// What the control panel may show about the secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub unsplash_key: bool,
    pub pexels_key: bool,
    pub accounts: usize,
}

/// The `.env` file and its parsed contents, shared by the source handlers
/// and the control panel. Handlers read `current()` at the start of each
/// cycle, so an update applies from the next one.
pub struct CredentialStore {
    path: PathBuf,
    current: RwLock<Arc<Credentials>>,
    write: Mutex<()>,
}

impl CredentialStore {
    /// Loads `path`, creating the template there if it is missing.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let credentials = Credentials::load(&path);
        Self::with_credentials(path, credentials)
    }

    /// A store backed by `path` that starts from `credentials` instead of
    /// reading the file.
    pub fn with_credentials(path: impl Into<PathBuf>, credentials: Credentials) -> Self {
        CredentialStore {
            path: path.into(),
            current: RwLock::new(Arc::new(credentials)),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<Credentials> {
        self.current.read().clone()
    }

    pub fn summary(&self) -> CredentialSummary {
        let current = self.current();
        CredentialSummary {
            unsplash_key: current.unsplash_key.is_some(),
            pexels_key: current.pexels_key.is_some(),
            accounts: current.pool.len(),
        }
    }

    /// Merges `update` into the `.env` file, keeping unrelated lines and
    /// comments, then reloads from it.
    pub async fn update(&self, update: &CredentialsUpdate) -> Result<CredentialSummary> {
        let entries = update.entries();
        if entries.is_empty() {
            return Err(WallError::Config("No credentials given".to_string()));
        }
        if let Some((key, _)) = entries.iter().find(|(_, v)| v.contains(['\n', '\r'])) {
            return Err(WallError::Config(format!("{} must be a single line", key)));
        }

        let _write = self.write.lock().await;
        let existing = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let merged = merge_env(&existing, &entries);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("env.tmp");
        fs::write(&tmp, merged).await?;
        fs::rename(&tmp, &self.path).await?;

        let path = self.path.clone();
        let reloaded = tokio::task::spawn_blocking(move || Credentials::load(&path))
            .await
            .map_err(|e| WallError::Config(format!("Credential reload failed: {}", e)))?;
        *self.current.write() = Arc::new(reloaded);
        info!("Credentials saved to {}", self.path.display());
        Ok(self.summary())
    }
}

/// Rewrites the `KEY=` lines named in `entries` and appends the ones that
/// were not present.
fn merge_env(existing: &str, entries: &[(&str, &str)]) -> String {
    let mut pending: Vec<(&str, &str)> = entries.to_vec();
    let mut out = String::with_capacity(existing.len() + 64);
    for line in existing.lines() {
        let key = line
            .trim_start()
            .trim_start_matches("export ")
            .split('=')
            .next()
            .unwrap_or_default()
            .trim();
        match pending.iter().position(|(k, _)| *k == key) {
            Some(i) if !line.trim_start().starts_with('#') => {
                let (key, value) = pending.remove(i);
                out.push_str(&env_line(key, value));
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    for (key, value) in pending {
        out.push_str(&env_line(key, value));
        out.push('\n');
    }
    out
}

/// `KEY='value'`, or a double-quoted escaped value when it holds a single
/// quote. Quoting keeps `#`, spaces and `$` literal.
fn env_line(key: &str, value: &str) -> String {
    if value.is_empty() {
        return format!("{}=", key);
    }
    if !value.contains('\'') {
        return format!("{}='{}'", key, value);
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("{}=\"{}\"", key, escaped)
}

use crate::error::{Result, WallError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::sync::Mutex;

pub const PAGE_PLACEHOLDER: &str = "{page}";
const DEFAULT_COLLECTIONS_URL: &str = "https://steamcommunity.com/workshop/browse/?appid=431960&browsesort=trend&section=readytouseitems&actualsort=trend&p={page}";

/// A wallpaper provider. Each variant maps to one handler in `sources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Unsplash,
    Pexels,
    #[serde(alias = "wallpaper_engine")]
    Workshop,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Unsplash, Source::Pexels, Source::Workshop];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Unsplash => "unsplash",
            Source::Pexels => "pexels",
            Source::Workshop => "workshop",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unsplash" => Ok(Source::Unsplash),
            "pexels" => Ok(Source::Pexels),
            "workshop" | "wallpaper_engine" => Ok(Source::Workshop),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub save_location: PathBuf,
    /// Seconds between cycles.
    pub check_interval: u64,
    pub max_wallpapers: usize,
    pub download_limit: usize,
    /// Workshop listing URL; `{page}` is replaced with a random page number.
    pub collections_url: String,
    pub enabled_sources: BTreeSet<Source>,
    /// Keep old wallpapers instead of running retention.
    pub persist_old: bool,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloader_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            save_location: home_dir().join("WallRotate"),
            check_interval: 300,
            max_wallpapers: 1,
            download_limit: 1,
            collections_url: DEFAULT_COLLECTIONS_URL.to_string(),
            enabled_sources: BTreeSet::new(),
            persist_old: false,
            running: false,
            downloader_path: None,
        }
    }
}

impl Config {
    /// Clamps numeric fields that must be at least one.
    pub fn validated(mut self) -> Self {
        if self.check_interval == 0 {
            warn!("check_interval must be at least 1 second, using 1");
            self.check_interval = 1;
        }
        if self.max_wallpapers == 0 {
            warn!("max_wallpapers must be at least 1, using 1");
            self.max_wallpapers = 1;
        }
        if self.download_limit == 0 {
            warn!("download_limit must be at least 1, using 1");
            self.download_limit = 1;
        }
        self
    }

    pub fn collections_page_url(&self, page: u32) -> String {
        self.collections_url.replace(PAGE_PLACEHOLDER, &page.to_string())
    }

    pub fn unsplash_dir(&self) -> PathBuf {
        self.save_location.join("unsplash_wallpapers")
    }

    pub fn pexels_dir(&self) -> PathBuf {
        self.save_location.join("pexels_wallpapers")
    }

    pub fn workshop_dir(&self) -> PathBuf {
        self.save_location.join("projects").join("myprojects")
    }

    pub fn history_path(&self) -> PathBuf {
        self.save_location.join("wallpaper_history.json")
    }
}

fn home_dir() -> PathBuf {
    std::env::var("USERPROFILE")
        .or_else(|_| std::env::var("HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Persisted configuration guarded by a single lock.
///
/// Every load, save and read-modify-write goes through the same mutex so the
/// control panel and the update loop never interleave partial writes.
pub struct ConfigStore {
    path: PathBuf,
    cache: Mutex<Config>,
}

impl ConfigStore {
    /// Opens the store, writing defaults when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let store = ConfigStore {
            path: path.into(),
            cache: Mutex::new(Config::default()),
        };
        store.load().await;
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file. Malformed content is logged and the last good copy
    /// is returned instead.
    pub async fn load(&self) -> Config {
        let mut cache = self.cache.lock().await;
        match read_config(&self.path).await {
            Ok(Some(config)) => {
                *cache = config;
            }
            Ok(None) => {
                info!("No config at {}, writing defaults", self.path.display());
                if let Err(e) = write_config(&self.path, &cache).await {
                    error!("Failed to write default config: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to load config {}: {}", self.path.display(), e);
            }
        }
        cache.clone()
    }

    /// Last successfully loaded or saved configuration, without touching disk.
    pub async fn snapshot(&self) -> Config {
        self.cache.lock().await.clone()
    }

    /// Loads, applies `mutate`, validates and saves, all under one lock.
    pub async fn update<F>(&self, mutate: F) -> Result<Config>
    where
        F: FnOnce(&mut Config),
    {
        let mut cache = self.cache.lock().await;
        let mut config = match read_config(&self.path).await {
            Ok(Some(config)) => config,
            Ok(None) => cache.clone(),
            Err(e) => {
                warn!("Config unreadable before update, using last good copy: {}", e);
                cache.clone()
            }
        };
        mutate(&mut config);
        let config = config.validated();
        write_config(&self.path, &config).await?;
        *cache = config.clone();
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let config = config.clone().validated();
        write_config(&self.path, &config).await?;
        *cache = config;
        info!("Configuration saved.");
        Ok(())
    }
}

async fn read_config(path: &Path) -> Result<Option<Config>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WallError::Config(e.to_string())),
    };
    let config: Config = serde_json::from_str(&text)?;
    Ok(Some(config.validated()))
}

async fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

//! Wallpaper sources and the per-source update handlers.

pub mod history;
pub mod stock;
pub mod workshop;

use crate::config::{Config, Source};
use crate::credentials::CredentialStore;
use crate::error::{Result, WallError};
use crate::file_manager::{latest_entry, remove_partials, EntryKind};
use crate::orchestrator::{CycleContext, CycleOutcome, SourceDispatch};
use crate::process::terminate_by_name;
use crate::retention;
use crate::wallpaper::{Desktop, SystemDesktop};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stock::{StockApi, StockClient};
use workshop::WorkshopClient;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const STILL_IMAGES: EntryKind = EntryKind::Files("jpg");

/// A wallpaper that was downloaded and applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WallpaperItem {
    pub identifier: String,
    pub source: Source,
    pub local_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("wallrotate/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Routes each cycle to the handler of the chosen source.
pub struct SourceRouter {
    unsplash: StockClient,
    pexels: StockClient,
    workshop: WorkshopClient,
    credentials: Arc<CredentialStore>,
    desktop: Arc<dyn Desktop>,
}

impl SourceRouter {
    pub fn new(
        unsplash: StockClient,
        pexels: StockClient,
        workshop: WorkshopClient,
        credentials: Arc<CredentialStore>,
        desktop: Arc<dyn Desktop>,
    ) -> Self {
        SourceRouter {
            unsplash,
            pexels,
            workshop,
            credentials,
            desktop,
        }
    }

    /// Production wiring: public API hosts and the real desktop.
    pub fn system(http: Client, credentials: Arc<CredentialStore>) -> Self {
        let unsplash = StockClient::new(StockApi::Unsplash, http.clone());
        let pexels = StockClient::new(StockApi::Pexels, http.clone());
        Self::new(
            unsplash,
            pexels,
            WorkshopClient::new(http),
            credentials,
            Arc::new(SystemDesktop),
        )
    }

    async fn run_stock(&self, api: StockApi, ctx: &CycleContext) -> Result<CycleOutcome> {
        let credentials = self.credentials.current();
        let (client, key, dir) = match api {
            StockApi::Unsplash => (
                &self.unsplash,
                credentials.unsplash_key.as_deref(),
                ctx.config.unsplash_dir(),
            ),
            StockApi::Pexels => (
                &self.pexels,
                credentials.pexels_key.as_deref(),
                ctx.config.pexels_dir(),
            ),
        };
        let mut outcome = CycleOutcome::default();

        ctx.checkpoint()?;
        let photos = ctx
            .cancellable(async { Ok::<_, WallError>(client.fetch_or_empty(key).await) })
            .await?;

        let mut apply_error = None;
        if photos.is_empty() {
            outcome.note = Some(format!("{:?} returned no photos", api));
        } else {
            ctx.checkpoint()?;
            let saved = client.save_all(&photos, &dir, &ctx.cancel).await;

            ctx.checkpoint()?;
            match latest_entry(&dir, STILL_IMAGES) {
                Some(path) => {
                    ctx.checkpoint()?;
                    match self.apply_still(&path).await {
                        Ok(()) => {
                            outcome.applied = Some(
                                saved
                                    .into_iter()
                                    .find(|item| item.local_path == path)
                                    .unwrap_or_else(|| item_from_path(api.source(), &path)),
                            );
                        }
                        Err(e) => apply_error = Some(e),
                    }
                }
                None => outcome.note = Some("no image in the save directory".to_string()),
            }
        }

        ctx.checkpoint()?;
        outcome.cleaned = cleanup(&ctx.config, dir, STILL_IMAGES).await;
        match apply_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Desktop wallpaper, then lock screen, then closing the animated
    /// renderer so it does not paint over the still image.
    async fn apply_still(&self, path: &Path) -> Result<()> {
        let desktop = self.desktop.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            desktop.set_wallpaper(&path)?;
            if let Err(e) = desktop.set_lock_screen(&path) {
                warn!("Failed to set lock screen wallpaper: {}", e);
            }
            if let Err(e) = desktop.release_renderer() {
                warn!("Failed to close the wallpaper renderer: {}", e);
            }
            Ok(())
        })
        .await
        .map_err(|e| WallError::Process(format!("Wallpaper task failed: {}", e)))?
    }

    async fn run_workshop(&self, ctx: &CycleContext) -> Result<CycleOutcome> {
        self.release().await;
        let result = self.workshop_cycle(ctx).await;
        self.release().await;

        let mut outcome = match result {
            Err(WallError::Cancelled) => return Err(WallError::Cancelled),
            Err(e) => {
                ctx.checkpoint()?;
                cleanup(&ctx.config, ctx.config.workshop_dir(), EntryKind::Directories).await;
                return Err(e);
            }
            Ok(outcome) => outcome,
        };
        ctx.checkpoint()?;
        outcome.cleaned =
            cleanup(&ctx.config, ctx.config.workshop_dir(), EntryKind::Directories).await;
        Ok(outcome)
    }

    async fn workshop_cycle(&self, ctx: &CycleContext) -> Result<CycleOutcome> {
        let config = &ctx.config;
        let mut outcome = CycleOutcome::default();

        ctx.checkpoint()?;
        let page = rand::thread_rng().gen_range(workshop::LISTING_PAGES);
        let url = config.collections_page_url(page);
        let links = match ctx.cancellable(self.workshop.scrape(&url)).await {
            Ok(links) => links,
            Err(WallError::Cancelled) => return Err(WallError::Cancelled),
            Err(e) => {
                warn!("Failed to fetch or parse page {}: {}", page, e);
                Vec::new()
            }
        };
        if links.is_empty() {
            outcome.note = Some(format!("no workshop items on page {}", page));
            return Ok(outcome);
        }

        let ids = workshop::select_ids(&links, config.download_limit, &mut rand::thread_rng());
        let downloader = workshop::resolve_downloader(config)?;
        let renderer = workshop::find_renderer(&config.save_location).ok_or_else(|| {
            WallError::Process(format!(
                "wallpaper64.exe not found in {}",
                config.save_location.display()
            ))
        })?;

        let credentials = self.credentials.current();
        let mut last_error = None;
        for id in ids {
            ctx.checkpoint()?;
            let credential = credentials.pool.pick(&mut rand::thread_rng())?.clone();
            let dir = config.workshop_dir().join(&id);

            if let Err(e) = self
                .workshop
                .download(&downloader, &id, &credential, &dir, &ctx.cancel)
                .await
            {
                if e.is_cancelled() {
                    return Err(e);
                }
                error!("Failed to download wallpaper with ID {}: {}", id, e);
                last_error = Some(e);
                continue;
            }

            ctx.checkpoint()?;
            let Some(media) = workshop::media_or_warn(&dir, &id) else {
                continue;
            };
            let _ = workshop::open_in_renderer(&renderer, &media)?;
            if let Err(e) = history::append(&config.history_path(), &id, &dir).await {
                warn!("Failed to record {} in download history: {}", id, e);
            }
            outcome.applied = Some(WallpaperItem {
                identifier: id,
                source: Source::Workshop,
                local_path: media,
                created_at: Utc::now(),
            });
        }

        if outcome.applied.is_some() {
            return Ok(outcome);
        }
        Err(last_error.unwrap_or_else(|| {
            WallError::NoResults("downloaded items had no playable media".to_string())
        }))
    }
}

impl SourceDispatch for SourceRouter {
    async fn run(&self, source: Source, ctx: &CycleContext) -> Result<CycleOutcome> {
        match source {
            Source::Unsplash => self.run_stock(StockApi::Unsplash, ctx).await,
            Source::Pexels => self.run_stock(StockApi::Pexels, ctx).await,
            Source::Workshop => self.run_workshop(ctx).await,
        }
    }

    async fn release(&self) {
        let sweep = || terminate_by_name(&[workshop::DOWNLOADER_PROCESS]);
        match tokio::task::spawn_blocking(sweep).await {
            Ok(0) => {}
            Ok(killed) => info!("Terminated {} leftover downloader process(es)", killed),
            Err(e) => error!("Process sweep task failed: {}", e),
        }
    }
}

fn item_from_path(source: Source, path: &Path) -> WallpaperItem {
    let identifier = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    WallpaperItem {
        identifier,
        source,
        local_path: path.to_path_buf(),
        created_at: Utc::now(),
    }
}

/// Sweeps partial downloads, then applies retention unless `persist_old` is
/// set. Returns how many entries retention deleted.
async fn cleanup(config: &Config, dir: PathBuf, kind: EntryKind) -> usize {
    let keep = (!config.persist_old).then_some(config.max_wallpapers);
    let sweep = move || {
        remove_partials(&dir);
        keep.map_or(0, |keep| retention::enforce(&dir, keep, kind).deleted.len())
    };
    match tokio::task::spawn_blocking(sweep).await {
        Ok(deleted) => deleted,
        Err(e) => {
            error!("Cleanup task failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_from_path_uses_file_stem() {
        let item = item_from_path(Source::Pexels, Path::new("/w/42_Max_Doe.jpg"));
        assert_eq!(item.identifier, "42_Max_Doe");
        assert_eq!(item.source, Source::Pexels);
    }

    #[tokio::test]
    async fn test_cleanup_respects_persist_old() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let config = Config {
            persist_old: true,
            ..Config::default()
        };
        assert_eq!(cleanup(&config, dir.path().to_path_buf(), STILL_IMAGES).await, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

        let config = Config::default();
        assert_eq!(cleanup(&config, dir.path().to_path_buf(), STILL_IMAGES).await, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_partials_even_when_persisting() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.jpg.part"), b"x").unwrap();
        let config = Config {
            persist_old: true,
            ..Config::default()
        };
        assert_eq!(cleanup(&config, dir.path().to_path_buf(), STILL_IMAGES).await, 0);
        assert!(dir.path().join("a.jpg").is_file());
        assert!(!dir.path().join("b.jpg.part").exists());
    }
}

//! Workshop listing scraper, downloader invocation and the animated renderer.

use crate::config::Config;
use crate::credentials::Credential;
use crate::error::{Result, WallError};
use crate::process::{run_streaming, spawn_detached};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const WORKSHOP_APP_ID: &str = "431960";
pub const DOWNLOADER_PROCESS: &str = "DepotDownloaderMod.exe";
const DOWNLOADER_DIR: &str = "DepotDownloaderMod";
const DOWNLOADER_EXE: &str = "DepotDownloadermod.exe";
const LISTING_SELECTOR: &str = "div.workshopItem a";
const RENDERER_LABEL: &str = "Wallpaper Engine";
const ITEM_MARKER: &str = "/filedetails/?id=";
pub const LISTING_PAGES: std::ops::RangeInclusive<u32> = 1..=1000;

/// Keeps item links, drops everything after the first `&`, and removes
/// duplicates while preserving first-seen order.
pub fn clean_links<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for link in raw {
        let link = link.as_ref();
        if !link.contains(ITEM_MARKER) {
            continue;
        }
        let trimmed = link.split('&').next().unwrap_or(link);
        if item_id(trimmed).is_none() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            links.push(trimmed.to_string());
        }
    }
    links
}

/// The numeric item id after `id=`.
pub fn item_id(link: &str) -> Option<&str> {
    let (_, rest) = link.split_once("id=")?;
    let id = rest.split('&').next().unwrap_or(rest);
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Some(id)
    } else {
        None
    }
}

/// Every `href` under a workshop item tile.
pub fn parse_listing(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(LISTING_SELECTOR) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Picks up to `limit` distinct item ids from `links`.
pub fn select_ids<R: Rng + ?Sized>(links: &[String], limit: usize, rng: &mut R) -> Vec<String> {
    links
        .choose_multiple(rng, limit)
        .filter_map(|link| item_id(link).map(str::to_string))
        .collect()
}

/// `downloader_path` from the config, otherwise the bundled tool next to the
/// executable or one directory above it.
pub fn resolve_downloader(config: &Config) -> Result<PathBuf> {
    if let Some(path) = &config.downloader_path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(WallError::Process(format!(
            "Configured downloader not found at {}",
            path.display()
        )));
    }

    let exe = std::env::current_exe()?;
    let found = exe
        .parent()
        .into_iter()
        .flat_map(|dir| [Some(dir), dir.parent()])
        .flatten()
        .map(|dir| dir.join(DOWNLOADER_DIR).join(DOWNLOADER_EXE))
        .find(|candidate| candidate.is_file());
    found.ok_or_else(|| WallError::Process(format!("{} not found", DOWNLOADER_EXE)))
}

pub fn downloader_command(exe: &Path, id: &str, credential: &Credential, dir: &Path) -> Command {
    let mut cmd = Command::new(exe);
    cmd.args(["-app", WORKSHOP_APP_ID, "-pubfile", id, "-verify-all"])
        .args(["-username", &credential.username])
        .args(["-password", &credential.password])
        .arg("-dir")
        .arg(dir);
    cmd
}

/// `scene.pkg` if present, otherwise the first `.mp4` by name.
pub fn find_media(dir: &Path) -> Option<PathBuf> {
    let scene = dir.join("scene.pkg");
    if scene.is_file() {
        return Some(scene);
    }
    let mut videos: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
        })
        .collect();
    videos.sort();
    videos.into_iter().next()
}

/// The renderer executable installed in `save_location`, 64-bit preferred.
pub fn find_renderer(save_location: &Path) -> Option<PathBuf> {
    ["wallpaper64.exe", "wallpaper32.exe"]
        .into_iter()
        .map(|name| save_location.join(name))
        .find(|p| p.is_file())
}

/// Asks the renderer to play `media`. The renderer keeps running after this
/// returns; its output is logged and it is reaped in the background.
pub fn open_in_renderer(
    renderer: &Path,
    media: &Path,
) -> Result<JoinHandle<Option<ExitStatus>>> {
    let handle = spawn_detached(renderer_command(renderer, media), RENDERER_LABEL)?;
    info!("Renderer asked to play {}", media.display());
    Ok(handle)
}

pub fn renderer_command(renderer: &Path, media: &Path) -> Command {
    let mut cmd = Command::new(renderer);
    cmd.args(["-control", "openWallpaper", "-file"])
        .arg(media)
        .arg("play");
    cmd
}

pub struct WorkshopClient {
    http: Client,
}

impl WorkshopClient {
    pub fn new(http: Client) -> Self {
        WorkshopClient { http }
    }

    /// Fetches one listing page and returns its cleaned item links.
    pub async fn scrape(&self, url: &str) -> Result<Vec<String>> {
        info!("Fetching wallpaper links from {}", url);
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(WallError::Network(format!(
                "Listing {} returned {}",
                url,
                resp.status()
            )));
        }
        let html = resp.text().await?;
        let links = clean_links(parse_listing(&html));
        info!("Found {} unique wallpapers.", links.len());
        Ok(links)
    }

    /// Runs the downloader for `id` into `dir`, streaming its output.
    pub async fn download(
        &self,
        downloader: &Path,
        id: &str,
        credential: &Credential,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        info!(
            "Downloading wallpaper with ID {} using {}...",
            id, credential.username
        );
        let cmd = downloader_command(downloader, id, credential, dir);
        run_streaming(cmd, "Downloader", cancel).await?;
        debug!("Download of {} finished", id);
        Ok(())
    }
}

/// Warns when the downloader left the directory without anything playable.
pub fn media_or_warn(dir: &Path, id: &str) -> Option<PathBuf> {
    let media = find_media(dir);
    if media.is_none() {
        warn!("No valid wallpaper file (scene.pkg or .mp4) found for {}", id);
    }
    media
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    #[test]
    fn test_clean_links_filters_trims_and_dedupes() {
        let raw = [
            "https://x/filedetails/?id=123&foo=bar",
            "https://x/other?id=9",
            "https://x/filedetails/?id=123",
        ];
        assert_eq!(clean_links(raw), vec!["https://x/filedetails/?id=123"]);
    }

    #[test]
    fn test_clean_links_requires_numeric_id() {
        let raw = [
            "https://x/filedetails/?id=",
            "https://x/filedetails/?id=abc",
            "https://x/filedetails/?id=7&searchtext=",
            "https://x/filedetails/?id=5",
        ];
        assert_eq!(
            clean_links(raw),
            vec!["https://x/filedetails/?id=7", "https://x/filedetails/?id=5"]
        );
    }

    #[test]
    fn test_item_id() {
        assert_eq!(item_id("https://x/filedetails/?id=2984"), Some("2984"));
        assert_eq!(item_id("https://x/filedetails/?id=2984&a=b"), Some("2984"));
        assert_eq!(item_id("https://x/filedetails/"), None);
    }

    #[test]
    fn test_parse_listing_reads_item_tiles_only() {
        let html = r#"
            <html><body>
              <div class="workshopItem"><a href="https://s/filedetails/?id=1&searchtext=">a</a></div>
              <div class="workshopItem"><a href="https://s/filedetails/?id=2">b</a><a>no href</a></div>
              <div class="other"><a href="https://s/filedetails/?id=3">c</a></div>
            </body></html>"#;
        let links = parse_listing(html);
        assert_eq!(
            links,
            vec!["https://s/filedetails/?id=1&searchtext=", "https://s/filedetails/?id=2"]
        );
        assert_eq!(clean_links(links).len(), 2);
    }

    #[test]
    fn test_select_ids_without_replacement() {
        let links: Vec<String> = (1..=5)
            .map(|i| format!("https://s/filedetails/?id={}", i))
            .collect();
        let mut rng = StdRng::seed_from_u64(11);

        let ids = select_ids(&links, 3, &mut rng);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);

        assert_eq!(select_ids(&links, 10, &mut rng).len(), 5);
        assert!(select_ids(&[], 2, &mut rng).is_empty());
    }

    #[test]
    fn test_downloader_command_arguments() {
        let cred = Credential {
            username: "u".into(),
            password: "p".into(),
        };
        let cmd = downloader_command(Path::new("dl.exe"), "42", &cred, Path::new("out"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-app", "431960", "-pubfile", "42", "-verify-all", "-username", "u", "-password",
                "p", "-dir", "out"
            ]
        );
    }

    #[test]
    fn test_renderer_command_arguments() {
        let cmd = renderer_command(Path::new("wallpaper64.exe"), Path::new("w/scene.pkg"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-control", "openWallpaper", "-file", "w/scene.pkg", "play"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_in_renderer_reaps_the_process() {
        let handle = open_in_renderer(Path::new("sh"), Path::new("scene.pkg")).unwrap();
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(status.is_some());
    }

    #[test]
    fn test_find_media_prefers_scene() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("a.MP4"), b"").unwrap();
        assert_eq!(find_media(dir.path()), Some(dir.path().join("a.MP4")));

        std::fs::write(dir.path().join("scene.pkg"), b"").unwrap();
        assert_eq!(find_media(dir.path()), Some(dir.path().join("scene.pkg")));
    }

    #[test]
    fn test_find_media_none() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("preview.jpg"), b"").unwrap();
        assert_eq!(find_media(dir.path()), None);
        assert_eq!(find_media(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_find_renderer_prefers_64_bit() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_renderer(dir.path()), None);
        std::fs::write(dir.path().join("wallpaper32.exe"), b"").unwrap();
        assert_eq!(find_renderer(dir.path()), Some(dir.path().join("wallpaper32.exe")));
        std::fs::write(dir.path().join("wallpaper64.exe"), b"").unwrap();
        assert_eq!(find_renderer(dir.path()), Some(dir.path().join("wallpaper64.exe")));
    }

    #[test]
    fn test_configured_downloader_must_exist() {
        let config = Config {
            downloader_path: Some(PathBuf::from("/no/such/downloader.exe")),
            ..Config::default()
        };
        assert!(matches!(
            resolve_downloader(&config),
            Err(WallError::Process(_))
        ));
    }

    #[test]
    fn test_bundled_downloader_missing_is_process_error() {
        let config = Config::default();
        assert!(config.downloader_path.is_none());
        assert!(matches!(
            resolve_downloader(&config),
            Err(WallError::Process(_))
        ));
    }
}

//! Stock-photo API clients (Unsplash and Pexels).

use super::WallpaperItem;
use crate::config::Source;
use crate::error::{Result, WallError};
use crate::file_manager::download_file;
use chrono::Utc;
use log::{error, info};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockApi {
    Unsplash,
    Pexels,
}

impl StockApi {
    pub fn source(self) -> Source {
        match self {
            StockApi::Unsplash => Source::Unsplash,
            StockApi::Pexels => Source::Pexels,
        }
    }

    fn default_base(self) -> &'static str {
        match self {
            StockApi::Unsplash => "https://api.unsplash.com",
            StockApi::Pexels => "https://api.pexels.com",
        }
    }

    fn default_query(self) -> &'static str {
        match self {
            StockApi::Unsplash => "landscape",
            StockApi::Pexels => "nature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPhoto {
    pub id: String,
    pub attribution: String,
    pub url: String,
}

#[derive(Deserialize)]
struct UnsplashPhoto {
    id: String,
    user: UnsplashUser,
    urls: UnsplashUrls,
}

#[derive(Deserialize)]
struct UnsplashUser {
    username: String,
}

#[derive(Deserialize)]
struct UnsplashUrls {
    full: String,
}

#[derive(Deserialize)]
struct PexelsPage {
    photos: Vec<PexelsPhoto>,
}

#[derive(Deserialize)]
struct PexelsPhoto {
    id: u64,
    photographer: String,
    src: PexelsSrc,
}

#[derive(Deserialize)]
struct PexelsSrc {
    original: String,
}

/// Maps a raw API response body to photos.
pub fn parse_photos(api: StockApi, body: &str) -> Result<Vec<StockPhoto>> {
    let photos = match api {
        StockApi::Unsplash => serde_json::from_str::<Vec<UnsplashPhoto>>(body)?
            .into_iter()
            .map(|p| StockPhoto {
                id: p.id,
                attribution: p.user.username,
                url: p.urls.full,
            })
            .collect(),
        StockApi::Pexels => serde_json::from_str::<PexelsPage>(body)?
            .photos
            .into_iter()
            .map(|p| StockPhoto {
                id: p.id.to_string(),
                attribution: p.photographer,
                url: p.src.original,
            })
            .collect(),
    };
    Ok(photos)
}

/// `<id>_<attribution>.jpg`, with characters that would break the path
/// replaced by `_`.
pub fn file_name_for(photo: &StockPhoto) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| match c {
                ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect()
    };
    format!("{}_{}.jpg", clean(&photo.id), clean(&photo.attribution))
}

pub struct StockClient {
    api: StockApi,
    http: Client,
    base_url: String,
    query: String,
    count: u32,
}

impl StockClient {
    pub fn new(api: StockApi, http: Client) -> Self {
        StockClient {
            api,
            http,
            base_url: api.default_base().to_string(),
            query: api.default_query().to_string(),
            count: 1,
        }
    }

    /// Points the client at another host, e.g. a local test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api(&self) -> StockApi {
        self.api
    }

    /// Search URL with a random page/seed so consecutive cycles see
    /// different results.
    pub fn request_url<R: Rng + ?Sized>(&self, key: Option<&str>, rng: &mut R) -> Result<Url> {
        let count = self.count.to_string();
        let parsed = match self.api {
            StockApi::Unsplash => {
                let key = self.require(key)?;
                let seed = rng.gen_range(0..=10_000).to_string();
                Url::parse_with_params(
                    &format!("{}/photos/random", self.base_url),
                    &[
                        ("count", count.as_str()),
                        ("query", self.query.as_str()),
                        ("client_id", key),
                        ("random_seed", seed.as_str()),
                    ],
                )
            }
            StockApi::Pexels => {
                let page = rng.gen_range(1..=100).to_string();
                Url::parse_with_params(
                    &format!("{}/v1/search", self.base_url),
                    &[
                        ("query", self.query.as_str()),
                        ("per_page", count.as_str()),
                        ("page", page.as_str()),
                    ],
                )
            }
        };
        parsed.map_err(|e| WallError::Config(format!("Invalid {:?} URL: {}", self.api, e)))
    }

    fn require<'k>(&self, key: Option<&'k str>) -> Result<&'k str> {
        key.ok_or_else(|| WallError::Config(format!("{:?} API key is missing", self.api)))
    }

    pub async fn fetch(&self, key: Option<&str>) -> Result<Vec<StockPhoto>> {
        let url = self.request_url(key, &mut rand::thread_rng())?;
        let mut request = self.http.get(url);
        if self.api == StockApi::Pexels {
            request = request.header(reqwest::header::AUTHORIZATION, self.require(key)?);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(WallError::Network(format!(
                "{:?} API returned {}: {}",
                self.api, status, body
            )));
        }
        let photos = parse_photos(self.api, &body)?;
        info!("Fetched {} wallpapers from {:?}.", photos.len(), self.api);
        Ok(photos)
    }

    /// Like `fetch`, but failures are logged and yield no photos.
    pub async fn fetch_or_empty(&self, key: Option<&str>) -> Vec<StockPhoto> {
        match self.fetch(key).await {
            Ok(photos) => photos,
            Err(e) => {
                error!("Failed to fetch from {:?}: {}", self.api, e);
                Vec::new()
            }
        }
    }

    /// Downloads each photo into `dir`. Per-photo failures are logged and
    /// skipped. Stops between photos, or mid-transfer, once `cancel` fires;
    /// a photo whose body already arrived is still written whole.
    pub async fn save_all(
        &self,
        photos: &[StockPhoto],
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Vec<WallpaperItem> {
        let mut saved = Vec::new();
        for photo in photos {
            if cancel.is_cancelled() {
                break;
            }
            let path = dir.join(file_name_for(photo));
            match download_file(&self.http, &photo.url, &path, cancel).await {
                Ok(()) => {
                    info!("Saved wallpaper to {}", path.display());
                    saved.push(WallpaperItem {
                        identifier: photo.id.clone(),
                        source: self.api.source(),
                        local_path: path,
                        created_at: Utc::now(),
                    });
                }
                Err(WallError::Cancelled) => break,
                Err(e) => error!("Failed to download wallpaper from {}: {}", photo.url, e),
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_unsplash() {
        let body = r#"[{"id":"abc","user":{"username":"jane"},"urls":{"full":"https://img/abc"},"likes":3}]"#;
        let photos = parse_photos(StockApi::Unsplash, body).unwrap();
        assert_eq!(
            photos,
            vec![StockPhoto {
                id: "abc".into(),
                attribution: "jane".into(),
                url: "https://img/abc".into(),
            }]
        );
    }

    #[test]
    fn test_parse_pexels() {
        let body = r#"{"page":3,"photos":[{"id":42,"photographer":"Max Doe","src":{"original":"https://img/42","large":"x"}}]}"#;
        let photos = parse_photos(StockApi::Pexels, body).unwrap();
        assert_eq!(photos[0].id, "42");
        assert_eq!(photos[0].attribution, "Max Doe");
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(parse_photos(StockApi::Pexels, "[]").is_err());
    }

    #[test]
    fn test_file_name_is_deterministic_and_safe() {
        let photo = StockPhoto {
            id: "42".into(),
            attribution: "Max Doe/Studio".into(),
            url: String::new(),
        };
        assert_eq!(file_name_for(&photo), "42_Max_Doe_Studio.jpg");
        assert_eq!(file_name_for(&photo), file_name_for(&photo.clone()));
    }

    #[test]
    fn test_unsplash_url_needs_key() {
        let client = StockClient::new(StockApi::Unsplash, Client::new());
        let err = client
            .request_url(None, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, WallError::Config(_)));
    }

    #[test]
    fn test_request_urls_carry_query_and_randomness() {
        let mut rng = StdRng::seed_from_u64(3);
        let unsplash = StockClient::new(StockApi::Unsplash, Client::new());
        let url = unsplash.request_url(Some("k"), &mut rng).unwrap();
        assert_eq!(url.path(), "/photos/random");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "k".into())));
        assert!(pairs.contains(&("query".into(), "landscape".into())));
        assert!(pairs.iter().any(|(k, _)| k == "random_seed"));

        let pexels =
            StockClient::new(StockApi::Pexels, Client::new()).with_base_url("http://127.0.0.1:9/");
        let url = pexels.request_url(Some("k"), &mut rng).unwrap();
        assert_eq!(url.as_str().split('?').next(), Some("http://127.0.0.1:9/v1/search"));
        let page: u32 = url
            .query_pairs()
            .find(|(k, _)| k == "page")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();
        assert!((1..=100).contains(&page));
    }
}

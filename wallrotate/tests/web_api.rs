use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wallrotate::config::{ConfigStore, Source};
use wallrotate::credentials::CredentialStore;
use wallrotate::events;
use wallrotate::orchestrator::{CycleContext, CycleOutcome, Orchestrator, SourceDispatch};
use wallrotate::state::{drain_events, AppState};
use wallrotate::web_server::{self, ApiResponse};
use wallrotate::Result;

struct NoopDispatch;

impl SourceDispatch for NoopDispatch {
    async fn run(&self, _source: Source, _ctx: &CycleContext) -> Result<CycleOutcome> {
        Ok(CycleOutcome {
            note: Some("nothing new".to_string()),
            ..CycleOutcome::default()
        })
    }
}

struct Panel {
    _dir: TempDir,
    base: String,
    client: reqwest::Client,
    state: Arc<AppState<NoopDispatch>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Panel {
    async fn start() -> Panel {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().join("config.json")).await);
        store.update(|c| c.check_interval = 3600).await.unwrap();
        let (tx, rx) = events::channel();
        let orchestrator = Orchestrator::new(store, Arc::new(NoopDispatch), tx);
        let credentials = Arc::new(CredentialStore::open(dir.path().join(".env")));
        let state = Arc::new(AppState::new(
            orchestrator,
            credentials,
            dir.path().to_path_buf(),
        ));
        tokio::spawn(drain_events(state.clone(), rx));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown, signal) = oneshot::channel::<()>();
        tokio::spawn(web_server::serve(state.clone(), listener, async move {
            let _ = signal.await;
        }));

        Panel {
            _dir: dir,
            base,
            client: reqwest::Client::new(),
            state,
            shutdown: Some(shutdown),
        }
    }

    async fn status(&self) -> Value {
        self.client
            .get(format!("{}/api/status", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> (u16, ApiResponse) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_status_before_start() {
    let panel = Panel::start().await;

    let status = panel.status().await;
    assert_eq!(status["running"], json!(false));
    assert_eq!(status["config"]["check_interval"], json!(3600));
    assert!(status["last_applied"].is_null());
}

#[tokio::test]
async fn test_start_with_no_sources_is_bad_request() {
    let panel = Panel::start().await;

    let (code, body) = panel.post("/api/start", json!({ "sources": [] })).await;
    assert_eq!(code, 400);
    assert!(!body.success);
    assert_eq!(body.message, "No sources selected");
    assert_eq!(panel.status().await["running"], json!(false));
}

#[tokio::test]
async fn test_start_then_stop() {
    let panel = Panel::start().await;

    let (code, body) = panel
        .post("/api/start", json!({ "sources": ["pexels", "wallpaper_engine"] }))
        .await;
    assert_eq!(code, 200, "{}", body.message);
    assert!(body.success);

    let status = panel.status().await;
    assert_eq!(status["running"], json!(true));
    assert_eq!(status["config"]["running"], json!(true));
    assert_eq!(
        status["config"]["enabled_sources"],
        json!(["pexels", "workshop"])
    );

    let mut seen = false;
    for _ in 0..50 {
        if !panel.state.recent_events().is_empty() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "no update events recorded");

    let (code, _) = panel.post("/api/stop", json!({})).await;
    assert_eq!(code, 200);
    let status = panel.status().await;
    assert_eq!(status["running"], json!(false));
    assert_eq!(status["config"]["running"], json!(false));

    let (code, body) = panel.post("/api/stop", json!({})).await;
    assert_eq!(code, 200);
    assert_eq!(body.message, "Nothing was running.");
}

#[tokio::test]
async fn test_config_patch_is_partial_and_validated() {
    let panel = Panel::start().await;

    let (code, _) = panel
        .post(
            "/api/config",
            json!({ "max_wallpapers": 0, "persist_old": true }),
        )
        .await;
    assert_eq!(code, 200);

    let status = panel.status().await;
    let config = &status["config"];
    assert_eq!(config["max_wallpapers"], json!(1));
    assert_eq!(config["persist_old"], json!(true));
    assert_eq!(config["check_interval"], json!(3600));
}

#[tokio::test]
async fn test_root_renders_panel() {
    let panel = Panel::start().await;

    let html = panel
        .client
        .get(format!("{}/", panel.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("WallRotate: Stopped"));
    assert!(html.contains(r#"value="workshop""#));
}

#[tokio::test]
async fn test_credentials_are_saved_and_reloaded() {
    let panel = Panel::start().await;
    assert_eq!(
        panel.status().await["credentials"],
        json!({ "unsplash_key": false, "pexels_key": false, "accounts": 0 })
    );

    let (code, body) = panel
        .post(
            "/api/credentials",
            json!({
                "unsplash_access_key": "uk",
                "usernames": "alice,bob",
                "passwords": "one,two"
            }),
        )
        .await;
    assert_eq!(code, 200, "{}", body.message);
    assert!(body.success);

    let status = panel.status().await;
    assert_eq!(
        status["credentials"],
        json!({ "unsplash_key": true, "pexels_key": false, "accounts": 2 })
    );
    assert!(!status.to_string().contains("one,two"));

    let env = std::fs::read_to_string(panel.state.credentials.path()).unwrap();
    assert!(env.contains("UNSPLASH_ACCESS_KEY='uk'"), "{}", env);
    assert!(env.contains("USERNAMES='alice,bob'"), "{}", env);
    let current = panel.state.credentials.current();
    assert_eq!(current.unsplash_key.as_deref(), Some("uk"));
    assert_eq!(current.pool.len(), 2);
}

#[tokio::test]
async fn test_empty_credentials_update_is_bad_request() {
    let panel = Panel::start().await;

    let (code, body) = panel.post("/api/credentials", json!({})).await;
    assert_eq!(code, 400);
    assert!(!body.success);
}

use crate::config::{Config, Source};
use crate::credentials::{CredentialSummary, CredentialsUpdate};
use crate::error::{Result, WallError};
use crate::logger::read_logs;
use crate::orchestrator::{SourceDispatch, StopOutcome};
use crate::sources::WallpaperItem;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

pub fn router<D: SourceDispatch>(state: Arc<AppState<D>>) -> Router {
    Router::new()
        .route("/", get(handle_root::<D>))
        .route("/api/status", get(handle_status::<D>))
        .route("/api/start", post(handle_start::<D>))
        .route("/api/stop", post(handle_stop::<D>))
        .route("/api/config", post(handle_config::<D>))
        .route("/api/credentials", post(handle_credentials::<D>))
        .with_state(state)
}

/// Serves the control panel on `listener` until `shutdown` resolves.
pub async fn serve<D, F>(state: Arc<AppState<D>>, listener: TcpListener, shutdown: F) -> Result<()>
where
    D: SourceDispatch,
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: message.into(),
            }),
        )
    }

    fn error(err: &WallError) -> (StatusCode, Json<ApiResponse>) {
        let status = match err {
            WallError::InvalidSelection | WallError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ApiResponse {
                success: false,
                message: err.to_string(),
            }),
        )
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub config: Config,
    pub last_applied: Option<WallpaperItem>,
    pub credentials: CredentialSummary,
    /// Newest first.
    pub recent_events: Vec<String>,
}

#[derive(Deserialize)]
pub struct StartPayload {
    sources: Vec<Source>,
}

/// Fields left out of the request body keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    pub save_location: Option<PathBuf>,
    pub check_interval: Option<u64>,
    pub max_wallpapers: Option<usize>,
    pub download_limit: Option<usize>,
    pub collections_url: Option<String>,
    pub persist_old: Option<bool>,
    pub downloader_path: Option<PathBuf>,
}

impl ConfigPatch {
    pub fn apply(self, config: &mut Config) {
        if let Some(v) = self.save_location {
            config.save_location = v;
        }
        if let Some(v) = self.check_interval {
            config.check_interval = v;
        }
        if let Some(v) = self.max_wallpapers {
            config.max_wallpapers = v;
        }
        if let Some(v) = self.download_limit {
            config.download_limit = v;
        }
        if let Some(v) = self.collections_url {
            config.collections_url = v;
        }
        if let Some(v) = self.persist_old {
            config.persist_old = v;
        }
        if let Some(v) = self.downloader_path {
            config.downloader_path = Some(v);
        }
    }
}

async fn status<D: SourceDispatch>(state: &AppState<D>) -> StatusResponse {
    StatusResponse {
        running: state.orchestrator.is_running().await,
        config: state.orchestrator.store().snapshot().await,
        last_applied: state.last_applied(),
        credentials: state.credentials.summary(),
        recent_events: state
            .recent_events()
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

async fn handle_status<D: SourceDispatch>(
    State(state): State<Arc<AppState<D>>>,
) -> Json<StatusResponse> {
    Json(status(&state).await)
}

async fn handle_start<D: SourceDispatch>(
    State(state): State<Arc<AppState<D>>>,
    Json(payload): Json<StartPayload>,
) -> (StatusCode, Json<ApiResponse>) {
    let sources: BTreeSet<Source> = payload.sources.into_iter().collect();
    match state.orchestrator.start(sources.clone()).await {
        Ok(handle) => {
            let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
            ApiResponse::ok(format!(
                "Update run #{} started with {}",
                handle.id(),
                names.join(", ")
            ))
        }
        Err(e) => {
            log::warn!("Start rejected: {}", e);
            ApiResponse::error(&e)
        }
    }
}

async fn handle_stop<D: SourceDispatch>(
    State(state): State<Arc<AppState<D>>>,
) -> (StatusCode, Json<ApiResponse>) {
    let message = match state.orchestrator.stop().await {
        StopOutcome::Graceful => "Stopped.",
        StopOutcome::Forced => "Stop timed out; the update task was aborted.",
        StopOutcome::NotRunning => "Nothing was running.",
    };
    ApiResponse::ok(message)
}

async fn handle_config<D: SourceDispatch>(
    State(state): State<Arc<AppState<D>>>,
    Json(patch): Json<ConfigPatch>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.store().update(|c| patch.apply(c)).await {
        Ok(_) => ApiResponse::ok("Configuration saved. It applies from the next cycle."),
        Err(e) => {
            log::error!("Failed to save configuration: {}", e);
            ApiResponse::error(&e)
        }
    }
}

async fn handle_credentials<D: SourceDispatch>(
    State(state): State<Arc<AppState<D>>>,
    Json(update): Json<CredentialsUpdate>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.credentials.update(&update).await {
        Ok(summary) => ApiResponse::ok(format!(
            "Credentials saved ({} downloader account(s)). They apply from the next cycle.",
            summary.accounts
        )),
        Err(e) => {
            log::error!("Failed to save credentials: {}", e);
            ApiResponse::error(&e)
        }
    }
}

async fn handle_root<D: SourceDispatch>(State(state): State<Arc<AppState<D>>>) -> Html<String> {
    let status = status(&state).await;
    let config_json = serde_json::to_string_pretty(&status.config)
        .unwrap_or_else(|e| format!("Config not serializable: {}", e));
    let current = status
        .last_applied
        .as_ref()
        .map(|item| format!("{} {} ({})", item.source, item.identifier, item.local_path.display()))
        .unwrap_or_else(|| "None yet.".to_string());
    let events = status.recent_events.join("\n");
    let logs = read_logs(&state.app_data_dir).await;
    let checkboxes: String = Source::ALL
        .iter()
        .map(|s| {
            let checked = if status.config.enabled_sources.contains(s) {
                " checked"
            } else {
                ""
            };
            format!(
                r#"<label><input type="checkbox" name="source" value="{0}"{1}> {0}</label> "#,
                s, checked
            )
        })
        .collect();
    let state_label = if status.running { "Running" } else { "Stopped" };
    let yes_no = |set: bool| if set { "set" } else { "missing" };
    let credentials = format!(
        "Unsplash key: {}\nPexels key: {}\nDownloader accounts: {}",
        yes_no(status.credentials.unsplash_key),
        yes_no(status.credentials.pexels_key),
        status.credentials.accounts
    );

    let html = format!(
        r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
            <meta charset="UTF-8">
            <meta name="viewport" content="width=device-width, initial-scale=1.0">
            <title>WallRotate Status</title>
            <style>
                body {{ font-family: sans-serif; line-height: 1.6; padding: 20px; background: #f4f4f4; }}
                h1, h2 {{ color: #333; }}
                pre {{ background: #eee; padding: 15px; border-radius: 5px; overflow-x: auto; }}
                .container {{ max-width: 900px; margin: auto; background: #fff; padding: 20px; border-radius: 8px; box-shadow: 0 2px 5px rgba(0,0,0,0.1); }}
                .section {{ margin-bottom: 20px; }}
                form button {{ padding: 8px 12px; }}
            </style>
        </head>
        <body>
            <div class="container">
                <h1>WallRotate: {state_label}</h1>

                <div class="section">
                    <h2>Current Wallpaper</h2>
                    <pre><code>{current}</code></pre>
                </div>

                <div class="section">
                    <h2>Sources</h2>
                    <form id="startForm">
                        {checkboxes}
                        <button type="submit">Start</button>
                        <button type="button" id="stopButton">Stop</button>
                    </form>
                    <p id="apiResponse"></p>
                </div>

                <div class="section">
                    <h2>Credentials (.env)</h2>
                    <pre><code>{credentials}</code></pre>
                    <form id="credentialsForm">
                        <input type="password" name="unsplash_access_key" placeholder="Unsplash access key">
                        <input type="password" name="pexels_api_key" placeholder="Pexels API key">
                        <input type="text" name="usernames" placeholder="Usernames (comma separated)">
                        <input type="password" name="passwords" placeholder="Passwords (comma separated)">
                        <button type="submit">Save</button>
                    </form>
                </div>

                <div class="section">
                    <h2>Recent Activity</h2>
                    <pre><code>{events}</code></pre>
                </div>

                <div class="section">
                    <h2>Current Config (config.json)</h2>
                    <pre><code>{config_json}</code></pre>
                </div>

                <div class="section">
                    <h2>Recent Logs (Last 200 lines)</h2>
                    <pre><code>{logs}</code></pre>
                </div>
            </div>

            <script>
                const responseEl = document.getElementById('apiResponse');
                async function call(path, body) {{
                    try {{
                        const response = await fetch(path, {{
                            method: 'POST',
                            headers: {{ 'Content-Type': 'application/json' }},
                            body: JSON.stringify(body)
                        }});
                        const data = await response.json();
                        responseEl.style.color = response.ok ? 'green' : 'red';
                        responseEl.textContent = data.message;
                        if (response.ok) {{
                            setTimeout(() => location.reload(), 1500);
                        }}
                    }} catch (err) {{
                        responseEl.style.color = 'red';
                        responseEl.textContent = 'Network error: ' + err;
                    }}
                }}
                document.getElementById('startForm').addEventListener('submit', function(e) {{
                    e.preventDefault();
                    const sources = Array.from(document.querySelectorAll('input[name=source]:checked')).map(i => i.value);
                    call('/api/start', {{ sources }});
                }});
                document.getElementById('credentialsForm').addEventListener('submit', function(e) {{
                    e.preventDefault();
                    const body = {{}};
                    for (const input of this.querySelectorAll('input')) {{
                        if (input.value) body[input.name] = input.value;
                    }}
                    call('/api/credentials', body);
                }});
                document.getElementById('stopButton').addEventListener('click', function() {{
                    call('/api/stop', {{}});
                }});
            </script>
        </body>
        </html>
        "#,
        state_label = state_label,
        current = html_escape(&current),
        checkboxes = checkboxes,
        credentials = html_escape(&credentials),
        events = html_escape(&events),
        config_json = html_escape(&config_json),
        logs = html_escape(&logs)
    );

    Html(html)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

//! CLI command definitions and their HTTP calls against the daemon panel.

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "wallctl")]
#[command(author, version, about = "Controls a running wallrotate daemon", long_about = None)]
pub struct Cli {
    /// Port of the daemon's control panel.
    #[arg(long, global = true, env = "WALLROTATE_PORT", default_value_t = 11452)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show whether updates are running, the config and recent activity.
    Status,

    /// Start the update loop with the given sources.
    Start {
        #[arg(short, long = "source", value_enum, required = true)]
        sources: Vec<SourceArg>,
    },

    /// Stop the update loop.
    Stop,

    /// Change configuration fields. Omitted fields are left as they are.
    Set(SetArgs),

    /// Save API keys and downloader accounts to the daemon's .env file.
    /// Omitted values are left as they are.
    Credentials(CredentialArgs),

    /// Open the control panel in the default browser.
    Open,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Unsplash,
    Pexels,
    Workshop,
}

impl SourceArg {
    fn as_str(self) -> &'static str {
        match self {
            SourceArg::Unsplash => "unsplash",
            SourceArg::Pexels => "pexels",
            SourceArg::Workshop => "workshop",
        }
    }
}

#[derive(clap::Args, Debug, Default)]
pub struct SetArgs {
    #[arg(long)]
    save_location: Option<PathBuf>,
    /// Seconds between cycles.
    #[arg(long)]
    check_interval: Option<u64>,
    #[arg(long)]
    max_wallpapers: Option<usize>,
    #[arg(long)]
    download_limit: Option<usize>,
    #[arg(long)]
    collections_url: Option<String>,
    #[arg(long)]
    persist_old: Option<bool>,
    #[arg(long)]
    downloader_path: Option<PathBuf>,
}

impl SetArgs {
    /// JSON body for `POST /api/config` with only the given fields.
    pub fn to_patch(&self) -> Value {
        let mut patch = Map::new();
        if let Some(v) = &self.save_location {
            patch.insert("save_location".into(), json!(v));
        }
        if let Some(v) = self.check_interval {
            patch.insert("check_interval".into(), json!(v));
        }
        if let Some(v) = self.max_wallpapers {
            patch.insert("max_wallpapers".into(), json!(v));
        }
        if let Some(v) = self.download_limit {
            patch.insert("download_limit".into(), json!(v));
        }
        if let Some(v) = &self.collections_url {
            patch.insert("collections_url".into(), json!(v));
        }
        if let Some(v) = self.persist_old {
            patch.insert("persist_old".into(), json!(v));
        }
        if let Some(v) = &self.downloader_path {
            patch.insert("downloader_path".into(), json!(v));
        }
        Value::Object(patch)
    }
}

#[derive(clap::Args, Debug, Default)]
pub struct CredentialArgs {
    #[arg(long, env = "UNSPLASH_ACCESS_KEY", hide_env_values = true)]
    unsplash_key: Option<String>,
    #[arg(long, env = "PEXELS_API_KEY", hide_env_values = true)]
    pexels_key: Option<String>,
    /// Comma separated downloader account names.
    #[arg(long)]
    usernames: Option<String>,
    /// Comma separated, paired with --usernames by position.
    #[arg(long, env = "WALLROTATE_PASSWORDS", hide_env_values = true)]
    passwords: Option<String>,
}

impl CredentialArgs {
    /// JSON body for `POST /api/credentials` with only the given values.
    pub fn to_update(&self) -> Value {
        let mut update = Map::new();
        let fields = [
            ("unsplash_access_key", &self.unsplash_key),
            ("pexels_api_key", &self.pexels_key),
            ("usernames", &self.usernames),
            ("passwords", &self.passwords),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                update.insert(name.into(), json!(v));
            }
        }
        Value::Object(update)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    message: String,
}

impl Cli {
    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub async fn execute(&self) -> Result<(), CliError> {
        let base = self.base_url();
        let client = Client::new();
        match &self.command {
            Commands::Status => {
                let status: Value = send(client.get(format!("{base}/api/status")), &base)
                    .await?
                    .json()
                    .await?;
                print_status(&status);
            }
            Commands::Start { sources } => {
                let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
                let body = json!({ "sources": names });
                post(&client, &base, "/api/start", &body).await?;
            }
            Commands::Stop => {
                post(&client, &base, "/api/stop", &json!({})).await?;
            }
            Commands::Set(args) => {
                let patch = args.to_patch();
                if patch.as_object().is_some_and(Map::is_empty) {
                    return Err(CliError::Rejected("nothing to set".into()));
                }
                post(&client, &base, "/api/config", &patch).await?;
            }
            Commands::Credentials(args) => {
                let update = args.to_update();
                if update.as_object().is_some_and(Map::is_empty) {
                    return Err(CliError::Rejected("no credentials given".into()));
                }
                post(&client, &base, "/api/credentials", &update).await?;
            }
            Commands::Open => {
                open::that(&base).map_err(CliError::Browser)?;
                println!("Opened {base}");
            }
        }
        Ok(())
    }
}

async fn send(request: reqwest::RequestBuilder, base: &str) -> Result<reqwest::Response, CliError> {
    request.send().await.map_err(|e| {
        if e.is_connect() {
            CliError::DaemonNotRunning(base.to_string())
        } else {
            CliError::Request(e)
        }
    })
}

async fn post(client: &Client, base: &str, path: &str, body: &Value) -> Result<(), CliError> {
    let resp = send(client.post(format!("{base}{path}")).json(body), base).await?;
    let ok = resp.status().is_success();
    let message = match resp.json::<ApiResponse>().await {
        Ok(api) => api.message,
        Err(e) => e.to_string(),
    };
    if ok {
        println!("{message}");
        Ok(())
    } else {
        Err(CliError::Rejected(message))
    }
}

fn print_status(status: &Value) {
    let running = status["running"].as_bool().unwrap_or(false);
    println!("State:    {}", if running { "running" } else { "stopped" });
    if let Some(sources) = status["config"]["enabled_sources"].as_array() {
        let names: Vec<&str> = sources.iter().filter_map(Value::as_str).collect();
        println!("Sources:  {}", names.join(", "));
    }
    if let Some(interval) = status["config"]["check_interval"].as_u64() {
        println!("Interval: {interval}s");
    }
    let creds = &status["credentials"];
    if creds.is_object() {
        let flag = |key: &str| if creds[key].as_bool() == Some(true) { "set" } else { "missing" };
        println!(
            "Keys:     unsplash {}, pexels {}; {} downloader account(s)",
            flag("unsplash_key"),
            flag("pexels_key"),
            creds["accounts"].as_u64().unwrap_or(0)
        );
    }
    match status["last_applied"]["local_path"].as_str() {
        Some(path) => println!("Current:  {path}"),
        None => println!("Current:  none yet"),
    }
    if let Some(events) = status["recent_events"].as_array() {
        println!("Recent activity:");
        for event in events.iter().take(10).filter_map(Value::as_str) {
            println!("  {event}");
        }
    }
}

//! Launches the daemon binary itself.

use serde_json::json;
use std::net::TcpListener;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use wallrotate::logger;

#[tokio::test]
async fn test_taken_port_exits_before_resuming() {
    let dir = TempDir::new().unwrap();
    let save_location = dir.path().join("saves");
    let config = json!({
        "save_location": save_location,
        "check_interval": 3600,
        "enabled_sources": ["pexels"],
        "running": true
    });
    std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();

    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let status = tokio::time::timeout(
        Duration::from_secs(20),
        Command::new(env!("CARGO_BIN_EXE_wallrotate"))
            .arg("--data-dir")
            .arg(dir.path())
            .arg("--port")
            .arg(port.to_string())
            .env("RUST_LOG", "info")
            .kill_on_drop(true)
            .status(),
    )
    .await
    .expect("daemon did not exit")
    .unwrap();

    assert!(!status.success());
    let log = logger::read_logs(dir.path()).await;
    assert!(log.contains("WallRotate started"), "{}", log);
    assert!(!log.contains("Resuming wallpaper updates"), "{}", log);
    assert!(!save_location.exists());
    drop(taken);
}

//! Launch-at-login registration through the per-user `Run` registry key.

use crate::error::{Result, WallError};
use log::info;

const RUN_VALUE: &str = "WallRotate";

#[cfg(windows)]
const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

#[cfg(windows)]
fn reg(args: &[&str]) -> Result<std::process::Output> {
    std::process::Command::new("reg")
        .args(args)
        .output()
        .map_err(|e| WallError::Process(format!("Failed to run reg {}: {}", args[0], e)))
}

#[cfg(windows)]
pub fn is_enabled() -> Result<bool> {
    let exe_path = std::env::current_exe()?;
    let output = reg(&["query", RUN_KEY, "/v", RUN_VALUE])?;
    if !output.status.success() {
        return Ok(false);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.contains(&*exe_path.to_string_lossy()))
}

#[cfg(windows)]
pub fn set_autostart() -> Result<()> {
    let exe_path = std::env::current_exe()?;
    let exe_path_str = exe_path.to_string_lossy();
    let output = reg(&[
        "add",
        RUN_KEY,
        "/v",
        RUN_VALUE,
        "/t",
        "REG_SZ",
        "/d",
        &exe_path_str,
        "/f",
    ])?;
    if output.status.success() {
        info!("Autostart set successfully for: {}", exe_path_str);
        Ok(())
    } else {
        Err(WallError::Process(format!(
            "reg add failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

#[cfg(windows)]
pub fn remove_autostart() -> Result<()> {
    if !is_enabled()? {
        info!("Autostart was not registered");
        return Ok(());
    }
    let output = reg(&["delete", RUN_KEY, "/v", RUN_VALUE, "/f"])?;
    if output.status.success() {
        info!("Autostart removed");
        Ok(())
    } else {
        Err(WallError::Process(format!(
            "reg delete failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

#[cfg(not(windows))]
pub fn is_enabled() -> Result<bool> {
    Ok(false)
}

#[cfg(not(windows))]
pub fn set_autostart() -> Result<()> {
    Err(WallError::Process(format!(
        "{} autostart is only supported on Windows",
        RUN_VALUE
    )))
}

#[cfg(not(windows))]
pub fn remove_autostart() -> Result<()> {
    info!("Nothing to remove, autostart is only supported on Windows");
    Ok(())
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_platform() {
        assert!(!is_enabled().unwrap());
        assert!(matches!(set_autostart(), Err(WallError::Process(_))));
        assert!(remove_autostart().is_ok());
    }
}

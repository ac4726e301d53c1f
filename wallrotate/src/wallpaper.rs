//! Platform wallpaper application.
//!
//! Windows uses `SystemParametersInfoW` plus registry values for the style and
//! lock screen. macOS and GNOME shell out to `osascript` / `gsettings`.

use crate::error::{Result, WallError};
use crate::process::terminate_by_name;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Executables of the animated wallpaper renderer. Only one wallpaper owner can
/// be active, so these are closed after a still image is applied.
pub const RENDERER_PROCESSES: [&str; 2] = ["wallpaper32.exe", "wallpaper64.exe"];

pub trait Desktop: Send + Sync {
    fn set_wallpaper(&self, path: &Path) -> Result<()>;

    fn set_lock_screen(&self, path: &Path) -> Result<()>;

    /// Closes the animated wallpaper renderer if it is running.
    fn release_renderer(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDesktop;

impl Desktop for SystemDesktop {
    fn set_wallpaper(&self, path: &Path) -> Result<()> {
        let absolute = absolute(path)?;
        platform::set_wallpaper(&absolute)?;
        info!("Wallpaper set to {}", absolute.display());
        Ok(())
    }

    fn set_lock_screen(&self, path: &Path) -> Result<()> {
        let absolute = absolute(path)?;
        platform::set_lock_screen(&absolute)
    }

    fn release_renderer(&self) -> Result<()> {
        let killed = terminate_by_name(&RENDERER_PROCESSES);
        if killed > 0 {
            info!("Closed {} wallpaper renderer process(es)", killed);
        } else {
            debug!("No wallpaper renderer running");
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::process::Command;
    use windows::Win32::UI::WindowsAndMessaging::{
        SystemParametersInfoW, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETDESKWALLPAPER,
    };

    const DESKTOP_KEY: &str = r"HKCU\Control Panel\Desktop";
    const LOCK_SCREEN_KEY: &str =
        r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\PersonalizationCSP";

    pub fn to_wide_string(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(Some(0)).collect()
    }

    pub fn set_wallpaper(path: &Path) -> Result<()> {
        set_fit_style();
        let path_str = path
            .to_str()
            .ok_or_else(|| WallError::FileSystem("Invalid path string".to_string()))?;
        let path_wide = to_wide_string(path_str);
        let result = unsafe {
            SystemParametersInfoW(
                SPI_SETDESKWALLPAPER,
                0,
                Some(path_wide.as_ptr() as *mut _),
                SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
            )
        };
        result.map_err(|e| WallError::Process(format!("SystemParametersInfoW call failed: {}", e)))
    }

    pub fn set_lock_screen(path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        reg_add(LOCK_SCREEN_KEY, "LockScreenImagePath", "REG_SZ", &path_str)?;
        reg_add(LOCK_SCREEN_KEY, "LockScreenImageStatus", "REG_DWORD", "1")?;
        info!("Lock screen wallpaper set to {}", path_str);
        Ok(())
    }

    /// "Fit" keeps the whole image visible regardless of aspect ratio.
    fn set_fit_style() {
        let style = reg_add(DESKTOP_KEY, "WallpaperStyle", "REG_SZ", "6")
            .and_then(|_| reg_add(DESKTOP_KEY, "TileWallpaper", "REG_SZ", "0"));
        if let Err(e) = style {
            log::warn!("Failed to set desktop wallpaper style: {}", e);
        }
    }

    fn reg_add(key: &str, value: &str, kind: &str, data: &str) -> Result<()> {
        let output = Command::new("reg")
            .args(["add", key, "/v", value, "/t", kind, "/d", data, "/f"])
            .output()
            .map_err(|e| WallError::Process(format!("Failed to run reg add: {}", e)))?;
        if output.status.success() {
            debug!("{}\\{} set to {}", key, value, data);
            Ok(())
        } else {
            Err(WallError::Process(format!(
                "reg add {}\\{} failed: {}",
                key,
                value,
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::*;
    use std::process::Command;

    pub fn set_wallpaper(path: &Path) -> Result<()> {
        let script = format!(
            "tell application \"System Events\" to set picture of every desktop to \"{}\"",
            path.display()
        );
        run("osascript", &["-e", &script])
    }

    pub fn set_lock_screen(_path: &Path) -> Result<()> {
        debug!("Lock screen wallpaper is not supported on macOS");
        Ok(())
    }

    fn run(program: &str, args: &[&str]) -> Result<()> {
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| WallError::Process(format!("Failed to run {}: {}", program, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(WallError::Process(format!("{} exited with {}", program, status)))
        }
    }
}

#[cfg(not(any(windows, target_os = "macos")))]
mod platform {
    use super::*;
    use std::process::Command;

    pub fn set_wallpaper(path: &Path) -> Result<()> {
        let uri = format!("file://{}", path.display());
        for key in ["picture-uri", "picture-uri-dark"] {
            let status = Command::new("gsettings")
                .args(["set", "org.gnome.desktop.background", key, &uri])
                .status()
                .map_err(|e| WallError::Process(format!("Failed to run gsettings: {}", e)))?;
            if !status.success() {
                return Err(WallError::Process(format!(
                    "gsettings set {} exited with {}",
                    key, status
                )));
            }
        }
        Ok(())
    }

    pub fn set_lock_screen(_path: &Path) -> Result<()> {
        debug!("Lock screen wallpaper is not supported on this platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_keeps_absolute_paths() {
        let root = std::env::temp_dir().join("w.jpg");
        assert_eq!(absolute(&root).unwrap(), root);
    }

    #[test]
    fn test_absolute_resolves_relative_paths() {
        let resolved = absolute(Path::new("w.jpg")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("w.jpg"));
    }
}

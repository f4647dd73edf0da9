//! Application directory structure for vmwarden.
//!
//! Provides a single `WardenPaths` struct that resolves all standard
//! directories and ensures they exist on first launch:
//!
//! - Config:  `~/.config/vmwarden/`  (human-editable, XDG-style)
//! - Data:    `~/.local/share/vmwarden/`  (registry file)
//! - VMs:     `<data>/vms/`  (one subdirectory per VM: disk image, pidfile)
//! - Logs:    `<data>/logs/`
//!
//! On macOS the data root lives under `~/Library/Application Support` and
//! logs under `~/Library/Logs`, matching platform conventions.

use std::path::{Path, PathBuf};

use tracing::debug;

#[cfg(target_os = "macos")]
const BUNDLE_ID: &str = "dev.vmwarden.vmwarden";
const APP_NAME: &str = "vmwarden";

/// All resolved application directory paths.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    /// Human-editable config: `~/.config/vmwarden/`
    pub config: PathBuf,
    /// Machine-managed application data root
    pub data: PathBuf,
    /// Per-VM storage (disk images, pidfiles)
    pub vms: PathBuf,
    /// Application logs
    pub logs: PathBuf,
}

impl WardenPaths {
    /// Resolve all paths from the user's home directory.
    /// Does not create any directories — call `ensure()` for that.
    pub fn resolve() -> Option<Self> {
        let home = std::env::var("HOME").ok().map(PathBuf::from)?;

        let config = resolve_config_dir(&home);
        let data = resolve_data_dir(&home);
        let logs = resolve_log_dir(&home);

        Some(Self {
            config,
            vms: data.join("vms"),
            data,
            logs,
        })
    }

    /// Resolve with every directory rooted under `data_dir`, for a config
    /// override or tests.
    pub fn rooted_at(data_dir: PathBuf) -> Self {
        Self {
            config: data_dir.join("config"),
            vms: data_dir.join("vms"),
            logs: data_dir.join("logs"),
            data: data_dir,
        }
    }

    /// Create all directories that don't already exist.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.config, &self.data, &self.vms, &self.logs] {
            std::fs::create_dir_all(dir)?;
            debug!("ensured directory: {}", dir.display());
        }
        Ok(())
    }

    /// The registry file containing every VM record.
    pub fn registry_file(&self) -> PathBuf {
        self.data.join("registry.json")
    }

    /// Per-VM storage directory: `<vms>/<name>/`.
    pub fn vm_dir(&self, name: &str) -> PathBuf {
        self.vms.join(name)
    }

    /// The config file: `<config>/config.toml`.
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Platform-specific path resolution
// ---------------------------------------------------------------------------

fn resolve_config_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join(APP_NAME)
    } else {
        home.join(".config").join(APP_NAME)
    }
}

#[cfg(target_os = "macos")]
fn resolve_data_dir(home: &Path) -> PathBuf {
    home.join("Library")
        .join("Application Support")
        .join(BUNDLE_ID)
}

#[cfg(not(target_os = "macos"))]
fn resolve_data_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join(APP_NAME)
    } else {
        home.join(".local").join("share").join(APP_NAME)
    }
}

#[cfg(target_os = "macos")]
fn resolve_log_dir(home: &Path) -> PathBuf {
    home.join("Library").join("Logs").join(APP_NAME)
}

#[cfg(not(target_os = "macos"))]
fn resolve_log_dir(home: &Path) -> PathBuf {
    resolve_data_dir(home).join("logs")
}

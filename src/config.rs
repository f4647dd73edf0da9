//! Manager configuration, loaded from `~/.config/vmwarden/config.toml`.
//!
//! Every field has a compiled default, so a missing or partial file is
//! fine. On first run a commented default file is written so the user has
//! something to edit.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;

/// Tunables for the lifecycle manager and its external tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenConfig {
    /// Override the data root (registry, VM storage, logs). When unset the
    /// platform default from [`crate::paths::WardenPaths`] applies.
    pub data_dir: Option<PathBuf>,

    /// Hypervisor binary. Resolved via `PATH` unless absolute.
    pub qemu_system: String,

    /// Disk image tool. Resolved via `PATH` unless absolute.
    pub qemu_img: String,

    /// Pass `-enable-kvm` to the hypervisor.
    pub enable_kvm: bool,

    /// VNC display number for guest consoles (`-vnc :<n>`).
    pub vnc_display: u16,

    /// Seconds between reconciliation passes.
    pub reconcile_interval_secs: u64,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            qemu_system: "qemu-system-x86_64".to_string(),
            qemu_img: "qemu-img".to_string(),
            enable_kvm: true,
            vnc_display: 0,
            reconcile_interval_secs: 5,
        }
    }
}

impl WardenConfig {
    /// Load the config from `path`. A missing file yields the defaults; a
    /// malformed file is reported and the defaults apply (a bad config file
    /// should not brick the manager).
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config is malformed; using defaults");
                Ok(Self::default())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Default config template
// ---------------------------------------------------------------------------

/// Write the default config template to `path` if the file does not already
/// exist. Creates parent directories as needed. Failures are logged, not
/// fatal — the compiled defaults apply either way.
pub fn ensure_default_config(path: &Path) {
    if path.exists() {
        return;
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("failed to create config dir {}: {e}", parent.display());
            return;
        }
    }
    if let Err(e) = std::fs::write(path, default_config_content()) {
        warn!("failed to write default config at {}: {e}", path.display());
    }
}

/// A commented default config. Values match the compiled defaults so the
/// file is a no-op on first load but gives the user a complete reference.
pub fn default_config_content() -> &'static str {
    r#"# vmwarden configuration — every value shown is the compiled default.
# Delete a line to reset it; delete the file to reset everything.

# Override where vmwarden keeps its registry and VM disk images.
# data_dir = "/var/lib/vmwarden"

# External tools, resolved via PATH unless given as absolute paths.
qemu_system = "qemu-system-x86_64"
qemu_img = "qemu-img"

# Pass -enable-kvm to the hypervisor. Turn off on hosts without /dev/kvm.
enable_kvm = true

# VNC display number for guest consoles (-vnc :<n>).
vnc_display = 0

# Seconds between reconciliation passes (liveness re-check of running VMs).
reconcile_interval_secs = 5
"#
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Durable VM registry: the name → record mapping and its on-disk store.
//!
//! The registry is the single unit of persistence. It is loaded once at
//! startup and rewritten in full on every mutation; no component other than
//! the [`crate::manager::VmManager`] touches the backing file. Saves are
//! atomic (write to a temp file in the same directory, then rename over the
//! target) so concurrent readers never observe a half-written file.
//!
//! ## File format
//!
//! `registry.json` is a JSON object keyed by VM name:
//!
//! ```json
//! {
//!   "vm1": { "name": "vm1", "memory_mb": 1024, "disk_gb": 20,
//!            "iso": null, "status": "stopped", "pid": null,
//!            "created_at": "2026-08-30T12:00:00Z" }
//! }
//! ```
//!
//! Insertion order is preserved across save/load so `list()` stays stable.
//! Fields added in newer versions carry serde defaults, so registry files
//! written by older builds keep loading.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// VM record
// ---------------------------------------------------------------------------

/// Run state of a single VM.
///
/// `Starting` is transient: `start` moves a record through it in memory and
/// collapses it to `Running` once the hypervisor pid is confirmed, so a
/// persisted record is normally `Stopped`, `Running`, or `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Stopped,
    Starting,
    Running,
    Paused,
}

impl Default for VmStatus {
    fn default() -> Self {
        VmStatus::Stopped
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Stopped => "stopped",
            VmStatus::Starting => "starting",
            VmStatus::Running => "running",
            VmStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Persisted configuration plus runtime state for one virtual machine.
///
/// Invariant: `pid` is `Some` if and only if `status` is not `Stopped`.
/// [`Registry::normalize`] repairs records violating it at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    /// Unique, immutable identity (also the map key in the registry file).
    #[serde(default)]
    pub name: String,

    /// Guest memory allocation in megabytes. Fixed at creation.
    pub memory_mb: u32,

    /// Backing disk size in gigabytes. Fixed at creation.
    pub disk_gb: u32,

    /// Optional boot media (installer ISO).
    #[serde(default)]
    pub iso: Option<PathBuf>,

    #[serde(default)]
    pub status: VmStatus,

    /// Pid of the hypervisor process while the VM is not stopped.
    #[serde(default)]
    pub pid: Option<i32>,

    /// When the VM was created. Absent in registries written before the
    /// field existed.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl VmRecord {
    /// A fresh record in the `Stopped` state.
    pub fn new(name: String, memory_mb: u32, disk_gb: u32, iso: Option<PathBuf>) -> Self {
        Self {
            name,
            memory_mb,
            disk_gb,
            iso,
            status: VmStatus::Stopped,
            pid: None,
            created_at: Some(Utc::now()),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The full name → record mapping, in insertion order.
///
/// All mutation goes through the bounded API below; fields are not public.
/// Serializes as a JSON object keyed by name (see module docs).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    vms: Vec<VmRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vms.iter().any(|vm| vm.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&VmRecord> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VmRecord> {
        self.vms.iter_mut().find(|vm| vm.name == name)
    }

    /// Append a record. Fails with [`Error::DuplicateName`] if the name is
    /// already present; the registry is unchanged in that case.
    pub fn insert(&mut self, record: VmRecord) -> Result<()> {
        if self.contains(&record.name) {
            return Err(Error::DuplicateName(record.name));
        }
        self.vms.push(record);
        Ok(())
    }

    /// Remove and return the record with the given name, if any.
    pub fn remove(&mut self, name: &str) -> Option<VmRecord> {
        let idx = self.vms.iter().position(|vm| vm.name == name)?;
        Some(self.vms.remove(idx))
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &VmRecord> {
        self.vms.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VmRecord> {
        self.vms.iter_mut()
    }

    /// Repair records that violate the pid/status invariant. A crash between
    /// signal delivery and save can leave either half stale; the process
    /// table is the source of truth and the reconciler re-derives it, but a
    /// record with no pid to probe would otherwise stay wedged.
    pub fn normalize(&mut self) {
        for vm in &mut self.vms {
            match (vm.status, vm.pid) {
                (VmStatus::Stopped, Some(pid)) => {
                    debug!(name = %vm.name, pid, "clearing stale pid on stopped record");
                    vm.pid = None;
                }
                (status, None) if status != VmStatus::Stopped => {
                    warn!(name = %vm.name, %status, "record has no pid; marking stopped");
                    vm.status = VmStatus::Stopped;
                }
                _ => {}
            }
        }
    }
}

impl Serialize for Registry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.vms.len()))?;
        for vm in &self.vms {
            map.serialize_entry(&vm.name, vm)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Registry {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct RegistryVisitor;

        impl<'de> Visitor<'de> for RegistryVisitor {
            type Value = Registry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of VM name to VM record")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Registry, A::Error> {
                let mut vms: Vec<VmRecord> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, mut record)) =
                    access.next_entry::<String, VmRecord>()?
                {
                    // The map key is authoritative for identity.
                    record.name = name;
                    vms.push(record);
                }
                Ok(Registry { vms })
            }
        }

        deserializer.deserialize_map(RegistryVisitor)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// What to do when the registry file exists but cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Surface [`Error::RegistryCorrupt`] and refuse to start.
    Strict,
    /// Log the corruption and start from an empty registry. The corrupt
    /// file is overwritten on the next save.
    StartEmpty,
}

/// Owns the registry file on disk. Loading and saving always operate on the
/// whole registry; there are no partial updates.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry. A missing file yields an empty registry; an
    /// unparseable file is handled per `policy`. Loaded records are
    /// normalized (see [`Registry::normalize`]).
    pub fn load(&self, policy: RecoveryPolicy) -> Result<Registry> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no registry file; starting empty");
                return Ok(Registry::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut registry: Registry = match serde_json::from_str(&contents) {
            Ok(registry) => registry,
            Err(source) => match policy {
                RecoveryPolicy::Strict => {
                    return Err(Error::RegistryCorrupt {
                        path: self.path.clone(),
                        source,
                    });
                }
                RecoveryPolicy::StartEmpty => {
                    warn!(
                        path = %self.path.display(),
                        error = %source,
                        "registry is corrupt; starting from an empty registry"
                    );
                    return Ok(Registry::new());
                }
            },
        };

        registry.normalize();
        info!(path = %self.path.display(), vms = registry.len(), "registry loaded");
        Ok(registry)
    }

    /// Atomically persist the full registry: serialize into a temp file in
    /// the registry's directory, then rename it over the target. Creates the
    /// storage directory if absent.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, registry).map_err(io::Error::from)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!(path = %self.path.display(), vms = registry.len(), "registry saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Error taxonomy for the lifecycle core.
//!
//! Every public operation returns one of these named kinds so the
//! presentation layer can attribute a failure to a specific VM and
//! operation without ever seeing a raw OS error code. Validation errors
//! (`DuplicateName`, `NotFound`, `InvalidConfig`, `InvalidTransition`,
//! `AlreadyRunning`) are detected before any side effect; external-tool
//! failures (`DiskCreation`, `Launch`) carry the tool's diagnostic text
//! verbatim for operator visibility.

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::VmStatus;

#[derive(Debug, Error)]
pub enum Error {
    /// A VM with this name already exists in the registry.
    #[error("a VM named `{0}` already exists")]
    DuplicateName(String),

    /// No VM with this name exists in the registry.
    #[error("no VM named `{0}`")]
    NotFound(String),

    /// The requested configuration is invalid (bad name, non-positive
    /// memory or disk size).
    #[error("invalid configuration for `{name}`: {reason}")]
    InvalidConfig { name: String, reason: String },

    /// The operation is not legal from the VM's current state.
    #[error("cannot {op} `{name}` while it is {status}")]
    InvalidTransition {
        name: String,
        status: VmStatus,
        op: &'static str,
    },

    /// `start` was called on a VM that is not stopped.
    #[error("VM `{0}` is already running")]
    AlreadyRunning(String),

    /// `qemu-img` failed or could not be spawned. `diagnostic` is the
    /// tool's captured stderr (or the spawn error) verbatim.
    #[error("disk creation failed for `{name}`: {diagnostic}")]
    DiskCreation { name: String, diagnostic: String },

    /// The hypervisor could not be launched. `diagnostic` is the
    /// launcher's captured stderr (or the spawn error) verbatim.
    #[error("failed to launch hypervisor for `{name}`: {diagnostic}")]
    Launch { name: String, diagnostic: String },

    /// A signal was aimed at a pid that no longer exists. Soft: `stop`
    /// treats this as already-stopped rather than a hard failure.
    #[error("no process with pid {0}")]
    ProcessNotFound(i32),

    /// The registry file exists but could not be parsed. Fatal at load
    /// unless the caller explicitly opts into starting from an empty
    /// registry ([`crate::registry::RecoveryPolicy::StartEmpty`]).
    #[error("registry file {} is corrupt: {source}", path.display())]
    RegistryCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

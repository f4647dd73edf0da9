//! vmwarden: local QEMU virtual machine lifecycle manager.
//!
//! The core is the lifecycle manager — a state machine over
//! stopped/running/paused VMs, the process supervision that launches and
//! signals the underlying hypervisor, and a reconciliation loop that
//! periodically re-derives true state from the OS process table. The CLI
//! in `main.rs` is a thin presentation layer over [`manager::VmManager`].
//!
//! ```text
//! CLI command ──► VmManager ──► DiskProvisioner (qemu-img)
//!                    │     └──► Hypervisor      (qemu-system, signals)
//!                    ▼
//!              RegistryStore (registry.json, atomic writes)
//!                    ▲
//!              Reconciler (independent timer, liveness probes)
//! ```

pub mod config;
pub mod disk;
pub mod error;
pub mod logging;
pub mod manager;
pub mod paths;
pub mod reconciler;
pub mod registry;
pub mod supervisor;

pub use error::{Error, Result};
pub use manager::VmManager;
pub use registry::{RecoveryPolicy, Registry, RegistryStore, VmRecord, VmStatus};

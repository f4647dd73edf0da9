//! Hypervisor process supervision: launch, signal delivery, liveness.
//!
//! The pid is the sole handle to a running VM — there is no management
//! socket in this design. "Paused" is therefore approximated by process
//! suspension (SIGSTOP): a suspended hypervisor still holds its pid and
//! still reports alive to [`Hypervisor::is_alive`].
//!
//! ## Launch handshake
//!
//! QEMU is started with `-daemonize -pidfile <path>`: the launcher process
//! forks the real VM process, writes its pid to the pidfile, and exits.
//! [`QemuHypervisor::launch`] waits for the launcher to exit and then polls
//! the pidfile, so the returned pid is always confirmed — callers never see
//! a "running" VM whose pid is unknown.
//!
//! The capability trait exists so platforms without POSIX signals can
//! substitute their own job-control primitive, and so tests can drive the
//! manager with a fake process table.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// How long to wait for the daemonized hypervisor's pidfile to appear
/// after the launcher exits.
const PIDFILE_TIMEOUT: Duration = Duration::from_secs(5);
const PIDFILE_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Process-supervision capabilities the lifecycle manager depends on.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Launch the hypervisor for `spec` as an independent background
    /// process and return its pid. Returns only once the pid is confirmed;
    /// does not block for VM exit.
    async fn launch(&self, spec: &LaunchSpec) -> Result<i32>;

    /// Request graceful termination. [`Error::ProcessNotFound`] means the
    /// process already exited — callers treat that as already-stopped.
    fn signal_stop(&self, pid: i32) -> Result<()>;

    /// Suspend the process. Same not-found semantics as `signal_stop`.
    fn signal_pause(&self, pid: i32) -> Result<()>;

    /// Resume a suspended process. Same not-found semantics.
    fn signal_resume(&self, pid: i32) -> Result<()>;

    /// Non-destructive liveness probe. Must not perturb the process.
    fn is_alive(&self, pid: i32) -> bool;
}

/// Everything needed to build one hypervisor invocation.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// VM name, used only for error attribution.
    pub name: String,
    /// Guest memory in megabytes.
    pub memory_mb: u32,
    /// Primary disk image (qcow2).
    pub disk_path: PathBuf,
    /// Optional installer ISO; when present the VM boots from it.
    pub iso: Option<PathBuf>,
    /// Pass `-enable-kvm`.
    pub enable_kvm: bool,
    /// VNC display number for the guest console.
    pub vnc_display: u16,
    /// Where the daemonized hypervisor writes its pid.
    pub pidfile: PathBuf,
}

// ---------------------------------------------------------------------------
// QEMU implementation
// ---------------------------------------------------------------------------

/// Supervises `qemu-system-*` processes via POSIX signals.
#[derive(Debug, Clone)]
pub struct QemuHypervisor {
    binary: String,
}

impl QemuHypervisor {
    pub fn new(binary: String) -> Self {
        Self { binary }
    }
}

/// Build the QEMU argument vector for `spec`.
///
/// With an ISO attached the boot order is overridden to the CD (`-boot d`),
/// otherwise the first disk boots (`-boot c`) — same convention the VM was
/// installed with.
pub fn build_qemu_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = Vec::new();

    if spec.enable_kvm {
        args.push("-enable-kvm".to_string());
    }

    args.push("-m".to_string());
    args.push(spec.memory_mb.to_string());

    args.push("-drive".to_string());
    args.push(format!("file={},format=qcow2", spec.disk_path.display()));

    if let Some(iso) = &spec.iso {
        args.push("-cdrom".to_string());
        args.push(iso.display().to_string());
        args.push("-boot".to_string());
        args.push("d".to_string());
    } else {
        args.push("-boot".to_string());
        args.push("c".to_string());
    }

    args.push("-vnc".to_string());
    args.push(format!(":{}", spec.vnc_display));

    args.push("-daemonize".to_string());
    args.push("-pidfile".to_string());
    args.push(spec.pidfile.display().to_string());

    args
}

#[async_trait]
impl Hypervisor for QemuHypervisor {
    async fn launch(&self, spec: &LaunchSpec) -> Result<i32> {
        if spec.memory_mb == 0 {
            return Err(Error::Launch {
                name: spec.name.clone(),
                diagnostic: "memory size must be positive".to_string(),
            });
        }

        // A stale pidfile from a previous run would satisfy the rendezvous
        // poll below with a dead pid.
        match std::fs::remove_file(&spec.pidfile) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let args = build_qemu_args(spec);
        debug!(name = %spec.name, binary = %self.binary, ?args, "launching hypervisor");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Launch {
                name: spec.name.clone(),
                diagnostic: format!("failed to run `{}`: {e}", self.binary),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Launch {
                name: spec.name.clone(),
                diagnostic: format!(
                    "`{}` exited with {}: {}",
                    self.binary,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        // The launcher has exited; the daemonized VM's pid is in the
        // pidfile. Poll briefly in case the write raced the exit.
        let pid = self.await_pidfile(spec).await?;
        info!(name = %spec.name, pid, "hypervisor launched");
        Ok(pid)
    }

    fn signal_stop(&self, pid: i32) -> Result<()> {
        send_signal(pid, Signal::SIGTERM)
    }

    fn signal_pause(&self, pid: i32) -> Result<()> {
        send_signal(pid, Signal::SIGSTOP)
    }

    fn signal_resume(&self, pid: i32) -> Result<()> {
        send_signal(pid, Signal::SIGCONT)
    }

    fn is_alive(&self, pid: i32) -> bool {
        // Signal 0: existence check only, nothing is delivered.
        signal::kill(Pid::from_raw(pid), None).is_ok()
    }
}

impl QemuHypervisor {
    async fn await_pidfile(&self, spec: &LaunchSpec) -> Result<i32> {
        let deadline = tokio::time::Instant::now() + PIDFILE_TIMEOUT;

        loop {
            match std::fs::read_to_string(&spec.pidfile) {
                Ok(contents) => {
                    if let Ok(pid) = contents.trim().parse::<i32>() {
                        return Ok(pid);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Launch {
                    name: spec.name.clone(),
                    diagnostic: format!(
                        "launcher exited but pidfile {} never appeared",
                        spec.pidfile.display()
                    ),
                });
            }

            tokio::time::sleep(PIDFILE_POLL).await;
        }
    }
}

fn send_signal(pid: i32, sig: Signal) -> Result<()> {
    match signal::kill(Pid::from_raw(pid), sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(Error::ProcessNotFound(pid)),
        Err(errno) => Err(Error::Io(std::io::Error::from_raw_os_error(errno as i32))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

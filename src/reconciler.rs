//! Periodic reconciliation of recorded VM state against the process table.
//!
//! The hypervisor process is the only source of truth for whether a VM is
//! actually running; the registry can drift whenever a process exits
//! outside the manager's control (guest shutdown, crash, external kill).
//! The reconciler owns an independent tokio timer — it is not tied to any
//! presentation loop — and runs [`VmManager::reconcile_once`] on each tick,
//! which serializes against user commands through the manager's registry
//! lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::manager::VmManager;

/// Spawn the reconciliation loop. The first pass runs immediately, so
/// records left stale by a previous run are corrected at startup rather
/// than one period later.
///
/// The task runs until aborted or the runtime shuts down; a failed pass
/// (registry save error) is logged and retried on the next tick.
pub fn spawn(manager: Arc<VmManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match manager.reconcile_once().await {
                Ok(0) => {}
                Ok(corrected) => {
                    debug!(corrected, "reconciliation corrected stale records");
                }
                Err(e) => {
                    warn!(error = %e, "reconciliation pass failed");
                }
            }
        }
    })
}

//! vmwarden CLI: the presentation layer over the lifecycle manager.
//!
//! Each subcommand maps onto one manager operation and renders whatever
//! record or error it returns. `list` and `inspect` run a single
//! reconciliation pass first so the displayed status reflects the live
//! process table; `daemon` hosts the periodic reconciler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use vmwarden::config::{WardenConfig, ensure_default_config};
use vmwarden::paths::WardenPaths;
use vmwarden::registry::{RecoveryPolicy, VmRecord};
use vmwarden::{Error, VmManager, logging, reconciler};

/// Local QEMU virtual machine lifecycle manager.
#[derive(Parser, Debug)]
#[command(name = "vmwarden", version, about = "Local QEMU VM lifecycle manager")]
struct Args {
    /// Start from an empty registry if the registry file is corrupt.
    /// The corrupt file is overwritten on the next change.
    #[arg(long)]
    recover_empty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a VM and provision its backing disk image
    Create {
        name: String,
        /// Guest memory in megabytes
        #[arg(short, long, default_value_t = 1024)]
        memory: u32,
        /// Disk size in gigabytes
        #[arg(short, long, default_value_t = 20)]
        disk: u32,
        /// Installer ISO to boot from on first start
        #[arg(long)]
        iso: Option<PathBuf>,
    },
    /// Launch a stopped VM
    Start { name: String },
    /// Signal a VM's hypervisor to terminate
    Stop { name: String },
    /// Suspend a running VM's hypervisor process
    Pause { name: String },
    /// Resume a paused VM
    Resume { name: String },
    /// Remove a VM from the registry (force-stops it first)
    Delete { name: String },
    /// List all VMs with their current status
    List,
    /// Show one VM's full record
    Inspect { name: String },
    /// Run the reconciler loop in the foreground
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut paths = WardenPaths::resolve().context("HOME is not set; cannot resolve paths")?;
    ensure_default_config(&paths.config_file());
    let config = WardenConfig::load(&paths.config_file())?;

    // config.toml may relocate the data root; the config dir itself stays put.
    if let Some(dir) = &config.data_dir {
        paths.data = dir.clone();
        paths.vms = dir.join("vms");
        paths.logs = dir.join("logs");
    }

    let _log_guard = logging::init(&paths.logs);
    paths.ensure()?;

    let policy = if args.recover_empty {
        RecoveryPolicy::StartEmpty
    } else {
        RecoveryPolicy::Strict
    };

    let interval = Duration::from_secs(config.reconcile_interval_secs.max(1));
    let manager = match VmManager::open(paths, config, policy) {
        Ok(manager) => Arc::new(manager),
        Err(e @ Error::RegistryCorrupt { .. }) => {
            bail!("{e}\nhint: rerun with --recover-empty to start from an empty registry");
        }
        Err(e) => return Err(e.into()),
    };

    match args.command {
        Command::Create { name, memory, disk, iso } => {
            let record = manager.create(&name, memory, disk, iso).await?;
            println!("created `{}` ({} MB, {} GB)", record.name, record.memory_mb, record.disk_gb);
        }
        Command::Start { name } => {
            let record = manager.start(&name).await?;
            match record.pid {
                Some(pid) => println!("started `{}` (pid {pid})", record.name),
                None => println!("started `{}`", record.name),
            }
        }
        Command::Stop { name } => {
            let record = manager.stop(&name).await?;
            println!("stopped `{}`", record.name);
        }
        Command::Pause { name } => {
            let record = manager.pause(&name).await?;
            println!("`{}` is now {}", record.name, record.status);
        }
        Command::Resume { name } => {
            let record = manager.resume(&name).await?;
            println!("`{}` is now {}", record.name, record.status);
        }
        Command::Delete { name } => {
            manager.delete(&name).await?;
            println!("deleted `{name}`");
        }
        Command::List => {
            manager.reconcile_once().await?;
            print_table(&manager.list().await);
        }
        Command::Inspect { name } => {
            manager.reconcile_once().await?;
            print_record(&manager.inspect(&name).await?);
        }
        Command::Daemon => {
            println!(
                "vmwarden v{} — reconciling every {}s (ctrl-c to exit)",
                env!("CARGO_PKG_VERSION"),
                interval.as_secs()
            );
            let handle = reconciler::spawn(manager, interval);
            tokio::signal::ctrl_c().await?;
            handle.abort();
        }
    }

    Ok(())
}

fn print_table(records: &[VmRecord]) {
    if records.is_empty() {
        println!("no VMs — create one with `vmwarden create <name>`");
        return;
    }

    println!("{:<20} {:<9} {:>8} {:>9}  {}", "NAME", "STATUS", "MEM(MB)", "DISK(GB)", "PID");
    for vm in records {
        let pid = vm.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<9} {:>8} {:>9}  {}",
            vm.name, vm.status, vm.memory_mb, vm.disk_gb, pid
        );
    }
}

fn print_record(vm: &VmRecord) {
    println!("Name:    {}", vm.name);
    println!("Status:  {}", vm.status);
    println!("Memory:  {} MB", vm.memory_mb);
    println!("Disk:    {} GB", vm.disk_gb);
    println!(
        "ISO:     {}",
        vm.iso.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "none".to_string())
    );
    println!("PID:     {}", vm.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()));
    if let Some(created) = vm.created_at {
        println!("Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

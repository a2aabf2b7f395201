//! # lvmigrate
//!
//! Moves the LVM-backed disks of a libvirt domain to another volume group
//! while the domain keeps running.
//!
//! ## Usage
//! ```bash
//! lvmigrate web01 vg_fast
//! lvmigrate web01 vg_fast -d vdb -d vdc
//! lvmigrate web01 vg_fast --dry-run
//! ```
//!
//! Each run writes `<timestamp>_<domain>_<label>` XML snapshots to the
//! snapshot directory. They are removed after a successful run and kept
//! otherwise; the newest one is what to `virsh define` if the run died while
//! the domain was undefined.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};

use lvmigrate_core::{ErrorKind, MigrationError, MigrationRequest, Migrator, SnapshotLog};

mod cli;
mod config;

use cli::Args;
use config::{Config, LogFormat};

/// Exit status for usage errors; everything else exits with 1.
const EXIT_USAGE: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = Args::parse();

    let (config, config_path) = match Config::resolve(&args) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    // Initialize logging
    let logging = match config.log_format {
        LogFormat::Pretty => lvmigrate_common::init_logging(&config.log_level),
        LogFormat::Json => lvmigrate_common::init_logging_json(&config.log_level),
    };
    if let Err(e) = logging {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = config_path.as_deref().unwrap_or("<defaults>"),
        domain = %args.domain,
        destination_vg = %args.destination_vg,
        "Starting lvmigrate"
    );

    match run(&args, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Migration failed");
            eprintln!("Error: {}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    let virsh = config.virsh_backend();
    let lvm = config.lvm_backend();

    let request = MigrationRequest::new(&args.domain, &args.destination_vg)
        .with_devices(args.devices.clone());
    let snapshots = SnapshotLog::new(&config.migration.snapshot_dir, &args.domain);

    let mut migrator = Migrator::new(
        &virsh,
        &lvm,
        request,
        config.migration_options(args.dry_run),
        snapshots,
    );

    let plan = migrator.gather().await?;
    print!("{}", plan);

    let report = migrator.run().await?;

    if report.dry_run {
        println!("Dry run, nothing was changed");
    }
    if !report.cleanup_failures.is_empty() {
        warn!(volumes = ?report.cleanup_failures, "Old volumes were left behind");
        for volume in &report.cleanup_failures {
            eprintln!("Warning: old volume {} was not removed", volume);
        }
    }

    Ok(())
}

fn exit_status(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<MigrationError>().map(MigrationError::kind) {
        Some(ErrorKind::Usage) => EXIT_USAGE,
        _ => 1,
    }
}

//! Command-line argument parsing.

use clap::{Parser, ValueEnum};

/// lvmigrate - Migrate libvirt volumes between LVM volume groups
#[derive(Parser, Debug)]
#[command(name = "lvmigrate")]
#[command(about = "Migrate libvirt volumes between LVM volume groups")]
#[command(version)]
pub struct Args {
    /// Domain (virtual machine name) to operate on
    pub domain: String,

    /// Destination LVM volume group
    pub destination_vg: String,

    /// Only migrate the specified virtual devices (vda, vdb, etc.)
    #[arg(short, long = "device", value_name = "DEVICE")]
    pub devices: Vec<String>,

    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Libvirt connection URI passed to virsh (e.g., qemu:///system)
    #[arg(long)]
    pub connect: Option<String>,

    /// Directory for domain XML snapshots
    #[arg(long)]
    pub snapshot_dir: Option<String>,

    /// Show what would be migrated and stop
    #[arg(long)]
    pub dry_run: bool,
}

/// Log format as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

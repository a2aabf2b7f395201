//! # lvmigrate Core
//!
//! Live migration of a libvirt domain's LVM-backed disks from one volume
//! group to another.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Migrator                    │
//! │  GATHER → CREATE → UNDEFINE → COPY → DEFINE  │
//! │        → CLEANUP → DISCARD SNAPSHOTS         │
//! └───────┬───────────────┬──────────────┬───────┘
//!         ▼               ▼              ▼
//! ┌───────────────┐ ┌──────────────┐ ┌─────────────┐
//! │  Hypervisor   │ │VolumeManager │ │ SnapshotLog │
//! │ (virsh/mock)  │ │ (lvm/mock)   │ │ (XML files) │
//! └───────────────┘ └──────────────┘ └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lvmigrate_core::{
//!     LvmBackend, MigrationOptions, MigrationRequest, Migrator, SnapshotLog, VirshBackend,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let virsh = VirshBackend::new();
//!     let lvm = LvmBackend::new();
//!     let request = MigrationRequest::new("web01", "vg_fast");
//!
//!     let mut migrator = Migrator::new(
//!         &virsh,
//!         &lvm,
//!         request,
//!         MigrationOptions::default(),
//!         SnapshotLog::new(".", "web01"),
//!     );
//!     print!("{}", migrator.gather().await.unwrap());
//!     migrator.run().await.unwrap();
//! }
//! ```

mod command;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod lvm;
pub mod mock;
pub mod planner;
pub mod snapshot;
pub mod traits;
pub mod types;
pub mod virsh;

pub use descriptor::{DiskClass, DiskHandle, DiskNode, DomainDescriptor};
pub use error::{ErrorKind, MigrationError, Result};
pub use executor::{MigrationOptions, MigrationReport, MigrationRequest, Migrator, Phase};
pub use inventory::{parse_lvdisplay_record, VolumeInventory};
pub use lvm::LvmBackend;
pub use mock::{FailPoint, GatewayCall, MockGateway, MockVolume};
pub use planner::MigrationPlan;
pub use snapshot::SnapshotLog;
pub use traits::{Hypervisor, VolumeManager};
pub use types::{DiskEntry, LogicalVolume, DEFAULT_DEV_DIR};
pub use virsh::VirshBackend;

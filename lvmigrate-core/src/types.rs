//! Core data types shared across the migration engine.

use crate::descriptor::DiskHandle;

/// Default root of the volume manager's device namespace.
pub const DEFAULT_DEV_DIR: &str = "/dev";

/// Logical volume attributes as reported by `lvdisplay -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    /// Basename of the volume path (e.g. `web01-root`)
    pub name: String,
    /// Volume group holding the volume
    pub volume_group: String,
    /// Size in logical extents, always positive
    pub size_le: u64,
}

/// One eligible virtual disk of the domain, resolved against LVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    /// Target device name, e.g. `vda`
    pub device_id: String,
    /// Handle of the disk's `<source>` node inside the descriptor
    pub handle: DiskHandle,
    /// Current backing volume path
    pub source_path: String,
    /// Volume group currently holding the disk
    pub source_vg: String,
    /// Volume size in logical extents
    pub size_le: u64,
    /// Volume group the disk should end up in
    pub destination_vg: String,
    /// Name of the new volume (same as the source volume's name)
    pub destination_name: String,
    /// Path of the new volume in the volume manager's namespace
    pub destination_path: String,
}

impl DiskEntry {
    /// Build an entry from a discovered disk and its resolved volume.
    pub fn new(
        device_id: impl Into<String>,
        handle: DiskHandle,
        source_path: impl Into<String>,
        volume: LogicalVolume,
        destination_vg: impl Into<String>,
        dev_dir: &str,
    ) -> Self {
        let destination_vg = destination_vg.into();
        let destination_path = destination_path(dev_dir, &destination_vg, &volume.name);
        Self {
            device_id: device_id.into(),
            handle,
            source_path: source_path.into(),
            source_vg: volume.volume_group,
            size_le: volume.size_le,
            destination_vg,
            destination_name: volume.name,
            destination_path,
        }
    }

    /// Whether the disk has to move to reach the destination group.
    pub fn needs_migration(&self) -> bool {
        self.source_vg != self.destination_vg
    }
}

/// Compute `<dev_dir>/<vg>/<name>`.
///
/// An empty `dev_dir` yields `/<vg>/<name>`.
pub fn destination_path(dev_dir: &str, vg: &str, name: &str) -> String {
    format!("{}/{}/{}", dev_dir.trim_end_matches('/'), vg, name)
}

//! Resolution of domain disks to their backing logical volumes.

use std::path::Path;
use tracing::debug;

use crate::descriptor::DiskNode;
use crate::error::{MigrationError, Result};
use crate::traits::VolumeManager;
use crate::types::{DiskEntry, LogicalVolume};

// Positions in the `lvdisplay -c` record.
const FIELD_PATH: usize = 0;
const FIELD_VG: usize = 1;
const FIELD_CURRENT_LE: usize = 7;

/// Parse one `lvdisplay -c` record.
///
/// The record looks like
/// `  /dev/vg1/web01-root:vg1:3:1:-1:1:41943040:5120:-1:0:-1:253:0`.
pub fn parse_lvdisplay_record(volume_path: &str, output: &str) -> Result<LogicalVolume> {
    let malformed = |reason: String| MigrationError::VolumeRecord {
        path: volume_path.to_string(),
        reason,
    };

    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| malformed("empty output".to_string()))?;

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() <= FIELD_CURRENT_LE {
        return Err(malformed(format!(
            "expected at least {} fields, got {}",
            FIELD_CURRENT_LE + 1,
            fields.len()
        )));
    }

    let name = Path::new(fields[FIELD_PATH])
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| malformed(format!("no volume name in '{}'", fields[FIELD_PATH])))?;

    let volume_group = fields[FIELD_VG].trim();
    if volume_group.is_empty() {
        return Err(malformed("empty volume group".to_string()));
    }

    let size_le: u64 = fields[FIELD_CURRENT_LE]
        .trim()
        .parse()
        .map_err(|e| malformed(format!("bad extent count '{}': {}", fields[FIELD_CURRENT_LE], e)))?;
    if size_le == 0 {
        return Err(malformed("volume has zero extents".to_string()));
    }

    Ok(LogicalVolume {
        name,
        volume_group: volume_group.to_string(),
        size_le,
    })
}

/// Looks up logical volume metadata through a [`VolumeManager`].
pub struct VolumeInventory<'a> {
    volumes: &'a dyn VolumeManager,
}

impl<'a> VolumeInventory<'a> {
    pub fn new(volumes: &'a dyn VolumeManager) -> Self {
        Self { volumes }
    }

    /// One `lvdisplay` query for `device_path`.
    pub async fn resolve(&self, device_path: &str) -> Result<LogicalVolume> {
        let output = self.volumes.display(device_path).await?;
        let volume = parse_lvdisplay_record(device_path, &output)?;
        debug!(
            path = %device_path,
            vg = %volume.volume_group,
            size_le = volume.size_le,
            "Resolved logical volume"
        );
        Ok(volume)
    }

    /// Resolve every disk, in discovery order.
    pub async fn resolve_disks(
        &self,
        disks: &[DiskNode],
        destination_vg: &str,
        dev_dir: &str,
    ) -> Result<Vec<DiskEntry>> {
        let mut entries = Vec::with_capacity(disks.len());
        for disk in disks {
            let volume = self.resolve(&disk.source_path).await?;
            entries.push(DiskEntry::new(
                disk.device_id.clone(),
                disk.handle,
                disk.source_path.clone(),
                volume,
                destination_vg,
                dev_dir,
            ));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let out = "  /dev/vg1/web01-root:vg1:3:1:-1:1:41943040:5120:-1:0:-1:253:0\n";
        let lv = parse_lvdisplay_record("/dev/vg1/web01-root", out).unwrap();
        assert_eq!(
            lv,
            LogicalVolume {
                name: "web01-root".to_string(),
                volume_group: "vg1".to_string(),
                size_le: 5120,
            }
        );
    }

    #[test]
    fn test_parse_uses_record_path_for_name() {
        // The record is authoritative, not the path that was queried.
        let out = "/dev/vg1/real-name:vg1:3:1:-1:1:8192:1:-1:0:-1:253:4";
        let lv = parse_lvdisplay_record("/dev/mapper/vg1-real--name", out).unwrap();
        assert_eq!(lv.name, "real-name");
        assert_eq!(lv.size_le, 1);
    }

    #[test]
    fn test_parse_rejects_short_record() {
        let err = parse_lvdisplay_record("/dev/vg1/x", "/dev/vg1/x:vg1:3").unwrap_err();
        assert!(matches!(err, MigrationError::VolumeRecord { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
    }

    #[test]
    fn test_parse_rejects_bad_extents() {
        for le in ["abc", "", "-4", "0"] {
            let out = format!("/dev/vg1/x:vg1:3:1:-1:1:8192:{}:-1:0:-1:253:4", le);
            assert!(parse_lvdisplay_record("/dev/vg1/x", &out).is_err(), "accepted '{}'", le);
        }
    }

    #[test]
    fn test_parse_rejects_empty_output() {
        assert!(parse_lvdisplay_record("/dev/vg1/x", "  \n").is_err());
    }
}

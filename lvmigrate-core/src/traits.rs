//! Narrow interfaces to the external tools the migration drives.
//!
//! One method per operation. Implementations either shell out to the real
//! tools ([`crate::VirshBackend`], [`crate::LvmBackend`]) or simulate them in
//! memory ([`crate::MockGateway`]).

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Hypervisor management operations (libvirt via `virsh`).
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Return the persistent (inactive) domain XML.
    async fn dump_inactive_xml(&self, domain: &str) -> Result<String>;

    /// Remove the persistent definition. A running domain keeps running.
    async fn undefine(&self, domain: &str) -> Result<()>;

    /// Copy a live disk to `destination`, wait for it to be in sync and pivot
    /// the running domain onto it.
    ///
    /// Blocks until the pivot is done.
    async fn block_copy(&self, domain: &str, device: &str, destination: &str) -> Result<()>;

    /// Define a domain from an XML file.
    async fn define(&self, xml_file: &Path) -> Result<()>;
}

/// Logical volume management operations (LVM command line tools).
#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// Raw colon-separated record from `lvdisplay -c` for one volume.
    async fn display(&self, volume_path: &str) -> Result<String>;

    /// Create a zero-initialized volume of `size_le` extents in `vg`.
    async fn create(&self, vg: &str, name: &str, size_le: u64) -> Result<()>;

    /// Remove a volume.
    async fn remove(&self, volume_path: &str) -> Result<()>;
}

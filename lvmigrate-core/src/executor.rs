//! The migration state machine.
//!
//! ```text
//! GATHER -> CREATE_VOLUMES -> BEGIN_CRITICAL_SECTION -> COPY (per disk)
//!        -> END_CRITICAL_SECTION -> CLEANUP_OLD_VOLUMES -> DISCARD_SNAPSHOTS -> DONE
//! ```
//!
//! Any failure moves the run to ABORTED and leaves every snapshot on disk.
//! Nothing is rolled back. Between BEGIN_CRITICAL_SECTION and the end of
//! END_CRITICAL_SECTION the domain has no persistent definition; the latest
//! snapshot is what has to be fed to `virsh define` if the run dies there.

use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

use crate::descriptor::{DiskClass, DomainDescriptor};
use crate::error::{MigrationError, Result};
use crate::inventory::VolumeInventory;
use crate::planner::{self, MigrationPlan};
use crate::snapshot::SnapshotLog;
use crate::traits::{Hypervisor, VolumeManager};
use crate::types::{DiskEntry, DEFAULT_DEV_DIR};

/// Phases of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Gather,
    CreateVolumes,
    BeginCriticalSection,
    Copy,
    EndCriticalSection,
    CleanupOldVolumes,
    DiscardSnapshots,
    Done,
    Aborted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Gather => "GATHER",
            Phase::CreateVolumes => "CREATE_VOLUMES",
            Phase::BeginCriticalSection => "BEGIN_CRITICAL_SECTION",
            Phase::Copy => "COPY",
            Phase::EndCriticalSection => "END_CRITICAL_SECTION",
            Phase::CleanupOldVolumes => "CLEANUP_OLD_VOLUMES",
            Phase::DiscardSnapshots => "DISCARD_SNAPSHOTS",
            Phase::Done => "DONE",
            Phase::Aborted => "ABORTED",
        }
    }

    /// Whether the domain is without a persistent definition in this phase.
    pub fn in_critical_section(&self) -> bool {
        matches!(self, Phase::Copy | Phase::EndCriticalSection)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to migrate.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    /// Domain name
    pub domain: String,
    /// Destination volume group
    pub destination_vg: String,
    /// Restrict to these target devices; empty means all eligible disks
    pub devices: Vec<String>,
}

impl MigrationRequest {
    pub fn new(domain: impl Into<String>, destination_vg: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            destination_vg: destination_vg.into(),
            devices: Vec::new(),
        }
    }

    pub fn with_devices(mut self, devices: Vec<String>) -> Self {
        self.devices = devices;
        self
    }

    /// Reject arguments that cannot name a domain or volume group.
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(MigrationError::InvalidArgument("domain name is empty".to_string()));
        }
        if self.destination_vg.trim().is_empty() || self.destination_vg.contains('/') {
            return Err(MigrationError::InvalidArgument(format!(
                "'{}' is not a volume group name",
                self.destination_vg
            )));
        }
        if let Some(bad) = self.devices.iter().find(|d| d.trim().is_empty()) {
            return Err(MigrationError::InvalidArgument(format!("bad device name '{}'", bad)));
        }
        Ok(())
    }
}

/// How to migrate.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Root of the volume manager namespace for destination paths
    pub dev_dir: String,
    /// Abort on a failed removal of an old volume instead of warning
    pub strict_cleanup: bool,
    /// Stop after planning
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dev_dir: DEFAULT_DEV_DIR.to_string(),
            strict_cleanup: false,
            dry_run: false,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Devices now backed by volumes in the destination group
    pub migrated: Vec<String>,
    /// Devices that were already in the destination group
    pub skipped: Vec<String>,
    /// Volumes created in the destination group
    pub created_volumes: Vec<String>,
    /// Old volumes removed
    pub removed_volumes: Vec<String>,
    /// Old volumes that could not be removed
    pub cleanup_failures: Vec<String>,
    /// True if the run only planned
    pub dry_run: bool,
}

/// Phase state together with the data it owns.
enum State {
    Gather,
    CreateVolumes {
        descriptor: DomainDescriptor,
        plan: MigrationPlan,
    },
    BeginCriticalSection {
        descriptor: DomainDescriptor,
        plan: MigrationPlan,
    },
    Copy {
        descriptor: DomainDescriptor,
        plan: MigrationPlan,
        next: usize,
    },
    EndCriticalSection {
        descriptor: DomainDescriptor,
        plan: MigrationPlan,
    },
    CleanupOldVolumes {
        plan: MigrationPlan,
    },
    DiscardSnapshots,
    Done,
    Aborted,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Gather => Phase::Gather,
            State::CreateVolumes { .. } => Phase::CreateVolumes,
            State::BeginCriticalSection { .. } => Phase::BeginCriticalSection,
            State::Copy { .. } => Phase::Copy,
            State::EndCriticalSection { .. } => Phase::EndCriticalSection,
            State::CleanupOldVolumes { .. } => Phase::CleanupOldVolumes,
            State::DiscardSnapshots => Phase::DiscardSnapshots,
            State::Done => Phase::Done,
            State::Aborted => Phase::Aborted,
        }
    }
}

/// Drives one migration run against a hypervisor and a volume manager.
pub struct Migrator<'a> {
    hypervisor: &'a dyn Hypervisor,
    volumes: &'a dyn VolumeManager,
    request: MigrationRequest,
    options: MigrationOptions,
    snapshots: SnapshotLog,
    state: State,
    planned: Option<MigrationPlan>,
    report: MigrationReport,
}

impl<'a> Migrator<'a> {
    pub fn new(
        hypervisor: &'a dyn Hypervisor,
        volumes: &'a dyn VolumeManager,
        request: MigrationRequest,
        options: MigrationOptions,
        snapshots: SnapshotLog,
    ) -> Self {
        Self {
            hypervisor,
            volumes,
            request,
            options,
            snapshots,
            state: State::Gather,
            planned: None,
            report: MigrationReport::default(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// The migration set, once GATHER has completed.
    pub fn plan(&self) -> Option<&MigrationPlan> {
        self.planned.as_ref()
    }

    /// Snapshot files written so far.
    pub fn snapshots(&self) -> &[PathBuf] {
        self.snapshots.recorded()
    }

    /// Run GATHER only, so the caller can show the plan before anything is
    /// changed.
    pub async fn gather(&mut self) -> Result<&MigrationPlan> {
        if matches!(self.state, State::Gather) {
            self.advance().await?;
        }
        self.planned
            .as_ref()
            .ok_or_else(|| MigrationError::Internal("no plan after GATHER".to_string()))
    }

    /// Run the remaining phases to completion.
    pub async fn run(mut self) -> Result<MigrationReport> {
        while !matches!(self.state, State::Done) {
            self.advance().await?;
        }
        info!(domain = %self.request.domain, migrated = self.report.migrated.len(), "Migration complete");
        Ok(self.report)
    }

    /// Execute the current phase and move to the next one.
    async fn advance(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, State::Aborted);
        let phase = state.phase();

        match self.step(state).await {
            Ok(next) => {
                if next.phase() != phase {
                    info!(from = %phase, to = %next.phase(), "Phase transition");
                }
                self.state = next;
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    MigrationError::PhaseFailed { .. } => e,
                    other => self.failed(phase, None, other),
                };
                error!(
                    error = %err,
                    critical_section = phase.in_critical_section(),
                    "Migration aborted, snapshots retained"
                );
                self.state = State::Aborted;
                Err(err)
            }
        }
    }

    async fn step(&mut self, state: State) -> Result<State> {
        match state {
            State::Gather => self.gather_phase().await,
            State::CreateVolumes { descriptor, plan } => {
                self.create_volumes(&plan).await?;
                Ok(State::BeginCriticalSection { descriptor, plan })
            }
            State::BeginCriticalSection { descriptor, plan } => {
                self.begin_critical_section().await?;
                Ok(State::Copy { descriptor, plan, next: 0 })
            }
            State::Copy { mut descriptor, plan, next } => {
                self.copy_disk(&mut descriptor, &plan.entries[next]).await?;
                if next + 1 < plan.entries.len() {
                    Ok(State::Copy { descriptor, plan, next: next + 1 })
                } else {
                    Ok(State::EndCriticalSection { descriptor, plan })
                }
            }
            State::EndCriticalSection { descriptor, plan } => {
                self.end_critical_section(&descriptor).await?;
                Ok(State::CleanupOldVolumes { plan })
            }
            State::CleanupOldVolumes { plan } => {
                self.cleanup_old_volumes(&plan).await?;
                Ok(State::DiscardSnapshots)
            }
            State::DiscardSnapshots => {
                self.snapshots.discard_all()?;
                Ok(State::Done)
            }
            State::Done => Ok(State::Done),
            State::Aborted => Err(MigrationError::Internal(
                "migration was aborted and cannot continue".to_string(),
            )),
        }
    }

    #[instrument(skip(self), fields(domain = %self.request.domain, phase = "GATHER"))]
    async fn gather_phase(&mut self) -> Result<State> {
        self.request.validate()?;

        let xml = self.hypervisor.dump_inactive_xml(&self.request.domain).await?;
        self.snapshots.record("initial_state", &xml)?;

        let descriptor = DomainDescriptor::load(&xml)?;
        let disks = descriptor.find_disks_of_class(&DiskClass::BLOCK_RAW_DISK)?;

        // Reject typos before querying LVM.
        planner::check_requested(disks.iter().map(|d| d.device_id.as_str()), &self.request.devices)?;

        let inventory = VolumeInventory::new(self.volumes);
        let entries = inventory
            .resolve_disks(&disks, &self.request.destination_vg, &self.options.dev_dir)
            .await?;
        let plan = planner::plan(entries, &self.request.devices)?;

        for skipped in &plan.skipped {
            info!(
                device = %skipped.device_id,
                vg = %skipped.source_vg,
                "Disk already in destination volume group, skipping"
            );
        }
        self.report.skipped = plan.skipped.iter().map(|e| e.device_id.clone()).collect();
        self.planned = Some(plan.clone());

        if self.options.dry_run {
            info!(disks = plan.len(), "Dry run, stopping after planning");
            self.report.dry_run = true;
            return Ok(State::DiscardSnapshots);
        }
        if plan.is_empty() {
            info!("Nothing to migrate");
            return Ok(State::DiscardSnapshots);
        }

        info!(disks = plan.len(), destination_vg = %self.request.destination_vg, "Migration planned");
        Ok(State::CreateVolumes { descriptor, plan })
    }

    #[instrument(skip_all, fields(domain = %self.request.domain, phase = "CREATE_VOLUMES"))]
    async fn create_volumes(&mut self, plan: &MigrationPlan) -> Result<()> {
        for entry in &plan.entries {
            self.volumes
                .create(&entry.destination_vg, &entry.destination_name, entry.size_le)
                .await
                .map_err(|e| {
                    if !self.report.created_volumes.is_empty() {
                        warn!(
                            volumes = ?self.report.created_volumes,
                            "Volumes created so far are not removed automatically"
                        );
                    }
                    self.failed(Phase::CreateVolumes, Some(&entry.device_id), e)
                })?;
            self.report.created_volumes.push(entry.destination_path.clone());
        }
        Ok(())
    }

    #[instrument(skip_all, fields(domain = %self.request.domain, phase = "BEGIN_CRITICAL_SECTION"))]
    async fn begin_critical_section(&mut self) -> Result<()> {
        self.hypervisor.undefine(&self.request.domain).await?;
        warn!(
            snapshot = ?self.snapshots.last(),
            "Domain undefined; it has no persistent definition until the copy completes"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(domain = %self.request.domain, phase = "COPY", device = %entry.device_id))]
    async fn copy_disk(&mut self, descriptor: &mut DomainDescriptor, entry: &DiskEntry) -> Result<()> {
        let device = Some(entry.device_id.as_str());

        self.hypervisor
            .block_copy(&self.request.domain, &entry.device_id, &entry.destination_path)
            .await
            .map_err(|e| self.failed(Phase::Copy, device, e))?;

        descriptor
            .set_source_path(entry.handle, &entry.destination_path)
            .map_err(|e| self.failed(Phase::Copy, device, e))?;
        let xml = descriptor
            .serialize()
            .map_err(|e| self.failed(Phase::Copy, device, e))?;
        self.snapshots
            .record(&format!("after_{}", entry.device_id), &xml)
            .map_err(|e| self.failed(Phase::Copy, device, e))?;

        info!(destination = %entry.destination_path, "Disk migrated");
        self.report.migrated.push(entry.device_id.clone());
        Ok(())
    }

    #[instrument(skip_all, fields(domain = %self.request.domain, phase = "END_CRITICAL_SECTION"))]
    async fn end_critical_section(&mut self, descriptor: &DomainDescriptor) -> Result<()> {
        let xml = descriptor.serialize()?;
        let file = self.snapshots.record("final_state", &xml)?;
        self.hypervisor.define(&file).await?;
        info!("Domain defined again, critical section over");
        Ok(())
    }

    #[instrument(skip_all, fields(domain = %self.request.domain, phase = "CLEANUP_OLD_VOLUMES"))]
    async fn cleanup_old_volumes(&mut self, plan: &MigrationPlan) -> Result<()> {
        for entry in &plan.entries {
            match self.volumes.remove(&entry.source_path).await {
                Ok(()) => self.report.removed_volumes.push(entry.source_path.clone()),
                Err(e) if self.options.strict_cleanup => {
                    return Err(self.failed(Phase::CleanupOldVolumes, Some(&entry.device_id), e));
                }
                Err(e) => {
                    warn!(
                        device = %entry.device_id,
                        volume = %entry.source_path,
                        error = %e,
                        "Failed to remove old volume; remove it manually"
                    );
                    self.report.cleanup_failures.push(entry.source_path.clone());
                }
            }
        }
        Ok(())
    }

    fn failed(&self, phase: Phase, device: Option<&str>, source: MigrationError) -> MigrationError {
        MigrationError::PhaseFailed {
            phase,
            device: device.map(str::to_string),
            snapshot: self.snapshots.last().map(|p| p.to_path_buf()),
            source: Box::new(source),
        }
    }
}

//! In-memory hypervisor and volume manager for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{MigrationError, Result};
use crate::traits::{Hypervisor, VolumeManager};
use crate::types::{destination_path, DEFAULT_DEV_DIR};

/// A call made against the mock, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    DumpXml { domain: String },
    Undefine { domain: String },
    BlockCopy { domain: String, device: String, destination: String },
    Define { xml_file: PathBuf },
    Display { volume: String },
    Create { vg: String, name: String, size_le: u64 },
    Remove { volume: String },
}

impl GatewayCall {
    /// Whether the call changes hypervisor or volume state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, GatewayCall::DumpXml { .. } | GatewayCall::Display { .. })
    }
}

/// Calls that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    DumpXml,
    Undefine,
    Define,
    /// `blockcopy` of this device
    BlockCopy(String),
    /// `lvdisplay` of this volume path
    Display(String),
    /// `lvcreate` of a volume with this name
    Create(String),
    /// `lvremove` of this volume path
    Remove(String),
}

/// A simulated logical volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockVolume {
    pub vg: String,
    pub name: String,
    pub size_le: u64,
}

#[derive(Default)]
struct MockDomain {
    /// Persistent definition, `None` while undefined
    definition: Option<String>,
    /// Backing path per device of the running domain
    live_sources: HashMap<String, String>,
}

#[derive(Default)]
struct MockState {
    domains: HashMap<String, MockDomain>,
    volumes: BTreeMap<String, MockVolume>,
    calls: Vec<GatewayCall>,
    fail_points: Vec<FailPoint>,
}

/// Mock backend implementing both [`Hypervisor`] and [`VolumeManager`].
///
/// Useful for:
/// - Unit and integration testing of the executor
/// - Exercising failure paths without touching a real host
pub struct MockGateway {
    dev_dir: String,
    state: Mutex<MockState>,
}

impl MockGateway {
    /// Create an empty mock using `/dev` as volume namespace.
    pub fn new() -> Self {
        info!("Creating mock gateway");
        Self {
            dev_dir: DEFAULT_DEV_DIR.to_string(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Use a different volume namespace root for created volumes.
    pub fn with_dev_dir(mut self, dev_dir: impl Into<String>) -> Self {
        self.dev_dir = dev_dir.into();
        self
    }

    /// Add a defined, running domain.
    pub fn with_domain(self, name: &str, xml: &str) -> Self {
        self.lock_state().domains.insert(
            name.to_string(),
            MockDomain {
                definition: Some(xml.to_string()),
                live_sources: HashMap::new(),
            },
        );
        self
    }

    /// Add an existing volume at `path`.
    pub fn with_volume(self, path: &str, vg: &str, size_le: u64) -> Self {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.lock_state().volumes.insert(
            path.to_string(),
            MockVolume { vg: vg.to_string(), name, size_le },
        );
        self
    }

    /// Make the matching call fail with a tool error.
    pub fn fail_on(&self, point: FailPoint) {
        self.lock_state().fail_points.push(point);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock_state().calls.clone()
    }

    /// Calls that changed state.
    pub fn mutating_calls(&self) -> Vec<GatewayCall> {
        self.calls().into_iter().filter(GatewayCall::is_mutating).collect()
    }

    /// Volume at `path`, if present.
    pub fn volume(&self, path: &str) -> Option<MockVolume> {
        self.lock_state().volumes.get(path).cloned()
    }

    /// Persistent definition of `domain`, `None` if undefined or unknown.
    pub fn definition(&self, domain: &str) -> Option<String> {
        self.lock_state()
            .domains
            .get(domain)
            .and_then(|d| d.definition.clone())
    }

    /// Backing path of a running domain's device after a pivot.
    pub fn live_source(&self, domain: &str, device: &str) -> Option<String> {
        self.lock_state()
            .domains
            .get(domain)
            .and_then(|d| d.live_sources.get(device).cloned())
    }

    // Setup and inspection helpers tolerate a poisoned lock.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| MigrationError::Internal("Lock poisoned".to_string()))
    }

    /// Record `call` and fail it if a matching fail point is armed.
    fn enter(&self, call: GatewayCall, point: FailPoint) -> Result<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.lock()?;
        debug!(call = ?call, "Mock gateway call");
        let args = format!("{:?}", call);
        state.calls.push(call);
        if state.fail_points.contains(&point) {
            return Err(tool_failure(&args, "injected failure"));
        }
        Ok(state)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn tool_failure(args: &str, stderr: &str) -> MigrationError {
    MigrationError::ToolFailed {
        program: "mock".to_string(),
        args: args.to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

/// Extract `<name>` from domain XML. Good enough for test fixtures.
fn domain_name(xml: &str) -> Option<&str> {
    let start = xml.find("<name>")? + "<name>".len();
    let end = xml[start..].find("</name>")? + start;
    Some(xml[start..end].trim())
}

#[async_trait]
impl Hypervisor for MockGateway {
    async fn dump_inactive_xml(&self, domain: &str) -> Result<String> {
        let state = self.enter(
            GatewayCall::DumpXml { domain: domain.to_string() },
            FailPoint::DumpXml,
        )?;
        state
            .domains
            .get(domain)
            .and_then(|d| d.definition.clone())
            .ok_or_else(|| tool_failure(domain, "failed to get domain"))
    }

    async fn undefine(&self, domain: &str) -> Result<()> {
        let mut state = self.enter(
            GatewayCall::Undefine { domain: domain.to_string() },
            FailPoint::Undefine,
        )?;
        match state.domains.get_mut(domain) {
            Some(d) if d.definition.is_some() => {
                d.definition = None;
                Ok(())
            }
            _ => Err(tool_failure(domain, "domain is not defined")),
        }
    }

    async fn block_copy(&self, domain: &str, device: &str, destination: &str) -> Result<()> {
        let mut state = self.enter(
            GatewayCall::BlockCopy {
                domain: domain.to_string(),
                device: device.to_string(),
                destination: destination.to_string(),
            },
            FailPoint::BlockCopy(device.to_string()),
        )?;
        if !state.volumes.contains_key(destination) {
            return Err(tool_failure(destination, "destination does not exist"));
        }
        let d = state
            .domains
            .get_mut(domain)
            .ok_or_else(|| tool_failure(domain, "domain not found"))?;
        d.live_sources.insert(device.to_string(), destination.to_string());
        Ok(())
    }

    async fn define(&self, xml_file: &Path) -> Result<()> {
        let mut state = self.enter(
            GatewayCall::Define { xml_file: xml_file.to_path_buf() },
            FailPoint::Define,
        )?;
        let xml = std::fs::read_to_string(xml_file)
            .map_err(|e| tool_failure(&xml_file.display().to_string(), &e.to_string()))?;
        let name = domain_name(&xml)
            .ok_or_else(|| tool_failure(&xml_file.display().to_string(), "no domain name"))?
            .to_string();
        state.domains.entry(name).or_default().definition = Some(xml);
        Ok(())
    }
}

#[async_trait]
impl VolumeManager for MockGateway {
    async fn display(&self, volume_path: &str) -> Result<String> {
        let state = self.enter(
            GatewayCall::Display { volume: volume_path.to_string() },
            FailPoint::Display(volume_path.to_string()),
        )?;
        let v = state
            .volumes
            .get(volume_path)
            .ok_or_else(|| tool_failure(volume_path, "Failed to find logical volume"))?;
        // Same layout as `lvdisplay -c`; 4 MiB extents.
        Ok(format!(
            "  {}:{}:3:1:-1:1:{}:{}:-1:0:-1:253:0\n",
            volume_path,
            v.vg,
            v.size_le * 8192,
            v.size_le
        ))
    }

    async fn create(&self, vg: &str, name: &str, size_le: u64) -> Result<()> {
        let mut state = self.enter(
            GatewayCall::Create {
                vg: vg.to_string(),
                name: name.to_string(),
                size_le,
            },
            FailPoint::Create(name.to_string()),
        )?;
        let path = destination_path(&self.dev_dir, vg, name);
        if state.volumes.contains_key(&path) {
            return Err(tool_failure(&path, "Logical Volume already exists in volume group"));
        }
        state.volumes.insert(
            path,
            MockVolume {
                vg: vg.to_string(),
                name: name.to_string(),
                size_le,
            },
        );
        Ok(())
    }

    async fn remove(&self, volume_path: &str) -> Result<()> {
        let mut state = self.enter(
            GatewayCall::Remove { volume: volume_path.to_string() },
            FailPoint::Remove(volume_path.to_string()),
        )?;
        state
            .volumes
            .remove(volume_path)
            .map(|_| ())
            .ok_or_else(|| tool_failure(volume_path, "Failed to find logical volume"))
    }
}

//! Hypervisor backend driving libvirt through the `virsh` command line.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

use crate::command::ToolCommand;
use crate::error::Result;
use crate::traits::Hypervisor;

/// Default `virsh` binary.
pub const DEFAULT_VIRSH: &str = "virsh";

/// `virsh`-backed [`Hypervisor`].
#[derive(Debug, Clone)]
pub struct VirshBackend {
    /// virsh binary path
    virsh: String,
    /// Optional libvirt connection URI (`virsh -c <uri>`)
    connect_uri: Option<String>,
    /// Upper bound for `blockcopy`; `None` waits forever
    block_copy_timeout: Option<Duration>,
}

impl VirshBackend {
    /// Create a backend using `virsh` from `PATH` and its default connection.
    pub fn new() -> Self {
        Self {
            virsh: DEFAULT_VIRSH.to_string(),
            connect_uri: None,
            block_copy_timeout: None,
        }
    }

    /// Set the virsh binary path.
    pub fn with_virsh(mut self, path: impl Into<String>) -> Self {
        self.virsh = path.into();
        self
    }

    /// Connect to a specific libvirt URI, e.g. `qemu:///system`.
    pub fn with_connect_uri(mut self, uri: Option<String>) -> Self {
        self.connect_uri = uri;
        self
    }

    /// Bound the block copy. Passed to virsh as `--timeout` as well.
    pub fn with_block_copy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.block_copy_timeout = timeout;
        self
    }

    fn command(&self) -> ToolCommand {
        let cmd = ToolCommand::new(&self.virsh);
        match &self.connect_uri {
            Some(uri) => cmd.args(["-c", uri.as_str()]),
            None => cmd,
        }
    }

    fn block_copy_command(&self, domain: &str, device: &str, destination: &str) -> ToolCommand {
        let cmd = self
            .command()
            .args(["blockcopy", domain, device, destination, "--wait", "--verbose", "--pivot"]);

        match self.block_copy_timeout {
            // virsh gives up on its own; our own limit leaves it a grace period.
            Some(limit) => cmd
                .args(["--timeout".to_string(), limit.as_secs().to_string()])
                .timeout(Some(limit + Duration::from_secs(30))),
            None => cmd,
        }
    }
}

impl Default for VirshBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for VirshBackend {
    #[instrument(skip(self), fields(domain = %domain))]
    async fn dump_inactive_xml(&self, domain: &str) -> Result<String> {
        self.command()
            .args(["dumpxml", "--inactive", domain])
            .output()
            .await
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn undefine(&self, domain: &str) -> Result<()> {
        self.command().args(["undefine", domain]).output().await?;
        info!("Domain undefined");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain, device = %device, destination = %destination))]
    async fn block_copy(&self, domain: &str, device: &str, destination: &str) -> Result<()> {
        info!("Starting block copy, waiting for pivot");
        self.block_copy_command(domain, device, destination).output().await?;
        info!("Block copy finished and pivoted");
        Ok(())
    }

    #[instrument(skip(self), fields(xml_file = %xml_file.display()))]
    async fn define(&self, xml_file: &Path) -> Result<()> {
        self.command()
            .arg("define")
            .arg(xml_file.to_string_lossy())
            .output()
            .await?;
        info!("Domain defined");
        Ok(())
    }
}

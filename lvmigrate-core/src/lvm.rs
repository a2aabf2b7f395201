//! Volume manager backend using the LVM2 command line tools.

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::command::ToolCommand;
use crate::error::Result;
use crate::traits::VolumeManager;

/// LVM-backed [`VolumeManager`].
#[derive(Debug, Clone)]
pub struct LvmBackend {
    lvdisplay: String,
    lvcreate: String,
    lvremove: String,
}

impl LvmBackend {
    /// Create a backend using the LVM tools from `PATH`.
    pub fn new() -> Self {
        Self {
            lvdisplay: "lvdisplay".to_string(),
            lvcreate: "lvcreate".to_string(),
            lvremove: "lvremove".to_string(),
        }
    }

    /// Override the tool binaries.
    pub fn with_tools(
        mut self,
        lvdisplay: impl Into<String>,
        lvcreate: impl Into<String>,
        lvremove: impl Into<String>,
    ) -> Self {
        self.lvdisplay = lvdisplay.into();
        self.lvcreate = lvcreate.into();
        self.lvremove = lvremove.into();
        self
    }

    fn create_command(&self, vg: &str, name: &str, size_le: u64) -> ToolCommand {
        ToolCommand::new(&self.lvcreate).args([
            vg.to_string(),
            "-l".to_string(),
            size_le.to_string(),
            "-n".to_string(),
            name.to_string(),
            "-Z".to_string(),
            "y".to_string(),
        ])
    }
}

impl Default for LvmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeManager for LvmBackend {
    #[instrument(skip(self), fields(volume = %volume_path))]
    async fn display(&self, volume_path: &str) -> Result<String> {
        ToolCommand::new(&self.lvdisplay)
            .args(["-c", volume_path])
            .output()
            .await
    }

    #[instrument(skip(self), fields(vg = %vg, name = %name, size_le = size_le))]
    async fn create(&self, vg: &str, name: &str, size_le: u64) -> Result<()> {
        self.create_command(vg, name, size_le).output().await?;
        info!("Logical volume created");
        Ok(())
    }

    #[instrument(skip(self), fields(volume = %volume_path))]
    async fn remove(&self, volume_path: &str) -> Result<()> {
        // lvremove asks for confirmation on active volumes.
        ToolCommand::new(&self.lvremove)
            .arg(volume_path)
            .interactive()
            .output()
            .await?;
        info!("Logical volume removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_shape() {
        let cmd = LvmBackend::new().create_command("vg2", "web01-root", 5120);
        assert_eq!(cmd.args_display(), "vg2 -l 5120 -n web01-root -Z y");
    }

    #[tokio::test]
    async fn test_display_returns_stdout() {
        // `echo` stands in for lvdisplay and echoes the arguments back.
        let backend = LvmBackend::new().with_tools("echo", "true", "true");
        let out = backend.display("/dev/vg1/web01-root").await.unwrap();
        assert_eq!(out.trim(), "-c /dev/vg1/web01-root");
    }

    #[tokio::test]
    async fn test_remove_prompt_is_not_captured() {
        // `sh` stands in for lvremove and runs the "volume path" as a script.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("lvremove-prompt.sh");
        std::fs::write(
            &script,
            "printf 'Do you really want to remove active logical volume vg1/web01-root? [y/n]: ' >&2\nexit 5\n",
        )
        .unwrap();

        let backend = LvmBackend::new().with_tools("true", "true", "sh");
        let err = backend.remove(script.to_str().unwrap()).await.unwrap_err();

        match err {
            crate::MigrationError::ToolFailed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, crate::command::STDERR_ON_TERMINAL);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

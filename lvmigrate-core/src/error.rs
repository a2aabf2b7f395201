//! Error types for the migration engine.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::executor::Phase;

/// Broad classification of a [`MigrationError`].
///
/// None of the kinds is retried and none triggers a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad operator input, reported before any mutating call.
    Usage,
    /// An external tool could not be run or exited non-zero.
    Tool,
    /// Domain XML or a volume record could not be interpreted.
    Parse,
    /// A snapshot file could not be written or removed.
    Io,
    /// The engine was misused or reached an inconsistent state.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Usage => "usage error",
            ErrorKind::Tool => "tool error",
            ErrorKind::Parse => "parse error",
            ErrorKind::Io => "I/O error",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while planning or executing a migration.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A requested device is not an eligible disk of the domain.
    #[error("Unknown device '{0}': not an eligible block/raw disk of the domain")]
    UnknownDevice(String),

    /// Invalid argument supplied by the operator.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The tool binary could not be spawned.
    #[error("Failed to launch {program}: {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited unsuccessfully.
    #[error("{program} {args} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    /// The tool did not finish within the configured timeout.
    #[error("{program} {args} did not finish within {secs}s")]
    ToolTimeout {
        program: String,
        args: String,
        secs: u64,
    },

    /// A tool printed output that is not valid UTF-8.
    #[error("{program} {args} produced unreadable output: {reason}")]
    ToolOutput {
        program: String,
        args: String,
        reason: String,
    },

    /// Domain XML is malformed.
    #[error("Failed to parse domain XML: {0}")]
    XmlParse(String),

    /// An eligible disk is missing a required element or attribute.
    #[error("Invalid disk definition: {0}")]
    DiskDefinition(String),

    /// `lvdisplay -c` output could not be interpreted.
    #[error("Malformed volume record for {path}: {reason}")]
    VolumeRecord { path: String, reason: String },

    /// Snapshot file I/O failed.
    #[error("Snapshot file {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A failure raised inside an executor phase, with recovery context.
    #[error("{}", phase_failure_message(.phase, .device, .snapshot, .source))]
    PhaseFailed {
        phase: Phase,
        device: Option<String>,
        snapshot: Option<PathBuf>,
        #[source]
        source: Box<MigrationError>,
    },
}

fn phase_failure_message(
    phase: &Phase,
    device: &Option<String>,
    snapshot: &Option<PathBuf>,
    source: &MigrationError,
) -> String {
    let mut msg = format!("Phase {} failed", phase);
    if let Some(device) = device {
        msg.push_str(&format!(" on device {}", device));
    }
    msg.push_str(&format!(": {}", source));
    if let Some(snapshot) = snapshot {
        msg.push_str(&format!(" (last snapshot: {})", snapshot.display()));
    }
    msg
}

impl MigrationError {
    /// Classify the error. Phase failures report the kind of their cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::UnknownDevice(_) | MigrationError::InvalidArgument(_) => ErrorKind::Usage,
            MigrationError::ToolLaunch { .. }
            | MigrationError::ToolFailed { .. }
            | MigrationError::ToolTimeout { .. } => ErrorKind::Tool,
            MigrationError::Internal(_) => ErrorKind::Internal,
            MigrationError::ToolOutput { .. }
            | MigrationError::XmlParse(_)
            | MigrationError::DiskDefinition(_)
            | MigrationError::VolumeRecord { .. } => ErrorKind::Parse,
            MigrationError::Snapshot { .. } => ErrorKind::Io,
            MigrationError::PhaseFailed { source, .. } => source.kind(),
        }
    }

    /// The phase in which the error surfaced, if it came from the executor.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            MigrationError::PhaseFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The snapshot file an operator should recover from, if any was written.
    pub fn recovery_snapshot(&self) -> Option<&PathBuf> {
        match self {
            MigrationError::PhaseFailed { snapshot, .. } => snapshot.as_ref(),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for MigrationError {
    fn from(e: quick_xml::Error) -> Self {
        MigrationError::XmlParse(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for MigrationError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        MigrationError::XmlParse(e.to_string())
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

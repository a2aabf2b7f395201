//! Selection of the disks that actually have to move.
//!
//! Pure functions over already resolved [`DiskEntry`] values; nothing here
//! talks to external tools.

use std::collections::HashSet;
use std::fmt;

use crate::error::{MigrationError, Result};
use crate::types::DiskEntry;

/// The outcome of planning: disks to migrate and disks left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Disks to migrate, in discovery order
    pub entries: Vec<DiskEntry>,
    /// Candidates already in the destination group
    pub skipped: Vec<DiskEntry>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "Nothing to migrate");
        }
        writeln!(f, "Will migrate the following disks:")?;
        for e in &self.entries {
            writeln!(
                f,
                "{}\t{:40}\t{} LE to {}",
                e.device_id, e.source_path, e.size_le, e.destination_path
            )?;
        }
        Ok(())
    }
}

/// Fail with a usage error if any requested device is not in `known`.
pub fn check_requested<'a, I>(known: I, requested: &[String]) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let known: HashSet<&str> = known.into_iter().collect();
    match requested.iter().find(|d| !known.contains(d.as_str())) {
        Some(unknown) => Err(MigrationError::UnknownDevice(unknown.clone())),
        None => Ok(()),
    }
}

/// Build the migration set.
///
/// With no `requested` devices every entry is a candidate, otherwise only the
/// named ones are. Candidates already in their destination group are skipped.
pub fn plan(entries: Vec<DiskEntry>, requested: &[String]) -> Result<MigrationPlan> {
    check_requested(entries.iter().map(|e| e.device_id.as_str()), requested)?;

    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let mut plan = MigrationPlan::default();

    for entry in entries {
        if !wanted.is_empty() && !wanted.contains(entry.device_id.as_str()) {
            continue;
        }
        if entry.needs_migration() {
            plan.entries.push(entry);
        } else {
            plan.skipped.push(entry);
        }
    }

    Ok(plan)
}

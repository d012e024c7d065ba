//! Jail directories, backed by ZFS datasets when the parent is one.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::command::{CommandError, Invocation, Runner};
use crate::compose;
use crate::error::{IoContext, JailError, Result};

pub struct Storage<'a> {
    runner: &'a dyn Runner,
    mounts_table: &'a Path,
}

impl<'a> Storage<'a> {
    pub fn new(runner: &'a dyn Runner, mounts_table: &'a Path) -> Self {
        Self {
            runner,
            mounts_table,
        }
    }

    /// Name of the ZFS dataset mounted exactly at `path`, if any.
    pub fn dataset(&self, path: &Path) -> Option<String> {
        let path = fs::canonicalize(path).ok()?;
        let table = match fs::read_to_string(self.mounts_table) {
            Ok(table) => table,
            Err(e) => {
                warn!(table = %self.mounts_table.display(), "cannot read mount table: {e}");
                return None;
            }
        };
        zfs_mounts(&table)
            .find(|(_, mountpoint)| Path::new(mountpoint) == path)
            .map(|(dataset, _)| dataset)
    }

    /// Create `path` as a child dataset when its parent is a dataset, as a
    /// plain directory otherwise. Either way the result is mode 0700.
    pub fn create_dir(&self, path: &Path) -> Result<()> {
        let parent_dataset = path.parent().and_then(|parent| self.dataset(parent));
        match (parent_dataset, path.file_name().and_then(|n| n.to_str())) {
            (Some(parent), Some(name)) => {
                let dataset = format!("{parent}/{name}");
                info!("creating ZFS dataset {dataset}");
                self.run_checked(&compose::zfs_create(&dataset))?;
            }
            _ => fs::create_dir_all(path).context(|| format!("create {}", path.display()))?,
        }
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .context(|| format!("chmod {}", path.display()))
    }

    /// Remove a jail directory or dataset with everything in it.
    pub fn remove(&self, path: &Path) -> Result<()> {
        if let Some(dataset) = self.dataset(path) {
            info!("cleaning up: {}", path.display());
            return self.run_checked(&compose::zfs_destroy(&dataset));
        }
        if !path.is_dir() {
            return Ok(());
        }
        info!("cleaning up: {}", path.display());
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Immutable or append-only files inside the rootfs refuse
                // removal until their attributes are cleared.
                debug!("clearing file attributes below {}", path.display());
                if let Err(e) = self.runner.run(&compose::clear_attributes(path)) {
                    warn!("{e}");
                }
                fs::remove_dir_all(path).context(|| format!("remove {}", path.display()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JailError::io(format!("remove {}", path.display()), e)),
        }
    }

    fn run_checked(&self, inv: &Invocation) -> Result<()> {
        match self.runner.run(inv)? {
            0 => Ok(()),
            code => Err(CommandError {
                command: inv.to_string(),
                detail: format!("exited with {code}"),
            }
            .into()),
        }
    }
}

/// `(dataset, mountpoint)` for every ZFS mount in a `/proc/mounts` table.
fn zfs_mounts(table: &str) -> impl Iterator<Item = (String, String)> + '_ {
    table.lines().filter_map(|line| {
        let mut fields = line.split_whitespace();
        let source = fields.next()?;
        let mountpoint = fields.next()?;
        let fstype = fields.next()?;
        (fstype == "zfs").then(|| (unescape_mount(source), unescape_mount(mountpoint)))
    })
}

/// Undo the octal escapes the kernel uses for whitespace and backslashes
/// in mount table fields.
fn unescape_mount(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

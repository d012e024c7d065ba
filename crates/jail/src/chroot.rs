//! Scoped alternate root for reading files as a rootfs sees them.
//!
//! Changing the root is process-wide, so a [`Chroot`] must only be held by
//! the single thread doing jail management.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::error;

/// While alive, `/` is `new_root`. Dropping restores the original root and
/// working directory, including when the work in between failed.
#[derive(Debug)]
pub struct Chroot {
    old_root: File,
    old_cwd: PathBuf,
}

impl Chroot {
    pub fn enter(new_root: &Path) -> io::Result<Self> {
        let old_root = File::open("/")?;
        let old_cwd = std::env::current_dir()?;
        std::env::set_current_dir(new_root)?;
        if let Err(e) = std::os::unix::fs::chroot(".") {
            let _ = std::env::set_current_dir(&old_cwd);
            return Err(e);
        }
        Ok(Self { old_root, old_cwd })
    }

    fn restore(&self) -> io::Result<()> {
        nix::unistd::fchdir(&self.old_root).map_err(io::Error::from)?;
        std::os::unix::fs::chroot(".")?;
        std::env::set_current_dir(&self.old_cwd)
    }
}

impl Drop for Chroot {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("failed to leave chroot: {e}");
        }
    }
}

/// Run `f` with `root` as the filesystem root.
pub fn with_root<T>(root: &Path, f: impl FnOnce() -> T) -> io::Result<T> {
    let _guard = Chroot::enter(root)?;
    Ok(f())
}

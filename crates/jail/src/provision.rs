//! Fetching root filesystem images.

use std::fs;
use std::io::{BufRead, BufReader, Lines};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Stdio};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::command::{CommandError, Runner};
use crate::compose::{self, FetchSpec};
use crate::error::{IoContext, JailError, Result};
use crate::interrupt;
use crate::settings::Settings;

/// Distributions the download script lists but that cannot boot under
/// systemd-nspawn with jailmaker's defaults.
pub const INCOMPATIBLE_DISTROS: [&str; 8] = [
    "alpine",
    "amazonlinux",
    "busybox",
    "devuan",
    "funtoo",
    "openwrt",
    "plamo",
    "voidlinux",
];

/// One rootfs download.
#[derive(Debug, Clone)]
pub struct ProvisionRequest<'a> {
    pub name: &'a str,
    pub jail_dir: &'a Path,
    pub rootfs: &'a Path,
    pub distro: &'a str,
    pub release: &'a str,
}

/// Source of root filesystems.
pub trait RootfsFetcher {
    /// Populate `req.rootfs` with the requested image.
    fn provision(&self, req: &ProvisionRequest<'_>) -> Result<()>;

    /// Available images, one `distro release arch variant build` line each,
    /// with incompatible distributions left out.
    fn images(&self) -> Result<Box<dyn Iterator<Item = String>>>;
}

/// Whether an image listing line names a bootable distribution.
pub fn is_compatible_image(line: &str) -> bool {
    match line.split_once(char::is_whitespace) {
        Some((distro, _)) => !INCOMPATIBLE_DISTROS.contains(&distro),
        None => true,
    }
}

/// [`RootfsFetcher`] backed by the LXC download script, pinned by digest.
pub struct LxcDownload<'a> {
    settings: &'a Settings,
    runner: &'a dyn Runner,
}

impl<'a> LxcDownload<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn Runner) -> Self {
        Self { settings, runner }
    }

    /// Make sure a trusted copy of the download script is in place.
    ///
    /// A copy owned by anyone other than the trusted user is discarded.
    /// A missing or mismatching copy is downloaded again, and a download
    /// that still doesn't match the pinned digest is an error.
    pub fn ensure_script(&self) -> Result<PathBuf> {
        let paths = &self.settings.paths;
        let source = &self.settings.fetcher;
        for dir in [paths.lxc_dir(), paths.lxc_cache_dir()] {
            fs::create_dir_all(&dir).context(|| format!("create {}", dir.display()))?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
                .context(|| format!("chmod {}", dir.display()))?;
        }

        let script = paths.fetcher_script();
        if let Ok(meta) = fs::symlink_metadata(&script)
            && meta.uid() != source.trusted_uid
        {
            warn!(
                "{} is owned by uid {}, not {}; removing it",
                script.display(),
                meta.uid(),
                source.trusted_uid
            );
            fs::remove_file(&script).context(|| format!("remove {}", script.display()))?;
        }

        if sha256_file(&script)?.as_deref() != Some(source.sha256.as_str()) {
            info!("downloading {}", source.url);
            download(&source.url, &script)?;
            let actual = sha256_file(&script)?.unwrap_or_default();
            if actual != source.sha256 {
                return Err(JailError::Integrity {
                    path: script,
                    expected: source.sha256.clone(),
                    actual,
                });
            }
        }

        fs::set_permissions(&script, fs::Permissions::from_mode(0o700))
            .context(|| format!("chmod {}", script.display()))?;
        Ok(script)
    }
}

impl RootfsFetcher for LxcDownload<'_> {
    fn provision(&self, req: &ProvisionRequest<'_>) -> Result<()> {
        let script = self.ensure_script()?;
        interrupt::check()?;
        let cache_dir = self.settings.paths.lxc_cache_dir();
        let inv = compose::fetcher_provision(&FetchSpec {
            script: &script,
            cache_dir: &cache_dir,
            name: req.name,
            jail_dir: req.jail_dir,
            rootfs: req.rootfs,
            arch: &self.settings.arch,
            distro: req.distro,
            release: req.release,
        });
        debug!(cmd = %inv, "fetching rootfs");
        match self.runner.run(&inv)? {
            0 => Ok(()),
            code => Err(JailError::ProvisionFailed(code)),
        }
    }

    fn images(&self) -> Result<Box<dyn Iterator<Item = String>>> {
        let script = self.ensure_script()?;
        let inv = compose::fetcher_list(
            &script,
            &self.settings.paths.lxc_cache_dir(),
            &self.settings.arch,
        );
        Ok(Box::new(ImageList::spawn(&inv)?))
    }
}

/// Streams the image listing while the script runs. The script always
/// exits non-zero in list mode, so its status is ignored.
pub struct ImageList {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ImageList {
    fn spawn(inv: &crate::command::Invocation) -> Result<Self> {
        let mut child = inv
            .to_command()
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| CommandError {
                command: inv.to_string(),
                detail: e.to_string(),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| CommandError {
            command: inv.to_string(),
            detail: "no stdout".into(),
        })?;
        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

impl Iterator for ImageList {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.lines.next()? {
                Ok(line) if is_compatible_image(&line) => return Some(line),
                Ok(_) => continue,
                Err(e) => {
                    warn!("reading image list: {e}");
                    return None;
                }
            }
        }
    }
}

impl Drop for ImageList {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Hex SHA-256 of a file, or `None` if it doesn't exist.
fn sha256_file(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(format!("{:x}", Sha256::digest(&data)))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(JailError::io(format!("read {}", path.display()), e)),
    }
}

fn download(url: &str, dest: &Path) -> Result<()> {
    let err = |detail: String| JailError::Download {
        url: url.to_string(),
        detail,
    };
    let mut response = ureq::get(url).call().map_err(|e| err(e.to_string()))?;
    let body = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| err(e.to_string()))?;
    fs::write(dest, body).context(|| format!("write {}", dest.display()))
}

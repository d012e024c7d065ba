//! Run-wide settings, resolved once at startup and passed by reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::config::Document;
use crate::error::{IoContext, JailError, Result};
use crate::paths::JailmakerPaths;

/// Short tag prefixed to unit names and files this tool owns.
pub const TOOL_TAG: &str = "jlmkr";

/// Pinned copy of the LXC download template used to fetch root filesystems.
pub const FETCHER_SCRIPT_URL: &str = "https://raw.githubusercontent.com/Jip-Hop/lxc/97f93be72ebf380f3966259410b70b1c966b0ff0/templates/lxc-download.in";
pub const FETCHER_SCRIPT_SHA256: &str =
    "cfcb5d08b24187d108f2ab0d21a6cc4b73dcd7f5d7dfc80803bfd7f1642d638d";

const USER_CONF: &str = ".local/share/jailmaker.conf";
const USER_CONF_KEY: &str = "jailmaker_dir";

/// Where the rootfs fetcher script comes from and who may own the cached copy.
#[derive(Debug, Clone)]
pub struct FetcherSource {
    pub url: String,
    pub sha256: String,
    pub trusted_uid: u32,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: JailmakerPaths,
    pub tool_tag: String,
    /// Architecture name as the fetcher expects it.
    pub arch: String,
    pub fetcher: FetcherSource,
    pub stop_poll_interval: Duration,
    pub intel_device_dir: PathBuf,
    pub mounts_table: PathBuf,
    /// Read files inside a rootfs through `chroot(2)` (requires root).
    pub chroot_introspection: bool,
}

impl Settings {
    pub fn new(jailmaker_dir: PathBuf) -> Self {
        Self {
            paths: JailmakerPaths::new(jailmaker_dir),
            tool_tag: TOOL_TAG.to_string(),
            arch: host_arch().to_string(),
            fetcher: FetcherSource {
                url: FETCHER_SCRIPT_URL.to_string(),
                sha256: FETCHER_SCRIPT_SHA256.to_string(),
                trusted_uid: 0,
            },
            stop_poll_interval: Duration::from_secs(1),
            intel_device_dir: PathBuf::from("/dev/dri"),
            mounts_table: PathBuf::from("/proc/mounts"),
            chroot_introspection: nix::unistd::geteuid().is_root(),
        }
    }

    /// Resolve the jailmaker directory and build settings around it.
    ///
    /// `explicit` is the `--dir` flag or `JAILMAKER_DIR`; without it the
    /// `jailmaker_dir` key of `~/.local/share/jailmaker.conf` is used, taking
    /// the invoking user's home when running under sudo.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        let dir = match explicit {
            Some(dir) => dir,
            None => match user_home() {
                Some(home) => dir_from_user_conf(&home.join(USER_CONF))?,
                None => None,
            }
            .ok_or_else(|| {
                JailError::Settings(
                    "please specify a jailmaker directory path (--dir or JAILMAKER_DIR)".into(),
                )
            })?,
        };
        let dir = std::path::absolute(&dir).context(|| format!("resolve {}", dir.display()))?;
        debug!(dir = %dir.display(), "using jailmaker directory");
        Ok(Self::new(dir))
    }
}

/// The fetcher's name for the architecture this binary was built for.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        other => other,
    }
}

fn user_home() -> Option<PathBuf> {
    if nix::unistd::getuid().is_root()
        && let Ok(sudo_user) = std::env::var("SUDO_USER")
        && let Ok(Some(user)) = nix::unistd::User::from_name(&sudo_user)
    {
        return Some(user.dir);
    }
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Read `jailmaker_dir` from the user conf file; a missing file is not an error.
fn dir_from_user_conf(path: &Path) -> Result<Option<PathBuf>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(JailError::io(format!("read {}", path.display()), e)),
    };
    // The file may carry an ini-style section header; sections are irrelevant here.
    let body: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim_start().starts_with('['))
        .collect();
    let doc = Document::parse(&body.join("\n"), &path.display().to_string())?;
    Ok(doc
        .get_opt(USER_CONF_KEY)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from))
}

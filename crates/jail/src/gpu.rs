//! GPU passthrough arguments for systemd-nspawn.
//!
//! Passthrough never fails a start: when the host isn't ready the jail
//! starts without the GPU and a warning says why.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::command::Runner;
use crate::compose;
use crate::error::{IoContext, JailError, Result};
use crate::nofollow;
use crate::paths::{JailPaths, inside};
use crate::rootfs::RootfsView;

const NVIDIA_SMI: &str = "/usr/bin/nvidia-smi";
const LD_SO_CONF_MODE: u32 = 0o644;

pub struct GpuPassthrough<'a> {
    runner: &'a dyn Runner,
    intel_device_dir: &'a Path,
    tool_tag: &'a str,
}

impl<'a> GpuPassthrough<'a> {
    pub fn new(runner: &'a dyn Runner, intel_device_dir: &'a Path, tool_tag: &'a str) -> Self {
        Self {
            runner,
            intel_device_dir,
            tool_tag,
        }
    }

    /// Bind the DRI device directory when it exists.
    pub fn intel(&self, enabled: bool) -> Vec<String> {
        if enabled && self.intel_device_dir.exists() {
            vec![format!("--bind={}", self.intel_device_dir.display())]
        } else {
            Vec::new()
        }
    }

    /// Mount arguments exposing the host's NVIDIA driver to the jail.
    ///
    /// When disabled, the linker config an earlier enabled start left in the
    /// rootfs is removed.
    pub fn nvidia(&self, enabled: bool, name: &str, jail: &JailPaths) -> Result<Vec<String>> {
        let rootfs = jail.rootfs();
        let view = RootfsView::new(&rootfs, false);
        let conf_path = inside::nvidia_ld_so_conf(self.tool_tag);
        if !enabled {
            let Some(conf) = view.host_target(&conf_path) else {
                return Ok(Vec::new());
            };
            return match fs::remove_file(&conf) {
                Ok(()) => Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(JailError::io(format!("remove {}", conf.display()), e)),
            };
        }

        if !matches!(self.runner.run(&compose::modprobe_nvidia()), Ok(0)) {
            warn!("failed to load the nvidia-current-uvm kernel module");
        }
        if !matches!(self.runner.run(&compose::nvidia_smi()), Ok(0)) {
            warn!("nvidia-smi failed; skipping passthrough of the NVIDIA GPU");
            return Ok(Vec::new());
        }

        let (libraries, mut others) = match self.nvidia_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("{e}; skipping passthrough of the NVIDIA GPU");
                return Ok(Vec::new());
            }
        };
        others.insert(PathBuf::from(NVIDIA_SMI));

        let mut mounts = Vec::new();
        for file in &others {
            if !file.exists() {
                warn!("skipped mounting {}, it doesn't exist", file.display());
                continue;
            }
            if file.starts_with("/dev/") {
                mounts.push(format!("--bind={}", file.display()));
            } else {
                mounts.push(format!("--bind-ro={}", file.display()));
            }
        }

        let Some(conf) = view
            .host_dir(inside::LD_SO_CONF_DIR)
            .and_then(|_| view.host_target(&conf_path))
        else {
            warn!(
                "{} doesn't exist in jail {name}; skipping passthrough of the NVIDIA libraries",
                inside::LD_SO_CONF_DIR
            );
            return Ok(mounts);
        };

        let library_dirs: BTreeSet<String> = libraries
            .iter()
            .filter_map(|lib| lib.parent())
            .map(|dir| dir.display().to_string())
            .collect();
        mounts.extend(library_dirs.iter().map(|dir| format!("--bind-ro={dir}")));

        let current: BTreeSet<String> = nofollow::read_to_string(&conf)
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default();
        if current != library_dirs {
            let text: String = library_dirs.iter().map(|d| format!("{d}\n")).collect();
            nofollow::write(&conf, &text, LD_SO_CONF_MODE)
                .context(|| format!("write {}", conf.display()))?;
            info!("refreshing the linker cache of jail {name}");
            match self.runner.run(&compose::ldconfig(name, &rootfs, &mounts)) {
                Ok(0) => {}
                Ok(code) => warn!("ldconfig in jail {name} exited with {code}"),
                Err(e) => warn!("{e}"),
            }
        }

        Ok(mounts)
    }

    /// Driver files on the host, split into libraries and everything else.
    fn nvidia_files(&self) -> Result<(BTreeSet<PathBuf>, BTreeSet<PathBuf>)> {
        let parse = |text: String| -> BTreeSet<PathBuf> {
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect()
        };
        let libraries = parse(self.runner.capture(&compose::nvidia_container_list(true))?);
        let all = parse(self.runner.capture(&compose::nvidia_container_list(false))?);
        let others = all.difference(&libraries).cloned().collect();
        Ok((libraries, others))
    }
}

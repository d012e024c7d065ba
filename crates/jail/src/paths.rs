use std::path::{Path, PathBuf};

pub const JAILS_DIR_NAME: &str = "jails";
pub const JAIL_CONFIG_NAME: &str = "config";
pub const JAIL_ROOTFS_NAME: &str = "rootfs";

/// Locations inside a rootfs, as the jail sees them.
pub mod inside {
    /// Present once the jail has booted at least once.
    pub const MACHINE_ID: &str = "/etc/machine-id";
    pub const RESOLV_CONF: &str = "/etc/resolv.conf";
    pub const SECURETTY: &str = "/etc/securetty";
    pub const NETWORK_DIR: &str = "/etc/systemd/network";
    /// Network unit the image ships for the `host0` interface.
    pub const DEFAULT_HOST0_NETWORK: &str = "/lib/systemd/network/80-container-host0.network";
    pub const PRESET_DIR: &str = "/etc/systemd/system-preset";
    pub const LD_SO_CONF_DIR: &str = "/etc/ld.so.conf.d";

    pub fn nvidia_ld_so_conf(tool_tag: &str) -> String {
        format!("{LD_SO_CONF_DIR}/{tool_tag}-nvidia.conf")
    }
}

/// Paths rooted at the jailmaker directory.
#[derive(Debug, Clone)]
pub struct JailmakerPaths {
    root: PathBuf,
}

impl JailmakerPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jails_dir(&self) -> PathBuf {
        self.root.join(JAILS_DIR_NAME)
    }

    pub fn jail(&self, name: &str) -> JailPaths {
        JailPaths::new(self.jails_dir().join(name))
    }

    pub fn lxc_dir(&self) -> PathBuf {
        self.root.join(".lxc")
    }

    pub fn lxc_cache_dir(&self) -> PathBuf {
        self.lxc_dir().join("cache")
    }

    pub fn fetcher_script(&self) -> PathBuf {
        self.lxc_dir().join("lxc-download.sh")
    }
}

/// Per-jail paths, on the host and inside the jail's rootfs.
#[derive(Debug, Clone)]
pub struct JailPaths {
    dir: PathBuf,
}

impl JailPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> PathBuf {
        self.dir.join(JAIL_CONFIG_NAME)
    }

    pub fn rootfs(&self) -> PathBuf {
        self.dir.join(JAIL_ROOTFS_NAME)
    }

    /// Host-side hook script, e.g. `.ExecStartPre`.
    pub fn hook_script(&self, property: &str) -> PathBuf {
        self.dir.join(format!(".{property}"))
    }

    /// Host path of a location inside the rootfs, joined without resolving
    /// symlinks. Only for reading; see [`crate::rootfs::RootfsView`] for
    /// paths the host writes to.
    pub fn in_rootfs(&self, path: &str) -> PathBuf {
        self.rootfs().join(path.trim_start_matches('/'))
    }

    pub fn machine_id(&self) -> PathBuf {
        self.in_rootfs(inside::MACHINE_ID)
    }

    pub fn resolv_conf(&self) -> PathBuf {
        self.in_rootfs(inside::RESOLV_CONF)
    }

    pub fn securetty(&self) -> PathBuf {
        self.in_rootfs(inside::SECURETTY)
    }

    pub fn network_dir(&self) -> PathBuf {
        self.in_rootfs(inside::NETWORK_DIR)
    }

    pub fn default_host0_network(&self) -> PathBuf {
        self.in_rootfs(inside::DEFAULT_HOST0_NETWORK)
    }

    pub fn preset_dir(&self) -> PathBuf {
        self.in_rootfs(inside::PRESET_DIR)
    }

    pub fn ld_so_conf_dir(&self) -> PathBuf {
        self.in_rootfs(inside::LD_SO_CONF_DIR)
    }

    pub fn nvidia_ld_so_conf(&self, tool_tag: &str) -> PathBuf {
        self.in_rootfs(&inside::nvidia_ld_so_conf(tool_tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jail_paths_are_joined_under_jails_dir() {
        let paths = JailmakerPaths::new(PathBuf::from("/mnt/tank/jailmaker"));
        let jail = paths.jail("demo");
        assert_eq!(jail.dir(), Path::new("/mnt/tank/jailmaker/jails/demo"));
        assert_eq!(
            jail.config(),
            PathBuf::from("/mnt/tank/jailmaker/jails/demo/config")
        );
        assert_eq!(
            jail.rootfs(),
            PathBuf::from("/mnt/tank/jailmaker/jails/demo/rootfs")
        );
        assert_eq!(
            jail.machine_id(),
            PathBuf::from("/mnt/tank/jailmaker/jails/demo/rootfs/etc/machine-id")
        );
    }

    #[test]
    fn hook_script_is_hidden_file_in_jail_dir() {
        let jail = JailPaths::new(PathBuf::from("/j/demo"));
        assert_eq!(
            jail.hook_script("ExecStartPre"),
            PathBuf::from("/j/demo/.ExecStartPre")
        );
    }

    #[test]
    fn fetcher_paths_live_in_hidden_lxc_dir() {
        let paths = JailmakerPaths::new(PathBuf::from("/j"));
        assert_eq!(
            paths.fetcher_script(),
            PathBuf::from("/j/.lxc/lxc-download.sh")
        );
        assert_eq!(paths.lxc_cache_dir(), PathBuf::from("/j/.lxc/cache"));
    }

    #[test]
    fn nvidia_conf_is_tagged() {
        let jail = JailPaths::new(PathBuf::from("/j/demo"));
        assert_eq!(
            jail.nvidia_ld_so_conf("jlmkr"),
            PathBuf::from("/j/demo/rootfs/etc/ld.so.conf.d/jlmkr-nvidia.conf")
        );
    }
}

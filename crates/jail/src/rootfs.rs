//! Reading and preparing a jail's root filesystem.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::chroot;
use crate::error::{IoContext, JailError, Result};
use crate::nofollow;
use crate::os_release;
use crate::paths::{JailPaths, inside};

const MAX_SYMLINK_HOPS: usize = 40;
const SECURETTY_PTS: u32 = 10;
const ROOTFS_FILE_MODE: u32 = 0o644;
const OS_RELEASE_FILES: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

const MACVLAN_NETWORK: &str = "[Match]
Virtualization=container
Name=mv-*

[Network]
DHCP=yes
LinkLocalAddressing=ipv6

[DHCPv4]
UseDNS=true
UseTimezone=true
";

const VETH_EXTRA_NETWORK: &str = "[Match]
Virtualization=container
Name=vee-*

[Network]
DHCP=yes
LinkLocalAddressing=ipv6

[DHCPv4]
UseDNS=true
UseTimezone=true
";

const NETWORKD_PRESET: &str = "enable systemd-networkd.service\n";

/// Read-only view of a rootfs where absolute paths and symlinks resolve
/// against the rootfs rather than the host.
///
/// With `chroot` set, reads go through a real [`chroot::Chroot`]; otherwise
/// symlinks are followed by hand below the root.
#[derive(Debug, Clone, Copy)]
pub struct RootfsView<'a> {
    root: &'a Path,
    chroot: bool,
}

impl<'a> RootfsView<'a> {
    pub fn new(root: &'a Path, chroot: bool) -> Self {
        Self { root, chroot }
    }

    /// Canonical in-rootfs path for `path`, or `None` if it doesn't resolve.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        if self.chroot {
            return match chroot::with_root(self.root, || fs::canonicalize(path)) {
                Ok(Ok(resolved)) => Some(resolved),
                Ok(Err(_)) => None,
                Err(e) => {
                    warn!(root = %self.root.display(), "chroot failed: {e}");
                    None
                }
            };
        }

        self.resolve_inside(Path::new(path))
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    /// Host path to write `path` at. The directories resolve inside the
    /// rootfs, so a symlinked parent cannot point the write at the host; the
    /// last component is left alone for [`crate::nofollow`] to check.
    pub fn host_target(&self, path: &str) -> Option<PathBuf> {
        let path = Path::new(path);
        let dir = self.resolve_inside(path.parent()?)?;
        Some(self.host_path(&dir).join(path.file_name()?))
    }

    /// Host path of an existing directory inside the rootfs.
    pub fn host_dir(&self, path: &str) -> Option<PathBuf> {
        let dir = self.host_path(&self.resolve_inside(Path::new(path))?);
        dir.is_dir().then_some(dir)
    }

    /// Create `path` and its missing parents inside the rootfs and return
    /// its host path.
    pub fn create_dir_all(&self, path: &str) -> io::Result<PathBuf> {
        let mut dir = PathBuf::from("/");
        for part in Path::new(path).components() {
            let Component::Normal(part) = part else {
                continue;
            };
            let next = dir.join(part);
            dir = match self.resolve_inside(&next) {
                Some(resolved) => resolved,
                None => {
                    fs::create_dir(self.host_path(&next))?;
                    next
                }
            };
        }
        let host = self.host_path(&dir);
        if host.is_dir() {
            Ok(host)
        } else {
            Err(io::Error::from(io::ErrorKind::NotADirectory))
        }
    }

    /// Resolve symlinks by hand, never leaving the rootfs.
    fn resolve_inside(&self, path: &Path) -> Option<PathBuf> {
        let mut resolved = PathBuf::from("/");
        let mut pending = reversed_parts(path);
        let mut hops = 0;
        while let Some(part) = pending.pop() {
            if part == ".." {
                resolved.pop();
                continue;
            }
            let candidate = resolved.join(&part);
            let host = self.host_path(&candidate);
            if !fs::symlink_metadata(&host).ok()?.file_type().is_symlink() {
                resolved = candidate;
                continue;
            }
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return None;
            }
            let target = fs::read_link(&host).ok()?;
            if target.is_absolute() {
                resolved = PathBuf::from("/");
            }
            pending.extend(reversed_parts(&target));
        }
        Some(resolved)
    }

    pub fn read_to_string(&self, path: &str) -> io::Result<String> {
        if self.chroot {
            chroot::with_root(self.root, || fs::read_to_string(path))?
        } else {
            let resolved = self
                .resolve(path)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            fs::read_to_string(self.host_path(&resolved))
        }
    }

    /// os-release fields of the rootfs; empty when none can be read.
    pub fn os_release(&self) -> BTreeMap<String, String> {
        OS_RELEASE_FILES
            .iter()
            .find_map(|f| self.read_to_string(f).ok())
            .map(|text| os_release::parse(&text))
            .unwrap_or_default()
    }

    /// Name of the binary `/sbin/init` resolves to, e.g. "systemd".
    pub fn init_system(&self) -> Option<String> {
        self.resolve("/sbin/init")?
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    }

    /// Only systemd-based images can be booted. NixOS does not link
    /// `/sbin/init` to systemd but boots fine.
    pub fn has_supported_init(&self) -> bool {
        if self.init_system().as_deref() == Some("systemd") {
            return true;
        }
        self.os_release().get("ID").map(String::as_str) == Some("nixos")
    }

    fn host_path(&self, inner: &Path) -> PathBuf {
        self.root.join(inner.strip_prefix("/").unwrap_or(inner))
    }
}

/// Path components as a stack: the first component is popped first.
fn reversed_parts(path: &Path) -> Vec<OsString> {
    path.components()
        .rev()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect()
}

/// Adjust a freshly provisioned rootfs for running under systemd-nspawn.
///
/// Host-managed identity files are removed, root logins on the container
/// console are allowed, and networkd gets DHCP configs for macvlan and
/// veth-extra interfaces when the image uses it.
pub fn prepare(jail: &JailPaths) -> Result<()> {
    let rootfs = jail.rootfs();
    let view = RootfsView::new(&rootfs, false);

    for path in [inside::MACHINE_ID, inside::RESOLV_CONF] {
        let Some(target) = view.host_target(path) else {
            continue;
        };
        match fs::remove_file(&target) {
            Ok(()) => debug!(path = %target.display(), "removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(JailError::io(format!("remove {}", target.display()), e)),
        }
    }

    create_dir_all(&view, "/etc")?;
    let ttys: String = (0..=SECURETTY_PTS).map(|i| format!("pts/{i}\n")).collect();
    write(&view, inside::SECURETTY, &ttys)?;

    if view.host_dir(inside::NETWORK_DIR).is_none() {
        return Ok(());
    }

    match view.read_to_string(inside::DEFAULT_HOST0_NETWORK) {
        // Keep IPv6 link-local addressing (needed for SLAAC and DHCPv6) but
        // drop it on IPv4 so DHCP can assign an address.
        Ok(text) => write(
            &view,
            &format!("{}/80-container-host0.network", inside::NETWORK_DIR),
            &text.replace("LinkLocalAddressing=yes", "LinkLocalAddressing=ipv6"),
        )?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(JailError::io(
                format!("read {}", inside::DEFAULT_HOST0_NETWORK),
                e,
            ));
        }
    }

    write(
        &view,
        &format!("{}/mv-dhcp.network", inside::NETWORK_DIR),
        MACVLAN_NETWORK,
    )?;
    write(
        &view,
        &format!("{}/vee-dhcp.network", inside::NETWORK_DIR),
        VETH_EXTRA_NETWORK,
    )?;

    create_dir_all(&view, inside::PRESET_DIR)?;
    write(
        &view,
        &format!("{}/00-jailmaker.preset", inside::PRESET_DIR),
        NETWORKD_PRESET,
    )
}

fn create_dir_all(view: &RootfsView<'_>, path: &str) -> Result<PathBuf> {
    view.create_dir_all(path)
        .context(|| format!("create {path} in {}", view.root().display()))
}

/// Write a file inside the rootfs without following symlinks out of it.
fn write(view: &RootfsView<'_>, path: &str, content: &str) -> Result<()> {
    let target = view.host_target(path).ok_or_else(|| {
        JailError::io(
            format!("resolve {path} in {}", view.root().display()),
            io::ErrorKind::NotFound.into(),
        )
    })?;
    nofollow::write(&target, content, ROOTFS_FILE_MODE)
        .context(|| format!("write {}", target.display()))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    fn rootfs_with_init(target: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/lib/systemd")).unwrap();
        fs::write(root.join("usr/lib/systemd/systemd"), "").unwrap();
        fs::create_dir_all(root.join("usr/sbin")).unwrap();
        symlink("usr/lib", root.join("lib")).unwrap();
        symlink("usr/sbin", root.join("sbin")).unwrap();
        symlink(target, root.join("usr/sbin/init")).unwrap();
        dir
    }

    #[test]
    fn absolute_init_link_resolves_inside_rootfs() {
        let dir = rootfs_with_init("/lib/systemd/systemd");
        let view = RootfsView::new(dir.path(), false);
        assert_eq!(view.init_system().as_deref(), Some("systemd"));
        assert!(view.has_supported_init());
    }

    #[test]
    fn relative_init_link_resolves() {
        let dir = rootfs_with_init("../lib/systemd/systemd");
        let view = RootfsView::new(dir.path(), false);
        assert_eq!(
            view.resolve("/sbin/init"),
            Some(PathBuf::from("/usr/lib/systemd/systemd"))
        );
    }

    #[test]
    fn busybox_init_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("sbin")).unwrap();
        fs::write(root.join("bin/busybox"), "").unwrap();
        symlink("/bin/busybox", root.join("sbin/init")).unwrap();

        let view = RootfsView::new(root, false);
        assert_eq!(view.init_system().as_deref(), Some("busybox"));
        assert!(!view.has_supported_init());
    }

    #[test]
    fn missing_init_but_nixos_is_supported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/os-release"), "ID=nixos\n").unwrap();
        let view = RootfsView::new(dir.path(), false);
        assert_eq!(view.init_system(), None);
        assert!(view.has_supported_init());
    }

    #[test]
    fn symlink_loop_does_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sbin")).unwrap();
        symlink("/sbin/init", dir.path().join("sbin/init")).unwrap();
        assert_eq!(RootfsView::new(dir.path(), false).resolve("/sbin/init"), None);
    }

    #[test]
    fn os_release_falls_back_to_usr_lib() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("usr/lib")).unwrap();
        fs::write(
            dir.path().join("usr/lib/os-release"),
            "ID=ubuntu\nVERSION_ID=\"24.04\"\n",
        )
        .unwrap();
        let release = RootfsView::new(dir.path(), false).os_release();
        assert_eq!(release["ID"], "ubuntu");
        assert_eq!(release["VERSION_ID"], "24.04");
    }

    #[test]
    fn prepare_with_networkd() {
        let dir = tempfile::tempdir().unwrap();
        let jail = JailPaths::new(dir.path().to_path_buf());
        let rootfs = jail.rootfs();
        fs::create_dir_all(rootfs.join("etc/systemd/network")).unwrap();
        fs::create_dir_all(rootfs.join("lib/systemd/network")).unwrap();
        fs::write(jail.machine_id(), "abc\n").unwrap();
        symlink("../run/systemd/resolve/stub-resolv.conf", jail.resolv_conf()).unwrap();
        fs::write(
            jail.default_host0_network(),
            "[Network]\nDHCP=yes\nLinkLocalAddressing=yes\n",
        )
        .unwrap();

        prepare(&jail).unwrap();

        assert!(!jail.machine_id().exists());
        assert!(fs::symlink_metadata(jail.resolv_conf()).is_err());

        let securetty = fs::read_to_string(jail.securetty()).unwrap();
        assert!(securetty.starts_with("pts/0\n"));
        assert!(securetty.ends_with("pts/10\n"));
        assert_eq!(securetty.lines().count(), 11);

        let host0 =
            fs::read_to_string(jail.network_dir().join("80-container-host0.network")).unwrap();
        assert!(host0.contains("LinkLocalAddressing=ipv6"));
        assert!(!host0.contains("LinkLocalAddressing=yes"));

        let mv = fs::read_to_string(jail.network_dir().join("mv-dhcp.network")).unwrap();
        assert!(mv.contains("Name=mv-*"));
        let vee = fs::read_to_string(jail.network_dir().join("vee-dhcp.network")).unwrap();
        assert!(vee.contains("Name=vee-*"));

        assert_eq!(
            fs::read_to_string(jail.preset_dir().join("00-jailmaker.preset")).unwrap(),
            "enable systemd-networkd.service\n"
        );
    }

    #[test]
    fn prepare_without_networkd_only_touches_etc() {
        let dir = tempfile::tempdir().unwrap();
        let jail = JailPaths::new(dir.path().to_path_buf());
        fs::create_dir_all(jail.rootfs().join("etc")).unwrap();

        prepare(&jail).unwrap();

        assert!(jail.securetty().exists());
        assert!(!jail.network_dir().exists());
        assert!(!jail.preset_dir().exists());
    }

    #[test]
    fn prepare_refuses_symlinked_files() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("host-securetty");
        fs::write(&outside, "console\n").unwrap();
        let jail = JailPaths::new(dir.path().join("jail"));
        fs::create_dir_all(jail.rootfs().join("etc")).unwrap();
        symlink(&outside, jail.securetty()).unwrap();

        assert!(prepare(&jail).is_err());
        assert_eq!(fs::read_to_string(&outside).unwrap(), "console\n");
    }

    #[test]
    fn prepare_stays_inside_rootfs_through_symlinked_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let host_etc = dir.path().join("host-etc");
        fs::create_dir_all(&host_etc).unwrap();
        fs::write(host_etc.join("machine-id"), "host\n").unwrap();
        let jail = JailPaths::new(dir.path().join("jail"));
        fs::create_dir_all(jail.rootfs()).unwrap();
        // Absolute links resolve against the rootfs, where this target is missing.
        symlink(&host_etc, jail.rootfs().join("etc")).unwrap();

        assert!(prepare(&jail).is_err());
        assert_eq!(
            fs::read_to_string(host_etc.join("machine-id")).unwrap(),
            "host\n"
        );
        assert!(!host_etc.join("securetty").exists());
    }

    #[test]
    fn relative_dir_links_are_followed_inside_rootfs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/lib/systemd/network")).unwrap();
        symlink("usr/lib", root.join("lib")).unwrap();
        let view = RootfsView::new(root, false);

        assert_eq!(
            view.host_target("/lib/systemd/network/x.network"),
            Some(root.join("usr/lib/systemd/network/x.network"))
        );
        assert_eq!(
            view.create_dir_all("/lib/systemd/system-preset").unwrap(),
            root.join("usr/lib/systemd/system-preset")
        );
        assert_eq!(view.host_dir("/etc"), None);
    }
}

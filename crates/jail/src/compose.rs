//! Every external command jail management issues is built here.
//!
//! Functions return an [`Invocation`] and never run anything; callers hand
//! the result to a [`Runner`](crate::command::Runner).

use std::path::Path;

use crate::command::Invocation;

pub const SUPERVISOR: &str = "systemd-run";
pub const CONTAINER_TOOL: &str = "systemd-nspawn";
pub const MACHINE_MANAGER: &str = "machinectl";

/// Supervisor unit name for a jail.
pub fn unit_name(tool_tag: &str, name: &str) -> String {
    format!("{tool_tag}-{name}")
}

/// Inputs of the supervised container launch.
#[derive(Debug, Clone)]
pub struct StartSpec<'a> {
    pub tool_tag: &'a str,
    pub name: &'a str,
    pub jail_dir: &'a Path,
    pub run_default_args: &'a [String],
    pub nspawn_default_args: &'a [String],
    pub user_args: &'a [String],
    /// Already formatted `--property=Exec...=` arguments.
    pub hook_properties: &'a [String],
    pub gpu_args: &'a [String],
    pub seccomp: bool,
    /// Ask the container to report readiness; needed when a first-start
    /// setup script has to wait for the jail to come up.
    pub notify_ready: bool,
}

/// `systemd-run ... -- systemd-nspawn ...`: launch the jail as a transient unit.
///
/// Supervisor arguments come first and container arguments after the `--`,
/// with user arguments last so they can override everything before them.
pub fn start(spec: &StartSpec<'_>) -> Invocation {
    let mut inv = Invocation::new(SUPERVISOR)
        .args(spec.run_default_args)
        .arg(format!("--unit={}", unit_name(spec.tool_tag, spec.name)))
        .arg(format!("--working-directory={}", spec.jail_dir.display()))
        .arg(format!(
            "--description=My nspawn jail {} [created with jailmaker]",
            spec.name
        ))
        .args(spec.hook_properties);

    if !spec.seccomp {
        // Disable seccomp filtering by systemd-nspawn.
        inv = inv.arg("--setenv=SYSTEMD_SECCOMP=0");
    }

    inv = inv
        .arg("--")
        .arg(CONTAINER_TOOL)
        .args(spec.nspawn_default_args)
        .arg(format!("--machine={}", spec.name))
        .arg("--directory=rootfs")
        .args(spec.gpu_args);

    if spec.notify_ready {
        inv = inv.arg("--notify-ready=yes");
    }

    inv.args(spec.user_args)
}

/// `--property=<Kind>=<value>` for a lifecycle hook.
pub fn hook_property(kind: &str, value: &str) -> String {
    format!("--property={kind}={value}")
}

/// Exits 0 only while the machine is registered. Output is discarded.
pub fn machine_show(name: &str) -> Invocation {
    Invocation::new(MACHINE_MANAGER)
        .arg("show")
        .arg(name)
        .quiet()
}

pub fn machine_list_json() -> Invocation {
    Invocation::new(MACHINE_MANAGER).args(["list", "-o", "json"])
}

pub fn poweroff(name: &str) -> Invocation {
    Invocation::new(MACHINE_MANAGER).arg("poweroff").arg(name)
}

/// Run `cmd` inside a running jail, attached to the caller's terminal.
pub fn exec(name: &str, cmd: &[String]) -> Invocation {
    Invocation::new(SUPERVISOR)
        .arg("--machine")
        .arg(name)
        .args([
            "--quiet",
            "--pipe",
            "--wait",
            "--collect",
            "--service-type=exec",
        ])
        .args(cmd)
}

/// Run the first-start script `/<script_name>` inside the jail once its
/// network is online.
pub fn initial_setup(name: &str, script_name: &str) -> Invocation {
    let inner = [
        "--".to_string(),
        SUPERVISOR.to_string(),
        format!("--unit={script_name}"),
        "--quiet".to_string(),
        "--pipe".to_string(),
        "--wait".to_string(),
        "--service-type=exec".to_string(),
        "--property=After=network-online.target".to_string(),
        "--property=Wants=network-online.target".to_string(),
        format!("/{script_name}"),
    ];
    exec(name, &inner)
}

pub fn shell(args: &[String]) -> Invocation {
    Invocation::new(MACHINE_MANAGER).arg("shell").args(args)
}

pub fn journal(tool_tag: &str, name: &str, args: &[String]) -> Invocation {
    Invocation::new("journalctl")
        .arg("-u")
        .arg(unit_name(tool_tag, name))
        .args(args)
}

pub fn unit_status(tool_tag: &str, name: &str, args: &[String]) -> Invocation {
    Invocation::new("systemctl")
        .arg("status")
        .arg(unit_name(tool_tag, name))
        .args(args)
}

/// Arguments of one provisioning run of the download script.
#[derive(Debug, Clone)]
pub struct FetchSpec<'a> {
    pub script: &'a Path,
    pub cache_dir: &'a Path,
    pub name: &'a str,
    pub jail_dir: &'a Path,
    pub rootfs: &'a Path,
    pub arch: &'a str,
    pub distro: &'a str,
    pub release: &'a str,
}

pub fn fetcher_provision(spec: &FetchSpec<'_>) -> Invocation {
    Invocation::new(spec.script.display().to_string())
        .arg(format!("--name={}", spec.name))
        .arg(format!("--path={}", spec.jail_dir.display()))
        .arg(format!("--rootfs={}", spec.rootfs.display()))
        .arg(format!("--arch={}", spec.arch))
        .arg(format!("--dist={}", spec.distro))
        .arg(format!("--release={}", spec.release))
        .env("LXC_CACHE_PATH", spec.cache_dir.display().to_string())
}

pub fn fetcher_list(script: &Path, cache_dir: &Path, arch: &str) -> Invocation {
    Invocation::new(script.display().to_string())
        .arg("--list")
        .arg(format!("--arch={arch}"))
        .env("LXC_CACHE_PATH", cache_dir.display().to_string())
}

/// Refresh the linker cache inside a stopped jail with the given mounts.
pub fn ldconfig(name: &str, rootfs: &Path, mounts: &[String]) -> Invocation {
    Invocation::new(CONTAINER_TOOL)
        .arg("--quiet")
        .arg(format!("--machine={name}"))
        .arg(format!("--directory={}", rootfs.display()))
        .args(mounts)
        .arg("ldconfig")
}

pub fn modprobe_nvidia() -> Invocation {
    Invocation::new("modprobe").arg("nvidia-current-uvm").quiet()
}

/// Probe for a working NVIDIA driver.
pub fn nvidia_smi() -> Invocation {
    Invocation::new("nvidia-smi").args(["-f", "/dev/null"]).quiet()
}

pub fn nvidia_container_list(libraries_only: bool) -> Invocation {
    let inv = Invocation::new("nvidia-container-cli").arg("list");
    if libraries_only {
        inv.arg("--libraries")
    } else {
        inv
    }
}

/// Drop the immutable and append-only attributes of a tree.
pub fn clear_attributes(path: &Path) -> Invocation {
    Invocation::new("chattr")
        .args(["-R", "-i", "-a"])
        .arg(path.display().to_string())
}

pub fn zfs_create(dataset: &str) -> Invocation {
    Invocation::new("zfs").arg("create").arg(dataset)
}

pub fn zfs_destroy(dataset: &str) -> Invocation {
    Invocation::new("zfs").arg("destroy").arg("-r").arg(dataset)
}

pub fn editor(program: &str, file: &Path) -> Invocation {
    Invocation::new(program).arg(file.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn start_orders_supervisor_then_container_then_user_args() {
        let run = strings(&["--collect", "--property=Delegate=yes"]);
        let nspawn = strings(&["--boot", "--quiet"]);
        let user = strings(&["--bind=/mnt/data:/data"]);
        let hooks = strings(&["--property=ExecStartPre=echo hi"]);
        let gpu = strings(&["--bind=/dev/dri"]);
        let dir = PathBuf::from("/j/jails/demo");
        let inv = start(&StartSpec {
            tool_tag: "jlmkr",
            name: "demo",
            jail_dir: &dir,
            run_default_args: &run,
            nspawn_default_args: &nspawn,
            user_args: &user,
            hook_properties: &hooks,
            gpu_args: &gpu,
            seccomp: true,
            notify_ready: false,
        });
        assert_eq!(inv.program, "systemd-run");
        assert_eq!(
            inv.args,
            strings(&[
                "--collect",
                "--property=Delegate=yes",
                "--unit=jlmkr-demo",
                "--working-directory=/j/jails/demo",
                "--description=My nspawn jail demo [created with jailmaker]",
                "--property=ExecStartPre=echo hi",
                "--",
                "systemd-nspawn",
                "--boot",
                "--quiet",
                "--machine=demo",
                "--directory=rootfs",
                "--bind=/dev/dri",
                "--bind=/mnt/data:/data",
            ])
        );
    }

    #[test]
    fn start_without_seccomp_and_with_notify() {
        let dir = PathBuf::from("/j/jails/demo");
        let inv = start(&StartSpec {
            tool_tag: "jlmkr",
            name: "demo",
            jail_dir: &dir,
            run_default_args: &[],
            nspawn_default_args: &[],
            user_args: &[],
            hook_properties: &[],
            gpu_args: &[],
            seccomp: false,
            notify_ready: true,
        });
        let args = inv.args;
        let setenv = args
            .iter()
            .position(|a| a == "--setenv=SYSTEMD_SECCOMP=0")
            .unwrap();
        let separator = args.iter().position(|a| a == "--").unwrap();
        assert!(setenv < separator);
        assert_eq!(args.last().unwrap(), "--notify-ready=yes");
    }

    #[test]
    fn machine_show_is_quiet() {
        let inv = machine_show("demo");
        assert!(inv.quiet);
        assert_eq!(inv.to_string(), "machinectl show demo");
    }

    #[test]
    fn exec_passes_command_verbatim() {
        let inv = exec("demo", &strings(&["bash", "-c", "echo $HOME"]));
        assert_eq!(
            inv.to_string(),
            "systemd-run --machine demo --quiet --pipe --wait --collect \
             --service-type=exec bash -c 'echo $HOME'"
        );
    }

    #[test]
    fn initial_setup_waits_for_network() {
        let inv = initial_setup("demo", "jlmkr-initial-setup.abc");
        let args = inv.args;
        assert!(args.contains(&"--property=After=network-online.target".to_string()));
        assert!(args.contains(&"--unit=jlmkr-initial-setup.abc".to_string()));
        assert_eq!(args.last().unwrap(), "/jlmkr-initial-setup.abc");
    }

    #[test]
    fn fetcher_provision_sets_cache_env() {
        let script = PathBuf::from("/j/.lxc/lxc-download.sh");
        let cache = PathBuf::from("/j/.lxc/cache");
        let dir = PathBuf::from("/j/jails/demo");
        let rootfs = dir.join("rootfs");
        let inv = fetcher_provision(&FetchSpec {
            script: &script,
            cache_dir: &cache,
            name: "demo",
            jail_dir: &dir,
            rootfs: &rootfs,
            arch: "amd64",
            distro: "debian",
            release: "bookworm",
        });
        assert_eq!(inv.program, "/j/.lxc/lxc-download.sh");
        assert!(inv.args.contains(&"--dist=debian".to_string()));
        assert!(inv.args.contains(&"--rootfs=/j/jails/demo/rootfs".to_string()));
        assert_eq!(
            inv.env,
            vec![("LXC_CACHE_PATH".to_string(), "/j/.lxc/cache".to_string())]
        );
    }

    #[test]
    fn journal_and_status_target_the_unit() {
        let args = strings(&["-n", "50"]);
        assert_eq!(
            journal("jlmkr", "demo", &args).to_string(),
            "journalctl -u jlmkr-demo -n 50"
        );
        assert_eq!(
            unit_status("jlmkr", "demo", &[]).to_string(),
            "systemctl status jlmkr-demo"
        );
    }

    #[test]
    fn ldconfig_puts_mounts_before_command() {
        let rootfs = PathBuf::from("/j/jails/demo/rootfs");
        let inv = ldconfig("demo", &rootfs, &strings(&["--bind-ro=/usr/lib/nvidia"]));
        assert_eq!(
            inv.to_string(),
            "systemd-nspawn --quiet --machine=demo --directory=/j/jails/demo/rootfs \
             --bind-ro=/usr/lib/nvidia ldconfig"
        );
    }

    #[test]
    fn zfs_destroy_is_recursive() {
        assert_eq!(
            zfs_destroy("tank/jailmaker/jails/demo").to_string(),
            "zfs destroy -r tank/jailmaker/jails/demo"
        );
    }
}

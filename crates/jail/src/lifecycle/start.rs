use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use tracing::{error, info};

use super::Controller;
use crate::compose::{self, StartSpec};
use crate::config::{ConfigError, keys};
use crate::error::{IoContext, JailError, Result};
use crate::gpu::GpuPassthrough;
use crate::hooks::{self, HookKind};
use crate::paths::JailPaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

impl Controller<'_> {
    /// Start a jail under the supervisor. Starting a running jail is a no-op.
    ///
    /// On the very first start, the jail's `initial_setup` runs inside it
    /// once its network is online.
    pub fn start(&self, name: &str) -> Result<StartOutcome> {
        let registry = self.registry();
        let jail = registry.existing(name)?;
        if registry.is_running(name) {
            info!("skipped starting jail {name}, it appears to be running already");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let config = self.load_config(name, &jail)?;
        let bad = |source: ConfigError| JailError::BadConfig {
            name: name.to_string(),
            source,
        };

        let mut hook_properties = Vec::new();
        for kind in HookKind::ALL {
            let value = config.get_or(kind.config_key(), "");
            if let Some(property) = hooks::hook_property(&jail, kind, value)? {
                hook_properties.push(property);
            }
        }

        let gpu = GpuPassthrough::new(
            self.runner,
            &self.settings.intel_device_dir,
            &self.settings.tool_tag,
        );
        let mut gpu_args = gpu.intel(
            config
                .get_bool(keys::GPU_PASSTHROUGH_INTEL)
                .map_err(bad)?,
        );
        gpu_args.extend(gpu.nvidia(
            config
                .get_bool(keys::GPU_PASSTHROUGH_NVIDIA)
                .map_err(bad)?,
            name,
            &jail,
        )?);

        let first_start = !jail.machine_id().exists();
        let initial_setup = Some(config.get_or(keys::INITIAL_SETUP, "").trim())
            .filter(|setup| first_start && !setup.is_empty());

        let run_default_args = config
            .get_tokens(keys::SYSTEMD_RUN_DEFAULT_ARGS)
            .map_err(bad)?;
        let nspawn_default_args = config
            .get_tokens(keys::SYSTEMD_NSPAWN_DEFAULT_ARGS)
            .map_err(bad)?;
        let user_args = config
            .get_tokens(keys::SYSTEMD_NSPAWN_USER_ARGS)
            .map_err(bad)?;

        let inv = compose::start(&StartSpec {
            tool_tag: &self.settings.tool_tag,
            name,
            jail_dir: jail.dir(),
            run_default_args: &run_default_args,
            nspawn_default_args: &nspawn_default_args,
            user_args: &user_args,
            hook_properties: &hook_properties,
            gpu_args: &gpu_args,
            seccomp: config.get_bool(keys::SECCOMP).map_err(bad)?,
            notify_ready: initial_setup.is_some(),
        });

        info!("starting jail {name} with the following command:");
        println!("\n{inv}\n");
        let code = self.runner.run(&inv)?;
        if code != 0 {
            return Err(JailError::SupervisorFailed {
                name: name.to_string(),
                code,
            });
        }

        if let Some(setup) = initial_setup {
            self.run_initial_setup(name, &jail, setup)?;
        }
        Ok(StartOutcome::Started)
    }

    /// Copy the setup script into the rootfs and run it in the jail. The
    /// script stays behind when it fails, for debugging.
    fn run_initial_setup(&self, name: &str, jail: &JailPaths, setup: &str) -> Result<()> {
        let script = if setup.starts_with("#!") {
            format!("{setup}\n")
        } else {
            format!("#!/bin/sh\n{setup}\n")
        };

        let rootfs = jail.rootfs();
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-initial-setup.", self.settings.tool_tag))
            .tempfile_in(&rootfs)
            .context(|| format!("create setup script in {}", rootfs.display()))?;
        file.write_all(script.as_bytes())
            .context(|| format!("write {}", file.path().display()))?;
        let (_, path) = file
            .keep()
            .map_err(|e| JailError::io("keep setup script", e.error))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
            .context(|| format!("chmod {}", path.display()))?;
        let script_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        info!("about to run the initial setup of jail {name}");
        info!("waiting for networking in the jail to be ready...");
        let code = self
            .runner
            .run(&compose::initial_setup(name, &script_name))?;
        if code != 0 {
            error!("tried to run the following commands inside the jail:\n{script}");
            return Err(JailError::InitialSetupFailed {
                name: name.to_string(),
                script: format!("/{script_name}"),
                code,
            });
        }

        fs::remove_file(&path).context(|| format!("remove {}", path.display()))?;
        info!("done with initial setup of jail {name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeFetcher, FakeHost, logged, settings};
    use super::*;
    use crate::config::Document;

    fn create(ctl: &Controller<'_>, name: &str) {
        ctl.create(name, &super::super::CreateOptions::default())
            .unwrap();
    }

    fn set(settings: &crate::settings::Settings, name: &str, key: &str, value: &str) {
        let path = settings.paths.jail(name).config();
        let mut config = Document::load(&path, &Document::default()).unwrap();
        config.set(key, value);
        config.write(&path).unwrap();
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");

        assert_eq!(ctl.start("demo").unwrap(), StartOutcome::Started);
        assert_eq!(ctl.start("demo").unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(host.count("systemd-run --collect"), 1);
    }

    #[test]
    fn start_command_is_printed_rather_than_logged() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");

        let (outcome, logs) = logged(|| ctl.start("demo"));
        assert_eq!(outcome.unwrap(), StartOutcome::Started);
        assert!(logs.contains("starting jail demo with the following command:"));
        assert!(!logs.contains("--unit=jlmkr-demo"));
    }

    #[test]
    fn start_command_carries_config() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");
        set(&settings, "demo", "systemd_nspawn_user_args", "--bind='/mnt/a b:/data'");
        set(&settings, "demo", "seccomp", "0");
        set(&settings, "demo", "post_stop_hook", "echo stopped");

        ctl.start("demo").unwrap();

        let seen = host.seen.borrow();
        let start = seen
            .iter()
            .find(|inv| inv.program == "systemd-run")
            .unwrap();
        let args = &start.args;
        assert!(args.contains(&"--unit=jlmkr-demo".to_string()));
        assert!(args.contains(&"--setenv=SYSTEMD_SECCOMP=0".to_string()));
        assert!(args.contains(&"--property=ExecStopPost=echo stopped".to_string()));
        assert!(args.contains(&"--machine=demo".to_string()));
        assert_eq!(args.last().unwrap(), "--bind=/mnt/a b:/data");
        assert!(!args.contains(&"--notify-ready=yes".to_string()));
    }

    #[test]
    fn supervisor_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");
        host.start_code.set(1);

        let err = ctl.start("demo").unwrap_err();
        assert!(matches!(err, JailError::SupervisorFailed { code: 1, .. }));
        assert!(err.to_string().contains("jlmkr edit demo"));
    }

    #[test]
    fn broken_config_fails_with_edit_hint() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");
        fs::write(settings.paths.jail("demo").config(), "no equals sign\n").unwrap();

        let err = ctl.start("demo").unwrap_err();
        assert!(matches!(err, JailError::BadConfig { .. }));
        assert!(err.to_string().contains("jlmkr edit demo"));
        assert_eq!(host.count("systemd-run"), 0);
    }

    #[test]
    fn missing_jail_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        assert!(matches!(ctl.start("ghost"), Err(JailError::NotFound(_))));
    }

    #[test]
    fn first_start_runs_initial_setup_once() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");
        set(&settings, "demo", "initial_setup", "apt-get update");

        ctl.start("demo").unwrap();

        let commands = host.commands();
        let start = commands
            .iter()
            .find(|c| c.starts_with("systemd-run --collect"))
            .unwrap();
        assert!(start.ends_with("--notify-ready=yes"));
        assert_eq!(host.count("systemd-run --machine demo"), 1);

        let rootfs = settings.paths.jail("demo").rootfs();
        let leftovers: Vec<_> = fs::read_dir(&rootfs)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("jlmkr-initial-setup."))
            .collect();
        assert!(leftovers.is_empty());

        // Booted once: machine-id exists now, no second setup.
        fs::write(settings.paths.jail("demo").machine_id(), "abc\n").unwrap();
        ctl.stop("demo").unwrap();
        ctl.start("demo").unwrap();
        assert_eq!(host.count("systemd-run --machine demo"), 1);
    }

    #[test]
    fn failed_initial_setup_keeps_script() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");
        set(&settings, "demo", "initial_setup", "#!/bin/bash\nexit 3");
        host.setup_code.set(3);

        let (script, code) = match ctl.start("demo").unwrap_err() {
            JailError::InitialSetupFailed { script, code, .. } => (script, code),
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(code, 3);
        let path = settings
            .paths
            .jail("demo")
            .rootfs()
            .join(script.trim_start_matches('/'));
        assert_eq!(fs::read_to_string(&path).unwrap(), "#!/bin/bash\nexit 3\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn disabled_nvidia_removes_stale_linker_config() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        create(&ctl, "demo");
        let jail = settings.paths.jail("demo");
        fs::create_dir_all(jail.ld_so_conf_dir()).unwrap();
        fs::write(jail.nvidia_ld_so_conf("jlmkr"), "/usr/lib/nvidia\n").unwrap();

        ctl.start("demo").unwrap();
        assert!(!jail.nvidia_ld_so_conf("jlmkr").exists());
        assert_eq!(host.count("nvidia"), 0);
    }
}

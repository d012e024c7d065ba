use std::fs::{self, File};
use std::path::PathBuf;

use tracing::{error, info, warn};

use super::Controller;
use crate::config::{DEFAULT_CONFIG, Document, keys};
use crate::error::{IoContext, JailError, Result};
use crate::interrupt;
use crate::paths::JailPaths;
use crate::provision::ProvisionRequest;
use crate::registry::validate_name;
use crate::rootfs;

/// Where a new jail's config starts from.
#[derive(Debug, Clone)]
pub enum Template {
    File(PathBuf),
    /// Config text supplied directly, e.g. read from stdin.
    Text(String),
}

/// Inputs of [`Controller::create`]. Unset overrides leave the template's
/// value alone.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub template: Option<Template>,
    pub distro: Option<String>,
    pub release: Option<String>,
    pub startup: Option<bool>,
    pub seccomp: Option<bool>,
    pub gpu_passthrough_intel: Option<bool>,
    pub gpu_passthrough_nvidia: Option<bool>,
    pub nspawn_user_args: Vec<String>,
    /// Start the jail once it's created.
    pub start: bool,
}

impl Controller<'_> {
    /// Create a jail: resolve its config, fetch the rootfs, prepare it for
    /// systemd-nspawn and write the config. Anything that fails after the
    /// jail directory was created removes it again.
    pub fn create(&self, name: &str, opts: &CreateOptions) -> Result<()> {
        validate_name(name)?;
        if !self.registry().is_available(name) {
            return Err(JailError::NameTaken(name.to_string()));
        }
        let mut config = self.resolve_config(opts)?;

        let jails_dir = self.settings.paths.jails_dir();
        if !jails_dir.is_dir() {
            self.storage().create_dir(&jails_dir)?;
        }

        let jail = self.settings.paths.jail(name);
        let mut start_now = opts.start;
        let interrupt_guard = interrupt::install()?;
        if let Err(e) = self.populate(name, &jail, &mut config, &mut start_now) {
            if let Err(cleanup) = self.storage().remove(jail.dir()) {
                error!("cleaning up {} failed: {cleanup}", jail.dir().display());
            }
            return Err(if interrupt::raised() {
                JailError::Interrupted
            } else {
                e
            });
        }
        drop(interrupt_guard);
        info!("created jail {name}");

        if start_now {
            self.start(name)?;
        }
        Ok(())
    }

    /// Template (or built-in defaults) with the requested overrides applied.
    fn resolve_config(&self, opts: &CreateOptions) -> Result<Document> {
        let mut config = match &opts.template {
            Some(Template::File(path)) => Document::load(path, &self.defaults)?,
            Some(Template::Text(text)) => {
                Document::parse(text, "<stdin>")?.with_fallback(&self.defaults)
            }
            None => Document::parse(DEFAULT_CONFIG, "<defaults>")?.with_fallback(&self.defaults),
        };

        for (key, value) in [
            (keys::DISTRO, &opts.distro),
            (keys::RELEASE, &opts.release),
        ] {
            if let Some(value) = value.as_deref()
                && !value.is_empty()
                && config.get_opt(key) != Some(value)
            {
                config.set(key, value);
            }
        }

        for (key, value) in [
            (keys::STARTUP, opts.startup),
            (keys::SECCOMP, opts.seccomp),
            (keys::GPU_PASSTHROUGH_INTEL, opts.gpu_passthrough_intel),
            (keys::GPU_PASSTHROUGH_NVIDIA, opts.gpu_passthrough_nvidia),
        ] {
            if let Some(value) = value
                && config.get_bool(key).ok() != Some(value)
            {
                config.set(key, value);
            }
        }

        if !opts.nspawn_user_args.is_empty() {
            let joined = shell_words::join(&opts.nspawn_user_args);
            if config.get_opt(keys::SYSTEMD_NSPAWN_USER_ARGS) != Some(joined.as_str()) {
                config.set(keys::SYSTEMD_NSPAWN_USER_ARGS, joined);
            }
        }

        Ok(config)
    }

    fn populate(
        &self,
        name: &str,
        jail: &JailPaths,
        config: &mut Document,
        start_now: &mut bool,
    ) -> Result<()> {
        self.storage().create_dir(jail.dir())?;
        let rootfs = jail.rootfs();
        fs::create_dir_all(&rootfs).context(|| format!("create {}", rootfs.display()))?;
        // The download script appends its own settings to this file; the
        // final config replaces them below.
        File::create(jail.config()).context(|| format!("create {}", jail.config().display()))?;

        let distro = config.get(keys::DISTRO)?.to_string();
        let release = config.get(keys::RELEASE)?.to_string();
        info!("fetching {distro} {release} for jail {name}");
        self.fetcher.provision(&ProvisionRequest {
            name,
            jail_dir: jail.dir(),
            rootfs: &rootfs,
            distro: &distro,
            release: &release,
        })?;
        interrupt::check()?;

        if !self.rootfs_view(&rootfs).has_supported_init() {
            warn!(
                "{distro} {release} does not boot with systemd; \
                 jail {name} won't be started and startup is disabled"
            );
            config.set(keys::STARTUP, false);
            *start_now = false;
        }

        rootfs::prepare(jail)?;
        config.write(&jail.config())?;
        Ok(())
    }
}

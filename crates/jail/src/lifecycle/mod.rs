//! Jail operations: create, start, stop, remove and the pass-through tools.
//!
//! A [`Controller`] borrows the run's settings and the two host seams,
//! a [`Runner`] for external commands and a [`RootfsFetcher`] for images.
//! Operations run sequentially; nothing here is safe to share across threads.

mod create;
mod list;
mod start;
mod stop;

use std::path::Path;

use tracing::{error, info};

pub use create::{CreateOptions, Template};
pub use list::JailSummary;
pub use start::StartOutcome;

use crate::command::Runner;
use crate::compose;
use crate::config::{self, Document};
use crate::error::{JailError, Result};
use crate::paths::JailPaths;
use crate::provision::RootfsFetcher;
use crate::registry::{Registry, validate_name};
use crate::rootfs::RootfsView;
use crate::settings::Settings;
use crate::storage::Storage;

pub struct Controller<'a> {
    settings: &'a Settings,
    runner: &'a dyn Runner,
    fetcher: &'a dyn RootfsFetcher,
    defaults: Document,
}

impl<'a> Controller<'a> {
    pub fn new(
        settings: &'a Settings,
        runner: &'a dyn Runner,
        fetcher: &'a dyn RootfsFetcher,
    ) -> Result<Self> {
        Ok(Self {
            settings,
            runner,
            fetcher,
            defaults: config::defaults()?,
        })
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn registry(&self) -> Registry<'a> {
        Registry::new(&self.settings.paths, self.runner)
    }

    fn storage(&self) -> Storage<'a> {
        Storage::new(self.runner, &self.settings.mounts_table)
    }

    fn rootfs_view<'p>(&self, rootfs: &'p Path) -> RootfsView<'p> {
        RootfsView::new(rootfs, self.settings.chroot_introspection)
    }

    /// A jail's config with defaults as fallback. Errors carry a hint to edit it.
    fn load_config(&self, name: &str, jail: &JailPaths) -> Result<Document> {
        Document::load(&jail.config(), &self.defaults).map_err(|source| JailError::BadConfig {
            name: name.to_string(),
            source,
        })
    }

    /// Run a command inside a running jail; returns its exit code.
    pub fn exec(&self, name: &str, cmd: &[String]) -> Result<i32> {
        validate_name(name)?;
        Ok(self.runner.run(&compose::exec(name, cmd))?)
    }

    /// `machinectl shell` with the given arguments.
    pub fn shell(&self, args: &[String]) -> Result<i32> {
        Ok(self.runner.run(&compose::shell(args))?)
    }

    /// The supervisor unit's journal.
    pub fn log(&self, name: &str, args: &[String]) -> Result<i32> {
        validate_name(name)?;
        let inv = compose::journal(&self.settings.tool_tag, name, args);
        Ok(self.runner.run(&inv)?)
    }

    /// The supervisor unit's status.
    pub fn status(&self, name: &str, args: &[String]) -> Result<i32> {
        validate_name(name)?;
        let inv = compose::unit_status(&self.settings.tool_tag, name, args);
        Ok(self.runner.run(&inv)?)
    }

    /// Open a jail's config in the user's editor.
    pub fn edit(&self, name: &str) -> Result<i32> {
        let jail = self.registry().existing(name)?;
        let editor = find_editor();
        let code = self.runner.run(&compose::editor(&editor, &jail.config()))?;
        if code != 0 {
            error!("an error occurred while editing {}", jail.config().display());
        } else if self.registry().is_running(name) {
            info!("restart the jail for edits to apply (if you made any)");
        }
        Ok(code)
    }

    /// Images the fetcher can provision.
    pub fn images(&self) -> Result<Box<dyn Iterator<Item = String>>> {
        self.fetcher.images()
    }
}

/// `$VISUAL`, `$EDITOR`, the system `editor` alternative, or nano.
pub fn find_editor() -> String {
    ["VISUAL", "EDITOR"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(["editor".to_string(), "/usr/bin/editor".to_string()])
        .find(|candidate| !candidate.is_empty() && which::which(candidate).is_ok())
        .unwrap_or_else(|| "nano".to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeFetcher, FakeHost, settings};
    use super::*;

    #[test]
    fn passthrough_commands_target_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();

        let args = vec!["-n".to_string(), "20".to_string()];
        ctl.log("demo", &args).unwrap();
        ctl.status("demo", &[]).unwrap();
        ctl.exec("demo", &["hostname".to_string()]).unwrap();
        ctl.shell(&["root@demo".to_string()]).unwrap();

        assert_eq!(
            host.commands(),
            vec![
                "journalctl -u jlmkr-demo -n 20",
                "systemctl status jlmkr-demo",
                "systemd-run --machine demo --quiet --pipe --wait --collect --service-type=exec hostname",
                "machinectl shell root@demo",
            ]
        );
    }

    #[test]
    fn passthrough_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();

        assert!(matches!(
            ctl.exec("../etc", &[]),
            Err(JailError::InvalidName(_))
        ));
        assert!(host.commands().is_empty());
    }

    #[test]
    fn edit_opens_the_config_and_returns_the_editor_status() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        let jail = settings.paths.jail("demo");
        std::fs::create_dir_all(jail.dir()).unwrap();
        let expected = compose::editor(&find_editor(), &jail.config()).to_string();

        assert_eq!(ctl.edit("demo").unwrap(), 0);
        assert_eq!(host.commands()[0], expected);

        host.seen.borrow_mut().clear();
        host.other_code.set(2);
        assert_eq!(ctl.edit("demo").unwrap(), 2);
        assert_eq!(host.commands(), vec![expected]);
    }

    #[test]
    fn edit_runs_nothing_for_unknown_or_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();

        assert!(matches!(ctl.edit("ghost"), Err(JailError::NotFound(_))));
        assert!(matches!(
            ctl.edit("../etc"),
            Err(JailError::InvalidName(_))
        ));
        assert!(host.commands().is_empty());
    }

    #[test]
    fn images_come_from_the_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let host = FakeHost::default();
        let fetcher = FakeFetcher::default();
        let ctl = Controller::new(&settings, &host, &fetcher).unwrap();
        let images: Vec<String> = ctl.images().unwrap().collect();
        assert_eq!(images, vec!["debian bookworm amd64 default 20240101"]);
    }
}

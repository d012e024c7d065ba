//! Naming rules and discovery of jails on disk.

use crate::command::Runner;
use crate::compose;
use crate::error::{IoContext, JailError, Result};
use crate::paths::{JailPaths, JailmakerPaths};

pub const MAX_NAME_LEN: usize = 64;

/// A jail name is 1..=64 of `[A-Za-z0-9.-]`, not starting with '.' and
/// never containing "..".
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
        && !name.starts_with('.')
        && !name.contains("..")
}

pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(JailError::InvalidName(name.to_string()))
    }
}

pub struct Registry<'a> {
    paths: &'a JailmakerPaths,
    runner: &'a dyn Runner,
}

impl<'a> Registry<'a> {
    pub fn new(paths: &'a JailmakerPaths, runner: &'a dyn Runner) -> Self {
        Self { paths, runner }
    }

    /// True when the name is valid and no jail directory exists for it.
    pub fn is_available(&self, name: &str) -> bool {
        is_valid_name(name) && !self.paths.jail(name).dir().exists()
    }

    /// Paths of an existing jail.
    pub fn existing(&self, name: &str) -> Result<JailPaths> {
        validate_name(name)?;
        let jail = self.paths.jail(name);
        if jail.dir().is_dir() {
            Ok(jail)
        } else {
            Err(JailError::NotFound(name.to_string()))
        }
    }

    /// Names of all jails, sorted. A missing jails directory means no jails.
    pub fn list_all(&self) -> Result<Vec<String>> {
        let dir = self.paths.jails_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JailError::io(format!("read {}", dir.display()), e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.context(|| format!("read {}", dir.display()))?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Whether the machine manager knows a running machine by this name.
    pub fn is_running(&self, name: &str) -> bool {
        matches!(self.runner.run(&compose::machine_show(name)), Ok(0))
    }
}

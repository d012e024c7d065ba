//! Error types for jail management.

use std::path::PathBuf;

use crate::command::CommandError;
use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, JailError>;

/// Every way a jail operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum JailError {
    #[error(
        "invalid jail name '{0}': use only alphanumerics, '-' and '.', \
         no leading dot, no '..', at most 64 characters"
    )]
    InvalidName(String),

    #[error("a jail with name {0} already exists")]
    NameTaken(String),

    #[error("a jail with name {0} does not exist")]
    NotFound(String),

    #[error("{0}")]
    Settings(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{source}\nYou may fix the config with: jlmkr edit {name}")]
    BadConfig {
        name: String,
        #[source]
        source: ConfigError,
    },

    #[error("{path}: unexpected sha256 {actual} (expected {expected})")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("download {url}: {detail}")]
    Download { url: String, detail: String },

    #[error("rootfs fetcher exited with status {0}")]
    ProvisionFailed(i32),

    #[error(
        "failed to start jail {name} (exit status {code})\n\
         In case of a config error, you may fix it with: jlmkr edit {name}"
    )]
    SupervisorFailed { name: String, code: i32 },

    #[error("failed to stop jail {name} (exit status {code})")]
    StopFailed { name: String, code: i32 },

    #[error(
        "initial setup of jail {name} failed (exit status {code}); \
         run {script} inside the jail to debug, or remove the jail and try again"
    )]
    InitialSetupFailed {
        name: String,
        script: String,
        code: i32,
    },

    #[error("wrong name, nothing happened")]
    ConfirmationMismatch,

    #[error("failed to start jails: {}", .0.join(", "))]
    StartupFailed(Vec<String>),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl JailError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a human-readable context to an `io::Result`.
pub(crate) trait IoContext<T> {
    fn context(self, f: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn context(self, f: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| JailError::io(f(), e))
    }
}

mod defaults;
mod document;

use std::path::PathBuf;

pub use defaults::DEFAULT_CONFIG;
pub use document::{CONFIG_FILE_MODE, Document, Value};

/// Keys with a meaning to jail management. Any other key is carried along untouched.
pub mod keys {
    pub const STARTUP: &str = "startup";
    pub const GPU_PASSTHROUGH_INTEL: &str = "gpu_passthrough_intel";
    pub const GPU_PASSTHROUGH_NVIDIA: &str = "gpu_passthrough_nvidia";
    pub const SECCOMP: &str = "seccomp";
    pub const SYSTEMD_NSPAWN_USER_ARGS: &str = "systemd_nspawn_user_args";
    pub const PRE_START_HOOK: &str = "pre_start_hook";
    pub const POST_START_HOOK: &str = "post_start_hook";
    pub const POST_STOP_HOOK: &str = "post_stop_hook";
    pub const DISTRO: &str = "distro";
    pub const RELEASE: &str = "release";
    pub const INITIAL_SETUP: &str = "initial_setup";
    pub const SYSTEMD_RUN_DEFAULT_ARGS: &str = "systemd_run_default_args";
    pub const SYSTEMD_NSPAWN_DEFAULT_ARGS: &str = "systemd_nspawn_default_args";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to find config file: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{source_name}:{line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("missing config key: {0}")]
    MissingKey(String),

    #[error("config key {key}: not a boolean: '{value}'")]
    InvalidBool { key: String, value: String },

    #[error("config key {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The parsed baked-in defaults, used as fallback for every jail config.
pub fn defaults() -> Result<Document, ConfigError> {
    Document::parse_defaults(DEFAULT_CONFIG)
}

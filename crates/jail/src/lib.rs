//! Management of persistent systemd-nspawn jails.
//!
//! Each jail is a directory under `<jailmaker dir>/jails/<name>` holding a
//! `config` file and a `rootfs`. Jails are started as transient systemd units
//! wrapping `systemd-nspawn`; every external command is composed in
//! [`compose`] and executed through a [`Runner`].

pub mod chroot;
pub mod command;
pub mod compose;
pub mod config;
pub mod error;
pub mod gpu;
pub mod hooks;
pub mod interrupt;
pub mod lifecycle;
pub mod nofollow;
pub mod os_release;
pub mod paths;
pub mod provision;
pub mod registry;
pub mod rootfs;
pub mod settings;
pub mod storage;

pub use command::{CommandError, Invocation, Runner, SystemRunner};
pub use error::{JailError, Result};
pub use lifecycle::{Controller, CreateOptions, JailSummary, StartOutcome, Template};
pub use provision::{LxcDownload, RootfsFetcher};
pub use settings::Settings;

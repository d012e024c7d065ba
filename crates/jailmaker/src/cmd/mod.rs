mod create;
mod list;
mod passthrough;
mod remove;

use clap::Args;

pub use create::{CreateArgs, run_create};
pub use list::{run_images, run_list};
pub use passthrough::{ExecArgs, ShellArgs, UnitArgs, run_exec, run_log, run_shell, run_status};
pub use remove::run_remove;

#[derive(Args)]
pub struct NameArgs {
    /// Name of the jail
    pub name: String,
}

use std::process::ExitCode;

use clap::Args;
use jail::Controller;

use crate::exit_status;

#[derive(Args)]
pub struct ExecArgs {
    /// Name of the jail
    name: String,
    /// Command to run, with its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    cmd: Vec<String>,
}

#[derive(Args)]
pub struct ShellArgs {
    /// Arguments for machinectl shell, e.g. the jail name or user@name
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// A jail name followed by arguments for the underlying systemd tool.
#[derive(Args)]
pub struct UnitArgs {
    /// Name of the jail
    name: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

pub fn run_exec(ctl: &Controller<'_>, args: ExecArgs) -> jail::Result<ExitCode> {
    ctl.exec(&args.name, &args.cmd).map(exit_status)
}

pub fn run_shell(ctl: &Controller<'_>, args: ShellArgs) -> jail::Result<ExitCode> {
    ctl.shell(&args.args).map(exit_status)
}

pub fn run_log(ctl: &Controller<'_>, args: UnitArgs) -> jail::Result<ExitCode> {
    ctl.log(&args.name, &args.args).map(exit_status)
}

pub fn run_status(ctl: &Controller<'_>, args: UnitArgs) -> jail::Result<ExitCode> {
    ctl.status(&args.name, &args.args).map(exit_status)
}

mod cmd;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{ArgAction, Parser, Subcommand};
use jail::{Controller, JailError, LxcDownload, Settings, SystemRunner};
use tracing::Level;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(
    name = "jlmkr",
    version,
    about = "Create persistent Linux 'jails' with systemd-nspawn"
)]
struct Cli {
    /// Directory holding the jails (defaults to jailmaker_dir in ~/.local/share/jailmaker.conf)
    #[arg(long, env = "JAILMAKER_DIR", global = true)]
    dir: Option<PathBuf>,
    /// Log more (-v debug, -vv trace)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new jail
    Create(cmd::CreateArgs),
    /// Edit a jail's config in your editor
    Edit(cmd::NameArgs),
    /// Run a command inside a running jail
    Exec(cmd::ExecArgs),
    /// List the images the rootfs fetcher can download
    Images,
    /// List all jails
    List,
    /// Show a jail's journal (journalctl arguments may follow)
    Log(cmd::UnitArgs),
    /// Stop and delete a jail, rootfs included
    Remove(cmd::NameArgs),
    /// Stop a jail, then start it again
    Restart(cmd::NameArgs),
    /// Open a shell in a running jail (machinectl shell arguments)
    Shell(cmd::ShellArgs),
    /// Start a jail
    Start(cmd::NameArgs),
    /// Start every jail with startup=1 in its config
    Startup,
    /// Show a jail's unit status (systemctl arguments may follow)
    Status(cmd::UnitArgs),
    /// Stop a jail
    Stop(cmd::NameArgs),
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

/// Exit status of a pass-through tool, clamped to what a process can return.
fn exit_status(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

fn error_status(e: &JailError) -> ExitCode {
    match e {
        // 128 + SIGINT
        JailError::Interrupted => ExitCode::from(130),
        JailError::ProvisionFailed(code) | JailError::SupervisorFailed { code, .. } => {
            exit_status(*code)
        }
        _ => ExitCode::FAILURE,
    }
}

fn run(cli: Cli) -> jail::Result<ExitCode> {
    let settings = Settings::resolve(cli.dir)?;
    let runner = SystemRunner;
    let fetcher = LxcDownload::new(&settings, &runner);
    let ctl = Controller::new(&settings, &runner, &fetcher)?;

    match cli.command {
        Command::Create(args) => cmd::run_create(&ctl, args),
        Command::Edit(args) => ctl.edit(&args.name).map(exit_status),
        Command::Exec(args) => cmd::run_exec(&ctl, args),
        Command::Images => cmd::run_images(&ctl),
        Command::List => cmd::run_list(&ctl),
        Command::Log(args) => cmd::run_log(&ctl, args),
        Command::Remove(args) => cmd::run_remove(&ctl, args),
        Command::Restart(args) => ctl.restart(&args.name).map(|()| ExitCode::SUCCESS),
        Command::Shell(args) => cmd::run_shell(&ctl, args),
        Command::Start(args) => ctl.start(&args.name).map(|_| ExitCode::SUCCESS),
        Command::Startup => ctl.startup().map(|()| ExitCode::SUCCESS),
        Command::Status(args) => cmd::run_status(&ctl, args),
        Command::Stop(args) => ctl.stop(&args.name).map(|()| ExitCode::SUCCESS),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !nix::unistd::geteuid().is_root() {
        eprintln!("error: jlmkr must be run as root");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            error_status(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["jlmkr", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn dir_flag_is_global() {
        let cli = Cli::try_parse_from(["jlmkr", "start", "demo", "--dir", "/mnt/pool/jailmaker"])
            .unwrap();
        assert_eq!(cli.dir, Some(PathBuf::from("/mnt/pool/jailmaker")));
    }

    #[test]
    fn error_statuses() {
        assert_eq!(error_status(&JailError::Interrupted), ExitCode::from(130));
        assert_eq!(error_status(&JailError::ProvisionFailed(2)), ExitCode::from(2));
        assert_eq!(
            error_status(&JailError::SupervisorFailed {
                name: "demo".into(),
                code: 4
            }),
            ExitCode::from(4)
        );
        assert_eq!(error_status(&JailError::ConfirmationMismatch), ExitCode::FAILURE);
        assert_eq!(exit_status(-1), ExitCode::FAILURE);
        assert_eq!(exit_status(300), ExitCode::FAILURE);
    }
}

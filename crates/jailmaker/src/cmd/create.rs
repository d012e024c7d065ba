use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use jail::{Controller, CreateOptions, JailError, Template};

#[derive(Args)]
pub struct CreateArgs {
    /// Name of the jail
    name: String,
    /// Config template to start from, '-' reads it from stdin
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Distribution to download, e.g. debian
    #[arg(long)]
    distro: Option<String>,
    /// Release of the distribution, e.g. bookworm
    #[arg(long)]
    release: Option<String>,
    /// Start the jail once it's created
    #[arg(long)]
    start: bool,
    /// Start the jail when the system boots (0 or 1)
    #[arg(long, value_parser = parse_flag)]
    startup: Option<bool>,
    /// Enable seccomp filtering (0 or 1)
    #[arg(long, value_parser = parse_flag)]
    seccomp: Option<bool>,
    /// Pass the Intel GPU through (0 or 1)
    #[arg(long, alias = "gpu_passthrough_intel", value_parser = parse_flag)]
    gpu_passthrough_intel: Option<bool>,
    /// Pass the NVIDIA GPU through (0 or 1)
    #[arg(long, alias = "gpu_passthrough_nvidia", value_parser = parse_flag)]
    gpu_passthrough_nvidia: Option<bool>,
    /// Extra systemd-nspawn arguments, e.g. --bind=/mnt/data
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    nspawn_args: Vec<String>,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(format!("expected 0 or 1, got '{other}'")),
    }
}

fn template(config: Option<PathBuf>) -> jail::Result<Option<Template>> {
    let Some(path) = config else {
        return Ok(None);
    };
    if path.as_os_str() != "-" {
        return Ok(Some(Template::File(path)));
    }
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .map_err(|source| JailError::Io {
            context: "read config template from stdin".into(),
            source,
        })?;
    Ok(Some(Template::Text(text)))
}

pub fn run_create(ctl: &Controller<'_>, args: CreateArgs) -> jail::Result<ExitCode> {
    let opts = CreateOptions {
        template: template(args.config)?,
        distro: args.distro,
        release: args.release,
        startup: args.startup,
        seccomp: args.seccomp,
        gpu_passthrough_intel: args.gpu_passthrough_intel,
        gpu_passthrough_nvidia: args.gpu_passthrough_nvidia,
        nspawn_user_args: args.nspawn_args,
        start: args.start,
    };
    ctl.create(&args.name, &opts)?;
    Ok(ExitCode::SUCCESS)
}

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use jail::{Controller, JailError};

use super::NameArgs;

fn read_confirmation(
    name: &str,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> io::Result<String> {
    writeln!(out, "\nCAUTION: Type \"{name}\" to confirm jail deletion!\n")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

/// Ask for the jail's name on stdin, then delete it.
pub fn run_remove(ctl: &Controller<'_>, args: NameArgs) -> jail::Result<ExitCode> {
    // Fail on unknown jails before prompting.
    ctl.registry().existing(&args.name)?;
    let answer = read_confirmation(&args.name, &mut io::stdin().lock(), &mut io::stdout())
        .map_err(|source| JailError::Io {
            context: "read confirmation".into(),
            source,
        })?;
    ctl.remove(&args.name, &answer)?;
    Ok(ExitCode::SUCCESS)
}

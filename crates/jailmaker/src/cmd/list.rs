use std::process::ExitCode;

use jail::{Controller, JailSummary};

const EMPTY: &str = "-";
const UNDERLINE: &str = "\x1b[4m";
const NORMAL: &str = "\x1b[0m";
const HEADER: [&str; 8] = [
    "name",
    "running",
    "startup",
    "gpu_intel",
    "gpu_nvidia",
    "os",
    "version",
    "addresses",
];

fn row(jail: &JailSummary) -> [String; 8] {
    let flag = |v: Option<bool>| v.map_or_else(|| EMPTY.to_string(), |b| b.to_string());
    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| EMPTY.to_string());
    [
        jail.name.clone(),
        jail.running.to_string(),
        flag(jail.startup),
        flag(jail.gpu_intel),
        flag(jail.gpu_nvidia),
        text(&jail.os),
        text(&jail.version),
        text(&jail.addresses),
    ]
}

/// Left-aligned columns under an underlined, upper-cased header.
fn render_table(jails: &[JailSummary]) -> String {
    let rows: Vec<[String; 8]> = jails.iter().map(row).collect();
    let widths: Vec<usize> = HEADER
        .iter()
        .enumerate()
        .map(|(i, hdr)| {
            rows.iter()
                .filter_map(|r| r.get(i))
                .map(|cell| cell.chars().count())
                .fold(hdr.len(), usize::max)
        })
        .collect();

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut out = format!(
        "{UNDERLINE}{}{NORMAL}\n",
        line(HEADER.iter().map(|h| h.to_uppercase()).collect())
    );
    for r in rows {
        out.push_str(&line(Vec::from(r)));
        out.push('\n');
    }
    out
}

pub fn run_list(ctl: &Controller<'_>) -> jail::Result<ExitCode> {
    let jails = ctl.list()?;
    if jails.is_empty() {
        println!("No jails.");
    } else {
        print!("{}", render_table(&jails));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_images(ctl: &Controller<'_>) -> jail::Result<ExitCode> {
    for image in ctl.images()? {
        println!("{image}");
    }
    Ok(ExitCode::SUCCESS)
}

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{error, info, warn};

use super::Controller;
use crate::compose;
use crate::config::keys;
use crate::error::{JailError, Result};

/// One row of the jail listing. `None` fields are unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JailSummary {
    pub name: String,
    pub running: bool,
    pub startup: Option<bool>,
    pub gpu_intel: Option<bool>,
    pub gpu_nvidia: Option<bool>,
    pub os: Option<String>,
    pub version: Option<String>,
    /// First address of a running jail, suffixed with "…" when it has more.
    pub addresses: Option<String>,
}

/// An entry of `machinectl list -o json`.
#[derive(Debug, Deserialize)]
struct Machine {
    machine: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    addresses: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn summarize_addresses(addresses: Option<String>) -> Option<String> {
    let addresses = non_empty(addresses)?;
    let mut lines = addresses.lines();
    let first = lines.next()?.to_string();
    Some(if lines.next().is_some() {
        format!("{first}…")
    } else {
        first
    })
}

impl Controller<'_> {
    /// Every jail with its config flags, plus live details for running ones
    /// and os-release details for stopped ones. Sorted by name.
    pub fn list(&self) -> Result<Vec<JailSummary>> {
        let names = self.registry().list_all()?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut running = self.running_machines();
        let mut jails = Vec::with_capacity(names.len());
        for name in names {
            let jail = self.settings.paths.jail(&name);
            let mut summary = JailSummary {
                name: name.clone(),
                ..Default::default()
            };

            if let Ok(config) = self.load_config(&name, &jail) {
                summary.startup = config.get_bool(keys::STARTUP).ok();
                summary.gpu_intel = config.get_bool(keys::GPU_PASSTHROUGH_INTEL).ok();
                summary.gpu_nvidia = config.get_bool(keys::GPU_PASSTHROUGH_NVIDIA).ok();
            }

            if let Some(machine) = running.remove(&name) {
                summary.running = true;
                summary.os = non_empty(machine.os);
                summary.version = non_empty(machine.version);
                summary.addresses = summarize_addresses(machine.addresses);
            } else {
                let rootfs = jail.rootfs();
                let mut release = self.rootfs_view(&rootfs).os_release();
                summary.os = non_empty(release.remove("ID"));
                summary.version = non_empty(release.remove("VERSION_ID"))
                    .or_else(|| non_empty(release.remove("VERSION_CODENAME")));
            }
            jails.push(summary);
        }
        Ok(jails)
    }

    /// Running systemd-nspawn machines by name. A failing machine manager
    /// just means nothing is known to be running.
    fn running_machines(&self) -> HashMap<String, Machine> {
        let output = match self.runner.capture(&compose::machine_list_json()) {
            Ok(output) => output,
            Err(e) => {
                warn!("{e}");
                return HashMap::new();
            }
        };
        match serde_json::from_str::<Vec<Machine>>(output.trim()) {
            Ok(machines) => machines
                .into_iter()
                .filter(|m| m.service.as_deref() == Some("systemd-nspawn"))
                .map(|m| (m.machine.clone(), m))
                .collect(),
            Err(e) => {
                warn!("cannot parse machine list: {e}");
                HashMap::new()
            }
        }
    }

    /// Start every jail whose config has `startup` enabled.
    ///
    /// One jail failing doesn't stop the others; the failures are reported
    /// together at the end.
    pub fn startup(&self) -> Result<()> {
        let mut failed = Vec::new();
        for name in self.registry().list_all()? {
            let jail = self.settings.paths.jail(&name);
            let enabled = self
                .load_config(&name, &jail)
                .and_then(|config| config.get_bool(keys::STARTUP).map_err(JailError::from));
            match enabled {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!("{e}");
                    failed.push(name);
                    continue;
                }
            }
            info!("starting jail {name} at startup");
            if let Err(e) = self.start(&name) {
                error!("{e}");
                failed.push(name);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(JailError::StartupFailed(failed))
        }
    }
}

//! Host-side lifecycle hooks attached to the supervisor unit.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use tracing::debug;

use crate::compose;
use crate::config::keys;
use crate::error::{IoContext, Result};
use crate::nofollow;
use crate::paths::JailPaths;

pub const HOOK_SCRIPT_MODE: u32 = 0o700;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    ExecStartPre,
    ExecStartPost,
    ExecStopPost,
}

impl HookKind {
    pub const ALL: [HookKind; 3] = [Self::ExecStartPre, Self::ExecStartPost, Self::ExecStopPost];

    /// Unit property the hook is attached as.
    pub fn property(self) -> &'static str {
        match self {
            Self::ExecStartPre => "ExecStartPre",
            Self::ExecStartPost => "ExecStartPost",
            Self::ExecStopPost => "ExecStopPost",
        }
    }

    /// Config key holding the hook's command or script.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::ExecStartPre => keys::PRE_START_HOOK,
            Self::ExecStartPost => keys::POST_START_HOOK,
            Self::ExecStopPost => keys::POST_STOP_HOOK,
        }
    }
}

/// Escape a path for use as a unit command line argument.
pub fn systemd_escape_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace(' ', "\\s")
}

/// Turn a hook value into a `--property=` argument.
///
/// An empty value yields nothing. A value starting with a shebang is a
/// script: it is written to the jail's hook file (only rewritten when the
/// content changed) and the property points at that file. Anything else is
/// passed through as an inline command line.
pub fn hook_property(jail: &JailPaths, kind: HookKind, value: &str) -> Result<Option<String>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if !value.starts_with("#!") {
        return Ok(Some(compose::hook_property(kind.property(), value)));
    }

    let path = jail.hook_script(kind.property());
    let content = format!("{value}\n");
    let unchanged = nofollow::read_to_string(&path).is_ok_and(|current| current == content);
    if unchanged {
        debug!(hook = kind.property(), "hook script unchanged");
    } else {
        nofollow::write(&path, &content, HOOK_SCRIPT_MODE)
            .context(|| format!("write {}", path.display()))?;
    }
    // Rewrites keep the mode of an existing file.
    fs::set_permissions(&path, fs::Permissions::from_mode(HOOK_SCRIPT_MODE))
        .context(|| format!("chmod {}", path.display()))?;

    let escaped = systemd_escape_path(&path.display().to_string());
    Ok(Some(compose::hook_property(kind.property(), &escaped)))
}

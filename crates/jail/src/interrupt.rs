//! Ctrl-C handling while a jail is being created.
//!
//! While a [`Guard`] is alive the handler only records the interrupt. Child
//! processes receive the same SIGINT from the terminal and exit on their own;
//! the operation notices the flag once control returns to it, cleans up, and
//! reports [`JailError::Interrupted`]. Outside a guard Ctrl-C keeps its
//! default action.

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::warn;

use crate::error::{JailError, Result};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Restores the previous disposition when dropped.
#[must_use]
pub struct Guard {
    signal: Signal,
    previous: SigAction,
}

impl Drop for Guard {
    fn drop(&mut self) {
        // SAFETY: reinstates the disposition that was in place before `catch`.
        if let Err(e) = unsafe { sigaction(self.signal, &self.previous) } {
            warn!("failed to restore {} handling: {e}", self.signal);
        }
    }
}

/// Record Ctrl-C instead of dying until the guard is dropped.
pub fn install() -> Result<Guard> {
    catch(Signal::SIGINT)
}

fn catch(signal: Signal) -> Result<Guard> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    let previous = unsafe { sigaction(signal, &action) }
        .map_err(|e| JailError::io(format!("install {signal} handler"), e.into()))?;
    Ok(Guard { signal, previous })
}

pub fn raised() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail with [`JailError::Interrupted`] once Ctrl-C was pressed.
pub fn check() -> Result<()> {
    if raised() {
        Err(JailError::Interrupted)
    } else {
        Ok(())
    }
}

use std::thread;

use tracing::{debug, error, info};

use super::Controller;
use crate::compose;
use crate::error::{JailError, Result};
use crate::registry::validate_name;

impl Controller<'_> {
    /// Power a jail off and wait until the machine is gone. Stopping a
    /// jail that isn't running is a no-op.
    pub fn stop(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let registry = self.registry();
        if !registry.is_running(name) {
            info!("jail {name} is not running");
            return Ok(());
        }

        let code = self.runner.run(&compose::poweroff(name))?;
        if code != 0 {
            return Err(JailError::StopFailed {
                name: name.to_string(),
                code,
            });
        }

        info!("waiting for jail {name} to stop...");
        while registry.is_running(name) {
            debug!(jail = %name, "still running");
            thread::sleep(self.settings.stop_poll_interval);
        }
        info!("stopped jail {name}");
        Ok(())
    }

    pub fn restart(&self, name: &str) -> Result<()> {
        if let Err(e) = self.stop(name) {
            error!("failed to stop jail {name}, aborting restart");
            return Err(e);
        }
        self.start(name).map(|_| ())
    }

    /// Stop a jail and delete it with its rootfs. `confirmation` must repeat
    /// the jail's name.
    pub fn remove(&self, name: &str, confirmation: &str) -> Result<()> {
        let jail = self.registry().existing(name)?;
        if confirmation != name {
            return Err(JailError::ConfirmationMismatch);
        }
        self.stop(name)?;
        self.storage().remove(jail.dir())?;
        info!("removed jail {name}");
        Ok(())
    }
}

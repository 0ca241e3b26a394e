use std::sync::Arc;

use tracing::{debug, error};

use crate::devices::Actuator;

/// Switches an actuator off when dropped.
///
/// Restoration runs from `Drop`, so it also happens when the owning future
/// is dropped mid-await or unwinds from a panic.
pub struct SafeStateGuard {
    actuator: Arc<dyn Actuator>,
}

impl SafeStateGuard {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    pub fn actuator(&self) -> &dyn Actuator {
        self.actuator.as_ref()
    }
}

impl Drop for SafeStateGuard {
    fn drop(&mut self) {
        debug!(device = self.actuator.name(), "restoring safe state");
        if let Err(e) = self.actuator.set_active(false) {
            error!(device = self.actuator.name(), error = %e, "failed to restore safe state");
        }
    }
}

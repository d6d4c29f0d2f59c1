//! Cancellable callback registrations.

use parking_lot::Mutex;

/// Handle returned by [`crate::LiveQuery::on`] and its typed variants.
///
/// `cancel` runs the wrapped teardown exactly once; subsequent calls are
/// no-ops. Dropping a registration does *not* cancel it — teardown is
/// always explicit.
pub struct CallbackRegistration {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CallbackRegistration {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A registration that was never attached (e.g. registering on a
    /// cancelled query). Cancelling it is a no-op.
    pub(crate) fn inert() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Detach the callback. Idempotent.
    pub fn cancel(&self) {
        let teardown = self.cancel.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether the registration is still attached.
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("active", &self.is_active())
            .finish()
    }
}

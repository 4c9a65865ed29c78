//! Warning dispatch.

use std::sync::Arc;

use fb_wire::Diagnostic;
use parking_lot::RwLock;

/// Receives warnings returned alongside successful responses.
///
/// Implemented for any `Fn(&Diagnostic) + Send + Sync` closure.
pub trait WarningCallback: Send + Sync {
    /// Handle one warning.
    fn process_warning(&self, warning: &Diagnostic);
}

impl<F> WarningCallback for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn process_warning(&self, warning: &Diagnostic) {
        self(warning);
    }
}

/// Routes warnings to the registered callback.
#[derive(Default)]
pub(crate) struct WarningDispatcher {
    callback: RwLock<Option<Arc<dyn WarningCallback>>>,
}

impl WarningDispatcher {
    pub(crate) fn set(&self, callback: Option<Arc<dyn WarningCallback>>) {
        *self.callback.write() = callback;
    }

    pub(crate) fn dispatch(&self, warning: &Diagnostic) {
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => callback.process_warning(warning),
            None => tracing::debug!(code = warning.code, message = %warning.message, "no warning callback, dropping warning"),
        }
    }
}

impl std::fmt::Debug for WarningDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarningDispatcher")
            .field("has_callback", &self.callback.read().is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fb_wire::{StatusOutcome, StatusVector};
    use parking_lot::Mutex;

    fn warning() -> Diagnostic {
        match StatusVector::warning(335_544_808).classify() {
            StatusOutcome::Warning(d) => d,
            _ => unreachable!("warning status"),
        }
    }

    #[test]
    fn test_dispatch_to_closure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher = WarningDispatcher::default();
        dispatcher.set(Some(Arc::new(move |w: &Diagnostic| sink.lock().push(w.code))));

        dispatcher.dispatch(&warning());
        assert_eq!(*seen.lock(), vec![335_544_808]);
    }

    #[test]
    fn test_dropped_without_callback() {
        let dispatcher = WarningDispatcher::default();
        dispatcher.dispatch(&warning());
        dispatcher.set(None);
        dispatcher.dispatch(&warning());
    }
}

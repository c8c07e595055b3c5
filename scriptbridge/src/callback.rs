//! Host-side callback surface.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::BridgeError;
use crate::value::Value;

/// Receives inbound native calls and exception reports from the bridge.
pub trait BridgeCallback: Send + Sync {
    fn call_natives(&self, module: &str, func: &str, call_id: &str, args: Value);

    fn report_exception(&self, error: &BridgeError);
}

/// Completion for one outbound call or script load, invoked by the executor
/// with its status value once it is done.
pub type NativeCallback = Box<dyn FnOnce(i64) + Send + 'static>;

/// Shared, clearable reference to the host callback.
///
/// Destroy clears the slot so late executor traffic cannot keep the host
/// object alive.
#[derive(Clone, Default)]
pub struct CallbackSlot {
    inner: Arc<RwLock<Option<Arc<dyn BridgeCallback>>>>,
}

impl CallbackSlot {
    pub fn new(callback: Arc<dyn BridgeCallback>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(callback))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Arc<dyn BridgeCallback>>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Arc<dyn BridgeCallback>>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Callback slot lock poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn get(&self) -> Option<Arc<dyn BridgeCallback>> {
        self.read().clone()
    }

    pub fn set(&self, callback: Arc<dyn BridgeCallback>) {
        *self.write() = Some(callback);
    }

    /// Returns whether a callback was registered.
    pub fn clear(&self) -> bool {
        self.write().take().is_some()
    }

    pub fn is_set(&self) -> bool {
        self.read().is_some()
    }

    /// Log `error` and hand it to the host if it is still listening.
    pub fn report(&self, error: &BridgeError) {
        tracing::error!(error = %error, "Reporting exception to host");
        match self.get() {
            Some(callback) => callback.report_exception(error),
            None => tracing::debug!("No host callback registered, exception dropped"),
        }
    }

    /// Forward an inbound native call. Returns false when nobody is listening.
    pub fn call_natives(&self, module: &str, func: &str, call_id: &str, args: Value) -> bool {
        // Clone out so the host runs without the slot lock held.
        let Some(callback) = self.get() else {
            tracing::debug!(module, func, "Native call after callback cleared");
            return false;
        };
        callback.call_natives(module, func, call_id, args);
        true
    }
}

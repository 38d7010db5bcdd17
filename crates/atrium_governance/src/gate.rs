//! Teardown gating.
//!
//! A managed object governed by an active governance must outlive the
//! function that used it. Each object container owns an [`UnloadGate`];
//! governance holds the gate while the object is governed and releases it on
//! enforce or disregard. An unload requested while the gate is held is
//! parked and handed back to whoever releases the last hold.

use parking_lot::Mutex;

/// Deferred unload action, run by whoever opens the gate
pub type DeferredUnload = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct GateState {
    holds: usize,
    deferred: Option<DeferredUnload>,
}

/// Blocks unloading of a managed object while governance holds it
#[derive(Default)]
pub struct UnloadGate {
    state: Mutex<GateState>,
}

impl UnloadGate {
    /// Create an open gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hold
    pub fn hold(&self) {
        self.state.lock().holds += 1;
    }

    /// Remove a hold.
    ///
    /// Returns the parked unload when this was the last hold; the caller must
    /// run it.
    #[must_use]
    pub fn release(&self) -> Option<DeferredUnload> {
        let mut state = self.state.lock();
        state.holds = state.holds.saturating_sub(1);
        if state.holds == 0 {
            state.deferred.take()
        } else {
            None
        }
    }

    /// Request an unload.
    ///
    /// Returns the action back when unloading is permitted now; otherwise
    /// the action is parked until the last hold is released.
    #[must_use]
    pub fn request_unload(&self, unload: DeferredUnload) -> Option<DeferredUnload> {
        let mut state = self.state.lock();
        if state.holds == 0 {
            Some(unload)
        } else {
            tracing::debug!(holds = state.holds, "unload deferred by governance");
            state.deferred = Some(unload);
            None
        }
    }

    /// Check if an unload may proceed now
    #[must_use]
    pub fn is_unload_permitted(&self) -> bool {
        self.state.lock().holds == 0
    }

    /// Check if an unload is parked
    #[must_use]
    pub fn is_unload_deferred(&self) -> bool {
        self.state.lock().deferred.is_some()
    }

    /// Current number of holds
    #[must_use]
    pub fn holds(&self) -> usize {
        self.state.lock().holds
    }
}

impl std::fmt::Debug for UnloadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UnloadGate")
            .field("holds", &state.holds)
            .field("deferred", &state.deferred.is_some())
            .finish()
    }
}

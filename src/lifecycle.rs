// Explicit teardown tracking
//
// GPU objects are destroyed by explicit destroy() calls in dependency order.
// Each owner carries a Lifecycle and checks it at every public entry point.

use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Active,
    TornDown,
}

impl Lifecycle {
    pub fn is_active(self) -> bool {
        self == Lifecycle::Active
    }

    /// Fail fast if the owner has already been destroyed
    pub fn ensure_active(self, owner: &'static str) -> Result<()> {
        match self {
            Lifecycle::Active => Ok(()),
            Lifecycle::TornDown => Err(RenderError::TornDown(owner)),
        }
    }

    /// Mark torn down. Returns false if it already was (double destroy).
    pub fn tear_down(&mut self) -> bool {
        let was_active = self.is_active();
        *self = Lifecycle::TornDown;
        was_active
    }

    /// Called from Drop: an owner still Active here leaked its GPU handles.
    pub fn check_dropped(self, owner: &'static str) {
        if self.is_active() && !std::thread::panicking() {
            log::error!("{} dropped without destroy(); GPU handles leaked", owner);
            debug_assert!(false, "{} dropped without destroy()", owner);
        }
    }
}

use crate::background::BackgroundMode;
use std::sync::{Arc, PoisonError, RwLock};

/// The current background mode, shared between the control side (writer)
/// and the pipeline worker (reader).
///
/// Last write wins. The worker reads the slot once at the start of each
/// pass, so a change lands on the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct ModeSlot {
    mode: Arc<RwLock<BackgroundMode>>,
}

impl ModeSlot {
    pub fn new(mode: BackgroundMode) -> Self {
        Self {
            mode: Arc::new(RwLock::new(mode)),
        }
    }

    pub fn get(&self) -> BackgroundMode {
        self.mode
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store `mode`; returns whether it differs from the previous value.
    pub fn set(&self, mode: BackgroundMode) -> bool {
        let mut slot = self.mode.write().unwrap_or_else(PoisonError::into_inner);
        if *slot == mode {
            return false;
        }
        *slot = mode;
        true
    }
}

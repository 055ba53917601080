use std::sync::atomic::{AtomicUsize, Ordering};

/// Indicates the underlying switch is on.
const ON: usize = 1;

/// Indicates the underlying switch is off.
const OFF: usize = 0;

/// Switch is an atomic on/off flag whose transitions happen via
/// compare-exchange, so only one of any set of concurrent callers
/// ever observes a flip it performed itself.
#[derive(Debug)]
pub struct Switch {
    state: AtomicUsize,
}

impl Default for Switch {
    fn default() -> Self {
        Self::new()
    }
}

impl Switch {
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(OFF),
        }
    }

    /// `turn_on` flips the state from OFF to ON, returning true only
    /// for the caller that performed the flip.
    #[inline]
    pub fn turn_on(&self) -> bool {
        self.state
            .compare_exchange(OFF, ON, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// `turn_off` flips the state from ON to OFF, returning true only
    /// for the caller that performed the flip.
    #[inline]
    pub fn turn_off(&self) -> bool {
        self.state
            .compare_exchange(ON, OFF, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// probe returns true when the state is ON else false.
    #[inline]
    pub fn probe(&self) -> bool {
        self.state.load(Ordering::Acquire) == ON
    }
}

//! Debug mode selection.
//!
//! Every counter carries a [`DebugFlags`] value fixed at creation. Counters
//! built with [`RefCount::new`](crate::RefCount::new) snapshot the
//! process-wide default; changing the default afterwards only affects
//! counters created later.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Which debugging machinery a counter runs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DebugFlags: u32 {
        /// Track every live holder; releases are validated against the set.
        const AUDIT   = 1 << 0;
        /// Keep a bounded history of hold/release events.
        const LOGGING = 1 << 1;

        const ALL     = Self::AUDIT.bits() | Self::LOGGING.bits();
    }
}

impl DebugFlags {
    /// Whether holds need an audit record at all.
    #[inline]
    pub const fn captures(self) -> bool {
        self.intersects(Self::ALL)
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        default_flags()
    }
}

static DEFAULT_FLAGS: AtomicU32 = AtomicU32::new(DebugFlags::ALL.bits());

/// Flags that [`RefCount::new`](crate::RefCount::new) will snapshot.
pub fn default_flags() -> DebugFlags {
    DebugFlags::from_bits_truncate(DEFAULT_FLAGS.load(Ordering::Relaxed))
}

/// Replace the process-wide default, returning the previous value.
pub fn set_default_flags(flags: DebugFlags) -> DebugFlags {
    let prev = DEFAULT_FLAGS.swap(flags.bits(), Ordering::Relaxed);
    log::debug!("refcnt default flags {:?} -> {:?}", DebugFlags::from_bits_truncate(prev), flags);
    DebugFlags::from_bits_truncate(prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_flags_capture_nothing() {
        assert!(!DebugFlags::empty().captures());
        assert!(DebugFlags::AUDIT.captures());
        assert!(DebugFlags::LOGGING.captures());
    }

    #[test]
    fn default_is_audit_and_logging() {
        // Other tests never touch the global, so the initial value holds.
        assert_eq!(default_flags(), DebugFlags::AUDIT | DebugFlags::LOGGING);
    }
}

//! Per-counter configuration.

use crate::flags::{default_flags, DebugFlags};

/// Ring size used when none is given.
pub const DEFAULT_HISTORY_CAPACITY: usize = 128;

/// Frames captured per audit record when none is given.
pub const DEFAULT_STACK_DEPTH: usize = 15;

/// What a hold does when its audit bookkeeping cannot be allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Exhaustion {
    /// Return [`RefError`](crate::RefError) and leave the count unchanged.
    #[default]
    Fail,
    /// Take the reference anyway, untracked.
    Degrade,
}

/// Settings captured by a counter at creation.
///
/// ```
/// use refcnt_audit::{Config, DebugFlags, RefCount};
///
/// let cfg = Config::new(DebugFlags::ALL).history_capacity(16).stack_depth(8);
/// let rc = RefCount::with_config(cfg);
/// assert_eq!(rc.flags(), DebugFlags::ALL);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) flags: DebugFlags,
    pub(crate) history_capacity: usize,
    pub(crate) stack_depth: usize,
    pub(crate) audit_limit: Option<usize>,
    pub(crate) on_exhaustion: Exhaustion,
}

impl Config {
    pub const fn new(flags: DebugFlags) -> Self {
        Self {
            flags,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stack_depth: DEFAULT_STACK_DEPTH,
            audit_limit: None,
            on_exhaustion: Exhaustion::Fail,
        }
    }

    /// Plain atomic counting; holds never allocate.
    pub const fn untracked() -> Self {
        Self::new(DebugFlags::empty())
    }

    /// Number of history slots. Zero is raised to one.
    pub const fn history_capacity(mut self, n: usize) -> Self {
        self.history_capacity = if n == 0 { 1 } else { n };
        self
    }

    pub const fn stack_depth(mut self, frames: usize) -> Self {
        self.stack_depth = frames;
        self
    }

    /// Cap the number of live audited holds.
    pub const fn audit_limit(mut self, limit: usize) -> Self {
        self.audit_limit = Some(limit);
        self
    }

    pub const fn on_exhaustion(mut self, policy: Exhaustion) -> Self {
        self.on_exhaustion = policy;
        self
    }

    pub const fn flags(&self) -> DebugFlags {
        self.flags
    }
}

impl Default for Config {
    /// Process-wide default flags with default sizes.
    fn default() -> Self {
        Self::new(default_flags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_raised() {
        let c = Config::new(DebugFlags::LOGGING).history_capacity(0);
        assert_eq!(c.history_capacity, 1);
    }

    #[test]
    fn untracked_has_no_flags() {
        let c = Config::untracked();
        assert!(c.flags().is_empty());
        assert_eq!(c.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(c.stack_depth, DEFAULT_STACK_DEPTH);
        assert_eq!(c.on_exhaustion, Exhaustion::Fail);
    }
}

//! Audit records: who took or dropped a reference, when, and from where.

use core::ffi::c_void;
use core::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{RefError, RefResult};

/// Caller-supplied identity attached to a hold.
///
/// Used for matching and display only; an `Object` address is never
/// dereferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HolderTag {
    /// A call site, usually produced by [`ftag!`](crate::ftag).
    Site(&'static str),
    /// The address of the object that owns the reference.
    Object(usize),
}

impl HolderTag {
    /// Tag a hold with the identity of `owner`.
    pub fn of<T: ?Sized>(owner: &T) -> Self {
        HolderTag::Object(owner as *const T as *const () as usize)
    }
}

impl fmt::Display for HolderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderTag::Site(s) => f.write_str(s),
            HolderTag::Object(a) => write!(f, "{:#x}", a),
        }
    }
}

/// Tag naming the calling module and line.
///
/// Use it when the reference is held by the calling function rather than by
/// some object.
#[macro_export]
macro_rules! ftag {
    () => {
        $crate::HolderTag::Site(concat!(module_path!(), ":", line!()))
    };
}

/// Return addresses captured at a hold or release, innermost first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackTrace {
    frames: Vec<usize>,
}

impl StackTrace {
    /// Walk the current stack, skipping `skip` innermost frames and keeping at
    /// most `depth`.
    pub fn capture(skip: usize, depth: usize) -> RefResult<Self> {
        let mut frames = Vec::new();
        if depth == 0 {
            return Ok(Self { frames });
        }
        frames
            .try_reserve_exact(depth)
            .map_err(|_| RefError::OutOfMemory { what: "audit stack" })?;
        let mut seen = 0usize;
        backtrace::trace(|frame| {
            seen += 1;
            if seen > skip {
                frames.push(frame.ip() as usize);
            }
            frames.len() < depth
        });
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl From<Vec<usize>> for StackTrace {
    fn from(frames: Vec<usize>) -> Self {
        Self { frames }
    }
}

/// Metadata for one hold or release event.
#[derive(Clone, Debug)]
pub struct AuditRecord {
    holder: HolderTag,
    thread: ThreadId,
    thread_name: Option<String>,
    timestamp: Instant,
    stack: StackTrace,
}

// Frames belonging to capture() and the counter entry point that called it.
const INTERNAL_FRAMES: usize = 3;

impl AuditRecord {
    pub(crate) fn capture(holder: HolderTag, depth: usize) -> RefResult<Self> {
        let stack = StackTrace::capture(INTERNAL_FRAMES, depth)?;
        let current = thread::current();
        Ok(Self {
            holder,
            thread: current.id(),
            thread_name: current.name().map(str::to_owned),
            timestamp: Instant::now(),
            stack,
        })
    }

    /// Build a record from parts; for tooling that reconstructs records.
    pub fn from_parts(holder: HolderTag, thread: ThreadId, timestamp: Instant, stack: StackTrace) -> Self {
        Self {
            holder,
            thread,
            thread_name: None,
            timestamp,
            stack,
        }
    }

    pub fn holder(&self) -> HolderTag {
        self.holder
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn stack(&self) -> &StackTrace {
        &self.stack
    }

    /// Time between this event and `now`, zero if `now` is earlier.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }
}

/// Resolve a code address to a symbol name with the `backtrace` crate.
pub(crate) fn resolve_symbol(addr: usize) -> Option<String> {
    let mut name = None;
    backtrace::resolve(addr as *mut c_void, |sym| {
        if name.is_none() {
            name = sym.name().map(|n| n.to_string());
        }
    });
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_respects_depth() {
        let st = StackTrace::capture(0, 4).unwrap();
        assert!(st.depth() <= 4);
        let none = StackTrace::capture(0, 0).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn record_notes_current_thread() {
        let rec = AuditRecord::capture(ftag!(), 8).unwrap();
        assert_eq!(rec.thread(), thread::current().id());
        assert!(rec.age(Instant::now()) < Duration::from_secs(60));
        match rec.holder() {
            HolderTag::Site(s) => assert!(s.contains("audit")),
            HolderTag::Object(_) => panic!("expected a site tag"),
        }
    }

    #[test]
    fn object_tags_compare_by_address() {
        let a = 1u32;
        let b = 2u32;
        assert_eq!(HolderTag::of(&a), HolderTag::of(&a));
        assert_ne!(HolderTag::of(&a), HolderTag::of(&b));
    }

    #[test]
    fn age_saturates_for_past_instants() {
        let then = Instant::now();
        let rec = AuditRecord::from_parts(HolderTag::Site("t"), thread::current().id(), Instant::now(), StackTrace::default());
        assert_eq!(rec.age(then), Duration::ZERO);
    }
}

//! Linear hold tokens and the counting trait.
//!
//! A [`RefToken`] is the proof that one hold was taken from a counter. It is
//! neither `Copy` nor `Clone`, and dropping it panics; the only valid way to
//! dispose of it is to hand it back through [`Count::release`]. Because
//! `release` takes the token by value, releasing the same hold twice does not
//! compile.
//!
//! Branding is runtime, not type-level: a token records the id of the counter
//! it came from, and audited counters look the token up in their live-holder
//! index on release. A token handed to the wrong audited counter is caught
//! there. Counters with no debug flags mint a sentinel token with id
//! [`TokenId::UNTRACKED`] and no audit record, so the fast path never
//! allocates.
//!
//! Patterns
//! - Owned token: keep the `RefToken` in the structure that owns the reference
//!   and move it into `release` when the reference goes away.
//! - Scoped hold: [`Hold`] wraps a token in `ManuallyDrop` and releases it on
//!   drop, for references that live exactly as long as a lexical scope.
//!
//! ```rust
//! use refcnt_audit::{ftag, Config, Count, DebugFlags, RefCount, RefState};
//!
//! let rc = RefCount::with_config(Config::new(DebugFlags::AUDIT));
//! let t = rc.hold(ftag!()).unwrap();
//! {
//!     let _scoped = rc.hold_scoped(ftag!()).unwrap();
//!     assert_eq!(rc.count(), 2);
//! }
//! assert_eq!(rc.release(t), RefState::Freeable);
//! ```
//!
//! Unwinding
//! - A token dropped while the thread is already panicking does not panic a
//!   second time; the hold simply leaks. The counter's own drop check is
//!   skipped the same way.

use core::fmt;
use core::mem::ManuallyDrop;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audit::{AuditRecord, HolderTag};
use crate::error::RefResult;

/// Identity of one hold. Unique across every counter in the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(u64);

impl TokenId {
    /// Id carried by tokens that no holder index knows about.
    pub const UNTRACKED: Self = Self(0);

    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_tracked(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tracked() {
            write!(f, "tok#{}", self.0)
        } else {
            f.write_str("tok#-")
        }
    }
}

/// Identity of a counter; also the process-wide lock order for transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterId(u64);

impl CounterId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "refcnt#{}", self.0)
    }
}

/// Linear proof of one hold (or one bulk hold of `weight` references).
pub struct RefToken {
    id: TokenId,
    // Not rewritten by transfer.
    parent: CounterId,
    weight: u64,
    audit: Option<Arc<AuditRecord>>,
}

impl RefToken {
    pub(crate) fn new(
        id: TokenId,
        parent: CounterId,
        weight: u64,
        audit: Option<Arc<AuditRecord>>,
    ) -> Self {
        Self {
            id,
            parent,
            weight,
            audit,
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    /// Counter this token was minted by.
    pub fn parent(&self) -> CounterId {
        self.parent
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Record captured when the hold was taken, if the counter audits.
    pub fn audit(&self) -> Option<&AuditRecord> {
        self.audit.as_deref()
    }

    /// Consume the token without running its drop check.
    pub(crate) fn into_parts(mut self) -> (TokenId, CounterId, u64, Option<Arc<AuditRecord>>) {
        let audit = self.audit.take();
        let parts = (self.id, self.parent, self.weight, audit);
        // Nothing left to free once the audit record is moved out.
        core::mem::forget(self);
        parts
    }

    /// Give up the token without releasing it. Only meaningful ahead of
    /// [`RefCount::destroy_expecting`](crate::RefCount::destroy_expecting),
    /// which accounts for abandoned references in bulk.
    pub fn abandon(self) {
        let (id, parent, weight, _) = self.into_parts();
        log::trace!("{} from {} abandoned ({} refs)", id, parent, weight);
    }
}

impl fmt::Debug for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefToken")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("weight", &self.weight)
            .finish()
    }
}

impl Drop for RefToken {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        panic!(
            "{} from {} dropped without release",
            self.id, self.parent
        );
    }
}

/// Result of a release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "a Freeable result means the owner may now be reclaimed"]
pub enum RefState {
    /// Other references remain.
    Held,
    /// The count reached zero with this release.
    Freeable,
}

impl RefState {
    pub fn is_freeable(self) -> bool {
        matches!(self, RefState::Freeable)
    }
}

/// A source of counted references, enforced by linear token flow.
pub trait Count {
    /// Take one reference on behalf of `holder`.
    fn hold(&self, holder: HolderTag) -> RefResult<RefToken>;

    /// Return a reference. Panics if the token is not a live hold of this
    /// counter (when that can be checked) or if the count would underflow.
    fn release(&self, token: RefToken) -> RefState;

    /// Take a reference released when the returned guard drops.
    fn hold_scoped(&self, holder: HolderTag) -> RefResult<Hold<'_, Self>>
    where
        Self: Sized,
    {
        let token = self.hold(holder)?;
        Ok(Hold {
            counter: self,
            token: ManuallyDrop::new(token),
        })
    }
}

/// Scoped hold on a [`Count`].
pub struct Hold<'a, C: Count> {
    counter: &'a C,
    token: ManuallyDrop<RefToken>,
}

impl<'a, C: Count> Hold<'a, C> {
    pub fn token(&self) -> &RefToken {
        &self.token
    }

    /// Keep the reference beyond this scope.
    pub fn into_token(self) -> RefToken {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the token is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.token) }
    }
}

impl<'a, C: Count> Drop for Hold<'a, C> {
    fn drop(&mut self) {
        // SAFETY: the token is only taken here or in into_token, which
        // suppresses this drop.
        let t = unsafe { ManuallyDrop::take(&mut self.token) };
        let _ = self.counter.release(t);
    }
}

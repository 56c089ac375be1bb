//! Debuggable reference counts.
//!
//! A [`RefCount`] hands out a linear [`RefToken`] for every hold and takes
//! it back on release. What happens in between depends on the counter's
//! [`DebugFlags`], fixed when the counter is created:
//!
//! - no flags: a single atomic add/sub. Tokens are sentinels and nothing is
//!   allocated.
//! - `AUDIT`: every live hold is indexed with an [`AuditRecord`] (holder tag,
//!   thread, time, stack). Releasing a token the counter does not hold panics
//!   with the details of the conflicting hold.
//! - `LOGGING`: a fixed-size ring keeps recent HOLD and RELEASE events,
//!   including holds that have since been released, for postmortem reading.
//!
//! Contract violations panic: releasing an unheld token, underflow, or
//! destroying a counter that is still held. Running out of audit bookkeeping
//! is a [`RefError`], or a silent downgrade to an untracked hold when the
//! counter is configured with [`Exhaustion::Degrade`].
//!
//! [`RefCount::transfer`] moves every outstanding hold, the holder index and
//! the history from one counter to another, for when one owning object
//! supersedes another.
//!
//! ```
//! use refcnt_audit::{ftag, Config, DebugFlags, RawAddresses, RefCount};
//!
//! let rc = RefCount::with_config(Config::new(DebugFlags::ALL).history_capacity(32));
//! let t = rc.hold(ftag!()).unwrap();
//!
//! let mut out = String::new();
//! rc.snapshot().write_holders(&mut out, false, &RawAddresses).unwrap();
//! assert!(out.lines().count() == 2);
//!
//! assert!(rc.release(t).is_freeable());
//! rc.destroy();
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod flags;
pub mod hash;
pub mod history;
pub mod inspect;
mod refcount;
pub mod tokens;

pub use audit::{AuditRecord, HolderTag, StackTrace};
pub use config::{Config, Exhaustion, DEFAULT_HISTORY_CAPACITY, DEFAULT_STACK_DEPTH};
pub use error::{RefError, RefResult};
pub use flags::{default_flags, set_default_flags, DebugFlags};
pub use history::{EventKind, History, HistoryEvent};
pub use inspect::{BacktraceSymbols, HolderInfo, RawAddresses, Snapshot, SymbolResolver};
pub use refcount::RefCount;
pub use tokens::{Count, CounterId, Hold, RefState, RefToken, TokenId};

//! The reference counter.
//!
//! `count` is an atomic so `count()`/`is_held()` never lock, and counters
//! without debug flags never touch the ledger at all. Audited and logging
//! counters mutate `count` only while holding the ledger lock, so the count,
//! the live-holder index and the history move together.
//!
//! Invariant with AUDIT: `count == sum(live holder weights) + untracked`.
//! `untracked` covers holds that have no index entry: degraded holds and
//! holds moved in from a counter that did not audit.

use core::fmt::Write as _;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use spin::{Mutex, MutexGuard};

use crate::audit::{AuditRecord, HolderTag};
use crate::config::{Config, Exhaustion};
use crate::error::{RefError, RefResult};
use crate::flags::DebugFlags;
use crate::hash::HolderIndex;
use crate::history::History;
use crate::inspect::{write_stack, BacktraceSymbols};
use crate::tokens::{Count, CounterId, RefState, RefToken, TokenId};

/// A live audited hold.
#[derive(Clone, Debug)]
pub(crate) struct Holder {
    pub(crate) weight: u64,
    pub(crate) audit: Arc<AuditRecord>,
}

pub(crate) struct Ledger {
    pub(crate) holders: Option<HolderIndex<TokenId, Holder>>,
    pub(crate) untracked: u64,
    pub(crate) history: Option<History>,
}

impl Ledger {
    fn new(cfg: &Config) -> Self {
        Self {
            holders: cfg
                .flags
                .contains(DebugFlags::AUDIT)
                .then(Default::default),
            untracked: 0,
            history: cfg
                .flags
                .contains(DebugFlags::LOGGING)
                .then(|| History::new(cfg.history_capacity)),
        }
    }
}

/// Debuggable reference count.
///
/// ```
/// use refcnt_audit::{Config, DebugFlags, HolderTag, RefCount, RefState};
///
/// let c = RefCount::with_config(Config::new(DebugFlags::AUDIT));
/// let t1 = c.hold(HolderTag::Site("A")).unwrap();
/// let t2 = c.hold(HolderTag::Site("B")).unwrap();
/// assert_eq!(c.count(), 2);
/// assert_eq!(c.release(t1), RefState::Held);
/// assert_eq!(c.release(t2), RefState::Freeable);
/// c.destroy();
/// ```
pub struct RefCount {
    id: CounterId,
    count: AtomicU64,
    config: Config,
    ledger: Mutex<Ledger>,
}

impl RefCount {
    /// Counter using the process-wide default flags.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let id = CounterId::next();
        log::debug!("{} created with {:?}", id, config.flags);
        Self {
            id,
            count: AtomicU64::new(0),
            ledger: Mutex::new(Ledger::new(&config)),
            config,
        }
    }

    pub fn id(&self) -> CounterId {
        self.id
    }

    pub fn flags(&self) -> DebugFlags {
        self.config.flags
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current number of references.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.count() != 0
    }

    /// Take one reference.
    pub fn hold(&self, holder: HolderTag) -> RefResult<RefToken> {
        self.hold_many(holder, 1)
    }

    /// Take `n` references under one token; the token releases all `n`.
    ///
    /// `n == 0` is rejected with [`RefError::ZeroHold`].
    pub fn hold_many(&self, holder: HolderTag, n: u64) -> RefResult<RefToken> {
        if n == 0 {
            return Err(RefError::ZeroHold);
        }

        if !self.config.flags.captures() {
            self.increment(n);
            return Ok(RefToken::new(TokenId::UNTRACKED, self.id, n, None));
        }

        let audit = match AuditRecord::capture(holder, self.config.stack_depth) {
            Ok(a) => Arc::new(a),
            Err(e) => return self.exhausted(&mut self.ledger.lock(), n, e),
        };

        let mut ledger = self.ledger.lock();
        let id = TokenId::next();

        if let Some(holders) = ledger.holders.as_mut() {
            let reserved = match self.config.audit_limit {
                Some(limit) if holders.len() >= limit => Err(RefError::AuditLimit { limit }),
                _ => holders
                    .try_reserve(1)
                    .map_err(|_| RefError::OutOfMemory { what: "holder index" }),
            };
            if let Err(e) = reserved {
                return self.exhausted(&mut ledger, n, e);
            }
            holders.insert(
                id,
                Holder {
                    weight: n,
                    audit: audit.clone(),
                },
            );
        }

        self.increment(n);

        if let Some(history) = ledger.history.as_mut() {
            let _ = history.record_hold(id, n, audit.clone());
        }

        Ok(RefToken::new(id, self.id, n, Some(audit)))
    }

    fn exhausted(&self, ledger: &mut Ledger, n: u64, err: RefError) -> RefResult<RefToken> {
        match self.config.on_exhaustion {
            Exhaustion::Fail => Err(err),
            Exhaustion::Degrade => {
                log::warn!("{}: {}; taking hold untracked", self.id, err);
                if ledger.holders.is_some() {
                    ledger.untracked += n;
                }
                self.increment(n);
                Ok(RefToken::new(TokenId::UNTRACKED, self.id, n, None))
            }
        }
    }

    /// Return a reference. `Freeable` means this release took the count to zero.
    pub fn release(&self, token: RefToken) -> RefState {
        let (id, parent, weight, hold_audit) = token.into_parts();

        if !self.config.flags.captures() {
            return self.decrement(weight, id);
        }

        let rele = if id.is_tracked() && self.config.flags.contains(DebugFlags::LOGGING) {
            Some(AuditRecord::capture(hold_audit_tag(&hold_audit), self.config.stack_depth))
        } else {
            None
        };

        let mut ledger = self.ledger.lock();

        if let Some(holders) = ledger.holders.as_mut() {
            if id.is_tracked() {
                match holders.remove(&id) {
                    Some(h) if h.weight == weight => {}
                    Some(h) => {
                        drop(ledger);
                        self.violation(format_args!(
                            "releasing {} with weight {} but it was held with weight {}\n{}",
                            id,
                            weight,
                            h.weight,
                            describe_audit("held", &h.audit)
                        ));
                    }
                    // Moved in from a counter that logged without auditing.
                    None if parent != self.id && ledger.untracked >= weight => {
                        ledger.untracked -= weight;
                    }
                    None => {
                        let last = ledger
                            .history
                            .as_ref()
                            .and_then(|hist| hist.find(id))
                            .map(|ev| describe_audit(ev.kind().label(), ev.audit()))
                            .unwrap_or_default();
                        drop(ledger);
                        self.violation(format_args!(
                            "releasing unheld refcount token, cnt: {} token: {} (from {})\n{}",
                            self.id, id, parent, last
                        ));
                    }
                }
            } else if ledger.untracked >= weight {
                ledger.untracked -= weight;
            } else {
                drop(ledger);
                self.violation(format_args!(
                    "releasing untracked token from {} with no untracked holds outstanding",
                    parent
                ));
            }
        }

        if let (Some(history), Some(rele)) = (ledger.history.as_mut(), rele) {
            match rele {
                Ok(rele) => {
                    let _ = history.record_release(id, weight, hold_audit, Arc::new(rele));
                }
                Err(e) => {
                    log::warn!("{}: release of {} not logged: {}", self.id, id, e);
                    history.forget_hold(id);
                }
            }
        }

        self.decrement(weight, id)
    }

    #[inline]
    fn increment(&self, n: u64) {
        let prev = self.count.fetch_add(n, Ordering::AcqRel);
        if prev.checked_add(n).is_none() {
            self.violation(format_args!("count overflow ({} + {})", prev, n));
        }
    }

    #[inline]
    fn decrement(&self, n: u64, id: TokenId) -> RefState {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(n))
        {
            Ok(prev) if prev == n => RefState::Freeable,
            Ok(_) => RefState::Held,
            Err(c) => self.violation(format_args!(
                "count underflow releasing {} ({} - {})",
                id, c, n
            )),
        }
    }

    /// Move every outstanding reference of `src` into `dst`.
    ///
    /// Ledgers are locked in [`CounterId`] order. Moved tokens keep their
    /// original `parent`; when `dst` audits they are validated against its
    /// index from now on.
    pub fn transfer(dst: &RefCount, src: &RefCount) {
        if dst.id == src.id {
            return;
        }
        let (mut d, mut s): (MutexGuard<'_, Ledger>, MutexGuard<'_, Ledger>) = if dst.id < src.id {
            let d = dst.ledger.lock();
            (d, src.ledger.lock())
        } else {
            let s = src.ledger.lock();
            (dst.ledger.lock(), s)
        };

        let moved = src.count.swap(0, Ordering::AcqRel);
        if moved != 0 {
            dst.increment(moved);
        }

        let untracked = s.untracked;
        s.untracked = 0;
        let src_holders = s.holders.as_mut().map(std::mem::take);
        if let Some(dh) = d.holders.as_mut() {
            match src_holders {
                Some(sh) => {
                    dh.extend(sh);
                    d.untracked += untracked;
                }
                None => d.untracked += moved,
            }
        }

        match (d.history.as_mut(), s.history.as_mut()) {
            (Some(dh), Some(sh)) => dh.absorb(sh),
            (None, Some(sh)) => sh.clear(),
            _ => {}
        }

        log::debug!("transferred {} refs from {} to {}", moved, src.id, dst.id);
    }

    /// Tear down the counter. Panics if any reference is outstanding.
    pub fn destroy(self) {
        self.check_idle();
        log::debug!("{} destroyed", self.id);
    }

    /// Tear down a counter whose remaining references are being dropped
    /// wholesale. Panics unless exactly `n` are outstanding.
    ///
    /// Tokens still out must be disposed of with [`RefToken::abandon`].
    pub fn destroy_expecting(self, n: u64) {
        let count = self.count();
        if count != n {
            self.violation(format_args!(
                "destroying refcount expecting {} references but {} are outstanding",
                n, count
            ));
        }
        {
            let mut ledger = self.ledger.lock();
            if let Some(holders) = ledger.holders.as_mut() {
                holders.clear();
            }
            ledger.untracked = 0;
        }
        self.count.store(0, Ordering::Release);
        log::debug!("{} destroyed with {} references abandoned", self.id, n);
    }

    fn check_idle(&self) {
        let count = self.count();
        if count == 0 {
            return;
        }
        let mut report = String::new();
        if let Some(holders) = self.ledger.lock().holders.as_ref() {
            let mut live: Vec<_> = holders.iter().collect();
            live.sort_by_key(|(id, _)| **id);
            for (id, h) in live {
                let _ = writeln!(report, "  {} x{}: {}", id, h.weight, describe_audit("held", &h.audit));
            }
        }
        self.violation(format_args!(
            "destroying refcount with outstanding references: {} ({} refs)\n{}",
            self.id, count, report
        ));
    }

    pub(crate) fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock()
    }

    #[cold]
    #[inline(never)]
    fn violation(&self, args: core::fmt::Arguments<'_>) -> ! {
        log::error!("{}: {}", self.id, args);
        panic!("{}: {}", self.id, args);
    }
}

fn hold_audit_tag(hold: &Option<Arc<AuditRecord>>) -> HolderTag {
    hold.as_ref()
        .map(|a| a.holder())
        .unwrap_or(HolderTag::Site("release"))
}

fn describe_audit(what: &str, a: &AuditRecord) -> String {
    let mut s = format!(
        "{} by {} on {} {:?} ago",
        what,
        a.holder(),
        a.thread_name().map_or_else(|| format!("{:?}", a.thread()), str::to_owned),
        a.age(Instant::now())
    );
    s.push('\n');
    let _ = write_stack(&mut s, a, "    ", &BacktraceSymbols);
    s
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for RefCount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefCount")
            .field("id", &self.id)
            .field("count", &self.count())
            .field("flags", &self.config.flags)
            .finish()
    }
}

impl Drop for RefCount {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.check_idle();
        }
    }
}

impl Count for RefCount {
    #[inline]
    fn hold(&self, holder: HolderTag) -> RefResult<RefToken> {
        RefCount::hold(self, holder)
    }

    #[inline]
    fn release(&self, token: RefToken) -> RefState {
        RefCount::release(self, token)
    }
}

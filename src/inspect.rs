//! Read-only views of a counter for debugging.
//!
//! [`RefCount::snapshot`] copies the count, the live holders and the history
//! under the ledger lock. The views then render from the copy:
//!
//! - [`Snapshot::write_count`]: the count alone.
//! - [`Snapshot::write_holders`]: one row per live holder, `TOKEN THREAD TAG TAKEN`.
//! - [`Snapshot::write_token`]: one holder.
//! - [`Snapshot::write_log`]: the history, newest first, `EVENT TOKEN TIMESTAMP`.
//!
//! Ages print as `T-<secs>.<nanos>` relative to the moment the snapshot was
//! taken. With `verbose`, each row is followed by its stack, one frame per
//! line, named through a [`SymbolResolver`].

use core::fmt::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{resolve_symbol, AuditRecord};
use crate::error::{RefError, RefResult};
use crate::flags::DebugFlags;
use crate::history::HistoryEvent;
use crate::refcount::RefCount;
use crate::tokens::{CounterId, TokenId};

/// Names code addresses for stack output.
pub trait SymbolResolver {
    fn resolve(&self, addr: usize) -> Option<String>;
}

/// Resolves through the `backtrace` crate's symbolizer.
#[derive(Clone, Copy, Debug, Default)]
pub struct BacktraceSymbols;

impl SymbolResolver for BacktraceSymbols {
    fn resolve(&self, addr: usize) -> Option<String> {
        resolve_symbol(addr)
    }
}

/// Prints bare addresses.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawAddresses;

impl SymbolResolver for RawAddresses {
    fn resolve(&self, _addr: usize) -> Option<String> {
        None
    }
}

/// A live holder as seen by the snapshot.
#[derive(Clone, Debug)]
pub struct HolderInfo {
    pub token: TokenId,
    pub weight: u64,
    pub audit: Arc<AuditRecord>,
}

/// Point-in-time copy of a counter's debugging state.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub counter: CounterId,
    pub flags: DebugFlags,
    pub count: u64,
    pub untracked: u64,
    /// Sorted by token id.
    pub holders: Vec<HolderInfo>,
    /// Oldest first; `None` when the counter does not log.
    pub history: Option<Vec<HistoryEvent>>,
    pub history_dropped: u64,
    pub taken_at: Instant,
}

impl RefCount {
    pub fn snapshot(&self) -> Snapshot {
        let ledger = self.ledger();
        let mut holders: Vec<HolderInfo> = ledger
            .holders
            .iter()
            .flat_map(|h| h.iter())
            .map(|(&token, h)| HolderInfo {
                token,
                weight: h.weight,
                audit: Arc::clone(&h.audit),
            })
            .collect();
        holders.sort_by_key(|h| h.token);
        Snapshot {
            counter: self.id(),
            flags: self.flags(),
            count: self.count(),
            untracked: ledger.untracked,
            holders,
            history: ledger.history.as_ref().map(|h| h.iter().cloned().collect()),
            history_dropped: ledger.history.as_ref().map_or(0, |h| h.dropped()),
            taken_at: Instant::now(),
        }
    }
}

struct Age(Duration);

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}.{:09}", self.0.as_secs(), self.0.subsec_nanos())
    }
}

fn thread_label(a: &AuditRecord) -> String {
    match a.thread_name() {
        Some(n) => n.to_owned(),
        None => format!("{:?}", a.thread()),
    }
}

pub(crate) fn write_stack<W: Write>(w: &mut W, a: &AuditRecord, indent: &str, symbols: &dyn SymbolResolver) -> fmt::Result {
    for &pc in a.stack().frames() {
        match symbols.resolve(pc) {
            Some(name) => writeln!(w, "{}{:#x} {}", indent, pc, name)?,
            None => writeln!(w, "{}{:#x}", indent, pc)?,
        }
    }
    Ok(())
}

impl Snapshot {
    pub fn write_count<W: Write>(&self, w: &mut W) -> fmt::Result {
        writeln!(w, "{}", self.count)
    }

    pub fn write_holders<W: Write>(&self, w: &mut W, verbose: bool, symbols: &dyn SymbolResolver) -> fmt::Result {
        writeln!(w, "{:>16} {:>16} {:>24} {}", "TOKEN", "THREAD", "TAG", "TAKEN")?;
        for h in &self.holders {
            self.write_holder_row(w, h, verbose, symbols)?;
        }
        if self.untracked != 0 {
            writeln!(w, "({} untracked)", self.untracked)?;
        }
        Ok(())
    }

    /// Render the live holder `token`.
    pub fn write_token<W: Write>(
        &self,
        w: &mut W,
        token: TokenId,
        verbose: bool,
        symbols: &dyn SymbolResolver,
    ) -> RefResult<()> {
        let h = self
            .holders
            .iter()
            .find(|h| h.token == token)
            .ok_or(RefError::UnknownToken(token))?;
        self.write_holder_row(w, h, verbose, symbols)?;
        Ok(())
    }

    fn write_holder_row<W: Write>(
        &self,
        w: &mut W,
        h: &HolderInfo,
        verbose: bool,
        symbols: &dyn SymbolResolver,
    ) -> fmt::Result {
        writeln!(
            w,
            "{:>16} {:>16} {:>24} {}",
            h.token.to_string(),
            thread_label(&h.audit),
            h.audit.holder().to_string(),
            Age(h.audit.age(self.taken_at))
        )?;
        if verbose {
            write_stack(w, &h.audit, "  ", symbols)?;
        }
        Ok(())
    }

    /// Render the history, newest event first.
    pub fn write_log<W: Write>(&self, w: &mut W, verbose: bool, symbols: &dyn SymbolResolver) -> RefResult<()> {
        let events = self.history.as_ref().ok_or(RefError::LoggingDisabled)?;
        self.write_events(w, events, verbose, symbols)?;
        Ok(())
    }

    fn write_events<W: Write>(
        &self,
        w: &mut W,
        events: &[HistoryEvent],
        verbose: bool,
        symbols: &dyn SymbolResolver,
    ) -> fmt::Result {
        writeln!(w, "{:>5} {:>16} {}", "EVENT", "TOKEN", "TIMESTAMP")?;
        for ev in events.iter().rev() {
            writeln!(
                w,
                "{:>5} {:>16} {}",
                ev.kind().label(),
                ev.token().to_string(),
                Age(ev.audit().age(self.taken_at))
            )?;
            if verbose {
                write_stack(w, ev.audit(), "    ", symbols)?;
                if let Some(hold) = ev.hold_audit() {
                    writeln!(w, "    held {} by {}:", Age(hold.age(self.taken_at)), hold.holder())?;
                    write_stack(w, hold, "      ", symbols)?;
                }
            }
        }
        if self.history_dropped != 0 {
            writeln!(w, "({} events dropped)", self.history_dropped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::HolderTag;
    use crate::config::Config;
    use crate::tokens::RefState;

    #[test]
    fn holders_table_lists_live_tokens() {
        let rc = RefCount::with_config(Config::new(DebugFlags::AUDIT));
        let a = rc.hold(HolderTag::Site("alpha")).unwrap();
        let b = rc.hold(HolderTag::Site("beta")).unwrap();
        let snap = rc.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.holders.len(), 2);
        assert!(snap.holders[0].token < snap.holders[1].token);

        let mut out = String::new();
        snap.write_holders(&mut out, false, &RawAddresses).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("TOKEN") && lines[0].contains("TAKEN"));
        assert!(lines[1].contains("alpha") && lines[1].contains("T-"));
        assert!(lines[2].contains("beta"));

        let _ = rc.release(a);
        let _ = rc.release(b);
    }

    #[test]
    fn verbose_holders_include_frames() {
        let rc = RefCount::with_config(Config::new(DebugFlags::AUDIT).stack_depth(4));
        let t = rc.hold(HolderTag::Site("deep")).unwrap();
        let depth = t.audit().unwrap().stack().depth();
        let mut out = String::new();
        rc.snapshot().write_holders(&mut out, true, &RawAddresses).unwrap();
        assert_eq!(out.lines().count(), 2 + depth);
        let _ = rc.release(t);
    }

    #[test]
    fn token_view_rejects_unknown() {
        let rc = RefCount::with_config(Config::new(DebugFlags::AUDIT));
        let t = rc.hold(HolderTag::Site("one")).unwrap();
        let snap = rc.snapshot();
        let mut out = String::new();
        snap.write_token(&mut out, t.id(), false, &RawAddresses).unwrap();
        assert!(out.contains("one"));
        assert_eq!(
            snap.write_token(&mut out, TokenId::UNTRACKED, false, &RawAddresses),
            Err(RefError::UnknownToken(TokenId::UNTRACKED))
        );
        assert_eq!(rc.release(t), RefState::Freeable);
    }

    #[test]
    fn log_is_newest_first() {
        let rc = RefCount::with_config(Config::new(DebugFlags::LOGGING).history_capacity(8));
        let t1 = rc.hold(HolderTag::Site("first")).unwrap();
        let t2 = rc.hold(HolderTag::Site("second")).unwrap();
        let id2 = t2.id();
        let _ = rc.release(t1);

        let mut out = String::new();
        rc.snapshot().write_log(&mut out, false, &RawAddresses).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert!(lines[0].contains("EVENT"));
        assert!(lines[1].starts_with(" RELE"));
        assert!(lines[2].starts_with(" HOLD") && lines[2].contains(&id2.to_string()));
        assert_eq!(lines.len(), 3);
        let _ = rc.release(t2);
    }

    #[test]
    fn log_requires_logging() {
        let rc = RefCount::with_config(Config::new(DebugFlags::AUDIT));
        let mut out = String::new();
        assert_eq!(
            rc.snapshot().write_log(&mut out, false, &RawAddresses),
            Err(RefError::LoggingDisabled)
        );
    }

    struct Broken;

    impl Write for Broken {
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    /// A failing writer surfaces as an error from every view.
    fn writer_errors_propagate() {
        let rc = RefCount::with_config(Config::new(DebugFlags::ALL));
        let t = rc.hold(HolderTag::Site("w")).unwrap();
        let snap = rc.snapshot();
        assert_eq!(snap.write_log(&mut Broken, false, &RawAddresses), Err(RefError::Format));
        assert_eq!(
            snap.write_token(&mut Broken, t.id(), false, &RawAddresses),
            Err(RefError::Format)
        );
        assert!(snap.write_holders(&mut Broken, false, &RawAddresses).is_err());
        assert!(snap.write_count(&mut Broken).is_err());
        let _ = rc.release(t);
    }

    #[test]
    fn age_formats_nanos() {
        assert_eq!(Age(Duration::new(3, 42)).to_string(), "T-3.000000042");
    }
}

//! Bounded hold/release history.
//!
//! The ring holds at most `capacity` events. A HOLD event stays in the ring
//! while its token is live; when the token is released the HOLD event is
//! removed and its audit record rides along in the RELEASE event as
//! `hold_audit`. Every HOLD in the ring therefore belongs to a live token, and
//! eviction only ever takes the oldest RELEASE. When the ring is full of live
//! HOLDs the incoming event is dropped and counted in [`History::dropped`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::audit::AuditRecord;
use crate::tokens::TokenId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Hold,
    Release,
}

impl EventKind {
    /// Four-letter label used by the log view.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Hold => "HOLD",
            EventKind::Release => "RELE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HistoryEvent {
    kind: EventKind,
    token: TokenId,
    weight: u64,
    audit: Arc<AuditRecord>,
    hold_audit: Option<Arc<AuditRecord>>,
}

impl HistoryEvent {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn token(&self) -> TokenId {
        self.token
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Record of this event: the hold site for HOLD, the release site for RELEASE.
    pub fn audit(&self) -> &AuditRecord {
        &self.audit
    }

    /// For RELEASE events, the record of the matching hold.
    pub fn hold_audit(&self) -> Option<&AuditRecord> {
        self.hold_audit.as_deref()
    }

    pub fn timestamp(&self) -> Instant {
        self.audit.timestamp()
    }
}

#[derive(Debug)]
pub struct History {
    ring: VecDeque<HistoryEvent>,
    capacity: usize,
    dropped: u64,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Events that could not be recorded because every slot held a live HOLD.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn record_hold(&mut self, token: TokenId, weight: u64, audit: Arc<AuditRecord>) -> bool {
        self.push(HistoryEvent {
            kind: EventKind::Hold,
            token,
            weight,
            audit,
            hold_audit: None,
        })
    }

    pub(crate) fn record_release(
        &mut self,
        token: TokenId,
        weight: u64,
        hold_audit: Option<Arc<AuditRecord>>,
        audit: Arc<AuditRecord>,
    ) -> bool {
        self.forget_hold(token);
        self.push(HistoryEvent {
            kind: EventKind::Release,
            token,
            weight,
            audit,
            hold_audit,
        })
    }

    /// Remove the HOLD event of `token`, which is no longer live.
    pub(crate) fn forget_hold(&mut self, token: TokenId) {
        if let Some(pos) = self
            .ring
            .iter()
            .rposition(|e| e.kind == EventKind::Hold && e.token == token)
        {
            self.ring.remove(pos);
        }
    }

    fn push(&mut self, ev: HistoryEvent) -> bool {
        if self.ring.len() >= self.capacity && !self.evict_oldest_release() {
            self.dropped += 1;
            log::warn!(
                "refcnt history full of live holds ({} slots), dropping {} event for {}",
                self.capacity,
                ev.kind.label(),
                ev.token
            );
            return false;
        }
        self.ring.push_back(ev);
        true
    }

    fn evict_oldest_release(&mut self) -> bool {
        match self.ring.iter().position(|e| e.kind == EventKind::Release) {
            Some(pos) => {
                self.ring.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Merge `other` into `self` in timestamp order, leaving `other` empty.
    pub(crate) fn absorb(&mut self, other: &mut History) {
        let mut merged: Vec<HistoryEvent> = self.ring.drain(..).chain(other.ring.drain(..)).collect();
        merged.sort_by_key(HistoryEvent::timestamp);
        self.dropped += other.dropped;
        other.dropped = 0;
        for ev in merged {
            self.push(ev);
        }
    }

    /// Newest event first.
    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.ring.iter().rev()
    }

    /// Oldest event first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.ring.iter()
    }

    /// Most recent event involving `token`.
    pub fn find(&self, token: TokenId) -> Option<&HistoryEvent> {
        self.newest_first().find(|e| e.token == token)
    }

    pub(crate) fn clear(&mut self) {
        self.ring.clear();
        self.dropped = 0;
    }
}

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// Things that can be scheduled against the cycle counter
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Vi,
    Compare,
    /// Forces an interrupt check at the next unit boundary
    Check,
    Si,
    Pi,
    Ai,
    Sp,
    Dp,
}

/// MI interrupt lines
pub mod mi {
    pub const SP: u32 = 0x01;
    pub const SI: u32 = 0x02;
    pub const AI: u32 = 0x04;
    pub const VI: u32 = 0x08;
    pub const PI: u32 = 0x10;
    pub const DP: u32 = 0x20;
}

impl EventKind {
    /// The MI line a device event raises when it fires
    pub fn mi_line(self) -> Option<u32> {
        match self {
            EventKind::Vi => Some(mi::VI),
            EventKind::Si => Some(mi::SI),
            EventKind::Pi => Some(mi::PI),
            EventKind::Ai => Some(mi::AI),
            EventKind::Sp => Some(mi::SP),
            EventKind::Dp => Some(mi::DP),
            EventKind::Compare | EventKind::Check => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventKind::Vi => write!(f, "VI interrupt"),
            EventKind::Compare => write!(f, "Count/Compare"),
            EventKind::Check => write!(f, "interrupt check"),
            EventKind::Si => write!(f, "SI interrupt"),
            EventKind::Pi => write!(f, "PI interrupt"),
            EventKind::Ai => write!(f, "AI interrupt"),
            EventKind::Sp => write!(f, "SP interrupt"),
            EventKind::Dp => write!(f, "DP interrupt"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
    pub trigger: u64,
    pub kind: EventKind,
    seq: u64,
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    /// Earliest trigger first, ties broken by insertion order
    fn cmp(&self, other: &Self) -> Ordering {
        other.trigger.cmp(&self.trigger)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Pending events, ordered by absolute trigger cycle.
pub struct EventQueue {
    events: BinaryHeap<Event>,
    seq: u64,
    /// Cached trigger of the root entry, `u64::MAX` when empty. Polled after every unit,
    /// so it is kept up to date by every mutation rather than computed on demand.
    next_trigger: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            events: BinaryHeap::with_capacity(16),
            seq: 0,
            next_trigger: u64::MAX,
        }
    }

    fn update_next_trigger(&mut self) {
        self.next_trigger = self.events
            .peek()
            .map(|event| event.trigger)
            .unwrap_or(u64::MAX);
    }

    /// Schedule `kind` at an absolute cycle.
    pub fn schedule_at(&mut self, kind: EventKind, trigger: u64) {
        self.seq += 1;
        self.events.push(Event { trigger, kind, seq: self.seq });
        self.update_next_trigger();
    }

    /// Schedule `kind` `delay` cycles after `now`.
    pub fn schedule(&mut self, kind: EventKind, now: u64, delay: u64) {
        self.schedule_at(kind, now.saturating_add(delay));
    }

    /// Remove every queued event of this kind. Returns true if any was removed.
    pub fn cancel(&mut self, kind: EventKind) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.kind != kind);
        self.update_next_trigger();
        before != self.events.len()
    }

    #[inline(always)]
    pub fn peek_next_trigger(&self) -> u64 {
        self.next_trigger
    }

    pub fn has_pending(&self) -> bool {
        self.next_trigger != u64::MAX
    }

    /// Pop the earliest event if it is due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Event> {
        if self.next_trigger <= now {
            let event = self.events.pop();
            self.update_next_trigger();
            event
        } else {
            None
        }
    }

    /// Shift every trigger by `new - old`, used when the guest rewrites Count.
    pub fn translate(&mut self, old: u64, new: u64) {
        let delta = new.wrapping_sub(old);
        let events = std::mem::take(&mut self.events);
        self.events = events.into_iter()
            .map(|event| Event { trigger: event.trigger.wrapping_add(delta), ..event })
            .collect();
        self.update_next_trigger();
    }

    pub fn trigger_of(&self, kind: EventKind) -> Option<u64> {
        self.events.iter()
            .filter(|event| event.kind == kind)
            .map(|event| event.trigger)
            .min()
    }

    /// All queued events in firing order.
    pub fn iter(&self) -> impl Iterator<Item = Event> {
        self.events.clone().into_sorted_vec().into_iter().rev()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

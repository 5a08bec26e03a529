//! Event handles, kinds and the reactor-owned event table.
//!
//! Events are stored in a slab-style table and referenced by
//! [`EventRef`], a copyable `{reactor, index, generation}` triple. Removing
//! an event bumps its slot generation, so a ref that outlives its event is
//! rejected instead of aliasing whatever reuses the slot.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::reactor::EventReactor;

/// Opaque, generation-checked reference to an Event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRef {
    reactor: u32,
    index: u32,
    generation: u32,
}

impl EventRef {
    /// Slot index (for logging).
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Display for EventRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ev#{}.{}", self.index, self.generation)
    }
}

/// What an Event waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Read(RawFd),
    Write(RawFd),
    Signal(i32),
    Periodic(Duration),
}

impl EventKind {
    #[inline]
    pub fn fd(&self) -> Option<RawFd> {
        match *self {
            EventKind::Read(fd) | EventKind::Write(fd) => Some(fd),
            _ => None,
        }
    }
}

/// Outcome of a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Keep dispatching.
    Continue,
    /// Return from `run_loop()` once the current dispatch pass finishes.
    ExitLoop,
    /// Abort `run_loop()` immediately with an error.
    Fatal,
}

impl EventAction {
    /// Combine two outcomes, keeping the more severe one.
    #[inline]
    pub fn merge(self, other: EventAction) -> EventAction {
        match (self, other) {
            (EventAction::Fatal, _) | (_, EventAction::Fatal) => EventAction::Fatal,
            (EventAction::ExitLoop, _) | (_, EventAction::ExitLoop) => EventAction::ExitLoop,
            _ => EventAction::Continue,
        }
    }
}

impl From<bool> for EventAction {
    /// `true` continues, `false` is fatal.
    #[inline]
    fn from(ok: bool) -> Self {
        if ok {
            EventAction::Continue
        } else {
            EventAction::Fatal
        }
    }
}

/// Callback invoked on the reactor thread with the reactor itself, so it
/// can add, enable, disable or delete events (its own included).
pub type EventCallback = Box<dyn FnMut(&mut EventReactor) -> EventAction>;

pub(crate) struct EventEntry {
    pub(crate) kind: EventKind,
    pub(crate) enabled: bool,
    /// Next firing time of an enabled periodic event.
    pub(crate) deadline: Option<Instant>,
    /// `None` only while the callback is running.
    pub(crate) callback: Option<EventCallback>,
}

impl EventEntry {
    pub(crate) fn new(kind: EventKind, callback: EventCallback) -> Self {
        let deadline = match kind {
            EventKind::Periodic(period) => Some(Instant::now() + period),
            _ => None,
        };
        Self {
            kind,
            enabled: true,
            deadline,
            callback: Some(callback),
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<EventEntry>,
}

/// Slab of events owned by one reactor.
pub(crate) struct EventTable {
    reactor: u32,
    slots: Vec<Slot>,
    /// LIFO stack of free slot indices.
    free: Vec<u32>,
    enabled: usize,
}

impl EventTable {
    pub(crate) fn new() -> Self {
        static NEXT_REACTOR_ID: AtomicU32 = AtomicU32::new(1);
        Self {
            reactor: NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            enabled: 0,
        }
    }

    pub(crate) fn insert(&mut self, entry: EventEntry) -> EventRef {
        if entry.enabled {
            self.enabled += 1;
        }
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        EventRef {
            reactor: self.reactor,
            index,
            generation: slot.generation,
        }
    }

    #[inline]
    pub(crate) fn get(&self, r: EventRef) -> Option<&EventEntry> {
        if r.reactor != self.reactor {
            return None;
        }
        let slot = self.slots.get(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, r: EventRef) -> Option<&mut EventEntry> {
        if r.reactor != self.reactor {
            return None;
        }
        let slot = self.slots.get_mut(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Flip the enabled flag, keeping the enabled count in step.
    /// Returns false if the ref is stale.
    pub(crate) fn set_enabled(&mut self, r: EventRef, enabled: bool) -> bool {
        let Some(entry) = self.get_mut(r) else {
            return false;
        };
        if entry.enabled == enabled {
            return true;
        }
        entry.enabled = enabled;
        if enabled {
            self.enabled += 1;
        } else {
            self.enabled -= 1;
        }
        true
    }

    pub(crate) fn remove(&mut self, r: EventRef) -> Option<EventEntry> {
        self.get(r)?;
        let slot = &mut self.slots[r.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index);
        if entry.enabled {
            self.enabled -= 1;
        }
        Some(entry)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EventRef, &EventEntry)> + '_ {
        let reactor = self.reactor;
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            slot.entry.as_ref().map(|e| {
                (
                    EventRef {
                        reactor,
                        index: i as u32,
                        generation: slot.generation,
                    },
                    e,
                )
            })
        })
    }

    /// Number of events currently enabled.
    #[inline]
    pub(crate) fn enabled_count(&self) -> usize {
        self.enabled
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EventCallback {
        Box::new(|_| EventAction::Continue)
    }

    #[test]
    fn test_stale_ref_rejected_after_remove() {
        let mut table = EventTable::new();
        let a = table.insert(EventEntry::new(EventKind::Signal(10), noop()));
        assert!(table.remove(a).is_some());
        assert!(table.get(a).is_none());
        assert!(table.remove(a).is_none());

        // The slot is reused under a new generation.
        let b = table.insert(EventEntry::new(EventKind::Signal(12), noop()));
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert_eq!(table.get(b).map(|e| e.kind), Some(EventKind::Signal(12)));
    }

    #[test]
    fn test_refs_from_other_table_rejected() {
        let mut t1 = EventTable::new();
        let mut t2 = EventTable::new();
        let r1 = t1.insert(EventEntry::new(EventKind::Read(0), noop()));
        let _r2 = t2.insert(EventEntry::new(EventKind::Read(0), noop()));
        assert!(t2.get(r1).is_none());
    }

    #[test]
    fn test_enabled_count_tracks_flags() {
        let mut table = EventTable::new();
        let a = table.insert(EventEntry::new(EventKind::Read(3), noop()));
        let b = table.insert(EventEntry::new(EventKind::Write(3), noop()));
        assert_eq!(table.enabled_count(), 2);

        assert!(table.set_enabled(b, false));
        assert!(table.set_enabled(b, false));
        assert_eq!(table.enabled_count(), 1);

        table.remove(a);
        assert_eq!(table.enabled_count(), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn test_action_merge_and_from_bool() {
        use EventAction::*;
        assert_eq!(Continue.merge(ExitLoop), ExitLoop);
        assert_eq!(ExitLoop.merge(Fatal), Fatal);
        assert_eq!(Continue.merge(Continue), Continue);
        assert_eq!(EventAction::from(true), Continue);
        assert_eq!(EventAction::from(false), Fatal);
    }

    #[test]
    fn test_periodic_entry_gets_deadline() {
        let entry = EventEntry::new(EventKind::Periodic(Duration::from_millis(5)), noop());
        assert!(entry.deadline.is_some());
        let entry = EventEntry::new(EventKind::Signal(10), noop());
        assert!(entry.deadline.is_none());
    }
}

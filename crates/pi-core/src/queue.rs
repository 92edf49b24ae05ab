//! Cycle-domain event queue.
//!
//! The bus schedules delayed completions here (currently only the PI bus
//! write latch) and the system drains fired events as emulated time
//! advances. `remove` reports the unexpired cycles so a forced finish can
//! credit them back to the caller.

/// Kinds of scheduled events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Long-latency PI bus write completing (clears the busy latch).
    PiBusWrite,
}

/// A minimal scheduling queue keyed by event kind.
#[derive(Default)]
pub struct Queue {
    now: u64,
    pending: Vec<(Event, u64)>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` to fire `delay` cycles from now.
    pub fn insert(&mut self, event: Event, delay: u64) {
        self.pending.push((event, self.now + delay));
    }

    /// Remove a pending event, returning the cycles it had left to run
    /// (0 if it was not queued).
    pub fn remove(&mut self, event: Event) -> u64 {
        if let Some(i) = self.pending.iter().position(|(e, _)| *e == event) {
            let (_, fire_at) = self.pending.swap_remove(i);
            fire_at.saturating_sub(self.now)
        } else {
            0
        }
    }

    /// Advance time by `cycles` and collect every event that fired,
    /// earliest first.
    pub fn step(&mut self, cycles: u64) -> Vec<Event> {
        self.now += cycles;
        let now = self.now;
        let mut fired: Vec<(Event, u64)> = Vec::new();
        self.pending.retain(|&(event, fire_at)| {
            if fire_at <= now {
                fired.push((event, fire_at));
                false
            } else {
                true
            }
        });
        fired.sort_by_key(|&(_, fire_at)| fire_at);
        fired.into_iter().map(|(event, _)| event).collect()
    }

    /// Current cycle count.
    pub fn now(&self) -> u64 {
        self.now
    }
}

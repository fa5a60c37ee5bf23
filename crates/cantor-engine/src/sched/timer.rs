use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::voice::VoiceHandle;

/// Per-voice timer slot. Each slot holds at most one pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Start,
    Sustain,
    Release,
    Free,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Start, Slot::Sustain, Slot::Release, Slot::Free];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Voice(VoiceHandle, Slot),
    /// One-off deferred work, keyed by a sequence number.
    Deferred(u64),
}

#[derive(Debug)]
struct Entry {
    at: Duration,
    seq: u64,
    key: TimerKey,
    generation: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Min-heap on (at, seq): earliest first, then insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct Pending<A> {
    generation: u64,
    at: Duration,
    action: A,
}

/// Timer arena with cancel-and-replace per key.
///
/// Replacing or cancelling a key bumps its generation; heap entries from
/// older generations are discarded when they surface, so a superseded timer
/// never fires.
#[derive(Debug)]
pub struct TimerQueue<A> {
    heap: BinaryHeap<Entry>,
    pending: HashMap<TimerKey, Pending<A>>,
    next_seq: u64,
    next_generation: u64,
    next_deferred: u64,
}

impl<A> Default for TimerQueue<A> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_seq: 0,
            next_generation: 0,
            next_deferred: 0,
        }
    }
}

impl<A> TimerQueue<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `action` under `key`, replacing any pending timer for it.
    /// Returns the replaced action.
    pub fn schedule(&mut self, key: TimerKey, at: Duration, action: A) -> Option<A> {
        let generation = self.next_generation;
        self.next_generation += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            at,
            seq,
            key,
            generation,
        });
        self.pending
            .insert(
                key,
                Pending {
                    generation,
                    at,
                    action,
                },
            )
            .map(|previous| previous.action)
    }

    /// Allocates a fresh key for deferred work.
    pub fn deferred_key(&mut self) -> TimerKey {
        let key = TimerKey::Deferred(self.next_deferred);
        self.next_deferred += 1;
        key
    }

    pub fn cancel(&mut self, key: TimerKey) -> Option<A> {
        self.pending.remove(&key).map(|pending| pending.action)
    }

    /// Cancels every slot of `handle`.
    pub fn cancel_voice(&mut self, handle: VoiceHandle) -> usize {
        Slot::ALL
            .iter()
            .filter(|slot| self.cancel(TimerKey::Voice(handle, **slot)).is_some())
            .count()
    }

    pub fn deadline(&self, key: TimerKey) -> Option<Duration> {
        self.pending.get(&key).map(|pending| pending.at)
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            let live = self
                .pending
                .get(&top.key)
                .is_some_and(|pending| pending.generation == top.generation);
            if live {
                break;
            }
            self.heap.pop();
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_stale();
        self.heap.peek().map(|entry| entry.at)
    }

    /// Pops the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerKey, A)> {
        self.discard_stale();
        if self.heap.peek()?.at > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.pending
            .remove(&entry.key)
            .map(|pending| (entry.key, pending.action))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn voice(node: i32, slot: Slot) -> TimerKey {
        TimerKey::Voice(VoiceHandle(node), slot)
    }

    #[test]
    fn pops_in_deadline_then_insertion_order() {
        let mut queue = TimerQueue::new();
        queue.schedule(voice(1, Slot::Release), ms(20), "late");
        queue.schedule(voice(2, Slot::Start), ms(10), "first");
        queue.schedule(voice(3, Slot::Start), ms(10), "second");
        assert_eq!(queue.pop_due(ms(5)), None);
        let fired: Vec<_> = std::iter::from_fn(|| queue.pop_due(ms(30)))
            .map(|(_, action)| action)
            .collect();
        assert_eq!(fired, vec!["first", "second", "late"]);
    }

    #[test]
    fn replacing_a_key_never_double_fires() {
        let mut queue = TimerQueue::new();
        let key = voice(1, Slot::Free);
        queue.schedule(key, ms(100), "natural");
        assert_eq!(queue.schedule(key, ms(10), "early"), Some("natural"));
        assert_eq!(queue.next_deadline(), Some(ms(10)));
        assert_eq!(queue.pop_due(ms(200)), Some((key, "early")));
        assert_eq!(queue.pop_due(ms(200)), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_voice_clears_every_slot() {
        let mut queue = TimerQueue::new();
        for slot in Slot::ALL {
            queue.schedule(voice(7, slot), ms(1), slot);
        }
        queue.schedule(voice(8, Slot::Start), ms(1), Slot::Start);
        assert_eq!(queue.cancel_voice(VoiceHandle(7)), 4);
        assert_eq!(queue.pop_due(ms(1)), Some((voice(8, Slot::Start), Slot::Start)));
        assert_eq!(queue.pop_due(ms(1)), None);
    }

    #[test]
    fn deferred_keys_are_unique() {
        let mut queue: TimerQueue<()> = TimerQueue::new();
        assert_ne!(queue.deferred_key(), queue.deferred_key());
    }
}

use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Handle to a scheduled timer, used to cancel it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// A queue of events keyed by the simulation time they fire at.
///
/// Events due at the same time fire in the order they were scheduled.
#[derive(Clone, Debug)]
pub struct Scheduler<E> {
    queue: BinaryHeap<Reverse<Entry<E>>>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

#[derive(Clone, Debug)]
struct Entry<E> {
    at: OrderedFloat<f64>,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl<E> Scheduler<E> {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an event at an absolute time.
    pub fn schedule(&mut self, at: f64, event: E) -> TimerToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Entry {
            at: OrderedFloat(at),
            seq,
            event,
        }));
        TimerToken(seq)
    }

    /// Schedules an event `delay` seconds after `now`.
    pub fn schedule_in(&mut self, now: f64, delay: f64, event: E) -> TimerToken {
        self.schedule(now + delay, event)
    }

    /// Cancels a timer. Cancelling a timer that already fired has no effect.
    pub fn cancel(&mut self, token: TimerToken) {
        if self.queue.iter().any(|Reverse(e)| e.seq == token.0) {
            self.cancelled.insert(token.0);
        }
    }

    /// Pops the earliest event due at or before `now`, along with the time
    /// it was scheduled for.
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, E)> {
        while let Some(Reverse(entry)) = self.queue.peek() {
            if entry.at.0 > now {
                return None;
            }
            let Reverse(entry) = self.queue.pop()?;
            if self.cancelled.remove(&entry.seq) {
                continue;
            }
            return Some((entry.at.0, entry.event));
        }
        None
    }

    /// The time of the earliest live event.
    pub fn next_due(&self) -> Option<f64> {
        self.queue
            .iter()
            .filter(|Reverse(e)| !self.cancelled.contains(&e.seq))
            .map(|Reverse(e)| e.at)
            .min()
            .map(|at| at.0)
    }

    /// Cancels every pending event.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.cancelled.clear();
    }

    /// The number of live events.
    pub fn len(&self) -> usize {
        self.queue.len() - self.cancelled.len()
    }

    /// Whether there are no live events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pops_in_time_order() {
        let mut s = Scheduler::new();
        s.schedule(3.0, "c");
        s.schedule(1.0, "a");
        s.schedule(2.0, "b");
        assert_eq!(s.pop_due(0.5), None);
        assert_eq!(s.pop_due(10.0), Some((1.0, "a")));
        assert_eq!(s.pop_due(10.0), Some((2.0, "b")));
        assert_eq!(s.pop_due(2.5), None);
        assert_eq!(s.pop_due(3.0), Some((3.0, "c")));
        assert!(s.is_empty());
    }

    #[test]
    fn equal_times_are_fifo() {
        let mut s = Scheduler::new();
        for i in 0..5 {
            s.schedule_in(1.0, 1.0, i);
        }
        let order: Vec<_> = std::iter::from_fn(|| s.pop_due(2.0).map(|(_, e)| e)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_timers_do_not_fire() {
        let mut s = Scheduler::new();
        let a = s.schedule(1.0, 'a');
        s.schedule(1.0, 'b');
        s.cancel(a);
        assert_eq!(s.len(), 1);
        assert_eq!(s.next_due(), Some(1.0));
        assert_eq!(s.pop_due(1.0), Some((1.0, 'b')));
        assert_eq!(s.pop_due(1.0), None);
        s.cancel(a);
        assert!(s.is_empty());
    }
}

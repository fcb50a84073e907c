use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::herd::animal::AnimalId;

/// Kinds of events carried by the simulation queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SuccessInsem,
    Dryoff,
    Calving,
    Cull,
    PurchaseIn,
    HeiferIntro,
}

/// Per-event data for events that create animals instead of targeting one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// A purchase lot. `expected_calving` is carried for manual plan entries
    /// where the buyer knows the pregnancy; policy-driven buys leave it empty
    /// and the simulator samples days-to-calving instead.
    Purchase {
        count: u32,
        expected_calving: Option<NaiveDate>,
    },
    /// Replacement-driven introduction of pregnant heifers, one planned
    /// calving date per head.
    HeiferIntro { expected_calvings: Vec<NaiveDate> },
}

/// A queued simulation event.
///
/// Ordering is (date, seq): the monotonic sequence number breaks same-day
/// ties so a run is deterministic given its initial population and RNG
/// stream.
#[derive(Debug, Clone)]
pub struct SimEvent {
    pub date: NaiveDate,
    pub seq: u64,
    pub kind: EventKind,
    pub animal: Option<AnimalId>,
    pub payload: Option<EventPayload>,
}

impl PartialEq for SimEvent {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.seq == other.seq
    }
}

impl Eq for SimEvent {}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.date, self.seq).cmp(&(other.date, other.seq))
    }
}

/// Min-priority queue of future events keyed by (date, insertion sequence).
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<SimEvent>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        date: NaiveDate,
        kind: EventKind,
        animal: Option<AnimalId>,
        payload: Option<EventPayload>,
    ) {
        self.next_seq += 1;
        self.heap.push(Reverse(SimEvent {
            date,
            seq: self.next_seq,
            kind,
            animal,
            payload,
        }));
    }

    /// Pops every event due on or before `until`, in (date, seq) order.
    pub fn pop_due(&mut self, until: NaiveDate) -> Vec<SimEvent> {
        let mut out = Vec::new();
        while let Some(Reverse(ev)) = self.heap.peek() {
            if ev.date > until {
                break;
            }
            out.push(self.heap.pop().expect("peeked item must exist").0);
        }
        out
    }

    pub fn peek_date(&self) -> Option<NaiveDate> {
        self.heap.peek().map(|Reverse(ev)| ev.date)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn pops_in_date_then_insertion_order() {
        let mut q = EventQueue::new();
        q.push(d(2026, 3, 1), EventKind::Calving, Some(AnimalId(2)), None);
        q.push(d(2026, 2, 1), EventKind::Dryoff, Some(AnimalId(1)), None);
        q.push(d(2026, 2, 1), EventKind::Cull, Some(AnimalId(3)), None);

        let due = q.pop_due(d(2026, 3, 1));
        let kinds: Vec<_> = due.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Dryoff, EventKind::Cull, EventKind::Calving]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn due_cutoff_is_inclusive() {
        let mut q = EventQueue::new();
        q.push(d(2026, 2, 1), EventKind::PurchaseIn, None, None);
        q.push(d(2026, 2, 2), EventKind::PurchaseIn, None, None);

        let due = q.pop_due(d(2026, 2, 1));
        assert_eq!(due.len(), 1);
        assert_eq!(q.peek_date(), Some(d(2026, 2, 2)));
    }
}

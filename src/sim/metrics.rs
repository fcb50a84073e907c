use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Event counts accumulated between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventTally {
    pub calvings: u32,
    pub dryoffs: u32,
    pub culls: u32,
    pub purchases_in: u32,
    pub heifer_intros: u32,
}

impl EventTally {
    pub fn absorb(&mut self, other: &EventTally) {
        self.calvings += other.calvings;
        self.dryoffs += other.dryoffs;
        self.culls += other.culls;
        self.purchases_in += other.purchases_in;
        self.heifer_intros += other.heifer_intros;
    }
}

/// Herd composition on one simulated day.
///
/// `avg_days_in_milk` is `0.0` when nothing is milking; the field is never
/// absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub milking: u32,
    pub dry: u32,
    pub heifers: u32,
    pub pregnant_heifers: u32,
    pub avg_days_in_milk: f64,
}

/// One recorded simulation sample: the composition snapshot plus the events
/// accumulated since the previous record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub snapshot: DailySnapshot,
    pub events: EventTally,
}

/// Whether the simulator records a sample every day or on month starts only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordCadence {
    Daily,
    #[default]
    MonthStart,
}

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Stable identity of an animal within one simulation run.
///
/// Events and policies reference animals by id only; the herd itself is an
/// arena of records, never a graph of owning references.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AnimalId(pub u64);

impl fmt::Display for AnimalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an animal.
///
/// `Fresh`, `ReadyForBreeding` and `Pregnant` are the milking sub-phases; for
/// reporting they collapse into one `Milking` bucket (see
/// [`AnimalStatus::bucket`]). `Archived` is terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnimalStatus {
    Heifer,
    PregnantHeifer,
    Fresh,
    ReadyForBreeding,
    Pregnant,
    Dry,
    Archived,
}

/// Reporting bucket an animal contributes to on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HerdBucket {
    Heifer,
    PregnantHeifer,
    Milking,
    Dry,
}

impl AnimalStatus {
    pub fn is_milking(self) -> bool {
        matches!(self, Self::Fresh | Self::ReadyForBreeding | Self::Pregnant)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Archived
    }

    /// `None` for archived animals, which contribute to no head-count.
    pub fn bucket(self) -> Option<HerdBucket> {
        match self {
            Self::Heifer => Some(HerdBucket::Heifer),
            Self::PregnantHeifer => Some(HerdBucket::PregnantHeifer),
            Self::Fresh | Self::ReadyForBreeding | Self::Pregnant => Some(HerdBucket::Milking),
            Self::Dry => Some(HerdBucket::Dry),
            Self::Archived => None,
        }
    }
}

/// One animal of the herd arena.
///
/// The `planned_*` fields are scheduling cursors: they record transitions the
/// simulator has already committed to, so a tick never schedules the same
/// future event twice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub birth_date: NaiveDate,
    pub status: AnimalStatus,
    /// Number of calvings so far; 0 marks a heifer.
    pub lactation_no: u32,

    pub last_calving_date: Option<NaiveDate>,
    /// Successful insemination that opened the current pregnancy.
    pub conception_date: Option<NaiveDate>,
    pub dryoff_date: Option<NaiveDate>,
    pub archive_date: Option<NaiveDate>,

    pub planned_calving_date: Option<NaiveDate>,
    pub planned_dry_date: Option<NaiveDate>,
    /// First successful insemination planned for a heifer.
    pub planned_first_insem_date: Option<NaiveDate>,
    /// Successful insemination planned for a cow in lactation.
    pub planned_conception_date: Option<NaiveDate>,

    pub days_in_status: u32,
    pub days_in_milk: u32,
}

impl Animal {
    /// A freshly observed heifer with no history.
    pub fn heifer(id: AnimalId, birth_date: NaiveDate) -> Self {
        Self {
            id,
            birth_date,
            status: AnimalStatus::Heifer,
            lactation_no: 0,
            last_calving_date: None,
            conception_date: None,
            dryoff_date: None,
            archive_date: None,
            planned_calving_date: None,
            planned_dry_date: None,
            planned_first_insem_date: None,
            planned_conception_date: None,
            days_in_status: 0,
            days_in_milk: 0,
        }
    }

    pub fn age_in_days(&self, on: NaiveDate) -> i64 {
        (on - self.birth_date).num_days()
    }

    pub fn is_alive(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_milking(&self) -> bool {
        self.status.is_milking()
    }

    /// Applies a calving: the cow enters a fresh lactation and every
    /// pregnancy-scoped field is cleared.
    pub fn reset_for_new_lactation(&mut self, calving_date: NaiveDate) {
        self.status = AnimalStatus::Fresh;
        self.lactation_no += 1;
        self.last_calving_date = Some(calving_date);
        self.days_in_milk = 0;
        self.days_in_status = 0;
        self.conception_date = None;
        self.dryoff_date = None;
        self.planned_dry_date = None;
        self.planned_calving_date = None;
        self.planned_conception_date = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn milking_sub_phases_share_one_bucket() {
        for status in [
            AnimalStatus::Fresh,
            AnimalStatus::ReadyForBreeding,
            AnimalStatus::Pregnant,
        ] {
            assert!(status.is_milking());
            assert_eq!(status.bucket(), Some(HerdBucket::Milking));
        }
        assert_eq!(AnimalStatus::Archived.bucket(), None);
    }

    #[test]
    fn new_lactation_clears_pregnancy_state() {
        let mut cow = Animal::heifer(AnimalId(7), d(2023, 5, 1));
        cow.status = AnimalStatus::Dry;
        cow.lactation_no = 2;
        cow.conception_date = Some(d(2025, 6, 1));
        cow.planned_calving_date = Some(d(2026, 3, 8));
        cow.planned_dry_date = Some(d(2026, 1, 7));
        cow.days_in_milk = 310;

        cow.reset_for_new_lactation(d(2026, 3, 8));

        assert_eq!(cow.status, AnimalStatus::Fresh);
        assert_eq!(cow.lactation_no, 3);
        assert_eq!(cow.last_calving_date, Some(d(2026, 3, 8)));
        assert_eq!(cow.days_in_milk, 0);
        assert!(cow.conception_date.is_none());
        assert!(cow.planned_calving_date.is_none());
        assert!(cow.planned_dry_date.is_none());
    }
}

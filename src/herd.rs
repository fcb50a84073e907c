use chrono::{Datelike, NaiveDate};

pub mod animal;
pub mod dataset;
pub mod event;
pub mod policies;
pub mod samplers;

/// Days from successful insemination to calving used when deriving planned
/// calvings from dataset facts (the sampled gestation applies to simulated
/// conceptions only).
pub const GESTATION_RULE_DAYS: u64 = 280;

/// Days from successful insemination to dry-off used when a dry cow carries
/// no explicit dry-off date, and vice versa when inferring the insemination
/// from a dry-off.
pub const DRYOFF_RULE_DAYS: u64 = 220;

/// First day of the month containing `d`.
pub fn month_start(d: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(d.year(), d.month(), 1).expect("day 1 always exists")
}

/// First day of the month after the one containing `d`.
pub fn next_month_start(d: NaiveDate) -> NaiveDate {
    let (y, m) = if d.month() == 12 {
        (d.year() + 1, 1)
    } else {
        (d.year(), d.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1).expect("day 1 always exists")
}

/// The `months` month-start dates strictly after `from`.
///
/// `from` itself is never included, even when it is a month start; the first
/// returned date is the start of the following month.
pub fn month_starts_after(from: NaiveDate, months: u32) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(months as usize);
    let mut cur = next_month_start(from);
    for _ in 0..months {
        out.push(cur);
        cur = next_month_start(cur);
    }
    out
}

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::herd::animal::{Animal, AnimalStatus};
use crate::herd::dataset::HerdDataset;
use crate::herd::{month_start, next_month_start};

/// Strata with fewer animals than this in the estimation window receive the
/// configured fallback hazard instead of their own estimate.
pub const HAZARD_MIN_GROUP_SIZE: usize = 30;

/// Upper clamp for any estimated monthly hazard.
pub const HAZARD_CEILING: f64 = 0.2;

/// Look-back window for hazard estimation, in days.
pub const HAZARD_WINDOW_DAYS: u64 = 730;

/// Grouping key for hazard estimation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CullGrouping {
    #[default]
    Lactation,
    LactationStatus,
    AgeBand,
}

// ================================================================================================
// Culling hazard
// ================================================================================================

/// Stratified monthly culling hazards plus a calendar-month seasonality
/// profile, both estimated from the dataset's 730-day archive history.
#[derive(Debug, Clone, PartialEq)]
pub struct CullingHazard {
    grouping: CullGrouping,
    age_band_years: u32,
    hazards: BTreeMap<String, f64>,
    seasonal: [f64; 12],
    fallback: f64,
}

impl CullingHazard {
    /// A hazard table with no dataset evidence: every stratum and month
    /// resolves to `fallback`.
    pub fn flat(fallback: f64) -> Self {
        Self {
            grouping: CullGrouping::Lactation,
            age_band_years: 2,
            hazards: BTreeMap::new(),
            seasonal: [fallback; 12],
            fallback,
        }
    }

    /// Estimates per-stratum monthly hazards from archive dates within
    /// `[report_date - 730d, report_date]`.
    ///
    /// Events are archived animals in the window; exposure is approximated
    /// as `(alive + 0.5 * culled) * 24` animal-months. Strata under
    /// [`HAZARD_MIN_GROUP_SIZE`] animals get `fallback`; estimates clamp to
    /// `[0, 0.2]`.
    pub fn estimate(
        dataset: &HerdDataset,
        report_date: NaiveDate,
        grouping: CullGrouping,
        fallback: f64,
        age_band_years: u32,
    ) -> Self {
        let window_start = report_date - Days::new(HAZARD_WINDOW_DAYS);
        let age_band_years = age_band_years.max(1);

        let mut culled: BTreeMap<String, usize> = BTreeMap::new();
        let mut alive: BTreeMap<String, usize> = BTreeMap::new();
        let mut culled_by_month = [0usize; 12];
        let mut total_culled = 0usize;
        let mut total_alive = 0usize;

        for row in dataset.rows() {
            let key = stratum_key(
                grouping,
                age_band_years,
                row.lactation,
                status_group_label(&row.status),
                row.birth_date,
                report_date,
            );
            match row.archive_date {
                Some(archive) if archive <= report_date => {
                    if archive >= window_start {
                        *culled.entry(key).or_insert(0) += 1;
                        culled_by_month[archive.month0() as usize] += 1;
                        total_culled += 1;
                    }
                }
                _ => {
                    *alive.entry(key).or_insert(0) += 1;
                    total_alive += 1;
                }
            }
        }

        let mut hazards = BTreeMap::new();
        let keys: std::collections::BTreeSet<&String> = culled.keys().chain(alive.keys()).collect();
        for key in keys {
            let c = culled.get(key).copied().unwrap_or(0);
            let a = alive.get(key).copied().unwrap_or(0);
            let hazard = if a + c < HAZARD_MIN_GROUP_SIZE {
                fallback
            } else {
                let exposure_months = ((a as f64 + 0.5 * c as f64) * 24.0).max(1.0);
                (c as f64 / exposure_months).clamp(0.0, HAZARD_CEILING)
            };
            hazards.insert(key.clone(), hazard);
        }

        // Seasonality: each calendar month is observed twice in the window.
        let seasonal = if total_alive + total_culled < HAZARD_MIN_GROUP_SIZE {
            [fallback; 12]
        } else {
            let exposure = ((total_alive as f64 + 0.5 * total_culled as f64) * 2.0).max(1.0);
            std::array::from_fn(|m| {
                (culled_by_month[m] as f64 / exposure).clamp(0.0, HAZARD_CEILING)
            })
        };

        Self {
            grouping,
            age_band_years,
            hazards,
            seasonal,
            fallback,
        }
    }

    pub fn monthly_hazard(&self, stratum: &str) -> f64 {
        self.hazards.get(stratum).copied().unwrap_or(self.fallback)
    }

    pub fn stratum_for(&self, animal: &Animal, on: NaiveDate) -> String {
        stratum_key(
            self.grouping,
            self.age_band_years,
            animal.lactation_no,
            status_group(animal.status),
            animal.birth_date,
            on,
        )
    }

    /// Samples a cull date by iterating month-by-month Bernoulli trials from
    /// the month of `start`; on success a uniform day in 1..=28 is chosen and
    /// snapped to `>= start`. `None` when no trial succeeds before `end`.
    pub fn sample_cull_date<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        animal: &Animal,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<NaiveDate> {
        let hazard = self.monthly_hazard(&self.stratum_for(animal, start));
        if hazard <= 0.0 {
            return None;
        }
        let mut cur = month_start(start);
        while cur < end {
            if rng.random::<f64>() < hazard {
                let day = rng.random_range(1..29u32);
                let date = NaiveDate::from_ymd_opt(cur.year(), cur.month(), day)
                    .expect("days 1..=28 exist in every month");
                return Some(date.max(start));
            }
            cur = next_month_start(cur);
        }
        None
    }

    /// Per-day removal probability for the daily tick:
    /// `1 - (1 - p_lact)(1 - p_month)` scaled by the population-regulation
    /// factor, with both monthly hazards converted via
    /// `p_daily = 1 - (1 - p)^(1/30)`.
    pub fn daily_probability(
        &self,
        animal: &Animal,
        today: NaiveDate,
        population_regulation: f64,
    ) -> f64 {
        let p_lact = monthly_to_daily(self.monthly_hazard(&self.stratum_for(animal, today)));
        let p_month = monthly_to_daily(self.seasonal[today.month0() as usize]);
        let combined = 1.0 - (1.0 - p_lact) * (1.0 - p_month);
        (combined * population_regulation).clamp(0.0, 1.0)
    }
}

fn monthly_to_daily(p: f64) -> f64 {
    1.0 - (1.0 - p.clamp(0.0, 1.0)).powf(1.0 / 30.0)
}

fn lact_group(lactation: u32) -> &'static str {
    match lactation {
        0 => "L0",
        1 => "L1",
        2 => "L2",
        3 => "L3",
        _ => "L4+",
    }
}

fn status_group(status: AnimalStatus) -> &'static str {
    match status {
        AnimalStatus::Heifer => "heifer",
        AnimalStatus::PregnantHeifer | AnimalStatus::Pregnant => "pregnant",
        AnimalStatus::Dry => "dry",
        AnimalStatus::Fresh => "fresh",
        AnimalStatus::ReadyForBreeding => "inseminated",
        AnimalStatus::Archived => "other",
    }
}

/// Collapses a raw dataset status label onto the same groups the simulator
/// statuses map to, so estimated strata stay addressable at runtime.
fn status_group_label(label: &str) -> &'static str {
    let s = label.trim().to_ascii_lowercase();
    if s.contains("pregnant") {
        "pregnant"
    } else if s.contains("heifer") {
        "heifer"
    } else if s.contains("dry") {
        "dry"
    } else if s.contains("insem") {
        "inseminated"
    } else if s.contains("fresh") || s.contains("milk") {
        "fresh"
    } else {
        "other"
    }
}

fn stratum_key(
    grouping: CullGrouping,
    age_band_years: u32,
    lactation: u32,
    status_group: &str,
    birth_date: NaiveDate,
    on: NaiveDate,
) -> String {
    match grouping {
        CullGrouping::Lactation => lact_group(lactation).to_string(),
        CullGrouping::LactationStatus => format!("{}|{status_group}", lact_group(lactation)),
        CullGrouping::AgeBand => {
            let age_years = ((on - birth_date).num_days().max(0) as f64) / 365.25;
            let band = (age_years as u32) / age_band_years;
            format!(
                "age_{}-{}",
                band * age_band_years,
                (band + 1) * age_band_years
            )
        }
    }
}

// ================================================================================================
// Replacement policy
// ================================================================================================

/// Keeps first-calving supply at `annual_heifer_ratio` of the milking herd
/// over the lookahead window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplacementPolicy {
    pub enabled: bool,
    pub annual_heifer_ratio: f64,
    pub lookahead_months: u32,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            annual_heifer_ratio: 0.30,
            lookahead_months: 12,
        }
    }
}

impl ReplacementPolicy {
    pub fn target_first_calvings(&self, milking_count: u32) -> u32 {
        (self.annual_heifer_ratio * milking_count as f64).round() as u32
    }
}

// ================================================================================================
// Purchase policies
// ================================================================================================

/// Wire tag of a purchase policy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchasePolicyKind {
    #[default]
    Manual,
    AutoCounter,
    AutoForecast,
}

pub const AUTO_FORECAST_MAX_BUY: u32 = 10_000;

/// Purchase decision rule with per-variant state.
///
/// `Manual` holds no state (the plan lives in the event queue);
/// `AutoCounter` runs a signed herd balance; `AutoForecast` projects the
/// milking count `lead_time_days` ahead against a fixed target.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchasePolicy {
    Manual,
    AutoCounter {
        balance: i64,
    },
    AutoForecast {
        target_milking: u32,
        lead_time_days: u32,
        buffer: u32,
        max_buy: u32,
    },
}

impl PurchasePolicy {
    pub fn for_kind(kind: PurchasePolicyKind, initial_milking: u32, lead_time_days: u32) -> Self {
        match kind {
            PurchasePolicyKind::Manual => Self::Manual,
            PurchasePolicyKind::AutoCounter => Self::AutoCounter { balance: 0 },
            PurchasePolicyKind::AutoForecast => Self::AutoForecast {
                target_milking: initial_milking,
                lead_time_days,
                buffer: 0,
                max_buy: AUTO_FORECAST_MAX_BUY,
            },
        }
    }

    pub fn kind(&self) -> PurchasePolicyKind {
        match self {
            Self::Manual => PurchasePolicyKind::Manual,
            Self::AutoCounter { .. } => PurchasePolicyKind::AutoCounter,
            Self::AutoForecast { .. } => PurchasePolicyKind::AutoForecast,
        }
    }

    pub fn on_added(&mut self, count: u32) {
        if let Self::AutoCounter { balance } = self {
            *balance += count as i64;
        }
    }

    pub fn on_removed(&mut self, count: u32) {
        if let Self::AutoCounter { balance } = self {
            *balance -= count as i64;
        }
    }

    /// Policy-driven buys for `today`. Auto policies act on month starts
    /// only; `project_milking` is invoked lazily and only by the forecast
    /// variant.
    pub fn planned_buy<F>(&self, today: NaiveDate, project_milking: F) -> u32
    where
        F: FnOnce(NaiveDate) -> u32,
    {
        match self {
            Self::Manual => 0,
            Self::AutoCounter { balance } => {
                if today.day() == 1 && *balance < 0 {
                    (-*balance) as u32
                } else {
                    0
                }
            }
            Self::AutoForecast {
                target_milking,
                lead_time_days,
                buffer,
                max_buy,
            } => {
                if today.day() != 1 {
                    return 0;
                }
                let future = today + Days::new(*lead_time_days as u64);
                let projected = project_milking(future);
                (target_milking + buffer)
                    .saturating_sub(projected)
                    .min(*max_buy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::herd::animal::AnimalId;
    use crate::herd::dataset::{DatasetRow, HerdDataset};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(id: u64, lactation: u32, archive: Option<NaiveDate>) -> DatasetRow {
        DatasetRow {
            animal_id: id,
            birth_date: d(2020, 1, 1),
            status: "milking".into(),
            lactation,
            archive_date: archive,
            last_calving_date: None,
            insem_date: None,
            success_insem_date: None,
            dryoff_date: None,
            expected_dryoff_date: None,
            expected_calving_date: None,
            days_in_milk: None,
        }
    }

    #[test]
    fn small_strata_receive_the_fallback_hazard() {
        // 10 L1 animals, 2 of them culled in-window: well under the floor.
        let mut rows: Vec<DatasetRow> = (0..8).map(|i| row(i, 1, None)).collect();
        rows.push(row(8, 1, Some(d(2025, 6, 1))));
        rows.push(row(9, 1, Some(d(2025, 7, 1))));
        let hazard = CullingHazard::estimate(
            &HerdDataset::from_rows(rows),
            d(2026, 2, 20),
            CullGrouping::Lactation,
            0.008,
            2,
        );
        assert_eq!(hazard.monthly_hazard("L1"), 0.008);
    }

    #[test]
    fn large_strata_estimate_from_events_and_exposure() {
        let mut rows: Vec<DatasetRow> = (0..95).map(|i| row(i, 2, None)).collect();
        for i in 0..5 {
            rows.push(row(100 + i, 2, Some(d(2025, 9, 15))));
        }
        let hazard = CullingHazard::estimate(
            &HerdDataset::from_rows(rows),
            d(2026, 2, 20),
            CullGrouping::Lactation,
            0.008,
            2,
        );
        // 5 events over (95 + 2.5) * 24 animal-months.
        let expected = 5.0 / ((95.0 + 2.5) * 24.0);
        assert!((hazard.monthly_hazard("L2") - expected).abs() < 1e-12);
    }

    #[test]
    fn zero_hazard_never_samples_a_cull_date() {
        let hazard = CullingHazard::flat(0.0);
        let animal = Animal::heifer(AnimalId(1), d(2024, 1, 1));
        let mut rng = StdRng::seed_from_u64(3);
        let date = hazard.sample_cull_date(&mut rng, &animal, d(2026, 2, 20), d(2027, 2, 20));
        assert_eq!(date, None);
    }

    #[test]
    fn sampled_cull_dates_stay_inside_the_window() {
        let hazard = CullingHazard::flat(0.5);
        let animal = Animal::heifer(AnimalId(1), d(2024, 1, 1));
        let start = d(2026, 2, 20);
        let end = d(2026, 8, 1);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            if let Some(date) = hazard.sample_cull_date(&mut rng, &animal, start, end) {
                assert!(date >= start && date < end);
            }
        }
    }

    #[test]
    fn daily_probability_combines_and_scales() {
        let hazard = CullingHazard::flat(0.03);
        let animal = Animal::heifer(AnimalId(1), d(2024, 1, 1));
        let p1 = hazard.daily_probability(&animal, d(2026, 2, 20), 1.0);
        let p2 = hazard.daily_probability(&animal, d(2026, 2, 20), 2.0);
        assert!(p1 > 0.0 && p1 < 0.01);
        assert!((p2 - 2.0 * p1).abs() < 1e-12);
    }

    #[test]
    fn auto_counter_buys_back_its_deficit_on_month_start() {
        let mut policy = PurchasePolicy::for_kind(PurchasePolicyKind::AutoCounter, 0, 90);
        policy.on_added(3);
        policy.on_removed(8);
        assert_eq!(policy.planned_buy(d(2026, 3, 15), |_| 0), 0);
        assert_eq!(policy.planned_buy(d(2026, 3, 1), |_| 0), 5);
    }

    #[test]
    fn auto_forecast_covers_the_projected_shortfall() {
        let policy = PurchasePolicy::for_kind(PurchasePolicyKind::AutoForecast, 120, 90);
        let bought = policy.planned_buy(d(2026, 3, 1), |future| {
            assert_eq!(future, d(2026, 3, 1) + Days::new(90));
            100
        });
        assert_eq!(bought, 20);
        assert_eq!(policy.planned_buy(d(2026, 3, 1), |_| 500), 0);
    }

    #[test]
    fn replacement_target_rounds_the_ratio() {
        let policy = ReplacementPolicy::default();
        assert_eq!(policy.target_first_calvings(100), 30);
        assert_eq!(policy.target_first_calvings(105), 32);
    }
}

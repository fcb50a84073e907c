use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::herd::policies::PurchasePolicyKind;
use crate::herd::samplers::SamplerMode;

/// Engine tag stamped into every result's meta block.
pub const ENGINE_TAG: &str = "herd-daily";

/// One point of a forecast series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub milking_count: u32,
    pub dry_count: u32,
    pub heifer_count: u32,
    pub pregnant_heifer_count: u32,
    pub avg_days_in_milk: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub points: Vec<ForecastPoint>,
}

/// Per-month event counts (averaged over runs when there are several).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsByMonth {
    pub month: NaiveDate,
    pub calvings: u32,
    pub dryoffs: u32,
    pub culls: u32,
    pub purchases_in: u32,
    pub heifer_intros: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMeta {
    pub engine: String,
    pub mode: SamplerMode,
    pub purchase_policy: PurchasePolicyKind,
    pub confidence_central: f64,
    pub assumptions: Vec<String>,
    pub warnings: Vec<String>,
    pub simulation_version: String,
}

/// The structured result artifact of one forecast job.
///
/// `series_p10` / `series_p90` are the central-confidence band bounds; they
/// are present only when at least two Monte Carlo runs completed. The field
/// names keep the historical p10/p90 spelling whatever the configured
/// confidence fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutput {
    pub series_p50: ForecastSeries,
    pub series_p10: Option<ForecastSeries>,
    pub series_p90: Option<ForecastSeries>,
    pub events: Vec<EventsByMonth>,
    pub future_point: Option<ForecastPoint>,
    pub meta: ForecastMeta,
}

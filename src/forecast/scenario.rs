use chrono::{Datelike, Days, NaiveDate};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DataError;
use crate::herd::GESTATION_RULE_DAYS;
use crate::herd::policies::{CullGrouping, PurchasePolicyKind, ReplacementPolicy};
use crate::herd::samplers::SamplerMode;

pub const MAX_HORIZON_MONTHS: u32 = 120;
pub const MAX_MC_RUNS: u32 = 50_000;
pub const MAX_PURCHASE_COUNT: u32 = 5_000;

/// How a purchased lot's pregnancy is specified: exactly one of an expected
/// calving date or a days-pregnant count, enforced at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PregnancySpec {
    ExpectedCalving(NaiveDate),
    DaysPregnant(u32),
}

/// One manual purchase plan entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPurchaseItem", into = "RawPurchaseItem")]
pub struct PurchaseItem {
    pub date_in: NaiveDate,
    pub count: u32,
    pub pregnancy: PregnancySpec,
}

impl PurchaseItem {
    /// The calving date implied by the pregnancy spec. Days-pregnant lots
    /// calve `280 - days_pregnant` days after arrival.
    pub fn expected_calving(&self) -> NaiveDate {
        match self.pregnancy {
            PregnancySpec::ExpectedCalving(date) => date,
            PregnancySpec::DaysPregnant(days) => {
                let conception = self.date_in - Days::new(days as u64);
                conception + Days::new(GESTATION_RULE_DAYS)
            }
        }
    }
}

/// Boundary shape of a purchase item. Empty strings coming from form-like
/// clients normalize to absent before the exactly-one-of check.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPurchaseItem {
    date_in: NaiveDate,
    count: u32,
    #[serde(default, deserialize_with = "empty_as_none_date")]
    expected_calving_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "empty_as_none_u32")]
    days_pregnant: Option<u32>,
}

impl TryFrom<RawPurchaseItem> for PurchaseItem {
    type Error = DataError;

    fn try_from(raw: RawPurchaseItem) -> Result<Self, Self::Error> {
        if raw.count < 1 || raw.count > MAX_PURCHASE_COUNT {
            return Err(DataError::Validation(format!(
                "purchase count must be in 1..={MAX_PURCHASE_COUNT}, got {}",
                raw.count
            )));
        }
        let pregnancy = match (raw.expected_calving_date, raw.days_pregnant) {
            (Some(_), Some(_)) => {
                return Err(DataError::Validation(
                    "provide either expected_calving_date or days_pregnant, not both".into(),
                ));
            }
            (None, None) => {
                return Err(DataError::Validation(
                    "provide expected_calving_date or days_pregnant".into(),
                ));
            }
            (Some(date), None) => PregnancySpec::ExpectedCalving(date),
            (None, Some(days)) => {
                if days > 280 {
                    return Err(DataError::Validation(format!(
                        "days_pregnant must be in 0..=280, got {days}"
                    )));
                }
                PregnancySpec::DaysPregnant(days)
            }
        };
        Ok(Self {
            date_in: raw.date_in,
            count: raw.count,
            pregnancy,
        })
    }
}

impl From<PurchaseItem> for RawPurchaseItem {
    fn from(item: PurchaseItem) -> Self {
        let (expected_calving_date, days_pregnant) = match item.pregnancy {
            PregnancySpec::ExpectedCalving(date) => (Some(date), None),
            PregnancySpec::DaysPregnant(days) => (None, Some(days)),
        };
        Self {
            date_in: item.date_in,
            count: item.count,
            expected_calving_date,
            days_pregnant,
        }
    }
}

fn empty_as_none_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Date(NaiveDate),
        Text(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Date(date)) => Ok(Some(date)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => Err(D::Error::custom(format!("invalid date '{s}'"))),
    }
}

fn empty_as_none_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Text(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid integer '{s}'"))),
    }
}

// ================================================================================================
// Model and policy parameter blocks
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub gestation_mu: f64,
    pub gestation_sigma: f64,
    pub gestation_lo: u32,
    pub gestation_hi: u32,
    pub voluntary_waiting_period: u32,
    pub max_service_period_after_vwp: u32,
    pub min_first_insem_age_days: u32,
    pub heifer_birth_prob: f64,
    pub purchased_days_to_calving_lo: u32,
    pub purchased_days_to_calving_hi: u32,
    pub population_regulation: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            gestation_mu: 277.5,
            gestation_sigma: 2.0,
            gestation_lo: 275,
            gestation_hi: 280,
            voluntary_waiting_period: 50,
            max_service_period_after_vwp: 300,
            min_first_insem_age_days: 365,
            heifer_birth_prob: 0.5,
            purchased_days_to_calving_lo: 1,
            purchased_days_to_calving_hi: 280,
            population_regulation: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingParams {
    pub estimate_from_dataset: bool,
    pub grouping: CullGrouping,
    pub fallback_monthly_hazard: f64,
    pub age_band_years: u32,
}

impl Default for CullingParams {
    fn default() -> Self {
        Self {
            estimate_from_dataset: true,
            grouping: CullGrouping::Lactation,
            fallback_monthly_hazard: 0.008,
            age_band_years: 2,
        }
    }
}

// ================================================================================================
// Scenario
// ================================================================================================

/// Inputs of one forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub dataset_id: String,
    /// Optional pin; when set it must equal the date resolved from the
    /// dataset's factual columns.
    #[serde(default, deserialize_with = "empty_as_none_date")]
    pub report_date: Option<NaiveDate>,
    #[serde(default = "default_horizon_months")]
    pub horizon_months: u32,
    #[serde(default, deserialize_with = "empty_as_none_date")]
    pub future_date: Option<NaiveDate>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_mc_runs")]
    pub mc_runs: u32,
    #[serde(default = "default_confidence_central")]
    pub confidence_central: f64,
    #[serde(default)]
    pub mode: SamplerMode,
    #[serde(default)]
    pub purchase_policy: PurchasePolicyKind,
    #[serde(default = "default_lead_time_days")]
    pub lead_time_days: u32,
    #[serde(default)]
    pub model: ModelParams,
    #[serde(default)]
    pub culling: CullingParams,
    #[serde(default)]
    pub replacement: ReplacementPolicy,
    #[serde(default)]
    pub purchases: Vec<PurchaseItem>,
}

fn default_horizon_months() -> u32 {
    36
}

fn default_seed() -> u64 {
    42
}

fn default_mc_runs() -> u32 {
    1
}

fn default_confidence_central() -> f64 {
    0.95
}

fn default_lead_time_days() -> u32 {
    90
}

impl ScenarioParams {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            report_date: None,
            horizon_months: default_horizon_months(),
            future_date: None,
            seed: default_seed(),
            mc_runs: default_mc_runs(),
            confidence_central: default_confidence_central(),
            mode: SamplerMode::default(),
            purchase_policy: PurchasePolicyKind::default(),
            lead_time_days: default_lead_time_days(),
            model: ModelParams::default(),
            culling: CullingParams::default(),
            replacement: ReplacementPolicy::default(),
            purchases: Vec::new(),
        }
    }

    /// Structural validation; jobs are never created for scenarios that fail
    /// here.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.dataset_id.trim().is_empty() {
            return Err(DataError::Validation("dataset_id is required".into()));
        }
        if self.horizon_months < 1 || self.horizon_months > MAX_HORIZON_MONTHS {
            return Err(DataError::Validation(format!(
                "horizon_months must be in 1..={MAX_HORIZON_MONTHS}, got {}",
                self.horizon_months
            )));
        }
        if self.mc_runs < 1 || self.mc_runs > MAX_MC_RUNS {
            return Err(DataError::Validation(format!(
                "mc_runs must be in 1..={MAX_MC_RUNS}, got {}",
                self.mc_runs
            )));
        }
        if !(self.confidence_central > 0.0 && self.confidence_central < 1.0) {
            return Err(DataError::Validation(format!(
                "confidence_central must be in (0, 1), got {}",
                self.confidence_central
            )));
        }
        if !(0.0..=1.0).contains(&self.model.heifer_birth_prob) {
            return Err(DataError::Validation(
                "heifer_birth_prob must be in 0..=1".into(),
            ));
        }
        if self.model.population_regulation < 0.0 {
            return Err(DataError::Validation(
                "population_regulation must be non-negative".into(),
            ));
        }
        if self.model.gestation_lo > self.model.gestation_hi {
            return Err(DataError::Validation(
                "gestation_lo must not exceed gestation_hi".into(),
            ));
        }
        if self.model.purchased_days_to_calving_lo < 1
            || self.model.purchased_days_to_calving_lo > self.model.purchased_days_to_calving_hi
        {
            return Err(DataError::Validation(
                "purchased days-to-calving bounds must satisfy 1 <= lo <= hi".into(),
            ));
        }
        if let Some(future) = self.future_date
            && future.day() != 1
        {
            return Err(DataError::FutureDateNotMonthStart(future));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn purchase_item_requires_exactly_one_pregnancy_field() {
        let both: Result<PurchaseItem, _> = serde_json::from_value(serde_json::json!({
            "date_in": "2026-03-10",
            "count": 2,
            "expected_calving_date": "2026-08-01",
            "days_pregnant": 120
        }));
        assert!(both.is_err());

        let neither: Result<PurchaseItem, _> = serde_json::from_value(serde_json::json!({
            "date_in": "2026-03-10",
            "count": 2
        }));
        assert!(neither.is_err());
    }

    #[test]
    fn empty_strings_normalize_to_absent() {
        let item: PurchaseItem = serde_json::from_value(serde_json::json!({
            "date_in": "2026-03-10",
            "count": 2,
            "expected_calving_date": "",
            "days_pregnant": 120
        }))
        .unwrap();
        assert_eq!(item.pregnancy, PregnancySpec::DaysPregnant(120));
    }

    #[test]
    fn purchase_item_round_trips_through_the_wire_shape() {
        let item = PurchaseItem {
            date_in: d(2026, 3, 10),
            count: 3,
            pregnancy: PregnancySpec::ExpectedCalving(d(2026, 8, 1)),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["expected_calving_date"], "2026-08-01");
        let back: PurchaseItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn days_pregnant_implies_the_calving_date() {
        let item = PurchaseItem {
            date_in: d(2026, 3, 10),
            count: 1,
            pregnancy: PregnancySpec::DaysPregnant(120),
        };
        assert_eq!(item.expected_calving(), d(2026, 3, 10) + Days::new(160));
    }

    #[test]
    fn scenario_defaults_deserialize_from_a_minimal_payload() {
        let params: ScenarioParams =
            serde_json::from_value(serde_json::json!({ "dataset_id": "d1" })).unwrap();
        assert_eq!(params.horizon_months, 36);
        assert_eq!(params.mc_runs, 1);
        assert_eq!(params.mode, SamplerMode::Empirical);
        assert_eq!(params.purchase_policy, PurchasePolicyKind::Manual);
        params.validate().unwrap();
    }

    #[test]
    fn mid_month_future_date_is_rejected() {
        let mut params = ScenarioParams::new("d1");
        params.future_date = Some(d(2026, 6, 15));
        assert!(matches!(
            params.validate(),
            Err(DataError::FutureDateNotMonthStart(_))
        ));
    }

    #[test]
    fn out_of_range_runs_are_rejected() {
        let mut params = ScenarioParams::new("d1");
        params.mc_runs = 0;
        assert!(params.validate().is_err());
        params.mc_runs = MAX_MC_RUNS + 1;
        assert!(params.validate().is_err());
    }
}

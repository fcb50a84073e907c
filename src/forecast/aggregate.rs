use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::forecast::result::{
    ENGINE_TAG, EventsByMonth, ForecastMeta, ForecastOutput, ForecastPoint, ForecastSeries,
};
use crate::forecast::scenario::ScenarioParams;
use crate::sim::metrics::EventTally;

/// Quantile by linear interpolation between order statistics, 0-indexed
/// position `q * (n - 1)`. The input must already be sorted.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if q <= 0.0 {
        return sorted[0];
    }
    if q >= 1.0 {
        return sorted[sorted.len() - 1];
    }
    let pos = (sorted.len() - 1) as f64 * q;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = pos - lo as f64;
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

fn field_quantile<F>(runs: &[Vec<ForecastPoint>], idx: usize, q: f64, field: F) -> f64
where
    F: Fn(&ForecastPoint) -> f64,
{
    let values: Vec<f64> = runs
        .iter()
        .map(|run| field(&run[idx]))
        .sorted_by_key(|&v| OrderedFloat(v))
        .collect();
    quantile(&values, q)
}

/// Cross-run quantile series at fraction `q`. Head-counts round to the
/// nearest integer; average days-in-milk stays floating-point.
pub(crate) fn percentile_points(runs: &[Vec<ForecastPoint>], q: f64) -> Vec<ForecastPoint> {
    let n_points = runs.first().map(Vec::len).unwrap_or(0);
    (0..n_points)
        .map(|i| ForecastPoint {
            date: runs[0][i].date,
            milking_count: field_quantile(runs, i, q, |p| p.milking_count as f64).round() as u32,
            dry_count: field_quantile(runs, i, q, |p| p.dry_count as f64).round() as u32,
            heifer_count: field_quantile(runs, i, q, |p| p.heifer_count as f64).round() as u32,
            pregnant_heifer_count: field_quantile(runs, i, q, |p| p.pregnant_heifer_count as f64)
                .round() as u32,
            avg_days_in_milk: field_quantile(runs, i, q, |p| p.avg_days_in_milk),
        })
        .collect()
}

/// Assembles a (possibly partial) result from whatever runs have completed.
///
/// One completed run yields the raw series with no bands; two or more yield
/// P50 plus the symmetric central-confidence band. Event counts are the
/// per-month sums averaged over completed runs.
pub(crate) fn build_output(
    runs: &[Vec<ForecastPoint>],
    events_accum: &BTreeMap<NaiveDate, EventTally>,
    completed_runs: u32,
    params: &ScenarioParams,
    simulation_version: &str,
    warnings: &[String],
) -> ForecastOutput {
    let completed = completed_runs.max(1);
    let divider = completed as f64;
    let average = |v: u32| -> u32 {
        if completed > 1 {
            (v as f64 / divider).round() as u32
        } else {
            v
        }
    };

    let events: Vec<EventsByMonth> = events_accum
        .iter()
        .map(|(&month, tally)| EventsByMonth {
            month,
            calvings: average(tally.calvings),
            dryoffs: average(tally.dryoffs),
            culls: average(tally.culls),
            purchases_in: average(tally.purchases_in),
            heifer_intros: average(tally.heifer_intros),
        })
        .collect();

    let (p50, p10, p90) = if completed > 1 {
        let lower_q = (1.0 - params.confidence_central) / 2.0;
        let upper_q = 1.0 - lower_q;
        (
            percentile_points(runs, 0.5),
            Some(percentile_points(runs, lower_q)),
            Some(percentile_points(runs, upper_q)),
        )
    } else {
        (runs.first().cloned().unwrap_or_default(), None, None)
    };

    let future_point = params
        .future_date
        .and_then(|future| p50.iter().find(|p| p.date == future).copied());

    ForecastOutput {
        series_p50: ForecastSeries { points: p50 },
        series_p10: p10.map(|points| ForecastSeries { points }),
        series_p90: p90.map(|points| ForecastSeries { points }),
        events,
        future_point,
        meta: ForecastMeta {
            engine: ENGINE_TAG.to_string(),
            mode: params.mode,
            purchase_policy: params.purchase_policy,
            confidence_central: params.confidence_central,
            assumptions: vec![
                "empirical mode draws day counts from the dataset multiset".to_string(),
                "theoretical mode fits lognormal and mixture samplers by moments".to_string(),
                "policy-driven purchases sample days-to-calving; manual lots honor their stated pregnancy"
                    .to_string(),
            ],
            warnings: warnings.to_vec(),
            simulation_version: simulation_version.to_string(),
        },
    }
}

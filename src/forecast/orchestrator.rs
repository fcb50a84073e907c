use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::error::{DataError, HerdcastResult, JobError, SimError, SystemError};
use crate::forecast::aggregate::build_output;
use crate::forecast::result::{ForecastOutput, ForecastPoint};
use crate::forecast::scenario::ScenarioParams;
use crate::herd::animal::{Animal, HerdBucket};
use crate::herd::dataset::HerdDataset;
use crate::herd::month_starts_after;
use crate::herd::policies::{CullingHazard, PurchasePolicy};
use crate::herd::samplers::EmpiricalSets;
use crate::sim::engine::{HerdSimulation, ModelConfig};
use crate::sim::metrics::{EventTally, MetricsRecord, RecordCadence};

/// Per-run seed stride: run `i` is seeded with `master_seed + i * 9973`.
pub const SEED_STRIDE: u64 = 9973;

/// Monte Carlo execution settings, normally sourced from [`crate::Settings`].
#[derive(Debug, Clone, Copy)]
pub struct McSettings {
    pub parallel_enabled: bool,
    pub max_processes: usize,
    pub batch_size: usize,
}

impl Default for McSettings {
    fn default() -> Self {
        Self {
            parallel_enabled: true,
            max_processes: 24,
            batch_size: 32,
        }
    }
}

/// Snapshot rows plus per-month events of one completed run.
struct RunOutput {
    rows: Vec<ForecastPoint>,
    events: BTreeMap<NaiveDate, EventTally>,
}

struct RunSpec<'a> {
    params: &'a ScenarioParams,
    base_herd: &'a [Animal],
    cfg: &'a ModelConfig,
    culling: &'a CullingHazard,
    target_dates: &'a [NaiveDate],
    report_date: NaiveDate,
    total_days: u32,
    initial_milking: u32,
}

/// Runs the Monte Carlo forecast for one scenario.
///
/// `progress` is invoked after every completed batch with
/// `(completed_runs, total_runs, partial_result)`; returning `false` stops
/// the orchestration (the caller sees [`JobError::Canceled`]). All runs share
/// the snapshot-date vector computed up front, so cross-run aggregation is
/// index-aligned by construction.
#[tracing::instrument(
    skip_all,
    fields(dataset = %params.dataset_id, mode = %params.mode, runs = params.mc_runs)
)]
pub fn run_forecast(
    dataset: &HerdDataset,
    params: &ScenarioParams,
    mc: &McSettings,
    simulation_version: &str,
    mut progress: impl FnMut(u32, u32, &ForecastOutput) -> bool,
) -> HerdcastResult<ForecastOutput> {
    params.validate()?;

    let report_date = dataset.report_date()?;
    if let Some(requested) = params.report_date
        && requested != report_date
    {
        return Err(DataError::ReportDateMismatch {
            requested,
            resolved: report_date,
        }
        .into());
    }

    let mut target_dates = vec![report_date];
    target_dates.extend(month_starts_after(report_date, params.horizon_months));
    let horizon_end = *target_dates.last().expect("at least the report date");
    if let Some(future) = params.future_date {
        if future < report_date || future > horizon_end {
            return Err(DataError::FutureDateOutOfRange(future).into());
        }
        if !target_dates.contains(&future) {
            target_dates.push(future);
            target_dates.sort();
        }
    }
    let total_days = (horizon_end - report_date).num_days() as u32 + 1;

    let samplers = EmpiricalSets::from_dataset(dataset).into_samplers(params.mode);
    let culling = if params.culling.estimate_from_dataset {
        CullingHazard::estimate(
            dataset,
            report_date,
            params.culling.grouping,
            params.culling.fallback_monthly_hazard,
            params.culling.age_band_years,
        )
    } else {
        CullingHazard::flat(params.culling.fallback_monthly_hazard)
    };
    let cfg = ModelConfig {
        samplers,
        min_first_insem_age_days: params.model.min_first_insem_age_days,
        voluntary_waiting_period: params.model.voluntary_waiting_period,
        max_service_period_after_vwp: params.model.max_service_period_after_vwp,
        population_regulation: params.model.population_regulation,
        gestation_mu: params.model.gestation_mu,
        gestation_sigma: params.model.gestation_sigma,
        gestation_lo: params.model.gestation_lo,
        gestation_hi: params.model.gestation_hi,
        heifer_birth_prob: params.model.heifer_birth_prob,
        purchased_days_to_calving_lo: params.model.purchased_days_to_calving_lo,
        purchased_days_to_calving_hi: params.model.purchased_days_to_calving_hi,
    };

    let base_herd = dataset.build_initial_herd(report_date, params.model.voluntary_waiting_period);
    let initial_milking = base_herd.iter().filter(|a| a.is_milking()).count() as u32;
    let warnings = plan_warnings(params, report_date, horizon_end);

    let spec = RunSpec {
        params,
        base_herd: &base_herd,
        cfg: &cfg,
        culling: &culling,
        target_dates: &target_dates,
        report_date,
        total_days,
        initial_milking,
    };

    let total_runs = params.mc_runs;
    let seeds: Vec<u64> = (0..total_runs as u64)
        .map(|i| params.seed.wrapping_add(i.wrapping_mul(SEED_STRIDE)))
        .collect();

    let use_parallel = mc.parallel_enabled && total_runs >= 2 && mc.max_processes > 1;
    let pool = if use_parallel {
        let threads = mc.max_processes.min(total_runs as usize);
        Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| SystemError::Generic(e.to_string()))?,
        )
    } else {
        None
    };

    let mut runs: Vec<Vec<ForecastPoint>> = Vec::with_capacity(total_runs as usize);
    let mut events_accum: BTreeMap<NaiveDate, EventTally> = BTreeMap::new();
    let mut completed: u32 = 0;

    for chunk in seeds.chunks(mc.batch_size.max(1)) {
        let outputs: Vec<RunOutput> = match &pool {
            Some(pool) => pool.install(|| {
                chunk
                    .par_iter()
                    .map(|&seed| run_one(&spec, seed))
                    .collect::<Result<Vec<_>, SimError>>()
            })?,
            None => chunk
                .iter()
                .map(|&seed| run_one(&spec, seed))
                .collect::<Result<Vec<_>, SimError>>()?,
        };

        for output in outputs {
            runs.push(output.rows);
            for (month, tally) in output.events {
                events_accum.entry(month).or_default().absorb(&tally);
            }
            completed += 1;
        }

        let partial = build_output(
            &runs,
            &events_accum,
            completed,
            params,
            simulation_version,
            &warnings,
        );
        if !progress(completed, total_runs, &partial) {
            return Err(JobError::Canceled(params.dataset_id.clone()).into());
        }
        if completed == total_runs {
            return Ok(partial);
        }
    }

    Err(SystemError::Generic("no Monte Carlo batch was dispatched".into()).into())
}

fn run_one(spec: &RunSpec<'_>, seed: u64) -> Result<RunOutput, SimError> {
    let policy = PurchasePolicy::for_kind(
        spec.params.purchase_policy,
        spec.initial_milking,
        spec.params.lead_time_days,
    );
    let mut sim = HerdSimulation::new(
        spec.base_herd.to_vec(),
        spec.cfg.clone(),
        spec.culling.clone(),
        spec.params.replacement,
        policy,
        spec.report_date,
        seed,
        RecordCadence::MonthStart,
    );
    for item in &spec.params.purchases {
        sim.queue_purchase(item.date_in, item.count, Some(item.expected_calving()));
    }
    sim.run(spec.total_days)?;
    Ok(build_run_output(
        sim.history(),
        spec.base_herd,
        spec.report_date,
        spec.target_dates,
    ))
}

/// Aligns one run's month-start records onto the shared target-date vector.
/// The report-date row is the pre-simulation snapshot of the parsed herd.
fn build_run_output(
    history: &[MetricsRecord],
    base_herd: &[Animal],
    report_date: NaiveDate,
    target_dates: &[NaiveDate],
) -> RunOutput {
    let by_date: BTreeMap<NaiveDate, &MetricsRecord> =
        history.iter().map(|r| (r.snapshot.date, r)).collect();
    let initial = initial_snapshot(base_herd, report_date);

    let mut rows = Vec::with_capacity(target_dates.len());
    let mut events = BTreeMap::new();
    for &date in target_dates {
        if date == report_date {
            rows.push(initial);
            continue;
        }
        let record = by_date
            .get(&date)
            .copied()
            .or_else(|| by_date.range(..=date).next_back().map(|(_, r)| *r));
        match record {
            None => {
                rows.push(ForecastPoint { date, ..initial });
                events.insert(date, EventTally::default());
            }
            Some(record) => {
                let s = record.snapshot;
                rows.push(ForecastPoint {
                    date,
                    milking_count: s.milking,
                    dry_count: s.dry,
                    heifer_count: s.heifers,
                    pregnant_heifer_count: s.pregnant_heifers,
                    avg_days_in_milk: s.avg_days_in_milk,
                });
                events.insert(date, record.events);
            }
        }
    }
    RunOutput { rows, events }
}

fn initial_snapshot(base_herd: &[Animal], report_date: NaiveDate) -> ForecastPoint {
    let mut milking = 0u32;
    let mut dry = 0u32;
    let mut heifers = 0u32;
    let mut pregnant_heifers = 0u32;
    let mut dim_sum = 0u64;
    for animal in base_herd {
        match animal.status.bucket() {
            Some(HerdBucket::Milking) => {
                milking += 1;
                dim_sum += animal.days_in_milk as u64;
            }
            Some(HerdBucket::Dry) => dry += 1,
            Some(HerdBucket::Heifer) => heifers += 1,
            Some(HerdBucket::PregnantHeifer) => pregnant_heifers += 1,
            None => {}
        }
    }
    ForecastPoint {
        date: report_date,
        milking_count: milking,
        dry_count: dry,
        heifer_count: heifers,
        pregnant_heifer_count: pregnant_heifers,
        avg_days_in_milk: if milking > 0 {
            dim_sum as f64 / milking as f64
        } else {
            0.0
        },
    }
}

fn plan_warnings(
    params: &ScenarioParams,
    report_date: NaiveDate,
    horizon_end: NaiveDate,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for item in &params.purchases {
        if item.date_in < report_date {
            warnings.push(format!(
                "purchase dated {} precedes the report date and applies on the first simulated day",
                item.date_in
            ));
        } else if item.date_in > horizon_end {
            warnings.push(format!(
                "purchase dated {} is beyond the forecast horizon and never applies",
                item.date_in
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HerdcastError;
    use crate::herd::dataset::DatasetRow;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn milking_row(id: u64, last_calving: NaiveDate, insem: Option<NaiveDate>) -> DatasetRow {
        DatasetRow {
            animal_id: id,
            birth_date: d(2021, 3, 1),
            status: "milking".into(),
            lactation: 1,
            archive_date: None,
            last_calving_date: Some(last_calving),
            insem_date: insem,
            success_insem_date: None,
            dryoff_date: None,
            expected_dryoff_date: None,
            expected_calving_date: None,
            days_in_milk: None,
        }
    }

    /// Ten milking cows; the newest factual date pins the report date to
    /// 2026-02-20.
    fn ten_cow_dataset() -> HerdDataset {
        let mut rows: Vec<DatasetRow> = (1..=9)
            .map(|i| milking_row(i, d(2025, 12, 1), None))
            .collect();
        rows.push(milking_row(10, d(2025, 12, 1), Some(d(2026, 2, 20))));
        HerdDataset::from_rows(rows)
    }

    fn base_params() -> ScenarioParams {
        let mut params = ScenarioParams::new("d1");
        params.horizon_months = 1;
        params.mc_runs = 1;
        params.culling.estimate_from_dataset = false;
        params.culling.fallback_monthly_hazard = 0.0;
        params.replacement.enabled = false;
        params
    }

    #[test]
    fn single_run_single_month_shape() {
        let out = run_forecast(
            &ten_cow_dataset(),
            &base_params(),
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap();

        assert!(out.series_p10.is_none());
        assert!(out.series_p90.is_none());
        assert_eq!(out.series_p50.points.len(), 2);
        assert_eq!(out.series_p50.points[0].date, d(2026, 2, 20));
        assert_eq!(out.series_p50.points[0].milking_count, 10);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].month, d(2026, 3, 1));
    }

    #[test]
    fn same_seed_produces_byte_identical_payloads() {
        let mut params = base_params();
        params.mc_runs = 3;
        params.horizon_months = 4;

        let a = run_forecast(
            &ten_cow_dataset(),
            &params,
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap();
        let b = run_forecast(
            &ten_cow_dataset(),
            &params,
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap();

        let bytes_a = serde_json::to_vec(&a).unwrap();
        let bytes_b = serde_json::to_vec(&b).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn bands_appear_and_bracket_p50_with_multiple_runs() {
        let mut params = base_params();
        params.mc_runs = 5;
        params.horizon_months = 6;
        params.culling.fallback_monthly_hazard = 0.05;

        let out = run_forecast(
            &ten_cow_dataset(),
            &params,
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap();

        let p50 = &out.series_p50.points;
        let p10 = &out.series_p10.as_ref().unwrap().points;
        let p90 = &out.series_p90.as_ref().unwrap().points;
        for i in 0..p50.len() {
            assert!(p10[i].milking_count <= p50[i].milking_count);
            assert!(p50[i].milking_count <= p90[i].milking_count);
            assert!(p10[i].avg_days_in_milk <= p50[i].avg_days_in_milk + 1e-9);
            assert!(p50[i].avg_days_in_milk <= p90[i].avg_days_in_milk + 1e-9);
        }
    }

    #[test]
    fn future_probe_resolves_to_its_snapshot_row() {
        let mut params = base_params();
        params.horizon_months = 12;
        params.future_date = Some(d(2026, 6, 1));

        let out = run_forecast(
            &ten_cow_dataset(),
            &params,
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap();

        let future = out.future_point.unwrap();
        assert_eq!(future.date, d(2026, 6, 1));
        let row = out
            .series_p50
            .points
            .iter()
            .find(|p| p.date == d(2026, 6, 1))
            .unwrap();
        assert_eq!(&future, row);
    }

    #[test]
    fn pinned_report_date_must_match_the_dataset() {
        let mut params = base_params();
        params.report_date = Some(d(2026, 1, 1));
        let err = run_forecast(
            &ten_cow_dataset(),
            &params,
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HerdcastError::Data(DataError::ReportDateMismatch { .. })
        ));
    }

    #[test]
    fn future_date_outside_horizon_is_rejected() {
        let mut params = base_params();
        params.future_date = Some(d(2027, 6, 1));
        let err = run_forecast(
            &ten_cow_dataset(),
            &params,
            &McSettings::default(),
            "1.1.0",
            |_, _, _| true,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HerdcastError::Data(DataError::FutureDateOutOfRange(_))
        ));
    }

    #[test]
    fn progress_reports_monotonically_and_can_cancel() {
        let mut params = base_params();
        params.mc_runs = 6;
        let mc = McSettings {
            parallel_enabled: false,
            max_processes: 1,
            batch_size: 2,
        };

        let mut seen: Vec<u32> = Vec::new();
        run_forecast(&ten_cow_dataset(), &params, &mc, "1.1.0", |done, total, _| {
            assert_eq!(total, 6);
            seen.push(done);
            true
        })
        .unwrap();
        assert_eq!(seen, vec![2, 4, 6]);

        let err = run_forecast(&ten_cow_dataset(), &params, &mc, "1.1.0", |_, _, _| false)
            .unwrap_err();
        assert!(matches!(err, HerdcastError::Job(JobError::Canceled(_))));
    }
}

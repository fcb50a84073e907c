use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use herdcast::error::{HerdcastResult, SystemError};
use herdcast::forecast::orchestrator::McSettings;
use herdcast::forecast::scenario::ScenarioParams;
use herdcast::herd::dataset::HerdDataset;
use herdcast::run_forecast;

/// Monte Carlo throughput benchmark: runs the same scenario serially and in
/// parallel and prints the speedup.
#[derive(Parser, Debug)]
#[command(name = "mc-benchmark")]
struct Cli {
    /// Herd snapshot csv to forecast from.
    #[arg(long)]
    dataset_csv: PathBuf,

    #[arg(long, default_value_t = 32)]
    runs: u32,

    #[arg(long, default_value_t = 8)]
    processes: usize,

    #[arg(long, default_value_t = 8)]
    batch_size: usize,

    #[arg(long, default_value_t = 12)]
    horizon_months: u32,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn progress_bar(total: u64, label: &str) -> HerdcastResult<ProgressBar> {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| SystemError::Generic(e.to_string()))?
            .progress_chars("#>-"),
    );
    bar.set_message(label.to_string());
    Ok(bar)
}

fn bench(
    dataset: &HerdDataset,
    params: &ScenarioParams,
    mc: &McSettings,
    label: &str,
) -> HerdcastResult<f64> {
    let bar = progress_bar(params.mc_runs as u64, label)?;
    let started = Instant::now();
    run_forecast(dataset, params, mc, "bench", |completed, _, _| {
        bar.set_position(completed as u64);
        true
    })?;
    let elapsed = started.elapsed().as_secs_f64();
    bar.finish_with_message(format!(
        "{label}: {:.2}s ({:.2} runs/s)",
        elapsed,
        params.mc_runs as f64 / elapsed.max(1e-9)
    ));
    Ok(elapsed)
}

fn main() -> HerdcastResult<()> {
    let cli = Cli::parse();

    let bytes = std::fs::read(&cli.dataset_csv)
        .map_err(|e| SystemError::Generic(format!("cannot read dataset: {e}")))?;
    let dataset = HerdDataset::from_csv_bytes(&bytes)?;

    let mut params = ScenarioParams::new("bench");
    params.mc_runs = cli.runs;
    params.horizon_months = cli.horizon_months;
    params.seed = cli.seed;

    println!(
        "dataset: {} rows, {} runs, horizon {} months",
        dataset.len(),
        cli.runs,
        cli.horizon_months
    );

    let serial = McSettings {
        parallel_enabled: false,
        max_processes: 1,
        batch_size: cli.batch_size,
    };
    let parallel = McSettings {
        parallel_enabled: true,
        max_processes: cli.processes,
        batch_size: cli.batch_size,
    };

    let serial_secs = bench(&dataset, &params, &serial, "serial")?;
    let parallel_secs = bench(&dataset, &params, &parallel, "parallel")?;

    println!(
        "speedup with {} workers: {:.2}x",
        cli.processes,
        serial_secs / parallel_secs.max(1e-9)
    );
    Ok(())
}

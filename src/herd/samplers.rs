use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::DataError;
use crate::herd::dataset::HerdDataset;

/// How the three days-until-event samplers are built from the dataset.
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
pub enum SamplerMode {
    /// Draw with replacement from the raw dataset multiset.
    #[default]
    Empirical,
    /// Fit lognormal / mixture parameters to the dataset by moments.
    Theoretical,
}

/// One-dimensional integer sampler for days-until-event quantities.
///
/// A closed variant set on purpose: every consumer matches on the same four
/// shapes and new ones are added here, not via trait objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DaysSampler {
    /// Uniform draw from a precomputed multiset; duplicates preserve the
    /// empirical distribution.
    Empirical { values: Vec<u32> },
    /// Gaussian draw rounded to the nearest integer and clamped into [lo, hi].
    TruncatedNormal { mu: f64, sigma: f64, lo: u32, hi: u32 },
    /// Lognormal draw rounded and clamped into [lo, hi].
    LogNormal { mu_ln: f64, sigma_ln: f64, lo: u32, hi: u32 },
    /// With probability `p_peak` a truncated normal in [peak_lo, peak_hi],
    /// otherwise a uniform integer in [tail_lo, tail_hi].
    Mixture {
        p_peak: f64,
        mu_peak: f64,
        sigma_peak: f64,
        peak_lo: u32,
        peak_hi: u32,
        tail_lo: u32,
        tail_hi: u32,
    },
}

impl DaysSampler {
    pub fn empirical(name: &str, values: Vec<u32>) -> Result<Self, DataError> {
        if values.is_empty() {
            return Err(DataError::EmptySampler(name.to_string()));
        }
        Ok(Self::Empirical { values })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match self {
            Self::Empirical { values } => values[rng.random_range(0..values.len())],
            Self::TruncatedNormal { mu, sigma, lo, hi } => {
                truncated_gauss(rng, *mu, *sigma, *lo, *hi)
            }
            Self::LogNormal {
                mu_ln,
                sigma_ln,
                lo,
                hi,
            } => {
                let x = match LogNormal::new(*mu_ln, *sigma_ln) {
                    Ok(dist) => dist.sample(rng),
                    Err(_) => mu_ln.exp(),
                };
                clamp_round(x, *lo, *hi)
            }
            Self::Mixture {
                p_peak,
                mu_peak,
                sigma_peak,
                peak_lo,
                peak_hi,
                tail_lo,
                tail_hi,
            } => {
                if rng.random_bool(p_peak.clamp(0.0, 1.0)) {
                    truncated_gauss(rng, *mu_peak, *sigma_peak, *peak_lo, *peak_hi)
                } else {
                    let (lo, hi) = if tail_lo <= tail_hi {
                        (*tail_lo, *tail_hi)
                    } else {
                        (*tail_hi, *tail_lo)
                    };
                    rng.random_range(lo..=hi)
                }
            }
        }
    }
}

fn truncated_gauss<R: Rng + ?Sized>(rng: &mut R, mu: f64, sigma: f64, lo: u32, hi: u32) -> u32 {
    let x = if sigma > 0.0 {
        match Normal::new(mu, sigma) {
            Ok(dist) => dist.sample(rng),
            Err(_) => mu,
        }
    } else {
        mu
    };
    clamp_round(x, lo, hi)
}

fn clamp_round(x: f64, lo: u32, hi: u32) -> u32 {
    let v = x.round();
    if !v.is_finite() || v <= lo as f64 {
        return lo;
    }
    if v >= hi as f64 {
        return hi;
    }
    v as u32
}

// ================================================================================================
// Fitting
// ================================================================================================

/// Fits a lognormal by method of moments (unbiased variance estimator).
/// A non-positive mean degenerates to `LogNormal(0, 1)` over the data range.
pub fn fit_lognormal(values: &[u32]) -> DaysSampler {
    let (lo, hi) = min_max(values).unwrap_or((1, 1));
    let n = values.len() as f64;
    let m = values.iter().map(|&v| v as f64).sum::<f64>() / n.max(1.0);
    if m <= 0.0 {
        return DaysSampler::LogNormal {
            mu_ln: 0.0,
            sigma_ln: 1.0,
            lo,
            hi,
        };
    }
    let var = unbiased_variance(values, m);
    let sigma2 = (1.0 + var / (m * m)).ln();
    let sigma_ln = sigma2.max(1e-9).sqrt();
    let mu_ln = m.ln() - 0.5 * sigma2;
    DaysSampler::LogNormal {
        mu_ln,
        sigma_ln,
        lo,
        hi,
    }
}

/// Fits the two-component dry-period mixture: a normal peak over values
/// >= 200 days and a uniform tail below. Degenerate inputs fall back to the
/// documented default truncated normal around 220 days.
pub fn fit_dry_mixture(values: &[u32]) -> DaysSampler {
    if values.is_empty() {
        return default_dry_sampler();
    }

    let peak: Vec<u32> = values.iter().copied().filter(|&v| v >= 200).collect();
    let tail: Vec<u32> = values.iter().copied().filter(|&v| v < 200).collect();
    let p_peak = peak.len() as f64 / values.len() as f64;

    let (mu_peak, sigma_peak, peak_lo, peak_hi) = if peak.is_empty() {
        (220.0, 5.0, 210, 239)
    } else {
        let m = peak.iter().map(|&v| v as f64).sum::<f64>() / peak.len() as f64;
        let sigma = unbiased_variance(&peak, m).max(1e-9).sqrt().max(1.0);
        let (lo, hi) = min_max(&peak).expect("peak is non-empty");
        (m, sigma, lo, hi)
    };

    let (tail_lo, tail_hi) = if tail.is_empty() {
        (34, 199)
    } else {
        let (lo, hi) = min_max(&tail).expect("tail is non-empty");
        let hi = hi.min(199);
        if hi < lo { (34, 199) } else { (lo, hi) }
    };

    DaysSampler::Mixture {
        p_peak,
        mu_peak,
        sigma_peak,
        peak_lo,
        peak_hi,
        tail_lo,
        tail_hi,
    }
}

fn unbiased_variance(values: &[u32], mean: f64) -> f64 {
    let denom = (values.len().saturating_sub(1)).max(1) as f64;
    values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / denom
}

fn min_max(values: &[u32]) -> Option<(u32, u32)> {
    let lo = values.iter().copied().min()?;
    let hi = values.iter().copied().max()?;
    Some((lo, hi))
}

// ================================================================================================
// Dataset-derived sampler sets
// ================================================================================================

/// The three empirical multisets extracted from a dataset snapshot.
///
/// Extraction keeps only plausible windows so one bad row cannot skew a fit:
/// first-insemination ages in 300..=1000 days, service periods in 20..=400,
/// conception-to-dry intervals in 20..=300.
#[derive(Debug, Clone, Default)]
pub struct EmpiricalSets {
    pub first_insem_ages: Vec<u32>,
    pub service_periods: Vec<u32>,
    pub conception_to_dry: Vec<u32>,
}

/// Samplers for the three model quantities of one scenario.
#[derive(Debug, Clone)]
pub struct SamplerSet {
    pub age_first_insem: DaysSampler,
    pub service_period: DaysSampler,
    pub conception_to_dry: DaysSampler,
}

impl EmpiricalSets {
    pub fn from_dataset(dataset: &HerdDataset) -> Self {
        let mut sets = Self::default();
        for row in dataset.rows() {
            if row.lactation == 0
                && let Some(success) = row.success_insem_date
            {
                let age = (success - row.birth_date).num_days();
                if (300..=1000).contains(&age) {
                    sets.first_insem_ages.push(age as u32);
                }
            }
            if row.lactation > 0
                && let (Some(calving), Some(success)) =
                    (row.last_calving_date, row.success_insem_date)
            {
                let sp = (success - calving).num_days();
                if (20..=400).contains(&sp) {
                    sets.service_periods.push(sp as u32);
                }
            }
            if let Some(success) = row.success_insem_date
                && let Some(dry) = row.dryoff_date.or(row.expected_dryoff_date)
            {
                let dtd = (dry - success).num_days();
                if (20..=300).contains(&dtd) {
                    sets.conception_to_dry.push(dtd as u32);
                }
            }
        }
        sets
    }

    /// Builds the scenario sampler set. Empty multisets fall back to the
    /// documented defaults in either mode.
    pub fn into_samplers(self, mode: SamplerMode) -> SamplerSet {
        match mode {
            SamplerMode::Empirical => SamplerSet {
                age_first_insem: DaysSampler::empirical("first_insem_ages", self.first_insem_ages)
                    .unwrap_or_else(|_| default_age_sampler()),
                service_period: DaysSampler::empirical("service_periods", self.service_periods)
                    .unwrap_or_else(|_| default_service_sampler()),
                conception_to_dry: DaysSampler::empirical(
                    "conception_to_dry",
                    self.conception_to_dry,
                )
                .unwrap_or_else(|_| default_dry_sampler()),
            },
            SamplerMode::Theoretical => SamplerSet {
                age_first_insem: if self.first_insem_ages.is_empty() {
                    default_age_sampler()
                } else {
                    fit_lognormal(&self.first_insem_ages)
                },
                service_period: if self.service_periods.is_empty() {
                    default_service_sampler()
                } else {
                    fit_lognormal(&self.service_periods)
                },
                conception_to_dry: fit_dry_mixture(&self.conception_to_dry),
            },
        }
    }
}

fn default_age_sampler() -> DaysSampler {
    DaysSampler::TruncatedNormal {
        mu: 400.0,
        sigma: 25.0,
        lo: 365,
        hi: 500,
    }
}

fn default_service_sampler() -> DaysSampler {
    DaysSampler::TruncatedNormal {
        mu: 115.0,
        sigma: 10.0,
        lo: 50,
        hi: 250,
    }
}

fn default_dry_sampler() -> DaysSampler {
    DaysSampler::TruncatedNormal {
        mu: 220.0,
        sigma: 10.0,
        lo: 34,
        hi: 239,
    }
}

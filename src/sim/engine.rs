use chrono::{Datelike, Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SimError;
use crate::herd::animal::{Animal, AnimalId, AnimalStatus, HerdBucket};
use crate::herd::event::{EventKind, EventPayload, EventQueue};
use crate::herd::policies::{CullingHazard, PurchasePolicy, ReplacementPolicy};
use crate::herd::samplers::{DaysSampler, SamplerSet};
use crate::sim::metrics::{DailySnapshot, EventTally, MetricsRecord, RecordCadence};

/// Model parameters of one simulation run, samplers included.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub samplers: SamplerSet,

    pub min_first_insem_age_days: u32,
    pub voluntary_waiting_period: u32,
    pub max_service_period_after_vwp: u32,
    pub population_regulation: f64,

    pub gestation_mu: f64,
    pub gestation_sigma: f64,
    pub gestation_lo: u32,
    pub gestation_hi: u32,

    pub heifer_birth_prob: f64,

    pub purchased_days_to_calving_lo: u32,
    pub purchased_days_to_calving_hi: u32,
}

impl ModelConfig {
    pub fn sample_gestation_days<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        DaysSampler::TruncatedNormal {
            mu: self.gestation_mu,
            sigma: self.gestation_sigma,
            lo: self.gestation_lo,
            hi: self.gestation_hi,
        }
        .sample(rng)
    }
}

/// The discrete-event herd simulator.
///
/// Owns the animal arena, the exogenous event queue (purchases, replacement
/// intros), a seeded RNG and the simulated clock; advances one day at a time
/// and records composition snapshots plus event tallies. A simulation is
/// fully deterministic given its initial herd, configuration and seed.
pub struct HerdSimulation {
    herd: Vec<Animal>,
    cfg: ModelConfig,
    culling: CullingHazard,
    replacement: ReplacementPolicy,
    purchase_policy: PurchasePolicy,
    events: EventQueue,
    today: NaiveDate,
    rng: StdRng,
    cadence: RecordCadence,
    history: Vec<MetricsRecord>,
    day_tally: EventTally,
    period_tally: EventTally,
    next_id: u64,
}

impl HerdSimulation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        herd: Vec<Animal>,
        cfg: ModelConfig,
        culling: CullingHazard,
        replacement: ReplacementPolicy,
        purchase_policy: PurchasePolicy,
        start_date: NaiveDate,
        seed: u64,
        cadence: RecordCadence,
    ) -> Self {
        let next_id = herd.iter().map(|a| a.id.0).max().unwrap_or(0);
        Self {
            herd,
            cfg,
            culling,
            replacement,
            purchase_policy,
            events: EventQueue::new(),
            today: start_date,
            rng: StdRng::seed_from_u64(seed),
            cadence,
            history: Vec::new(),
            day_tally: EventTally::default(),
            period_tally: EventTally::default(),
            next_id,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn herd(&self) -> &[Animal] {
        &self.herd
    }

    pub fn history(&self) -> &[MetricsRecord] {
        &self.history
    }

    /// Schedules a purchase lot from the manual plan.
    pub fn queue_purchase(&mut self, date: NaiveDate, count: u32, expected_calving: Option<NaiveDate>) {
        self.events.push(
            date,
            EventKind::PurchaseIn,
            None,
            Some(EventPayload::Purchase {
                count,
                expected_calving,
            }),
        );
    }

    pub fn run(&mut self, days: u32) -> Result<&[MetricsRecord], SimError> {
        for _ in 0..days {
            self.step_day()?;
        }
        Ok(&self.history)
    }

    /// Advances the simulation by one day.
    pub fn step_day(&mut self) -> Result<(), SimError> {
        self.day_tally = EventTally::default();

        if self.today.day() == 1 {
            self.apply_replacement_policy();
        }

        for ev in self.events.pop_due(self.today) {
            match (ev.kind, ev.payload) {
                (
                    EventKind::PurchaseIn,
                    Some(EventPayload::Purchase {
                        count,
                        expected_calving,
                    }),
                ) => self.buy_pregnant_heifers(count, expected_calving),
                (EventKind::HeiferIntro, Some(EventPayload::HeiferIntro { expected_calvings })) => {
                    self.introduce_pregnant_heifers(&expected_calvings)
                }
                // The queue carries exogenous events only; animal-scoped
                // transitions live on the animals themselves.
                _ => {}
            }
        }

        let auto_buy = self
            .purchase_policy
            .planned_buy(self.today, |future| self.forecast_milking_count(future));
        if auto_buy > 0 {
            self.buy_pregnant_heifers(auto_buy, None);
        }

        let mut herd = std::mem::take(&mut self.herd);
        let mut newborns: Vec<Animal> = Vec::new();

        for cow in herd.iter_mut() {
            let p = self
                .culling
                .daily_probability(cow, self.today, self.cfg.population_regulation);
            if p > 0.0 && self.rng.random::<f64>() < p {
                self.cull(cow);
                continue;
            }

            match cow.status {
                AnimalStatus::Heifer => self.tick_heifer(cow),
                AnimalStatus::PregnantHeifer => self.tick_pregnant_heifer(cow, &mut newborns),
                AnimalStatus::Fresh => self.tick_fresh(cow),
                AnimalStatus::ReadyForBreeding => self.tick_ready_for_breeding(cow),
                AnimalStatus::Pregnant => self.tick_pregnant(cow),
                AnimalStatus::Dry => self.tick_dry(cow, &mut newborns),
                AnimalStatus::Archived => {}
            }

            if cow.is_milking() {
                cow.days_in_milk += 1;
            }
            if cow.is_alive() {
                cow.days_in_status += 1;
            }
        }

        herd.retain(Animal::is_alive);
        if !newborns.is_empty() {
            self.purchase_policy.on_added(newborns.len() as u32);
            herd.extend(newborns);
        }
        self.herd = herd;

        if matches!(self.cadence, RecordCadence::Daily) || self.today.day() == 1 {
            self.record_metrics();
        }

        self.today = self
            .today
            .checked_add_days(Days::new(1))
            .ok_or(SimError::ClockOverflow(self.today))?;
        Ok(())
    }

    /// Projects the milking head-count at `future_day` by walking each live
    /// animal through its already-planned transitions, without mutation.
    pub fn forecast_milking_count(&self, future_day: NaiveDate) -> u32 {
        self.herd
            .iter()
            .filter(|cow| projected_milking(cow, future_day))
            .count() as u32
    }

    // ============================================================================================
    // Daily tick, dispatched on status
    // ============================================================================================

    fn tick_heifer(&mut self, cow: &mut Animal) {
        if cow.planned_first_insem_date.is_none() {
            let age = self
                .cfg
                .samplers
                .age_first_insem
                .sample(&mut self.rng)
                .max(self.cfg.min_first_insem_age_days);
            cow.planned_first_insem_date = Some(cow.birth_date + Days::new(age as u64));
        }
        if let Some(planned) = cow.planned_first_insem_date
            && self.today >= planned
        {
            cow.status = AnimalStatus::PregnantHeifer;
            cow.conception_date = Some(self.today);
            cow.days_in_status = 0;
            let gestation = self.cfg.sample_gestation_days(&mut self.rng);
            cow.planned_calving_date = Some(self.today + Days::new(gestation as u64));
        }
    }

    fn tick_pregnant_heifer(&mut self, cow: &mut Animal, newborns: &mut Vec<Animal>) {
        if let Some(calving) = cow.planned_calving_date
            && self.today >= calving
        {
            self.do_calving(cow, newborns);
        }
    }

    fn tick_fresh(&mut self, cow: &mut Animal) {
        if cow.days_in_status >= self.cfg.voluntary_waiting_period {
            cow.status = AnimalStatus::ReadyForBreeding;
            cow.days_in_status = 0;
            if let Some(last_calving) = cow.last_calving_date {
                let sp = self
                    .cfg
                    .samplers
                    .service_period
                    .sample(&mut self.rng)
                    .max(self.cfg.voluntary_waiting_period);
                cow.planned_conception_date = Some(last_calving + Days::new(sp as u64));
            }
        }
    }

    fn tick_ready_for_breeding(&mut self, cow: &mut Animal) {
        if cow.days_in_status >= self.cfg.max_service_period_after_vwp {
            self.cull(cow);
            return;
        }

        if cow.planned_conception_date.is_none() {
            let sp = self.cfg.samplers.service_period.sample(&mut self.rng).max(1);
            cow.planned_conception_date = Some(self.today + Days::new(sp as u64));
        }

        if let Some(planned) = cow.planned_conception_date
            && self.today >= planned
        {
            cow.status = AnimalStatus::Pregnant;
            cow.conception_date = Some(self.today);
            cow.days_in_status = 0;

            let gestation = self.cfg.sample_gestation_days(&mut self.rng);
            let calving = self.today + Days::new(gestation as u64);
            cow.planned_calving_date = Some(calving);

            let days_to_dry = self.cfg.samplers.conception_to_dry.sample(&mut self.rng);
            let mut dry = self.today + Days::new(days_to_dry as u64);
            if dry >= calving {
                dry = calving - Days::new(1);
            }
            cow.planned_dry_date = Some(dry);
        }
    }

    fn tick_pregnant(&mut self, cow: &mut Animal) {
        if let Some(planned_dry) = cow.planned_dry_date
            && self.today >= planned_dry
        {
            cow.status = AnimalStatus::Dry;
            cow.dryoff_date = Some(self.today);
            cow.days_in_status = 0;
            self.tally(|t| t.dryoffs += 1);
        }
    }

    fn tick_dry(&mut self, cow: &mut Animal, newborns: &mut Vec<Animal>) {
        if let Some(calving) = cow.planned_calving_date
            && self.today >= calving
        {
            self.do_calving(cow, newborns);
        }
    }

    fn do_calving(&mut self, cow: &mut Animal, newborns: &mut Vec<Animal>) {
        self.tally(|t| t.calvings += 1);
        if self.rng.random::<f64>() < self.cfg.heifer_birth_prob {
            self.next_id += 1;
            newborns.push(Animal::heifer(AnimalId(self.next_id), self.today));
        }
        cow.reset_for_new_lactation(self.today);
    }

    fn cull(&mut self, cow: &mut Animal) {
        cow.status = AnimalStatus::Archived;
        cow.archive_date = Some(self.today);
        self.tally(|t| t.culls += 1);
        self.purchase_policy.on_removed(1);
    }

    // ============================================================================================
    // Purchases and introductions
    // ============================================================================================

    fn buy_pregnant_heifers(&mut self, count: u32, expected_calving: Option<NaiveDate>) {
        if count == 0 {
            return;
        }
        self.tally(|t| t.purchases_in += count);
        for _ in 0..count {
            let calving = match expected_calving {
                Some(calving) => calving,
                None => {
                    let days = self.rng.random_range(
                        self.cfg.purchased_days_to_calving_lo
                            ..=self.cfg.purchased_days_to_calving_hi.max(self.cfg.purchased_days_to_calving_lo),
                    );
                    self.today + Days::new(days as u64)
                }
            };
            let cow = self.spawn_pregnant_heifer(calving);
            self.herd.push(cow);
            self.purchase_policy.on_added(1);
        }
    }

    fn introduce_pregnant_heifers(&mut self, expected_calvings: &[NaiveDate]) {
        if expected_calvings.is_empty() {
            return;
        }
        self.tally(|t| t.heifer_intros += expected_calvings.len() as u32);
        for &calving in expected_calvings {
            let cow = self.spawn_pregnant_heifer(calving);
            self.herd.push(cow);
            self.purchase_policy.on_added(1);
        }
    }

    /// Creates an incoming pregnant heifer; conception is back-derived from
    /// the calving date and birth from a first-insemination age sample.
    fn spawn_pregnant_heifer(&mut self, calving: NaiveDate) -> Animal {
        let gestation = self.cfg.sample_gestation_days(&mut self.rng);
        let conception = calving - Days::new(gestation as u64);
        let age_at_insem = self
            .cfg
            .samplers
            .age_first_insem
            .sample(&mut self.rng)
            .max(self.cfg.min_first_insem_age_days);
        let birth = conception - Days::new(age_at_insem as u64);

        self.next_id += 1;
        let mut cow = Animal::heifer(AnimalId(self.next_id), birth);
        cow.status = AnimalStatus::PregnantHeifer;
        cow.conception_date = Some(conception);
        cow.planned_calving_date = Some(calving);
        cow
    }

    fn apply_replacement_policy(&mut self) {
        if !self.replacement.enabled {
            return;
        }
        let milking = self.herd.iter().filter(|a| a.is_milking()).count() as u32;
        let target = self.replacement.target_first_calvings(milking);
        if target == 0 {
            return;
        }

        let span_days = 30 * self.replacement.lookahead_months;
        let lookahead_end = self.today + Days::new(span_days as u64);
        let scheduled = self
            .herd
            .iter()
            .filter(|a| {
                a.is_alive()
                    && a.lactation_no == 0
                    && a.planned_calving_date
                        .map(|c| c > self.today && c <= lookahead_end)
                        .unwrap_or(false)
            })
            .count() as u32;

        let deficit = target.saturating_sub(scheduled);
        if deficit == 0 {
            return;
        }

        let expected_calvings: Vec<NaiveDate> = (0..deficit)
            .map(|_| self.today + Days::new(self.rng.random_range(30..=span_days.max(30)) as u64))
            .collect();
        self.events.push(
            self.today,
            EventKind::HeiferIntro,
            None,
            Some(EventPayload::HeiferIntro { expected_calvings }),
        );
    }

    // ============================================================================================
    // Recording
    // ============================================================================================

    fn record_metrics(&mut self) {
        let mut milking = 0u32;
        let mut dry = 0u32;
        let mut heifers = 0u32;
        let mut pregnant_heifers = 0u32;
        let mut dim_sum = 0u64;

        for cow in &self.herd {
            match cow.status.bucket() {
                Some(HerdBucket::Milking) => {
                    milking += 1;
                    dim_sum += cow.days_in_milk as u64;
                }
                Some(HerdBucket::Dry) => dry += 1,
                Some(HerdBucket::Heifer) => heifers += 1,
                Some(HerdBucket::PregnantHeifer) => pregnant_heifers += 1,
                None => {}
            }
        }

        let avg_days_in_milk = if milking > 0 {
            dim_sum as f64 / milking as f64
        } else {
            0.0
        };

        let events = match self.cadence {
            RecordCadence::Daily => self.day_tally,
            RecordCadence::MonthStart => self.period_tally,
        };

        self.history.push(MetricsRecord {
            snapshot: DailySnapshot {
                date: self.today,
                milking,
                dry,
                heifers,
                pregnant_heifers,
                avg_days_in_milk,
            },
            events,
        });

        if matches!(self.cadence, RecordCadence::MonthStart) {
            self.period_tally = EventTally::default();
        }
    }

    fn tally<F: Fn(&mut EventTally)>(&mut self, bump: F) {
        bump(&mut self.day_tally);
        bump(&mut self.period_tally);
    }
}

fn projected_milking(cow: &Animal, future: NaiveDate) -> bool {
    if !cow.is_alive() {
        return false;
    }
    if let Some(calving) = cow.planned_calving_date
        && future >= calving
    {
        return true;
    }
    if let Some(dry) = cow.planned_dry_date
        && future >= dry
    {
        return false;
    }
    cow.status.is_milking()
}

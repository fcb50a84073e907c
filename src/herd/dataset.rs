use std::collections::BTreeMap;
use std::io::Read;

use chrono::{Days, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::herd::animal::{Animal, AnimalId, AnimalStatus};
use crate::herd::{DRYOFF_RULE_DAYS, GESTATION_RULE_DAYS};

pub const COL_ANIMAL_ID: &str = "animal_id";
pub const COL_BIRTH_DATE: &str = "birth_date";
pub const COL_STATUS: &str = "status";
pub const COL_LACTATION: &str = "lactation";
pub const COL_ARCHIVE_DATE: &str = "archive_date";
pub const COL_LAST_CALVING_DATE: &str = "last_calving_date";
pub const COL_INSEM_DATE: &str = "insem_date";
pub const COL_SUCCESS_INSEM_DATE: &str = "success_insem_date";
pub const COL_DRYOFF_DATE: &str = "dryoff_date";
pub const COL_EXPECTED_DRYOFF_DATE: &str = "expected_dryoff_date";
pub const COL_EXPECTED_CALVING_DATE: &str = "expected_calving_date";
pub const COL_DAYS_IN_MILK: &str = "days_in_milk";

const REQUIRED_COLUMNS: [&str; 4] = [COL_ANIMAL_ID, COL_BIRTH_DATE, COL_STATUS, COL_LACTATION];

/// One parsed dataset row. Optional columns drive richer initial state; the
/// four required ones are enough for a bare head-count forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub animal_id: u64,
    pub birth_date: NaiveDate,
    pub status: String,
    pub lactation: u32,
    pub archive_date: Option<NaiveDate>,
    pub last_calving_date: Option<NaiveDate>,
    pub insem_date: Option<NaiveDate>,
    pub success_insem_date: Option<NaiveDate>,
    pub dryoff_date: Option<NaiveDate>,
    pub expected_dryoff_date: Option<NaiveDate>,
    pub expected_calving_date: Option<NaiveDate>,
    pub days_in_milk: Option<u32>,
}

/// A parsed herd snapshot.
///
/// Expected shape: comma-separated, ISO dates (`%Y-%m-%d`), one row per
/// animal, headers by logical column name (`animal_id`, `birth_date`, ...).
/// Unparseable optional cells degrade to absent; unparseable required cells
/// reject the row with its line number.
#[derive(Debug, Clone, Default)]
pub struct HerdDataset {
    rows: Vec<DatasetRow>,
}

impl HerdDataset {
    pub fn from_rows(rows: Vec<DatasetRow>) -> Self {
        Self { rows }
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, DataError> {
        Self::from_csv_reader(bytes)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

        let headers = rdr.headers()?.clone();
        let idx = |name: &str| headers.iter().position(|h| h == name);
        for required in REQUIRED_COLUMNS {
            if idx(required).is_none() {
                return Err(DataError::MissingColumn(required.to_string()));
            }
        }
        let columns = ColumnIndex {
            animal_id: idx(COL_ANIMAL_ID).expect("checked above"),
            birth_date: idx(COL_BIRTH_DATE).expect("checked above"),
            status: idx(COL_STATUS).expect("checked above"),
            lactation: idx(COL_LACTATION).expect("checked above"),
            archive_date: idx(COL_ARCHIVE_DATE),
            last_calving_date: idx(COL_LAST_CALVING_DATE),
            insem_date: idx(COL_INSEM_DATE),
            success_insem_date: idx(COL_SUCCESS_INSEM_DATE),
            dryoff_date: idx(COL_DRYOFF_DATE),
            expected_dryoff_date: idx(COL_EXPECTED_DRYOFF_DATE),
            expected_calving_date: idx(COL_EXPECTED_CALVING_DATE),
            days_in_milk: idx(COL_DAYS_IN_MILK),
        };

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let line = (i + 2) as u64;
            rows.push(columns.parse_row(&record, line)?);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The snapshot's "today": the maximum over *factual* dates only.
    /// Expected dry-off/calving columns are planning fields and excluded, so
    /// the report date cannot drift into the future.
    pub fn report_date(&self) -> Result<NaiveDate, DataError> {
        self.rows
            .iter()
            .flat_map(|r| {
                [
                    Some(r.birth_date),
                    r.archive_date,
                    r.last_calving_date,
                    r.insem_date,
                    r.success_insem_date,
                    r.dryoff_date,
                ]
            })
            .flatten()
            .max()
            .ok_or(DataError::NoFactualDates)
    }

    /// Histogram over the raw status labels, for the upload response.
    pub fn status_histogram(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.status.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Suggested report date: the median of `last_calving + days_in_milk`
    /// over rows carrying both, robust against single outlier rows.
    pub fn suggest_report_date(&self) -> Option<NaiveDate> {
        let mut candidates: Vec<NaiveDate> = self
            .rows
            .iter()
            .filter_map(|r| {
                let start = r.last_calving_date?;
                let dim = r.days_in_milk?;
                start.checked_add_days(Days::new(dim as u64))
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort();
        Some(candidates[candidates.len() / 2])
    }

    /// Builds the initial herd for a simulation run. Animals archived on or
    /// before the report date are left out entirely; everyone else lands in
    /// exactly one status derived from lactation and the date columns.
    pub fn build_initial_herd(&self, report_date: NaiveDate, vwp: u32) -> Vec<Animal> {
        let mut herd = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            if let Some(archive) = row.archive_date
                && archive <= report_date
            {
                continue;
            }
            herd.push(initial_animal(row, report_date, vwp));
        }
        herd
    }
}

struct ColumnIndex {
    animal_id: usize,
    birth_date: usize,
    status: usize,
    lactation: usize,
    archive_date: Option<usize>,
    last_calving_date: Option<usize>,
    insem_date: Option<usize>,
    success_insem_date: Option<usize>,
    dryoff_date: Option<usize>,
    expected_dryoff_date: Option<usize>,
    expected_calving_date: Option<usize>,
    days_in_milk: Option<usize>,
}

impl ColumnIndex {
    fn parse_row(&self, record: &StringRecord, line: u64) -> Result<DatasetRow, DataError> {
        let cell = |i: usize| record.get(i).unwrap_or("").trim();
        let opt_date = |i: Option<usize>| i.and_then(|i| parse_date(cell(i)));
        let opt_u32 = |i: Option<usize>| i.and_then(|i| cell(i).parse::<u32>().ok());

        let animal_id = cell(self.animal_id)
            .parse::<u64>()
            .map_err(|_| DataError::InvalidRow {
                line,
                msg: format!("animal_id '{}' is not an integer", cell(self.animal_id)),
            })?;
        let birth_date = parse_date(cell(self.birth_date)).ok_or(DataError::InvalidRow {
            line,
            msg: format!("birth_date '{}' is not a date", cell(self.birth_date)),
        })?;

        Ok(DatasetRow {
            animal_id,
            birth_date,
            status: cell(self.status).to_string(),
            lactation: cell(self.lactation).parse().unwrap_or(0),
            archive_date: opt_date(self.archive_date),
            last_calving_date: opt_date(self.last_calving_date),
            insem_date: opt_date(self.insem_date),
            success_insem_date: opt_date(self.success_insem_date),
            dryoff_date: opt_date(self.dryoff_date),
            expected_dryoff_date: opt_date(self.expected_dryoff_date),
            expected_calving_date: opt_date(self.expected_calving_date),
            days_in_milk: opt_u32(self.days_in_milk),
        })
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn initial_animal(row: &DatasetRow, report_date: NaiveDate, vwp: u32) -> Animal {
    let mut a = Animal::heifer(AnimalId(row.animal_id), row.birth_date);
    a.lactation_no = row.lactation;
    a.last_calving_date = row.last_calving_date;
    a.archive_date = row.archive_date;

    let days_since = |d: NaiveDate| (report_date - d).num_days().max(0) as u32;

    if row.lactation == 0 {
        // Heifer side: pregnant iff the ruled calving is still ahead.
        if let Some(success) = row.success_insem_date {
            let ruled_calving = success + Days::new(GESTATION_RULE_DAYS);
            if ruled_calving > report_date {
                a.status = AnimalStatus::PregnantHeifer;
                a.conception_date = Some(success);
                a.planned_calving_date = Some(
                    row.expected_calving_date
                        .filter(|&c| c > report_date)
                        .unwrap_or(ruled_calving),
                );
                a.days_in_status = days_since(success);
            } else {
                a.days_in_status = days_since(row.birth_date);
            }
        } else {
            a.days_in_status = days_since(row.birth_date);
        }
        return a;
    }

    // Cow side. Days-in-milk anchors on the dataset field when present.
    a.days_in_milk = row
        .days_in_milk
        .or_else(|| row.last_calving_date.map(days_since))
        .unwrap_or(0);

    if let Some(dryoff) = row.dryoff_date.filter(|&d| d <= report_date) {
        a.status = AnimalStatus::Dry;
        a.dryoff_date = Some(dryoff);
        a.days_in_status = days_since(dryoff);
        // A dry cow without a recorded success insemination is inferred to
        // have conceived dryoff - 220 days before.
        let success = row
            .success_insem_date
            .unwrap_or(dryoff - Days::new(DRYOFF_RULE_DAYS));
        a.conception_date = Some(success);
        let ruled_calving = success + Days::new(GESTATION_RULE_DAYS);
        a.planned_calving_date = Some(
            row.expected_calving_date
                .filter(|&c| c > report_date)
                .unwrap_or(ruled_calving),
        );
        return a;
    }

    let pregnant = row
        .success_insem_date
        .map(|s| s + Days::new(GESTATION_RULE_DAYS) > report_date)
        .unwrap_or(false);

    if pregnant {
        let success = row.success_insem_date.expect("pregnant implies success date");
        a.status = AnimalStatus::Pregnant;
        a.conception_date = Some(success);
        a.days_in_status = days_since(success);
        let calving = row
            .expected_calving_date
            .filter(|&c| c > report_date)
            .unwrap_or(success + Days::new(GESTATION_RULE_DAYS));
        a.planned_calving_date = Some(calving);
        // Overdue dry-offs dry off on the first simulated day.
        let ruled_dry = row
            .dryoff_date
            .filter(|&d| d > report_date)
            .or(row.expected_dryoff_date.filter(|&d| d > report_date))
            .unwrap_or(success + Days::new(DRYOFF_RULE_DAYS));
        let next_day = report_date + Days::new(1);
        let day_before_calving = calving - Days::new(1);
        a.planned_dry_date = Some(ruled_dry.clamp(next_day, day_before_calving.max(next_day)));
        return a;
    }

    match row.last_calving_date {
        Some(calving) => {
            let days_after = days_since(calving);
            if days_after < vwp {
                a.status = AnimalStatus::Fresh;
                a.days_in_status = days_after;
            } else {
                a.status = AnimalStatus::ReadyForBreeding;
                a.days_in_status = days_after - vwp;
            }
        }
        None => {
            a.status = AnimalStatus::Fresh;
            a.days_in_status = 0;
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const CSV: &str = "\
animal_id,birth_date,status,lactation,archive_date,last_calving_date,success_insem_date,dryoff_date,expected_dryoff_date,expected_calving_date,days_in_milk
1,2023-01-10,heifer,0,,,,,,,
2,2022-06-01,pregnant_heifer,0,,,2025-10-01,,,,
3,2020-02-15,milking,2,,2025-11-20,,,,,92
4,2019-08-03,dry,3,,2025-03-01,,2025-12-15,,,0
5,2018-01-01,sold,4,2025-06-30,2024-09-10,,,,,
";

    fn dataset() -> HerdDataset {
        HerdDataset::from_csv_bytes(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let err = HerdDataset::from_csv_bytes(b"animal_id,birth_date,status\n1,2023-01-01,ok\n")
            .unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(c) if c == COL_LACTATION));
    }

    #[test]
    fn report_date_uses_factual_dates_only() {
        // Max factual date is the dry-off on 2025-12-15; expected columns are
        // empty here, and archive (2025-06-30) does not win.
        assert_eq!(dataset().report_date().unwrap(), d(2025, 12, 15));
    }

    #[test]
    fn status_histogram_counts_raw_labels() {
        let hist = dataset().status_histogram();
        assert_eq!(hist.get("heifer"), Some(&1));
        assert_eq!(hist.get("sold"), Some(&1));
        assert_eq!(hist.len(), 5);
    }

    #[test]
    fn archived_rows_never_enter_the_herd() {
        let herd = dataset().build_initial_herd(d(2025, 12, 15), 50);
        assert_eq!(herd.len(), 4);
        assert!(herd.iter().all(|a| a.id != AnimalId(5)));
    }

    #[test]
    fn statuses_derive_from_lactation_and_dates() {
        let report = d(2025, 12, 15);
        let herd = dataset().build_initial_herd(report, 50);
        let by_id = |id: u64| herd.iter().find(|a| a.id == AnimalId(id)).unwrap();

        assert_eq!(by_id(1).status, AnimalStatus::Heifer);

        let ph = by_id(2);
        assert_eq!(ph.status, AnimalStatus::PregnantHeifer);
        assert_eq!(ph.planned_calving_date, Some(d(2025, 10, 1) + Days::new(280)));

        // Lactating, no success insemination, 25 days since calving -> fresh.
        let fresh = by_id(3);
        assert_eq!(fresh.status, AnimalStatus::Fresh);
        assert_eq!(fresh.days_in_milk, 92);

        let dry = by_id(4);
        assert_eq!(dry.status, AnimalStatus::Dry);
        // Inferred conception = dry-off - 220 days.
        assert_eq!(dry.conception_date, Some(d(2025, 12, 15) - Days::new(220)));
        assert_eq!(
            dry.planned_calving_date,
            Some(d(2025, 12, 15) - Days::new(220) + Days::new(280))
        );
    }

    #[test]
    fn ready_for_breeding_after_the_waiting_period() {
        let csv = "\
animal_id,birth_date,status,lactation,last_calving_date
9,2020-01-01,milking,1,2025-09-01
";
        let ds = HerdDataset::from_csv_bytes(csv.as_bytes()).unwrap();
        let herd = ds.build_initial_herd(d(2025, 12, 15), 50);
        assert_eq!(herd[0].status, AnimalStatus::ReadyForBreeding);
        assert_eq!(herd[0].days_in_status, (d(2025, 12, 15) - d(2025, 9, 1)).num_days() as u32 - 50);
    }

    #[test]
    fn suggested_report_date_is_the_median_candidate() {
        let csv = "\
animal_id,birth_date,status,lactation,last_calving_date,days_in_milk
1,2020-01-01,milking,1,2025-11-01,30
2,2020-01-01,milking,1,2025-11-01,40
3,2020-01-01,milking,1,2025-11-01,200
";
        let ds = HerdDataset::from_csv_bytes(csv.as_bytes()).unwrap();
        assert_eq!(ds.suggest_report_date(), Some(d(2025, 12, 11)));
    }
}

use csv::Writer;
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::error::ExportError;
use crate::forecast::result::{ForecastOutput, ForecastPoint};

const SERIES_COLUMNS: [&str; 6] = [
    "date",
    "milking_count",
    "dry_count",
    "heifer_count",
    "pregnant_heifer_count",
    "avg_days_in_milk_p50",
];
const BAND_COLUMNS: [&str; 2] = ["avg_days_in_milk_p10", "avg_days_in_milk_p90"];
const EVENT_COLUMNS: [&str; 6] = [
    "month",
    "calvings",
    "dryoffs",
    "culls",
    "purchases_in",
    "heifer_intros",
];
const FUTURE_COLUMNS: [&str; 6] = [
    "date",
    "milking_count",
    "dry_count",
    "heifer_count",
    "pregnant_heifer_count",
    "avg_days_in_milk",
];

/// UTF-8 csv export with three labeled sections separated by blank lines:
/// `[SERIES]`, `[EVENTS]` and `[FUTURE]`. Band columns appear only when the
/// result carries confidence bands.
pub fn forecast_csv(output: &ForecastOutput) -> Result<String, ExportError> {
    let has_bands = output.series_p10.is_some() && output.series_p90.is_some();

    let mut series = Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = SERIES_COLUMNS.to_vec();
    if has_bands {
        header.extend(BAND_COLUMNS);
    }
    series.write_record(&header)?;
    for (i, point) in output.series_p50.points.iter().enumerate() {
        let mut record = vec![
            point.date.to_string(),
            point.milking_count.to_string(),
            point.dry_count.to_string(),
            point.heifer_count.to_string(),
            point.pregnant_heifer_count.to_string(),
            point.avg_days_in_milk.to_string(),
        ];
        if has_bands {
            record.push(band_dim(&output.series_p10, i));
            record.push(band_dim(&output.series_p90, i));
        }
        series.write_record(&record)?;
    }

    let mut events = Writer::from_writer(Vec::new());
    events.write_record(EVENT_COLUMNS)?;
    for month in &output.events {
        events.write_record([
            month.month.to_string(),
            month.calvings.to_string(),
            month.dryoffs.to_string(),
            month.culls.to_string(),
            month.purchases_in.to_string(),
            month.heifer_intros.to_string(),
        ])?;
    }

    let mut future = Writer::from_writer(Vec::new());
    future.write_record(FUTURE_COLUMNS)?;
    if let Some(point) = &output.future_point {
        future.write_record([
            point.date.to_string(),
            point.milking_count.to_string(),
            point.dry_count.to_string(),
            point.heifer_count.to_string(),
            point.pregnant_heifer_count.to_string(),
            point.avg_days_in_milk.to_string(),
        ])?;
    }

    let mut out = String::from("[SERIES]\n");
    out.push_str(&section(series)?);
    out.push_str("\n[EVENTS]\n");
    out.push_str(&section(events)?);
    out.push_str("\n[FUTURE]\n");
    out.push_str(&section(future)?);
    Ok(out)
}

fn section(writer: Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}

fn band_dim(series: &Option<crate::forecast::result::ForecastSeries>, idx: usize) -> String {
    series
        .as_ref()
        .and_then(|s| s.points.get(idx))
        .map(|p| p.avg_days_in_milk.to_string())
        .unwrap_or_default()
}

/// Xlsx export: `Series`, `Events` and `Future` sheets with the same content
/// as the csv sections.
pub fn forecast_xlsx(output: &ForecastOutput) -> Result<Vec<u8>, ExportError> {
    let has_bands = output.series_p10.is_some() && output.series_p90.is_some();
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Series")?;
    let mut header: Vec<&str> = SERIES_COLUMNS.to_vec();
    if has_bands {
        header.extend(BAND_COLUMNS);
    }
    write_header(sheet, &header)?;
    for (i, point) in output.series_p50.points.iter().enumerate() {
        let row = (i + 1) as u32;
        write_point(sheet, row, point, point.avg_days_in_milk)?;
        if has_bands {
            if let Some(p10) = output.series_p10.as_ref().and_then(|s| s.points.get(i)) {
                sheet.write_number(row, 6, p10.avg_days_in_milk)?;
            }
            if let Some(p90) = output.series_p90.as_ref().and_then(|s| s.points.get(i)) {
                sheet.write_number(row, 7, p90.avg_days_in_milk)?;
            }
        }
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Events")?;
    write_header(sheet, &EVENT_COLUMNS)?;
    for (i, month) in output.events.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, month.month.to_string())?;
        sheet.write_number(row, 1, month.calvings as f64)?;
        sheet.write_number(row, 2, month.dryoffs as f64)?;
        sheet.write_number(row, 3, month.culls as f64)?;
        sheet.write_number(row, 4, month.purchases_in as f64)?;
        sheet.write_number(row, 5, month.heifer_intros as f64)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Future")?;
    write_header(sheet, &FUTURE_COLUMNS)?;
    if let Some(point) = &output.future_point {
        write_point(sheet, 1, point, point.avg_days_in_milk)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn write_header(sheet: &mut Worksheet, columns: &[&str]) -> Result<(), ExportError> {
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }
    Ok(())
}

fn write_point(
    sheet: &mut Worksheet,
    row: u32,
    point: &ForecastPoint,
    dim: f64,
) -> Result<(), ExportError> {
    sheet.write_string(row, 0, point.date.to_string())?;
    sheet.write_number(row, 1, point.milking_count as f64)?;
    sheet.write_number(row, 2, point.dry_count as f64)?;
    sheet.write_number(row, 3, point.heifer_count as f64)?;
    sheet.write_number(row, 4, point.pregnant_heifer_count as f64)?;
    sheet.write_number(row, 5, dim)?;
    Ok(())
}

//! Station topology loaded once at startup, either from one spreadsheet
//! workbook with a device sheet and a station sheet, or from two CSV files.
//!
//! Device sheet columns: module id, station id, gateway id, device id,
//! value min, value max, current value, status.
//!
//! Station sheet columns: module id, station id, gateway id, device id,
//! longitude, latitude, kind.
//!
//! Row 0 of each sheet is its label row. It is returned like any other row
//! and dropped by the batch builder, which owns the skip.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use calamine::{open_workbook, Reader, Xlsx};
use csv::{ReaderBuilder, Trim};
use tracing::info;

use crate::error::TopologyError;
use crate::models::{DeviceReading, EnrichmentKind, EnrichmentTarget, SimulationMode, StationTags};
use crate::simulation::parse_or_zero;

// ---

const DEVICE_COLUMNS: usize = 8;
const STATION_COLUMNS: usize = 7;

/// One sheet row as trimmed cell text.
type Row = Vec<String>;

pub fn load_devices(path: &Path) -> Result<Vec<DeviceReading>, TopologyError> {
    // ---
    let devices = read_devices(open(path)?)?;
    info!(path = %path.display(), rows = devices.len(), "loaded device topology");
    Ok(devices)
}

pub fn load_stations(path: &Path) -> Result<Vec<EnrichmentTarget>, TopologyError> {
    // ---
    let stations = read_stations(open(path)?)?;
    info!(path = %path.display(), rows = stations.len(), "loaded station topology");
    Ok(stations)
}

/// Load both sheets from one `.xlsx` workbook.
pub fn load_workbook(
    path: &Path,
    device_sheet: &str,
    station_sheet: &str,
) -> Result<(Vec<DeviceReading>, Vec<EnrichmentTarget>), TopologyError> {
    // ---
    let mut workbook: Xlsx<_> = open_workbook(path)?;

    let devices = devices_from_rows(sheet_rows(&mut workbook, device_sheet)?)?;
    let stations = stations_from_rows(sheet_rows(&mut workbook, station_sheet)?)?;

    info!(
        path = %path.display(),
        device_sheet,
        station_sheet,
        devices = devices.len(),
        stations = stations.len(),
        "loaded topology workbook"
    );
    Ok((devices, stations))
}

pub fn read_devices<R: Read>(reader: R) -> Result<Vec<DeviceReading>, TopologyError> {
    devices_from_rows(csv_rows(reader)?)
}

pub fn read_stations<R: Read>(reader: R) -> Result<Vec<EnrichmentTarget>, TopologyError> {
    stations_from_rows(csv_rows(reader)?)
}

fn devices_from_rows(rows: Vec<Row>) -> Result<Vec<DeviceReading>, TopologyError> {
    // ---
    let mut devices = Vec::with_capacity(rows.len());

    for (row, cells) in rows.into_iter().enumerate() {
        let cells = checked(row, cells, DEVICE_COLUMNS)?;

        // The label row carries no numbers; don't warn about it.
        let number = |idx: usize, column: &str| {
            if row == 0 {
                0.0
            } else {
                parse_or_zero(&cells[idx], column)
            }
        };

        devices.push(DeviceReading {
            tags: tags(&cells),
            value_min: number(4, "value_min"),
            value_max: number(5, "value_max"),
            current_value: number(6, "current_value"),
            mode: SimulationMode::from_status(&cells[7]),
        });
    }

    Ok(devices)
}

fn stations_from_rows(rows: Vec<Row>) -> Result<Vec<EnrichmentTarget>, TopologyError> {
    // ---
    let mut stations = Vec::with_capacity(rows.len());

    for (row, cells) in rows.into_iter().enumerate() {
        let cells = checked(row, cells, STATION_COLUMNS)?;

        stations.push(EnrichmentTarget {
            tags: tags(&cells),
            longitude: cells[4].clone(),
            latitude: cells[5].clone(),
            kind: EnrichmentKind::parse(&cells[6]),
        });
    }

    Ok(stations)
}

fn open(path: &Path) -> Result<File, TopologyError> {
    File::open(path).map_err(|source| TopologyError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn csv_rows<R: Read>(reader: R) -> Result<Vec<Row>, TopologyError> {
    // ---
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Read a worksheet as text rows anchored at column A.
///
/// Numeric cells come back in their shortest form (`15`, `0.5`), so they
/// parse the same way as CSV text.
fn sheet_rows<R>(workbook: &mut Xlsx<R>, sheet: &str) -> Result<Vec<Row>, TopologyError>
where
    R: std::io::Read + std::io::Seek,
{
    // ---
    let range = workbook.worksheet_range(sheet)?;
    let leading = range.start().map_or(0, |(_, col)| col as usize);

    Ok(range
        .rows()
        .map(|cells| {
            std::iter::repeat(String::new())
                .take(leading)
                .chain(cells.iter().map(|cell| cell.to_string().trim().to_string()))
                .collect()
        })
        .collect())
}

fn checked(row: usize, cells: Row, expected: usize) -> Result<Row, TopologyError> {
    // ---
    if cells.len() < expected {
        return Err(TopologyError::ShortRow {
            row,
            found: cells.len(),
            expected,
        });
    }
    Ok(cells)
}

fn tags(cells: &[String]) -> StationTags {
    StationTags {
        device_module_id: cells[0].clone(),
        station_id: cells[1].clone(),
        station_gateway_id: cells[2].clone(),
        device_id: cells[3].clone(),
    }
}

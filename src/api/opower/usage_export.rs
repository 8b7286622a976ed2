// The usage export is a zip archive with one CSV file.  The CSV starts with a
// few lines of account information before the real header, e.g.
//
// Name,JANE DOE
// Address,"123 MAIN ST, SAN FRANCISCO CA 94110"
// Account Number,1234567890
// Service,Service 1
//
// TYPE,DATE,START TIME,END TIME,USAGE,UNITS,COST,NOTES
// Electric usage,2021-03-01,00:00,00:14,0.12,kWh,$0.03,

use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::SyncError;

pub const FILE_PREFIX: &str = "pge_electric_interval_data_";
pub const PREAMBLE_LINES: usize = 5;
pub const USAGE_COLUMN: &str = "USAGE";

/// Extract the interval readings from the zipped export, in file order.
pub fn read_usage_export(bytes: &[u8]) -> Result<Vec<f64>, SyncError> {
    let contents = extract_csv(bytes)?;
    parse_usage_csv(&contents)
}

/// Return the content of the single interval data file in the archive.
pub fn extract_csv(bytes: &[u8]) -> Result<Vec<u8>, SyncError> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))?;
    let names: Vec<String> = zip
        .file_names()
        .filter(|name| name.starts_with(FILE_PREFIX))
        .map(|name| name.to_string())
        .collect();
    let name = match names.as_slice() {
        [name] => name,
        [] => {
            return Err(SyncError::Export(format!(
                "no {}* file in archive",
                FILE_PREFIX
            )))
        }
        _ => {
            return Err(SyncError::Export(format!(
                "expected one {}* file, found {:?}",
                FILE_PREFIX, names
            )))
        }
    };
    let mut file = zip.by_name(name)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Skip the preamble and read the usage column.
pub fn parse_usage_csv(contents: &[u8]) -> Result<Vec<f64>, SyncError> {
    let mut parts = contents.splitn(PREAMBLE_LINES + 1, |b| *b == b'\n');
    let data = parts.nth(PREAMBLE_LINES).ok_or_else(|| {
        SyncError::Export(format!(
            "expected {} preamble lines before the header",
            PREAMBLE_LINES
        ))
    })?;

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);
    let idx = rdr
        .headers()?
        .iter()
        .position(|h| h == USAGE_COLUMN)
        .ok_or_else(|| SyncError::Export(format!("no {} column in header", USAGE_COLUMN)))?;

    let mut readings = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let value = record.get(idx).ok_or_else(|| {
            SyncError::Export(format!("missing {} on line {:?}", USAGE_COLUMN, record.position()))
        })?;
        let value = value.parse::<f64>().map_err(|e| {
            SyncError::Export(format!("can't parse {:?} as usage: {}", value, e))
        })?;
        readings.push(value);
    }
    Ok(readings)
}

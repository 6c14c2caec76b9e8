// 📥 CSV Import - bulk load of vehicles and their owners
//
// Columns (header row required):
//   plate,model,year,customer_ref,customer_name,customer_phone,customer_address,subscriber,monthly_fee
//
// Bad rows are reported and skipped; they never abort the import.
// `customer_ref` is informational only: customers are matched by name + phone digits.

use crate::db::{record_event, Event};
use crate::entities::customer::{normalize_phone, MAX_MONTHLY_FEE};
use crate::entities::{
    create_customer, create_vehicle, find_customer_by_name_phone, find_vehicle_by_plate,
    CustomerInput, VehicleInput,
};
use crate::plate::{is_valid_plate, sanitize_plate};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

pub const EXPECTED_COLUMNS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRowError {
    /// 1-based line in the source file (header is line 1)
    pub line: u64,
    pub reason: String,
    pub raw: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Non-blank data rows seen
    pub processed: usize,
    /// Vehicles created
    pub inserted: usize,
    pub errors: Vec<ImportRowError>,
    /// Fingerprint of the imported bytes
    pub source_sha256: String,
}

/// One parsed, validated row ready to write.
struct ImportRow {
    plate: String,
    model: Option<String>,
    year: Option<i32>,
    customer: CustomerInput,
}

pub fn import_csv_path(conn: &Connection, path: &Path) -> Result<ImportReport> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    import_csv(conn, &bytes)
}

pub fn import_csv(conn: &Connection, bytes: &[u8]) -> Result<ImportReport> {
    let mut report = ImportReport {
        source_sha256: format!("{:x}", Sha256::digest(bytes)),
        ..Default::default()
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                report.processed += 1;
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                report.errors.push(ImportRowError {
                    line,
                    reason: format!("unreadable row: {e}"),
                    raw: String::new(),
                });
                continue;
            }
        }
        if record.iter().all(str::is_empty) {
            continue;
        }
        report.processed += 1;

        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let start = record.position().map(|p| p.byte()).unwrap_or(0);
        let raw = source_text(bytes, start, reader.position().byte());

        let row = match parse_row(&record) {
            Ok(row) => row,
            Err(reason) => {
                report.errors.push(ImportRowError { line, reason, raw });
                continue;
            }
        };

        match write_row(conn, row)? {
            Ok(()) => report.inserted += 1,
            Err(reason) => report.errors.push(ImportRowError { line, reason, raw }),
        }
    }

    tracing::info!(
        processed = report.processed,
        inserted = report.inserted,
        errors = report.errors.len(),
        sha256 = %report.source_sha256,
        "csv import finished"
    );
    record_event(
        conn,
        Event::new(
            "csv_imported",
            "import",
            &report.source_sha256,
            serde_json::json!({
                "processed": report.processed,
                "inserted": report.inserted,
                "errors": report.errors.len(),
            }),
            "import",
        ),
    );

    Ok(report)
}

fn parse_row(record: &StringRecord) -> std::result::Result<ImportRow, String> {
    if record.len() < EXPECTED_COLUMNS {
        return Err(format!(
            "not enough columns (expected {EXPECTED_COLUMNS}, found {})",
            record.len()
        ));
    }
    let col = |i: usize| record.get(i).unwrap_or("");
    let non_empty = |i: usize| Some(col(i)).filter(|s| !s.is_empty()).map(str::to_string);

    let plate_raw = col(0);
    if plate_raw.is_empty() {
        return Err("missing plate".to_string());
    }
    let plate = sanitize_plate(plate_raw);
    if !is_valid_plate(&plate) {
        return Err(format!("invalid plate '{plate_raw}'"));
    }

    let is_subscriber = parse_flag(col(7))
        .ok_or_else(|| format!("invalid subscriber flag '{}' (use true/false)", col(7)))?;
    let monthly_fee = match col(8) {
        "" => None,
        fee => Some(parse_fee(fee).ok_or_else(|| format!("invalid monthly fee '{fee}'"))?),
    };

    Ok(ImportRow {
        plate,
        model: non_empty(1),
        year: col(2).parse().ok(),
        customer: CustomerInput {
            name: col(4).to_string(),
            phone: normalize_phone(Some(col(5))),
            address: non_empty(6),
            is_subscriber,
            monthly_fee,
        },
    })
}

/// Outer error: store failure, aborts the import. Inner error: row rejected.
fn write_row(conn: &Connection, row: ImportRow) -> Result<std::result::Result<(), String>> {
    if find_vehicle_by_plate(conn, &row.plate)?.is_some() {
        return Ok(Err(format!("duplicate plate '{}'", row.plate)));
    }

    let existing = find_customer_by_name_phone(conn, &row.customer.name, row.customer.phone.as_deref())?;
    let customer_id = match existing {
        Some(customer) => customer.id,
        None => match create_customer(conn, &row.customer) {
            Ok(customer) => customer.id,
            Err(e) if e.is_client_error() => return Ok(Err(format!("customer rejected: {e}"))),
            Err(e) => return Err(e.into()),
        },
    };

    let input = VehicleInput {
        plate: row.plate,
        model: row.model,
        year: row.year,
        customer_id,
    };
    match create_vehicle(conn, &input) {
        Ok(_) => Ok(Ok(())),
        Err(e) if e.is_client_error() => Ok(Err(format!("vehicle rejected: {e}"))),
        Err(e) => Err(e.into()),
    }
}

/// The record exactly as it appears in the file, without its line terminator.
fn source_text(bytes: &[u8], start: u64, end: u64) -> String {
    let start = usize::try_from(start).unwrap_or(bytes.len()).min(bytes.len());
    let end = usize::try_from(end).unwrap_or(bytes.len()).clamp(start, bytes.len());
    String::from_utf8_lossy(&bytes[start..end])
        .trim_matches(|c| c == '\r' || c == '\n')
        .to_string()
}

/// Blank counts as "not a subscriber".
fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "false" => Some(false),
        "true" => Some(true),
        _ => None,
    }
}

/// Accepts `150.00` and `150,00`, up to [`MAX_MONTHLY_FEE`].
fn parse_fee(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_str(&value.replace(',', ".")))
        .ok()
        .filter(|fee| *fee <= MAX_MONTHLY_FEE)
}

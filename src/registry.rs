// src/registry.rs

use calamine::{open_workbook, Data, DataType, Reader, Xlsx};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const AGREEMENTS_SHEET: &str = "Service Agreements";
const RATES_SHEET: &str = "Vendors Rates";

/// Column index of the rate amount on the rates sheet.
const RATE_AMOUNT_COL: usize = 2;
/// Columns scanned for a billing-cadence keyword on the rates sheet.
const RATE_KEYWORD_COLS: std::ops::Range<usize> = 1..10;

/// Billing cadence for a vendor's agreed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateType {
    Annual,
    Monthly,
    Weekly,
    Hourly,
    Biannual,
    AsNeeded,
    Variable,
    Unknown,
}

impl RateType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "annual" => Some(Self::Annual),
            "monthly" => Some(Self::Monthly),
            "weekly" => Some(Self::Weekly),
            "hourly" => Some(Self::Hourly),
            "biannual" => Some(Self::Biannual),
            "as needed" => Some(Self::AsNeeded),
            "variable" => Some(Self::Variable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Monthly => "monthly",
            Self::Weekly => "weekly",
            Self::Hourly => "hourly",
            Self::Biannual => "biannual",
            Self::AsNeeded => "as needed",
            Self::Variable => "variable",
            Self::Unknown => "unknown",
        }
    }

    /// Cadences with no fixed amount to compare against.
    pub fn is_variable(&self) -> bool {
        matches!(self, Self::AsNeeded | Self::Variable)
    }
}

/// One vendor's agreement terms, merged from both workbook sheets.
#[derive(Debug, Clone, Default)]
pub struct VendorRecord {
    pub name: String,
    pub contract_start: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
    pub current_po: Option<String>,
    pub po_start: Option<NaiveDate>,
    pub po_end: Option<NaiveDate>,
    pub rate_type: Option<RateType>,
    pub rate_amount: Option<f64>,
    pub admin: Option<String>,
    pub main_contact: Option<String>,
    pub director: Option<String>,
}

impl VendorRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Immutable vendor index. Built once at startup and shared by reference;
/// there is no writer after load, so concurrent readers need no lock.
#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<String, VendorRecord>,
}

impl Registry {
    /// Load the registry from an xlsx workbook. Never fails hard: a missing
    /// file, sheet, or column degrades to a looser parse (worst case an empty
    /// registry, which makes every resolution a no-match) and is logged.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut records = BTreeMap::new();

        let mut workbook: Xlsx<_> = match open_workbook(path) {
            Ok(wb) => wb,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not open registry workbook");
                return Self { records };
            }
        };

        match workbook.worksheet_range(AGREEMENTS_SHEET) {
            Ok(range) => {
                if !parse_agreements(range.rows(), &mut records) {
                    warn!(
                        sheet = AGREEMENTS_SHEET,
                        "Vendor column not found, falling back to first sheet"
                    );
                    load_loose(&mut workbook, &mut records);
                }
            }
            Err(e) => {
                warn!(sheet = AGREEMENTS_SHEET, error = %e, "Sheet not readable, falling back to first sheet");
                load_loose(&mut workbook, &mut records);
            }
        }

        match workbook.worksheet_range(RATES_SHEET) {
            Ok(range) => parse_rates(range.rows(), &mut records),
            Err(e) => warn!(sheet = RATES_SHEET, error = %e, "Rates sheet not readable, skipping rate data"),
        }

        let with_rates = records
            .values()
            .filter(|r| r.rate_type.is_some() || r.rate_amount.is_some())
            .count();
        info!(
            vendors = records.len(),
            with_rates,
            path = %path.display(),
            "Registry loaded"
        );
        Self { records }
    }

    /// Build a registry directly from records. Trims names and keeps the
    /// last record per trimmed name, same as a workbook load.
    pub fn from_records(records: impl IntoIterator<Item = VendorRecord>) -> Self {
        let mut map = BTreeMap::new();
        for mut rec in records {
            rec.name = rec.name.trim().to_string();
            if rec.name.is_empty() {
                continue;
            }
            map.insert(rec.name.clone(), rec);
        }
        Self { records: map }
    }

    pub fn get(&self, name: &str) -> Option<&VendorRecord> {
        self.records.get(name.trim())
    }

    /// All canonical vendor names, sorted.
    pub fn vendor_names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn load_loose<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    records: &mut BTreeMap<String, VendorRecord>,
) {
    let Some(first_sheet) = workbook.sheet_names().first().cloned() else {
        warn!("Workbook has no sheets");
        return;
    };
    match workbook.worksheet_range(&first_sheet) {
        Ok(range) => {
            parse_loose(range.rows(), records);
            info!(sheet = %first_sheet, vendors = records.len(), "Loose-parse fallback loaded");
        }
        Err(e) => warn!(sheet = %first_sheet, error = %e, "Loose-parse fallback failed"),
    }
}

/// Parse the agreements sheet: one row per vendor, named columns. Returns
/// false when no `Vendor` column exists so the caller can fall back.
fn parse_agreements<'a>(
    mut rows: impl Iterator<Item = &'a [Data]>,
    records: &mut BTreeMap<String, VendorRecord>,
) -> bool {
    let Some(header) = rows.next() else {
        return false;
    };

    let col = |names: &[&str]| header_index(header, names);
    let Some(vendor_col) = col(&["vendor"]) else {
        return false;
    };
    let admin_col = col(&["admin"]);
    let main_contact_col = col(&["main contact", "main_contact"]);
    let director_col = col(&["asst director / director", "director"]);
    let start_col = col(&["contract start date"]);
    let end_col = col(&["contract end date"]);
    let po_col = col(&["current po"]);
    let po_start_col = col(&["po start"]);
    let po_end_col = col(&["po end"]);

    for row in rows {
        let Some(name) = cell_str(row.get(vendor_col)) else {
            continue;
        };
        let rec = records
            .entry(name.clone())
            .or_insert_with(|| VendorRecord::named(name.as_str()));

        let get = |idx: Option<usize>| idx.and_then(|i| row.get(i));
        if let Some(v) = cell_date(get(start_col)) {
            rec.contract_start = Some(v);
        }
        if let Some(v) = cell_date(get(end_col)) {
            rec.contract_end = Some(v);
        }
        if let Some(v) = cell_str(get(po_col)) {
            rec.current_po = Some(v);
        }
        if let Some(v) = cell_date(get(po_start_col)) {
            rec.po_start = Some(v);
        }
        if let Some(v) = cell_date(get(po_end_col)) {
            rec.po_end = Some(v);
        }
        if let Some(v) = cell_str(get(admin_col)) {
            rec.admin = Some(v);
        }
        if let Some(v) = cell_str(get(main_contact_col)) {
            rec.main_contact = Some(v);
        }
        if let Some(v) = cell_str(get(director_col)) {
            rec.director = Some(v);
        }
    }
    true
}

/// Parse the sparse rates sheet as a fold: a non-empty first cell starts a
/// new vendor block, continuation rows keep contributing to the current
/// vendor. Later rows overwrite rate fields already set (last write wins).
fn parse_rates<'a>(
    rows: impl Iterator<Item = &'a [Data]>,
    records: &mut BTreeMap<String, VendorRecord>,
) {
    let mut current: Option<String> = None;

    for row in rows {
        if let Some(name) = cell_str(row.first()) {
            // Very short first cells are section labels, not vendor names
            if name.len() > 3 {
                records
                    .entry(name.clone())
                    .or_insert_with(|| VendorRecord::named(name.as_str()));
                current = Some(name);
            }
        }

        let Some(ref vendor) = current else {
            continue;
        };
        let Some(rec) = records.get_mut(vendor) else {
            continue;
        };

        if let Some(amount) = cell_float(row.get(RATE_AMOUNT_COL)) {
            rec.rate_amount = Some(amount);
        }
        for i in RATE_KEYWORD_COLS {
            let Some(cell) = row.get(i) else {
                break;
            };
            if let Some(keyword) = cell.get_string().and_then(RateType::from_keyword) {
                rec.rate_type = Some(keyword);
                break;
            }
        }
    }
}

/// Degraded mode: vendor identity only, from a vendor-ish column of the
/// first sheet (or its first column).
fn parse_loose<'a>(
    mut rows: impl Iterator<Item = &'a [Data]>,
    records: &mut BTreeMap<String, VendorRecord>,
) {
    let Some(header) = rows.next() else {
        return;
    };
    let vendor_col = header
        .iter()
        .position(|cell| {
            cell.get_string()
                .map(|s| {
                    let s = s.to_lowercase();
                    s.contains("vendor") || s.contains("supplier")
                })
                .unwrap_or(false)
        })
        .unwrap_or(0);

    for row in rows {
        if let Some(name) = cell_str(row.get(vendor_col)) {
            records
                .entry(name.clone())
                .or_insert_with(|| VendorRecord::named(name.as_str()));
        }
    }
}

/// Case-insensitive header lookup across the accepted spellings of a column.
fn header_index(header: &[Data], names: &[&str]) -> Option<usize> {
    header.iter().position(|cell| {
        cell.get_string()
            .map(|s| {
                let s = s.trim().to_lowercase();
                names.iter().any(|n| s == *n)
            })
            .unwrap_or(false)
    })
}

/// Text content of a cell, trimmed. Numeric cells render as text so PO
/// numbers stored as numbers still compare as strings.
fn cell_str(cell: Option<&Data>) -> Option<String> {
    let s = match cell? {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        _ => return None,
    };
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return None;
    }
    Some(s)
}

fn cell_float(cell: Option<&Data>) -> Option<f64> {
    match cell? {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        _ => None,
    }
}

fn cell_date(cell: Option<&Data>) -> Option<NaiveDate> {
    let cell = cell?;
    if let Some(d) = cell.as_date() {
        return Some(d);
    }
    let s = cell.get_string()?.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

// src/heuristics.rs
//
// Offline fallback: regex-driven extraction instead of the Amplify API.
// Same checks, same routing, same report shape; only the evidence-gathering
// differs. Selected explicitly with --offline.

use crate::checks::{self, CheckOutcome, DateCheck, RateCheck};
use crate::registry::Registry;
use crate::routing;
use crate::validator::{ValidationError, ValidationReport};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::path::Path;
use tracing::info;

/// Dates this old are almost never invoice dates; the patterns also match
/// phone-number fragments and the cutoff filters most of those out.
const MIN_PLAUSIBLE_YEAR: i32 = 2020;

pub fn validate_file(registry: &Registry, path: &Path) -> Result<ValidationReport, ValidationError> {
    let text = crate::validator::extract_file_text(path)?;
    info!(path = %path.display(), chars = text.len(), "Extracted document text (offline)");
    validate_text(registry, &text)
}

pub fn validate_text(registry: &Registry, text: &str) -> Result<ValidationReport, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Extraction(
            "Could not extract text from PDF".to_string(),
        ));
    }

    let Some(vendor) = match_vendor(registry, text) else {
        info!("No vendor match found (offline)");
        return Ok(ValidationReport::no_vendor("heuristics"));
    };
    info!(vendor = %vendor, "Vendor resolved (offline)");
    let record = registry
        .get(&vendor)
        .cloned()
        .expect("match_vendor only returns registry names");

    let po = checks::check_po(text, &record);
    let date = date_check(text, &record);
    let rate = rate_check(text, &record);
    let contact = routing::route(&record, &po, &date, &rate);

    Ok(ValidationReport::from_parts(
        "heuristics",
        vendor,
        po,
        date,
        rate,
        contact,
    ))
}

// ---------------------------------------------------------------------------
// Vendor matching
// ---------------------------------------------------------------------------

/// Match registry names against the document by punctuation-insensitive
/// containment. Letterheads drop suffixes and pluralization, so candidate
/// names are retried with trailing tokens trimmed; the deepest (longest)
/// surviving match wins.
fn match_vendor(registry: &Registry, text: &str) -> Option<String> {
    let haystack = fold_name(text);
    let mut best: Option<(usize, String)> = None;

    for name in registry.vendor_names() {
        let folded = fold_name(&name);
        let all: Vec<&str> = folded.split(' ').filter(|t| !t.is_empty()).collect();

        for take in (1..=all.len()).rev() {
            let needle = all[..take].join(" ");
            if needle.len() < 5 && take < all.len() {
                break; // too short to trust once we start trimming
            }
            if haystack.contains(&needle) {
                let score = needle.len();
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((score, name.clone()));
                }
                break;
            }
        }
    }

    best.map(|(_, name)| name)
}

/// Lowercase, strip punctuation, collapse whitespace — the same differences
/// the resolver rubric tells the model to ignore.
fn fold_name(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Date and amount extraction
// ---------------------------------------------------------------------------

fn date_check(text: &str, record: &crate::registry::VendorRecord) -> DateCheck {
    let (Some(start), Some(end)) = (record.contract_start, record.contract_end) else {
        return DateCheck {
            outcome: CheckOutcome::Inapplicable,
            dates_found: Vec::new(),
            valid_dates: Vec::new(),
            reason: "No contract date range on file for this vendor".to_string(),
        };
    };
    checks::evaluate_dates(extract_dates(text), start, end)
}

fn rate_check(text: &str, record: &crate::registry::VendorRecord) -> RateCheck {
    let expected = match checks::rate_precheck(record) {
        Ok(expected) => expected,
        Err(early) => return early,
    };
    checks::evaluate_amounts(extract_amounts(text), expected, record.rate_type)
}

/// All plausible date tokens, normalized to YYYY-MM-DD.
fn extract_dates(text: &str) -> Vec<String> {
    let re = Regex::new(r"\b(\d{1,2})[/\-](\d{1,2})[/\-](\d{2,4})\b").unwrap();
    let mut dates = Vec::new();
    for cap in re.captures_iter(text) {
        let token = cap.get(0).map(|m| m.as_str()).unwrap_or_default();
        let Some(date) = parse_us_date(token) else {
            continue;
        };
        if date.year() < MIN_PLAUSIBLE_YEAR {
            continue;
        }
        let iso = date.format("%Y-%m-%d").to_string();
        if !dates.contains(&iso) {
            dates.push(iso);
        }
    }
    dates
}

fn parse_us_date(token: &str) -> Option<NaiveDate> {
    let normalized = token.replace('-', "/");
    for fmt in ["%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&normalized, fmt) {
            return Some(d);
        }
    }
    None
}

/// All keyword-anchored monetary amounts. Plain `$` amounts count too;
/// bare numbers do not, they are usually quantities or line numbers.
fn extract_amounts(text: &str) -> Vec<f64> {
    let patterns = [
        r"(?i)Total\s*(?:Due|Amount)?\s*:?\s*\$?\s*(\d{1,3}(?:,\d{3})*\.?\d{0,2})",
        r"(?i)Amount\s*(?:Due)?\s*:?\s*\$?\s*(\d{1,3}(?:,\d{3})*\.?\d{0,2})",
        r"\$\s*(\d{1,3}(?:,\d{3})*\.?\d{0,2})",
    ];

    let mut amounts = Vec::new();
    for pattern in patterns {
        let re = Regex::new(pattern).unwrap();
        for cap in re.captures_iter(text) {
            let Some(raw) = cap.get(1) else {
                continue;
            };
            let Ok(value) = raw.as_str().replace(',', "").parse::<f64>() else {
                continue;
            };
            if !amounts.contains(&value) {
                amounts.push(value);
            }
        }
    }
    amounts
}

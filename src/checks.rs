// src/checks.rs

use crate::llm::{recover_json, ModelRequest, TextModel};
use crate::registry::{RateType, VendorRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

const CHECK_TEMPERATURE: f64 = 0.3;
const CHECK_MAX_TOKENS: u32 = 2000;

/// Fractional tolerance around the expected rate amount, bounds inclusive.
const RATE_TOLERANCE: f64 = 0.05;

/// Tri-state outcome shared by all three checks. Inapplicable means the
/// reference data to check against is missing, distinct from a failure.
///
/// Serializes as the wire contract expects: true / false / null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Valid,
    Invalid,
    Inapplicable,
}

impl CheckOutcome {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }

    pub fn is_invalid(self) -> bool {
        self == Self::Invalid
    }

    fn from_bool(valid: bool) -> Self {
        if valid { Self::Valid } else { Self::Invalid }
    }
}

impl Serialize for CheckOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Valid => serializer.serialize_bool(true),
            Self::Invalid => serializer.serialize_bool(false),
            Self::Inapplicable => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoCheck {
    pub outcome: CheckOutcome,
    pub expected_po: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DateCheck {
    pub outcome: CheckOutcome,
    pub dates_found: Vec<String>,
    pub valid_dates: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RateCheck {
    pub outcome: CheckOutcome,
    pub rate_type: Option<RateType>,
    pub expected_amount: Option<f64>,
    pub amounts_found: Vec<f64>,
    pub matching_amounts: Vec<f64>,
    pub is_variable: bool,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// PO check
// ---------------------------------------------------------------------------

/// Valid iff the expected PO appears as a literal case-insensitive substring
/// of the document text. No fuzzy matching and no separator normalization;
/// OCR noise causing a false negative here is an accepted tradeoff.
pub fn check_po(text: &str, record: &VendorRecord) -> PoCheck {
    let expected = record
        .current_po
        .as_deref()
        .map(str::trim)
        .filter(|po| !po.is_empty());
    let Some(po) = expected else {
        return PoCheck {
            outcome: CheckOutcome::Inapplicable,
            expected_po: None,
            reason: "No PO number on file for this vendor".to_string(),
        };
    };

    let found = text.to_lowercase().contains(&po.to_lowercase());
    PoCheck {
        outcome: CheckOutcome::from_bool(found),
        expected_po: Some(po.to_string()),
        reason: if found {
            "PO number found in document".to_string()
        } else {
            format!("Expected PO {po} not found in document")
        },
    }
}

// ---------------------------------------------------------------------------
// Date-range check
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DatesAnswer {
    #[serde(default)]
    dates_found: Vec<String>,
}

/// Delegate date enumeration to the model, then test each date against the
/// inclusive contract interval locally. Valid iff at least one date lands
/// inside; both the full list and the validating subset are surfaced.
pub async fn check_dates(model: &dyn TextModel, text: &str, record: &VendorRecord) -> DateCheck {
    let (Some(start), Some(end)) = (record.contract_start, record.contract_end) else {
        return DateCheck {
            outcome: CheckOutcome::Inapplicable,
            dates_found: Vec::new(),
            valid_dates: Vec::new(),
            reason: "No contract date range on file for this vendor".to_string(),
        };
    };

    let raw = match model
        .complete(ModelRequest {
            prompt: date_prompt(text, start, end),
            temperature: CHECK_TEMPERATURE,
            max_tokens: CHECK_MAX_TOKENS,
        })
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Date extraction call failed");
            return DateCheck {
                outcome: CheckOutcome::Invalid,
                dates_found: Vec::new(),
                valid_dates: Vec::new(),
                reason: format!("Date evaluation could not be performed: {e}"),
            };
        }
    };

    let Some(answer) = recover_json::<DatesAnswer>(&raw) else {
        warn!("Date answer was not parseable JSON");
        return DateCheck {
            outcome: CheckOutcome::Invalid,
            dates_found: Vec::new(),
            valid_dates: Vec::new(),
            reason: "Date evaluation returned unparseable content".to_string(),
        };
    };

    evaluate_dates(answer.dates_found, start, end)
}

/// Pure interval test over already-extracted date strings. Unparseable
/// entries stay in the evidence list but cannot validate.
pub(crate) fn evaluate_dates(dates_found: Vec<String>, start: NaiveDate, end: NaiveDate) -> DateCheck {
    let valid_dates: Vec<String> = dates_found
        .iter()
        .filter(|s| {
            parse_date(s)
                .map(|d| start <= d && d <= end)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let (outcome, reason) = if !valid_dates.is_empty() {
        (
            CheckOutcome::Valid,
            format!(
                "{} date(s) fall within contract period {start} to {end}",
                valid_dates.len()
            ),
        )
    } else if dates_found.is_empty() {
        (CheckOutcome::Invalid, "No dates found in document".to_string())
    } else {
        (
            CheckOutcome::Invalid,
            format!(
                "None of {} extracted date(s) fall within contract period {start} to {end}",
                dates_found.len()
            ),
        )
    };

    DateCheck {
        outcome,
        dates_found,
        valid_dates,
        reason,
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

fn date_prompt(text: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        r#"You are an expert at extracting dates from invoice documents.

TASK: Extract all dates from this invoice/document.

DOCUMENT TEXT:
{text}

CONTRACT PERIOD:
Start: {start}
End: {end}

INSTRUCTIONS:
1. Extract ALL dates you can find in the document (invoice date, service dates, billing periods, etc.)
2. Convert each date to YYYY-MM-DD format
3. Look for dates in formats like: MM/DD/YYYY, DD/MM/YYYY, Month DD YYYY, YYYY-MM-DD, etc.
4. Pay special attention to invoice dates, service period dates, billing dates

Return ONLY valid JSON in this exact format:
{{"dates_found": ["YYYY-MM-DD", "YYYY-MM-DD"]}}"#
    )
}

// ---------------------------------------------------------------------------
// Rate check
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AmountsAnswer {
    #[serde(default)]
    amounts_found: Vec<f64>,
}

/// Decide whether the record's rate data supports a comparison. `Err` holds
/// the early outcome (inapplicable or the variable-rate automatic pass),
/// `Ok` the expected amount to compare against. Shared with the offline path.
pub(crate) fn rate_precheck(record: &VendorRecord) -> Result<f64, RateCheck> {
    if record.rate_type.is_none() && record.rate_amount.is_none() {
        return Err(RateCheck {
            outcome: CheckOutcome::Inapplicable,
            rate_type: None,
            expected_amount: None,
            amounts_found: Vec::new(),
            matching_amounts: Vec::new(),
            is_variable: false,
            reason: "No rate data on file for this vendor".to_string(),
        });
    }

    if let Some(rt) = record.rate_type {
        if rt.is_variable() {
            return Err(RateCheck {
                outcome: CheckOutcome::Valid,
                rate_type: Some(rt),
                expected_amount: record.rate_amount,
                amounts_found: Vec::new(),
                matching_amounts: Vec::new(),
                is_variable: true,
                reason: format!("Rate type is '{}' - automatic pass", rt.as_str()),
            });
        }
    }

    match record.rate_amount {
        Some(expected) => Ok(expected),
        None => Err(RateCheck {
            outcome: CheckOutcome::Inapplicable,
            rate_type: record.rate_type,
            expected_amount: None,
            amounts_found: Vec::new(),
            matching_amounts: Vec::new(),
            is_variable: false,
            reason: "Rate type on file but no amount to compare against".to_string(),
        }),
    }
}

/// Delegate amount enumeration to the model, then check locally whether any
/// amount lies within the tolerance band around the expected amount.
pub async fn check_rate(model: &dyn TextModel, text: &str, record: &VendorRecord) -> RateCheck {
    let expected = match rate_precheck(record) {
        Ok(expected) => expected,
        Err(early) => return early,
    };
    // An amount with no cadence on file is still compared, as type "unknown"
    let rate_type = Some(record.rate_type.unwrap_or(RateType::Unknown));
    let type_str = record.rate_type.unwrap_or(RateType::Unknown).as_str();

    let raw = match model
        .complete(ModelRequest {
            prompt: rate_prompt(text, type_str, expected),
            temperature: CHECK_TEMPERATURE,
            max_tokens: CHECK_MAX_TOKENS,
        })
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Amount extraction call failed");
            return RateCheck {
                outcome: CheckOutcome::Invalid,
                rate_type,
                expected_amount: Some(expected),
                amounts_found: Vec::new(),
                matching_amounts: Vec::new(),
                is_variable: false,
                reason: format!("Rate evaluation could not be performed: {e}"),
            };
        }
    };

    let Some(answer) = recover_json::<AmountsAnswer>(&raw) else {
        warn!("Amount answer was not parseable JSON");
        return RateCheck {
            outcome: CheckOutcome::Invalid,
            rate_type,
            expected_amount: Some(expected),
            amounts_found: Vec::new(),
            matching_amounts: Vec::new(),
            is_variable: false,
            reason: "Rate evaluation returned unparseable content".to_string(),
        };
    };

    evaluate_amounts(answer.amounts_found, expected, rate_type)
}

/// Pure tolerance test over already-extracted amounts. Bounds are inclusive
/// at exactly 5% below and above the expected amount.
pub(crate) fn evaluate_amounts(
    amounts_found: Vec<f64>,
    expected: f64,
    rate_type: Option<RateType>,
) -> RateCheck {
    let tolerance = expected * RATE_TOLERANCE;
    let (min, max) = (expected - tolerance, expected + tolerance);

    let matching_amounts: Vec<f64> = amounts_found
        .iter()
        .copied()
        .filter(|a| *a >= min && *a <= max)
        .collect();

    let (outcome, reason) = if !matching_amounts.is_empty() {
        (
            CheckOutcome::Valid,
            format!(
                "Found amount within ${min:.2} - ${max:.2} of expected ${expected:.2}"
            ),
        )
    } else if amounts_found.is_empty() {
        (
            CheckOutcome::Invalid,
            "No amounts found in document".to_string(),
        )
    } else {
        (
            CheckOutcome::Invalid,
            format!(
                "None of {} extracted amount(s) fall within ${min:.2} - ${max:.2}",
                amounts_found.len()
            ),
        )
    };

    RateCheck {
        outcome,
        rate_type,
        expected_amount: Some(expected),
        amounts_found,
        matching_amounts,
        is_variable: false,
        reason,
    }
}

fn rate_prompt(text: &str, rate_type: &str, expected: f64) -> String {
    let tolerance = expected * RATE_TOLERANCE;
    format!(
        r#"You are an expert at extracting billing and rate information from invoice documents.

TASK: Extract all monetary amounts from this invoice.

DOCUMENT TEXT:
{text}

EXPECTED RATE INFO:
- Type: {rate_type}
- Amount: ${expected:.2}
- Acceptable range: ${:.2} - ${:.2}

INSTRUCTIONS:
1. Look for total amounts, line items, rates, fees, or billing amounts in the document
2. Pay attention to words like "total", "amount due", "invoice amount", "rate", "cost"
3. Extract all numeric amounts you find (convert to numbers, no currency symbols)
4. Look for both individual line items and total amounts

Return ONLY valid JSON in this exact format:
{{"amounts_found": [123.45, 678.90]}}"#,
        expected - tolerance,
        expected + tolerance
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::CannedModel;
    use crate::registry::VendorRecord;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record_with_po(po: &str) -> VendorRecord {
        VendorRecord {
            current_po: Some(po.to_string()),
            ..VendorRecord::named("Acme")
        }
    }

    #[test]
    fn test_po_inapplicable_without_po_on_file() {
        let check = check_po("any text", &VendorRecord::named("Acme"));
        assert_eq!(check.outcome, CheckOutcome::Inapplicable);
        assert!(check.expected_po.is_none());
    }

    #[test]
    fn test_po_substring_round_trip() {
        let record = record_with_po("P26003063");
        let text = format!("Invoice 25-1234 ... PO: {} ... Total $500", "P26003063");
        let check = check_po(&text, &record);
        assert_eq!(check.outcome, CheckOutcome::Valid);
        assert_eq!(check.expected_po.as_deref(), Some("P26003063"));
    }

    #[test]
    fn test_po_match_is_case_insensitive() {
        let record = record_with_po("P26003063");
        let check = check_po("purchase order p26003063 enclosed", &record);
        assert_eq!(check.outcome, CheckOutcome::Valid);
    }

    #[test]
    fn test_po_no_separator_normalization() {
        // Exact substring rule: a dashed rendition of the same PO is a miss
        let record = record_with_po("P26003063");
        let check = check_po("PO P-2600-3063", &record);
        assert_eq!(check.outcome, CheckOutcome::Invalid);
        assert!(check.reason.contains("not found"));
    }

    #[test]
    fn test_po_expected_value_is_trimmed() {
        let record = record_with_po("  P26003063  ");
        let check = check_po("contains P26003063 here", &record);
        assert_eq!(check.outcome, CheckOutcome::Valid);
        assert_eq!(check.expected_po.as_deref(), Some("P26003063"));
    }

    #[test]
    fn test_dates_inclusive_interval() {
        let start = ymd(2025, 1, 1);
        let end = ymd(2025, 12, 31);
        let check = evaluate_dates(
            vec![
                "2024-12-31".to_string(), // just before
                "2025-01-01".to_string(), // first day, inclusive
                "2025-12-31".to_string(), // last day, inclusive
                "2026-01-01".to_string(), // just after
                "garbage".to_string(),    // kept as evidence, never validates
            ],
            start,
            end,
        );
        assert_eq!(check.outcome, CheckOutcome::Valid);
        assert_eq!(check.dates_found.len(), 5);
        assert_eq!(
            check.valid_dates,
            vec!["2025-01-01".to_string(), "2025-12-31".to_string()]
        );
    }

    #[test]
    fn test_dates_none_in_range() {
        let check = evaluate_dates(
            vec!["2023-06-15".to_string()],
            ymd(2025, 1, 1),
            ymd(2025, 12, 31),
        );
        assert_eq!(check.outcome, CheckOutcome::Invalid);
        assert!(check.valid_dates.is_empty());
        assert_eq!(check.dates_found, vec!["2023-06-15".to_string()]);
    }

    #[test]
    fn test_dates_accept_us_format() {
        let check = evaluate_dates(
            vec!["06/15/2025".to_string()],
            ymd(2025, 1, 1),
            ymd(2025, 12, 31),
        );
        assert_eq!(check.outcome, CheckOutcome::Valid);
    }

    #[tokio::test]
    async fn test_dates_inapplicable_without_range() {
        let model = CannedModel::vendor_only(Err("must not be called".into()));
        let check = check_dates(&model, "text", &VendorRecord::named("Acme")).await;
        assert_eq!(check.outcome, CheckOutcome::Inapplicable);
    }

    #[tokio::test]
    async fn test_dates_call_failure_degrades_to_invalid() {
        let record = VendorRecord {
            contract_start: Some(ymd(2025, 1, 1)),
            contract_end: Some(ymd(2025, 12, 31)),
            ..VendorRecord::named("Acme")
        };
        let model = CannedModel {
            vendor: Err("unused".into()),
            dates: Err("timeout".into()),
            amounts: Err("unused".into()),
        };
        let check = check_dates(&model, "text", &record).await;
        assert_eq!(check.outcome, CheckOutcome::Invalid);
        assert!(check.reason.contains("could not be performed"));
    }

    #[test]
    fn test_rate_tolerance_boundaries() {
        // Expected 500: the band is exactly [475.00, 525.00], ends included
        let valid_low = evaluate_amounts(vec![475.00], 500.0, None);
        assert_eq!(valid_low.outcome, CheckOutcome::Valid);

        let valid_high = evaluate_amounts(vec![525.00], 500.0, None);
        assert_eq!(valid_high.outcome, CheckOutcome::Valid);

        let below = evaluate_amounts(vec![474.99], 500.0, None);
        assert_eq!(below.outcome, CheckOutcome::Invalid);

        let above = evaluate_amounts(vec![525.01], 500.0, None);
        assert_eq!(above.outcome, CheckOutcome::Invalid);
    }

    #[test]
    fn test_rate_surfaces_all_amounts_and_matches() {
        let check = evaluate_amounts(vec![10.0, 505.0, 9000.0], 500.0, Some(RateType::Monthly));
        assert_eq!(check.outcome, CheckOutcome::Valid);
        assert_eq!(check.amounts_found, vec![10.0, 505.0, 9000.0]);
        assert_eq!(check.matching_amounts, vec![505.0]);
        assert!(!check.is_variable);
    }

    #[tokio::test]
    async fn test_rate_variable_passes_without_model_call() {
        for rt in [RateType::Variable, RateType::AsNeeded] {
            let record = VendorRecord {
                rate_type: Some(rt),
                rate_amount: None,
                ..VendorRecord::named("Acme")
            };
            let model = CannedModel::vendor_only(Err("must not be called".into()));
            let check = check_rate(&model, "anything at all", &record).await;
            assert_eq!(check.outcome, CheckOutcome::Valid);
            assert!(check.is_variable);
        }
    }

    #[tokio::test]
    async fn test_rate_inapplicable_without_rate_data() {
        let model = CannedModel::vendor_only(Err("must not be called".into()));
        let check = check_rate(&model, "text", &VendorRecord::named("Acme")).await;
        assert_eq!(check.outcome, CheckOutcome::Inapplicable);
    }

    #[tokio::test]
    async fn test_rate_amount_without_type_still_compares() {
        let record = VendorRecord {
            rate_amount: Some(500.0),
            ..VendorRecord::named("Acme")
        };
        let model = CannedModel {
            vendor: Err("unused".into()),
            dates: Err("unused".into()),
            amounts: Ok(r#"{"amounts_found": [505.0]}"#.into()),
        };
        let check = check_rate(&model, "Total $505.00", &record).await;
        assert_eq!(check.outcome, CheckOutcome::Valid);
    }

    #[tokio::test]
    async fn test_rate_unparseable_answer_degrades_to_invalid() {
        let record = VendorRecord {
            rate_amount: Some(500.0),
            rate_type: Some(RateType::Monthly),
            ..VendorRecord::named("Acme")
        };
        let model = CannedModel {
            vendor: Err("unused".into()),
            dates: Err("unused".into()),
            amounts: Ok("around five hundred dollars".into()),
        };
        let check = check_rate(&model, "text", &record).await;
        assert_eq!(check.outcome, CheckOutcome::Invalid);
        assert!(check.reason.contains("unparseable"));
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(serde_json::to_string(&CheckOutcome::Valid).unwrap(), "true");
        assert_eq!(serde_json::to_string(&CheckOutcome::Invalid).unwrap(), "false");
        assert_eq!(serde_json::to_string(&CheckOutcome::Inapplicable).unwrap(), "null");
    }
}

// src/routing.rs

use crate::checks::{CheckOutcome, DateCheck, PoCheck, RateCheck};
use crate::registry::VendorRecord;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Director,
    Admin,
    Unknown,
}

/// Who handles this invoice next, and why.
#[derive(Debug, Clone)]
pub struct Contact {
    pub name: Option<String>,
    pub role: Role,
    pub reason: String,
}

/// Pure function of the three check results and the record's contact fields.
///
/// Director routing requires all three checks exactly valid — an
/// inapplicable check is not good enough — and a fixed (non-variable) rate.
/// Everything else goes to the admin path, falling back to the main
/// contact, with a reason that enumerates what went wrong.
pub fn route(record: &VendorRecord, po: &PoCheck, date: &DateCheck, rate: &RateCheck) -> Contact {
    let all_valid =
        po.outcome.is_valid() && date.outcome.is_valid() && rate.outcome.is_valid();

    if all_valid && !rate.is_variable {
        if let Some(director) = clean(&record.director) {
            return Contact {
                name: Some(director),
                role: Role::Director,
                reason: "All validations passed and rate is fixed".to_string(),
            };
        }
    }

    let mut reasons = Vec::new();
    if po.outcome.is_invalid() {
        reasons.push("PO validation failed".to_string());
    }
    if date.outcome.is_invalid() {
        reasons.push("date validation failed".to_string());
    }
    if rate.outcome.is_invalid() {
        reasons.push("rate validation failed".to_string());
    }
    if rate.is_variable {
        reasons.push("variable rate type".to_string());
    }
    for (label, outcome) in [
        ("PO", po.outcome),
        ("date", date.outcome),
        ("rate", rate.outcome),
    ] {
        if outcome == CheckOutcome::Inapplicable {
            reasons.push(format!("{label} check not applicable"));
        }
    }

    let reason = if reasons.is_empty() {
        "Default admin contact".to_string()
    } else {
        format!("Issue requires admin attention: {}", reasons.join(", "))
    };

    match clean(&record.admin).or_else(|| clean(&record.main_contact)) {
        Some(name) => Contact {
            name: Some(name),
            role: Role::Admin,
            reason,
        },
        None => Contact {
            name: None,
            role: Role::Unknown,
            reason: "No contact information available".to_string(),
        },
    }
}

/// Contact cells sometimes carry placeholder junk from the sheet.
fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        .map(str::to_string)
}

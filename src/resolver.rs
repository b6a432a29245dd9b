// src/resolver.rs

use crate::llm::{recover_json, ModelError, ModelRequest, TextModel};
use serde::Deserialize;
use tracing::{info, warn};

const MATCH_TEMPERATURE: f64 = 0.5;
const MATCH_MAX_TOKENS: u32 = 4096;

/// Expected answer shape: the canonical name or null.
#[derive(Debug, Deserialize)]
struct VendorAnswer {
    vendor: Option<String>,
}

/// Map document text to exactly one canonical vendor name from `candidates`.
///
/// `Ok(None)` means the model confidently found no issuer (or its answer was
/// unusable — that fails open to no-match). `Err` means the call itself
/// failed; callers must keep the two apart.
pub async fn resolve_vendor(
    model: &dyn TextModel,
    text: &str,
    candidates: &[String],
) -> Result<Option<String>, ModelError> {
    if candidates.is_empty() {
        warn!("Empty vendor list, nothing to match against");
        return Ok(None);
    }

    let raw = model
        .complete(ModelRequest {
            prompt: build_prompt(text, candidates),
            temperature: MATCH_TEMPERATURE,
            max_tokens: MATCH_MAX_TOKENS,
        })
        .await?;

    let Some(answer) = recover_json::<VendorAnswer>(&raw) else {
        warn!("Vendor answer was not parseable JSON, treating as no match");
        return Ok(None);
    };
    let Some(name) = answer.vendor else {
        info!("Model reports no confident vendor match");
        return Ok(None);
    };

    let name = name.trim();
    match candidates.iter().find(|c| c.as_str() == name) {
        Some(canonical) => {
            info!(vendor = %canonical, "Vendor resolved");
            Ok(Some(canonical.clone()))
        }
        None => {
            warn!(vendor = %name, "Model named a vendor outside the candidate list, treating as no match");
            Ok(None)
        }
    }
}

fn build_prompt(text: &str, candidates: &[String]) -> String {
    let list = serde_json::to_string_pretty(candidates).unwrap_or_default();
    format!(
        r#"You are an expert at identifying company names in invoices and matching them to a supplier database.

TASK: Analyze this invoice/document text and identify which supplier from the provided list is the vendor/company that issued this document.

INVOICE/DOCUMENT TEXT:
{text}

SUPPLIER DATABASE:
{list}

MATCHING RULES:
1. Look for company names that appear as the sender/issuer of the invoice
2. Match variations like "Mid-South Instrument Service" -> "Mid South Instrument Services Inc."
3. Ignore differences in punctuation, word order, legal suffixes (Inc, LLC, Corp), and articles (The, A, An)
4. Be flexible with partial matches - "Evoqua" should match "Evoqua Water Technologies"
5. Look in headers, letterheads, "From:" fields, company contact info
6. If multiple potential matches, choose the most specific/complete one

IMPORTANT: Only match if you are confident this supplier is the one issuing the invoice/document. Return null if no clear match exists.

Return ONLY valid JSON in this exact format:
{{"vendor": "Exact Name From Supplier List"}}

OR if no match found:
{{"vendor": null}}"#
    )
}

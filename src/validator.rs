// src/validator.rs

use crate::checks::{self, CheckOutcome, DateCheck, PoCheck, RateCheck};
use crate::config::AmplifySection;
use crate::llm::{AmplifyClient, TextModel};
use crate::pdf_text::{self, PdfText};
use crate::registry::Registry;
use crate::routing::{self, Contact, Role};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Terminal failures — nothing downstream can proceed. Everything else is
/// reported per-check inside the report instead of aborting the run.
#[derive(Debug)]
pub enum ValidationError {
    /// External-service credentials/endpoint missing.
    NotConfigured(String),
    /// No text recoverable from the PDF.
    Extraction(String),
    /// The vendor-resolution call itself failed (distinct from "no match").
    ResolverTransport(String),
}

impl ValidationError {
    pub fn message(&self) -> &str {
        match self {
            Self::NotConfigured(m) | Self::Extraction(m) | Self::ResolverTransport(m) => m,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ValidationError {}

/// The output contract. Field names and the true/false/null check encoding
/// are what downstream consumers render; they must stay stable.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub vendor: Option<String>,
    pub method: &'static str,
    pub po_valid: Option<CheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub po_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_po: Option<String>,
    pub date_valid: Option<CheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dates_found: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_dates: Option<Vec<String>>,
    pub rate_valid: Option<CheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amounts_found: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_amounts: Option<Vec<f64>>,
    pub is_variable_rate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_reason: Option<String>,
}

impl ValidationReport {
    /// No vendor resolved: checks stay unset, not inapplicable — the
    /// difference is visible to Rust callers even though both serialize
    /// as null.
    pub(crate) fn no_vendor(method: &'static str) -> Self {
        Self {
            vendor: None,
            method,
            po_valid: None,
            po_reason: None,
            expected_po: None,
            date_valid: None,
            date_reason: None,
            dates_found: None,
            valid_dates: None,
            rate_valid: None,
            rate_reason: None,
            rate_type: None,
            expected_amount: None,
            amounts_found: None,
            matching_amounts: None,
            is_variable_rate: false,
            contact_person: None,
            contact_role: None,
            contact_reason: None,
        }
    }

    pub(crate) fn from_parts(
        method: &'static str,
        vendor: String,
        po: PoCheck,
        date: DateCheck,
        rate: RateCheck,
        contact: Contact,
    ) -> Self {
        Self {
            vendor: Some(vendor),
            method,
            po_valid: Some(po.outcome),
            po_reason: Some(po.reason),
            expected_po: po.expected_po,
            date_valid: Some(date.outcome),
            date_reason: Some(date.reason),
            dates_found: Some(date.dates_found),
            valid_dates: Some(date.valid_dates),
            rate_valid: Some(rate.outcome),
            rate_reason: Some(rate.reason),
            rate_type: rate.rate_type.map(|rt| rt.as_str()),
            expected_amount: rate.expected_amount,
            amounts_found: Some(rate.amounts_found),
            matching_amounts: Some(rate.matching_amounts),
            is_variable_rate: rate.is_variable,
            contact_person: contact.name,
            contact_role: Some(contact.role),
            contact_reason: Some(contact.reason),
        }
    }
}

/// Sequences one request/response cycle per PDF: extract, resolve, run the
/// three checks, route, assemble. No step is retried.
pub struct Validator {
    registry: Arc<Registry>,
    model: Box<dyn TextModel>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("registry", &self.registry)
            .field("model", &"<dyn TextModel>")
            .finish()
    }
}

impl Validator {
    pub fn new(registry: Arc<Registry>, model: Box<dyn TextModel>) -> Self {
        Self { registry, model }
    }

    /// Build a validator backed by the Amplify API, failing up front when
    /// the endpoint is not configured.
    pub fn with_amplify(
        registry: Arc<Registry>,
        amplify: &AmplifySection,
    ) -> Result<Self, ValidationError> {
        if !amplify.is_configured() {
            return Err(ValidationError::NotConfigured(
                "Amplify API URL or key not configured".to_string(),
            ));
        }
        let client = AmplifyClient::new(amplify)
            .map_err(|e| ValidationError::NotConfigured(format!("Amplify client setup failed: {e}")))?;
        Ok(Self::new(registry, Box::new(client)))
    }

    pub async fn validate_file(&self, path: &Path) -> Result<ValidationReport, ValidationError> {
        let text = extract_file_text(path)?;
        info!(path = %path.display(), chars = text.len(), "Extracted document text");
        self.validate_text(&text).await
    }

    pub async fn validate_text(&self, text: &str) -> Result<ValidationReport, ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::Extraction(
                "Could not extract text from PDF".to_string(),
            ));
        }

        let candidates = self.registry.vendor_names();
        let resolved = resolver_step(self.model.as_ref(), text, &candidates).await?;
        let Some(vendor) = resolved else {
            info!("No vendor match found");
            return Ok(ValidationReport::no_vendor("amplify_api"));
        };

        let Some(record) = self.registry.get(&vendor).cloned() else {
            // Resolver canonicalizes against the candidate list, so this
            // only happens if the registry changed underneath us.
            warn!(vendor = %vendor, "Resolved vendor missing from registry");
            return Ok(ValidationReport::no_vendor("amplify_api"));
        };

        let po = checks::check_po(text, &record);
        let (date, rate) = tokio::join!(
            checks::check_dates(self.model.as_ref(), text, &record),
            checks::check_rate(self.model.as_ref(), text, &record),
        );

        let contact = routing::route(&record, &po, &date, &rate);
        Ok(ValidationReport::from_parts(
            "amplify_api",
            vendor,
            po,
            date,
            rate,
            contact,
        ))
    }
}

async fn resolver_step(
    model: &dyn TextModel,
    text: &str,
    candidates: &[String],
) -> Result<Option<String>, ValidationError> {
    crate::resolver::resolve_vendor(model, text, candidates)
        .await
        .map_err(|e| ValidationError::ResolverTransport(format!("Vendor resolution failed: {e}")))
}

/// Read a PDF from disk and extract its normalized text. Shared by the
/// Amplify-backed and offline paths.
pub fn extract_file_text(path: &Path) -> Result<String, ValidationError> {
    let bytes = fs::read(path).map_err(|e| {
        ValidationError::Extraction(format!("Could not read {}: {e}", path.display()))
    })?;
    match pdf_text::extract_text(&bytes) {
        PdfText::Text(text) => Ok(text),
        PdfText::NoText => Err(ValidationError::Extraction(
            "Could not extract text from PDF".to_string(),
        )),
        PdfText::Error(e) => Err(ValidationError::Extraction(format!(
            "Could not extract text from PDF: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AmplifySection;
    use crate::llm::testing::CannedModel;
    use crate::registry::{RateType, VendorRecord};
    use chrono::NaiveDate;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn mid_south(rate_type: RateType) -> VendorRecord {
        VendorRecord {
            contract_start: Some(ymd(2025, 1, 1)),
            contract_end: Some(ymd(2025, 12, 31)),
            current_po: Some("P26003063".to_string()),
            rate_type: Some(rate_type),
            rate_amount: Some(500.0),
            admin: Some("Dana Cole".to_string()),
            director: Some("Morgan Ellis".to_string()),
            ..VendorRecord::named("Mid South Instrument Services Inc.")
        }
    }

    fn registry(rate_type: RateType) -> Arc<Registry> {
        Arc::new(Registry::from_records(vec![mid_south(rate_type)]))
    }

    fn invoice_text() -> &'static str {
        "Mid-South Instrument Service\nInvoice Date: 06/15/2025\nPO: P26003063\nTotal Due: $505.00"
    }

    fn happy_model(amount: f64) -> CannedModel {
        CannedModel::new(
            r#"{"vendor": "Mid South Instrument Services Inc."}"#,
            r#"{"dates_found": ["2025-06-15"]}"#,
            &format!(r#"{{"amounts_found": [{amount}]}}"#),
        )
    }

    #[tokio::test]
    async fn test_fully_valid_invoice_routes_to_director() {
        let validator = Validator::new(registry(RateType::Monthly), Box::new(happy_model(505.0)));
        let report = validator.validate_text(invoice_text()).await.unwrap();

        assert_eq!(
            report.vendor.as_deref(),
            Some("Mid South Instrument Services Inc.")
        );
        assert_eq!(report.po_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.date_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.rate_valid, Some(CheckOutcome::Valid));
        assert!(!report.is_variable_rate);
        assert_eq!(report.contact_role, Some(Role::Director));
        assert_eq!(report.contact_person.as_deref(), Some("Morgan Ellis"));
    }

    #[tokio::test]
    async fn test_rate_overage_routes_to_admin() {
        // 600 > 525 = 1.05 x 500
        let validator = Validator::new(registry(RateType::Monthly), Box::new(happy_model(600.0)));
        let report = validator.validate_text(invoice_text()).await.unwrap();

        assert_eq!(report.po_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.date_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.rate_valid, Some(CheckOutcome::Invalid));
        assert_eq!(report.contact_role, Some(Role::Admin));
        assert_eq!(report.contact_person.as_deref(), Some("Dana Cole"));
        assert!(
            report
                .contact_reason
                .as_deref()
                .unwrap()
                .contains("rate validation failed")
        );
    }

    #[tokio::test]
    async fn test_as_needed_rate_forces_admin_despite_all_valid() {
        let validator = Validator::new(registry(RateType::AsNeeded), Box::new(happy_model(505.0)));
        let report = validator.validate_text(invoice_text()).await.unwrap();

        assert_eq!(report.po_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.date_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.rate_valid, Some(CheckOutcome::Valid));
        assert!(report.is_variable_rate);
        assert_eq!(report.contact_role, Some(Role::Admin));
    }

    #[tokio::test]
    async fn test_no_vendor_match_leaves_checks_unset() {
        let model = CannedModel::vendor_only(Ok(r#"{"vendor": null}"#.into()));
        let validator = Validator::new(registry(RateType::Monthly), Box::new(model));
        let report = validator.validate_text("unrelated document").await.unwrap();

        assert_eq!(report.vendor, None);
        assert_eq!(report.po_valid, None);
        assert_eq!(report.date_valid, None);
        assert_eq!(report.rate_valid, None);
        assert_eq!(report.contact_role, None);
    }

    #[tokio::test]
    async fn test_empty_text_is_extraction_error() {
        let model = CannedModel::vendor_only(Err("must not be called".into()));
        let validator = Validator::new(registry(RateType::Monthly), Box::new(model));
        let err = validator.validate_text("   \n ").await.unwrap_err();
        assert!(matches!(err, ValidationError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_resolver_transport_failure_is_terminal() {
        let model = CannedModel::vendor_only(Err("connection reset".into()));
        let validator = Validator::new(registry(RateType::Monthly), Box::new(model));
        let err = validator.validate_text("some document").await.unwrap_err();
        assert!(matches!(err, ValidationError::ResolverTransport(_)));
    }

    #[tokio::test]
    async fn test_checker_failure_does_not_abort_run() {
        let model = CannedModel {
            vendor: Ok(r#"{"vendor": "Mid South Instrument Services Inc."}"#.into()),
            dates: Err("timeout".into()),
            amounts: Ok(r#"{"amounts_found": [505.0]}"#.into()),
        };
        let validator = Validator::new(registry(RateType::Monthly), Box::new(model));
        let report = validator.validate_text(invoice_text()).await.unwrap();

        assert_eq!(report.date_valid, Some(CheckOutcome::Invalid));
        assert!(
            report
                .date_reason
                .as_deref()
                .unwrap()
                .contains("could not be performed")
        );
        // Siblings still ran
        assert_eq!(report.po_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.rate_valid, Some(CheckOutcome::Valid));
        assert_eq!(report.contact_role, Some(Role::Admin));
    }

    #[test]
    fn test_unconfigured_endpoint_is_a_distinct_error() {
        let err =
            Validator::with_amplify(registry(RateType::Monthly), &AmplifySection::default())
                .unwrap_err();
        assert!(matches!(err, ValidationError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_report_serialization_contract() {
        let validator = Validator::new(registry(RateType::Monthly), Box::new(happy_model(505.0)));
        let report = validator.validate_text(invoice_text()).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();

        assert_eq!(json["vendor"], "Mid South Instrument Services Inc.");
        assert_eq!(json["method"], "amplify_api");
        assert_eq!(json["po_valid"], true);
        assert_eq!(json["expected_po"], "P26003063");
        assert_eq!(json["date_valid"], true);
        assert_eq!(json["dates_found"][0], "2025-06-15");
        assert_eq!(json["rate_valid"], true);
        assert_eq!(json["rate_type"], "monthly");
        assert_eq!(json["expected_amount"], 500.0);
        assert_eq!(json["matching_amounts"][0], 505.0);
        assert_eq!(json["is_variable_rate"], false);
        assert_eq!(json["contact_person"], "Morgan Ellis");
        assert_eq!(json["contact_role"], "director");
    }

    #[tokio::test]
    async fn test_no_vendor_report_serializes_null_checks() {
        let model = CannedModel::vendor_only(Ok(r#"{"vendor": null}"#.into()));
        let validator = Validator::new(registry(RateType::Monthly), Box::new(model));
        let report = validator.validate_text("unrelated").await.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();

        assert_eq!(json["vendor"], serde_json::Value::Null);
        assert_eq!(json["po_valid"], serde_json::Value::Null);
        assert!(json.get("po_reason").is_none());
        assert!(json.get("contact_role").is_none());
    }
}

mod checks;
mod config;
mod heuristics;
mod llm;
mod pdf_text;
mod registry;
mod resolver;
mod routing;
mod validator;

use config::Config;
use registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span};
use validator::{ValidationError, ValidationReport, Validator};

struct CliArgs {
    config_path: String,
    registry_path: Option<String>,
    offline: bool,
    pdfs: Vec<PathBuf>,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = CliArgs {
        config_path: config::DEFAULT_CONFIG_PATH.to_string(),
        registry_path: None,
        offline: false,
        pdfs: Vec::new(),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--offline" => args.offline = true,
            "--config" => {
                args.config_path = iter.next().ok_or("--config requires a path")?;
            }
            "--registry" => {
                args.registry_path = Some(iter.next().ok_or("--registry requires a path")?);
            }
            "--help" | "-h" => return Err(String::new()),
            flag if flag.starts_with('-') => return Err(format!("Unknown flag: {flag}")),
            path => args.pdfs.push(PathBuf::from(path)),
        }
    }
    Ok(args)
}

const USAGE: &str = "Usage: invoice_audit [--offline] [--config <path>] [--registry <path>] [pdf ...]\n\
With no PDF arguments, every *.pdf in the current directory is validated.";

/// All *.pdf files in the current directory, sorted for stable runs.
fn scan_cwd_for_pdfs() -> Vec<PathBuf> {
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(".")
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();
    pdfs
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("{msg}");
            }
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    let cfg = Config::load_or_default(&args.config_path);
    let registry_path = args
        .registry_path
        .clone()
        .unwrap_or_else(|| cfg.registry_path.clone());
    let registry = Arc::new(Registry::load(&registry_path));
    if registry.is_empty() {
        error!(path = %registry_path, "Registry is empty — every document will report no vendor match");
    }

    let pdfs = if args.pdfs.is_empty() {
        scan_cwd_for_pdfs()
    } else {
        args.pdfs.clone()
    };
    if pdfs.is_empty() {
        println!("No PDF files to validate");
        return Ok(());
    }
    info!(count = pdfs.len(), offline = args.offline, "Starting validation run");

    let amplify_validator = if args.offline {
        None
    } else {
        match Validator::with_amplify(Arc::clone(&registry), &cfg.amplify) {
            Ok(v) => Some(v),
            Err(e) => {
                // Not configured is terminal: operators must be able to tell
                // this apart from extraction or runtime failures.
                println!("{}", serde_json::json!({ "error": e.message() }));
                error!(error = %e, "Amplify API not usable, aborting (use --offline for regex-only validation)");
                std::process::exit(1);
            }
        }
    };

    let mut had_errors = false;
    for pdf in &pdfs {
        let span = info_span!("validate", pdf = %pdf.display());
        let _guard = span.enter();

        let result = match &amplify_validator {
            Some(validator) => validator.validate_file(pdf).await,
            None => heuristics::validate_file(&registry, pdf),
        };

        println!("\n{}", "=".repeat(60));
        println!("VALIDATION RESULTS for {}", pdf.display());
        println!("{}", "=".repeat(60));

        match result {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
                render_summary(&report);
            }
            Err(e) => {
                had_errors = true;
                println!("{}", serde_json::json!({ "error": e.message() }));
                match &e {
                    ValidationError::Extraction(msg) => error!(error = %msg, "Extraction failed"),
                    ValidationError::ResolverTransport(msg) => error!(error = %msg, "Resolver call failed"),
                    ValidationError::NotConfigured(msg) => error!(error = %msg, "Not configured"),
                }
            }
        }
    }

    if had_errors {
        std::process::exit(1);
    }
    Ok(())
}

/// Per-check PASS/FAIL/WARN block for human reviewers. The JSON line above
/// it is the machine contract; this is the readable rendition.
fn render_summary(report: &ValidationReport) {
    use crate::checks::CheckOutcome;

    let Some(vendor) = report.vendor.as_deref() else {
        println!("[FAIL] VENDOR: No match found");
        return;
    };
    println!("[PASS] VENDOR: {vendor}");

    let line = |label: &str, outcome: Option<CheckOutcome>, reason: Option<&str>| {
        let reason = reason.unwrap_or("");
        match outcome {
            Some(CheckOutcome::Valid) => println!("[PASS] {label}: {reason}"),
            Some(CheckOutcome::Invalid) => println!("[FAIL] {label}: {reason}"),
            Some(CheckOutcome::Inapplicable) => println!("[WARN] {label}: {reason}"),
            None => println!("[WARN] {label}: not evaluated"),
        }
    };
    line("PO NUMBER", report.po_valid, report.po_reason.as_deref());
    line("DATES", report.date_valid, report.date_reason.as_deref());
    line("RATE", report.rate_valid, report.rate_reason.as_deref());

    match (report.contact_person.as_deref(), report.contact_role) {
        (Some(name), Some(role)) => {
            println!("[CONTACT] {role:?}: {name}");
            if let Some(reason) = report.contact_reason.as_deref() {
                println!("          Reason: {reason}");
            }
        }
        _ => {
            let reason = report
                .contact_reason
                .as_deref()
                .unwrap_or("No contact information available");
            println!("[WARN] CONTACT: {reason}");
        }
    }

    let outcomes = [report.po_valid, report.date_valid, report.rate_valid];
    let all_passed = outcomes
        .iter()
        .all(|o| matches!(o, Some(CheckOutcome::Valid)));
    let any_failed = outcomes
        .iter()
        .any(|o| matches!(o, Some(CheckOutcome::Invalid)));

    if all_passed {
        println!("\n[SUCCESS] OVERALL: INVOICE FULLY VALIDATED");
    } else if any_failed {
        println!("\n[FAILED] OVERALL: INVOICE VALIDATION FAILED");
    } else {
        println!("\n[PARTIAL] OVERALL: PARTIAL VALIDATION (some checks couldn't be performed)");
    }
}

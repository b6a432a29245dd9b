// src/pdf_text.rs

use lopdf::{Dictionary, Document};
use tracing::{info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfText {
    /// The PDF contains extractable text, already normalized.
    Text(String),
    /// The PDF parsed but holds no usable text — scanned / image-only.
    NoText,
    /// Something went wrong reading the document itself.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Extract the best-effort plain text from raw PDF bytes.
///
/// Two strategies run and the longer non-empty result wins: pdf-extract's
/// content-stream interpreter recovers layout better on some producers,
/// lopdf's per-page extraction survives streams pdf-extract chokes on.
pub fn extract_text(pdf_bytes: &[u8]) -> PdfText {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfText::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfText::NoText;
    }

    let mut best = String::new();

    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => best = text,
        Err(e) => warn!(error = %e, "pdf-extract strategy failed"),
    }

    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    match doc.extract_text(&pages) {
        Ok(text) => {
            if text.len() > best.len() {
                info!(
                    lopdf_chars = text.len(),
                    pdf_extract_chars = best.len(),
                    "lopdf strategy produced the longer text"
                );
                best = text;
            }
        }
        Err(e) => warn!(error = %e, "lopdf strategy failed"),
    }

    let text = normalize(&best);
    let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
    if meaningful < MIN_TEXT_CHARS {
        info!(chars = meaningful, "Extracted text too short, treating as scanned");
        PdfText::NoText
    } else {
        info!(chars = text.len(), "Text extracted successfully");
        PdfText::Text(text)
    }
}

/// Collapse runs of whitespace within each line, drop blank lines, trim.
pub fn normalize(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Heuristic: a page whose resources carry XObject images but no fonts is
/// almost certainly a scan. If most pages look like that, skip extraction.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false; // Can't tell — let text extraction try
    }

    let image_only = pages
        .values()
        .filter_map(|object_id| doc.get_object(*object_id).ok())
        .filter_map(|obj| obj.as_dict().ok())
        .filter(|page| {
            page_has_resource(doc, page, b"XObject") && !page_has_resource(doc, page, b"Font")
        })
        .count();

    let ratio = image_only as f64 / pages.len() as f64;
    info!(
        total_pages = pages.len(),
        image_only,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );
    ratio >= 0.8
}

fn page_has_resource(doc: &Document, page: &Dictionary, key: &[u8]) -> bool {
    page.get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(key).ok())
        .and_then(|v| doc.dereference(v).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|entries| !entries.is_empty())
}

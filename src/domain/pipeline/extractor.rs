use super::error::ExtractionError;
use lopdf::content::Content;
use lopdf::{Document, Object};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static HYPHENATED_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-[ \t]*\r?\n\s*(\w)").expect("hyphen pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Vertical distance under which two text runs are read as the same line
const LINE_TOLERANCE: f32 = 2.0;

/// TJ adjustments wider than this (thousandths of an em) read as a word gap
const TJ_SPACE_THRESHOLD: f32 = 200.0;

/// Pulls plain text out of a PDF byte buffer
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// Which extraction strategy the pipeline runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractorKind {
    /// pdf-extract first, layout walker when it yields nothing
    Auto,
    PdfExtract,
    Layout,
}

impl ExtractorKind {
    pub fn build(self) -> Arc<dyn TextExtractor> {
        match self {
            ExtractorKind::Auto => Arc::new(FallbackExtractor::new(vec![
                Box::new(PdfExtractExtractor),
                Box::new(LayoutExtractor),
            ])),
            ExtractorKind::PdfExtract => Arc::new(PdfExtractExtractor),
            ExtractorKind::Layout => Arc::new(LayoutExtractor),
        }
    }
}

/// Run `extractor` on the blocking pool, giving up after `timeout`.
///
/// A timed-out extraction keeps its blocking thread until it finishes on its
/// own; there is no way to interrupt a parser stuck inside a font program.
pub async fn extract_with_timeout(
    extractor: Arc<dyn TextExtractor>,
    bytes: Vec<u8>,
    timeout: Duration,
) -> Result<String, ExtractionError> {
    let task = tokio::task::spawn_blocking(move || extractor.extract(&bytes));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ExtractionError::Unreadable(format!(
            "extraction task failed: {}",
            join_err
        ))),
        Err(_) => {
            tracing::error!(
                timeout_secs = timeout.as_secs(),
                "PDF extraction timed out, document may have complex fonts"
            );
            Err(ExtractionError::Timeout(timeout.as_secs()))
        }
    }
}

/// Collapse whitespace and re-join words hyphenated across line breaks
pub fn normalize_text(raw: &str) -> String {
    let without_nul = raw.replace('\0', "");
    let joined = HYPHENATED_BREAK.replace_all(&without_nul, "$1$2");
    WHITESPACE.replace_all(&joined, " ").trim().to_string()
}

fn non_empty(text: String) -> Result<String, ExtractionError> {
    let text = normalize_text(&text);
    if text.is_empty() {
        Err(ExtractionError::Empty)
    } else {
        Ok(text)
    }
}

/// Font-aware extraction through the `pdf-extract` crate
pub struct PdfExtractExtractor;

impl TextExtractor for PdfExtractExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        // pdf-extract panics on some malformed documents instead of erroring
        let outcome = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
        match outcome {
            Ok(Ok(text)) => non_empty(text),
            Ok(Err(e)) => Err(ExtractionError::Unreadable(e.to_string())),
            Err(_) => Err(ExtractionError::Unreadable(
                "PDF parser crashed on this document".to_string(),
            )),
        }
    }
}

#[derive(Debug)]
struct TextRun {
    page: u32,
    x: f32,
    y: f32,
    seq: usize,
    text: String,
}

/// Walks page content streams with `lopdf`, tracking text positions, and
/// emits runs top-to-bottom then left-to-right.
///
/// Strings are decoded as UTF-16BE when they carry a BOM and as Latin-1
/// otherwise; embedded font encodings are not consulted.
pub struct LayoutExtractor;

impl LayoutExtractor {
    fn page_runs(page: u32, content: &Content, seq: &mut usize) -> Vec<TextRun> {
        let mut runs = Vec::new();
        let (mut line_x, mut line_y) = (0.0f32, 0.0f32);
        let mut leading = 0.0f32;

        let mut emit = |text: String, x: f32, y: f32, runs: &mut Vec<TextRun>| {
            if !text.trim().is_empty() {
                *seq += 1;
                runs.push(TextRun {
                    page,
                    x,
                    y,
                    seq: *seq,
                    text,
                });
            }
        };

        for op in &content.operations {
            let operands = &op.operands;
            match op.operator.as_str() {
                "BT" => {
                    line_x = 0.0;
                    line_y = 0.0;
                }
                "Td" | "TD" => {
                    if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                        line_x += tx;
                        line_y += ty;
                        if op.operator == "TD" {
                            leading = -ty;
                        }
                    }
                }
                "Tm" => {
                    if let (Some(e), Some(f)) = (number(operands, 4), number(operands, 5)) {
                        line_x = e;
                        line_y = f;
                    }
                }
                "TL" => {
                    if let Some(value) = number(operands, 0) {
                        leading = value;
                    }
                }
                "T*" => line_y -= leading,
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        emit(decode_pdf_string(bytes), line_x, line_y, &mut runs);
                    }
                }
                "'" => {
                    line_y -= leading;
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        emit(decode_pdf_string(bytes), line_x, line_y, &mut runs);
                    }
                }
                "\"" => {
                    line_y -= leading;
                    if let Some(Object::String(bytes, _)) = operands.get(2) {
                        emit(decode_pdf_string(bytes), line_x, line_y, &mut runs);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        emit(decode_tj_array(items), line_x, line_y, &mut runs);
                    }
                }
                _ => {}
            }
        }

        runs
    }

    /// Groups runs into visual lines, top to bottom, then reads each line
    /// left to right. Baselines within `LINE_TOLERANCE` of a line's first run
    /// belong to that line.
    fn assemble(mut runs: Vec<TextRun>) -> String {
        runs.sort_by(|a, b| {
            a.page
                .cmp(&b.page)
                .then(b.y.partial_cmp(&a.y).unwrap_or(Ordering::Equal))
        });

        let mut lines: Vec<(u32, f32, Vec<TextRun>)> = Vec::new();
        for run in runs {
            match lines.last_mut() {
                Some((page, top, line)) if *page == run.page && *top - run.y <= LINE_TOLERANCE => {
                    line.push(run)
                }
                _ => lines.push((run.page, run.y, vec![run])),
            }
        }

        let mut text = String::new();
        let mut previous_page = None;
        for (page, _, mut line) in lines {
            line.sort_by(|a, b| {
                a.x.partial_cmp(&b.x)
                    .unwrap_or(Ordering::Equal)
                    .then(a.seq.cmp(&b.seq))
            });
            match previous_page {
                Some(p) if p != page => text.push_str("\n\n"),
                Some(_) => text.push('\n'),
                None => {}
            }
            let words: Vec<&str> = line.iter().map(|run| run.text.as_str()).collect();
            text.push_str(&words.join(" "));
            previous_page = Some(page);
        }
        text
    }
}

impl TextExtractor for LayoutExtractor {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| ExtractionError::Unreadable(format!("Failed to load PDF: {}", e)))?;

        let mut runs = Vec::new();
        let mut seq = 0;
        for (page_number, page_id) in doc.get_pages() {
            let raw = match doc.get_page_content(page_id) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!(page = page_number, error = %e, "Could not read page content");
                    continue;
                }
            };
            match Content::decode(&raw) {
                Ok(content) => runs.extend(Self::page_runs(page_number, &content, &mut seq)),
                Err(e) => {
                    tracing::debug!(page = page_number, error = %e, "Could not decode page content");
                }
            }
        }

        non_empty(Self::assemble(runs))
    }
}

fn number(operands: &[Object], index: usize) -> Option<f32> {
    match operands.get(index)? {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

fn decode_tj_array(items: &[Object]) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            Object::Integer(_) | Object::Real(_) => {
                let adjustment = number(std::slice::from_ref(item), 0).unwrap_or(0.0);
                if -adjustment > TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
            _ => {}
        }
    }
    text
}

/// Tries extractors in order; the first non-empty result wins
pub struct FallbackExtractor {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl FallbackExtractor {
    pub fn new(extractors: Vec<Box<dyn TextExtractor>>) -> Self {
        Self { extractors }
    }
}

impl TextExtractor for FallbackExtractor {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        let mut last_error = ExtractionError::Empty;
        let mut saw_empty = false;

        for extractor in &self.extractors {
            match extractor.extract(bytes) {
                Ok(text) => {
                    tracing::debug!(extractor = extractor.name(), text_length = text.len(), "Text extracted");
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!(extractor = extractor.name(), error = %e, "Extractor failed, trying next");
                    saw_empty |= matches!(e, ExtractionError::Empty);
                    last_error = e;
                }
            }
        }

        // A readable document without text says more than a parser error
        if saw_empty {
            Err(ExtractionError::Empty)
        } else {
            Err(last_error)
        }
    }
}

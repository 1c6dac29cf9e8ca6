//! Text extraction collaborator.
//!
//! Turns uploaded file bytes into plain UTF-8 text plus a MIME type. The
//! ingestion pipeline only sees the [`TextExtractor`] trait; the default
//! implementation handles PDF, DOC/DOCX, PPTX, TXT, CSV and images.
//!
//! No OCR engine is bundled: images yield a placeholder line naming the
//! file, so they are still indexed and attributable.

use std::io::Read;

use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File extensions accepted for upload, as listed by `GET /formats`.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".pptx", ".txt", ".csv", ".png", ".jpg", ".jpeg",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Office document extraction failed: {0}")]
    Ooxml(String),
}

/// Extractor output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub mime_type: String,
}

pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes`, using `file_name` to pick the format.
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedText, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Doc,
    Docx,
    Pptx,
    Txt,
    Csv,
    Png,
    Jpeg,
}

impl FileKind {
    /// Kind from the file name's extension, case-insensitive.
    pub fn from_name(file_name: &str) -> Option<Self> {
        let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "doc" => Some(FileKind::Doc),
            "docx" => Some(FileKind::Docx),
            "pptx" => Some(FileKind::Pptx),
            "txt" => Some(FileKind::Txt),
            "csv" => Some(FileKind::Csv),
            "png" => Some(FileKind::Png),
            "jpg" | "jpeg" => Some(FileKind::Jpeg),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Doc => "application/msword",
            FileKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileKind::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            FileKind::Txt => "text/plain",
            FileKind::Csv => "text/csv",
            FileKind::Png => "image/png",
            FileKind::Jpeg => "image/jpeg",
        }
    }
}

/// Reject unsupported file names before reading any content.
pub fn check_supported(file_name: &str) -> Result<FileKind, ExtractError> {
    FileKind::from_name(file_name).ok_or_else(|| {
        ExtractError::Unsupported(format!(
            "'{}' (supported: {})",
            file_name,
            SUPPORTED_EXTENSIONS.join(", ")
        ))
    })
}

/// Built-in extractor.
#[derive(Debug, Default, Clone)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        let kind = check_supported(file_name)?;
        let text = match kind {
            FileKind::Pdf => extract_pdf(bytes)?,
            // Legacy .doc is only readable when it is really OOXML.
            FileKind::Doc | FileKind::Docx => extract_docx(bytes)?,
            FileKind::Pptx => extract_pptx(bytes)?,
            FileKind::Txt | FileKind::Csv => String::from_utf8_lossy(bytes).into_owned(),
            FileKind::Png | FileKind::Jpeg => image_placeholder(file_name),
        };
        Ok(ExtractedText {
            text,
            mime_type: kind.mime_type().to_string(),
        })
    }
}

pub fn image_placeholder(file_name: &str) -> String {
    format!("Image file: {} (no OCR text available)", file_name)
}

/// Normalize extracted text before chunking.
///
/// CRLF and lone CR become LF, runs of spaces and tabs collapse to one
/// space, trailing spaces are dropped from each line, three or more
/// newlines collapse to one blank line, and the result is trimmed.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut newlines = 0usize;
    for line in unified.split('\n') {
        let collapsed = line
            .split([' ', '\t', '\u{a0}'])
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if collapsed.is_empty() {
            newlines += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if newlines >= 1 { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        newlines = 0;
    }
    out
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    // Word paragraphs are <w:p>; keep them as separate lines.
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !text.trim().is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenate the text of every `<*:t>` element, ending a line at each
/// closing element whose local name is `break_on`.
fn collect_text_runs(xml: &[u8], break_on: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == break_on && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

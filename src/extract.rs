//! Structured text extraction from course material files.
//!
//! Each supported format is turned into a list of [`Section`]s that keep the
//! location information citations need: PDFs yield one section per page,
//! Markdown and Word documents one section per heading, plain text a single
//! section. Filename conventions (`Lecture_05_RNN.pdf`) supply lecture,
//! chapter and topic metadata.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use regex::Regex;
use thiserror::Error;

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Headings longer than this are treated as body text.
const MAX_HEADING_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(FileKind::Text),
            "md" | "markdown" => Some(FileKind::Markdown),
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            _ => None,
        }
    }
}

/// A contiguous piece of a document with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub text: String,
    pub page: Option<i64>,
    pub section: Option<String>,
}

impl Section {
    fn titled(section: &str, text: String) -> Self {
        Self {
            text,
            page: None,
            section: Some(section.to_string()),
        }
    }
}

/// Read `path` and split it into sections according to its extension.
pub fn parse_file(path: &Path) -> Result<Vec<Section>, ExtractError> {
    let kind = FileKind::from_path(path)
        .ok_or_else(|| ExtractError::UnsupportedFileType(path.display().to_string()))?;
    let io_err = |source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    };

    match kind {
        FileKind::Text => {
            let content = std::fs::read_to_string(path).map_err(io_err)?;
            Ok(vec![Section {
                text: content,
                page: None,
                section: None,
            }])
        }
        FileKind::Markdown => {
            let content = std::fs::read_to_string(path).map_err(io_err)?;
            Ok(parse_markdown(&content))
        }
        FileKind::Pdf => parse_pdf(&std::fs::read(path).map_err(io_err)?),
        FileKind::Docx => parse_docx(&std::fs::read(path).map_err(io_err)?),
    }
}

/// One section per `#` heading. Text before the first heading belongs to
/// "Introduction".
pub fn parse_markdown(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = "Introduction".to_string();
    let mut lines: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.starts_with('#') {
            flush(&mut sections, &current, &mut lines);
            current = line.trim_start_matches('#').trim().to_string();
        } else {
            lines.push(line);
        }
    }
    flush(&mut sections, &current, &mut lines);

    if sections.is_empty() {
        sections.push(Section::titled("Document", content.to_string()));
    }
    sections
}

fn flush(sections: &mut Vec<Section>, title: &str, lines: &mut Vec<&str>) {
    let text = lines.join("\n");
    lines.clear();
    if !text.trim().is_empty() {
        sections.push(Section::titled(title, text));
    }
}

/// One section per page, numbered from 1. Blank pages are skipped.
pub fn parse_pdf(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| Section {
            text: text.trim().to_string(),
            page: Some(i as i64 + 1),
            section: None,
        })
        .collect())
}

/// One section per heading paragraph. A paragraph is a heading if it is
/// short and either uses a `Heading*` style or starts with a numbering
/// prefix followed by a capital letter.
pub fn parse_docx(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let paragraphs = docx_paragraphs(bytes)?;
    let numbered =
        Regex::new(r"^(\d+\.|\d+\)|\w+\.)\s+[A-Z]").map_err(|e| ExtractError::Docx(e.to_string()))?;

    let mut sections = Vec::new();
    let mut current = "Introduction".to_string();
    let mut body: Vec<&str> = Vec::new();

    for (text, styled_heading) in &paragraphs {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let is_heading = text.chars().count() < MAX_HEADING_CHARS
            && (*styled_heading || numbered.is_match(text));
        if is_heading {
            flush(&mut sections, &current, &mut body);
            current = text.to_string();
        } else {
            body.push(text);
        }
    }
    flush(&mut sections, &current, &mut body);

    if sections.is_empty() {
        let all: Vec<&str> = paragraphs.iter().map(|(t, _)| t.as_str()).collect();
        sections.push(Section::titled("Document", all.join("\n")));
    }
    Ok(sections)
}

/// Paragraph texts of `word/document.xml`, each with whether its style is a
/// heading style.
fn docx_paragraphs(bytes: &[u8]) -> Result<Vec<(String, bool)>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut text = String::new();
    let mut heading = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    text.clear();
                    heading = false;
                }
                b"t" => in_text = true,
                b"pStyle" => heading |= is_heading_style(&e),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"pStyle" {
                    heading |= is_heading_style(&e);
                }
            }
            Ok(Event::Text(te)) if in_text => {
                text.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push((std::mem::take(&mut text), heading)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn is_heading_style(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"val" && a.value.as_ref().starts_with(b"Heading")
    })
}

/// Metadata inferred from a material's filename.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilenameMetadata {
    pub lecture_number: Option<i64>,
    pub chapter: Option<String>,
    pub topic: Option<String>,
}

/// Parse conventions such as `Lecture_05_RNN.pdf` (lecture 5, topic "RNN"),
/// `Chapter_7_Neural_Networks.pdf` (chapter "7") and `Lab_3.md` (lecture 3).
/// Assignment and lab numbers take precedence over a lecture number.
pub fn metadata_from_filename(filename: &str) -> anyhow::Result<FilenameMetadata> {
    let lecture = Regex::new(r"[Ll]ecture[_\s-]*(\d+)")?;
    let chapter = Regex::new(r"[Cc]hapter[_\s-]*(\d+)")?;
    let assignment = Regex::new(r"[Aa]ssignment[_\s-]*(\d+)")?;
    let lab = Regex::new(r"[Ll]ab[_\s-]*(\d+)")?;
    let topic = Regex::new(r"\d+[_\s-]+([A-Za-z][A-Za-z0-9_\s-]+?)(?:\.|$)")?;

    let number = |re: &Regex| {
        re.captures(filename)
            .and_then(|c| c[1].parse::<i64>().ok())
    };

    let mut meta = FilenameMetadata {
        lecture_number: number(&lecture),
        chapter: chapter.captures(filename).map(|c| c[1].to_string()),
        topic: topic.captures(filename).map(|c| {
            c[1].replace(['_', '-'], " ").trim().to_string()
        }),
    };
    if let Some(n) = number(&assignment) {
        meta.lecture_number = Some(n);
    }
    if let Some(n) = number(&lab) {
        meta.lecture_number = Some(n);
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_kind_from_extension() {
        assert_eq!(FileKind::from_path(Path::new("a/B.PDF")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("notes.md")), Some(FileKind::Markdown));
        assert_eq!(FileKind::from_path(Path::new("slides.pptx")), None);
        assert_eq!(FileKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_unsupported_file_rejected() {
        let err = parse_file(Path::new("deck.pptx")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType(_)));
    }

    #[test]
    fn test_markdown_sections() {
        let md = "Intro line.\n# Heaps\nA heap is a tree.\n\n## Sift down\nSwap with child.\n";
        let sections = parse_markdown(md);
        let titles: Vec<&str> = sections
            .iter()
            .map(|s| s.section.as_deref().unwrap())
            .collect();
        assert_eq!(titles, vec!["Introduction", "Heaps", "Sift down"]);
        assert!(sections[1].text.contains("A heap is a tree."));
    }

    #[test]
    fn test_markdown_without_body_falls_back_to_document() {
        let sections = parse_markdown("# Only a heading");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].section.as_deref(), Some("Document"));
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        assert!(matches!(parse_pdf(b"not a pdf"), Err(ExtractError::Pdf(_))));
    }

    #[test]
    fn test_invalid_docx_returns_error() {
        assert!(matches!(parse_docx(b"not a zip"), Err(ExtractError::Docx(_))));
    }

    fn docx(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_heading_sections() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Graphs</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">A graph has </w:t></w:r><w:r><w:t>vertices.</w:t></w:r></w:p>
            <w:p><w:r><w:t>2. Traversal</w:t></w:r></w:p>
            <w:p><w:r><w:t>BFS uses a queue.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let sections = parse_docx(&docx(xml)).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].section.as_deref(), Some("Graphs"));
        assert_eq!(sections[0].text, "A graph has vertices.");
        assert_eq!(sections[1].section.as_deref(), Some("2. Traversal"));
    }

    #[test]
    fn test_filename_metadata() {
        let m = metadata_from_filename("Lecture_05_RNN.pdf").unwrap();
        assert_eq!(m.lecture_number, Some(5));
        assert_eq!(m.topic.as_deref(), Some("RNN"));

        let m = metadata_from_filename("Chapter_7_Neural_Networks.pdf").unwrap();
        assert_eq!(m.chapter.as_deref(), Some("7"));
        assert_eq!(m.topic.as_deref(), Some("Neural Networks"));
        assert_eq!(m.lecture_number, None);

        let m = metadata_from_filename("Assignment_3.pdf").unwrap();
        assert_eq!(m.lecture_number, Some(3));
        assert_eq!(m.topic, None);

        assert_eq!(
            metadata_from_filename("notes.txt").unwrap(),
            FilenameMetadata::default()
        );
    }
}

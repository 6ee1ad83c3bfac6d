//! Text extraction for office documents, PDFs and tables.
//!
//! Works on raw bytes so cited files and downloaded URLs share one path.
//! Tables (CSV and spreadsheet sheets) are described rather than dumped: a
//! shape line, the headers, per-column statistics for numeric columns and
//! the first few rows.

use crate::error::{GraderError, Result};
use calamine::{Reader, Xlsx};
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use zip::ZipArchive;

const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Pptx,
    Csv,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "pptx" => Some(Self::Pptx),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or("").trim();
        match mime {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => Some(Self::Xlsx),
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Some(Self::Pptx)
            }
            "text/csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Text pulled out of a document, with its embedded title when it has one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Extracted {
    pub title: Option<String>,
    pub content: String,
}

impl Extracted {
    fn untitled(content: String) -> Self {
        Self {
            title: None,
            content,
        }
    }
}

pub(crate) fn extract(format: DocumentFormat, bytes: &[u8]) -> Result<Extracted> {
    match format {
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map(Extracted::untitled)
            .map_err(|e| GraderError::Document(format!("pdf: {e}"))),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Xlsx => extract_xlsx(bytes).map(Extracted::untitled),
        DocumentFormat::Pptx => extract_pptx(bytes).map(Extracted::untitled),
        DocumentFormat::Csv => extract_csv(bytes).map(Extracted::untitled),
    }
}

fn open_zip(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| GraderError::Document(format!("zip: {e}")))
}

fn zip_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(GraderError::Document(format!("{name}: {e}"))),
    };
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| GraderError::Document(format!("{name}: {e}")))?;
    Ok(Some(xml))
}

fn xml_error(e: impl std::fmt::Display) -> GraderError {
    GraderError::Document(format!("xml: {e}"))
}

/// Paragraphs in body order; table rows become `cell | cell` lines.
fn extract_docx(bytes: &[u8]) -> Result<Extracted> {
    let mut archive = open_zip(bytes)?;
    let xml = zip_entry(&mut archive, "word/document.xml")?
        .ok_or_else(|| GraderError::Document("docx has no word/document.xml".to_string()))?;

    let mut reader = XmlReader::from_str(&xml);
    let mut lines = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tbl" => table_depth += 1,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" | b"w:br" => paragraph.push(' '),
                _ => {}
            },
            Event::Text(t) if in_text => paragraph.push_str(&t.unescape().map_err(xml_error)?),
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let text = std::mem::take(&mut paragraph);
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if table_depth > 0 {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    } else {
                        lines.push(text.to_string());
                    }
                }
                b"w:tc" => {
                    let text = std::mem::take(&mut cell);
                    if !text.is_empty() {
                        row.push(text);
                    }
                }
                b"w:tr" => {
                    if !row.is_empty() {
                        lines.push(row.join(" | "));
                    }
                    row.clear();
                }
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let title = zip_entry(&mut archive, "docProps/core.xml")?
        .and_then(|core| first_element_text(&core, b"dc:title"));
    Ok(Extracted {
        title,
        content: lines.join("\n\n"),
    })
}

fn first_element_text(xml: &str, element: &[u8]) -> Option<String> {
    let mut reader = XmlReader::from_str(xml);
    let mut inside = false;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.name().as_ref() == element => inside = true,
            Event::Text(t) if inside => {
                let text = t.unescape().ok()?.trim().to_string();
                return (!text.is_empty()).then_some(text);
            }
            Event::End(e) if e.name().as_ref() == element => return None,
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Slide text runs, one block per slide in slide order.
fn extract_pptx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_zip(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort_unstable();

    let mut texts = Vec::new();
    for (_, name) in slides {
        let Some(xml) = zip_entry(&mut archive, &name)? else {
            continue;
        };
        let mut reader = XmlReader::from_str(&xml);
        let mut runs = Vec::new();
        let mut in_text = false;
        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(e) if e.name().as_ref() == b"a:t" => in_text = true,
                Event::End(e) if e.name().as_ref() == b"a:t" => in_text = false,
                Event::Text(t) if in_text => {
                    let run = t.unescape().map_err(xml_error)?;
                    if !run.trim().is_empty() {
                        runs.push(run.trim().to_string());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !runs.is_empty() {
            texts.push(runs.join(" "));
        }
    }

    if texts.is_empty() {
        return Ok(String::new());
    }
    let mut content = format!("Presentation with {} slides:", texts.len());
    for (i, text) in texts.iter().enumerate() {
        content.push_str(&format!("\n\nSlide {}:\n{}", i + 1, text));
    }
    Ok(content)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| GraderError::Document(format!("xlsx: {e}")))?;

    let mut parts = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| GraderError::Document(format!("xlsx sheet '{name}': {e}")))?;
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
        let header = rows.next().unwrap_or_default();
        let body: Vec<Vec<String>> = rows.collect();
        parts.push(describe_table(&format!("Sheet '{name}'"), &header, &body));
    }
    Ok(parts.join("\n\n"))
}

fn extract_csv(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let header: Vec<String> = reader
        .headers()
        .map_err(|e| GraderError::Document(format!("csv: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    let mut body = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| GraderError::Document(format!("csv: {e}")))?;
        body.push(record.iter().map(str::to_string).collect());
    }
    Ok(describe_table("CSV data", &header, &body))
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnStats {
    count: usize,
    mean: f64,
    std: f64,
    min: f64,
    p25: f64,
    median: f64,
    p75: f64,
    max: f64,
}

/// Statistics for a column whose non-empty cells are all numbers.
fn column_stats(cells: &[&str]) -> Option<ColumnStats> {
    let mut values = cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| c.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(ColumnStats {
        count: n,
        mean,
        std,
        min: values[0],
        p25: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        p75: quantile(&values, 0.75),
        max: values[n - 1],
    })
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

fn describe_table(label: &str, header: &[String], rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).chain([header.len()]).max().unwrap_or(0);
    let mut parts = vec![format!("{label} with {} rows and {columns} columns", rows.len())];
    if columns == 0 {
        return parts.remove(0);
    }

    let name = |i: usize| {
        header
            .get(i)
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("column {}", i + 1))
    };
    parts.push(format!(
        "Headers: {}",
        (0..columns).map(name).collect::<Vec<_>>().join(", ")
    ));

    let mut stats = Vec::new();
    for i in 0..columns {
        let cells: Vec<&str> = rows
            .iter()
            .map(|row| row.get(i).map(String::as_str).unwrap_or(""))
            .collect();
        if let Some(s) = column_stats(&cells) {
            stats.push(format!(
                "For column '{}': count {}, mean {:.2}, std {:.2}, min {:.2}, 25% {:.2}, median {:.2}, 75% {:.2}, max {:.2}",
                name(i),
                s.count,
                s.mean,
                s.std,
                s.min,
                s.p25,
                s.median,
                s.p75,
                s.max
            ));
        }
    }
    if !stats.is_empty() {
        parts.push(format!("Data summary:\n{}", stats.join("\n")));
    }

    if !rows.is_empty() {
        let preview: Vec<String> = std::iter::once(header.join(" | "))
            .chain(rows.iter().take(PREVIEW_ROWS).map(|row| row.join(" | ")))
            .collect();
        parts.push(format!("First few rows:\n{}", preview.join("\n")));
    }
    parts.join("\n\n")
}

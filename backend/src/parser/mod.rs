//! Delimited-text loader with encoding and delimiter auto-detection.
//!
//! Reads any `Read` source into a [`Table`], either in full or up to a row
//! limit, and reports how many bytes were consumed so callers can
//! extrapolate row counts for files that were only partially read.

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use serde_json::{Map, Value};
use std::collections::HashSet;
use encoding_rs::Encoding;
use std::io::{Cursor, Read};
use tracing::warn;

use crate::error::{ParseError, ParseResult};
use crate::models::{Cell, Table};

/// Bytes inspected for encoding and delimiter detection.
const SNIFF_BYTES: usize = 64 * 1024;

/// Candidate delimiters, in tie-break order.
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Text encodings the loader can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

impl TextEncoding {
    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "iso-8859-1",
            TextEncoding::Windows1252 => "windows-1252",
        }
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            TextEncoding::Utf8 => encoding_rs::UTF_8,
            // encoding_rs follows WHATWG, where latin-1 is decoded as windows-1252
            TextEncoding::Latin1 | TextEncoding::Windows1252 => encoding_rs::WINDOWS_1252,
        }
    }

    /// Lossy decode, only for sniffing the delimiter.
    fn decode_lossy(self, bytes: &[u8]) -> String {
        self.encoding().decode_without_bom_handling(bytes).0.into_owned()
    }
}

/// Field decoder for one load.
///
/// The encoding is detected on a prefix only. A later field that is not valid
/// UTF-8 switches the load to windows-1252 when everything decoded so far was
/// ASCII, which reads the same under both. Otherwise the file mixes encodings
/// and loading fails rather than replacing bytes.
#[derive(Debug)]
struct FieldDecoder {
    encoding: TextEncoding,
    saw_non_ascii: bool,
}

impl FieldDecoder {
    fn new(encoding: TextEncoding) -> Self {
        Self { encoding, saw_non_ascii: false }
    }

    fn decode(&mut self, bytes: &[u8], line: u64) -> ParseResult<String> {
        if self.encoding == TextEncoding::Utf8 {
            match encoding_rs::UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
                Some(text) => {
                    self.saw_non_ascii |= !text.is_ascii();
                    return Ok(text.into_owned());
                }
                None if self.saw_non_ascii => return Err(ParseError::MixedEncoding { line }),
                None => {
                    warn!(line, "invalid UTF-8 past the sniffed prefix, decoding as windows-1252");
                    self.encoding = TextEncoding::Windows1252;
                }
            }
        }
        Ok(self.encoding.encoding().decode_without_bom_handling(bytes).0.into_owned())
    }
}

/// A loaded table plus how it was read.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub table: Table,
    pub encoding: TextEncoding,
    pub delimiter: u8,
    /// Bytes of input covering the header and the returned rows.
    pub bytes_read: u64,
    /// True when the row limit stopped reading before the end of input.
    pub truncated: bool,
}

/// Detect the encoding of a byte prefix.
///
/// Valid UTF-8 (a character cut at the end of the prefix is tolerated) wins
/// outright; otherwise chardet decides between the single-byte encodings.
pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    match std::str::from_utf8(bytes) {
        Ok(_) => return TextEncoding::Utf8,
        Err(e) if e.error_len().is_none() => return TextEncoding::Utf8,
        Err(_) => {}
    }

    let charset = chardet::detect(bytes).0;
    match charset.to_lowercase().as_str() {
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => TextEncoding::Latin1,
        "windows-1252" | "cp1252" => TextEncoding::Windows1252,
        "ascii" | "utf-8" | "utf8" => TextEncoding::Utf8,
        // Unrecognized single-byte charsets decode best as windows-1252
        _ => TextEncoding::Windows1252,
    }
}

/// Detect the delimiter by counting candidates on the first non-blank line.
pub fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let mut best = b',';
    let mut best_count = 0;
    for sep in DELIMITERS {
        let count = first_line.bytes().filter(|b| *b == sep).count();
        if count > best_count {
            best_count = count;
            best = sep;
        }
    }
    best
}

/// Parse a complete in-memory payload.
pub fn parse_bytes(bytes: &[u8]) -> ParseResult<LoadedTable> {
    read_table(bytes, None)
}

/// Read a table from `reader`, stopping after `row_limit` data rows if given.
pub fn read_table<R: Read>(mut reader: R, row_limit: Option<usize>) -> ParseResult<LoadedTable> {
    let prefix = read_prefix(&mut reader)?;
    if prefix.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }
    if prefix.contains(&0) {
        return Err(ParseError::NotText);
    }

    let mut decoder = FieldDecoder::new(detect_encoding(&prefix));
    let delimiter = detect_delimiter(&decoder.encoding.decode_lossy(&prefix));

    let source = Cursor::new(prefix).chain(reader);
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(source);

    let mut record = ByteRecord::new();
    let headers = loop {
        if !csv_reader.read_byte_record(&mut record)? {
            return Err(ParseError::Empty);
        }
        if !is_blank_record(&record) {
            break normalize_headers(&record, &mut decoder)?;
        }
    };
    if headers.is_empty() {
        return Err(ParseError::NoHeaders);
    }

    let limit = row_limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    let mut bytes_read = csv_reader.position().byte();
    let mut truncated = false;

    while csv_reader.read_byte_record(&mut record)? {
        if is_blank_record(&record) {
            continue;
        }
        if rows.len() >= limit {
            truncated = true;
            break;
        }
        rows.push(decode_row(&record, headers.len(), &mut decoder)?);
        bytes_read = csv_reader.position().byte();
    }

    Ok(LoadedTable {
        table: Table::new(headers, rows),
        encoding: decoder.encoding,
        delimiter,
        bytes_read,
        truncated,
    })
}

/// Serialize a table as comma-delimited UTF-8 with a header row.
pub fn write_csv(table: &Table) -> Result<Vec<u8>, String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&table.headers).map_err(|e| e.to_string())?;
    for row in &table.rows {
        writer
            .write_record(row.iter().map(|cell| cell.to_string()))
            .map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

/// First `n` rows as JSON objects, `null` for missing cells.
pub fn preview_records(table: &Table, n: usize) -> Vec<Value> {
    table
        .rows
        .iter()
        .take(n)
        .map(|row| {
            let mut obj = Map::new();
            for (header, cell) in table.headers.iter().zip(row) {
                let value = if cell.is_missing() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                obj.insert(header.clone(), value);
            }
            Value::Object(obj)
        })
        .collect()
}

fn read_prefix<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SNIFF_BYTES);
    reader.by_ref().take(SNIFF_BYTES as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

fn is_blank_record(record: &ByteRecord) -> bool {
    record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace))
        && record.len() <= 1
}

/// Blank headers become `Unnamed: <index>`, repeats get `.1`, `.2`, ...
fn normalize_headers(record: &ByteRecord, decoder: &mut FieldDecoder) -> ParseResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut headers = Vec::with_capacity(record.len());
    let line = record_line(record);

    for (i, field) in record.iter().enumerate() {
        let mut name = decoder.decode(field, line)?;
        if i == 0 {
            name = name.trim_start_matches('\u{feff}').to_string();
        }
        if name.trim().is_empty() {
            name = format!("Unnamed: {i}");
        }
        let mut candidate = name.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{name}.{suffix}");
            suffix += 1;
        }
        seen.insert(candidate.clone());
        headers.push(candidate);
    }
    Ok(headers)
}

fn record_line(record: &ByteRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn decode_row(record: &ByteRecord, width: usize, decoder: &mut FieldDecoder) -> ParseResult<Vec<Cell>> {
    let extra_is_blank = record
        .iter()
        .skip(width)
        .all(|field| field.iter().all(u8::is_ascii_whitespace));
    if record.len() > width && !extra_is_blank {
        return Err(ParseError::RaggedRow {
            line: record_line(record),
            expected: width,
            found: record.len(),
        });
    }

    let line = record_line(record);
    let mut row = Vec::with_capacity(width);
    for field in record.iter().take(width) {
        row.push(Cell::Text(decoder.decode(field, line)?));
    }
    row.resize(width, Cell::Null);
    Ok(row)
}

//! Sheet reading and merged output writing.
//!
//! Input sheets are delimited text files decoded through `encoding_rs`, so
//! exports saved as CP949/EUC-KR read the same as UTF-8 ones. Rows keep their
//! raw width; the header detector and mapper decide what the cells mean.
//! The `-` path reads stdin or writes stdout.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::cell::{RawCell, SheetMatrix};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const UTF8_BOM: char = '\u{feff}';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Identifier a sheet is tracked under: its file name, or `stdin`.
pub fn source_id_for(path: &Path) -> String {
    if is_dash(path) {
        return "stdin".to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Reader for header-less, ragged sheets: title rows and notes above the
/// header rarely have the same width as the table below them.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads every row of a delimited sheet into a matrix of text cells.
pub fn read_sheet_from<R>(reader: R, delimiter: u8, encoding: &'static Encoding) -> Result<SheetMatrix>
where
    R: Read,
{
    let mut csv_reader = open_csv_reader(reader, delimiter);
    let mut rows = Vec::new();
    for (idx, record) in csv_reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", idx + 1))?;
        let mut fields =
            decode_record(&record, encoding).with_context(|| format!("Decoding row {}", idx + 1))?;
        if idx == 0
            && let Some(first) = fields.first_mut()
            && first.starts_with(UTF8_BOM)
        {
            first.remove(0);
        }
        rows.push(fields.into_iter().map(RawCell::from_text).collect());
    }
    Ok(SheetMatrix::new(rows))
}

pub fn read_sheet(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<SheetMatrix> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    let matrix = read_sheet_from(reader, delimiter, encoding)
        .with_context(|| format!("Reading sheet {path:?}"))?;
    debug!(
        "Read {path:?}: {} row(s), widest {} column(s)",
        matrix.len(),
        matrix.width()
    );
    Ok(matrix)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

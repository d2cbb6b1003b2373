//! Raw record readers: spreadsheet workbooks and exports, JSON row dumps and
//! tab-delimited text.

use std::io::Cursor;
use std::path::Path;

use arsa_core::{Column, RawRecord, RawValue};
use calamine::{Data, Reader, Xlsx};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "arsa-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    /// Excel workbook; the first worksheet is read, its first row being the header.
    Xlsx,
    /// Spreadsheet exported as comma or semicolon separated values with a header row.
    Csv,
    /// JSON array of row objects keyed by column header.
    Json,
    /// Header-less, tab-delimited lines: city, district, neighborhood[, area, ada, parsel].
    Tsv,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" => Some(InputFormat::Xlsx),
            "csv" => Some(InputFormat::Csv),
            "json" => Some(InputFormat::Json),
            "tsv" | "txt" | "tab" => Some(InputFormat::Tsv),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            InputFormat::Xlsx => "xlsx",
            InputFormat::Csv => "csv",
            InputFormat::Json => "json",
            InputFormat::Tsv => "tsv",
        }
    }
}

/// Row a reader could not turn into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub records: Vec<RawRecord>,
    pub skipped: Vec<SkippedRow>,
}

impl RawBatch {
    fn skip(&mut self, row: usize, reason: impl Into<String>) {
        self.skipped.push(SkippedRow {
            row,
            reason: reason.into(),
        });
    }

    /// Keeps the record only when every geographic column is present.
    fn accept(&mut self, record: RawRecord) {
        let missing = record.missing_columns(&Column::GEO);
        if missing.is_empty() {
            self.records.push(record);
        } else {
            let names = missing.iter().map(|c| c.key()).collect::<Vec<_>>().join(", ");
            self.skip(record.row, format!("missing column(s): {names}"));
        }
    }
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("input is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("unreadable csv")]
    Csv(#[from] csv::Error),
    #[error("unreadable json rows")]
    Json(#[from] serde_json::Error),
    #[error("unreadable xlsx workbook")]
    Xlsx(#[from] calamine::XlsxError),
    #[error("workbook has no worksheet")]
    NoWorksheet,
}

pub trait RecordReader: Send + Sync {
    /// Parses a whole source. Per-row problems land in `RawBatch::skipped`; only an
    /// unreadable source as a whole is an error.
    fn read(&self, bytes: &[u8]) -> Result<RawBatch, ReaderError>;
}

pub fn reader_for_format(format: InputFormat) -> Box<dyn RecordReader> {
    match format {
        InputFormat::Xlsx => Box::new(XlsxRecordReader),
        InputFormat::Csv => Box::new(CsvRecordReader),
        InputFormat::Json => Box::new(JsonRowsReader),
        InputFormat::Tsv => Box::new(DelimitedTextReader),
    }
}

/// Maps a source header onto a canonical column. Headers are matched after folding
/// Turkish dotted/dotless capitals, so `İL`, `IL` and `il` all mean the city.
pub fn column_for_header(header: &str) -> Option<Column> {
    let folded = fold_header(header);
    let column = match folded.as_str() {
        "il" | "city" | "şehir" | "sehir" => Column::City,
        "ilçe" | "ilce" | "district" => Column::District,
        "mahalle" | "mah" | "köy" | "neighborhood" | "neighbourhood" => Column::Neighborhood,
        "alan" | "alan (m2)" | "alan(m2)" | "m2" | "area" => Column::Area,
        "ada" | "block" => Column::CadastralBlock,
        "parsel" | "parcel" => Column::CadastralParcel,
        _ => return None,
    };
    Some(column)
}

fn fold_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .flat_map(|c| match c {
            'İ' | 'I' | 'ı' => vec!['i'],
            other => other.to_lowercase().collect(),
        })
        .collect()
}

fn decode(bytes: &[u8]) -> Result<&str, ReaderError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn text_cell(cell: &str) -> RawValue {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        RawValue::Null
    } else {
        RawValue::Text(trimmed.to_string())
    }
}

/// Reads a number written the Turkish way: `.` groups thousands and `,` marks the
/// decimals (`1.234` is 1234, `740,5` is 740.5). A lone `.` that does not group digits
/// in threes is taken as a decimal point, so `740.5` and `15000.0` still read as written.
pub fn turkish_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    let digits = cell.strip_prefix('-').unwrap_or(cell);
    let canonical = if cell.contains(',') {
        cell.replace('.', "").replace(',', ".")
    } else if is_grouped(digits) {
        cell.replace('.', "")
    } else {
        cell.to_string()
    };
    canonical.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn is_grouped(digits: &str) -> bool {
    let mut groups = digits.split('.');
    let lead = groups.next().unwrap_or_default();
    let mut rest = groups.peekable();
    rest.peek().is_some()
        && (1..=3).contains(&lead.len())
        && lead.chars().all(|c| c.is_ascii_digit())
        && rest.all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRecordReader;

impl CsvRecordReader {
    /// Spreadsheet exports in Turkish locales use `;`; everything else uses `,`.
    fn sniff_delimiter(text: &str) -> u8 {
        let header = text.lines().next().unwrap_or_default();
        let semicolons = header.matches(';').count();
        let commas = header.matches(',').count();
        if semicolons > commas {
            b';'
        } else {
            b','
        }
    }
}

impl RecordReader for CsvRecordReader {
    fn read(&self, bytes: &[u8]) -> Result<RawBatch, ReaderError> {
        let text = decode(bytes)?;
        let delimiter = Self::sniff_delimiter(text);
        let turkish_locale = delimiter == b';';
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut positions: Vec<(usize, Column)> = Vec::new();
        for (idx, header) in reader.headers()?.iter().enumerate() {
            if let Some(column) = column_for_header(header) {
                if !positions.iter().any(|(_, c)| *c == column) {
                    positions.push((idx, column));
                }
            }
        }

        let mut batch = RawBatch::default();
        for (idx, result) in reader.records().enumerate() {
            let fallback_row = idx + 2;
            let row = match result {
                Ok(row) => row,
                Err(err) => {
                    let line = err
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or(fallback_row);
                    batch.skip(line, err.to_string());
                    continue;
                }
            };
            let line = row
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(fallback_row);

            let mut record = RawRecord::new(line);
            for (pos, column) in &positions {
                if let Some(cell) = row.get(*pos) {
                    let value = match turkish_number(cell) {
                        Some(area) if turkish_locale && *column == Column::Area => RawValue::Number(area),
                        _ => text_cell(cell),
                    };
                    record.set(*column, value);
                }
            }
            batch.accept(record);
        }
        Ok(batch)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowsReader;

fn json_cell(value: &JsonValue) -> RawValue {
    match value {
        JsonValue::Null => RawValue::Null,
        JsonValue::String(s) => text_cell(s),
        JsonValue::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Null),
        other => RawValue::Text(other.to_string()),
    }
}

impl RecordReader for JsonRowsReader {
    fn read(&self, bytes: &[u8]) -> Result<RawBatch, ReaderError> {
        let rows: Vec<JsonValue> = serde_json::from_str(decode(bytes)?)?;
        let mut batch = RawBatch::default();
        for (idx, value) in rows.iter().enumerate() {
            let row = idx + 1;
            let Some(object) = value.as_object() else {
                batch.skip(row, "row is not a JSON object");
                continue;
            };
            let mut record = RawRecord::new(row);
            for (key, cell) in object {
                if let Some(column) = column_for_header(key) {
                    if !record.has(column) {
                        record.set(column, json_cell(cell));
                    }
                }
            }
            batch.accept(record);
        }
        Ok(batch)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedTextReader;

impl DelimitedTextReader {
    const COLUMNS: [Column; 6] = Column::ALL;
    const MIN_COLUMNS: usize = 3;
}

impl RecordReader for DelimitedTextReader {
    fn read(&self, bytes: &[u8]) -> Result<RawBatch, ReaderError> {
        let text = decode(bytes)?;
        let mut batch = RawBatch::default();
        for (idx, line) in text.lines().enumerate() {
            let row = idx + 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < Self::MIN_COLUMNS {
                batch.skip(
                    row,
                    format!(
                        "expected at least {} tab-separated columns, found {}",
                        Self::MIN_COLUMNS,
                        parts.len()
                    ),
                );
                continue;
            }
            let mut record = RawRecord::new(row);
            for (column, cell) in Self::COLUMNS.iter().zip(parts.iter()) {
                let value = text_cell(cell);
                if Column::GEO.contains(column) || !value.is_blank() {
                    record.set(*column, value);
                }
            }
            batch.accept(record);
        }
        Ok(batch)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxRecordReader;

fn workbook_cell(cell: &Data) -> Option<RawValue> {
    match cell {
        Data::Empty => None,
        Data::Int(n) => Some(RawValue::Number(*n as f64)),
        Data::Float(n) => Some(RawValue::Number(*n)),
        Data::String(s) => Some(text_cell(s)),
        Data::Error(_) => Some(RawValue::Null),
        other => Some(text_cell(&other.to_string())),
    }
}

impl RecordReader for XlsxRecordReader {
    /// Empty cells read like missing ones, so a row without a neighborhood is skipped
    /// the same way a short CSV line is.
    fn read(&self, bytes: &[u8]) -> Result<RawBatch, ReaderError> {
        let mut workbook = Xlsx::new(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or(ReaderError::NoWorksheet)??;
        let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
        let mut rows = range.rows();

        let mut positions: Vec<(usize, Column)> = Vec::new();
        if let Some(header) = rows.next() {
            for (idx, cell) in header.iter().enumerate() {
                if let Some(column) = column_for_header(&cell.to_string()) {
                    if !positions.iter().any(|(_, c)| *c == column) {
                        positions.push((idx, column));
                    }
                }
            }
        }

        let mut batch = RawBatch::default();
        for (idx, cells) in rows.enumerate() {
            if cells.iter().all(|cell| matches!(cell, Data::Empty)) {
                continue;
            }
            // header sits on `first_row`; sheet rows are 1-based
            let mut record = RawRecord::new(first_row + idx + 2);
            for (pos, column) in &positions {
                if let Some(value) = cells.get(*pos).and_then(workbook_cell) {
                    record.set(*column, value);
                }
            }
            batch.accept(record);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(record: &RawRecord) -> (String, String, String) {
        (
            record.text(Column::City),
            record.text(Column::District),
            record.text(Column::Neighborhood),
        )
    }

    #[test]
    fn turkish_headers_fold_onto_columns() {
        assert_eq!(column_for_header(" İL "), Some(Column::City));
        assert_eq!(column_for_header("IL"), Some(Column::City));
        assert_eq!(column_for_header("İLÇE"), Some(Column::District));
        assert_eq!(column_for_header("Mahalle"), Some(Column::Neighborhood));
        assert_eq!(column_for_header("ALAN"), Some(Column::Area));
        assert_eq!(column_for_header("ADA"), Some(Column::CadastralBlock));
        assert_eq!(column_for_header("PARSEL"), Some(Column::CadastralParcel));
        assert_eq!(column_for_header("NOT"), None);
    }

    #[test]
    fn csv_reader_maps_columns_and_skips_rows_without_geo() {
        let input = "İL,İLÇE,MAHALLE,ALAN,ADA,PARSEL,NOT\n\
                     Balıkesir,Sındırgı,Alhan,1234,101,5,x\n\
                     Balıkesir,Sındırgı\n\
                     Manisa,Demirci,Tepecik,,,\n";
        let batch = CsvRecordReader.read(input.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].row, 3);
        assert!(batch.skipped[0].reason.contains("neighborhood"));

        let first = &batch.records[0];
        assert_eq!(first.row, 2);
        assert_eq!(
            texts(first),
            ("Balıkesir".into(), "Sındırgı".into(), "Alhan".into())
        );
        assert_eq!(first.get(Column::Area), Some(&RawValue::Text("1234".into())));
        assert_eq!(batch.records[1].get(Column::Area), Some(&RawValue::Null));
    }

    #[test]
    fn turkish_numbers_group_with_dots_and_split_with_commas() {
        assert_eq!(turkish_number("740,5"), Some(740.5));
        assert_eq!(turkish_number("1.234"), Some(1234.0));
        assert_eq!(turkish_number("15.000,25"), Some(15000.25));
        assert_eq!(turkish_number("1.234.567"), Some(1234567.0));
        assert_eq!(turkish_number("740.5"), Some(740.5));
        assert_eq!(turkish_number("15000.0"), Some(15000.0));
        assert_eq!(turkish_number("1234"), Some(1234.0));
        assert_eq!(turkish_number("bilinmiyor"), None);
        assert_eq!(turkish_number(""), None);
    }

    #[test]
    fn semicolon_exports_read_areas_in_turkish_notation() {
        let input = "İL;İLÇE;MAHALLE;ALAN;ADA;PARSEL\n\
                     Manisa;Demirci;Çeşmealtı;740,5;88;1\n\
                     Manisa;Demirci;Tepecik;1.234;0012;3\n\
                     Manisa;Demirci;Kuzayır;yok;;\n";
        let batch = CsvRecordReader.read(input.as_bytes()).unwrap();
        assert_eq!(batch.records[0].get(Column::Area), Some(&RawValue::Number(740.5)));
        assert_eq!(batch.records[1].get(Column::Area), Some(&RawValue::Number(1234.0)));
        assert_eq!(batch.records[1].text(Column::CadastralBlock), "0012");
        assert_eq!(batch.records[2].get(Column::Area), Some(&RawValue::Text("yok".into())));
    }

    #[test]
    fn comma_exports_keep_areas_as_written() {
        let input = "il,ilce,mahalle,alan\nManisa,Demirci,Tepecik,1.234\n";
        let batch = CsvRecordReader.read(input.as_bytes()).unwrap();
        assert_eq!(batch.records[0].get(Column::Area), Some(&RawValue::Text("1.234".into())));
    }

    #[test]
    fn xlsx_reader_rejects_bytes_that_are_not_a_workbook() {
        assert!(matches!(
            XlsxRecordReader.read(b"IL;ILCE;MAHALLE"),
            Err(ReaderError::Xlsx(_))
        ));
    }

    #[test]
    fn csv_reader_sniffs_semicolons_and_strips_bom() {
        let input = "\u{feff}İL;İLÇE;MAHALLE\nBalıkesir;Bigadiç;Kayapa\n";
        let batch = CsvRecordReader.read(input.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].text(Column::Neighborhood), "Kayapa");
    }

    #[test]
    fn json_reader_keeps_numbers_and_nulls() {
        let input = r#"[
            {"İL": "Balıkesir", "İLÇE": "Sındırgı", "MAHALLE": "Alhan", "ALAN": 1234.0, "ADA": 101, "PARSEL": null},
            {"İL": "Balıkesir", "İLÇE": "Sındırgı"},
            "not a row"
        ]"#;
        let batch = JsonRowsReader.read(input.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped.len(), 2);
        let record = &batch.records[0];
        assert_eq!(record.get(Column::Area), Some(&RawValue::Number(1234.0)));
        assert_eq!(record.get(Column::CadastralParcel), Some(&RawValue::Null));
    }

    #[test]
    fn json_reader_rejects_non_array_sources() {
        assert!(matches!(
            JsonRowsReader.read(br#"{"rows": []}"#),
            Err(ReaderError::Json(_))
        ));
    }

    #[test]
    fn tsv_reader_skips_short_lines_and_reads_optional_columns() {
        let input = "Balıkesir\tSındırgı\tAlhan\n\
                     Balıkesir\tBigadiç\n\
                     \n\
                     Manisa\tDemirci\tİbirler\t4200\t305\t9\r\n";
        let batch = DelimitedTextReader.read(input.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, vec![SkippedRow {
            row: 2,
            reason: "expected at least 3 tab-separated columns, found 2".into(),
        }]);
        assert!(!batch.records[0].has(Column::Area));
        let second = &batch.records[1];
        assert_eq!(second.row, 4);
        assert_eq!(second.text(Column::Neighborhood), "İbirler");
        assert_eq!(second.text(Column::Area), "4200");
        assert_eq!(second.text(Column::CadastralParcel), "9");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(InputFormat::from_path(Path::new("satis-list.CSV")), Some(InputFormat::Csv));
        assert_eq!(InputFormat::from_path(Path::new("clean_data.txt")), Some(InputFormat::Tsv));
        assert_eq!(InputFormat::from_path(Path::new("dump.json")), Some(InputFormat::Json));
        assert_eq!(InputFormat::from_path(Path::new("satis-list.xlsx")), Some(InputFormat::Xlsx));
        assert_eq!(InputFormat::from_path(Path::new("notlar.md")), None);
    }
}

//! Raw record -> display-ready listing fields.

use arsa_core::{Column, GeoKey, NormalizedFields, RawRecord, RawValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::VariationSource;

const TITLE_PREFIX: &str = "Yatırımlık Fırsat";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("row {row}: unreadable {column} code {value:?}")]
    CadastralCode {
        row: usize,
        column: &'static str,
        value: String,
    },
}

impl ParseError {
    pub fn row(&self) -> usize {
        match self {
            ParseError::CadastralCode { row, .. } => *row,
        }
    }
}

/// Which of the two listing text styles to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    /// Parcel spreadsheets: one listing per district, short description.
    Spreadsheet,
    /// Location dumps: title names the neighborhood, longer description.
    TextDump,
}

impl TemplateKind {
    pub fn default_features(self) -> Vec<String> {
        let mut features = vec!["Müstakil Tapu", "Yola Yakın", "Doğa Manzaralı", "Yatırımlık"];
        if self == TemplateKind::TextDump {
            features.push("Elektrik Yakın");
        }
        features.into_iter().map(String::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingTemplate {
    pub kind: TemplateKind,
    pub features: Vec<String>,
}

impl ListingTemplate {
    pub fn new(kind: TemplateKind) -> Self {
        Self {
            kind,
            features: kind.default_features(),
        }
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    pub fn title(&self, geo: &GeoKey) -> String {
        let suffix = match self.kind {
            TemplateKind::Spreadsheet => geo.district.clone(),
            TemplateKind::TextDump => join_present(&[&geo.district, &geo.neighborhood], " / "),
        };
        if suffix.is_empty() {
            TITLE_PREFIX.to_string()
        } else {
            format!("{TITLE_PREFIX} - {suffix}")
        }
    }

    pub fn description(&self, geo: &GeoKey, size_label: &str) -> String {
        match self.kind {
            TemplateKind::Spreadsheet => {
                let place = join_present(&[&geo.city, &geo.district, &geo.neighborhood], " ");
                let body = format!("{size_label} büyüklüğünde, geleceği parlak, yatırıma uygun arazi.");
                if place.is_empty() {
                    body
                } else {
                    format!("{place} mevkiinde, {body}")
                }
            }
            TemplateKind::TextDump => {
                let body = format!(
                    "{size_label} büyüklüğündeki arazi, geleceği parlak ve yatırıma son derece uygundur. \
                     Doğa ile iç içe, ulaşımı kolay."
                );
                let all_present = [&geo.city, &geo.district, &geo.neighborhood]
                    .iter()
                    .all(|part| !part.is_empty());
                if all_present {
                    return format!(
                        "{} ili, {} ilçesi, {} mahallesinde bulunan bu {body}",
                        geo.city, geo.district, geo.neighborhood
                    );
                }
                let named = [
                    (&geo.city, "ili"),
                    (&geo.district, "ilçesi"),
                    (&geo.neighborhood, "mahallesi"),
                ]
                .iter()
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, unit)| format!("{name} {unit}"))
                .collect::<Vec<_>>();
                if named.is_empty() {
                    format!("Bu {body}")
                } else {
                    format!("{} sınırlarında bulunan bu {body}", named.join(", "))
                }
            }
        }
    }
}

fn join_present(parts: &[&String], separator: &str) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(|part| part.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Area in m²; missing or non-numeric values count as 0.
pub fn parse_area(value: Option<&RawValue>) -> f64 {
    value.and_then(RawValue::as_number).unwrap_or(0.0)
}

/// Integer with `.` as the thousands separator: `1234567` -> `"1.234.567"`.
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

/// `1234.4` -> `"1.234 m²"`; rounds half away from zero.
pub fn format_size_label(area: f64) -> String {
    let rounded = if area.is_finite() { area.round() as i64 } else { 0 };
    format!("{} m²", group_thousands(rounded))
}

/// Reads a cadastral code as an integer and prints it back, which drops leading zeros
/// and spreadsheet float noise (`"0101"` -> `"101"`, `215.0` -> `"215"`). Blank codes
/// are `""`; anything else unreadable is `None`.
pub fn cadastral_code(value: Option<&RawValue>) -> Option<String> {
    let Some(value) = value else {
        return Some(String::new());
    };
    if value.is_blank() {
        return Some(String::new());
    }
    if let RawValue::Text(text) = value {
        if let Ok(n) = text.trim().parse::<i64>() {
            return Some(n.to_string());
        }
    }
    value
        .as_number()
        .filter(|n| n.abs() < i64::MAX as f64)
        .map(|n| (n.trunc() as i64).to_string())
}

fn cadastral_field(record: &RawRecord, column: Column) -> Result<String, ParseError> {
    let value = record.get(column);
    cadastral_code(value).ok_or_else(|| ParseError::CadastralCode {
        row: record.row,
        column: column.key(),
        value: value.map(RawValue::as_text).unwrap_or_default(),
    })
}

/// Turns one raw record into listing fields. Pure: the same record and template always
/// give the same output.
pub fn normalize(record: &RawRecord, template: &ListingTemplate) -> Result<NormalizedFields, ParseError> {
    let geo = GeoKey::from_record(record);
    let area_value = parse_area(record.get(Column::Area));
    let size_label = format_size_label(area_value);
    let cadastral_block = cadastral_field(record, Column::CadastralBlock)?;
    let cadastral_parcel = cadastral_field(record, Column::CadastralParcel)?;

    Ok(NormalizedFields {
        title: template.title(&geo),
        location: geo.location(),
        description: template.description(&geo, &size_label),
        features: template.features.clone(),
        size_label,
        area_value,
        cadastral_block,
        cadastral_parcel,
        geo,
    })
}

/// Ranges for placeholder parcel data, used only when explicitly enabled for sources
/// that carry no area or cadastral columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderParcels {
    pub area: (i64, i64),
    pub block: (i64, i64),
    pub parcel: (i64, i64),
}

impl Default for PlaceholderParcels {
    fn default() -> Self {
        Self {
            area: (300, 5000),
            block: (101, 999),
            parcel: (1, 50),
        }
    }
}

impl PlaceholderParcels {
    /// Fills area, ada and parsel where the record has none. Returns whether anything
    /// was filled.
    pub fn fill(&self, record: &mut RawRecord, variation: &mut dyn VariationSource) -> bool {
        let mut filled = false;
        for (column, (low, high)) in [
            (Column::Area, self.area),
            (Column::CadastralBlock, self.block),
            (Column::CadastralParcel, self.parcel),
        ] {
            if record.get(column).map_or(true, RawValue::is_blank) {
                record.set(column, RawValue::Number(variation.draw(low, high) as f64));
                filled = true;
            }
        }
        filled
    }
}

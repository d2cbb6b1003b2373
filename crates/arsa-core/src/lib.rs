//! Core domain model for the land listing pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const CRATE_NAME: &str = "arsa-core";

/// Single cell as it came out of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Null,
}

impl RawValue {
    /// Trimmed textual form; integral numbers print without a fractional part.
    pub fn as_text(&self) -> String {
        match self {
            RawValue::Text(s) => s.trim().to_string(),
            RawValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{n:.0}")
            }
            RawValue::Number(n) => n.to_string(),
            RawValue::Null => String::new(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) if n.is_finite() => Some(*n),
            RawValue::Number(_) => None,
            RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            RawValue::Null => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Text(s) => s.trim().is_empty(),
            RawValue::Number(_) => false,
            RawValue::Null => true,
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

/// Canonical column names that readers map source headers onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    City,
    District,
    Neighborhood,
    Area,
    CadastralBlock,
    CadastralParcel,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::City,
        Column::District,
        Column::Neighborhood,
        Column::Area,
        Column::CadastralBlock,
        Column::CadastralParcel,
    ];

    /// Columns a record must carry (possibly blank) to be processed at all.
    pub const GEO: [Column; 3] = [Column::City, Column::District, Column::Neighborhood];

    pub fn key(self) -> &'static str {
        match self {
            Column::City => "city",
            Column::District => "district",
            Column::Neighborhood => "neighborhood",
            Column::Area => "area",
            Column::CadastralBlock => "ada",
            Column::CadastralParcel => "parsel",
        }
    }
}

/// One row from a source, keyed by canonical column name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based row number in the source, for diagnostics.
    pub row: usize,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: Column, value: impl Into<RawValue>) -> Self {
        self.set(column, value.into());
        self
    }

    pub fn set(&mut self, column: Column, value: RawValue) {
        self.fields.insert(column.key().to_string(), value);
    }

    pub fn get(&self, column: Column) -> Option<&RawValue> {
        self.fields.get(column.key())
    }

    pub fn has(&self, column: Column) -> bool {
        self.fields.contains_key(column.key())
    }

    /// Trimmed text of a column; absent and null both read as "".
    pub fn text(&self, column: Column) -> String {
        self.get(column).map(RawValue::as_text).unwrap_or_default()
    }

    pub fn missing_columns(&self, required: &[Column]) -> Vec<Column> {
        required.iter().copied().filter(|c| !self.has(*c)).collect()
    }
}

/// Geographic identity of a listing: (city, district, neighborhood).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct GeoKey {
    pub city: String,
    pub district: String,
    pub neighborhood: String,
}

impl GeoKey {
    pub fn new(city: &str, district: &str, neighborhood: &str) -> Self {
        Self {
            city: city.trim().to_string(),
            district: district.trim().to_string(),
            neighborhood: neighborhood.trim().to_string(),
        }
    }

    pub fn from_record(record: &RawRecord) -> Self {
        Self {
            city: record.text(Column::City),
            district: record.text(Column::District),
            neighborhood: record.text(Column::Neighborhood),
        }
    }

    /// Display form "neighborhood, district, city". Blank parts keep their slot so the
    /// first segment is always the neighborhood.
    pub fn location(&self) -> String {
        format!("{}, {}, {}", self.neighborhood, self.district, self.city)
    }
}

/// Display-ready fields produced from one raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFields {
    pub geo: GeoKey,
    pub title: String,
    pub location: String,
    pub size_label: String,
    pub description: String,
    pub features: Vec<String>,
    pub area_value: f64,
    pub cadastral_block: String,
    pub cadastral_parcel: String,
}

/// Normalized record with its estimated price, awaiting an id from the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub fields: NormalizedFields,
    pub price: i64,
}

/// Canonical persisted listing.
///
/// Keys follow the catalog file format. Keys this type does not model are kept in
/// `extra`, and optional keys stay absent when they were absent, so a record read and
/// written back is unchanged. The one exception is an optional key holding an explicit
/// `null`: it reads as absent and is written back without the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "size", default)]
    pub size_label: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(rename = "ada", default, skip_serializing_if = "Option::is_none")]
    pub cadastral_block: Option<String>,
    #[serde(rename = "parsel", default, skip_serializing_if = "Option::is_none")]
    pub cadastral_parcel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_value: Option<f64>,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl Listing {
    pub fn from_draft(id: u64, draft: ListingDraft) -> Self {
        let ListingDraft { fields, price } = draft;
        Self {
            id,
            title: fields.title,
            location: fields.location,
            size_label: fields.size_label,
            price,
            image_url: None,
            description: fields.description,
            features: fields.features,
            cadastral_block: Some(fields.cadastral_block),
            cadastral_parcel: Some(fields.cadastral_parcel),
            area_value: Some(fields.area_value),
            extra: JsonMap::new(),
        }
    }

    /// First comma-delimited segment of the location.
    pub fn neighborhood(&self) -> &str {
        self.location.split(',').next().unwrap_or_default().trim()
    }

    /// Bulk-clear result: drops price, size, cadastral codes and description while
    /// keeping identity, title, location and image.
    pub fn cleared(&self) -> Listing {
        Listing {
            price: 0,
            size_label: String::new(),
            cadastral_block: Some(String::new()),
            cadastral_parcel: Some(String::new()),
            description: String::new(),
            ..self.clone()
        }
    }
}

/// Image asset known by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub url: String,
}

impl AssetRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Lowercased file name without extension: `.../Sultancayir1.jpg` -> `sultancayir1`.
    pub fn stem(&self) -> String {
        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        file.split('.').next().unwrap_or_default().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_read_as_trimmed_text_and_numbers() {
        assert_eq!(RawValue::Text("  Alhan ".into()).as_text(), "Alhan");
        assert_eq!(RawValue::Number(123.0).as_text(), "123");
        assert_eq!(RawValue::Number(12.5).as_text(), "12.5");
        assert_eq!(RawValue::Null.as_text(), "");
        assert_eq!(RawValue::Text(" 1234.5 ".into()).as_number(), Some(1234.5));
        assert_eq!(RawValue::Text("yok".into()).as_number(), None);
        assert_eq!(RawValue::Number(f64::NAN).as_number(), None);
    }

    #[test]
    fn geo_key_treats_missing_components_as_empty() {
        let record = RawRecord::new(1)
            .with(Column::City, " Balıkesir ")
            .with(Column::Neighborhood, RawValue::Null);
        let key = GeoKey::from_record(&record);
        assert_eq!(key, GeoKey::new("Balıkesir", "", ""));
        assert_eq!(key.location(), ", , Balıkesir");
    }

    #[test]
    fn listing_round_trips_unknown_and_absent_keys() {
        let text = r#"{"id":7,"title":"Manuel","location":"Alhan, Sındırgı, Balıkesir","size":"500 m²","price":10000,"imageUrl":"","description":"d","features":[],"badge":"yeni"}"#;
        let listing: Listing = serde_json::from_str(text).unwrap();
        assert_eq!(listing.neighborhood(), "Alhan");
        assert_eq!(listing.image_url.as_deref(), Some(""));
        assert!(listing.cadastral_block.is_none());

        let back: serde_json::Value = serde_json::to_value(&listing).unwrap();
        let original: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn explicit_null_image_is_written_back_as_absent() {
        let listing: Listing =
            serde_json::from_str(r#"{"id":8,"title":"T","imageUrl":null,"ada":null}"#).unwrap();
        assert_eq!(listing.image_url, None);
        let back = serde_json::to_value(&listing).unwrap();
        assert!(back.get("imageUrl").is_none());
        assert!(back.get("ada").is_none());
        assert!(listing.extra.is_empty());
    }

    #[test]
    fn cleared_listing_keeps_identity() {
        let listing: Listing = serde_json::from_str(
            r#"{"id":3,"title":"T","location":"L","size":"1.000 m²","price":1500000,"imageUrl":"u","description":"d","features":["a"],"ada":"101","parsel":"5"}"#,
        )
        .unwrap();
        let cleared = listing.cleared();
        assert_eq!(cleared.id, 3);
        assert_eq!(cleared.title, "T");
        assert_eq!(cleared.image_url.as_deref(), Some("u"));
        assert_eq!(cleared.price, 0);
        assert_eq!(cleared.size_label, "");
        assert_eq!(cleared.cadastral_block.as_deref(), Some(""));
        assert_eq!(cleared.description, "");
    }

    #[test]
    fn asset_stem_strips_path_and_extension() {
        assert_eq!(
            AssetRef::new("http://bereketlitopraklar.com.tr/Sultancayir1.jpg").stem(),
            "sultancayir1"
        );
        assert_eq!(AssetRef::new("https://cdn.example/x/derecikoren.webp?v=2").stem(), "derecikoren");
    }
}

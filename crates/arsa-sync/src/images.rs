//! Listing -> image asset matching by neighborhood slug.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use arsa_core::{AssetRef, Listing};
use arsa_storage::ImageAssignment;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// Minimum Jaro-Winkler score for a near-miss stem to be reported as a hint.
pub const SUGGESTION_THRESHOLD: f64 = 0.85;

/// Lookup form of a place name: Turkish letters folded to Latin, lowercased, with
/// whitespace and hyphens removed.
pub fn slug(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ç' | 'Ç' => 'c',
            'ğ' | 'Ğ' => 'g',
            'ı' | 'İ' => 'i',
            'ş' | 'Ş' => 's',
            'ü' | 'Ü' => 'u',
            'ö' | 'Ö' => 'o',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Slug -> URL entries that take precedence over the filename lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOverrides {
    entries: BTreeMap<String, String>,
}

impl ImageOverrides {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Adds an override; the name is slugged first so `"Sultançayır"` and
    /// `"sultancayir"` are the same entry.
    pub fn insert(&mut self, name: &str, url: impl Into<String>) {
        self.entries.insert(slug(name), url.into());
    }

    pub fn get(&self, slug: &str) -> Option<&str> {
        self.entries.get(slug).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ImageOverrides {
    fn default() -> Self {
        let mut overrides = Self::empty();
        overrides.insert("sultancayir", "http://bereketlitopraklar.com.tr/Sultancayir1.jpg");
        overrides
    }
}

#[derive(Debug, Deserialize)]
struct AssetsFile {
    #[serde(default)]
    assets: Vec<String>,
    #[serde(default)]
    overrides: BTreeMap<String, String>,
}

/// Filename-stem lookup over the known image assets plus the override table.
#[derive(Debug, Clone, Default)]
pub struct AssetIndex {
    by_stem: BTreeMap<String, String>,
    overrides: ImageOverrides,
}

impl AssetIndex {
    /// Indexes `assets` by stem. When two assets share a stem the later one wins.
    pub fn new(assets: &[AssetRef], overrides: ImageOverrides) -> Self {
        let mut index = Self {
            by_stem: BTreeMap::new(),
            overrides,
        };
        for asset in assets {
            index.insert(asset.stem(), asset.url.clone());
        }
        index
    }

    pub fn insert(&mut self, stem: impl Into<String>, url: impl Into<String>) {
        self.by_stem.insert(stem.into(), url.into());
    }

    /// Parses an assets file:
    ///
    /// ```yaml
    /// assets:
    ///   - http://host/alhan.jpg
    /// overrides:
    ///   sultancayir: http://host/Sultancayir1.jpg
    /// ```
    ///
    /// File overrides are layered on top of the built-in ones.
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let file: AssetsFile = serde_yaml::from_str(text).context("parsing assets file")?;
        let assets: Vec<AssetRef> = file.assets.into_iter().map(AssetRef::new).collect();
        let mut overrides = ImageOverrides::default();
        for (name, url) in file.overrides {
            overrides.insert(&name, url);
        }
        Ok(Self::new(&assets, overrides))
    }

    pub async fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn asset_count(&self) -> usize {
        self.by_stem.len()
    }

    pub fn overrides(&self) -> &ImageOverrides {
        &self.overrides
    }

    fn resolve(&self, slug: &str) -> (Option<String>, MatchSource) {
        let found = self.by_stem.get(slug).cloned();
        match self.overrides.get(slug) {
            Some(url) => (Some(url.to_string()), MatchSource::Override),
            None if found.is_some() => (found, MatchSource::Lookup),
            None => (None, MatchSource::Miss),
        }
    }

    fn closest_stem(&self, slug: &str) -> Option<Suggestion> {
        let mut best: Option<Suggestion> = None;
        for stem in self.by_stem.keys() {
            let score = jaro_winkler(slug, stem);
            if score < SUGGESTION_THRESHOLD {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Suggestion {
                    stem: stem.clone(),
                    score,
                });
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchSource {
    Lookup,
    Override,
    Miss,
}

/// Near-miss asset stem reported for an unmatched listing. Never assigned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub stem: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMatch {
    pub listing_id: u64,
    pub neighborhood: String,
    pub slug: String,
    pub image_url: Option<String>,
    pub source: MatchSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl ImageMatch {
    pub fn is_match(&self) -> bool {
        self.image_url.is_some()
    }

    pub fn assignment(&self) -> ImageAssignment {
        ImageAssignment {
            listing_id: self.listing_id,
            image_url: self.image_url.clone(),
        }
    }
}

/// One outcome per listing, in listing order. A miss carries no URL.
pub fn match_images(listings: &[Listing], index: &AssetIndex) -> Vec<ImageMatch> {
    listings
        .iter()
        .map(|listing| {
            let neighborhood = listing.neighborhood().to_string();
            let slug = slug(&neighborhood);
            let (image_url, source) = index.resolve(&slug);
            let suggestion = match source {
                MatchSource::Miss => index.closest_stem(&slug),
                _ => None,
            };
            ImageMatch {
                listing_id: listing.id,
                neighborhood,
                slug,
                image_url,
                source,
                suggestion,
            }
        })
        .collect()
}

//! Listing pipeline orchestration: import, image matching and bulk clear.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use arsa_adapters::{reader_for_format, InputFormat, RawBatch, SkippedRow};
use arsa_core::ListingDraft;
use arsa_storage::{ArtifactStore, CatalogError, CatalogStore, PostgrestConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod dedup;
pub mod images;
pub mod merge;
pub mod normalize;
pub mod pricing;

pub use dedup::dedupe;
pub use images::{match_images, slug, AssetIndex, ImageMatch, ImageOverrides, MatchSource, Suggestion};
pub use merge::{merge, next_id, overlapping_locations, MergeOutcome};
pub use normalize::{normalize, ListingTemplate, ParseError, PlaceholderParcels, TemplateKind};
pub use pricing::{estimate, FixedVariation, PriceMode, PricingConfig, RandomVariation, VariationSource};

pub const CRATE_NAME: &str = "arsa-sync";

const PLACEHOLDER_MARKERS: [&str; 3] = ["your-project-url", "your-anon-key", "your-service-role-key"];

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration or input problem found before anything was written.
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("{phase} phase failed against {target}")]
    Remote {
        phase: Phase,
        target: String,
        #[source]
        source: CatalogError,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Precondition(_) => 2,
            PipelineError::Remote { .. } | PipelineError::Io(_) => 1,
        }
    }
}

/// Catalog step a store failure interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Load,
    Persist,
    Images,
    Clear,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Persist => "persist",
            Phase::Images => "images",
            Phase::Clear => "clear",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || PLACEHOLDER_MARKERS.iter().any(|marker| value.contains(marker))
        || (value.starts_with('<') && value.ends_with('>'))
}

/// Endpoint and key of the remote listing store.
#[derive(Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `SUPABASE_URL` and a key, falling back to the `NEXT_PUBLIC_*` names the web
    /// frontend uses. Missing or placeholder values are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(*key).filter(|v| !v.trim().is_empty()))
        };
        let url = first(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"]).ok_or_else(|| {
            PipelineError::Precondition("SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL) is not set".into())
        })?;
        let api_key = first(&[
            "SUPABASE_SERVICE_ROLE_KEY",
            "SUPABASE_ANON_KEY",
            "NEXT_PUBLIC_SUPABASE_ANON_KEY",
        ])
        .ok_or_else(|| {
            PipelineError::Precondition(
                "SUPABASE_ANON_KEY (or NEXT_PUBLIC_SUPABASE_ANON_KEY) is not set".into(),
            )
        })?;

        let url = url.trim().to_string();
        if is_placeholder(&url) {
            return Err(PipelineError::Precondition(format!(
                "remote url {url:?} is a placeholder"
            )));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PipelineError::Precondition(format!(
                "remote url {url:?} is not an http(s) url"
            )));
        }
        if is_placeholder(&api_key) {
            return Err(PipelineError::Precondition("remote api key is a placeholder".into()));
        }
        Ok(Self {
            url,
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn postgrest(&self, pipeline: &PipelineConfig) -> PostgrestConfig {
        PostgrestConfig {
            base_url: self.url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(pipeline.http_timeout_secs),
            user_agent: Some(pipeline.user_agent.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub lands_table: String,
    pub base_rate: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("./artifacts"),
            reports_dir: PathBuf::from("./reports"),
            http_timeout_secs: 20,
            user_agent: "arsa-pipeline/0.1".to_string(),
            lands_table: "lands".to_string(),
            base_rate: PricingConfig::default().base_rate,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            artifacts_dir: lookup("ARSA_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            reports_dir: lookup("ARSA_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
            http_timeout_secs: lookup("ARSA_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: lookup("ARSA_USER_AGENT").unwrap_or(defaults.user_agent),
            lands_table: lookup("ARSA_LANDS_TABLE").unwrap_or(defaults.lands_table),
            base_rate: lookup("ARSA_BASE_RATE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.base_rate),
        }
    }
}

/// How an import lands in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    /// Delete every stored listing, then insert the batch with ids from 1. Not atomic.
    FullReplace,
    /// Append the batch after the existing catalog with fresh ids.
    #[default]
    IncrementalAppend,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub input: PathBuf,
    pub format: Option<InputFormat>,
    pub strategy: SyncStrategy,
    pub price_mode: PriceMode,
    pub pricing: PricingConfig,
    pub template: ListingTemplate,
    pub placeholders: Option<PlaceholderParcels>,
}

impl ImportOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            format: None,
            strategy: SyncStrategy::default(),
            price_mode: PriceMode::Fixed,
            pricing: PricingConfig::default(),
            template: ListingTemplate::new(TemplateKind::Spreadsheet),
            placeholders: None,
        }
    }
}

/// Drafts ready for merging plus the per-stage counts.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch {
    pub drafts: Vec<ListingDraft>,
    pub records_read: usize,
    pub duplicates_dropped: usize,
    pub placeholders_filled: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Dedupe, optional placeholder fill, normalize and price, in that order. Records that
/// fail to normalize are skipped and listed with the reader's skips.
pub fn prepare_batch(
    batch: RawBatch,
    options: &ImportOptions,
    variation: &mut dyn VariationSource,
) -> PreparedBatch {
    let RawBatch { records, mut skipped } = batch;
    let records_read = records.len();
    let mut records = dedupe(records);
    let duplicates_dropped = records_read - records.len();

    let mut placeholders_filled = 0;
    if let Some(ranges) = &options.placeholders {
        for record in &mut records {
            if ranges.fill(record, variation) {
                placeholders_filled += 1;
            }
        }
    }

    let mut drafts = Vec::with_capacity(records.len());
    for record in &records {
        match normalize(record, &options.template) {
            Ok(fields) => {
                let price = estimate(fields.area_value, options.price_mode, &options.pricing, variation);
                drafts.push(ListingDraft { fields, price });
            }
            Err(err) => {
                warn!(row = err.row(), error = %err, "skipping record");
                skipped.push(SkippedRow {
                    row: err.row(),
                    reason: err.to_string(),
                });
            }
        }
    }
    skipped.sort_by_key(|s| s.row);

    PreparedBatch {
        drafts,
        records_read,
        duplicates_dropped,
        placeholders_filled,
        skipped,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input: String,
    pub input_hash: String,
    pub archived_input: PathBuf,
    pub format: InputFormat,
    pub strategy: SyncStrategy,
    pub price_mode: PriceMode,
    pub target: String,
    pub records_read: usize,
    pub duplicates_dropped: usize,
    pub placeholders_filled: usize,
    pub skipped: Vec<SkippedRow>,
    pub listings_removed: usize,
    pub listings_created: usize,
    pub first_new_id: Option<u64>,
    pub catalog_size: usize,
    pub overlapping_locations: Vec<String>,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagesSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target: String,
    pub dry_run: bool,
    pub listings: usize,
    pub matched: usize,
    pub missed: usize,
    pub updated: usize,
    pub matches: Vec<ImageMatch>,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target: String,
    pub cleared: usize,
    pub report_path: PathBuf,
}

pub fn report_path(reports_dir: &Path, run_id: Uuid) -> PathBuf {
    reports_dir.join(run_id.to_string()).join("summary.json")
}

/// Writes `reports/<run_id>/summary.json`.
pub async fn write_report<T: Serialize>(reports_dir: &Path, run_id: Uuid, summary: &T) -> anyhow::Result<PathBuf> {
    let path = report_path(reports_dir, run_id);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn source_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "input".to_string()
    } else {
        cleaned
    }
}

fn remote_error(phase: Phase, catalog: &dyn CatalogStore) -> impl FnOnce(CatalogError) -> PipelineError {
    let target = catalog.describe();
    move |source| PipelineError::Remote {
        phase,
        target,
        source,
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    artifacts: ArtifactStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
        Self { config, artifacts }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reads, archives and prepares `options.input`, then persists it into `catalog` with
    /// the chosen strategy. Nothing is written to the catalog before the input parses.
    pub async fn import(
        &self,
        catalog: &dyn CatalogStore,
        options: &ImportOptions,
        variation: &mut dyn VariationSource,
    ) -> Result<ImportSummary, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let input = options.input.as_path();
        let target = catalog.describe();

        let exists = fs::try_exists(input)
            .await
            .with_context(|| format!("checking {}", input.display()))?;
        if !exists {
            return Err(PipelineError::Precondition(format!(
                "input file {} not found",
                input.display()
            )));
        }
        let format = options
            .format
            .or_else(|| InputFormat::from_path(input))
            .ok_or_else(|| {
                PipelineError::Precondition(format!(
                    "cannot infer input format of {}; pass one explicitly",
                    input.display()
                ))
            })?;

        let (archived, batch) = async {
            let bytes = fs::read(input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let archived = self
                .artifacts
                .archive(started_at, &source_name(input), format.extension(), &bytes)
                .await?;
            debug!(path = %archived.relative_path.display(), deduplicated = archived.deduplicated, "input archived");
            let batch = reader_for_format(format)
                .read(&bytes)
                .with_context(|| format!("parsing {}", input.display()))?;
            info!(records = batch.records.len(), skipped = batch.skipped.len(), "input read");
            anyhow::Ok((archived, batch))
        }
        .instrument(info_span!("read", %run_id, input = %input.display()))
        .await?;

        let prepared = {
            let _span = info_span!("normalize", %run_id).entered();
            let prepared = prepare_batch(batch, options, variation);
            info!(
                drafts = prepared.drafts.len(),
                duplicates = prepared.duplicates_dropped,
                skipped = prepared.skipped.len(),
                "batch prepared"
            );
            prepared
        };
        let PreparedBatch {
            drafts,
            records_read,
            duplicates_dropped,
            placeholders_filled,
            skipped,
        } = prepared;

        let (listings_removed, listings_created, first_new_id, catalog_size, overlapping) = async {
            match options.strategy {
                SyncStrategy::FullReplace => {
                    if drafts.is_empty() {
                        warn!(catalog = %target, "full replace with an empty batch empties the catalog");
                    }
                    let outcome = merge(Vec::new(), drafts);
                    let written = catalog
                        .replace_all(&outcome.catalog)
                        .await
                        .map_err(remote_error(Phase::Persist, catalog))?;
                    info!(removed = written.removed, written = written.written, "catalog replaced");
                    Ok::<_, PipelineError>((
                        written.removed,
                        written.written,
                        outcome.catalog.first().map(|l| l.id),
                        outcome.catalog.len(),
                        Vec::new(),
                    ))
                }
                SyncStrategy::IncrementalAppend => {
                    let existing = catalog
                        .load()
                        .await
                        .map_err(remote_error(Phase::Load, catalog))?;
                    let overlapping = overlapping_locations(&existing, &drafts);
                    if !overlapping.is_empty() {
                        warn!(
                            count = overlapping.len(),
                            locations = ?overlapping,
                            "batch repeats locations already in the catalog; they will be listed twice"
                        );
                    }
                    let outcome = merge(existing, drafts);
                    let appended = outcome.appended();
                    let created = if appended.is_empty() {
                        0
                    } else {
                        catalog
                            .append(&outcome.catalog, appended)
                            .await
                            .map_err(remote_error(Phase::Persist, catalog))?
                    };
                    info!(created, first_id = ?appended.first().map(|l| l.id), "catalog appended");
                    Ok::<_, PipelineError>((
                        0,
                        created,
                        appended.first().map(|l| l.id),
                        outcome.catalog.len(),
                        overlapping,
                    ))
                }
            }
        }
        .instrument(info_span!("persist", %run_id, strategy = ?options.strategy, catalog = %target))
        .await?;

        let mut summary = ImportSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            input: input.display().to_string(),
            input_hash: archived.content_hash,
            archived_input: archived.relative_path,
            format,
            strategy: options.strategy,
            price_mode: options.price_mode,
            target,
            records_read,
            duplicates_dropped,
            placeholders_filled,
            skipped,
            listings_removed,
            listings_created,
            first_new_id,
            catalog_size,
            overlapping_locations: overlapping,
            report_path: report_path(&self.config.reports_dir, run_id),
        };
        summary.report_path = write_report(&self.config.reports_dir, run_id, &summary).await?;
        Ok(summary)
    }

    /// Matches every stored listing against `index` and writes the image field of each,
    /// misses included. `dry_run` skips the writes.
    pub async fn sync_images(
        &self,
        catalog: &dyn CatalogStore,
        index: &AssetIndex,
        dry_run: bool,
    ) -> Result<ImagesSummary, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let target = catalog.describe();
        let span = info_span!("images", %run_id, catalog = %target, dry_run);

        let (matches, updated) = async {
            let listings = catalog
                .load()
                .await
                .map_err(remote_error(Phase::Load, catalog))?;
            let matches = match_images(&listings, index);
            for m in &matches {
                match (&m.image_url, &m.suggestion) {
                    (Some(url), _) => info!(listing_id = m.listing_id, neighborhood = %m.neighborhood, url = %url, "OK"),
                    (None, Some(hint)) => warn!(
                        listing_id = m.listing_id,
                        neighborhood = %m.neighborhood,
                        closest = %hint.stem,
                        score = hint.score,
                        "no match"
                    ),
                    (None, None) => warn!(listing_id = m.listing_id, neighborhood = %m.neighborhood, "no match"),
                }
            }
            let updated = if dry_run {
                0
            } else {
                let assignments: Vec<_> = matches.iter().map(ImageMatch::assignment).collect();
                catalog
                    .apply_images(&assignments)
                    .await
                    .map_err(remote_error(Phase::Images, catalog))?
            };
            Ok::<_, PipelineError>((matches, updated))
        }
        .instrument(span)
        .await?;

        let matched = matches.iter().filter(|m| m.is_match()).count();
        info!(listings = matches.len(), matched, updated, "image sync finished");
        let mut summary = ImagesSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            target,
            dry_run,
            listings: matches.len(),
            matched,
            missed: matches.len() - matched,
            updated,
            matches,
            report_path: report_path(&self.config.reports_dir, run_id),
        };
        summary.report_path = write_report(&self.config.reports_dir, run_id, &summary).await?;
        Ok(summary)
    }

    /// Zeroes price and blanks size, cadastral codes and description of every listing.
    pub async fn clear(&self, catalog: &dyn CatalogStore) -> Result<ClearSummary, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let target = catalog.describe();
        let cleared = catalog
            .clear_details()
            .instrument(info_span!("clear", %run_id, catalog = %target))
            .await
            .map_err(remote_error(Phase::Clear, catalog))?;
        info!(cleared, catalog = %target, "catalog details cleared");

        let mut summary = ClearSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            target,
            cleared,
            report_path: report_path(&self.config.reports_dir, run_id),
        };
        summary.report_path = write_report(&self.config.reports_dir, run_id, &summary).await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arsa_core::{Column, RawRecord};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn remote_config_prefers_plain_names_and_falls_back() {
        let config = RemoteConfig::from_lookup(lookup(&[
            ("NEXT_PUBLIC_SUPABASE_URL", "https://abc.supabase.co"),
            ("NEXT_PUBLIC_SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_ANON_KEY", "plain"),
        ]))
        .unwrap();
        assert_eq!(config.url, "https://abc.supabase.co");
        assert_eq!(config.api_key, "plain");
        assert!(!format!("{config:?}").contains("plain"));
    }

    #[test]
    fn remote_config_rejects_missing_and_placeholder_values() {
        let missing = RemoteConfig::from_lookup(lookup(&[("SUPABASE_ANON_KEY", "k")])).unwrap_err();
        assert_eq!(missing.exit_code(), 2);

        for (url, key) in [
            ("your-project-url", "k"),
            ("https://your-project-url.supabase.co", "k"),
            ("https://abc.supabase.co", "your-anon-key"),
            ("https://abc.supabase.co", "<anon key>"),
            ("abc.supabase.co", "k"),
        ] {
            let err = RemoteConfig::from_lookup(lookup(&[("SUPABASE_URL", url), ("SUPABASE_ANON_KEY", key)]))
                .unwrap_err();
            assert!(matches!(err, PipelineError::Precondition(_)), "{url} / {key}");
        }
    }

    #[test]
    fn pipeline_config_defaults_and_overrides() {
        assert_eq!(PipelineConfig::from_lookup(|_| None), PipelineConfig::default());
        let config = PipelineConfig::from_lookup(lookup(&[
            ("ARSA_REPORTS_DIR", "/tmp/r"),
            ("ARSA_HTTP_TIMEOUT_SECS", "5"),
            ("ARSA_BASE_RATE", "nope"),
            ("ARSA_LANDS_TABLE", "parcels"),
        ]));
        assert_eq!(config.reports_dir, PathBuf::from("/tmp/r"));
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.base_rate, 1500);
        assert_eq!(config.lands_table, "parcels");

        let remote = RemoteConfig {
            url: "https://abc.supabase.co".into(),
            api_key: "k".into(),
        };
        assert_eq!(remote.postgrest(&config).timeout, Duration::from_secs(5));
    }

    fn record(row: usize, neighborhood: &str, area: &str, ada: &str) -> RawRecord {
        RawRecord::new(row)
            .with(Column::City, "Balıkesir")
            .with(Column::District, "Sındırgı")
            .with(Column::Neighborhood, neighborhood)
            .with(Column::Area, area)
            .with(Column::CadastralBlock, ada)
    }

    #[test]
    fn prepare_batch_counts_each_stage() {
        let batch = RawBatch {
            records: vec![
                record(2, "Alhan", "1234", "101"),
                record(3, "Alhan", "880", "102"),
                record(4, "Kayapa", "", ""),
                record(5, "Çağır", "2500", "1/3"),
            ],
            skipped: vec![SkippedRow {
                row: 9,
                reason: "missing column(s): neighborhood".into(),
            }],
        };
        let prepared = prepare_batch(batch, &ImportOptions::new("x.csv"), &mut FixedVariation::default());
        assert_eq!(prepared.records_read, 4);
        assert_eq!(prepared.duplicates_dropped, 1);
        assert_eq!(prepared.drafts.len(), 2);
        assert_eq!(prepared.drafts[0].price, 1_851_000);
        assert_eq!(prepared.drafts[1].price, 0);
        let rows: Vec<usize> = prepared.skipped.iter().map(|s| s.row).collect();
        assert_eq!(rows, vec![5, 9]);
    }

    #[test]
    fn placeholders_are_drawn_before_pricing() {
        let mut options = ImportOptions::new("x.tsv");
        options.placeholders = Some(PlaceholderParcels::default());
        options.price_mode = PriceMode::Variable;
        let batch = RawBatch {
            records: vec![RawRecord::new(1)
                .with(Column::City, "Manisa")
                .with(Column::District, "Demirci")
                .with(Column::Neighborhood, "İbirler")],
            skipped: Vec::new(),
        };
        // area, ada, parsel, then the unit-rate variation
        let mut draws = FixedVariation::new(vec![1000, 500, 20, 100]);
        let prepared = prepare_batch(batch, &options, &mut draws);
        assert_eq!(prepared.placeholders_filled, 1);
        let draft = &prepared.drafts[0];
        assert_eq!(draft.fields.size_label, "1.000 m²");
        assert_eq!(draft.fields.cadastral_block, "500");
        assert_eq!(draft.fields.cadastral_parcel, "20");
        assert_eq!(draft.price, 1_600_000);
    }

    #[test]
    fn source_names_are_path_safe() {
        assert_eq!(source_name(Path::new("/data/satış listesi.csv")), "satış_listesi");
        assert_eq!(source_name(Path::new("")), "input");
    }

    #[test]
    fn phase_errors_exit_with_one() {
        let err = PipelineError::Remote {
            phase: Phase::Persist,
            target: "remote table lands".into(),
            source: CatalogError::Remote(arsa_storage::RemoteError::Rejected {
                operation: "upsert",
                table: "lands".into(),
                message: "boom".into(),
            }),
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().starts_with("persist phase failed against remote table lands"));
    }
}

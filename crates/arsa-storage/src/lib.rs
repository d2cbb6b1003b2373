//! Persistence for the land catalog: immutable input archive, the JSON catalog file and
//! the remote `lands` table.

use std::path::{Path, PathBuf};

use anyhow::Context;
use arsa_core::Listing;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

pub mod remote;

pub use remote::{
    MemoryStore, PostgrestConfig, PostgrestStore, RemoteError, RemoteStore, RowFilter, StoreCall,
    StoreOp,
};

pub const CRATE_NAME: &str = "arsa-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes `bytes` to a sibling temp file and renames it over `target`, so readers see
/// either the old content or the new one.
async fn write_atomically(target: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!("renaming {} -> {}", temp_path.display(), target.display())
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchivedInput {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Content-addressed archive of the raw inputs each import consumed.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative_path(
        &self,
        received_at: DateTime<Utc>,
        source_name: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        PathBuf::from(received_at.format("%Y%m%d_%H%M%S").to_string())
            .join(source_name)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Archives `bytes` once per content hash; a repeat of the same content in the same
    /// second is reported as deduplicated and not rewritten.
    pub async fn archive(
        &self,
        received_at: DateTime<Utc>,
        source_name: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedInput> {
        let content_hash = sha256_hex(bytes);
        let relative_path = self.relative_path(received_at, source_name, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);

        let exists = fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?;
        if !exists {
            write_atomically(&absolute_path, bytes).await?;
        }
        Ok(ArchivedInput {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: exists,
        })
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("catalog file {}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("stopped after {applied} of {total} updates")]
    Interrupted {
        applied: usize,
        total: usize,
        #[source]
        source: Box<CatalogError>,
    },
}

/// Image field write for one listing; `None` clears the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAssignment {
    pub listing_id: u64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReplaceOutcome {
    pub removed: usize,
    pub written: usize,
}

/// Where the authoritative catalog lives. Operations run to completion one at a time.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    fn describe(&self) -> String;

    async fn load(&self) -> Result<Vec<Listing>, CatalogError>;

    /// Removes every stored listing, then writes `listings`. Not atomic across the two
    /// steps on the remote store.
    async fn replace_all(&self, listings: &[Listing]) -> Result<ReplaceOutcome, CatalogError>;

    /// Persists an append-only merge: `catalog` is the full merged state, `appended` the
    /// freshly minted tail of it. Returns the number of listings added.
    async fn append(&self, catalog: &[Listing], appended: &[Listing]) -> Result<usize, CatalogError>;

    /// Writes only the image field of each listing, keyed by id.
    async fn apply_images(&self, assignments: &[ImageAssignment]) -> Result<usize, CatalogError>;

    /// Bulk clear: zeroes price and blanks size, cadastral codes and description.
    async fn clear_details(&self) -> Result<usize, CatalogError>;
}

/// Catalog persisted as one JSON array, read in full and rewritten in full.
#[derive(Debug, Clone)]
pub struct FileCatalogStore {
    path: PathBuf,
}

impl FileCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_error(&self, source: anyhow::Error) -> CatalogError {
        CatalogError::File {
            path: self.path.clone(),
            source,
        }
    }

    async fn read(&self) -> anyhow::Result<Vec<Listing>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    async fn write(&self, listings: &[Listing]) -> anyhow::Result<()> {
        let mut bytes = serde_json::to_vec_pretty(listings).context("serializing catalog")?;
        bytes.push(b'\n');
        write_atomically(&self.path, &bytes).await
    }
}

#[async_trait]
impl CatalogStore for FileCatalogStore {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn load(&self) -> Result<Vec<Listing>, CatalogError> {
        self.read().await.map_err(|e| self.file_error(e))
    }

    async fn replace_all(&self, listings: &[Listing]) -> Result<ReplaceOutcome, CatalogError> {
        let removed = self.read().await.map_err(|e| self.file_error(e))?.len();
        self.write(listings).await.map_err(|e| self.file_error(e))?;
        Ok(ReplaceOutcome {
            removed,
            written: listings.len(),
        })
    }

    async fn append(&self, catalog: &[Listing], appended: &[Listing]) -> Result<usize, CatalogError> {
        self.write(catalog).await.map_err(|e| self.file_error(e))?;
        Ok(appended.len())
    }

    async fn apply_images(&self, assignments: &[ImageAssignment]) -> Result<usize, CatalogError> {
        let mut listings = self.read().await.map_err(|e| self.file_error(e))?;
        let mut applied = 0;
        for assignment in assignments {
            if let Some(listing) = listings.iter_mut().find(|l| l.id == assignment.listing_id) {
                listing.image_url = assignment.image_url.clone();
                applied += 1;
            }
        }
        self.write(&listings).await.map_err(|e| self.file_error(e))?;
        Ok(applied)
    }

    async fn clear_details(&self) -> Result<usize, CatalogError> {
        let listings = self.read().await.map_err(|e| self.file_error(e))?;
        let cleared: Vec<Listing> = listings.iter().map(Listing::cleared).collect();
        self.write(&cleared).await.map_err(|e| self.file_error(e))?;
        Ok(cleared.len())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Row shape of the remote `lands` table (snake_case columns, no area column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandRow {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    #[serde(default)]
    pub ada: Option<String>,
    #[serde(default)]
    pub parsel: Option<String>,
}

impl From<&Listing> for LandRow {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            title: listing.title.clone(),
            location: listing.location.clone(),
            size: listing.size_label.clone(),
            price: listing.price,
            image_url: listing.image_url.clone(),
            description: listing.description.clone(),
            features: listing.features.clone(),
            ada: listing.cadastral_block.clone(),
            parsel: listing.cadastral_parcel.clone(),
        }
    }
}

impl From<LandRow> for Listing {
    fn from(row: LandRow) -> Self {
        Listing {
            id: row.id,
            title: row.title,
            location: row.location,
            size_label: row.size,
            price: row.price,
            image_url: row.image_url.filter(|url| !url.is_empty()),
            description: row.description,
            features: row.features,
            cadastral_block: row.ada,
            cadastral_parcel: row.parsel,
            area_value: None,
            extra: JsonMap::new(),
        }
    }
}

/// Catalog kept in a table of a `RemoteStore`.
#[derive(Debug)]
pub struct RemoteCatalogStore<S> {
    store: S,
    table: String,
}

impl<S: RemoteStore> RemoteCatalogStore<S> {
    pub fn new(store: S, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn rows_for(&self, listings: &[Listing]) -> Result<Vec<JsonValue>, CatalogError> {
        listings
            .iter()
            .map(|listing| {
                serde_json::to_value(LandRow::from(listing)).map_err(|err| {
                    CatalogError::Remote(RemoteError::Decode {
                        operation: "encode",
                        table: self.table.clone(),
                        message: err.to_string(),
                    })
                })
            })
            .collect()
    }
}

#[async_trait]
impl<S: RemoteStore> CatalogStore for RemoteCatalogStore<S> {
    fn describe(&self) -> String {
        format!("remote table {}", self.table)
    }

    async fn load(&self) -> Result<Vec<Listing>, CatalogError> {
        let rows = self.store.select(&self.table).await?;
        let mut listings = rows
            .into_iter()
            .map(|row| {
                serde_json::from_value::<LandRow>(row)
                    .map(Listing::from)
                    .map_err(|err| RemoteError::Decode {
                        operation: "select",
                        table: self.table.clone(),
                        message: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        listings.sort_by_key(|l| l.id);
        debug!(table = %self.table, rows = listings.len(), "loaded remote catalog");
        Ok(listings)
    }

    async fn replace_all(&self, listings: &[Listing]) -> Result<ReplaceOutcome, CatalogError> {
        let rows = self.rows_for(listings)?;
        let removed = self.store.delete(&self.table, RowFilter::All).await?;
        info!(table = %self.table, removed, "remote table emptied");
        let written = self.store.upsert(&self.table, &rows, None).await?;
        Ok(ReplaceOutcome { removed, written })
    }

    /// Plain insert of the new rows: an id that already exists is rejected by the table,
    /// never merged into the stored row.
    async fn append(&self, _catalog: &[Listing], appended: &[Listing]) -> Result<usize, CatalogError> {
        let rows = self.rows_for(appended)?;
        Ok(self.store.upsert(&self.table, &rows, None).await?)
    }

    async fn apply_images(&self, assignments: &[ImageAssignment]) -> Result<usize, CatalogError> {
        let mut applied = 0;
        for assignment in assignments {
            let mut fields = JsonMap::new();
            fields.insert(
                "image_url".to_string(),
                assignment
                    .image_url
                    .as_ref()
                    .map(|url| JsonValue::String(url.clone()))
                    .unwrap_or(JsonValue::Null),
            );
            if let Err(err) = self
                .store
                .update(&self.table, &fields, RowFilter::IdEq(assignment.listing_id))
                .await
            {
                return Err(CatalogError::Interrupted {
                    applied,
                    total: assignments.len(),
                    source: Box::new(CatalogError::Remote(err)),
                });
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn clear_details(&self) -> Result<usize, CatalogError> {
        let mut fields = JsonMap::new();
        fields.insert("price".to_string(), json!(0));
        for column in ["size", "ada", "parsel", "description"] {
            fields.insert(column.to_string(), json!(""));
        }
        Ok(self.store.update(&self.table, &fields, RowFilter::All).await?)
    }
}

//! Remote table surface: the `RemoteStore` seam, a Supabase PostgREST client and an
//! in-memory store with the same semantics.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Row predicate. The pipeline only ever targets every row or a single id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilter {
    All,
    IdEq(u64),
}

impl RowFilter {
    /// PostgREST query pair. "All rows" is spelled `id=neq.-1` because the API refuses
    /// unfiltered deletes and updates.
    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            RowFilter::All => ("id", "neq.-1".to_string()),
            RowFilter::IdEq(id) => ("id", format!("eq.{id}")),
        }
    }

    pub fn matches(&self, row: &JsonValue) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::IdEq(id) => row.get("id").and_then(JsonValue::as_u64) == Some(*id),
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{operation} {table}: request failed")]
    Transport {
        operation: &'static str,
        table: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} {table}: http status {status}: {body}")]
    Status {
        operation: &'static str,
        table: String,
        status: u16,
        body: String,
    },
    #[error("{operation} {table}: unexpected response: {message}")]
    Decode {
        operation: &'static str,
        table: String,
        message: String,
    },
    #[error("{operation} {table}: rejected: {message}")]
    Rejected {
        operation: &'static str,
        table: String,
        message: String,
    },
}

/// Minimal table API of the remote data store. Every call completes (or fails) before
/// it returns; implementations do not retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: &str) -> Result<Vec<JsonValue>, RemoteError>;

    /// Inserts `rows`; with a conflict key, rows matching an existing key are merged
    /// into it instead. Returns the number of rows written.
    async fn upsert(
        &self,
        table: &str,
        rows: &[JsonValue],
        conflict_key: Option<&str>,
    ) -> Result<usize, RemoteError>;

    async fn delete(&self, table: &str, filter: RowFilter) -> Result<usize, RemoteError>;

    async fn update(
        &self,
        table: &str,
        fields: &JsonMap<String, JsonValue>,
        filter: RowFilter,
    ) -> Result<usize, RemoteError>;
}

/// Rows requested per `select` page.
pub const SELECT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

/// `RemoteStore` over Supabase's REST endpoint (`{base_url}/rest/v1/{table}`).
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PostgrestStore {
    pub fn new(config: PostgrestConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// One page of `select=*` in id order. PostgREST caps a response at its `max-rows`
    /// setting, so full reads walk the table with `limit`/`offset`.
    fn select_request(&self, table: &str, offset: usize) -> RequestBuilder {
        self.request(Method::GET, table).query(&[
            ("select", "*".to_string()),
            ("order", "id.asc".to_string()),
            ("limit", SELECT_PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
        ])
    }

    fn upsert_request(&self, table: &str, rows: &[JsonValue], conflict_key: Option<&str>) -> RequestBuilder {
        let request = self.request(Method::POST, table).json(rows);
        match conflict_key {
            Some(key) => request
                .query(&[("on_conflict", key)])
                .header("Prefer", "resolution=merge-duplicates,return=representation"),
            None => request.header("Prefer", "return=representation"),
        }
    }

    fn delete_request(&self, table: &str, filter: RowFilter) -> RequestBuilder {
        let (column, predicate) = filter.query_pair();
        self.request(Method::DELETE, table)
            .query(&[(column, predicate)])
            .header("Prefer", "return=representation")
    }

    fn update_request(
        &self,
        table: &str,
        fields: &JsonMap<String, JsonValue>,
        filter: RowFilter,
    ) -> RequestBuilder {
        let (column, predicate) = filter.query_pair();
        self.request(Method::PATCH, table)
            .query(&[(column, predicate)])
            .header("Prefer", "return=representation")
            .json(fields)
    }

    async fn rows_from(
        &self,
        operation: &'static str,
        table: &str,
        request: RequestBuilder,
    ) -> Result<Vec<JsonValue>, RemoteError> {
        debug!(operation, table, "remote call");
        let response = request.send().await.map_err(|source| RemoteError::Transport {
            operation,
            table: table.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                operation,
                table: table.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Vec<JsonValue>>()
            .await
            .map_err(|err| RemoteError::Decode {
                operation,
                table: table.to_string(),
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn select(&self, table: &str) -> Result<Vec<JsonValue>, RemoteError> {
        let mut rows = Vec::new();
        // a server cap below the page size shortens pages, so only an empty page ends the walk
        loop {
            let page = self
                .rows_from("select", table, self.select_request(table, rows.len()))
                .await?;
            if page.is_empty() {
                break;
            }
            rows.extend(page);
        }
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[JsonValue],
        conflict_key: Option<&str>,
    ) -> Result<usize, RemoteError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let request = self.upsert_request(table, rows, conflict_key);
        Ok(self.rows_from("upsert", table, request).await?.len())
    }

    async fn delete(&self, table: &str, filter: RowFilter) -> Result<usize, RemoteError> {
        let request = self.delete_request(table, filter);
        Ok(self.rows_from("delete", table, request).await?.len())
    }

    async fn update(
        &self,
        table: &str,
        fields: &JsonMap<String, JsonValue>,
        filter: RowFilter,
    ) -> Result<usize, RemoteError> {
        let request = self.update_request(table, fields, filter);
        Ok(self.rows_from("update", table, request).await?.len())
    }
}

/// One recorded call against a `MemoryStore`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Select { table: String },
    Upsert { table: String, rows: usize, conflict_key: Option<String> },
    Delete { table: String, filter: RowFilter },
    Update { table: String, fields: JsonMap<String, JsonValue>, filter: RowFilter },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Select,
    Upsert,
    Delete,
    Update,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<JsonValue>>,
    calls: Vec<StoreCall>,
    /// Fail the operation once it has succeeded this many more times.
    fail_after: Option<(StoreOp, usize)>,
}

impl MemoryState {
    fn check(&mut self, op: StoreOp, operation: &'static str, table: &str) -> Result<(), RemoteError> {
        let Some((target, remaining)) = self.fail_after else {
            return Ok(());
        };
        if target != op {
            return Ok(());
        }
        if remaining == 0 {
            self.fail_after = None;
            return Err(RemoteError::Rejected {
                operation,
                table: table.to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.fail_after = Some((target, remaining - 1));
        Ok(())
    }
}

/// In-process `RemoteStore` with PostgREST-like semantics: plain inserts reject a
/// duplicate `id`, upserts with a conflict key merge into the matching row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(table: &str, rows: Vec<JsonValue>) -> Self {
        let mut state = MemoryState::default();
        state.tables.insert(table.to_string(), rows);
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn rows(&self, table: &str) -> Vec<JsonValue> {
        let state = self.state.lock().await;
        state.tables.get(table).cloned().unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    /// Makes the given operation fail after `successes` more successful calls.
    pub async fn fail_after(&self, op: StoreOp, successes: usize) {
        self.state.lock().await.fail_after = Some((op, successes));
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, table: &str) -> Result<Vec<JsonValue>, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::Select {
            table: table.to_string(),
        });
        state.check(StoreOp::Select, "select", table)?;
        Ok(state.tables.get(table).cloned().unwrap_or_default())
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[JsonValue],
        conflict_key: Option<&str>,
    ) -> Result<usize, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::Upsert {
            table: table.to_string(),
            rows: rows.len(),
            conflict_key: conflict_key.map(ToString::to_string),
        });
        state.check(StoreOp::Upsert, "upsert", table)?;

        let existing = state.tables.entry(table.to_string()).or_default();
        let mut staged = existing.clone();
        for row in rows {
            let key = conflict_key.unwrap_or("id");
            let position = row
                .get(key)
                .and_then(|value| staged.iter().position(|r| r.get(key) == Some(value)));
            match (position, conflict_key) {
                (Some(idx), Some(_)) => {
                    if let (Some(target), Some(source)) = (staged[idx].as_object_mut(), row.as_object()) {
                        for (k, v) in source {
                            target.insert(k.clone(), v.clone());
                        }
                    }
                }
                (Some(_), None) => {
                    return Err(RemoteError::Rejected {
                        operation: "upsert",
                        table: table.to_string(),
                        message: format!("duplicate key value for {key}"),
                    });
                }
                (None, _) => staged.push(row.clone()),
            }
        }
        *existing = staged;
        Ok(rows.len())
    }

    async fn delete(&self, table: &str, filter: RowFilter) -> Result<usize, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::Delete {
            table: table.to_string(),
            filter,
        });
        state.check(StoreOp::Delete, "delete", table)?;
        let rows = state.tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok(before - rows.len())
    }

    async fn update(
        &self,
        table: &str,
        fields: &JsonMap<String, JsonValue>,
        filter: RowFilter,
    ) -> Result<usize, RemoteError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::Update {
            table: table.to_string(),
            fields: fields.clone(),
            filter,
        });
        state.check(StoreOp::Update, "update", table)?;
        let mut touched = 0;
        for row in state.tables.entry(table.to_string()).or_default().iter_mut() {
            if !filter.matches(row) {
                continue;
            }
            if let Some(object) = row.as_object_mut() {
                for (k, v) in fields {
                    object.insert(k.clone(), v.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_render_postgrest_predicates() {
        assert_eq!(RowFilter::All.query_pair(), ("id", "neq.-1".to_string()));
        assert_eq!(RowFilter::IdEq(42).query_pair(), ("id", "eq.42".to_string()));
        assert!(RowFilter::IdEq(2).matches(&json!({"id": 2})));
        assert!(!RowFilter::IdEq(2).matches(&json!({"id": 3})));
    }

    #[test]
    fn table_url_joins_rest_prefix() {
        assert_eq!(postgrest().table_url("lands"), "https://abc.supabase.co/rest/v1/lands");
    }

    fn postgrest() -> PostgrestStore {
        PostgrestStore::new(PostgrestConfig {
            base_url: "https://abc.supabase.co/".into(),
            api_key: "key".into(),
            timeout: Duration::from_secs(5),
            user_agent: None,
        })
        .unwrap()
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn query(request: &reqwest::Request) -> Vec<(String, String)> {
        request.url().query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
    }

    #[test]
    fn requests_carry_the_api_key_twice() {
        let request = postgrest().select_request("lands", 0).build().unwrap();
        assert_eq!(header(&request, "apikey"), Some("key"));
        assert_eq!(header(&request, "authorization"), Some("Bearer key"));
    }

    #[test]
    fn select_pages_through_the_table_in_id_order() {
        let request = postgrest().select_request("lands", 2000).build().unwrap();
        assert_eq!(*request.method(), Method::GET);
        assert_eq!(
            query(&request),
            vec![
                ("select".to_string(), "*".to_string()),
                ("order".to_string(), "id.asc".to_string()),
                ("limit".to_string(), SELECT_PAGE_SIZE.to_string()),
                ("offset".to_string(), "2000".to_string()),
            ]
        );
    }

    #[test]
    fn plain_insert_has_no_conflict_resolution() {
        let store = postgrest();
        let insert = store.upsert_request("lands", &[json!({"id": 1})], None).build().unwrap();
        assert_eq!(*insert.method(), Method::POST);
        assert_eq!(header(&insert, "prefer"), Some("return=representation"));
        assert!(query(&insert).is_empty());

        let merge = store.upsert_request("lands", &[json!({"id": 1})], Some("id")).build().unwrap();
        assert_eq!(
            header(&merge, "prefer"),
            Some("resolution=merge-duplicates,return=representation")
        );
        assert_eq!(query(&merge), vec![("on_conflict".to_string(), "id".to_string())]);
    }

    #[test]
    fn bulk_delete_and_update_use_the_all_rows_predicate() {
        let store = postgrest();
        let delete = store.delete_request("lands", RowFilter::All).build().unwrap();
        assert_eq!(*delete.method(), Method::DELETE);
        assert_eq!(query(&delete), vec![("id".to_string(), "neq.-1".to_string())]);

        let mut fields = JsonMap::new();
        fields.insert("image_url".into(), JsonValue::Null);
        let update = store.update_request("lands", &fields, RowFilter::IdEq(7)).build().unwrap();
        assert_eq!(*update.method(), Method::PATCH);
        assert_eq!(query(&update), vec![("id".to_string(), "eq.7".to_string())]);
        assert_eq!(header(&update, "prefer"), Some("return=representation"));
        let body = update.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(serde_json::from_slice::<JsonValue>(body).unwrap(), json!({"image_url": null}));
    }

    #[tokio::test]
    async fn memory_store_insert_rejects_duplicate_ids_and_upsert_merges() {
        let store = MemoryStore::with_rows("lands", vec![json!({"id": 1, "title": "a"})]);
        let err = store
            .upsert("lands", &[json!({"id": 1, "title": "b"})], None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
        assert_eq!(store.rows("lands").await, vec![json!({"id": 1, "title": "a"})]);

        store
            .upsert("lands", &[json!({"id": 1, "price": 5}), json!({"id": 2})], Some("id"))
            .await
            .unwrap();
        assert_eq!(
            store.rows("lands").await,
            vec![json!({"id": 1, "title": "a", "price": 5}), json!({"id": 2})]
        );
    }

    #[tokio::test]
    async fn memory_store_update_touches_only_matching_rows() {
        let store = MemoryStore::with_rows("lands", vec![json!({"id": 1, "x": 0}), json!({"id": 2, "x": 0})]);
        let mut fields = JsonMap::new();
        fields.insert("x".into(), json!(9));
        let touched = store.update("lands", &fields, RowFilter::IdEq(2)).await.unwrap();
        assert_eq!(touched, 1);
        assert_eq!(store.rows("lands").await[0], json!({"id": 1, "x": 0}));
        assert_eq!(store.rows("lands").await[1], json!({"id": 2, "x": 9}));
        assert_eq!(store.delete("lands", RowFilter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn injected_failures_fire_after_successes() {
        let store = MemoryStore::new();
        store.fail_after(StoreOp::Select, 1).await;
        assert!(store.select("lands").await.is_ok());
        assert!(store.select("lands").await.is_err());
        assert!(store.select("lands").await.is_ok());
    }
}

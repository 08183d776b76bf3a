//! ArangoDB HTTP adapter
//!
//! Endpoints (relative to `{url}/_db/{database}`):
//! - `/_api/collection` existence, create, drop, count
//! - `/_api/gharial` named graph
//! - `/_api/index` persistent indexes
//! - `/_api/import?onDuplicate=update` batched upsert
//! - `/_api/document` single-document reads
//! - `/_api/cursor` AQL similarity search

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::model::GraphLayout;
use super::ports::{
    CollectionKind, GraphError, GraphResult, GraphStore, ImportSummary, SimilarityHit,
};
use crate::config::{secret_from_env, GraphConfig};

const DUPLICATE_NAME: u16 = 409;

pub struct ArangoGraphStore {
    client: reqwest::Client,
    db_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for ArangoGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArangoGraphStore")
            .field("db_url", &self.db_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ArangoGraphStore {
    pub fn new(
        url: &str,
        database: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> GraphResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            db_url: format!("{}/_db/{}", url.trim_end_matches('/'), database),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Build from config; the password is read from `password_env`, which must be set
    /// (set it to an empty string for a server without authentication)
    pub fn from_config(config: &GraphConfig) -> crate::Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            GraphError::Transport("graph.url is not configured".to_string())
        })?;
        let password = secret_from_env(&config.password_env)?;
        Ok(Self::new(
            url,
            &config.database,
            &config.username,
            password,
            Duration::from_secs(config.timeout_secs),
        )?)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.db_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn check(response: reqwest::Response) -> GraphResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("errorMessage").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(GraphError::Api { status, message })
    }

    async fn exists(&self, path: &str) -> GraphResult<bool> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::check(response).await.map(|_| true),
        }
    }

    async fn delete_ignoring_missing(&self, path: &str) -> GraphResult<()> {
        let response = self.request(reqwest::Method::DELETE, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }

    async fn cursor(&self, query: &str, bind_vars: Value) -> GraphResult<Vec<Value>> {
        #[derive(Deserialize)]
        struct CursorResponse {
            result: Vec<Value>,
        }
        let response = self
            .request(reqwest::Method::POST, "/_api/cursor")
            .json(&json!({ "query": query, "bindVars": bind_vars }))
            .send()
            .await?;
        let parsed: CursorResponse = Self::check(response).await?.json().await?;
        Ok(parsed.result)
    }
}

#[async_trait]
impl GraphStore for ArangoGraphStore {
    async fn collection_exists(&self, name: &str) -> GraphResult<bool> {
        self.exists(&format!("/_api/collection/{name}")).await
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> GraphResult<()> {
        let type_code = match kind {
            CollectionKind::Document => 2,
            CollectionKind::Edge => 3,
        };
        let response = self
            .request(reqwest::Method::POST, "/_api/collection")
            .json(&json!({ "name": name, "type": type_code }))
            .send()
            .await?;
        if response.status().as_u16() == DUPLICATE_NAME {
            return Ok(());
        }
        Self::check(response).await?;
        debug!(collection = name, ?kind, "Created collection");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> GraphResult<()> {
        self.delete_ignoring_missing(&format!("/_api/collection/{name}"))
            .await
    }

    async fn graph_exists(&self, name: &str) -> GraphResult<bool> {
        self.exists(&format!("/_api/gharial/{name}")).await
    }

    async fn create_graph(&self, layout: &GraphLayout) -> GraphResult<()> {
        let response = self
            .request(reqwest::Method::POST, "/_api/gharial")
            .json(&json!({
                "name": layout.graph,
                "edgeDefinitions": [{
                    "collection": layout.facts,
                    "from": [layout.objects],
                    "to": [layout.objects],
                }],
                "orphanCollections": [layout.relations],
            }))
            .send()
            .await?;
        if response.status().as_u16() == DUPLICATE_NAME {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }

    async fn drop_graph(&self, name: &str) -> GraphResult<()> {
        self.delete_ignoring_missing(&format!("/_api/gharial/{name}"))
            .await
    }

    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> GraphResult<()> {
        // Creating an identical index returns the existing one
        let response = self
            .request(reqwest::Method::POST, "/_api/index")
            .query(&[("collection", collection)])
            .json(&json!({ "type": "persistent", "fields": fields }))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Value],
    ) -> GraphResult<ImportSummary> {
        if documents.is_empty() {
            return Ok(ImportSummary::default());
        }

        #[derive(Deserialize)]
        struct ImportResponse {
            #[serde(default)]
            created: usize,
            #[serde(default)]
            updated: usize,
            #[serde(default)]
            errors: usize,
        }

        let response = self
            .request(reqwest::Method::POST, "/_api/import")
            .query(&[
                ("collection", collection),
                ("type", "list"),
                ("onDuplicate", "update"),
            ])
            .json(documents)
            .send()
            .await?;
        let parsed: ImportResponse = Self::check(response).await?.json().await?;
        if parsed.errors > 0 {
            return Err(GraphError::Import {
                collection: collection.to_string(),
                errors: parsed.errors,
                total: documents.len(),
            });
        }
        Ok(ImportSummary {
            created: parsed.created,
            updated: parsed.updated,
            errors: parsed.errors,
        })
    }

    async fn get_document(&self, collection: &str, key: &str) -> GraphResult<Option<Value>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/_api/document/{collection}/{key}"),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    async fn count_documents(&self, collection: &str) -> GraphResult<usize> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: usize,
        }
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/_api/collection/{collection}/count"),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GraphError::CollectionNotFound(collection.to_string()));
        }
        let parsed: CountResponse = Self::check(response).await?.json().await?;
        Ok(parsed.count)
    }

    async fn search_similar(
        &self,
        collection: &str,
        vector: &[f64],
        limit: usize,
    ) -> GraphResult<Vec<SimilarityHit>> {
        let rows = self
            .cursor(
                "FOR d IN @@collection \
                 FILTER IS_ARRAY(d.embedding) AND LENGTH(d.embedding) == LENGTH(@vector) \
                 LET score = COSINE_SIMILARITY(d.embedding, @vector) \
                 SORT score DESC, d._key ASC \
                 LIMIT @limit \
                 RETURN { key: d._key, score: score, document: d }",
                json!({ "@collection": collection, "vector": vector, "limit": limit }),
            )
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(GraphError::from))
            .collect()
    }
}

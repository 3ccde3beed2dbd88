//! Qdrant backend speaking the REST API.
//!
//! Each citation becomes one point with a UUID id, a single named vector (the configured vector
//! field) and a `{reference, text, timestamp}` payload. The collection uses cosine distance with
//! int8 scalar quantization; searches force exact mode so results never depend on HNSW recall.

use super::{VectorStore, VectorStoreError};
use crate::records::{CitationRecord, SearchResult, StoredDocument};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Lightweight HTTP client bound to one Qdrant collection.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    vector_name: String,
    dimension: usize,
}

impl QdrantStore {
    /// Construct a store for `collection` on the Qdrant instance at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: &str,
        vector_name: &str,
        dimension: usize,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder().user_agent("citerag/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection,
            vector = vector_name,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.to_string(),
            vector_name: vector_name.to_string(),
            dimension,
        })
    }

    /// Create the collection with its named cosine vector when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        if self.collection_exists().await? {
            tracing::debug!(collection = %self.collection, "Collection already present");
            return Ok(());
        }

        let body = json!({
            "vectors": {
                self.vector_name.clone(): {
                    "size": self.dimension,
                    "distance": "Cosine"
                }
            },
            "quantization_config": {
                "scalar": {
                    "type": "int8",
                    "always_ram": true
                }
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        ensure_success(response, || {
            tracing::info!(
                collection = %self.collection,
                vector = %self.vector_name,
                dimension = self.dimension,
                "Collection created"
            );
        })
        .await
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorStoreError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn insert(
        &self,
        record: &CitationRecord,
        embedding: Vec<f32>,
    ) -> Result<(), VectorStoreError> {
        self.check_dimension(&embedding)?;
        let document = StoredDocument::new(record.clone(), embedding);
        let point = build_point(&Uuid::new_v4().to_string(), &self.vector_name, document);

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": [point] }))
            .send()
            .await?;

        ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                reference = %record.reference,
                "Point inserted"
            );
        })
        .await
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        self.check_dimension(&vector)?;
        let body = json!({
            "query": vector,
            "using": self.vector_name,
            "limit": top_k,
            "with_payload": ["reference", "text"],
            "with_vector": false,
            "params": { "exact": true },
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points.into_iter().map(map_query_point).collect())
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": { "must": [] } }))
            .send()
            .await?;

        ensure_success(response, || {
            tracing::info!(collection = %self.collection, "Collection cleared");
        })
        .await
    }

    async fn ping(&self) -> Result<(), VectorStoreError> {
        if self.collection_exists().await? {
            Ok(())
        } else {
            Err(VectorStoreError::UnexpectedStatus {
                status: StatusCode::NOT_FOUND,
                body: format!("collection '{}' is missing", self.collection),
            })
        }
    }
}

fn build_point(id: &str, vector_name: &str, document: StoredDocument) -> Value {
    let StoredDocument {
        reference,
        text,
        document_embedding,
        timestamp,
    } = document;
    json!({
        "id": id,
        "vector": { vector_name: document_embedding },
        "payload": {
            "reference": reference,
            "text": text,
            "timestamp": timestamp,
        },
    })
}

fn map_query_point(point: QueryPoint) -> SearchResult {
    let mut payload = point.payload.unwrap_or_default();
    SearchResult {
        reference: take_string(&mut payload, "reference"),
        text: take_string(&mut payload, "text"),
        search_score: point.score,
    }
}

fn take_string(payload: &mut Map<String, Value>, key: &str) -> String {
    match payload.remove(key) {
        Some(Value::String(value)) => value,
        _ => String::new(),
    }
}

async fn ensure_success<F>(response: reqwest::Response, on_success: F) -> Result<(), VectorStoreError>
where
    F: FnOnce(),
{
    if response.status().is_success() {
        on_success();
        Ok(())
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = VectorStoreError::UnexpectedStatus { status, body };
        tracing::error!(error = %error, "Qdrant request failed");
        Err(error)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

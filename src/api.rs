//! HTTP surface for the citation RAG server.
//!
//! - `POST /generate-response` – Answer the last user message grounded in retrieved citations.
//!   Body `{ messages, top_searches?, model?, max_tokens? }`, returns `{ response, context }`.
//! - `GET /find?query=&top_searches=` – Similarity search, returns `{ results }`.
//! - `POST /insert` – Store one raw `{ reference, text | content, document_embedding? }` document.
//! - `POST /index-pdf?starting_page=&ending_page=` – Replace the corpus with the citations
//!   segmented from an uploaded PDF (multipart field `file`).
//! - `GET /health` – Vector store reachability.
//! - `GET /metrics` – Ingestion and query counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::pipeline::{
    GenerateOutcome, GenerateRequest, IngestSummary, InsertRequest, PageRange, PipelineError,
    RetrievalApi,
};
use crate::records::{ChatMessage, SearchResult};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Largest accepted request body; uploads carry whole PDFs.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the HTTP router exposing the retrieval API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RetrievalApi + 'static,
{
    Router::new()
        .route("/generate-response", post(generate_response::<S>))
        .route("/find", get(find::<S>))
        .route("/insert", post(insert_document::<S>))
        .route("/index-pdf", post(index_pdf::<S>))
        .route("/health", get(health::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Request body for `POST /generate-response`.
#[derive(Deserialize)]
struct GenerateBody {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    top_searches: Option<usize>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct GenerateResponse {
    response: String,
    context: String,
}

/// Retrieve context for the latest user message and generate an answer.
///
/// A failing chat model yields `502` with `{ error, context }` so the caller still sees what
/// was retrieved.
async fn generate_response<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<GenerateBody>,
) -> Result<Response, ApiError>
where
    S: RetrievalApi,
{
    let outcome = service
        .generate_response(GenerateRequest {
            messages: body.messages,
            top_k: body.top_searches,
            model: body.model,
            max_tokens: body.max_tokens,
        })
        .await?;

    Ok(match outcome {
        GenerateOutcome::Answered { response, context } => {
            Json(GenerateResponse { response, context }).into_response()
        }
        GenerateOutcome::Failed { error, context } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": error, "context": context })),
        )
            .into_response(),
    })
}

#[derive(Deserialize)]
struct FindParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    top_searches: Option<usize>,
}

#[derive(Serialize)]
struct FindResponse {
    results: Vec<SearchResult>,
}

/// Similarity search over the stored citations.
async fn find<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<FindParams>,
) -> Result<Json<FindResponse>, ApiError>
where
    S: RetrievalApi,
{
    let query = params.query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest("Query parameter is required".into()));
    }
    let results = service.find(&query, params.top_searches).await?;
    Ok(Json(FindResponse { results }))
}

/// Request body for `POST /insert`.
#[derive(Deserialize)]
struct InsertBody {
    reference: String,
    #[serde(alias = "content")]
    text: String,
    #[serde(default)]
    document_embedding: Option<Vec<f32>>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn insert_document<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<InsertBody>,
) -> Result<Json<StatusResponse>, ApiError>
where
    S: RetrievalApi,
{
    let inserted = service
        .insert(InsertRequest {
            reference: body.reference,
            text: body.text,
            document_embedding: body.document_embedding,
        })
        .await?;
    Ok(Json(StatusResponse {
        status: if inserted {
            "insert success"
        } else {
            "insert failed"
        },
    }))
}

#[derive(Deserialize)]
struct IndexPdfParams {
    #[serde(default = "first_page")]
    starting_page: u32,
    #[serde(default = "first_page")]
    ending_page: u32,
}

fn first_page() -> u32 {
    1
}

#[derive(Serialize)]
struct IndexPdfResponse {
    message: &'static str,
    filename: String,
    size: usize,
    #[serde(flatten)]
    summary: IngestSummary,
    status: &'static str,
}

/// Replace the corpus with the citations of an uploaded PDF.
///
/// Parameters and the file type are validated before anything touches the store.
async fn index_pdf<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<IndexPdfParams>,
    mut multipart: Multipart,
) -> Result<Json<IndexPdfResponse>, ApiError>
where
    S: RetrievalApi,
{
    let range = PageRange::new(params.starting_page, params.ending_page)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        if !is_pdf_upload(&filename, content_type.as_deref()) {
            tracing::warn!(filename = %filename, content_type = ?content_type, "Rejected non-PDF upload");
            return Err(ApiError::BadRequest("invalid file format".into()));
        }
        upload = Some((filename, field.bytes().await?));
        break;
    }
    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("multipart field 'file' is required".into()))?;

    let size = bytes.len();
    tracing::info!(filename = %filename, size, "Indexing uploaded PDF");
    let summary = service.ingest_pdf(bytes.to_vec(), range).await?;
    Ok(Json(IndexPdfResponse {
        message: "PDF processed successfully",
        filename,
        size,
        summary,
        status: "indexed",
    }))
}

/// Accept `application/pdf`, or a `.pdf` filename sent without a specific content type.
fn is_pdf_upload(filename: &str, content_type: Option<&str>) -> bool {
    let has_pdf_extension = filename.to_ascii_lowercase().ends_with(".pdf");
    match content_type.map(|value| value.trim().to_ascii_lowercase()) {
        Some(value) if value.starts_with("application/pdf") => true,
        None => has_pdf_extension,
        Some(value) if value == "application/octet-stream" => has_pdf_extension,
        Some(_) => false,
    }
}

async fn health<S>(State(service): State<Arc<S>>) -> Response
where
    S: RetrievalApi,
{
    let snapshot = service.health().await;
    let (status, label) = if snapshot.store_reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(json!({
            "status": label,
            "store_reachable": snapshot.store_reachable,
            "error": snapshot.error,
        })),
    )
        .into_response()
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: RetrievalApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "generate_response",
                method: "POST",
                path: "/generate-response",
                description: "Answer the latest user message using the most similar citations as context. Returns { \"response\": string, \"context\": string }.",
                request_example: Some(json!({
                    "messages": [{ "role": "user", "content": "Who is addressed in 2:22?" }],
                    "top_searches": 5,
                    "max_tokens": 300
                })),
            },
            CommandDescriptor {
                name: "find",
                method: "GET",
                path: "/find?query=...&top_searches=5",
                description: "Return the citations most similar to the query with their search_score.",
                request_example: None,
            },
            CommandDescriptor {
                name: "insert",
                method: "POST",
                path: "/insert",
                description: "Store one citation record; the embedding is computed when omitted.",
                request_example: Some(json!({
                    "reference": "2:22",
                    "text": "Citation text"
                })),
            },
            CommandDescriptor {
                name: "index_pdf",
                method: "POST",
                path: "/index-pdf?starting_page=1&ending_page=1",
                description: "Upload a PDF as multipart field 'file'; replaces the stored corpus with its segmented citations.",
                request_example: None,
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Report whether the vector store is reachable.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and query counters.",
                request_example: None,
            },
        ],
    })
}

enum ApiError {
    BadRequest(String),
    Pipeline(PipelineError),
    Upload(MultipartError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Pipeline(error) if error.is_client_error() => {
                (StatusCode::BAD_REQUEST, error.to_string()).into_response()
            }
            Self::Pipeline(error) => {
                tracing::error!(error = %error, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
            }
            Self::Upload(error) => (error.status(), error.body_text()).into_response(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}

impl From<MultipartError> for ApiError {
    fn from(inner: MultipartError) -> Self {
        Self::Upload(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands, is_pdf_upload};
    use crate::metrics::MetricsSnapshot;
    use crate::pipeline::{
        GenerateOutcome, GenerateRequest, HealthSnapshot, IngestSummary, InsertRequest, PageRange,
        PipelineError, RetrievalApi,
    };
    use crate::records::SearchResult;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubRetrievalService {
        ingested: Mutex<Vec<(usize, PageRange)>>,
        inserted: Mutex<Vec<InsertRequest>>,
        queries: Mutex<Vec<(String, Option<usize>)>>,
        fail_generation: bool,
    }

    #[async_trait]
    impl RetrievalApi for StubRetrievalService {
        async fn ingest_pdf(
            &self,
            pdf: Vec<u8>,
            range: PageRange,
        ) -> Result<IngestSummary, PipelineError> {
            self.ingested.lock().await.push((pdf.len(), range));
            Ok(IngestSummary {
                page_count: 4,
                pages_processed: 2,
                records_indexed: 7,
                ..IngestSummary::default()
            })
        }

        async fn insert(&self, request: InsertRequest) -> Result<bool, PipelineError> {
            crate::records::validate_reference(&request.reference)?;
            self.inserted.lock().await.push(request);
            Ok(true)
        }

        async fn find(
            &self,
            query: &str,
            top_k: Option<usize>,
        ) -> Result<Vec<SearchResult>, PipelineError> {
            self.queries.lock().await.push((query.to_string(), top_k));
            Ok(vec![SearchResult {
                reference: "2:22".into(),
                text: "Passage".into(),
                search_score: 0.5,
            }])
        }

        async fn generate_response(
            &self,
            request: GenerateRequest,
        ) -> Result<GenerateOutcome, PipelineError> {
            if request.messages.is_empty() {
                return Err(PipelineError::InvalidInput(
                    "No user message found in the input".into(),
                ));
            }
            let context = "[2:22] (relevance: 0.5000)\nPassage".to_string();
            Ok(if self.fail_generation {
                GenerateOutcome::Failed {
                    error: "upstream down".into(),
                    context,
                }
            } else {
                GenerateOutcome::Answered {
                    response: "Answer".into(),
                    context,
                }
            })
        }

        async fn health(&self) -> HealthSnapshot {
            HealthSnapshot {
                store_reachable: true,
                error: None,
            }
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                records_indexed: 3,
                ..MetricsSnapshot::default()
            }
        }
    }

    async fn send(
        service: Arc<StubRetrievalService>,
        request: Request<Body>,
    ) -> (StatusCode, Vec<u8>) {
        let response = create_router(service)
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, body.to_vec())
    }

    fn json_request(method: Method, uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    fn multipart_request(uri: &str, filename: &str, content_type: &str) -> Request<Body> {
        let body = format!(
            "--BOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n%PDF-1.5 fake\r\n--BOUNDARY--\r\n"
        );
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn commands_catalog_lists_every_route() {
        let commands = get_commands().await.0.commands;
        for path in ["/generate-response", "/find", "/insert", "/index-pdf", "/health"] {
            assert!(
                commands.iter().any(|cmd| cmd.path.starts_with(path)),
                "missing {path}"
            );
        }
    }

    #[tokio::test]
    async fn find_forwards_query_and_limit() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service.clone(),
            Request::builder()
                .uri("/find?query=light%20and%20darkness&top_searches=3")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["results"][0]["reference"], "2:22");
        assert_eq!(json["results"][0]["search_score"], 0.5);
        assert_eq!(
            service.queries.lock().await.clone(),
            vec![("light and darkness".to_string(), Some(3))]
        );
    }

    #[tokio::test]
    async fn find_without_query_is_bad_request() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, _) = send(
            service.clone(),
            Request::builder()
                .uri("/find?query=")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(service.queries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn generate_response_returns_answer_and_context() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service,
            json_request(
                Method::POST,
                "/generate-response",
                json!({ "messages": [{ "role": "user", "content": "Question" }] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["response"], "Answer");
        assert_eq!(json["context"], "[2:22] (relevance: 0.5000)\nPassage");
    }

    #[tokio::test]
    async fn generation_failure_is_structured_error() {
        let service = Arc::new(StubRetrievalService {
            fail_generation: true,
            ..Default::default()
        });
        let (status, body) = send(
            service,
            json_request(
                Method::POST,
                "/generate-response",
                json!({ "messages": [{ "role": "user", "content": "Question" }] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["error"], "upstream down");
    }

    #[tokio::test]
    async fn missing_user_message_is_bad_request() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service,
            json_request(Method::POST, "/generate-response", json!({ "messages": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("No user message"));
    }

    #[tokio::test]
    async fn insert_accepts_content_alias() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service.clone(),
            json_request(
                Method::POST,
                "/insert",
                json!({ "reference": "2:22", "content": "Passage", "document_embedding": [0.1, 0.2] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["status"], "insert success");
        let inserted = service.inserted.lock().await.clone();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].text, "Passage");
        assert_eq!(inserted[0].document_embedding, Some(vec![0.1, 0.2]));
    }

    #[tokio::test]
    async fn insert_with_bad_reference_is_bad_request() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, _) = send(
            service.clone(),
            json_request(
                Method::POST,
                "/insert",
                json!({ "reference": "2:2:2", "text": "Passage" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(service.inserted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn index_pdf_forwards_upload_and_page_range() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service.clone(),
            multipart_request(
                "/index-pdf?starting_page=2&ending_page=3",
                "scripture.pdf",
                "application/pdf",
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["filename"], "scripture.pdf");
        assert_eq!(json["status"], "indexed");
        assert_eq!(json["page_count"], 4);
        assert_eq!(json["records_indexed"], 7);
        assert_eq!(json["size"], 13);

        let ingested = service.ingested.lock().await.clone();
        assert_eq!(ingested, vec![(13, PageRange { start: 2, end: 3 })]);
    }

    #[tokio::test]
    async fn index_pdf_rejects_non_pdf_without_ingesting() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service.clone(),
            multipart_request("/index-pdf", "notes.txt", "text/plain"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("invalid file format"));
        assert!(service.ingested.lock().await.is_empty());
    }

    #[tokio::test]
    async fn index_pdf_rejects_invalid_page_range() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, _) = send(
            service.clone(),
            multipart_request("/index-pdf?starting_page=0", "a.pdf", "application/pdf"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(service.ingested.lock().await.is_empty());
    }

    #[tokio::test]
    async fn health_and_metrics_report_service_state() {
        let service = Arc::new(StubRetrievalService::default());
        let (status, body) = send(
            service.clone(),
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["status"], "ok");

        let (status, body) = send(
            service,
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["records_indexed"], 3);
    }

    #[test]
    fn pdf_detection_prefers_content_type() {
        assert!(is_pdf_upload("scan.PDF", Some("application/pdf")));
        assert!(is_pdf_upload("upload", Some("application/pdf")));
        assert!(is_pdf_upload("scan.pdf", None));
        assert!(is_pdf_upload("scan.pdf", Some("application/octet-stream")));
        assert!(!is_pdf_upload("scan.pdf", Some("text/plain")));
        assert!(!is_pdf_upload("scan.txt", None));
    }
}

//! HTTP transport.
//!
//! Thin axum adapter over the services in [`App`]. Handlers decode the
//! request, apply the edge-only checks (strict path alphabet, message size
//! caps, identity cross-check), run the service call under the request
//! deadline, and wrap the outcome in the [`crate::envelope`] shape.
//!
//! # Caller identity
//!
//! The caller is the `x-client-sub` request header, set by the
//! authenticating proxy in front of this service. Identities that also appear
//! in a payload or a query (`client_sub`, `client_id`) must match it, or the
//! request is `Forbidden`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check |
//! | `POST` | `/client` | Register a client |
//! | `GET`  | `/get_client_data_for_upload` | Pre-signed upload URL |
//! | `GET`  | `/get_client_data_for_download` | Pre-signed download URL |
//! | `POST` | `/knowledge_source/{id}/source_data` | Register uploaded source data |
//! | `POST` | `/source_data/lfn` | Register source data by LFN |
//! | `POST` | `/source_data/{id}/refresh` | Re-check blob availability |
//! | `DELETE` | `/source_data/{id}` | Soft-delete source data |
//! | `GET`  | `/client/{id}/source` | List a client's source data |
//! | `POST` | `/research-context` | Create a research context |
//! | `POST` | `/research-context/extend` | Extend a research context |
//! | `GET`, `DELETE` | `/research-context/{id}` | Read / soft-delete a research context |
//! | `GET`  | `/research-context/{id}/source` | Sources of a research context |
//! | `GET`  | `/research-context/{id}/conversation` | Conversations of a research context |
//! | `POST` | `/research-context/{id}/vector_store` | Attach a vector store |
//! | `GET`  | `/user/{id}/research_contexts` | A client's research contexts |
//! | `POST` | `/research_contexts/{id}/conversations` | Create a conversation |
//! | `GET`, `PATCH` | `/conversations/{id}` | Read / rename a conversation |
//! | `GET`  | `/conversations/{id}/messages` | Messages of a conversation |
//! | `GET`  | `/conversations/{id}/sources` | Sources cited in a conversation |
//! | `POST` | `/conversation/{id}/message` | Append a message |

use std::future::Future;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::Uri;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sda_core::models::{
    normalize_contents, Client, MessageContentInput, NewCitation, NewMessage, NewSender,
    SenderType,
};
use sda_core::validate::check_transport_path;
use sda_core::SdaError;

use crate::app::App;
use crate::config::Config;
use crate::envelope::{
    ApiError, ApiResult, ClientPayload, ConversationIdPayload, ConversationListPayload,
    ConversationPayload, DeletedPayload, HealthPayload, MessageIdPayload, MessageListPayload,
    ResearchContextListPayload, ResearchContextPayload, SignedUrlPayload, SourceDataListPayload,
    SourceDataPayload, Success, VectorStorePayload,
};
use crate::research_context::{AttachVectorStore, CreateResearchContext, ExtendResearchContext};

/// Header carrying the authenticated caller's `sub`.
pub const CLIENT_SUB_HEADER: &str = "x-client-sub";

/// Start the HTTP server on `[server].bind` and run until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::from_config(config).await?;
    let router = build_router(app);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "sda server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Build the router with all routes, CORS and request tracing.
pub fn build_router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/client", post(handle_register_client))
        .route("/get_client_data_for_upload", get(handle_upload_url))
        .route("/get_client_data_for_download", get(handle_download_url))
        .route(
            "/knowledge_source/{id}/source_data",
            post(handle_register_source_data),
        )
        .route("/source_data/lfn", post(handle_register_lfn))
        .route("/source_data/{id}/refresh", post(handle_refresh_source_data))
        .route(
            "/source_data/{id}",
            axum::routing::delete(handle_delete_source_data),
        )
        .route("/client/{id}/source", get(handle_list_client_sources))
        .route("/research-context", post(handle_create_research_context))
        .route("/research-context/extend", post(handle_extend_research_context))
        .route(
            "/research-context/{id}",
            get(handle_get_research_context).delete(handle_delete_research_context),
        )
        .route("/research-context/{id}/source", get(handle_list_context_sources))
        .route(
            "/research-context/{id}/conversation",
            get(handle_list_conversations),
        )
        .route(
            "/research-context/{id}/vector_store",
            post(handle_attach_vector_store),
        )
        .route("/user/{id}/research_contexts", get(handle_list_research_contexts))
        .route(
            "/research_contexts/{id}/conversations",
            post(handle_create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(handle_get_conversation).patch(handle_rename_conversation),
        )
        .route("/conversations/{id}/messages", get(handle_list_messages))
        .route("/conversations/{id}/sources", get(handle_list_cited_sources))
        .route("/conversation/{id}/message", post(handle_append_message))
        .fallback(handle_unknown_route)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

// ============ Extractors ============

/// The authenticated caller, taken from [`CLIENT_SUB_HEADER`].
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CLIENT_SUB_HEADER)
            .ok_or_else(|| SdaError::InvalidArgument(format!("missing {CLIENT_SUB_HEADER} header")))?;
        let sub = value
            .to_str()
            .map_err(|_| SdaError::InvalidArgument(format!("{CLIENT_SUB_HEADER} is not valid text")))?;
        Ok(Caller(sub.to_string()))
    }
}

/// `Json` whose rejection is an enveloped `InvalidArgument`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| SdaError::InvalidArgument(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Query` whose rejection is an enveloped `InvalidArgument`.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: QueryRejection| SdaError::InvalidArgument(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Path` whose rejection is an enveloped `InvalidArgument`.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: PathRejection| SdaError::InvalidArgument(e.body_text()))?;
        Ok(Self(value))
    }
}

// ============ Helpers ============

/// Run a service call under the request deadline. On expiry the future is
/// dropped, which rolls back any open metadata session.
async fn within<T, F>(app: &App, fut: F) -> ApiResult<T>
where
    T: Serialize,
    F: Future<Output = sda_core::Result<T>>,
{
    match tokio::time::timeout(app.request_timeout, fut).await {
        Ok(result) => Ok(Success(result?)),
        Err(_) => {
            tracing::warn!(
                timeout_secs = app.request_timeout.as_secs(),
                "request deadline exceeded"
            );
            Err(SdaError::Timeout.into())
        }
    }
}

/// A `client_sub` carried in a payload must name the caller.
fn ensure_payload_sub(caller: &Caller, payload_sub: Option<&str>) -> Result<(), SdaError> {
    match payload_sub {
        Some(sub) if sub != caller.0 => Err(SdaError::Forbidden(
            "client_sub does not match the authenticated caller".into(),
        )),
        _ => Ok(()),
    }
}

/// A `client_id` in the URL or query must be the caller's own.
fn ensure_client_id(client: &Client, client_id: i64) -> Result<(), SdaError> {
    if client.id != client_id {
        return Err(SdaError::Forbidden(format!(
            "client {client_id} is not the authenticated caller"
        )));
    }
    Ok(())
}

// ============ Health & clients ============

async fn handle_health() -> Success<HealthPayload> {
    Success(HealthPayload {
        service: "sda",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct RegisterClientBody {
    sub: String,
}

async fn handle_register_client(
    State(app): State<App>,
    ApiJson(body): ApiJson<RegisterClientBody>,
) -> ApiResult<ClientPayload> {
    within(&app, async {
        let client = app.clients.register(&body.sub).await?;
        Ok(ClientPayload { client })
    })
    .await
}

async fn handle_unknown_route(uri: Uri) -> ApiError {
    SdaError::not_found("route", uri.path()).into()
}

// ============ Source data ============

#[derive(Deserialize)]
struct ClientDataQuery {
    client_id: i64,
    protocol: String,
    relative_path: String,
}

async fn handle_upload_url(
    State(app): State<App>,
    caller: Caller,
    ApiQuery(query): ApiQuery<ClientDataQuery>,
) -> ApiResult<SignedUrlPayload> {
    check_transport_path(&query.relative_path)?;
    within(&app, async {
        let client = app.clients.resolve(&caller.0).await?;
        ensure_client_id(&client, query.client_id)?;
        let ticket = app
            .source_data
            .prepare_upload(&client.sub, &query.protocol, &query.relative_path)
            .await?;
        Ok(SignedUrlPayload {
            signed_url: ticket.signed_url,
            relative_path: Some(ticket.relative_path),
        })
    })
    .await
}

async fn handle_download_url(
    State(app): State<App>,
    caller: Caller,
    ApiQuery(query): ApiQuery<ClientDataQuery>,
) -> ApiResult<SignedUrlPayload> {
    check_transport_path(&query.relative_path)?;
    within(&app, async {
        let client = app.clients.resolve(&caller.0).await?;
        ensure_client_id(&client, query.client_id)?;
        let signed_url = app
            .source_data
            .prepare_download(client.id, &query.protocol, &query.relative_path)
            .await?;
        Ok(SignedUrlPayload {
            signed_url,
            relative_path: None,
        })
    })
    .await
}

#[derive(Deserialize)]
struct RegisterSourceDataBody {
    #[serde(default)]
    client_sub: Option<String>,
    name: String,
    protocol: String,
    relative_path: String,
}

/// The `{id}` segment is a knowledge-source grouping; ownership is always
/// the caller's client.
async fn handle_register_source_data(
    State(app): State<App>,
    caller: Caller,
    ApiPath(_knowledge_source_id): ApiPath<i64>,
    ApiJson(body): ApiJson<RegisterSourceDataBody>,
) -> ApiResult<SourceDataPayload> {
    ensure_payload_sub(&caller, body.client_sub.as_deref())?;
    check_transport_path(&body.relative_path)?;
    within(&app, async {
        let source_data = app
            .source_data
            .register(&caller.0, &body.name, &body.protocol, &body.relative_path)
            .await?;
        Ok(SourceDataPayload { source_data })
    })
    .await
}

#[derive(Deserialize)]
struct RegisterLfnBody {
    #[serde(default)]
    client_sub: Option<String>,
    name: String,
    /// The LFN, either as a JSON string or inline as an object.
    lfn: serde_json::Value,
}

async fn handle_register_lfn(
    State(app): State<App>,
    caller: Caller,
    ApiJson(body): ApiJson<RegisterLfnBody>,
) -> ApiResult<SourceDataPayload> {
    ensure_payload_sub(&caller, body.client_sub.as_deref())?;
    let lfn = json_text(body.lfn);
    within(&app, async {
        let source_data = app
            .source_data
            .register_lfn(&caller.0, &body.name, &lfn)
            .await?;
        Ok(SourceDataPayload { source_data })
    })
    .await
}

/// A JSON string's contents, or any other JSON value re-serialized.
fn json_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

async fn handle_refresh_source_data(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<SourceDataPayload> {
    within(&app, async {
        let source_data = app.source_data.refresh_status(&caller.0, id).await?;
        Ok(SourceDataPayload { source_data })
    })
    .await
}

async fn handle_delete_source_data(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<DeletedPayload> {
    within(&app, async {
        app.source_data.delete(&caller.0, id).await?;
        Ok(DeletedPayload { deleted: id })
    })
    .await
}

async fn handle_list_client_sources(
    State(app): State<App>,
    caller: Caller,
    ApiPath(client_id): ApiPath<i64>,
) -> ApiResult<SourceDataListPayload> {
    within(&app, async {
        let client = app.clients.resolve(&caller.0).await?;
        ensure_client_id(&client, client_id)?;
        let source_data_list = app.source_data.list_for_client(client.id).await?;
        Ok(SourceDataListPayload { source_data_list })
    })
    .await
}

// ============ Research contexts ============

#[derive(Deserialize)]
struct CreateResearchContextBody {
    #[serde(default)]
    client_sub: Option<String>,
    llm_name: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    external_id: Option<String>,
    source_data_ids: Vec<i64>,
}

async fn handle_create_research_context(
    State(app): State<App>,
    caller: Caller,
    ApiJson(body): ApiJson<CreateResearchContextBody>,
) -> ApiResult<ResearchContextPayload> {
    ensure_payload_sub(&caller, body.client_sub.as_deref())?;
    let req = CreateResearchContext {
        client_sub: caller.0,
        llm_name: body.llm_name,
        title: body.title,
        description: body.description,
        external_id: body.external_id,
        source_data_ids: body.source_data_ids,
    };
    within(&app, async {
        let created = app.research_contexts.create(req).await?;
        Ok(ResearchContextPayload::from(created))
    })
    .await
}

#[derive(Deserialize)]
struct ExtendResearchContextBody {
    #[serde(default)]
    client_sub: Option<String>,
    research_context_id: i64,
    title: String,
    #[serde(default)]
    description: String,
    llm_name: String,
    source_data_ids: Vec<i64>,
    #[serde(default)]
    external_id: Option<String>,
}

async fn handle_extend_research_context(
    State(app): State<App>,
    caller: Caller,
    ApiJson(body): ApiJson<ExtendResearchContextBody>,
) -> ApiResult<ResearchContextPayload> {
    ensure_payload_sub(&caller, body.client_sub.as_deref())?;
    let req = ExtendResearchContext {
        client_sub: caller.0,
        research_context_id: body.research_context_id,
        title: body.title,
        description: body.description,
        llm_name: body.llm_name,
        source_data_ids: body.source_data_ids,
        external_id: body.external_id,
    };
    within(&app, async {
        let extended = app.research_contexts.extend(req).await?;
        Ok(ResearchContextPayload::from(extended))
    })
    .await
}

async fn handle_get_research_context(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<ResearchContextPayload> {
    within(&app, async {
        let found = app.research_contexts.get(&caller.0, id).await?;
        Ok(ResearchContextPayload::from(found))
    })
    .await
}

async fn handle_delete_research_context(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<DeletedPayload> {
    within(&app, async {
        app.research_contexts.delete(&caller.0, id).await?;
        Ok(DeletedPayload { deleted: id })
    })
    .await
}

async fn handle_list_research_contexts(
    State(app): State<App>,
    caller: Caller,
    ApiPath(client_id): ApiPath<i64>,
) -> ApiResult<ResearchContextListPayload> {
    within(&app, async {
        let client = app.clients.resolve(&caller.0).await?;
        ensure_client_id(&client, client_id)?;
        let research_contexts = app.research_contexts.list_for_client(client.id).await?;
        Ok(ResearchContextListPayload { research_contexts })
    })
    .await
}

async fn handle_list_context_sources(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<SourceDataListPayload> {
    within(&app, async {
        let source_data_list = app.research_contexts.list_sources(&caller.0, id).await?;
        Ok(SourceDataListPayload { source_data_list })
    })
    .await
}

async fn handle_list_conversations(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<ConversationListPayload> {
    within(&app, async {
        let conversations = app
            .conversations
            .list_for_research_context(&caller.0, id)
            .await?;
        Ok(ConversationListPayload { conversations })
    })
    .await
}

#[derive(Deserialize)]
struct AttachVectorStoreBody {
    name: String,
    lfn: serde_json::Value,
    embedding_model_id: i64,
}

async fn handle_attach_vector_store(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<AttachVectorStoreBody>,
) -> ApiResult<VectorStorePayload> {
    let req = AttachVectorStore {
        client_sub: caller.0,
        research_context_id: id,
        name: body.name,
        lfn: json_text(body.lfn),
        embedding_model_id: body.embedding_model_id,
    };
    within(&app, async {
        let vector_store = app.research_contexts.attach_vector_store(req).await?;
        Ok(VectorStorePayload { vector_store })
    })
    .await
}

// ============ Conversations ============

#[derive(Deserialize)]
struct TitleBody {
    title: String,
}

async fn handle_create_conversation(
    State(app): State<App>,
    caller: Caller,
    ApiPath(research_context_id): ApiPath<i64>,
    ApiJson(body): ApiJson<TitleBody>,
) -> ApiResult<ConversationIdPayload> {
    within(&app, async {
        let conversation = app
            .conversations
            .create(&caller.0, research_context_id, &body.title)
            .await?;
        Ok(ConversationIdPayload {
            conversation_id: conversation.id,
        })
    })
    .await
}

async fn handle_get_conversation(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<ConversationPayload> {
    within(&app, async {
        let conversation = app.conversations.get(&caller.0, id).await?;
        Ok(ConversationPayload { conversation })
    })
    .await
}

async fn handle_rename_conversation(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<TitleBody>,
) -> ApiResult<ConversationPayload> {
    within(&app, async {
        let conversation = app
            .conversations
            .update_title(&caller.0, id, &body.title)
            .await?;
        Ok(ConversationPayload { conversation })
    })
    .await
}

async fn handle_list_messages(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<MessageListPayload> {
    within(&app, async {
        let message_list = app.conversations.list_messages(&caller.0, id).await?;
        Ok(MessageListPayload { message_list })
    })
    .await
}

async fn handle_list_cited_sources(
    State(app): State<App>,
    caller: Caller,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<SourceDataListPayload> {
    within(&app, async {
        let source_data_list = app.conversations.list_cited_sources(&caller.0, id).await?;
        Ok(SourceDataListPayload { source_data_list })
    })
    .await
}

#[derive(Deserialize)]
struct CitationBody {
    source_data_id: i64,
    #[serde(default)]
    citation_metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct AppendMessageBody {
    sender_type: String,
    #[serde(default)]
    unix_timestamp: Option<i64>,
    #[serde(default)]
    thread_id: Option<i64>,
    message_contents: Vec<MessageContentInput>,
    #[serde(default)]
    citations: Vec<CitationBody>,
}

/// Decode an append request and enforce the configured size caps.
fn new_message(app: &App, body: AppendMessageBody) -> Result<NewMessage, SdaError> {
    let limits = &app.limits;
    if body.message_contents.len() > limits.max_message_parts {
        return Err(SdaError::InvalidArgument(format!(
            "message_contents has {} parts; at most {} are allowed",
            body.message_contents.len(),
            limits.max_message_parts
        )));
    }
    let message_contents = normalize_contents(body.message_contents)?;
    if let Some(part) = message_contents
        .iter()
        .position(|c| c.content.len() > limits.max_content_bytes)
    {
        return Err(SdaError::InvalidArgument(format!(
            "message_contents[{part}] exceeds {} bytes",
            limits.max_content_bytes
        )));
    }

    let sender = match body.sender_type.parse::<SenderType>()? {
        SenderType::User if !body.citations.is_empty() => {
            return Err(SdaError::InvalidArgument(
                "citations are only allowed on AGENT messages".into(),
            ));
        }
        SenderType::User => NewSender::User,
        SenderType::Agent => NewSender::Agent {
            citations: body
                .citations
                .into_iter()
                .map(|c| NewCitation {
                    source_data_id: c.source_data_id,
                    citation_metadata: c
                        .citation_metadata
                        .map(json_text)
                        .unwrap_or_else(|| "{}".to_string()),
                })
                .collect(),
        },
    };

    Ok(NewMessage {
        sender,
        timestamp: body
            .unix_timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        thread_id: body.thread_id,
        message_contents,
    })
}

async fn handle_append_message(
    State(app): State<App>,
    caller: Caller,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiJson(body): ApiJson<AppendMessageBody>,
) -> ApiResult<MessageIdPayload> {
    let message = new_message(&app, body)?;
    within(&app, async {
        let stored = app
            .conversations
            .append_message(&caller.0, conversation_id, message)
            .await?;
        Ok(MessageIdPayload {
            message_id: stored.id,
            thread_id: stored.thread_id,
        })
    })
    .await
}

//! Wire envelope.
//!
//! Every response body, success or failure, is a JSON object of the form
//!
//! ```json
//! { "status": true, "code": 200,
//!   "errorCode": null, "errorMessage": null, "errorName": null, "errorType": null,
//!   "source_data": { ... } }
//! ```
//!
//! Payload fields sit next to the envelope fields. On failure they are
//! absent and the four `error*` fields are set. This module is the only
//! place that picks an HTTP status for an [`SdaError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sda_core::models::{Client, Conversation, Message, ResearchContext, SourceData, VectorStore};
use sda_core::{ErrorKind, SdaError};

use crate::research_context::ResearchContextWithLlm;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: bool,
    pub code: u16,
    #[serde(rename = "errorCode")]
    pub error_code: Option<u32>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "errorName")]
    pub error_name: Option<&'static str>,
    #[serde(rename = "errorType")]
    pub error_type: Option<&'static str>,
    #[serde(flatten)]
    pub payload: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            status: true,
            code: StatusCode::OK.as_u16(),
            error_code: None,
            error_message: None,
            error_name: None,
            error_type: None,
            payload: Some(payload),
        }
    }
}

impl Envelope<()> {
    pub fn error(err: &SdaError) -> Self {
        Self {
            status: false,
            code: status_for(err.kind()).as_u16(),
            error_code: Some(err.code()),
            error_message: Some(err.to_string()),
            error_name: Some(err.name()),
            error_type: Some(err.kind().as_str()),
            payload: None,
        }
    }
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument
        | ErrorKind::NoNewSourceData
        | ErrorKind::UncitedSourceOutsideContext
        | ErrorKind::UnsupportedProtocol => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound | ErrorKind::FileNotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Forbidden | ErrorKind::UnauthorizedSource => StatusCode::FORBIDDEN,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Successful response carrying `T`'s fields in the envelope.
pub struct Success<T>(pub T);

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(Envelope::ok(self.0))).into_response()
    }
}

/// Error response; converts from [`SdaError`] so handlers can use `?`.
#[derive(Debug)]
pub struct ApiError(pub SdaError);

impl From<SdaError> for ApiError {
    fn from(err: SdaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            tracing::warn!(error_type = self.0.kind().as_str(), error = %self.0, "request failed");
        }
        (status, Json(Envelope::error(&self.0))).into_response()
    }
}

pub type ApiResult<T> = Result<Success<T>, ApiError>;

// ============ Payloads ============

#[derive(Debug, Serialize)]
pub struct SignedUrlPayload {
    pub signed_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientPayload {
    pub client: Client,
}

#[derive(Debug, Serialize)]
pub struct SourceDataPayload {
    pub source_data: SourceData,
}

#[derive(Debug, Serialize)]
pub struct SourceDataListPayload {
    pub source_data_list: Vec<SourceData>,
}

#[derive(Debug, Serialize)]
pub struct ResearchContextPayload {
    pub research_context_id: i64,
    pub title: String,
    pub description: String,
    pub llm_name: String,
    pub external_id: String,
}

impl From<ResearchContextWithLlm> for ResearchContextPayload {
    fn from(value: ResearchContextWithLlm) -> Self {
        Self {
            research_context_id: value.research_context.id,
            title: value.research_context.title,
            description: value.research_context.description,
            llm_name: value.llm.llm_name,
            external_id: value.research_context.external_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResearchContextListPayload {
    pub research_contexts: Vec<ResearchContext>,
}

#[derive(Debug, Serialize)]
pub struct ConversationIdPayload {
    pub conversation_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ConversationPayload {
    pub conversation: Conversation,
}

#[derive(Debug, Serialize)]
pub struct ConversationListPayload {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize)]
pub struct MessageListPayload {
    pub message_list: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct MessageIdPayload {
    pub message_id: i64,
    pub thread_id: i64,
}

#[derive(Debug, Serialize)]
pub struct VectorStorePayload {
    pub vector_store: VectorStore,
}

#[derive(Debug, Serialize)]
pub struct DeletedPayload {
    pub deleted: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthPayload {
    pub service: &'static str,
    pub version: &'static str,
}

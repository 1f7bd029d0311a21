//! Core data model.
//!
//! These types are what the metadata store persists and what the services
//! hand back to the transport layer. Timestamps are Unix epoch seconds.
//!
//! Relationships are always expressed as ids; navigating between entities is
//! a store query, never a pointer walk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdaError};

/// Bookkeeping columns carried by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
    pub deleted_at: Option<i64>,
}

impl Lifecycle {
    /// A fresh, live row stamped at `now`.
    pub fn new(now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        }
    }
}

/// Storage protocol of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    S3,
    Nas,
    Local,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::S3 => "S3",
            Protocol::Nas => "NAS",
            Protocol::Local => "LOCAL",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = SdaError;

    /// Case-insensitive, but otherwise literal: `S3` parses, `s3 ` does not.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Protocol::S3),
            "nas" => Ok(Protocol::Nas),
            "local" => Ok(Protocol::Local),
            _ => Err(SdaError::InvalidProtocol(s.to_string())),
        }
    }
}

/// Availability of a source file's blob.
///
/// Status only ever moves toward [`SourceDataStatus::Available`], which is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceDataStatus {
    Created,
    Unavailable,
    Available,
    InconsistentDataset,
}

impl SourceDataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDataStatus::Created => "CREATED",
            SourceDataStatus::Unavailable => "UNAVAILABLE",
            SourceDataStatus::Available => "AVAILABLE",
            SourceDataStatus::InconsistentDataset => "INCONSISTENT_DATASET",
        }
    }

    pub fn can_transition_to(&self, next: SourceDataStatus) -> bool {
        match (self, next) {
            (SourceDataStatus::Available, _) => false,
            (_, SourceDataStatus::Available) => true,
            (SourceDataStatus::Created, _) => next != SourceDataStatus::Created,
            _ => false,
        }
    }
}

impl FromStr for SourceDataStatus {
    type Err = SdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(SourceDataStatus::Created),
            "UNAVAILABLE" => Ok(SourceDataStatus::Unavailable),
            "AVAILABLE" => Ok(SourceDataStatus::Available),
            "INCONSISTENT_DATASET" => Ok(SourceDataStatus::InconsistentDataset),
            other => Err(SdaError::Internal(format!("unknown source data status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub sub: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// A registered file. Bytes live in the object store, metadata lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceData {
    pub id: i64,
    pub client_id: i64,
    pub name: String,
    /// File-extension token, e.g. `pdf`.
    #[serde(rename = "type")]
    pub data_type: String,
    pub protocol: Protocol,
    pub relative_path: String,
    pub status: SourceDataStatus,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Llm {
    pub id: i64,
    pub llm_name: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// An immutable, named subset of one client's source data bound to an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub id: i64,
    pub client_id: i64,
    pub llm_id: i64,
    pub title: String,
    pub description: String,
    pub external_id: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// Opaque handle to a vector index built elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStore {
    pub id: i64,
    pub research_context_id: i64,
    pub name: String,
    pub lfn: String,
    pub protocol: Protocol,
    pub embedding_model_id: i64,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub research_context_id: i64,
    pub title: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SenderType {
    User,
    Agent,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "USER",
            SenderType::Agent => "AGENT",
        }
    }
}

impl FromStr for SenderType {
    type Err = SdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(SenderType::User),
            "AGENT" => Ok(SenderType::Agent),
            _ => Err(SdaError::InvalidArgument(format!(
                "sender_type must be USER or AGENT, got '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Text,
    Markdown,
    Json,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "TEXT",
            ContentType::Markdown => "MARKDOWN",
            ContentType::Json => "JSON",
        }
    }
}

impl FromStr for ContentType {
    type Err = SdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TEXT" => Ok(ContentType::Text),
            "MARKDOWN" => Ok(ContentType::Markdown),
            "JSON" => Ok(ContentType::Json),
            other => Err(SdaError::Internal(format!("unknown content type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub content: String,
    pub content_type: ContentType,
}

impl MessageContent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Text,
        }
    }
}

/// One element of an incoming `message_contents[]` array: either a bare
/// string or an explicit `{content, content_type}` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContentInput {
    Raw(String),
    Typed(MessageContent),
}

impl From<MessageContentInput> for MessageContent {
    fn from(input: MessageContentInput) -> Self {
        match input {
            MessageContentInput::Raw(s) => MessageContent::text(s),
            MessageContentInput::Typed(c) => c,
        }
    }
}

/// Normalize incoming parts; an empty list is rejected.
pub fn normalize_contents(inputs: Vec<MessageContentInput>) -> Result<Vec<MessageContent>> {
    if inputs.is_empty() {
        return Err(SdaError::EmptyMessage);
    }
    Ok(inputs.into_iter().map(MessageContent::from).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub id: i64,
    pub message_id: i64,
    pub source_data_id: i64,
    /// Opaque JSON string supplied by the agent.
    pub citation_metadata: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// Sender-specific part of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sender_type", rename_all = "UPPERCASE")]
pub enum MessageKind {
    User,
    Agent { citations: Vec<Citation> },
}

impl MessageKind {
    pub fn sender_type(&self) -> SenderType {
        match self {
            MessageKind::User => SenderType::User,
            MessageKind::Agent { .. } => SenderType::Agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub thread_id: i64,
    pub timestamp: i64,
    pub message_contents: Vec<MessageContent>,
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCitation {
    pub source_data_id: i64,
    #[serde(default = "empty_json_object")]
    pub citation_metadata: String,
}

fn empty_json_object() -> String {
    "{}".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewSender {
    User,
    Agent { citations: Vec<NewCitation> },
}

impl NewSender {
    pub fn sender_type(&self) -> SenderType {
        match self {
            NewSender::User => SenderType::User,
            NewSender::Agent { .. } => SenderType::Agent,
        }
    }
}

/// A message to append. `thread_id: None` asks the store to open a new thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: NewSender,
    pub timestamp: i64,
    pub thread_id: Option<i64>,
    pub message_contents: Vec<MessageContent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("s3".parse::<Protocol>().unwrap(), Protocol::S3);
        assert_eq!("NaS".parse::<Protocol>().unwrap(), Protocol::Nas);
        assert_eq!("LOCAL".parse::<Protocol>().unwrap(), Protocol::Local);
        for bad in ["ftp", "s3 ", " nas", "local\n", ""] {
            assert!(
                matches!(bad.parse::<Protocol>(), Err(SdaError::InvalidProtocol(_))),
                "expected InvalidProtocol for {bad:?}"
            );
        }
    }

    #[test]
    fn status_moves_only_toward_available() {
        use SourceDataStatus::*;
        assert!(Created.can_transition_to(Available));
        assert!(Unavailable.can_transition_to(Available));
        assert!(Created.can_transition_to(Unavailable));
        assert!(!Available.can_transition_to(Unavailable));
        assert!(!Unavailable.can_transition_to(Created));
    }

    #[test]
    fn raw_and_typed_contents_normalize() {
        let inputs: Vec<MessageContentInput> = serde_json::from_str(
            r##"["hello", {"content": "# hi", "content_type": "MARKDOWN"}]"##,
        )
        .unwrap();
        let contents = normalize_contents(inputs).unwrap();
        assert_eq!(contents[0], MessageContent::text("hello"));
        assert_eq!(contents[1].content_type, ContentType::Markdown);
    }

    #[test]
    fn empty_contents_are_rejected() {
        assert_eq!(normalize_contents(vec![]), Err(SdaError::EmptyMessage));
    }

    #[test]
    fn agent_message_serializes_with_sender_tag() {
        let msg = Message {
            id: 1,
            conversation_id: 2,
            thread_id: 3,
            timestamp: 100,
            message_contents: vec![MessageContent::text("answer")],
            kind: MessageKind::Agent { citations: vec![] },
            lifecycle: Lifecycle::new(100),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sender_type"], "AGENT");
        assert_eq!(json["citations"], serde_json::json!([]));
        assert_eq!(json["deleted"], false);
    }
}

//! Conversation service.
//!
//! Conversations are append-only message streams inside one research
//! context. Every read and write is made on behalf of a caller and checked
//! against the owner of the parent context.
//!
//! Thread ids are allocated as `max(thread_id) + 1` over the whole message
//! table, inside the write session that inserts the message. Write sessions
//! are serialized, so two concurrent appends never share a new thread.

use std::collections::BTreeSet;

use sda_core::models::{Conversation, Message, NewMessage, NewSender, SourceData};
use sda_core::validate::{validate_thread_id, validate_title};
use sda_core::{Result, SdaError};

use crate::research_context::owned_research_context;
use crate::store::{MetadataStore, Session};

/// Load a conversation on behalf of `caller_sub`, checking that the caller
/// owns its research context.
async fn owned_conversation(
    session: &mut Session,
    caller_sub: &str,
    id: i64,
) -> Result<Conversation> {
    let conversation = session.get_conversation(id).await?;
    owned_research_context(session, caller_sub, conversation.research_context_id)
        .await
        .map_err(|e| match e {
            SdaError::Forbidden(_) => {
                SdaError::Forbidden(format!("conversation {id} belongs to another client"))
            }
            other => other,
        })?;
    Ok(conversation)
}

#[derive(Clone)]
pub struct ConversationService {
    store: MetadataStore,
}

impl ConversationService {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        caller_sub: &str,
        research_context_id: i64,
        title: &str,
    ) -> Result<Conversation> {
        let title = validate_title("title", title)?;
        let mut session = self.store.write().await?;
        let (_, rc) = owned_research_context(&mut session, caller_sub, research_context_id).await?;
        let conversation = session.insert_conversation(rc.id, title).await?;
        session.commit().await?;
        tracing::info!(
            research_context_id = rc.id,
            conversation_id = conversation.id,
            "conversation created"
        );
        Ok(conversation)
    }

    pub async fn list_for_research_context(
        &self,
        caller_sub: &str,
        research_context_id: i64,
    ) -> Result<Vec<Conversation>> {
        let mut session = self.store.read().await?;
        let (_, rc) = owned_research_context(&mut session, caller_sub, research_context_id).await?;
        session.list_conversations_for_research_context(rc.id).await
    }

    pub async fn get(&self, caller_sub: &str, id: i64) -> Result<Conversation> {
        let mut session = self.store.read().await?;
        owned_conversation(&mut session, caller_sub, id).await
    }

    /// Rename a conversation; the only in-place edit a conversation allows.
    pub async fn update_title(&self, caller_sub: &str, id: i64, title: &str) -> Result<Conversation> {
        let title = validate_title("title", title)?;
        let mut session = self.store.write().await?;
        owned_conversation(&mut session, caller_sub, id).await?;
        let conversation = session.update_conversation_title(id, title).await?;
        session.commit().await?;
        Ok(conversation)
    }

    /// Messages ordered by `(timestamp, id)`.
    pub async fn list_messages(&self, caller_sub: &str, conversation_id: i64) -> Result<Vec<Message>> {
        let mut session = self.store.read().await?;
        let conversation = owned_conversation(&mut session, caller_sub, conversation_id).await?;
        session.list_messages(conversation.id).await
    }

    /// Distinct source data cited by the conversation's agent messages.
    pub async fn list_cited_sources(
        &self,
        caller_sub: &str,
        conversation_id: i64,
    ) -> Result<Vec<SourceData>> {
        let mut session = self.store.read().await?;
        let conversation = owned_conversation(&mut session, caller_sub, conversation_id).await?;
        session.list_sources_used_by_conversation(conversation.id).await
    }

    pub async fn append_message(
        &self,
        caller_sub: &str,
        conversation_id: i64,
        message: NewMessage,
    ) -> Result<Message> {
        let requested_thread = validate_thread_id(message.thread_id)?;
        if message.message_contents.is_empty() {
            return Err(SdaError::EmptyMessage);
        }
        if let NewSender::Agent { citations } = &message.sender {
            for citation in citations {
                if serde_json::from_str::<serde_json::Value>(&citation.citation_metadata).is_err() {
                    return Err(SdaError::InvalidArgument(format!(
                        "citation_metadata for source data {} is not valid JSON",
                        citation.source_data_id
                    )));
                }
            }
        }

        let mut session = self.store.write().await?;
        let conversation = owned_conversation(&mut session, caller_sub, conversation_id).await?;

        if let NewSender::Agent { citations } = &message.sender {
            if !citations.is_empty() {
                let in_context: BTreeSet<i64> = session
                    .list_source_data_for_research_context(conversation.research_context_id)
                    .await?
                    .into_iter()
                    .map(|sd| sd.id)
                    .collect();
                let outside: BTreeSet<i64> = citations
                    .iter()
                    .map(|c| c.source_data_id)
                    .filter(|id| !in_context.contains(id))
                    .collect();
                if !outside.is_empty() {
                    return Err(SdaError::UncitedSourceOutsideContext(
                        outside.into_iter().collect(),
                    ));
                }
            }
        }

        let thread_id = match requested_thread {
            Some(thread_id) => thread_id,
            None => session.max_thread_id().await?.checked_add(1).ok_or_else(|| {
                tracing::error!(conversation_id, "thread id space exhausted");
                SdaError::Internal("no thread id left to allocate".into())
            })?,
        };
        let stored = session
            .insert_message(conversation.id, &message, thread_id)
            .await?;
        session.commit().await?;

        tracing::debug!(
            conversation_id = conversation.id,
            message_id = stored.id,
            thread_id,
            sender = stored.kind.sender_type().as_str(),
            "message appended"
        );
        Ok(stored)
    }
}

//! Research context service.
//!
//! A research context is immutable once created. "Extending" one produces a
//! new context whose source set is a strict superset of the old one; the old
//! context and its conversations are left untouched.
//!
//! Every mutating operation runs inside a single write session, so the
//! ownership checks and the insert see the same snapshot.

use std::collections::BTreeSet;

use serde::Serialize;

use sda_core::lfn::parse_lfn;
use sda_core::models::{Client, Conversation, Llm, ResearchContext, SourceData, VectorStore};
use sda_core::validate::{validate_sub, validate_title};
use sda_core::{Result, SdaError};

use crate::store::{MetadataStore, NewResearchContext, NewVectorStore, Session};

/// A research context together with the LLM it is bound to.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchContextWithLlm {
    pub research_context: ResearchContext,
    pub llm: Llm,
}

#[derive(Debug, Clone)]
pub struct CreateResearchContext {
    pub client_sub: String,
    pub llm_name: String,
    pub title: String,
    pub description: String,
    /// Caller-supplied correlation id; a v4 UUID is generated when absent.
    pub external_id: Option<String>,
    pub source_data_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct ExtendResearchContext {
    pub client_sub: String,
    pub research_context_id: i64,
    pub title: String,
    pub description: String,
    pub llm_name: String,
    pub source_data_ids: Vec<i64>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttachVectorStore {
    pub client_sub: String,
    pub research_context_id: i64,
    pub name: String,
    pub lfn: String,
    pub embedding_model_id: i64,
}

fn external_id_or_new(external_id: Option<String>) -> String {
    match external_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// Fail with `Forbidden` unless `client` owns `rc`.
fn ensure_owner(client: &Client, rc: &ResearchContext) -> Result<()> {
    if rc.client_id != client.id {
        return Err(SdaError::Forbidden(format!(
            "research context {} belongs to another client",
            rc.id
        )));
    }
    Ok(())
}

/// Load a research context on behalf of `caller_sub`.
pub(crate) async fn owned_research_context(
    session: &mut Session,
    caller_sub: &str,
    id: i64,
) -> Result<(Client, ResearchContext)> {
    let client = session.get_client_by_sub(validate_sub(caller_sub)?).await?;
    let rc = session.get_research_context(id).await?;
    ensure_owner(&client, &rc)?;
    Ok((client, rc))
}

#[derive(Clone)]
pub struct ResearchContextService {
    store: MetadataStore,
}

impl ResearchContextService {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    pub async fn create(&self, req: CreateResearchContext) -> Result<ResearchContextWithLlm> {
        let client_sub = validate_sub(&req.client_sub)?;
        let title = validate_title("title", &req.title)?;
        if req.source_data_ids.is_empty() {
            return Err(SdaError::InvalidArgument(
                "source_data_ids must not be empty".into(),
            ));
        }
        let requested: BTreeSet<i64> = req.source_data_ids.iter().copied().collect();

        let mut session = self.store.write().await?;
        let client = session.get_client_by_sub(client_sub).await?;
        let llm = session.get_llm_by_name(req.llm_name.trim()).await?;

        let found = session.list_source_data_by_ids(&requested).await?;
        let found_ids: BTreeSet<i64> = found.iter().map(|sd| sd.id).collect();
        let unknown: Vec<i64> = requested.difference(&found_ids).copied().collect();
        if !unknown.is_empty() {
            return Err(SdaError::UnknownSource(unknown));
        }
        let foreign: Vec<i64> = found
            .iter()
            .filter(|sd| sd.client_id != client.id)
            .map(|sd| sd.id)
            .collect();
        if !foreign.is_empty() {
            return Err(SdaError::UnauthorizedSource(foreign));
        }

        let new = NewResearchContext {
            title: title.to_string(),
            description: req.description.trim().to_string(),
            external_id: external_id_or_new(req.external_id),
            client_id: client.id,
            llm_id: llm.id,
        };
        let research_context = session.insert_research_context(&new, &requested).await?;
        session.commit().await?;

        tracing::info!(
            client_id = client.id,
            research_context_id = research_context.id,
            sources = requested.len(),
            "research context created"
        );
        Ok(ResearchContextWithLlm {
            research_context,
            llm,
        })
    }

    /// Derive a new context from an existing one plus at least one source it
    /// does not already contain.
    pub async fn extend(&self, req: ExtendResearchContext) -> Result<ResearchContextWithLlm> {
        let client_sub = validate_sub(&req.client_sub)?;
        let title = validate_title("title", &req.title)?;
        let additional: BTreeSet<i64> = req.source_data_ids.iter().copied().collect();

        let mut session = self.store.write().await?;
        let client = session.get_client_by_sub(client_sub).await?;
        let llm = session.get_llm_by_name(req.llm_name.trim()).await?;
        let existing = session.get_research_context(req.research_context_id).await?;
        ensure_owner(&client, &existing)?;

        let authorized: BTreeSet<i64> = session
            .list_source_data(client.id)
            .await?
            .into_iter()
            .map(|sd| sd.id)
            .collect();
        let unauthorized: Vec<i64> = additional.difference(&authorized).copied().collect();
        if !unauthorized.is_empty() {
            return Err(SdaError::UnauthorizedSource(unauthorized));
        }

        let existing_sources: BTreeSet<i64> = session
            .list_source_data_for_research_context(existing.id)
            .await?
            .into_iter()
            .map(|sd| sd.id)
            .collect();
        if additional.difference(&existing_sources).next().is_none() {
            return Err(SdaError::NoNewSourceData);
        }
        let sources: BTreeSet<i64> = additional.union(&existing_sources).copied().collect();

        let new = NewResearchContext {
            title: title.to_string(),
            description: req.description.trim().to_string(),
            external_id: external_id_or_new(req.external_id),
            client_id: client.id,
            llm_id: llm.id,
        };
        let research_context = session.insert_research_context(&new, &sources).await?;
        session.commit().await?;

        tracing::info!(
            client_id = client.id,
            from = existing.id,
            research_context_id = research_context.id,
            sources = sources.len(),
            "research context extended"
        );
        Ok(ResearchContextWithLlm {
            research_context,
            llm,
        })
    }

    pub async fn get(&self, caller_sub: &str, id: i64) -> Result<ResearchContextWithLlm> {
        let mut session = self.store.read().await?;
        let (_, research_context) = owned_research_context(&mut session, caller_sub, id).await?;
        let llm = session.get_llm(research_context.llm_id).await?;
        Ok(ResearchContextWithLlm {
            research_context,
            llm,
        })
    }

    pub async fn list_for_client(&self, client_id: i64) -> Result<Vec<ResearchContext>> {
        let mut session = self.store.read().await?;
        let client = session.get_client_by_id(client_id).await?;
        session.list_research_contexts_for_client(client.id).await
    }

    pub async fn list_sources(&self, caller_sub: &str, id: i64) -> Result<Vec<SourceData>> {
        let mut session = self.store.read().await?;
        let (_, rc) = owned_research_context(&mut session, caller_sub, id).await?;
        session.list_source_data_for_research_context(rc.id).await
    }

    pub async fn list_conversations(&self, caller_sub: &str, id: i64) -> Result<Vec<Conversation>> {
        let mut session = self.store.read().await?;
        let (_, rc) = owned_research_context(&mut session, caller_sub, id).await?;
        session.list_conversations_for_research_context(rc.id).await
    }

    /// Owner of a research context.
    pub async fn get_client(&self, id: i64) -> Result<Client> {
        let mut session = self.store.read().await?;
        let rc = session.get_research_context(id).await?;
        session.get_client_by_id(rc.client_id).await
    }

    /// Attach the context's vector store. A context has at most one, and an
    /// LFN can back at most one store.
    pub async fn attach_vector_store(&self, req: AttachVectorStore) -> Result<VectorStore> {
        let name = validate_title("name", &req.name)?;
        let lfn = parse_lfn(&req.lfn)?;

        let mut session = self.store.write().await?;
        let (_, rc) =
            owned_research_context(&mut session, &req.client_sub, req.research_context_id).await?;
        session.get_embedding_model(req.embedding_model_id).await?;
        if session
            .find_vector_store_for_research_context(rc.id)
            .await?
            .is_some()
        {
            return Err(SdaError::AlreadyExists(format!(
                "vector store for research context {}",
                rc.id
            )));
        }

        let new = NewVectorStore {
            research_context_id: rc.id,
            name: name.to_string(),
            lfn: lfn.to_json()?,
            protocol: lfn.protocol,
            embedding_model_id: req.embedding_model_id,
        };
        let vector_store = session.insert_vector_store(&new).await?;
        session.commit().await?;
        tracing::info!(
            research_context_id = rc.id,
            vector_store_id = vector_store.id,
            "vector store attached"
        );
        Ok(vector_store)
    }

    /// Soft-delete a context along with its conversations, messages,
    /// citations and vector store.
    pub async fn delete(&self, caller_sub: &str, id: i64) -> Result<()> {
        let mut session = self.store.write().await?;
        let (_, rc) = owned_research_context(&mut session, caller_sub, id).await?;
        session.soft_delete_research_context(rc.id).await?;
        session.commit().await?;
        tracing::info!(research_context_id = id, "research context deleted");
        Ok(())
    }
}

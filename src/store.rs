//! Metadata store gateway.
//!
//! All relational reads and writes go through a [`Session`], which wraps one
//! SQLite transaction. Services open exactly one session per request and
//! commit it at the end; dropping a session without committing rolls it back
//! (this is also what happens when a request deadline cancels the future).
//!
//! Write sessions additionally hold the store's write gate for their whole
//! lifetime. SQLite serializes writers anyway, but a deferred transaction that
//! reads before it writes can lose its snapshot to a concurrent writer; the
//! gate makes read-then-write sequences like `max(thread_id) + 1` safe.
//!
//! Driver errors never leave this module verbatim: unique and foreign-key
//! violations become typed errors, everything else is logged and reported as
//! `StoreUnavailable`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use sda_core::models::{
    Citation, Client, Conversation, EmbeddingModel, Lifecycle, Llm, Message, MessageContent,
    MessageKind, NewMessage, NewSender, Protocol, ResearchContext, SenderType, SourceData,
    SourceDataStatus, VectorStore,
};
use sda_core::{Result, SdaError};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Shared handle to the metadata database.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Open a read-only session.
    pub async fn read(&self) -> Result<Session> {
        let tx = self.pool.begin().await.db("begin")?;
        Ok(Session { tx, _gate: None })
    }

    /// Open a session that may write. Waits for any other writer to finish.
    pub async fn write(&self) -> Result<Session> {
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await.db("begin")?;
        Ok(Session {
            tx,
            _gate: Some(gate),
        })
    }
}

/// One metadata transaction.
pub struct Session {
    // Field order matters: the transaction must roll back before the gate
    // is released.
    tx: Transaction<'static, Sqlite>,
    _gate: Option<OwnedMutexGuard<()>>,
}

/// Attributes of a source data row to insert.
#[derive(Debug, Clone)]
pub struct NewSourceData {
    pub client_id: i64,
    pub name: String,
    pub protocol: Protocol,
    pub relative_path: String,
    pub data_type: String,
    pub status: SourceDataStatus,
}

/// Attributes of a research context row to insert.
#[derive(Debug, Clone)]
pub struct NewResearchContext {
    pub title: String,
    pub description: String,
    pub external_id: String,
    pub client_id: i64,
    pub llm_id: i64,
}

/// Attributes of a vector store row to insert.
#[derive(Debug, Clone)]
pub struct NewVectorStore {
    pub research_context_id: i64,
    pub name: String,
    pub lfn: String,
    pub protocol: Protocol,
    pub embedding_model_id: i64,
}

// ============ Error translation ============

trait DbResultExt<T> {
    /// Translate a driver error; `what` names the entity or operation.
    fn db(self, what: &'static str) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn db(self, what: &'static str) -> Result<T> {
        self.map_err(|e| translate(what, e))
    }
}

fn translate(what: &'static str, err: sqlx::Error) -> SdaError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return SdaError::AlreadyExists(what.to_string());
        }
        if db.is_foreign_key_violation() {
            return SdaError::not_found("referenced row", what);
        }
    }
    tracing::error!(operation = what, error = %err, "metadata store error");
    SdaError::StoreUnavailable(format!("metadata store failed during {what}"))
}

fn decode_err(what: &'static str, detail: impl std::fmt::Display) -> SdaError {
    tracing::error!(operation = what, error = %detail, "undecodable metadata row");
    SdaError::Internal(format!("corrupt {what} row"))
}

// ============ Row mapping ============

fn lifecycle(row: &SqliteRow) -> Result<Lifecycle> {
    Ok(Lifecycle {
        created_at: row.try_get("created_at").db("row")?,
        updated_at: row.try_get("updated_at").db("row")?,
        deleted: row.try_get("deleted").db("row")?,
        deleted_at: row.try_get("deleted_at").db("row")?,
    })
}

fn client_from_row(row: &SqliteRow) -> Result<Client> {
    Ok(Client {
        id: row.try_get("id").db("client")?,
        sub: row.try_get("sub").db("client")?,
        lifecycle: lifecycle(row)?,
    })
}

fn source_data_from_row(row: &SqliteRow) -> Result<SourceData> {
    let protocol: String = row.try_get("protocol").db("source data")?;
    let status: String = row.try_get("status").db("source data")?;
    Ok(SourceData {
        id: row.try_get("id").db("source data")?,
        client_id: row.try_get("client_id").db("source data")?,
        name: row.try_get("name").db("source data")?,
        data_type: row.try_get("type").db("source data")?,
        protocol: protocol
            .parse()
            .map_err(|e| decode_err("source data", e))?,
        relative_path: row.try_get("relative_path").db("source data")?,
        status: status.parse().map_err(|e| decode_err("source data", e))?,
        lifecycle: lifecycle(row)?,
    })
}

fn llm_from_row(row: &SqliteRow) -> Result<Llm> {
    Ok(Llm {
        id: row.try_get("id").db("llm")?,
        llm_name: row.try_get("llm_name").db("llm")?,
        lifecycle: lifecycle(row)?,
    })
}

fn embedding_model_from_row(row: &SqliteRow) -> Result<EmbeddingModel> {
    Ok(EmbeddingModel {
        id: row.try_get("id").db("embedding model")?,
        name: row.try_get("name").db("embedding model")?,
        lifecycle: lifecycle(row)?,
    })
}

fn research_context_from_row(row: &SqliteRow) -> Result<ResearchContext> {
    Ok(ResearchContext {
        id: row.try_get("id").db("research context")?,
        client_id: row.try_get("client_id").db("research context")?,
        llm_id: row.try_get("llm_id").db("research context")?,
        title: row.try_get("title").db("research context")?,
        description: row.try_get("description").db("research context")?,
        external_id: row.try_get("external_id").db("research context")?,
        lifecycle: lifecycle(row)?,
    })
}

fn vector_store_from_row(row: &SqliteRow) -> Result<VectorStore> {
    let protocol: String = row.try_get("protocol").db("vector store")?;
    Ok(VectorStore {
        id: row.try_get("id").db("vector store")?,
        research_context_id: row.try_get("research_context_id").db("vector store")?,
        name: row.try_get("name").db("vector store")?,
        lfn: row.try_get("lfn").db("vector store")?,
        protocol: protocol
            .parse()
            .map_err(|e| decode_err("vector store", e))?,
        embedding_model_id: row.try_get("embedding_model_id").db("vector store")?,
        lifecycle: lifecycle(row)?,
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id").db("conversation")?,
        research_context_id: row.try_get("research_context_id").db("conversation")?,
        title: row.try_get("title").db("conversation")?,
        lifecycle: lifecycle(row)?,
    })
}

fn citation_from_row(row: &SqliteRow) -> Result<Citation> {
    Ok(Citation {
        id: row.try_get("id").db("citation")?,
        message_id: row.try_get("message_id").db("citation")?,
        source_data_id: row.try_get("source_data_id").db("citation")?,
        citation_metadata: row.try_get("citation_metadata").db("citation")?,
        lifecycle: lifecycle(row)?,
    })
}

/// `?, ?, ?` for an `IN (...)` clause.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl Session {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.db("commit")
    }

    // ============ Clients ============

    pub async fn insert_client(&mut self, sub: &str) -> Result<Client> {
        let ts = now();
        let id = sqlx::query("INSERT INTO clients (sub, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(sub)
            .bind(ts)
            .bind(ts)
            .execute(&mut *self.tx)
            .await
            .db("client")?
            .last_insert_rowid();
        self.get_client_by_id(id).await
    }

    pub async fn get_client_by_id(&mut self, id: i64) -> Result<Client> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .db("client")?;
        match row {
            Some(row) => client_from_row(&row),
            None => Err(SdaError::not_found("client", id)),
        }
    }

    pub async fn find_client_by_sub(&mut self, sub: &str) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE sub = ? AND deleted = 0")
            .bind(sub)
            .fetch_optional(&mut *self.tx)
            .await
            .db("client")?;
        row.as_ref().map(client_from_row).transpose()
    }

    pub async fn get_client_by_sub(&mut self, sub: &str) -> Result<Client> {
        self.find_client_by_sub(sub)
            .await?
            .ok_or_else(|| SdaError::UnknownClient(sub.to_string()))
    }

    // ============ Source data ============

    /// Live source data of a client, in creation order.
    pub async fn list_source_data(&mut self, client_id: i64) -> Result<Vec<SourceData>> {
        let rows = sqlx::query(
            "SELECT * FROM source_data WHERE client_id = ? AND deleted = 0 ORDER BY id ASC",
        )
        .bind(client_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("source data")?;
        rows.iter().map(source_data_from_row).collect()
    }

    pub async fn get_source_data(&mut self, id: i64) -> Result<SourceData> {
        let row = sqlx::query("SELECT * FROM source_data WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .db("source data")?;
        match row {
            Some(row) => source_data_from_row(&row),
            None => Err(SdaError::not_found("source data", id)),
        }
    }

    /// Live rows among `ids`, in id order. Missing ids are simply absent.
    pub async fn list_source_data_by_ids(&mut self, ids: &BTreeSet<i64>) -> Result<Vec<SourceData>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM source_data WHERE deleted = 0 AND id IN ({}) ORDER BY id ASC",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&mut *self.tx).await.db("source data")?;
        rows.iter().map(source_data_from_row).collect()
    }

    pub async fn find_source_data_by_composite_index(
        &mut self,
        client_id: i64,
        protocol: Protocol,
        relative_path: &str,
    ) -> Result<Option<SourceData>> {
        let row = sqlx::query(
            "SELECT * FROM source_data \
             WHERE client_id = ? AND protocol = ? AND relative_path = ? AND deleted = 0",
        )
        .bind(client_id)
        .bind(protocol.as_str())
        .bind(relative_path)
        .fetch_optional(&mut *self.tx)
        .await
        .db("source data")?;
        row.as_ref().map(source_data_from_row).transpose()
    }

    pub async fn get_source_data_by_composite_index(
        &mut self,
        client_id: i64,
        protocol: Protocol,
        relative_path: &str,
    ) -> Result<SourceData> {
        self.find_source_data_by_composite_index(client_id, protocol, relative_path)
            .await?
            .ok_or_else(|| {
                SdaError::not_found("source data", format!("{protocol}:{relative_path}"))
            })
    }

    /// Insert a source data row. The composite-index check runs inside this
    /// transaction, and the partial unique index backs it up.
    pub async fn insert_source_data(&mut self, new: &NewSourceData) -> Result<SourceData> {
        if self
            .find_source_data_by_composite_index(new.client_id, new.protocol, &new.relative_path)
            .await?
            .is_some()
        {
            return Err(SdaError::AlreadyExists(format!(
                "source data {}:{}",
                new.protocol, new.relative_path
            )));
        }

        let ts = now();
        let id = sqlx::query(
            "INSERT INTO source_data \
             (client_id, name, type, protocol, relative_path, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.client_id)
        .bind(&new.name)
        .bind(&new.data_type)
        .bind(new.protocol.as_str())
        .bind(&new.relative_path)
        .bind(new.status.as_str())
        .bind(ts)
        .bind(ts)
        .execute(&mut *self.tx)
        .await
        .db("source data")?
        .last_insert_rowid();

        self.get_source_data(id).await
    }

    pub async fn update_source_data_status(
        &mut self,
        id: i64,
        status: SourceDataStatus,
    ) -> Result<SourceData> {
        sqlx::query("UPDATE source_data SET status = ?, updated_at = ? WHERE id = ? AND deleted = 0")
            .bind(status.as_str())
            .bind(now())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .db("source data")?;
        self.get_source_data(id).await
    }

    pub async fn soft_delete_source_data(&mut self, id: i64) -> Result<()> {
        let ts = now();
        let affected = sqlx::query(
            "UPDATE source_data SET deleted = 1, deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted = 0",
        )
        .bind(ts)
        .bind(ts)
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .db("source data")?
        .rows_affected();
        if affected == 0 {
            return Err(SdaError::not_found("source data", id));
        }
        Ok(())
    }

    // ============ Catalog ============

    pub async fn get_llm_by_name(&mut self, name: &str) -> Result<Llm> {
        let row = sqlx::query("SELECT * FROM llms WHERE llm_name = ? AND deleted = 0")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .db("llm")?;
        match row {
            Some(row) => llm_from_row(&row),
            None => Err(SdaError::UnknownLlm(name.to_string())),
        }
    }

    pub async fn get_llm(&mut self, id: i64) -> Result<Llm> {
        let row = sqlx::query("SELECT * FROM llms WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .db("llm")?;
        match row {
            Some(row) => llm_from_row(&row),
            None => Err(SdaError::not_found("llm", id)),
        }
    }

    pub async fn get_embedding_model(&mut self, id: i64) -> Result<EmbeddingModel> {
        let row = sqlx::query("SELECT * FROM embedding_models WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .db("embedding model")?;
        match row {
            Some(row) => embedding_model_from_row(&row),
            None => Err(SdaError::not_found("embedding model", id)),
        }
    }

    // ============ Research contexts ============

    pub async fn get_research_context(&mut self, id: i64) -> Result<ResearchContext> {
        let row = sqlx::query("SELECT * FROM research_contexts WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .db("research context")?;
        match row {
            Some(row) => research_context_from_row(&row),
            None => Err(SdaError::not_found("research context", id)),
        }
    }

    pub async fn list_research_contexts_for_client(
        &mut self,
        client_id: i64,
    ) -> Result<Vec<ResearchContext>> {
        let rows = sqlx::query(
            "SELECT * FROM research_contexts WHERE client_id = ? AND deleted = 0 ORDER BY id ASC",
        )
        .bind(client_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("research context")?;
        rows.iter().map(research_context_from_row).collect()
    }

    pub async fn list_source_data_for_research_context(
        &mut self,
        research_context_id: i64,
    ) -> Result<Vec<SourceData>> {
        let rows = sqlx::query(
            "SELECT sd.* FROM source_data sd \
             JOIN research_context_source_data link ON link.source_data_id = sd.id \
             WHERE link.research_context_id = ? AND sd.deleted = 0 \
             ORDER BY sd.id ASC",
        )
        .bind(research_context_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("source data")?;
        rows.iter().map(source_data_from_row).collect()
    }

    pub async fn list_conversations_for_research_context(
        &mut self,
        research_context_id: i64,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT * FROM conversations \
             WHERE research_context_id = ? AND deleted = 0 ORDER BY id ASC",
        )
        .bind(research_context_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("conversation")?;
        rows.iter().map(conversation_from_row).collect()
    }

    /// Insert a research context and link it to every id in `source_data_ids`.
    ///
    /// Fails with `UnknownSource` before writing anything if an id does not
    /// name a live row; any later failure aborts the whole session.
    pub async fn insert_research_context(
        &mut self,
        new: &NewResearchContext,
        source_data_ids: &BTreeSet<i64>,
    ) -> Result<ResearchContext> {
        let found: BTreeSet<i64> = self
            .list_source_data_by_ids(source_data_ids)
            .await?
            .into_iter()
            .map(|sd| sd.id)
            .collect();
        let missing: Vec<i64> = source_data_ids.difference(&found).copied().collect();
        if !missing.is_empty() {
            return Err(SdaError::UnknownSource(missing));
        }

        let ts = now();
        let id = sqlx::query(
            "INSERT INTO research_contexts \
             (client_id, llm_id, title, description, external_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.client_id)
        .bind(new.llm_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.external_id)
        .bind(ts)
        .bind(ts)
        .execute(&mut *self.tx)
        .await
        .db("research context")?
        .last_insert_rowid();

        for source_data_id in source_data_ids {
            sqlx::query(
                "INSERT INTO research_context_source_data (research_context_id, source_data_id) \
                 VALUES (?, ?)",
            )
            .bind(id)
            .bind(*source_data_id)
            .execute(&mut *self.tx)
            .await
            .db("research context source")?;
        }

        self.get_research_context(id).await
    }

    /// Soft-delete a research context and everything it owns: conversations,
    /// their messages and citations, and its vector store.
    pub async fn soft_delete_research_context(&mut self, id: i64) -> Result<()> {
        let ts = now();
        let affected = sqlx::query(
            "UPDATE research_contexts SET deleted = 1, deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted = 0",
        )
        .bind(ts)
        .bind(ts)
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .db("research context")?
        .rows_affected();
        if affected == 0 {
            return Err(SdaError::not_found("research context", id));
        }

        let cascade = [
            "UPDATE citations SET deleted = 1, deleted_at = ?, updated_at = ? \
             WHERE deleted = 0 AND message_id IN (\
                SELECT m.id FROM messages m JOIN conversations c ON m.conversation_id = c.id \
                WHERE c.research_context_id = ?)",
            "UPDATE messages SET deleted = 1, deleted_at = ?, updated_at = ? \
             WHERE deleted = 0 AND conversation_id IN (\
                SELECT id FROM conversations WHERE research_context_id = ?)",
            "UPDATE conversations SET deleted = 1, deleted_at = ?, updated_at = ? \
             WHERE deleted = 0 AND research_context_id = ?",
            "UPDATE vector_stores SET deleted = 1, deleted_at = ?, updated_at = ? \
             WHERE deleted = 0 AND research_context_id = ?",
        ];
        for sql in cascade {
            sqlx::query(sql)
                .bind(ts)
                .bind(ts)
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .db("research context cascade")?;
        }
        Ok(())
    }

    // ============ Vector stores ============

    pub async fn find_vector_store_for_research_context(
        &mut self,
        research_context_id: i64,
    ) -> Result<Option<VectorStore>> {
        let row = sqlx::query(
            "SELECT * FROM vector_stores WHERE research_context_id = ? AND deleted = 0",
        )
        .bind(research_context_id)
        .fetch_optional(&mut *self.tx)
        .await
        .db("vector store")?;
        row.as_ref().map(vector_store_from_row).transpose()
    }

    pub async fn insert_vector_store(&mut self, new: &NewVectorStore) -> Result<VectorStore> {
        let ts = now();
        let id = sqlx::query(
            "INSERT INTO vector_stores \
             (research_context_id, name, lfn, protocol, embedding_model_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.research_context_id)
        .bind(&new.name)
        .bind(&new.lfn)
        .bind(new.protocol.as_str())
        .bind(new.embedding_model_id)
        .bind(ts)
        .bind(ts)
        .execute(&mut *self.tx)
        .await
        .db("vector store")?
        .last_insert_rowid();

        let row = sqlx::query("SELECT * FROM vector_stores WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .db("vector store")?;
        vector_store_from_row(&row)
    }

    // ============ Conversations ============

    pub async fn insert_conversation(
        &mut self,
        research_context_id: i64,
        title: &str,
    ) -> Result<Conversation> {
        let ts = now();
        let id = sqlx::query(
            "INSERT INTO conversations (research_context_id, title, created_at, updated_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(research_context_id)
        .bind(title)
        .bind(ts)
        .bind(ts)
        .execute(&mut *self.tx)
        .await
        .db("conversation")?
        .last_insert_rowid();
        self.get_conversation(id).await
    }

    pub async fn get_conversation(&mut self, id: i64) -> Result<Conversation> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .db("conversation")?;
        match row {
            Some(row) => conversation_from_row(&row),
            None => Err(SdaError::not_found("conversation", id)),
        }
    }

    pub async fn update_conversation_title(&mut self, id: i64, title: &str) -> Result<Conversation> {
        let affected = sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND deleted = 0",
        )
        .bind(title)
        .bind(now())
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .db("conversation")?
        .rows_affected();
        if affected == 0 {
            return Err(SdaError::not_found("conversation", id));
        }
        self.get_conversation(id).await
    }

    // ============ Messages ============

    /// Highest thread id ever assigned, across all conversations and
    /// including soft-deleted rows; 0 when there are no messages.
    pub async fn max_thread_id(&mut self) -> Result<i64> {
        sqlx::query_scalar("SELECT COALESCE(MAX(thread_id), 0) FROM messages")
            .fetch_one(&mut *self.tx)
            .await
            .db("message")
    }

    /// Insert a message with its contents and citations under `thread_id`.
    pub async fn insert_message(
        &mut self,
        conversation_id: i64,
        new: &NewMessage,
        thread_id: i64,
    ) -> Result<Message> {
        let ts = now();
        let message_id = sqlx::query(
            "INSERT INTO messages \
             (conversation_id, sender_type, thread_id, timestamp, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(new.sender.sender_type().as_str())
        .bind(thread_id)
        .bind(new.timestamp)
        .bind(ts)
        .bind(ts)
        .execute(&mut *self.tx)
        .await
        .db("message")?
        .last_insert_rowid();

        for (position, part) in new.message_contents.iter().enumerate() {
            sqlx::query(
                "INSERT INTO message_contents (message_id, position, content, content_type) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(message_id)
            .bind(position as i64)
            .bind(&part.content)
            .bind(part.content_type.as_str())
            .execute(&mut *self.tx)
            .await
            .db("message content")?;
        }

        let kind = match &new.sender {
            NewSender::User => MessageKind::User,
            NewSender::Agent { citations } => {
                let mut stored = Vec::with_capacity(citations.len());
                for citation in citations {
                    let citation_id = sqlx::query(
                        "INSERT INTO citations \
                         (message_id, source_data_id, citation_metadata, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(message_id)
                    .bind(citation.source_data_id)
                    .bind(&citation.citation_metadata)
                    .bind(ts)
                    .bind(ts)
                    .execute(&mut *self.tx)
                    .await
                    .db("citation")?
                    .last_insert_rowid();
                    stored.push(Citation {
                        id: citation_id,
                        message_id,
                        source_data_id: citation.source_data_id,
                        citation_metadata: citation.citation_metadata.clone(),
                        lifecycle: Lifecycle::new(ts),
                    });
                }
                MessageKind::Agent { citations: stored }
            }
        };

        Ok(Message {
            id: message_id,
            conversation_id,
            thread_id,
            timestamp: new.timestamp,
            message_contents: new.message_contents.clone(),
            kind,
            lifecycle: Lifecycle::new(ts),
        })
    }

    /// Live messages of a conversation ordered by `(timestamp, id)`, with
    /// contents in their original order and citations attached.
    pub async fn list_messages(&mut self, conversation_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? AND deleted = 0 \
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("message")?;

        let content_rows = sqlx::query(
            "SELECT mc.message_id, mc.content, mc.content_type FROM message_contents mc \
             JOIN messages m ON m.id = mc.message_id \
             WHERE m.conversation_id = ? AND m.deleted = 0 \
             ORDER BY mc.message_id ASC, mc.position ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("message content")?;

        let mut contents: HashMap<i64, Vec<MessageContent>> = HashMap::new();
        for row in &content_rows {
            let message_id: i64 = row.try_get("message_id").db("message content")?;
            let content_type: String = row.try_get("content_type").db("message content")?;
            contents.entry(message_id).or_default().push(MessageContent {
                content: row.try_get("content").db("message content")?,
                content_type: content_type
                    .parse()
                    .map_err(|e| decode_err("message content", e))?,
            });
        }

        let citation_rows = sqlx::query(
            "SELECT c.* FROM citations c JOIN messages m ON m.id = c.message_id \
             WHERE m.conversation_id = ? AND m.deleted = 0 AND c.deleted = 0 \
             ORDER BY c.id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("citation")?;

        let mut citations: HashMap<i64, Vec<Citation>> = HashMap::new();
        for row in &citation_rows {
            let citation = citation_from_row(row)?;
            citations.entry(citation.message_id).or_default().push(citation);
        }

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id").db("message")?;
                let sender: String = row.try_get("sender_type").db("message")?;
                let sender: SenderType = sender.parse().map_err(|e| decode_err("message", e))?;
                let kind = match sender {
                    SenderType::User => MessageKind::User,
                    SenderType::Agent => MessageKind::Agent {
                        citations: citations.remove(&id).unwrap_or_default(),
                    },
                };
                Ok(Message {
                    id,
                    conversation_id,
                    thread_id: row.try_get("thread_id").db("message")?,
                    timestamp: row.try_get("timestamp").db("message")?,
                    message_contents: contents.remove(&id).unwrap_or_default(),
                    kind,
                    lifecycle: lifecycle(row)?,
                })
            })
            .collect()
    }

    /// Distinct live source data cited by the conversation's AGENT messages.
    pub async fn list_sources_used_by_conversation(
        &mut self,
        conversation_id: i64,
    ) -> Result<Vec<SourceData>> {
        let rows = sqlx::query(
            "SELECT DISTINCT sd.* FROM source_data sd \
             JOIN citations c ON c.source_data_id = sd.id \
             JOIN messages m ON m.id = c.message_id \
             WHERE m.conversation_id = ? AND m.sender_type = 'AGENT' \
               AND m.deleted = 0 AND c.deleted = 0 AND sd.deleted = 0 \
             ORDER BY sd.id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&mut *self.tx)
        .await
        .db("source data")?;
        rows.iter().map(source_data_from_row).collect()
    }
}

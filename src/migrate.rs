//! Schema migrations and catalog seeding.
//!
//! Every statement is idempotent, so `sda init` and server start-up can run
//! this unconditionally.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS clients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sub TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS llms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        llm_name TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embedding_models (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id INTEGER NOT NULL REFERENCES clients(id),
        name TEXT NOT NULL,
        type TEXT NOT NULL DEFAULT '',
        protocol TEXT NOT NULL CHECK (protocol IN ('S3', 'NAS', 'LOCAL')),
        relative_path TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_contexts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id INTEGER NOT NULL REFERENCES clients(id),
        llm_id INTEGER NOT NULL REFERENCES llms(id),
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        external_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_context_source_data (
        research_context_id INTEGER NOT NULL REFERENCES research_contexts(id),
        source_data_id INTEGER NOT NULL REFERENCES source_data(id),
        PRIMARY KEY (research_context_id, source_data_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vector_stores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        research_context_id INTEGER NOT NULL REFERENCES research_contexts(id),
        name TEXT NOT NULL,
        lfn TEXT NOT NULL,
        protocol TEXT NOT NULL,
        embedding_model_id INTEGER NOT NULL REFERENCES embedding_models(id),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        research_context_id INTEGER NOT NULL REFERENCES research_contexts(id),
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversations(id),
        sender_type TEXT NOT NULL CHECK (sender_type IN ('USER', 'AGENT')),
        thread_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_contents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id),
        position INTEGER NOT NULL,
        content TEXT NOT NULL,
        content_type TEXT NOT NULL,
        UNIQUE (message_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS citations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES messages(id),
        source_data_id INTEGER NOT NULL REFERENCES source_data(id),
        citation_metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER
    )
    "#,
];

const INDEXES: &[&str] = &[
    // Composite uniqueness only binds live rows, so a soft-deleted triple
    // can be registered again.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_source_data_composite \
     ON source_data(client_id, protocol, relative_path) WHERE deleted = 0",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_vector_stores_lfn ON vector_stores(lfn) WHERE deleted = 0",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_vector_stores_context \
     ON vector_stores(research_context_id) WHERE deleted = 0",
    "CREATE INDEX IF NOT EXISTS idx_research_contexts_client ON research_contexts(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_rcsd_source ON research_context_source_data(source_data_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_context ON conversations(research_context_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
     ON messages(conversation_id, timestamp, id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_citations_message ON citations(message_id)",
];

/// Connect, migrate, seed, and close. Backs `sda init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    seed_catalog(&pool, config).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes that do not exist yet.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES.iter().chain(INDEXES.iter()) {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("migration failed: {}", ddl.trim()))?;
    }
    Ok(())
}

/// Insert the configured LLMs and embedding models that are missing.
pub async fn seed_catalog(pool: &SqlitePool, config: &Config) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for llm in &config.llms {
        sqlx::query(
            "INSERT INTO llms (llm_name, created_at, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(llm_name) DO NOTHING",
        )
        .bind(llm.name.trim())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    }
    for model in &config.embedding_models {
        sqlx::query(
            "INSERT INTO embedding_models (name, created_at, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(model.name.trim())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    }
    tracing::debug!(
        llms = config.llms.len(),
        embedding_models = config.embedding_models.len(),
        "catalog seeded"
    );
    Ok(())
}

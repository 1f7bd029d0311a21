//! Service-level tests against a scratch SQLite database and the in-memory
//! object store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;

use sda::app::App;
use sda::config::{CatalogEntry, Config};
use sda::research_context::{AttachVectorStore, CreateResearchContext, ExtendResearchContext};
use sda::store::MetadataStore;
use sda::{db, migrate};
use sda_core::models::{
    MessageContent, MessageKind, NewCitation, NewMessage, NewSender, SourceData, SourceDataStatus,
};
use sda_core::storage::memory::InMemoryObjectStore;
use sda_core::storage::ObjectStore;
use sda_core::SdaError;

struct Harness {
    _tmp: TempDir,
    pool: SqlitePool,
    objects: Arc<InMemoryObjectStore>,
    app: App,
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("data").join("sda.sqlite"));
    config.llms = vec![CatalogEntry {
        name: "gpt-4o".to_string(),
    }];
    config.embedding_models = vec![CatalogEntry {
        name: "e5-small".to_string(),
    }];

    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    migrate::seed_catalog(&pool, &config).await.unwrap();

    let objects = Arc::new(InMemoryObjectStore::new());
    let app = App::new(pool.clone(), objects.clone(), &config);
    Harness {
        _tmp: tmp,
        pool,
        objects,
        app,
    }
}

impl Harness {
    async fn client(&self, sub: &str) -> i64 {
        self.app.clients.register(sub).await.unwrap().id
    }

    /// Prepare, PUT and register a file; returns the registered row.
    async fn upload(&self, sub: &str, name: &str, path: &str) -> SourceData {
        let ticket = self
            .app
            .source_data
            .prepare_upload(sub, "s3", path)
            .await
            .unwrap();
        self.objects.upload(&ticket.signed_url, b"hello").unwrap();
        self.app
            .source_data
            .register(sub, name, "s3", &ticket.relative_path)
            .await
            .unwrap()
    }

    async fn context(&self, sub: &str, ids: &[i64]) -> i64 {
        self.app
            .research_contexts
            .create(CreateResearchContext {
                client_sub: sub.to_string(),
                llm_name: "gpt-4o".to_string(),
                title: "Context".to_string(),
                description: String::new(),
                external_id: None,
                source_data_ids: ids.to_vec(),
            })
            .await
            .unwrap()
            .research_context
            .id
    }

    async fn source_ids(&self, sub: &str, rc: i64) -> BTreeSet<i64> {
        self.app
            .research_contexts
            .list_sources(sub, rc)
            .await
            .unwrap()
            .into_iter()
            .map(|sd| sd.id)
            .collect()
    }

    async fn row_count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn user_message(text: &str, thread_id: Option<i64>) -> NewMessage {
    NewMessage {
        sender: NewSender::User,
        timestamp: 1_700_000_000,
        thread_id,
        message_contents: vec![MessageContent::text(text)],
    }
}

fn agent_message(text: &str, cited: &[i64]) -> NewMessage {
    NewMessage {
        sender: NewSender::Agent {
            citations: cited
                .iter()
                .map(|id| NewCitation {
                    source_data_id: *id,
                    citation_metadata: r#"{"page": 1}"#.to_string(),
                })
                .collect(),
        },
        timestamp: 1_700_000_001,
        thread_id: None,
        message_contents: vec![MessageContent::text(text)],
    }
}

fn extend_request(sub: &str, rc: i64, ids: &[i64]) -> ExtendResearchContext {
    ExtendResearchContext {
        client_sub: sub.to_string(),
        research_context_id: rc,
        title: "Extended".to_string(),
        description: "more sources".to_string(),
        llm_name: "gpt-4o".to_string(),
        source_data_ids: ids.to_vec(),
        external_id: None,
    }
}

// ============ Source data ============

#[tokio::test]
async fn upload_then_register_is_available() {
    let h = harness().await;
    let alice = h.client("alice").await;

    let ticket = h
        .app
        .source_data
        .prepare_upload("alice", "s3", "docs/a.txt")
        .await
        .unwrap();
    assert!(ticket.relative_path.starts_with("docs/a-"));
    assert!(ticket.relative_path.ends_with("-sdamarker.txt"));
    h.objects.upload(&ticket.signed_url, b"hello").unwrap();

    let sd = h
        .app
        .source_data
        .register("alice", "A", "s3", &ticket.relative_path)
        .await
        .unwrap();
    assert_eq!(sd.status, SourceDataStatus::Available);
    assert_eq!(sd.data_type, "txt");
    assert_eq!(sd.client_id, alice);

    let listed = h.app.source_data.list_for_client(alice).await.unwrap();
    assert_eq!(listed, vec![sd]);
}

#[tokio::test]
async fn prepare_upload_writes_no_metadata() {
    let h = harness().await;
    h.client("alice").await;
    h.app
        .source_data
        .prepare_upload("alice", "S3", "a.pdf")
        .await
        .unwrap();
    assert_eq!(h.row_count("source_data").await, 0);
    assert!(h.objects.bucket_exists("alice").await.unwrap());
}

#[tokio::test]
async fn duplicate_register_is_rejected_without_new_row() {
    let h = harness().await;
    h.client("alice").await;
    let sd = h.upload("alice", "A", "docs/a.txt").await;

    let err = h
        .app
        .source_data
        .register("alice", "A", "s3", &sd.relative_path)
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::AlreadyExists(_)));
    assert_eq!(h.row_count("source_data").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_registrations_of_one_triple_admit_one() {
    let h = harness().await;
    h.client("alice").await;
    let ticket = h
        .app
        .source_data
        .prepare_upload("alice", "s3", "docs/race.txt")
        .await
        .unwrap();
    h.objects.upload(&ticket.signed_url, b"hello").unwrap();

    let path = ticket.relative_path.clone();
    let a = h.app.clone();
    let b = h.app.clone();
    let (pa, pb) = (path.clone(), path);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { a.source_data.register("alice", "A", "s3", &pa).await }),
        tokio::spawn(async move { b.source_data.register("alice", "B", "s3", &pb).await }),
    );
    let outcomes = [r1.unwrap(), r2.unwrap()];

    let winners: Vec<&SourceData> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "{outcomes:?}");
    assert_eq!(winners[0].status, SourceDataStatus::Available);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(SdaError::AlreadyExists(_)))));
    assert_eq!(h.row_count("source_data").await, 1);
}

#[tokio::test]
async fn dropped_write_session_leaves_no_rows() {
    let h = harness().await;
    let store = MetadataStore::new(h.pool.clone());

    // A deadline cancels the future while its session is open.
    let outcome = tokio::time::timeout(Duration::from_millis(50), async {
        let mut session = store.write().await?;
        session.insert_client("carol").await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        session.commit().await
    })
    .await;
    assert!(outcome.is_err());

    assert_eq!(h.row_count("clients").await, 0);
    // The gate and the connection are free again.
    let carol = h.app.clients.register("carol").await.unwrap();
    assert_eq!(carol.sub, "carol");
}

#[tokio::test]
async fn register_before_upload_is_file_not_found() {
    let h = harness().await;
    h.client("alice").await;
    let err = h
        .app
        .source_data
        .register("alice", "A", "s3", "docs/never.txt")
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::FileNotFound("docs/never.txt".to_string()));
}

#[tokio::test]
async fn unknown_client_and_bad_protocol_are_reported() {
    let h = harness().await;
    let err = h
        .app
        .source_data
        .prepare_upload("nobody", "s3", "a.txt")
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::UnknownClient("nobody".to_string()));

    h.client("alice").await;
    let err = h
        .app
        .source_data
        .prepare_upload("alice", "ftp", "a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::InvalidProtocol(_)));

    let err = h
        .app
        .source_data
        .prepare_upload("alice", "nas", "a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::UnsupportedProtocol(_)));
}

#[tokio::test]
async fn download_of_another_clients_file_is_not_found() {
    let h = harness().await;
    h.client("alice").await;
    let bob = h.client("bob").await;
    let sd = h.upload("alice", "A", "docs/a.txt").await;

    let err = h
        .app
        .source_data
        .prepare_download(bob, "s3", &sd.relative_path)
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::NotFound { .. }));

    let url = h
        .app
        .source_data
        .prepare_download(sd.client_id, "s3", &sd.relative_path)
        .await
        .unwrap();
    assert!(url.contains("method=GET"));
}

#[tokio::test]
async fn lfn_registration_tracks_blob_arrival() {
    let h = harness().await;
    h.client("alice").await;
    let lfn = r#"{"protocol":"s3","tracer_id":"t","job_id":"1","source":"crawler","relative_path":"in/report.pdf"}"#;

    let sd = h
        .app
        .source_data
        .register_lfn("alice", "Report", lfn)
        .await
        .unwrap();
    assert_eq!(sd.status, SourceDataStatus::Created);
    assert_eq!(sd.data_type, "pdf");

    // Nothing uploaded yet: status is unchanged.
    let same = h.app.source_data.refresh_status("alice", sd.id).await.unwrap();
    assert_eq!(same.status, SourceDataStatus::Created);

    h.objects.create_bucket("alice").await.unwrap();
    h.objects.put_object("alice", "in/report.pdf", b"%PDF").unwrap();
    let refreshed = h.app.source_data.refresh_status("alice", sd.id).await.unwrap();
    assert_eq!(refreshed.status, SourceDataStatus::Available);

    h.client("bob").await;
    let err = h.app.source_data.refresh_status("bob", sd.id).await.unwrap_err();
    assert!(matches!(err, SdaError::Forbidden(_)));
}

#[tokio::test]
async fn non_s3_source_cannot_be_downloaded() {
    let h = harness().await;
    let alice = h.client("alice").await;
    let lfn = r#"{"protocol":"nas","tracer_id":"t","job_id":"1","source":"share","relative_path":"x/y.csv"}"#;
    let sd = h
        .app
        .source_data
        .register_lfn("alice", "Y", lfn)
        .await
        .unwrap();
    assert_eq!(sd.status, SourceDataStatus::Created);

    let err = h
        .app
        .source_data
        .prepare_download(alice, "nas", "x/y.csv")
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::UnsupportedProtocol(_)));
}

#[tokio::test]
async fn deleted_source_can_be_registered_again() {
    let h = harness().await;
    let alice = h.client("alice").await;
    let sd = h.upload("alice", "A", "docs/a.txt").await;

    h.app.source_data.delete("alice", sd.id).await.unwrap();
    assert!(h.app.source_data.list_for_client(alice).await.unwrap().is_empty());

    let again = h
        .app
        .source_data
        .register("alice", "A again", "s3", &sd.relative_path)
        .await
        .unwrap();
    assert_ne!(again.id, sd.id);
}

#[tokio::test]
async fn object_store_outage_is_store_unavailable() {
    let h = harness().await;
    h.client("alice").await;
    h.objects.set_unavailable(true);
    let err = h
        .app
        .source_data
        .prepare_upload("alice", "s3", "a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::StoreUnavailable(_)));
}

// ============ Research contexts ============

#[tokio::test]
async fn create_deduplicates_sources() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let s2 = h.upload("alice", "2", "two.txt").await.id;

    let rc = h.context("alice", &[s1, s2, s1]).await;
    assert_eq!(h.source_ids("alice", rc).await, BTreeSet::from([s1, s2]));
}

#[tokio::test]
async fn create_rejects_bad_source_sets() {
    let h = harness().await;
    h.client("alice").await;
    h.client("bob").await;
    let mine = h.upload("alice", "1", "one.txt").await.id;
    let theirs = h.upload("bob", "2", "two.txt").await.id;

    let request = |ids: Vec<i64>, llm: &str| CreateResearchContext {
        client_sub: "alice".to_string(),
        llm_name: llm.to_string(),
        title: "T".to_string(),
        description: String::new(),
        external_id: Some("8c6f1c2e-6a1b-4c55-9d4e-1f2a3b4c5d6e".to_string()),
        source_data_ids: ids,
    };

    let err = h.app.research_contexts.create(request(vec![], "gpt-4o")).await.unwrap_err();
    assert!(matches!(err, SdaError::InvalidArgument(_)));

    let err = h
        .app
        .research_contexts
        .create(request(vec![mine, 9999], "gpt-4o"))
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::UnknownSource(vec![9999]));

    let err = h
        .app
        .research_contexts
        .create(request(vec![mine, theirs], "gpt-4o"))
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::UnauthorizedSource(vec![theirs]));

    let err = h
        .app
        .research_contexts
        .create(request(vec![mine], "no-such-llm"))
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::UnknownLlm(_)));

    assert_eq!(h.row_count("research_contexts").await, 0);
    assert_eq!(h.row_count("research_context_source_data").await, 0);
}

#[tokio::test]
async fn extension_adds_sources_and_leaves_original_untouched() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let s2 = h.upload("alice", "2", "two.txt").await.id;
    let s3 = h.upload("alice", "3", "three.txt").await.id;
    h.upload("alice", "4", "four.txt").await;

    let r1 = h.context("alice", &[s1, s2]).await;
    let r2 = h
        .app
        .research_contexts
        .extend(extend_request("alice", r1, &[s3]))
        .await
        .unwrap();
    assert_ne!(r2.research_context.id, r1);
    assert_eq!(r2.llm.llm_name, "gpt-4o");
    assert_eq!(
        h.source_ids("alice", r2.research_context.id).await,
        BTreeSet::from([s1, s2, s3])
    );
    assert_eq!(h.source_ids("alice", r1).await, BTreeSet::from([s1, s2]));
}

#[tokio::test]
async fn extension_without_new_sources_fails() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let s2 = h.upload("alice", "2", "two.txt").await.id;
    let r1 = h.context("alice", &[s1, s2]).await;

    let err = h
        .app
        .research_contexts
        .extend(extend_request("alice", r1, &[s1, s2]))
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::NoNewSourceData);
    assert_eq!(h.row_count("research_contexts").await, 1);
}

#[tokio::test]
async fn extension_checks_ownership() {
    let h = harness().await;
    h.client("alice").await;
    h.client("bob").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let b1 = h.upload("bob", "b", "bob.txt").await.id;
    let r1 = h.context("alice", &[s1]).await;

    let err = h
        .app
        .research_contexts
        .extend(extend_request("alice", r1, &[b1]))
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::UnauthorizedSource(vec![b1]));

    let err = h
        .app
        .research_contexts
        .extend(extend_request("bob", r1, &[b1]))
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::Forbidden(_)));
}

#[tokio::test]
async fn context_reads_are_owner_only() {
    let h = harness().await;
    let alice = h.client("alice").await;
    h.client("bob").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;

    assert!(matches!(
        h.app.research_contexts.list_sources("bob", rc).await,
        Err(SdaError::Forbidden(_))
    ));
    assert_eq!(h.app.research_contexts.get_client(rc).await.unwrap().id, alice);
    let listed = h.app.research_contexts.list_for_client(alice).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].external_id.is_empty());
}

#[tokio::test]
async fn one_vector_store_per_context() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let lfn = r#"{"protocol":"s3","tracer_id":"t","job_id":"2","source":"indexer","relative_path":"idx/rc.faiss"}"#;

    let attach = |name: &str| AttachVectorStore {
        client_sub: "alice".to_string(),
        research_context_id: rc,
        name: name.to_string(),
        lfn: lfn.to_string(),
        embedding_model_id: 1,
    };
    let vs = h
        .app
        .research_contexts
        .attach_vector_store(attach("index"))
        .await
        .unwrap();
    assert_eq!(vs.research_context_id, rc);

    let err = h
        .app
        .research_contexts
        .attach_vector_store(attach("again"))
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::AlreadyExists(_)));
}

#[tokio::test]
async fn deleting_a_context_hides_its_conversations() {
    let h = harness().await;
    let alice = h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();
    h.app
        .conversations
        .append_message("alice", conv.id, user_message("q", None))
        .await
        .unwrap();

    h.app.research_contexts.delete("alice", rc).await.unwrap();

    assert!(h.app.research_contexts.list_for_client(alice).await.unwrap().is_empty());
    assert!(matches!(
        h.app.conversations.list_messages("alice", conv.id).await,
        Err(SdaError::NotFound { .. })
    ));
    // Soft delete: rows are still there.
    assert_eq!(h.row_count("messages").await, 1);
}

// ============ Conversations ============

#[tokio::test]
async fn messages_are_ordered_by_timestamp_then_id() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();

    for (text, ts) in [("late", 300), ("early-a", 100), ("early-b", 100)] {
        let mut msg = user_message(text, Some(1));
        msg.timestamp = ts;
        h.app
            .conversations
            .append_message("alice", conv.id, msg)
            .await
            .unwrap();
    }

    let texts: Vec<String> = h
        .app
        .conversations
        .list_messages("alice", conv.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.message_contents[0].content.clone())
        .collect();
    assert_eq!(texts, vec!["early-a", "early-b", "late"]);
}

#[tokio::test]
async fn new_threads_exceed_every_prior_thread() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();

    let first = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("q", None))
        .await
        .unwrap();
    let reply = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("follow-up", Some(first.thread_id)))
        .await
        .unwrap();
    assert_eq!(reply.thread_id, first.thread_id);

    let next = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("new", None))
        .await
        .unwrap();
    assert!(next.thread_id > first.thread_id);
}

#[tokio::test]
async fn exhausted_thread_space_is_an_error_not_a_wrap() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();

    let last = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("edge", Some(i64::MAX)))
        .await
        .unwrap();
    assert_eq!(last.thread_id, i64::MAX);

    let err = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("new", None))
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::Internal(_)));
    assert_eq!(h.row_count("messages").await, 1);

    // Replies to the existing thread still work.
    let reply = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("reply", Some(i64::MAX)))
        .await
        .unwrap();
    assert_eq!(reply.thread_id, i64::MAX);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_appends_get_distinct_threads() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();
    for thread in [1, 2] {
        h.app
            .conversations
            .append_message("alice", conv.id, user_message("seed", Some(thread)))
            .await
            .unwrap();
    }

    let conv_id = conv.id;
    let a = h.app.clone();
    let b = h.app.clone();
    let (m1, m2) = tokio::join!(
        tokio::spawn(async move {
            a.conversations
                .append_message("alice", conv_id, user_message("q1", None))
                .await
        }),
        tokio::spawn(async move {
            b.conversations
                .append_message("alice", conv_id, user_message("q2", None))
                .await
        }),
    );
    let t1 = m1.unwrap().unwrap().thread_id;
    let t2 = m2.unwrap().unwrap().thread_id;

    assert_ne!(t1, t2);
    assert!(t1 > 2 && t2 > 2);
    assert!(t1 == 3 || t2 == 3);
}

#[tokio::test]
async fn citations_must_stay_inside_the_context() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let s2 = h.upload("alice", "2", "two.txt").await.id;
    let outside = h.upload("alice", "3", "three.txt").await.id;
    let rc = h.context("alice", &[s1, s2]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();

    let err = h
        .app
        .conversations
        .append_message("alice", conv.id, agent_message("a", &[s1, outside]))
        .await
        .unwrap_err();
    assert_eq!(err, SdaError::UncitedSourceOutsideContext(vec![outside]));
    assert_eq!(h.row_count("messages").await, 0);

    let stored = h
        .app
        .conversations
        .append_message("alice", conv.id, agent_message("a", &[s1, s1]))
        .await
        .unwrap();
    match &stored.kind {
        MessageKind::Agent { citations } => assert_eq!(citations.len(), 2),
        MessageKind::User => panic!("expected an agent message"),
    }
    h.app
        .conversations
        .append_message("alice", conv.id, agent_message("b", &[s2]))
        .await
        .unwrap();

    let cited: Vec<i64> = h
        .app
        .conversations
        .list_cited_sources("alice", conv.id)
        .await
        .unwrap()
        .into_iter()
        .map(|sd| sd.id)
        .collect();
    assert_eq!(cited, vec![s1, s2]);

    let listed = h.app.conversations.list_messages("alice", conv.id).await.unwrap();
    assert!(matches!(&listed[0].kind, MessageKind::Agent { citations } if citations.len() == 2));
}

#[tokio::test]
async fn message_validation() {
    let h = harness().await;
    h.client("alice").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();

    let mut empty = user_message("x", None);
    empty.message_contents.clear();
    assert_eq!(
        h.app
            .conversations
            .append_message("alice", conv.id, empty)
            .await
            .unwrap_err(),
        SdaError::EmptyMessage
    );

    let err = h
        .app
        .conversations
        .append_message("alice", conv.id, user_message("x", Some(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, SdaError::InvalidArgument(_)));

    let err = h.app.conversations.create("alice", rc, "   ").await.unwrap_err();
    assert!(matches!(err, SdaError::InvalidArgument(_)));
}

#[tokio::test]
async fn conversations_are_owner_only() {
    let h = harness().await;
    h.client("alice").await;
    h.client("bob").await;
    let s1 = h.upload("alice", "1", "one.txt").await.id;
    let rc = h.context("alice", &[s1]).await;
    let conv = h.app.conversations.create("alice", rc, "Chat").await.unwrap();

    assert!(matches!(
        h.app.conversations.list_messages("bob", conv.id).await,
        Err(SdaError::Forbidden(_))
    ));
    assert!(matches!(
        h.app
            .conversations
            .append_message("bob", conv.id, user_message("hi", None))
            .await,
        Err(SdaError::Forbidden(_))
    ));
    assert!(matches!(
        h.app.conversations.create("bob", rc, "Mine now").await,
        Err(SdaError::Forbidden(_))
    ));

    let renamed = h
        .app
        .conversations
        .update_title("alice", conv.id, "Renamed")
        .await
        .unwrap();
    assert_eq!(renamed.title, "Renamed");
    let listed = h
        .app
        .conversations
        .list_for_research_context("alice", rc)
        .await
        .unwrap();
    assert_eq!(listed[0].title, "Renamed");
    let via_context = h
        .app
        .research_contexts
        .list_conversations("alice", rc)
        .await
        .unwrap();
    assert_eq!(via_context, listed);
}

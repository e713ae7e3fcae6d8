//! SQLite store behaviour against a temporary database file.

use tempfile::TempDir;

use prep_rag::models::{
    ChatSession, Chunk, ChunkMetadata, NewMaterial, NewMessage, NewQueryLog, QueryFilters, Role,
    SourceInfo, VerificationSummary,
};
use prep_rag::store::sqlite::SqliteStore;
use prep_rag::store::Store;

async fn open() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("data/prep.sqlite"))
        .await
        .unwrap();
    (dir, store)
}

fn chunk(id: &str, material_id: i64, ordinal: i64) -> Chunk {
    Chunk {
        id: id.to_string(),
        material_id,
        ordinal,
        text: format!("text of {}", id),
        metadata: ChunkMetadata {
            material_title: "Lecture_03_Heaps.pdf".to_string(),
            material_type: "lecture".to_string(),
            page: Some(ordinal + 1),
            lecture_number: Some(3),
            ..Default::default()
        },
    }
}

fn source(chunk_id: &str) -> SourceInfo {
    SourceInfo {
        chunk_id: chunk_id.to_string(),
        material_id: 1,
        title: "Lecture_03_Heaps.pdf".to_string(),
        page: Some(1),
        section: None,
        material_type: "lecture".to_string(),
        score: 0.82,
    }
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prep.sqlite");
    SqliteStore::open(&path).await.unwrap();
    let store = SqliteStore::open(&path).await.unwrap();
    assert!(store.list_materials().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_materials_and_chunks() {
    let (_dir, store) = open().await;

    let material = store
        .insert_material(&NewMaterial {
            filename: "Lecture_03_Heaps.pdf".to_string(),
            material_type: "lecture".to_string(),
            course: Some("CS201".to_string()),
            file_path: "/materials/Lecture_03_Heaps.pdf".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(material.chunk_count, 0);

    store
        .insert_chunks(&[chunk("b", material.id, 1), chunk("a", material.id, 0)])
        .await
        .unwrap();
    store.set_material_chunk_count(material.id, 2).await.unwrap();

    let loaded = store.get_material(material.id).await.unwrap().unwrap();
    assert_eq!(loaded.chunk_count, 2);
    assert_eq!(loaded.course.as_deref(), Some("CS201"));

    let chunks = store.chunks_for_material(material.id).await.unwrap();
    let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(chunks[1].metadata.page, Some(2));
    assert_eq!(chunks[1].metadata.lecture_number, Some(3));

    let one = store.get_chunk("b").await.unwrap().unwrap();
    assert_eq!(one.text, "text of b");
    assert!(store.get_chunk("zzz").await.unwrap().is_none());

    assert!(store.delete_material(material.id).await.unwrap());
    assert!(store.all_chunks().await.unwrap().is_empty());
    assert!(!store.delete_material(material.id).await.unwrap());
}

#[tokio::test]
async fn test_sessions_and_history() {
    let (_dir, store) = open().await;
    let session = ChatSession {
        id: "s1".to_string(),
        title: Some("Heaps".to_string()),
        created_at: 100,
        updated_at: 100,
    };
    store.create_session(&session).await.unwrap();
    store
        .create_session(&ChatSession {
            id: "s2".to_string(),
            title: None,
            created_at: 50,
            updated_at: 50,
        })
        .await
        .unwrap();

    store
        .append_message("s1", &NewMessage::user("What is a heap?"))
        .await
        .unwrap();
    store
        .append_message(
            "s1",
            &NewMessage {
                role: Role::Assistant,
                content: "A heap is a tree.".to_string(),
                sources: Some(vec![source("c1")]),
                verification: Some(VerificationSummary {
                    faithfulness: Some(1.0),
                    status: "passed".to_string(),
                }),
            },
        )
        .await
        .unwrap();
    store
        .append_message("s1", &NewMessage::user("And sift down?"))
        .await
        .unwrap();

    let history = store.session_history("s1").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].sources.as_ref().unwrap()[0].chunk_id, "c1");
    assert_eq!(history[1].verification.as_ref().unwrap().status, "passed");

    let recent = store.recent_history("s1", 2).await.unwrap();
    let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["A heap is a tree.", "And sift down?"]);

    // Appending touched s1, so it sorts first.
    let sessions = store.list_sessions(0, 10).await.unwrap();
    assert_eq!(sessions[0].id, "s1");
    assert!(sessions[0].updated_at > 100);
    assert_eq!(store.list_sessions(1, 10).await.unwrap().len(), 1);

    let renamed = store.rename_session("s1", "Priority queues").await.unwrap().unwrap();
    assert_eq!(renamed.title.as_deref(), Some("Priority queues"));
    assert!(store.rename_session("nope", "x").await.unwrap().is_none());
}

#[tokio::test]
async fn test_query_logs_round_trip_optional_fields() {
    let (_dir, store) = open().await;

    let first = store
        .insert_query_log(&NewQueryLog {
            question: "What is a heap?".to_string(),
            answer: None,
            sources: None,
            faithfulness_score: None,
            verification_status: "generation_failed".to_string(),
            filters: None,
            top_k: 12,
            session_id: None,
        })
        .await
        .unwrap();
    let second = store
        .insert_query_log(&NewQueryLog {
            question: "Explain sift down".to_string(),
            answer: Some("Swap with the smaller child.".to_string()),
            sources: Some(vec![source("c1"), source("c2")]),
            faithfulness_score: Some(0.75),
            verification_status: "passed".to_string(),
            filters: Some(QueryFilters {
                lecture_number: Some(3),
                material_ids: Some(vec![1, 2]),
                ..Default::default()
            }),
            top_k: 5,
            session_id: Some("s1".to_string()),
        })
        .await
        .unwrap();
    assert!(second > first);

    let log = store.get_query_log(first).await.unwrap().unwrap();
    assert!(log.answer.is_none());
    assert!(log.sources.is_none());
    assert!(log.faithfulness_score.is_none());

    let log = store.get_query_log(second).await.unwrap().unwrap();
    assert_eq!(log.sources.unwrap().len(), 2);
    assert_eq!(log.faithfulness_score, Some(0.75));
    let filters = log.filters.unwrap();
    assert_eq!(filters.lecture_number, Some(3));
    assert_eq!(filters.material_ids, Some(vec![1, 2]));

    let recent = store.recent_query_logs(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, second);
}

#[tokio::test]
async fn test_reset_clears_all_tables() {
    let (_dir, store) = open().await;
    let m = store
        .insert_material(&NewMaterial {
            filename: "notes.md".to_string(),
            material_type: "notes".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store.insert_chunks(&[chunk("a", m.id, 0)]).await.unwrap();
    store
        .create_session(&ChatSession {
            id: "s1".to_string(),
            title: None,
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();
    store
        .append_message("s1", &NewMessage::user("hello there"))
        .await
        .unwrap();

    store.reset().await.unwrap();

    assert!(store.list_materials().await.unwrap().is_empty());
    assert!(store.all_chunks().await.unwrap().is_empty());
    assert!(store.get_session("s1").await.unwrap().is_none());
    assert!(store.session_history("s1").await.unwrap().is_empty());
}

//! HTTP API tests against a server bound to an ephemeral port.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use common::*;
use prep_rag::generation::Generator;
use prep_rag::server;

const ANSWER: &str = "A heap is a complete binary tree stored in an array.";

/// Start a server over a seeded harness and return its base URL.
async fn start(generator: Arc<dyn Generator>) -> (String, Harness) {
    let h = harness(generator);
    seed_algorithms(&h).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let services = h.services.clone();
    tokio::spawn(async move {
        server::serve(listener, services).await.unwrap();
    });
    (format!("http://{}", addr), h)
}

#[tokio::test]
async fn test_health_reports_vectors() {
    let (base, _h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["vectors"], 3);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_ask_returns_verified_answer() {
    let (base, _h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "What is a heap?", "top_k": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["answer"], ANSWER);
    assert_eq!(body["verification_status"], "passed");
    assert_eq!(body["faithfulness_score"], 1.0);
    assert_eq!(body["score_kind"], "similarity");
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    assert_eq!(body["sources"][0]["chunk_id"], "Algorithms-0");
    assert!(body["query_log_id"].is_i64());
    assert!(body.get("audit_error").is_none());

    let log_id = body["query_log_id"].as_i64().unwrap();
    let log: Value = client
        .get(format!("{}/logs/{}", base, log_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(log["question"], "What is a heap?");
    assert_eq!(log["verification_status"], "passed");
}

#[tokio::test]
async fn test_ask_validation_errors_use_envelope() {
    let (base, _h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"].get("retryable").is_none());

    let resp = client
        .post(format!("{}/ask", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_generation_failure_is_retryable_502() {
    let (base, _h) = start(Arc::new(FailingGenerator)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "What is a heap?" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "upstream_error");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn test_chat_session_lifecycle() {
    let (base, _h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/chat/sessions", base))
        .json(&json!({ "title": "Heaps revision" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let session: Value = resp.json().await.unwrap();
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["title"], "Heaps revision");

    // No body at all falls back to a generated title.
    let untitled: Value = client
        .post(format!("{}/chat/sessions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(untitled["title"].as_str().unwrap().starts_with("Chat "));

    let resp = client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "What is a heap?", "session_id": id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let history: Value = client
        .get(format!("{}/chat/sessions/{}/history", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "user");
    assert_eq!(history[1]["role"], "assistant");
    assert_eq!(history[1]["content"], ANSWER);

    let renamed: Value = client
        .put(format!("{}/chat/sessions/{}", base, id))
        .json(&json!({ "title": "Priority queues" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed["title"], "Priority queues");

    let resp = client
        .put(format!("{}/chat/sessions/{}", base, id))
        .json(&json!({ "title": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let sessions: Value = client
        .get(format!("{}/chat/sessions?limit=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let (base, h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/chat/sessions/missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "What is a heap?", "session_id": "missing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    use prep_rag::store::Store;
    assert!(h.store.recent_query_logs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_source_returns_cited_chunk() {
    let (base, h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;
    let client = reqwest::Client::new();

    use prep_rag::store::Store;
    let material_id = h.store.list_materials().await.unwrap()[0].id;

    let resp = client
        .get(format!("{}/source/Algorithms-1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["chunk_id"], "Algorithms-1");
    assert_eq!(body["text"], "A graph is a set of vertices joined by edges.");
    assert_eq!(body["material_id"], material_id);
    assert_eq!(body["chunk_metadata"]["material_title"], "Algorithms");
    assert_eq!(body["chunk_metadata"]["material_type"], "lecture");
    assert_eq!(body["chunk_metadata"]["page"], 2);

    let resp = client
        .get(format!("{}/source/Algorithms-9", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "chunk not found: Algorithms-9");
}

#[tokio::test]
async fn test_material_delete_and_reset() {
    let (base, _h) = start(Arc::new(ScriptedGenerator::new(ANSWER))).await;
    let client = reqwest::Client::new();

    let materials: Value = client
        .get(format!("{}/materials", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = materials[0]["id"].as_i64().unwrap();

    let report: Value = client
        .delete(format!("{}/materials/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["vectors"], 0);

    let resp = client
        .delete(format!("{}/materials/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/admin/reset", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .post(format!("{}/ask", base))
        .json(&json!({ "question": "What is a heap?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["verification_status"], "no_materials");
}

//! HTTP API tests against a real server on a free port.

mod common;

use std::sync::Arc;

use adaptive_rag::server::{serve_on, SESSION_HEADER};
use adaptive_rag::service::RagService;
use common::*;
use serde_json::Value;

// ─── Helpers ────────────────────────────────────────────────────────

async fn start(service: Arc<RagService>) -> (String, tokio::sync::oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        serve_on(listener, service, 1024 * 1024, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    wait_for_server(port).await;
    (format!("http://127.0.0.1:{}", port), tx)
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/formats", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if client.get(&url).send().await.is_ok() {
            return;
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn file_part(name: &str, text: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(text.as_bytes().to_vec()).file_name(name.to_string())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_query_memory_clear_flow() {
    let cfg = test_config("");
    let h = harness(
        &cfg,
        FakeChat::classifying("VECTORSTORE"),
        FakeWeb::new(WebMode::Outage),
        HashEmbedder::new(),
    );
    let (base, _stop) = start(h.service.clone()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let formats: Value = client
        .get(format!("{}/formats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(formats["formats"]
        .as_array()
        .unwrap()
        .contains(&Value::from(".pdf")));

    let form = reqwest::multipart::Form::new()
        .part(
            "files",
            file_part("handbook.txt", "Employees receive twenty vacation days per year."),
        )
        .part("files", file_part("notes.csv", "team,size\nplatform,7\nsearch,5"));
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let upload: Value = resp.json().await.unwrap();
    assert_eq!(upload["success"], true);
    assert_eq!(upload["message"], "Successfully uploaded 2 files");
    assert_eq!(upload["stats"]["successful_files"], 2);
    assert_eq!(upload["documents"][0]["status"]["state"], "success");

    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_vector_count"], 2);
    assert_eq!(stats["document_count"], 2);

    let resp = client
        .post(format!("{}/query", base))
        .header(SESSION_HEADER, "tab-1")
        .json(&serde_json::json!({"question": "How many vacation days do employees get?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert_eq!(answer["method"], "vectorstore_search");
    assert_eq!(answer["answer"], ANSWER);
    assert_eq!(answer["sources"][0]["file_name"], "handbook.txt");
    assert!(answer["sources"][0].get("url").is_none());

    let memory: Value = client
        .get(format!("{}/chat/memory", base))
        .header(SESSION_HEADER, "tab-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = memory["memory"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[1]["content"], ANSWER);

    let other: Value = client
        .get(format!("{}/chat/memory", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(other["memory"].as_array().unwrap().is_empty());

    let resp = client
        .delete(format!("{}/chat/memory", base))
        .header(SESSION_HEADER, "tab-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Chat memory cleared");
    assert!(h.service.memory("tab-1").unwrap().is_empty());

    let resp = client.post(format!("{}/clear", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Index cleared successfully");
    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_vector_count"], 0);
}

#[tokio::test]
async fn test_bad_requests_use_error_envelope() {
    let cfg = test_config("");
    let h = harness(
        &cfg,
        FakeChat::classifying("GENERAL"),
        FakeWeb::new(WebMode::Outage),
        HashEmbedder::new(),
    );
    let (base, _stop) = start(h.service.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&serde_json::json!({"question": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/query", base))
        .json(&serde_json::json!({"q": "missing field"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let form = reqwest::multipart::Form::new().part("files", file_part("tool.exe", "MZ"));
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body.get("message").is_none());
    assert_eq!(body["stats"]["successful_files"], 0);

    let form = reqwest::multipart::Form::new().text("other", "value");
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "no files uploaded");
}

#[tokio::test]
async fn test_missing_credentials_make_service_unhealthy() {
    std::env::remove_var("OPENAI_API_KEY");
    let mut cfg = test_config("");
    cfg.llm.provider = "openai".to_string();

    let service = Arc::new(RagService::from_config(&cfg).await.unwrap());
    assert!(!service.is_ready());
    let (base, _stop) = start(service).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");

    let resp = client
        .post(format!("{}/query", base))
        .json(&serde_json::json!({"question": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_ready");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("OPENAI_API_KEY"));
}

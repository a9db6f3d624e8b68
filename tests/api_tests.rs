//! HTTP API tests: health probe and transcript retrieval.

mod common;

use common::*;
use polyvoice::core::now_millis;
use polyvoice::store::{TranslationRecord, TranslationStore};

fn http_url(server: &TestServer, path: &str) -> String {
    server.url.replace("ws://", "http://").replace("/ws", path)
}

#[tokio::test]
async fn test_health_check() {
    let server = start_server().await;

    let body: serde_json::Value = reqwest::get(http_url(&server, "/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["service"], "polyvoice");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_transcripts_for_unknown_session_is_404() {
    let server = start_server().await;

    let response = reqwest::get(http_url(&server, "/sessions/ghost/transcripts"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_transcripts_returns_persisted_rows() {
    let server = start_server().await;
    seed_session(&server, "s1", "host");

    server
        .translations
        .append(TranslationRecord {
            session_id: "s1".to_string(),
            participant_id: "p1".to_string(),
            original_text: "Hello.".to_string(),
            original_language: "English".to_string(),
            target_language: "Spanish".to_string(),
            translated_text: "Hola.".to_string(),
            confidence: 0.9,
            timestamp: now_millis(),
        })
        .await
        .unwrap();

    let body: serde_json::Value = reqwest::get(http_url(&server, "/sessions/s1/transcripts"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["count"], 1);
    assert_eq!(body["translations"][0]["translated_text"], "Hola.");
    assert_eq!(body["translations"][0]["target_language"], "Spanish");
}

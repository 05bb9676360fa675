//! HTTP routes exercised over a real listener with fake providers behind them.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{FAKE_AUDIO, FakeStore, Harness, ScriptedGenerator, doc};
use parley::ChatServer;
use parley::protocol::{self, ChatFrame};
use serde_json::{Value, json};

async fn start(harness: &Harness) -> (ChatServer, String) {
    let server = ChatServer::start(harness.pipeline(), "127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", server.addr());
    (server, base)
}

fn harness() -> Harness {
    Harness::new(
        FakeStore::with_docs(vec![doc("a", 0.9), doc("b", 0.7)]),
        ScriptedGenerator::answering(&["블로그에 ", "쓴 글이 ", "있어요."]),
    )
}

fn audio_part() -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(vec![7u8; 4096])
        .file_name("question.webm")
        .mime_str("audio/webm")
        .unwrap()
}

#[tokio::test]
async fn chat_streams_ndjson_frames() {
    let harness = harness();
    let (_server, base) = start(&harness).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .json(&json!({"message": "최근에 쓴 글은?", "history": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        protocol::CONTENT_TYPE
    );
    let session_id = response.headers()["x-session-id"].to_str().unwrap().to_string();
    assert!(session_id.starts_with("session_"));

    let body = response.bytes().await.unwrap();
    let frames = protocol::decode_all(&body).unwrap();
    match &frames[0] {
        ChatFrame::Sources { data } => {
            assert_eq!(data.len(), 2);
            assert!(data[0].content.ends_with("..."));
        }
        other => panic!("unexpected first frame {other:?}"),
    }
    assert_eq!(common::answer_text(&frames), "블로그에 쓴 글이 있어요.");
    assert_eq!(frames.last(), Some(&ChatFrame::Done));
}

#[tokio::test]
async fn chat_accepts_camel_case_page_context() {
    let harness = harness();
    let (_server, base) = start(&harness).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .json(&json!({
            "message": "요약해줘",
            "pageContext": {"title": "글쓰기 습관", "content": "매일 쓰기", "url": "/blog/writing"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();

    let system = &harness.generator.last_messages()[0].content;
    assert!(system.contains("글쓰기 습관"));
}

#[tokio::test]
async fn invalid_chat_bodies_are_bad_requests() {
    let harness = harness();
    let (_server, base) = start(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/chat"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "요청 형식이 올바르지 않습니다.");

    let response = client
        .post(format!("{base}/api/chat"))
        .json(&json!({"message": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "메시지를 입력해주세요.");
}

#[tokio::test]
async fn voice_chat_returns_answer_and_audio() {
    let harness = harness();
    let (_server, base) = start(&harness).await;

    let history = json!([{"role": "user", "content": "안녕"}, {"role": "assistant", "content": "안녕!"}]);
    let form = reqwest::multipart::Form::new()
        .part("audio", audio_part())
        .text("history", history.to_string());
    let response = reqwest::Client::new()
        .post(format!("{base}/api/voice/chat"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["transcription"], "요즘 어떤 책을 읽으세요?");
    assert_eq!(body["response_text"], "블로그에 쓴 글이 있어요.");
    assert!(!body["audio"].as_str().unwrap().is_empty());
    assert_eq!(body["citations"].as_array().unwrap().len(), 2);
    assert!(body["metrics"]["session_id"].as_str().unwrap().starts_with("session_"));
    assert!(body["metrics"]["normalization_changes"].is_object());

    let messages = harness.generator.last_messages();
    assert_eq!(messages.len(), 4);
}

#[tokio::test]
async fn voice_chat_without_audio_is_bad_request() {
    let harness = harness();
    let (_server, base) = start(&harness).await;

    let form = reqwest::multipart::Form::new().text("history", "[]");
    let response = reqwest::Client::new()
        .post(format!("{base}/api/voice/chat"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "오디오 파일이 필요합니다.");
}

#[tokio::test]
async fn transcribe_and_synthesize_routes() {
    let harness = harness();
    let (_server, base) = start(&harness).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part("audio", audio_part());
    let response = client
        .post(format!("{base}/api/voice/transcribe"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"text": "요즘 어떤 책을 읽으세요?", "language": "ko"}));

    let response = client
        .post(format!("{base}/api/voice/synthesize"))
        .json(&json!({"text": "안녕하세요", "voice_id": "alt"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(&response.bytes().await.unwrap()[..], FAKE_AUDIO);
    let spoken = harness.synthesizer.spoken.lock().unwrap().clone();
    assert_eq!(spoken[0], ("안녕하세요".to_string(), Some("alt".to_string())));

    let response = client
        .post(format!("{base}/api/voice/synthesize"))
        .json(&json!({"text": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn metrics_report_includes_recent_requests() {
    let harness = harness();
    let (_server, base) = start(&harness).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/chat"))
        .json(&json!({"message": "질문"}))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    harness.rows(1).await;

    let response = client
        .get(format!("{base}/api/metrics?range=1h&group_by=day&limit=abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["time_range"], "1h");
    assert_eq!(body["group_by"], "day");
    assert_eq!(body["stats"]["total"], 1);
    assert_eq!(body["data"][0]["channel"], "text");
    assert_eq!(body["stats"]["by_time"].as_array().unwrap().len(), 1);
}

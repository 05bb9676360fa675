//! Provider contract tests.
//!
//! Each adapter is pointed at a wiremock server to pin down the exact request
//! it sends and how it reads responses and error bodies.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures_util::StreamExt;
use parley::config::SynthesisConfig;
use parley::pipeline::messages::{AudioInput, Turn};
use parley::providers::cohere::CohereReranker;
use parley::providers::elevenlabs::ElevenLabsSynthesizer;
use parley::providers::openai::{OpenAiClient, OpenAiConfig};
use parley::providers::supabase::{SupabaseClient, SupabaseVectorStore};
use parley::providers::{
    Embedder, GenerationRequest, Generator, MatchQuery, ProviderError, Reranker, Synthesizer,
    Transcriber, VectorStore,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn openai(server: &MockServer) -> OpenAiClient {
    OpenAiClient::new(
        OpenAiConfig::new("sk-test").with_base_url(server.uri()),
        TIMEOUT,
    )
    .unwrap()
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::from(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    );
    for delta in deltas {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": delta}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAI
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn embedding_request_and_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": "추천 도서가 있나요?"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedding = openai(&server).embed("추천 도서가 있나요?").await.unwrap();
    assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn embedding_auth_failure_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = openai(&server).embed("q").await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(ref m) if m.contains("Incorrect API key")));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .mount(&server)
        .await;

    let err = openai(&server).embed("q").await.unwrap_err();
    assert!(matches!(err, ProviderError::Http { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn chat_completion_streams_deltas_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": true,
            "max_tokens": 500,
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "안녕하세요"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["안녕", "하세요", ". 반갑습니다"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest {
        messages: vec![Turn::system("sys"), Turn::user("안녕하세요")],
        temperature: 0.5,
        max_tokens: 500,
    };
    let stream = openai(&server).stream(&request).await.unwrap();
    let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(fragments, vec!["안녕", "하세요", ". 반갑습니다"]);
}

#[tokio::test]
async fn chat_completion_error_event_ends_stream_with_error() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"부분\"}}]}\n\n\
                data: {\"error\":{\"message\":\"model overloaded\"}}\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let request = GenerationRequest {
        messages: vec![Turn::user("q")],
        temperature: 0.7,
        max_tokens: 10,
    };
    let mut stream = openai(&server).stream(&request).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "부분");
    assert!(matches!(stream.next().await, Some(Err(ProviderError::Stream(_)))));
}

#[tokio::test]
async fn transcription_sends_multipart_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "요즘 무슨 책 읽으세요?"})))
        .expect(1)
        .mount(&server)
        .await;

    let audio = AudioInput::new(vec![1u8, 2, 3, 4], "clip.webm").with_content_type("audio/webm");
    let transcription = openai(&server).transcribe(&audio, "ko").await.unwrap();
    assert_eq!(transcription.text, "요즘 무슨 책 읽으세요?");
    assert_eq!(transcription.language, "ko");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"model\""));
    assert!(body.contains("whisper-1"));
    assert!(body.contains("name=\"language\""));
    assert!(body.contains("filename=\"clip.webm\""));
}

// ────────────────────────────────────────────────────────────────────────────
// Supabase
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn vector_search_calls_match_function_and_sorts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_documents"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .and(body_partial_json(json!({"match_count": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "title": "B", "content": "b", "url": null, "similarity": 0.61},
            {"id": "a-1", "title": "A", "content": "a", "url": "/a", "similarity": 0.83},
            {"id": 9, "title": "C", "content": "c", "similarity": 0.55}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = SupabaseClient::new(server.uri(), "service-key", TIMEOUT).unwrap();
    let store = SupabaseVectorStore::new(client, "match_documents");
    let docs = store
        .match_documents(&MatchQuery {
            embedding: vec![0.1; 4],
            threshold: 0.5,
            limit: 2,
        })
        .await
        .unwrap();

    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a-1", "7"]);
}

#[tokio::test]
async fn vector_search_error_message_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_documents"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Could not find the function public.match_documents"
        })))
        .mount(&server)
        .await;

    let client = SupabaseClient::new(server.uri(), "k", TIMEOUT).unwrap();
    let err = SupabaseVectorStore::new(client, "match_documents")
        .match_documents(&MatchQuery {
            embedding: vec![0.0],
            threshold: 0.2,
            limit: 20,
        })
        .await
        .unwrap_err();
    match err {
        ProviderError::Http { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("Could not find the function"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cohere
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerank_returns_indices_in_relevance_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/rerank"))
        .and(header("authorization", "Bearer co-key"))
        .and(body_partial_json(json!({
            "model": "rerank-english-v3.0",
            "query": "q",
            "documents": ["d0", "d1", "d2"],
            "top_n": 2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"index": 2, "relevance_score": 0.9},
                {"index": 0, "relevance_score": 0.4}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reranker =
        CohereReranker::new("co-key", server.uri(), "rerank-english-v3.0", TIMEOUT).unwrap();
    let docs = vec!["d0".to_string(), "d1".to_string(), "d2".to_string()];
    let order = reranker.rerank("q", &docs, 2).await.unwrap();
    assert_eq!(order, vec![2, 0]);
}

// ────────────────────────────────────────────────────────────────────────────
// ElevenLabs
// ────────────────────────────────────────────────────────────────────────────

fn synthesis_config(server: &MockServer) -> SynthesisConfig {
    SynthesisConfig {
        api_key: Some("el-key".into()),
        voice_id: Some("voice-1".into()),
        base_url: server.uri(),
        ..SynthesisConfig::default()
    }
}

#[tokio::test]
async fn synthesis_request_and_voice_override() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-1"))
        .and(header("xi-api-key", "el-key"))
        .and(header("accept", "audio/mpeg"))
        .and(body_partial_json(json!({
            "text": "안녕하세요.",
            "model_id": "eleven_multilingual_v2",
            "voice_settings": {"stability": 0.5, "use_speaker_boost": true}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xF3, 0x44]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/other-voice"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x49, 0x44, 0x33]))
        .expect(1)
        .mount(&server)
        .await;

    let synthesizer = ElevenLabsSynthesizer::from_config(&synthesis_config(&server), TIMEOUT).unwrap();
    let audio = synthesizer.synthesize("안녕하세요.", None).await.unwrap();
    assert_eq!(&audio[..], &[0xFF, 0xF3, 0x44]);
    let other = synthesizer
        .synthesize("안녕하세요.", Some("other-voice"))
        .await
        .unwrap();
    assert_eq!(&other[..], b"ID3");
}

#[tokio::test]
async fn synthesis_empty_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let synthesizer = ElevenLabsSynthesizer::from_config(&synthesis_config(&server), TIMEOUT).unwrap();
    let err = synthesizer.synthesize("x", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::Decode(_)));
}

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unai::error::{ErrorKind, ProviderError};
use unai::provider::gemini::GeminiProvider;
use unai::provider::openai::OpenAiProvider;
use unai::provider::{http_client, ChatRequest, LlmProvider};
use unai_core::models::ChatMessage;

fn request() -> ChatRequest {
    ChatRequest {
        system_instruction: "persona\n\nCONTEXT:\nหัวข้อ: RFID".to_string(),
        messages: vec![
            ChatMessage::user("สวัสดี"),
            ChatMessage::assistant("สวัสดีครับ"),
            ChatMessage::user("Tag ไม่ขึ้น UI"),
        ],
        temperature: 0.5,
        max_output_tokens: 1024,
    }
}

fn client() -> reqwest::Client {
    http_client(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_groq_chat_parses_answer_and_ratelimit_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(header("authorization", "Bearer gsk_test"))
        .and(body_partial_json(json!({
            "model": "llama-3.3-70b-versatile",
            "temperature": 0.5,
            "max_tokens": 1024,
            "messages": [
                {"role": "system", "content": "persona\n\nCONTEXT:\nหัวข้อ: RFID"},
                {"role": "user", "content": "สวัสดี"},
                {"role": "assistant", "content": "สวัสดีครับ"},
                {"role": "user", "content": "Tag ไม่ขึ้น UI"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining-requests", "14398")
                .insert_header("x-ratelimit-limit-requests", "14400")
                .insert_header("x-ratelimit-remaining-tokens", "5890")
                .insert_header("x-ratelimit-limit-tokens", "6000")
                .insert_header("x-ratelimit-reset-requests", "12s")
                .set_body_json(json!({
                    "choices": [{"message": {"role": "assistant", "content": "ลองรีสตาร์ทเครื่องอ่านครับ"}}]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(
        client(),
        &format!("{}/openai/v1", server.uri()),
        "llama-3.3-70b-versatile",
    );
    let completion = provider.chat("gsk_test", &request()).await.unwrap();

    assert_eq!(completion.text, "ลองรีสตาร์ทเครื่องอ่านครับ");
    let quota = completion.quota.unwrap();
    assert_eq!(quota.requests_remaining, Some(14398));
    assert_eq!(quota.requests_limit, Some(14400));
    assert_eq!(quota.tokens_remaining, Some(5890));
    assert_eq!(quota.tokens_limit, Some(6000));
    assert_eq!(quota.reset_requests.as_deref(), Some("12s"));
}

#[tokio::test]
async fn test_groq_without_headers_reports_no_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(client(), &server.uri(), "m");
    let completion = provider.chat("k", &request()).await.unwrap();
    assert_eq!(completion.text, "ok");
    assert!(completion.quota.is_none());
}

#[tokio::test]
async fn test_groq_429_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string(
            r#"{"error":{"message":"Rate limit reached for model","type":"tokens"}}"#,
        ))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(client(), &server.uri(), "m");
    let err = provider.chat("k", &request()).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.kind(), ErrorKind::RateLimited);
}

#[tokio::test]
async fn test_groq_server_error_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(client(), &server.uri(), "m");
    let err = provider.chat("k", &request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Status { status: 503, .. }));
    assert_eq!(err.kind(), ErrorKind::Provider);
}

#[tokio::test]
async fn test_groq_empty_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(client(), &server.uri(), "m");
    let err = provider.chat("k", &request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_groq_unreachable_is_transport() {
    let provider = OpenAiProvider::new(client(), "http://127.0.0.1:1", "m");
    let err = provider.chat("k", &request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_gemini_generate_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .and(query_param("key", "AIza_test"))
        .and(body_partial_json(json!({
            "systemInstruction": {"parts": [{"text": "persona\n\nCONTEXT:\nหัวข้อ: RFID"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "สวัสดี"}]},
                {"role": "model", "parts": [{"text": "สวัสดีครับ"}]},
                {"role": "user", "parts": [{"text": "Tag ไม่ขึ้น UI"}]}
            ],
            "generationConfig": {"temperature": 0.5, "maxOutputTokens": 1024}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "ตรวจสอบ"}, {"text": "สายเชื่อมต่อครับ"}]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(
        client(),
        &format!("{}/v1beta", server.uri()),
        "gemini-1.5-flash",
        "text-embedding-004",
    );
    let completion = provider.chat("AIza_test", &request()).await.unwrap();
    assert_eq!(completion.text, "ตรวจสอบสายเชื่อมต่อครับ");
    assert!(completion.quota.is_none());
}

#[tokio::test]
async fn test_gemini_resource_exhausted_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "status": "RESOURCE_EXHAUSTED", "message": "Quota exceeded"}
        })))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(client(), &server.uri(), "gemini-1.5-flash", "e");
    let err = provider.chat("k", &request()).await.unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_gemini_blocked_candidate_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        })))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(client(), &server.uri(), "gemini-1.5-flash", "e");
    let err = provider.chat("k", &request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_gemini_embed_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/text-embedding-004:embedContent"))
        .and(query_param("key", "AIza_embed"))
        .and(body_partial_json(json!({
            "model": "models/text-embedding-004",
            "content": {"parts": [{"text": "Tag ไม่ขึ้น UI"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": {"values": [0.25, -0.5, 0.75]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(client(), &server.uri(), "m", "text-embedding-004");
    let values = provider.embed("AIza_embed", "Tag ไม่ขึ้น UI").await.unwrap();
    assert_eq!(values, vec![0.25, -0.5, 0.75]);
}

#[tokio::test]
async fn test_gemini_embed_missing_values_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/e:embedContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(client(), &server.uri(), "m", "e");
    let err = provider.embed("k", "text").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_groq_cannot_embed() {
    let provider = OpenAiProvider::new(client(), "http://127.0.0.1:1", "m");
    let err = provider.embed("k", "text").await.unwrap_err();
    assert!(matches!(err, ProviderError::Unsupported(_)));
}

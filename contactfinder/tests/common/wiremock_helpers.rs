use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Chat-completions response whose message content is `content`
pub fn chat_completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content
            },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 120,
            "completion_tokens": 12,
            "total_tokens": 132
        }
    })
}

/// Creates a mock OpenAI-compatible server that answers every chat
/// completion at `/v1/chat/completions` with `content`.
pub async fn mock_chat_server(content: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(content)))
        .mount(&server)
        .await;

    server
}

/// Creates a mock server that fails every chat completion with `status_code`.
pub async fn mock_chat_error_server(status_code: u16) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(status_code).set_body_json(serde_json::json!({
            "error": {
                "message": "upstream unavailable",
                "type": "server_error",
                "param": null,
                "code": null
            }
        })))
        .mount(&server)
        .await;

    server
}

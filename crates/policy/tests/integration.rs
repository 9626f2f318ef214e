//! Integration tests for the policy crate.
//!
//! The mock-server tests run an in-process axum server that mimics SGLang's
//! `/health` and batch `/generate` endpoints.
//!
//! Tests marked `#[ignore]` need a live SGLang server:
//!
//! ```bash
//! SGLANG_URL=http://localhost:30000 cargo test -p policy -- --ignored --nocapture
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use policy::{GenerationParams, PromptConfig, PromptStyle, SglangClient, SglangConfig, DEFAULT_HEADER};

#[derive(Default)]
struct MockState {
    requests: AtomicUsize,
    /// Number of initial /generate calls answered with 503.
    fail_first: usize,
}

async fn generate(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let n = state.requests.fetch_add(1, Ordering::SeqCst);
    if n < state.fail_first {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "warming up"})),
        );
    }
    let Some(prompts) = body["text"].as_array() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "text must be a list"})),
        );
    };
    let items: Vec<serde_json::Value> = prompts
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let text = if i == 1 {
                String::new()
            } else {
                format!("Plan.\n```lean4\ntheorem t{i} : True := trivial\n```")
            };
            serde_json::json!({"text": text, "meta_info": {"id": i}})
        })
        .collect();
    (StatusCode::OK, Json(serde_json::Value::Array(items)))
}

async fn spawn_mock(fail_first: usize) -> (String, Arc<MockState>) {
    let state = Arc::new(MockState {
        requests: AtomicUsize::new(0),
        fail_first,
    });
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/generate", post(generate))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn test_batch_generate_against_mock_server() {
    let (url, state) = spawn_mock(0).await;
    let client = SglangClient::new(SglangConfig::new(url)).await.unwrap();

    let prompts: Vec<String> = (0..3).map(|i| format!("prompt {i}")).collect();
    let outputs = client
        .generate_batch(&prompts, &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(outputs.len(), 3);
    assert!(outputs[0].contains("theorem t0"));
    assert!(outputs[1].is_empty());
    assert!(outputs[2].contains("theorem t2"));
    assert_eq!(state.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_generate_retries_server_errors() {
    let (url, state) = spawn_mock(1).await;
    let client = SglangClient::new(SglangConfig::new(url)).await.unwrap();

    let prompts = vec!["only".to_string()];
    let outputs = client
        .generate_batch(&prompts, &GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(state.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_server_fails_health_check() {
    // Bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = SglangClient::new(SglangConfig::new(format!("http://{addr}"))).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_prompt_render_and_parse_through_mock() {
    let (url, _state) = spawn_mock(0).await;
    let client = SglangClient::new(SglangConfig::new(url)).await.unwrap();

    let config = PromptConfig::new(
        PromptStyle::for_model("deepseek-ai/DeepSeek-Prover-V2-7B"),
        "theorem t0 : True := by",
        DEFAULT_HEADER,
    );
    let outputs = client
        .generate_batch(&[config.render()], &GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(config.parse(&outputs[0]), "theorem t0 : True := trivial");
}

#[tokio::test]
#[ignore]
async fn test_live_server_generates_proof() {
    let url = std::env::var("SGLANG_URL").unwrap_or_else(|_| "http://localhost:30000".to_string());
    let client = SglangClient::new(SglangConfig::new(url))
        .await
        .expect("SGLang server not reachable, set SGLANG_URL");

    let config = PromptConfig::new(
        PromptStyle::DeepSeekV2,
        "theorem two_add_two : (2 : ℕ) + 2 = 4 := by",
        DEFAULT_HEADER,
    );
    let params = GenerationParams {
        max_new_tokens: 1024,
        ..GenerationParams::default()
    };
    let outputs = client
        .generate_batch(&[config.render(), config.render()], &params)
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);
    for raw in &outputs {
        println!("--- parsed ---\n{}", config.parse(raw));
    }
}

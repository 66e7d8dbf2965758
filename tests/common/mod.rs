//! In-process stand-in for the Gemini `generateContent` endpoint.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;
use tutorly::ModelConfig;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub uri: String,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    reply: String,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

pub struct MockGemini {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockGemini {
    pub async fn start(status: StatusCode, reply: impl Into<String>) -> Self {
        Self::serve(status, reply.into(), None).await
    }

    /// Answers only after `delay`, for exercising client timeouts.
    pub async fn start_slow(delay: Duration, reply: impl Into<String>) -> Self {
        Self::serve(StatusCode::OK, reply.into(), Some(delay)).await
    }

    async fn serve(status: StatusCode, reply: String, delay: Option<Duration>) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            reply,
            delay,
            requests: requests.clone(),
        };
        let app = Router::new().fallback(generate_content).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, requests }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            api_key: Some("test-key".into()),
            endpoint: Some(format!("http://{}/v1beta", self.addr)),
            request_timeout_secs: 5,
            ..ModelConfig::default()
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn generate_content(
    State(state): State<MockState>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    state.requests.lock().unwrap().push(CapturedRequest {
        uri: uri.to_string(),
        body,
    });
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    (state.status, state.reply.clone()).into_response()
}

pub fn candidate(text: &str) -> String {
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
    .to_string()
}

/// An address nothing is listening on.
pub async fn closed_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/v1beta")
}

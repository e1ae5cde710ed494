use anyhow::Result;
use http_body_util::{BodyExt, Full};
use hyper::{body::Bytes, Method, Request, Response, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Thin HTTP client against the test server
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl TestClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base_url: base_url.to_string(),
            client,
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request::<()>(Method::GET, path, None).await
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request::<()>(Method::DELETE, path, None).await
    }

    /// POST with no request body, as used by the cancel action
    pub async fn post_empty(&self, path: &str) -> Result<ApiResponse> {
        self.request::<()>(Method::POST, path, None).await
    }

    async fn request<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<ApiResponse> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path));

        let payload = match body {
            Some(body) => {
                builder = builder.header("Content-Type", "application/json");
                Full::new(Bytes::from(serde_json::to_vec(body)?))
            }
            None => Full::new(Bytes::new()),
        };

        let response = self.client.request(builder.body(payload)?).await?;
        ApiResponse::read(response).await
    }
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

pub struct ApiResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `None` for empty or non-JSON bodies
    pub body: Option<Value>,
    pub body_bytes: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ApiResponse {
    async fn read(response: Response<hyper::body::Incoming>) -> Result<Self> {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        // Buffers until the server closes the body, event streams included
        let body_bytes = response.into_body().collect().await?.to_bytes().to_vec();
        let body = serde_json::from_slice(&body_bytes).ok();

        Ok(Self {
            status,
            body,
            body_bytes,
            headers,
        })
    }

    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {}. Body: {:?}",
            expected, self.status, self.body
        );
        self
    }

    /// Assert that the error body's `message` contains `expected_message`
    pub fn assert_error_message(&self, expected_message: &str) -> &Self {
        let message = self
            .body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(|m| m.as_str())
            .expect("Missing message field in error response");

        assert!(
            message.contains(expected_message),
            "Expected error message to contain '{}', but got '{}'",
            expected_message,
            message
        );
        self
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers.get(name)
    }

    pub fn assert_header_exists(&self, name: &str) -> &Self {
        assert!(
            self.headers.contains_key(name),
            "Header '{}' not found",
            name
        );
        self
    }

    /// Split a `text/event-stream` body into its events. Comment lines
    /// (keep-alives) are skipped.
    pub fn events(&self) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(&self.body_bytes);
        text.split("\n\n")
            .filter_map(|block| {
                let mut event = None;
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = Some(name.trim().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push(value.trim_start().to_string());
                    }
                }
                event.map(|event| SseEvent {
                    event,
                    data: data.join("\n"),
                })
            })
            .collect()
    }
}

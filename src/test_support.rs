//! Test doubles shared by the unit tests of several modules.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::inference::{ChatMessage, ChatModel, InferenceError, SamplingOverrides};
use crate::mcp_client::types::error_codes;
use crate::mcp_client::{Transport, TransportError};

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn spawn_stub(router: axum::Router) -> String {
    spawn_stub_with(|_| router).await
}

/// Like [`spawn_stub`], for routers that need to know their own base URL.
pub async fn spawn_stub_with<F>(build: F) -> String
where
    F: FnOnce(&str) -> axum::Router,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let router = build(&base_url);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base_url
}

// ─── ScriptedTransport ───────────────────────────────────────────────────────

/// In-memory [`Transport`] answering from per-method scripts.
///
/// Scripted outcomes for a method are consumed in order; the last one
/// repeats. Unscripted methods answer JSON-RPC "method not found".
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, method: &str, result: Value) -> Self {
        self.push(method, Ok(result))
    }

    pub fn fail(self, method: &str, error: TransportError) -> Self {
        self.push(method, Err(error))
    }

    fn push(self, method: &str, outcome: Result<Value, TransportError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made to `method`.
    pub fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

fn clone_outcome(outcome: &Result<Value, TransportError>) -> Result<Value, TransportError> {
    match outcome {
        Ok(value) => Ok(value.clone()),
        Err(TransportError::Status {
            endpoint,
            status,
            body,
        }) => Err(TransportError::Status {
            endpoint: endpoint.clone(),
            status: *status,
            body: body.clone(),
        }),
        Err(TransportError::Timeout { method, timeout_ms }) => Err(TransportError::Timeout {
            method: method.clone(),
            timeout_ms: *timeout_ms,
        }),
        Err(TransportError::MalformedResponse { method, reason }) => {
            Err(TransportError::MalformedResponse {
                method: method.clone(),
                reason: reason.clone(),
            })
        }
        Err(TransportError::ConnectionFailed { endpoint, reason }) => {
            Err(TransportError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: reason.clone(),
            })
        }
        Err(TransportError::ServerError {
            code,
            message,
            data,
        }) => Err(TransportError::ServerError {
            code: *code,
            message: message.clone(),
            data: data.clone(),
        }),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(method) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => clone_outcome(&queue[0]),
            _ => Err(TransportError::ServerError {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    }

    fn endpoint(&self) -> &str {
        "scripted://test"
    }
}

// ─── ScriptedModel ───────────────────────────────────────────────────────────

/// [`ChatModel`] returning canned outputs in order; the last one repeats.
pub struct ScriptedModel {
    outputs: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, SamplingOverrides)>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn replies<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: Mutex::new(outputs.into_iter().map(|s| Ok(s.into())).collect()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// A model whose every call fails with a connection error.
    pub fn unreachable() -> Self {
        Self {
            outputs: Mutex::new(VecDeque::from([Err("connection refused".to_string())])),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Wait `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Messages and sampling of the most recent call.
    pub fn last_request(&self) -> Option<(Vec<ChatMessage>, SamplingOverrides)> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingOverrides,
    ) -> Result<String, InferenceError> {
        self.requests.lock().unwrap().push((messages, sampling));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut outputs = self.outputs.lock().unwrap();
        let next = if outputs.len() > 1 {
            outputs.pop_front().unwrap()
        } else {
            outputs.front().cloned().unwrap_or_else(|| Ok(String::new()))
        };
        next.map_err(|reason| InferenceError::ConnectionFailed {
            endpoint: "scripted://model".into(),
            reason,
        })
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

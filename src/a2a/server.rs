//! A2A agent HTTP server powered by axum.
//!
//! Serves:
//! - `GET  /.well-known/agent-card.json`      Agent card discovery
//! - `GET  /.well-known/agent.json`           Legacy card path
//! - `GET  /agent/authenticatedExtendedCard`  Extended card
//! - `POST /`                                 JSON-RPC 2.0 (`message/send`, `message/stream`)

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::a2a::errors::A2aError;
use crate::a2a::executor::{AgentExecutor, RequestContext};
use crate::a2a::types::*;
use crate::mcp_client::types::error_codes;

/// Capacity of the executor → response event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Shared state for the agent server.
#[derive(Clone)]
pub struct A2aState {
    pub executor: Arc<dyn AgentExecutor>,
    pub public_card: Arc<AgentCard>,
    pub extended_card: Arc<AgentCard>,
    /// Bearer token required for the extended card. `None` serves it openly.
    pub extended_card_token: Option<String>,
}

/// Build the axum router for the agent server.
pub fn build_router(state: A2aState) -> Router {
    Router::new()
        .route("/.well-known/agent-card.json", get(get_agent_card))
        .route("/.well-known/agent.json", get(get_agent_card))
        .route("/agent/authenticatedExtendedCard", get(get_extended_card))
        .route("/", post(handle_jsonrpc))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(bind: &str, port: u16, state: A2aState) -> Result<(), A2aError> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .map_err(|e| A2aError::Server {
            reason: format!("invalid bind address '{bind}:{port}': {e}"),
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| A2aError::Server {
            reason: format!("could not bind {addr}: {e}"),
        })?;

    tracing::info!(
        %addr,
        card = %state.public_card.url,
        "A2A agent listening"
    );

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| A2aError::Server {
            reason: e.to_string(),
        })
}

// ─── Agent Cards ─────────────────────────────────────────────────────────────

/// GET /.well-known/agent-card.json
async fn get_agent_card(State(state): State<A2aState>) -> Json<AgentCard> {
    Json(state.public_card.as_ref().clone())
}

/// GET /agent/authenticatedExtendedCard
async fn get_extended_card(State(state): State<A2aState>, headers: HeaderMap) -> Response {
    if let Some(expected) = &state.extended_card_token {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            tracing::warn!("extended card requested without a valid token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }
    Json(state.extended_card.as_ref().clone()).into_response()
}

// ─── JSON-RPC ────────────────────────────────────────────────────────────────

/// POST /: JSON-RPC 2.0 endpoint.
async fn handle_jsonrpc(State(state): State<A2aState>, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                serde_json::Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            ))
            .into_response();
        }
    };

    let id = value.get("id").cloned().unwrap_or_default();
    let req: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            ))
            .into_response();
        }
    };

    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::error(
            req.id,
            error_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version, expected 2.0",
        ))
        .into_response();
    }

    let streaming = match req.method.as_str() {
        "message/send" => false,
        "message/stream" => true,
        other => {
            return Json(JsonRpcResponse::error(
                req.id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ))
            .into_response();
        }
    };

    let params: MessageSendParams = match serde_json::from_value(req.params) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                req.id,
                error_codes::INVALID_PARAMS,
                format!("Invalid params: {e}"),
            ))
            .into_response();
        }
    };

    tracing::info!(
        method = %req.method,
        message_id = %params.message.message_id,
        "A2A request"
    );

    let (events, task) = spawn_executor(&state, params.message);
    if streaming {
        Sse::new(event_stream(req.id, events, task))
            .keep_alive(KeepAlive::default())
            .into_response()
    } else {
        Json(collect_reply(req.id, events, task).await).into_response()
    }
}

/// A spawned executor run. Dropping it aborts the run, so a disconnected
/// client or a cancelled request never leaves the executor working.
struct ExecutorTask(JoinHandle<Result<(), A2aError>>);

impl ExecutorTask {
    async fn join(&mut self) -> Result<Result<(), A2aError>, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl Drop for ExecutorTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_executor(state: &A2aState, message: Message) -> (mpsc::Receiver<Message>, ExecutorTask) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let executor = Arc::clone(&state.executor);
    let handle =
        tokio::spawn(async move { executor.execute(RequestContext::new(message), tx).await });
    (rx, ExecutorTask(handle))
}

/// The error response for a failed executor run, `None` if it succeeded.
fn executor_failure(
    id: serde_json::Value,
    outcome: Result<Result<(), A2aError>, tokio::task::JoinError>,
) -> Option<JsonRpcResponse> {
    let reason = match outcome {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("executor task failed: {e}"),
    };
    tracing::warn!(error = %reason, "A2A executor failed");
    Some(JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, reason))
}

/// `message/send`: run the executor to completion and answer with its last message.
async fn collect_reply(
    id: serde_json::Value,
    mut events: mpsc::Receiver<Message>,
    mut task: ExecutorTask,
) -> JsonRpcResponse {
    let mut last = None;
    while let Some(message) = events.recv().await {
        last = Some(message);
    }

    if let Some(failure) = executor_failure(id.clone(), task.join().await) {
        return failure;
    }

    match last.map(serde_json::to_value) {
        Some(Ok(message)) => JsonRpcResponse::success(id, message),
        Some(Err(e)) => JsonRpcResponse::error(
            id,
            error_codes::INTERNAL_ERROR,
            format!("could not serialize message: {e}"),
        ),
        None => JsonRpcResponse::error(
            id,
            error_codes::INTERNAL_ERROR,
            "agent produced no message",
        ),
    }
}

/// `message/stream`: one SSE event per executor message, then a final error
/// event if the executor failed.
fn event_stream(
    id: serde_json::Value,
    events: mpsc::Receiver<Message>,
    task: ExecutorTask,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (events, Some(task), id),
        |(mut events, task, id)| async move {
            if let Some(message) = events.recv().await {
                let response = match serde_json::to_value(&message) {
                    Ok(value) => JsonRpcResponse::success(id.clone(), value),
                    Err(e) => JsonRpcResponse::error(
                        id.clone(),
                        error_codes::INTERNAL_ERROR,
                        format!("could not serialize message: {e}"),
                    ),
                };
                return Some((response, (events, task, id)));
            }

            let mut task = task?;
            let failure = executor_failure(id.clone(), task.join().await)?;
            Some((failure, (events, None, id)))
        },
    )
    .map(|response| {
        let data = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::agent_card::{extended_card, public_card, AgentMode};
    use crate::a2a::executor::{DispatchExecutor, HelloWorldExecutor};
    use crate::agent_core::{DirectiveResolver, Dispatcher, Session, SessionOptions};
    use crate::mcp_client::CapabilityRegistry;
    use crate::sse::parse_sse_body;
    use crate::test_support::{ScriptedModel, ScriptedTransport};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FailingExecutor;

    #[async_trait]
    impl AgentExecutor for FailingExecutor {
        async fn execute(
            &self,
            _context: RequestContext,
            _events: mpsc::Sender<Message>,
        ) -> Result<(), A2aError> {
            Err(A2aError::Executor {
                reason: "boom".into(),
            })
        }
    }

    fn test_state(executor: Arc<dyn AgentExecutor>, token: Option<&str>) -> A2aState {
        let public = public_card("http://localhost:9999/", AgentMode::HelloWorld);
        A2aState {
            executor,
            extended_card: Arc::new(extended_card(&public)),
            public_card: Arc::new(public),
            extended_card_token: token.map(str::to_string),
        }
    }

    fn hello_router() -> Router {
        build_router(test_state(Arc::new(HelloWorldExecutor), None))
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    async fn get_json(
        app: Router,
        uri: &str,
        auth: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().uri(uri);
        if let Some(auth) = auth {
            req = req.header("authorization", auth);
        }
        let resp = app
            .oneshot(req.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = resp.status();
        (status, serde_json::from_str(&body_string(resp).await).expect("json"))
    }

    fn rpc_request(method: &str, params: serde_json::Value) -> Request<Body> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "req-1",
            "method": method,
            "params": params,
        });
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn user_message_params() -> serde_json::Value {
        serde_json::json!({
            "message": {
                "role": "user",
                "parts": [{"kind": "text", "text": "hi"}],
                "messageId": "m-1"
            }
        })
    }

    #[tokio::test]
    async fn test_agent_card_endpoints() {
        for uri in ["/.well-known/agent-card.json", "/.well-known/agent.json"] {
            let (status, card) = get_json(hello_router(), uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(card["name"], "Hello World Agent");
            assert_eq!(card["capabilities"]["streaming"], true);
        }
    }

    #[tokio::test]
    async fn test_extended_card_open_without_token() {
        let (status, card) =
            get_json(hello_router(), "/agent/authenticatedExtendedCard", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["version"], "1.0.1");
        assert_eq!(card["skills"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_extended_card_requires_configured_token() {
        let app = build_router(test_state(Arc::new(HelloWorldExecutor), Some("s3cret")));

        let (status, _) = get_json(app.clone(), "/agent/authenticatedExtendedCard", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = get_json(
            app.clone(),
            "/agent/authenticatedExtendedCard",
            Some("Bearer wrong"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, card) =
            get_json(app, "/agent/authenticatedExtendedCard", Some("Bearer s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["name"], "Hello World Agent - Extended Edition");
    }

    #[tokio::test]
    async fn test_message_send() {
        let resp = hello_router()
            .oneshot(rpc_request("message/send", user_message_params()))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["result"]["kind"], "message");
        assert_eq!(json["result"]["role"], "agent");
        assert_eq!(json["result"]["parts"][0]["text"], "Hello World");
    }

    #[tokio::test]
    async fn test_message_stream() {
        let resp = hello_router()
            .oneshot(rpc_request("message/stream", user_message_params()))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let events = parse_sse_body(&body_string(resp).await);
        assert_eq!(events.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["result"]["parts"][0]["text"], "Hello World");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let resp = hello_router()
            .oneshot(rpc_request("tasks/get", serde_json::json!({"id": "t"})))
            .await
            .expect("response");
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let resp = hello_router()
            .oneshot(rpc_request("message/send", serde_json::json!({"text": "hi"})))
            .await
            .expect("response");
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("not json"))
            .expect("request");
        let resp = hello_router().oneshot(req).await.expect("response");
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"]["code"], error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_well_formed_json_that_is_not_a_request() {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(r#"{"id": 7, "params": {}}"#))
            .expect("request");
        let resp = hello_router().oneshot(req).await.expect("response");
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(json["id"], 7);
    }

    /// A dispatch agent whose model takes 200 ms to pick the `create-lead` tool.
    fn slow_dispatch_router() -> (Router, Arc<ScriptedTransport>) {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(
                    "tools/list",
                    serde_json::json!({"tools": [{"name": "create-lead", "inputSchema": {}}]}),
                )
                .respond("resources/list", serde_json::json!({"resources": []}))
                .respond("prompts/list", serde_json::json!({"prompts": []}))
                .respond(
                    "tools/call",
                    serde_json::json!({"content": [{"type": "text", "text": "created"}]}),
                ),
        );
        let model = ScriptedModel::replies([
            r#"{"kind": "tool", "name": "create-lead", "arguments": {}}"#,
        ])
        .with_delay(Duration::from_millis(200));
        let session = Session::new(
            transport.clone(),
            Arc::new(CapabilityRegistry::new()),
            DirectiveResolver::new(Arc::new(model)),
            Dispatcher::default(),
            SessionOptions::default(),
        );
        let executor = DispatchExecutor::new(Arc::new(session));
        (build_router(test_state(Arc::new(executor), None)), transport)
    }

    #[tokio::test]
    async fn test_stream_disconnect_cancels_dispatch() {
        let (app, transport) = slow_dispatch_router();

        let resp = app
            .oneshot(rpc_request("message/stream", user_message_params()))
            .await
            .expect("response");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.calls_to("tools/list"), 1);

        // Client goes away while the model is still choosing
        drop(resp);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.calls_to("tools/call"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_send_cancels_dispatch() {
        let (app, transport) = slow_dispatch_router();

        let send = app.oneshot(rpc_request("message/send", user_message_params()));
        assert!(tokio::time::timeout(Duration::from_millis(50), send)
            .await
            .is_err());
        assert_eq!(transport.calls_to("tools/list"), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.calls_to("tools/call"), 0);
    }

    #[tokio::test]
    async fn test_executor_failure_is_internal_error() {
        let app = build_router(test_state(Arc::new(FailingExecutor), None));
        let resp = app
            .clone()
            .oneshot(rpc_request("message/send", user_message_params()))
            .await
            .expect("response");
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"]["code"], error_codes::INTERNAL_ERROR);
        assert!(json["error"]["message"].as_str().unwrap().contains("boom"));

        let resp = app
            .oneshot(rpc_request("message/stream", user_message_params()))
            .await
            .expect("response");
        let events = parse_sse_body(&body_string(resp).await);
        assert_eq!(events.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(json["error"]["code"], error_codes::INTERNAL_ERROR);
    }
}

//! Agent executors: what the A2A server does with an incoming message.
//!
//! An executor receives the user message and emits zero or more agent
//! messages through a bounded channel. A closed channel means the consumer
//! went away (e.g. a streaming client disconnected) and the executor stops.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::a2a::errors::A2aError;
use crate::a2a::types::Message;
use crate::agent_core::Session;

/// The message being handled.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub message: Message,
}

impl RequestContext {
    pub fn new(message: Message) -> Self {
        Self { message }
    }

    /// The user's text, all text parts joined.
    pub fn user_input(&self) -> String {
        self.message.text()
    }
}

/// Handles one incoming A2A message.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        context: RequestContext,
        events: mpsc::Sender<Message>,
    ) -> Result<(), A2aError>;
}

/// Send one event; `false` when the consumer has gone.
async fn emit(events: &mpsc::Sender<Message>, message: Message) -> bool {
    if events.send(message).await.is_err() {
        tracing::debug!("event consumer closed, stopping executor");
        return false;
    }
    true
}

// ─── HelloWorldExecutor ──────────────────────────────────────────────────────

/// Answers every message with "Hello World".
pub struct HelloWorldExecutor;

#[async_trait]
impl AgentExecutor for HelloWorldExecutor {
    async fn execute(
        &self,
        context: RequestContext,
        events: mpsc::Sender<Message>,
    ) -> Result<(), A2aError> {
        tracing::info!(message_id = %context.message.message_id, "hello world request");
        emit(&events, Message::agent_text("Hello World")).await;
        Ok(())
    }
}

// ─── DispatchExecutor ────────────────────────────────────────────────────────

/// Runs one dispatch turn per message and replies with the invocation result
/// as JSON text.
pub struct DispatchExecutor {
    session: Arc<Session>,
}

impl DispatchExecutor {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl AgentExecutor for DispatchExecutor {
    async fn execute(
        &self,
        context: RequestContext,
        events: mpsc::Sender<Message>,
    ) -> Result<(), A2aError> {
        let user_input = context.user_input();
        if user_input.trim().is_empty() {
            return Err(A2aError::Executor {
                reason: "message has no text".into(),
            });
        }
        tracing::info!(message_id = %context.message.message_id, "dispatch request");

        // A consumer that leaves mid-turn cancels the turn.
        let outcome = tokio::select! {
            biased;
            _ = events.closed() => {
                tracing::debug!("event consumer closed, abandoning dispatch turn");
                return Ok(());
            }
            outcome = self.session.turn(&user_input) => outcome,
        };
        let outcome = outcome.map_err(|e| A2aError::Executor {
            reason: e.to_string(),
        })?;

        let text = serde_json::to_string(&outcome.result)
            .map_err(|e| A2aError::Executor {
                reason: format!("could not serialize result: {e}"),
            })?;

        let mut reply = Message::agent_text(text);
        reply.context_id = context.message.context_id.clone();
        emit(&events, reply).await;
        Ok(())
    }
}

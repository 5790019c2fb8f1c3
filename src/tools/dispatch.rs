use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::{JoinError, JoinHandle};

use super::registry::{ToolContext, ToolOutput, ToolRegistry};
use crate::observer::ObserverBroadcaster;
use crate::protocol::ClientEvent;
use crate::protocol::models::Item;
use crate::session::SessionStore;
use crate::{Error, ErrorKind};

/// Lifecycle of one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Received,
    Validated,
    Executing,
    Completed,
    Failed,
}

/// Why a call ended in [`CallState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ParseError,
    UnknownFunction,
    InvalidArguments,
    ExecutionFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments as produced by the model.
    pub arguments: String,
}

impl ToolCall {
    #[must_use]
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Extract a call from a finished `function_call` output item.
    #[must_use]
    pub fn from_item(item: &Item) -> Option<Self> {
        match item {
            Item::FunctionCall { call_id, name, arguments, .. } => {
                Some(Self::new(call_id.clone(), name.clone(), arguments.clone()))
            }
            _ => None,
        }
    }
}

/// Outcome of a dispatched call. Always produced, success or not.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    /// Either [`CallState::Completed`] or [`CallState::Failed`].
    pub state: CallState,
    pub failure: Option<FailureKind>,
    /// Payload the model sees.
    pub output: Value,
}

impl ToolResult {
    fn completed(call: ToolCall, output: Value) -> Self {
        Self {
            call_id: call.call_id,
            name: call.name,
            state: CallState::Completed,
            failure: None,
            output,
        }
    }

    fn failed(call: ToolCall, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id,
            name: call.name,
            state: CallState::Failed,
            failure: Some(kind),
            output: json!({ "error": { "kind": kind, "message": message.into() } }),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.state, CallState::Completed)
    }

    /// The `function_call_output` item addressed by this result's call id.
    #[must_use]
    pub fn output_event(&self) -> ClientEvent {
        ClientEvent::function_call_output(self.call_id.clone(), self.output.to_string())
    }

    /// The result event followed by the continuation request.
    #[must_use]
    pub fn continuation(&self) -> [ClientEvent; 2] {
        [self.output_event(), ClientEvent::response_create()]
    }
}

/// Runs model-issued function calls against a [`ToolRegistry`] and applies
/// their side effects to the session.
#[derive(Clone, Debug)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    store: SessionStore,
    observers: Option<ObserverBroadcaster>,
}

impl ToolDispatcher {
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>, store: SessionStore) -> Self {
        Self {
            registry,
            store,
            observers: None,
        }
    }

    /// Push session changes made by handlers to observers.
    #[must_use]
    pub fn with_observers(mut self, observers: ObserverBroadcaster) -> Self {
        self.observers = Some(observers);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Drive one call to a terminal state.
    ///
    /// Never fails: parse errors, unknown names, invalid arguments, handler
    /// errors and handler panics all come back as a failed [`ToolResult`]
    /// carrying the original call id.
    pub async fn dispatch(&self, session_id: &str, call: ToolCall) -> ToolResult {
        let mut state = CallState::Received;
        tracing::debug!(call_id = %call.call_id, tool = %call.name, ?state, "tool call");

        let arguments = match parse_arguments(&call.arguments) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(call_id = %call.call_id, tool = %call.name, "unparseable tool arguments: {err}");
                return ToolResult::failed(call, FailureKind::ParseError, format!("arguments are not valid JSON: {err}"));
            }
        };
        state = CallState::Validated;
        tracing::trace!(call_id = %call.call_id, ?state);

        let Some(tool) = self.registry.resolve(&call.name) else {
            tracing::warn!(call_id = %call.call_id, tool = %call.name, "unknown function");
            let message = Error::UnknownTool(call.name.clone()).to_string();
            return ToolResult::failed(call, FailureKind::UnknownFunction, message);
        };
        if let Err(err) = tool.validate(&arguments) {
            tracing::warn!(call_id = %call.call_id, tool = %call.name, "rejected tool arguments: {err}");
            return ToolResult::failed(call, FailureKind::InvalidArguments, err.to_string());
        }

        state = CallState::Executing;
        tracing::debug!(call_id = %call.call_id, tool = %call.name, ?state);
        let ctx = ToolContext {
            session_id: session_id.to_string(),
            context: self.store.get(session_id).map(|s| s.context).unwrap_or_default(),
        };
        let outcome = HandlerTask(tokio::spawn(tool.call(arguments, ctx))).await;

        match outcome {
            Ok(Ok(output)) => {
                self.apply_side_effects(session_id, &call, &output);
                tracing::debug!(call_id = %call.call_id, tool = %call.name, state = ?CallState::Completed);
                ToolResult::completed(call, output.output)
            }
            Ok(Err(err)) if err.kind() == ErrorKind::ToolValidation => {
                tracing::warn!(call_id = %call.call_id, tool = %call.name, "handler rejected arguments: {err}");
                ToolResult::failed(call, FailureKind::InvalidArguments, err.to_string())
            }
            Ok(Err(err)) => {
                tracing::error!(call_id = %call.call_id, tool = %call.name, kind = %err.kind(), "tool handler failed: {err}");
                ToolResult::failed(call, FailureKind::ExecutionFailed, "the tool failed to complete")
            }
            Err(join) => {
                tracing::error!(call_id = %call.call_id, tool = %call.name, "tool handler aborted: {join}");
                ToolResult::failed(call, FailureKind::ExecutionFailed, "the tool failed to complete")
            }
        }
    }

    fn apply_side_effects(&self, session_id: &str, call: &ToolCall, output: &ToolOutput) {
        let mut changed = false;
        if let Some(patch) = &output.context {
            changed |= self.store.merge_context(session_id, patch.clone());
        }
        if let Some(action) = &output.action {
            changed |= self.store.set_pending_action(session_id, action.clone());
        }
        if (output.context.is_some() || output.action.is_some()) && !changed {
            tracing::debug!(call_id = %call.call_id, session_id, "session gone, dropping tool side effects");
        }
        if changed {
            if let Some(observers) = &self.observers {
                observers.notify(session_id);
            }
        }
    }
}

fn parse_arguments(raw: &str) -> serde_json::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw)
}

/// Join handle that aborts the handler when the dispatch is dropped.
struct HandlerTask<T>(JoinHandle<T>);

impl<T> Future for HandlerTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for HandlerTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PendingAction;

    fn dispatcher(registry: ToolRegistry) -> (ToolDispatcher, SessionStore, String) {
        let store = SessionStore::new();
        let id = store.create();
        (ToolDispatcher::new(Arc::new(registry), store.clone()), store, id)
    }

    #[tokio::test]
    async fn parse_error_keeps_call_id() {
        let (dispatcher, _, id) = dispatcher(ToolRegistry::new());
        let result = dispatcher.dispatch(&id, ToolCall::new("c1", "anything", "{not json")).await;
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.failure, Some(FailureKind::ParseError));
        assert_eq!(result.output["error"]["kind"], "parse_error");
    }

    #[tokio::test]
    async fn empty_arguments_are_an_empty_object() {
        let mut registry = ToolRegistry::new();
        registry.register("ping", None, json!({ "type": "object" }), |args, _| async move {
            Ok(ToolOutput::new(args))
        });
        let (dispatcher, _, id) = dispatcher(registry);
        let result = dispatcher.dispatch(&id, ToolCall::new("c1", "ping", "")).await;
        assert!(result.is_success());
        assert_eq!(result.output, json!({}));
    }

    #[tokio::test]
    async fn panicking_handler_fails_generically() {
        let mut registry = ToolRegistry::new();
        registry.register("boom", None, json!({}), |_, _| async move {
            if true {
                panic!("handler bug");
            }
            Ok(ToolOutput::default())
        });
        let (dispatcher, _, id) = dispatcher(registry);
        let result = dispatcher.dispatch(&id, ToolCall::new("c9", "boom", "{}")).await;
        assert_eq!(result.call_id, "c9");
        assert_eq!(result.failure, Some(FailureKind::ExecutionFailed));
        assert!(!result.output.to_string().contains("handler bug"));
    }

    #[tokio::test]
    async fn side_effects_land_in_session() {
        let mut registry = ToolRegistry::new();
        registry.register("identify", None, json!({}), |_, _| async move {
            let mut patch = serde_json::Map::new();
            patch.insert("customer".into(), json!("Ada"));
            Ok(ToolOutput::new(json!({ "ok": true }))
                .with_context(patch)
                .with_action(PendingAction::new("open-form")))
        });
        let (dispatcher, store, id) = dispatcher(registry);
        let result = dispatcher.dispatch(&id, ToolCall::new("c2", "identify", "{}")).await;
        assert!(result.is_success());
        let session = store.get(&id).unwrap();
        assert_eq!(session.context["customer"], "Ada");
        assert_eq!(session.pending_action.unwrap().name, "open-form");
    }

    #[test]
    fn continuation_orders_output_before_response() {
        let result = ToolResult::completed(ToolCall::new("c3", "t", "{}"), json!({ "balance": 100 }));
        let [first, second] = result.continuation();
        assert!(matches!(first, ClientEvent::ConversationItemCreate { .. }));
        assert!(matches!(second, ClientEvent::ResponseCreate { .. }));
    }
}

use std::sync::Arc;
use std::time::Duration;

use call_bridge::session::PendingAction;
use call_bridge::tools::{CallState, FailureKind};
use call_bridge::{
    Error, ObserverBroadcaster, ObserverMessage, SessionStore, ToolCall, ToolDispatcher, ToolOutput,
    ToolRegistry,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, json};

#[derive(Deserialize, JsonSchema)]
struct BalanceArgs {
    account: String,
}

fn bank_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.tool_with_description("checkBalance", "Current balance of an account", |args: BalanceArgs| async move {
        if args.account.is_empty() {
            return Err(Error::ToolValidation("account must not be empty".into()));
        }
        Ok(json!({ "balance": 100 }))
    });
    tools.register("transfer", None, json!({ "type": "object" }), |_, _| async move {
        Err(Error::ToolExecution("core banking unavailable at 10.0.0.7".into()))
    });
    tools
}

fn setup(tools: ToolRegistry) -> (ToolDispatcher, SessionStore, String) {
    let store = SessionStore::new();
    let session_id = store.create();
    (ToolDispatcher::new(Arc::new(tools), store.clone()), store, session_id)
}

#[tokio::test]
async fn unknown_tool_fails_with_original_call_id() {
    let (dispatcher, _, session_id) = setup(bank_tools());
    let result = dispatcher
        .dispatch(&session_id, ToolCall::new("call_404", "closeAccount", "{}"))
        .await;
    assert_eq!(result.call_id, "call_404");
    assert_eq!(result.state, CallState::Failed);
    assert_eq!(result.failure, Some(FailureKind::UnknownFunction));
    assert_eq!(result.output["error"]["kind"], "unknown_function");
}

#[tokio::test]
async fn rejecting_handler_yields_one_generic_failure() {
    let (dispatcher, _, session_id) = setup(bank_tools());
    let result = dispatcher
        .dispatch(&session_id, ToolCall::new("call_7", "transfer", "{}"))
        .await;
    assert_eq!(result.call_id, "call_7");
    assert_eq!(result.failure, Some(FailureKind::ExecutionFailed));
    assert!(!result.output.to_string().contains("10.0.0.7"));

    let events = result.continuation();
    let first = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(first["item"]["call_id"], "call_7");
    assert_eq!(serde_json::to_value(&events[1]).unwrap(), json!({ "type": "response.create" }));
}

#[tokio::test]
async fn missing_required_argument_is_rejected_before_execution() {
    let (dispatcher, _, session_id) = setup(bank_tools());
    let result = dispatcher
        .dispatch(&session_id, ToolCall::new("call_1", "checkBalance", r#"{"acct":"1"}"#))
        .await;
    assert_eq!(result.failure, Some(FailureKind::InvalidArguments));
    assert!(result.output["error"]["message"].as_str().unwrap().contains("account"));
}

#[tokio::test]
async fn typed_tool_returns_payload() {
    let (dispatcher, _, session_id) = setup(bank_tools());
    let result = dispatcher
        .dispatch(&session_id, ToolCall::new("call_2", "checkBalance", r#"{"account":"12345"}"#))
        .await;
    assert!(result.is_success());
    assert_eq!(result.output, json!({ "balance": 100 }));
    let event = serde_json::to_value(result.output_event()).unwrap();
    assert_eq!(event["item"]["output"], r#"{"balance":100}"#);
}

#[tokio::test]
async fn concurrent_calls_correlate_by_call_id() {
    let mut tools = ToolRegistry::new();
    tools.register("wait", None, json!({}), |args, _| async move {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolOutput::new(json!({ "waited": ms })))
    });
    let (dispatcher, _, session_id) = setup(tools);

    let slow = dispatcher.dispatch(&session_id, ToolCall::new("slow", "wait", r#"{"ms":50}"#));
    let fast = dispatcher.dispatch(&session_id, ToolCall::new("fast", "wait", r#"{"ms":1}"#));
    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow.call_id, "slow");
    assert_eq!(slow.output["waited"], 50);
    assert_eq!(fast.call_id, "fast");
    assert_eq!(fast.output["waited"], 1);
}

#[tokio::test]
async fn context_updates_reach_observers() {
    let mut tools = ToolRegistry::new();
    tools.register("identify", None, json!({}), |_, ctx| async move {
        let mut patch = Map::new();
        patch.insert("customer".into(), json!("Ada"));
        patch.insert("session".into(), json!(ctx.session_id));
        Ok(ToolOutput::new(json!({ "found": true }))
            .with_context(patch)
            .with_action(PendingAction::new("show-customer")))
    });
    let store = SessionStore::new();
    let session_id = store.create();
    let observers = ObserverBroadcaster::new(store.clone());
    let dispatcher = ToolDispatcher::new(Arc::new(tools), store.clone()).with_observers(observers.clone());

    let mut sub = observers.subscribe(&session_id);
    let initial = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
    assert!(matches!(initial, ObserverMessage::SessionUpdate { .. }));

    let result = dispatcher.dispatch(&session_id, ToolCall::new("c1", "identify", "{}")).await;
    assert!(result.is_success());

    match tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap() {
        ObserverMessage::SessionUpdate { data, .. } => {
            assert_eq!(data["customer"], "Ada");
            assert_eq!(data["session"], json!(session_id));
        }
        other => panic!("unexpected message: {other:?}"),
    }
    match tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap() {
        ObserverMessage::Action { action, .. } => assert_eq!(action, "show-customer"),
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(store.get(&session_id).unwrap().pending_action.is_none());
}

use call_bridge::error::ApiErrorType;
use call_bridge::protocol::models::Item;
use call_bridge::protocol::{ClientEvent, ObserverMessage, ServerEvent, TelephonyEvent};
use serde_json::json;

#[test]
fn test_audio_delta_deserialization() {
    let json = json!({
        "type": "response.audio.delta",
        "event_id": "evt_1",
        "response_id": "resp_1",
        "item_id": "item_1",
        "output_index": 0,
        "content_index": 0,
        "delta": "AAAA"
    });
    let event: ServerEvent = serde_json::from_value(json).expect("Failed to deserialize audio delta");
    match event {
        ServerEvent::ResponseAudioDelta { response_id, delta, .. } => {
            assert_eq!(response_id, "resp_1");
            assert_eq!(delta, "AAAA");
        }
        other => panic!("Wrong event type: {other:?}"),
    }
}

#[test]
fn test_output_audio_delta_alias() {
    let json = json!({ "type": "response.output_audio.delta", "response_id": "r", "delta": "AAAA" });
    let event: ServerEvent = serde_json::from_value(json).unwrap();
    assert_eq!(event.event_type(), "response.audio.delta");
}

#[test]
fn test_function_call_item_done() {
    let json = json!({
        "type": "response.output_item.done",
        "event_id": "evt_2",
        "response_id": "resp_1",
        "output_index": 0,
        "item": {
            "id": "item_7",
            "type": "function_call",
            "status": "completed",
            "name": "checkBalance",
            "call_id": "call_1",
            "arguments": "{\"account\":\"12345\"}"
        }
    });
    let event: ServerEvent = serde_json::from_value(json).unwrap();
    let ServerEvent::ResponseOutputItemDone { item, .. } = event else {
        panic!("Wrong event type");
    };
    match item {
        Item::FunctionCall { name, call_id, arguments, .. } => {
            assert_eq!(name, "checkBalance");
            assert_eq!(call_id, "call_1");
            assert_eq!(arguments, r#"{"account":"12345"}"#);
        }
        other => panic!("unexpected item: {other:?}"),
    }
}

#[test]
fn test_message_item_done_keeps_raw_item() {
    let json = json!({
        "type": "response.output_item.done",
        "response_id": "resp_1",
        "output_index": 0,
        "item": { "id": "item_8", "type": "message", "role": "assistant", "content": [] }
    });
    let event: ServerEvent = serde_json::from_value(json).unwrap();
    assert!(matches!(
        event,
        ServerEvent::ResponseOutputItemDone { item: Item::Unknown(_), .. }
    ));
}

#[test]
fn test_unknown_event_round_trips() {
    let json = json!({ "type": "rate_limits.updated", "event_id": "evt_3", "rate_limits": [] });
    let event: ServerEvent = serde_json::from_value(json.clone()).unwrap();
    assert!(matches!(event, ServerEvent::Unknown(_)));
    assert_eq!(event.event_id(), Some("evt_3"));
    assert_eq!(serde_json::to_value(&event).unwrap(), json);
}

#[test]
fn test_error_event_with_unrecognised_type() {
    let json = json!({
        "type": "error",
        "event_id": "evt_4",
        "error": { "type": "brand_new_error", "code": "x", "message": "boom", "param": null, "event_id": null }
    });
    let event: ServerEvent = serde_json::from_value(json).unwrap();
    match event {
        ServerEvent::Error { error, .. } => {
            assert_eq!(error.error_type, ApiErrorType::Unknown);
            assert_eq!(error.message, "boom");
        }
        other => panic!("Wrong event type: {other:?}"),
    }
}

#[test]
fn test_session_updated_ignores_extra_fields() {
    let json = json!({
        "type": "session.updated",
        "event_id": "evt_5",
        "session": {
            "id": "sess_1",
            "object": "realtime.session",
            "model": "gpt-4o-realtime-preview",
            "input_audio_format": "pcm16",
            "voice": "alloy",
            "tools": []
        }
    });
    let event: ServerEvent = serde_json::from_value(json).unwrap();
    match event {
        ServerEvent::SessionUpdated { session, .. } => assert_eq!(session.id.as_deref(), Some("sess_1")),
        other => panic!("Wrong event type: {other:?}"),
    }
}

#[test]
fn test_continuation_wire_shape() {
    let output = ClientEvent::function_call_output("call_1", r#"{"balance":100}"#);
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({
            "type": "conversation.item.create",
            "item": { "type": "function_call_output", "call_id": "call_1", "output": "{\"balance\":100}" }
        })
    );
    assert_eq!(
        serde_json::to_value(ClientEvent::response_create()).unwrap(),
        json!({ "type": "response.create" })
    );
}

#[test]
fn test_telephony_media_and_stop() {
    let media: TelephonyEvent = serde_json::from_value(json!({
        "event": "media",
        "sequenceNumber": "4",
        "media": { "track": "inbound", "chunk": "2", "timestamp": "5", "payload": "//8=" },
        "streamSid": "MZ1"
    }))
    .unwrap();
    match media {
        TelephonyEvent::Media { media, .. } => assert_eq!(media.decode().unwrap(), vec![0xFF, 0xFF]),
        other => panic!("Wrong event type: {other:?}"),
    }
    let stop: TelephonyEvent =
        serde_json::from_value(json!({ "event": "stop", "streamSid": "MZ1", "stop": { "callSid": "CA1" } }))
            .unwrap();
    assert!(matches!(stop, TelephonyEvent::Stop { .. }));
}

#[test]
fn test_observer_messages() {
    let update = ObserverMessage::SessionUpdate {
        data: serde_json::from_value(json!({ "customer": "Ada" })).unwrap(),
        session: None,
    };
    assert_eq!(
        serde_json::to_value(&update).unwrap(),
        json!({ "type": "session-update", "data": { "customer": "Ada" } })
    );
    let action = ObserverMessage::Action { action: "open-form".into(), data: None };
    assert_eq!(
        serde_json::to_value(&action).unwrap(),
        json!({ "type": "action", "action": "open-form" })
    );
}

#[test]
fn test_client_events_are_limited_to_bridge_traffic() {
    for kind in ["input_audio_buffer.append", "response.create", "response.cancel"] {
        let mut json = json!({ "type": kind });
        if kind == "input_audio_buffer.append" {
            json["audio"] = json!("AAA=");
        }
        let event: ClientEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_type(), kind);
    }
    assert!(serde_json::from_value::<ClientEvent>(json!({ "type": "input_audio_buffer.clear" })).is_err());
}

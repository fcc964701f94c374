//! Responses API stream events
//!
//! SSE framing is handled by `eventsource-stream`; this module only decides
//! what each event's payload means for the delta stream.

use serde_json::Value;

/// What a Responses API event means for the delta stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    Delta(String),
    Error(String),
    Done,
    Ignore,
}

/// Interpret one event. `event` is the SSE event name (empty when absent);
/// the payload's own `type` takes precedence over it.
pub fn interpret(event: &str, data: &str) -> StreamSignal {
    if data.trim() == "[DONE]" {
        return StreamSignal::Done;
    }
    let Ok(payload) = serde_json::from_str::<Value>(data) else {
        return StreamSignal::Ignore;
    };
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(event);

    match kind {
        "response.output_text.delta" => StreamSignal::Delta(
            payload
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        "response.completed" => StreamSignal::Done,
        "error" => StreamSignal::Error(error_message(&payload)),
        "response.failed" | "response.incomplete" => StreamSignal::Error(
            payload
                .pointer("/response/error/message")
                .or_else(|| payload.pointer("/response/incomplete_details/reason"))
                .and_then(Value::as_str)
                .unwrap_or(kind)
                .to_string(),
        ),
        _ if payload.get("error").is_some_and(|e| !e.is_null()) => {
            StreamSignal::Error(error_message(&payload))
        }
        _ => StreamSignal::Ignore,
    }
}

fn error_message(payload: &Value) -> String {
    payload
        .get("message")
        .or_else(|| payload.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| payload.get("error").map(Value::to_string))
        .unwrap_or_else(|| "unknown error".to_string())
}

use serde_json::Value;

use crate::protocol::event::{StreamEvent, KNOWN_EVENT_TYPES};

/// Receiver of typed stream events. Exactly one method is called per
/// dispatched frame.
pub trait EventHandler {
    fn on_status(&mut self, message: String);
    fn on_text(&mut self, delta: String);
    fn on_partial_image(&mut self, image_b64: String, index: u64);
    fn on_image(&mut self, image_url: String, content: Option<String>);
    /// A whole response in one frame (`both` / `text_solo`).
    fn on_result(&mut self, content: String, image_url: Option<String>);
    fn on_done(&mut self);
    fn on_error(&mut self, message: String);

    /// True once no further event can change the handler's outcome. The
    /// read loop stops and drops the transport as soon as this holds.
    fn is_finished(&self) -> bool {
        false
    }
}

/// What happened to one frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Routed to a handler method.
    Handled(&'static str),
    /// Valid JSON with a `type` this client does not know. Skipped.
    Unknown,
    /// Not valid structured data, no `type`, or missing required fields. Skipped.
    Malformed,
}

/// Parse one frame payload into a typed event.
///
/// # Errors
///
/// Returns the outcome describing why the payload cannot be dispatched.
pub fn parse_event(payload: &str) -> Result<StreamEvent, DispatchOutcome> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, payload_len = payload.len(), "skipping malformed frame");
            return Err(DispatchOutcome::Malformed);
        }
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        tracing::warn!("skipping frame without a type discriminator");
        return Err(DispatchOutcome::Malformed);
    };
    if !KNOWN_EVENT_TYPES.contains(&kind) {
        tracing::debug!(event_type = kind, "ignoring unknown event type");
        return Err(DispatchOutcome::Unknown);
    }
    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|err| {
        tracing::warn!(event_type = %kind, error = %err, "skipping frame with invalid fields");
        DispatchOutcome::Malformed
    })
}

/// Route an already-parsed event to its handler method.
pub fn dispatch_event<H: EventHandler + ?Sized>(event: StreamEvent, handler: &mut H) -> DispatchOutcome {
    let name = event.type_name();
    match event {
        StreamEvent::Status { message } => handler.on_status(message),
        StreamEvent::Text { content } => handler.on_text(content),
        StreamEvent::PartialImage { image_b64, index } => handler.on_partial_image(image_b64, index),
        StreamEvent::ImageSolo { image_url, content } => handler.on_image(image_url, content),
        StreamEvent::Both { content, image_url } => handler.on_result(content, image_url),
        StreamEvent::TextSolo { content } => handler.on_result(content, None),
        StreamEvent::Done => handler.on_done(),
        StreamEvent::Error { message } => handler.on_error(message),
    }
    DispatchOutcome::Handled(name)
}

/// Parse a frame payload and route it. Unparseable or unknown payloads are
/// logged and skipped; they never abort the stream.
pub fn dispatch<H: EventHandler + ?Sized>(payload: &str, handler: &mut H) -> DispatchOutcome {
    match parse_event(payload) {
        Ok(event) => dispatch_event(event, handler),
        Err(outcome) => outcome,
    }
}

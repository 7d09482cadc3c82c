use serde::{Deserialize, Serialize};

/// `type` values this client understands.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "status",
    "text",
    "partial_image",
    "image_solo",
    "both",
    "text_solo",
    "error",
    "done",
];

/// One event carried by a `data: ` frame of the generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Advisory progress text.
    Status { message: String },
    /// One incremental text token or chunk.
    Text { content: String },
    /// Progressively refined preview. `index` is diagnostic only.
    PartialImage {
        image_b64: String,
        #[serde(default)]
        index: u64,
    },
    /// Final image result.
    ImageSolo {
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Whole text+image response sent in one frame.
    Both {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    /// Whole text response sent in one frame.
    TextSolo {
        #[serde(default)]
        content: String,
    },
    Error { message: String },
    Done,
}

impl StreamEvent {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Status { .. } => "status",
            StreamEvent::Text { .. } => "text",
            StreamEvent::PartialImage { .. } => "partial_image",
            StreamEvent::ImageSolo { .. } => "image_solo",
            StreamEvent::Both { .. } => "both",
            StreamEvent::TextSolo { .. } => "text_solo",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    /// Whether this event ends the request on the stream path.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::ImageSolo { .. }
                | StreamEvent::Both { .. }
                | StreamEvent::TextSolo { .. }
                | StreamEvent::Error { .. }
                | StreamEvent::Done
        )
    }

    /// Encode as wire text: `data: {json}\n\n`.
    #[must_use]
    pub fn to_frame(&self) -> String {
        // Serializing a derive-only enum of strings cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        data_frame(&json)
    }
}

/// Format a data-only frame around an already-encoded payload.
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

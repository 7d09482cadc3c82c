pub mod event;
pub mod image;
pub mod request;

pub use event::StreamEvent;
pub use image::ImageRef;
pub use request::{
    ChatInput, ChatRequestBody, FallbackResponse, HistoryEntry, ImageEdit, ResponseKind, Role,
};

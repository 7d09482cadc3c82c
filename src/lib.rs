pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod fallback;
pub mod generation;
pub mod observability;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod transport;

pub use client::{ChatClient, PendingRequest, Resolution};
pub use config::ClientConfig;
pub use conversation::{Conversation, Message, MessageId, MessageStatus};
pub use error::ChatError;
pub use protocol::{ChatInput, ImageRef};
pub use state::RequestId;

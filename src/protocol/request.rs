use serde::{Deserialize, Serialize};

use super::image::ImageRef;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Region edit of an existing image. The instruction is the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEdit {
    pub image: ImageRef,
    pub mask: Option<String>,
}

/// What the user submitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatInput {
    pub text: String,
    pub image: Option<ImageRef>,
    pub edit: Option<ImageEdit>,
}

impl ChatInput {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    #[must_use]
    pub fn with_edit(mut self, image: ImageRef, mask: Option<String>) -> Self {
        self.edit = Some(ImageEdit { image, mask });
        self
    }
}

/// One prior message sent along as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRegion {
    pub image_url: ImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_data: Option<String>,
}

/// Body shared by the streaming and the non-streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub user_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_image: Option<ImageRef>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_region: Option<ImageRegion>,
}

impl ChatRequestBody {
    #[must_use]
    pub fn new(input: &ChatInput, history: Vec<HistoryEntry>) -> Self {
        Self {
            user_input: input.text.clone(),
            user_image: input.image.clone(),
            conversation_history: history,
            image_region: input.edit.as_ref().map(|edit| ImageRegion {
                image_url: edit.image.clone(),
                mask_data: edit.mask.clone(),
            }),
        }
    }
}

/// Shape of a non-streaming answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    #[serde(alias = "text")]
    TextSolo,
    #[serde(alias = "image")]
    ImageSolo,
    Both,
}

/// Body returned by the non-streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageRef>,
}

impl FallbackResponse {
    /// The image to commit, honouring `kind`: a text-only answer never carries one.
    #[must_use]
    pub fn committed_image(&self) -> Option<ImageRef> {
        match self.kind {
            ResponseKind::TextSolo => None,
            ResponseKind::ImageSolo | ResponseKind::Both => self.image_url.clone(),
        }
    }
}

use std::borrow::Cow;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const INLINE_PNG_PREFIX: &str = "data:image/png;base64,";

/// Root-relative paths the backend serves stored images under.
const BACKEND_IMAGE_PATHS: [&str; 2] = ["/images/", "/image-proxy/"];

/// Reference to an image: either a remote address or an inline encoded payload.
///
/// On the wire both shapes are a plain string; [`ImageRef::from_wire`] decides
/// which one a string is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Inline(String),
}

impl ImageRef {
    /// Classify a raw wire string.
    ///
    /// `http(s)://` addresses and the backend's image paths are addresses;
    /// everything else is an inline payload. Bare base64 JPEG starts with
    /// `/9j/`, so a leading slash alone does not make an address.
    #[must_use]
    pub fn from_wire(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let is_address = raw.starts_with("http://")
            || raw.starts_with("https://")
            || BACKEND_IMAGE_PATHS.iter().any(|path| raw.starts_with(path));
        if is_address {
            ImageRef::Url(raw)
        } else {
            ImageRef::Inline(raw)
        }
    }

    /// The string exactly as it travels on the wire.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            ImageRef::Url(url) => url,
            ImageRef::Inline(payload) => payload,
        }
    }

    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, ImageRef::Inline(_))
    }

    /// A URI a renderer can load directly.
    ///
    /// Bare base64 payloads get a PNG media-type prefix.
    #[must_use]
    pub fn display_uri(&self) -> Cow<'_, str> {
        match self {
            ImageRef::Url(url) => Cow::Borrowed(url),
            ImageRef::Inline(payload) if payload.starts_with("data:") => Cow::Borrowed(payload),
            ImageRef::Inline(payload) => {
                let mut out = String::with_capacity(INLINE_PNG_PREFIX.len() + payload.len());
                out.push_str(INLINE_PNG_PREFIX);
                out.push_str(payload);
                Cow::Owned(out)
            }
        }
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ImageRef::from_wire)
    }
}

//! Outbound automation commands.

use std::fmt;

/// One outbound command awaiting execution. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub enum Action {
    SendText {
        referer: String,
        chat_id: i64,
        text: String,
    },
    /// `image` is the base64 payload exactly as submitted.
    SendPhoto {
        chat_id: i64,
        image: String,
    },
    /// Images are sent in the order given.
    SendPhotoSet {
        chat_id: i64,
        images: Vec<String>,
    },
}

impl Action {
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::SendText { chat_id, .. }
            | Self::SendPhoto { chat_id, .. }
            | Self::SendPhotoSet { chat_id, .. } => *chat_id,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendText { .. } => "text",
            Self::SendPhoto { .. } => "photo",
            Self::SendPhotoSet { .. } => "photo_set",
        }
    }
}

// Image payloads can be megabytes; log sizes instead of contents.
impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendText {
                referer,
                chat_id,
                text,
            } => f
                .debug_struct("SendText")
                .field("referer", referer)
                .field("chat_id", chat_id)
                .field("text", text)
                .finish(),
            Self::SendPhoto { chat_id, image } => f
                .debug_struct("SendPhoto")
                .field("chat_id", chat_id)
                .field("payload_len", &image.len())
                .finish(),
            Self::SendPhotoSet { chat_id, images } => f
                .debug_struct("SendPhotoSet")
                .field("chat_id", chat_id)
                .field("count", &images.len())
                .finish(),
        }
    }
}

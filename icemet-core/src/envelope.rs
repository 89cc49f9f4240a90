//! The tagged union carried on every pipeline queue.

use icemet_model::Image;

/// Marks the boundary between two archived batches of holograms (package mode) or a control
/// message (currently just `Quit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Quit,
}

/// Metadata describing a package boundary, carried without the (already-consumed) pixel data.
#[derive(Debug, Clone, Default)]
pub struct PackageBoundary {
    pub source: String,
    pub frame_count: usize,
}

/// What flows between stages: exactly one of an `Image`, a package boundary marker, or a control
/// message. Every stage's main loop matches on this exhaustively.
#[derive(Debug, Clone)]
pub enum Envelope {
    Image(Box<Image>),
    Package(PackageBoundary),
    Message(Message),
}

impl Envelope {
    pub fn image(image: Image) -> Self {
        Envelope::Image(Box::new(image))
    }

    pub fn quit() -> Self {
        Envelope::Message(Message::Quit)
    }

    pub fn is_quit(&self) -> bool {
        matches!(self, Envelope::Message(Message::Quit))
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Envelope::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<Image> {
        match self {
            Envelope::Image(img) => Some(*img),
            _ => None,
        }
    }
}

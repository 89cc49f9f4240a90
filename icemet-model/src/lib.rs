//! Shared value types for the ICEMET holographic particle pipeline.
//!
//! Every type here is plain data: no I/O, no threading, no database access. Higher layers
//! (`icemet-core`) own the behavior that operates on these types.

pub mod datetime;
pub mod error;
pub mod file;
pub mod focus;
pub mod image;
pub mod particle;
pub mod rows;
pub mod segment;
pub mod zrange;

pub use datetime::{DateTime, Timestamp};
pub use error::{Error, Result};
pub use file::{File, FileStatus};
pub use focus::FocusMethod;
pub use image::{Buffer8, Image, ImageStatus};
pub use particle::Particle;
pub use rows::{MetaRow, ParticleRow, StatsRow};
pub use segment::{Rect, Segment};
pub use zrange::ZRange;

//! Holographic reconstruction, particle extraction and the bounded-queue worker pipeline.
//!
//! Stages are plain OS threads connected by bounded [`crossbeam_channel`] queues carrying
//! [`Envelope`]s. Numerically heavy work (FFT propagation, focus search) lives in [`hologram`];
//! everything else is a thin, single-threaded consumer/producer loop per stage.

pub mod analysis;
pub mod bgsub;
pub mod database;
pub mod envelope;
pub mod error;
pub mod hologram;
pub mod imgops;
pub mod math;
pub mod preproc;
pub mod queue;
pub mod recon;
pub mod saver;
pub mod source;
pub mod stage;
pub mod stats;

pub use envelope::Envelope;
pub use error::{Error, Result};
pub use queue::{BoundedQueue, QueueReceiver, QueueSender};
pub use stage::Stage;

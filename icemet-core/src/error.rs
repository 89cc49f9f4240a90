use thiserror::Error;

/// Top-level error for everything that can go wrong inside the pipeline engine.
///
/// Every stage surfaces its own concern-specific error first (see the `*Error` variants below);
/// a stage's main loop converts any of these into a logged critical event and a process exit,
/// per the pipeline's "prefer termination over partial corruption" policy.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] icemet_model::Error),

    #[error("preproc: {0}")]
    Preproc(String),

    #[error("recon: {0}")]
    Recon(String),

    #[error("analysis: {0}")]
    Analysis(String),

    #[error("stats: {0}")]
    Stats(String),

    #[error("source: {0}")]
    Source(String),

    #[error("database: {0}")]
    Database(#[from] DatabaseError),

    #[error("hologram: {0}")]
    Hologram(String),

    #[error("package archive error: {0}")]
    Package(String),
}

/// Errors from the database writer. A connection loss gets exactly one reconnect attempt; a
/// second failure (or any statement error) is [`DatabaseError::Fatal`].
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("statement error: {0}")]
    Statement(String),

    #[error("fatal database error after reconnect attempt: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

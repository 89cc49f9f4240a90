use thiserror::Error;

/// Errors produced by value-type constructors and parsers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid status character: {0:?}")]
    InvalidStatus(char),

    #[error("invalid z-range: z0={z0} z1={z1} dz0={dz0} dz1={dz1}")]
    InvalidZRange {
        z0: f32,
        z1: f32,
        dz0: f32,
        dz1: f32,
    },

    #[error("invalid bgsub stack length {0}: must be odd and in 3..=25")]
    InvalidStackLen(usize),

    #[error("invalid datetime string: {0}")]
    InvalidDateTime(String),

    #[error("unknown focus method: {0}")]
    InvalidFocusMethod(String),
}

pub type Result<T> = std::result::Result<T, Error>;

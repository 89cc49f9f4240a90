use thiserror::Error;

/// Everything that can go wrong loading and validating a config file.
///
/// `-t` (validate-only) runs this path end to end without touching the filesystem beyond reading
/// the file, and without ever constructing a database connection or a stage.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("couldn't read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("couldn't parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{field}: out of range ({reason})")]
    OutOfRange { field: &'static str, reason: String },

    #[error("{field}: invalid value ({reason})")]
    InvalidValue { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

//! YAML configuration loading and validation.
//!
//! [`RawConfig`] mirrors the flat YAML key namespace exactly; [`Config::load`] parses and then
//! validates it into the nested, typed form every other crate consumes. A bad config is always
//! caught here, before any stage, queue, or database connection is constructed — this is what
//! makes the CLI's `-t` validate-only mode meaningful.

pub mod config;
pub mod error;
pub mod raw;

pub use config::{
    BgSubConfig, Config, DbConfig, DiamCorrConfig, EmptyCheckConfig, FilterConfig, HoloConfig, ImgConfig,
    ParticleConfig, PathsConfig, SavesConfig, SegmentConfig, StatsConfig, TypesConfig,
};
pub use error::{ConfigError, Result};
pub use raw::RawConfig;

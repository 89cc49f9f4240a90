//! Command-line surface.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "icemet-server", version, about = "Holographic particle measurement server")]
pub struct Args {
    /// Validate the config file and exit.
    #[arg(short = 't')]
    pub test_config: bool,

    /// Particles only: no stats sink.
    #[arg(short = 'p')]
    pub particles_only: bool,

    /// Stats only: particles are replayed from the database instead of watched holograms.
    #[arg(short = 's')]
    pub stats_only: bool,

    /// Drain whatever is already present in the watch directory, then exit.
    #[arg(short = 'Q')]
    pub drain_only: bool,

    /// Enable debug logging.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Path to the YAML config file.
    pub config: PathBuf,
}

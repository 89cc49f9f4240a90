use crate::datetime::DateTime;
use crate::segment::Rect;

/// One row of the `particles` table.
#[derive(Debug, Clone)]
pub struct ParticleRow {
    pub id: Option<u64>,
    pub dt: DateTime,
    pub sensor: u8,
    pub frame: u32,
    /// Index of this particle within its source frame.
    pub particle: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub equiv_diam: f32,
    pub equiv_diam_corr: f32,
    pub circularity: f32,
    pub dyn_range: u8,
    pub eff_px_sz: f32,
    pub sub: Rect,
}

/// One row of the `stats` table.
#[derive(Debug, Clone)]
pub struct StatsRow {
    pub id: Option<u64>,
    pub dt: DateTime,
    pub lwc: f32,
    pub mvd: f32,
    pub conc: f32,
    pub frames: u32,
    pub particles: u32,
    pub temp: Option<f32>,
    pub wind: Option<f32>,
}

/// One row of the `meta` table, written once per run.
#[derive(Debug, Clone)]
pub struct MetaRow {
    pub id: Option<u64>,
    pub dt: DateTime,
    pub particles_table: String,
    pub stats_table: String,
    pub version: String,
    /// Full YAML configuration snapshot for this run.
    pub config: String,
}

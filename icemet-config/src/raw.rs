//! The flat key namespace as it appears in the YAML file, deserialized verbatim with no
//! validation. [`crate::Config::load`] turns this into the validated, nested [`crate::Config`].

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub path_watch: String,
    pub path_results: String,

    pub sql_host: String,
    pub sql_port: u16,
    pub sql_user: String,
    pub sql_passwd: String,
    pub sql_database: String,
    pub sql_table_particles: String,
    pub sql_table_stats: String,
    pub sql_table_meta: String,

    pub type_results: String,
    pub type_results_lossy: String,

    pub img_x: i32,
    pub img_y: i32,
    pub img_w: u32,
    pub img_h: u32,
    pub img_ignore_x: u32,
    pub img_ignore_y: u32,
    pub img_rotation: f64,

    pub bgsub_stack_len: i64,

    pub empty_th_original: i32,
    pub empty_th_preproc: i32,
    pub empty_th_recon: i32,
    pub noisy_th_recon: i32,

    pub filt_lowpass: f32,

    pub holo_z0: f32,
    pub holo_z1: f32,
    pub holo_dz0: f32,
    pub holo_dz1: f32,
    pub holo_pixel_size: f32,
    pub holo_lambda: f32,
    pub holo_distance: f32,
    pub recon_step: i64,
    pub focus_step: f64,
    pub focus_method: String,
    pub focus_method_small: String,

    pub segment_th_factor: f64,
    pub segment_size_min: u32,
    pub segment_size_max: u32,
    pub segment_size_small: u32,
    pub segment_pad: i32,
    pub segment_scale: u32,

    pub particle_th_factor: f64,
    pub particle_z_min: f64,
    pub particle_z_max: f64,
    pub particle_diam_min: f64,
    pub particle_diam_max: f64,
    pub particle_diam_step: f64,
    pub particle_circ_min: f64,
    pub particle_circ_max: f64,
    pub particle_dynrange_min: u8,
    pub particle_dynrange_max: u8,

    pub diam_corr: bool,
    pub diam_corr_d0: f64,
    pub diam_corr_d1: f64,
    pub diam_corr_f0: f64,
    pub diam_corr_f1: f64,

    pub stats_time: i64,
    pub stats_frames: i64,
    #[serde(default)]
    pub stats_temp: Option<f64>,
    #[serde(default)]
    pub stats_wind: Option<f64>,

    pub ocl_device: String,

    pub save_results: String,
    pub save_empty: bool,
    pub save_skipped: bool,

    #[serde(default)]
    pub log_level: Option<String>,
}

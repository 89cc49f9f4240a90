//! The validated, nested configuration. Every [`Config::load`] call either returns a fully
//! consistent `Config` or a [`ConfigError`] naming the offending key — no partially-valid state
//! is ever handed to a stage.

use crate::error::{ConfigError, Result};
use crate::raw::RawConfig;
use icemet_model::FocusMethod;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Table names are interpolated directly into SQL text (see `icemet-core`'s database writer), so
/// they're restricted to plain identifiers up front rather than trusted as arbitrary strings.
static SQL_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

fn sql_ident(field: &'static str, name: &str) -> Result<()> {
    if SQL_IDENT.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            reason: format!("{name:?} is not a plain SQL identifier (letters, digits, underscore)"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub watch: PathBuf,
    /// `path_results/<database>/<table_particles>`, matching the reference layout so results
    /// from different sensors/tables never collide under one `path_results` root.
    pub results: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub passwd: String,
    pub database: String,
    pub table_particles: String,
    pub table_stats: String,
    pub table_meta: String,
}

#[derive(Debug, Clone)]
pub struct TypesConfig {
    pub results: String,
    pub lossy: String,
}

#[derive(Debug, Clone)]
pub struct ImgConfig {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    pub ignore_x: u32,
    pub ignore_y: u32,
    pub rotation: f64,
}

#[derive(Debug, Clone)]
pub struct BgSubConfig {
    /// 0 disables background subtraction.
    pub stack_len: usize,
}

#[derive(Debug, Clone)]
pub struct EmptyCheckConfig {
    pub th_original: i32,
    pub th_preproc: i32,
    pub th_recon: i32,
    pub noisy_th_recon: i32,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Half-power frequency; `<= 0` disables the low-pass filter.
    pub lowpass_f: f32,
}

#[derive(Debug, Clone)]
pub struct HoloConfig {
    pub z0: f32,
    pub z1: f32,
    pub dz0: f32,
    pub dz1: f32,
    pub pixel_size: f32,
    pub lambda: f32,
    pub distance: f32,
    pub recon_step: usize,
    pub focus_step: f64,
    pub focus_method: FocusMethod,
    pub focus_method_small: FocusMethod,
}

#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub th_factor: f64,
    pub size_min: u32,
    pub size_max: u32,
    pub size_small: u32,
    pub pad: i32,
    pub scale: u32,
}

#[derive(Debug, Clone)]
pub struct ParticleConfig {
    pub th_factor: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub diam_min: f64,
    pub diam_max: f64,
    pub diam_step: f64,
    pub circ_min: f64,
    pub circ_max: f64,
    pub dynrange_min: u8,
    pub dynrange_max: u8,
}

#[derive(Debug, Clone)]
pub struct DiamCorrConfig {
    pub enabled: bool,
    pub d0: f64,
    pub d1: f64,
    pub f0: f64,
    pub f1: f64,
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub time_secs: f64,
    /// `<= 0` means "use the number of frames actually observed in the window".
    pub frames: i64,
    pub temp: Option<f64>,
    pub wind: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SavesConfig {
    pub mask: String,
    pub empty: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub db: DbConfig,
    pub types: TypesConfig,
    pub img: ImgConfig,
    pub bgsub: BgSubConfig,
    pub empty_check: EmptyCheckConfig,
    pub filter: FilterConfig,
    pub holo: HoloConfig,
    pub segment: SegmentConfig,
    pub particle: ParticleConfig,
    pub diam_corr: DiamCorrConfig,
    pub stats: StatsConfig,
    pub ocl_device: String,
    pub saves: SavesConfig,
    pub log_level: Option<String>,
}

fn focus_method(field: &'static str, raw: &str) -> Result<FocusMethod> {
    FocusMethod::from_str(raw).map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("unknown focus method {raw:?}"),
    })
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let raw: RawConfig = serde_yaml::from_str(&text)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self> {
        if raw.bgsub_stack_len != 0 && (raw.bgsub_stack_len % 2 == 0 || !(3..=25).contains(&raw.bgsub_stack_len)) {
            return Err(ConfigError::OutOfRange {
                field: "bgsub_stack_len",
                reason: "must be 0 (disabled) or an odd value in 3..=25".into(),
            });
        }

        if raw.holo_z1 <= raw.holo_z0 {
            return Err(ConfigError::OutOfRange { field: "holo_z1", reason: "must be greater than holo_z0".into() });
        }
        if raw.holo_dz0 <= 0.0 || raw.holo_dz1 <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "holo_dz0/holo_dz1",
                reason: "step sizes must be positive".into(),
            });
        }
        if raw.holo_pixel_size <= 0.0 || raw.holo_lambda <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "holo_pixel_size/holo_lambda",
                reason: "must be positive".into(),
            });
        }
        if raw.recon_step == 0 {
            return Err(ConfigError::OutOfRange { field: "recon_step", reason: "must be >= 1".into() });
        }

        if raw.segment_size_min == 0 || raw.segment_size_min > raw.segment_size_max {
            return Err(ConfigError::OutOfRange {
                field: "segment_size_min",
                reason: "must be >= 1 and <= segment_size_max".into(),
            });
        }
        if raw.segment_pad < 0 {
            return Err(ConfigError::OutOfRange { field: "segment_pad", reason: "must be >= 0".into() });
        }

        if raw.particle_diam_min > raw.particle_diam_max {
            return Err(ConfigError::OutOfRange {
                field: "particle_diam_min",
                reason: "must be <= particle_diam_max".into(),
            });
        }
        if raw.particle_z_min > raw.particle_z_max {
            return Err(ConfigError::OutOfRange {
                field: "particle_z_min",
                reason: "must be <= particle_z_max".into(),
            });
        }
        // Circularity is the Heywood factor perim/(2*sqrt(pi*area)): 1.0 for a perfect circle,
        // >1.0 for irregular shapes, so only the lower bound is constrained.
        if raw.particle_circ_min < 0.0 || raw.particle_circ_min > raw.particle_circ_max {
            return Err(ConfigError::OutOfRange {
                field: "particle_circ_min/particle_circ_max",
                reason: "circ_min must be >= 0.0 and <= circ_max".into(),
            });
        }
        if raw.particle_dynrange_min > raw.particle_dynrange_max {
            return Err(ConfigError::OutOfRange {
                field: "particle_dynrange_min",
                reason: "must be <= particle_dynrange_max".into(),
            });
        }

        if raw.diam_corr && raw.diam_corr_d0 >= raw.diam_corr_d1 {
            return Err(ConfigError::OutOfRange {
                field: "diam_corr_d0",
                reason: "must be less than diam_corr_d1 when diam_corr is enabled".into(),
            });
        }

        if raw.stats_time <= 0 {
            return Err(ConfigError::OutOfRange { field: "stats_time", reason: "must be >= 1".into() });
        }

        sql_ident("sql_database", &raw.sql_database)?;
        sql_ident("sql_table_particles", &raw.sql_table_particles)?;
        if !raw.sql_table_stats.is_empty() {
            sql_ident("sql_table_stats", &raw.sql_table_stats)?;
        }
        if !raw.sql_table_meta.is_empty() {
            sql_ident("sql_table_meta", &raw.sql_table_meta)?;
        }

        if raw.save_results.chars().any(|c| !"opmrtv".contains(c)) {
            return Err(ConfigError::InvalidValue {
                field: "save_results",
                reason: "mask may only contain the characters o, p, m, r, t, v".into(),
            });
        }

        let focus_method_v = focus_method("focus_method", &raw.focus_method)?;
        let focus_method_small_v = focus_method("focus_method_small", &raw.focus_method_small)?;

        let path_results = PathBuf::from(&raw.path_results).join(&raw.sql_database).join(&raw.sql_table_particles);

        Ok(Config {
            paths: PathsConfig { watch: PathBuf::from(&raw.path_watch), results: path_results },
            db: DbConfig {
                host: raw.sql_host,
                port: raw.sql_port,
                user: raw.sql_user,
                passwd: raw.sql_passwd,
                database: raw.sql_database,
                table_particles: raw.sql_table_particles,
                table_stats: raw.sql_table_stats,
                table_meta: raw.sql_table_meta,
            },
            types: TypesConfig { results: raw.type_results, lossy: raw.type_results_lossy },
            img: ImgConfig {
                x: raw.img_x,
                y: raw.img_y,
                w: raw.img_w,
                h: raw.img_h,
                ignore_x: raw.img_ignore_x,
                ignore_y: raw.img_ignore_y,
                rotation: raw.img_rotation,
            },
            bgsub: BgSubConfig { stack_len: raw.bgsub_stack_len.max(0) as usize },
            empty_check: EmptyCheckConfig {
                th_original: raw.empty_th_original,
                th_preproc: raw.empty_th_preproc,
                th_recon: raw.empty_th_recon,
                noisy_th_recon: raw.noisy_th_recon,
            },
            filter: FilterConfig { lowpass_f: raw.filt_lowpass },
            holo: HoloConfig {
                z0: raw.holo_z0,
                z1: raw.holo_z1,
                dz0: raw.holo_dz0,
                dz1: raw.holo_dz1,
                pixel_size: raw.holo_pixel_size,
                lambda: raw.holo_lambda,
                distance: raw.holo_distance,
                recon_step: raw.recon_step.max(1) as usize,
                focus_step: raw.focus_step,
                focus_method: focus_method_v,
                focus_method_small: focus_method_small_v,
            },
            segment: SegmentConfig {
                th_factor: raw.segment_th_factor,
                size_min: raw.segment_size_min,
                size_max: raw.segment_size_max,
                size_small: raw.segment_size_small,
                pad: raw.segment_pad,
                scale: raw.segment_scale,
            },
            particle: ParticleConfig {
                th_factor: raw.particle_th_factor,
                z_min: raw.particle_z_min,
                z_max: raw.particle_z_max,
                diam_min: raw.particle_diam_min,
                diam_max: raw.particle_diam_max,
                diam_step: raw.particle_diam_step,
                circ_min: raw.particle_circ_min,
                circ_max: raw.particle_circ_max,
                dynrange_min: raw.particle_dynrange_min,
                dynrange_max: raw.particle_dynrange_max,
            },
            diam_corr: DiamCorrConfig {
                enabled: raw.diam_corr,
                d0: raw.diam_corr_d0,
                d1: raw.diam_corr_d1,
                f0: raw.diam_corr_f0,
                f1: raw.diam_corr_f1,
            },
            stats: StatsConfig {
                time_secs: raw.stats_time as f64,
                frames: raw.stats_frames,
                temp: raw.stats_temp,
                wind: raw.stats_wind,
            },
            ocl_device: raw.ocl_device,
            saves: SavesConfig { mask: raw.save_results, empty: raw.save_empty, skipped: raw.save_skipped },
            log_level: raw.log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, overrides: &[(&str, &str)]) -> PathBuf {
        let mut fields: Vec<(&str, String)> = vec![
            ("path_watch", "\"/watch\"".into()),
            ("path_results", "\"/results\"".into()),
            ("sql_host", "\"localhost\"".into()),
            ("sql_port", "3306".into()),
            ("sql_user", "\"icemet\"".into()),
            ("sql_passwd", "\"secret\"".into()),
            ("sql_database", "\"icemet\"".into()),
            ("sql_table_particles", "\"particles\"".into()),
            ("sql_table_stats", "\"stats\"".into()),
            ("sql_table_meta", "\"meta\"".into()),
            ("type_results", "\"bmp\"".into()),
            ("type_results_lossy", "\"jpg\"".into()),
            ("img_x", "0".into()),
            ("img_y", "0".into()),
            ("img_w", "2048".into()),
            ("img_h", "2048".into()),
            ("img_ignore_x", "0".into()),
            ("img_ignore_y", "0".into()),
            ("img_rotation", "0.0".into()),
            ("bgsub_stack_len", "5".into()),
            ("empty_th_original", "10".into()),
            ("empty_th_preproc", "10".into()),
            ("empty_th_recon", "10".into()),
            ("noisy_th_recon", "0".into()),
            ("filt_lowpass", "0.1".into()),
            ("holo_z0", "0.01".into()),
            ("holo_z1", "0.1".into()),
            ("holo_dz0", "0.001".into()),
            ("holo_dz1", "0.001".into()),
            ("holo_pixel_size", "0.0000034".into()),
            ("holo_lambda", "0.000000655".into()),
            ("holo_distance", "0.01".into()),
            ("recon_step", "1".into()),
            ("focus_step", "0.001".into()),
            ("focus_method", "\"icemet\"".into()),
            ("focus_method_small", "\"std\"".into()),
            ("segment_th_factor", "2.0".into()),
            ("segment_size_min", "4".into()),
            ("segment_size_max", "4000".into()),
            ("segment_size_small", "100".into()),
            ("segment_pad", "10".into()),
            ("segment_scale", "400".into()),
            ("particle_th_factor", "2.0".into()),
            ("particle_z_min", "0.01".into()),
            ("particle_z_max", "0.1".into()),
            ("particle_diam_min", "0.00001".into()),
            ("particle_diam_max", "0.001".into()),
            ("particle_diam_step", "0.000005".into()),
            ("particle_circ_min", "0.5".into()),
            ("particle_circ_max", "1.0".into()),
            ("particle_dynrange_min", "10".into()),
            ("particle_dynrange_max", "255".into()),
            ("diam_corr", "true".into()),
            ("diam_corr_d0", "0.00001".into()),
            ("diam_corr_d1", "0.001".into()),
            ("diam_corr_f0", "1.0".into()),
            ("diam_corr_f1", "1.2".into()),
            ("stats_time", "60".into()),
            ("stats_frames", "0".into()),
            ("ocl_device", "\"cpu\"".into()),
            ("save_results", "\"oprtv\"".into()),
            ("save_empty", "false".into()),
            ("save_skipped", "false".into()),
        ];
        for (key, value) in overrides {
            if let Some(slot) = fields.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value.to_string();
            } else {
                fields.push((key, value.to_string()));
            }
        }
        let body: String = fields.iter().map(|(k, v)| format!("{k}: {v}\n")).collect();
        let path = dir.join("config.yaml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_a_well_formed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &[]);
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.bgsub.stack_len, 5);
        assert_eq!(cfg.paths.results, PathBuf::from("/results/icemet/particles"));
        assert!(matches!(cfg.holo.focus_method, FocusMethod::Icemet));
    }

    #[test]
    fn rejects_even_bgsub_stack_len() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &[("bgsub_stack_len", "4")]);
        assert!(matches!(Config::load(&path), Err(ConfigError::OutOfRange { field: "bgsub_stack_len", .. })));
    }

    #[test]
    fn rejects_inverted_z_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &[("holo_z0", "0.2"), ("holo_z1", "0.1")]);
        assert!(matches!(Config::load(&path), Err(ConfigError::OutOfRange { field: "holo_z1", .. })));
    }

    #[test]
    fn rejects_unknown_save_mask_character() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &[("save_results", "\"oprtvz\"")]);
        assert!(matches!(Config::load(&path), Err(ConfigError::InvalidValue { field: "save_results", .. })));
    }

    #[test]
    fn rejects_sql_table_with_unsafe_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &[("sql_table_particles", "\"particles; DROP TABLE x\"")]);
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidValue { field: "sql_table_particles", .. })
        ));
    }

    #[test]
    fn rejects_unknown_focus_method() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &[("focus_method", "\"bogus\"")]);
        assert!(matches!(Config::load(&path), Err(ConfigError::InvalidValue { field: "focus_method", .. })));
    }
}

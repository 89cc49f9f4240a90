//! ICEMET Server: watches for digital in-line holograms, reconstructs and measures suspended
//! particles, and writes per-particle records plus time-aggregated icing statistics.

mod cli;

use anyhow::Context;
use clap::Parser;
use icemet_config::Config;
use icemet_core::analysis::{AnalysisParams, AnalysisStage};
use icemet_core::database::{Database, DatabaseParams};
use icemet_core::preproc::{PreprocParams, PreprocStage};
use icemet_core::recon::{ReconParams, ReconStage};
use icemet_core::queue::BoundedQueue;
use icemet_core::saver::{SaveMask, SaverParams, SaverStage};
use icemet_core::source::{DatabaseSource, WatchSource};
use icemet_core::stage;
use icemet_core::stats::{StatsParams, StatsStage};
use icemet_model::{DateTime, MetaRow, Rect};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Exit codes: 0 success, 2 configuration error, 3 database connection/statement error, 4 fatal
/// processing error (raised directly by `stage::run`/`source::run`), 1 any other unanticipated
/// error via `anyhow`.
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_DATABASE_ERROR: i32 = 3;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let config_text = match std::fs::read_to_string(&args.config) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("couldn't read config file {}: {err}", args.config.display());
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    let cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("couldn't load config file {}: {err}", args.config.display());
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if args.test_config {
        println!("Config file OK");
        return Ok(());
    }

    init_logging(&cfg, args.debug);

    // OPENCV_OPENCL_DEVICE (or its CPU-only-port equivalent): read and logged for parity with the
    // reference server, but there's no GPU compute context in this port to select.
    let ocl_device = if cfg.ocl_device.is_empty() { "DEFAULT".to_string() } else { cfg.ocl_device.clone() };
    std::env::set_var("OPENCV_OPENCL_DEVICE", &cfg.ocl_device);
    tracing::info!(device = %ocl_device, "compute device configured (no-op in this CPU-only port)");

    let runtime =
        tokio::runtime::Builder::new_multi_thread().enable_all().build().context("failed to build async runtime")?;

    let stats_table = if args.particles_only { String::new() } else { cfg.db.table_stats.clone() };
    let db = Database::new(
        DatabaseParams {
            host: cfg.db.host.clone(),
            port: cfg.db.port,
            user: cfg.db.user.clone(),
            password: cfg.db.passwd.clone(),
            database: cfg.db.database.clone(),
            table_particles: cfg.db.table_particles.clone(),
            table_stats: stats_table.clone(),
            table_meta: cfg.db.table_meta.clone(),
        },
        runtime.handle().clone(),
    );
    tracing::info!(host = %cfg.db.host, port = cfg.db.port, database = %cfg.db.database, "database target");
    tracing::info!(table = %cfg.db.table_particles, "particles table");
    if !stats_table.is_empty() {
        tracing::info!(table = %stats_table, "stats table");
    }
    if !cfg.db.table_meta.is_empty() {
        if let Err(err) = db.write_meta(&MetaRow {
            id: None,
            dt: DateTime::now(),
            particles_table: cfg.db.table_particles.clone(),
            stats_table: stats_table.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: config_text,
        }) {
            tracing::error!(%err, "failed to write meta row");
            std::process::exit(EXIT_DATABASE_ERROR);
        }
    }

    let mut threads = Vec::new();

    if args.stats_only {
        let (reader_tx, reader_rx) = BoundedQueue::connect(2);

        let source = match DatabaseSource::new(&db, DateTime::from_stamp(0), DateTime::now()) {
            Ok(source) => source,
            Err(err) => {
                tracing::error!(%err, "failed to read particles for stats replay");
                std::process::exit(EXIT_DATABASE_ERROR);
            }
        };
        let stats = build_stats_stage(&cfg, db.clone(), Vec::new());

        threads.push(std::thread::spawn(move || stage::run(stats, reader_rx)));
        threads.push(std::thread::spawn(move || icemet_core::source::run(source, vec![reader_tx])));
    } else {
        let (watch_tx, watch_rx) = BoundedQueue::connect(4);
        let (preproc_tx, preproc_rx) = BoundedQueue::connect(2);
        let (recon_tx, recon_rx) = BoundedQueue::connect(2);
        let (saver_tx, saver_rx) = BoundedQueue::connect(2);

        // Analysis fans out to Saver always, and to Stats too unless running particles-only,
        // mirroring the reference server's two-sink wiring off a single Analysis stage.
        let mut analysis_outbound = vec![saver_tx];
        let stats_rx = if !args.particles_only {
            let (stats_tx, stats_rx) = BoundedQueue::connect(2);
            analysis_outbound.push(stats_tx);
            Some(stats_rx)
        } else {
            None
        };

        let watch_source = WatchSource::new(cfg.paths.watch.clone(), args.drain_only)
            .context("failed to start watching input directory")?;
        let preproc = build_preproc_stage(&cfg, vec![preproc_tx]).context("failed to build preproc stage")?;
        let recon = build_recon_stage(&cfg, vec![recon_tx]);
        let analysis = build_analysis_stage(&cfg, analysis_outbound);
        let mask = SaveMask::parse(&cfg.saves.mask);
        let saver_params = SaverParams {
            results_root: cfg.paths.results.clone(),
            mask,
            save_empty: cfg.saves.empty,
            save_skipped: cfg.saves.skipped,
            results_ext: cfg.types.results.clone(),
            preview_ext: cfg.types.lossy.clone(),
            frame_width: cfg.img.w,
            frame_height: cfg.img.h,
        };
        let saver = SaverStage::new(saver_params, db.clone(), Vec::new());

        threads.push(std::thread::spawn(move || icemet_core::source::run(watch_source, vec![watch_tx])));
        threads.push(std::thread::spawn(move || stage::run(preproc, watch_rx)));
        threads.push(std::thread::spawn(move || stage::run(recon, preproc_rx)));
        threads.push(std::thread::spawn(move || stage::run(analysis, recon_rx)));
        threads.push(std::thread::spawn(move || stage::run(saver, saver_rx)));

        if let Some(stats_rx) = stats_rx {
            let stats = build_stats_stage(&cfg, db.clone(), Vec::new());
            threads.push(std::thread::spawn(move || stage::run(stats, stats_rx)));
        }
    }

    for handle in threads {
        let _ = handle.join();
    }
    tracing::info!("done");
    Ok(())
}

fn init_logging(cfg: &Config, debug: bool) {
    let level = if debug {
        "debug"
    } else {
        match cfg.log_level.as_deref() {
            Some(level) => level,
            None => "info",
        }
    };
    let default_directive = format!("icemet_server={level},icemet_core={level},icemet_config={level}");
    let filter = std::env::var("ICEMET_LOG")
        .ok()
        .map(tracing_subscriber::EnvFilter::new)
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(default_directive));

    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

fn crop_rect(cfg: &Config) -> Rect {
    Rect::new(cfg.img.x, cfg.img.y, cfg.img.w, cfg.img.h)
}

fn build_preproc_stage(cfg: &Config, outbound: Vec<icemet_core::queue::QueueSender>) -> icemet_core::Result<PreprocStage> {
    PreprocStage::new(
        PreprocParams {
            crop: crop_rect(cfg),
            border_w: cfg.img.ignore_x,
            border_h: cfg.img.ignore_y,
            rotation_deg: cfg.img.rotation,
            bgsub_stack_len: cfg.bgsub.stack_len,
            empty_th_original: cfg.empty_check.th_original,
            empty_th_preproc: cfg.empty_check.th_preproc,
            empty_th_recon: cfg.empty_check.th_recon,
            noisy_th_recon: cfg.empty_check.noisy_th_recon,
            segment_th_factor: cfg.segment.th_factor,
            psz: cfg.holo.pixel_size,
            lambda: cfg.holo.lambda,
            dist: cfg.holo.distance,
            z0: cfg.holo.z0,
            z1: cfg.holo.z1,
            dz0: cfg.holo.dz0,
            dz1: cfg.holo.dz1,
        },
        outbound,
    )
}

fn build_recon_stage(cfg: &Config, outbound: Vec<icemet_core::queue::QueueSender>) -> ReconStage {
    ReconStage::new(
        ReconParams {
            crop: crop_rect(cfg),
            border_w: cfg.img.ignore_x,
            border_h: cfg.img.ignore_y,
            psz: cfg.holo.pixel_size,
            lambda: cfg.holo.lambda,
            dist: cfg.holo.distance,
            z0: cfg.holo.z0,
            z1: cfg.holo.z1,
            dz0: cfg.holo.dz0,
            dz1: cfg.holo.dz1,
            recon_step: cfg.holo.recon_step,
            focus_step: cfg.holo.focus_step,
            focus_method: cfg.holo.focus_method,
            focus_method_small: cfg.holo.focus_method_small,
            lowpass_f: cfg.filter.lowpass_f,
            segment_th_factor: cfg.segment.th_factor,
            size_min: cfg.segment.size_min,
            size_max: cfg.segment.size_max,
            size_small: cfg.segment.size_small,
            pad: cfg.segment.pad,
            segment_n_max: 0,
        },
        outbound,
    )
}

fn build_analysis_stage(cfg: &Config, outbound: Vec<icemet_core::queue::QueueSender>) -> AnalysisStage {
    AnalysisStage::new(
        AnalysisParams {
            th_factor: cfg.particle.th_factor,
            border_w: cfg.img.ignore_x,
            border_h: cfg.img.ignore_y,
            psz: cfg.holo.pixel_size,
            dist: cfg.holo.distance,
            scale: cfg.segment.scale,
            diam_corr_enabled: cfg.diam_corr.enabled,
            diam_corr_d0: cfg.diam_corr.d0,
            diam_corr_d1: cfg.diam_corr.d1,
            diam_corr_f0: cfg.diam_corr.f0,
            diam_corr_f1: cfg.diam_corr.f1,
        },
        outbound,
    )
}

fn build_stats_stage(cfg: &Config, db: Database, outbound: Vec<icemet_core::queue::QueueSender>) -> StatsStage<Database> {
    StatsStage::new(
        StatsParams {
            img_w: cfg.img.w,
            img_h: cfg.img.h,
            border_w: cfg.img.ignore_x,
            border_h: cfg.img.ignore_y,
            psz: cfg.holo.pixel_size,
            dist: cfg.holo.distance,
            z_min: cfg.particle.z_min,
            z_max: cfg.particle.z_max,
            diam_min: cfg.particle.diam_min,
            diam_max: cfg.particle.diam_max,
            circ_min: cfg.particle.circ_min,
            circ_max: cfg.particle.circ_max,
            dyn_range_min: cfg.particle.dynrange_min,
            dyn_range_max: cfg.particle.dynrange_max,
            time_secs: cfg.stats.time_secs,
            configured_frames: cfg.stats.frames,
        },
        db,
        outbound,
    )
}

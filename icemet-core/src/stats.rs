//! Time-windowed statistical aggregator.

use crate::envelope::PackageBoundary;
use crate::math::{magnf, vcone};
use crate::queue::QueueSender;
use crate::stage::Stage;
use icemet_model::{DateTime, Image, ImageStatus, StatsRow, Timestamp};
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct StatsParams {
    pub img_w: u32,
    pub img_h: u32,
    pub border_w: u32,
    pub border_h: u32,
    pub psz: f32,
    pub dist: f32,
    pub z_min: f64,
    pub z_max: f64,
    pub diam_min: f64,
    pub diam_max: f64,
    pub circ_min: f64,
    pub circ_max: f64,
    pub dyn_range_min: u8,
    pub dyn_range_max: u8,
    /// Window length, seconds.
    pub time_secs: f64,
    /// `<= 0` means "use the number of frames actually observed in the window".
    pub configured_frames: i64,
}

pub struct StatsStage<W> {
    params: StatsParams,
    /// Measurement volume (m^3) of the truncated cone between z_min and z_max; computed once.
    measurement_volume: f64,
    window_millis: i64,
    current: Option<DateTime>,
    previous: Option<DateTime>,
    diameters: Vec<f64>,
    frames: i64,
    skipped: i64,
    writer: W,
    outbound: Vec<QueueSender>,
}

/// Abstracts the database write so this stage's windowing logic can be exercised without a live
/// database.
pub trait StatsWriter {
    fn write_stats(&mut self, row: &StatsRow) -> crate::Result<()>;
}

impl<W: StatsWriter> StatsStage<W> {
    pub fn new(params: StatsParams, writer: W, outbound: Vec<QueueSender>) -> Self {
        let wpx = params.img_w.saturating_sub(2 * params.border_w) as f64;
        let hpx = params.img_h.saturating_sub(2 * params.border_h) as f64;
        let area_px = wpx * hpx;
        let psz_z0 = params.psz as f64 / magnf(params.dist as f64, params.z_min);
        let psz_z1 = params.psz as f64 / magnf(params.dist as f64, params.z_max);
        let a_z0 = area_px * psz_z0 * psz_z0;
        let a_z1 = area_px * psz_z1 * psz_z1;
        let measurement_volume = vcone(params.z_max - params.z_min, a_z0, a_z1);
        let window_millis = (params.time_secs * 1000.0) as i64;

        Self {
            params,
            measurement_volume,
            window_millis,
            current: None,
            previous: None,
            diameters: Vec::new(),
            frames: 0,
            skipped: 0,
            writer,
            outbound,
        }
    }

    fn reset(&mut self) {
        self.diameters.clear();
        self.frames = 0;
        self.skipped = 0;
    }

    fn particle_valid(&self, particle: &icemet_model::Particle) -> bool {
        particle.is_accepted(
            self.params.z_min,
            self.params.z_max,
            self.params.diam_min,
            self.params.diam_max,
            self.params.circ_min,
            self.params.circ_max,
            self.params.dyn_range_min,
            self.params.dyn_range_max,
        )
    }

    fn aligned(&self, stamp: Timestamp) -> DateTime {
        DateTime::from_stamp((stamp / self.window_millis) * self.window_millis)
    }

    fn fill_row(&self, dt: DateTime) -> StatsRow {
        let frames = (if self.params.configured_frames > 0 { self.params.configured_frames } else { self.frames })
            - self.skipped;
        let particles = self.diameters.len() as u32;
        if particles == 0 {
            return StatsRow {
                id: None,
                dt,
                lwc: 0.0,
                mvd: 0.0,
                conc: 0.0,
                frames: frames.max(0) as u32,
                particles: 0,
                temp: None,
                wind: None,
            };
        }

        let mut diam = self.diameters.clone();
        diam.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let volumes: Vec<f64> = diam.iter().map(|d| 4.0 / 3.0 * PI * (d / 2.0).powi(3)).collect();
        let v_tot: f64 = volumes.iter().sum();
        let v_meas = self.measurement_volume * frames.max(1) as f64;
        let lwc = v_tot * 1.0e6 / v_meas;

        let v_half = v_tot / 2.0;
        let mut v_sum = 0.0;
        let mut k = 0usize;
        for (i, &v) in volumes.iter().enumerate() {
            v_sum += v;
            k = i;
            if v_sum > v_half {
                break;
            }
        }
        let mvd = if k == 0 {
            diam[0]
        } else {
            let v0 = volumes[k - 1];
            let v1 = volumes[k];
            let v_cum0: f64 = volumes[..k].iter().sum();
            let v_mvd = v0 + (v_half - v_cum0) / v1 * (v1 - v0);
            2.0 * (v_mvd / (4.0 / 3.0 * PI)).powf(1.0 / 3.0)
        };

        let conc = particles as f64 / v_meas;

        StatsRow {
            id: None,
            dt,
            lwc: lwc as f32,
            mvd: mvd as f32,
            conc: conc as f32,
            frames: frames.max(0) as u32,
            particles,
            temp: None,
            wind: None,
        }
    }

    fn emit_point(&mut self) -> crate::Result<()> {
        let dt = self.current.expect("emit_point called without an open window");
        let row = self.fill_row(dt);
        tracing::info!(
            lwc = row.lwc,
            mvd_um = row.mvd * 1.0e6,
            conc_per_cm3 = row.conc / 1.0e6,
            "stats window closed"
        );
        self.writer.write_stats(&row)
    }

    fn finalize_if_distinct(&mut self) -> crate::Result<()> {
        if self.current.is_some() && self.current != self.previous {
            self.emit_point()?;
            self.previous = self.current;
            self.reset();
        }
        Ok(())
    }

    fn process(&mut self, image: &Image) -> crate::Result<()> {
        let stamp = image.file.dt.stamp();
        match self.current {
            None => self.current = Some(self.aligned(stamp)),
            Some(cur) if stamp - cur.stamp() >= self.window_millis => {
                self.finalize_if_distinct()?;
                self.current = Some(self.aligned(stamp));
            }
            _ => {}
        }

        let mut valid = 0;
        for particle in &image.particles {
            if self.particle_valid(particle) {
                self.diameters.push(particle.diam_corr);
                valid += 1;
            }
        }
        self.frames += 1;
        if image.status == ImageStatus::Skip {
            self.skipped += 1;
        }
        tracing::debug!(valid, "frame processed");
        Ok(())
    }
}

impl<W: StatsWriter> Stage for StatsStage<W> {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn outbound(&self) -> &[QueueSender] {
        &self.outbound
    }

    fn process_image(&mut self, image: Image) -> crate::Result<Vec<Image>> {
        self.process(&image)?;
        Ok(Vec::new())
    }

    fn on_package(&mut self, _boundary: &PackageBoundary) -> crate::Result<()> {
        self.finalize_if_distinct()
    }
}

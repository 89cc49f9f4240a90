//! Per-image file + particle-row writer.

use crate::queue::QueueSender;
use crate::stage::Stage;
use icemet_model::{Buffer8, File, Image, ImageStatus, ParticleRow};
use std::path::PathBuf;

/// Which derived buffers get written to disk, parsed from the `o p m r t v` config mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveMask {
    pub original: bool,
    pub preproc: bool,
    pub min: bool,
    pub recon: bool,
    pub threshold: bool,
    pub preview: bool,
}

impl SaveMask {
    pub fn parse(mask: &str) -> Self {
        Self {
            original: mask.contains('o'),
            preproc: mask.contains('p'),
            min: mask.contains('m'),
            recon: mask.contains('r'),
            threshold: mask.contains('t'),
            preview: mask.contains('v'),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaverParams {
    pub results_root: PathBuf,
    pub mask: SaveMask,
    /// Whether recon/threshold/preview buffers are still written for `EMPTY`/`SKIP` frames.
    pub save_empty: bool,
    pub save_skipped: bool,
    /// Extension used for lossless result images (preproc/min/recon/threshold).
    pub results_ext: String,
    /// Extension used for the (lossy) preview mosaic.
    pub preview_ext: String,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Abstracts the database write so this stage's file-writing logic can be exercised without a
/// live database.
pub trait ParticleWriter {
    fn write_particle(&mut self, row: &ParticleRow) -> crate::Result<()>;
}

pub struct SaverStage<W> {
    params: SaverParams,
    writer: W,
    outbound: Vec<QueueSender>,
}

impl<W: ParticleWriter> SaverStage<W> {
    pub fn new(params: SaverParams, writer: W, outbound: Vec<QueueSender>) -> Self {
        Self { params, writer, outbound }
    }

    fn write_buffer(path: &std::path::Path, buf: &Buffer8) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let gray = image::GrayImage::from_raw(buf.width, buf.height, buf.data.clone())
            .ok_or_else(|| crate::Error::Preproc(format!("bad buffer dimensions writing {}", path.display())))?;
        gray.save(path)
            .map_err(|e| crate::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(())
    }

    /// Moves (or deletes) the watched source file; runs for every frame regardless of status,
    /// since the watch directory must always be drained.
    fn save_original(&self, file: &File) -> crate::Result<()> {
        if file.path.as_os_str().is_empty() {
            return Ok(());
        }
        if self.params.mask.original {
            let root = self.params.results_root.join("original");
            std::fs::create_dir_all(file.dir(&root))?;
            let ext = file.path.extension().and_then(|e| e.to_str()).unwrap_or("png");
            let dst = file.result_path(&root, ext, None);
            if dst.exists() {
                std::fs::remove_file(&dst)?;
            }
            std::fs::rename(&file.path, &dst)?;
        } else {
            std::fs::remove_file(&file.path)?;
        }
        Ok(())
    }

    fn save_preproc(&self, file: &File, preproc: &Buffer8) -> crate::Result<()> {
        if !self.params.mask.preproc || preproc.is_empty() {
            return Ok(());
        }
        let root = self.params.results_root.join("preproc");
        let dst = file.result_path(&root, &self.params.results_ext, None);
        Self::write_buffer(&dst, preproc)
    }

    fn save_min(&self, file: &File, min: &Buffer8) -> crate::Result<()> {
        if !self.params.mask.min || min.is_empty() {
            return Ok(());
        }
        let root = self.params.results_root.join("min");
        let dst = file.result_path(&root, &self.params.results_ext, None);
        Self::write_buffer(&dst, min)
    }

    /// Whether recon/threshold/preview buffers are written for this frame's status.
    fn wants_detail(&self, status: ImageStatus) -> bool {
        match status {
            ImageStatus::NotEmpty => true,
            ImageStatus::Empty => self.params.save_empty,
            ImageStatus::Skip => self.params.save_skipped,
            ImageStatus::None => false,
        }
    }

    fn save_recon(&self, image: &Image) -> crate::Result<()> {
        if !self.params.mask.recon || !self.wants_detail(image.status) {
            return Ok(());
        }
        let root = self.params.results_root.join("recon");
        for (i, segment) in image.segments.iter().enumerate() {
            let tile = Buffer8::new(segment.tile.clone(), segment.tile_width, segment.tile_height);
            let dst = image.file.result_path(&root, &self.params.results_ext, Some(i as u32 + 1));
            Self::write_buffer(&dst, &tile)?;
        }
        Ok(())
    }

    fn save_threshold(&self, image: &Image) -> crate::Result<()> {
        if !self.params.mask.threshold || !self.wants_detail(image.status) {
            return Ok(());
        }
        let root = self.params.results_root.join("threshold");
        for (i, particle) in image.particles.iter().enumerate() {
            let mask = Buffer8::new(particle.mask.clone(), particle.mask_width, particle.mask_height);
            let dst = image.file.result_path(&root, &self.params.results_ext, Some(i as u32 + 1));
            Self::write_buffer(&dst, &mask)?;
        }
        Ok(())
    }

    /// Builds the preview mosaic: each segment's particle mask, contrast-stretched between its
    /// own Otsu threshold and white, composited onto a black canvas at its `rect_pad` position.
    fn build_preview(&self, image: &Image) -> Buffer8 {
        let (w, h) = (self.params.frame_width, self.params.frame_height);
        let mut canvas = vec![0u8; (w as u64 * h as u64) as usize];
        for (segment, particle) in image.segments.iter().zip(image.particles.iter()) {
            let mask = &particle.mask;
            if mask.is_empty() {
                continue;
            }
            let inverted: Vec<u8> = mask.iter().map(|&p| 255 - p).collect();
            let th = crate::math::otsu_threshold(&inverted);
            let rect = segment.rect_pad;
            for y in 0..rect.height.min(particle.mask_height) {
                for x in 0..rect.width.min(particle.mask_width) {
                    let src_i = (y * particle.mask_width + x) as usize;
                    let dst_x = rect.x + x as i32;
                    let dst_y = rect.y + y as i32;
                    if dst_x < 0 || dst_y < 0 || dst_x as u32 >= w || dst_y as u32 >= h {
                        continue;
                    }
                    let dst_i = (dst_y as u32 * w + dst_x as u32) as usize;
                    canvas[dst_i] = crate::math::adjust_u8(inverted[src_i], th, 255, 0, 255);
                }
            }
        }
        Buffer8::new(canvas, w, h)
    }

    fn save_preview(&self, image: &Image) -> crate::Result<()> {
        if !self.params.mask.preview || !self.wants_detail(image.status) {
            return Ok(());
        }
        let preview = self.build_preview(image);
        let root = self.params.results_root.join("preview");
        let dst = image.file.result_path(&root, &self.params.preview_ext, None);
        Self::write_buffer(&dst, &preview)
    }

    /// Writes one `ParticleRow` per accepted particle. A single write failure is logged and the
    /// remaining particles are still attempted; the underlying database error still escalates to
    /// a fatal process exit once it bubbles out of `process_image` (per the database writer's
    /// reconnect-once-then-fatal policy).
    fn save_particles(&mut self, image: &Image) -> crate::Result<()> {
        for (i, (segment, particle)) in image.segments.iter().zip(image.particles.iter()).enumerate() {
            let row = ParticleRow {
                id: None,
                dt: image.file.dt,
                sensor: image.file.sensor,
                frame: image.file.frame,
                particle: i as u32 + 1,
                x: particle.x as f32,
                y: particle.y as f32,
                z: particle.z as f32,
                equiv_diam: particle.diam as f32,
                equiv_diam_corr: particle.diam_corr as f32,
                circularity: particle.circularity as f32,
                dyn_range: particle.dyn_range,
                eff_px_sz: particle.eff_px_sz as f32,
                sub: segment.rect_orig,
            };
            if let Err(err) = self.writer.write_particle(&row) {
                tracing::error!(particle = i + 1, %err, "failed to write particle row");
                return Err(err);
            }
        }
        Ok(())
    }

    fn process(&mut self, image: &Image) -> crate::Result<()> {
        self.save_original(&image.file)?;
        self.save_preproc(&image.file, &image.preproc)?;
        self.save_min(&image.file, &image.min)?;
        self.save_recon(image)?;
        self.save_threshold(image)?;
        self.save_preview(image)?;
        self.save_particles(image)?;
        tracing::info!(name = %image.file.name(), particles = image.particles.len(), "saved");
        Ok(())
    }
}

impl<W: ParticleWriter> Stage for SaverStage<W> {
    fn name(&self) -> &'static str {
        "saver"
    }

    fn outbound(&self) -> &[QueueSender] {
        &self.outbound
    }

    fn process_image(&mut self, image: Image) -> crate::Result<Vec<Image>> {
        if image.status != ImageStatus::None {
            self.process(&image)?;
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icemet_model::{DateTime, FileStatus};

    #[test]
    fn save_mask_parses_each_character() {
        let mask = SaveMask::parse("optrmv");
        assert!(mask.original && mask.preproc && mask.threshold && mask.recon && mask.min && mask.preview);
        let none = SaveMask::parse("");
        assert!(!none.original && !none.preview);
    }

    struct RecordingWriter {
        rows: Vec<ParticleRow>,
    }

    impl ParticleWriter for RecordingWriter {
        fn write_particle(&mut self, row: &ParticleRow) -> crate::Result<()> {
            self.rows.push(row.clone());
            Ok(())
        }
    }

    fn params(dir: &std::path::Path) -> SaverParams {
        SaverParams {
            results_root: dir.to_path_buf(),
            mask: SaveMask::parse("optrmv"),
            save_empty: false,
            save_skipped: false,
            results_ext: "png".to_string(),
            preview_ext: "jpg".to_string(),
            frame_width: 8,
            frame_height: 8,
        }
    }

    #[test]
    fn writes_one_particle_row_per_accepted_particle() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(1, DateTime::new(2023, 6, 18, 14, 0, 0, 0), 1, FileStatus::NotEmpty);
        let mut image = Image::new(file, Buffer8::default());
        image.status = ImageStatus::NotEmpty;
        image.particles.push(icemet_model::Particle {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            diam: 1.0e-6,
            diam_corr: 1.0e-6,
            circularity: 1.0,
            dyn_range: 10,
            eff_px_sz: 1.0e-6,
            mask: Vec::new(),
            mask_width: 0,
            mask_height: 0,
        });
        image.segments.push(icemet_model::Segment::new(
            0.0,
            0,
            1.0,
            icemet_model::FocusMethod::Std,
            icemet_model::Rect::new(0, 0, 1, 1),
            icemet_model::Rect::new(0, 0, 1, 1),
            vec![0u8],
        ));

        let writer = RecordingWriter { rows: Vec::new() };
        let mut stage = SaverStage::new(params(dir.path()), writer, Vec::new());
        stage.process(&image).unwrap();
        assert_eq!(stage.writer.rows.len(), 1);
        assert_eq!(stage.writer.rows[0].particle, 1);
    }

    #[test]
    fn skips_detail_saves_for_empty_frames_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(1, DateTime::new(2023, 6, 18, 14, 0, 0, 0), 2, FileStatus::Empty);
        let mut image = Image::new(file, Buffer8::default());
        image.status = ImageStatus::Empty;

        let writer = RecordingWriter { rows: Vec::new() };
        let mut stage = SaverStage::new(params(dir.path()), writer, Vec::new());
        stage.process(&image).unwrap();
        assert!(!dir.path().join("recon").exists());
    }
}

//! Per-segment particle analyser + overlap resolution.
//!
//! Position math uses each segment's *padded* rect (the frame its tile was actually cropped to),
//! not the unpadded detection rect: the tile's pixel-space origin is `rect_pad`, so a centroid
//! measured inside the tile only converts back to image coordinates through `rect_pad`. Sorting
//! and overlap resolution still key off `rect_orig`, the detection footprint.

use crate::imgops;
use crate::math::{equivdiam, heywood, magnf};
use icemet_model::{Buffer8, Image, ImageStatus, Particle, Rect, Segment};
use image::{imageops, GrayImage};

const AREA_MAX_FRACTION: f64 = 0.70;

#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub th_factor: f64,
    pub border_w: u32,
    pub border_h: u32,
    pub psz: f32,
    pub dist: f32,
    /// Tiles whose smaller side is below this are upscaled to it before contour analysis.
    pub scale: u32,
    pub diam_corr_enabled: bool,
    pub diam_corr_d0: f64,
    pub diam_corr_d1: f64,
    pub diam_corr_f0: f64,
    pub diam_corr_f1: f64,
}

pub struct AnalysisStage {
    params: AnalysisParams,
    outbound: Vec<crate::queue::QueueSender>,
}

impl AnalysisStage {
    pub fn new(params: AnalysisParams, outbound: Vec<crate::queue::QueueSender>) -> Self {
        Self { params, outbound }
    }

    fn upscale_factor(&self, width: u32, height: u32) -> f64 {
        let min_dim = width.min(height);
        if self.params.scale > 0 && min_dim < self.params.scale {
            self.params.scale as f64 / min_dim as f64
        } else {
            1.0
        }
    }

    fn upscale(&self, tile: &Buffer8, factor: f64) -> Buffer8 {
        if (factor - 1.0).abs() < 1e-9 {
            return tile.clone();
        }
        let new_w = ((tile.width as f64) * factor).round().max(1.0) as u32;
        let new_h = ((tile.height as f64) * factor).round().max(1.0) as u32;
        let gray = GrayImage::from_raw(tile.width, tile.height, tile.data.clone())
            .expect("tile dimensions always match its pixel count");
        let resized = imageops::resize(&gray, new_w, new_h, imageops::FilterType::Lanczos3);
        Buffer8::new(resized.into_raw(), new_w, new_h)
    }

    /// Attempts to promote one Segment to a Particle. Returns `None` when no admissible contour
    /// survives (no contours found, global minimum falls outside the chosen contour, or the
    /// chosen contour covers too much of the tile).
    fn analyse(&self, bg_val: u8, segment: &Segment) -> Option<Particle> {
        let tile = Buffer8::new(segment.tile.clone(), segment.tile_width, segment.tile_height);
        let factor = self.upscale_factor(tile.width, tile.height);
        let upscaled = self.upscale(&tile, factor);

        let (min, max, min_idx, _max_idx) = imgops::min_max(&upscaled);
        let th = (bg_val as f64 - self.params.th_factor * (bg_val as f64 - min as f64)).clamp(0.0, 255.0) as u8;
        let thresholded = imgops::threshold_inv(&upscaled, th);
        let contours = imgops::external_contours(&thresholded);
        if contours.is_empty() {
            return None;
        }

        let center = (upscaled.width as f64 / 2.0, upscaled.height as f64 / 2.0);
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        let mut best_centroid = (0.0, 0.0);
        for (i, contour) in contours.iter().enumerate() {
            let c = imgops::centroid(&contour.points);
            let dist = ((center.0 - c.0).powi(2) + (center.1 - c.1).powi(2)).sqrt();
            if dist < best_dist {
                best_dist = dist;
                best = i;
                best_centroid = c;
            }
        }
        let chosen = &contours[best];

        let min_x = (min_idx as u32 % upscaled.width) as i32;
        let min_y = (min_idx as u32 / upscaled.width) as i32;
        if !imgops::point_in_polygon(&chosen.points, min_x, min_y) {
            return None;
        }

        let tile_rect = Rect::new(0, 0, upscaled.width, upscaled.height);
        let (_mask, area) = imgops::fill_polygon_mask(&chosen.points, tile_rect);
        if area as f64 > AREA_MAX_FRACTION * (upscaled.width * upscaled.height) as f64 {
            return None;
        }
        let perim = imgops::perimeter(&chosen.points);

        let eff_px_sz = self.params.psz as f64 / magnf(self.params.dist as f64, segment.z as f64);
        let diam = eff_px_sz * equivdiam(area as f64) / factor;
        let diam_corr = if self.params.diam_corr_enabled {
            let factor = crate::math::diam_correction_factor(
                diam,
                self.params.diam_corr_d0,
                self.params.diam_corr_d1,
                self.params.diam_corr_f0,
                self.params.diam_corr_f1,
            );
            diam * factor
        } else {
            diam
        };

        let x = eff_px_sz * (segment.rect_pad.x as f64 + best_centroid.0 / factor - self.params.border_w as f64);
        let y = eff_px_sz * (segment.rect_pad.y as f64 + best_centroid.1 / factor - self.params.border_h as f64);

        Some(Particle {
            x,
            y,
            z: segment.z as f64,
            diam,
            diam_corr,
            circularity: heywood(perim, area as f64),
            dyn_range: max.saturating_sub(min),
            eff_px_sz,
            mask: _mask.data,
            mask_width: _mask.width,
            mask_height: _mask.height,
        })
    }

    fn process(&self, image: &mut Image) {
        image.segments.sort_by(|a, b| b.rect_orig.area().cmp(&a.rect_orig.area()));

        let mut candidates: Vec<(Segment, Particle)> = Vec::new();
        for segment in image.segments.drain(..) {
            if let Some(particle) = self.analyse(image.bg_val, &segment) {
                candidates.push((segment, particle));
            }
        }

        let mut kept: Vec<(Segment, Particle)> = Vec::new();
        'candidates: for (segment, particle) in candidates {
            for (kept_segment, kept_particle) in kept.iter_mut() {
                if segment.rect_orig.intersect(&kept_segment.rect_orig).is_none() {
                    continue;
                }
                let replace = if segment.step == kept_segment.step {
                    segment.rect_orig.area() > kept_segment.rect_orig.area()
                } else if segment.method == kept_segment.method {
                    segment.score > kept_segment.score
                } else {
                    particle.dyn_range > kept_particle.dyn_range
                };
                if replace {
                    *kept_segment = segment;
                    *kept_particle = particle;
                }
                continue 'candidates;
            }
            kept.push((segment, particle));
        }

        image.segments = kept.iter().map(|(s, _)| s.clone()).collect();
        image.particles = kept.into_iter().map(|(_, p)| p).collect();
        image.status = if image.particles.is_empty() { ImageStatus::Empty } else { ImageStatus::NotEmpty };
    }
}

impl crate::stage::Stage for AnalysisStage {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn outbound(&self) -> &[crate::queue::QueueSender] {
        &self.outbound
    }

    fn process_image(&mut self, mut image: Image) -> crate::Result<Vec<Image>> {
        if image.status == ImageStatus::None {
            self.process(&mut image);
        }
        Ok(vec![image])
    }
}


//! FFT-based reconstruction + segmentation stage.

use crate::hologram::{self, FilterKind, Filter, Hologram};
use crate::imgops;
use crate::queue::QueueSender;
use crate::stage::Stage;
use icemet_model::{FocusMethod, Image, ImageStatus, Rect, Segment, ZRange};

#[derive(Debug, Clone)]
pub struct ReconParams {
    pub crop: Rect,
    pub border_w: u32,
    pub border_h: u32,
    pub psz: f32,
    pub lambda: f32,
    pub dist: f32,
    pub z0: f32,
    pub z1: f32,
    pub dz0: f32,
    pub dz1: f32,
    pub recon_step: usize,
    pub focus_step: f64,
    pub focus_method: FocusMethod,
    pub focus_method_small: FocusMethod,
    pub lowpass_f: f32,
    pub segment_th_factor: f64,
    pub size_min: u32,
    pub size_max: u32,
    pub size_small: u32,
    pub pad: i32,
    /// 0 = unlimited.
    pub segment_n_max: usize,
}

pub struct ReconStage {
    params: ReconParams,
    hologram: Hologram,
    range: ZRange,
    lowpass: Option<Filter>,
    outbound: Vec<QueueSender>,
}

impl ReconStage {
    pub fn new(params: ReconParams, outbound: Vec<QueueSender>) -> Self {
        let hologram = Hologram::new(params.psz, params.lambda, params.dist);
        let range = ZRange::new(params.z0, params.z1, params.dz0, params.dz1);
        Self { params, hologram, range, lowpass: None, outbound }
    }

    fn interior(&self, frame_w: u32, frame_h: u32) -> Rect {
        Rect {
            x: self.params.border_w as i32,
            y: self.params.border_h as i32,
            width: frame_w.saturating_sub(2 * self.params.border_w),
            height: frame_h.saturating_sub(2 * self.params.border_h),
        }
    }

    fn pad_rect(&self, rect: Rect, bounds_w: u32, bounds_h: u32) -> Rect {
        let pad = self.params.pad;
        let x = (rect.x - pad).max(0);
        let y = (rect.y - pad).max(0);
        let width = (rect.width as i32 + 2 * pad).min(bounds_w as i32 - x) as u32;
        let height = (rect.height as i32 + 2 * pad).min(bounds_h as i32 - y) as u32;
        Rect { x, y, width, height }
    }

    fn process(&mut self, image: &mut Image) -> crate::Result<()> {
        let (w, h) = (image.preproc.width, image.preproc.height);
        self.hologram.set_img(&image.preproc.data, w, h);
        if self.params.lowpass_f > 0.0 {
            if self.lowpass.is_none() {
                self.lowpass = Some(self.hologram.create_filter(self.params.lowpass_f, FilterKind::Lowpass));
            }
            self.hologram.apply_filter(self.lowpass.as_ref().unwrap());
        }

        let interior = self.interior(w, h);
        let th = (self.params.segment_th_factor * image.bg_val as f64) as u8;

        image.min = icemet_model::Buffer8::new(vec![255u8; (w * h) as usize], w, h);

        let n = self.range.n();
        if n == 0 {
            image.status = ImageStatus::Empty;
            return Ok(());
        }
        let recon_step = self.params.recon_step.max(1);
        let nsteps = n.div_ceil(recon_step);

        let mut ncontours = 0usize;
        'slabs: for step in 0..nsteps {
            let i0 = step * recon_step;
            let i1 = ((step + 1) * recon_step).min(n - 1);
            let slab = self.range.slab(i0, i1);

            let mut stack: Vec<Vec<u8>> = Vec::new();
            let mut slab_min = vec![255u8; (w * h) as usize];
            self.hologram.recon_min(&slab, &mut stack, &mut slab_min);
            for (out, &v) in image.min.data.iter_mut().zip(slab_min.iter()) {
                *out = (*out).min(v);
            }

            let slab_min_buf = icemet_model::Buffer8::new(slab_min, w, h);
            let thresholded = imgops::threshold_inv(&slab_min_buf, th);
            let contours = imgops::external_contours(&thresholded);
            ncontours += contours.len();

            for contour in &contours {
                let rect_orig = imgops::bounding_rect(&contour.points);

                let too_small =
                    self.params.size_min > 0 && (rect_orig.width < self.params.size_min || rect_orig.height < self.params.size_min);
                let too_large =
                    self.params.size_max > 0 && (rect_orig.width > self.params.size_max || rect_orig.height > self.params.size_max);
                let overlap = rect_orig.intersect(&interior).map(|r| r.area()).unwrap_or(0);
                let insufficient_overlap = (overlap as f64) < 0.5 * rect_orig.area() as f64;
                if too_small || too_large || insufficient_overlap {
                    continue;
                }

                let method = if rect_orig.width > self.params.size_small || rect_orig.height > self.params.size_small {
                    self.params.focus_method
                } else {
                    self.params.focus_method_small
                };

                let rect_pad = self.pad_rect(rect_orig, w, h);

                let (idx, score) = hologram::focus(
                    &stack,
                    rect_pad,
                    w,
                    h,
                    method,
                    0.0,
                    (slab.n().saturating_sub(1)) as f64,
                    self.params.focus_step,
                );
                let z = slab.z(idx);

                let tile_buf = icemet_model::Buffer8::new(stack[idx].clone(), w, h);
                let tile = imgops::crop(&tile_buf, rect_pad);

                image.segments.push(Segment::new(z, step as i32, score, method, rect_orig, rect_pad, tile.data));

                if self.params.segment_n_max > 0 && image.segments.len() >= self.params.segment_n_max {
                    break 'slabs;
                }
            }
        }

        if image.segments.is_empty() {
            image.status = ImageStatus::Empty;
        }
        tracing::debug!(segments = image.segments.len(), contours = ncontours, "reconstructed");
        Ok(())
    }
}

impl Stage for ReconStage {
    fn name(&self) -> &'static str {
        "recon"
    }

    fn outbound(&self) -> &[QueueSender] {
        &self.outbound
    }

    fn process_image(&mut self, mut image: Image) -> crate::Result<Vec<Image>> {
        if image.status == ImageStatus::None {
            self.process(&mut image)?;
        }
        Ok(vec![image])
    }
}

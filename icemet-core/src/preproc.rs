//! Crop/rotate/background-subtract/empty-check stage.

use crate::bgsub::BgSubStack;
use crate::hologram::{Hologram, ReconOutput};
use crate::imgops;
use crate::queue::QueueSender;
use crate::stage::Stage;
use icemet_model::{Buffer8, File, Image, ImageStatus, Rect, ZRange};

#[derive(Debug, Clone)]
pub struct PreprocParams {
    pub crop: Rect,
    pub border_w: u32,
    pub border_h: u32,
    pub rotation_deg: f64,
    /// 0 disables background subtraction.
    pub bgsub_stack_len: usize,
    /// `<= 0` disables the corresponding check.
    pub empty_th_original: i32,
    pub empty_th_preproc: i32,
    pub empty_th_recon: i32,
    pub noisy_th_recon: i32,
    pub segment_th_factor: f64,
    pub psz: f32,
    pub lambda: f32,
    pub dist: f32,
    pub z0: f32,
    pub z1: f32,
    pub dz0: f32,
    pub dz1: f32,
}

/// Mirrors the original's `m_skip` warm-up counter: each push before the ring is full either
/// replays a buffered early frame as `SKIP` (up to `len/2` times) or produces nothing.
struct Warmup {
    history: Vec<Option<File>>,
    skip_emitted: usize,
}

pub struct PreprocStage {
    params: PreprocParams,
    bgsub: Option<BgSubStack>,
    warmup: Option<Warmup>,
    hologram: Option<Hologram>,
    coarse_range: Option<ZRange>,
    outbound: Vec<QueueSender>,
}

impl PreprocStage {
    pub fn new(params: PreprocParams, outbound: Vec<QueueSender>) -> crate::Result<Self> {
        let bgsub = if params.bgsub_stack_len > 0 {
            Some(BgSubStack::new(params.bgsub_stack_len)?)
        } else {
            None
        };
        let warmup = bgsub
            .as_ref()
            .map(|s| Warmup { history: (0..s.len()).map(|_| None).collect(), skip_emitted: 0 });

        let want_recon_check = params.empty_th_recon > 0 || params.noisy_th_recon > 0;
        let (hologram, coarse_range) = if want_recon_check {
            let range = ZRange::new(params.z0, params.z1, params.dz0 * 10.0, params.dz1 * 10.0);
            (Some(Hologram::new(params.psz, params.lambda, params.dist)), Some(range))
        } else {
            (None, None)
        };

        Ok(Self { params, bgsub, warmup, hologram, coarse_range, outbound })
    }

    fn is_empty(buf: &Buffer8, th: i32) -> bool {
        if th <= 0 {
            return false;
        }
        (buf.dynamic_range() as i32) < th
    }

    /// Median pixel value + (optional) coarse recon-based empty/noisy checks.
    fn finalize(&mut self, image: &mut Image) {
        image.bg_val = crate::math::median_u8(&image.preproc.data);

        let (Some(hologram), Some(range)) = (self.hologram.as_mut(), self.coarse_range.as_ref()) else {
            return;
        };
        hologram.set_img(&image.preproc.data, image.preproc.width, image.preproc.height);
        let mut min = vec![255u8; (image.preproc.width * image.preproc.height) as usize];
        hologram.min(range, &mut min);
        let min_buf = Buffer8::new(min, image.preproc.width, image.preproc.height);

        if Self::is_empty(&min_buf, self.params.empty_th_recon) {
            image.status = ImageStatus::Empty;
            return;
        }
        if self.params.noisy_th_recon > 0 {
            let crop_rect = Rect {
                x: self.params.border_w as i32,
                y: self.params.border_h as i32,
                width: min_buf.width.saturating_sub(2 * self.params.border_w),
                height: min_buf.height.saturating_sub(2 * self.params.border_h),
            };
            let cropped = imgops::crop(&min_buf, crop_rect);
            let th = (self.params.segment_th_factor * image.bg_val as f64) as u8;
            let thresholded = imgops::threshold_inv(&cropped, th);
            let ncontours = imgops::external_contours(&thresholded).len();
            if ncontours as i32 > self.params.noisy_th_recon {
                image.status = ImageStatus::Skip;
            }
        }
    }

    fn process_no_bgsub(&mut self, image: &mut Image) {
        if Self::is_empty(&image.preproc, self.params.empty_th_preproc) {
            image.status = ImageStatus::Empty;
        } else {
            self.finalize(image);
        }
    }

    /// Returns the Images to forward: zero during the silent part of warm-up, one otherwise.
    fn process_bgsub(&mut self, mut image: Image) -> Vec<Image> {
        let bgsub = self.bgsub.as_mut().expect("process_bgsub called without a configured ring");
        let warmup = self.warmup.as_mut().expect("process_bgsub called without warm-up state");

        let write_slot = bgsub.next_write_index();
        warmup.history[write_slot] = Some(image.file.clone());

        match bgsub.push(&image.preproc) {
            Some(centered) => {
                let centered_slot = bgsub.centered_index();
                let file = warmup.history[centered_slot].clone().unwrap_or_else(|| image.file.clone());
                let mut out = Image::new(file, image.original.clone());
                out.preproc = centered;
                if Self::is_empty(&out.preproc, self.params.empty_th_preproc) {
                    out.status = ImageStatus::Empty;
                } else {
                    self.finalize(&mut out);
                }
                vec![out]
            }
            None => {
                if warmup.skip_emitted < bgsub.lag() {
                    let slot = warmup.skip_emitted;
                    warmup.skip_emitted += 1;
                    let file = warmup.history[slot].clone().unwrap_or_else(|| image.file.clone());
                    image.file = file;
                    image.preproc = Buffer8::default();
                    image.status = ImageStatus::Skip;
                    vec![image]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

impl Stage for PreprocStage {
    fn name(&self) -> &'static str {
        "preproc"
    }

    fn outbound(&self) -> &[QueueSender] {
        &self.outbound
    }

    fn process_image(&mut self, mut image: Image) -> crate::Result<Vec<Image>> {
        image.status = ImageStatus::None;

        if image.original.is_empty() {
            image.status = ImageStatus::Empty;
            return Ok(vec![image]);
        }
        if Self::is_empty(&image.original, self.params.empty_th_original) {
            image.status = ImageStatus::Empty;
            return Ok(vec![image]);
        }

        let cropped = imgops::crop(&image.original, self.params.crop);
        image.preproc = imgops::rotate_deg(&cropped, self.params.rotation_deg);

        if self.bgsub.is_none() {
            self.process_no_bgsub(&mut image);
            return Ok(vec![image]);
        }
        Ok(self.process_bgsub(image))
    }
}

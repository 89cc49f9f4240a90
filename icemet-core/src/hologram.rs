//! FFT-based angular-spectrum reconstruction kernel.
//!
//! Given a grayscale hologram, [`Hologram`] can propagate the recorded light field to any depth
//! `z`, producing an amplitude, phase or raw-complex reconstruction; [`Hologram::min`] and
//! [`Hologram::recon_min`] sweep a [`ZRange`] and keep a running per-pixel minimum, which is how
//! Preproc's coarse check and Recon's per-slab segmentation both work. [`focus`]/[`focus_rect`]
//! run the three-tap iterative 1-D search ([`s_search`]) that picks the best-focused slice out of
//! a stack of reconstructed amplitudes.

use icemet_model::{FocusMethod, ZRange};
use ndarray::Array2;
use num_complex::Complex32;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

const FILTER_ORDER: f32 = 6.0;
const FILTER_HALF_POWER: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconOutput {
    Amplitude,
    Phase,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

/// A 2-D complex filter in the frequency domain, the same padded size as the hologram it was
/// built for. Created once (lazily) and reused across every frame, since the padded size rarely
/// changes mid-run.
#[derive(Debug, Clone)]
pub struct Filter(Array2<Complex32>);

/// FFT-domain spectrum of the current hologram frame, plus the precomputed angular-spectrum
/// phase-rate field used to propagate it to any depth.
pub struct Hologram {
    psz: f32,
    lambda: f32,
    dist: f32,
    size_orig: (u32, u32),
    size_pad: (usize, usize),
    /// Per-frequency-bin z-phase rate (radians per meter of propagation); `None` for evanescent
    /// bins, which are cut rather than propagated.
    kz: Array2<Option<f32>>,
    spectrum: Array2<Complex32>,
    complex: Array2<Complex32>,
    fft_fwd_row: Option<Arc<dyn rustfft::Fft<f32>>>,
    fft_fwd_col: Option<Arc<dyn rustfft::Fft<f32>>>,
    fft_inv_row: Option<Arc<dyn rustfft::Fft<f32>>>,
    fft_inv_col: Option<Arc<dyn rustfft::Fft<f32>>>,
}

impl Hologram {
    pub fn new(psz: f32, lambda: f32, dist: f32) -> Self {
        Self {
            psz,
            lambda,
            dist,
            size_orig: (0, 0),
            size_pad: (0, 0),
            kz: Array2::from_elem((0, 0), None),
            spectrum: Array2::from_elem((0, 0), Complex32::new(0.0, 0.0)),
            complex: Array2::from_elem((0, 0), Complex32::new(0.0, 0.0)),
            fft_fwd_row: None,
            fft_fwd_col: None,
            fft_inv_row: None,
            fft_inv_col: None,
        }
    }

    pub fn magnf(dist: f32, z: f32) -> f32 {
        if dist == 0.0 {
            1.0
        } else {
            dist / (dist - z)
        }
    }

    /// Uploads a new frame. Pads to an FFT-friendly size, filling the margin with the frame's
    /// mean to suppress wrap-around, then takes the forward FFT with unitary scaling.
    pub fn set_img(&mut self, data: &[u8], width: u32, height: u32) {
        if (width, height) != self.size_orig {
            self.size_orig = (width, height);
            self.size_pad = (fast_fft_len(width as usize), fast_fft_len(height as usize));
            self.kz = build_kz_field(self.size_pad, self.psz, self.lambda);
            self.spectrum = Array2::from_elem(self.size_pad, Complex32::new(0.0, 0.0));
            self.complex = Array2::from_elem(self.size_pad, Complex32::new(0.0, 0.0));

            let mut planner = FftPlanner::new();
            self.fft_fwd_row = Some(planner.plan_fft_forward(self.size_pad.0));
            self.fft_fwd_col = Some(planner.plan_fft_forward(self.size_pad.1));
            self.fft_inv_row = Some(planner.plan_fft_inverse(self.size_pad.0));
            self.fft_inv_col = Some(planner.plan_fft_inverse(self.size_pad.1));
        }

        let mean = data.iter().map(|&p| p as f32).sum::<f32>() / data.len().max(1) as f32;
        let mut padded = Array2::from_elem(self.size_pad, Complex32::new(mean, 0.0));
        for y in 0..height as usize {
            for x in 0..width as usize {
                padded[(x, y)] = Complex32::new(data[y * width as usize + x] as f32, 0.0);
            }
        }

        self.spectrum = padded;
        fft_2d_inplace(&mut self.spectrum, self.fft_fwd_row.as_ref().unwrap(), self.fft_fwd_col.as_ref().unwrap());
        let scale = 1.0 / (self.size_pad.0 * self.size_pad.1) as f32;
        self.spectrum.mapv_inplace(|c| c * scale);
    }

    /// Pointwise complex multiply of the current spectrum by a precomputed filter.
    pub fn apply_filter(&mut self, filter: &Filter) {
        self.spectrum = &self.spectrum * &filter.0;
    }

    /// Builds a super-Gaussian filter of order 6 with the given half-power spatial frequency.
    pub fn create_filter(&self, f: f32, kind: FilterKind) -> Filter {
        let sigma = f * (1.0f32 / FILTER_HALF_POWER.powi(2)).ln().powf(-1.0 / (2.0 * FILTER_ORDER));
        let (w, h) = self.size_pad;
        let mut out = Array2::from_elem((w, h), Complex32::new(0.0, 0.0));
        let extent_u = self.psz * w as f32;
        let extent_v = self.psz * h as f32;
        for y in 0..h {
            for x in 0..w {
                let u = spatial_freq(x, w, extent_u);
                let v = spatial_freq(y, h, extent_v);
                let r = ((u / sigma).powi(2) + (v / sigma).powi(2)).powi(3);
                let lowpass = (-r).exp();
                let value = match kind {
                    FilterKind::Lowpass => lowpass,
                    FilterKind::Highpass => 1.0 - lowpass,
                };
                out[(x, y)] = Complex32::new(value, 0.0);
            }
        }
        Filter(out)
    }

    fn propagate(&mut self, z: f32) {
        let d = z * Self::magnf(self.dist, z);
        let (w, h) = self.size_pad;
        for y in 0..h {
            for x in 0..w {
                self.complex[(x, y)] = match self.kz[(x, y)] {
                    Some(kz) => {
                        let phase = kz * d;
                        self.spectrum[(x, y)] * Complex32::new(phase.cos(), phase.sin())
                    }
                    None => Complex32::new(0.0, 0.0),
                };
            }
        }
        fft_2d_inplace(&mut self.complex, self.fft_inv_row.as_ref().unwrap(), self.fft_inv_col.as_ref().unwrap());
    }

    /// Reconstructs at depth `z`, writing an amplitude/phase/complex crop back at the original
    /// (unpadded) size into `dst` (row-major).
    pub fn recon(&mut self, z: f32, output: ReconOutput, dst: &mut Vec<f32>) {
        self.propagate(z);
        let (w, h) = (self.size_orig.0 as usize, self.size_orig.1 as usize);
        dst.clear();
        dst.reserve(w * h);
        let d = z * Self::magnf(self.dist, z);
        for y in 0..h {
            for x in 0..w {
                let c = self.complex[(x, y)];
                let value = match output {
                    ReconOutput::Amplitude => c.norm(),
                    ReconOutput::Phase => {
                        let phase = c.im.atan2(c.re);
                        phase + 2.0 * PI * d / self.lambda
                    }
                    ReconOutput::Complex => c.re, // caller uses recon_complex for the full value
                };
                dst.push(value);
            }
        }
    }

    /// Same as [`Self::recon`] but returns the raw complex field (unpadded crop).
    pub fn recon_complex(&mut self, z: f32, dst: &mut Vec<Complex32>) {
        self.propagate(z);
        let (w, h) = (self.size_orig.0 as usize, self.size_orig.1 as usize);
        dst.clear();
        dst.reserve(w * h);
        for y in 0..h {
            for x in 0..w {
                dst.push(self.complex[(x, y)]);
            }
        }
    }

    /// Sweeps `range`, keeping a running per-pixel minimum amplitude as u8. `out` must already be
    /// sized `size_orig` and initialized to 255 on first use.
    pub fn min(&mut self, range: &ZRange, out: &mut [u8]) {
        let mut amp = Vec::new();
        for i in 0..range.n() {
            self.recon(range.z(i), ReconOutput::Amplitude, &mut amp);
            for (o, &a) in out.iter_mut().zip(amp.iter()) {
                let v = a.round().clamp(0.0, 255.0) as u8;
                *o = (*o).min(v);
            }
        }
    }

    /// Same as [`Self::min`] but also keeps every slice as a u8 amplitude buffer in `stack`
    /// (reused across calls; resized as needed).
    pub fn recon_min(&mut self, range: &ZRange, stack: &mut Vec<Vec<u8>>, out: &mut [u8]) {
        let n = range.n();
        if stack.len() < n {
            stack.resize(n, Vec::new());
        }
        let mut amp = Vec::new();
        for i in 0..n {
            self.recon(range.z(i), ReconOutput::Amplitude, &mut amp);
            let slice = amp.iter().map(|&a| a.round().clamp(0.0, 255.0) as u8).collect::<Vec<_>>();
            for (o, &v) in out.iter_mut().zip(slice.iter()) {
                *o = (*o).min(v);
            }
            stack[i] = slice;
        }
    }
}

fn spatial_freq(i: usize, n: usize, extent: f32) -> f32 {
    let centered = if i <= n / 2 { i as f32 } else { i as f32 - n as f32 };
    centered / extent
}

fn build_kz_field(size_pad: (usize, usize), psz: f32, lambda: f32) -> Array2<Option<f32>> {
    let (w, h) = size_pad;
    let extent_u = psz * w as f32;
    let extent_v = psz * h as f32;
    let k = 2.0 * PI / lambda;
    let mut out = Array2::from_elem((w, h), None);
    for y in 0..h {
        for x in 0..w {
            let u = spatial_freq(x, w, extent_u);
            let v = spatial_freq(y, h, extent_v);
            let arg = 1.0 - (lambda * u).powi(2) - (lambda * v).powi(2);
            out[(x, y)] = if arg >= 0.0 { Some(k * arg.sqrt()) } else { None };
        }
    }
    out
}

/// Smallest size `>= n` with only 2, 3, 5, 7 as prime factors (keeps `rustfft` fast while still
/// padding the frame enough to suppress wrap-around at the image border).
fn fast_fft_len(n: usize) -> usize {
    let mut candidate = n.max(1);
    loop {
        let mut m = candidate;
        for p in [2usize, 3, 5, 7] {
            while m % p == 0 {
                m /= p;
            }
        }
        if m == 1 {
            return candidate;
        }
        candidate += 1;
    }
}

fn fft_2d_inplace(
    field: &mut Array2<Complex32>,
    row_fft: &Arc<dyn rustfft::Fft<f32>>,
    col_fft: &Arc<dyn rustfft::Fft<f32>>,
) {
    let (w, h) = field.dim();
    let mut row_buf: Vec<Complex<f32>> = Vec::with_capacity(w);
    for y in 0..h {
        row_buf.clear();
        row_buf.extend((0..w).map(|x| field[(x, y)]));
        row_fft.process(&mut row_buf);
        for (x, &v) in row_buf.iter().enumerate() {
            field[(x, y)] = v;
        }
    }
    let mut col_buf: Vec<Complex<f32>> = Vec::with_capacity(h);
    for x in 0..w {
        col_buf.clear();
        col_buf.extend((0..h).map(|y| field[(x, y)]));
        col_fft.process(&mut col_buf);
        for (y, &v) in col_buf.iter().enumerate() {
            field[(x, y)] = v;
        }
    }
}

/// Per-slice scalar score, evaluated lazily and memoized by [`s_search`].
pub fn focus_score(method: FocusMethod, slice: &[f32], width: usize, height: usize) -> f64 {
    match method {
        FocusMethod::Min => -min_max(slice).0,
        FocusMethod::Max => min_max(slice).1,
        FocusMethod::Range => {
            let (min, max) = min_max(slice);
            max - min
        }
        FocusMethod::Std => local_std_3x3(slice, width, height).1,
        FocusMethod::Icemet => {
            let sqrt_slice: Vec<f64> = slice.iter().map(|&v| v.max(0.0).sqrt() as f64).collect();
            local_std_3x3(&sqrt_slice, width, height).1
        }
        FocusMethod::Tog => {
            let (mean, std) = gradient_l1_mean_std(slice, width, height);
            (std / mean.max(1e-9)).sqrt()
        }
    }
}

fn min_max(slice: &[f32]) -> (f64, f64) {
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for &v in slice {
        let v = v as f64;
        min = min.min(v);
        max = max.max(v);
    }
    (min, max)
}

fn local_std_3x3(slice: &[f64], width: usize, height: usize) -> (f64, f64) {
    let mut filtered = vec![0f64; slice.len()];
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0f64;
            let mut sumsq = 0f64;
            let mut count = 0f64;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                        let v = slice[ny as usize * width + nx as usize];
                        sum += v;
                        sumsq += v * v;
                        count += 1.0;
                    }
                }
            }
            let mean = sum / count;
            let var = (sumsq / count - mean * mean).max(0.0);
            filtered[y * width + x] = var.sqrt();
        }
    }
    mean_std(&filtered)
}

fn gradient_l1_mean_std(slice: &[f32], width: usize, height: usize) -> (f64, f64) {
    let mut grad = vec![0f64; slice.len()];
    for y in 0..height {
        for x in 0..width {
            let gx = if x + 1 < width { (slice[y * width + x + 1] - slice[y * width + x]).abs() } else { 0.0 };
            let gy = if y + 1 < height { (slice[(y + 1) * width + x] - slice[y * width + x]).abs() } else { 0.0 };
            grad[y * width + x] = (gx + gy) as f64;
        }
    }
    mean_std(&grad)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Memoized iterative three-tap search: at each iteration, maximizes
/// `f(i-step) + 2*f(i) + f(min(end, i+step))` over `i` in the current window, then contracts the
/// window around the best index and shrinks the step geometrically until it reaches `epsilon`.
///
/// Ties within a pass break toward the smaller index, matching a strict `>` comparison against
/// the running maximum.
pub fn s_search<F: FnMut(f64) -> f64>(mut f: F, begin: f64, end: f64, step: f64) -> f64 {
    const MAX_ITER: usize = 1000;
    const EPSILON: f64 = 1.0;

    let nsteps = (end - begin) / step.max(1e-9);
    let mut begin = begin;
    let mut end = end;
    let mut step = step;
    let mut count = 0usize;

    while count < MAX_ITER {
        count += 1;
        let mut fmax = f64::MIN;
        let mut imax = begin;
        let mut i = begin + step;
        while i < end - step / 2.0 {
            let fsum = f(i - step) + 2.0 * f(i) + f((end).min(i + step));
            if fsum > fmax {
                fmax = fsum;
                imax = i;
            }
            i += step;
        }
        begin = begin.max(imax - step);
        end = end.min(imax + step);
        if step <= EPSILON {
            break;
        }
        step = ((end - begin) / nsteps).max(EPSILON);
    }
    (end + begin) / 2.0
}

/// Runs [`s_search`] over a stack of full-frame u8 amplitude slices, scoring each candidate index
/// on the crop described by `rect` with `method`. Memoizes by (rounded, clamped) index since the
/// search repeatedly probes the same handful of candidates as the window contracts.
///
/// Returns `(best_index, best_score)`.
pub fn focus(
    stack: &[Vec<u8>],
    rect: icemet_model::Rect,
    frame_width: u32,
    frame_height: u32,
    method: FocusMethod,
    begin: f64,
    end: f64,
    step: f64,
) -> (usize, f64) {
    let n = stack.len();
    let mut memo: std::collections::HashMap<i64, f64> = std::collections::HashMap::new();
    let mut score_at = |i: f64| -> f64 {
        let idx = (i.round() as i64).clamp(0, n as i64 - 1);
        if let Some(&cached) = memo.get(&idx) {
            return cached;
        }
        let full = icemet_model::Buffer8::new(stack[idx as usize].clone(), frame_width, frame_height);
        let cropped = crate::imgops::crop(&full, rect);
        let slice: Vec<f32> = cropped.data.iter().map(|&p| p as f32).collect();
        let score = focus_score(method, &slice, rect.width as usize, rect.height as usize);
        memo.insert(idx, score);
        score
    };
    let best = s_search(&mut score_at, begin, end, step);
    let idx = (best.round() as i64).clamp(0, n as i64 - 1) as usize;
    let score = score_at(idx as f64);
    (idx, score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_fft_len_picks_smooth_sizes() {
        assert_eq!(fast_fft_len(100), 100); // 100 = 2^2*5^2
        assert!(fast_fft_len(101) >= 101);
    }

    #[test]
    fn s_search_finds_the_peak_of_a_unimodal_function() {
        let target = 42.3;
        let f = |x: f64| -((x - target).powi(2));
        let result = s_search(f, 0.0, 99.0, 8.0);
        assert!((result - target).abs() < 2.0);
    }

    #[test]
    fn magnf_matches_formula() {
        assert_eq!(Hologram::magnf(0.0, 1.0), 1.0);
        assert!((Hologram::magnf(2.0, 1.0) - 2.0).abs() < 1e-6);
    }
}

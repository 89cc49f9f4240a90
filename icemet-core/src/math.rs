//! Small scalar formulas shared by Recon, Analysis and Stats.

use std::f64::consts::PI;

/// Diameter of a circle with the same area: `sqrt(4*area/pi)`.
pub fn equivdiam(area: f64) -> f64 {
    (4.0 * area / PI).sqrt()
}

/// Heywood circularity factor: 1.0 for a perfect circle, >1.0 for irregular shapes.
pub fn heywood(perim: f64, area: f64) -> f64 {
    perim / (2.0 * (PI * area).sqrt())
}

/// Volume of the truncated cone between two cross-sectional areas `a0`/`a1` separated by `h`.
pub fn vcone(h: f64, a0: f64, a1: f64) -> f64 {
    h * (a0 + (a0 * a1).sqrt() + a1) / 3.0
}

/// Point-source magnification at depth `z` for a source at distance `dist` (0 = collimated).
pub fn magnf(dist: f64, z: f64) -> f64 {
    if dist == 0.0 {
        1.0
    } else {
        dist / (dist - z)
    }
}

/// Median pixel value via a cumulative 256-bin histogram, matching the reference
/// implementation's `Math::median` (smallest `i` where the cumulative count exceeds half the
/// pixel count).
pub fn median_u8(buf: &[u8]) -> u8 {
    if buf.is_empty() {
        return 0;
    }
    let mut hist = [0u32; 256];
    for &p in buf {
        hist[p as usize] += 1;
    }
    let half = buf.len() as u32 / 2;
    let mut sum = 0u32;
    let mut i = 0usize;
    while sum < half && i < 256 {
        sum += hist[i];
        i += 1;
    }
    i.saturating_sub(1) as u8
}

/// Piecewise-linear diameter correction applied when `d0 < diam < d1`: interpolates a
/// multiplicative correction factor between `f0` (at `d0`) and `f1` (at `d1`).
pub fn diam_correction_factor(diam: f64, d0: f64, d1: f64, f0: f64, f1: f64) -> f64 {
    if diam > d0 && diam < d1 {
        (diam - d0) * (f1 - f0) / (d1 - d0) + f0
    } else {
        1.0
    }
}

/// Clamp-then-linear-rescale a pixel value from `[a0,a1]` to `[b0,b1]`, matching the reference
/// implementation's `Math::adjust`.
pub fn adjust_u8(v: u8, a0: u8, a1: u8, b0: u8, b1: u8) -> u8 {
    let val = (v.clamp(a0, a1)) as f32;
    let val = (val - a0 as f32) / (a1 - a0) as f32;
    let val = val * (b1 - b0) as f32 + b0 as f32;
    val.round() as u8
}

/// Otsu's threshold: the intensity that minimizes intra-class variance, found by maximizing
/// inter-class variance over the cumulative 256-bin histogram.
pub fn otsu_threshold(buf: &[u8]) -> u8 {
    let mut hist = [0u32; 256];
    for &p in buf {
        hist[p as usize] += 1;
    }
    let total = buf.len() as f64;
    if total == 0.0 {
        return 0;
    }
    let sum_total: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_bg = 0.0;
    let mut weight_bg = 0.0;
    let mut best_th = 0u8;
    let mut best_variance = 0.0;
    for t in 0..256 {
        weight_bg += hist[t] as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg <= 0.0 {
            break;
        }
        sum_bg += t as f64 * hist[t] as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_total - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_th = t as u8;
        }
    }
    best_th
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivdiam_of_unit_circle_area() {
        let area = PI; // radius 1 => area = pi => diam = 2
        assert!((equivdiam(area) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn heywood_of_perfect_circle_is_one() {
        let radius = 3.0;
        let area = PI * radius * radius;
        let perim = 2.0 * PI * radius;
        assert!((heywood(perim, area) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn magnf_collimated_is_one() {
        assert_eq!(magnf(0.0, 0.5), 1.0);
    }

    #[test]
    fn magnf_point_source() {
        let m = magnf(1.0, 0.5);
        assert!((m - 2.0).abs() < 1e-9);
    }

    #[test]
    fn median_of_uniform_buffer() {
        let buf = vec![42u8; 100];
        assert_eq!(median_u8(&buf), 42);
    }

    #[test]
    fn diam_correction_identity_outside_window() {
        assert_eq!(diam_correction_factor(1.0, 2.0, 3.0, 0.9, 1.1), 1.0);
    }

    #[test]
    fn adjust_clamps_and_rescales() {
        assert_eq!(adjust_u8(0, 50, 200, 0, 255), 0);
        assert_eq!(adjust_u8(255, 50, 200, 0, 255), 255);
        assert_eq!(adjust_u8(125, 50, 200, 0, 255), 127);
    }

    #[test]
    fn otsu_separates_two_clusters() {
        let mut buf = vec![10u8; 50];
        buf.extend(vec![200u8; 50]);
        let th = otsu_threshold(&buf);
        assert!(th > 10 && th < 200);
    }
}

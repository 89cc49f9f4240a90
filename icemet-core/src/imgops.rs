//! Small image-geometry helpers shared by Preproc, Recon and Analysis: cropping, rotation,
//! thresholding, contour tracing and the handful of contour measurements (bounding rect, area,
//! perimeter, centroid, point containment) those stages need.
//!
//! None of this corresponds to a single teacher module; it is enriched from the broader
//! image-processing ecosystem (`image` + `imageproc`) since no corpus repo does contour-based
//! particle extraction. Contour tracing itself is `imageproc::contours::find_contours`; fill/area/
//! perimeter/point-in-polygon are implemented directly against the resulting point lists rather
//! than guessed at from an uncertain crate surface.

use icemet_model::{Buffer8, Rect};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::point::Point;

pub fn to_gray(buf: &Buffer8) -> GrayImage {
    GrayImage::from_raw(buf.width, buf.height, buf.data.clone())
        .expect("Buffer8 dimensions always match its pixel count")
}

pub fn from_gray(img: &GrayImage) -> Buffer8 {
    Buffer8::new(img.as_raw().clone(), img.width(), img.height())
}

pub fn crop(buf: &Buffer8, rect: Rect) -> Buffer8 {
    let mut out = vec![0u8; (rect.width * rect.height) as usize];
    for y in 0..rect.height {
        let src_y = rect.y + y as i32;
        if src_y < 0 || src_y as u32 >= buf.height {
            continue;
        }
        for x in 0..rect.width {
            let src_x = rect.x + x as i32;
            if src_x < 0 || src_x as u32 >= buf.width {
                continue;
            }
            out[(y * rect.width + x) as usize] = buf.data[(src_y as u32 * buf.width + src_x as u32) as usize];
        }
    }
    Buffer8::new(out, rect.width, rect.height)
}

pub fn rotate_deg(buf: &Buffer8, angle_deg: f64) -> Buffer8 {
    if angle_deg == 0.0 {
        return buf.clone();
    }
    let img = to_gray(buf);
    let rotated = rotate_about_center(
        &img,
        (angle_deg.to_radians()) as f32,
        Interpolation::Bilinear,
        Luma([0u8]),
    );
    from_gray(&rotated)
}

/// `cv::THRESH_BINARY_INV`: pixels `<= th` become 255, pixels `> th` become 0.
pub fn threshold_inv(buf: &Buffer8, th: u8) -> Buffer8 {
    let data = buf.data.iter().map(|&p| if p <= th { 255 } else { 0 }).collect();
    Buffer8::new(data, buf.width, buf.height)
}

/// External (outer) contours of a binary image, traced via Suzuki/Abe border-following.
pub fn external_contours(buf: &Buffer8) -> Vec<Contour<i32>> {
    find_contours::<i32>(&to_gray(buf))
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .collect()
}

pub fn bounding_rect(points: &[Point<i32>]) -> Rect {
    let (mut xmin, mut ymin, mut xmax, mut ymax) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in points {
        xmin = xmin.min(p.x);
        ymin = ymin.min(p.y);
        xmax = xmax.max(p.x);
        ymax = ymax.max(p.y);
    }
    Rect { x: xmin, y: ymin, width: (xmax - xmin + 1).max(0) as u32, height: (ymax - ymin + 1).max(0) as u32 }
}

pub fn centroid(points: &[Point<i32>]) -> (f64, f64) {
    let n = points.len().max(1) as f64;
    let sx: i64 = points.iter().map(|p| p.x as i64).sum();
    let sy: i64 = points.iter().map(|p| p.y as i64).sum();
    (sx as f64 / n, sy as f64 / n)
}

/// Closed-polygon perimeter: sum of Euclidean distances between consecutive points.
pub fn perimeter(points: &[Point<i32>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        let dx = (b.x - a.x) as f64;
        let dy = (b.y - a.y) as f64;
        total += (dx * dx + dy * dy).sqrt();
    }
    total
}

/// Rasterizes a closed polygon with an even-odd scanline fill, within `rect` only. Returns a
/// `rect.width x rect.height` mask (0/255) in the rect's local coordinate frame, plus the filled
/// pixel count.
pub fn fill_polygon_mask(points: &[Point<i32>], rect: Rect) -> (Buffer8, u64) {
    let mut mask = vec![0u8; (rect.width * rect.height) as usize];
    let mut area = 0u64;
    if points.len() < 3 {
        return (Buffer8::new(mask, rect.width, rect.height), 0);
    }
    for y in 0..rect.height as i32 {
        let world_y = rect.y + y;
        let mut xs: Vec<f64> = Vec::new();
        for i in 0..points.len() {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            let (ay, by) = (a.y as f64, b.y as f64);
            let wy = world_y as f64 + 0.5;
            if (ay <= wy && by > wy) || (by <= wy && ay > wy) {
                let t = (wy - ay) / (by - ay);
                xs.push(a.x as f64 + t * (b.x - a.x) as f64);
            }
        }
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in xs.chunks_exact(2) {
            let x0 = (pair[0].round() as i32 - rect.x).max(0);
            let x1 = (pair[1].round() as i32 - rect.x).min(rect.width as i32 - 1);
            for x in x0..=x1 {
                if x >= 0 && (x as u32) < rect.width {
                    let idx = (y as u32 * rect.width + x as u32) as usize;
                    if mask[idx] == 0 {
                        mask[idx] = 255;
                        area += 1;
                    }
                }
            }
        }
    }
    (Buffer8::new(mask, rect.width, rect.height), area)
}

pub fn point_in_polygon(points: &[Point<i32>], x: i32, y: i32) -> bool {
    let mut inside = false;
    let wx = x as f64 + 0.5;
    let wy = y as f64 + 0.5;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
        if (ay > wy) != (by > wy) {
            let t = (wy - ay) / (by - ay);
            let xcross = ax + t * (bx - ax);
            if wx < xcross {
                inside = !inside;
            }
        }
    }
    inside
}

pub fn min_max(buf: &Buffer8) -> (u8, u8, usize, usize) {
    let mut min = 255u8;
    let mut max = 0u8;
    let mut min_idx = 0usize;
    let mut max_idx = 0usize;
    for (i, &p) in buf.data.iter().enumerate() {
        if p < min {
            min = p;
            min_idx = i;
        }
        if p > max {
            max = p;
            max_idx = i;
        }
    }
    (min, max, min_idx, max_idx)
}

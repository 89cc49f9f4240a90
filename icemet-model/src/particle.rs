/// An accepted particle measurement, produced by Analysis.
#[derive(Debug, Clone)]
pub struct Particle {
    /// Meters, relative to the image's interior origin.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Equivalent diameter, meters, before correction.
    pub diam: f64,
    /// Equivalent diameter, meters, after the piecewise-linear correction.
    pub diam_corr: f64,
    pub circularity: f64,
    pub dyn_range: u8,
    /// Effective pixel size at this particle's depth, meters.
    pub eff_px_sz: f64,
    /// Binary mask (filled contour), row-major u8, same size as `mask_width x mask_height`.
    pub mask: Vec<u8>,
    pub mask_width: u32,
    pub mask_height: u32,
}

impl Particle {
    /// The acceptance window test from the data model invariants: `z`, `diam`, `circularity`
    /// and `dyn_range` must each fall within the configured inclusive range.
    #[allow(clippy::too_many_arguments)]
    pub fn is_accepted(
        &self,
        z_min: f64,
        z_max: f64,
        diam_min: f64,
        diam_max: f64,
        circ_min: f64,
        circ_max: f64,
        dyn_range_min: u8,
        dyn_range_max: u8,
    ) -> bool {
        self.z >= z_min
            && self.z <= z_max
            && self.diam_corr >= diam_min
            && self.diam_corr <= diam_max
            && self.circularity >= circ_min
            && self.circularity <= circ_max
            && self.dyn_range >= dyn_range_min
            && self.dyn_range <= dyn_range_max
    }
}

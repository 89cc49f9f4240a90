use crate::file::File;
use crate::particle::Particle;
use crate::segment::Segment;

/// Classification attached to an [`Image`] as it passes through Preproc/Recon/Analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Not yet classified.
    None,
    /// At least one particle survived analysis.
    NotEmpty,
    /// No signal, or failed an empty check.
    Empty,
    /// Background-subtraction warm-up frame, or failed a noisy check.
    Skip,
}

impl From<ImageStatus> for crate::file::FileStatus {
    fn from(value: ImageStatus) -> Self {
        match value {
            ImageStatus::None => crate::file::FileStatus::None,
            ImageStatus::NotEmpty => crate::file::FileStatus::NotEmpty,
            ImageStatus::Empty => crate::file::FileStatus::Empty,
            ImageStatus::Skip => crate::file::FileStatus::Skip,
        }
    }
}

/// A single row-major u8 grayscale buffer with explicit dimensions.
#[derive(Debug, Clone, Default)]
pub struct Buffer8 {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Buffer8 {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width as u64 * height as u64) as usize);
        Self { data, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `max - min` over the buffer; used by the empty/noisy checks (dynamic range).
    pub fn dynamic_range(&self) -> u8 {
        if self.data.is_empty() {
            return 0;
        }
        let min = *self.data.iter().min().unwrap();
        let max = *self.data.iter().max().unwrap();
        max - min
    }
}

/// A hologram frame plus its derived buffers and extracted records.
///
/// Owns its [`Segment`]s and [`Particle`]s directly (arena-per-Image ownership): neither carries
/// a back-pointer to the `Image`, stages simply receive the `Image` itself.
#[derive(Debug, Clone)]
pub struct Image {
    pub file: File,
    pub status: ImageStatus,
    pub original: Buffer8,
    pub preproc: Buffer8,
    pub min: Buffer8,
    /// Median pixel value of `preproc`, used as the segmentation/analysis background level.
    pub bg_val: u8,
    pub segments: Vec<Segment>,
    pub particles: Vec<Particle>,
}

impl Image {
    pub fn new(file: File, original: Buffer8) -> Self {
        Self {
            file,
            status: ImageStatus::None,
            original,
            preproc: Buffer8::default(),
            min: Buffer8::default(),
            bg_val: 0,
            segments: Vec::new(),
            particles: Vec::new(),
        }
    }
}

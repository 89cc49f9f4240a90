//! Median-division background subtraction ring, owned by Preproc for its whole lifetime.

use icemet_model::{Buffer8, Error as ModelError, Result as ModelResult};

struct Slot {
    pixels: Vec<f32>,
    mean: f64,
}

/// A ring of the last `len` preprocessed frames, used to build a background-subtracted output.
///
/// `len` must be odd and in `3..=25` (enforced at construction). After `len` pushes the ring is
/// full and every subsequent push yields a *centered* output: the pixelwise median across the
/// whole ring, divided by each frame's own mean and rescaled by the ring's mean-of-means, tagged
/// with the identity of the frame sitting ⌊len/2⌋ pushes behind the one just pushed.
pub struct BgSubStack {
    len: usize,
    width: u32,
    height: u32,
    slots: Vec<Option<Slot>>,
    /// Index the *next* push will write to.
    next: usize,
    pushed: usize,
}

impl BgSubStack {
    pub fn new(len: usize) -> ModelResult<Self> {
        if len < 3 || len > 25 || len % 2 == 0 {
            return Err(ModelError::InvalidStackLen(len));
        }
        Ok(Self { len, width: 0, height: 0, slots: (0..len).map(|_| None).collect(), next: 0, pushed: 0 })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Relative ring offset of the centered (output-bearing) frame behind the one most recently
    /// pushed, i.e. ⌊len/2⌋.
    pub fn lag(&self) -> usize {
        self.len / 2
    }

    /// How many frames short of a full ring we still are (0 once full).
    pub fn warmup_remaining(&self) -> usize {
        self.len.saturating_sub(self.pushed)
    }

    /// Pushes a new preprocessed frame. Returns the centered, mean-normalized median-divided
    /// output once the ring is full; returns `None` during warm-up.
    pub fn push(&mut self, frame: &Buffer8) -> Option<Buffer8> {
        if self.width == 0 {
            self.width = frame.width;
            self.height = frame.height;
        }
        let mean = mean_u8(&frame.data);
        let pixels = frame.data.iter().map(|&p| p as f32).collect();
        let written_idx = self.next;
        self.slots[written_idx] = Some(Slot { pixels, mean });
        self.next = (self.next + 1) % self.len;
        self.pushed += 1;

        if self.pushed < self.len {
            return None;
        }
        Some(self.meddiv())
    }

    /// Ring slot the *next* [`Self::push`] will write to.
    pub fn next_write_index(&self) -> usize {
        self.next
    }

    /// Ring slot the most recent [`Self::push`] wrote to.
    pub fn last_write_index(&self) -> usize {
        (self.next + self.len - 1) % self.len
    }

    /// Ring index of the frame that should carry the output identity at the current write
    /// position, i.e. `(written_idx + len/2) mod len` where `written_idx` is the slot the most
    /// recent push just wrote.
    pub fn centered_index(&self) -> usize {
        (self.last_write_index() + self.len / 2) % self.len
    }

    fn meddiv(&self) -> Buffer8 {
        let n = self.len;
        let npx = (self.width as usize) * (self.height as usize);

        let means: Vec<f64> = self.slots.iter().map(|s| s.as_ref().unwrap().mean).collect();
        let mean_of_means = means.iter().sum::<f64>() / n as f64;

        let mut out = vec![0u8; npx];
        let mut ratios = vec![0f32; n];
        for px in 0..npx {
            for (i, slot) in self.slots.iter().enumerate() {
                let s = slot.as_ref().unwrap();
                ratios[i] = (s.pixels[px] as f64 / s.mean.max(1e-9)) as f32;
            }
            ratios.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let median_ratio = ratios[n / 2] as f64;
            let val = (median_ratio * mean_of_means).round();
            out[px] = val.clamp(0.0, 255.0) as u8;
        }

        Buffer8::new(out, self.width, self.height)
    }
}

fn mean_u8(buf: &[u8]) -> f64 {
    if buf.is_empty() {
        return 0.0;
    }
    buf.iter().map(|&p| p as f64).sum::<f64>() / buf.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8, w: u32, h: u32) -> Buffer8 {
        Buffer8::new(vec![value; (w * h) as usize], w, h)
    }

    #[test]
    fn rejects_even_length() {
        assert!(BgSubStack::new(4).is_err());
    }

    #[test]
    fn warmup_then_full() {
        let mut stack = BgSubStack::new(5).unwrap();
        for _ in 0..4 {
            assert!(stack.push(&solid(100, 4, 4)).is_none());
        }
        assert!(stack.push(&solid(100, 4, 4)).is_some());
    }

    #[test]
    fn meddiv_of_uniform_frames_reproduces_the_value() {
        let mut stack = BgSubStack::new(3).unwrap();
        stack.push(&solid(80, 2, 2));
        stack.push(&solid(80, 2, 2));
        let out = stack.push(&solid(80, 2, 2)).unwrap();
        for &p in &out.data {
            assert_eq!(p, 80);
        }
    }
}

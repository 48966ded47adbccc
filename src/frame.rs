use crate::error::{MotioncamError, Result};

/// Per-block displacement reported by the motion-vector stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    pub x: i16,
    pub y: i16,
}

impl MotionVector {
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Magnitude of the displacement, clipped to 255 and quantized to u8.
    ///
    /// Saturating outliers bounds the threshold comparison; anything past 255
    /// is already unambiguous motion.
    pub fn magnitude(&self) -> u8 {
        let m = ((self.x as f64).powi(2) + (self.y as f64).powi(2)).sqrt();
        m.clamp(0.0, 255.0) as u8
    }
}

/// One analysis tick's worth of motion vectors, laid out row-major.
#[derive(Debug, Clone)]
pub struct MotionFrame {
    cols: usize,
    rows: usize,
    vectors: Vec<MotionVector>,
}

impl MotionFrame {
    /// Build a frame, checking that the vector count matches the grid shape.
    /// A mismatch is a contract violation by the producer, not a retryable
    /// condition.
    pub fn new(cols: usize, rows: usize, vectors: Vec<MotionVector>) -> Result<Self> {
        let expected = cols * rows;
        if vectors.len() != expected {
            return Err(MotioncamError::FrameShape {
                expected,
                actual: vectors.len(),
            });
        }
        Ok(Self {
            cols,
            rows,
            vectors,
        })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn vectors(&self) -> &[MotionVector] {
        &self.vectors
    }

    /// Count of vectors whose magnitude strictly exceeds `magnitude`.
    pub fn count_over(&self, magnitude: u8) -> usize {
        self.vectors
            .iter()
            .filter(|v| v.magnitude() > magnitude)
            .count()
    }
}

/// Vector grid dimensions for a given analysis resolution.
///
/// The encoder emits one vector per 16x16 macroblock plus one extra column,
/// so a 640x480 analysis stream yields a 41x30 grid.
pub fn vector_grid_dims(width: u32, height: u32) -> (usize, usize) {
    let cols = (width as usize).div_ceil(16) + 1;
    let rows = (height as usize).div_ceil(16);
    (cols, rows)
}

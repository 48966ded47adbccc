use crate::frame::{vector_grid_dims, MotionFrame, MotionVector};

const BLOCK: usize = 16;
const SEARCH_RADIUS: i32 = 8;
const SEARCH_STEP: i32 = 4;

/// Exhaustive block-matching motion estimator over grayscale frames.
///
/// Compares each 16x16 block of the current frame against shifted positions
/// in the previous frame and reports the displacement with the lowest sum of
/// absolute differences. Coarse (4px search step) but cheap enough to run on
/// every analysis frame, and the classifier only thresholds magnitudes anyway.
pub struct BlockMatcher {
    width: usize,
    height: usize,
    prev: Option<Vec<u8>>,
}

impl BlockMatcher {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            prev: None,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.width * self.height
    }

    /// Estimate motion between the previously submitted frame and `current`.
    ///
    /// Returns `None` for the first frame (no reference yet). The output grid
    /// matches [`vector_grid_dims`]; blocks that extend past the frame edge
    /// and the trailing phantom column are zero-filled.
    pub fn estimate(&mut self, current: &[u8]) -> Option<MotionFrame> {
        debug_assert_eq!(current.len(), self.frame_len());

        let prev = match self.prev.replace(current.to_vec()) {
            Some(prev) => prev,
            None => return None,
        };

        let (cols, rows) = vector_grid_dims(self.width as u32, self.height as u32);
        let mut vectors = vec![MotionVector::default(); cols * rows];

        let full_cols = self.width / BLOCK;
        let full_rows = self.height / BLOCK;

        for by in 0..full_rows {
            for bx in 0..full_cols {
                let v = self.match_block(&prev, current, bx * BLOCK, by * BLOCK);
                vectors[by * cols + bx] = v;
            }
        }

        // Safe: the vector count was sized from the same dimensions
        Some(MotionFrame::new(cols, rows, vectors).expect("grid shape"))
    }

    /// Find the displacement minimizing SAD for the block at (x, y) in
    /// `current` against `prev`.
    fn match_block(&self, prev: &[u8], current: &[u8], x: usize, y: usize) -> MotionVector {
        let mut best = MotionVector::default();
        let mut best_sad = self.sad(prev, current, x, y, 0, 0);

        let mut dy = -SEARCH_RADIUS;
        while dy <= SEARCH_RADIUS {
            let mut dx = -SEARCH_RADIUS;
            while dx <= SEARCH_RADIUS {
                if (dx != 0 || dy != 0) && self.offset_in_bounds(x, y, dx, dy) {
                    let sad = self.sad(prev, current, x, y, dx, dy);
                    if sad < best_sad {
                        best_sad = sad;
                        best = MotionVector::new(dx as i16, dy as i16);
                    }
                }
                dx += SEARCH_STEP;
            }
            dy += SEARCH_STEP;
        }

        best
    }

    fn offset_in_bounds(&self, x: usize, y: usize, dx: i32, dy: i32) -> bool {
        let px = x as i32 - dx;
        let py = y as i32 - dy;
        px >= 0
            && py >= 0
            && px + BLOCK as i32 <= self.width as i32
            && py + BLOCK as i32 <= self.height as i32
    }

    /// Sum of absolute differences between the current block at (x, y) and
    /// the previous frame's block displaced by (-dx, -dy). A candidate (dx,
    /// dy) thus reads as "content moved by (dx, dy) since the last frame".
    fn sad(&self, prev: &[u8], current: &[u8], x: usize, y: usize, dx: i32, dy: i32) -> u32 {
        let px = (x as i32 - dx) as usize;
        let py = (y as i32 - dy) as usize;

        let mut sum = 0u32;
        for row in 0..BLOCK {
            let cur_off = (y + row) * self.width + x;
            let prev_off = (py + row) * self.width + px;
            let cur_row = &current[cur_off..cur_off + BLOCK];
            let prev_row = &prev[prev_off..prev_off + BLOCK];
            for (c, p) in cur_row.iter().zip(prev_row) {
                sum += c.abs_diff(*p) as u32;
            }
        }
        sum
    }
}

//! Co-registered raster bands and the binary-image primitives the detectors
//! share: median, morphology, and 8-connected component labelling.

use crate::detect::DetectError;

/// A single band: `rows * cols` samples in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Raster {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, DetectError> {
        if data.len() != rows * cols {
            return Err(DetectError::ShapeMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a list of rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, DetectError> {
        Self::from_row_slices(&rows)
    }

    /// Like [`Raster::from_rows`], copying out of borrowed rows.
    pub fn from_row_slices(rows: &[Vec<f64>]) -> Result<Self, DetectError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(DetectError::RaggedRow {
                    row: i,
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// Fail on NaN or infinite samples.
    pub fn ensure_finite(&self, band: &'static str) -> Result<(), DetectError> {
        match self.data.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(DetectError::NonFinite { band, index }),
            None => Ok(()),
        }
    }

    /// Fail unless `other` has the same dimensions.
    pub fn ensure_same_dims(&self, other: &Raster, band: &'static str) -> Result<(), DetectError> {
        if self.dims() != other.dims() {
            return Err(DetectError::DimensionMismatch {
                band,
                expected: self.dims(),
                actual: other.dims(),
            });
        }
        Ok(())
    }

    /// Element-wise combination of two equally sized rasters.
    pub fn zip_map(&self, other: &Raster, f: impl Fn(f64, f64) -> f64) -> Raster {
        Raster {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Raster {
        Raster {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Median sample; the mean of the two middle samples for even counts.
    pub fn median(&self) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// True when every sample equals the first.
    pub fn is_uniform(&self) -> bool {
        match self.data.first() {
            Some(&first) => self.data.iter().all(|&v| v == first),
            None => true,
        }
    }

    /// Pixels strictly above `threshold`.
    pub fn threshold(&self, threshold: f64) -> Mask {
        Mask {
            rows: self.rows,
            cols: self.cols,
            bits: self.data.iter().map(|&v| v > threshold).collect(),
        }
    }
}

impl From<Raster> for Vec<Vec<f64>> {
    fn from(r: Raster) -> Self {
        if r.cols == 0 {
            return vec![Vec::new(); r.rows];
        }
        r.data.chunks(r.cols).map(<[f64]>::to_vec).collect()
    }
}

// ---------------------------------------------------------------------------
// Binary masks
// ---------------------------------------------------------------------------

/// Binary anomaly mask with the same layout as its source raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    rows: usize,
    cols: usize,
    bits: Vec<bool>,
}

impl Mask {
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.bits[row * self.cols + col]
    }

    /// Dilation followed by erosion with a `k`×`k` square.
    pub fn close(&self, k: usize) -> Mask {
        self.dilate(k).erode(k)
    }

    /// Erosion followed by dilation with a `k`×`k` square.
    pub fn open(&self, k: usize) -> Mask {
        self.erode(k).dilate(k)
    }

    pub fn dilate(&self, k: usize) -> Mask {
        self.square_filter(k, false)
    }

    pub fn erode(&self, k: usize) -> Mask {
        self.square_filter(k, true)
    }

    /// Square structuring element applied as a row pass then a column pass.
    ///
    /// Out-of-bounds neighbours are ignored, so the border neither erodes nor
    /// grows the mask. Erosion keeps a pixel when all in-bounds neighbours are
    /// set, dilation when any is.
    fn square_filter(&self, k: usize, erode: bool) -> Mask {
        if k <= 1 || self.bits.is_empty() {
            return self.clone();
        }
        // Anchor at the kernel centre; even kernels lean towards the start.
        let before = k / 2;
        let after = k - 1 - before;

        let mut horizontal = vec![false; self.bits.len()];
        for r in 0..self.rows {
            let row = &self.bits[r * self.cols..(r + 1) * self.cols];
            for c in 0..self.cols {
                let lo = c.saturating_sub(before);
                let hi = (c + after).min(self.cols - 1);
                horizontal[r * self.cols + c] = reduce_window(erode, row[lo..=hi].iter().copied());
            }
        }

        let mut bits = vec![false; self.bits.len()];
        for c in 0..self.cols {
            for r in 0..self.rows {
                let lo = r.saturating_sub(before);
                let hi = (r + after).min(self.rows - 1);
                bits[r * self.cols + c] =
                    reduce_window(erode, (lo..=hi).map(|rr| horizontal[rr * self.cols + c]));
            }
        }

        Mask {
            rows: self.rows,
            cols: self.cols,
            bits,
        }
    }

    /// Label 8-connected foreground regions in raster scan order.
    pub fn components(&self) -> Vec<Component> {
        let mut labels: Vec<u32> = vec![0; self.bits.len()];
        let mut components = Vec::new();
        let mut stack = Vec::new();

        for start in 0..self.bits.len() {
            if !self.bits[start] || labels[start] != 0 {
                continue;
            }
            let label = components.len() as u32 + 1;
            labels[start] = label;
            stack.push(start);

            let mut pixels = Vec::new();
            while let Some(idx) = stack.pop() {
                pixels.push(idx);
                let (r, c) = (idx / self.cols, idx % self.cols);
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = r as i64 + dr;
                        let nc = c as i64 + dc;
                        if nr < 0 || nc < 0 || nr >= self.rows as i64 || nc >= self.cols as i64 {
                            continue;
                        }
                        let n = nr as usize * self.cols + nc as usize;
                        if self.bits[n] && labels[n] == 0 {
                            labels[n] = label;
                            stack.push(n);
                        }
                    }
                }
            }

            pixels.sort_unstable();
            let area = pixels.len();
            let (sum_r, sum_c) = pixels.iter().fold((0.0, 0.0), |(sr, sc), &idx| {
                (sr + (idx / self.cols) as f64, sc + (idx % self.cols) as f64)
            });
            components.push(Component {
                area,
                centroid: (sum_r / area as f64, sum_c / area as f64),
                pixels,
            });
        }

        components
    }
}

fn reduce_window(erode: bool, mut window: impl Iterator<Item = bool>) -> bool {
    if erode {
        window.all(|b| b)
    } else {
        window.any(|b| b)
    }
}

/// One connected region of a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub area: usize,
    /// (row, col) mean of the member pixels.
    pub centroid: (f64, f64),
    /// Row-major indices of the member pixels.
    pub pixels: Vec<usize>,
}

impl Component {
    /// Largest value of `field` over the component.
    pub fn peak(&self, field: &Raster) -> f64 {
        self.pixels
            .iter()
            .map(|&i| field.data()[i])
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Mask {
        let cols = rows[0].len();
        let bits = rows
            .iter()
            .flat_map(|r| r.chars().map(|c| c == '#'))
            .collect();
        Mask {
            rows: rows.len(),
            cols,
            bits,
        }
    }

    #[test]
    fn test_from_rows_rejects_ragged_input() {
        let err = Raster::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, DetectError::RaggedRow { row: 1, .. }));
    }

    #[test]
    fn test_median_even_and_odd() {
        let odd = Raster::new(1, 3, vec![3.0, 1.0, 2.0]).unwrap();
        assert_eq!(odd.median(), Some(2.0));
        let even = Raster::new(2, 2, vec![4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(even.median(), Some(2.5));
    }

    #[test]
    fn test_components_use_eight_connectivity() {
        let m = mask_from(&[
            "#...", //
            ".#..", //
            "...#", //
            "...#",
        ]);
        let comps = m.components();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].area, 2);
        assert_eq!(comps[0].centroid, (0.5, 0.5));
        assert_eq!(comps[1].area, 2);
        assert_eq!(comps[1].centroid, (2.5, 3.0));
    }

    #[test]
    fn test_close_fills_single_pixel_gap() {
        let m = mask_from(&[
            ".....", //
            ".###.", //
            ".#.#.", //
            ".###.", //
            ".....",
        ]);
        let closed = m.close(3);
        assert!(closed.get(2, 2));
        assert_eq!(closed.components().len(), 1);
    }

    #[test]
    fn test_open_removes_structures_smaller_than_kernel() {
        let m = mask_from(&[
            "###...", //
            "###...", //
            "###..#", //
            "......",
        ]);
        let opened = m.open(3);
        assert_eq!(opened.count(), 9);
        assert!(!opened.get(2, 5));
    }

    #[test]
    fn test_border_does_not_erode_full_mask() {
        let m = mask_from(&["####", "####", "####"]);
        assert_eq!(m.erode(15).count(), 12);
        assert_eq!(m.open(15).count(), 12);
    }

    #[test]
    fn test_rows_round_trip_through_nested_vectors() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let r = Raster::from_row_slices(&rows).unwrap();
        assert_eq!(r.dims(), (2, 2));
        assert_eq!(r.get(1, 0), 3.0);
        assert_eq!(Vec::<Vec<f64>>::from(r), rows);
    }
}

//! Compressed sparse row matrices and an incomplete LU factorisation.
//!
//! The design matrix has `Ns * Np * Nl` structural nonzeros out of
//! `(Nl * Np) * (Ns * Np)` slots, so it is held in CSR form throughout and is
//! never materialised densely. Column indices within each row are kept
//! sorted; every constructor in this module preserves that invariant and the
//! factorisation relies on it.

use ndarray::{Array1, Array2};
use num_traits::Float;

use crate::{Error, Result};

/// A sparse matrix in compressed sparse row format.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix<E> {
    rows: usize,
    cols: usize,
    /// Row pointers, length `rows + 1`.
    indptr: Vec<usize>,
    /// Column index of each stored entry, sorted within each row.
    indices: Vec<usize>,
    values: Vec<E>,
}

impl<E: Float> CsrMatrix<E> {
    /// Assemble a matrix from raw CSR components.
    ///
    /// # Panics
    /// Panics if the components are inconsistent: `indptr` must have length
    /// `rows + 1`, start at zero, end at the entry count, and the column
    /// indices of each row must be sorted, unique and within bounds.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<E>,
    ) -> Self {
        assert_eq!(indptr.len(), rows + 1, "row pointer length mismatch");
        assert_eq!(indptr[0], 0, "row pointers must start at zero");
        assert_eq!(*indptr.last().unwrap(), indices.len(), "row pointers must end at nnz");
        assert_eq!(indices.len(), values.len(), "index and value counts differ");
        for row in 0..rows {
            let span = &indices[indptr[row]..indptr[row + 1]];
            for pair in span.windows(2) {
                assert!(pair[0] < pair[1], "column indices must be sorted and unique");
            }
            if let Some(&last) = span.last() {
                assert!(last < cols, "column index out of bounds");
            }
        }
        Self {
            rows,
            cols,
            indptr,
            indices,
            values,
        }
    }

    pub const fn rows(&self) -> usize {
        self.rows
    }

    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored entries, including explicit zeros.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// The stored entry at `(row, col)`, or zero when the slot is structurally empty.
    pub fn get(&self, row: usize, col: usize) -> E {
        let span = self.indptr[row]..self.indptr[row + 1];
        match self.indices[span.clone()].binary_search(&col) {
            Ok(offset) => self.values[span.start + offset],
            Err(_) => E::zero(),
        }
    }

    /// Matrix-vector product `self * x`.
    ///
    /// # Panics
    /// Panics if `x` has the wrong length.
    pub fn mul_vec(&self, x: &Array1<E>) -> Array1<E> {
        assert_eq!(x.len(), self.cols, "vector length must match column count");
        let mut y = Array1::zeros(self.rows);
        for row in 0..self.rows {
            let mut accumulated = E::zero();
            for idx in self.indptr[row]..self.indptr[row + 1] {
                accumulated = accumulated + self.values[idx] * x[self.indices[idx]];
            }
            y[row] = accumulated;
        }
        y
    }

    /// Transpose by counting sort over column indices.
    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.cols + 1];
        for &col in &self.indices {
            counts[col + 1] += 1;
        }
        for col in 0..self.cols {
            counts[col + 1] += counts[col];
        }
        let indptr = counts.clone();

        let mut indices = vec![0usize; self.nnz()];
        let mut values = vec![E::zero(); self.nnz()];
        let mut cursor = counts;
        for row in 0..self.rows {
            for idx in self.indptr[row]..self.indptr[row + 1] {
                let col = self.indices[idx];
                let slot = cursor[col];
                indices[slot] = row;
                values[slot] = self.values[idx];
                cursor[col] += 1;
            }
        }

        // Row order is scanned in increasing order above, so each transposed
        // row ends up sorted.
        Self {
            rows: self.cols,
            cols: self.rows,
            indptr,
            indices,
            values,
        }
    }

    /// Sparse matrix product `self * rhs`.
    ///
    /// Row-merge with a dense accumulator over the right-hand column space.
    ///
    /// # Panics
    /// Panics on an inner-dimension mismatch.
    pub fn matmul(&self, rhs: &Self) -> Self {
        assert_eq!(self.cols, rhs.rows, "inner dimensions must agree");

        let mut indptr = Vec::with_capacity(self.rows + 1);
        indptr.push(0);
        let mut indices = Vec::new();
        let mut values = Vec::new();

        let mut accumulator = vec![E::zero(); rhs.cols];
        let mut touched: Vec<usize> = Vec::new();

        for row in 0..self.rows {
            for idx in self.indptr[row]..self.indptr[row + 1] {
                let mid = self.indices[idx];
                let left = self.values[idx];
                for ridx in rhs.indptr[mid]..rhs.indptr[mid + 1] {
                    let col = rhs.indices[ridx];
                    if accumulator[col] == E::zero() && !touched.contains(&col) {
                        touched.push(col);
                    }
                    accumulator[col] = accumulator[col] + left * rhs.values[ridx];
                }
            }
            touched.sort_unstable();
            for &col in &touched {
                indices.push(col);
                values.push(accumulator[col]);
                accumulator[col] = E::zero();
            }
            indptr.push(indices.len());
            touched.clear();
        }

        Self {
            rows: self.rows,
            cols: rhs.cols,
            indptr,
            indices,
            values,
        }
    }

    /// Return `self + shift * I`, the ridge augmentation of a square matrix.
    ///
    /// Rows lacking a structural diagonal slot gain one.
    ///
    /// # Panics
    /// Panics if the matrix is not square.
    pub fn add_diagonal(&self, shift: E) -> Self {
        assert_eq!(self.rows, self.cols, "diagonal shift requires a square matrix");

        let mut indptr = Vec::with_capacity(self.rows + 1);
        indptr.push(0);
        let mut indices = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());

        for row in 0..self.rows {
            let span = self.indptr[row]..self.indptr[row + 1];
            let mut placed = false;
            for idx in span {
                let col = self.indices[idx];
                if !placed && col > row {
                    indices.push(row);
                    values.push(shift);
                    placed = true;
                }
                let value = if col == row {
                    placed = true;
                    self.values[idx] + shift
                } else {
                    self.values[idx]
                };
                indices.push(col);
                values.push(value);
            }
            if !placed {
                indices.push(row);
                values.push(shift);
            }
            indptr.push(indices.len());
        }

        Self {
            rows: self.rows,
            cols: self.cols,
            indptr,
            indices,
            values,
        }
    }

    /// Densify. Intended for the small normal-equations systems only; the
    /// design matrix itself must stay sparse.
    pub fn to_dense(&self) -> Array2<E> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for row in 0..self.rows {
            for idx in self.indptr[row]..self.indptr[row + 1] {
                dense[[row, self.indices[idx]]] = self.values[idx];
            }
        }
        dense
    }
}

/// Zero-fill incomplete LU factorisation of a square CSR matrix.
///
/// The factors share the sparsity pattern of the input, so no fill-in is
/// allocated and the triangular solves stay cheap. The factorisation is exact
/// whenever the elimination generates no fill outside the pattern, which
/// holds for the per-pixel block structure of the normal-equations matrix;
/// in general it is an approximation the caller opts into.
#[derive(Clone, Debug)]
pub struct IncompleteLu<E> {
    factors: CsrMatrix<E>,
    /// Position of the diagonal entry within each row of `factors`.
    diagonal: Vec<usize>,
}

impl<E: Float> IncompleteLu<E> {
    /// Factorise `matrix` in place over its own sparsity pattern.
    ///
    /// # Errors
    /// Returns [`Error::ZeroPivot`] if a diagonal entry is structurally
    /// missing or becomes zero during elimination.
    pub fn factorize(matrix: &CsrMatrix<E>) -> Result<Self> {
        assert_eq!(matrix.rows, matrix.cols, "factorisation requires a square matrix");
        let n = matrix.rows;
        let mut factors = matrix.clone();
        let mut diagonal = vec![usize::MAX; n];

        // Column index -> entry position for the row under elimination.
        let mut position = vec![usize::MAX; n];

        for row in 0..n {
            let span = factors.indptr[row]..factors.indptr[row + 1];
            for idx in span.clone() {
                position[factors.indices[idx]] = idx;
            }

            for idx in span.clone() {
                let pivot_row = factors.indices[idx];
                if pivot_row >= row {
                    break;
                }
                let pivot_idx = diagonal[pivot_row];
                let pivot = factors.values[pivot_idx];
                if pivot == E::zero() {
                    return Err(Error::ZeroPivot { row: pivot_row });
                }
                let multiplier = factors.values[idx] / pivot;
                factors.values[idx] = multiplier;

                for upper_idx in pivot_idx + 1..factors.indptr[pivot_row + 1] {
                    let col = factors.indices[upper_idx];
                    let target = position[col];
                    // Updates landing outside the pattern are dropped: that
                    // is the approximation.
                    if target != usize::MAX {
                        factors.values[target] =
                            factors.values[target] - multiplier * factors.values[upper_idx];
                    }
                }
            }

            let diag_idx = position[row];
            if diag_idx == usize::MAX || factors.values[diag_idx] == E::zero() {
                return Err(Error::ZeroPivot { row });
            }
            diagonal[row] = diag_idx;

            for idx in span {
                position[factors.indices[idx]] = usize::MAX;
            }
        }

        Ok(Self { factors, diagonal })
    }

    /// Solve `L U x = b` by forward then backward substitution.
    ///
    /// # Panics
    /// Panics if `b` has the wrong length.
    pub fn solve(&self, b: &Array1<E>) -> Array1<E> {
        let n = self.factors.rows;
        assert_eq!(b.len(), n, "right-hand side length must match");
        let mut x = b.clone();

        // Unit lower triangle.
        for row in 0..n {
            let mut value = x[row];
            for idx in self.factors.indptr[row]..self.diagonal[row] {
                value = value - self.factors.values[idx] * x[self.factors.indices[idx]];
            }
            x[row] = value;
        }

        // Upper triangle including the diagonal.
        for row in (0..n).rev() {
            let mut value = x[row];
            for idx in self.diagonal[row] + 1..self.factors.indptr[row + 1] {
                value = value - self.factors.values[idx] * x[self.factors.indices[idx]];
            }
            x[row] = value / self.factors.values[self.diagonal[row]];
        }

        x
    }
}

//! Forward model assembly.
//!
//! The design ("hat") matrix maps per-pixel, per-compound concentration
//! coefficients onto the stacked residual observation vector. Each pixel is
//! an independent linear mixture of the same compound templates, so the
//! matrix is block structured: for compound `i` and pixel `j`, column
//! `i * Np + j` carries the compound's reference spectrum at rows
//! `[j * Nl, (j + 1) * Nl)` and is zero elsewhere.

use ndarray::ArrayView2;
use num_traits::Float;

use crate::sparse::CsrMatrix;

/// Build the sparse design matrix for `num_pixels` pixels.
///
/// `spectra` has one reference spectrum per row, shape `(Ns, Nl)`. The result
/// has shape `(Nl * Np, Ns * Np)` with exactly `Ns * Np * Nl` stored entries.
/// Row `j * Nl + l` holds, for every compound `i`, the value `spectra[i, l]`
/// at column `i * Np + j`, which assembles the matrix directly in row-major
/// CSR order.
///
/// # Panics
/// Panics if `spectra` is empty or `num_pixels` is zero.
pub fn build_design_matrix<E: Float>(
    spectra: ArrayView2<'_, E>,
    num_pixels: usize,
) -> CsrMatrix<E> {
    let (num_compounds, num_samples) = spectra.dim();
    assert!(
        num_compounds > 0 && num_samples > 0 && num_pixels > 0,
        "design matrix dimensions must be nonzero"
    );

    let rows = num_samples * num_pixels;
    let cols = num_compounds * num_pixels;
    let nnz = num_compounds * rows;

    let indptr = (0..=rows).map(|row| row * num_compounds).collect();
    let mut indices = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);

    for pixel in 0..num_pixels {
        for sample in 0..num_samples {
            for compound in 0..num_compounds {
                indices.push(compound * num_pixels + pixel);
                values.push(spectra[[compound, sample]]);
            }
        }
    }

    CsrMatrix::from_parts(rows, cols, indptr, indices, values)
}

/// The `(Nl, Ns)` diagnostic matrix for exactly one synthetic pixel.
///
/// Used by the correlation reporter; identical to [`build_design_matrix`]
/// with a pixel count of one.
pub fn single_pixel_design_matrix<E: Float>(spectra: ArrayView2<'_, E>) -> CsrMatrix<E> {
    build_design_matrix(spectra, 1)
}

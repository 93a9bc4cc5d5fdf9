//! Regularised linear least-squares inversion.
//!
//! Inverts the observed residual spectra against the reference library by
//! solving the normal equations `AᵗA x = Aᵗy` for the per-pixel,
//! per-compound concentration coefficients, together with their marginal
//! posterior variances. The solver is a pure function of its inputs; artifact
//! emission lives in [`crate::sink`].

use log::info;
use ndarray::{Array1, ArrayView2, ScalarOperand};
use ndarray_linalg::{Inverse, Lapack, Scalar};
use num_traits::Float;

use crate::design::build_design_matrix;
use crate::sparse::{CsrMatrix, IncompleteLu};
use crate::{Error, Result};

/// Strategy for solving the normal-equations system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Factorization {
    /// Direct solve through the dense factorisation. Fails on singular
    /// systems.
    Exact,
    /// Incomplete LU over the sparsity pattern. Faster and more memory
    /// efficient for large pixel counts, with an empirical error around
    /// 0.5-1%; the result is flagged [`SolveStatus::Approximate`].
    Incomplete,
}

/// Whether the returned coefficients come from an exact or an approximate
/// solve. Downstream consumers decide whether to trust variance estimates
/// derived from an approximate one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Exact,
    Approximate,
}

/// Tuning knobs for one inversion call.
#[derive(Clone, Copy, Debug)]
pub struct InversionOptions<E> {
    /// Ridge strength for the `C + λ DᵗD` augmentation, with `D` the
    /// identity over the compound dimension.
    pub lambda: E,
    /// Whether to fold the ridge term into the normal equations before
    /// solving. Off by default: the historical pipeline constructed the
    /// regulariser but solved the plain system, and both behaviours must stay
    /// reproducible.
    pub apply_regularization: bool,
    /// Return the posterior inverse-covariance matrix alongside the estimate.
    pub return_posterior_precision: bool,
    pub factorization: Factorization,
}

impl<E: Float> Default for InversionOptions<E> {
    fn default() -> Self {
        Self {
            lambda: E::from(5e-3).unwrap(),
            apply_regularization: false,
            return_posterior_precision: true,
            factorization: Factorization::Incomplete,
        }
    }
}

/// The maximum a posteriori estimate and its uncertainty.
#[derive(Clone, Debug)]
pub struct Inversion<E> {
    /// Concentration-proxy coefficients, length `Ns * Np`, ordered compound
    /// major: entry `i * Np + j` belongs to compound `i` in pixel `j`.
    pub coefficients: Array1<E>,
    /// Marginal posterior variance per coefficient: the diagonal of the
    /// inverse normal-equations matrix.
    pub variance: Array1<E>,
    /// The (possibly augmented) normal-equations matrix `C`, when requested.
    pub posterior_precision: Option<CsrMatrix<E>>,
    pub status: SolveStatus,
}

/// Invert `residual_spectra` against `reference_spectra`.
///
/// `reference_spectra` has shape `(Ns, Nl)`, one absorption spectrum per
/// compound; `residual_spectra` has shape `(Np, Nl)`, one residual spectrum
/// per pixel, on the identical spectral grid.
///
/// The variance step densifies `C` and inverts it, which scales as
/// `O((Ns * Np)³)`: this is the scalability ceiling of the whole pipeline.
/// The incomplete factorisation only mitigates the coefficient solve, not the
/// variance computation.
///
/// # Errors
/// - [`Error::ShapeMismatch`] when the spectral grid lengths differ, raised
///   before any matrix is built.
/// - [`Error::SingularSystem`] when `C` is numerically singular.
/// - [`Error::ZeroPivot`] when the incomplete factorisation breaks down.
pub fn invert<E>(
    reference_spectra: ArrayView2<'_, E>,
    residual_spectra: ArrayView2<'_, E>,
    options: &InversionOptions<E>,
) -> Result<Inversion<E>>
where
    E: Float + Scalar + Lapack + ScalarOperand,
{
    let (_, num_samples) = reference_spectra.dim();
    let (num_pixels, observed_samples) = residual_spectra.dim();
    if num_samples != observed_samples {
        return Err(Error::ShapeMismatch {
            reference: num_samples,
            observed: observed_samples,
        });
    }

    let design = build_design_matrix(reference_spectra, num_pixels);
    let observations = Array1::from_iter(residual_spectra.iter().copied());

    let design_t = design.transpose();
    let mut normal = design_t.matmul(&design);
    if options.apply_regularization {
        normal = normal.add_diagonal(options.lambda);
    }
    let rhs = design_t.mul_vec(&observations);

    info!(
        "inverting a dense {n} x {n} normal-equations matrix for the variance diagonal",
        n = normal.rows()
    );
    let precision_inverse = normal
        .to_dense()
        .inv()
        .map_err(|error| Error::SingularSystem(error.to_string()))?;
    let variance = precision_inverse.diag().to_owned();

    let (coefficients, status) = match options.factorization {
        Factorization::Exact => (precision_inverse.dot(&rhs), SolveStatus::Exact),
        Factorization::Incomplete => (
            IncompleteLu::factorize(&normal)?.solve(&rhs),
            SolveStatus::Approximate,
        ),
    };

    Ok(Inversion {
        coefficients,
        variance,
        posterior_precision: options.return_posterior_precision.then_some(normal),
        status,
    })
}

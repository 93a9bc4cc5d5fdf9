//! Compound-to-compound uncertainty diagnostics.
//!
//! Works on the single-pixel design matrix, decoupled from the full
//! per-pixel inversion: the correlation structure between compounds depends
//! only on their reference spectra, so one synthetic pixel is enough.

use ndarray::{Array1, Array2, ScalarOperand};
use ndarray_linalg::{Inverse, Lapack, Scalar, SVD};
use num_traits::Float;

use crate::design::single_pixel_design_matrix;
use crate::library::{Gas, ReferenceLibrary};
use crate::math::outer_product;
use crate::sink::ArtifactSink;
use crate::solve::Inversion;
use crate::{Error, Result};

/// Posterior correlation structure between compounds.
#[derive(Clone, Debug)]
pub struct CorrelationReport<E> {
    /// Compound names in library row order; axis labels for the matrix.
    pub names: Vec<Gas>,
    /// The `(Ns, Ns)` correlation matrix: symmetric, unit diagonal, entries
    /// in `[-1, 1]`.
    pub correlation: Array2<E>,
    /// Marginal posterior standard deviation per compound.
    pub standard_deviations: Array1<E>,
}

/// Singular value decomposition of the single-pixel normal-equations matrix.
#[derive(Clone, Debug)]
pub struct SvdSummary<E> {
    pub u: Array2<E>,
    pub singular_values: Array1<E>,
    pub vt: Array2<E>,
}

/// Derive the compound-by-compound correlation matrix from the library.
///
/// Forms the single-pixel normal equations, inverts them and normalises the
/// inverse by its diagonal: `corr[i, j] = cov[i, j] / (std[i] * std[j])`.
///
/// # Errors
/// Returns [`Error::SingularSystem`] when compounds are linearly dependent
/// (e.g. duplicated spectra) and the normal equations cannot be inverted.
pub fn compound_correlation<E>(library: &ReferenceLibrary<E>) -> Result<CorrelationReport<E>>
where
    E: Float + Scalar + Lapack + ScalarOperand,
{
    let single = single_pixel_design_matrix(library.absorbance());
    let normal = single.transpose().matmul(&single);
    let covariance = normal
        .to_dense()
        .inv()
        .map_err(|error| Error::SingularSystem(error.to_string()))?;

    let standard_deviations = covariance.diag().mapv(Float::sqrt);
    let denominator = outer_product(&standard_deviations, &standard_deviations)?;
    let correlation = &covariance / &denominator;

    Ok(CorrelationReport {
        names: library.names().to_vec(),
        correlation,
        standard_deviations,
    })
}

/// Singular value decomposition of the single-pixel normal-equations matrix,
/// a conditioning diagnostic for the chosen compound set.
///
/// # Errors
/// Propagates the underlying LAPACK failure if the decomposition does not
/// converge.
pub fn svd_summary<E>(library: &ReferenceLibrary<E>) -> Result<SvdSummary<E>>
where
    E: Float + Scalar<Real = E> + Lapack + ScalarOperand,
{
    let single = single_pixel_design_matrix(library.absorbance());
    let normal = single.transpose().matmul(&single).to_dense();

    let (u, singular_values, vt) = normal.svd(true, true)?;

    Ok(SvdSummary {
        u: u.expect("left singular vectors were requested"),
        singular_values,
        vt: vt.expect("right singular vectors were requested"),
    })
}

/// Push the diagnostic artifacts into a sink.
///
/// Purely an output stage: all values are computed before anything is
/// written, so a sink failure cannot mask a computational one.
///
/// # Errors
/// Propagates sink write failures.
pub fn emit<E, S>(
    sink: &mut S,
    correlation: &CorrelationReport<E>,
    svd: Option<&SvdSummary<E>>,
    inversion: Option<&Inversion<E>>,
) -> Result<()>
where
    S: ArtifactSink<E>,
{
    sink.write_matrix(
        "correlation_matrix",
        correlation.correlation.view(),
        Some(&correlation.names),
    )?;
    if let Some(svd) = svd {
        sink.write_matrix("svd_u", svd.u.view(), None)?;
        sink.write_vector("svd_singular_values", svd.singular_values.view())?;
        sink.write_matrix("svd_vt", svd.vt.view(), None)?;
    }
    if let Some(inversion) = inversion {
        sink.write_vector("map_solution", inversion.coefficients.view())?;
        sink.write_vector("map_variance", inversion.variance.view())?;
    }
    Ok(())
}

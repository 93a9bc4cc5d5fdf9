use ndarray::{Array1, ArrayView1};
use num_traits::Float;

/// Outcome of resampling a simulated spectrum onto an observation sub-grid.
#[derive(Clone, Debug)]
pub struct Resampled<E> {
    /// Absorbance values on the target grid.
    pub values: Array1<E>,
    /// Fractional change in integrated absorbance caused by resampling.
    ///
    /// Compared against the configured tolerance by callers; this is a
    /// quality gate, not a hard error.
    pub energy_loss: E,
}

/// Resample `(w_src, a_src)` onto the grid `w_dst` by linear interpolation.
///
/// Target points outside the source range are clamped to the boundary value.
/// The integrated absorbance (trapezoidal rule) is compared before and after
/// so the caller can judge how much energy the interpolation discarded.
///
/// # Panics
/// Panics if `w_src` is not strictly increasing with at least two samples, or
/// if `a_src` has a different length.
pub fn resample<E: Float>(
    w_src: ArrayView1<'_, E>,
    a_src: ArrayView1<'_, E>,
    w_dst: ArrayView1<'_, E>,
) -> Resampled<E> {
    assert_eq!(w_src.len(), a_src.len(), "source grid and spectrum lengths differ");
    assert!(w_src.len() >= 2, "need at least two source samples to interpolate");
    for i in 1..w_src.len() {
        assert!(w_src[i] > w_src[i - 1], "source grid must be strictly increasing");
    }

    let values: Array1<E> = w_dst.iter().map(|&w| interpolate(w_src, a_src, w)).collect();

    let source_energy = trapezoid(w_src, a_src);
    let target_energy = trapezoid(w_dst, values.view());
    let energy_loss = if source_energy == E::zero() {
        E::zero()
    } else {
        Float::abs((source_energy - target_energy) / source_energy)
    };

    Resampled { values, energy_loss }
}

fn interpolate<E: Float>(w: ArrayView1<'_, E>, a: ArrayView1<'_, E>, at: E) -> E {
    let n = w.len();
    if at <= w[0] {
        return a[0];
    }
    if at >= w[n - 1] {
        return a[n - 1];
    }

    // Binary search for the enclosing interval
    let mut lo = 0;
    let mut hi = n - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if w[mid] > at {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let fraction = (at - w[lo]) / (w[hi] - w[lo]);
    a[lo] + fraction * (a[hi] - a[lo])
}

fn trapezoid<E: Float>(w: ArrayView1<'_, E>, a: ArrayView1<'_, E>) -> E {
    let half = E::from(0.5).unwrap();
    let mut total = E::zero();
    for i in 1..w.len() {
        total = total + half * (a[i] + a[i - 1]) * (w[i] - w[i - 1]);
    }
    total
}

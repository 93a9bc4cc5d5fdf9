use ndarray::{Array1, Array2, ArrayView1, LinalgScalar};
use num_traits::Float;

use crate::Result;

/// Compute the outer product of two one-dimensional vectors of length (m x 1) and (n x 1)
///
/// The outer product is the (m x n) matrix whose elements are products of elements in the first
/// vector with those in the second.
///
/// # Examples
///
/// ```
/// use spectral_inversion::math::outer_product;
/// use ndarray::{arr1, arr2, Array1};
///
/// let u: Array1<f64> = arr1(&[1., 2., 3.]);
/// let v = arr1(&[4., 5., 6.]);
/// let outer_product = outer_product(&u, &v).unwrap();
///
/// let expected = arr2(&[[4., 5., 6.], [8., 10., 12.], [12., 15., 18.]]);
/// assert_eq!(outer_product, expected);
///```
pub fn outer_product<T: LinalgScalar>(u: &Array1<T>, v: &Array1<T>) -> Result<Array2<T>> {
    let u: Array2<T> = u.clone().into_shape((u.len(), 1))?;
    let v: Array2<T> = v.clone().into_shape((1, v.len()))?;

    Ok(ndarray::linalg::kron(&u, &v))
}

/// Index of the grid sample closest to `value`.
///
/// Nearest-index lookup rather than exact match: simulated and observed grids
/// need not coincide. The grid is not required to be sorted.
///
/// # Panics
/// Panics if `grid` is empty.
pub fn nearest_index<E: Float>(grid: ArrayView1<'_, E>, value: E) -> usize {
    assert!(!grid.is_empty(), "cannot search an empty grid");
    let mut best = 0;
    let mut best_distance = Float::abs(grid[0] - value);
    for (index, &sample) in grid.iter().enumerate().skip(1) {
        let distance = Float::abs(sample - value);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

/// Build a unit-area Gaussian kernel sampled at spacing `step`.
///
/// The kernel extends to three standard deviations either side of the centre,
/// which captures all but ~0.3% of the mass.
///
/// # Panics
/// Panics if `width` or `step` is not strictly positive.
pub fn gaussian_kernel<E: Float>(width: E, step: E) -> Array1<E> {
    assert!(
        width > E::zero() && step > E::zero(),
        "kernel width and sample spacing must be positive"
    );
    let three = E::from(3).unwrap();
    let half_points = (three * width / step).ceil().to_usize().unwrap();
    let half = E::from(0.5).unwrap();

    let mut kernel: Array1<E> = (0..=2 * half_points)
        .map(|n| {
            let offset = (E::from(n).unwrap() - E::from(half_points).unwrap()) * step;
            Float::exp(-half * Float::powi(offset / width, 2))
        })
        .collect();

    let total = kernel.iter().fold(E::zero(), |acc, &k| acc + k);
    kernel.mapv_inplace(|k| k / total);
    kernel
}

/// Convolve `signal` with `kernel`, returning a vector the length of `signal`.
///
/// Samples beyond the ends of the signal are taken at the boundary value, so
/// a constant signal is left unchanged by any unit-area kernel.
pub fn convolve_same<E: Float>(signal: ArrayView1<'_, E>, kernel: ArrayView1<'_, E>) -> Array1<E> {
    let n = signal.len();
    let half = kernel.len() / 2;
    let mut output = Array1::zeros(n);
    for i in 0..n {
        let mut accumulated = E::zero();
        for (k, &weight) in kernel.iter().enumerate() {
            let offset = i as isize + k as isize - half as isize;
            let clamped = offset.clamp(0, n as isize - 1) as usize;
            accumulated = accumulated + weight * signal[clamped];
        }
        output[i] = accumulated;
    }
    output
}

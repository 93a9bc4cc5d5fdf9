#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

extern crate blas_src;

pub mod design;
pub mod library;
pub mod math;
pub mod report;
pub mod resample;
pub mod sink;
pub mod solve;
pub mod sparse;

use thiserror::Error;

/// Failure modes of the inversion core.
///
/// Precondition violations and numerical singularity are fatal for the call
/// in which they occur; no partial result is produced. Recoverable
/// per-sub-band simulation failures are *not* errors and are reported through
/// [`library::SubBandStatus`] instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("spectral grids do not match: {reference} samples against {observed}")]
    ShapeMismatch { reference: usize, observed: usize },
    #[error("library holds {rows} spectra but {names} compound names")]
    NameCount { rows: usize, names: usize },
    #[error("observation grid is empty")]
    EmptyGrid,
    #[error("normal-equations matrix is numerically singular: {0}")]
    SingularSystem(String),
    #[error("zero pivot in row {row} of the incomplete factorisation")]
    ZeroPivot { row: usize },
    #[error("failed to write artifact `{name}`: {source}")]
    Artifact { name: String, source: csv::Error },
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    LinAlg(#[from] ndarray_linalg::error::LinalgError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = ::std::result::Result<T, Error>;

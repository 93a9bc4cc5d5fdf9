//! Reference absorption-spectrum library.
//!
//! Each compound is simulated sub-band by sub-band through an external
//! line-by-line spectroscopy service, converted to absorbance on the
//! observation grid and accumulated into one row of the library matrix. A
//! failed simulation skips that sub-band and leaves its grid region zero; the
//! library is still usable for the remaining bands.

use std::fmt::Display;
use std::fs;
use std::path::Path;

use log::warn;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use num_traits::Float;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::math::{convolve_same, gaussian_kernel, nearest_index};
use crate::resample::resample;
use crate::{Error, Result};

/// A chemical species with one or more characteristic absorption sub-bands.
#[derive(Clone, Hash, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Gas(pub String);

impl Display for Gas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A compound to include in the library, with its absorption sub-bands in
/// wavenumber space (cm⁻¹).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Compound<E> {
    pub name: Gas,
    pub bounds: Vec<(E, E)>,
}

/// Instrument line-shape stage applied after resampling.
///
/// Kept as an explicit stage so broadening can be tested (and disabled)
/// independently of the simulation and resampling steps.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum LineShape<E> {
    None,
    Gaussian { width: E },
}

impl<E> Default for LineShape<E> {
    fn default() -> Self {
        Self::None
    }
}

impl<E: Float> LineShape<E> {
    /// Convolve `absorbance`, sampled at spacing `step`, with the line shape.
    pub fn apply(&self, step: E, absorbance: ArrayView1<'_, E>) -> Array1<E> {
        match self {
            Self::None => absorbance.to_owned(),
            Self::Gaussian { width } => {
                if absorbance.len() < 2 || *width <= E::zero() || step <= E::zero() {
                    return absorbance.to_owned();
                }
                convolve_same(absorbance, gaussian_kernel(*width, step).view())
            }
        }
    }
}

/// Build configuration for one reference library.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LibraryConfig<E> {
    /// Gas temperature in Kelvin.
    pub temperature: E,
    /// Pressure in bar.
    pub pressure: E,
    #[serde(default)]
    pub line_shape: LineShape<E>,
    /// Acceptance threshold for resampling energy loss. Defaults to 2%.
    #[serde(default)]
    pub energy_loss_tolerance: Option<E>,
    pub compounds: Vec<Compound<E>>,
}

impl<E: Float + DeserializeOwned + Default> LibraryConfig<E> {
    /// Read a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

impl<E: Float> LibraryConfig<E> {
    pub fn energy_loss_gate(&self) -> E {
        self.energy_loss_tolerance
            .unwrap_or_else(|| E::from(2e-2).unwrap())
    }
}

/// A request to the external line-by-line simulation service.
#[derive(Clone, Debug)]
pub struct SimulationRequest<E> {
    /// Lower sub-band edge, cm⁻¹.
    pub lower: E,
    /// Upper sub-band edge, cm⁻¹.
    pub upper: E,
    pub molecule: Gas,
    /// Pressure in bar.
    pub pressure: E,
    /// Gas temperature in Kelvin.
    pub temperature: E,
    pub mole_fraction: E,
    /// Absorption path length in cm.
    pub path_length: E,
    pub suppress_accuracy_warnings: bool,
}

impl<E: Float> SimulationRequest<E> {
    /// A request at the fixed trace conditions used for library rows: mole
    /// fraction 1e-6 over a 100 cm path.
    pub fn trace(lower: E, upper: E, molecule: Gas, pressure: E, temperature: E) -> Self {
        Self {
            lower,
            upper,
            molecule,
            pressure,
            temperature,
            mole_fraction: E::from(1e-6).unwrap(),
            path_length: E::from(100).unwrap(),
            suppress_accuracy_warnings: true,
        }
    }
}

/// A simulated spectrum on the service's own wavenumber axis.
#[derive(Clone, Debug)]
pub struct SimulatedSpectrum<E> {
    pub wavenumber: Array1<E>,
    pub absorbance: Array1<E>,
}

/// Failure of a single sub-band simulation. Recoverable: the sub-band is
/// skipped and the build continues.
#[derive(Debug, thiserror::Error)]
#[error("simulation of {molecule} failed: {reason}")]
pub struct SimulationError {
    pub molecule: Gas,
    pub reason: String,
}

/// Port to the external spectroscopy simulation service.
pub trait SpectroscopyService<E> {
    /// Simulate the absorbance spectrum for one sub-band request.
    ///
    /// # Errors
    /// Returns a [`SimulationError`] describing why the sub-band could not be
    /// simulated.
    fn simulate(
        &self,
        request: &SimulationRequest<E>,
    ) -> ::std::result::Result<SimulatedSpectrum<E>, SimulationError>;
}

/// How one sub-band fared during the library build.
#[derive(Clone, Debug, PartialEq)]
pub enum SubBandStatus<E> {
    Built { energy_loss: E },
    Skipped { reason: String },
}

#[derive(Clone, Debug)]
pub struct SubBandReport<E> {
    pub compound: Gas,
    pub bound: (E, E),
    pub status: SubBandStatus<E>,
}

/// The reference library: one absorbance spectrum per compound, aligned to
/// the shared observation grid. Immutable once built and intended for reuse
/// across inversion calls.
#[derive(Clone, Debug)]
pub struct ReferenceLibrary<E> {
    names: Vec<Gas>,
    grid: Array1<E>,
    absorbance: Array2<E>,
}

impl<E: Float> ReferenceLibrary<E> {
    /// Assemble a library from precomputed parts.
    ///
    /// # Errors
    /// Returns an error if the number of names does not match the number of
    /// spectra, or if the spectra are not sampled on `grid`.
    pub fn new(names: Vec<Gas>, grid: Array1<E>, absorbance: Array2<E>) -> Result<Self> {
        if names.len() != absorbance.nrows() {
            return Err(Error::NameCount {
                rows: absorbance.nrows(),
                names: names.len(),
            });
        }
        if grid.len() != absorbance.ncols() {
            return Err(Error::ShapeMismatch {
                reference: absorbance.ncols(),
                observed: grid.len(),
            });
        }
        Ok(Self {
            names,
            grid,
            absorbance,
        })
    }

    pub fn names(&self) -> &[Gas] {
        &self.names
    }

    pub fn grid(&self) -> ArrayView1<'_, E> {
        self.grid.view()
    }

    /// The `(Ns, Nl)` matrix of absorbance spectra.
    pub fn absorbance(&self) -> ArrayView2<'_, E> {
        self.absorbance.view()
    }

    pub fn num_compounds(&self) -> usize {
        self.absorbance.nrows()
    }

    pub fn num_samples(&self) -> usize {
        self.absorbance.ncols()
    }
}

/// Build the reference library on the observation grid `w_obs`.
///
/// Per compound, per sub-band: simulate at trace concentration, locate the
/// grid indices nearest the simulated range, resample onto that sub-range and
/// apply the instrument line shape. Simulation failures skip the sub-band and
/// are recorded in the returned reports; regions outside any sub-band remain
/// zero.
///
/// # Errors
/// Returns an error only for fatal preconditions (an empty observation grid).
/// Per-sub-band failures are reported, not raised.
pub fn build_reference_library<E, S>(
    config: &LibraryConfig<E>,
    w_obs: ArrayView1<'_, E>,
    service: &S,
) -> Result<(ReferenceLibrary<E>, Vec<SubBandReport<E>>)>
where
    E: Float + Display,
    S: SpectroscopyService<E>,
{
    if w_obs.is_empty() {
        return Err(Error::EmptyGrid);
    }

    let gate = config.energy_loss_gate();
    let mut absorbance = Array2::zeros((config.compounds.len(), w_obs.len()));
    let mut reports = Vec::new();

    for (row, compound) in config.compounds.iter().enumerate() {
        let mut accumulator = absorbance.row_mut(row);

        for &(lower, upper) in &compound.bounds {
            let request = SimulationRequest::trace(
                lower,
                upper,
                compound.name.clone(),
                config.pressure,
                config.temperature,
            );
            let mut skip = |reason: String| {
                warn!(
                    "skipping sub-band {lower}..{upper} cm⁻¹ of {}: {reason}",
                    compound.name
                );
                reports.push(SubBandReport {
                    compound: compound.name.clone(),
                    bound: (lower, upper),
                    status: SubBandStatus::Skipped { reason },
                });
            };

            let spectrum = match service.simulate(&request) {
                Ok(spectrum) => spectrum,
                Err(error) => {
                    skip(error.to_string());
                    continue;
                }
            };
            if spectrum.wavenumber.len() < 2 {
                skip("simulated spectrum has fewer than two samples".to_owned());
                continue;
            }

            let w_min = spectrum.wavenumber.iter().copied().fold(E::infinity(), E::min);
            let w_max = spectrum
                .wavenumber
                .iter()
                .copied()
                .fold(E::neg_infinity(), E::max);
            let iloc = nearest_index(w_obs, w_min);
            let jloc = nearest_index(w_obs, w_max);
            // Interpolation and the line-shape step need at least two target
            // samples.
            if jloc < iloc + 2 {
                skip("sub-band is narrower than the observation grid spacing".to_owned());
                continue;
            }

            let target = w_obs.slice(s![iloc..jloc]);
            let resampled = resample(
                spectrum.wavenumber.view(),
                spectrum.absorbance.view(),
                target,
            );
            if resampled.energy_loss > gate {
                warn!(
                    "resampling sub-band {lower}..{upper} cm⁻¹ of {} lost {} of its energy (gate {gate})",
                    compound.name, resampled.energy_loss
                );
            }

            let step = target[1] - target[0];
            let broadened = config.line_shape.apply(step, resampled.values.view());
            accumulator.slice_mut(s![iloc..jloc]).assign(&broadened);

            reports.push(SubBandReport {
                compound: compound.name.clone(),
                bound: (lower, upper),
                status: SubBandStatus::Built {
                    energy_loss: resampled.energy_loss,
                },
            });
        }
    }

    let names = config
        .compounds
        .iter()
        .map(|compound| compound.name.clone())
        .collect();
    let library = ReferenceLibrary::new(names, w_obs.to_owned(), absorbance)?;
    Ok((library, reports))
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;

    use super::{
        build_reference_library, Compound, Gas, LibraryConfig, LineShape, SimulatedSpectrum,
        SimulationError, SimulationRequest, SpectroscopyService, SubBandStatus,
    };

    /// Emits a triangular absorption peak centred on each requested sub-band,
    /// on a grid ten times finer than the observation grid. Sub-bands whose
    /// molecule is named "broken" fail.
    struct TriangleService {
        samples_per_band: usize,
    }

    impl SpectroscopyService<f64> for TriangleService {
        fn simulate(
            &self,
            request: &SimulationRequest<f64>,
        ) -> Result<SimulatedSpectrum<f64>, SimulationError> {
            if request.molecule.0 == "broken" {
                return Err(SimulationError {
                    molecule: request.molecule.clone(),
                    reason: "line database unavailable".to_owned(),
                });
            }
            let wavenumber = Array1::linspace(request.lower, request.upper, self.samples_per_band);
            let centre = 0.5 * (request.lower + request.upper);
            let half_width = 0.5 * (request.upper - request.lower);
            let absorbance =
                wavenumber.mapv(|w| (1.0 - (w - centre).abs() / half_width).max(0.0));
            Ok(SimulatedSpectrum {
                wavenumber,
                absorbance,
            })
        }
    }

    fn config(compounds: Vec<Compound<f64>>) -> LibraryConfig<f64> {
        LibraryConfig {
            temperature: 296.0,
            pressure: 1.0,
            line_shape: LineShape::None,
            energy_loss_tolerance: None,
            compounds,
        }
    }

    #[test]
    fn library_rows_follow_compound_order_and_stay_zero_outside_bands() {
        let grid: Array1<f64> = Array1::linspace(2000., 2200., 201);
        let service = TriangleService {
            samples_per_band: 512,
        };
        let config = config(vec![
            Compound {
                name: Gas("CH4".to_owned()),
                bounds: vec![(2020., 2040.)],
            },
            Compound {
                name: Gas("N2O".to_owned()),
                bounds: vec![(2120., 2160.)],
            },
        ]);

        let (library, reports) =
            build_reference_library(&config, grid.view(), &service).unwrap();

        assert_eq!(library.names(), &[Gas("CH4".to_owned()), Gas("N2O".to_owned())]);
        assert_eq!(library.absorbance().dim(), (2, 201));
        assert_eq!(reports.len(), 2);

        let methane = library.absorbance();
        // Peak of the triangle sits at the band centre, well off the edges.
        let peak = 2030.;
        let peak_index = crate::math::nearest_index(grid.view(), peak);
        assert!(methane[[0, peak_index]] > 0.9);
        // Outside the band the row is untouched.
        assert_eq!(methane[[0, 0]], 0.0);
        assert_eq!(methane[[0, 200]], 0.0);
        // Rows do not bleed into one another.
        assert_eq!(methane[[1, peak_index]], 0.0);
    }

    #[test]
    fn failed_sub_bands_are_skipped_and_reported_without_aborting_the_build() {
        let grid: Array1<f64> = Array1::linspace(1000., 1400., 401);
        let service = TriangleService {
            samples_per_band: 256,
        };
        let config = config(vec![Compound {
            name: Gas("broken".to_owned()),
            bounds: vec![(1100., 1150.)],
        }, Compound {
            name: Gas("SO2".to_owned()),
            bounds: vec![(1300., 1380.)],
        }]);

        let (library, reports) =
            build_reference_library(&config, grid.view(), &service).unwrap();

        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].status, SubBandStatus::Skipped { .. }));
        assert!(matches!(reports[1].status, SubBandStatus::Built { .. }));
        // The failed compound degrades to an all-zero spectrum.
        assert!(library.absorbance().row(0).iter().all(|&a| a == 0.0));
        assert!(library.absorbance().row(1).iter().any(|&a| a > 0.0));
    }

    #[test]
    fn sub_bands_spanning_a_single_grid_sample_are_skipped_not_fatal() {
        // A 1 cm⁻¹ band on a 1 cm⁻¹ grid maps to adjacent indices, which is
        // too narrow to resample onto.
        let grid: Array1<f64> = Array1::linspace(2000., 2010., 11);
        let service = TriangleService {
            samples_per_band: 256,
        };
        let config = config(vec![
            Compound {
                name: Gas("CO".to_owned()),
                bounds: vec![(2003.0, 2004.0)],
            },
            Compound {
                name: Gas("CH4".to_owned()),
                bounds: vec![(2001.0, 2008.0)],
            },
        ]);

        let outcome = build_reference_library(&config, grid.view(), &service);

        assert!(outcome.is_ok());
        let (library, reports) = outcome.unwrap();
        assert!(matches!(reports[0].status, SubBandStatus::Skipped { .. }));
        assert!(matches!(reports[1].status, SubBandStatus::Built { .. }));
        assert!(library.absorbance().row(0).iter().all(|&a| a == 0.0));
        assert!(library.absorbance().row(1).iter().any(|&a| a > 0.0));
    }

    #[test]
    fn configurations_load_from_disk() {
        let directory = tempdir::TempDir::new("library-config").unwrap();
        let path = directory.path().join("scene.toml");
        std::fs::write(
            &path,
            r#"
            temperature = 296.0
            pressure = 1.0

            [[compounds]]
            name = "CH4"
            bounds = [[1200.0, 1400.0]]
            "#,
        )
        .unwrap();

        let config = LibraryConfig::<f64>::from_file(&path).unwrap();

        assert_eq!(config.compounds.len(), 1);
        assert_eq!(config.compounds[0].name, Gas("CH4".to_owned()));
        assert_eq!(config.line_shape, LineShape::None);
        approx::assert_relative_eq!(config.energy_loss_gate(), 0.02);
    }

    #[test]
    fn gaussian_line_shape_broadens_without_creating_energy() {
        let grid: Array1<f64> = Array1::linspace(0., 10., 101);
        let mut narrow = Array1::zeros(101);
        narrow[50] = 1.0;

        let broadened = LineShape::Gaussian { width: 0.3 }.apply(0.1, narrow.view());

        approx::assert_relative_eq!(broadened.sum(), 1.0, max_relative = 1e-10);
        assert!(broadened[50] < 1.0);
        assert_eq!(grid.len(), broadened.len());

        let untouched = LineShape::<f64>::None.apply(0.1, narrow.view());
        assert_eq!(untouched, narrow);
    }

    #[test]
    fn configurations_parse_from_toml() {
        let raw = r#"
            temperature = 296.0
            pressure = 1.0
            energy_loss_tolerance = 0.05

            [line_shape]
            shape = "gaussian"
            width = 0.241

            [[compounds]]
            name = "CH4"
            bounds = [[1200.0, 1400.0], [2800.0, 3200.0]]

            [[compounds]]
            name = "N2O"
            bounds = [[2150.0, 2260.0]]
        "#;

        let config: LibraryConfig<f64> = toml::from_str(raw).unwrap();

        assert_eq!(config.compounds.len(), 2);
        assert_eq!(config.compounds[0].name, Gas("CH4".to_owned()));
        assert_eq!(config.compounds[0].bounds.len(), 2);
        assert_eq!(config.line_shape, LineShape::Gaussian { width: 0.241 });
        approx::assert_relative_eq!(config.energy_loss_gate(), 0.05);
    }

    #[test]
    fn default_energy_gate_is_two_percent() {
        let raw = r#"
            temperature = 296.0
            pressure = 1.0

            [[compounds]]
            name = "CH4"
            bounds = [[1200.0, 1400.0]]
        "#;

        let config: LibraryConfig<f64> = toml::from_str(raw).unwrap();

        assert_eq!(config.line_shape, LineShape::None);
        approx::assert_relative_eq!(config.energy_loss_gate(), 0.02);
    }
}

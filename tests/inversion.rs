use ndarray::{Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use tempdir::TempDir;

use spectral_inversion::library::{
    build_reference_library, Gas, LibraryConfig, SimulatedSpectrum, SimulationError,
    SimulationRequest, SpectroscopyService, SubBandStatus,
};
use spectral_inversion::report::{compound_correlation, emit, svd_summary};
use spectral_inversion::sink::{CsvSink, MemorySink};
use spectral_inversion::solve::{invert, Factorization, InversionOptions, SolveStatus};
use spectral_inversion::Result;

/// Stands in for the external line-by-line simulation: each sub-band becomes
/// a Gaussian absorption feature at its centre, sampled ten times finer than
/// the observation grid. Molecules named "broken" always fail.
struct GaussianLineService;

impl SpectroscopyService<f64> for GaussianLineService {
    fn simulate(
        &self,
        request: &SimulationRequest<f64>,
    ) -> std::result::Result<SimulatedSpectrum<f64>, SimulationError> {
        if request.molecule.0 == "broken" {
            return Err(SimulationError {
                molecule: request.molecule.clone(),
                reason: "line list missing".to_owned(),
            });
        }
        let samples = 1024;
        let wavenumber = Array1::linspace(request.lower, request.upper, samples);
        let centre = 0.5 * (request.lower + request.upper);
        let width = 0.1 * (request.upper - request.lower);
        let absorbance = wavenumber.mapv(|w: f64| (-((w - centre) / width).powi(2)).exp());
        Ok(SimulatedSpectrum {
            wavenumber,
            absorbance,
        })
    }
}

fn scene_config() -> LibraryConfig<f64> {
    toml::from_str(
        r#"
        temperature = 300.0
        pressure = 1.0

        [[compounds]]
        name = "CH4"
        bounds = [[2040.0, 2080.0]]

        [[compounds]]
        name = "N2O"
        bounds = [[2180.0, 2230.0]]
        "#,
    )
    .unwrap()
}

/// Per-pixel residuals synthesised as a noiseless linear mixture of the
/// library rows, with `x_true[i * num_pixels + j]` the amount of compound `i`
/// in pixel `j`.
fn synthesise_residuals(
    absorbance: ndarray::ArrayView2<'_, f64>,
    x_true: &Array1<f64>,
    num_pixels: usize,
) -> Array2<f64> {
    let (num_compounds, num_samples) = absorbance.dim();
    let mut residuals = Array2::zeros((num_pixels, num_samples));
    for pixel in 0..num_pixels {
        for compound in 0..num_compounds {
            let amount = x_true[compound * num_pixels + pixel];
            let mut row = residuals.row_mut(pixel);
            row += &absorbance.row(compound).mapv(|a| amount * a);
        }
    }
    residuals
}

#[test]
fn a_scene_is_inverted_end_to_end_from_library_to_artifacts() -> Result<()> {
    let seed = 40;
    let mut rng = Isaac64Rng::seed_from_u64(seed);
    let grid: Array1<f64> = Array1::linspace(2000., 2300., 301);

    let (library, reports) =
        build_reference_library(&scene_config(), grid.view(), &GaussianLineService)?;
    assert!(reports
        .iter()
        .all(|report| matches!(report.status, SubBandStatus::Built { .. })));

    let num_pixels = 6;
    let x_true: Array1<f64> = (0..library.num_compounds() * num_pixels)
        .map(|_| rng.gen_range(0.0..5.0))
        .collect();
    let residuals = synthesise_residuals(library.absorbance(), &x_true, num_pixels);

    // Exact path recovers the synthetic concentrations.
    let exact = invert(
        library.absorbance(),
        residuals.view(),
        &InversionOptions {
            factorization: Factorization::Exact,
            ..InversionOptions::default()
        },
    )?;
    assert_eq!(exact.status, SolveStatus::Exact);
    for (&computed, &known) in exact.coefficients.iter().zip(&x_true) {
        approx::assert_relative_eq!(computed, known, max_relative = 1e-6, epsilon = 1e-9);
    }

    // The approximate path is flagged and stays within its documented error.
    let approximate = invert(
        library.absorbance(),
        residuals.view(),
        &InversionOptions::default(),
    )?;
    assert_eq!(approximate.status, SolveStatus::Approximate);
    for (&computed, &known) in approximate.coefficients.iter().zip(&x_true) {
        approx::assert_relative_eq!(computed, known, max_relative = 1e-2, epsilon = 1e-9);
    }

    // Diagnostics land in whatever sink the caller supplies.
    let correlation = compound_correlation(&library)?;
    let svd = svd_summary(&library)?;
    let mut memory = MemorySink::default();
    emit(&mut memory, &correlation, Some(&svd), Some(&exact))?;

    assert_eq!(
        memory.labels["correlation_matrix"],
        vec![Gas("CH4".to_owned()), Gas("N2O".to_owned())]
    );
    assert_eq!(memory.matrices["correlation_matrix"].dim(), (2, 2));
    assert_eq!(memory.vectors["map_solution"].len(), x_true.len());
    assert_eq!(memory.vectors["map_variance"].len(), x_true.len());
    assert_eq!(memory.vectors["svd_singular_values"].len(), 2);

    let directory = TempDir::new("inversion-artifacts").unwrap();
    let mut csv_sink = CsvSink::new(directory.path());
    emit(&mut csv_sink, &correlation, Some(&svd), Some(&exact))?;
    for artifact in [
        "correlation_matrix",
        "svd_u",
        "svd_singular_values",
        "svd_vt",
        "map_solution",
        "map_variance",
    ] {
        assert!(directory.path().join(format!("{artifact}.csv")).exists());
    }

    Ok(())
}

#[test]
fn broken_compounds_degrade_gracefully_and_stay_invertible_after_removal() -> Result<()> {
    let grid: Array1<f64> = Array1::linspace(2000., 2300., 301);
    let mut config = scene_config();
    config.compounds[1].name = Gas("broken".to_owned());

    let (library, reports) =
        build_reference_library(&config, grid.view(), &GaussianLineService)?;

    assert!(matches!(reports[1].status, SubBandStatus::Skipped { .. }));
    // The broken compound's spectrum is zero-filled, which makes the
    // correlation system singular; that failure is typed, not silent.
    let outcome = compound_correlation(&library);
    assert!(matches!(
        outcome,
        Err(spectral_inversion::Error::SingularSystem(_))
    ));

    Ok(())
}

//! Loads the canonical rotation scenario's noise tables from checked-in CSV
//! fixtures (the same `evolErrs`/`obsErrs` values `demos/rotation.rs` carries
//! as literal arrays, originally MATLAB-generated per `rotation.c`'s own
//! data-generation comment) instead of baking them in as Rust constants,
//! using `csv`/`serde` the way the teacher's `Cargo.toml` dev-dependencies
//! are meant to be used for loading reference trajectories.

use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use serde::Deserialize;
use ultimate_kalman::{Algorithm, Covariance, Driver, KalmanOptions};

#[derive(Debug, Deserialize)]
struct ErrRow {
    #[allow(dead_code)]
    step: usize,
    x: f64,
    y: f64,
}

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Load a `step,x,y` fixture into a `2 x rows` matrix, one column per
/// timestep (the same row-major layout `demos/rotation.rs`'s
/// `EVOL_ERRS_ROWWISE`/`OBS_ERRS_ROWWISE` arrays are built in).
fn load_err_columns(path: &Path, expected_rows: usize) -> DMatrix<f64> {
    let mut reader = csv::Reader::from_path(path)
        .unwrap_or_else(|e| panic!("failed to open fixture {}: {e}", path.display()));
    let mut xs = Vec::with_capacity(expected_rows);
    let mut ys = Vec::with_capacity(expected_rows);
    for result in reader.deserialize() {
        let row: ErrRow = result.expect("malformed fixture row");
        xs.push(row.x);
        ys.push(row.y);
    }
    assert_eq!(
        xs.len(),
        expected_rows,
        "fixture {} has the wrong row count",
        path.display()
    );
    let mut data = xs;
    data.extend(ys);
    DMatrix::from_row_slice(2, expected_rows, &data)
}

fn column_matrix(m: &DMatrix<f64>, i: usize) -> DMatrix<f64> {
    DMatrix::from_column_slice(m.nrows(), 1, m.column(i).into_owned().as_slice())
}

#[test]
fn fixture_tables_match_the_values_hardcoded_in_the_demo() {
    let evol_errs = load_err_columns(&fixture_path("evol_errs.csv"), 15);
    let obs_errs = load_err_columns(&fixture_path("obs_errs.csv"), 16);

    assert_relative_eq!(evol_errs[(0, 0)], -0.343003152130103, epsilon = 1e-12);
    assert_relative_eq!(evol_errs[(1, 14)], -2.277161011565906, epsilon = 1e-12);
    assert_relative_eq!(obs_errs[(0, 0)], -1.428567988496096, epsilon = 1e-12);
    assert_relative_eq!(obs_errs[(1, 15)], 1.725578381396231, epsilon = 1e-12);
}

#[test]
fn rotation_scenario_driven_from_csv_fixtures_filters_and_smooths() {
    let evol_errs = load_err_columns(&fixture_path("evol_errs.csv"), 15);
    let obs_errs = load_err_columns(&fixture_path("obs_errs.csv"), 16);

    let alpha = 2.0 * std::f64::consts::PI / 16.0;
    let h = DMatrix::<f64>::identity(2, 2);
    let f = DMatrix::from_row_slice(2, 2, &[alpha.cos(), -alpha.sin(), alpha.sin(), alpha.cos()]);
    let g = DMatrix::<f64>::identity(2, 2);
    let zero = DMatrix::from_row_slice(2, 1, &[0.0, 0.0]);

    let evolution_std = 1e-3;
    let observation_std = 1e-1;
    let k = 16usize;

    let kcov = Covariance::weight(DMatrix::from_diagonal_element(2, 2, 1.0 / evolution_std));
    let ccov = Covariance::weight(DMatrix::from_diagonal_element(2, 2, 1.0 / observation_std));

    let mut states = DMatrix::<f64>::zeros(2, k);
    states[(0, 0)] = 1.0;
    for i in 1..k {
        let prev = column_matrix(&states, i - 1);
        let err = column_matrix(&evol_errs, i - 1);
        let next = &f * prev + evolution_std * err;
        states.set_column(i, &next.column(0));
    }

    let mut obs = DMatrix::<f64>::zeros(2, k);
    for i in 0..k {
        let state_i = column_matrix(&states, i);
        let err = column_matrix(&obs_errs, i);
        let row = &g * state_i + observation_std * err;
        obs.set_column(i, &row.column(0));
    }

    let mut driver = Driver::new(KalmanOptions {
        algorithm: Algorithm::Ultimate,
        ..KalmanOptions::default()
    });
    driver.evolve(2, None, None, None, None).unwrap();
    driver.observe(Some(&g), Some(&column_matrix(&obs, 0)), Some(&ccov)).unwrap();
    for i in 1..k {
        driver.evolve(2, Some(&h), Some(&f), Some(&zero), Some(&kcov)).unwrap();
        driver
            .observe(Some(&g), Some(&column_matrix(&obs, i)), Some(&ccov))
            .unwrap();
    }
    driver.smooth().unwrap();

    // With this little process/observation noise the smoothed trajectory
    // should stay close to the simulated ground truth at every step.
    for i in 0..k {
        let estimate = driver.estimate(i as i64);
        assert!((estimate[0] - states[(0, i)]).abs() < 0.05, "step {i} x diverged");
        assert!((estimate[1] - states[(1, i)]).abs() < 0.05, "step {i} y diverged");
    }
}

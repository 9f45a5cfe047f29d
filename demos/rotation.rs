//! Simulate a rotating 2-D state and filter/smooth it back out.
//!
//! Ported from `rotation.c`: a point rotates at a fixed angular rate under
//! process noise, an identity-ish observation samples it under measurement
//! noise, and the three engine families (ultimate/conventional/oddeven/
//! associative) should all recover the same trajectory up to floating-point
//! rounding. Not part of the library's public surface — a demonstration
//! binary only, per `Cargo.toml`'s `[[bin]]` entry.
//!
//! `evolErrs`/`obsErrs` below are generated by MATLAB (`rng(5); ... randn`)
//! so that a MATLAB port of the same driver program reaches the same
//! simulated trajectory; they are not meaningful beyond reproducibility.

use std::env;

use nalgebra::DMatrix;

use ultimate_kalman::{Algorithm, Covariance, Driver, KalmanOptions};

const EVOL_ERRS_ROWWISE: [f64; 30] = [
    -0.343003152130103, -0.766711794483284, -0.016814112314737, 0.684339759945504,
    -1.401783282955619, -1.521660304521858, -0.127785244107286, 0.602860572524585,
    -0.139677982915557, 0.407768714902350, 0.397539533883833, -0.317539749169638,
    -0.779285825610984, -1.935513755513929, 0.678730596165904, 1.666349045016822,
    2.635481573310387, 0.304155468427342, 0.055808274805755, -1.360112379179931,
    1.054743814037827, -1.410338023439304, -0.456929290517258, -0.983310072206319,
    0.242994841538368, -0.175692485792199, -1.101615186229668, -1.762205119649466,
    1.526915548584107, -2.277161011565906,
];

const OBS_ERRS_ROWWISE: [f64; 32] = [
    -1.428567988496096, 0.913205695955837, -1.576872295738796, -1.888336147279610,
    1.116853507009928, 1.615888145666843, -0.102585012191329, -0.192732954692481,
    0.160906008337421, -0.024849020282298, -1.001561909251739, -0.314462113181954,
    0.276865687293751, 0.175430340572582, 0.746792737753047, 1.648965874319728,
    -1.114618464565160, 0.976371425014641, 0.204080086636545, 0.736193913185726,
    0.743379272133998, -1.666530392059792, 0.622727541956653, 0.794595441386172,
    0.539084689771962, -2.548385761079745, -1.161623730001803, 1.066876935479899,
    1.748562141782206, 0.362976707912966, 0.842263598054067, 1.725578381396231,
];

fn algorithm_from_name(name: &str) -> Algorithm {
    match name {
        "ultimate" => Algorithm::Ultimate,
        "conventional" => Algorithm::Conventional,
        "oddeven" => Algorithm::OddEven,
        "associative" => Algorithm::Associative,
        other => panic!("unknown algorithm {other:?} (expected ultimate/conventional/oddeven/associative)"),
    }
}

/// `Driver::observe` takes observations as a column `DMatrix`, but building
/// `obs` column-by-column naturally produces `DVector`s; bridge the two.
fn as_column_matrix(v: &nalgebra::DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(v.nrows(), 1, v.as_slice())
}

fn print_row_major(name: &str, m: &DMatrix<f64>) {
    print!("{name} = [");
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            print!("{:9.4} ", m[(i, j)]);
        }
        if i + 1 < m.nrows() {
            print!("; ");
        }
    }
    println!("]");
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let algorithm = args.get(1).map(String::as_str).unwrap_or("ultimate");
    let nthreads: i32 = args.get(2).map(|s| s.parse().unwrap()).unwrap_or(-1);
    let blocksize: i32 = args.get(3).map(|s| s.parse().unwrap()).unwrap_or(-1);

    println!("rotation algorithm={algorithm} nthreads={nthreads} blocksize={blocksize} (-1 means do not set)");
    println!("results should be directionally comparable to rotation(UltimateKalman,5,2) in MATLAB");

    let options = KalmanOptions {
        algorithm: algorithm_from_name(algorithm),
        nthreads,
        blocksize,
        with_covariance: true,
    };

    let evol_errs = DMatrix::from_row_slice(2, 15, &EVOL_ERRS_ROWWISE);
    let obs_errs = DMatrix::from_row_slice(2, 16, &OBS_ERRS_ROWWISE);

    let alpha = 2.0 * std::f64::consts::PI / 16.0;
    let h = DMatrix::<f64>::identity(2, 2);
    let f = DMatrix::from_row_slice(2, 2, &[alpha.cos(), -alpha.sin(), alpha.sin(), alpha.cos()]);
    let g = DMatrix::<f64>::identity(2, 2);
    let zero = DMatrix::from_row_slice(2, 1, &[0.0, 0.0]);

    let evolution_std = 1e-3;
    let observation_std = 1e-1;
    let k = 16usize;
    let obs_dim = 2usize;

    print_row_major("F", &f);
    print_row_major("G", &g);

    let kcov = Covariance::weight(DMatrix::from_diagonal_element(2, 2, 1.0 / evolution_std));
    let ccov = Covariance::weight(DMatrix::from_diagonal_element(obs_dim, obs_dim, 1.0 / observation_std));

    let mut states = DMatrix::<f64>::zeros(2, k);
    states[(0, 0)] = 1.0;
    states[(1, 0)] = 0.0;
    for i in 1..k {
        let prev = states.column(i - 1).into_owned();
        let err = evol_errs.column(i - 1).into_owned();
        let next = &f * prev + evolution_std * err;
        states.set_column(i, &next);
    }
    print_row_major("states", &states);

    let mut obs = DMatrix::<f64>::zeros(obs_dim, k);
    for i in 0..k {
        let state_i = states.column(i).into_owned();
        let err = obs_errs.column(i).into_owned();
        let row = &g * state_i + observation_std * err;
        obs.set_column(i, &row);
    }
    print_row_major("obs", &obs);

    let mut predicted = DMatrix::<f64>::zeros(2, k);
    let mut filtered = DMatrix::<f64>::zeros(2, k);
    let mut smoothed = DMatrix::<f64>::zeros(2, k);

    let mut driver = Driver::<f64>::new(options);
    let supports_rollback = matches!(algorithm_from_name(algorithm), Algorithm::Ultimate | Algorithm::Conventional);

    if supports_rollback {
        // predict all the states from the first observation only
        println!("evolve-observe step 0");
        driver.evolve(2, None, None, None, None).unwrap();
        let o0 = as_column_matrix(&obs.column(0).into_owned());
        driver.observe(Some(&g), Some(&o0), Some(&ccov)).unwrap();
        predicted.set_column(0, &driver.estimate(0));
        println!("earliest->latest {}->{}", driver.earliest(), driver.latest());

        for i in 1..k {
            driver.evolve(2, Some(&h), Some(&f), Some(&zero), Some(&kcov)).unwrap();
            driver.observe(None, None, None).unwrap();
            predicted.set_column(i, &driver.estimate(i as i64));
        }
        println!("earliest->latest {}->{}", driver.earliest(), driver.latest());

        // roll back to step 1 and compute filtered states
        driver.rollback(1).unwrap();
        println!("earliest->latest {}->{}", driver.earliest(), driver.latest());

        let o1 = as_column_matrix(&obs.column(1).into_owned());
        driver.observe(Some(&g), Some(&o1), Some(&ccov)).unwrap();
        filtered.set_column(0, &driver.estimate(0));
        filtered.set_column(1, &driver.estimate(1));
        println!("earliest->latest {}->{}", driver.earliest(), driver.latest());

        for i in 2..k {
            driver.evolve(2, Some(&h), Some(&f), Some(&zero), Some(&kcov)).unwrap();
            let oi = as_column_matrix(&obs.column(i).into_owned());
            driver.observe(Some(&g), Some(&oi), Some(&ccov)).unwrap();
            filtered.set_column(i, &driver.estimate(i as i64));
        }
    } else {
        // OddEven/Associative are batch engines with no `rollback`; feed the
        // whole trajectory straight through once, predicted == filtered.
        println!("batch algorithm {algorithm}: skipping the rollback demonstration");
        driver.evolve(2, None, None, None, None).unwrap();
        let o0 = as_column_matrix(&obs.column(0).into_owned());
        driver.observe(Some(&g), Some(&o0), Some(&ccov)).unwrap();

        for i in 1..k {
            driver.evolve(2, Some(&h), Some(&f), Some(&zero), Some(&kcov)).unwrap();
            let oi = as_column_matrix(&obs.column(i).into_owned());
            driver.observe(Some(&g), Some(&oi), Some(&ccov)).unwrap();
        }
    }

    driver.smooth().unwrap();
    for i in 0..k {
        smoothed.set_column(i, &driver.estimate(i as i64));
    }
    if !supports_rollback {
        // the batch engines only ever produce one (smoothed) pass
        predicted.copy_from(&smoothed);
        filtered.copy_from(&smoothed);
    }

    let (covariance_matrix, covariance_type) = driver.covariance(0).unwrap();
    let explicit = Covariance::new(covariance_matrix, covariance_type).to_explicit().unwrap();
    println!("covariance of smoothed estimate of state 0 =\n{explicit:.6}");

    print_row_major("predicted", &predicted);
    print_row_major("filtered", &filtered);
    print_row_major("smoothed", &smoothed);

    println!("rotation done");
}

//! Filtering and smoothing elements, and their associative combine
//! operators.
//!
//! Ported line-for-line from `kalman_associative_smoother.c`'s
//! `build_filtering_element_new`, `build_smoothing_element_new`,
//! `filteringAssociativeOperation`, and `smoothingAssociativeOperation`.
//! Variable names follow the C source's `A`/`b`/`Z`/`e`/`J` (filtering) and
//! `E`/`g`/`L` (smoothing) except where they'd collide with Rust keywords or
//! casing conventions: `Z`→`z`, `E`→`big_e`, `L`→`big_l`.

use nalgebra::{DMatrix, RealField};

use crate::equations::StepEquations;
use crate::error::Error;
use crate::matrix;

/// One element of either associative scan. Which fields are populated
/// depends on which of [`build_filtering_elements`] / [`build_smoothing_elements`]
/// produced it.
#[derive(Debug, Clone)]
pub struct AssociativeElement<R: RealField> {
    pub dimension: usize,

    // Carried straight from the equation, needed when this step's neighbor
    // builds its own filtering or smoothing element.
    pub f: Option<DMatrix<R>>,
    pub c: Option<DMatrix<R>>,
    pub k_explicit: Option<DMatrix<R>>,

    // Filtering element (`A`, `b`, `Z`, `e`, `J`).
    pub a: Option<DMatrix<R>>,
    pub b: Option<DMatrix<R>>,
    pub z: Option<DMatrix<R>>,
    pub e: Option<DMatrix<R>>,
    pub j: Option<DMatrix<R>>,

    // Filtered state/covariance, written back after the filtering scan.
    pub state: Option<DMatrix<R>>,
    pub covariance: Option<DMatrix<R>>,

    // Smoothing element (`E`, `g`, `L`).
    pub big_e: Option<DMatrix<R>>,
    pub g: Option<DMatrix<R>>,
    pub big_l: Option<DMatrix<R>>,
}

impl<R: RealField> AssociativeElement<R> {
    pub fn new(dimension: usize) -> Self {
        AssociativeElement {
            dimension,
            f: None,
            c: None,
            k_explicit: None,
            a: None,
            b: None,
            z: None,
            e: None,
            j: None,
            state: None,
            covariance: None,
            big_e: None,
            g: None,
            big_l: None,
        }
    }
}

/// Build one filtering element per step, including the step-0/step-1
/// boundary handling (`build_filtering_element_new`'s `i==0`/`i==1`
/// special cases): step 0 never gets a filtering element of its own (the
/// associative recursion starts at step 1); step 1's element absorbs step
/// 0's QR-derived `m0`/`P0` directly since there is no element to combine
/// it with.
pub fn build_filtering_elements<R: RealField>(
    equations: &[StepEquations<R>],
) -> Result<Vec<AssociativeElement<R>>, Error> {
    let l = equations.len();
    let mut elements: Vec<AssociativeElement<R>> = (0..l)
        .map(|i| AssociativeElement::new(equations[i].n))
        .collect();

    for i in 0..l {
        let eq = &equations[i];
        elements[i].f = eq.f.clone();
        elements[i].c = eq.c.clone();
        if let Some(k_cov) = eq.k.as_ref() {
            elements[i].k_explicit = Some(k_cov.to_explicit()?);
        }

        if i == 0 {
            continue;
        }

        if i == 1 {
            let step0 = &equations[0];
            let g0 = step0.g.as_ref().expect("step 0 requires an observation");
            let o0 = step0.o.as_ref().expect("step 0 requires an observation");
            let c0 = step0
                .c_cov
                .as_ref()
                .expect("step 0 requires an observation covariance");

            let w_g0 = c0.weigh(g0)?;
            let mut w_o0 = c0.weigh(o0)?;
            let mut r = w_g0;
            let refl = matrix::qr_mut(&mut r);
            matrix::apply_qt_mut(&refl, &mut w_o0);
            matrix::triu_mut(&mut r);
            let m0 = matrix::trisolve(&r, &w_o0);

            let rtr = matrix::multiply(&r.transpose(), &r);
            let p0 = matrix::inverse(&rtr);

            elements[0].state = Some(m0);
            elements[0].covariance = Some(p0);
        }

        let f_i = eq.f.as_ref().expect("evolve data required beyond step 0");
        let c_i = eq.c.as_ref().expect("evolve data required beyond step 0");
        let mut k_i = elements[i].k_explicit.clone().expect("K required beyond step 0");

        if i == 1 {
            let p0 = elements[0].covariance.clone().unwrap();
            let fp0ft = matrix::multiply(&matrix::multiply(f_i, &p0), &f_i.transpose());
            k_i = &k_i + &fp0ft;
        }

        if eq.o.is_none() {
            elements[i].z = Some(k_i.clone());
            if i == 1 {
                let m0 = elements[0].state.clone().unwrap();
                elements[i].a = Some(matrix::constant(eq.n, eq.n, R::zero()));
                elements[i].b = Some(&m0 + c_i);
            } else {
                elements[i].a = Some(f_i.clone());
                elements[i].b = Some(c_i.clone());
            }
            elements[i].e = Some(matrix::constant(eq.n, 1, R::zero()));
            elements[i].j = Some(matrix::constant(eq.n, eq.n, R::zero()));
        } else {
            let g_i = eq.g.as_ref().unwrap();
            let o_i = eq.o.as_ref().unwrap();
            let c_cov = eq.c_cov.as_ref().expect("observation covariance required");
            let c_explicit = c_cov.to_explicit()?;

            let gkgt = matrix::multiply(&matrix::multiply(g_i, &k_i), &g_i.transpose());
            let s = &gkgt + &c_explicit;

            // G_i_trans_inv_S = (S^T)^-1 G_i, solved rather than inverted.
            let g_trans_inv_s = matrix::mldivide(&s.transpose(), g_i).transpose();
            let kk = matrix::multiply(&k_i, &g_trans_inv_s);

            if i == 1 {
                let m0 = elements[0].state.clone().unwrap();
                let m1 = &matrix::multiply(f_i, &m0) + c_i;
                let g_m1 = matrix::multiply(g_i, &m1);
                let innovation = o_i - &g_m1;
                let b = &m1 + &matrix::multiply(&kk, &innovation);
                elements[i].a = Some(matrix::constant(eq.n, eq.n, R::zero()));
                elements[i].b = Some(b);

                let ks = matrix::multiply(&kk, &s);
                let kskt = matrix::multiply(&ks, &kk.transpose());
                elements[i].z = Some(&k_i - &kskt);
            } else {
                let gf = matrix::multiply(g_i, f_i);
                let kgf = matrix::multiply(&kk, &gf);
                elements[i].a = Some(f_i - &kgf);

                let g_c = matrix::multiply(g_i, c_i);
                let innovation = o_i - &g_c;
                elements[i].b = Some(c_i + &matrix::multiply(&kk, &innovation));

                let kg = matrix::multiply(&kk, g_i);
                let kgk = matrix::multiply(&kg, &k_i);
                elements[i].z = Some(&k_i - &kgk);
            }

            let g_c = matrix::multiply(g_i, c_i);
            let innovation = o_i - &g_c;
            let ft_ginvs = matrix::multiply(&f_i.transpose(), &g_trans_inv_s);
            elements[i].e = Some(matrix::multiply(&ft_ginvs, &innovation));

            let gf = matrix::multiply(g_i, f_i);
            elements[i].j = Some(matrix::multiply(&ft_ginvs, &gf));
        }
    }

    Ok(elements)
}

/// The filtering associative operator, `si ∘ sj` (ported from
/// `filteringAssociativeOperation`).
pub fn filtering_combine<R: RealField>(
    si: &AssociativeElement<R>,
    sj: &AssociativeElement<R>,
) -> AssociativeElement<R> {
    let si_a = si.a.as_ref().unwrap();
    let si_z = si.z.as_ref().unwrap();
    let si_b = si.b.as_ref().unwrap();
    let si_e = si.e.as_ref().unwrap();
    let si_j = si.j.as_ref().unwrap();

    let sj_a = sj.a.as_ref().unwrap();
    let sj_z = sj.z.as_ref().unwrap();
    let sj_b = sj.b.as_ref().unwrap();
    let sj_e = sj.e.as_ref().unwrap();
    let sj_j = sj.j.as_ref().unwrap();

    let ni = si_a.nrows();
    let eye = matrix::identity::<R>(ni, ni);

    let one_plus_zj = &eye + &matrix::multiply(si_z, sj_j);
    let x = matrix::mldivide(&one_plus_zj.transpose(), &sj_a.transpose()).transpose();

    let one_plus_jz = &eye + &matrix::multiply(sj_j, si_z);
    let y = matrix::mldivide(&one_plus_jz.transpose(), si_a).transpose();

    let a = matrix::multiply(&x, si_a);

    let siz_sje = matrix::multiply(si_z, sj_e);
    let b = &matrix::multiply(&x, &(&siz_sje + si_b)) + sj_b;

    let x_siz = matrix::multiply(&x, si_z);
    let z = &matrix::multiply(&x_siz, &sj_a.transpose()) + sj_z;

    let sjj_sib = matrix::multiply(sj_j, si_b);
    let e = &matrix::multiply(&y, &(sj_e - &sjj_sib)) + si_e;

    let sjj_sia = matrix::multiply(sj_j, si_a);
    let j = &matrix::multiply(&y, &sjj_sia) + si_j;

    AssociativeElement {
        dimension: si.dimension,
        a: Some(a),
        b: Some(b),
        z: Some(z),
        e: Some(e),
        j: Some(j),
        ..AssociativeElement::new(si.dimension)
    }
}

/// Build one smoothing element per step (`build_smoothing_element_new`):
/// the last step's element is a pass-through of its own filtered
/// state/covariance; every earlier step's element needs its own filtered
/// `state`/`covariance` plus the *next* step's `F`/`K`/`c`.
pub fn build_smoothing_elements<R: RealField>(
    elements: &mut [AssociativeElement<R>],
) -> Result<(), Error> {
    let l = elements.len();
    for i in (0..l).rev() {
        if i == l - 1 {
            let n_i = elements[i].dimension;
            elements[i].big_e = Some(matrix::constant(n_i, n_i, R::zero()));
            elements[i].g = Some(elements[i].state.clone().expect("filtered state missing"));
            elements[i].big_l = Some(
                elements[i]
                    .covariance
                    .clone()
                    .expect("filtered covariance missing"),
            );
            continue;
        }

        let x = elements[i].state.clone().expect("filtered state missing");
        let p = elements[i].covariance.clone().expect("filtered covariance missing");
        let f = elements[i + 1].f.clone().expect("F missing for smoothing element");
        let q = elements[i + 1]
            .k_explicit
            .clone()
            .expect("K missing for smoothing element");
        let c = elements[i + 1].c.clone().expect("c missing for smoothing element");

        let pft = matrix::multiply(&p, &f.transpose());
        let fpft_q = &matrix::multiply(&f, &pft) + &q;

        let big_e = matrix::mldivide(&fpft_q.transpose(), &pft.transpose()).transpose();

        let fx_c = &matrix::multiply(&f, &x) + &c;
        let g = &x - &matrix::multiply(&big_e, &fx_c);

        let ef = matrix::multiply(&big_e, &f);
        let l_mat = &p - &matrix::multiply(&ef, &p);

        elements[i].big_e = Some(big_e);
        elements[i].g = Some(g);
        elements[i].big_l = Some(l_mat);
    }
    Ok(())
}

/// The smoothing associative operator, `si ∘ sj` (ported from
/// `smoothingAssociativeOperation`).
pub fn smoothing_combine<R: RealField>(
    si: &AssociativeElement<R>,
    sj: &AssociativeElement<R>,
) -> AssociativeElement<R> {
    let si_e = si.big_e.as_ref().unwrap();
    let si_g = si.g.as_ref().unwrap();
    let si_l = si.big_l.as_ref().unwrap();

    let sj_e = sj.big_e.as_ref().unwrap();
    let sj_g = sj.g.as_ref().unwrap();
    let sj_l = sj.big_l.as_ref().unwrap();

    let big_e = matrix::multiply(sj_e, si_e);
    let g = &matrix::multiply(sj_e, si_g) + sj_g;
    let ejl = matrix::multiply(sj_e, si_l);
    let big_l = &matrix::multiply(&ejl, &sj_e.transpose()) + sj_l;

    AssociativeElement {
        dimension: si.dimension,
        big_e: Some(big_e),
        g: Some(g),
        big_l: Some(big_l),
        ..AssociativeElement::new(si.dimension)
    }
}

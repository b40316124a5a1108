//! Restarted, right-preconditioned GMRES over any vector space described
//! by a `KrylovOperator`.

pub mod gmres_mlmg;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::error::Error;

pub use gmres_mlmg::GMRESMLMG;




/**
 * The vector space, operator and preconditioner a GMRES solve works with.
 * `apply` may overwrite ghost data of its input.
 */
pub trait KrylovOperator {
    type Vector;

    fn make_vector(&self) -> Self::Vector;

    fn set_to_zero(&self, v: &mut Self::Vector);

    fn assign(&self, dst: &mut Self::Vector, src: &Self::Vector);

    fn dot(&self, a: &Self::Vector, b: &Self::Vector) -> f64;

    fn norm2(&self, v: &Self::Vector) -> f64 {
        self.dot(v, v).sqrt()
    }

    fn scale(&self, v: &mut Self::Vector, a: f64);

    /// `v += a * x`
    fn increment(&self, v: &mut Self::Vector, x: &Self::Vector, a: f64);

    fn apply(&mut self, out: &mut Self::Vector, inp: &mut Self::Vector) -> Result<(), Error>;

    fn precond(&mut self, out: &mut Self::Vector, inp: &Self::Vector) -> Result<(), Error>;
}




#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GMRESConfig {
    pub verbose: usize,
    pub max_iters: usize,
    pub restart_length: usize,
    pub use_precond: bool,
    /// V-cycles per preconditioner application.
    pub precond_niters: usize,
    /// The caller asserts `L(0) = 0` including boundary terms, so the
    /// system can be solved directly rather than through a correction.
    pub prop_zero: bool,
}

impl Default for GMRESConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_iters: 2000,
            restart_length: 30,
            use_precond: true,
            precond_niters: 1,
            prop_zero: false,
        }
    }
}




#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KrylovInfo {
    pub iterations: usize,
    /// 2-norm of the residual, as estimated by the least-squares problem.
    pub residual: f64,
    pub converged: bool,
}




/**
 * Solve `A(sol) = rhs` to `max(tol_abs, tol_rel * |rhs|)` in the 2-norm,
 * starting from the value in `sol`. The Krylov basis is built from
 * `A(M^-1 v)`, so the preconditioner never changes the residual being
 * measured. The preconditioned vectors `z_k = M^-1 v_k` are kept and the
 * update is assembled from them (flexible GMRES), so `M` may change from one
 * application to the next, as a multigrid cycle with a Krylov bottom solve
 * does.
 */
pub fn gmres<M: KrylovOperator>(
    op: &mut M,
    sol: &mut M::Vector,
    rhs: &M::Vector,
    tol_rel: f64,
    tol_abs: f64,
    config: &GMRESConfig,
) -> Result<KrylovInfo, Error> {
    let m = config.restart_length.max(1);

    if !(tol_rel >= 0.0 && tol_abs >= 0.0) {
        return Err(Error::InvalidArgument(format!("tolerances must be non-negative, got {} and {}", tol_rel, tol_abs)));
    }
    let rnorm0 = op.norm2(rhs);
    let target = tol_abs.max(tol_rel * rnorm0);

    let mut basis: Vec<M::Vector> = (0..=m).map(|_| op.make_vector()).collect();
    let mut zs: Vec<M::Vector> = (0..m).map(|_| op.make_vector()).collect();
    let mut w = op.make_vector();
    let mut z = op.make_vector();
    let mut h = vec![vec![0.0; m]; m + 1];
    let mut cs = vec![0.0; m];
    let mut sn = vec![0.0; m];
    let mut g = vec![0.0; m + 1];

    let mut iterations = 0;
    let mut residual;

    if config.verbose >= 1 {
        info!("GMRES: Initial rhs = {:e}", rnorm0);
    }

    loop {
        // r = rhs - A(sol)
        op.assign(&mut z, sol);
        op.apply(&mut w, &mut z)?;
        op.scale(&mut w, -1.0);
        op.increment(&mut w, rhs, 1.0);
        residual = op.norm2(&w);

        if residual <= target || iterations >= config.max_iters {
            break;
        }
        op.assign(&mut basis[0], &w);
        op.scale(&mut basis[0], 1.0 / residual);
        g.iter_mut().for_each(|x| *x = 0.0);
        g[0] = residual;

        let mut k_end = 0;

        for k in 0..m {
            op.precond(&mut zs[k], &basis[k])?;
            op.assign(&mut z, &zs[k]);
            op.apply(&mut w, &mut z)?;

            for j in 0..=k {
                h[j][k] = op.dot(&w, &basis[j]);
                op.increment(&mut w, &basis[j], -h[j][k]);
            }
            h[k + 1][k] = op.norm2(&w);
            let breakdown = h[k + 1][k] == 0.0;

            if !breakdown {
                op.assign(&mut basis[k + 1], &w);
                op.scale(&mut basis[k + 1], 1.0 / h[k + 1][k]);
            }
            for j in 0..k {
                let t = cs[j] * h[j][k] + sn[j] * h[j + 1][k];
                h[j + 1][k] = -sn[j] * h[j][k] + cs[j] * h[j + 1][k];
                h[j][k] = t;
            }
            let (c, s) = givens(h[k][k], h[k + 1][k]);
            cs[k] = c;
            sn[k] = s;
            h[k][k] = c * h[k][k] + s * h[k + 1][k];
            h[k + 1][k] = 0.0;
            g[k + 1] = -s * g[k];
            g[k] *= c;

            residual = g[k + 1].abs();
            iterations += 1;
            k_end = k + 1;

            if config.verbose >= 2 {
                debug!("GMRES: iter = {}, residual = {:e}, rel. = {:e}", iterations, residual, residual / rnorm0);
            }
            if residual <= target || iterations >= config.max_iters || breakdown {
                break;
            }
        }

        // y = H^-1 g, then sol += Z y
        let mut y = vec![0.0; k_end];

        for i in (0..k_end).rev() {
            let t: f64 = (i + 1..k_end).map(|j| h[i][j] * y[j]).sum();
            y[i] = (g[i] - t) / h[i][i];
        }
        for (j, yj) in y.iter().enumerate() {
            op.increment(sol, &zs[j], *yj);
        }

        if residual <= target || iterations >= config.max_iters {
            break;
        }
    }

    let converged = residual <= target;

    if converged {
        if config.verbose >= 1 {
            info!("GMRES: Solve converged after {} iterations, residual = {:e}", iterations, residual);
        }
    } else {
        warn!("GMRES: Failed to converge after {} iterations, residual = {:e}", iterations, residual);
    }
    Ok(KrylovInfo { iterations, residual, converged })
}

fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (t * s, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, t * c)
    }
}

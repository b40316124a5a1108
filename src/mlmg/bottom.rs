use serde::{Deserialize, Serialize};
use crate::error::Error;
use crate::linop::{BcMode, MLLinOp};
use crate::multifab::MultiFab;




/**
 * The solver used on the coarsest multigrid level.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BottomSolver {
    Smoother,
    CG,
    BiCGStab,
}

impl Default for BottomSolver {
    fn default() -> Self {
        BottomSolver::BiCGStab
    }
}




#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BottomResult {
    pub iterations: usize,
    pub converged: bool,
}




/**
 * Conjugate gradients on multigrid level `mglev` of AMR level zero, with
 * homogeneous boundary conditions. `sol` is the initial guess and receives
 * the solution; it needs the operator's ghost zones. The residual is
 * measured in the max norm against `max(tol_abs, tol_rel * |r0|)`.
 */
pub fn cg<L: MLLinOp + ?Sized>(
    linop: &mut L,
    mglev: usize,
    sol: &mut MultiFab,
    rhs: &MultiFab,
    tol_rel: f64,
    tol_abs: f64,
    max_iters: usize,
) -> Result<BottomResult, Error> {
    let ncomp = linop.ncomp();
    let z = [0; 3];
    let mut r = linop.make(0, mglev, z);
    let mut p = linop.make(0, mglev, linop.ngrow());
    let mut q = linop.make(0, mglev, z);
    let mut x = linop.make(0, mglev, z);

    linop.correction_residual(0, mglev, &mut r, sol, rhs, BcMode::Homogeneous, None)?;

    let rnorm0 = linop.norm_inf(0, mglev, &r);
    let target = tol_abs.max(tol_rel * rnorm0);
    let mut result = BottomResult { iterations: 0, converged: rnorm0 <= target };

    if result.converged {
        return Ok(result);
    }
    let mut rho_1 = 0.0;

    for iter in 1..=max_iters {
        let rho = linop.xdoty(0, mglev, &r, &r);

        if rho == 0.0 {
            break;
        }
        if iter == 1 {
            p.copy_from(&r, 0, 0, ncomp, z);
        } else {
            p.xpay(rho / rho_1, &r, 0, 0, ncomp, z);
        }
        linop.apply(0, mglev, &mut q, &mut p, BcMode::Homogeneous, None)?;

        let pw = linop.xdoty(0, mglev, &p, &q);

        if pw == 0.0 {
            break;
        }
        let alpha = rho / pw;
        x.saxpy(alpha, &p, 0, 0, ncomp, z);
        r.saxpy(-alpha, &q, 0, 0, ncomp, z);
        result.iterations = iter;

        if linop.norm_inf(0, mglev, &r) <= target {
            result.converged = true;
            break;
        }
        rho_1 = rho;
    }
    sol.saxpy(1.0, &x, 0, 0, ncomp, z);
    Ok(result)
}




/**
 * Stabilized bi-conjugate gradients; the same contract as [`cg`], but
 * suitable for the non-symmetric operators (RZ metric, Robin rows).
 */
pub fn bicgstab<L: MLLinOp + ?Sized>(
    linop: &mut L,
    mglev: usize,
    sol: &mut MultiFab,
    rhs: &MultiFab,
    tol_rel: f64,
    tol_abs: f64,
    max_iters: usize,
) -> Result<BottomResult, Error> {
    let ncomp = linop.ncomp();
    let ng = linop.ngrow();
    let z = [0; 3];
    let mut r = linop.make(0, mglev, z);
    let mut p = linop.make(0, mglev, ng);
    let mut s = linop.make(0, mglev, ng);
    let mut v = linop.make(0, mglev, z);
    let mut t = linop.make(0, mglev, z);
    let mut x = linop.make(0, mglev, z);

    linop.correction_residual(0, mglev, &mut r, sol, rhs, BcMode::Homogeneous, None)?;

    let rh = r.clone();
    let rnorm0 = linop.norm_inf(0, mglev, &r);
    let target = tol_abs.max(tol_rel * rnorm0);
    let mut result = BottomResult { iterations: 0, converged: rnorm0 <= target };

    if result.converged {
        return Ok(result);
    }
    let (mut rho_1, mut alpha, mut omega) = (0.0, 0.0, 0.0);

    for iter in 1..=max_iters {
        let rho = linop.xdoty(0, mglev, &rh, &r);

        if rho == 0.0 {
            break;
        }
        if iter == 1 {
            p.copy_from(&r, 0, 0, ncomp, z);
        } else {
            let beta = (rho / rho_1) * (alpha / omega);
            p.saxpy(-omega, &v, 0, 0, ncomp, z);
            p.xpay(beta, &r, 0, 0, ncomp, z);
        }
        linop.apply(0, mglev, &mut v, &mut p, BcMode::Homogeneous, None)?;

        let rhtv = linop.xdoty(0, mglev, &rh, &v);

        if rhtv == 0.0 {
            break;
        }
        alpha = rho / rhtv;
        x.saxpy(alpha, &p, 0, 0, ncomp, z);
        s.lin_comb(1.0, &r, 0, -alpha, &v, 0, 0, ncomp, z);
        result.iterations = iter;

        if linop.norm_inf(0, mglev, &s) <= target {
            result.converged = true;
            break;
        }
        linop.apply(0, mglev, &mut t, &mut s, BcMode::Homogeneous, None)?;

        let tt = linop.xdoty(0, mglev, &t, &t);

        if tt == 0.0 {
            break;
        }
        omega = linop.xdoty(0, mglev, &t, &s) / tt;
        x.saxpy(omega, &s, 0, 0, ncomp, z);
        r.lin_comb(1.0, &s, 0, -omega, &t, 0, 0, ncomp, z);

        if linop.norm_inf(0, mglev, &r) <= target {
            result.converged = true;
            break;
        }
        if omega == 0.0 {
            break;
        }
        rho_1 = rho;
    }
    sol.saxpy(1.0, &x, 0, 0, ncomp, z);
    Ok(result)
}

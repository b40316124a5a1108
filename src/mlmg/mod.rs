//! The multigrid driver. `MLMG` solves `L(phi) = rhs` for an operator
//! implementing `MLLinOp`: a composite cycle over the AMR levels, a
//! V-cycle over the multigrid levels of AMR level zero, and a Krylov or
//! smoother bottom solve.

pub mod bottom;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::error::Error;
use crate::linop::{BcMode, MLLinOp};
use crate::multifab::MultiFab;

pub use bottom::{BottomResult, BottomSolver};




/**
 * Tunable parameters of the multigrid driver.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MLMGConfig {
    /// 0 is silent, 1 logs the start and end of a solve, 2 logs every
    /// iteration, 3 also logs bottom solves.
    pub verbose: usize,
    pub max_iters: usize,
    /// Pre-smoothing sweeps.
    pub nu1: usize,
    /// Post-smoothing sweeps.
    pub nu2: usize,
    /// Sweeps of the smoother bottom solver, and of the fallback when a
    /// Krylov bottom solve fails.
    pub nub: usize,
    pub bottom_solver: BottomSolver,
    pub bottom_tol: f64,
    pub bottom_max_iters: usize,
    /// Measure convergence against the right-hand side norm rather than the
    /// initial residual.
    pub always_use_bnorm: bool,
}

impl Default for MLMGConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_iters: 200,
            nu1: 2,
            nu2: 2,
            nub: 8,
            bottom_solver: BottomSolver::default(),
            bottom_tol: 1e-4,
            bottom_max_iters: 200,
            always_use_bnorm: false,
        }
    }
}




/**
 * What a solve achieved. Failing to reach the tolerance is not an error;
 * `converged` is false and the residual is the one reached.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveInfo {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub converged: bool,
}




/**
 * The multigrid solver. It borrows the operator for its lifetime and owns
 * the per-level work fields: the solution and right-hand side on every AMR
 * level, and residual, correction and residual-of-correction fields on
 * every (AMR, MG) level.
 */
pub struct MLMG<'a> {
    linop: &'a mut dyn MLLinOp,
    config: MLMGConfig,
    sol: Vec<MultiFab>,
    rhs: Vec<MultiFab>,
    res: Vec<Vec<MultiFab>>,
    rescor: Vec<Vec<MultiFab>>,
    cor: Vec<Vec<MultiFab>>,
    cor_hold: Vec<MultiFab>,
    num_iters: usize,
    final_resnorm: f64,
}




// ============================================================================
impl<'a> MLMG<'a> {

    pub fn new(linop: &'a mut dyn MLLinOp) -> Self {
        Self::with_config(linop, MLMGConfig::default())
    }

    pub fn with_config(linop: &'a mut dyn MLLinOp, config: MLMGConfig) -> Self {
        let namr = linop.num_amr_levels();
        let ng = linop.ngrow();
        let z = [0; 3];
        let per_mg = |ngrow| -> Vec<Vec<MultiFab>> {
            (0..namr)
                .map(|a| (0..linop.num_mg_levels(a)).map(|m| linop.make(a, m, ngrow)).collect())
                .collect()
        };
        let res = per_mg(z);
        let rescor = per_mg(z);
        let cor = per_mg(ng);
        let sol = (0..namr).map(|a| linop.make(a, 0, ng)).collect();
        let rhs = (0..namr).map(|a| linop.make(a, 0, z)).collect();
        let cor_hold = (0..namr).map(|a| linop.make(a, 0, ng)).collect();

        Self {
            linop,
            config,
            sol,
            rhs,
            res,
            rescor,
            cor,
            cor_hold,
            num_iters: 0,
            final_resnorm: 0.0,
        }
    }

    pub fn config(&self) -> &MLMGConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MLMGConfig) {
        self.config = config
    }

    pub fn set_verbose(&mut self, verbose: usize) {
        self.config.verbose = verbose
    }

    pub fn set_max_iter(&mut self, max_iters: usize) {
        self.config.max_iters = max_iters
    }

    pub fn set_pre_smooth(&mut self, nu1: usize) {
        self.config.nu1 = nu1
    }

    pub fn set_post_smooth(&mut self, nu2: usize) {
        self.config.nu2 = nu2
    }

    pub fn set_bottom_smooth(&mut self, nub: usize) {
        self.config.nub = nub
    }

    pub fn set_bottom_solver(&mut self, bottom_solver: BottomSolver) {
        self.config.bottom_solver = bottom_solver
    }

    pub fn set_bottom_tolerance(&mut self, tol: f64) {
        self.config.bottom_tol = tol
    }

    pub fn set_bottom_max_iter(&mut self, max_iters: usize) {
        self.config.bottom_max_iters = max_iters
    }

    pub fn set_always_use_bnorm(&mut self, flag: bool) {
        self.config.always_use_bnorm = flag
    }

    /// Iterations taken by the last solve.
    pub fn num_iters(&self) -> usize {
        self.num_iters
    }

    /// Max-norm of the composite residual at the end of the last solve.
    pub fn final_resnorm(&self) -> f64 {
        self.final_resnorm
    }

    pub fn linop(&self) -> &dyn MLLinOp {
        &*self.linop
    }

    pub fn linop_mut(&mut self) -> &mut (dyn MLLinOp + 'a) {
        &mut *self.linop
    }




    /**
     * Solve `L(sol) = rhs` on all AMR levels to
     * `max(tol_abs, tol_rel * |r0|)` in the max norm, where `r0` is the
     * initial residual (or the right-hand side with `always_use_bnorm`).
     * `sol` holds the initial guess on entry; only its valid region is read
     * and written. Physical boundary values must have been given to the
     * operator with `set_level_bc`.
     */
    pub fn solve(&mut self, sol: &mut [MultiFab], rhs: &[MultiFab], tol_rel: f64, tol_abs: f64) -> Result<SolveInfo, Error> {
        self.check_fields(sol, rhs)?;

        if !(tol_rel >= 0.0 && tol_abs >= 0.0) {
            return Err(Error::InvalidArgument(format!("tolerances must be non-negative, got {} and {}", tol_rel, tol_abs)));
        }
        self.linop.prepare_for_solve()?;
        self.prepare(sol, rhs)?;
        self.compute_residual()?;

        let resnorm0 = self.residual_norm();
        let bnorm = self.rhs_norm();
        let use_bnorm = self.config.always_use_bnorm || resnorm0 == 0.0;
        let max_norm = if use_bnorm { bnorm } else { resnorm0 };
        let norm_name = if use_bnorm { "bnorm" } else { "resid0" };
        let res_target = tol_abs.max(tol_rel.max(1e-16) * max_norm);

        if self.config.verbose >= 1 {
            info!("MLMG: Initial rhs = {:e}", bnorm);
            info!("MLMG: Initial residual (resid0) = {:e}", resnorm0);
        }

        let mut resnorm = resnorm0;
        let mut iterations = 0;
        let mut converged = resnorm0 <= res_target;

        if converged {
            if self.config.verbose >= 1 {
                info!("MLMG: No iterations needed");
            }
        } else {
            for iter in 1..=self.config.max_iters {
                self.one_iter()?;
                self.compute_residual()?;
                resnorm = self.residual_norm();
                iterations = iter;

                if self.config.verbose >= 2 {
                    debug!("MLMG: Iteration {:3} Fine resid/{} = {:e}", iter, norm_name, resnorm / max_norm);
                }
                if resnorm <= res_target {
                    converged = true;
                    break;
                }
            }
            if converged {
                if self.config.verbose >= 1 {
                    info!("MLMG: Final Iter. {} resid, resid/{} = {:e}, {:e}", iterations, norm_name, resnorm, resnorm / max_norm);
                }
            } else {
                warn!("MLMG: Failed to converge after {} iterations. resid, resid/{} = {:e}, {:e}", iterations, norm_name, resnorm, resnorm / max_norm);
            }
        }
        let ncomp = self.linop.ncomp();

        for (dst, src) in sol.iter_mut().zip(&self.sol) {
            dst.copy_from(src, 0, 0, ncomp, [0; 3]);
        }
        self.num_iters = iterations;
        self.final_resnorm = resnorm;

        Ok(SolveInfo {
            iterations,
            initial_residual: resnorm0,
            final_residual: resnorm,
            converged,
        })
    }




    /**
     * `out = L(inp)` on all AMR levels with inhomogeneous boundary
     * conditions, coarse/fine consistent: on coarse cells beside a fine
     * level the coarse fluxes are replaced by the fine ones, and covered
     * coarse cells hold the average of the fine result. `inp` needs the
     * operator's ghost zones.
     */
    pub fn apply(&mut self, out: &mut [MultiFab], inp: &mut [MultiFab]) -> Result<(), Error> {
        let namr = self.linop.num_amr_levels();
        let ncomp = self.linop.ncomp();

        if out.len() != namr || inp.len() != namr {
            return Err(Error::InvalidArgument(format!("expected {} AMR levels of fields", namr)));
        }
        for mf in inp.iter() {
            self.check_ghosts(mf)?;
        }
        for a in (0..namr).rev() {
            if a > 0 {
                self.linop.set_cf_bndry(a, &inp[a - 1])?;
            }
            self.linop.apply(a, 0, &mut out[a], &mut inp[a], BcMode::Inhomogeneous, None)?;

            if a + 1 < namr {
                let mut fix = self.linop.make(a, 0, [0; 3]);
                let (ilo, ihi) = inp.split_at_mut(a + 1);
                self.linop.reflux(a, &mut fix, &mut ilo[a], &mut ihi[0])?;
                out[a].saxpy(-1.0, &fix, 0, 0, ncomp, [0; 3]);

                let (olo, ohi) = out.split_at_mut(a + 1);
                self.linop.average_down_residual(a, &mut olo[a], &ohi[0]);
            }
        }
        Ok(())
    }

    /**
     * Approximate `L^-1(inp)` on AMR level zero by `niters` V-cycles with
     * homogeneous boundary conditions, starting from zero. `out` needs the
     * operator's ghost zones.
     */
    pub fn precond(&mut self, out: &mut MultiFab, inp: &MultiFab, niters: usize) -> Result<(), Error> {
        let ncomp = self.linop.ncomp();
        self.check_ghosts(out)?;
        out.set_val(0.0);

        for iter in 0..niters {
            if iter == 0 {
                self.res[0][0].copy_from(inp, 0, 0, ncomp, [0; 3]);
            } else {
                self.linop.correction_residual(0, 0, &mut self.res[0][0], out, inp, BcMode::Homogeneous, None)?;
            }
            self.linop.set_dirichlet_nodes_to_zero(0, 0, &mut self.res[0][0]);

            if self.linop.is_singular(0) {
                make_solvable(&*self.linop, 0, 0, &mut self.res[0][0]);
            }
            self.mg_vcycle()?;
            out.saxpy(1.0, &self.cor[0][0], 0, 0, ncomp, [0; 3]);
        }
        Ok(())
    }

    /**
     * The face fluxes of `sol` on every AMR level, one face-centered field
     * per direction, with coarse/fine boundary values interpolated from the
     * next coarser level.
     */
    pub fn get_fluxes(&mut self, sol: &[MultiFab]) -> Result<Vec<Vec<MultiFab>>, Error> {
        let namr = self.linop.num_amr_levels();
        let ng = self.linop.ngrow();
        let ncomp = self.linop.ncomp();

        if sol.len() != namr {
            return Err(Error::InvalidArgument(format!("expected {} AMR levels of solution", namr)));
        }
        let mut tmp: Vec<MultiFab> = (0..namr).map(|a| self.linop.make(a, 0, ng)).collect();

        for (dst, src) in tmp.iter_mut().zip(sol) {
            dst.copy_from(src, 0, 0, ncomp, [0; 3]);
        }
        let mut fluxes = Vec::with_capacity(namr);

        for a in 0..namr {
            if a > 0 {
                self.linop.set_cf_bndry(a, &tmp[a - 1])?;
            }
            fluxes.push(self.linop.get_fluxes(a, &mut tmp[a])?);
        }
        Ok(fluxes)
    }

    /**
     * The composite residual `rhs - L(sol)` on every AMR level, written to
     * `res`.
     */
    pub fn comp_residual(&mut self, res: &mut [MultiFab], sol: &[MultiFab], rhs: &[MultiFab]) -> Result<(), Error> {
        self.check_fields(sol, rhs)?;
        let ncomp = self.linop.ncomp();

        if res.len() != sol.len() {
            return Err(Error::InvalidArgument(format!("expected {} AMR levels of residual", sol.len())));
        }
        self.linop.prepare_for_solve()?;

        for a in 0..sol.len() {
            self.sol[a].copy_from(&sol[a], 0, 0, ncomp, [0; 3]);
            self.rhs[a].copy_from(&rhs[a], 0, 0, ncomp, [0; 3]);
        }
        self.compute_residual()?;

        for (dst, src) in res.iter_mut().zip(&self.res) {
            dst.copy_from(&src[0], 0, 0, ncomp, [0; 3]);
        }
        Ok(())
    }
}




// ============================================================================
impl<'a> MLMG<'a> {

    fn check_fields(&self, sol: &[MultiFab], rhs: &[MultiFab]) -> Result<(), Error> {
        let namr = self.linop.num_amr_levels();
        let ncomp = self.linop.ncomp();

        if sol.len() != namr || rhs.len() != namr {
            return Err(Error::InvalidArgument(format!(
                "expected {} AMR levels of solution and right-hand side, got {} and {}",
                namr,
                sol.len(),
                rhs.len()
            )));
        }
        for a in 0..namr {
            let ba = self.linop.box_array(a, 0);
            let dm = self.linop.distribution_map(a, 0);

            if sol[a].box_array() != ba || rhs[a].box_array() != ba || sol[a].distribution_map() != dm || rhs[a].distribution_map() != dm {
                return Err(Error::LayoutMismatch("solution and right-hand side must live on the operator's grids"));
            }
            if sol[a].ncomp() != ncomp || rhs[a].ncomp() != ncomp {
                return Err(Error::InvalidArgument(format!("the operator has {} components", ncomp)));
            }
        }
        Ok(())
    }

    fn check_ghosts(&self, mf: &MultiFab) -> Result<(), Error> {
        let ng = self.linop.ngrow();

        if (0..3).any(|d| mf.n_grow()[d] < ng[d]) {
            return Err(Error::InvalidArgument(format!("operator input needs {:?} ghost zones, got {:?}", ng, mf.n_grow())));
        }
        Ok(())
    }

    /**
     * Load the work fields for a solve: the initial guess, and the
     * right-hand side brought to the operator's scaling, with prescribed
     * nodes zeroed and (for a singular operator) made compatible.
     */
    fn prepare(&mut self, sol: &[MultiFab], rhs: &[MultiFab]) -> Result<(), Error> {
        let namr = sol.len();
        let ncomp = self.linop.ncomp();

        for a in 0..namr {
            self.sol[a].set_val(0.0);
            self.sol[a].copy_from(&sol[a], 0, 0, ncomp, [0; 3]);
            self.rhs[a].copy_from(&rhs[a], 0, 0, ncomp, [0; 3]);
            self.linop.scale_rhs(a, &mut self.rhs[a]);
            self.linop.set_dirichlet_nodes_to_zero(a, 0, &mut self.rhs[a]);
        }
        for a in (1..namr).rev() {
            let (lo, hi) = self.sol.split_at_mut(a);
            self.linop.average_down_solution(a - 1, &mut lo[a - 1], &hi[0]);
            let (lo, hi) = self.rhs.split_at_mut(a);
            self.linop.average_down_residual(a - 1, &mut lo[a - 1], &hi[0]);
        }

        if self.linop.is_singular(0) {
            // L(phi) = rhs is solvable when rhs plus the boundary flux term
            // has zero mean
            let mut total = self.linop.make(0, 0, [0; 3]);
            self.linop.apply_inhomog_neumann_term(0, &mut total)?;
            total.saxpy(1.0, &self.rhs[0], 0, 0, ncomp, [0; 3]);

            let offset = mean(&*self.linop, 0, 0, &total);

            if self.config.verbose >= 1 {
                debug!("MLMG: singular operator, right-hand side shifted by {:?}", offset);
            }
            for (n, m) in offset.into_iter().enumerate() {
                self.rhs[0].plus(-m, n, 1, [0; 3]);
            }
        }
        Ok(())
    }

    /**
     * The composite residual `rhs - L(sol)`, finest level first: each
     * coarse level is refluxed at the interface with the next finer level,
     * and its covered cells hold the average of the fine residual.
     */
    fn compute_residual(&mut self) -> Result<(), Error> {
        let namr = self.sol.len();

        for a in (0..namr).rev() {
            if a > 0 {
                self.linop.set_cf_bndry(a, &self.sol[a - 1])?;
            }
            self.linop.solution_residual(a, &mut self.res[a][0], &mut self.sol[a], &self.rhs[a])?;

            if a + 1 < namr {
                let (slo, shi) = self.sol.split_at_mut(a + 1);
                let (rlo, rhi) = self.res.split_at_mut(a + 1);
                self.linop.reflux(a, &mut rlo[a][0], &mut slo[a], &mut shi[0])?;
                self.linop.average_down_residual(a, &mut rlo[a][0], &rhi[0][0]);
            }
        }
        Ok(())
    }

    fn residual_norm(&self) -> f64 {
        (0..self.res.len()).map(|a| self.linop.norm_inf(a, 0, &self.res[a][0])).fold(0.0, f64::max)
    }

    fn rhs_norm(&self) -> f64 {
        (0..self.rhs.len()).map(|a| self.linop.norm_inf(a, 0, &self.rhs[a])).fold(0.0, f64::max)
    }




    /**
     * One composite cycle: smooth down the AMR levels, V-cycle on level
     * zero, then interpolate the corrections back up with post-smoothing.
     */
    fn one_iter(&mut self) -> Result<(), Error> {
        let namr = self.sol.len();
        let ncomp = self.linop.ncomp();
        let z = [0; 3];
        let finest = namr - 1;

        for alev in (1..namr).rev() {
            self.mini_cycle(alev)?;
            self.sol[alev].saxpy(1.0, &self.cor[alev][0], 0, 0, ncomp, z);
            self.compute_res_with_crse_sol_fine_cor(alev - 1, alev)?;

            if alev != finest {
                std::mem::swap(&mut self.cor_hold[alev], &mut self.cor[alev][0]);
            }
        }

        if self.linop.is_singular(0) {
            make_solvable(&*self.linop, 0, 0, &mut self.res[0][0]);
        }
        self.mg_vcycle()?;
        self.sol[0].saxpy(1.0, &self.cor[0][0], 0, 0, ncomp, z);

        for alev in 1..namr {
            let (clo, chi) = self.cor.split_at_mut(alev);
            self.linop.interp_correction(alev, &mut chi[0][0], &clo[alev - 1][0])?;
            self.sol[alev].saxpy(1.0, &self.cor[alev][0], 0, 0, ncomp, z);

            if alev != finest {
                self.cor_hold[alev].saxpy(1.0, &self.cor[alev][0], 0, 0, ncomp, z);
            }
            self.compute_res_with_crse_cor_fine_cor(alev)?;
            self.mini_cycle(alev)?;
            self.sol[alev].saxpy(1.0, &self.cor[alev][0], 0, 0, ncomp, z);

            if alev != finest {
                self.cor[alev][0].saxpy(1.0, &self.cor_hold[alev], 0, 0, ncomp, z);
            }
        }

        for alev in (1..namr).rev() {
            let (lo, hi) = self.sol.split_at_mut(alev);
            self.linop.average_down_solution(alev - 1, &mut lo[alev - 1], &hi[0]);
        }
        Ok(())
    }

    /// Smooth a fresh correction on a fine AMR level.
    fn mini_cycle(&mut self, alev: usize) -> Result<(), Error> {
        self.cor[alev][0].set_val(0.0);
        self.linop.smooth(alev, 0, &mut self.cor[alev][0], &self.res[alev][0], self.config.nu1)
    }

    /**
     * After a fine level took its correction: the coarse level's residual
     * from the current solutions (refluxed against the corrected fine
     * solution), and the fine level's residual reduced by its correction.
     */
    fn compute_res_with_crse_sol_fine_cor(&mut self, calev: usize, falev: usize) -> Result<(), Error> {
        let ncomp = self.linop.ncomp();

        if calev > 0 {
            self.linop.set_cf_bndry(calev, &self.sol[calev - 1])?;
        }
        self.linop.solution_residual(calev, &mut self.res[calev][0], &mut self.sol[calev], &self.rhs[calev])?;
        self.linop.correction_residual(
            falev,
            0,
            &mut self.rescor[falev][0],
            &mut self.cor[falev][0],
            &self.res[falev][0],
            BcMode::Homogeneous,
            None,
        )?;
        self.res[falev][0].copy_from(&self.rescor[falev][0], 0, 0, ncomp, [0; 3]);

        let (slo, shi) = self.sol.split_at_mut(falev);
        let (rlo, rhi) = self.res.split_at_mut(falev);
        self.linop.reflux(calev, &mut rlo[calev][0], &mut slo[calev], &mut shi[0])?;
        self.linop.average_down_residual(calev, &mut rlo[calev][0], &rhi[0][0]);
        Ok(())
    }

    /// Reduce a fine level's residual by its interpolated correction, with
    /// coarse/fine boundary values from the coarse correction.
    fn compute_res_with_crse_cor_fine_cor(&mut self, falev: usize) -> Result<(), Error> {
        let ncomp = self.linop.ncomp();
        let (clo, chi) = self.cor.split_at_mut(falev);

        self.linop.correction_residual(
            falev,
            0,
            &mut self.rescor[falev][0],
            &mut chi[0][0],
            &self.res[falev][0],
            BcMode::Inhomogeneous,
            Some(&clo[falev - 1][0]),
        )?;
        self.res[falev][0].copy_from(&self.rescor[falev][0], 0, 0, ncomp, [0; 3]);
        Ok(())
    }




    /**
     * V-cycle on the multigrid levels of AMR level zero. Reads the residual
     * in `res[0][0]` and leaves the correction in `cor[0][0]`.
     */
    fn mg_vcycle(&mut self) -> Result<(), Error> {
        let bottom = self.cor[0].len() - 1;
        let (nu1, nu2) = (self.config.nu1, self.config.nu2);

        for m in 0..bottom {
            self.cor[0][m].set_val(0.0);
            self.linop.smooth(0, m, &mut self.cor[0][m], &self.res[0][m], nu1)?;
            self.linop.correction_residual(0, m, &mut self.rescor[0][m], &mut self.cor[0][m], &self.res[0][m], BcMode::Homogeneous, None)?;
            self.linop.restriction(0, m + 1, &mut self.res[0][m + 1], &self.rescor[0][m]);
            self.linop.set_dirichlet_nodes_to_zero(0, m + 1, &mut self.res[0][m + 1]);
        }

        if bottom > 0 && self.linop.is_singular(0) {
            make_solvable(&*self.linop, 0, bottom, &mut self.res[0][bottom]);
        }
        self.bottom_solve()?;

        for m in (0..bottom).rev() {
            let (lo, hi) = self.cor[0].split_at_mut(m + 1);
            self.linop.interpolation(0, m, &mut lo[m], &hi[0]);
            self.linop.smooth(0, m, &mut self.cor[0][m], &self.res[0][m], nu2)?;
        }
        Ok(())
    }

    fn bottom_solve(&mut self) -> Result<(), Error> {
        let bottom = self.cor[0].len() - 1;
        let config = &self.config;
        let cor = &mut self.cor[0][bottom];
        let res = &self.res[0][bottom];
        cor.set_val(0.0);

        let result = match config.bottom_solver {
            BottomSolver::Smoother => {
                self.linop.smooth(0, bottom, cor, res, config.nub)?;
                return Ok(());
            }
            BottomSolver::CG => bottom::cg(&mut *self.linop, bottom, cor, res, config.bottom_tol, 0.0, config.bottom_max_iters)?,
            BottomSolver::BiCGStab => bottom::bicgstab(&mut *self.linop, bottom, cor, res, config.bottom_tol, 0.0, config.bottom_max_iters)?,
        };

        if config.verbose >= 3 {
            debug!("MLMG: Bottom solve took {} iterations", result.iterations);
        }
        if !result.converged {
            if config.verbose >= 1 {
                debug!("MLMG: Bottom solve failed after {} iterations, smoothing instead", result.iterations);
            }
            cor.set_val(0.0);
            self.linop.smooth(0, bottom, cor, res, config.nub)?;
        }
        Ok(())
    }
}




/**
 * Per-component mean of `mf` under the operator's inner product.
 */
fn mean(linop: &dyn MLLinOp, amrlev: usize, mglev: usize, mf: &MultiFab) -> Vec<f64> {
    let ncomp = mf.ncomp();
    let mut ones = linop.make(amrlev, mglev, [0; 3]);

    (0..ncomp)
        .map(|n| {
            ones.set_val(0.0);
            ones.set_val_comp(1.0, n, 1, [0; 3]);
            let volume = linop.xdoty(amrlev, mglev, &ones, &ones);
            linop.xdoty(amrlev, mglev, mf, &ones) / volume
        })
        .collect()
}

/**
 * Subtract the mean so the right-hand side of a singular operator lies in
 * its range.
 */
fn make_solvable(linop: &dyn MLLinOp, amrlev: usize, mglev: usize, mf: &mut MultiFab) {
    for (n, m) in mean(linop, amrlev, mglev, mf).into_iter().enumerate() {
        mf.plus(-m, n, 1, [0; 3]);
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::f64::consts::PI;
    use super::*;
    use crate::box_array::{BoxArray, DistributionMapping};
    use crate::geometry::Geometry;
    use crate::index_space::{domain_box, IndexSpace};
    use crate::linop::{LinOpInfo, MLABecLaplacian, MLNodeFdLaplacian};
    use crate::message::{Communicator, SerialCommunicator, ThreadCommunicator};

    fn layout(n: i64, periodic: bool) -> (Geometry, BoxArray, DistributionMapping) {
        let geom = Geometry::new(domain_box([n, n, 1], 2), [0.0; 3], [1.0; 3], [periodic, periodic, false], 2);
        let ba = BoxArray::from_box(geom.domain().clone()).max_size([16, 16, 1]);
        let dm = DistributionMapping::round_robin(&ba, 1);
        (geom, ba, dm)
    }

    fn fill_cells(mf: &mut MultiFab, geom: &Geometry, f: impl Fn([f64; 3]) -> f64) {
        for i in 0..mf.len() {
            let region = mf.valid_box(i).clone();
            for iv in region.iter() {
                mf.fab_mut(i).set(iv, 0, f(geom.cell_center(iv)));
            }
        }
    }

    fn fill_nodes(mf: &mut MultiFab, geom: &Geometry, f: impl Fn([f64; 3]) -> f64) {
        for i in 0..mf.len() {
            let region = mf.grown_box(i).clone();
            for iv in region.iter() {
                mf.fab_mut(i).set(iv, 0, f(geom.node_position(iv)));
            }
        }
    }

    fn max_error(mf: &MultiFab, geom: &Geometry, f: impl Fn([f64; 3]) -> f64) -> f64 {
        let mut err: f64 = 0.0;
        for i in 0..mf.len() {
            for iv in mf.valid_box(i).iter() {
                err = err.max((mf.fab(i).get(iv, 0) - f(geom.cell_center(iv))).abs());
            }
        }
        err
    }

    fn exact(x: [f64; 3]) -> f64 {
        (PI * x[0]).sin() * (PI * x[1]).sin()
    }

    fn poisson_error(n: i64, bottom_solver: BottomSolver) -> (f64, SolveInfo) {
        let (geom, ba, dm) = layout(n, false);
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], LinOpInfo::default()).unwrap();
        op.set_level_bc(0, None).unwrap();

        let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
        fill_cells(&mut rhs, &geom, |x| -2.0 * PI * PI * exact(x));
        let mut sol = MultiFab::new(&ba, &dm, 1, [0; 3]);

        let mut mlmg = MLMG::new(&mut op);
        mlmg.set_bottom_solver(bottom_solver);
        let info = mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-10, 0.0).unwrap();
        (max_error(&sol, &geom, exact), info)
    }

    #[test]
    fn poisson_converges_at_second_order() {
        let (e32, info32) = poisson_error(32, BottomSolver::BiCGStab);
        let (e64, info64) = poisson_error(64, BottomSolver::BiCGStab);

        assert!(info32.converged && info64.converged);
        assert!(info64.iterations < 30);
        assert!(info64.final_residual <= 1e-10 * info64.initial_residual);
        assert!(e64 < 1e-3);
        let ratio = e32 / e64;
        assert!(ratio > 3.5 && ratio < 4.5, "error ratio {}", ratio);
    }

    #[test]
    fn every_bottom_solver_converges() {
        for bottom_solver in [BottomSolver::Smoother, BottomSolver::CG, BottomSolver::BiCGStab] {
            let (err, info) = poisson_error(32, bottom_solver);
            assert!(info.converged, "{:?}", bottom_solver);
            assert!(err < 5e-3, "{:?}", bottom_solver);
        }
    }

    #[test]
    fn singular_problems_are_made_solvable() {
        let (geom, ba, dm) = layout(32, true);
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], LinOpInfo::default()).unwrap();
        op.set_level_bc(0, None).unwrap();

        // the constant offset has no solution and is projected out
        let phi = |x: [f64; 3]| (2.0 * PI * x[0]).sin() * (2.0 * PI * x[1]).sin();
        let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
        fill_cells(&mut rhs, &geom, |x| -8.0 * PI * PI * phi(x) + 0.3);
        let mut sol = MultiFab::new(&ba, &dm, 1, [0; 3]);

        let mut mlmg = MLMG::new(&mut op);
        let info = mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-10, 0.0).unwrap();
        assert!(info.converged);

        let shift = sol.sum(0) / 1024.0;
        sol.plus(-shift, 0, 1, [0; 3]);
        assert!(max_error(&sol, &geom, phi) < 1e-2);
    }

    #[test]
    fn non_convergence_is_reported_not_raised() {
        let (geom, ba, dm) = layout(32, false);
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], LinOpInfo::default()).unwrap();
        op.set_level_bc(0, None).unwrap();

        let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
        fill_cells(&mut rhs, &geom, exact);
        let mut sol = MultiFab::new(&ba, &dm, 1, [0; 3]);

        let mut mlmg = MLMG::new(&mut op);
        mlmg.set_max_iter(1);
        let info = mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-14, 0.0).unwrap();

        assert!(!info.converged);
        assert_eq!(info.iterations, 1);
        assert_eq!(mlmg.num_iters(), 1);
        assert!(info.final_residual < info.initial_residual);
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let (geom, ba, dm) = layout(16, false);
        let mut op = MLABecLaplacian::new_poisson(&[geom], &[ba.clone()], &[dm.clone()], LinOpInfo::default()).unwrap();
        let other = BoxArray::from_box(IndexSpace::new([0, 0, 0], [7, 7, 0]));
        let odm = DistributionMapping::round_robin(&other, 1);
        let rhs = MultiFab::new(&other, &odm, 1, [0; 3]);
        let mut sol = MultiFab::new(&other, &odm, 1, [0; 3]);

        let mut mlmg = MLMG::new(&mut op);
        assert!(matches!(
            mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-10, 0.0),
            Err(Error::LayoutMismatch(_))
        ));
        assert!(matches!(mlmg.solve(&mut [], &[], 1e-10, 0.0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn fluxes_and_composite_residual_of_a_linear_solution() {
        let (geom, ba, dm) = layout(16, false);
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], LinOpInfo::default()).unwrap();

        // phi = x, with the boundary values given on the faces
        let mut bc = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        for i in 0..bc.len() {
            let region = bc.grown_box(i).clone();
            for iv in region.iter() {
                let x = if iv[0] < 0 { 0.0 } else if iv[0] > 15 { 1.0 } else { (iv[0] as f64 + 0.5) / 16.0 };
                bc.fab_mut(i).set(iv, 0, x);
            }
        }
        op.set_level_bc(0, Some(&bc)).unwrap();

        let rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
        let mut sol = MultiFab::new(&ba, &dm, 1, [0; 3]);
        let mut mlmg = MLMG::new(&mut op);
        let info = mlmg.solve(std::slice::from_mut(&mut sol), std::slice::from_ref(&rhs), 1e-12, 0.0).unwrap();
        assert!(info.converged);
        assert!(max_error(&sol, &geom, |x| x[0]) < 1e-9);

        // F = -beta * b * dphi/dx = 1
        let fluxes = mlmg.get_fluxes(std::slice::from_ref(&sol)).unwrap();
        assert!((fluxes[0][0].max(0) - 1.0).abs() < 1e-8);
        assert!((fluxes[0][0].min(0) - 1.0).abs() < 1e-8);
        assert!(fluxes[0][1].norm0(0) < 1e-8);

        let mut res = MultiFab::new(&ba, &dm, 1, [0; 3]);
        mlmg.comp_residual(std::slice::from_mut(&mut res), &[sol], &[rhs]).unwrap();
        assert!(res.norm0(0) < 1e-8);
    }

    #[test]
    fn two_amr_levels_converge_to_the_composite_solution() {
        let (cgeom, cba, cdm) = layout(32, false);
        let fgeom = cgeom.refine([2, 2, 1]);
        let fba = BoxArray::from_box(IndexSpace::new([16, 16, 0], [47, 47, 0])).max_size([16, 16, 1]);
        let fdm = DistributionMapping::round_robin(&fba, 1);

        let mut op = MLABecLaplacian::new_poisson(
            &[cgeom.clone(), fgeom.clone()],
            &[cba.clone(), fba.clone()],
            &[cdm.clone(), fdm.clone()],
            LinOpInfo::default(),
        )
        .unwrap();
        op.set_level_bc(0, None).unwrap();
        op.set_level_bc(1, None).unwrap();

        let mut crhs = MultiFab::new(&cba, &cdm, 1, [0; 3]);
        let mut frhs = MultiFab::new(&fba, &fdm, 1, [0; 3]);
        fill_cells(&mut crhs, &cgeom, |x| -2.0 * PI * PI * exact(x));
        fill_cells(&mut frhs, &fgeom, |x| -2.0 * PI * PI * exact(x));
        let mut sol = vec![MultiFab::new(&cba, &cdm, 1, [0; 3]), MultiFab::new(&fba, &fdm, 1, [0; 3])];

        let mut mlmg = MLMG::new(&mut op);
        let info = mlmg.solve(&mut sol, &[crhs, frhs], 1e-10, 0.0).unwrap();

        assert!(info.converged);
        assert!(max_error(&sol[1], &fgeom, exact) < 5e-3);
        assert!(max_error(&sol[0], &cgeom, exact) < 5e-3);
    }

    #[test]
    fn node_laplacian_reproduces_a_quadratic() {
        let geom = Geometry::new(domain_box([16, 16, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let ba = BoxArray::from_box(geom.domain().clone()).max_size([8, 8, 1]);
        let dm = DistributionMapping::round_robin(&ba, 1);
        let mut op = MLNodeFdLaplacian::define(&[geom.clone()], &[ba], &[dm], LinOpInfo::default()).unwrap();

        let f = |x: [f64; 3]| x[0] * x[0] + x[1] * x[1];
        let mut bc = op.make(0, 0, op.ngrow());
        fill_nodes(&mut bc, &geom, f);
        op.set_level_bc(0, Some(&bc)).unwrap();

        let mut rhs = op.make(0, 0, [0; 3]);
        rhs.set_val(4.0);
        let mut sol = op.make(0, 0, [0; 3]);

        let mut mlmg = MLMG::new(&mut op);
        let info = mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-12, 0.0).unwrap();
        assert!(info.converged);

        for i in 0..sol.len() {
            for iv in sol.valid_box(i).iter() {
                assert!((sol.fab(i).get(iv, 0) - f(geom.node_position(iv))).abs() < 1e-9);
            }
        }
    }



    fn distributed_solve(comm: Box<dyn Communicator>, nodal: bool) -> (Vec<f64>, usize) {
        let geom = Geometry::new(domain_box([32, 32, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let ba = BoxArray::from_box(geom.domain().clone()).max_size([8, 8, 1]);
        let dm = DistributionMapping::round_robin(&ba, 2);

        let mut values = Vec::new();
        let info = if nodal {
            let mut op = MLNodeFdLaplacian::define_with(comm, &[geom.clone()], &[ba], &[dm], LinOpInfo::default()).unwrap();
            op.set_level_bc(0, None).unwrap();
            let mut rhs = op.make(0, 0, [0; 3]);
            fill_nodes(&mut rhs, &geom, |x| -2.0 * PI * PI * exact(x));
            let mut sol = op.make(0, 0, [0; 3]);

            let mut mlmg = MLMG::new(&mut op);
            mlmg.set_bottom_solver(BottomSolver::CG);
            let info = mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-10, 0.0).unwrap();
            for i in 0..sol.len() {
                values.extend(sol.valid_box(i).iter().map(|iv| sol.fab(i).get(iv, 0)));
            }
            info
        } else {
            let mut op = MLABecLaplacian::define_with(comm, &[geom.clone()], &[ba.clone()], &[dm.clone()], LinOpInfo::default(), 1, None).unwrap();
            op.set_scalars(0.0, -1.0);
            op.set_level_bc(0, None).unwrap();
            let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
            fill_cells(&mut rhs, &geom, |x| -2.0 * PI * PI * exact(x));
            let mut sol = MultiFab::new(&ba, &dm, 1, [0; 3]);

            let mut mlmg = MLMG::new(&mut op);
            mlmg.set_bottom_solver(BottomSolver::BiCGStab);
            let info = mlmg.solve(std::slice::from_mut(&mut sol), &[rhs], 1e-10, 0.0).unwrap();
            for i in 0..sol.len() {
                values.extend(sol.valid_box(i).iter().map(|iv| sol.fab(i).get(iv, 0)));
            }
            info
        };
        assert!(info.converged);
        (values, info.iterations)
    }

    #[test]
    fn two_ranks_give_the_single_rank_solution() {
        for nodal in [false, true] {
            let (serial, serial_iters) = distributed_solve(Box::new(SerialCommunicator::new()), nodal);

            let handles: Vec<_> = ThreadCommunicator::group(2)
                .into_iter()
                .map(|comm| std::thread::spawn(move || distributed_solve(Box::new(comm), nodal)))
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results[0], results[1], "ranks disagree (nodal = {})", nodal);

            let (values, iters) = &results[0];
            assert_eq!(values.len(), serial.len());
            assert!((*iters as i64 - serial_iters as i64).abs() <= 1);

            let diff = values.iter().zip(&serial).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
            assert!(diff < 1e-9, "nodal = {}: difference {}", nodal, diff);
        }
    }
}

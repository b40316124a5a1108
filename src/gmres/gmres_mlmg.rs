use crate::error::Error;
use crate::linop::BcMode;
use crate::mlmg::{SolveInfo, MLMG};
use crate::multifab::MultiFab;
use super::{gmres, GMRESConfig, KrylovOperator};




/**
 * GMRES on AMR level zero of an `MLMG`'s operator, with the multigrid
 * V-cycle as the preconditioner. The operator is applied with homogeneous
 * boundary conditions; inhomogeneous boundary values enter through the
 * initial residual unless `set_property_of_zero` asserts they vanish.
 */
pub struct GMRESMLMG<'m, 'a> {
    mlmg: &'m mut MLMG<'a>,
    config: GMRESConfig,
    num_iters: usize,
    residual_norm: f64,
}




/**
 * The Krylov view of an `MLMG`: vectors are fields on AMR level zero with
 * the operator's ghost zones.
 */
struct Adaptor<'x, 'a> {
    mlmg: &'x mut MLMG<'a>,
    use_precond: bool,
    precond_niters: usize,
}




// ============================================================================
impl<'x, 'a> KrylovOperator for Adaptor<'x, 'a> {
    type Vector = MultiFab;

    fn make_vector(&self) -> MultiFab {
        let linop = self.mlmg.linop();
        linop.make(0, 0, linop.ngrow())
    }

    fn set_to_zero(&self, v: &mut MultiFab) {
        v.set_val(0.0)
    }

    fn assign(&self, dst: &mut MultiFab, src: &MultiFab) {
        dst.copy_from(src, 0, 0, src.ncomp(), [0; 3])
    }

    fn dot(&self, a: &MultiFab, b: &MultiFab) -> f64 {
        self.mlmg.linop().xdoty(0, 0, a, b)
    }

    fn scale(&self, v: &mut MultiFab, a: f64) {
        let ncomp = v.ncomp();
        v.mult(a, 0, ncomp, [0; 3])
    }

    fn increment(&self, v: &mut MultiFab, x: &MultiFab, a: f64) {
        let ncomp = v.ncomp();
        v.saxpy(a, x, 0, 0, ncomp, [0; 3])
    }

    fn apply(&mut self, out: &mut MultiFab, inp: &mut MultiFab) -> Result<(), Error> {
        let linop = self.mlmg.linop_mut();
        linop.apply(0, 0, out, inp, BcMode::Homogeneous, None)?;
        linop.set_dirichlet_nodes_to_zero(0, 0, out);
        Ok(())
    }

    fn precond(&mut self, out: &mut MultiFab, inp: &MultiFab) -> Result<(), Error> {
        if self.use_precond {
            self.mlmg.precond(out, inp, self.precond_niters)
        } else {
            self.assign(out, inp);
            Ok(())
        }
    }
}




// ============================================================================
impl<'m, 'a> GMRESMLMG<'m, 'a> {

    pub fn new(mlmg: &'m mut MLMG<'a>) -> Self {
        Self::with_config(mlmg, GMRESConfig::default())
    }

    pub fn with_config(mlmg: &'m mut MLMG<'a>, config: GMRESConfig) -> Self {
        Self {
            mlmg,
            config,
            num_iters: 0,
            residual_norm: 0.0,
        }
    }

    pub fn config(&self) -> &GMRESConfig {
        &self.config
    }

    /// Assert that the operator maps zero to zero, boundary terms included.
    pub fn set_property_of_zero(&mut self, flag: bool) {
        self.config.prop_zero = flag
    }

    pub fn set_precond_num_iters(&mut self, niters: usize) {
        self.config.precond_niters = niters
    }

    pub fn use_precond(&mut self, flag: bool) {
        self.config.use_precond = flag
    }

    pub fn set_max_iters(&mut self, max_iters: usize) {
        self.config.max_iters = max_iters
    }

    pub fn set_verbose(&mut self, verbose: usize) {
        self.config.verbose = verbose
    }

    pub fn set_restart_length(&mut self, restart_length: usize) {
        self.config.restart_length = restart_length
    }

    pub fn num_iters(&self) -> usize {
        self.num_iters
    }

    /// 2-norm of the residual at the end of the last solve.
    pub fn residual_norm(&self) -> f64 {
        self.residual_norm
    }




    /**
     * Solve `L(sol) = rhs` on AMR level zero, to
     * `max(tol_abs, tol_rel * |b|)` in the 2-norm where `b` is the system
     * GMRES works on. Without the zero property, that system is the
     * correction equation `L(cor) = L(sol) - rhs` and `sol -= cor`
     * afterwards; with it, `rhs` itself.
     */
    pub fn solve(&mut self, sol: &mut MultiFab, rhs: &MultiFab, tol_rel: f64, tol_abs: f64) -> Result<SolveInfo, Error> {
        let linop = self.mlmg.linop_mut();

        if linop.num_amr_levels() != 1 {
            return Err(Error::Unsupported("GMRES over more than one AMR level"));
        }
        let ba = linop.box_array(0, 0);
        let dm = linop.distribution_map(0, 0);

        if sol.box_array() != ba || rhs.box_array() != ba || sol.distribution_map() != dm || rhs.distribution_map() != dm {
            return Err(Error::LayoutMismatch("solution and right-hand side must live on the operator's grids"));
        }
        let ncomp = linop.ncomp();

        if sol.ncomp() != ncomp || rhs.ncomp() != ncomp {
            return Err(Error::InvalidArgument(format!("the operator has {} components", ncomp)));
        }
        linop.prepare_for_solve()?;

        let z = [0; 3];
        let mut x = linop.make(0, 0, linop.ngrow());
        let mut b = linop.make(0, 0, z);
        x.copy_from(sol, 0, 0, ncomp, z);
        b.copy_from(rhs, 0, 0, ncomp, z);
        linop.scale_rhs(0, &mut b);

        if !self.config.prop_zero {
            // b = L(sol) - rhs, with the boundary values in effect
            let mut lx = linop.make(0, 0, z);
            linop.apply(0, 0, &mut lx, &mut x, BcMode::Inhomogeneous, None)?;
            lx.saxpy(-1.0, &b, 0, 0, ncomp, z);
            b = lx;
            sol.copy_from(&x, 0, 0, ncomp, z);
            x.set_val(0.0);
        }
        linop.set_dirichlet_nodes_to_zero(0, 0, &mut b);

        let config = self.config.clone();
        let mut adaptor = Adaptor {
            mlmg: &mut *self.mlmg,
            use_precond: config.use_precond,
            precond_niters: config.precond_niters,
        };
        let initial_residual = adaptor.norm2(&b);
        let info = gmres(&mut adaptor, &mut x, &b, tol_rel, tol_abs, &config)?;

        if config.prop_zero {
            sol.copy_from(&x, 0, 0, ncomp, z);
        } else {
            sol.saxpy(-1.0, &x, 0, 0, ncomp, z);
        }
        self.num_iters = info.iterations;
        self.residual_norm = info.residual;

        Ok(SolveInfo {
            iterations: info.iterations,
            initial_residual,
            final_residual: info.residual,
            converged: info.converged,
        })
    }
}

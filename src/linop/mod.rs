//! Multigrid linear operators. An operator is defined on a hierarchy of AMR
//! levels, and each AMR level on a sequence of multigrid levels, each twice
//! as coarse as the last. The `MLLinOp` trait is the set of capabilities
//! the multigrid and Krylov drivers need from an operator.

pub mod abeclap;
pub mod kernels;
pub mod nodefd;
pub mod poly;
pub mod reflux;

use serde::{Deserialize, Serialize};
use crate::box_array::{BoxArray, DistributionMapping};
use crate::error::Error;
use crate::geometry::Geometry;
use crate::index_space::IntVect;
use crate::message::Communicator;
use crate::multifab::{MultiFab, RunOn};

pub use abeclap::MLABecLaplacian;
pub use nodefd::MLNodeFdLaplacian;




/**
 * Relaxation scheme used by the cell-centered operators.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Smoother {
    GsRb,
    Jacobi,
    GsRbLineSolve,
}

impl Default for Smoother {
    fn default() -> Self {
        Smoother::GsRb
    }
}




/**
 * Options controlling the construction of an operator's multigrid
 * hierarchy.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinOpInfo {
    pub max_coarsening_level: usize,
    pub run_on: RunOn,
    pub smoother: Smoother,
}

impl Default for LinOpInfo {
    fn default() -> Self {
        Self {
            max_coarsening_level: 30,
            run_on: RunOn::default(),
            smoother: Smoother::default(),
        }
    }
}




/**
 * Whether boundary values enter an operator application, or are taken to
 * be zero (as they are for corrections).
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BcMode {
    Homogeneous,
    Inhomogeneous,
}




/**
 * The operations a multigrid operator provides to the solvers. Level
 * indexes are `(amrlev, mglev)`; multigrid levels above zero exist only on
 * AMR level zero. Fields passed as operator input need at least
 * `ngrow()` ghost zones, which the operator overwrites.
 */
pub trait MLLinOp: Send + Sync {
    fn num_amr_levels(&self) -> usize;

    fn num_mg_levels(&self, amrlev: usize) -> usize;

    fn ncomp(&self) -> usize;

    fn ngrow(&self) -> IntVect;

    fn geom(&self, amrlev: usize, mglev: usize) -> &Geometry;

    fn box_array(&self, amrlev: usize, mglev: usize) -> &BoxArray;

    fn distribution_map(&self, amrlev: usize, mglev: usize) -> &DistributionMapping;

    /// Refinement ratio between AMR level `amrlev` and `amrlev + 1`.
    fn amr_ratio(&self, amrlev: usize) -> IntVect;

    fn comm(&self) -> &dyn Communicator;

    fn run_on(&self) -> RunOn;

    /// A field with the operator's layout and component count.
    fn make(&self, amrlev: usize, mglev: usize, ngrow: IntVect) -> MultiFab {
        MultiFab::new(self.box_array(amrlev, mglev), self.distribution_map(amrlev, mglev), self.ncomp(), ngrow)
    }

    fn needs_update(&self) -> bool;

    /// Rebuild derived data (coarsened coefficients, stencil boundary
    /// terms) after coefficients or boundary conditions changed.
    fn update(&mut self) -> Result<(), Error>;

    /// Validate the configuration and bring derived data up to date.
    fn prepare_for_solve(&mut self) -> Result<(), Error>;

    fn is_singular(&self, amrlev: usize) -> bool;

    /// Set the physical boundary values of an AMR level from the ghost
    /// cells of `levelbcdata` (zero when `None`).
    fn set_level_bc(&mut self, amrlev: usize, levelbcdata: Option<&MultiFab>) -> Result<(), Error>;

    /// Interpolate the coarse/fine boundary values of AMR level `amrlev`
    /// from `crse_sol`, the solution on the next coarser level.
    fn set_cf_bndry(&mut self, amrlev: usize, crse_sol: &MultiFab) -> Result<(), Error>;

    /// `out = L(inp)`. With `crse_bcor` the coarse/fine boundary values are
    /// interpolated from that coarse correction and the physical boundary
    /// values are zero.
    fn apply(&mut self, amrlev: usize, mglev: usize, out: &mut MultiFab, inp: &mut MultiFab, bc_mode: BcMode, crse_bcor: Option<&MultiFab>) -> Result<(), Error>;

    /// Relax `L(sol) = rhs` with homogeneous boundary conditions.
    fn smooth(&mut self, amrlev: usize, mglev: usize, sol: &mut MultiFab, rhs: &MultiFab, niter: usize) -> Result<(), Error>;

    /// Restrict `fine` on multigrid level `cmglev - 1` to `crse` on `cmglev`.
    fn restriction(&self, amrlev: usize, cmglev: usize, crse: &mut MultiFab, fine: &MultiFab);

    /// Add the prolongation of `crse` (on `fmglev + 1`) to `fine`.
    fn interpolation(&self, amrlev: usize, fmglev: usize, fine: &mut MultiFab, crse: &MultiFab);

    /// Set the correction on AMR level `amrlev` from the correction on
    /// `amrlev - 1`.
    fn interp_correction(&self, amrlev: usize, fine: &mut MultiFab, crse: &MultiFab) -> Result<(), Error>;

    fn average_down_solution(&self, calev: usize, crse: &mut MultiFab, fine: &MultiFab);

    fn average_down_residual(&self, calev: usize, crse: &mut MultiFab, fine: &MultiFab);

    /// Replace, in the residual of AMR level `calev`, the coarse fluxes on
    /// the coarse/fine interface by the average of the fine fluxes.
    fn reflux(&mut self, calev: usize, res: &mut MultiFab, crse_sol: &mut MultiFab, fine_sol: &mut MultiFab) -> Result<(), Error>;

    /// Move the contribution of inhomogeneous Neumann and Robin boundary
    /// values to the right-hand side, for use with homogeneous
    /// applications.
    fn apply_inhomog_neumann_term(&mut self, amrlev: usize, rhs: &mut MultiFab) -> Result<(), Error>;

    fn set_dirichlet_nodes_to_zero(&self, amrlev: usize, mglev: usize, mf: &mut MultiFab);

    fn xdoty(&self, amrlev: usize, mglev: usize, x: &MultiFab, y: &MultiFab) -> f64;

    fn norm_inf(&self, amrlev: usize, mglev: usize, mf: &MultiFab) -> f64;

    /// Bring a right-hand side to the scaling of the operator's rows.
    fn scale_rhs(&self, _amrlev: usize, _rhs: &mut MultiFab) {}

    /// Face fluxes of the solution, one face-centered field per direction.
    fn get_fluxes(&mut self, amrlev: usize, sol: &mut MultiFab) -> Result<Vec<MultiFab>, Error>;

    /// `resid = b - L(x)` with inhomogeneous boundary conditions.
    fn solution_residual(&mut self, amrlev: usize, resid: &mut MultiFab, x: &mut MultiFab, b: &MultiFab) -> Result<(), Error> {
        let ncomp = self.ncomp();
        self.apply(amrlev, 0, resid, x, BcMode::Inhomogeneous, None)?;
        resid.xpay(-1.0, b, 0, 0, ncomp, [0; 3]);
        Ok(())
    }

    /// `resid = b - L(x)` for a correction `x`.
    #[allow(clippy::too_many_arguments)]
    fn correction_residual(
        &mut self,
        amrlev: usize,
        mglev: usize,
        resid: &mut MultiFab,
        x: &mut MultiFab,
        b: &MultiFab,
        bc_mode: BcMode,
        crse_bcor: Option<&MultiFab>,
    ) -> Result<(), Error> {
        let ncomp = self.ncomp();
        self.apply(amrlev, mglev, resid, x, bc_mode, crse_bcor)?;
        resid.xpay(-1.0, b, 0, 0, ncomp, [0; 3]);
        Ok(())
    }
}




/**
 * The rank whose boxes a local reduction covers: all boxes when running on
 * a single rank.
 */
pub(crate) fn reduction_rank(comm: &dyn Communicator) -> Option<usize> {
    if comm.size() == 1 {
        None
    } else {
        Some(comm.rank())
    }
}

use log::debug;
use crate::bc::LinOpBcType;
use crate::bndry::{BndryRegister, InterpBndryData, COVERED};
use crate::box_array::{BoxArray, DistributionMapping};
use crate::error::Error;
use crate::fab::{Array4, Fab};
use crate::geometry::Geometry;
use crate::index_space::{coarsen_iv, unit, IndexSpace, IndexType, IntVect, Orientation};
use crate::interp::{interp_mf, Interpolater};
use crate::message::{Communicator, ReduceOp, SerialCommunicator};
use crate::multifab::{average_down, average_down_faces, IMultiFab, MultiFab, RunOn};
use super::kernels::{self, Stencil, MAX_LINE_LENGTH};
use super::poly::dirichlet_ghost_coeff;
use super::reflux::FluxRegister;
use super::{reduction_rank, BcMode, LinOpInfo, MLLinOp, Smoother};




/// Order of the tangential interpolation of coarse/fine boundary values.
const CF_INTERP_ORDER: usize = 3;




/**
 * Data of one (AMR level, multigrid level) pair
 */
#[derive(Clone, Debug)]
struct Level {
    geom: Geometry,
    grids: BoxArray,
    dm: DistributionMapping,
    bndry: InterpBndryData,
    acoef: MultiFab,
    bcoef: Vec<MultiFab>,
    overset: Option<IMultiFab>,
    robin: Option<MultiFab>,
    cf: Vec<Vec<Fab<f64>>>,
}




// ============================================================================
impl Level {

    fn new(geom: &Geometry, grids: &BoxArray, dm: &DistributionMapping, ncomp: usize) -> Self {
        let mut acoef = MultiFab::new(grids, dm, 1, [0; 3]);
        acoef.set_val(0.0);

        let bcoef = (0..geom.ndim())
            .map(|d| {
                let mut b = MultiFab::new(&grids.convert(IndexType::face(d)), dm, 1, [0; 3]);
                b.set_val(1.0);
                b
            })
            .collect();

        Self {
            geom: geom.clone(),
            grids: grids.clone(),
            dm: dm.clone(),
            bndry: InterpBndryData::new(grids, dm, ncomp, geom),
            acoef,
            bcoef,
            overset: None,
            robin: None,
            cf: Vec::new(),
        }
    }

    fn stencil(&self, i: usize, alpha: f64, beta: f64) -> Stencil<'_> {
        let dx = self.geom.cell_size();
        let mut dh = [0.0; 3];

        for d in 0..self.geom.ndim() {
            dh[d] = beta / (dx[d] * dx[d]);
        }
        Stencil {
            alpha,
            dh,
            a: self.acoef.array(i),
            b: self.bcoef.iter().map(|b| b.array(i)).collect(),
        }
    }

    fn cf_arrays(&self, i: usize) -> Vec<Array4<'_, f64>> {
        self.cf[i].iter().map(|f| f.array()).collect()
    }
}




/**
 * The cell-centered operator
 *
 * `L(phi) = alpha a phi - beta div(b grad phi)`
 *
 * on a hierarchy of AMR levels, with scalar `alpha` and `beta`, a
 * cell-centered coefficient `a`, and face-centered coefficients `b`. AMR
 * level zero is coarsened by two for multigrid as far as the grids allow;
 * finer AMR levels have a single multigrid level. Cells where an optional
 * overset mask is zero are excluded from the solve.
 */
pub struct MLABecLaplacian {
    info: LinOpInfo,
    comm: Box<dyn Communicator>,
    ncomp: usize,
    levels: Vec<Vec<Level>>,
    amr_ratios: Vec<IntVect>,
    bndry_cor: Vec<InterpBndryData>,
    alpha: f64,
    beta: f64,
    lobc: Vec<[LinOpBcType; 3]>,
    hibc: Vec<[LinOpBcType; 3]>,
    domain_bc_loc: ([f64; 3], [f64; 3]),
    coarse_fine_ratio: Option<i64>,
    max_order: usize,
    singular: bool,
    needs_update: bool,
}




// ============================================================================
impl MLABecLaplacian {




    /**
     * Build a single-component operator on the given AMR levels, running
     * on a single rank.
     */
    pub fn define(geom: &[Geometry], grids: &[BoxArray], dmap: &[DistributionMapping], info: LinOpInfo) -> Result<Self, Error> {
        Self::define_with(Box::new(SerialCommunicator::new()), geom, grids, dmap, info, 1, None)
    }

    /**
     * Build a single-component operator with one overset mask per AMR
     * level (1 for active cells, 0 for excluded cells).
     */
    pub fn define_with_overset(
        geom: &[Geometry],
        grids: &[BoxArray],
        dmap: &[DistributionMapping],
        info: LinOpInfo,
        overset: &[IMultiFab],
    ) -> Result<Self, Error> {
        Self::define_with(Box::new(SerialCommunicator::new()), geom, grids, dmap, info, 1, Some(overset))
    }

    /**
     * The general constructor: communicator, component count, and optional
     * overset masks.
     */
    pub fn define_with(
        comm: Box<dyn Communicator>,
        geom: &[Geometry],
        grids: &[BoxArray],
        dmap: &[DistributionMapping],
        info: LinOpInfo,
        ncomp: usize,
        overset: Option<&[IMultiFab]>,
    ) -> Result<Self, Error> {
        let namr = geom.len();

        if namr == 0 || grids.len() != namr || dmap.len() != namr {
            return Err(Error::InvalidArgument("one geometry, box array and distribution map per AMR level".into()));
        }
        if ncomp == 0 {
            return Err(Error::InvalidArgument("the operator needs at least one component".into()));
        }
        if let Some(masks) = overset {
            if masks.len() != namr {
                return Err(Error::InvalidArgument("one overset mask per AMR level".into()));
            }
        }
        let ndim = geom[0].ndim();
        let mut amr_ratios = Vec::new();

        for a in 1..namr {
            amr_ratios.push(refinement_ratio(&geom[a - 1], &geom[a])?);
        }

        let mut levels = Vec::with_capacity(namr);

        for a in 0..namr {
            if grids[a].len() != dmap[a].len() {
                return Err(Error::LayoutMismatch("box array and distribution map lengths differ"));
            }
            let mut level = Level::new(&geom[a], &grids[a], &dmap[a], ncomp);

            if let Some(masks) = overset {
                if masks[a].box_array() != &grids[a] {
                    return Err(Error::LayoutMismatch("overset mask must be defined on the level's grids"));
                }
                level.overset = Some(ghosted_mask(&masks[a], &geom[a]));
            }
            levels.push(vec![level]);
        }

        let r2 = geom[0].ratio(2);

        while levels[0].len() - 1 < info.max_coarsening_level {
            let fine = &levels[0][levels[0].len() - 1];

            if !fine.grids.coarsenable(r2, 2, ndim) {
                break;
            }
            let cgrids = fine.grids.coarsen(r2);
            let cgeom = fine.geom.coarsen(r2);
            let mut level = Level::new(&cgeom, &cgrids, &fine.dm, ncomp);

            if let Some(mask) = &fine.overset {
                match coarsen_overset(mask, &cgrids, &fine.dm, &cgeom, r2, comm.as_ref()) {
                    Some(cmask) => level.overset = Some(cmask),
                    None => break,
                }
            }
            levels[0].push(level);
        }
        debug!("MLABecLaplacian: {} AMR levels, {} multigrid levels on level 0", namr, levels[0].len());

        let bndry_cor = (0..namr).map(|a| InterpBndryData::new(&grids[a], &dmap[a], ncomp, &geom[a])).collect();
        let periodic_or = |bc: LinOpBcType| {
            let mut bcs = [bc; 3];
            for (d, b) in bcs.iter_mut().enumerate().take(ndim) {
                if geom[0].is_periodic(d) {
                    *b = LinOpBcType::Periodic;
                }
            }
            bcs
        };

        Ok(Self {
            info,
            comm,
            ncomp,
            levels,
            amr_ratios,
            bndry_cor,
            alpha: 0.0,
            beta: 1.0,
            lobc: vec![periodic_or(LinOpBcType::Dirichlet)],
            hibc: vec![periodic_or(LinOpBcType::Dirichlet)],
            domain_bc_loc: ([0.0; 3], [0.0; 3]),
            coarse_fine_ratio: None,
            max_order: 2,
            singular: false,
            needs_update: true,
        })
    }

    /**
     * The Poisson operator `L(phi) = div(grad phi)`: `alpha = 0`,
     * `beta = -1`, `b = 1`.
     */
    pub fn new_poisson(geom: &[Geometry], grids: &[BoxArray], dmap: &[DistributionMapping], info: LinOpInfo) -> Result<Self, Error> {
        let mut op = Self::define(geom, grids, dmap, info)?;
        op.set_scalars(0.0, -1.0);
        Ok(op)
    }




    pub fn set_scalars(&mut self, alpha: f64, beta: f64) {
        self.alpha = alpha;
        self.beta = beta;
        self.needs_update = true;
    }

    /**
     * Set the cell-centered coefficient `a` of an AMR level from component
     * zero of `a`.
     */
    pub fn set_a_coeffs(&mut self, amrlev: usize, a: &MultiFab) -> Result<(), Error> {
        let level = &mut self.levels[amrlev][0];

        if a.box_array() != &level.grids || a.distribution_map() != &level.dm {
            return Err(Error::LayoutMismatch("a coefficients must be defined on the level's grids"));
        }
        level.acoef.copy_from(a, 0, 0, 1, [0; 3]);
        self.needs_update = true;
        Ok(())
    }

    pub fn set_a_coeffs_scalar(&mut self, amrlev: usize, value: f64) {
        self.levels[amrlev][0].acoef.set_val(value);
        self.needs_update = true;
    }

    /**
     * Set the face coefficients `b` of an AMR level, one face-centered field
     * per direction.
     */
    pub fn set_b_coeffs(&mut self, amrlev: usize, b: &[MultiFab]) -> Result<(), Error> {
        let level = &mut self.levels[amrlev][0];
        let ndim = level.geom.ndim();

        if b.len() != ndim {
            return Err(Error::InvalidArgument(format!("expected {} face coefficient fields, got {}", ndim, b.len())));
        }
        for (d, bd) in b.iter().enumerate() {
            if bd.box_array() != level.bcoef[d].box_array() || bd.distribution_map() != &level.dm {
                return Err(Error::LayoutMismatch("b coefficients must be face-centered on the level's grids"));
            }
            level.bcoef[d].copy_from(bd, 0, 0, 1, [0; 3]);
        }
        self.needs_update = true;
        Ok(())
    }

    pub fn set_b_coeffs_scalar(&mut self, amrlev: usize, value: f64) {
        for b in &mut self.levels[amrlev][0].bcoef {
            b.set_val(value);
        }
        self.needs_update = true;
    }

    /**
     * Set the domain boundary conditions, one entry per component (or a
     * single entry for all components). Periodic directions of the geometry
     * must be `Periodic` and no others may be.
     */
    pub fn set_domain_bc(&mut self, lobc: &[[LinOpBcType; 3]], hibc: &[[LinOpBcType; 3]]) -> Result<(), Error> {
        if lobc.len() != hibc.len() || (lobc.len() != 1 && lobc.len() != self.ncomp) {
            return Err(Error::InvalidArgument(format!("expected 1 or {} boundary condition entries", self.ncomp)));
        }
        let geom = &self.levels[0][0].geom;

        for bcs in lobc.iter().chain(hibc) {
            for d in 0..geom.ndim() {
                if geom.is_periodic(d) != (bcs[d] == LinOpBcType::Periodic) {
                    return Err(Error::InvalidArgument(format!("boundary condition in direction {} disagrees with the geometry's periodicity", d)));
                }
            }
        }
        self.lobc = lobc.to_vec();
        self.hibc = hibc.to_vec();
        self.needs_update = true;
        Ok(())
    }

    /**
     * Distance from the domain faces to the points where boundary values
     * apply (zero by default).
     */
    pub fn set_domain_bc_loc(&mut self, lo: [f64; 3], hi: [f64; 3]) {
        self.domain_bc_loc = (lo, hi);
        self.needs_update = true;
    }

    /**
     * Solve AMR level zero as a fine level: its faces not on the physical
     * boundary are Dirichlet, with values interpolated from `crse`, a
     * solution `crse_ratio` times coarser.
     */
    pub fn set_coarse_fine_bc(&mut self, crse: &MultiFab, crse_ratio: i64) -> Result<(), Error> {
        if crse_ratio < 2 {
            return Err(Error::InvalidRatio(crse_ratio));
        }
        let ratio = self.levels[0][0].geom.ratio(crse_ratio);

        self.coarse_fine_ratio = Some(crse_ratio);
        self.needs_update = true;
        self.levels[0][0].bndry.update_bndry_values(crse, 0, 0, self.ncomp, ratio, CF_INTERP_ORDER)
    }

    /**
     * Set Robin coefficients `a phi + b dphi/dn = f` from the first ghost
     * layer of the three fields, which must live on the level's grids.
     */
    pub fn set_robin_bc(&mut self, amrlev: usize, a: &MultiFab, b: &MultiFab, f: &MultiFab) -> Result<(), Error> {
        let level = &mut self.levels[amrlev][0];
        let ng = level.geom.ghost(1);

        for mf in [a, b, f] {
            if mf.box_array() != &level.grids || mf.distribution_map() != &level.dm {
                return Err(Error::LayoutMismatch("Robin coefficients must be defined on the level's grids"));
            }
            if (0..level.geom.ndim()).any(|d| mf.n_grow()[d] < 1) {
                return Err(Error::InvalidArgument("Robin coefficients need one ghost zone".into()));
            }
        }
        let mut robin = MultiFab::new(&level.grids, &level.dm, 3, ng);

        for (c, mf) in [a, b, f].into_iter().enumerate() {
            robin.copy_from(mf, 0, c, 1, ng);
        }
        level.robin = Some(robin);
        self.needs_update = true;
        Ok(())
    }

    /**
     * Number of points (boundary value included) of the Dirichlet ghost
     * cell extrapolation.
     */
    pub fn set_max_order(&mut self, max_order: usize) -> Result<(), Error> {
        if !(2..=4).contains(&max_order) {
            return Err(Error::InvalidArgument(format!("Dirichlet extrapolation order {} (use 2 to 4)", max_order)));
        }
        self.max_order = max_order;
        self.needs_update = true;
        Ok(())
    }

    pub fn info(&self) -> &LinOpInfo {
        &self.info
    }




    fn ensure_updated(&mut self) -> Result<(), Error> {
        if self.needs_update {
            self.update()?;
        }
        Ok(())
    }

    /**
     * Overwrite the ghost cells of `x` on the given level: same-level and
     * periodic neighbors by copy, every other face ghost from its boundary
     * condition. Boundary values come from `values`, or are zero.
     */
    fn fill_ghosts(&self, amrlev: usize, mglev: usize, x: &mut MultiFab, values: Option<&BndryRegister>, robin_f: bool) {
        let level = &self.levels[amrlev][mglev];
        let bd = level.bndry.data();
        let ndim = level.geom.ndim();
        let dx = level.geom.cell_size();
        let ncomp = self.ncomp;
        let max_order = self.max_order;

        debug_assert!((0..ndim).all(|d| x.n_grow()[d] >= 1));
        x.fill_boundary(&level.geom);

        x.for_each_mut(self.info.run_on, |i, valid, fab| {
            for face in Orientation::all(ndim) {
                let d = face.dir;
                let inward = step_inward(face);
                let mask = bd.bndry_masks(face).array(i);
                let bv = values.map(|r| r.face(face).array(i));
                let ghosts = valid.adj_cell(face, 1);

                for n in 0..ncomp {
                    let bc = bd.bndry_cond(i, face, n);
                    let coeffs = match bc {
                        LinOpBcType::Dirichlet => dirichlet_coeffs(bd.bndry_loc(i, face) / dx[d], valid.len()[d], max_order),
                        LinOpBcType::Periodic => continue,
                        _ => Vec::new(),
                    };

                    for gv in ghosts.iter() {
                        if mask.at(gv, 0) == COVERED {
                            continue;
                        }
                        let value = bv.as_ref().map_or(0.0, |a| a.at(gv, n));
                        let phi_i = fab.get(inward(gv, 1), n);

                        let ghost = match bc {
                            LinOpBcType::Dirichlet => {
                                coeffs[0] * value
                                    + coeffs[1..]
                                        .iter()
                                        .enumerate()
                                        .map(|(k, c)| c * fab.get(inward(gv, k as i64 + 1), n))
                                        .sum::<f64>()
                            }
                            LinOpBcType::Neumann => phi_i,
                            LinOpBcType::InhomogNeumann => phi_i + dx[d] * value,
                            LinOpBcType::ReflectOdd => -phi_i,
                            LinOpBcType::Robin => {
                                let (ra, rb, rf) = robin_abf(level.robin.as_ref(), i, gv);
                                let f = if robin_f { rf } else { 0.0 };
                                (f - phi_i * (0.5 * ra - rb / dx[d])) / (0.5 * ra + rb / dx[d])
                            }
                            LinOpBcType::Periodic => phi_i,
                        };
                        fab.set(gv, n, ghost);
                    }
                }
            }
        });
    }

    /**
     * Ghost-filling mode for an operator application: the boundary register
     * to read values from, and whether Robin right-hand sides apply.
     */
    fn bc_values(&mut self, amrlev: usize, bc_mode: BcMode, crse_bcor: Option<&MultiFab>) -> Result<(Option<usize>, bool), Error> {
        match (crse_bcor, bc_mode) {
            (Some(crse), _) if amrlev > 0 => {
                let ratio = self.amr_ratios[amrlev - 1];
                let cor = &mut self.bndry_cor[amrlev];
                cor.set_homog_values();
                cor.update_bndry_values(crse, 0, 0, self.ncomp, ratio, CF_INTERP_ORDER)?;
                Ok((Some(amrlev), false))
            }
            (_, BcMode::Inhomogeneous) => Ok((None, true)),
            (_, BcMode::Homogeneous) => Ok((None, false)),
        }
    }

    fn fill_ghosts_for(&self, amrlev: usize, mglev: usize, x: &mut MultiFab, cor: Option<usize>, inhomog: bool) {
        match (cor, inhomog) {
            (Some(a), _) => self.fill_ghosts(amrlev, mglev, x, Some(self.bndry_cor[a].data().register()), false),
            (None, true) => self.fill_ghosts(amrlev, mglev, x, Some(self.levels[amrlev][mglev].bndry.data().register()), true),
            (None, false) => self.fill_ghosts(amrlev, mglev, x, None, false),
        }
    }

    fn adotx_level(&self, amrlev: usize, mglev: usize, out: &mut MultiFab, x: &MultiFab) {
        let level = &self.levels[amrlev][mglev];
        let (alpha, beta, ncomp) = (self.alpha, self.beta, self.ncomp);

        out.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = level.stencil(i, alpha, beta);
            let xa = x.array(i);
            let mut y = fab.array_mut();

            match &level.overset {
                Some(osm) => kernels::adotx_os(valid, &mut y, &xa, &s, &osm.array(i), ncomp),
                None => kernels::adotx(valid, &mut y, &xa, &s, ncomp),
            }
        });
    }

    fn gsrb_level(&self, amrlev: usize, mglev: usize, sol: &mut MultiFab, rhs: &MultiFab, redblack: i64) {
        let level = &self.levels[amrlev][mglev];
        let (alpha, beta, ncomp) = (self.alpha, self.beta, self.ncomp);
        let ndim = level.geom.ndim();
        let omega = if ndim == 3 { 1.15 } else { 1.0 };
        let line = self.info.smoother == Smoother::GsRbLineSolve;

        sol.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = level.stencil(i, alpha, beta);
            let cf = level.cf_arrays(i);
            let r = rhs.array(i);
            let mut phi = fab.array_mut();

            match (&level.overset, line) {
                (Some(osm), _) => kernels::gsrb_os(valid, &mut phi, &r, &s, &cf, &osm.array(i), redblack, omega, ncomp),
                (None, true) => kernels::gsrb_with_line_solve(valid, &mut phi, &r, &s, &cf, redblack, kernels::line_dir(s.dh, ndim), ncomp),
                (None, false) => kernels::gsrb(valid, &mut phi, &r, &s, &cf, redblack, omega, ncomp),
            }
        });
    }

    fn jacobi_level(&self, amrlev: usize, mglev: usize, sol: &mut MultiFab, ax: &MultiFab, rhs: &MultiFab) {
        let level = &self.levels[amrlev][mglev];
        let (alpha, beta, ncomp) = (self.alpha, self.beta, self.ncomp);

        sol.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = level.stencil(i, alpha, beta);
            let cf = level.cf_arrays(i);
            let mut phi = fab.array_mut();

            match &level.overset {
                Some(osm) => kernels::jacobi_os(valid, &mut phi, &ax.array(i), &rhs.array(i), &s, &cf, &osm.array(i), ncomp),
                None => kernels::jacobi(valid, &mut phi, &ax.array(i), &rhs.array(i), &s, &cf, ncomp),
            }
        });
    }




    fn compute_singular(&self) -> bool {
        let ndim = self.levels[0][0].geom.ndim();
        let flux_only = |bcs: &[[LinOpBcType; 3]]| {
            bcs.iter().all(|bc| {
                (0..ndim).all(|d| matches!(bc[d], LinOpBcType::Periodic | LinOpBcType::Neumann | LinOpBcType::InhomogNeumann))
            })
        };
        if !flux_only(&self.lobc) || !flux_only(&self.hibc) {
            return false;
        }
        if self.coarse_fine_ratio.is_some() || self.levels[0][0].overset.is_some() {
            return false;
        }
        let rank = reduction_rank(self.comm.as_ref());
        let amax = self.comm.all_reduce_f64(self.levels[0][0].acoef.local_norm0(0, rank), ReduceOp::Max);
        self.alpha == 0.0 || amax == 0.0
    }
}




// ============================================================================
impl MLLinOp for MLABecLaplacian {

    fn num_amr_levels(&self) -> usize {
        self.levels.len()
    }

    fn num_mg_levels(&self, amrlev: usize) -> usize {
        self.levels[amrlev].len()
    }

    fn ncomp(&self) -> usize {
        self.ncomp
    }

    fn ngrow(&self) -> IntVect {
        self.levels[0][0].geom.ghost(1)
    }

    fn geom(&self, amrlev: usize, mglev: usize) -> &Geometry {
        &self.levels[amrlev][mglev].geom
    }

    fn box_array(&self, amrlev: usize, mglev: usize) -> &BoxArray {
        &self.levels[amrlev][mglev].grids
    }

    fn distribution_map(&self, amrlev: usize, mglev: usize) -> &DistributionMapping {
        &self.levels[amrlev][mglev].dm
    }

    fn amr_ratio(&self, amrlev: usize) -> IntVect {
        self.amr_ratios[amrlev]
    }

    fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    fn run_on(&self) -> RunOn {
        self.info.run_on
    }

    fn needs_update(&self) -> bool {
        self.needs_update
    }




    fn update(&mut self) -> Result<(), Error> {
        let namr = self.levels.len();
        let ndim = self.levels[0][0].geom.ndim();
        let ncomp = self.ncomp;
        let run_on = self.info.run_on;

        for a in 0..namr {
            let ratio = if a == 0 { self.coarse_fine_ratio.unwrap_or(2) } else { self.amr_ratios[a - 1][0] };
            for level in &mut self.levels[a] {
                level.bndry.data_mut().set_bndry_conds(&self.lobc, &self.hibc, ratio, self.domain_bc_loc);
            }
            self.bndry_cor[a].data_mut().set_bndry_conds(&self.lobc, &self.hibc, ratio, self.domain_bc_loc);
        }

        for a in (1..namr).rev() {
            let ratio = self.amr_ratios[a - 1];
            let (crse, fine) = self.levels.split_at_mut(a);
            let (crse, fine) = (&mut crse[a - 1][0], &fine[0][0]);

            average_down(&fine.acoef, &mut crse.acoef, &crse.geom, 0, 1, ratio);
            for d in 0..ndim {
                average_down_faces(&fine.bcoef[d], &mut crse.bcoef[d], &crse.geom, d, ratio);
            }
        }

        let r2 = self.levels[0][0].geom.ratio(2);

        for m in 1..self.levels[0].len() {
            let (fine, crse) = self.levels[0].split_at_mut(m);
            let (fine, crse) = (&fine[m - 1], &mut crse[0]);

            average_down(&fine.acoef, &mut crse.acoef, &crse.geom, 0, 1, r2);
            for d in 0..ndim {
                average_down_faces(&fine.bcoef[d], &mut crse.bcoef[d], &crse.geom, d, r2);
            }
            let robin = fine.robin.as_ref().map(|r| coarsen_robin(r, crse, r2));
            crse.robin = robin;
        }

        for m in 1..self.levels[0].len() {
            let Level { bcoef, overset, .. } = &mut self.levels[0][m];
            if let Some(osm) = overset.as_ref() {
                let r = (1_u64 << m) as f64;
                let osfac = 2.0 * r / (r + 1.0);
                for (d, b) in bcoef.iter_mut().enumerate() {
                    b.for_each_mut(run_on, |i, valid, fab| {
                        kernels::overset_rescale_bcoef(valid, d, &mut fab.array_mut(), &osm.array(i), osfac)
                    });
                }
            }
        }

        let max_order = self.max_order;
        for level in self.levels.iter_mut().flatten() {
            level.cf = build_cf(level, ncomp, max_order);
        }
        self.singular = self.compute_singular();
        self.needs_update = false;
        Ok(())
    }

    fn prepare_for_solve(&mut self) -> Result<(), Error> {
        self.ensure_updated()?;

        if self.info.smoother == Smoother::GsRbLineSolve {
            for amr in &self.levels {
                let level = &amr[0];
                let ndim = level.geom.ndim();
                let s = level.stencil(0, self.alpha, self.beta);
                let dir = kernels::line_dir(s.dh, ndim);

                for b in level.grids.iter() {
                    let len = b.len()[dir];
                    if len > MAX_LINE_LENGTH {
                        return Err(Error::LineTooLong(len));
                    }
                }
            }
        }
        Ok(())
    }

    fn is_singular(&self, amrlev: usize) -> bool {
        amrlev == 0 && self.singular
    }

    fn set_level_bc(&mut self, amrlev: usize, levelbcdata: Option<&MultiFab>) -> Result<(), Error> {
        let ncomp = self.ncomp;
        let level = &mut self.levels[amrlev][0];
        let ndim = level.geom.ndim();

        match levelbcdata {
            Some(mf) => {
                if (0..ndim).any(|d| mf.n_grow()[d] < 1) {
                    return Err(Error::InvalidArgument("boundary data needs one ghost zone".into()));
                }
                if mf.ncomp() < ncomp {
                    return Err(Error::InvalidArgument(format!("boundary data has {} components, expected {}", mf.ncomp(), ncomp)));
                }
                level.bndry.set_phys_bndry_values(mf, 0, 0, ncomp)
            }
            None => {
                let zero = MultiFab::new(&level.grids, &level.dm, ncomp, level.geom.ghost(1));
                level.bndry.set_phys_bndry_values(&zero, 0, 0, ncomp)
            }
        }
    }

    fn set_cf_bndry(&mut self, amrlev: usize, crse_sol: &MultiFab) -> Result<(), Error> {
        if amrlev == 0 {
            return Err(Error::InvalidArgument("AMR level 0 has no coarser level; use set_coarse_fine_bc".into()));
        }
        let ratio = self.amr_ratios[amrlev - 1];
        self.levels[amrlev][0].bndry.update_bndry_values(crse_sol, 0, 0, self.ncomp, ratio, CF_INTERP_ORDER)
    }




    fn apply(&mut self, amrlev: usize, mglev: usize, out: &mut MultiFab, inp: &mut MultiFab, bc_mode: BcMode, crse_bcor: Option<&MultiFab>) -> Result<(), Error> {
        self.ensure_updated()?;
        let (cor, inhomog) = self.bc_values(amrlev, bc_mode, crse_bcor)?;
        self.fill_ghosts_for(amrlev, mglev, inp, cor, inhomog);
        self.adotx_level(amrlev, mglev, out, inp);
        Ok(())
    }

    fn smooth(&mut self, amrlev: usize, mglev: usize, sol: &mut MultiFab, rhs: &MultiFab, niter: usize) -> Result<(), Error> {
        self.ensure_updated()?;

        match self.info.smoother {
            Smoother::GsRb | Smoother::GsRbLineSolve => {
                for _ in 0..niter {
                    for redblack in 0..2 {
                        self.fill_ghosts(amrlev, mglev, sol, None, false);
                        self.gsrb_level(amrlev, mglev, sol, rhs, redblack);
                    }
                }
            }
            Smoother::Jacobi => {
                let mut ax = self.make(amrlev, mglev, [0; 3]);
                for _ in 0..niter {
                    self.fill_ghosts(amrlev, mglev, sol, None, false);
                    self.adotx_level(amrlev, mglev, &mut ax, sol);
                    self.jacobi_level(amrlev, mglev, sol, &ax, rhs);
                }
            }
        }
        Ok(())
    }




    fn restriction(&self, amrlev: usize, cmglev: usize, crse: &mut MultiFab, fine: &MultiFab) {
        let level = &self.levels[amrlev][cmglev];
        average_down(fine, crse, &level.geom, 0, self.ncomp, level.geom.ratio(2));
    }

    fn interpolation(&self, amrlev: usize, fmglev: usize, fine: &mut MultiFab, crse: &MultiFab) {
        let level = &self.levels[amrlev][fmglev];
        let ratio = level.geom.ratio(2);
        let ncomp = self.ncomp;

        fine.for_each_mut(self.info.run_on, |i, valid, fab| {
            let c = crse.array(i);
            let osm = level.overset.as_ref().map(|m| m.array(i));

            for n in 0..ncomp {
                for iv in valid.iter() {
                    let value = match &osm {
                        Some(m) if m.at(iv, 0) == 0 => 0.0,
                        _ => fab.get(iv, n) + c.at(coarsen_iv(iv, ratio), n),
                    };
                    fab.set(iv, n, value);
                }
            }
        });
    }

    fn interp_correction(&self, amrlev: usize, fine: &mut MultiFab, crse: &MultiFab) -> Result<(), Error> {
        let ratio = self.amr_ratios[amrlev - 1];
        let flevel = &self.levels[amrlev][0];
        let clevel = &self.levels[amrlev - 1][0];
        let mut tmp = MultiFab::new(&flevel.grids.coarsen(ratio), &flevel.dm, self.ncomp, [0; 3]);

        tmp.parallel_copy(crse, 0, 0, self.ncomp, [0; 3], [0; 3], &clevel.geom);
        interp_mf(&Interpolater::pc_interp(), &tmp, 0, fine, 0, self.ncomp, ratio, &clevel.geom, &flevel.geom, &[], self.info.run_on)
    }

    fn average_down_solution(&self, calev: usize, crse: &mut MultiFab, fine: &MultiFab) {
        average_down(fine, crse, &self.levels[calev][0].geom, 0, self.ncomp, self.amr_ratios[calev]);
    }

    fn average_down_residual(&self, calev: usize, crse: &mut MultiFab, fine: &MultiFab) {
        average_down(fine, crse, &self.levels[calev][0].geom, 0, self.ncomp, self.amr_ratios[calev]);
    }

    fn reflux(&mut self, calev: usize, res: &mut MultiFab, crse_sol: &mut MultiFab, fine_sol: &mut MultiFab) -> Result<(), Error> {
        let falev = calev + 1;
        self.set_cf_bndry(falev, crse_sol)?;
        let fine_flux = self.get_fluxes(falev, fine_sol)?;
        let crse_flux = self.get_fluxes(calev, crse_sol)?;
        let flevel = &self.levels[falev][0];

        let mut fr = FluxRegister::new(&flevel.grids, &flevel.dm, self.amr_ratios[calev], &self.levels[calev][0].geom, self.ncomp);
        fr.crse_init(&crse_flux, -1.0);
        fr.fine_add(&fine_flux, 1.0);
        fr.reflux(res, 1.0);
        Ok(())
    }




    fn apply_inhomog_neumann_term(&mut self, amrlev: usize, rhs: &mut MultiFab) -> Result<(), Error> {
        self.ensure_updated()?;
        let level = &self.levels[amrlev][0];
        let bd = level.bndry.data();
        let ndim = level.geom.ndim();
        let dx = level.geom.cell_size();
        let (alpha, beta, ncomp) = (self.alpha, self.beta, self.ncomp);

        rhs.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = level.stencil(i, alpha, beta);

            for face in Orientation::all(ndim) {
                let d = face.dir;
                let inward = step_inward(face);
                let mask = bd.bndry_masks(face).array(i);
                let values = bd.bndry_values(face).array(i);

                for n in 0..ncomp {
                    let bc = bd.bndry_cond(i, face, n);
                    if !matches!(bc, LinOpBcType::InhomogNeumann | LinOpBcType::Robin) {
                        continue;
                    }
                    for gv in valid.adj_cell(face, 1).iter() {
                        if mask.at(gv, 0) == COVERED {
                            continue;
                        }
                        let iv = inward(gv, 1);
                        let extra = match bc {
                            LinOpBcType::InhomogNeumann => dx[d] * values.at(gv, n),
                            _ => {
                                let (ra, rb, rf) = robin_abf(level.robin.as_ref(), i, gv);
                                rf / (0.5 * ra + rb / dx[d])
                            }
                        };
                        let bface = if face.is_low() { s.b[d].at(iv, 0) } else { s.b[d].at(gv, 0) };
                        fab.set(iv, n, fab.get(iv, n) + s.dh[d] * bface * extra);
                    }
                }
            }
        });
        Ok(())
    }

    fn set_dirichlet_nodes_to_zero(&self, amrlev: usize, mglev: usize, mf: &mut MultiFab) {
        if let Some(osm) = &self.levels[amrlev][mglev].overset {
            let ncomp = self.ncomp;
            mf.for_each_mut(self.info.run_on, |i, valid, fab| {
                let m = osm.array(i);
                for n in 0..ncomp {
                    for iv in valid.iter().filter(|&iv| m.at(iv, 0) == 0) {
                        fab.set(iv, n, 0.0);
                    }
                }
            });
        }
    }

    fn xdoty(&self, _amrlev: usize, _mglev: usize, x: &MultiFab, y: &MultiFab) -> f64 {
        let rank = reduction_rank(self.comm.as_ref());
        let local: f64 = (0..self.ncomp).map(|n| x.local_dot(n, y, n, None, rank)).sum();
        self.comm.all_reduce_f64(local, ReduceOp::Sum)
    }

    fn norm_inf(&self, _amrlev: usize, _mglev: usize, mf: &MultiFab) -> f64 {
        let rank = reduction_rank(self.comm.as_ref());
        let local = (0..self.ncomp).map(|n| mf.local_norm0(n, rank)).fold(0.0, f64::max);
        self.comm.all_reduce_f64(local, ReduceOp::Max)
    }

    fn get_fluxes(&mut self, amrlev: usize, sol: &mut MultiFab) -> Result<Vec<MultiFab>, Error> {
        self.ensure_updated()?;
        self.fill_ghosts_for(amrlev, 0, sol, None, true);

        let sol: &MultiFab = sol;
        let level = &self.levels[amrlev][0];
        let dx = level.geom.cell_size();
        let (alpha, beta, ncomp) = (self.alpha, self.beta, self.ncomp);

        Ok((0..level.geom.ndim())
            .map(|d| {
                let mut flux = MultiFab::new(&level.grids.convert(IndexType::face(d)), &level.dm, ncomp, [0; 3]);
                flux.for_each_mut(self.info.run_on, |i, valid, fab| {
                    let s = level.stencil(i, alpha, beta);
                    kernels::flux(valid, d, &mut fab.array_mut(), &sol.array(i), &s, dx[d], ncomp)
                });
                flux
            })
            .collect())
    }
}




/**
 * Ratio between the domains of two AMR levels, required to be an integer
 * of at least 2 along the active axes.
 */
fn refinement_ratio(crse: &Geometry, fine: &Geometry) -> Result<IntVect, Error> {
    let (cl, fl) = (crse.domain().len(), fine.domain().len());
    let mut ratio = [1; 3];

    for d in 0..crse.ndim() {
        let r = (fl[d] / cl[d].max(1)) as i64;
        if r < 2 || fl[d] != cl[d] * r as usize {
            return Err(Error::InvalidRatio(r));
        }
        ratio[d] = r;
    }
    Ok(ratio)
}

fn step_inward(face: Orientation) -> impl Fn(IntVect, i64) -> IntVect {
    let e = unit(face.dir);
    let s = face.sign();
    move |gv, k| [gv[0] - s * k * e[0], gv[1] - s * k * e[1], gv[2] - s * k * e[2]]
}

fn dirichlet_coeffs(bcl: f64, len: usize, max_order: usize) -> Vec<f64> {
    let nint = max_order.min(len + 1).saturating_sub(1).max(1);
    dirichlet_ghost_coeff(bcl, nint)
}

/**
 * Robin coefficients `(a, b, f)` at a ghost cell; without Robin data the
 * condition degenerates to homogeneous Neumann.
 */
fn robin_abf(robin: Option<&MultiFab>, i: usize, gv: IntVect) -> (f64, f64, f64) {
    match robin {
        Some(r) => {
            let fab = r.fab(i);
            (fab.get(gv, 0), fab.get(gv, 1), fab.get(gv, 2))
        }
        None => (0.0, 1.0, 0.0),
    }
}




/**
 * For every box and face, the coefficient of the adjacent interior cell in
 * the ghost cell extrapolation, on the layer of cells just inside the face.
 * Faces whose ghost cells are covered by other boxes get zero.
 */
fn build_cf(level: &Level, ncomp: usize, max_order: usize) -> Vec<Vec<Fab<f64>>> {
    let ndim = level.geom.ndim();
    let dx = level.geom.cell_size();
    let bd = level.bndry.data();

    level
        .grids
        .iter()
        .enumerate()
        .map(|(i, valid)| {
            Orientation::all(ndim)
                .map(|face| {
                    let d = face.dir;
                    let outward = step_inward(face.flip());
                    let mask = bd.bndry_masks(face).array(i);
                    let layer = valid.bndry_cell(face, 1);
                    let mut fab = Fab::new(layer.clone(), ncomp);

                    for n in 0..ncomp {
                        let bc = bd.bndry_cond(i, face, n);
                        let dirichlet = dirichlet_coeffs(bd.bndry_loc(i, face) / dx[d], valid.len()[d], max_order)[1];

                        for iv in layer.iter() {
                            let gv = outward(iv, 1);
                            if mask.at(gv, 0) == COVERED {
                                continue;
                            }
                            let value = match bc {
                                LinOpBcType::Dirichlet => dirichlet,
                                LinOpBcType::Neumann | LinOpBcType::InhomogNeumann => 1.0,
                                LinOpBcType::ReflectOdd => -1.0,
                                LinOpBcType::Robin => {
                                    let (ra, rb, _) = robin_abf(level.robin.as_ref(), i, gv);
                                    -(0.5 * ra - rb / dx[d]) / (0.5 * ra + rb / dx[d])
                                }
                                LinOpBcType::Periodic => 0.0,
                            };
                            fab.set(iv, n, value);
                        }
                    }
                    fab
                })
                .collect()
        })
        .collect()
}




/**
 * Copy an overset mask into a field with one ghost zone, filled from
 * neighbors and set to 1 outside the domain.
 */
fn ghosted_mask(mask: &IMultiFab, geom: &Geometry) -> IMultiFab {
    let mut m = IMultiFab::new(mask.box_array(), mask.distribution_map(), 1, geom.ghost(1));
    m.set_val(1);
    m.copy_from(mask, 0, 0, 1, [0; 3]);
    m.fill_boundary(geom);
    m
}

/**
 * Coarsen an overset mask. Returns `None` (on every rank) if any coarse
 * cell covers both active and excluded fine cells.
 */
fn coarsen_overset(
    fine: &IMultiFab,
    cgrids: &BoxArray,
    dm: &DistributionMapping,
    cgeom: &Geometry,
    ratio: IntVect,
    comm: &dyn Communicator,
) -> Option<IMultiFab> {
    let rank = reduction_rank(comm);
    let mut crse = IMultiFab::new(cgrids, dm, 1, cgeom.ghost(1));
    let mut conformal = true;
    crse.set_val(1);

    for i in 0..crse.len() {
        let owned = rank.map_or(true, |r| dm.owner(i) == r);
        let region = crse.valid_box(i).clone();
        let f = fine.array(i);
        let fab = crse.fab_mut(i);

        for ic in region.iter() {
            let children: Vec<i32> = IndexSpace::new(ic, ic).refine(ratio).iter().map(|iv| f.at(iv, 0)).collect();
            let all_active = children.iter().all(|&m| m != 0);
            let all_excluded = children.iter().all(|&m| m == 0);

            if owned && !all_active && !all_excluded {
                conformal = false;
            }
            fab.set(ic, 0, if all_active { 1 } else { 0 });
        }
    }
    let agreed = comm.all_reduce_f64(if conformal { 1.0 } else { 0.0 }, ReduceOp::Min);

    if agreed < 1.0 {
        return None;
    }
    crse.fill_boundary(cgeom);
    Some(crse)
}

/**
 * Robin coefficients of a coarse multigrid level: each coarse ghost cell
 * takes the average of the fine ghost cells it covers along the face.
 */
fn coarsen_robin(fine: &MultiFab, crse_level: &Level, ratio: IntVect) -> MultiFab {
    let ndim = crse_level.geom.ndim();
    let mut crse = MultiFab::new(&crse_level.grids, &crse_level.dm, 3, crse_level.geom.ghost(1));

    crse.for_each_mut(RunOn::Threads, |i, valid, fab| {
        let f = fine.array(i);

        for face in Orientation::all(ndim) {
            let d = face.dir;
            for gv in valid.adj_cell(face, 1).iter() {
                let mut lo = [gv[0] * ratio[0], gv[1] * ratio[1], gv[2] * ratio[2]];
                lo[d] = if face.is_low() { gv[d] * ratio[d] + ratio[d] - 1 } else { gv[d] * ratio[d] };
                let mut hi = [lo[0] + ratio[0] - 1, lo[1] + ratio[1] - 1, lo[2] + ratio[2] - 1];
                hi[d] = lo[d];
                let cells = IndexSpace::new(lo, hi);
                let count = cells.num_pts() as f64;

                for n in 0..3 {
                    let total: f64 = cells.iter().map(|iv| f.at(iv, n)).sum();
                    fab.set(gv, n, total / count);
                }
            }
        }
    });
    crse
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use std::f64::consts::PI;
    use crate::index_space::domain_box;

    fn layout(n: [i64; 3], periodic: [bool; 3], max_size: i64) -> (Geometry, BoxArray, DistributionMapping) {
        let geom = Geometry::new(domain_box(n, 2), [0.0; 3], [1.0; 3], periodic, 2);
        let ba = BoxArray::from_box(geom.domain().clone()).max_size([max_size, max_size, 1]);
        let dm = DistributionMapping::round_robin(&ba, 1);
        (geom, ba, dm)
    }

    fn serial() -> LinOpInfo {
        LinOpInfo { run_on: RunOn::Serial, ..LinOpInfo::default() }
    }

    fn fill(mf: &mut MultiFab, f: impl Fn(IntVect) -> f64) {
        for i in 0..mf.len() {
            let region = mf.valid_box(i).clone();
            for iv in region.iter() {
                mf.fab_mut(i).set(iv, 0, f(iv));
            }
        }
    }

    #[test]
    fn constants_are_annihilated_with_periodic_boundaries() {
        let (geom, ba, dm) = layout([16, 16, 1], [true, true, false], 8);
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial()).unwrap();
        op.set_level_bc(0, None).unwrap();

        let mut phi = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        phi.set_val(3.0);
        let mut out = MultiFab::new(&ba, &dm, 1, [0; 3]);
        out.set_val(1.0);
        op.apply(0, 0, &mut out, &mut phi, BcMode::Inhomogeneous, None).unwrap();

        assert_eq!(out.norm0(0), 0.0);
        assert!(op.is_singular(0));
    }

    #[test]
    fn linear_functions_satisfy_dirichlet_values_at_the_faces() {
        let (geom, ba, dm) = layout([16, 16, 1], [false; 3], 8);
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial()).unwrap();

        // boundary values are read from the ghost cells and apply on the faces
        let mut bc = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        for i in 0..bc.len() {
            let region = bc.grown_box(i).clone();
            for iv in region.iter() {
                let x = (iv[0].clamp(0, 15) as f64 + if iv[0] < 0 { 0.0 } else if iv[0] > 15 { 1.0 } else { 0.5 }) / 16.0;
                bc.fab_mut(i).set(iv, 0, x);
            }
        }
        op.set_level_bc(0, Some(&bc)).unwrap();

        let mut phi = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        fill(&mut phi, |iv| (iv[0] as f64 + 0.5) / 16.0);
        let mut out = MultiFab::new(&ba, &dm, 1, [0; 3]);
        op.apply(0, 0, &mut out, &mut phi, BcMode::Inhomogeneous, None).unwrap();

        assert!(out.norm0(0) < 1e-10);
        assert!(!op.is_singular(0));
    }

    #[test]
    fn robin_with_zero_b_matches_dirichlet() {
        let (geom, ba, dm) = layout([8, 8, 1], [false; 3], 8);
        let robin = [[LinOpBcType::Robin; 3]];
        let mut rop = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial()).unwrap();
        let mut dop = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial()).unwrap();
        rop.set_domain_bc(&robin, &robin).unwrap();

        let mut a = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        let b = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        let mut f = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        a.set_val(1.0);
        f.set_val(2.0);
        rop.set_robin_bc(0, &a, &b, &f).unwrap();
        rop.set_level_bc(0, None).unwrap();
        dop.set_level_bc(0, Some(&f)).unwrap();

        let mut phi = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        fill(&mut phi, |iv| (iv[0] * iv[1]) as f64);
        let mut phi2 = phi.clone();
        let mut r_out = MultiFab::new(&ba, &dm, 1, [0; 3]);
        let mut d_out = MultiFab::new(&ba, &dm, 1, [0; 3]);
        rop.apply(0, 0, &mut r_out, &mut phi, BcMode::Inhomogeneous, None).unwrap();
        dop.apply(0, 0, &mut d_out, &mut phi2, BcMode::Inhomogeneous, None).unwrap();

        r_out.saxpy(-1.0, &d_out, 0, 0, 1, [0; 3]);
        assert!(r_out.norm0(0) < 1e-9);
    }

    #[test]
    fn inhomogeneous_neumann_term_moves_to_the_right_hand_side() {
        let (geom, ba, dm) = layout([8, 8, 1], [false; 3], 4);
        let neumann = [[LinOpBcType::InhomogNeumann; 3]];
        let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial()).unwrap();
        op.set_domain_bc(&neumann, &neumann).unwrap();

        let mut g = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        g.set_val(0.75);
        op.set_level_bc(0, Some(&g)).unwrap();

        // L(0) with inhomogeneous values is minus the right-hand side term
        let mut zero = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        let mut out = MultiFab::new(&ba, &dm, 1, [0; 3]);
        op.apply(0, 0, &mut out, &mut zero, BcMode::Inhomogeneous, None).unwrap();
        let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
        op.apply_inhomog_neumann_term(0, &mut rhs).unwrap();

        assert!(out.norm0(0) > 0.0);
        out.saxpy(1.0, &rhs, 0, 0, 1, [0; 3]);
        assert!(out.norm0(0) < 1e-12);
        assert!(op.is_singular(0));
    }

    #[test]
    fn multigrid_levels_stop_at_two_cells_or_the_configured_depth() {
        let (geom, ba, dm) = layout([32, 32, 1], [false; 3], 32);
        let op = MLABecLaplacian::define(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial()).unwrap();
        assert_eq!(op.num_mg_levels(0), 5);
        assert_eq!(op.box_array(0, 4).get(0).len(), [2, 2, 1]);

        let info = LinOpInfo { max_coarsening_level: 2, ..serial() };
        let op = MLABecLaplacian::define(&[geom], &[ba], &[dm], info).unwrap();
        assert_eq!(op.num_mg_levels(0), 3);
    }

    #[test]
    fn overset_coarsening_stops_when_the_mask_is_not_conformal() {
        let (geom, ba, dm) = layout([16, 16, 1], [false; 3], 16);
        let mask_for = |cut: i64| {
            let mut mask = IMultiFab::new(&ba, &dm, 1, [0; 3]);
            let region = mask.valid_box(0).clone();
            for iv in region.iter() {
                mask.fab_mut(0).set(iv, 0, if iv[0] < cut { 0 } else { 1 });
            }
            mask
        };
        let op = MLABecLaplacian::define_with_overset(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial(), &[mask_for(3)]).unwrap();
        assert_eq!(op.num_mg_levels(0), 1);

        let op = MLABecLaplacian::define_with_overset(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial(), &[mask_for(4)]).unwrap();
        assert_eq!(op.num_mg_levels(0), 3);
    }

    fn overset_levels_on_box_one(comm: Box<dyn Communicator>, cut: i64) -> usize {
        let (geom, ba, _) = layout([16, 16, 1], [false; 3], 8);
        let dm = DistributionMapping::round_robin(&ba, 2);
        let mut mask = IMultiFab::new(&ba, &dm, 1, [0; 3]);
        mask.set_val(1);
        let region = mask.valid_box(1).clone();
        for iv in region.iter() {
            if iv[0] < region.lo()[0] + cut {
                mask.fab_mut(1).set(iv, 0, 0);
            }
        }
        let op = MLABecLaplacian::define_with(comm, &[geom], &[ba], &[dm], serial(), 1, Some(std::slice::from_ref(&mask))).unwrap();
        op.num_mg_levels(0)
    }

    #[test]
    fn overset_depth_is_agreed_across_ranks() {
        for cut in [3, 4] {
            let expected = overset_levels_on_box_one(Box::new(SerialCommunicator::new()), cut);

            let handles: Vec<_> = crate::message::ThreadCommunicator::group(2)
                .into_iter()
                .map(|comm| std::thread::spawn(move || overset_levels_on_box_one(Box::new(comm), cut)))
                .collect();

            for h in handles {
                assert_eq!(h.join().unwrap(), expected, "cut {}", cut);
            }
        }
        assert_eq!(overset_levels_on_box_one(Box::new(SerialCommunicator::new()), 3), 1);
    }

    #[test]
    fn overset_cells_stay_zero_through_smoothing() {
        let (geom, ba, dm) = layout([16, 16, 1], [false; 3], 8);
        let mut mask = IMultiFab::new(&ba, &dm, 1, [0; 3]);
        for i in 0..mask.len() {
            let region = mask.valid_box(i).clone();
            for iv in region.iter() {
                mask.fab_mut(i).set(iv, 0, if iv[1] < 4 { 0 } else { 1 });
            }
        }
        let mut op = MLABecLaplacian::define_with_overset(&[geom.clone()], &[ba.clone()], &[dm.clone()], serial(), &[mask]).unwrap();
        op.set_scalars(1.0, 1.0);
        op.set_a_coeffs_scalar(0, 1.0);
        op.set_level_bc(0, None).unwrap();

        let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
        rhs.set_val(1.0);
        let mut sol = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
        op.smooth(0, 0, &mut sol, &rhs, 3).unwrap();
        let mut out = MultiFab::new(&ba, &dm, 1, [0; 3]);
        op.apply(0, 0, &mut out, &mut sol, BcMode::Homogeneous, None).unwrap();

        for i in 0..sol.len() {
            for iv in sol.valid_box(i).iter() {
                if iv[1] < 4 {
                    assert_eq!(sol.fab(i).get(iv, 0), 0.0);
                    assert_eq!(out.fab(i).get(iv, 0), 0.0);
                } else {
                    assert!(sol.fab(i).get(iv, 0) > 0.0);
                }
            }
        }
    }

    #[test]
    fn smoothers_reduce_the_error_energy() {
        for (smoother, max_size) in [
            (Smoother::GsRb, 8),
            (Smoother::GsRb, 16),
            (Smoother::Jacobi, 8),
            (Smoother::GsRbLineSolve, 16),
        ] {
            let (geom, ba, dm) = layout([16, 16, 1], [false; 3], max_size);
            let info = LinOpInfo { smoother, ..serial() };
            let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], info).unwrap();
            op.set_level_bc(0, None).unwrap();
            op.prepare_for_solve().unwrap();

            // with a zero rhs the solution is the error, and -x.L(x) is its energy
            let rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
            let mut sol = MultiFab::new(&ba, &dm, 1, geom.ghost(1));
            fill(&mut sol, |iv| {
                let x = geom.cell_center(iv);
                (PI * x[0]).sin() * (PI * x[1]).sin() + if (iv[0] + iv[1]) % 2 == 0 { 0.5 } else { -0.5 }
            });
            let mut lx = MultiFab::new(&ba, &dm, 1, [0; 3]);
            let mut energy = |op: &mut MLABecLaplacian, sol: &mut MultiFab| {
                op.apply(0, 0, &mut lx, sol, BcMode::Homogeneous, None).unwrap();
                -op.xdoty(0, 0, sol, &lx)
            };
            let initial = energy(&mut op, &mut sol);
            let mut last = initial;

            for _ in 0..10 {
                op.smooth(0, 0, &mut sol, &rhs, 1).unwrap();
                let e = energy(&mut op, &mut sol);
                assert!(e < last, "{:?} raised the error energy from {} to {}", smoother, last, e);
                last = e;
            }
            assert!(last < 0.5 * initial, "{:?} only reached {} from {}", smoother, last, initial);
        }
    }

    #[test]
    fn long_lines_are_rejected_by_the_line_smoother() {
        let geom = Geometry::new(domain_box([64, 8, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let ba = BoxArray::from_box(geom.domain().clone());
        let dm = DistributionMapping::round_robin(&ba, 1);
        let info = LinOpInfo { smoother: Smoother::GsRbLineSolve, ..serial() };
        let mut op = MLABecLaplacian::new_poisson(&[geom], &[ba], &[dm], info).unwrap();
        assert_eq!(op.prepare_for_solve(), Err(Error::LineTooLong(64)));
    }

    #[test]
    fn periodicity_must_match_the_boundary_conditions() {
        let (geom, ba, dm) = layout([8, 8, 1], [true, false, false], 8);
        let mut op = MLABecLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        let bc = [[LinOpBcType::Dirichlet; 3]];
        assert!(matches!(op.set_domain_bc(&bc, &bc), Err(Error::InvalidArgument(_))));
    }
}

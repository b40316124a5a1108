use log::debug;
use crate::bc::LinOpBcType;
use crate::box_array::{BoxArray, DistributionMapping};
use crate::error::Error;
use crate::fab::Array4;
use crate::geometry::{CoordSys, Geometry};
use crate::index_space::{unit, IndexSpace, IndexType, IntVect, Orientation};
use crate::message::{Communicator, ReduceOp, SerialCommunicator};
use crate::multifab::{average_down_nodal, IMultiFab, MultiFab, RunOn};
use super::{reduction_rank, BcMode, LinOpInfo, MLLinOp, Smoother};




/// Edge value marking an edge that no embedded boundary crosses.
pub const NO_CUT: f64 = 1.0;

/// Smallest neighbor distance, in units of the node spacing, kept in a row.
const MIN_FRACTION: f64 = 1e-3;




/**
 * Fractional position, relative to the edge center and in units of the
 * edge length, where the level set changes sign between two nodes; `NO_CUT`
 * when it does not. Nodes with a non-negative level set are covered.
 */
pub fn edge_cut(l0: f64, l1: f64) -> f64 {
    if (l0 < 0.0) != (l1 < 0.0) {
        (l0 / (l0 - l1) - 0.5).clamp(-0.5, 0.5)
    } else {
        NO_CUT
    }
}




#[derive(Clone, Debug)]
struct NodeLevel {
    geom: Geometry,
    cells: BoxArray,
    nodes: BoxArray,
    dm: DistributionMapping,
    owner: IMultiFab,
    dirichlet: IMultiFab,
    levelset: Option<MultiFab>,
    cuts: Vec<MultiFab>,
}




// ============================================================================
impl NodeLevel {

    fn new(geom: &Geometry, cells: &BoxArray, dm: &DistributionMapping) -> Self {
        let nodes = cells.convert(IndexType::nodal(geom.ndim()));
        Self {
            geom: geom.clone(),
            cells: cells.clone(),
            owner: IMultiFab::owner_mask(&nodes, dm, geom),
            dirichlet: IMultiFab::new(&nodes, dm, 1, [0; 3]),
            nodes,
            dm: dm.clone(),
            levelset: None,
            cuts: Vec::new(),
        }
    }

    fn node_domain(&self) -> IndexSpace {
        self.geom.domain().convert(IndexType::nodal(self.geom.ndim()))
    }

    /**
     * Edge cut fractions, one field per direction, indexed by the lower node
     * of each edge. Edges leaving the (periodically extended) domain are
     * uncut.
     */
    fn build_cuts(&self) -> Vec<MultiFab> {
        let ls = match &self.levelset {
            Some(ls) => ls,
            None => return Vec::new(),
        };
        let ndim = self.geom.ndim();
        let inside = self.geom.grow_periodic_domain(self.geom.ghost(1)).convert(IndexType::nodal(ndim));

        (0..ndim)
            .map(|d| {
                let e = unit(d);
                let mut ec = MultiFab::new(&self.nodes, &self.dm, 1, self.geom.ghost(1));
                ec.for_each_mut(RunOn::Threads, |i, _, fab| {
                    let l = ls.array(i);
                    let region = fab.index_space().clone();
                    for iv in region.iter() {
                        let ip = [iv[0] + e[0], iv[1] + e[1], iv[2] + e[2]];
                        let value = if inside.contains(iv) && inside.contains(ip) && l.contains(ip[0], ip[1], ip[2]) {
                            edge_cut(l.at(iv, 0), l.at(ip, 0))
                        } else {
                            NO_CUT
                        };
                        fab.set(iv, 0, value);
                    }
                });
                ec
            })
            .collect()
    }

    /**
     * 1 on nodes whose values are prescribed: nodes on Dirichlet domain
     * faces and nodes covered by the embedded boundary.
     */
    fn build_dirichlet(&self, lobc: &[LinOpBcType; 3], hibc: &[LinOpBcType; 3]) -> IMultiFab {
        let ndim = self.geom.ndim();
        let domain = self.node_domain();
        let (dlo, dhi) = (domain.lo(), domain.hi());
        let ls = self.levelset.as_ref();
        let mut mask = IMultiFab::new(&self.nodes, &self.dm, 1, [0; 3]);

        mask.for_each_mut(RunOn::Threads, |i, valid, fab| {
            let l = ls.map(|l| l.array(i));
            for iv in valid.iter() {
                let on_face = (0..ndim).any(|d| {
                    (iv[d] == dlo[d] && lobc[d] == LinOpBcType::Dirichlet) || (iv[d] == dhi[d] && hibc[d] == LinOpBcType::Dirichlet)
                });
                let covered = l.as_ref().map_or(false, |l| l.at(iv, 0) >= 0.0);
                fab.set(iv, 0, if on_face || covered { 1 } else { 0 });
            }
        });
        mask
    }

    fn covered(&self, i: usize, iv: IntVect) -> bool {
        self.levelset.as_ref().map_or(false, |l| l.fab(i).get(iv, 0) >= 0.0)
    }
}




/**
 * One row of the node stencil
 */
struct NodeStencil<'a> {
    ndim: usize,
    dx: [f64; 3],
    sigma: [f64; 3],
    axis_r: Option<f64>,
    cuts: Vec<Array4<'a, f64>>,
}




// ============================================================================
impl<'a> NodeStencil<'a> {

    fn cut(&self, d: usize, iv: IntVect) -> Option<f64> {
        self.cuts.get(d).map(|c| c.at(iv, 0)).filter(|&v| v != NO_CUT)
    }

    /**
     * Return `(scale, diag, off)` so that the operator at `iv` is
     * `scale * (off - diag * x(iv))`. A neighbor across a cut edge is
     * replaced by `eb_value` at the cut point. The row is scaled by the
     * smallest neighbor distance.
     */
    fn row<F: Fn(IntVect) -> f64>(&self, iv: IntVect, x: F, eb_value: f64) -> (f64, f64, f64) {
        let mut scale: f64 = 1.0;
        let mut diag = 0.0;
        let mut off = 0.0;

        for d in 0..self.ndim {
            let e = unit(d);
            let ip = [iv[0] + e[0], iv[1] + e[1], iv[2] + e[2]];
            let im = [iv[0] - e[0], iv[1] - e[1], iv[2] - e[2]];

            let (hp, xp) = match self.cut(d, iv) {
                Some(ec) => ((0.5 + ec).max(MIN_FRACTION), eb_value),
                None => (1.0, x(ip)),
            };
            let (hm, xm) = match self.cut(d, im) {
                Some(ec) => ((0.5 - ec).max(MIN_FRACTION), eb_value),
                None => (1.0, x(im)),
            };
            let h2 = self.dx[d] * self.dx[d];
            let mut cp = 2.0 * self.sigma[d] / (h2 * hp * (hm + hp));
            let mut cm = 2.0 * self.sigma[d] / (h2 * hm * (hm + hp));

            if let (0, Some(r_lo)) = (d, self.axis_r) {
                let r = r_lo + self.dx[0] * iv[0] as f64;
                if r.abs() < 1e-12 * self.dx[0] {
                    cp = 4.0 * self.sigma[0] / (h2 * hp * hp);
                    cm = 0.0;
                } else {
                    cp *= (r + 0.5 * hp * self.dx[0]) / r;
                    cm *= (r - 0.5 * hm * self.dx[0]) / r;
                }
            }
            scale = scale.min(hp).min(hm);
            diag += cp + cm;
            off += cp * xp + cm * xm;
        }
        (scale, diag, off)
    }
}




/**
 * Node-centered finite difference Laplacian `L(phi) = div(sigma grad phi)`
 * with constant `sigma` per direction, on a single AMR level.
 *
 * An optional nodal level set describes an embedded boundary: nodes where
 * it is non-negative are covered and hold the boundary value, and rows of
 * nodes next to a cut edge use the Shortley-Weller stencil. In RZ
 * coordinates direction 0 is the radius and the `1/r` metric terms are
 * included; nodes on the axis use the limit `2 d2phi/dr2`.
 */
pub struct MLNodeFdLaplacian {
    info: LinOpInfo,
    comm: Box<dyn Communicator>,
    levels: Vec<NodeLevel>,
    sigma: [f64; 3],
    lobc: [LinOpBcType; 3],
    hibc: [LinOpBcType; 3],
    bc_values: Option<MultiFab>,
    eb_value: f64,
    singular: bool,
    needs_update: bool,
}




// ============================================================================
impl MLNodeFdLaplacian {

    pub fn define(geom: &[Geometry], grids: &[BoxArray], dmap: &[DistributionMapping], info: LinOpInfo) -> Result<Self, Error> {
        Self::define_with(Box::new(SerialCommunicator::new()), geom, grids, dmap, info)
    }

    /**
     * Build the operator on the cell-centered `grids` of a single AMR level.
     * Fields passed to it are node-centered on those grids.
     */
    pub fn define_with(
        comm: Box<dyn Communicator>,
        geom: &[Geometry],
        grids: &[BoxArray],
        dmap: &[DistributionMapping],
        info: LinOpInfo,
    ) -> Result<Self, Error> {
        if geom.len() != 1 || grids.len() != 1 || dmap.len() != 1 {
            return Err(Error::Unsupported("node-centered operators on more than one AMR level"));
        }
        let (geom, grids, dm) = (&geom[0], &grids[0], &dmap[0]);
        let ndim = geom.ndim();

        if !grids.index_type().is_cell_centered() {
            return Err(Error::InvalidArgument("grids must be cell-centered".into()));
        }
        if grids.len() != dm.len() {
            return Err(Error::LayoutMismatch("box array and distribution map lengths differ"));
        }
        if geom.coord() == CoordSys::RZ && ndim != 2 {
            return Err(Error::InvalidArgument("RZ coordinates need two dimensions".into()));
        }
        let mut levels = vec![NodeLevel::new(geom, grids, dm)];
        let r2 = geom.ratio(2);

        while levels.len() - 1 < info.max_coarsening_level {
            let fine = &levels[levels.len() - 1];
            if !fine.cells.coarsenable(r2, 2, ndim) {
                break;
            }
            let level = NodeLevel::new(&fine.geom.coarsen(r2), &fine.cells.coarsen(r2), &fine.dm);
            levels.push(level);
        }
        debug!("MLNodeFdLaplacian: {} multigrid levels", levels.len());

        let mut bc = [LinOpBcType::Dirichlet; 3];
        for (d, b) in bc.iter_mut().enumerate().take(ndim) {
            if geom.is_periodic(d) {
                *b = LinOpBcType::Periodic;
            }
        }
        if geom.coord() == CoordSys::RZ && geom.prob_lo()[0] == 0.0 {
            bc[0] = LinOpBcType::Neumann;
        }

        Ok(Self {
            info,
            comm,
            levels,
            sigma: [1.0; 3],
            lobc: bc,
            hibc: bc,
            bc_values: None,
            eb_value: 0.0,
            singular: false,
            needs_update: true,
        })
    }




    pub fn set_sigma(&mut self, sigma: [f64; 3]) {
        self.sigma = sigma;
    }

    /**
     * Domain boundary conditions; `Dirichlet`, `Neumann` and `Periodic` are
     * supported. In RZ with the domain touching the axis, the low radial
     * side must be `Neumann`.
     */
    pub fn set_domain_bc(&mut self, lobc: &[[LinOpBcType; 3]], hibc: &[[LinOpBcType; 3]]) -> Result<(), Error> {
        if lobc.len() != 1 || hibc.len() != 1 {
            return Err(Error::InvalidArgument("node-centered operators have a single component".into()));
        }
        let geom = &self.levels[0].geom;

        for bcs in [&lobc[0], &hibc[0]] {
            for d in 0..geom.ndim() {
                if !matches!(bcs[d], LinOpBcType::Dirichlet | LinOpBcType::Neumann | LinOpBcType::Periodic) {
                    return Err(Error::Unsupported("boundary conditions other than Dirichlet, Neumann and periodic on nodes"));
                }
                if geom.is_periodic(d) != (bcs[d] == LinOpBcType::Periodic) {
                    return Err(Error::InvalidArgument(format!("boundary condition in direction {} disagrees with the geometry's periodicity", d)));
                }
            }
        }
        if geom.coord() == CoordSys::RZ && geom.prob_lo()[0] == 0.0 && lobc[0][0] != LinOpBcType::Neumann {
            return Err(Error::InvalidArgument("the axis of an RZ domain needs a Neumann condition".into()));
        }
        self.lobc = lobc[0];
        self.hibc = hibc[0];
        self.needs_update = true;
        Ok(())
    }

    /**
     * Describe the embedded boundary by a nodal level set on the operator's
     * node layout (negative in the fluid).
     */
    pub fn set_eb_levelset(&mut self, levelset: &MultiFab) -> Result<(), Error> {
        let level = &mut self.levels[0];

        if levelset.box_array() != &level.nodes || levelset.distribution_map() != &level.dm {
            return Err(Error::LayoutMismatch("level set must be node-centered on the operator's grids"));
        }
        let mut ls = MultiFab::new(&level.nodes, &level.dm, 1, level.geom.ghost(1));
        ls.copy_from(levelset, 0, 0, 1, [0; 3]);
        ls.fill_boundary(&level.geom);
        level.levelset = Some(ls);
        self.needs_update = true;
        Ok(())
    }

    /// Value of the solution on the embedded boundary.
    pub fn set_eb_dirichlet(&mut self, value: f64) {
        self.eb_value = value;
    }

    fn ensure_updated(&mut self) -> Result<(), Error> {
        if self.needs_update {
            self.update()?;
        }
        Ok(())
    }

    fn stencil<'a>(&self, level: &'a NodeLevel, i: usize) -> NodeStencil<'a> {
        let axis_r = match level.geom.coord() {
            CoordSys::RZ => Some(level.geom.prob_lo()[0]),
            CoordSys::Cartesian => None,
        };
        NodeStencil {
            ndim: level.geom.ndim(),
            dx: level.geom.cell_size(),
            sigma: self.sigma,
            axis_r,
            cuts: level.cuts.iter().map(|c| c.array(i)).collect(),
        }
    }

    /**
     * Fill ghost nodes from neighbors, mirror them across Neumann domain
     * faces, and set the prescribed nodes to their boundary values (zero
     * unless `inhomog`).
     */
    fn fill_ghosts(&self, mglev: usize, x: &mut MultiFab, inhomog: bool) {
        let level = &self.levels[mglev];
        let ndim = level.geom.ndim();
        let domain = level.node_domain();
        let bcv = if inhomog && mglev == 0 { self.bc_values.as_ref() } else { None };
        let eb = if inhomog { self.eb_value } else { 0.0 };
        let (lobc, hibc) = (self.lobc, self.hibc);

        x.fill_boundary(&level.geom);

        x.for_each_mut(self.info.run_on, |i, valid, fab| {
            let dmask = level.dirichlet.array(i);

            for iv in valid.iter().filter(|&iv| dmask.at(iv, 0) != 0) {
                let value = if level.covered(i, iv) { eb } else { bcv.map_or(0.0, |b| b.fab(i).get(iv, 0)) };
                fab.set(iv, 0, value);
            }
            let grown = fab.index_space().clone();

            for face in Orientation::all(ndim) {
                let d = face.dir;
                let bc = if face.is_low() { lobc[d] } else { hibc[d] };
                let wall = if face.is_low() { domain.lo()[d] } else { domain.hi()[d] };
                let touches = if face.is_low() { valid.lo()[d] == wall } else { valid.hi()[d] == wall };

                if bc != LinOpBcType::Neumann || !touches {
                    continue;
                }
                let (mut lo, mut hi) = (grown.lo(), grown.hi());

                if face.is_low() {
                    hi[d] = wall - 1;
                } else {
                    lo[d] = wall + 1;
                }
                let ghosts = IndexSpace::with_type(lo, hi, grown.index_type());

                for gv in ghosts.iter() {
                    let mut src = gv;
                    src[d] = 2 * wall - gv[d];
                    if grown.contains(src) {
                        fab.set(gv, 0, fab.get(src, 0));
                    }
                }
            }
        });
    }

    fn adotx_level(&self, mglev: usize, out: &mut MultiFab, x: &MultiFab, eb_value: f64) {
        let level = &self.levels[mglev];

        out.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = self.stencil(level, i);
            let xa = x.array(i);
            let dmask = level.dirichlet.array(i);

            for iv in valid.iter() {
                let value = if dmask.at(iv, 0) != 0 {
                    0.0
                } else {
                    let (scale, diag, off) = s.row(iv, |jv| xa.at(jv, 0), eb_value);
                    scale * (off - diag * xa.at(iv, 0))
                };
                fab.set(iv, 0, value);
            }
        });
    }

    fn gsrb_level(&self, mglev: usize, sol: &mut MultiFab, rhs: &MultiFab, redblack: i64) {
        let level = &self.levels[mglev];

        sol.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = self.stencil(level, i);
            let r = rhs.array(i);
            let dmask = level.dirichlet.array(i);

            for iv in valid.iter() {
                if (iv[0] + iv[1] + iv[2] + redblack).rem_euclid(2) != 0 || dmask.at(iv, 0) != 0 {
                    continue;
                }
                let (scale, diag, off) = s.row(iv, |jv| fab.get(jv, 0), 0.0);
                fab.set(iv, 0, (off - r.at(iv, 0) / scale) / diag);
            }
        });
    }

    fn jacobi_level(&self, mglev: usize, sol: &mut MultiFab, ax: &MultiFab, rhs: &MultiFab) {
        let level = &self.levels[mglev];

        sol.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = self.stencil(level, i);
            let (r, a) = (rhs.array(i), ax.array(i));
            let dmask = level.dirichlet.array(i);

            for iv in valid.iter().filter(|&iv| dmask.at(iv, 0) == 0) {
                let (scale, diag, _) = s.row(iv, |_| 0.0, 0.0);
                let p = fab.get(iv, 0);
                fab.set(iv, 0, p - 2.0 / 3.0 * (r.at(iv, 0) - a.at(iv, 0)) / (scale * diag));
            }
        });
    }
}




// ============================================================================
impl MLLinOp for MLNodeFdLaplacian {

    fn num_amr_levels(&self) -> usize {
        1
    }

    fn num_mg_levels(&self, _amrlev: usize) -> usize {
        self.levels.len()
    }

    fn ncomp(&self) -> usize {
        1
    }

    fn ngrow(&self) -> IntVect {
        self.levels[0].geom.ghost(1)
    }

    fn geom(&self, _amrlev: usize, mglev: usize) -> &Geometry {
        &self.levels[mglev].geom
    }

    fn box_array(&self, _amrlev: usize, mglev: usize) -> &BoxArray {
        &self.levels[mglev].nodes
    }

    fn distribution_map(&self, _amrlev: usize, mglev: usize) -> &DistributionMapping {
        &self.levels[mglev].dm
    }

    fn amr_ratio(&self, _amrlev: usize) -> IntVect {
        [1; 3]
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
        let r2 = self.levels[0].geom.ratio(2);

        for m in 1..self.levels.len() {
            let (fine, crse) = self.levels.split_at_mut(m);
            let (fine, crse) = (&fine[m - 1], &mut crse[0]);

            let levelset = fine.levelset.as_ref().map(|fls| {
                let mut cls = MultiFab::new(&crse.nodes, &crse.dm, 1, crse.geom.ghost(1));
                average_down_nodal(fls, &mut cls, &crse.geom, 0, 1, r2);
                cls.fill_boundary(&crse.geom);
                cls
            });
            crse.levelset = levelset;
        }
        let (lobc, hibc) = (self.lobc, self.hibc);

        for level in &mut self.levels {
            level.cuts = level.build_cuts();
            level.dirichlet = level.build_dirichlet(&lobc, &hibc);
        }
        let ndim = self.levels[0].geom.ndim();
        self.singular = self.levels[0].levelset.is_none()
            && (0..ndim).all(|d| lobc[d] != LinOpBcType::Dirichlet && hibc[d] != LinOpBcType::Dirichlet);
        self.needs_update = false;
        Ok(())
    }

    fn prepare_for_solve(&mut self) -> Result<(), Error> {
        if self.info.smoother == Smoother::GsRbLineSolve {
            return Err(Error::Unsupported("line solve smoothing of node-centered operators"));
        }
        self.ensure_updated()
    }

    fn is_singular(&self, amrlev: usize) -> bool {
        amrlev == 0 && self.singular
    }

    fn set_level_bc(&mut self, _amrlev: usize, levelbcdata: Option<&MultiFab>) -> Result<(), Error> {
        let level = &self.levels[0];

        self.bc_values = match levelbcdata {
            Some(mf) => {
                if mf.box_array() != &level.nodes || mf.distribution_map() != &level.dm {
                    return Err(Error::LayoutMismatch("boundary data must be node-centered on the operator's grids"));
                }
                let mut values = MultiFab::new(&level.nodes, &level.dm, 1, [0; 3]);
                values.copy_from(mf, 0, 0, 1, [0; 3]);
                Some(values)
            }
            None => None,
        };
        Ok(())
    }

    fn set_cf_bndry(&mut self, _amrlev: usize, _crse_sol: &MultiFab) -> Result<(), Error> {
        Err(Error::Unsupported("coarse/fine boundaries of node-centered operators"))
    }




    fn apply(&mut self, _amrlev: usize, mglev: usize, out: &mut MultiFab, inp: &mut MultiFab, bc_mode: BcMode, _crse_bcor: Option<&MultiFab>) -> Result<(), Error> {
        self.ensure_updated()?;
        let inhomog = bc_mode == BcMode::Inhomogeneous;
        self.fill_ghosts(mglev, inp, inhomog);
        self.adotx_level(mglev, out, inp, if inhomog { self.eb_value } else { 0.0 });
        Ok(())
    }

    fn smooth(&mut self, _amrlev: usize, mglev: usize, sol: &mut MultiFab, rhs: &MultiFab, niter: usize) -> Result<(), Error> {
        self.ensure_updated()?;

        match self.info.smoother {
            Smoother::Jacobi => {
                let mut ax = self.make(0, mglev, [0; 3]);
                for _ in 0..niter {
                    self.fill_ghosts(mglev, sol, false);
                    self.adotx_level(mglev, &mut ax, sol, 0.0);
                    self.jacobi_level(mglev, sol, &ax, rhs);
                }
            }
            Smoother::GsRb | Smoother::GsRbLineSolve => {
                for _ in 0..niter {
                    for redblack in 0..2 {
                        self.fill_ghosts(mglev, sol, false);
                        self.gsrb_level(mglev, sol, rhs, redblack);
                    }
                }
            }
        }
        Ok(())
    }




    /**
     * Full weighting: each coarse node takes the tensor-product `1/4, 1/2,
     * 1/4` average of the fine nodes around it.
     */
    fn restriction(&self, _amrlev: usize, cmglev: usize, crse: &mut MultiFab, fine: &MultiFab) {
        let flevel = &self.levels[cmglev - 1];
        let ndim = flevel.geom.ndim();
        let mut tmp = MultiFab::new(&flevel.nodes, &flevel.dm, 1, flevel.geom.ghost(1));

        tmp.copy_from(fine, 0, 0, 1, [0; 3]);
        self.fill_ghosts(cmglev - 1, &mut tmp, false);

        crse.for_each_mut(self.info.run_on, |i, valid, fab| {
            let f = tmp.array(i);
            for ic in valid.iter() {
                let c = [2 * ic[0], 2 * ic[1], 2 * ic[2]];
                let mut lo = c;
                let mut hi = c;
                for d in 0..ndim {
                    lo[d] -= 1;
                    hi[d] += 1;
                }
                let total: f64 = IndexSpace::new(lo, hi)
                    .iter()
                    .map(|iv| {
                        let w: f64 = (0..ndim).map(|d| if iv[d] == c[d] { 0.5 } else { 0.25 }).product();
                        w * f.at(iv, 0)
                    })
                    .sum();
                fab.set(ic, 0, total);
            }
        });
        self.set_dirichlet_nodes_to_zero(0, cmglev, crse);
    }

    /**
     * Add the multilinear interpolant of the coarse correction at every
     * fine node not prescribed by a boundary condition.
     */
    fn interpolation(&self, _amrlev: usize, fmglev: usize, fine: &mut MultiFab, crse: &MultiFab) {
        let level = &self.levels[fmglev];
        let ndim = level.geom.ndim();

        fine.for_each_mut(self.info.run_on, |i, valid, fab| {
            let c = crse.array(i);
            let dmask = level.dirichlet.array(i);

            for iv in valid.iter().filter(|&iv| dmask.at(iv, 0) == 0) {
                let mut lo = iv;
                let mut hi = iv;
                for d in 0..ndim {
                    lo[d] = iv[d].div_euclid(2);
                    hi[d] = lo[d] + iv[d].rem_euclid(2);
                }
                let corners = IndexSpace::new(lo, hi);
                let value: f64 = corners.iter().map(|jv| c.at(jv, 0)).sum::<f64>() / corners.num_pts() as f64;
                fab.set(iv, 0, fab.get(iv, 0) + value);
            }
        });
    }

    fn interp_correction(&self, _amrlev: usize, _fine: &mut MultiFab, _crse: &MultiFab) -> Result<(), Error> {
        Err(Error::Unsupported("AMR corrections of node-centered operators"))
    }

    fn average_down_solution(&self, _calev: usize, _crse: &mut MultiFab, _fine: &MultiFab) {}

    fn average_down_residual(&self, _calev: usize, _crse: &mut MultiFab, _fine: &MultiFab) {}

    fn reflux(&mut self, _calev: usize, _res: &mut MultiFab, _crse_sol: &mut MultiFab, _fine_sol: &mut MultiFab) -> Result<(), Error> {
        Err(Error::Unsupported("reflux of node-centered operators"))
    }

    fn apply_inhomog_neumann_term(&mut self, _amrlev: usize, _rhs: &mut MultiFab) -> Result<(), Error> {
        Ok(())
    }

    fn set_dirichlet_nodes_to_zero(&self, _amrlev: usize, mglev: usize, mf: &mut MultiFab) {
        let level = &self.levels[mglev];
        let ncomp = mf.ncomp();

        mf.for_each_mut(self.info.run_on, |i, valid, fab| {
            let dmask = level.dirichlet.array(i);
            for iv in valid.iter().filter(|&iv| dmask.at(iv, 0) != 0) {
                for n in 0..ncomp {
                    fab.set(iv, n, 0.0);
                }
            }
        });
    }

    fn scale_rhs(&self, _amrlev: usize, rhs: &mut MultiFab) {
        let level = &self.levels[0];
        if level.cuts.is_empty() {
            return;
        }
        rhs.for_each_mut(self.info.run_on, |i, valid, fab| {
            let s = self.stencil(level, i);
            let dmask = level.dirichlet.array(i);

            for iv in valid.iter().filter(|&iv| dmask.at(iv, 0) == 0) {
                let (scale, _, _) = s.row(iv, |_| 0.0, 0.0);
                fab.set(iv, 0, fab.get(iv, 0) * scale);
            }
        });
    }

    fn xdoty(&self, _amrlev: usize, mglev: usize, x: &MultiFab, y: &MultiFab) -> f64 {
        let rank = reduction_rank(self.comm.as_ref());
        let local = x.local_dot(0, y, 0, Some(&self.levels[mglev].owner), rank);
        self.comm.all_reduce_f64(local, ReduceOp::Sum)
    }

    fn norm_inf(&self, _amrlev: usize, _mglev: usize, mf: &MultiFab) -> f64 {
        let rank = reduction_rank(self.comm.as_ref());
        self.comm.all_reduce_f64(mf.local_norm0(0, rank), ReduceOp::Max)
    }

    /**
     * Cell-centered `sigma grad phi`, each component averaged over the
     * node edges of the cell along that direction.
     */
    fn get_fluxes(&mut self, _amrlev: usize, sol: &mut MultiFab) -> Result<Vec<MultiFab>, Error> {
        self.ensure_updated()?;
        self.fill_ghosts(0, sol, true);

        let sol: &MultiFab = sol;
        let level = &self.levels[0];
        let ndim = level.geom.ndim();
        let dx = level.geom.cell_size();
        let sigma = self.sigma;

        Ok((0..ndim)
            .map(|d| {
                let e = unit(d);
                let mut flux = MultiFab::new(&level.cells, &level.dm, 1, [0; 3]);
                flux.for_each_mut(self.info.run_on, |i, valid, fab| {
                    let x = sol.array(i);
                    for cell in valid.iter() {
                        let mut hi = cell;
                        for t in (0..ndim).filter(|&t| t != d) {
                            hi[t] += 1;
                        }
                        let edges = IndexSpace::new(cell, hi);
                        let total: f64 = edges
                            .iter()
                            .map(|n| x.at([n[0] + e[0], n[1] + e[1], n[2] + e[2]], 0) - x.at(n, 0))
                            .sum();
                        fab.set(cell, 0, sigma[d] * total / (edges.num_pts() as f64 * dx[d]));
                    }
                });
                flux
            })
            .collect())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use std::f64::consts::PI;
    use crate::index_space::domain_box;

    fn layout(n: i64, coord: CoordSys, periodic: [bool; 3]) -> (Geometry, BoxArray, DistributionMapping) {
        let geom = Geometry::new(domain_box([n, n, 1], 2), [0.0; 3], [1.0; 3], periodic, 2).with_coord(coord);
        let ba = BoxArray::from_box(geom.domain().clone()).max_size([n / 2, n / 2, 1]);
        let dm = DistributionMapping::round_robin(&ba, 1);
        (geom, ba, dm)
    }

    fn serial() -> LinOpInfo {
        LinOpInfo { run_on: RunOn::Serial, ..LinOpInfo::default() }
    }

    fn nodal_field(op: &MLNodeFdLaplacian, f: impl Fn([f64; 3]) -> f64) -> MultiFab {
        let geom = op.geom(0, 0).clone();
        let mut mf = op.make(0, 0, op.ngrow());
        for i in 0..mf.len() {
            let region = mf.valid_box(i).clone();
            for iv in region.iter() {
                mf.fab_mut(i).set(iv, 0, f(geom.node_position(iv)));
            }
        }
        mf
    }

    fn values_at(op: &MLNodeFdLaplacian, mf: &MultiFab, mut check: impl FnMut(IntVect, bool, f64)) {
        let level = &op.levels[0];
        for i in 0..mf.len() {
            for iv in mf.valid_box(i).iter() {
                check(iv, level.dirichlet.fab(i).get(iv, 0) != 0, mf.fab(i).get(iv, 0));
            }
        }
    }

    #[test]
    fn quadratics_are_differentiated_exactly() {
        let (geom, ba, dm) = layout(16, CoordSys::Cartesian, [false; 3]);
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        let f = |x: [f64; 3]| x[0] * x[0] + 2.0 * x[1] * x[1];
        let bc = nodal_field(&op, f);
        op.set_level_bc(0, Some(&bc)).unwrap();

        let mut phi = nodal_field(&op, f);
        let mut out = op.make(0, 0, [0; 3]);
        op.apply(0, 0, &mut out, &mut phi, BcMode::Inhomogeneous, None).unwrap();

        values_at(&op, &out, |_, dirichlet, v| {
            let expected = if dirichlet { 0.0 } else { 6.0 };
            assert!((v - expected).abs() < 1e-8, "{} != {}", v, expected);
        });
    }

    #[test]
    fn neumann_walls_mirror_across_several_boxes() {
        let (geom, ba, dm) = layout(16, CoordSys::Cartesian, [false; 3]);
        assert_eq!(ba.len(), 4);
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        let lobc = [LinOpBcType::Neumann, LinOpBcType::Dirichlet, LinOpBcType::Dirichlet];
        op.set_domain_bc(&[lobc], &[[LinOpBcType::Dirichlet; 3]]).unwrap();

        // even about x = 0, so the mirrored ghosts are exact
        let f = |x: [f64; 3]| x[0] * x[0] + 2.0 * x[1] * x[1];
        let bc = nodal_field(&op, f);
        op.set_level_bc(0, Some(&bc)).unwrap();

        let mut phi = nodal_field(&op, f);
        let mut out = op.make(0, 0, [0; 3]);
        op.apply(0, 0, &mut out, &mut phi, BcMode::Inhomogeneous, None).unwrap();

        let mut wall_nodes = 0;
        values_at(&op, &out, |iv, dirichlet, v| {
            if !dirichlet {
                assert!((v - 6.0).abs() < 1e-8, "node {:?}: {}", iv, v);
                wall_nodes += (iv[0] == 0) as usize;
            }
        });
        assert!(wall_nodes > 0);
    }

    #[test]
    fn rz_metric_terms_are_exact_for_quadratics() {
        let (geom, ba, dm) = layout(16, CoordSys::RZ, [false; 3]);
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        let f = |x: [f64; 3]| x[0] * x[0] + x[1] * x[1];
        let bc = nodal_field(&op, f);
        op.set_level_bc(0, Some(&bc)).unwrap();

        let mut phi = nodal_field(&op, f);
        let mut out = op.make(0, 0, [0; 3]);
        op.apply(0, 0, &mut out, &mut phi, BcMode::Inhomogeneous, None).unwrap();

        // (1/r) d/dr (r d/dr r^2) + d2/dz2 z^2 = 4 + 2, on the axis too
        values_at(&op, &out, |iv, dirichlet, v| {
            if !dirichlet {
                assert!((v - 6.0).abs() < 1e-8, "node {:?}: {}", iv, v);
            }
        });
        assert!(matches!(
            op.set_domain_bc(&[[LinOpBcType::Dirichlet; 3]], &[[LinOpBcType::Dirichlet; 3]]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn shortley_weller_rows_are_scaled_by_the_shortest_arm() {
        let (geom, ba, dm) = layout(16, CoordSys::Cartesian, [false; 3]);
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        let levelset = nodal_field(&op, |x| x[0] - 0.3);
        op.set_eb_levelset(&levelset).unwrap();
        op.set_eb_dirichlet(1.0);

        let f = |x: [f64; 3]| (x[0] - 0.3) * (x[0] - 0.3) + 1.0;
        let bc = nodal_field(&op, f);
        op.set_level_bc(0, Some(&bc)).unwrap();
        let mut phi = nodal_field(&op, f);
        let mut out = op.make(0, 0, [0; 3]);
        op.apply(0, 0, &mut out, &mut phi, BcMode::Inhomogeneous, None).unwrap();

        // the plane x = 0.3 sits 0.8 node spacings right of column 4
        values_at(&op, &out, |iv, dirichlet, v| {
            if iv[0] >= 5 {
                assert!(dirichlet);
            }
            if !dirichlet {
                let expected = if iv[0] == 4 { 1.6 } else { 2.0 };
                assert!((v - expected).abs() < 1e-8, "node {:?}: {} != {}", iv, v, expected);
            }
        });
        assert!(!op.is_singular(0));
    }

    #[test]
    fn restriction_preserves_constants_and_interpolation_is_bilinear() {
        let (geom, ba, dm) = layout(16, CoordSys::Cartesian, [true, true, false]);
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        op.prepare_for_solve().unwrap();
        assert!(op.is_singular(0));

        let mut fine = op.make(0, 0, [0; 3]);
        fine.set_val(2.5);
        let mut crse = op.make(0, 1, [0; 3]);
        op.restriction(0, 1, &mut crse, &fine);
        assert!((crse.max(0) - 2.5).abs() < 1e-12 && (crse.min(0) - 2.5).abs() < 1e-12);

        let cgeom = op.geom(0, 1).clone();
        for i in 0..crse.len() {
            let region = crse.valid_box(i).clone();
            for iv in region.iter() {
                let x = cgeom.node_position(iv);
                crse.fab_mut(i).set(iv, 0, x[0] + 3.0 * x[1]);
            }
        }
        let mut cor = op.make(0, 0, [0; 3]);
        op.interpolation(0, 0, &mut cor, &crse);
        let fgeom = op.geom(0, 0).clone();
        values_at(&op, &cor, |iv, _, v| {
            let x = fgeom.node_position(iv);
            assert!((v - (x[0] + 3.0 * x[1])).abs() < 1e-12);
        });
    }

    #[test]
    fn smoothing_leaves_prescribed_nodes_alone() {
        let (geom, ba, dm) = layout(16, CoordSys::Cartesian, [false; 3]);
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], serial()).unwrap();
        op.prepare_for_solve().unwrap();
        assert_eq!(op.num_mg_levels(0), 3);

        let mut rhs = op.make(0, 0, [0; 3]);
        rhs.set_val(1.0);
        op.set_dirichlet_nodes_to_zero(0, 0, &mut rhs);
        let mut sol = op.make(0, 0, op.ngrow());
        op.smooth(0, 0, &mut sol, &rhs, 3).unwrap();

        values_at(&op, &sol, |_, dirichlet, v| {
            if dirichlet {
                assert_eq!(v, 0.0);
            } else {
                assert!(v < 0.0);
            }
        });
    }

    #[test]
    fn smoothers_reduce_the_error_energy() {
        for smoother in [Smoother::GsRb, Smoother::Jacobi] {
            let (geom, ba, dm) = layout(16, CoordSys::Cartesian, [false; 3]);
            let info = LinOpInfo { smoother, ..serial() };
            let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], info).unwrap();
            op.prepare_for_solve().unwrap();

            // with a zero rhs the solution is the error, and -x.L(x) is its energy
            let rhs = op.make(0, 0, [0; 3]);
            let mut sol = nodal_field(&op, |x| (PI * x[0]).sin() * (PI * x[1]).sin() + 0.5 * (16.0 * PI * x[0]).cos());
            op.set_dirichlet_nodes_to_zero(0, 0, &mut sol);
            let mut lx = op.make(0, 0, [0; 3]);
            let mut energy = |op: &mut MLNodeFdLaplacian, sol: &mut MultiFab| {
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
    fn edge_cuts_measure_from_the_edge_center() {
        assert_eq!(edge_cut(-1.0, -2.0), NO_CUT);
        assert!((edge_cut(-1.0, 1.0) - 0.0).abs() < 1e-15);
        assert!((edge_cut(-3.0, 1.0) - 0.25).abs() < 1e-15);
        assert!((edge_cut(1.0, -3.0) + 0.25).abs() < 1e-15);
    }

    #[test]
    fn line_smoothing_is_rejected() {
        let (geom, ba, dm) = layout(8, CoordSys::Cartesian, [false; 3]);
        let info = LinOpInfo { smoother: Smoother::GsRbLineSolve, ..serial() };
        let mut op = MLNodeFdLaplacian::define(&[geom], &[ba], &[dm], info).unwrap();
        assert!(matches!(op.prepare_for_solve(), Err(Error::Unsupported(_))));
    }
}

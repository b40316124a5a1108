//! Filling the ghost zones of a fine level: same-level copies, physical
//! boundary conditions, and spatial and temporal interpolation from the
//! next coarser level.

pub mod rk;

use std::collections::HashMap;
use log::debug;
use crate::bc::{BcRec, PhysBcFunct};
use crate::box_array::{BoxArray, DistributionMapping};
use crate::error::Error;
use crate::geometry::Geometry;
use crate::index_space::IntVect;
use crate::interp::{interp_mf, Interpolater};
use crate::multifab::{MultiFab, RunOn};




/**
 * A hook run on the coarse patch before, or on the fine patch after,
 * spatial interpolation. It receives the patch, the first component, and
 * the number of components.
 */
pub type InterpHook<'a> = &'a dyn Fn(&mut MultiFab, usize, usize);




/**
 * Whether two snapshot times are the same, to within a few ulps.
 */
pub fn same_time(a: f64, b: f64) -> bool {
    (a - b).abs() <= 5.0 * f64::EPSILON * a.abs().max(b.abs())
}




/**
 * The patches needed to fill the coarse/fine ghost region of a fine box
 * array to a given ghost width: the fine ghost cells not covered by any fine
 * box (or its periodic images), and the coarse boxes the interpolater needs
 * to fill them. Patch `p` belongs to fine box `dst[p]`.
 */
#[derive(Clone, Debug)]
struct FpInfo {
    dst: Vec<usize>,
    fine_patch: BoxArray,
    crse_patch: BoxArray,
    dm: DistributionMapping,
}

impl FpInfo {
    fn new(fba: &BoxArray, fdm: &DistributionMapping, fgeom: &Geometry, nghost: IntVect, interp: &Interpolater, ratio: IntVect) -> Self {
        let domain = fgeom.grow_periodic_domain(nghost).convert(fba.index_type());
        let shifts = fgeom.periodic_shifts();

        let mut dst = Vec::new();
        let mut fboxes = Vec::new();
        let mut cboxes = Vec::new();
        let mut owners = Vec::new();

        for (i, b) in fba.iter().enumerate() {
            let mut pieces = vec![b.grow(nghost).intersect(&domain)];

            for fb in fba.iter() {
                for &s in &shifts {
                    let covered = fb.shift(s);
                    pieces = pieces
                        .into_iter()
                        .flat_map(|p| if p.intersects(&covered) { p.difference(&covered) } else { vec![p] })
                        .filter(|p| !p.is_empty())
                        .collect();
                }
            }
            for p in pieces {
                dst.push(i);
                cboxes.push(interp.coarse_box(&p, ratio));
                fboxes.push(p);
                owners.push(fdm.owner(i));
            }
        }
        debug!("fill patch info: {} coarse/fine patches for ghost width {:?}", dst.len(), nghost);

        Self {
            dst,
            fine_patch: BoxArray::new(fboxes),
            crse_patch: BoxArray::new(cboxes),
            dm: DistributionMapping::new(owners),
        }
    }
}




/**
 * Coarse-level Runge-Kutta data stored once per coarse step: the old state
 * and the stage derivatives, all on the coarse patch layout.
 */
#[derive(Clone, Debug)]
struct RkData {
    dt: f64,
    s_old: MultiFab,
    k: Vec<MultiFab>,
}




/**
 * Fills ghost zones of a fine level from coarse data at arbitrary times
 * within a coarse step. Coarse snapshots are copied once into patches
 * covering the coarse/fine ghost region and reused by later calls, so a
 * `FillPatcher` must be rebuilt (or dropped) at every coarse step.
 */
pub struct FillPatcher {
    fba: BoxArray,
    fdm: DistributionMapping,
    fgeom: Geometry,
    cba: BoxArray,
    cdm: DistributionMapping,
    cgeom: Geometry,
    nghost: IntVect,
    ncomp: usize,
    interp: Interpolater,
    ratio: IntVect,
    run_on: RunOn,
    info: HashMap<(IntVect, Interpolater), FpInfo>,
    crse_data: Vec<(f64, MultiFab)>,
    rk: Option<RkData>,
}




// ============================================================================
impl FillPatcher {

    /**
     * Create a patcher for fields on the fine layout `(fba, fdm)`, able to
     * fill up to `nghost` ghost zones of up to `ncomp` components. Coarse
     * data handed to the patcher later must live on `(cba, cdm)`.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fba: &BoxArray,
        fdm: &DistributionMapping,
        fgeom: &Geometry,
        cba: &BoxArray,
        cdm: &DistributionMapping,
        cgeom: &Geometry,
        nghost: IntVect,
        ncomp: usize,
        interp: &Interpolater,
    ) -> Self {
        let mut ratio = [1; 3];
        let (flen, clen) = (fgeom.domain().len(), cgeom.domain().len());

        for d in 0..fgeom.ndim() {
            ratio[d] = (flen[d] / clen[d].max(1)).max(1) as i64;
        }
        Self {
            fba: fba.clone(),
            fdm: fdm.clone(),
            fgeom: fgeom.clone(),
            cba: cba.clone(),
            cdm: cdm.clone(),
            cgeom: cgeom.clone(),
            nghost,
            ncomp,
            interp: *interp,
            ratio,
            run_on: RunOn::default(),
            info: HashMap::new(),
            crse_data: Vec::new(),
            rk: None,
        }
    }

    pub fn with_run_on(mut self, run_on: RunOn) -> Self {
        self.run_on = run_on;
        self
    }

    pub fn ratio(&self) -> IntVect {
        self.ratio
    }

    /**
     * The number of coarse snapshots currently retained.
     */
    pub fn num_snapshots(&self) -> usize {
        self.crse_data.len()
    }




    fn fp_info(&mut self, nghost: IntVect) -> FpInfo {
        let key = (nghost, self.interp);

        if let Some(info) = self.info.get(&key) {
            return info.clone();
        }
        let info = FpInfo::new(&self.fba, &self.fdm, &self.fgeom, nghost, &self.interp, self.ratio);
        self.info.insert(key, info.clone());
        info
    }

    fn check_layout(&self, mf: &MultiFab, ncomp: usize, nghost: IntVect) -> Result<(), Error> {
        if !mf.box_array().same_as(&self.fba) || !mf.distribution_map().same_as(&self.fdm) {
            return Err(Error::LayoutMismatch("FillPatcher requires the identical fine BoxArray and DistributionMapping"));
        }
        if ncomp > self.ncomp {
            return Err(Error::InvalidArgument(format!("{} components requested of a patcher built for {}", ncomp, self.ncomp)));
        }
        if (0..3).any(|d| nghost[d] > self.nghost[d] || nghost[d] > mf.n_grow()[d]) {
            return Err(Error::InvalidArgument(format!("ghost width {:?} exceeds what the patcher or field supports", nghost)));
        }
        Ok(())
    }

    fn check_crse_layout(&self, mf: &MultiFab) -> Result<(), Error> {
        if mf.box_array() != &self.cba || mf.distribution_map() != &self.cdm {
            return Err(Error::LayoutMismatch("coarse data must live on the coarse layout the FillPatcher was built for"));
        }
        Ok(())
    }




    /**
     * Retain the given coarse fields as snapshots (unless a snapshot at the
     * same time is already held), then form the coarse data at `time` on the
     * full-width coarse patch. One snapshot is used as is; two are
     * interpolated linearly in time.
     */
    fn crse_at_time(&mut self, time: f64, crse: &[&MultiFab], crse_times: &[f64], scomp: usize, ncomp: usize) -> Result<MultiFab, Error> {
        if crse.len() != crse_times.len() || crse.is_empty() {
            return Err(Error::InvalidArgument("coarse fields and times must be non-empty and of equal length".into()));
        }
        for mf in crse {
            self.check_crse_layout(mf)?;
        }
        let full = self.fp_info(self.nghost);

        for (mf, &t) in crse.iter().zip(crse_times) {
            if self.crse_data.iter().any(|(t0, _)| same_time(*t0, t)) {
                continue;
            }
            let mut snapshot = MultiFab::new(&full.crse_patch, &full.dm, ncomp, [0; 3]);
            snapshot.parallel_copy(mf, scomp, 0, ncomp, [0; 3], [0; 3], &self.cgeom);
            self.crse_data.push((t, snapshot));
        }
        if self.crse_data.len() > 2 {
            return Err(Error::HighOrderTimeInterp);
        }
        if let Some((_, mf)) = self.crse_data.iter().find(|(t, _)| same_time(*t, time)) {
            return Ok(mf.clone());
        }
        match self.crse_data.as_slice() {
            [(_, mf)] => Ok(mf.clone()),
            [(ta, a), (tb, b)] => {
                let ((t0, f0), (t1, f1)) = if ta < tb { ((*ta, a), (*tb, b)) } else { ((*tb, b), (*ta, a)) };
                let alpha = (t1 - time) / (t1 - t0);
                let beta = (time - t0) / (t1 - t0);
                let mut out = f0.like(ncomp, [0; 3]);
                out.lin_comb(alpha, f0, 0, beta, f1, 0, 0, ncomp, [0; 3]);
                Ok(out)
            }
            _ => Err(Error::TimeMismatch(time)),
        }
    }

    /**
     * Apply the coarse boundary conditions and hooks to a coarse patch on the
     * full-width layout, interpolate it onto the fine patches for the
     * requested ghost width, and write the result into the ghost zones of
     * `mf` starting at `dcomp`.
     */
    #[allow(clippy::too_many_arguments)]
    fn interp_into(
        &mut self,
        mf: &mut MultiFab,
        nghost: IntVect,
        time: f64,
        crse_full: &MultiFab,
        dcomp: usize,
        ncomp: usize,
        cbc: &dyn PhysBcFunct,
        cbccomp: usize,
        bcr: &[BcRec],
        pre_interp: Option<InterpHook>,
        post_interp: Option<InterpHook>,
    ) -> Result<(), Error> {
        let info = self.fp_info(nghost);

        if info.dst.is_empty() {
            return Ok(());
        }
        let mut cpatch = MultiFab::new(&info.crse_patch, &info.dm, ncomp, [0; 3]);
        cpatch.parallel_copy(crse_full, 0, 0, ncomp, [0; 3], [0; 3], &self.cgeom);
        cbc.fill(&mut cpatch, 0, ncomp, self.cgeom.ghost(1), time, cbccomp);

        if let Some(hook) = pre_interp {
            hook(&mut cpatch, 0, ncomp)
        }
        let mut fpatch = MultiFab::new(&info.fine_patch, &info.dm, ncomp, [0; 3]);
        interp_mf(&self.interp, &cpatch, 0, &mut fpatch, 0, ncomp, self.ratio, &self.cgeom, &self.fgeom, bcr, self.run_on)?;

        if let Some(hook) = post_interp {
            hook(&mut fpatch, 0, ncomp)
        }
        for (p, &i) in info.dst.iter().enumerate() {
            let region = fpatch.valid_box(p).clone();
            mf.fab_mut(i).copy_from(fpatch.fab(p), &region, [0; 3], 0, dcomp, ncomp);
        }
        Ok(())
    }




    /**
     * Fill the ghost zones of `mf` (out to `nghost`) which lie inside the
     * (periodically extended) domain but outside every fine box, by
     * interpolating coarse data to `time`. Coarse fields not already held
     * are retained as snapshots; at most two distinct times may be held.
     * `cbc` fills the physical boundary of the coarse patch before spatial
     * interpolation.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn fill_coarse_fine_boundary(
        &mut self,
        mf: &mut MultiFab,
        nghost: IntVect,
        time: f64,
        crse: &[&MultiFab],
        crse_times: &[f64],
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        cbc: &dyn PhysBcFunct,
        cbccomp: usize,
        bcr: &[BcRec],
        pre_interp: Option<InterpHook>,
        post_interp: Option<InterpHook>,
    ) -> Result<(), Error> {
        self.check_layout(mf, ncomp, nghost)?;
        let crse_full = self.crse_at_time(time, crse, crse_times, scomp, ncomp)?;
        self.interp_into(mf, nghost, time, &crse_full, dcomp, ncomp, cbc, cbccomp, bcr, pre_interp, post_interp)
    }

    /**
     * Fill the valid region and ghost zones of `mf`: the coarse/fine ghost
     * zones by interpolation from the coarse level, then the valid region
     * and same-level ghost zones from the fine snapshots, and finally the
     * physical boundary with `fbc`.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn fill(
        &mut self,
        mf: &mut MultiFab,
        nghost: IntVect,
        time: f64,
        crse: &[&MultiFab],
        crse_times: &[f64],
        fine: &[&MultiFab],
        fine_times: &[f64],
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        cbc: &dyn PhysBcFunct,
        cbccomp: usize,
        fbc: &dyn PhysBcFunct,
        fbccomp: usize,
        bcr: &[BcRec],
        pre_interp: Option<InterpHook>,
        post_interp: Option<InterpHook>,
    ) -> Result<(), Error> {
        self.fill_coarse_fine_boundary(mf, nghost, time, crse, crse_times, scomp, dcomp, ncomp, cbc, cbccomp, bcr, pre_interp, post_interp)?;
        fill_patch_single_level(mf, nghost, time, fine, fine_times, scomp, dcomp, ncomp, &self.fgeom, fbc, fbccomp)
    }




    /**
     * Store the coarse state at the start of a coarse step and the Runge-Kutta
     * stage derivatives of that step (three or four of them). Any previously
     * stored data is discarded.
     */
    pub fn store_rk_coarse_data(&mut self, _time: f64, dt: f64, s_old: &MultiFab, rk_k: &[&MultiFab]) -> Result<(), Error> {
        if rk_k.len() != 3 && rk_k.len() != 4 {
            return Err(Error::InvalidRkOrder(rk_k.len()));
        }
        self.check_crse_layout(s_old)?;

        for k in rk_k {
            self.check_crse_layout(k)?;
        }
        let full = self.fp_info(self.nghost);
        let ncomp = self.ncomp;
        let cgeom = self.cgeom.clone();
        let patch = |src: &MultiFab| {
            let mut mf = MultiFab::new(&full.crse_patch, &full.dm, ncomp, [0; 3]);
            mf.parallel_copy(src, 0, 0, ncomp, [0; 3], [0; 3], &cgeom);
            mf
        };
        self.crse_data.clear();
        self.rk = Some(RkData {
            dt,
            s_old: patch(s_old),
            k: rk_k.iter().map(|k| patch(k)).collect(),
        });
        Ok(())
    }

    /**
     * Fill the coarse/fine ghost zones of `mf` for Runge-Kutta stage `stage`
     * of fine sub-cycle `iteration` out of `ncycle`, from the stored coarse
     * data, then exchange same-level ghost zones and apply the fine physical
     * boundary conditions. All components and the full ghost width of the
     * patcher are filled.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn fill_rk(
        &mut self,
        stage: usize,
        iteration: usize,
        ncycle: usize,
        mf: &mut MultiFab,
        time: f64,
        cbc: &dyn PhysBcFunct,
        fbc: &dyn PhysBcFunct,
        bcr: &[BcRec],
    ) -> Result<(), Error> {
        let nghost = self.nghost;
        let ncomp = self.ncomp;
        self.check_layout(mf, ncomp, nghost)?;

        let rk = self.rk.as_ref().ok_or(Error::MissingRkData)?;
        let weights = rk::stage_weights(rk.k.len(), stage, iteration, ncycle)?;
        let mut crse = rk.s_old.clone();

        for (w, k) in weights.iter().zip(&rk.k) {
            crse.saxpy(rk.dt * w, k, 0, 0, ncomp, [0; 3]);
        }
        self.interp_into(mf, nghost, time, &crse, 0, ncomp, cbc, 0, bcr, None, None)?;
        mf.fill_boundary(&self.fgeom);
        fbc.fill(mf, 0, ncomp, nghost, time, 0);
        Ok(())
    }
}




/**
 * Fill `mf` (valid region and `nghost` ghost zones) from one or two source
 * snapshots on the same level, interpolating linearly in time between two,
 * then apply the physical boundary conditions.
 */
#[allow(clippy::too_many_arguments)]
pub fn fill_patch_single_level(
    mf: &mut MultiFab,
    nghost: IntVect,
    time: f64,
    smf: &[&MultiFab],
    stime: &[f64],
    scomp: usize,
    dcomp: usize,
    ncomp: usize,
    geom: &Geometry,
    bc: &dyn PhysBcFunct,
    bccomp: usize,
) -> Result<(), Error> {
    if smf.len() != stime.len() || smf.is_empty() {
        return Err(Error::InvalidArgument("source fields and times must be non-empty and of equal length".into()));
    }
    let source = match (smf, stime) {
        ([a], _) => (*a).clone(),
        ([a, _], [ta, _]) if same_time(*ta, time) => (*a).clone(),
        ([_, b], [_, tb]) if same_time(*tb, time) => (*b).clone(),
        ([a, b], [ta, tb]) => {
            if !a.equivalent_layout(b) {
                return Err(Error::LayoutMismatch("time interpolation requires snapshots on the same layout"));
            }
            let alpha = (tb - time) / (tb - ta);
            let beta = (time - ta) / (tb - ta);
            let mut out = a.like(a.ncomp(), [0; 3]);
            out.lin_comb(alpha, a, 0, beta, b, 0, 0, a.ncomp(), [0; 3]);
            out
        }
        _ => return Err(Error::HighOrderTimeInterp),
    };
    mf.parallel_copy(&source, scomp, dcomp, ncomp, [0; 3], nghost, geom);
    bc.fill(mf, dcomp, ncomp, nghost, time, bccomp);
    Ok(())
}




/**
 * Fill `mf` from data on its own level and the next coarser one, without
 * retaining anything between calls. Intended for use at regrid time, when
 * `mf` lives on a new box array.
 */
#[allow(clippy::too_many_arguments)]
pub fn fill_patch_two_levels(
    mf: &mut MultiFab,
    nghost: IntVect,
    time: f64,
    cmf: &[&MultiFab],
    ct: &[f64],
    fmf: &[&MultiFab],
    ft: &[f64],
    scomp: usize,
    dcomp: usize,
    ncomp: usize,
    cgeom: &Geometry,
    fgeom: &Geometry,
    cbc: &dyn PhysBcFunct,
    fbc: &dyn PhysBcFunct,
    bcr: &[BcRec],
    interp: &Interpolater,
) -> Result<(), Error> {
    let crse = cmf.first().ok_or_else(|| Error::InvalidArgument("no coarse data".into()))?;
    let mut patcher = FillPatcher::new(
        &mf.box_array().clone(),
        &mf.distribution_map().clone(),
        fgeom,
        crse.box_array(),
        crse.distribution_map(),
        cgeom,
        nghost,
        ncomp,
        interp,
    );
    patcher.fill(mf, nghost, time, cmf, ct, fmf, ft, scomp, dcomp, ncomp, cbc, 0, fbc, 0, bcr, None, None)
}

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::box_array::{BoxArray, DistributionMapping};
use crate::fab::{Array4, Array4Mut, Fab};
use crate::geometry::Geometry;
use crate::index_space::{IndexSpace, IntVect};




/**
 * Execution context for per-box loops: either a plain serial loop, or a
 * rayon parallel iterator over the boxes. The loop body is the same closure
 * in both cases.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOn {
    Serial,
    Threads,
}

impl Default for RunOn {
    fn default() -> Self {
        RunOn::Threads
    }
}




/**
 * A collection of fabs, one per box of a `BoxArray`, each grown by a
 * (possibly anisotropic) number of ghost zones. The owning rank of each box
 * is recorded by the `DistributionMapping`; data for every box is held in
 * this process, and collective reductions are formed by combining the
 * `local_*` reductions of each rank's owned boxes through a `Communicator`.
 */
#[derive(Clone, Debug)]
pub struct FabArray<T> {
    ba: BoxArray,
    dm: DistributionMapping,
    ncomp: usize,
    ngrow: IntVect,
    fabs: Vec<Fab<T>>,
}

pub type MultiFab = FabArray<f64>;
pub type IMultiFab = FabArray<i32>;




/**
 * A single copy instruction: fill `region` of destination box `dst` with
 * data from source box `src`, read at `index - shift`.
 */
#[derive(Clone, Debug)]
struct CopyTask {
    dst: usize,
    src: usize,
    region: IndexSpace,
    shift: IntVect,
}




// ============================================================================
impl<T> FabArray<T>
where
    T: Copy + Default + Send + Sync,
{




    pub fn new(ba: &BoxArray, dm: &DistributionMapping, ncomp: usize, ngrow: IntVect) -> Self {
        assert_eq!(ba.len(), dm.len(), "BoxArray and DistributionMapping must have the same length");
        let fabs = ba.iter().map(|b| Fab::new(b.grow(ngrow), ncomp)).collect();
        Self {
            ba: ba.clone(),
            dm: dm.clone(),
            ncomp,
            ngrow,
            fabs,
        }
    }




    /**
     * Make a new array on the same layout as this one, zero-initialized.
     */
    pub fn like(&self, ncomp: usize, ngrow: IntVect) -> Self {
        Self::new(&self.ba, &self.dm, ncomp, ngrow)
    }

    pub fn box_array(&self) -> &BoxArray {
        &self.ba
    }

    pub fn distribution_map(&self) -> &DistributionMapping {
        &self.dm
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn n_grow(&self) -> IntVect {
        self.ngrow
    }

    pub fn len(&self) -> usize {
        self.fabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fabs.is_empty()
    }

    pub fn valid_box(&self, i: usize) -> &IndexSpace {
        self.ba.get(i)
    }

    pub fn grown_box(&self, i: usize) -> &IndexSpace {
        self.fabs[i].index_space()
    }

    pub fn fab(&self, i: usize) -> &Fab<T> {
        &self.fabs[i]
    }

    pub fn fab_mut(&mut self, i: usize) -> &mut Fab<T> {
        &mut self.fabs[i]
    }

    pub fn fabs(&self) -> &[Fab<T>] {
        &self.fabs
    }

    pub fn array(&self, i: usize) -> Array4<'_, T> {
        self.fabs[i].array()
    }

    pub fn array_mut(&mut self, i: usize) -> Array4Mut<'_, T> {
        self.fabs[i].array_mut()
    }

    /**
     * Determine whether another array lives on the identical (not merely an
     * equal) box array and distribution mapping.
     */
    pub fn same_layout<U>(&self, other: &FabArray<U>) -> bool {
        self.ba.same_as(&other.ba) && self.dm.same_as(&other.dm)
    }

    /**
     * Determine whether another array has an equal box array and
     * distribution mapping.
     */
    pub fn equivalent_layout<U>(&self, other: &FabArray<U>) -> bool {
        self.ba == other.ba && self.dm == other.dm
    }




    /**
     * Run a closure over every fab, giving it the box index, the valid box,
     * and the fab. The loop runs in parallel over boxes for
     * `RunOn::Threads`.
     */
    pub fn for_each_mut<F>(&mut self, run_on: RunOn, f: F)
    where
        F: Fn(usize, &IndexSpace, &mut Fab<T>) + Send + Sync,
    {
        let ba = &self.ba;

        match run_on {
            RunOn::Serial => self
                .fabs
                .iter_mut()
                .enumerate()
                .for_each(|(i, fab)| f(i, ba.get(i), fab)),
            RunOn::Threads => self
                .fabs
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, fab)| f(i, ba.get(i), fab)),
        }
    }




    pub fn set_val(&mut self, value: T) {
        for fab in &mut self.fabs {
            fab.set_val_all(value)
        }
    }

    /**
     * Set components `scomp .. scomp + ncomp` to `value` in the valid region
     * grown by `nghost`.
     */
    pub fn set_val_comp(&mut self, value: T, scomp: usize, ncomp: usize, nghost: IntVect) {
        for (i, fab) in self.fabs.iter_mut().enumerate() {
            let region = self.ba.get(i).grow(nghost);
            fab.set_val(value, &region, scomp, ncomp)
        }
    }

    /**
     * Set the ghost zones (but not the valid region) to `value`.
     */
    pub fn set_bndry(&mut self, value: T) {
        for (i, fab) in self.fabs.iter_mut().enumerate() {
            let grown = fab.index_space().clone();
            for piece in grown.difference(self.ba.get(i)) {
                fab.set_val(value, &piece, 0, self.ncomp)
            }
        }
    }

    /**
     * Copy components from an array on the same layout, over the valid
     * region grown by `nghost`.
     */
    pub fn copy_from(&mut self, src: &Self, scomp: usize, dcomp: usize, ncomp: usize, nghost: IntVect) {
        debug_assert!(self.equivalent_layout(src));
        for (i, fab) in self.fabs.iter_mut().enumerate() {
            let region = self.ba.get(i).grow(nghost);
            fab.copy_from(&src.fabs[i], &region, [0; 3], scomp, dcomp, ncomp)
        }
    }




    /**
     * Fill the ghost zones of every box with data from the valid regions of
     * neighboring boxes on the same level, including periodic images. Ghost
     * zones not adjacent to any box are left untouched.
     */
    pub fn fill_boundary(&mut self, geom: &Geometry) {
        self.fill_boundary_comp(geom, 0, self.ncomp)
    }

    pub fn fill_boundary_comp(&mut self, geom: &Geometry, scomp: usize, ncomp: usize) {
        let shifts = geom.periodic_shifts();
        let mut tasks = Vec::new();

        for i in 0..self.len() {
            let ghost_pieces = self.grown_box(i).difference(self.valid_box(i));

            for piece in &ghost_pieces {
                for (j, src) in self.ba.iter().enumerate() {
                    for &shift in &shifts {
                        let region = piece.intersect(&src.shift(shift));
                        if !region.is_empty() {
                            tasks.push(CopyTask { dst: i, src: j, region, shift });
                        }
                    }
                }
            }
        }
        self.execute_tasks(&tasks, scomp, ncomp);
    }

    fn execute_tasks(&mut self, tasks: &[CopyTask], scomp: usize, ncomp: usize) {
        let buffers: Vec<_> = tasks
            .iter()
            .map(|t| self.fabs[t.src].gather(&t.region.shift(neg(t.shift)), scomp, ncomp))
            .collect();

        for (t, buffer) in tasks.iter().zip(buffers) {
            self.fabs[t.dst].scatter(&t.region, scomp, ncomp, &buffer)
        }
    }




    /**
     * Copy data from an array on a (generally) different box array. The
     * destination region of each box is its valid region grown by
     * `dst_ngrow`; source data is taken from valid regions grown by
     * `src_ngrow`, with periodic images. Where sources overlap, data from a
     * source's valid region takes precedence over its ghost zones.
     */
    pub fn parallel_copy(
        &mut self,
        src: &Self,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        src_ngrow: IntVect,
        dst_ngrow: IntVect,
        geom: &Geometry,
    ) {
        let shifts = geom.periodic_shifts();
        let mut passes = vec![src_ngrow];

        if src_ngrow != [0; 3] {
            passes.push([0; 3]);
        }
        for grow in passes {
            for i in 0..self.len() {
                let dst_region = self.valid_box(i).grow(dst_ngrow).intersect(self.grown_box(i));

                for (j, src_box) in src.ba.iter().enumerate() {
                    let src_region = src_box.grow(grow).intersect(src.grown_box(j));

                    for &shift in &shifts {
                        let region = dst_region.intersect(&src_region.shift(shift));
                        if !region.is_empty() {
                            self.fabs[i].copy_from(&src.fabs[j], &region, shift, scomp, dcomp, ncomp);
                        }
                    }
                }
            }
        }
    }

    /**
     * Shorthand for copying all valid source data into the valid region of
     * this array.
     */
    pub fn parallel_copy_valid(&mut self, src: &Self, geom: &Geometry) {
        let ncomp = self.ncomp.min(src.ncomp);
        self.parallel_copy(src, 0, 0, ncomp, [0; 3], [0; 3], geom)
    }




    /**
     * For node-centered data, make every node shared between boxes (or
     * between periodic images) hold the value of a single owning box. The
     * owner is the lowest box index; for self-images the copy runs from the
     * high side to the low side.
     */
    pub fn override_sync(&mut self, geom: &Geometry) {
        for task in self.sync_tasks(geom) {
            let buffer = self.fabs[task.src].gather(&task.region.shift(neg(task.shift)), 0, self.ncomp);
            self.fabs[task.dst].scatter(&task.region, 0, self.ncomp, &buffer);
        }
    }

    fn sync_tasks(&self, geom: &Geometry) -> Vec<CopyTask> {
        let shifts = geom.periodic_shifts();
        let mut tasks = Vec::new();

        for i in 0..self.len() {
            for j in 0..=i {
                for &shift in &shifts {
                    let self_image_from_above = j == i && shift.iter().any(|&s| s != 0) && shift.iter().all(|&s| s <= 0);
                    if j < i || self_image_from_above {
                        let region = self.valid_box(i).intersect(&self.valid_box(j).shift(shift));
                        if !region.is_empty() {
                            tasks.push(CopyTask { dst: i, src: j, region, shift });
                        }
                    }
                }
            }
        }
        tasks
    }
}




// ============================================================================
impl IMultiFab {

    /**
     * For node-centered data, return a mask which is 1 on nodes owned by
     * their box and 0 on nodes whose value is overridden by another box in
     * `override_sync`. Reductions weighted by this mask count each physical
     * node once.
     */
    pub fn owner_mask(ba: &BoxArray, dm: &DistributionMapping, geom: &Geometry) -> Self {
        let mut mask = Self::new(ba, dm, 1, [0; 3]);
        mask.set_val(1);

        for task in mask.sync_tasks(geom) {
            mask.fabs[task.dst].set_val(0, &task.region, 0, 1)
        }
        mask
    }
}




// ============================================================================
impl MultiFab {




    /**
     * self[dcomp..] += a * x[xcomp..], over the valid region grown by
     * `nghost`.
     */
    pub fn saxpy(&mut self, a: f64, x: &Self, xcomp: usize, dcomp: usize, ncomp: usize, nghost: IntVect) {
        self.for_each_mut(RunOn::Threads, |i, valid, fab| {
            let region = valid.grow(nghost);
            let src = x.array(i);
            let mut dst = fab.array_mut();
            for n in 0..ncomp {
                for iv in region.iter() {
                    let v = dst.at(iv, dcomp + n) + a * src.at(iv, xcomp + n);
                    dst.set_at(iv, dcomp + n, v);
                }
            }
        })
    }

    /**
     * self = x + a * self, over the valid region grown by `nghost`.
     */
    pub fn xpay(&mut self, a: f64, x: &Self, xcomp: usize, dcomp: usize, ncomp: usize, nghost: IntVect) {
        self.for_each_mut(RunOn::Threads, |i, valid, fab| {
            let region = valid.grow(nghost);
            let src = x.array(i);
            let mut dst = fab.array_mut();
            for n in 0..ncomp {
                for iv in region.iter() {
                    let v = src.at(iv, xcomp + n) + a * dst.at(iv, dcomp + n);
                    dst.set_at(iv, dcomp + n, v);
                }
            }
        })
    }

    /**
     * self[dcomp..] = a * x[xcomp..] + b * y[ycomp..]
     */
    #[allow(clippy::too_many_arguments)]
    pub fn lin_comb(&mut self, a: f64, x: &Self, xcomp: usize, b: f64, y: &Self, ycomp: usize, dcomp: usize, ncomp: usize, nghost: IntVect) {
        self.for_each_mut(RunOn::Threads, |i, valid, fab| {
            let region = valid.grow(nghost);
            let xa = x.array(i);
            let ya = y.array(i);
            let mut dst = fab.array_mut();
            for n in 0..ncomp {
                for iv in region.iter() {
                    dst.set_at(iv, dcomp + n, a * xa.at(iv, xcomp + n) + b * ya.at(iv, ycomp + n));
                }
            }
        })
    }

    pub fn plus(&mut self, value: f64, comp: usize, ncomp: usize, nghost: IntVect) {
        self.for_each_mut(RunOn::Threads, |_, valid, fab| {
            let region = valid.grow(nghost);
            for n in comp..comp + ncomp {
                for iv in region.iter() {
                    fab.set(iv, n, fab.get(iv, n) + value);
                }
            }
        })
    }

    pub fn mult(&mut self, value: f64, comp: usize, ncomp: usize, nghost: IntVect) {
        self.for_each_mut(RunOn::Threads, |_, valid, fab| {
            let region = valid.grow(nghost);
            for n in comp..comp + ncomp {
                for iv in region.iter() {
                    fab.set(iv, n, fab.get(iv, n) * value);
                }
            }
        })
    }




    /**
     * Max-norm of one component over the valid region of the boxes owned by
     * `rank` (all boxes if `rank` is `None`).
     */
    pub fn local_norm0(&self, comp: usize, rank: Option<usize>) -> f64 {
        self.boxes_of(rank)
            .map(|i| {
                let a = self.array(i);
                self.valid_box(i).iter().map(|iv| a.at(iv, comp).abs()).fold(0.0, f64::max)
            })
            .fold(0.0, f64::max)
    }

    pub fn local_norm1(&self, comp: usize, rank: Option<usize>) -> f64 {
        self.boxes_of(rank)
            .map(|i| {
                let a = self.array(i);
                self.valid_box(i).iter().map(|iv| a.at(iv, comp).abs()).sum::<f64>()
            })
            .sum()
    }

    pub fn local_sum(&self, comp: usize, rank: Option<usize>) -> f64 {
        self.boxes_of(rank)
            .map(|i| {
                let a = self.array(i);
                self.valid_box(i).iter().map(|iv| a.at(iv, comp)).sum::<f64>()
            })
            .sum()
    }

    pub fn local_min(&self, comp: usize, rank: Option<usize>) -> f64 {
        self.boxes_of(rank)
            .map(|i| {
                let a = self.array(i);
                self.valid_box(i).iter().map(|iv| a.at(iv, comp)).fold(f64::INFINITY, f64::min)
            })
            .fold(f64::INFINITY, f64::min)
    }

    pub fn local_max(&self, comp: usize, rank: Option<usize>) -> f64 {
        self.boxes_of(rank)
            .map(|i| {
                let a = self.array(i);
                self.valid_box(i).iter().map(|iv| a.at(iv, comp)).fold(f64::NEG_INFINITY, f64::max)
            })
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /**
     * Dot product of one component of two arrays on the same layout, with
     * an optional integer weight (e.g. a nodal owner mask).
     */
    pub fn local_dot(&self, xcomp: usize, y: &Self, ycomp: usize, mask: Option<&IMultiFab>, rank: Option<usize>) -> f64 {
        self.boxes_of(rank)
            .map(|i| {
                let a = self.array(i);
                let b = y.array(i);
                let m = mask.map(|m| m.array(i));
                self.valid_box(i)
                    .iter()
                    .map(|iv| {
                        let w = m.map_or(1.0, |m| m.at(iv, 0) as f64);
                        w * a.at(iv, xcomp) * b.at(iv, ycomp)
                    })
                    .sum::<f64>()
            })
            .sum()
    }

    pub fn norm0(&self, comp: usize) -> f64 {
        self.local_norm0(comp, None)
    }

    pub fn norm1(&self, comp: usize) -> f64 {
        self.local_norm1(comp, None)
    }

    pub fn norm2(&self, comp: usize) -> f64 {
        self.local_dot(comp, self, comp, None, None).sqrt()
    }

    pub fn dot(&self, xcomp: usize, y: &Self, ycomp: usize) -> f64 {
        self.local_dot(xcomp, y, ycomp, None, None)
    }

    pub fn sum(&self, comp: usize) -> f64 {
        self.local_sum(comp, None)
    }

    pub fn min(&self, comp: usize) -> f64 {
        self.local_min(comp, None)
    }

    pub fn max(&self, comp: usize) -> f64 {
        self.local_max(comp, None)
    }

    fn boxes_of(&self, rank: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(move |&i| rank.map_or(true, |r| self.dm.owner(i) == r))
    }
}




/**
 * Average cell-centered fine data onto the coarse cells it covers. The
 * coarse array may have any box array; the average is formed on the
 * coarsened fine boxes and then copied.
 */
pub fn average_down(fine: &MultiFab, crse: &mut MultiFab, cgeom: &Geometry, scomp: usize, ncomp: usize, ratio: IntVect) {
    let cba = fine.box_array().coarsen(ratio);
    let mut tmp = MultiFab::new(&cba, fine.distribution_map(), ncomp, [0; 3]);
    let volume = (ratio[0] * ratio[1] * ratio[2]) as f64;

    tmp.for_each_mut(RunOn::Threads, |i, valid, fab| {
        let f = fine.array(i);
        for n in 0..ncomp {
            for ic in valid.iter() {
                let fine_cells = IndexSpace::new(ic, ic).refine(ratio);
                let total: f64 = fine_cells.iter().map(|iv| f.at(iv, scomp + n)).sum();
                fab.set(ic, n, total / volume);
            }
        }
    });
    crse.parallel_copy(&tmp, 0, scomp, ncomp, [0; 3], [0; 3], cgeom);
}




/**
 * Inject node-centered fine data onto coincident coarse nodes.
 */
pub fn average_down_nodal(fine: &MultiFab, crse: &mut MultiFab, cgeom: &Geometry, scomp: usize, ncomp: usize, ratio: IntVect) {
    let cba = fine.box_array().coarsen(ratio);
    let mut tmp = MultiFab::new(&cba, fine.distribution_map(), ncomp, [0; 3]);

    tmp.for_each_mut(RunOn::Threads, |i, valid, fab| {
        let f = fine.array(i);
        for n in 0..ncomp {
            for ic in valid.iter() {
                let iv = [ic[0] * ratio[0], ic[1] * ratio[1], ic[2] * ratio[2]];
                fab.set(ic, n, f.at(iv, scomp + n));
            }
        }
    });
    crse.parallel_copy(&tmp, 0, scomp, ncomp, [0; 3], [0; 3], cgeom);
}




/**
 * Average face-centered fine data (normal to `dir`) onto the coarse faces
 * it covers, in the transverse directions only.
 */
pub fn average_down_faces(fine: &MultiFab, crse: &mut MultiFab, cgeom: &Geometry, dir: usize, ratio: IntVect) {
    let cba = fine.box_array().coarsen(ratio);
    let ncomp = fine.ncomp();
    let mut tmp = MultiFab::new(&cba, fine.distribution_map(), ncomp, [0; 3]);
    let mut tr = ratio;
    tr[dir] = 1;
    let area = (tr[0] * tr[1] * tr[2]) as f64;

    tmp.for_each_mut(RunOn::Threads, |i, valid, fab| {
        let f = fine.array(i);
        for n in 0..ncomp {
            for ic in valid.iter() {
                let mut lo = [ic[0] * ratio[0], ic[1] * ratio[1], ic[2] * ratio[2]];
                lo[dir] = ic[dir] * ratio[dir];
                let hi = [lo[0] + tr[0] - 1, lo[1] + tr[1] - 1, lo[2] + tr[2] - 1];
                let total: f64 = IndexSpace::new(lo, hi).iter().map(|iv| f.at(iv, n)).sum();
                fab.set(ic, n, total / area);
            }
        }
    });
    crse.parallel_copy(&tmp, 0, 0, ncomp, [0; 3], [0; 3], cgeom);
}




fn neg(v: IntVect) -> IntVect {
    [-v[0], -v[1], -v[2]]
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::{domain_box, IndexType};

    fn two_box_layout() -> (BoxArray, DistributionMapping, Geometry) {
        let geom = Geometry::new(domain_box([8, 8, 1], 2), [0.0; 3], [1.0; 3], [true, true, false], 2);
        let ba = BoxArray::from_box(geom.domain().clone()).max_size([4, 8, 1]);
        let dm = DistributionMapping::round_robin(&ba, 2);
        (ba, dm, geom)
    }

    #[test]
    fn fill_boundary_copies_neighbors_and_periodic_images() {
        let (ba, dm, geom) = two_box_layout();
        let mut mf = MultiFab::new(&ba, &dm, 1, [1, 1, 0]);

        mf.for_each_mut(RunOn::Serial, |_, valid, fab| {
            for iv in valid.iter() {
                fab.set(iv, 0, (iv[0] * 10 + iv[1]) as f64);
            }
        });
        mf.fill_boundary(&geom);

        // box 0 covers i in 0..4; its high ghost is box 1's first column
        assert_eq!(mf.fab(0).get([4, 3, 0], 0), 43.0);
        // its low ghost wraps to i = 7
        assert_eq!(mf.fab(0).get([-1, 3, 0], 0), 73.0);
        // corner ghost wraps in both directions
        assert_eq!(mf.fab(0).get([-1, -1, 0], 0), 77.0);
    }

    #[test]
    fn parallel_copy_between_different_layouts() {
        let (ba, dm, geom) = two_box_layout();
        let single = BoxArray::from_box(geom.domain().clone());
        let sdm = DistributionMapping::round_robin(&single, 1);
        let mut src = MultiFab::new(&single, &sdm, 1, [0; 3]);
        src.for_each_mut(RunOn::Serial, |_, valid, fab| {
            for iv in valid.iter() {
                fab.set(iv, 0, iv[0] as f64);
            }
        });
        let mut dst = MultiFab::new(&ba, &dm, 1, [1, 1, 0]);
        dst.parallel_copy(&src, 0, 0, 1, [0; 3], [1, 1, 0], &geom);
        assert_eq!(dst.fab(1).get([4, 0, 0], 0), 4.0);
        assert_eq!(dst.fab(1).get([8, 0, 0], 0), 0.0);
    }

    #[test]
    fn reductions_respect_rank_ownership() {
        let (ba, dm, _) = two_box_layout();
        let mut mf = MultiFab::new(&ba, &dm, 1, [0; 3]);
        mf.set_val(1.0);
        assert_eq!(mf.sum(0), 64.0);
        assert_eq!(mf.local_sum(0, Some(0)), 32.0);
        assert_eq!(mf.norm2(0), 8.0);
    }

    #[test]
    fn nodal_owner_mask_counts_each_node_once() {
        let (ba, dm, geom) = two_box_layout();
        let nba = ba.convert(IndexType::nodal(2));
        let mask = IMultiFab::owner_mask(&nba, &dm, &geom);
        let count: i64 = (0..mask.len())
            .map(|i| mask.valid_box(i).iter().map(|iv| mask.fab(i).get(iv, 0) as i64).sum::<i64>())
            .sum();
        // periodic 8x8 domain has 64 distinct nodes
        assert_eq!(count, 64);
    }
}

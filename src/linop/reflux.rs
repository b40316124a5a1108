use crate::box_array::{BoxArray, DistributionMapping};
use crate::geometry::Geometry;
use crate::index_space::{unit, IndexSpace, IndexType, IntVect, Orientation};
use crate::multifab::{MultiFab, RunOn};




/**
 * Accumulates, on the coarse faces of a coarse/fine interface, the
 * difference between the averaged fine fluxes and the coarse flux through
 * the same face. The register has one field per face orientation, holding
 * the plane of coarse faces on that side of each coarsened fine box.
 */
#[derive(Clone, Debug)]
pub struct FluxRegister {
    crse_geom: Geometry,
    covered: BoxArray,
    ratio: IntVect,
    ncomp: usize,
    regs: Vec<MultiFab>,
}




// ============================================================================
impl FluxRegister {

    pub fn new(fine_grids: &BoxArray, fine_dm: &DistributionMapping, ratio: IntVect, crse_geom: &Geometry, ncomp: usize) -> Self {
        let ndim = crse_geom.ndim();
        let covered = fine_grids.coarsen(ratio);
        let regs = Orientation::all(ndim)
            .map(|face| {
                let planes = BoxArray::new(covered.iter().map(|b| face_plane(b, face)).collect());
                MultiFab::new(&planes, fine_dm, ncomp, [0; 3])
            })
            .collect();

        Self {
            crse_geom: crse_geom.clone(),
            covered,
            ratio,
            ncomp,
            regs,
        }
    }

    pub fn set_val(&mut self, value: f64) {
        for reg in &mut self.regs {
            reg.set_val(value)
        }
    }

    pub fn face(&self, face: Orientation) -> &MultiFab {
        &self.regs[face.index(self.crse_geom.ndim())]
    }




    /**
     * Set the register to `scale` times the coarse fluxes, one face-centered
     * field per direction.
     */
    pub fn crse_init(&mut self, crse_flux: &[MultiFab], scale: f64) {
        let ndim = self.crse_geom.ndim();
        let ncomp = self.ncomp;

        for face in Orientation::all(ndim) {
            let reg = &mut self.regs[face.index(ndim)];
            reg.parallel_copy(&crse_flux[face.dir], 0, 0, ncomp, [0; 3], [0; 3], &self.crse_geom);
            reg.mult(scale, 0, ncomp, [0; 3]);
        }
    }

    /**
     * Add `scale` times the area average of the fine fluxes on each coarse
     * face. Fine flux field `d` is face-centered on the fine grids the
     * register was built from.
     */
    pub fn fine_add(&mut self, fine_flux: &[MultiFab], scale: f64) {
        let ndim = self.crse_geom.ndim();
        let ncomp = self.ncomp;
        let r = self.ratio;

        for face in Orientation::all(ndim) {
            let d = face.dir;
            let flux = &fine_flux[d];
            let mut tr = r;
            tr[d] = 1;
            let area = (tr[0] * tr[1] * tr[2]) as f64;

            self.regs[face.index(ndim)].for_each_mut(RunOn::Threads, |i, valid, fab| {
                let f = flux.array(i);
                for n in 0..ncomp {
                    for cf in valid.iter() {
                        let lo = [cf[0] * r[0], cf[1] * r[1], cf[2] * r[2]];
                        let hi = [lo[0] + tr[0] - 1, lo[1] + tr[1] - 1, lo[2] + tr[2] - 1];
                        let total: f64 = IndexSpace::new(lo, hi).iter().map(|iv| f.at(iv, n)).sum();
                        fab.set(cf, n, fab.get(cf, n) + scale * total / area);
                    }
                }
            });
        }
    }




    /**
     * Add `scale * sign * reg / dx` to every coarse cell of `mf` that lies
     * just outside a fine box face, is inside the (periodic) domain, and is
     * not itself covered by fine boxes. `sign` is the outward sign of the
     * fine box face.
     */
    pub fn reflux(&self, mf: &mut MultiFab, scale: f64) {
        let ndim = self.crse_geom.ndim();
        let dx = self.crse_geom.cell_size();

        for face in Orientation::all(ndim) {
            let d = face.dir;
            let e = unit(d);
            let reg = &self.regs[face.index(ndim)];
            let factor = scale * face.sign() as f64 / dx[d];

            for i in 0..reg.len() {
                for cf in reg.valid_box(i).iter() {
                    let outside = if face.is_low() { [cf[0] - e[0], cf[1] - e[1], cf[2] - e[2]] } else { cf };

                    let ic = match wrap_periodic(outside, &self.crse_geom) {
                        Some(ic) if !self.covered.contains(ic) => ic,
                        _ => continue,
                    };
                    let owners: Vec<usize> = (0..mf.len()).filter(|&j| mf.valid_box(j).contains(ic)).collect();

                    for j in owners {
                        let fab = mf.fab_mut(j);
                        for n in 0..self.ncomp {
                            fab.set(ic, n, fab.get(ic, n) + factor * reg.fab(i).get(cf, n));
                        }
                    }
                }
            }
        }
    }
}




fn face_plane(b: &IndexSpace, face: Orientation) -> IndexSpace {
    let d = face.dir;
    let faces = b.convert(IndexType::face(d));
    let (mut lo, mut hi) = (faces.lo(), faces.hi());

    if face.is_low() {
        hi[d] = lo[d];
    } else {
        lo[d] = hi[d];
    }
    IndexSpace::with_type(lo, hi, IndexType::face(d))
}

/**
 * Map a cell index to its periodic image inside the domain, or `None` if it
 * is outside a non-periodic boundary.
 */
fn wrap_periodic(iv: IntVect, geom: &Geometry) -> Option<IntVect> {
    let domain = geom.domain();
    let (lo, hi) = (domain.lo(), domain.hi());
    let mut w = iv;

    for d in 0..geom.ndim() {
        if iv[d] < lo[d] || iv[d] > hi[d] {
            if !geom.is_periodic(d) {
                return None;
            }
            let len = hi[d] - lo[d] + 1;
            w[d] = lo[d] + (iv[d] - lo[d]).rem_euclid(len);
        }
    }
    Some(w)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::{domain_box, Side};

    fn face_fields(ba: &BoxArray, dm: &DistributionMapping, value: [f64; 2]) -> Vec<MultiFab> {
        (0..2)
            .map(|d| {
                let mut mf = MultiFab::new(&ba.convert(IndexType::face(d)), dm, 1, [0; 3]);
                mf.set_val(value[d]);
                mf
            })
            .collect()
    }

    #[test]
    fn flux_mismatch_lands_on_cells_beside_the_fine_patch() {
        let cgeom = Geometry::new(domain_box([8, 8, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let cba = BoxArray::from_box(cgeom.domain().clone());
        let cdm = DistributionMapping::round_robin(&cba, 1);
        let fba = BoxArray::from_box(IndexSpace::new([4, 4, 0], [11, 11, 0]));
        let fdm = DistributionMapping::round_robin(&fba, 1);

        let mut fr = FluxRegister::new(&fba, &fdm, [2, 2, 1], &cgeom, 1);
        fr.crse_init(&face_fields(&cba, &cdm, [1.0, 0.0]), -1.0);
        fr.fine_add(&face_fields(&fba, &fdm, [3.0, 0.0]), 1.0);
        assert_eq!(fr.face(Orientation::new(0, Side::Low)).fab(0).get([2, 3, 0], 0), 2.0);

        let mut res = MultiFab::new(&cba, &cdm, 1, [0; 3]);
        fr.reflux(&mut res, 1.0);
        assert_eq!(res.fab(0).get([1, 3, 0], 0), -16.0);
        assert_eq!(res.fab(0).get([6, 3, 0], 0), 16.0);
        assert_eq!(res.fab(0).get([3, 3, 0], 0), 0.0);
        assert_eq!(res.fab(0).get([3, 1, 0], 0), 0.0);
    }

    #[test]
    fn periodic_images_wrap_and_physical_faces_are_skipped() {
        let geom = Geometry::new(domain_box([8, 8, 1], 2), [0.0; 3], [1.0; 3], [true, false, false], 2);
        assert_eq!(wrap_periodic([-1, 3, 0], &geom), Some([7, 3, 0]));
        assert_eq!(wrap_periodic([3, -1, 0], &geom), None);
    }
}

use crate::box_array::{BoxArray, DistributionMapping};
use crate::error::Error;
use crate::fab::Array4;
use crate::geometry::Geometry;
use crate::index_space::{coarsen_iv, IntVect, Orientation};
use crate::multifab::MultiFab;
use super::{BndryData, NOT_COVERED};




/**
 * Boundary data of a fine level, filled either from physical boundary
 * values or by interpolation from a coarser level at coarse/fine faces.
 */
#[derive(Clone, Debug)]
pub struct InterpBndryData {
    data: BndryData,
}




// ============================================================================
impl InterpBndryData {

    pub fn new(grids: &BoxArray, dm: &DistributionMapping, ncomp: usize, geom: &Geometry) -> Self {
        Self { data: BndryData::new(grids, dm, ncomp, geom) }
    }

    pub fn data(&self) -> &BndryData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BndryData {
        &mut self.data
    }




    /**
     * For every box face on a non-periodic physical boundary, copy the
     * values in the first ghost layer of `mf` into the register.
     */
    pub fn set_phys_bndry_values(&mut self, mf: &MultiFab, mf_start: usize, bnd_start: usize, ncomp: usize) -> Result<(), Error> {
        if mf.box_array() != self.data.grids() {
            return Err(Error::LayoutMismatch("set_phys_bndry_values requires the grids of the boundary data"));
        }
        let ndim = self.data.geom().ndim();

        for face in Orientation::all(ndim) {
            for i in 0..mf.len() {
                if !self.data.on_physical_boundary(i, face) {
                    continue;
                }
                let region = mf.valid_box(i).adj_cell(face, 1);
                let reg = self.data.register_mut().face_mut(face);
                reg.fab_mut(i).copy_from(mf.fab(i), &region, [0; 3], mf_start, bnd_start, ncomp);
            }
        }
        Ok(())
    }




    /**
     * Set physical boundary values from `fine`, then interpolate the values
     * at all other faces from the coarse level `crse` (any box array
     * covering the coarsened fine boundary). `max_order` selects piecewise
     * constant (1) or quadratic (3) interpolation along the face.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn set_bndry_values(
        &mut self,
        crse: &MultiFab,
        c_start: usize,
        fine: &MultiFab,
        f_start: usize,
        bnd_start: usize,
        ncomp: usize,
        ratio: IntVect,
        max_order: usize,
    ) -> Result<(), Error> {
        validate_order(max_order)?;
        self.set_phys_bndry_values(fine, f_start, bnd_start, ncomp)?;
        self.interp_from_coarse(crse, c_start, bnd_start, ncomp, ratio, max_order)
    }

    /**
     * Re-interpolate the coarse/fine faces after the coarse data changed,
     * leaving the physical faces alone.
     */
    pub fn update_bndry_values(&mut self, crse: &MultiFab, c_start: usize, bnd_start: usize, ncomp: usize, ratio: IntVect, max_order: usize) -> Result<(), Error> {
        validate_order(max_order)?;
        self.interp_from_coarse(crse, c_start, bnd_start, ncomp, ratio, max_order)
    }

    /**
     * Zero every boundary value, for homogeneous correction solves.
     */
    pub fn set_homog_values(&mut self) {
        self.data.register_mut().set_val(0.0)
    }




    fn interp_from_coarse(&mut self, crse: &MultiFab, c_start: usize, bnd_start: usize, ncomp: usize, ratio: IntVect, max_order: usize) -> Result<(), Error> {
        let geom = self.data.geom().clone();
        let ndim = geom.ndim();
        let cgeom = geom.coarsen(ratio);

        for face in Orientation::all(ndim) {
            let reg_ba = self.data.bndry_values(face).box_array().clone();
            let reg_dm = self.data.bndry_values(face).distribution_map().clone();

            // coarse data under each face layer, with one tangential neighbor on each side
            let cba = BoxArray::new(
                reg_ba
                    .iter()
                    .map(|b| {
                        let mut c = b.coarsen(ratio);
                        for t in (0..ndim).filter(|&t| t != face.dir) {
                            c = c.grow_dir(t, 1);
                        }
                        c
                    })
                    .collect(),
            );
            let mut cdata = MultiFab::new(&cba, &reg_dm, ncomp, [0; 3]);
            cdata.parallel_copy(crse, c_start, 0, ncomp, [0; 3], [0; 3], &cgeom);

            let masks = self.data.bndry_masks(face).clone();
            let on_phys: Vec<bool> = (0..reg_ba.len()).map(|i| self.data.on_physical_boundary(i, face)).collect();
            let reg = self.data.register_mut().face_mut(face);

            for i in 0..reg.len() {
                if on_phys[i] {
                    continue;
                }
                let region = reg.valid_box(i).clone();
                let c = cdata.array(i);
                let m = masks.array(i);
                let fab = reg.fab_mut(i);

                for n in 0..ncomp {
                    for iv in region.iter() {
                        let value = if max_order == 1 {
                            c.at(coarsen_iv(iv, ratio), n)
                        } else {
                            interp_o3(&c, &m, iv, n, ratio, face.dir, ndim)
                        };
                        fab.set(iv, bnd_start + n, value);
                    }
                }
            }
        }
        Ok(())
    }
}




fn validate_order(max_order: usize) -> Result<(), Error> {
    match max_order {
        1 | 3 => Ok(()),
        _ => Err(Error::InvalidMaxOrder(max_order)),
    }
}




/**
 * Quadratic interpolation along the face of the coarse value under fine
 * ghost cell `iv`. Each tangential direction uses a centered parabola if
 * the fine cells just beyond both coarse neighbors are not covered, a
 * one-sided line if only one is, and nothing if neither is. In 3D the mixed
 * term is added when all four diagonal neighbors are not covered.
 */
fn interp_o3(c: &Array4<f64>, m: &Array4<i32>, iv: IntVect, n: usize, ratio: IntVect, dir: usize, ndim: usize) -> f64 {
    let ic = coarsen_iv(iv, ratio);
    let tangential: Vec<usize> = (0..ndim).filter(|&t| t != dir).collect();
    let mut value = c.at(ic, n);
    let mut offsets = [0.0; 3];

    for &t in &tangential {
        let jc = ic[t];
        let r = ratio[t];
        let y = ((iv[t] - jc * r) as f64 + 0.5) / r as f64 - 0.5;

        let mut lo = iv;
        let mut hi = iv;
        lo[t] = jc * r - 1;
        hi[t] = (jc + 1) * r;
        let lo_ok = m.at(lo, 0) == NOT_COVERED;
        let hi_ok = m.at(hi, 0) == NOT_COVERED;

        let mut cm = ic;
        let mut cp = ic;
        cm[t] -= 1;
        cp[t] += 1;
        let (um, u0, up) = (c.at(cm, n), c.at(ic, n), c.at(cp, n));

        let (dy, dy2) = match (lo_ok, hi_ok) {
            (true, true) => (0.5 * (up - um), up - 2.0 * u0 + um),
            (false, true) => (up - u0, 0.0),
            (true, false) => (u0 - um, 0.0),
            (false, false) => (0.0, 0.0),
        };
        value += y * dy + 0.5 * y * y * dy2;
        offsets[t] = y;
    }

    if let [t1, t2] = tangential.as_slice() {
        let (t1, t2) = (*t1, *t2);
        let corner = |s1: i64, s2: i64| {
            let mut fv = iv;
            fv[t1] = if s1 < 0 { ic[t1] * ratio[t1] - 1 } else { (ic[t1] + 1) * ratio[t1] };
            fv[t2] = if s2 < 0 { ic[t2] * ratio[t2] - 1 } else { (ic[t2] + 1) * ratio[t2] };
            m.at(fv, 0) == NOT_COVERED
        };
        if corner(-1, -1) && corner(-1, 1) && corner(1, -1) && corner(1, 1) {
            let at = |s1: i64, s2: i64| {
                let mut cv = ic;
                cv[t1] += s1;
                cv[t2] += s2;
                c.at(cv, n)
            };
            let dyz = 0.25 * (at(1, 1) - at(1, -1) - at(-1, 1) + at(-1, -1));
            value += offsets[t1] * offsets[t2] * dyz;
        }
    }
    value
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::{domain_box, IndexSpace, Side};
    use crate::multifab::RunOn;

    fn setup() -> (Geometry, BoxArray, DistributionMapping, MultiFab, MultiFab) {
        let cgeom = Geometry::new(domain_box([16, 16, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let cba = BoxArray::from_box(cgeom.domain().clone());
        let cdm = DistributionMapping::round_robin(&cba, 1);
        let fba = BoxArray::from_box(IndexSpace::new([8, 8, 0], [23, 23, 0]));
        let fdm = DistributionMapping::round_robin(&fba, 1);

        let mut crse = MultiFab::new(&cba, &cdm, 1, [1, 1, 0]);
        crse.for_each_mut(RunOn::Serial, |_, valid, fab| {
            for iv in valid.iter() {
                let y = iv[1] as f64 + 0.5;
                fab.set(iv, 0, y * y + iv[0] as f64);
            }
        });
        let fine = MultiFab::new(&fba, &fdm, 1, [1, 1, 0]);
        (cgeom, fba, fdm, crse, fine)
    }

    #[test]
    fn quadratic_interpolation_is_exact_for_quadratics_along_the_face() {
        let (cgeom, fba, fdm, crse, fine) = setup();
        let fgeom = cgeom.refine([2, 2, 1]);
        let mut ibd = InterpBndryData::new(&fba, &fdm, 1, &fgeom);
        ibd.set_bndry_values(&crse, 0, &fine, 0, 0, 1, [2, 2, 1], 3).unwrap();

        // low-x face: ghost cells at i = 7, coarse cell i = 3
        let reg = ibd.data().bndry_values(Orientation::new(0, Side::Low));
        for j in 8..24 {
            let y = (j as f64 + 0.5) / 2.0;
            assert!((reg.fab(0).get([7, j, 0], 0) - (y * y + 3.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn piecewise_constant_order_copies_coarse_values() {
        let (cgeom, fba, fdm, crse, fine) = setup();
        let fgeom = cgeom.refine([2, 2, 1]);
        let mut ibd = InterpBndryData::new(&fba, &fdm, 1, &fgeom);
        ibd.set_bndry_values(&crse, 0, &fine, 0, 0, 1, [2, 2, 1], 1).unwrap();
        let reg = ibd.data().bndry_values(Orientation::new(1, Side::High));
        assert_eq!(reg.fab(0).get([9, 24, 0], 0), 12.5 * 12.5 + 4.0);
    }

    #[test]
    fn unsupported_order_is_an_error() {
        let (cgeom, fba, fdm, crse, fine) = setup();
        let fgeom = cgeom.refine([2, 2, 1]);
        let mut ibd = InterpBndryData::new(&fba, &fdm, 1, &fgeom);
        let result = ibd.set_bndry_values(&crse, 0, &fine, 0, 0, 1, [2, 2, 1], 2);
        assert_eq!(result, Err(Error::InvalidMaxOrder(2)));
    }

    #[test]
    fn homogeneous_values_are_zero() {
        let (cgeom, fba, fdm, crse, fine) = setup();
        let fgeom = cgeom.refine([2, 2, 1]);
        let mut ibd = InterpBndryData::new(&fba, &fdm, 1, &fgeom);
        ibd.set_bndry_values(&crse, 0, &fine, 0, 0, 1, [2, 2, 1], 3).unwrap();
        ibd.set_homog_values();
        for face in Orientation::all(2) {
            assert_eq!(ibd.data().bndry_values(face).norm0(0), 0.0);
        }
    }
}

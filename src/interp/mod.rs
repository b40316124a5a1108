//! Coarse-to-fine spatial interpolation. Each scheme is a variant of the
//! closed `Interpolater` enum; callers construct the one they need and pass
//! it by reference to whatever fills fine data from coarse data.

pub mod cell;
pub mod face;
pub mod node;
pub mod protect;

use serde::{Deserialize, Serialize};
use crate::bc::{BcRec, BcType};
use crate::error::Error;
use crate::fab::Fab;
use crate::geometry::Geometry;
use crate::index_space::{IndexSpace, IntVect};
use crate::multifab::{MultiFab, RunOn};




/**
 * The interpolation schemes
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interpolater {
    /// Piecewise constant; works for any centering.
    PcInterp,
    /// Multilinear interpolation of cell-centered data.
    CellBilinear,
    /// Multilinear interpolation of node-centered data.
    NodeBilinear,
    /// Conservative linear reconstruction, optionally with MC-limited
    /// slopes.
    CellConservativeLinear { limited: bool },
    /// Limited conservative linear, plus the `protect` pass.
    CellConservativeProtected,
    /// Fourth-order conservative, refinement ratio 2 only.
    CellConservativeQuartic,
    /// Face data: piecewise constant tangentially, linear in the normal
    /// direction.
    FaceLinear,
    /// Face data: conservative linear tangentially, linear normally.
    FaceConservativeLinear,
    /// Face data for all directions at once, preserving the divergence.
    FaceDivFree,
}




// ============================================================================
impl Interpolater {

    pub fn pc_interp() -> Self {
        Interpolater::PcInterp
    }

    pub fn cell_cons_interp() -> Self {
        Interpolater::CellConservativeLinear { limited: true }
    }

    pub fn lincc_interp() -> Self {
        Interpolater::CellBilinear
    }

    pub fn node_bilinear_interp() -> Self {
        Interpolater::NodeBilinear
    }

    pub fn protected_interp() -> Self {
        Interpolater::CellConservativeProtected
    }

    pub fn quartic_interp() -> Self {
        Interpolater::CellConservativeQuartic
    }

    pub fn face_linear_interp() -> Self {
        Interpolater::FaceLinear
    }

    pub fn face_cons_linear_interp() -> Self {
        Interpolater::FaceConservativeLinear
    }

    pub fn face_divfree_interp() -> Self {
        Interpolater::FaceDivFree
    }




    /**
     * Return the coarse region needed to interpolate onto `fine`. The box
     * has the index type of `fine`.
     */
    pub fn coarse_box(&self, fine: &IndexSpace, ratio: IntVect) -> IndexSpace {
        let active = |n: i64| -> IntVect {
            let mut g = [0; 3];
            for d in 0..3 {
                if ratio[d] > 1 {
                    g[d] = n;
                }
            }
            g
        };
        let tangential = |n: i64| -> IntVect {
            let mut g = active(n);
            for d in 0..3 {
                if fine.index_type().is_node(d) {
                    g[d] = 0;
                }
            }
            g
        };
        let crse = fine.coarsen(ratio);

        match self {
            Interpolater::PcInterp => crse,
            Interpolater::NodeBilinear => crse,
            Interpolater::FaceLinear => crse,
            Interpolater::CellBilinear
            | Interpolater::CellConservativeLinear { .. }
            | Interpolater::CellConservativeProtected => crse.grow(active(1)),
            Interpolater::CellConservativeQuartic => crse.grow(active(2)),
            Interpolater::FaceConservativeLinear | Interpolater::FaceDivFree => crse.grow(tangential(1)),
        }
    }




    /**
     * Fill `fine[fine_region]` (components `fine_comp ..`) from `crse`
     * (components `crse_comp ..`). The coarse fab must cover
     * `coarse_box(fine_region, ratio)`. `bcr` holds one boundary record per
     * component; near physical boundaries with Dirichlet-like conditions
     * the conservative schemes use one-sided slopes.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn interp(
        &self,
        crse: &Fab<f64>,
        crse_comp: usize,
        fine: &mut Fab<f64>,
        fine_comp: usize,
        ncomp: usize,
        fine_region: &IndexSpace,
        ratio: IntVect,
        crse_geom: &Geometry,
        fine_geom: &Geometry,
        bcr: &[BcRec],
    ) -> Result<(), Error> {
        let ndim = fine_geom.ndim();

        match self {
            Interpolater::PcInterp => {
                cell::pc_interp(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio);
                Ok(())
            }
            Interpolater::CellBilinear => {
                cell::bilinear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, ndim);
                Ok(())
            }
            Interpolater::NodeBilinear => {
                node::bilinear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, ndim);
                Ok(())
            }
            Interpolater::CellConservativeLinear { limited } => {
                cell::cons_linear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, crse_geom, bcr, *limited);
                Ok(())
            }
            Interpolater::CellConservativeProtected => {
                cell::cons_linear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, crse_geom, bcr, true);
                Ok(())
            }
            Interpolater::CellConservativeQuartic => {
                cell::quartic(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, ndim)
            }
            Interpolater::FaceLinear
            | Interpolater::FaceConservativeLinear
            | Interpolater::FaceDivFree => {
                self.interp_face(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, crse_geom, bcr)
            }
        }
    }




    /**
     * Interpolate face-centered data normal to one direction (the direction
     * is taken from the fine fab's index type).
     */
    #[allow(clippy::too_many_arguments)]
    pub fn interp_face(
        &self,
        crse: &Fab<f64>,
        crse_comp: usize,
        fine: &mut Fab<f64>,
        fine_comp: usize,
        ncomp: usize,
        fine_region: &IndexSpace,
        ratio: IntVect,
        crse_geom: &Geometry,
        bcr: &[BcRec],
    ) -> Result<(), Error> {
        let dir = face::face_dir(fine.index_space())?;
        let ndim = crse_geom.ndim();

        match self {
            Interpolater::FaceLinear => {
                face::face_linear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, dir);
                Ok(())
            }
            Interpolater::FaceConservativeLinear => {
                face::face_cons_linear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, dir, ndim, crse_geom, bcr, true);
                Ok(())
            }
            Interpolater::FaceDivFree => {
                face::face_cons_linear(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, dir, ndim, crse_geom, bcr, false);
                Ok(())
            }
            _ => Err(Error::Unsupported("interp_face")),
        }
    }




    /**
     * Interpolate face data in all active directions at once. `crse` and
     * `fine` hold one fab per direction; `fine_region` is the cell-centered
     * fine region whose faces are filled.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn interp_arr(
        &self,
        crse: &[&Fab<f64>],
        crse_comp: usize,
        fine: &mut [&mut Fab<f64>],
        fine_comp: usize,
        ncomp: usize,
        fine_region: &IndexSpace,
        ratio: IntVect,
        crse_geom: &Geometry,
        fine_geom: &Geometry,
        bcr: &[BcRec],
    ) -> Result<(), Error> {
        match self {
            Interpolater::FaceDivFree => {
                face::divfree_interp_arr(crse, crse_comp, fine, fine_comp, ncomp, fine_region, ratio, crse_geom, fine_geom, bcr)
            }
            _ => Err(Error::Unsupported("interp_arr")),
        }
    }




    /**
     * Rebalance interpolated corrections `fine` so that `fine_state + fine`
     * is non-negative wherever the coarse correction permits it. Component
     * zero is reset to the sum of the others.
     */
    #[allow(clippy::too_many_arguments)]
    pub fn protect(
        &self,
        _crse: &Fab<f64>,
        _crse_comp: usize,
        fine: &mut Fab<f64>,
        fine_comp: usize,
        fine_state: &Fab<f64>,
        state_comp: usize,
        ncomp: usize,
        fine_region: &IndexSpace,
        ratio: IntVect,
    ) -> Result<(), Error> {
        match self {
            Interpolater::CellConservativeProtected => {
                protect::protect(fine, fine_comp, fine_state, state_comp, ncomp, fine_region, ratio);
                Ok(())
            }
            _ => Err(Error::Unsupported("protect")),
        }
    }
}




/**
 * The boundary record for component `n`, defaulting to interior conditions
 * when `bcr` is short.
 */
pub(crate) fn bc_of(bcr: &[BcRec], n: usize) -> BcRec {
    bcr.get(n).or_else(|| bcr.last()).copied().unwrap_or_else(|| BcRec::uniform(BcType::IntDir))
}




/**
 * Interpolate every box of `crse` onto the valid region of the matching box
 * of `fine`. The two arrays must have the same number of boxes, with coarse
 * box `i` covering `coarse_box` of fine box `i`.
 */
#[allow(clippy::too_many_arguments)]
pub fn interp_mf(
    interp: &Interpolater,
    crse: &MultiFab,
    crse_comp: usize,
    fine: &mut MultiFab,
    fine_comp: usize,
    ncomp: usize,
    ratio: IntVect,
    crse_geom: &Geometry,
    fine_geom: &Geometry,
    bcr: &[BcRec],
    run_on: RunOn,
) -> Result<(), Error> {
    if crse.len() != fine.len() {
        return Err(Error::LayoutMismatch("interp_mf requires matching coarse and fine box counts"));
    }
    let results = std::sync::Mutex::new(Vec::new());

    fine.for_each_mut(run_on, |i, valid, fab| {
        let r = interp.interp(crse.fab(i), crse_comp, fab, fine_comp, ncomp, valid, ratio, crse_geom, fine_geom, bcr);
        if let Err(e) = r {
            if let Ok(mut results) = results.lock() {
                results.push(e)
            }
        }
    });
    match results.into_inner().ok().and_then(|mut e| e.pop()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::domain_box;

    #[test]
    fn coarse_boxes_have_the_needed_halo() {
        let fine = IndexSpace::new([8, 8, 0], [15, 15, 0]);
        let r = [2, 2, 1];
        assert_eq!(Interpolater::PcInterp.coarse_box(&fine, r), IndexSpace::new([4, 4, 0], [7, 7, 0]));
        assert_eq!(Interpolater::cell_cons_interp().coarse_box(&fine, r), IndexSpace::new([3, 3, 0], [8, 8, 0]));
        assert_eq!(Interpolater::quartic_interp().coarse_box(&fine, r), IndexSpace::new([2, 2, 0], [9, 9, 0]));
    }

    #[test]
    fn unsupported_operations_are_errors() {
        let geom = Geometry::new(domain_box([4, 4, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let mut fine = Fab::<f64>::new(IndexSpace::new([0, 0, 0], [7, 7, 0]), 1);
        let state = fine.clone();
        let crse = Fab::<f64>::new(IndexSpace::new([0, 0, 0], [3, 3, 0]), 1);
        let region = fine.index_space().clone();

        let e = Interpolater::PcInterp.protect(&crse, 0, &mut fine, 0, &state, 0, 1, &region, [2, 2, 1]);
        assert_eq!(e, Err(Error::Unsupported("protect")));

        let e = Interpolater::CellBilinear.interp_arr(&[&crse], 0, &mut [&mut fine], 0, 1, &region, [2, 2, 1], &geom, &geom, &[]);
        assert_eq!(e, Err(Error::Unsupported("interp_arr")));
        assert_eq!(e.unwrap_err().to_string(), "interp_arr is not supported");
    }
}

//! Per-face boundary data for the boxes of one level: registers holding
//! values on the layer of cells just outside each box face, masks telling
//! which of those cells are covered by other boxes, and the boundary
//! condition type and location at each face.

pub mod interp_bndry;

use crate::bc::LinOpBcType;
use crate::box_array::{BoxArray, DistributionMapping};
use crate::geometry::Geometry;
use crate::index_space::{IndexSpace, Orientation};
use crate::multifab::{IMultiFab, MultiFab};

pub use interp_bndry::InterpBndryData;




/// The cell outside the box is in the domain but not covered by any box of
/// the level: a coarse/fine boundary.
pub const NOT_COVERED: i32 = 0;

/// The cell is covered by a box of the same level.
pub const COVERED: i32 = 1;

/// The cell is outside the (periodically extended) problem domain.
pub const OUTSIDE_DOMAIN: i32 = 2;




/**
 * A boundary register: one field per face orientation, defined on the
 * layer of cells just outside that face of each box.
 */
#[derive(Clone, Debug)]
pub struct BndryRegister {
    grids: BoxArray,
    ndim: usize,
    bndry: Vec<MultiFab>,
}




// ============================================================================
impl BndryRegister {

    pub fn new(grids: &BoxArray, dm: &DistributionMapping, ncomp: usize, ndim: usize) -> Self {
        let bndry = Orientation::all(ndim)
            .map(|face| {
                let ba = BoxArray::new(grids.iter().map(|b| b.adj_cell(face, 1)).collect());
                MultiFab::new(&ba, dm, ncomp, [0; 3])
            })
            .collect();
        Self { grids: grids.clone(), ndim, bndry }
    }

    pub fn grids(&self) -> &BoxArray {
        &self.grids
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn face(&self, face: Orientation) -> &MultiFab {
        &self.bndry[face.index(self.ndim)]
    }

    pub fn face_mut(&mut self, face: Orientation) -> &mut MultiFab {
        &mut self.bndry[face.index(self.ndim)]
    }

    pub fn set_val(&mut self, value: f64) {
        for mf in &mut self.bndry {
            mf.set_val(value)
        }
    }

    /**
     * Fill every face register from the valid data of `src` (which may
     * live on any box array), with periodic images.
     */
    pub fn copy_from(&mut self, src: &MultiFab, scomp: usize, dcomp: usize, ncomp: usize, geom: &Geometry) {
        for mf in &mut self.bndry {
            mf.parallel_copy(src, scomp, dcomp, ncomp, [0; 3], [0; 3], geom)
        }
    }
}




/**
 * Build one integer mask per face orientation, each defined on the layer
 * just outside the face grown tangentially by one cell, classifying cells as
 * `NOT_COVERED`, `COVERED` or `OUTSIDE_DOMAIN`.
 */
pub fn build_face_masks(grids: &BoxArray, dm: &DistributionMapping, geom: &Geometry) -> Vec<IMultiFab> {
    let ndim = geom.ndim();
    let shifts = geom.periodic_shifts();
    let domain = geom.grow_periodic_domain([i64::MAX / 4; 3]);

    Orientation::all(ndim)
        .map(|face| {
            let ba = BoxArray::new(grids.iter().map(|b| mask_box(b, face, ndim)).collect());
            let mut mask = IMultiFab::new(&ba, dm, 1, [0; 3]);

            for i in 0..mask.len() {
                let region = mask.valid_box(i).clone();
                let fab = mask.fab_mut(i);

                for iv in region.iter() {
                    let value = if !domain.contains(iv) {
                        OUTSIDE_DOMAIN
                    } else if shifts.iter().any(|&s| grids.iter().any(|b| b.shift(s).contains(iv))) {
                        COVERED
                    } else {
                        NOT_COVERED
                    };
                    fab.set(iv, 0, value);
                }
            }
            mask
        })
        .collect()
}

fn mask_box(b: &IndexSpace, face: Orientation, ndim: usize) -> IndexSpace {
    let mut bx = b.adj_cell(face, 1);
    for t in (0..ndim).filter(|&t| t != face.dir) {
        bx = bx.grow_dir(t, 1);
    }
    bx
}




/**
 * Boundary values, masks, and boundary conditions of one level. For every
 * box and face this records the boundary condition type of each component
 * and the distance `bcloc` from the box face to the point where the
 * boundary value applies.
 */
#[derive(Clone, Debug)]
pub struct BndryData {
    register: BndryRegister,
    masks: Vec<IMultiFab>,
    bcloc: Vec<Vec<f64>>,
    bcond: Vec<Vec<Vec<LinOpBcType>>>,
    geom: Geometry,
    ncomp: usize,
}




// ============================================================================
impl BndryData {

    pub fn new(grids: &BoxArray, dm: &DistributionMapping, ncomp: usize, geom: &Geometry) -> Self {
        let ndim = geom.ndim();
        let nface = 2 * ndim;

        Self {
            register: BndryRegister::new(grids, dm, ncomp, ndim),
            masks: build_face_masks(grids, dm, geom),
            bcloc: vec![vec![0.0; nface]; grids.len()],
            bcond: vec![vec![vec![LinOpBcType::Dirichlet; ncomp]; nface]; grids.len()],
            geom: geom.clone(),
            ncomp,
        }
    }

    pub fn geom(&self) -> &Geometry {
        &self.geom
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn grids(&self) -> &BoxArray {
        self.register.grids()
    }

    pub fn register(&self) -> &BndryRegister {
        &self.register
    }

    pub fn register_mut(&mut self) -> &mut BndryRegister {
        &mut self.register
    }

    pub fn bndry_values(&self, face: Orientation) -> &MultiFab {
        self.register.face(face)
    }

    pub fn bndry_masks(&self, face: Orientation) -> &IMultiFab {
        &self.masks[face.index(self.geom.ndim())]
    }

    pub fn bndry_loc(&self, gridno: usize, face: Orientation) -> f64 {
        self.bcloc[gridno][face.index(self.geom.ndim())]
    }

    pub fn bndry_cond(&self, gridno: usize, face: Orientation, comp: usize) -> LinOpBcType {
        self.bcond[gridno][face.index(self.geom.ndim())][comp]
    }

    /**
     * Whether the given face of box `gridno` lies on a non-periodic
     * boundary of the problem domain.
     */
    pub fn on_physical_boundary(&self, gridno: usize, face: Orientation) -> bool {
        let b = self.grids().get(gridno);
        let d = face.dir;

        if self.geom.is_periodic(d) {
            return false;
        }
        if face.is_low() {
            b.lo()[d] == self.geom.domain().lo()[d]
        } else {
            b.hi()[d] == self.geom.domain().hi()[d]
        }
    }

    /**
     * Record the boundary condition of every box face. Faces on the
     * physical boundary take the domain condition of each component and
     * the corresponding domain boundary location; all other faces are
     * Dirichlet at the center of the adjacent coarse cell, a distance
     * `ratio * dx / 2` from the face.
     */
    pub fn set_bndry_conds(&mut self, lobc: &[[LinOpBcType; 3]], hibc: &[[LinOpBcType; 3]], ratio: i64, domain_bc_loc: ([f64; 3], [f64; 3])) {
        let ndim = self.geom.ndim();
        let dx = self.geom.cell_size();

        for gridno in 0..self.grids().len() {
            for face in Orientation::all(ndim) {
                let f = face.index(ndim);
                let d = face.dir;

                if self.on_physical_boundary(gridno, face) {
                    self.bcloc[gridno][f] = if face.is_low() { domain_bc_loc.0[d] } else { domain_bc_loc.1[d] };
                    for n in 0..self.ncomp {
                        let bcs = if face.is_low() { lobc } else { hibc };
                        self.bcond[gridno][f][n] = bcs[n.min(bcs.len() - 1)][d];
                    }
                } else {
                    self.bcloc[gridno][f] = 0.5 * ratio as f64 * dx[d];
                    for n in 0..self.ncomp {
                        self.bcond[gridno][f][n] = LinOpBcType::Dirichlet;
                    }
                }
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::{domain_box, Side};

    #[test]
    fn masks_classify_neighbors() {
        let geom = Geometry::new(domain_box([16, 16, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let ba = BoxArray::new(vec![
            IndexSpace::new([0, 0, 0], [7, 7, 0]),
            IndexSpace::new([8, 0, 0], [15, 7, 0]),
        ]);
        let dm = DistributionMapping::round_robin(&ba, 1);
        let masks = build_face_masks(&ba, &dm, &geom);
        let hi_x = &masks[Orientation::new(0, Side::High).index(2)];
        let hi_y = &masks[Orientation::new(1, Side::High).index(2)];
        let lo_x = &masks[Orientation::new(0, Side::Low).index(2)];

        assert_eq!(hi_x.fab(0).get([8, 3, 0], 0), COVERED);
        assert_eq!(hi_y.fab(0).get([3, 8, 0], 0), NOT_COVERED);
        assert_eq!(lo_x.fab(0).get([-1, 3, 0], 0), OUTSIDE_DOMAIN);
    }

    #[test]
    fn coarse_fine_faces_are_dirichlet_at_coarse_cell_centers() {
        let geom = Geometry::new(domain_box([16, 16, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
        let ba = BoxArray::from_box(IndexSpace::new([4, 0, 0], [11, 7, 0]));
        let dm = DistributionMapping::round_robin(&ba, 1);
        let mut bd = BndryData::new(&ba, &dm, 1, &geom);
        bd.set_bndry_conds(&[[LinOpBcType::Neumann; 3]], &[[LinOpBcType::Neumann; 3]], 2, ([0.0; 3], [0.0; 3]));

        let lo_y = Orientation::new(1, Side::Low);
        let hi_y = Orientation::new(1, Side::High);
        assert_eq!(bd.bndry_cond(0, lo_y, 0), LinOpBcType::Neumann);
        assert_eq!(bd.bndry_cond(0, hi_y, 0), LinOpBcType::Dirichlet);
        assert_eq!(bd.bndry_loc(0, hi_y), 1.0 / 16.0);
    }
}

use serde::{Deserialize, Serialize};
use crate::index_space::{IndexSpace, IntVect};




/**
 * Coordinate system of the physical domain
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordSys {
    Cartesian,
    /// Axisymmetric; the first axis is the radius.
    RZ,
}




/**
 * The physical description of one grid level: the cell-centered index space
 * of the problem domain, its physical extent, periodicity, and the number of
 * active spatial dimensions (1, 2 or 3). Axes beyond `ndim` have a single
 * cell and never carry ghost zones.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    domain: IndexSpace,
    prob_lo: [f64; 3],
    prob_hi: [f64; 3],
    periodic: [bool; 3],
    ndim: usize,
    coord: CoordSys,
}




// ============================================================================
impl Geometry {

    pub fn new(domain: IndexSpace, prob_lo: [f64; 3], prob_hi: [f64; 3], periodic: [bool; 3], ndim: usize) -> Self {
        assert!((1..=3).contains(&ndim), "ndim must be 1, 2 or 3");
        assert!(domain.index_type().is_cell_centered(), "the domain must be cell-centered");
        Self { domain, prob_lo, prob_hi, periodic, ndim, coord: CoordSys::Cartesian }
    }

    pub fn with_coord(mut self, coord: CoordSys) -> Self {
        self.coord = coord;
        self
    }

    pub fn domain(&self) -> &IndexSpace {
        &self.domain
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn coord(&self) -> CoordSys {
        self.coord
    }

    pub fn prob_lo(&self) -> [f64; 3] {
        self.prob_lo
    }

    pub fn prob_hi(&self) -> [f64; 3] {
        self.prob_hi
    }

    pub fn is_periodic(&self, dir: usize) -> bool {
        dir < self.ndim && self.periodic[dir]
    }

    pub fn is_any_periodic(&self) -> bool {
        (0..self.ndim).any(|d| self.periodic[d])
    }

    pub fn is_all_periodic(&self) -> bool {
        (0..self.ndim).all(|d| self.periodic[d])
    }

    pub fn cell_size(&self) -> [f64; 3] {
        let n = self.domain.len();
        let mut dx = [1.0; 3];
        for d in 0..3 {
            dx[d] = (self.prob_hi[d] - self.prob_lo[d]) / n[d] as f64;
        }
        dx
    }

    pub fn inv_cell_size(&self) -> [f64; 3] {
        let dx = self.cell_size();
        [1.0 / dx[0], 1.0 / dx[1], 1.0 / dx[2]]
    }

    pub fn cell_center(&self, index: IntVect) -> [f64; 3] {
        let dx = self.cell_size();
        let mut x = [0.0; 3];
        for d in 0..3 {
            x[d] = self.prob_lo[d] + dx[d] * (index[d] as f64 + 0.5);
        }
        x
    }

    pub fn node_position(&self, index: IntVect) -> [f64; 3] {
        let dx = self.cell_size();
        let mut x = [0.0; 3];
        for d in 0..3 {
            x[d] = self.prob_lo[d] + dx[d] * index[d] as f64;
        }
        x
    }

    /**
     * Return the list of periodic image shifts (including the zero shift)
     * relevant for data of the given index type.
     */
    pub fn periodic_shifts(&self) -> Vec<IntVect> {
        let len = self.domain.len();
        let mut shifts = vec![[0; 3]];

        for d in 0..self.ndim {
            if self.periodic[d] {
                let l = len[d] as i64;
                shifts = shifts
                    .into_iter()
                    .flat_map(|s| {
                        let mut m = s;
                        let mut p = s;
                        m[d] -= l;
                        p[d] += l;
                        vec![s, m, p]
                    })
                    .collect();
            }
        }
        shifts
    }

    /**
     * Return the domain grown by `n` along the periodic directions, so that
     * periodic ghost zones count as being inside it.
     */
    pub fn grow_periodic_domain(&self, n: IntVect) -> IndexSpace {
        let mut g = [0; 3];
        for d in 0..self.ndim {
            if self.periodic[d] {
                g[d] = n[d];
            }
        }
        self.domain.grow(g)
    }

    pub fn coarsen(&self, ratio: IntVect) -> Self {
        Self { domain: self.domain.coarsen(ratio), ..self.clone() }
    }

    pub fn refine(&self, ratio: IntVect) -> Self {
        Self { domain: self.domain.refine(ratio), ..self.clone() }
    }

    /**
     * Isotropic refinement ratio restricted to the active dimensions.
     */
    pub fn ratio(&self, r: i64) -> IntVect {
        let mut v = [1; 3];
        for x in v.iter_mut().take(self.ndim) {
            *x = r;
        }
        v
    }

    /**
     * Ghost vector of width `n` restricted to the active dimensions.
     */
    pub fn ghost(&self, n: i64) -> IntVect {
        crate::index_space::splat(n, self.ndim)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Geometry;
    use crate::index_space::domain_box;

    #[test]
    fn periodic_shifts_enumerate_images() {
        let g = Geometry::new(domain_box([8, 8, 1], 2), [0.0; 3], [1.0; 3], [true, true, false], 2);
        assert_eq!(g.periodic_shifts().len(), 9);
        assert!(g.periodic_shifts().contains(&[-8, 8, 0]));
    }

    #[test]
    fn cell_centers_are_offset_by_half() {
        let g = Geometry::new(domain_box([4, 1, 1], 1), [0.0; 3], [1.0; 3], [false; 3], 1);
        assert_eq!(g.cell_center([0, 0, 0])[0], 0.125);
        assert_eq!(g.cell_size()[0], 0.25);
    }
}

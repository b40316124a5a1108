use serde::{Deserialize, Serialize};
use crate::geometry::Geometry;
use crate::index_space::{IndexSpace, IntVect};
use crate::multifab::MultiFab;




/**
 * Physical boundary condition types for filling ghost zones of state data
 * outside the problem domain
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BcType {
    /// Interior or periodic; the ghost data comes from other boxes.
    IntDir,
    /// External Dirichlet; the ghost holds the value on the boundary face.
    ExtDir,
    /// First-order extrapolation.
    FoExtrap,
    ReflectEven,
    ReflectOdd,
    /// Second-order extrapolation.
    HoExtrap,
}




/**
 * The boundary condition types of one component, on the low and high sides
 * of each axis.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BcRec {
    pub lo: [BcType; 3],
    pub hi: [BcType; 3],
}

impl BcRec {
    pub fn new(lo: [BcType; 3], hi: [BcType; 3]) -> Self {
        Self { lo, hi }
    }

    pub fn uniform(bc: BcType) -> Self {
        Self { lo: [bc; 3], hi: [bc; 3] }
    }

    /**
     * The given type on every non-periodic side of the geometry, and
     * `IntDir` on the periodic ones.
     */
    pub fn for_geometry(geom: &Geometry, bc: BcType) -> Self {
        let mut rec = Self::uniform(bc);
        for d in 0..3 {
            if d >= geom.ndim() || geom.is_periodic(d) {
                rec.lo[d] = BcType::IntDir;
                rec.hi[d] = BcType::IntDir;
            }
        }
        rec
    }

    /// Whether the low side of `dir` is a Dirichlet or high-order
    /// extrapolation boundary, which calls for one-sided slopes.
    pub fn one_sided_lo(&self, dir: usize) -> bool {
        matches!(self.lo[dir], BcType::ExtDir | BcType::HoExtrap)
    }

    pub fn one_sided_hi(&self, dir: usize) -> bool {
        matches!(self.hi[dir], BcType::ExtDir | BcType::HoExtrap)
    }
}




/**
 * Boundary condition types seen by the linear operators
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinOpBcType {
    Dirichlet,
    Neumann,
    Robin,
    Periodic,
    InhomogNeumann,
    ReflectOdd,
}




/**
 * A functor that fills the physical-boundary ghost zones of a field:
 * components `scomp .. scomp + ncomp` of `mf`, out to `nghost` zones, at
 * time `time`, using boundary records starting at `bccomp`. Closures with the
 * matching signature implement this trait.
 */
pub trait PhysBcFunct {
    fn fill(&self, mf: &mut MultiFab, scomp: usize, ncomp: usize, nghost: IntVect, time: f64, bccomp: usize);
}

impl<F> PhysBcFunct for F
where
    F: Fn(&mut MultiFab, usize, usize, IntVect, f64, usize),
{
    fn fill(&self, mf: &mut MultiFab, scomp: usize, ncomp: usize, nghost: IntVect, time: f64, bccomp: usize) {
        self(mf, scomp, ncomp, nghost, time, bccomp)
    }
}




/**
 * Leaves the physical ghost zones alone. Appropriate when every physical
 * boundary is periodic.
 */
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpBc;

impl PhysBcFunct for NoOpBc {
    fn fill(&self, _: &mut MultiFab, _: usize, _: usize, _: IntVect, _: f64, _: usize) {}
}




type ExtDirValue = Box<dyn Fn([f64; 3], usize, f64) -> f64 + Send + Sync>;




/**
 * Fills ghost zones outside the domain of a geometry according to a list of
 * `BcRec`, one per component. Dirichlet values are supplied by a function
 * of position, component, and time.
 */
pub struct GeometryBc {
    geom: Geometry,
    bcrecs: Vec<BcRec>,
    ext_dir: Option<ExtDirValue>,
}




// ============================================================================
impl GeometryBc {

    pub fn new(geom: Geometry, bcrecs: Vec<BcRec>) -> Self {
        Self { geom, bcrecs, ext_dir: None }
    }

    pub fn with_ext_dir<F>(mut self, f: F) -> Self
    where
        F: Fn([f64; 3], usize, f64) -> f64 + Send + Sync + 'static,
    {
        self.ext_dir = Some(Box::new(f));
        self
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    pub fn bcrecs(&self) -> &[BcRec] {
        &self.bcrecs
    }

    fn fill_side(&self, mf: &mut MultiFab, comp: usize, bc: BcType, dir: usize, low: bool, nghost: IntVect, time: f64) {
        let itype = mf.box_array().index_type();
        let node = itype.is_node(dir);
        let domain = self.geom.domain().convert(itype);
        let (dlo, dhi) = (domain.lo()[dir], domain.hi()[dir]);
        let dx = self.geom.cell_size();
        let prob_lo = self.geom.prob_lo();

        for b in 0..mf.len() {
            let grown = mf.valid_box(b).grow(nghost).intersect(mf.grown_box(b));
            let mut lo = grown.lo();
            let mut hi = grown.hi();

            if low {
                hi[dir] = hi[dir].min(dlo - 1);
            } else {
                lo[dir] = lo[dir].max(dhi + 1);
            }
            if (0..3).any(|d| hi[d] < lo[d]) {
                continue;
            }
            let region = IndexSpace::with_type(lo, hi, itype);
            let fab = mf.fab_mut(b);

            // interior data are read from (edge, j, k), (edge - s, j, k), ...
            let edge = if low { dlo } else { dhi };
            let inward = if low { 1 } else { -1 };

            for iv in region.iter() {
                let m = (iv[dir] - edge).abs();
                let at = |offset: i64| {
                    let mut jv = iv;
                    jv[dir] = edge + inward * offset;
                    jv
                };
                let value = match bc {
                    BcType::IntDir => continue,
                    BcType::FoExtrap => fab.get(at(0), comp),
                    BcType::ReflectEven => fab.get(at(if node { m } else { m - 1 }), comp),
                    BcType::ReflectOdd => {
                        if node && m == 0 {
                            0.0
                        } else {
                            -fab.get(at(if node { m } else { m - 1 }), comp)
                        }
                    }
                    BcType::HoExtrap => {
                        let n = domain.len()[dir] as i64;
                        if m > 1 {
                            fab.get(at(0), comp)
                        } else if n >= 3 {
                            0.125 * (15.0 * fab.get(at(0), comp) - 10.0 * fab.get(at(1), comp) + 3.0 * fab.get(at(2), comp))
                        } else if n >= 2 {
                            0.5 * (3.0 * fab.get(at(0), comp) - fab.get(at(1), comp))
                        } else {
                            fab.get(at(0), comp)
                        }
                    }
                    BcType::ExtDir => {
                        let mut x = [0.0; 3];
                        for d in 0..3 {
                            x[d] = if itype.is_node(d) {
                                prob_lo[d] + dx[d] * iv[d] as f64
                            } else {
                                prob_lo[d] + dx[d] * (iv[d] as f64 + 0.5)
                            };
                        }
                        x[dir] = if low {
                            prob_lo[dir] + dx[dir] * dlo as f64
                        } else {
                            prob_lo[dir] + dx[dir] * (if node { dhi } else { dhi + 1 }) as f64
                        };
                        self.ext_dir.as_ref().map_or(0.0, |f| f(x, comp, time))
                    }
                };
                fab.set(iv, comp, value);
            }
        }
    }
}

impl PhysBcFunct for GeometryBc {
    fn fill(&self, mf: &mut MultiFab, scomp: usize, ncomp: usize, nghost: IntVect, time: f64, bccomp: usize) {
        for n in 0..ncomp {
            let rec = self.bcrecs[(bccomp + n).min(self.bcrecs.len() - 1)];

            for dir in 0..self.geom.ndim() {
                if self.geom.is_periodic(dir) || nghost[dir] == 0 {
                    continue;
                }
                self.fill_side(mf, scomp + n, rec.lo[dir], dir, true, nghost, time);
                self.fill_side(mf, scomp + n, rec.hi[dir], dir, false, nghost, time);
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::box_array::{BoxArray, DistributionMapping};
    use crate::index_space::domain_box;
    use crate::multifab::RunOn;

    fn setup() -> (Geometry, MultiFab) {
        let geom = Geometry::new(domain_box([4, 4, 1], 2), [0.0; 3], [1.0; 3], [false, true, false], 2);
        let ba = BoxArray::from_box(geom.domain().clone());
        let dm = DistributionMapping::round_robin(&ba, 1);
        let mut mf = MultiFab::new(&ba, &dm, 1, [2, 2, 0]);
        mf.for_each_mut(RunOn::Serial, |_, valid, fab| {
            for iv in valid.iter() {
                fab.set(iv, 0, 1.0 + iv[0] as f64);
            }
        });
        (geom, mf)
    }

    #[test]
    fn reflect_odd_flips_sign_across_the_face() {
        let (geom, mut mf) = setup();
        let bc = GeometryBc::new(geom.clone(), vec![BcRec::for_geometry(&geom, BcType::ReflectOdd)]);
        bc.fill(&mut mf, 0, 1, [2, 2, 0], 0.0, 0);
        assert_eq!(mf.fab(0).get([-1, 1, 0], 0), -1.0);
        assert_eq!(mf.fab(0).get([-2, 1, 0], 0), -2.0);
        assert_eq!(mf.fab(0).get([4, 1, 0], 0), -4.0);
    }

    #[test]
    fn ho_extrap_is_exact_for_quadratics() {
        let (geom, mut mf) = setup();
        mf.for_each_mut(RunOn::Serial, |_, valid, fab| {
            for iv in valid.iter() {
                let x = iv[0] as f64 + 0.5;
                fab.set(iv, 0, x * x);
            }
        });
        let bc = GeometryBc::new(geom.clone(), vec![BcRec::for_geometry(&geom, BcType::HoExtrap)]);
        bc.fill(&mut mf, 0, 1, [1, 1, 0], 0.0, 0);
        // the ghost holds the value on the face, x = 0
        assert!((mf.fab(0).get([-1, 0, 0], 0) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn ext_dir_evaluates_on_the_boundary_face() {
        let (geom, mut mf) = setup();
        let bc = GeometryBc::new(geom.clone(), vec![BcRec::for_geometry(&geom, BcType::ExtDir)])
            .with_ext_dir(|x, _, _| 10.0 + x[0]);
        bc.fill(&mut mf, 0, 1, [1, 1, 0], 0.0, 0);
        assert_eq!(mf.fab(0).get([-1, 2, 0], 0), 10.0);
        assert_eq!(mf.fab(0).get([4, 2, 0], 0), 11.0);
    }
}

use crate::bc::BcRec;
use crate::error::Error;
use crate::fab::{Array4, Fab};
use crate::geometry::Geometry;
use crate::index_space::{coarsen_iv, unit, add, IndexSpace, IntVect};
use super::bc_of;




/// Quartic interpolation weights for the left fine child of a coarse cell,
/// applied to the coarse stencil `i-2 ..= i+2`. The right child uses the
/// reversed weights.
pub const QUARTIC_CL: [f64; 5] = [-0.01171875, 0.0859375, 0.5, -0.0859375, 0.01171875];




pub fn pc_interp(crse: &Fab<f64>, crse_comp: usize, fine: &mut Fab<f64>, fine_comp: usize, ncomp: usize, fine_region: &IndexSpace, ratio: IntVect) {
    let c = crse.array();
    let mut f = fine.array_mut();

    for n in 0..ncomp {
        for iv in fine_region.iter() {
            f.set_at(iv, fine_comp + n, c.at(coarsen_iv(iv, ratio), crse_comp + n));
        }
    }
}




/**
 * Evaluate the multilinear interpolant anchored at coarse index `base`,
 * written in slope form: the value at `base`, plus the first differences
 * along each axis, plus the mixed differences, each weighted by the
 * products of the fractional offsets `frac`. Axes with zero offset are not
 * read beyond `base`.
 */
pub(crate) fn multilinear(c: &Array4<f64>, base: IntVect, frac: [f64; 3], n: usize) -> f64 {
    let e = [
        (frac[0] > 0.0) as i64,
        (frac[1] > 0.0) as i64,
        (frac[2] > 0.0) as i64,
    ];
    let at = |ox: i64, oy: i64, oz: i64| c.get(base[0] + ox * e[0], base[1] + oy * e[1], base[2] + oz * e[2], n);

    let c000 = at(0, 0, 0);
    let sx = at(1, 0, 0) - c000;
    let sy = at(0, 1, 0) - c000;
    let sz = at(0, 0, 1) - c000;
    let sxy = at(1, 1, 0) - at(1, 0, 0) - at(0, 1, 0) + c000;
    let sxz = at(1, 0, 1) - at(1, 0, 0) - at(0, 0, 1) + c000;
    let syz = at(0, 1, 1) - at(0, 1, 0) - at(0, 0, 1) + c000;
    let sxyz = at(1, 1, 1) - at(1, 1, 0) - at(1, 0, 1) - at(0, 1, 1) + at(1, 0, 0) + at(0, 1, 0) + at(0, 0, 1) - c000;
    let [fx, fy, fz] = frac;

    c000
        + fx * sx
        + fy * sy
        + fz * sz
        + fx * fy * sxy
        + fx * fz * sxz
        + fy * fz * syz
        + fx * fy * fz * sxyz
}




#[allow(clippy::too_many_arguments)]
pub fn bilinear(crse: &Fab<f64>, crse_comp: usize, fine: &mut Fab<f64>, fine_comp: usize, ncomp: usize, fine_region: &IndexSpace, ratio: IntVect, ndim: usize) {
    let c = crse.array();
    let mut f = fine.array_mut();

    for iv in fine_region.iter() {
        let mut base = iv;
        let mut frac = [0.0; 3];

        for d in 0..ndim {
            let x = (iv[d] as f64 + 0.5) / ratio[d] as f64 - 0.5;
            let ic = x.floor();
            base[d] = ic as i64;
            frac[d] = x - ic;
        }
        for n in 0..ncomp {
            f.set_at(iv, fine_comp + n, multilinear(&c, base, frac, crse_comp + n));
        }
    }
}




/**
 * Monotonized-central limited slope from the left, right and centered
 * differences.
 */
pub(crate) fn mc_limit(dl: f64, dr: f64, dc: f64) -> f64 {
    if dl * dr > 0.0 {
        dc.signum() * dc.abs().min(2.0 * dl.abs()).min(2.0 * dr.abs())
    } else {
        0.0
    }
}




/**
 * The undivided slope of coarse data along `dir` at `ic`. In a cell
 * adjacent to a Dirichlet-like physical boundary the ghost value lives on
 * the boundary face, and the slope is one-sided.
 */
#[allow(clippy::too_many_arguments)]
pub(crate) fn cell_slope(c: &Array4<f64>, ic: IntVect, n: usize, dir: usize, domain: &IndexSpace, periodic: bool, bc: &BcRec, limited: bool) -> f64 {
    let e = unit(dir);
    let um = c.at(add(ic, [-e[0], -e[1], -e[2]]), n);
    let u0 = c.at(ic, n);
    let up = c.at(add(ic, e), n);

    let at_lo = !periodic && ic[dir] == domain.lo()[dir] && bc.one_sided_lo(dir);
    let at_hi = !periodic && ic[dir] == domain.hi()[dir] && bc.one_sided_hi(dir);

    let (dl, dr, dc) = if at_lo && at_hi {
        (2.0 * (u0 - um), 2.0 * (up - u0), up - um)
    } else if at_lo {
        (2.0 * (u0 - um), up - u0, (up + 3.0 * u0 - 4.0 * um) / 3.0)
    } else if at_hi {
        (u0 - um, 2.0 * (up - u0), (4.0 * up - 3.0 * u0 - um) / 3.0)
    } else {
        (u0 - um, up - u0, 0.5 * (up - um))
    };

    if limited {
        mc_limit(dl, dr, dc)
    } else {
        dc
    }
}




/**
 * Conservative linear interpolation: each coarse cell is reconstructed as
 * its value plus a slope per axis, and the reconstruction is sampled at fine
 * cell centers. The fine cells of one coarse cell average exactly to the
 * coarse value.
 */
#[allow(clippy::too_many_arguments)]
pub fn cons_linear(
    crse: &Fab<f64>,
    crse_comp: usize,
    fine: &mut Fab<f64>,
    fine_comp: usize,
    ncomp: usize,
    fine_region: &IndexSpace,
    ratio: IntVect,
    crse_geom: &Geometry,
    bcr: &[BcRec],
    limited: bool,
) {
    let ndim = crse_geom.ndim();
    let domain = crse_geom.domain();
    let c = crse.array();
    let mut f = fine.array_mut();

    for n in 0..ncomp {
        let bc = bc_of(bcr, n);

        for ic in fine_region.coarsen(ratio).iter() {
            let mut slope = [0.0; 3];

            for (d, s) in slope.iter_mut().enumerate().take(ndim) {
                *s = cell_slope(&c, ic, crse_comp + n, d, domain, crse_geom.is_periodic(d), &bc, limited);
            }
            let u0 = c.at(ic, crse_comp + n);
            let children = IndexSpace::new(ic, ic).refine(ratio).intersect(fine_region);

            for iv in children.iter() {
                let mut value = u0;
                for d in 0..ndim {
                    let xoff = (iv[d] - ic[d] * ratio[d]) as f64 + 0.5;
                    value += slope[d] * (xoff / ratio[d] as f64 - 0.5);
                }
                f.set_at(iv, fine_comp + n, value);
            }
        }
    }
}




/**
 * Fourth-order conservative interpolation for refinement ratio 2, applied
 * as a sequence of one-dimensional passes along z, then y, then x.
 */
#[allow(clippy::too_many_arguments)]
pub fn quartic(crse: &Fab<f64>, crse_comp: usize, fine: &mut Fab<f64>, fine_comp: usize, ncomp: usize, fine_region: &IndexSpace, ratio: IntVect, ndim: usize) -> Result<(), Error> {
    if let Some(d) = (0..ndim).find(|&d| ratio[d] != 2) {
        return Err(Error::InvalidRatio(ratio[d]));
    }
    let mut cbox = fine_region.coarsen(ratio);
    for d in 0..ndim {
        cbox = cbox.grow_dir(d, 2);
    }
    let mut stage = Fab::<f64>::new(cbox.clone(), ncomp);
    stage.copy_from(crse, &cbox, [0; 3], crse_comp, 0, ncomp);

    for dir in (0..ndim).rev() {
        let mut lo = stage.index_space().lo();
        let mut hi = stage.index_space().hi();
        lo[dir] = fine_region.lo()[dir];
        hi[dir] = fine_region.hi()[dir];

        let next_box = IndexSpace::new(lo, hi);
        let mut next = Fab::<f64>::new(next_box.clone(), ncomp);
        let s = stage.array();

        for n in 0..ncomp {
            for iv in next_box.iter() {
                let ic = iv[dir].div_euclid(2);
                let right = iv[dir].rem_euclid(2) == 1;
                let mut value = 0.0;

                for (m, &w) in QUARTIC_CL.iter().enumerate() {
                    let w = if right { QUARTIC_CL[4 - m] } else { w };
                    let mut jv = iv;
                    jv[dir] = ic + m as i64 - 2;
                    value += w * s.at(jv, n);
                }
                next.set(iv, n, 2.0 * value);
            }
        }
        stage = next;
    }
    fine.copy_from(&stage, fine_region, [0; 3], 0, fine_comp, ncomp);
    Ok(())
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::bc::{BcRec, BcType};
    use crate::index_space::domain_box;

    fn geometry() -> Geometry {
        Geometry::new(domain_box([8, 8, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2)
    }

    fn coarse_data() -> Fab<f64> {
        Fab::from_function(IndexSpace::new([-2, -2, 0], [9, 9, 0]), 1, |iv, _| {
            let x = iv[0] as f64;
            let y = iv[1] as f64;
            (0.7 * x).sin() + 0.3 * y * y + 0.1 * x * y
        })
    }

    fn assert_conservative(crse: &Fab<f64>, fine: &Fab<f64>, region: &IndexSpace) {
        for ic in region.coarsen([2, 2, 1]).iter() {
            let children = IndexSpace::new(ic, ic).refine([2, 2, 1]);
            let mean = children.iter().map(|iv| fine.get(iv, 0)).sum::<f64>() / 4.0;
            assert!((mean - crse.get(ic, 0)).abs() < 1e-12);
        }
    }

    #[test]
    fn pc_interp_reproduces_coarse_values() {
        let crse = coarse_data();
        let region = IndexSpace::new([0, 0, 0], [15, 15, 0]);
        let mut fine = Fab::new(region.clone(), 1);
        pc_interp(&crse, 0, &mut fine, 0, 1, &region, [2, 2, 1]);

        for iv in region.iter() {
            assert_eq!(fine.get(iv, 0), crse.get(coarsen_iv(iv, [2, 2, 1]), 0));
        }
    }

    #[test]
    fn bilinear_is_exact_for_linear_data() {
        let crse = Fab::from_function(IndexSpace::new([-1, -1, 0], [8, 8, 0]), 1, |iv, _| 2.0 * iv[0] as f64 - iv[1] as f64);
        let region = IndexSpace::new([0, 0, 0], [15, 15, 0]);
        let mut fine = Fab::new(region.clone(), 1);
        bilinear(&crse, 0, &mut fine, 0, 1, &region, [2, 2, 1], 2);

        for iv in region.iter() {
            let x = (iv[0] as f64 + 0.5) / 2.0 - 0.5;
            let y = (iv[1] as f64 + 0.5) / 2.0 - 0.5;
            assert!((fine.get(iv, 0) - (2.0 * x - y)).abs() < 1e-12);
        }
    }

    #[test]
    fn conservative_linear_conserves_with_and_without_limiting() {
        let crse = coarse_data();
        let geom = geometry();
        let region = IndexSpace::new([0, 0, 0], [15, 15, 0]);
        let bcr = [BcRec::for_geometry(&geom, BcType::ExtDir)];

        for limited in [true, false] {
            let mut fine = Fab::new(region.clone(), 1);
            cons_linear(&crse, 0, &mut fine, 0, 1, &region, [2, 2, 1], &geom, &bcr, limited);
            assert_conservative(&crse, &fine, &region);
        }
    }

    #[test]
    fn one_sided_slope_is_exact_for_linear_data_at_dirichlet_face() {
        // ghost at i = -1 holds the face value at x = 0, cell i sits at x = i + 1/2
        let crse = Fab::from_function(IndexSpace::new([-1, 0, 0], [8, 0, 0]), 1, |iv, _| {
            if iv[0] == -1 { 0.0 } else { 3.0 * (iv[0] as f64 + 0.5) }
        });
        let geom = Geometry::new(domain_box([8, 1, 1], 1), [0.0; 3], [8.0, 1.0, 1.0], [false; 3], 1);
        let bc = BcRec::for_geometry(&geom, BcType::ExtDir);
        let s = cell_slope(&crse.array(), [0, 0, 0], 0, 0, geom.domain(), false, &bc, false);
        assert!((s - 3.0).abs() < 1e-12);
    }

    #[test]
    fn quartic_conserves_and_is_exact_for_quartics() {
        let region = IndexSpace::new([0, 0, 0], [15, 0, 0]);
        // cell averages of x^4 over [i, i+1]
        let avg = |a: f64, b: f64| (b.powi(5) - a.powi(5)) / (5.0 * (b - a));
        let crse = Fab::from_function(IndexSpace::new([-2, 0, 0], [9, 0, 0]), 1, |iv, _| avg(iv[0] as f64, iv[0] as f64 + 1.0));
        let mut fine = Fab::new(region.clone(), 1);
        quartic(&crse, 0, &mut fine, 0, 1, &region, [2, 1, 1], 1).unwrap();

        for iv in region.iter() {
            let a = iv[0] as f64 * 0.5;
            assert!((fine.get(iv, 0) - avg(a, a + 0.5)).abs() < 1e-9);
        }
        for ic in 0..8 {
            let sum = fine.get([2 * ic, 0, 0], 0) + fine.get([2 * ic + 1, 0, 0], 0);
            assert!((0.5 * sum - crse.get([ic, 0, 0], 0)).abs() < 1e-9);
        }
    }

    #[test]
    fn quartic_rejects_other_ratios() {
        let region = IndexSpace::new([0, 0, 0], [11, 0, 0]);
        let crse = Fab::<f64>::new(IndexSpace::new([-2, 0, 0], [5, 0, 0]), 1);
        let mut fine = Fab::new(region.clone(), 1);
        assert_eq!(quartic(&crse, 0, &mut fine, 0, 1, &region, [3, 1, 1], 1), Err(Error::InvalidRatio(3)));
    }
}

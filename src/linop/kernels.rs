use crate::fab::{Array4, Array4Mut};
use crate::index_space::{unit, IndexSpace, IntVect, Orientation, Side};




/**
 * The pieces of the cell-centered operator
 *
 * `y = alpha a x - sum_d dh[d] (b_d(i+1) (x(i+1) - x(i)) - b_d(i) (x(i) - x(i-1)))`
 *
 * on one box, with `dh[d] = beta / dx[d]^2`. The face coefficient array
 * `b[d]` is indexed by the cell on the high side of the face; there is one
 * per active direction.
 */
pub struct Stencil<'a> {
    pub alpha: f64,
    pub dh: [f64; 3],
    pub a: Array4<'a, f64>,
    pub b: Vec<Array4<'a, f64>>,
}




// ============================================================================
impl<'a> Stencil<'a> {

    /**
     * Return the diagonal `gamma` and the off-diagonal sum `rho`, so that the
     * operator at `iv` is `gamma x(iv) - rho`.
     */
    #[inline]
    fn terms<F: Fn(IntVect) -> f64>(&self, iv: IntVect, x: F) -> (f64, f64) {
        let mut gamma = self.alpha * self.a.at(iv, 0);
        let mut rho = 0.0;

        for (d, b) in self.b.iter().enumerate() {
            let e = unit(d);
            let ip = [iv[0] + e[0], iv[1] + e[1], iv[2] + e[2]];
            let im = [iv[0] - e[0], iv[1] - e[1], iv[2] - e[2]];
            let (bm, bp) = (b.at(iv, 0), b.at(ip, 0));
            gamma += self.dh[d] * (bm + bp);
            rho += self.dh[d] * (bm * x(im) + bp * x(ip));
        }
        (gamma, rho)
    }

    /**
     * The part of the diagonal carried by ghost cells whose values depend on
     * `x(iv)`: `sum dh b cf` over the faces of the box that `iv` touches.
     */
    #[inline]
    fn delta(&self, iv: IntVect, n: usize, cf: &[Array4<f64>]) -> f64 {
        let ndim = self.b.len();
        let mut delta = 0.0;

        for (d, b) in self.b.iter().enumerate() {
            let lo = &cf[Orientation::new(d, Side::Low).index(ndim)];
            let hi = &cf[Orientation::new(d, Side::High).index(ndim)];
            let e = unit(d);
            let ip = [iv[0] + e[0], iv[1] + e[1], iv[2] + e[2]];

            if lo.contains(iv[0], iv[1], iv[2]) {
                delta += self.dh[d] * b.at(iv, 0) * lo.at(iv, n);
            }
            if hi.contains(iv[0], iv[1], iv[2]) {
                delta += self.dh[d] * b.at(ip, 0) * hi.at(iv, n);
            }
        }
        delta
    }
}




fn is_color(iv: IntVect, redblack: i64) -> bool {
    (iv[0] + iv[1] + iv[2] + redblack).rem_euclid(2) == 0
}




/**
 * Apply the operator on `region`.
 */
pub fn adotx(region: &IndexSpace, y: &mut Array4Mut<f64>, x: &Array4<f64>, s: &Stencil, ncomp: usize) {
    for n in 0..ncomp {
        for iv in region.iter() {
            let (gamma, rho) = s.terms(iv, |jv| x.at(jv, n));
            y.set_at(iv, n, gamma * x.at(iv, n) - rho);
        }
    }
}

/**
 * Apply the operator on `region`, with the result forced to zero where the
 * overset mask is zero.
 */
pub fn adotx_os(region: &IndexSpace, y: &mut Array4Mut<f64>, x: &Array4<f64>, s: &Stencil, osm: &Array4<i32>, ncomp: usize) {
    for n in 0..ncomp {
        for iv in region.iter() {
            if osm.at(iv, 0) == 0 {
                y.set_at(iv, n, 0.0);
            } else {
                let (gamma, rho) = s.terms(iv, |jv| x.at(jv, n));
                y.set_at(iv, n, gamma * x.at(iv, n) - rho);
            }
        }
    }
}




/**
 * One red-black Gauss-Seidel half sweep: update the cells with
 * `(i + j + k + redblack)` even. `cf` holds, for each face orientation, the
 * coefficient of the adjacent interior cell in that face's ghost cell
 * extrapolation, defined on the layer of boundary cells (zero where the
 * neighbor is a valid cell).
 */
#[allow(clippy::too_many_arguments)]
pub fn gsrb(region: &IndexSpace, phi: &mut Array4Mut<f64>, rhs: &Array4<f64>, s: &Stencil, cf: &[Array4<f64>], redblack: i64, omega: f64, ncomp: usize) {
    for n in 0..ncomp {
        for iv in region.iter().filter(|&iv| is_color(iv, redblack)) {
            let x = phi.as_const();
            let (gamma, rho) = s.terms(iv, |jv| x.at(jv, n));
            let delta = s.delta(iv, n, cf);
            let p = x.at(iv, n);
            let res = rhs.at(iv, n) - (gamma * p - rho);
            phi.set_at(iv, n, p + omega / (gamma - delta) * res);
        }
    }
}

/**
 * Red-black Gauss-Seidel which leaves zero in cells where the overset mask
 * is zero.
 */
#[allow(clippy::too_many_arguments)]
pub fn gsrb_os(
    region: &IndexSpace,
    phi: &mut Array4Mut<f64>,
    rhs: &Array4<f64>,
    s: &Stencil,
    cf: &[Array4<f64>],
    osm: &Array4<i32>,
    redblack: i64,
    omega: f64,
    ncomp: usize,
) {
    for n in 0..ncomp {
        for iv in region.iter().filter(|&iv| is_color(iv, redblack)) {
            if osm.at(iv, 0) == 0 {
                phi.set_at(iv, n, 0.0);
                continue;
            }
            let x = phi.as_const();
            let (gamma, rho) = s.terms(iv, |jv| x.at(jv, n));
            let delta = s.delta(iv, n, cf);
            let p = x.at(iv, n);
            let res = rhs.at(iv, n) - (gamma * p - rho);
            phi.set_at(iv, n, p + omega / (gamma - delta) * res);
        }
    }
}




/**
 * Weighted Jacobi update with weight 2/3, given `ax`, the operator applied
 * to the current `phi`.
 */
#[allow(clippy::too_many_arguments)]
pub fn jacobi(region: &IndexSpace, phi: &mut Array4Mut<f64>, ax: &Array4<f64>, rhs: &Array4<f64>, s: &Stencil, cf: &[Array4<f64>], ncomp: usize) {
    for n in 0..ncomp {
        for iv in region.iter() {
            let (gamma, _) = s.terms(iv, |_| 0.0);
            let delta = s.delta(iv, n, cf);
            let p = phi.at(iv, n);
            phi.set_at(iv, n, p + 2.0 / 3.0 * (rhs.at(iv, n) - ax.at(iv, n)) / (gamma - delta));
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn jacobi_os(
    region: &IndexSpace,
    phi: &mut Array4Mut<f64>,
    ax: &Array4<f64>,
    rhs: &Array4<f64>,
    s: &Stencil,
    cf: &[Array4<f64>],
    osm: &Array4<i32>,
    ncomp: usize,
) {
    for n in 0..ncomp {
        for iv in region.iter() {
            if osm.at(iv, 0) == 0 {
                phi.set_at(iv, n, 0.0);
                continue;
            }
            let (gamma, _) = s.terms(iv, |_| 0.0);
            let delta = s.delta(iv, n, cf);
            let p = phi.at(iv, n);
            phi.set_at(iv, n, p + 2.0 / 3.0 * (rhs.at(iv, n) - ax.at(iv, n)) / (gamma - delta));
        }
    }
}




/**
 * The longest line the tridiagonal smoother accepts.
 */
pub const MAX_LINE_LENGTH: usize = 32;

/**
 * The direction of strongest coupling, along which the line smoother solves
 * exactly.
 */
pub fn line_dir(dh: [f64; 3], ndim: usize) -> usize {
    (0..ndim).fold(0, |best, d| if dh[d].abs() > dh[best].abs() { d } else { best })
}

/**
 * Red-black Gauss-Seidel in which each line along `dir` is solved exactly
 * by the Thomas algorithm. Lines are colored by the parity of their
 * transverse indexes. Lines must be no longer than `MAX_LINE_LENGTH`.
 */
#[allow(clippy::too_many_arguments)]
pub fn gsrb_with_line_solve(
    region: &IndexSpace,
    phi: &mut Array4Mut<f64>,
    rhs: &Array4<f64>,
    s: &Stencil,
    cf: &[Array4<f64>],
    redblack: i64,
    dir: usize,
    ncomp: usize,
) {
    let (lo, hi) = (region.lo(), region.hi());
    let len = (hi[dir] - lo[dir] + 1) as usize;
    debug_assert!(len <= MAX_LINE_LENGTH);

    let mut top = hi;
    top[dir] = lo[dir];
    let starts = IndexSpace::new(lo, top);
    let e = unit(dir);
    let b = &s.b[dir];
    let dh = s.dh[dir];

    let mut sub = vec![0.0; len];
    let mut diag = vec![0.0; len];
    let mut sup = vec![0.0; len];
    let mut r = vec![0.0; len];

    for n in 0..ncomp {
        for start in starts.iter() {
            let mut first = start;
            first[dir] = lo[dir];
            let transverse: i64 = (0..3).filter(|&d| d != dir).map(|d| first[d]).sum();

            if (transverse + redblack).rem_euclid(2) != 0 {
                continue;
            }
            for m in 0..len {
                let mut iv = first;
                iv[dir] += m as i64;
                let x = phi.as_const();
                let (gamma, rho) = s.terms(iv, |jv| x.at(jv, n));
                let delta = s.delta(iv, n, cf);
                let p = x.at(iv, n);
                let ip = [iv[0] + e[0], iv[1] + e[1], iv[2] + e[2]];
                let im = [iv[0] - e[0], iv[1] - e[1], iv[2] - e[2]];
                let (bm, bp) = (b.at(iv, 0), b.at(ip, 0));

                // the line couplings come out of rho; the transverse and ghost
                // terms stay on the right-hand side at their current values
                let mut rho_other = rho - delta * p;
                diag[m] = gamma - delta;
                sub[m] = 0.0;
                sup[m] = 0.0;

                if m > 0 {
                    sub[m] = -dh * bm;
                    rho_other -= dh * bm * x.at(im, n);
                }
                if m + 1 < len {
                    sup[m] = -dh * bp;
                    rho_other -= dh * bp * x.at(ip, n);
                }
                r[m] = rhs.at(iv, n) + rho_other;
            }
            thomas(&sub, &mut diag, &sup, &mut r);

            for (m, value) in r.iter().enumerate() {
                let mut iv = first;
                iv[dir] += m as i64;
                phi.set_at(iv, n, *value);
            }
        }
    }
}

/**
 * Solve a tridiagonal system in place; the solution is left in `r`.
 */
fn thomas(sub: &[f64], diag: &mut [f64], sup: &[f64], r: &mut [f64]) {
    let n = r.len();
    for m in 1..n {
        let w = sub[m] / diag[m - 1];
        diag[m] -= w * sup[m - 1];
        r[m] -= w * r[m - 1];
    }
    r[n - 1] /= diag[n - 1];
    for m in (0..n - 1).rev() {
        r[m] = (r[m] - sup[m] * r[m + 1]) / diag[m];
    }
}




/**
 * Face fluxes `F = -beta b grad x` normal to `dir`, on the face-centered
 * `region`.
 */
pub fn flux(region: &IndexSpace, dir: usize, f: &mut Array4Mut<f64>, x: &Array4<f64>, s: &Stencil, dx: f64, ncomp: usize) {
    let e = unit(dir);
    for n in 0..ncomp {
        for iv in region.iter() {
            let im = [iv[0] - e[0], iv[1] - e[1], iv[2] - e[2]];
            f.set_at(iv, n, -s.dh[dir] * dx * s.b[dir].at(iv, 0) * (x.at(iv, n) - x.at(im, n)));
        }
    }
}




/**
 * Multiply face coefficients by `osfac` on faces between an active and a
 * masked-out cell.
 */
pub fn overset_rescale_bcoef(region: &IndexSpace, dir: usize, b: &mut Array4Mut<f64>, osm: &Array4<i32>, osfac: f64) {
    let e = unit(dir);
    for iv in region.iter() {
        let im = [iv[0] - e[0], iv[1] - e[1], iv[2] - e[2]];
        if osm.at(im, 0) + osm.at(iv, 0) == 1 {
            let value = b.at(iv, 0);
            b.set_at(iv, 0, value * osfac);
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::fab::Fab;
    use crate::index_space::IndexType;

    fn uniform(bx: &IndexSpace, ndim: usize) -> (Fab<f64>, Vec<Fab<f64>>) {
        let a = Fab::filled(bx.clone(), 1, 1.0);
        let b = (0..ndim).map(|d| Fab::filled(bx.convert(IndexType::face(d)).grow_dir(d, 0), 1, 1.0)).collect();
        (a, b)
    }

    #[test]
    fn laplacian_annihilates_constants() {
        let bx = IndexSpace::new([0, 0, 0], [7, 7, 0]);
        let grown = bx.grow([1, 1, 0]);
        let (a, b) = uniform(&grown, 2);
        let s = Stencil { alpha: 0.0, dh: [64.0, 64.0, 0.0], a: a.array(), b: b.iter().map(|f| f.array()).collect() };
        let x = Fab::filled(grown.clone(), 1, 3.5);
        let mut y = Fab::filled(bx.clone(), 1, 1.0);
        adotx(&bx, &mut y.array_mut(), &x.array(), &s, 1);
        assert!(y.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn overset_cells_stay_zero() {
        let bx = IndexSpace::new([0, 0, 0], [3, 3, 0]);
        let grown = bx.grow([1, 1, 0]);
        let (a, b) = uniform(&grown, 2);
        let s = Stencil { alpha: 1.0, dh: [1.0, 1.0, 0.0], a: a.array(), b: b.iter().map(|f| f.array()).collect() };
        let osm = Fab::from_function(grown.clone(), 1, |iv, _| if iv[0] < 2 { 0 } else { 1 });
        let rhs = Fab::filled(bx.clone(), 1, 5.0);
        let mut phi = Fab::filled(grown.clone(), 1, 0.0);
        let cf: Vec<Fab<f64>> = Orientation::all(2).map(|o| Fab::new(bx.bndry_cell(o, 1), 1)).collect();
        let cfa: Vec<_> = cf.iter().map(|f| f.array()).collect();

        for rb in 0..2 {
            gsrb_os(&bx, &mut phi.array_mut(), &rhs.array(), &s, &cfa, &osm.array(), rb, 1.0, 1);
        }
        let mut y = Fab::filled(bx.clone(), 1, 1.0);
        adotx_os(&bx, &mut y.array_mut(), &phi.array(), &s, &osm.array(), 1);

        for iv in bx.iter().filter(|iv| iv[0] < 2) {
            assert_eq!(phi.get(iv, 0), 0.0);
            assert_eq!(y.get(iv, 0), 0.0);
        }
        assert!(phi.get([3, 3, 0], 0) != 0.0);
    }

    #[test]
    fn line_solve_is_exact_in_one_dimension() {
        // 1D: alpha = 0, dh = 1, zero ghosts: the line solve is a direct solve
        let bx = IndexSpace::new([0, 0, 0], [7, 0, 0]);
        let grown = bx.grow([1, 0, 0]);
        let (a, b) = uniform(&grown, 1);
        let s = Stencil { alpha: 0.0, dh: [1.0, 0.0, 0.0], a: a.array(), b: b.iter().map(|f| f.array()).collect() };
        let rhs = Fab::filled(bx.clone(), 1, 1.0);
        let mut phi = Fab::filled(grown.clone(), 1, 0.0);
        let cf: Vec<Fab<f64>> = Orientation::all(1).map(|o| Fab::new(bx.bndry_cell(o, 1), 1)).collect();
        let cfa: Vec<_> = cf.iter().map(|f| f.array()).collect();
        gsrb_with_line_solve(&bx, &mut phi.array_mut(), &rhs.array(), &s, &cfa, 0, 0, 1);

        let mut y = Fab::filled(bx.clone(), 1, 0.0);
        adotx(&bx, &mut y.array_mut(), &phi.array(), &s, 1);
        for iv in bx.iter() {
            assert!((y.get(iv, 0) - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn overset_interface_faces_are_rescaled() {
        let bx = IndexSpace::new([0, 0, 0], [3, 0, 0]);
        let faces = bx.convert(IndexType::face(0));
        let osm = Fab::from_function(bx.grow([1, 0, 0]), 1, |iv, _| if iv[0] < 2 { 0 } else { 1 });
        let mut b = Fab::filled(faces.clone(), 1, 1.0);
        overset_rescale_bcoef(&faces, 0, &mut b.array_mut(), &osm.array(), 4.0 / 3.0);
        assert_eq!(b.get([2, 0, 0], 0), 4.0 / 3.0);
        assert_eq!(b.get([1, 0, 0], 0), 1.0);
    }
}

use crate::bc::BcRec;
use crate::error::Error;
use crate::fab::{Array4, Fab};
use crate::geometry::Geometry;
use crate::index_space::{add, coarsen_iv, unit, IndexSpace, IndexType, IntVect};
use super::bc_of;
use super::cell::cell_slope;




/**
 * Return the normal direction of face-centered data, or an error if the
 * index space is not face-centered.
 */
pub fn face_dir(bx: &IndexSpace) -> Result<usize, Error> {
    let itype = bx.index_type();
    let nodal: Vec<_> = (0..3).filter(|&d| itype.is_node(d)).collect();

    match nodal.as_slice() {
        [dir] => Ok(*dir),
        _ => Err(Error::InvalidArgument("expected face-centered data".into())),
    }
}




/**
 * Split a fine face index into its coarse face index and the normalized
 * distance `w` from that coarse face, in `[0, 1)`.
 */
fn bracket(iv: IntVect, ratio: IntVect, dir: usize) -> (IntVect, f64) {
    let mut ic = coarsen_iv(iv, ratio);
    ic[dir] = iv[dir].div_euclid(ratio[dir]);
    let w = iv[dir].rem_euclid(ratio[dir]) as f64 / ratio[dir] as f64;
    (ic, w)
}




#[allow(clippy::too_many_arguments)]
pub fn face_linear(crse: &Fab<f64>, crse_comp: usize, fine: &mut Fab<f64>, fine_comp: usize, ncomp: usize, fine_region: &IndexSpace, ratio: IntVect, dir: usize) {
    let c = crse.array();
    let mut f = fine.array_mut();

    for n in 0..ncomp {
        for iv in fine_region.iter() {
            let (ic, w) = bracket(iv, ratio, dir);
            let value = if w == 0.0 {
                c.at(ic, crse_comp + n)
            } else {
                (1.0 - w) * c.at(ic, crse_comp + n) + w * c.at(add(ic, unit(dir)), crse_comp + n)
            };
            f.set_at(iv, fine_comp + n, value);
        }
    }
}




/**
 * Conservative linear reconstruction of one coarse face's value along the
 * tangential directions, sampled at fine face `iv`.
 */
#[allow(clippy::too_many_arguments)]
fn tangential_value(c: &Array4<f64>, jc: IntVect, iv: IntVect, n: usize, ratio: IntVect, dir: usize, ndim: usize, geom: &Geometry, bc: &BcRec, limited: bool) -> f64 {
    let mut value = c.at(jc, n);

    for t in (0..ndim).filter(|&t| t != dir) {
        let slope = cell_slope(c, jc, n, t, geom.domain(), geom.is_periodic(t), bc, limited);
        let xoff = ((iv[t] - jc[t] * ratio[t]) as f64 + 0.5) / ratio[t] as f64 - 0.5;
        value += slope * xoff;
    }
    value
}




/**
 * Face interpolation which is conservative linear in the tangential
 * directions and linear in the normal direction. The fine faces lying on a
 * coarse face average exactly to the coarse value.
 */
#[allow(clippy::too_many_arguments)]
pub fn face_cons_linear(
    crse: &Fab<f64>,
    crse_comp: usize,
    fine: &mut Fab<f64>,
    fine_comp: usize,
    ncomp: usize,
    fine_region: &IndexSpace,
    ratio: IntVect,
    dir: usize,
    ndim: usize,
    crse_geom: &Geometry,
    bcr: &[BcRec],
    limited: bool,
) {
    let c = crse.array();
    let mut f = fine.array_mut();

    for n in 0..ncomp {
        let bc = bc_of(bcr, n);

        for iv in fine_region.iter() {
            let (ic, w) = bracket(iv, ratio, dir);
            let lo = tangential_value(&c, ic, iv, crse_comp + n, ratio, dir, ndim, crse_geom, &bc, limited);
            let value = if w == 0.0 {
                lo
            } else {
                let hi = tangential_value(&c, add(ic, unit(dir)), iv, crse_comp + n, ratio, dir, ndim, crse_geom, &bc, limited);
                (1.0 - w) * lo + w * hi
            };
            f.set_at(iv, fine_comp + n, value);
        }
    }
}




/**
 * Divergence-preserving interpolation of face data in all directions.
 *
 * Fine faces on coarse faces are set by tangential conservative linear
 * reconstruction, so their fluxes sum to the coarse flux. The faces interior
 * to a coarse cell start from `u0`, the interpolant along the normal between
 * the two bounding coarse faces (not the average of the naive face values),
 * and receive the
 * minimum-norm correction `u = u0 + D^T lambda` that makes the divergence
 * `D u` of every fine cell equal to that of the coarse cell. One fine-cell
 * constraint is redundant (the fluxes through the coarse cell boundary
 * already fix the sum), so it is dropped to make `D D^T` invertible.
 */
#[allow(clippy::too_many_arguments)]
pub fn divfree_interp_arr(
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
    let ndim = fine_geom.ndim();

    if crse.len() < ndim || fine.len() < ndim {
        return Err(Error::InvalidArgument("interp_arr needs one fab per direction".into()));
    }
    if fine_region.coarsen(ratio).refine(ratio) != *fine_region {
        return Err(Error::InvalidArgument("interp_arr region must be aligned with coarse cells".into()));
    }
    for d in 0..ndim {
        let faces = fine_region.convert(IndexType::face(d));
        face_cons_linear(crse[d], crse_comp, fine[d], fine_comp, ncomp, &faces, ratio, d, ndim, crse_geom, bcr, false);
    }

    let dxf = fine_geom.cell_size();
    let dxc = crse_geom.cell_size();
    let block = IndexSpace::new([0; 3], [ratio[0] - 1, ratio[1] - 1, ratio[2] - 1]);
    let cells: Vec<IntVect> = block.iter().collect();

    // interior faces of one block: (direction, local index of the face)
    let unknowns: Vec<(usize, IntVect)> = (0..ndim)
        .flat_map(|d| {
            block
                .iter()
                .filter(move |p| p[d] > 0)
                .map(move |p| (d, p))
        })
        .collect();

    if unknowns.is_empty() {
        return Ok(());
    }
    let nrow = cells.len() - 1;
    let ncol = unknowns.len();

    // D[row][col]: contribution of unknown `col` to the divergence of cell `row`
    let mut dmat = vec![0.0; nrow * ncol];

    for (row, p) in cells.iter().take(nrow).enumerate() {
        for (col, (d, q)) in unknowns.iter().enumerate() {
            if *q == *p {
                dmat[row * ncol + col] -= 1.0 / dxf[*d];
            }
            if *q == add(*p, unit(*d)) {
                dmat[row * ncol + col] += 1.0 / dxf[*d];
            }
        }
    }
    let mut ddt = vec![0.0; nrow * nrow];

    for i in 0..nrow {
        for j in 0..nrow {
            ddt[i * nrow + j] = (0..ncol).map(|k| dmat[i * ncol + k] * dmat[j * ncol + k]).sum();
        }
    }

    for n in 0..ncomp {
        for ic in fine_region.coarsen(ratio).iter() {
            let origin = [ic[0] * ratio[0], ic[1] * ratio[1], ic[2] * ratio[2]];

            let div_c: f64 = (0..ndim)
                .map(|d| (crse[d].get(add(ic, unit(d)), crse_comp + n) - crse[d].get(ic, crse_comp + n)) / dxc[d])
                .sum();

            let view: &[&mut Fab<f64>] = fine;
            let face_value = |d: usize, q: IntVect| view[d].get(add(origin, q), fine_comp + n);

            let residual: Vec<f64> = cells
                .iter()
                .take(nrow)
                .map(|p| {
                    let div_f: f64 = (0..ndim)
                        .map(|d| (face_value(d, add(*p, unit(d))) - face_value(d, *p)) / dxf[d])
                        .sum();
                    div_c - div_f
                })
                .collect();

            let lambda = solve_dense(ddt.clone(), residual, nrow)
                .ok_or_else(|| Error::InvalidArgument("singular divergence closure".into()))?;

            for (col, (d, q)) in unknowns.iter().enumerate() {
                let du: f64 = (0..nrow).map(|row| dmat[row * ncol + col] * lambda[row]).sum();
                let iv = add(origin, *q);
                let u = fine[*d].get(iv, fine_comp + n);
                fine[*d].set(iv, fine_comp + n, u + du);
            }
        }
    }
    Ok(())
}




/**
 * Solve the dense system `a x = b` by Gaussian elimination with partial
 * pivoting. Returns `None` if the matrix is singular.
 */
pub(crate) fn solve_dense(mut a: Vec<f64>, mut b: Vec<f64>, n: usize) -> Option<Vec<f64>> {
    for k in 0..n {
        let pivot = (k..n).max_by(|&i, &j| a[i * n + k].abs().total_cmp(&a[j * n + k].abs()))?;

        if a[pivot * n + k].abs() < 1e-300 {
            return None;
        }
        if pivot != k {
            for j in 0..n {
                a.swap(k * n + j, pivot * n + j);
            }
            b.swap(k, pivot);
        }
        for i in k + 1..n {
            let m = a[i * n + k] / a[k * n + k];
            for j in k..n {
                a[i * n + j] -= m * a[k * n + j];
            }
            b[i] -= m * b[k];
        }
    }
    let mut x = vec![0.0; n];

    for k in (0..n).rev() {
        let s: f64 = (k + 1..n).map(|j| a[k * n + j] * x[j]).sum();
        x[k] = (b[k] - s) / a[k * n + k];
    }
    Some(x)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::bc::{BcRec, BcType};
    use crate::index_space::domain_box;
    use crate::interp::Interpolater;

    fn geometries() -> (Geometry, Geometry) {
        let crse = Geometry::new(domain_box([8, 8, 1], 2), [0.0; 3], [1.0; 3], [true, true, false], 2);
        let fine = crse.refine([2, 2, 1]);
        (crse, fine)
    }

    #[test]
    fn face_linear_matches_coarse_faces_and_interpolates_between() {
        let cbox = IndexSpace::with_type([0, 0, 0], [4, 3, 0], IndexType::face(0));
        let fbox = IndexSpace::with_type([0, 0, 0], [8, 7, 0], IndexType::face(0));
        let crse = Fab::from_function(cbox, 1, |iv, _| iv[0] as f64);
        let mut fine = Fab::new(fbox.clone(), 1);
        face_linear(&crse, 0, &mut fine, 0, 1, &fbox, [2, 2, 1], 0);
        assert_eq!(fine.get([4, 3, 0], 0), 2.0);
        assert_eq!(fine.get([5, 3, 0], 0), 2.5);
    }

    #[test]
    fn divfree_interp_preserves_divergence_in_every_fine_cell() {
        let (cgeom, fgeom) = geometries();
        let region = IndexSpace::new([4, 4, 0], [11, 11, 0]);
        let ratio = [2, 2, 1];
        let bcr = [BcRec::for_geometry(&cgeom, BcType::IntDir)];

        let cu = Fab::from_function(
            Interpolater::FaceDivFree.coarse_box(&region.convert(IndexType::face(0)), ratio), 1,
            |iv, _| (0.4 * iv[0] as f64).sin() + 0.2 * (iv[1] * iv[1]) as f64);
        let cv = Fab::from_function(
            Interpolater::FaceDivFree.coarse_box(&region.convert(IndexType::face(1)), ratio), 1,
            |iv, _| (0.3 * iv[1] as f64).cos() * iv[0] as f64);
        let mut fu = Fab::new(region.convert(IndexType::face(0)), 1);
        let mut fv = Fab::new(region.convert(IndexType::face(1)), 1);

        Interpolater::FaceDivFree
            .interp_arr(&[&cu, &cv], 0, &mut [&mut fu, &mut fv], 0, 1, &region, ratio, &cgeom, &fgeom, &bcr)
            .unwrap();

        let dxc = cgeom.cell_size();
        let dxf = fgeom.cell_size();

        for iv in region.iter() {
            let ic = coarsen_iv(iv, ratio);
            let div_c = (cu.get(add(ic, [1, 0, 0]), 0) - cu.get(ic, 0)) / dxc[0] + (cv.get(add(ic, [0, 1, 0]), 0) - cv.get(ic, 0)) / dxc[1];
            let div_f = (fu.get(add(iv, [1, 0, 0]), 0) - fu.get(iv, 0)) / dxf[0] + (fv.get(add(iv, [0, 1, 0]), 0) - fv.get(iv, 0)) / dxf[1];
            assert!((div_c - div_f).abs() < 1e-9 * div_c.abs().max(1.0));
        }

        // fine fluxes through each coarse face sum to the coarse flux
        for jc in cu.index_space().intersect(&region.coarsen(ratio).convert(IndexType::face(0))).iter() {
            let a = fu.get([2 * jc[0], 2 * jc[1], 0], 0);
            let b = fu.get([2 * jc[0], 2 * jc[1] + 1, 0], 0);
            assert!((0.5 * (a + b) - cu.get(jc, 0)).abs() < 1e-12);
        }
    }

    #[test]
    fn dense_solver_solves_small_systems() {
        let x = solve_dense(vec![2.0, 1.0, 1.0, 3.0], vec![3.0, 5.0], 2).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-14);
        assert!((x[1] - 1.4).abs() < 1e-14);
        assert!(solve_dense(vec![1.0, 2.0, 2.0, 4.0], vec![1.0, 1.0], 2).is_none());
    }
}

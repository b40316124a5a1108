use crate::fab::Fab;
use crate::index_space::{IndexSpace, IntVect};
use super::cell::multilinear;




/**
 * Multilinear interpolation of node-centered data. Fine nodes coincident
 * with coarse nodes take the coarse value exactly.
 */
#[allow(clippy::too_many_arguments)]
pub fn bilinear(crse: &Fab<f64>, crse_comp: usize, fine: &mut Fab<f64>, fine_comp: usize, ncomp: usize, fine_region: &IndexSpace, ratio: IntVect, ndim: usize) {
    let c = crse.array();
    let mut f = fine.array_mut();

    for iv in fine_region.iter() {
        let mut base = iv;
        let mut frac = [0.0; 3];

        for d in 0..ndim {
            base[d] = iv[d].div_euclid(ratio[d]);
            frac[d] = (iv[d] - base[d] * ratio[d]) as f64 / ratio[d] as f64;
        }
        for n in 0..ncomp {
            f.set_at(iv, fine_comp + n, multilinear(&c, base, frac, crse_comp + n));
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::IndexType;

    #[test]
    fn node_bilinear_injects_and_interpolates() {
        let cbox = IndexSpace::with_type([0, 0, 0], [4, 4, 0], IndexType::node());
        let fbox = IndexSpace::with_type([0, 0, 0], [8, 8, 0], IndexType::node());
        let crse = Fab::from_function(cbox, 1, |iv, _| (iv[0] * iv[1]) as f64);
        let mut fine = Fab::new(fbox.clone(), 1);
        bilinear(&crse, 0, &mut fine, 0, 1, &fbox, [2, 2, 1], 2);

        assert_eq!(fine.get([4, 6, 0], 0), 6.0);
        assert_eq!(fine.get([8, 8, 0], 0), 16.0);
        // x*y is bilinear, so the interpolant is exact
        assert_eq!(fine.get([3, 5, 0], 0), 1.5 * 2.5);
    }
}

use crate::fab::Fab;
use crate::index_space::{IndexSpace, IntVect};




/**
 * Redistribute interpolated sync corrections among the fine children of
 * each coarse cell, so that adding them to `fine_state` does not create
 * negative values. The total correction over each coarse cell is preserved.
 *
 * For component `n >= 1` of a coarse cell with any child where
 * `state + correction < 0`, let `sum_n` and `sum_p` be the sums of the
 * non-positive and positive state values of the children, `crse_tot` the
 * sum of their corrections, and `total = sum_p + sum_n + crse_tot`. The
 * cases are tested in this order:
 *
 * 1. `crse_tot > 0` and `|crse_tot| >= |sum_n|`
 * 2. `crse_tot > 0` and `|crse_tot| < |sum_n|` and `total >= 0`
 * 3. `crse_tot <= 0` and `|crse_tot| < sum_p` and `total >= 0`
 * 4. `crse_tot <= 0` and `|crse_tot| >= sum_p`
 * 5. anything else
 *
 * Cases 1 to 3 zero the composite of the non-positive children and scale
 * the positive ones by `total / sum_p`. Cases 4 and 5 (and 1 to 3 when
 * `sum_p == 0`) set a uniform composite `total / N`. Afterwards component
 * zero of every fine cell is the sum of the other components.
 */
pub fn protect(
    fine: &mut Fab<f64>,
    fine_comp: usize,
    fine_state: &Fab<f64>,
    state_comp: usize,
    ncomp: usize,
    fine_region: &IndexSpace,
    ratio: IntVect,
) {
    for ic in fine_region.coarsen(ratio).iter() {
        let children = IndexSpace::new(ic, ic).refine(ratio).intersect(fine_region);

        for n in 1..ncomp {
            let fc = fine_comp + n;
            let sc = state_comp + n;

            let has_negative = children
                .iter()
                .any(|iv| fine_state.get(iv, sc) + fine.get(iv, fc) < 0.0);

            if !has_negative {
                continue;
            }
            let mut sum_n = 0.0;
            let mut sum_p = 0.0;
            let mut crse_tot = 0.0;
            let mut count = 0.0;

            for iv in children.iter() {
                let s = fine_state.get(iv, sc);
                if s <= 0.0 {
                    sum_n += s;
                } else {
                    sum_p += s;
                }
                crse_tot += fine.get(iv, fc);
                count += 1.0;
            }
            let total = sum_p + sum_n + crse_tot;

            let proportional = if crse_tot > 0.0 && crse_tot.abs() >= sum_n.abs() {
                true
            } else if crse_tot > 0.0 && crse_tot.abs() < sum_n.abs() && total >= 0.0 {
                true
            } else if crse_tot <= 0.0 && crse_tot.abs() < sum_p && total >= 0.0 {
                true
            } else {
                false
            };

            for iv in children.iter() {
                let s = fine_state.get(iv, sc);
                let composite = if proportional && sum_p > 0.0 {
                    if s <= 0.0 { 0.0 } else { s * total / sum_p }
                } else {
                    total / count
                };
                fine.set(iv, fc, composite - s);
            }
        }
    }

    if ncomp > 1 {
        for iv in fine_region.iter() {
            let sum = (1..ncomp).map(|n| fine.get(iv, fine_comp + n)).sum();
            fine.set(iv, fine_comp, sum);
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn run(state: [f64; 4], correction: [f64; 4]) -> (Fab<f64>, Fab<f64>) {
        let region = IndexSpace::new([0, 0, 0], [1, 1, 0]);
        let cells: Vec<_> = region.iter().collect();
        let pos = |iv: IntVect| cells.iter().position(|&c| c == iv).unwrap_or(0);

        let st = Fab::from_function(region.clone(), 2, |iv, n| if n == 0 { 0.0 } else { state[pos(iv)] });
        let mut fine = Fab::from_function(region.clone(), 2, |iv, n| if n == 0 { 0.0 } else { correction[pos(iv)] });
        protect(&mut fine, 0, &st, 0, 2, &region, [2, 2, 1]);
        (fine, st)
    }

    fn composite(fine: &Fab<f64>, st: &Fab<f64>) -> Vec<f64> {
        fine.index_space().iter().map(|iv| fine.get(iv, 1) + st.get(iv, 1)).collect()
    }

    #[test]
    fn positive_total_is_redistributed_without_negatives() {
        let (fine, st) = run([1.0, 2.0, -0.5, 0.5], [-2.0, 0.5, 0.2, 0.1]);
        let c = composite(&fine, &st);
        let total: f64 = c.iter().sum();
        assert!(c.iter().all(|&x| x >= 0.0));
        assert!((total - (3.0 - 1.2)).abs() < 1e-12);
    }

    #[test]
    fn correction_total_is_preserved_in_every_case() {
        let cases = [
            ([1.0, 1.0, 1.0, -1.0], [2.0, 0.5, -2.0, 0.5]),
            ([1.0, 1.0, 1.0, -4.0], [0.5, 0.5, -2.0, 0.0]),
            ([4.0, 1.0, 1.0, 1.0], [-3.0, 0.0, -2.0, 0.0]),
            ([1.0, 1.0, 0.0, 0.0], [-3.0, -0.5, 0.0, 0.0]),
            ([1.0, -3.0, 0.0, 0.0], [-0.5, 0.0, 0.0, 0.0]),
        ];
        for (state, corr) in cases {
            let (fine, _) = run(state, corr);
            let sum: f64 = fine.index_space().iter().map(|iv| fine.get(iv, 1)).sum();
            assert!((sum - corr.iter().sum::<f64>()).abs() < 1e-12);
        }
    }

    #[test]
    fn unrecoverable_deficit_is_spread_uniformly() {
        let (fine, st) = run([1.0, 1.0, 0.0, 0.0], [-3.0, -0.5, 0.0, 0.0]);
        for x in composite(&fine, &st) {
            assert!((x - (2.0 - 3.5) / 4.0).abs() < 1e-12);
        }
    }

    #[test]
    fn density_component_is_the_sum_of_the_others() {
        let (fine, _) = run([1.0, 2.0, -0.5, 0.5], [-2.0, 0.5, 0.2, 0.1]);
        for iv in fine.index_space().iter() {
            assert_eq!(fine.get(iv, 0), fine.get(iv, 1));
        }
    }
}

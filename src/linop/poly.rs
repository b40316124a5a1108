/**
 * Lagrange coefficients for evaluating at `x_int` the polynomial through the
 * points `x`: the value is `sum(c[j] * f(x[j]))`.
 */
pub fn poly_interp_coeff(x_int: f64, x: &[f64]) -> Vec<f64> {
    (0..x.len())
        .map(|j| {
            let mut num = 1.0;
            let mut den = 1.0;
            for i in (0..x.len()).filter(|&i| i != j) {
                num *= x_int - x[i];
                den *= x[j] - x[i];
            }
            num / den
        })
        .collect()
}




/**
 * Coefficients for the ghost cell value (at `x = -0.5` in units of the cell
 * size, the face being at zero) from a boundary value at `x = -bcl` and the
 * first `ninterior` interior cells at `0.5, 1.5, ...`. Entry zero multiplies
 * the boundary value.
 */
pub fn dirichlet_ghost_coeff(bcl: f64, ninterior: usize) -> Vec<f64> {
    let mut x = vec![-bcl];
    x.extend((0..ninterior).map(|k| k as f64 + 0.5));
    poly_interp_coeff(-0.5, &x)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn coefficients_reproduce_polynomials() {
        let x = [-0.25, 0.5, 1.5, 2.5];
        let c = poly_interp_coeff(-0.5, &x);
        let f = |x: f64| 1.0 + 2.0 * x - x * x + 0.5 * x * x * x;
        let value: f64 = c.iter().zip(x).map(|(c, x)| c * f(x)).sum();
        assert!((value - f(-0.5)).abs() < 1e-12);
    }

    #[test]
    fn dirichlet_at_the_face_is_linear_reflection() {
        let c = dirichlet_ghost_coeff(0.0, 1);
        assert!((c[0] - 2.0).abs() < 1e-14);
        assert!((c[1] + 1.0).abs() < 1e-14);
    }
}

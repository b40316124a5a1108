use crate::error::Error;




/**
 * Weights `w` of the stored stage derivatives such that the coarse state
 * seen by fine Runge-Kutta stage `stage` (1-based) of sub-cycle `iteration`
 * (1-based, of `ncycle`) is `S_old + dt * sum(w[i] * k[i])`.
 */
pub fn stage_weights(order: usize, stage: usize, iteration: usize, ncycle: usize) -> Result<Vec<f64>, Error> {
    if stage == 0 || stage > order {
        return Err(Error::InvalidRkStage(stage));
    }
    if ncycle == 0 || iteration == 0 {
        return Err(Error::InvalidArgument(format!("iteration {} of {} sub-cycles", iteration, ncycle)));
    }
    let xsi = (iteration - 1) as f64 / ncycle as f64;
    let r = 1.0 / ncycle as f64;

    match order {
        3 => Ok(rk3_weights(stage, xsi, r)),
        4 => Ok(rk4_weights(stage, xsi, r)),
        _ => Err(Error::InvalidRkOrder(order)),
    }
}




fn rk3_weights(stage: usize, xsi: f64, r: f64) -> Vec<f64> {
    let x2 = xsi * xsi;
    let b = [xsi - 5.0 / 6.0 * x2, 1.0 / 6.0 * x2, 2.0 / 3.0 * x2];
    let c = [1.0 - 5.0 / 3.0 * xsi, 1.0 / 3.0 * xsi, 4.0 / 3.0 * xsi];
    let d = [-5.0 / 3.0, 1.0 / 3.0, 4.0 / 3.0];

    (0..3)
        .map(|i| match stage {
            1 => b[i],
            2 => b[i] + r * c[i],
            _ => b[i] + 0.5 * r * c[i] + 0.25 * r * r * d[i],
        })
        .collect()
}

fn rk4_weights(stage: usize, xsi: f64, r: f64) -> Vec<f64> {
    let x2 = xsi * xsi;
    let x3 = x2 * xsi;
    let r2 = r * r;
    let r3 = r2 * r;

    let b = [
        xsi - 1.5 * x2 + 2.0 / 3.0 * x3,
        x2 - 2.0 / 3.0 * x3,
        x2 - 2.0 / 3.0 * x3,
        -0.5 * x2 + 2.0 / 3.0 * x3,
    ];
    let c = [
        1.0 - 3.0 * xsi + 2.0 * x2,
        2.0 * xsi - 2.0 * x2,
        2.0 * xsi - 2.0 * x2,
        -xsi + 2.0 * x2,
    ];
    let d = [-3.0 + 4.0 * xsi, 2.0 - 4.0 * xsi, 2.0 - 4.0 * xsi, -1.0 + 4.0 * xsi];
    let e = [4.0, -4.0, -4.0, 4.0];

    let mut w: Vec<f64> = (0..4)
        .map(|i| match stage {
            1 => b[i],
            2 => b[i] + 0.5 * r * c[i],
            3 => b[i] + 0.5 * r * c[i] + 0.25 * r2 * d[i] + 0.0625 * r3 * e[i],
            _ => b[i] + r * c[i] + 0.5 * r2 * d[i] + 0.125 * r3 * e[i],
        })
        .collect();

    // the (k3 - k2) correction
    match stage {
        3 => {
            w[2] -= 0.25 * r3;
            w[1] += 0.25 * r3;
        }
        4 => {
            w[2] += 0.5 * r3;
            w[1] -= 0.5 * r3;
        }
        _ => {}
    }
    w
}

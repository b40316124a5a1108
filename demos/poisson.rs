use std::f64::consts::PI;
use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use gridiron_mlmg::box_array::{BoxArray, DistributionMapping};
use gridiron_mlmg::config::SolverConfig;
use gridiron_mlmg::geometry::Geometry;
use gridiron_mlmg::index_space::domain_box;
use gridiron_mlmg::linop::MLLinOp;
use gridiron_mlmg::mlmg::BottomSolver;
use gridiron_mlmg::multifab::MultiFab;
use gridiron_mlmg::{Error, MLABecLaplacian, GMRESMLMG, MLMG};




#[derive(Clone, Copy, Debug, ValueEnum)]
enum Bottom {
    Smoother,
    Cg,
    Bicgstab,
}




/**
 * Convergence study for the 2D Poisson problem `div(grad phi) = f` on the
 * unit square with `phi = 0` on the boundary and exact solution
 * `sin(pi x) sin(pi y)`.
 */
#[derive(Debug, Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// Cells per side on the coarsest resolution
    #[clap(short = 'n', long, default_value = "32")]
    base: i64,

    /// Number of resolutions, each twice as fine as the last
    #[clap(short = 'r', long, default_value = "3")]
    resolutions: u32,

    #[clap(short = 'm', long, default_value = "32")]
    max_grid_size: i64,

    #[clap(short = 't', long, default_value = "1e-10")]
    tol_rel: f64,

    #[clap(short = 'b', long, value_enum, default_value = "bicgstab")]
    bottom: Bottom,

    /// Solve with GMRES preconditioned by multigrid
    #[clap(long)]
    gmres: bool,

    /// CBOR file of solver settings; command-line options override it
    #[clap(short = 'c', long)]
    config: Option<String>,

    #[clap(short = 'v', long, default_value = "1")]
    verbose: usize,
}




fn exact(x: [f64; 3]) -> f64 {
    (PI * x[0]).sin() * (PI * x[1]).sin()
}

fn solve(n: i64, opts: &Opts, config: &SolverConfig) -> Result<f64, Error> {
    let geom = Geometry::new(domain_box([n, n, 1], 2), [0.0; 3], [1.0; 3], [false; 3], 2);
    let ba = BoxArray::from_box(geom.domain().clone()).max_size([opts.max_grid_size, opts.max_grid_size, 1]);
    let dm = DistributionMapping::round_robin(&ba, 1);

    let mut op = MLABecLaplacian::new_poisson(&[geom.clone()], &[ba.clone()], &[dm.clone()], config.linop.clone())?;
    op.set_level_bc(0, None)?;

    let mut rhs = MultiFab::new(&ba, &dm, 1, [0; 3]);
    let mut sol = MultiFab::new(&ba, &dm, 1, [0; 3]);

    for i in 0..rhs.len() {
        for iv in ba.get(i).iter() {
            rhs.fab_mut(i).set(iv, 0, -2.0 * PI * PI * exact(geom.cell_center(iv)));
        }
    }

    let mut mlmg = MLMG::with_config(&mut op, config.mlmg.clone());
    let start = std::time::Instant::now();

    let result = if opts.gmres {
        GMRESMLMG::with_config(&mut mlmg, config.gmres.clone()).solve(&mut sol, &rhs, opts.tol_rel, 0.0)?
    } else {
        mlmg.solve(std::slice::from_mut(&mut sol), std::slice::from_ref(&rhs), opts.tol_rel, 0.0)?
    };
    let elapsed = start.elapsed().as_secs_f64();

    let mut error: f64 = 0.0;

    for i in 0..sol.len() {
        for iv in ba.get(i).iter() {
            error = error.max((sol.fab(i).get(iv, 0) - exact(geom.cell_center(iv))).abs());
        }
    }
    info!(
        "n = {:4} iterations = {:3} converged = {} time = {:.3}s max error = {:.4e}",
        n, result.iterations, result.converged, elapsed, error
    );
    Ok(error)
}




// ============================================================================
fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    SimpleLogger::new()
        .with_level(if opts.verbose >= 2 { LevelFilter::Debug } else { LevelFilter::Info })
        .init()
        .map_err(|e| Error::Config(e.to_string()))?;

    let mut config = match &opts.config {
        Some(path) => SolverConfig::load(path)?,
        None => SolverConfig::default(),
    };
    config.mlmg.verbose = opts.verbose;
    config.gmres.verbose = opts.verbose;
    config.mlmg.bottom_solver = match opts.bottom {
        Bottom::Smoother => BottomSolver::Smoother,
        Bottom::Cg => BottomSolver::CG,
        Bottom::Bicgstab => BottomSolver::BiCGStab,
    };
    info!("{:?}", opts);

    let mut previous: Option<f64> = None;

    for level in 0..opts.resolutions {
        let n = opts.base << level;
        let error = solve(n, &opts, &config)?;

        if let Some(coarse) = previous {
            println!("{:5} {:.6e} rate = {:.3}", n, error, (coarse / error).log2());
        } else {
            println!("{:5} {:.6e}", n, error);
        }
        previous = Some(error);
    }
    Ok(())
}

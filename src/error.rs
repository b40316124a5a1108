use std::error;
use std::fmt;




#[derive(Debug, Clone, PartialEq)]

/**
 * Error to represent a violated usage contract at one of the solver's entry
 * points. Numerical non-convergence is not an error; it is reported through
 * the solver's return values.
 */
pub enum Error {
    /// An operation is not implemented by the object it was asked of.
    Unsupported(&'static str),

    /// A field was defined on a BoxArray / DistributionMapping which is not
    /// the one the object was built for.
    LayoutMismatch(&'static str),

    /// Boundary interpolation was requested at an order other than 1 or 3.
    InvalidMaxOrder(usize),

    /// Runge-Kutta dense output was requested for an order other than 3 or 4.
    InvalidRkOrder(usize),

    /// Runge-Kutta stage index out of range for the stored order.
    InvalidRkStage(usize),

    /// `fill_rk` was called before `store_rk_coarse_data`.
    MissingRkData,

    /// More than two coarse snapshots were offered for linear-in-time
    /// interpolation.
    HighOrderTimeInterp,

    /// A requested time did not match any stored snapshot and could not be
    /// interpolated.
    TimeMismatch(f64),

    /// A tridiagonal line exceeds the supported length.
    LineTooLong(usize),

    /// The refinement ratio is not supported by an interpolation scheme.
    InvalidRatio(i64),

    /// Invalid argument at an API boundary.
    InvalidArgument(String),

    /// Settings could not be read or written.
    Config(String),
}




// ============================================================================
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            Unsupported(what) => write!(fmt, "{} is not supported", what),
            LayoutMismatch(what) => write!(fmt, "layout mismatch: {}", what),
            InvalidMaxOrder(order) => write!(fmt, "boundary interpolation order {} is not supported (use 1 or 3)", order),
            InvalidRkOrder(order) => write!(fmt, "Runge-Kutta order {} is not supported (use 3 or 4)", order),
            InvalidRkStage(stage) => write!(fmt, "Runge-Kutta stage {} is out of range", stage),
            MissingRkData => write!(fmt, "fill_rk called before store_rk_coarse_data"),
            HighOrderTimeInterp => write!(fmt, "High order interpolation in time not supported. Or FillPatcher was not properly deleted."),
            TimeMismatch(t) => write!(fmt, "no coarse data available for time {}", t),
            LineTooLong(n) => write!(fmt, "tridiagonal line solve supports at most 32 cells, got {}", n),
            InvalidRatio(r) => write!(fmt, "refinement ratio {} is not supported", r),
            InvalidArgument(msg) => write!(fmt, "invalid argument: {}", msg),
            Config(msg) => write!(fmt, "configuration: {}", msg),
        }
    }
}

impl error::Error for Error {}

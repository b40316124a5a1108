//! Gridiron-MLMG is a geometric multigrid library for elliptic problems on
//! block-structured adaptive meshes. A level is a set of rectangular boxes
//! (`BoxArray`) holding multi-component fields (`MultiFab`); a hierarchy of
//! such levels is refined by integer ratios. On top of this substrate the
//! crate provides coarse-to-fine interpolation schemes, boundary registers
//! for coarse/fine and physical boundaries, a ghost-zone filler with linear
//! and Runge-Kutta time interpolation, cell- and node-centered multigrid
//! operators, and the `MLMG` and `GMRESMLMG` solvers.

pub mod bc;
pub mod bndry;
pub mod box_array;
pub mod config;
pub mod error;
pub mod fab;
pub mod fill_patch;
pub mod geometry;
pub mod gmres;
pub mod index_space;
pub mod interp;
pub mod linop;
pub mod message;
pub mod mlmg;
pub mod multifab;

pub use error::Error;
pub use gmres::GMRESMLMG;
pub use linop::{MLABecLaplacian, MLLinOp, MLNodeFdLaplacian};
pub use mlmg::MLMG;

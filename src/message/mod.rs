//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv` operations for a given transport layer (in-process serial and
//! thread-group transports are included). The trait then provides default
//! implementations for broadcast, reduce, and reduce-all operations, which
//! the solvers use for norms, dot products, and agreement on multigrid
//! coarsening depth.
//!

pub mod comm;
pub mod local;
pub mod util;

pub use comm::{Communicator, ReduceOp};
pub use local::{SerialCommunicator, ThreadCommunicator};

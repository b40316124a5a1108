use serde::{Deserialize, Serialize};
use super::util;

/// Commutative reduction operators over `f64` values.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

impl ReduceOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// Interface for a group of processes that can exchange messages. The
/// underlying transport can in principle be TCP, UDP, in-process channels, or
/// a higher level abstraction like MPI. All collective operations must be
/// called in the same order on every rank.
///
pub trait Communicator: Send + Sync {
    /// This rank's index within the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Deliver a message to `rank`. Never waits for the matching `recv`.
    fn send(&self, rank: usize, message: Vec<u8>);

    /// Take the next message addressed to this rank, blocking until one
    /// arrives.
    fn recv(&self) -> Vec<u8>;

    /// Binomial-tree broadcast from rank 0, which passes `Some(bytes)`;
    /// every other rank passes `None` and gets the root's bytes back.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Vec<u8> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(),
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, value.clone())
            }
        }
        value
    }

    /// Binomial-tree fold towards rank 0, the only rank that gets `Some`.
    ///
    fn reduce(&self, f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>, mut value: Vec<u8>) -> Option<Vec<u8>> {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv())
                }
            } else {
                self.send(r - one, value);
                return None;
            }
        }
        Some(value)
    }

    /// Fold `value` over all ranks with a commutative `f`, and hand the
    /// result to every rank.
    ///
    fn all_reduce(&self, f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>, value: Vec<u8>) -> Vec<u8> {
        self.broadcast(self.reduce(f, value))
    }

    /// Reduce a single `f64` across all ranks.
    ///
    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> f64 {
        if self.size() == 1 {
            return value;
        }
        let f = move |a: Vec<u8>, b: Vec<u8>| {
            util::f64_to_bytes(op.apply(util::f64_from_bytes(&a), util::f64_from_bytes(&b)))
        };
        util::f64_from_bytes(&self.all_reduce(&f, util::f64_to_bytes(value)))
    }
}

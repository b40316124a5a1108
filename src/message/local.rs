use crossbeam_channel::{unbounded, Receiver, Sender};
use super::comm::Communicator;

/// A communicator of size one. Collective operations return their input
/// unchanged.
///
pub struct SerialCommunicator {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl SerialCommunicator {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl Default for SerialCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        assert_eq!(rank, 0, "serial communicator has a single rank");
        self.sender.send(message).ok();
    }

    fn recv(&self) -> Vec<u8> {
        self.receiver.recv().unwrap_or_default()
    }
}

/// A communicator whose peers are threads in the same process, connected by
/// crossbeam channels. Build a group with `ThreadCommunicator::group` and
/// move one member into each thread.
///
pub struct ThreadCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    receiver: Receiver<Vec<u8>>,
}

impl ThreadCommunicator {
    /// Create `size` connected communicators, one per rank.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                peers: senders.clone(),
                receiver,
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.peers[rank].send(message).ok();
    }

    fn recv(&self) -> Vec<u8> {
        self.receiver.recv().unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::comm::ReduceOp;
    use std::thread;

    #[test]
    fn serial_all_reduce_is_identity() {
        let comm = SerialCommunicator::new();
        assert_eq!(comm.all_reduce_f64(3.5, ReduceOp::Sum), 3.5);
    }

    #[test]
    fn thread_group_reduces_and_broadcasts() {
        for size in [2, 3, 5, 8] {
            let handles: Vec<_> = ThreadCommunicator::group(size)
                .into_iter()
                .map(|comm| {
                    thread::spawn(move || {
                        let r = comm.rank() as f64;
                        let sum = comm.all_reduce_f64(r, ReduceOp::Sum);
                        let min = comm.all_reduce_f64(r + 1.0, ReduceOp::Min);
                        let max = comm.all_reduce_f64(r, ReduceOp::Max);
                        (sum, min, max)
                    })
                })
                .collect();

            let expected_sum = (0..size).sum::<usize>() as f64;

            for h in handles {
                let (sum, min, max) = h.join().unwrap();
                assert_eq!(sum, expected_sum);
                assert_eq!(min, 1.0);
                assert_eq!(max, (size - 1) as f64);
            }
        }
    }
}

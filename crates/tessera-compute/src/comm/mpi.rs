//! MPI-backed worker world, one process per rank.
//!
//! Requires the `distributed` feature and an MPI installation. The caller
//! initialises MPI and keeps the universe alive for the whole run:
//!
//! ```ignore
//! let universe = mpi::initialize().ok_or_else(|| anyhow!("MPI init failed"))?;
//! let backend = DistributedBackend::with_launcher(MpiWorld);
//! ```
//!
//! Values are encoded with `bincode` and travel as byte messages. Every
//! process runs the same closure; the root's result is broadcast so all
//! ranks return the same value from [`Launcher::launch`].

use std::cell::RefCell;
use std::collections::VecDeque;

use log::debug;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, Destination, Source};

use super::{CommError, Communicator, Launcher, Tag, Wire, ROOT};

fn tag_code(tag: Tag) -> i32 {
    match tag {
        Tag::Broadcast => 1,
        Tag::Scatter => 2,
        Tag::Gather => 3,
        Tag::Reduce => 4,
        Tag::Barrier => 5,
        Tag::HaloUp => 6,
        Tag::HaloDown => 7,
        Tag::User(n) => i32::try_from(n).map_or(i32::MAX, |n| n.saturating_add(100)),
    }
}

fn encode<T: Wire>(peer: usize, tag: Tag, value: &T) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(|err| CommError::Encoding {
        peer,
        tag,
        reason: err.to_string(),
    })
}

fn decode<T: Wire>(peer: usize, tag: Tag, bytes: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(|err| CommError::Encoding {
        peer,
        tag,
        reason: err.to_string(),
    })
}

/// One process's endpoint into the MPI world communicator.
pub struct MpiComm {
    world: SimpleCommunicator,
    /// Messages this rank sent to itself.
    loopback: RefCell<VecDeque<(Tag, Vec<u8>)>>,
}

impl MpiComm {
    /// Wrap the world communicator. MPI must already be initialised.
    pub fn new() -> Self {
        Self {
            world: SimpleCommunicator::world(),
            loopback: RefCell::new(VecDeque::new()),
        }
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn send<T: Wire>(&self, dest: usize, tag: Tag, value: T) -> Result<(), CommError> {
        self.check_rank(dest)?;
        let bytes = encode(dest, tag, &value)?;
        if dest == self.rank() {
            self.loopback.borrow_mut().push_back((tag, bytes));
            return Ok(());
        }
        self.world
            .process_at_rank(dest as i32)
            .send_with_tag(&bytes[..], tag_code(tag));
        Ok(())
    }

    fn recv<T: Wire>(&self, source: usize, tag: Tag) -> Result<T, CommError> {
        self.check_rank(source)?;
        if source == self.rank() {
            let mut loopback = self.loopback.borrow_mut();
            let pos = loopback
                .iter()
                .position(|(sent, _)| *sent == tag)
                .ok_or(CommError::Disconnected { peer: source })?;
            let (_, bytes) = loopback
                .remove(pos)
                .ok_or(CommError::Disconnected { peer: source })?;
            return decode(source, tag, &bytes);
        }
        let (bytes, _status) = self
            .world
            .process_at_rank(source as i32)
            .receive_vec_with_tag::<u8>(tag_code(tag));
        decode(source, tag, &bytes)
    }

    /// Posts the send without blocking, then receives, so paired exchanges
    /// complete even when the transport does not buffer the message.
    fn sendrecv<S: Wire, R: Wire>(
        &self,
        value: S,
        dest: usize,
        send_tag: Tag,
        source: usize,
        recv_tag: Tag,
    ) -> Result<R, CommError> {
        self.check_rank(dest)?;
        self.check_rank(source)?;
        if dest == self.rank() || source == self.rank() {
            self.send(dest, send_tag, value)?;
            return self.recv(source, recv_tag);
        }
        let bytes = encode(dest, send_tag, &value)?;
        let received = mpi::request::scope(|scope| {
            let request = self
                .world
                .process_at_rank(dest as i32)
                .immediate_send_with_tag(scope, &bytes[..], tag_code(send_tag));
            let (received, _status) = self
                .world
                .process_at_rank(source as i32)
                .receive_vec_with_tag::<u8>(tag_code(recv_tag));
            request.wait();
            received
        });
        decode(source, recv_tag, &received)
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }

    fn abort(&self) {
        self.world.abort(1)
    }
}

/// Launches the closure on every process of the MPI world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MpiWorld;

impl Launcher for MpiWorld {
    type Comm = MpiComm;

    fn workers(&self) -> usize {
        SimpleCommunicator::world().size() as usize
    }

    fn launch<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Wire + Clone,
        E: From<CommError> + Send,
        F: Fn(&MpiComm) -> Result<Option<T>, E> + Sync,
    {
        let comm = MpiComm::new();
        let mut result = match work(&comm) {
            Ok(result) => result,
            Err(err) => {
                debug!("Worker {} failed, aborting the world", comm.rank());
                comm.abort();
                return Err(err);
            }
        };
        comm.broadcast(ROOT, &mut result)?;
        result.ok_or_else(|| CommError::MissingResult { rank: ROOT }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_map_to_distinct_codes() {
        let tags = [
            Tag::Broadcast,
            Tag::Scatter,
            Tag::Gather,
            Tag::Reduce,
            Tag::Barrier,
            Tag::HaloUp,
            Tag::HaloDown,
            Tag::User(0),
            Tag::User(7),
        ];
        let mut codes: Vec<i32> = tags.iter().map(|&tag| tag_code(tag)).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), tags.len());
        assert_eq!(tag_code(Tag::User(u32::MAX)), i32::MAX);
    }

    #[test]
    fn test_encoding_round_trips_payloads() {
        let rows = vec![1.5f64, -2.0, 3.25];
        let bytes = encode(1, Tag::HaloUp, &rows).unwrap();
        let back: Vec<f64> = decode(1, Tag::HaloUp, &bytes).unwrap();
        assert_eq!(back, rows);

        let truncated = decode::<Vec<f64>>(1, Tag::HaloUp, &bytes[..3]);
        assert!(matches!(truncated, Err(CommError::Encoding { peer: 1, .. })));
    }
}

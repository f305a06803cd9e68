//! Message-passing runtime shared by the multi-worker backends.
//!
//! [`Communicator`] is one worker's endpoint: point-to-point `send`/`recv`
//! matched on `(source, tag)`, plus rooted collectives built on top of
//! them. [`Launcher`] starts a set of workers and hands each its endpoint.
//!
//! Two implementations are provided:
//!
//! - [`World`] / [`ThreadComm`]: scoped threads in one process, values moved
//!   through channels. Always available and the default for every backend.
//! - `MpiWorld` / `MpiComm`: one MPI process per rank, values encoded with
//!   `bincode`. Requires the `distributed` feature and an MPI installation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[cfg(feature = "distributed")]
pub mod mpi;
pub mod thread;

#[cfg(feature = "distributed")]
pub use self::mpi::{MpiComm, MpiWorld};
pub use thread::{ThreadComm, World};

/// Rank that owns input and output in rooted collectives.
pub const ROOT: usize = 0;

/// Message tags. Each collective uses its own tag so user traffic can
/// never be mistaken for collective traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Broadcast,
    Scatter,
    Gather,
    Reduce,
    Barrier,
    /// Rows travelling to a lower-ranked worker, which stores them below
    /// its owned block.
    HaloUp,
    /// Rows travelling to a higher-ranked worker, which stores them above
    /// its owned block.
    HaloDown,
    User(u32),
}

/// Communication failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommError {
    #[error("Aborted because worker {origin} failed")]
    Aborted { origin: usize },

    #[error("Message from worker {peer} with tag {tag:?} is not a {expected}")]
    PayloadMismatch {
        peer: usize,
        tag: Tag,
        expected: &'static str,
    },

    #[error("Failed to encode or decode a message for worker {peer} with tag {tag:?}: {reason}")]
    Encoding { peer: usize, tag: Tag, reason: String },

    #[error("Expected {expected} elements involving worker {peer}, got {actual}")]
    LengthMismatch {
        peer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Worker {peer} disconnected")]
    Disconnected { peer: usize },

    #[error("Invalid rank {rank} in a world of {size} workers")]
    InvalidRank { rank: usize, size: usize },

    #[error("A world needs at least one worker")]
    EmptyWorld,

    #[error("Worker {rank} panicked")]
    Panicked { rank: usize },

    #[error("Worker {rank} finished without producing its result")]
    MissingResult { rank: usize },
}

/// A value that can cross a worker boundary, by move or by encoding.
pub trait Wire: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Wire for T {}

/// One worker's endpoint into a world of `size()` workers.
///
/// Implementors supply point-to-point messaging and `abort`; the
/// collectives have default implementations rooted at a single rank.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Send `value` to `dest`.
    fn send<T: Wire>(&self, dest: usize, tag: Tag, value: T) -> Result<(), CommError>;

    /// Block until a message with `tag` arrives from `source`.
    fn recv<T: Wire>(&self, source: usize, tag: Tag) -> Result<T, CommError>;

    /// Tell every other worker to stop.
    fn abort(&self);

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    fn check_rank(&self, rank: usize) -> Result<(), CommError> {
        if rank >= self.size() {
            return Err(CommError::InvalidRank {
                rank,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Send to `dest` and receive from `source` in one step. Pairs of
    /// workers calling this against each other must not deadlock.
    fn sendrecv<S: Wire, R: Wire>(
        &self,
        value: S,
        dest: usize,
        send_tag: Tag,
        source: usize,
        recv_tag: Tag,
    ) -> Result<R, CommError> {
        self.send(dest, send_tag, value)?;
        self.recv(source, recv_tag)
    }

    /// Block until every worker has reached the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        if self.is_root() {
            for peer in others(self.size(), ROOT) {
                self.recv::<()>(peer, Tag::Barrier)?;
            }
            for peer in others(self.size(), ROOT) {
                self.send(peer, Tag::Barrier, ())?;
            }
        } else {
            self.send(ROOT, Tag::Barrier, ())?;
            self.recv::<()>(ROOT, Tag::Barrier)?;
        }
        Ok(())
    }

    /// Replace `value` on every worker with the value held by `root`.
    fn broadcast<T: Wire + Clone>(&self, root: usize, value: &mut T) -> Result<(), CommError> {
        self.check_rank(root)?;
        if self.rank() == root {
            for peer in others(self.size(), root) {
                self.send(peer, Tag::Broadcast, value.clone())?;
            }
        } else {
            *value = self.recv(root, Tag::Broadcast)?;
        }
        Ok(())
    }

    /// Distribute one chunk per rank from `root`. Only `root` supplies
    /// `chunks`, which must hold exactly `size()` entries in rank order.
    fn scatterv<T: Wire>(
        &self,
        root: usize,
        chunks: Option<Vec<Vec<T>>>,
    ) -> Result<Vec<T>, CommError> {
        self.check_rank(root)?;
        if self.rank() != root {
            return self.recv(root, Tag::Scatter);
        }
        let chunks = chunks.unwrap_or_default();
        if chunks.len() != self.size() {
            return Err(CommError::LengthMismatch {
                peer: root,
                expected: self.size(),
                actual: chunks.len(),
            });
        }
        let mut own = Vec::new();
        for (dest, chunk) in chunks.into_iter().enumerate() {
            if dest == root {
                own = chunk;
            } else {
                self.send(dest, Tag::Scatter, chunk)?;
            }
        }
        Ok(own)
    }

    /// Collect every rank's chunk on `root`, in rank order. Other ranks get
    /// `None`.
    fn gatherv<T: Wire>(
        &self,
        root: usize,
        local: Vec<T>,
    ) -> Result<Option<Vec<Vec<T>>>, CommError> {
        self.check_rank(root)?;
        if self.rank() != root {
            self.send(root, Tag::Gather, local)?;
            return Ok(None);
        }
        let mut local = Some(local);
        let mut parts = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            if peer == root {
                parts.push(local.take().unwrap_or_default());
            } else {
                parts.push(self.recv(peer, Tag::Gather)?);
            }
        }
        Ok(Some(parts))
    }

    /// Fold every worker's `value` with `op` in rank order and give the
    /// result to all workers.
    fn allreduce<T, F>(&self, value: T, op: F) -> Result<T, CommError>
    where
        T: Wire + Clone,
        F: Fn(T, T) -> T,
    {
        if self.is_root() {
            let mut acc = value;
            for peer in others(self.size(), ROOT) {
                acc = op(acc, self.recv(peer, Tag::Reduce)?);
            }
            for peer in others(self.size(), ROOT) {
                self.send(peer, Tag::Reduce, acc.clone())?;
            }
            Ok(acc)
        } else {
            self.send(ROOT, Tag::Reduce, value)?;
            self.recv(ROOT, Tag::Reduce)
        }
    }
}

fn others(size: usize, root: usize) -> impl Iterator<Item = usize> {
    (0..size).filter(move |&peer| peer != root)
}

/// Starts a world of workers and returns the root's result.
pub trait Launcher: Send + Sync {
    type Comm: Communicator;

    /// Number of workers each launch starts.
    fn workers(&self) -> usize;

    /// Run `work` on every worker. The root must return `Some`; other ranks
    /// return `None`. On success every caller receives the root's value.
    ///
    /// If any worker fails, the others are aborted and the error of the
    /// worker that failed first is returned.
    fn launch<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Wire + Clone,
        E: From<CommError> + Send,
        F: Fn(&Self::Comm) -> Result<Option<T>, E> + Sync;
}

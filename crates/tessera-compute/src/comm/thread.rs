//! In-process worker world.
//!
//! [`World`] spawns one scoped thread per rank and hands each a
//! [`ThreadComm`]. Workers share no memory: every value crosses ranks by
//! move through an unbounded channel, so a send never blocks and paired
//! send/receive exchanges cannot deadlock.
//!
//! Messages are matched on `(source, tag)` and delivered in the order each
//! source sent them. Messages that arrive for a different `(source, tag)`
//! are parked until a matching receive asks for them.
//!
//! If a worker returns an error or panics it broadcasts an abort signal.
//! Any peer blocked in (or later entering) a receive then fails with
//! [`CommError::Aborted`], and [`World::run`] reports the error of the
//! worker that failed first rather than the aborts it caused.

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

use super::{CommError, Communicator, Launcher, Tag, Wire, ROOT};

struct Message {
    from: usize,
    tag: Tag,
    payload: Box<dyn Any + Send>,
}

enum Envelope {
    Message(Message),
    Abort { origin: usize },
}

/// One thread's endpoint into an in-process world.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    /// Senders to every other rank; `None` at our own rank.
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    pending: RefCell<VecDeque<Message>>,
    aborted_by: Cell<Option<usize>>,
}

impl ThreadComm {
    fn world(size: usize) -> Vec<Self> {
        let (senders, inboxes): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
            (0..size).map(|_| unbounded()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank,
                size,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
                pending: RefCell::new(VecDeque::new()),
                aborted_by: Cell::new(None),
            })
            .collect()
    }

    /// Drain the inbox without blocking, recording any abort signal.
    fn poll_abort(&self) -> Option<usize> {
        while let Ok(envelope) = self.inbox.try_recv() {
            match envelope {
                Envelope::Message(message) => self.pending.borrow_mut().push_back(message),
                Envelope::Abort { origin } => {
                    if self.aborted_by.get().is_none() {
                        self.aborted_by.set(Some(origin));
                    }
                }
            }
        }
        self.aborted_by.get()
    }

    fn next_message(&self, from: usize, tag: Tag) -> Result<Message, CommError> {
        if let Some(origin) = self.aborted_by.get() {
            return Err(CommError::Aborted { origin });
        }
        {
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(|m| m.from == from && m.tag == tag) {
                if let Some(message) = pending.remove(pos) {
                    return Ok(message);
                }
            }
        }
        loop {
            match self.inbox.recv() {
                Ok(Envelope::Message(message)) if message.from == from && message.tag == tag => {
                    return Ok(message)
                }
                Ok(Envelope::Message(message)) => self.pending.borrow_mut().push_back(message),
                Ok(Envelope::Abort { origin }) => {
                    self.aborted_by.set(Some(origin));
                    return Err(CommError::Aborted { origin });
                }
                Err(_) => return Err(CommError::Disconnected { peer: from }),
            }
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    /// Never blocks.
    fn send<T: Wire>(&self, dest: usize, tag: Tag, value: T) -> Result<(), CommError> {
        self.check_rank(dest)?;
        if let Some(origin) = self.aborted_by.get() {
            return Err(CommError::Aborted { origin });
        }
        let message = Message {
            from: self.rank,
            tag,
            payload: Box::new(value),
        };
        match &self.peers[dest] {
            None => {
                self.pending.borrow_mut().push_back(message);
                Ok(())
            }
            Some(tx) => tx.send(Envelope::Message(message)).map_err(|_| {
                match self.poll_abort() {
                    Some(origin) => CommError::Aborted { origin },
                    None => CommError::Disconnected { peer: dest },
                }
            }),
        }
    }

    fn recv<T: Wire>(&self, source: usize, tag: Tag) -> Result<T, CommError> {
        self.check_rank(source)?;
        let message = self.next_message(source, tag)?;
        message
            .payload
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| CommError::PayloadMismatch {
                peer: source,
                tag,
                expected: type_name::<T>(),
            })
    }

    fn abort(&self) {
        for tx in self.peers.iter().flatten() {
            // A peer that already exited needs no signal.
            let _ = tx.send(Envelope::Abort { origin: self.rank });
        }
    }
}

/// Launches workers as scoped threads in the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct World {
    workers: usize,
}

impl World {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Run `work` on `size` workers and collect their results in rank order.
    ///
    /// Returns the first (lowest-rank) error that was not itself caused by
    /// another worker's abort.
    pub fn run<T, E, F>(size: usize, work: F) -> Result<Vec<T>, E>
    where
        F: Fn(&ThreadComm) -> Result<T, E> + Sync,
        T: Send,
        E: From<CommError> + Send,
    {
        if size == 0 {
            return Err(CommError::EmptyWorld.into());
        }
        debug!("Starting world of {size} workers");

        let outcomes: Vec<(Result<T, E>, bool)> = thread::scope(|scope| {
            let handles: Vec<_> = ThreadComm::world(size)
                .into_iter()
                .map(|comm| {
                    let work = &work;
                    scope.spawn(move || run_worker(comm, work))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| (Err(CommError::Panicked { rank }.into()), false))
                })
                .collect()
        });

        let mut values = Vec::with_capacity(size);
        let mut secondary = None;
        for (result, aborted) in outcomes {
            match result {
                Ok(value) => values.push(value),
                Err(err) if !aborted => return Err(err),
                Err(err) => {
                    secondary.get_or_insert(err);
                }
            }
        }
        match secondary {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}

impl Launcher for World {
    type Comm = ThreadComm;

    fn workers(&self) -> usize {
        self.workers
    }

    fn launch<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Wire + Clone,
        E: From<CommError> + Send,
        F: Fn(&ThreadComm) -> Result<Option<T>, E> + Sync,
    {
        World::run(self.workers, work)?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| CommError::MissingResult { rank: ROOT }.into())
    }
}

/// Returns the worker's result and whether it failed because of a peer.
fn run_worker<T, E, F>(comm: ThreadComm, work: &F) -> (Result<T, E>, bool)
where
    F: Fn(&ThreadComm) -> Result<T, E>,
    E: From<CommError>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| work(&comm)))
        .unwrap_or_else(|_| Err(CommError::Panicked { rank: comm.rank }.into()));
    if result.is_ok() {
        return (result, false);
    }
    let aborted = comm.poll_abort().is_some();
    if !aborted {
        debug!("Worker {} failed, aborting the world", comm.rank);
        comm.abort();
    }
    (result, aborted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_sendrecv() {
        let received: Vec<usize> = World::run(5, |comm| {
            let n = comm.size();
            let right = (comm.rank() + 1) % n;
            let left = (comm.rank() + n - 1) % n;
            comm.sendrecv(comm.rank(), right, Tag::User(1), left, Tag::User(1))
        })
        .unwrap();
        assert_eq!(received, vec![4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_out_of_order_tags_are_matched() {
        let got: Vec<(u8, u8)> = World::run(2, |comm| -> Result<_, CommError> {
            if comm.rank() == 0 {
                comm.send(1, Tag::User(1), 10u8)?;
                comm.send(1, Tag::User(2), 20u8)?;
                Ok((0, 0))
            } else {
                let b: u8 = comm.recv(0, Tag::User(2))?;
                let a: u8 = comm.recv(0, Tag::User(1))?;
                Ok((a, b))
            }
        })
        .unwrap();
        assert_eq!(got[1], (10, 20));
    }

    #[test]
    fn test_collectives() {
        type Collected = (String, Vec<u32>, usize, f64);
        let results: Vec<Collected> = World::run(4, |comm| -> Result<_, CommError> {
            let mut greeting = String::new();
            if comm.is_root() {
                greeting = "hello".to_string();
            }
            comm.broadcast(ROOT, &mut greeting)?;

            let chunks = comm
                .is_root()
                .then(|| (0..4u32).map(|r| vec![r; r as usize + 1]).collect());
            let mine = comm.scatterv(ROOT, chunks)?;

            let sum = comm.allreduce(comm.rank(), |a, b| a + b)?;
            let max = comm.allreduce(comm.rank() as f64 * 1.5, f64::max)?;
            comm.barrier()?;
            Ok((greeting, mine, sum, max))
        })
        .unwrap();

        for (rank, (greeting, mine, sum, max)) in results.into_iter().enumerate() {
            assert_eq!(greeting, "hello");
            assert_eq!(mine, vec![rank as u32; rank + 1]);
            assert_eq!(sum, 6);
            assert_eq!(max, 4.5);
        }
    }

    #[test]
    fn test_launch_returns_root_value() {
        let world = World::new(3);
        assert_eq!(world.workers(), 3);
        let total: usize = world
            .launch(|comm| -> Result<_, CommError> {
                let parts = comm.gatherv(ROOT, vec![comm.rank() + 1])?;
                Ok(parts.map(|parts| parts.into_iter().flatten().sum()))
            })
            .unwrap();
        assert_eq!(total, 6);

        let missing: Result<usize, CommError> = world.launch(|_| Ok(None));
        assert_eq!(missing, Err(CommError::MissingResult { rank: ROOT }));
    }

    #[test]
    fn test_gather_on_root_only() {
        let gathered: Vec<Option<Vec<Vec<usize>>>> =
            World::run(3, |comm| comm.gatherv(ROOT, vec![comm.rank() * 10])).unwrap();
        assert_eq!(gathered[0], Some(vec![vec![0], vec![10], vec![20]]));
        assert!(gathered[1].is_none() && gathered[2].is_none());
    }

    #[test]
    fn test_failure_aborts_blocked_peers() {
        let result: Result<Vec<()>, CommError> = World::run(4, |comm| {
            if comm.rank() == 2 {
                return Err(CommError::InvalidRank { rank: 99, size: 4 });
            }
            comm.barrier()
        });
        assert_eq!(result, Err(CommError::InvalidRank { rank: 99, size: 4 }));
    }

    #[test]
    fn test_panic_is_reported() {
        let result: Result<Vec<()>, CommError> = World::run(3, |comm| {
            if comm.rank() == 1 {
                panic!("worker blew up");
            }
            comm.barrier()
        });
        assert_eq!(result, Err(CommError::Panicked { rank: 1 }));
    }

    #[test]
    fn test_payload_type_mismatch() {
        let result: Result<Vec<()>, CommError> = World::run(2, |comm| {
            if comm.is_root() {
                comm.send(1, Tag::User(0), 1.0f64)
            } else {
                comm.recv::<u32>(0, Tag::User(0)).map(|_| ())
            }
        });
        assert!(matches!(
            result,
            Err(CommError::PayloadMismatch { peer: 0, tag: Tag::User(0), .. })
        ));
    }

    #[test]
    fn test_invalid_sizes_and_ranks() {
        let empty: Result<Vec<()>, CommError> = World::run(0, |_| Ok(()));
        assert_eq!(empty, Err(CommError::EmptyWorld));

        let bad: Result<Vec<()>, CommError> =
            World::run(1, |comm| comm.send(3, Tag::User(0), ()));
        assert_eq!(bad, Err(CommError::InvalidRank { rank: 3, size: 1 }));

        let single: Vec<usize> = World::run(1, |comm| comm.allreduce(7, |a, b| a + b)).unwrap();
        assert_eq!(single, vec![7]);
    }
}

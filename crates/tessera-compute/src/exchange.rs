//! Boundary (halo) exchange between partitions.
//!
//! Every ghost row mirrors one global row: the row `depth` above or below
//! the owned block, or the clamped edge row under [`EdgePolicy::Replicate`].
//! Ghost rows are fetched directly from whichever worker owns that row, so
//! a partition thinner than the halo depth draws rows from several
//! neighbors.
//!
//! The exchange runs in shifts. In shift `k` each worker pairs a send to
//! rank `r + k` with a receive from rank `r - k` (filling top ghosts), then
//! a send to `r - k` with a receive from `r + k` (filling bottom ghosts).
//! Both legs of a shift go through [`Communicator::sendrecv`], and a shift
//! with nothing to move for a pair costs no message.

use log::trace;
use tessera_core::{HaloBuffer, Partition};

use crate::backend::{ComputeError, WorkerContext};
use crate::comm::{CommError, Communicator, Tag, Wire};

/// What to put in a ghost block at the global top or bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Copy the nearest owned row into every ghost row.
    Replicate,
    /// Leave the ghost block untouched; the stencil pins edge cells itself.
    Fixed,
}

/// A ghost row and the global row it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GhostSlot {
    padded: usize,
    global: usize,
}

/// Ghost slots of `part` above and below its owned block. Slots past the
/// grid edge are dropped under [`EdgePolicy::Fixed`].
fn ghost_slots(part: &Partition, depth: usize, policy: EdgePolicy) -> [Vec<GhostSlot>; 2] {
    let clamp = policy == EdgePolicy::Replicate;
    let last = part.height - 1;
    let top = (0..depth)
        .filter_map(|i| {
            let global = match (part.start_row + i).checked_sub(depth) {
                Some(row) => row,
                None if clamp => 0,
                None => return None,
            };
            Some(GhostSlot { padded: i, global })
        })
        .collect();
    let bottom = (0..depth)
        .filter_map(|j| {
            let row = part.end_row() + j;
            let global = if row <= last {
                row
            } else if clamp {
                last
            } else {
                return None;
            };
            Some(GhostSlot {
                padded: depth + part.local_rows + j,
                global,
            })
        })
        .collect();
    [top, bottom]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Top = 0,
    Bottom = 1,
}

/// Refresh both ghost blocks of `buffer` from the workers owning the rows
/// they mirror.
///
/// Owned rows are never modified.
pub fn exchange_halos<C, T>(
    comm: &C,
    partition: &Partition,
    buffer: &mut HaloBuffer<T>,
    policy: EdgePolicy,
) -> Result<(), ComputeError>
where
    C: Communicator,
    T: Wire + Clone,
{
    let rank = comm.rank();
    let depth = buffer.depth();
    if depth == 0 {
        return Ok(());
    }
    let halo = Halo {
        comm,
        partition,
        policy,
        slots: ghost_slots(partition, depth, policy),
    };

    for slot in halo.slots.iter().flatten().filter(|slot| partition.owns(slot.global)) {
        let from = depth + slot.global - partition.start_row;
        buffer.copy_row(from, slot.padded);
    }

    let mut received = 0;
    for offset in 1..partition.workers {
        let down = (rank + offset < partition.workers).then(|| rank + offset);
        let up = rank.checked_sub(offset);
        received += halo.shift(buffer, down, up, Side::Top)?;
        received += halo.shift(buffer, up, down, Side::Bottom)?;
    }

    trace!("Worker {rank} exchanged halos of depth {depth} ({received} rows received)");
    Ok(())
}

struct Halo<'a, C> {
    comm: &'a C,
    partition: &'a Partition,
    policy: EdgePolicy,
    slots: [Vec<GhostSlot>; 2],
}

impl<C: Communicator> Halo<'_, C> {
    /// One leg of a shift: send `dest` the rows it mirrors on `side` that
    /// this worker owns, and receive the rows this worker mirrors on `side`
    /// that `source` owns. Returns the number of rows received.
    fn shift<T: Wire + Clone>(
        &self,
        buffer: &mut HaloBuffer<T>,
        dest: Option<usize>,
        source: Option<usize>,
        side: Side,
    ) -> Result<usize, ComputeError> {
        let part = self.partition;
        let rank = self.comm.rank();
        let width = buffer.width();
        let tag = match side {
            Side::Top => Tag::HaloDown,
            Side::Bottom => Tag::HaloUp,
        };

        let outgoing = match dest {
            Some(dest) => {
                let peer = Partition::new(part.height, part.workers, dest)?;
                let wanted = &ghost_slots(&peer, buffer.depth(), self.policy)[side as usize];
                let rows: Vec<T> = wanted
                    .iter()
                    .filter(|slot| part.owns(slot.global))
                    .flat_map(|slot| buffer.owned_row(slot.global - part.start_row).iter().cloned())
                    .collect();
                (!rows.is_empty()).then_some((dest, rows))
            }
            None => None,
        };
        let incoming = source.and_then(|source| {
            let targets: Vec<usize> = self.slots[side as usize]
                .iter()
                .filter(|slot| part.owner_of(slot.global) == Some(source))
                .map(|slot| slot.padded)
                .collect();
            (!targets.is_empty()).then_some((source, targets))
        });

        let (source, targets, rows): (usize, Vec<usize>, Vec<T>) = match (outgoing, incoming) {
            (Some((dest, payload)), Some((source, targets))) => {
                let rows = self
                    .comm
                    .sendrecv(payload, dest, tag, source, tag)
                    .during(rank, "exchange halo rows")?;
                (source, targets, rows)
            }
            (Some((dest, payload)), None) => {
                self.comm.send(dest, tag, payload).during(rank, "send halo rows")?;
                return Ok(0);
            }
            (None, Some((source, targets))) => {
                let rows = self.comm.recv(source, tag).during(rank, "receive halo rows")?;
                (source, targets, rows)
            }
            (None, None) => return Ok(0),
        };

        if rows.len() != targets.len() * width {
            return Err(ComputeError::Communication {
                rank,
                operation: "receive halo rows",
                source: CommError::LengthMismatch {
                    peer: source,
                    expected: targets.len() * width,
                    actual: rows.len(),
                },
            });
        }
        for (&padded, row) in targets.iter().zip(rows.chunks(width)) {
            buffer.row_mut(padded).clone_from_slice(row);
        }
        Ok(targets.len())
    }
}

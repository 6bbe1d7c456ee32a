//! Collective sum reduction across cooperating processes.
//!
//! The reciprocal-space sum needs one blocking element-wise all-reduce per
//! call. [`SingleProcess`] is the identity for serial runs; [`ThreadGroup`]
//! runs the same collective between threads standing in for ranks.

use std::sync::{Arc, Barrier, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReductionError {
    #[error("rank {rank} contributed {actual} values, group is reducing {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        actual: usize,
    },
    #[error("reduction group state was poisoned by a panicking rank")]
    Poisoned,
    #[error("reduction group size must be >= 1")]
    EmptyGroup,
}

/// Blocking element-wise sum over every cooperating process.
///
/// All ranks must call [`SumReduction::sum_in_place`] the same number of
/// times or the group stalls. Unequal lengths within one call are reported
/// to every rank as [`ReductionError::LengthMismatch`].
pub trait SumReduction {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Replace `values` by the element-wise sum of every rank's `values`.
    fn sum_in_place(&mut self, values: &mut [f64]) -> Result<(), ReductionError>;

    /// Global total of a per-process count.
    fn sum_count(&mut self, local: usize) -> Result<usize, ReductionError> {
        let mut buffer = [local as f64];
        self.sum_in_place(&mut buffer)?;
        Ok(buffer[0].round() as usize)
    }
}

/// Reduction over a group of one: returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl SumReduction for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_in_place(&mut self, _values: &mut [f64]) -> Result<(), ReductionError> {
        Ok(())
    }
}

#[derive(Debug)]
struct GroupState {
    barrier: Barrier,
    /// Length announced by each rank for the current round.
    lengths: Mutex<Vec<usize>>,
    accumulator: Mutex<Vec<f64>>,
}

/// Factory for an in-process reduction group.
pub struct ThreadGroup;

impl ThreadGroup {
    /// One member per rank; move each into its own thread.
    pub fn new(size: usize) -> Result<Vec<GroupMember>, ReductionError> {
        if size == 0 {
            return Err(ReductionError::EmptyGroup);
        }
        let state = Arc::new(GroupState {
            barrier: Barrier::new(size),
            lengths: Mutex::new(vec![0; size]),
            accumulator: Mutex::new(Vec::new()),
        });
        Ok((0..size)
            .map(|rank| GroupMember {
                rank,
                size,
                state: Arc::clone(&state),
            })
            .collect())
    }
}

#[derive(Debug)]
pub struct GroupMember {
    rank: usize,
    size: usize,
    state: Arc<GroupState>,
}

impl SumReduction for GroupMember {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum_in_place(&mut self, values: &mut [f64]) -> Result<(), ReductionError> {
        self.agree_on_length(values.len())?;

        // contribute
        {
            let mut accumulator = self
                .state
                .accumulator
                .lock()
                .map_err(|_| ReductionError::Poisoned)?;
            if accumulator.is_empty() {
                accumulator.resize(values.len(), 0.0);
            }
            for (total, value) in accumulator.iter_mut().zip(values.iter()) {
                *total += *value;
            }
        }
        self.state.barrier.wait();

        // read back
        {
            let accumulator = self
                .state
                .accumulator
                .lock()
                .map_err(|_| ReductionError::Poisoned)?;
            values.copy_from_slice(&accumulator);
        }

        // reset for the next round once every rank has read
        if self.state.barrier.wait().is_leader() {
            self.state
                .accumulator
                .lock()
                .map_err(|_| ReductionError::Poisoned)?
                .clear();
        }
        self.state.barrier.wait();
        Ok(())
    }
}

impl GroupMember {
    /// Every rank announces its length and checks all others, so a mismatch
    /// fails the whole group at the same point instead of stalling it.
    fn agree_on_length(&self, len: usize) -> Result<(), ReductionError> {
        self.state
            .lengths
            .lock()
            .map_err(|_| ReductionError::Poisoned)?[self.rank] = len;
        self.state.barrier.wait();

        let mismatch = {
            let lengths = self
                .state
                .lengths
                .lock()
                .map_err(|_| ReductionError::Poisoned)?;
            let expected = lengths[0];
            lengths
                .iter()
                .position(|actual| *actual != expected)
                .map(|rank| ReductionError::LengthMismatch {
                    rank,
                    expected,
                    actual: lengths[rank],
                })
        };
        // nobody rewrites a slot until every rank has compared
        self.state.barrier.wait();
        mismatch.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::{ReductionError, SingleProcess, SumReduction, ThreadGroup};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_process_is_identity() {
        let mut reduction = SingleProcess;
        let mut values = [1.0, -2.5, 3.25];
        reduction.sum_in_place(&mut values).expect("identity");
        assert_eq!(values, [1.0, -2.5, 3.25]);
        assert_eq!(reduction.sum_count(17).expect("identity"), 17);
        assert_eq!(reduction.size(), 1);
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(ThreadGroup::new(0), Err(ReductionError::EmptyGroup)));
    }

    #[test]
    fn every_rank_receives_identical_totals_over_repeated_rounds() {
        let members = ThreadGroup::new(4).expect("group");
        let handles: Vec<_> = members
            .into_iter()
            .map(|mut member| {
                thread::spawn(move || {
                    let rank = member.rank() as f64;
                    let mut rounds = Vec::new();
                    for round in 0..3 {
                        let mut values = [rank, 1.0, round as f64 * rank];
                        member.sum_in_place(&mut values).expect("reduction");
                        rounds.push(values);
                    }
                    let count = member.sum_count(member.rank() + 1).expect("count");
                    (rounds, count)
                })
            })
            .collect();

        for handle in handles {
            let (rounds, count) = handle.join().expect("rank thread");
            for (round, values) in rounds.iter().enumerate() {
                assert_eq!(values[0], 6.0);
                assert_eq!(values[1], 4.0);
                assert_eq!(values[2], 6.0 * round as f64);
            }
            assert_eq!(count, 10);
        }
    }

    #[test]
    fn length_mismatch_fails_every_rank_even_when_the_odd_rank_arrives_first() {
        let members = ThreadGroup::new(3).expect("group");
        let handles: Vec<_> = members
            .into_iter()
            .map(|mut member| {
                thread::spawn(move || {
                    let mut values = if member.rank() == 0 {
                        vec![1.0, 2.0, 3.0]
                    } else {
                        thread::sleep(Duration::from_millis(200));
                        vec![1.0, 2.0]
                    };
                    let mismatch = member.sum_in_place(&mut values);

                    // the group stays usable after a rejected round
                    let mut follow_up = [1.0];
                    member.sum_in_place(&mut follow_up).expect("reduction");
                    (mismatch, follow_up[0])
                })
            })
            .collect();

        for handle in handles {
            let (mismatch, follow_up) = handle.join().expect("rank thread");
            assert_eq!(
                mismatch,
                Err(ReductionError::LengthMismatch {
                    rank: 1,
                    expected: 3,
                    actual: 2,
                })
            );
            assert_eq!(follow_up, 3.0);
        }
    }
}

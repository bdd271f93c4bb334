use std::collections::VecDeque;

use crate::job::{Job, JobDescriptor, JobId};

/// Ordered, exhaustible sequence of jobs waiting to be dispatched.
///
/// Jobs leave the queue strictly from the front, in the order they were
/// supplied. The queue never blocks and never errors.
#[derive(Clone, Debug)]
pub struct JobQueue<J> {
    pending: VecDeque<JobDescriptor<J>>,
    total: usize,
}

impl<J: Job> JobQueue<J> {
    /// Build a queue, assigning each job a fresh id and its zero-based sequence.
    pub fn new(jobs: impl IntoIterator<Item = J>) -> Self {
        let pending: VecDeque<_> = jobs
            .into_iter()
            .enumerate()
            .map(|(sequence, job)| JobDescriptor::new(sequence, job))
            .collect();
        let total = pending.len();
        Self { pending, total }
    }

    /// Number of jobs not yet dequeued.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of jobs the queue was built with.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Remove and return at most `n` jobs from the front, in order.
    pub fn take_up_to(&mut self, n: usize) -> Vec<JobDescriptor<J>> {
        let n = n.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Empty the queue, returning the ids of the jobs that were never taken.
    pub fn drain_ids(&mut self) -> Vec<JobId> {
        self.pending.drain(..).map(|job| job.id()).collect()
    }
}

impl<J: Job> FromIterator<J> for JobQueue<J> {
    fn from_iter<I: IntoIterator<Item = J>>(iter: I) -> Self {
        Self::new(iter)
    }
}

//! Space-shared cloudlet scheduler owned by each VM.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use simcore::EPSILON;

use crate::core::cloudlet::Cloudlet;

/// Space-shared execution of cloudlets on a VM's cores.
///
/// Each executing cloudlet exclusively holds its requested number of cores
/// and progresses at `mips_per_core * cores` MI per second. Cloudlets that
/// do not fit go to a FIFO waiting list and are pulled in order as cores
/// free up (entries that fit are admitted even if an earlier, larger entry
/// is still blocked).
pub struct CloudletScheduler {
    cores: u32,
    mips_per_core: u64,
    executing: Vec<Rc<RefCell<Cloudlet>>>,
    waiting: VecDeque<Rc<RefCell<Cloudlet>>>,
    last_update: f64,
}

impl CloudletScheduler {
    pub fn new(cores: u32, mips_per_core: u64) -> Self {
        Self {
            cores,
            mips_per_core,
            executing: Vec::new(),
            waiting: VecDeque::new(),
            last_update: 0.0,
        }
    }

    pub fn busy_cores(&self) -> u32 {
        self.executing.iter().map(|c| c.borrow().cores).sum()
    }

    pub fn free_cores(&self) -> u32 {
        self.cores - self.busy_cores()
    }

    pub fn executing_count(&self) -> usize {
        self.executing.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_idle(&self) -> bool {
        self.executing.is_empty() && self.waiting.is_empty()
    }

    /// Core demand of every cloudlet on this scheduler, executing first,
    /// then waiting in queue order.
    pub fn cloudlet_cores(&self) -> Vec<u32> {
        self.executing
            .iter()
            .chain(self.waiting.iter())
            .map(|c| c.borrow().cores)
            .collect()
    }

    fn rate(&self, cores: u32) -> f64 {
        self.mips_per_core as f64 * cores as f64
    }

    /// Accepts a dispatched cloudlet. It starts executing immediately when
    /// enough cores are free, otherwise it queues.
    ///
    /// Callers must bring the scheduler up to date with
    /// [`advance`](Self::advance) first so that in-flight progress is not
    /// billed against the new arrival.
    pub fn submit(&mut self, cloudlet: Rc<RefCell<Cloudlet>>, now: f64) {
        if self.executing.is_empty() {
            self.last_update = now;
        }
        let cores = cloudlet.borrow().cores;
        if cores <= self.free_cores() {
            cloudlet.borrow_mut().start_execution(now);
            self.executing.push(cloudlet);
        } else {
            self.waiting.push_back(cloudlet);
        }
    }

    /// Advances execution to `now`: subtracts the elapsed MIPS-seconds from
    /// every executing cloudlet, finishes the completed ones (with their
    /// exact completion times) and pulls waiting cloudlets onto freed
    /// cores. Returns the cloudlets finished within the elapsed interval.
    pub fn advance(&mut self, now: f64) -> Vec<Rc<RefCell<Cloudlet>>> {
        let mut finished = Vec::new();
        if now > self.last_update {
            let dt = now - self.last_update;
            let last_update = self.last_update;
            for entry in &self.executing {
                let mut cloudlet = entry.borrow_mut();
                let rate = self.mips_per_core as f64 * cloudlet.cores as f64;
                let completion = last_update + cloudlet.remaining_mi() / rate;
                if completion <= now + EPSILON {
                    cloudlet.mark_finished(completion.min(now));
                } else {
                    cloudlet.add_progress(rate * dt);
                }
            }
            let (done, running): (Vec<_>, Vec<_>) = self
                .executing
                .drain(..)
                .partition(|c| c.borrow().is_finished());
            finished = done;
            self.executing = running;
            self.last_update = now;
        }
        self.pull_waiting(now);
        finished
    }

    fn pull_waiting(&mut self, now: f64) {
        let mut free = self.free_cores();
        let mut still_waiting = VecDeque::new();
        while let Some(entry) = self.waiting.pop_front() {
            let cores = entry.borrow().cores;
            if cores <= free {
                free -= cores;
                entry.borrow_mut().start_execution(now);
                self.executing.push(entry);
            } else {
                still_waiting.push_back(entry);
            }
        }
        self.waiting = still_waiting;
    }

    /// Absolute time of the next cloudlet completion, if any cloudlet is
    /// executing. Valid right after [`advance`](Self::advance).
    pub fn next_completion_time(&self) -> Option<f64> {
        self.executing
            .iter()
            .map(|c| {
                let cloudlet = c.borrow();
                self.last_update + cloudlet.remaining_mi() / self.rate(cloudlet.cores)
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Removes every cloudlet from the scheduler, executing first, then
    /// waiting. Used when the owning VM is destroyed.
    pub fn drain_all(&mut self) -> Vec<Rc<RefCell<Cloudlet>>> {
        let mut all: Vec<_> = self.executing.drain(..).collect();
        all.extend(self.waiting.drain(..));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sugars::{rc, refcell};

    fn cloudlet(id: u64, cores: u32, mi: u64) -> Rc<RefCell<Cloudlet>> {
        rc!(refcell!(Cloudlet::new(id, cores, mi, 0.0)))
    }

    #[test]
    fn executes_within_core_capacity() {
        let mut scheduler = CloudletScheduler::new(2, 1000);
        scheduler.submit(cloudlet(1, 1, 1000), 0.0);
        scheduler.submit(cloudlet(2, 1, 1000), 0.0);
        scheduler.submit(cloudlet(3, 1, 1000), 0.0);
        assert_eq!(scheduler.executing_count(), 2);
        assert_eq!(scheduler.waiting_count(), 1);
        assert_eq!(scheduler.free_cores(), 0);
    }

    #[test]
    fn finishes_at_exact_completion_time_and_pulls_waiting() {
        let mut scheduler = CloudletScheduler::new(1, 1000);
        let first = cloudlet(1, 1, 1000);
        let second = cloudlet(2, 1, 2000);
        scheduler.submit(first.clone(), 0.0);
        scheduler.submit(second.clone(), 0.0);

        let finished = scheduler.advance(1.0);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].borrow().id, 1);
        assert_eq!(first.borrow().finish_time(), Some(1.0));
        // The queued cloudlet took over the core.
        assert_eq!(scheduler.executing_count(), 1);
        assert_eq!(scheduler.next_completion_time(), Some(3.0));
    }

    #[test]
    fn smaller_waiting_cloudlet_overtakes_blocked_head() {
        let mut scheduler = CloudletScheduler::new(2, 1000);
        scheduler.submit(cloudlet(1, 2, 4000), 0.0);
        scheduler.submit(cloudlet(2, 2, 1000), 0.0);
        let small = cloudlet(3, 1, 1000);
        scheduler.submit(small.clone(), 0.0);

        // Cloudlet 1 releases both cores at t=2; cloudlet 2 takes them and
        // cloudlet 3 stays queued behind nothing it could fit into.
        let finished = scheduler.advance(2.0);
        assert_eq!(finished.len(), 1);
        assert_eq!(scheduler.executing_count(), 1);
        assert_eq!(scheduler.waiting_count(), 1);
    }

    #[test]
    fn drain_returns_partial_progress() {
        let mut scheduler = CloudletScheduler::new(1, 1000);
        let entry = cloudlet(1, 1, 10000);
        scheduler.submit(entry.clone(), 0.0);
        scheduler.advance(5.0);
        let drained = scheduler.drain_all();
        assert_eq!(drained.len(), 1);
        assert!((drained[0].borrow().finished_mi() - 5000.0).abs() < 1e-6);
        assert!(scheduler.is_idle());
    }
}

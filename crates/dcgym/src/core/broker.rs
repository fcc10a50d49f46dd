//! Broker holding the cloudlet wait queue and performing agent-directed
//! dispatch.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;

use serde::Serialize;

use simcore::cast;
use simcore::{Event, EventHandler, Id, SimulationContext, EPSILON};

use crate::core::cloudlet::{CloudletPool, CloudletStatus};
use crate::core::events::cloudlet_flow::{CloudletBounced, CloudletReturned, CloudletSubmit};
use crate::core::logger::Logger;
use crate::core::vm::VmStatus;
use crate::core::vm_registry::VmRegistry;

/// Why a dispatch request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchError {
    /// No cloudlet is waiting; the queue is untouched.
    EmptyQueue,
    /// The VM id is not in the broker's created list.
    UnknownVm,
    /// The VM exists but is not in the Running state.
    VmNotRunning,
    /// The VM lacks the required cores or file-size capacity; the cloudlet
    /// went back to the head of the queue.
    Unsuitable,
}

/// Entry of the future-arrival queue, ordered by arrival time with FIFO
/// ties.
struct ArrivalEntry {
    time: f64,
    seq: u64,
    cloudlet_id: u64,
}

impl Eq for ArrivalEntry {}

impl PartialEq for ArrivalEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for ArrivalEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.total_cmp(&self.time).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ArrivalEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Holds every cloudlet of the episode and decides nothing on its own:
/// cloudlets move from the future-arrival queue into the dispatch wait
/// queue as simulated time passes, and leave it only through an explicit
/// [`assign_next_to_vm`](Broker::assign_next_to_vm) call issued on behalf
/// of the external agent. When a VM is destroyed its cloudlets are
/// harvested, credited with the work already done and put back into the
/// future-arrival queue.
pub struct Broker {
    pool: Rc<RefCell<CloudletPool>>,
    registry: Rc<RefCell<VmRegistry>>,
    future_arrivals: BinaryHeap<ArrivalEntry>,
    wait_queue: VecDeque<u64>,
    /// Original arrival time per cloudlet, fixed at reset. Wait-time
    /// metrics always use these values, also after rescheduling.
    arrival_map: HashMap<u64, f64>,
    submitted: Vec<u64>,
    finished: Vec<u64>,
    /// Wait times of cloudlets finished since the start of the current
    /// timestep.
    finished_wait_times: Vec<f64>,
    created_vms: Vec<u32>,
    total_cloudlets: usize,
    arrival_seq: u64,
    datacenter_id: Id,
    ctx: SimulationContext,
    logger: Rc<RefCell<Box<dyn Logger>>>,
}

impl Broker {
    pub fn new(
        pool: Rc<RefCell<CloudletPool>>,
        registry: Rc<RefCell<VmRegistry>>,
        datacenter_id: Id,
        ctx: SimulationContext,
        logger: Rc<RefCell<Box<dyn Logger>>>,
    ) -> Self {
        let mut broker = Self {
            pool: pool.clone(),
            registry,
            future_arrivals: BinaryHeap::new(),
            wait_queue: VecDeque::new(),
            arrival_map: HashMap::new(),
            submitted: Vec::new(),
            finished: Vec::new(),
            finished_wait_times: Vec::new(),
            created_vms: Vec::new(),
            total_cloudlets: pool.borrow().len(),
            arrival_seq: 0,
            datacenter_id,
            ctx,
            logger,
        };
        for (&id, cloudlet) in pool.borrow().iter() {
            let arrival = cloudlet.borrow().arrival_time();
            broker.arrival_map.insert(id, arrival);
            broker.push_future_arrival(id, arrival);
        }
        broker
    }

    fn push_future_arrival(&mut self, cloudlet_id: u64, time: f64) {
        self.future_arrivals.push(ArrivalEntry {
            time,
            seq: self.arrival_seq,
            cloudlet_id,
        });
        self.arrival_seq += 1;
    }

    /// Moves every cloudlet whose arrival time has passed into the dispatch
    /// wait queue, in arrival-time order.
    pub fn admit_arrived(&mut self, now: f64) {
        let mut admitted = 0;
        while let Some(head) = self.future_arrivals.peek() {
            if head.time > now + EPSILON {
                break;
            }
            let entry = self.future_arrivals.pop().unwrap();
            if let Some(cloudlet) = self.pool.borrow().get(entry.cloudlet_id) {
                cloudlet.borrow_mut().mark_admitted(now);
            }
            self.wait_queue.push_back(entry.cloudlet_id);
            admitted += 1;
        }
        if admitted > 0 {
            self.logger.borrow_mut().log_info(
                &self.ctx,
                format!("admitted {} cloudlets, queue size now {}", admitted, self.wait_queue.len()),
            );
        }
    }

    /// Removes the head of the wait queue and binds it to the named VM.
    ///
    /// On success the cloudlet's submission delay is recomputed from its
    /// original arrival time and a [`CloudletSubmit`] event is emitted to
    /// the datacenter with that delay. On `Unsuitable` the cloudlet goes
    /// back to the head of the queue.
    pub fn assign_next_to_vm(&mut self, vm_id: u32) -> Result<u64, DispatchError> {
        if self.wait_queue.is_empty() {
            self.logger
                .borrow_mut()
                .log_warn(&self.ctx, "no cloudlets in queue to assign".to_string());
            return Err(DispatchError::EmptyQueue);
        }
        if !self.created_vms.contains(&vm_id) {
            self.logger
                .borrow_mut()
                .log_warn(&self.ctx, format!("cannot assign cloudlet: vm #{} is unknown", vm_id));
            return Err(DispatchError::UnknownVm);
        }
        let vm = self.registry.borrow().get(vm_id).ok_or(DispatchError::UnknownVm)?;
        if vm.borrow().status() != VmStatus::Running {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!("cannot assign cloudlet: vm #{} is {}", vm_id, vm.borrow().status()),
            );
            return Err(DispatchError::VmNotRunning);
        }

        let cloudlet_id = self.wait_queue.pop_front().unwrap();
        let cloudlet = self.pool.borrow().get(cloudlet_id).unwrap();
        let (cores, input_file_size) = {
            let c = cloudlet.borrow();
            (c.cores, c.input_file_size)
        };
        if !vm.borrow().is_suitable_for(cores, input_file_size) {
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!(
                    "cloudlet #{} (cores {}) does not fit vm #{}, re-queued at head",
                    cloudlet_id, cores, vm_id
                ),
            );
            self.wait_queue.push_front(cloudlet_id);
            return Err(DispatchError::Unsuitable);
        }

        let now = self.ctx.time();
        let delay = (self.arrival_map[&cloudlet_id] - now).max(0.0);
        {
            let mut c = cloudlet.borrow_mut();
            c.set_submission_delay(delay);
            c.bind_to_vm(vm_id);
        }
        self.submitted.push(cloudlet_id);
        self.ctx
            .emit(CloudletSubmit { cloudlet_id, vm_id }, self.datacenter_id, delay);
        self.logger.borrow_mut().log_info(
            &self.ctx,
            format!(
                "cloudlet #{} dispatched to vm #{}, queue size now {}",
                cloudlet_id,
                vm_id,
                self.wait_queue.len()
            ),
        );
        Ok(cloudlet_id)
    }

    /// Auto-mapping is disabled in this broker: dispatch is always driven
    /// by the external agent. Any caller landing here gets no VM and a
    /// warning in the log.
    pub fn default_vm_mapper(&self, cloudlet_id: u64) -> Option<u32> {
        self.logger.borrow_mut().log_warn(
            &self.ctx,
            format!(
                "default vm mapper called for cloudlet #{}, queued cloudlets must be assigned by the agent",
                cloudlet_id
            ),
        );
        None
    }

    /// Harvests every cloudlet from the VM's scheduler ahead of its
    /// destruction. Work done so far stays credited: each cloudlet is reset
    /// to its remaining length and re-enters the future-arrival queue with
    /// the current time as its arrival. Cloudlets with no work left are
    /// finished on the spot.
    pub fn reschedule_vm_cloudlets(&mut self, vm_id: u32, now: f64) {
        let vm = match self.registry.borrow().get(vm_id) {
            Some(vm) => vm,
            None => return,
        };
        let (completed, harvested) = {
            let mut vm = vm.borrow_mut();
            let completed = vm.scheduler_mut().advance(now);
            let harvested = vm.scheduler_mut().drain_all();
            (completed, harvested)
        };
        // Cloudlets that crossed the finish line before the destruction are
        // ordinary completions.
        for cloudlet in completed {
            let id = cloudlet.borrow().id;
            self.finish_cloudlet(id);
        }
        let mut requeued = 0;
        for cloudlet in harvested {
            let id = cloudlet.borrow().id;
            let remaining = cloudlet.borrow().remaining_mi();
            if remaining <= EPSILON {
                cloudlet.borrow_mut().mark_finished(now);
                self.finish_cloudlet(id);
                continue;
            }
            cloudlet.borrow_mut().reset_for_requeue(now);
            self.push_future_arrival(id, now);
            requeued += 1;
        }
        if requeued > 0 {
            self.logger.borrow_mut().log_info(
                &self.ctx,
                format!("re-queued {} cloudlets from destroyed vm #{}", requeued, vm_id),
            );
        }
    }

    /// Puts a bounced submission back into the future-arrival queue so it
    /// is re-admitted on the next step.
    fn requeue_bounced(&mut self, cloudlet_id: u64) {
        let now = self.ctx.time();
        if let Some(cloudlet) = self.pool.borrow().get(cloudlet_id) {
            cloudlet.borrow_mut().reset_for_requeue(now);
        }
        self.push_future_arrival(cloudlet_id, now);
        self.logger.borrow_mut().log_warn(
            &self.ctx,
            format!("cloudlet #{} bounced back from its vm, re-queued", cloudlet_id),
        );
    }

    fn finish_cloudlet(&mut self, cloudlet_id: u64) {
        let cloudlet = match self.pool.borrow().get(cloudlet_id) {
            Some(cloudlet) => cloudlet,
            None => return,
        };
        let exec_start = cloudlet.borrow().exec_start_time().unwrap_or_else(|| self.ctx.time());
        let wait_time = (exec_start - self.arrival_map[&cloudlet_id]).max(0.0);
        self.finished.push(cloudlet_id);
        self.finished_wait_times.push(wait_time);
        self.logger.borrow_mut().log_info(
            &self.ctx,
            format!(
                "cloudlet #{} finished, wait time {:.3}, {}/{} done",
                cloudlet_id,
                wait_time,
                self.finished.len(),
                self.total_cloudlets
            ),
        );
    }

    // Fleet bookkeeping.

    /// Records a VM in the broker's created list, in submission order.
    pub fn register_vm(&mut self, vm_id: u32) {
        self.created_vms.push(vm_id);
    }

    pub fn created_vms(&self) -> &[u32] {
        &self.created_vms
    }

    /// Ids of created VMs currently in the Running state, in creation
    /// order. The destroy action indexes into this list.
    pub fn running_vms(&self) -> Vec<u32> {
        let registry = self.registry.borrow();
        self.created_vms
            .iter()
            .copied()
            .filter(|&id| {
                registry
                    .get(id)
                    .map(|vm| vm.borrow().status() == VmStatus::Running)
                    .unwrap_or(false)
            })
            .collect()
    }

    // Queue and progress introspection.

    pub fn waiting_count(&self) -> usize {
        self.wait_queue.len()
    }

    pub fn has_waiting_cloudlets(&self) -> bool {
        !self.wait_queue.is_empty()
    }

    /// Core demand of the cloudlet at the head of the wait queue.
    pub fn peek_waiting_cores(&self) -> Option<u32> {
        let id = *self.wait_queue.front()?;
        self.pool.borrow().get(id).map(|c| c.borrow().cores)
    }

    pub fn future_count(&self) -> usize {
        self.future_arrivals.len()
    }

    /// Cloudlets handed over to the datacenter so far.
    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn has_unfinished_cloudlets(&self) -> bool {
        self.finished.len() < self.total_cloudlets
    }

    /// Number of cloudlets that have arrived by `now` according to the
    /// arrival map fixed at reset.
    pub fn arrived_count(&self, now: f64) -> usize {
        self.arrival_map.values().filter(|&&t| t <= now + EPSILON).count()
    }

    /// Arrived cloudlets that are neither executing nor finished.
    pub fn not_yet_running_count(&self, now: f64) -> usize {
        let pool = self.pool.borrow();
        pool.iter()
            .filter(|(id, cloudlet)| {
                self.arrival_map[id] <= now + EPSILON
                    && !matches!(
                        cloudlet.borrow().status(),
                        CloudletStatus::InExec | CloudletStatus::Success
                    )
            })
            .count()
    }

    pub fn finished_wait_times(&self) -> &[f64] {
        &self.finished_wait_times
    }

    /// Drops the previous step's wait records. Called at the start of each
    /// timestep; the records accumulate during the step and are read for
    /// the reward right after the time advance.
    pub fn clear_finished_wait_times(&mut self) {
        self.finished_wait_times.clear();
    }
}

impl EventHandler for Broker {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            CloudletReturned { cloudlet_id } => {
                self.finish_cloudlet(cloudlet_id);
            }
            CloudletBounced { cloudlet_id } => {
                self.requeue_bounced(cloudlet_id);
            }
        })
    }
}

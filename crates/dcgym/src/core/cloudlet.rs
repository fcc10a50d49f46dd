//! Cloudlets (compute tasks) and their per-simulation pool.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use serde::Serialize;

use simcore::EPSILON;

/// Default input/output file size in bytes, one network MTU.
pub const DEFAULT_FILE_SIZE: u64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloudletStatus {
    Waiting,
    InExec,
    Success,
    Failed,
    Cancelled,
}

impl Display for CloudletStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CloudletStatus::Waiting => write!(f, "waiting"),
            CloudletStatus::InExec => write!(f, "in-exec"),
            CloudletStatus::Success => write!(f, "success"),
            CloudletStatus::Failed => write!(f, "failed"),
            CloudletStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work: a fixed amount of million-instructions executed on a
/// fixed number of cores of a single VM.
#[derive(Debug, Clone, Serialize)]
pub struct Cloudlet {
    pub id: u64,
    pub cores: u32,
    /// Work left to schedule, in MI. Reduced when the cloudlet is harvested
    /// from a destroyed VM so that already executed work stays credited.
    length: f64,
    pub input_file_size: u64,
    pub output_file_size: u64,
    /// Absolute simulation time at which the cloudlet enters the broker.
    arrival_time: f64,
    /// Delay between dispatch and execution start requested at submission.
    submission_delay: f64,
    status: CloudletStatus,
    vm_id: Option<u32>,
    exec_start_time: Option<f64>,
    wait_start_time: Option<f64>,
    finish_time: Option<f64>,
    finished_mi: f64,
}

impl Cloudlet {
    pub fn new(id: u64, cores: u32, length_mi: u64, arrival_time: f64) -> Self {
        Self {
            id,
            cores,
            length: length_mi as f64,
            input_file_size: DEFAULT_FILE_SIZE,
            output_file_size: DEFAULT_FILE_SIZE,
            arrival_time,
            submission_delay: 0.0,
            status: CloudletStatus::Waiting,
            vm_id: None,
            exec_start_time: None,
            wait_start_time: None,
            finish_time: None,
            finished_mi: 0.0,
        }
    }

    pub fn status(&self) -> CloudletStatus {
        self.status
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn remaining_mi(&self) -> f64 {
        (self.length - self.finished_mi).max(0.0)
    }

    pub fn finished_mi(&self) -> f64 {
        self.finished_mi
    }

    pub fn arrival_time(&self) -> f64 {
        self.arrival_time
    }

    pub fn submission_delay(&self) -> f64 {
        self.submission_delay
    }

    pub fn set_submission_delay(&mut self, delay: f64) {
        self.submission_delay = delay;
    }

    pub fn vm_id(&self) -> Option<u32> {
        self.vm_id
    }

    pub fn bind_to_vm(&mut self, vm_id: u32) {
        self.vm_id = Some(vm_id);
    }

    pub fn exec_start_time(&self) -> Option<f64> {
        self.exec_start_time
    }

    pub fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    pub fn wait_start_time(&self) -> Option<f64> {
        self.wait_start_time
    }

    /// Marks admission into the broker's dispatch wait queue.
    pub fn mark_admitted(&mut self, time: f64) {
        if self.wait_start_time.is_none() {
            self.wait_start_time = Some(time);
        }
    }

    /// Marks the start of execution on the bound VM. The start time is
    /// recorded only once per dispatch.
    pub fn start_execution(&mut self, time: f64) {
        self.status = CloudletStatus::InExec;
        if self.exec_start_time.is_none() {
            self.exec_start_time = Some(time);
        }
    }

    pub fn add_progress(&mut self, mi: f64) {
        self.finished_mi = (self.finished_mi + mi).min(self.length);
    }

    pub fn is_finished(&self) -> bool {
        self.finished_mi >= self.length - EPSILON
    }

    pub fn mark_finished(&mut self, time: f64) {
        self.finished_mi = self.length;
        self.status = CloudletStatus::Success;
        self.finish_time = Some(time);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = CloudletStatus::Cancelled;
    }

    /// Detaches the cloudlet from a destroyed VM: the remaining work becomes
    /// the new length, execution bookkeeping is wiped and the cloudlet
    /// re-enters the broker as if it arrived at `now`.
    pub fn reset_for_requeue(&mut self, now: f64) {
        self.length = self.remaining_mi();
        self.finished_mi = 0.0;
        self.status = CloudletStatus::Waiting;
        self.vm_id = None;
        self.submission_delay = 0.0;
        self.exec_start_time = None;
        self.wait_start_time = None;
        self.finish_time = None;
        self.arrival_time = now;
    }
}

/// Per-simulation table of all cloudlets, shared between the broker (which
/// owns admission and completion bookkeeping) and the datacenter (which
/// routes submissions onto VM schedulers).
pub struct CloudletPool {
    cloudlets: BTreeMap<u64, Rc<RefCell<Cloudlet>>>,
}

impl CloudletPool {
    pub fn new() -> Self {
        Self {
            cloudlets: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, cloudlet: Cloudlet) -> Rc<RefCell<Cloudlet>> {
        let id = cloudlet.id;
        let entry = Rc::new(RefCell::new(cloudlet));
        self.cloudlets.insert(id, entry.clone());
        entry
    }

    pub fn get(&self, id: u64) -> Option<Rc<RefCell<Cloudlet>>> {
        self.cloudlets.get(&id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Rc<RefCell<Cloudlet>>)> {
        self.cloudlets.iter()
    }

    pub fn len(&self) -> usize {
        self.cloudlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloudlets.is_empty()
    }
}

impl Default for CloudletPool {
    fn default() -> Self {
        Self::new()
    }
}

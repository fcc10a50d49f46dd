//! Virtual machines.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::core::cloudlet_scheduler::CloudletScheduler;
use crate::core::config::SimulationConfig;

/// VM size tag. Medium and large shapes scale the small shape by the
/// configured multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VmType {
    Small,
    Medium,
    Large,
}

impl VmType {
    /// Short tag used in VM descriptions ("S", "M", "L").
    pub fn tag(&self) -> &'static str {
        match self {
            VmType::Small => "S",
            VmType::Medium => "M",
            VmType::Large => "L",
        }
    }

    /// Observation type code: 1 for S, 2 for M, 3 for L (0 means an empty
    /// slot).
    pub fn code(&self) -> i32 {
        match self {
            VmType::Small => 1,
            VmType::Medium => 2,
            VmType::Large => 3,
        }
    }

    pub fn from_index(index: i64) -> Option<VmType> {
        match index {
            0 => Some(VmType::Small),
            1 => Some(VmType::Medium),
            2 => Some(VmType::Large),
            _ => None,
        }
    }

    pub fn size_multiplier(&self, config: &SimulationConfig) -> u32 {
        match self {
            VmType::Small => 1,
            VmType::Medium => config.medium_vm_multiplier,
            VmType::Large => config.large_vm_multiplier,
        }
    }
}

impl Display for VmType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VmStatus {
    /// Submitted, not yet placed on a host.
    Requested,
    /// Placed, waiting out the startup delay.
    Starting,
    Running,
    /// Destruction requested, waiting out the shutdown delay.
    ShuttingDown,
    Destroyed,
}

impl Display for VmStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VmStatus::Requested => write!(f, "requested"),
            VmStatus::Starting => write!(f, "starting"),
            VmStatus::Running => write!(f, "running"),
            VmStatus::ShuttingDown => write!(f, "shutting-down"),
            VmStatus::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A logical compute unit placed on exactly one host, executing cloudlets
/// through its own space-shared scheduler.
pub struct Vm {
    pub id: u32,
    vm_type: VmType,
    /// Type tag, optionally suffixed with `-hostID` when the agent targeted
    /// a specific host. The suffix is stripped once placement succeeds.
    description: String,
    cores: u32,
    mips_per_core: u64,
    ram: u64,
    bw: u64,
    storage: u64,
    startup_delay: f64,
    shutdown_delay: f64,
    status: VmStatus,
    host_id: Option<u32>,
    scheduler: CloudletScheduler,
    /// (time, cpu utilization) samples recorded on processing updates.
    utilization_history: Vec<(f64, f64)>,
}

impl Vm {
    pub fn new(id: u32, vm_type: VmType, config: &SimulationConfig) -> Self {
        let multiplier = vm_type.size_multiplier(config);
        let cores = config.small_vm_pes * multiplier;
        Self {
            id,
            vm_type,
            description: vm_type.tag().to_string(),
            cores,
            mips_per_core: config.host_pe_mips,
            ram: config.small_vm_ram * multiplier as u64,
            bw: config.small_vm_bw,
            storage: config.small_vm_storage,
            startup_delay: config.vm_startup_delay,
            shutdown_delay: config.vm_shutdown_delay,
            status: VmStatus::Requested,
            host_id: None,
            scheduler: CloudletScheduler::new(cores, config.host_pe_mips),
            utilization_history: Vec::new(),
        }
    }

    /// Targets placement at the given host by suffixing the description.
    pub fn with_target_host(mut self, host_id: u32) -> Self {
        self.description = format!("{}-{}", self.vm_type.tag(), host_id);
        self
    }

    pub fn vm_type(&self) -> VmType {
        self.vm_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description<S: Into<String>>(&mut self, description: S) {
        self.description = description.into();
    }

    /// Host id carried in the description suffix, if any.
    pub fn target_host(&self) -> Option<u32> {
        let (_, id_part) = self.description.split_once('-')?;
        id_part.parse().ok()
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn mips_per_core(&self) -> u64 {
        self.mips_per_core
    }

    pub fn ram(&self) -> u64 {
        self.ram
    }

    pub fn bw(&self) -> u64 {
        self.bw
    }

    pub fn storage(&self) -> u64 {
        self.storage
    }

    pub fn startup_delay(&self) -> f64 {
        self.startup_delay
    }

    pub fn shutdown_delay(&self) -> f64 {
        self.shutdown_delay
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub fn set_status(&mut self, status: VmStatus) {
        self.status = status;
    }

    pub fn host_id(&self) -> Option<u32> {
        self.host_id
    }

    pub fn set_host(&mut self, host_id: Option<u32>) {
        self.host_id = host_id;
    }

    pub fn scheduler(&self) -> &CloudletScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut CloudletScheduler {
        &mut self.scheduler
    }

    /// Whether the VM can execute the cloudlet at all: enough cores and
    /// enough local storage for the input file.
    pub fn is_suitable_for(&self, cores: u32, input_file_size: u64) -> bool {
        self.cores >= cores && self.storage >= input_file_size
    }

    /// Fraction of cores currently busy. Zero unless the VM is running.
    pub fn cpu_utilization(&self) -> f64 {
        if self.status == VmStatus::Running {
            self.scheduler.busy_cores() as f64 / self.cores as f64
        } else {
            0.0
        }
    }

    pub fn record_utilization(&mut self, time: f64) {
        let utilization = self.cpu_utilization();
        if let Some(&(last_time, last_value)) = self.utilization_history.last() {
            if last_time == time {
                let last = self.utilization_history.last_mut().unwrap();
                last.1 = utilization;
                return;
            }
            if last_value == utilization {
                return;
            }
        }
        self.utilization_history.push((time, utilization));
    }

    pub fn utilization_history(&self) -> &[(f64, f64)] {
        &self.utilization_history
    }
}

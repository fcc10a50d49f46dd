//! The simulation driver: reset sequence, time-stepping and accessors used
//! by the agent bridge.

use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};
use thiserror::Error;

use simcore::{Event, EventListener, Id, RunStatus, Simulation, SimulationContext};

use crate::core::broker::Broker;
use crate::core::cloudlet::{Cloudlet, CloudletPool};
use crate::core::common::SuitabilityVerdict;
use crate::core::config::{ConfigError, SimulationConfig};
use crate::core::datacenter::Datacenter;
use crate::core::events::processing::KeepAlive;
use crate::core::events::vm_lifecycle::{VmCreationRequest, VmDestructionRequest};
use crate::core::logger::{Logger, StdoutLogger};
use crate::core::placement::TargetedRoundRobin;
use crate::core::vm::{Vm, VmStatus, VmType};
use crate::core::vm_registry::VmRegistry;
use crate::extensions::workload::{load_workload, WorkloadError};

/// Cap on events processed within one timestep advance. Generous enough
/// for any sane workload; hitting it means a runaway event loop.
pub const STEP_ITERATION_BUDGET: u64 = 10_000;

/// Errors that prevent a simulation from being built. Everything past a
/// successful reset is recoverable and never surfaces as an error.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

/// Injects empty keep-alive events while unfinished cloudlets remain, so
/// the event queue never drains mid-episode. Registered as a post-event
/// listener: once the queue is down to its final pending event and work
/// remains, the next tick is scheduled one timestep ahead.
struct KeepAliveListener {
    ctx: SimulationContext,
    broker: Rc<RefCell<Broker>>,
    datacenter_id: Id,
    interval: f64,
}

impl EventListener for KeepAliveListener {
    fn on_event_processed(&mut self, _event: &Event) {
        if self.ctx.pending_event_count() <= 1 && self.broker.borrow().has_unfinished_cloudlets() {
            self.ctx.emit(KeepAlive {}, self.datacenter_id, self.interval);
        }
    }
}

/// One fully built simulation run: engine, datacenter, broker and the VM
/// fleet, driven one timestep at a time.
pub struct CloudSimulation {
    sim: Simulation,
    config: Rc<SimulationConfig>,
    broker: Rc<RefCell<Broker>>,
    datacenter: Rc<RefCell<Datacenter>>,
    registry: Rc<RefCell<VmRegistry>>,
    pool: Rc<RefCell<CloudletPool>>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
    ctx: SimulationContext,
    first_step: bool,
}

impl CloudSimulation {
    /// Builds and starts a simulation: loads the workload, creates the
    /// datacenter and the initial VM fleet, registers the keep-alive
    /// listener and lets VM creation events settle over one
    /// minimum-time tick.
    pub fn new(config: SimulationConfig, seed: u64) -> Result<Self, SimulationError> {
        Self::with_logger(config, seed, Box::new(StdoutLogger::new()))
    }

    /// Same as [`new`](Self::new) with a custom logger implementation.
    pub fn with_logger(
        config: SimulationConfig,
        seed: u64,
        logger: Box<dyn Logger>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let descriptors = load_workload(&config)?;
        let config = rc!(config);
        let logger = rc!(refcell!(logger));

        let mut sim = Simulation::with_min_time_between_events(seed, config.min_time_between_events);

        let pool = rc!(refcell!(CloudletPool::new()));
        for descriptor in &descriptors {
            pool.borrow_mut().insert(Cloudlet::new(
                descriptor.id,
                descriptor.cores,
                descriptor.mi,
                descriptor.arrival_time,
            ));
        }
        let registry = rc!(refcell!(VmRegistry::new()));

        let datacenter_ctx = sim.create_context("datacenter");
        let broker_ctx = sim.create_context("broker");
        let datacenter_id = datacenter_ctx.id();
        let broker_id = broker_ctx.id();

        let datacenter = rc!(refcell!(Datacenter::new(
            registry.clone(),
            pool.clone(),
            Box::new(TargetedRoundRobin::new()),
            broker_id,
            datacenter_ctx,
            config.clone(),
            logger.clone(),
        )));
        sim.add_handler("datacenter", datacenter.clone());

        let broker = rc!(refcell!(Broker::new(
            pool.clone(),
            registry.clone(),
            datacenter_id,
            broker_ctx,
            logger.clone(),
        )));
        sim.add_handler("broker", broker.clone());

        let keep_alive_ctx = sim.create_context("keep-alive");
        sim.add_listener(rc!(refcell!(KeepAliveListener {
            ctx: keep_alive_ctx,
            broker: broker.clone(),
            datacenter_id,
            interval: config.simulation_timestep,
        })));

        let ctx = sim.create_context("simulation");
        let mut this = Self {
            sim,
            config: config.clone(),
            broker,
            datacenter,
            registry,
            pool,
            logger,
            ctx,
            first_step: true,
        };

        // Initial fleet, submitted in S, M, L order.
        let fleet = [
            (VmType::Small, config.initial_s_vm_count),
            (VmType::Medium, config.initial_m_vm_count),
            (VmType::Large, config.initial_l_vm_count),
        ];
        for (vm_type, count) in fleet {
            for _ in 0..count {
                let vm_id = this.registry.borrow_mut().issue_id();
                let vm = Vm::new(vm_id, vm_type, &this.config);
                this.submit_vm(vm);
            }
        }

        // Let creation events settle before the first agent step.
        this.sim.run_until(config.min_time_between_events, STEP_ITERATION_BUDGET);
        this.logger.borrow_mut().log_info(
            &this.ctx,
            format!(
                "simulation ready: {} hosts, {} initial vms, {} cloudlets loaded",
                config.hosts_count,
                this.broker.borrow().created_vms().len(),
                this.pool.borrow().len()
            ),
        );
        Ok(this)
    }

    fn submit_vm(&mut self, vm: Vm) {
        let vm_id = vm.id;
        self.registry.borrow_mut().register(vm);
        self.broker.borrow_mut().register_vm(vm_id);
        self.ctx
            .emit_now(VmCreationRequest { vm_id }, self.datacenter.borrow().id());
    }

    /// Opens a timestep: drops the previous step's finished-wait records
    /// and admits every cloudlet that has arrived by now, so admission
    /// precedes any dispatch within the step.
    pub fn begin_timestep(&mut self) {
        let now = self.time();
        let mut broker = self.broker.borrow_mut();
        broker.clear_finished_wait_times();
        broker.admit_arrived(now);
    }

    /// Advances the engine by one simulation timestep, then admits the
    /// cloudlets that arrived during the advance so the observation sees
    /// them.
    pub fn advance_one_timestep(&mut self) -> RunStatus {
        let target = if self.first_step {
            // The settle tick already consumed part of the first step.
            self.config.simulation_timestep
        } else {
            self.time() + self.config.simulation_timestep
        };
        self.first_step = false;
        let status = self.sim.run_until(target, STEP_ITERATION_BUDGET);
        let now = self.time();
        self.broker.borrow_mut().admit_arrived(now);
        status
    }

    /// True while there are pending events or unfinished cloudlets.
    pub fn is_running(&self) -> bool {
        self.sim.pending_event_count() > 0 || self.broker.borrow().has_unfinished_cloudlets()
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    pub fn config(&self) -> Rc<SimulationConfig> {
        self.config.clone()
    }

    pub fn broker(&self) -> Rc<RefCell<Broker>> {
        self.broker.clone()
    }

    pub fn datacenter(&self) -> Rc<RefCell<Datacenter>> {
        self.datacenter.clone()
    }

    pub fn vm_registry(&self) -> Rc<RefCell<VmRegistry>> {
        self.registry.clone()
    }

    pub fn cloudlet_pool(&self) -> Rc<RefCell<CloudletPool>> {
        self.pool.clone()
    }

    /// Cores reserved by created VMs that are currently running.
    pub fn allocated_cores(&self) -> u64 {
        let registry = self.registry.borrow();
        self.broker
            .borrow()
            .running_vms()
            .iter()
            .filter_map(|&id| registry.get(id))
            .map(|vm| vm.borrow().cores() as u64)
            .sum()
    }

    pub fn total_host_cores(&self) -> u64 {
        self.datacenter.borrow().total_cores()
    }

    pub fn arrived_cloudlets_count(&self) -> usize {
        self.broker.borrow().arrived_count(self.time())
    }

    pub fn not_yet_running_cloudlets_count(&self) -> usize {
        self.broker.borrow().not_yet_running_count(self.time())
    }

    /// Wait times recorded for cloudlets that finished during the current
    /// timestep.
    pub fn finished_wait_times(&self) -> Vec<f64> {
        self.broker.borrow().finished_wait_times().to_vec()
    }

    /// Requests a new VM of the given type pinned to the given host.
    ///
    /// The host is checked up front; an unknown or unsuitable host means no
    /// VM is submitted at all. Returns the new VM id and its core count.
    pub fn create_vm_on_host(&mut self, vm_type: VmType, host_id: u32) -> Option<(u32, u32)> {
        let vm_id = self.registry.borrow_mut().issue_id();
        let vm = Vm::new(vm_id, vm_type, &self.config).with_target_host(host_id);
        {
            let datacenter = self.datacenter.borrow();
            let host = datacenter.host(host_id)?;
            if host.can_host(&vm) != SuitabilityVerdict::Success {
                self.logger.borrow_mut().log_debug(
                    &self.ctx,
                    format!("vm creation ignored, host #{} not suitable", host_id),
                );
                return None;
            }
        }
        let cores = vm.cores();
        self.submit_vm(vm);
        Some((vm_id, cores))
    }

    /// Destroys the VM at `index` of the running list (creation order).
    ///
    /// Its cloudlets are harvested and re-queued first, then the shutdown
    /// delay starts ticking. Returns the host the VM lived on and the core
    /// count it releases.
    pub fn destroy_vm_by_index(&mut self, index: usize) -> Option<(u32, u32)> {
        let running = self.broker.borrow().running_vms();
        let &vm_id = running.get(index)?;
        let vm = self.registry.borrow().get(vm_id)?;
        let (host_id, cores) = {
            let vm = vm.borrow();
            if vm.status() != VmStatus::Running {
                return None;
            }
            (vm.host_id()?, vm.cores())
        };
        let now = self.time();
        self.broker.borrow_mut().reschedule_vm_cloudlets(vm_id, now);
        self.ctx
            .emit_now(VmDestructionRequest { vm_id }, self.datacenter.borrow().id());
        self.logger
            .borrow_mut()
            .log_info(&self.ctx, format!("destroying vm #{} on host #{}", vm_id, host_id));
        Some((host_id, cores))
    }

    /// Saves the buffered log records when a file logger is in use.
    pub fn save_log(&self, path: &str) -> Result<(), std::io::Error> {
        self.logger.borrow().save_log(path)
    }
}

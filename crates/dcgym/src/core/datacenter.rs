//! Datacenter component owning the hosts and routing cloudlet execution.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use simcore::cast;
use simcore::{Event, EventHandler, EventId, Id, SimulationContext, EPSILON};

use crate::core::cloudlet::CloudletPool;
use crate::core::common::SuitabilityVerdict;
use crate::core::config::SimulationConfig;
use crate::core::events::cloudlet_flow::{CloudletBounced, CloudletReturned, CloudletSubmit};
use crate::core::events::processing::{KeepAlive, UpdateProcessing};
use crate::core::events::vm_lifecycle::{VmCreationRequest, VmDeleted, VmDestructionRequest, VmStarted};
use crate::core::host::Host;
use crate::core::logger::Logger;
use crate::core::placement::VmPlacementPolicy;
use crate::core::vm::VmStatus;
use crate::core::vm_registry::VmRegistry;

/// Owns the physical hosts and executes the VM and cloudlet lifecycles:
/// placement of requested VMs, startup and shutdown delays, dispatch of
/// submitted cloudlets onto VM schedulers and the processing updates that
/// move execution forward. Finished cloudlets are reported back to the
/// broker; submissions that reach a VM which is not running bounce back.
pub struct Datacenter {
    hosts: BTreeMap<u32, Host>,
    registry: Rc<RefCell<VmRegistry>>,
    pool: Rc<RefCell<CloudletPool>>,
    placement: Box<dyn VmPlacementPolicy>,
    broker_id: Id,
    /// Pending self-scheduled processing update, if any.
    next_update: Option<(EventId, f64)>,
    ctx: SimulationContext,
    config: Rc<SimulationConfig>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
}

impl Datacenter {
    pub fn new(
        registry: Rc<RefCell<VmRegistry>>,
        pool: Rc<RefCell<CloudletPool>>,
        placement: Box<dyn VmPlacementPolicy>,
        broker_id: Id,
        ctx: SimulationContext,
        config: Rc<SimulationConfig>,
        logger: Rc<RefCell<Box<dyn Logger>>>,
    ) -> Self {
        let hosts = (0..config.hosts_count)
            .map(|id| {
                (
                    id,
                    Host::new(
                        id,
                        config.host_pes,
                        config.host_pe_mips,
                        config.host_ram,
                        config.host_bw,
                        config.host_storage,
                    ),
                )
            })
            .collect();
        Self {
            hosts,
            registry,
            pool,
            placement,
            broker_id,
            next_update: None,
            ctx,
            config,
            logger,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn hosts(&self) -> &BTreeMap<u32, Host> {
        &self.hosts
    }

    pub fn host(&self, id: u32) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn total_cores(&self) -> u64 {
        self.hosts.values().map(|h| h.total_cores() as u64).sum()
    }

    /// Actual CPU load of a host: MIPS demanded by the cloudlets of its
    /// running VMs over the host's total MIPS.
    pub fn host_cpu_utilization(&self, host_id: u32) -> f64 {
        let host = match self.hosts.get(&host_id) {
            Some(host) => host,
            None => return 0.0,
        };
        let registry = self.registry.borrow();
        let used: f64 = host
            .vm_ids()
            .iter()
            .filter_map(|id| registry.get(*id))
            .map(|vm| {
                let vm = vm.borrow();
                vm.scheduler().busy_cores() as f64 * vm.mips_per_core() as f64
            })
            .sum();
        used / host.total_mips() as f64
    }

    fn refresh_host_state(&mut self, host_id: u32) {
        let now = self.ctx.time();
        let registry = self.registry.borrow();
        let host = match self.hosts.get(&host_id) {
            Some(host) => host,
            None => return,
        };
        let mut requested = 0.0;
        let mut allocated = 0.0;
        for vm in host.vm_ids().iter().filter_map(|id| registry.get(*id)) {
            let vm = vm.borrow();
            requested += vm.scheduler().busy_cores() as f64 * vm.mips_per_core() as f64;
            allocated += vm.cores() as f64 * vm.mips_per_core() as f64;
        }
        drop(registry);
        if let Some(host) = self.hosts.get_mut(&host_id) {
            host.record_state(now, requested, allocated);
        }
    }

    fn on_vm_creation_request(&mut self, vm_id: u32) {
        let vm = match self.registry.borrow().get(vm_id) {
            Some(vm) => vm,
            None => return,
        };
        let selected = self.placement.select_host(&vm.borrow(), &self.hosts);
        match selected {
            Ok(host_id) => {
                let host = self.hosts.get_mut(&host_id).unwrap();
                let verdict = host.install_vm(&vm.borrow());
                if verdict != SuitabilityVerdict::Success {
                    self.logger.borrow_mut().log_warn(
                        &self.ctx,
                        format!("vm #{} lost its slot on host #{}: {}", vm_id, host_id, verdict),
                    );
                    vm.borrow_mut().set_status(VmStatus::Destroyed);
                    return;
                }
                let startup_delay = {
                    let mut vm = vm.borrow_mut();
                    let tag = vm.vm_type().tag();
                    vm.set_description(tag);
                    vm.set_host(Some(host_id));
                    vm.set_status(VmStatus::Starting);
                    vm.startup_delay()
                };
                self.logger
                    .borrow_mut()
                    .log_debug(&self.ctx, format!("vm #{} allocated on host #{}", vm_id, host_id));
                self.refresh_host_state(host_id);
                if startup_delay > 0.0 {
                    self.ctx.emit_self(VmStarted { vm_id }, startup_delay);
                } else {
                    self.start_vm(vm_id);
                }
            }
            Err(err) => {
                self.logger
                    .borrow_mut()
                    .log_warn(&self.ctx, format!("failed to place vm #{}: {}", vm_id, err));
                vm.borrow_mut().set_status(VmStatus::Destroyed);
            }
        }
    }

    fn start_vm(&mut self, vm_id: u32) {
        let vm = match self.registry.borrow().get(vm_id) {
            Some(vm) => vm,
            None => return,
        };
        {
            let mut vm = vm.borrow_mut();
            if vm.status() != VmStatus::Starting {
                return;
            }
            vm.set_status(VmStatus::Running);
            vm.record_utilization(self.ctx.time());
        }
        self.logger
            .borrow_mut()
            .log_debug(&self.ctx, format!("vm #{} started and running", vm_id));
    }

    fn on_vm_destruction_request(&mut self, vm_id: u32) {
        let vm = match self.registry.borrow().get(vm_id) {
            Some(vm) => vm,
            None => return,
        };
        let shutdown_delay = {
            let mut vm = vm.borrow_mut();
            if vm.status() != VmStatus::Running && vm.status() != VmStatus::Starting {
                return;
            }
            vm.set_status(VmStatus::ShuttingDown);
            vm.shutdown_delay()
        };
        self.ctx.emit_self(VmDeleted { vm_id }, shutdown_delay);
    }

    fn on_vm_deleted(&mut self, vm_id: u32) {
        let vm = match self.registry.borrow().get(vm_id) {
            Some(vm) => vm,
            None => return,
        };
        let host_id = {
            let mut vm = vm.borrow_mut();
            if vm.status() != VmStatus::ShuttingDown {
                return;
            }
            vm.set_status(VmStatus::Destroyed);
            let host_id = vm.host_id();
            vm.set_host(None);
            host_id
        };
        // Release the host slice reserved at placement time.
        if let Some(host_id) = host_id {
            self.hosts.get_mut(&host_id).unwrap().remove_vm(&vm.borrow());
            self.refresh_host_state(host_id);
        }
        self.logger
            .borrow_mut()
            .log_debug(&self.ctx, format!("vm #{} deleted", vm_id));
    }

    fn on_cloudlet_submit(&mut self, cloudlet_id: u64, vm_id: u32) {
        let now = self.ctx.time();
        let vm = self.registry.borrow().get(vm_id);
        let running = vm
            .as_ref()
            .map(|vm| vm.borrow().status() == VmStatus::Running)
            .unwrap_or(false);
        if !running {
            // The VM died (or never started) between dispatch and delivery.
            self.logger.borrow_mut().log_warn(
                &self.ctx,
                format!("cloudlet #{} submitted to vm #{} which is not running", cloudlet_id, vm_id),
            );
            self.ctx.emit_now(CloudletBounced { cloudlet_id }, self.broker_id);
            return;
        }
        // Bring every scheduler up to date before touching the target one.
        self.update_processing(now);
        let vm = vm.unwrap();
        let cloudlet = match self.pool.borrow().get(cloudlet_id) {
            Some(cloudlet) => cloudlet,
            None => return,
        };
        {
            let mut vm = vm.borrow_mut();
            vm.scheduler_mut().submit(cloudlet, now);
            vm.record_utilization(now);
        }
        if let Some(host_id) = vm.borrow().host_id() {
            self.refresh_host_state(host_id);
        }
        self.schedule_next_update(now);
    }

    /// Advances every running VM's scheduler to `now`, reports finished
    /// cloudlets to the broker and re-arms the next processing update.
    fn update_processing(&mut self, now: f64) {
        if let Some((_, scheduled)) = self.next_update {
            if scheduled <= now + EPSILON {
                self.next_update = None;
            }
        }
        let vms: Vec<_> = {
            let registry = self.registry.borrow();
            registry.iter().map(|(_, vm)| vm.clone()).collect()
        };
        let mut touched_hosts = Vec::new();
        for vm in vms {
            let status = vm.borrow().status();
            if status != VmStatus::Running {
                continue;
            }
            let finished = {
                let mut vm = vm.borrow_mut();
                let finished = vm.scheduler_mut().advance(now);
                vm.record_utilization(now);
                finished
            };
            if !finished.is_empty() {
                if let Some(host_id) = vm.borrow().host_id() {
                    touched_hosts.push(host_id);
                }
            }
            for cloudlet in finished {
                let cloudlet_id = cloudlet.borrow().id;
                self.ctx.emit_now(CloudletReturned { cloudlet_id }, self.broker_id);
            }
        }
        for host_id in touched_hosts {
            self.refresh_host_state(host_id);
        }
        self.schedule_next_update(now);
    }

    /// Arms a processing update at the earliest next cloudlet completion,
    /// replacing a later-scheduled one if needed.
    fn schedule_next_update(&mut self, now: f64) {
        let registry = self.registry.borrow();
        let next = registry
            .iter()
            .filter(|(_, vm)| vm.borrow().status() == VmStatus::Running)
            .filter_map(|(_, vm)| vm.borrow().scheduler().next_completion_time())
            .min_by(|a, b| a.total_cmp(b));
        drop(registry);
        let target = match next {
            Some(target) => target,
            None => return,
        };
        if let Some((event_id, scheduled)) = self.next_update {
            if scheduled <= target + EPSILON {
                return;
            }
            self.ctx.cancel_event(event_id);
        }
        let event_id = self.ctx.emit_self(UpdateProcessing {}, target - now);
        // The engine floors the delay, so record the actual firing time.
        let fire_time = now + (target - now).max(self.config.min_time_between_events);
        self.next_update = Some((event_id, fire_time));
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            VmCreationRequest { vm_id } => {
                self.on_vm_creation_request(vm_id);
            }
            VmStarted { vm_id } => {
                self.start_vm(vm_id);
            }
            VmDestructionRequest { vm_id } => {
                self.on_vm_destruction_request(vm_id);
            }
            VmDeleted { vm_id } => {
                self.on_vm_deleted(vm_id);
            }
            CloudletSubmit { cloudlet_id, vm_id } => {
                self.on_cloudlet_submit(cloudlet_id, vm_id);
            }
            UpdateProcessing {} => {
                let now = self.ctx.time();
                self.update_processing(now);
            }
            KeepAlive {} => {
                let now = self.ctx.time();
                self.update_processing(now);
            }
        })
    }
}

//! Fixed-width observation snapshot assembly.

use serde::Serialize;

use crate::core::vm::VmStatus;
use crate::simulation::CloudSimulation;

/// Padded numeric snapshot of the datacenter and queue state.
///
/// Host arrays are sized by the host count, VM arrays by the
/// `max_potential_vms` bound computed once at reset, so the layout never
/// changes within an episode. Numeric unknowns pad with 0; the vm→host map
/// pads with −1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub host_cpu_usage: Vec<f64>,
    pub host_ram_usage: Vec<f64>,
    /// CPU load per VM slot, indexed by VM id.
    pub vm_cpu_usage: Vec<f64>,
    /// Free cores per VM slot.
    pub vm_available_cores: Vec<i64>,
    /// 0 = empty slot, 1 = S, 2 = M, 3 = L.
    pub vm_types: Vec<i32>,
    /// Hosting host id per VM slot, −1 for empty slots.
    pub vm_host_map: Vec<i32>,
    pub waiting_cloudlets: usize,
    /// Core demand of the cloudlet at the head of the wait queue.
    pub next_cloudlet_cores: u32,
    pub actual_vm_count: usize,
    pub actual_host_count: usize,
    /// Flattened Host→VM→Cloudlet topology:
    /// `[total_cores, host_count, (host_cores, vm_count, (vm_cores,
    /// cloudlet_count, (cloudlet_cores, 0)*)*)*]`.
    pub infrastructure_tree: Vec<i64>,
}

/// Builds the current observation from the live simulation state.
pub fn observe(sim: &CloudSimulation, max_potential_vms: usize) -> Observation {
    let datacenter = sim.datacenter();
    let datacenter = datacenter.borrow();
    let registry = sim.vm_registry();
    let registry = registry.borrow();
    let broker = sim.broker();
    let broker = broker.borrow();

    let host_count = datacenter.hosts().len();
    let mut host_cpu_usage = vec![0.0; host_count];
    let mut host_ram_usage = vec![0.0; host_count];
    for (index, (&host_id, host)) in datacenter.hosts().iter().enumerate() {
        host_cpu_usage[index] = datacenter.host_cpu_utilization(host_id);
        host_ram_usage[index] = host.ram_usage_ratio();
    }

    let mut vm_cpu_usage = vec![0.0; max_potential_vms];
    let mut vm_available_cores = vec![0_i64; max_potential_vms];
    let mut vm_types = vec![0_i32; max_potential_vms];
    let mut vm_host_map = vec![-1_i32; max_potential_vms];
    let mut actual_vm_count = 0;
    for &vm_id in &broker.running_vms() {
        let vm = match registry.get(vm_id) {
            Some(vm) => vm,
            None => continue,
        };
        let vm = vm.borrow();
        let slot = vm_id as usize;
        if slot >= max_potential_vms {
            log::warn!(
                "vm id {} does not fit the observation arrays of size {}",
                vm_id,
                max_potential_vms
            );
            continue;
        }
        vm_cpu_usage[slot] = vm.cpu_utilization();
        vm_available_cores[slot] = vm.scheduler().free_cores() as i64;
        vm_types[slot] = vm.vm_type().code();
        vm_host_map[slot] = vm.host_id().map(|id| id as i32).unwrap_or(-1);
        actual_vm_count += 1;
    }

    let mut tree = Vec::new();
    tree.push(datacenter.total_cores() as i64);
    tree.push(host_count as i64);
    for host in datacenter.hosts().values() {
        let running: Vec<_> = host
            .vm_ids()
            .iter()
            .filter_map(|id| registry.get(*id))
            .filter(|vm| vm.borrow().status() == VmStatus::Running)
            .collect();
        tree.push(host.total_cores() as i64);
        tree.push(running.len() as i64);
        for vm in running {
            let vm = vm.borrow();
            let cloudlet_cores = vm.scheduler().cloudlet_cores();
            tree.push(vm.cores() as i64);
            tree.push(cloudlet_cores.len() as i64);
            for cores in cloudlet_cores {
                tree.push(cores as i64);
                tree.push(0);
            }
        }
    }

    Observation {
        host_cpu_usage,
        host_ram_usage,
        vm_cpu_usage,
        vm_available_cores,
        vm_types,
        vm_host_map,
        waiting_cloudlets: broker.waiting_count(),
        next_cloudlet_cores: broker.peek_waiting_cores().unwrap_or(0),
        actual_vm_count,
        actual_host_count: host_count,
        infrastructure_tree: tree,
    }
}

//! Physical hosts and their resource provisioning.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::common::SuitabilityVerdict;
use crate::core::vm::Vm;

/// A point of the host's utilization history kept for post-run analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HostStateHistoryEntry {
    pub time: f64,
    /// MIPS currently demanded by the cloudlets of the VMs on this host.
    pub requested_mips: f64,
    /// MIPS reserved by the VMs placed on this host.
    pub allocated_mips: f64,
    pub active: bool,
}

/// A physical server with an ordered list of processing elements and fixed
/// RAM, bandwidth and storage capacities. Installed VMs reserve a slice of
/// every dimension; the sums never exceed capacity.
pub struct Host {
    pub id: u32,
    pes: Vec<u64>,
    ram: u64,
    bw: u64,
    storage: u64,
    cores_allocated: u32,
    ram_allocated: u64,
    bw_allocated: u64,
    storage_allocated: u64,
    vms: BTreeSet<u32>,
    state_history: Vec<HostStateHistoryEntry>,
}

impl Host {
    pub fn new(id: u32, pes: u32, pe_mips: u64, ram: u64, bw: u64, storage: u64) -> Self {
        Self {
            id,
            pes: vec![pe_mips; pes as usize],
            ram,
            bw,
            storage,
            cores_allocated: 0,
            ram_allocated: 0,
            bw_allocated: 0,
            storage_allocated: 0,
            vms: BTreeSet::new(),
            state_history: Vec::new(),
        }
    }

    pub fn total_cores(&self) -> u32 {
        self.pes.len() as u32
    }

    pub fn pe_mips(&self) -> u64 {
        self.pes[0]
    }

    pub fn total_mips(&self) -> u64 {
        self.pes.iter().sum()
    }

    pub fn free_cores(&self) -> u32 {
        self.total_cores() - self.cores_allocated
    }

    pub fn cores_allocated(&self) -> u32 {
        self.cores_allocated
    }

    pub fn ram_usage_ratio(&self) -> f64 {
        self.ram_allocated as f64 / self.ram as f64
    }

    pub fn cpu_allocation_ratio(&self) -> f64 {
        self.cores_allocated as f64 / self.total_cores() as f64
    }

    pub fn is_active(&self) -> bool {
        !self.vms.is_empty()
    }

    pub fn vm_ids(&self) -> &BTreeSet<u32> {
        &self.vms
    }

    /// Checks every resource dimension against the VM's demand.
    pub fn can_host(&self, vm: &Vm) -> SuitabilityVerdict {
        if self.free_cores() < vm.cores() {
            return SuitabilityVerdict::NotEnoughCores;
        }
        if self.ram - self.ram_allocated < vm.ram() {
            return SuitabilityVerdict::NotEnoughRam;
        }
        if self.bw - self.bw_allocated < vm.bw() {
            return SuitabilityVerdict::NotEnoughBandwidth;
        }
        if self.storage - self.storage_allocated < vm.storage() {
            return SuitabilityVerdict::NotEnoughStorage;
        }
        SuitabilityVerdict::Success
    }

    /// Reserves resources for the VM. Fails with the violated dimension and
    /// leaves the host untouched when the VM does not fit.
    pub fn install_vm(&mut self, vm: &Vm) -> SuitabilityVerdict {
        let verdict = self.can_host(vm);
        if verdict != SuitabilityVerdict::Success {
            return verdict;
        }
        self.cores_allocated += vm.cores();
        self.ram_allocated += vm.ram();
        self.bw_allocated += vm.bw();
        self.storage_allocated += vm.storage();
        self.vms.insert(vm.id);
        SuitabilityVerdict::Success
    }

    /// Releases the resources previously reserved for the VM.
    pub fn remove_vm(&mut self, vm: &Vm) {
        if self.vms.remove(&vm.id) {
            self.cores_allocated -= vm.cores();
            self.ram_allocated -= vm.ram();
            self.bw_allocated -= vm.bw();
            self.storage_allocated -= vm.storage();
        }
    }

    /// Appends a history entry when the reported utilization differs from
    /// the previous one.
    pub fn record_state(&mut self, time: f64, requested_mips: f64, allocated_mips: f64) {
        let entry = HostStateHistoryEntry {
            time,
            requested_mips,
            allocated_mips,
            active: self.is_active(),
        };
        match self.state_history.last() {
            Some(last)
                if last.requested_mips == entry.requested_mips
                    && last.allocated_mips == entry.allocated_mips
                    && last.active == entry.active => {}
            _ => self.state_history.push(entry),
        }
    }

    pub fn state_history(&self) -> &[HostStateHistoryEntry] {
        &self.state_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationConfig;
    use crate::core::vm::{Vm, VmType};

    fn config() -> SimulationConfig {
        SimulationConfig {
            small_vm_pes: 2,
            small_vm_ram: 1024,
            small_vm_bw: 100,
            small_vm_storage: 1000,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn install_reserves_and_remove_releases() {
        let config = config();
        let mut host = Host::new(0, 4, 1000, 4096, 1000, 100_000);
        let vm = Vm::new(0, VmType::Small, &config);

        assert_eq!(host.install_vm(&vm), SuitabilityVerdict::Success);
        assert_eq!(host.free_cores(), 2);
        assert!(host.is_active());

        host.remove_vm(&vm);
        assert_eq!(host.free_cores(), 4);
        assert!(!host.is_active());
    }

    #[test]
    fn rejects_on_first_exceeded_dimension() {
        let config = config();
        let mut host = Host::new(0, 4, 1000, 4096, 1000, 100_000);
        let small = Vm::new(0, VmType::Small, &config);
        let large = Vm::new(1, VmType::Large, &config);

        assert_eq!(host.install_vm(&small), SuitabilityVerdict::Success);
        // Large wants 8 cores, only 2 left.
        assert_eq!(host.can_host(&large), SuitabilityVerdict::NotEnoughCores);
        assert_eq!(host.install_vm(&large), SuitabilityVerdict::NotEnoughCores);
        assert_eq!(host.cores_allocated(), 2);
    }
}

//! VM placement policies.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::common::SuitabilityVerdict;
use crate::core::host::Host;
use crate::core::vm::Vm;

/// Why no host was selected for a VM.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("target host {host_id} cannot take the VM: {verdict}")]
    TargetUnsuitable { host_id: u32, verdict: SuitabilityVerdict },
    #[error("no suitable host")]
    NoSuitableHost,
}

/// Maps a VM to a host. Implementations may keep internal iteration state;
/// suitability is always checked through host provisioning.
pub trait VmPlacementPolicy {
    fn select_host(&mut self, vm: &Vm, hosts: &BTreeMap<u32, Host>) -> Result<u32, PlacementError>;
}

/// Honors an explicit `TYPE-hostID` targeting suffix in the VM description
/// when one is present, and falls back to round-robin over the hosts
/// otherwise, skipping unsuitable ones. Round-robin ties are broken by host
/// id ascending.
///
/// A parseable target that points at an existing host is attempted on that
/// host only; a dangling target (unknown host id) degrades to the
/// round-robin path.
pub struct TargetedRoundRobin {
    next_index: usize,
}

impl TargetedRoundRobin {
    pub fn new() -> Self {
        Self { next_index: 0 }
    }
}

impl Default for TargetedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl VmPlacementPolicy for TargetedRoundRobin {
    fn select_host(&mut self, vm: &Vm, hosts: &BTreeMap<u32, Host>) -> Result<u32, PlacementError> {
        if let Some(host_id) = vm.target_host() {
            if let Some(host) = hosts.get(&host_id) {
                return match host.can_host(vm) {
                    SuitabilityVerdict::Success => Ok(host_id),
                    verdict => Err(PlacementError::TargetUnsuitable { host_id, verdict }),
                };
            }
            log::warn!(
                "vm #{} targets host #{} which does not exist, falling back to round-robin",
                vm.id,
                host_id
            );
        }

        let ids: Vec<u32> = hosts.keys().copied().collect();
        if ids.is_empty() {
            return Err(PlacementError::NoSuitableHost);
        }
        for offset in 0..ids.len() {
            let index = (self.next_index + offset) % ids.len();
            let host = &hosts[&ids[index]];
            if host.can_host(vm) == SuitabilityVerdict::Success {
                self.next_index = index + 1;
                return Ok(ids[index]);
            }
        }
        Err(PlacementError::NoSuitableHost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationConfig;
    use crate::core::vm::VmType;

    fn setup(hosts_cores: &[u32]) -> (BTreeMap<u32, Host>, SimulationConfig) {
        let config = SimulationConfig {
            small_vm_pes: 2,
            small_vm_ram: 1024,
            small_vm_bw: 100,
            small_vm_storage: 1000,
            ..SimulationConfig::default()
        };
        let hosts = hosts_cores
            .iter()
            .enumerate()
            .map(|(id, &cores)| {
                (
                    id as u32,
                    Host::new(id as u32, cores, 1000, 65536, 10000, 1_000_000),
                )
            })
            .collect();
        (hosts, config)
    }

    #[test]
    fn round_robin_cycles_over_suitable_hosts() {
        let (hosts, config) = setup(&[4, 4, 4]);
        let mut policy = TargetedRoundRobin::new();

        let picks: Vec<u32> = (0..4)
            .map(|id| {
                let vm = Vm::new(id, VmType::Small, &config);
                policy.select_host(&vm, &hosts).unwrap()
            })
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn targeted_placement_does_not_fall_back_when_unsuitable() {
        let (mut hosts, config) = setup(&[4, 4]);
        // Fill host 1 completely.
        let filler = Vm::new(10, VmType::Medium, &config);
        assert_eq!(
            hosts.get_mut(&1).unwrap().install_vm(&filler),
            SuitabilityVerdict::Success
        );

        let mut policy = TargetedRoundRobin::new();
        let vm = Vm::new(0, VmType::Small, &config).with_target_host(1);
        assert!(matches!(
            policy.select_host(&vm, &hosts),
            Err(PlacementError::TargetUnsuitable { host_id: 1, .. })
        ));
    }

    #[test]
    fn dangling_target_degrades_to_round_robin() {
        let (hosts, config) = setup(&[4]);
        let mut policy = TargetedRoundRobin::new();
        let vm = Vm::new(0, VmType::Small, &config).with_target_host(99);
        assert_eq!(policy.select_host(&vm, &hosts).unwrap(), 0);
    }
}

//! Agent actions.

use serde::Serialize;

use crate::core::vm::VmType;

/// One agent decision per timestep.
///
/// The wire form is a 4-tuple `[action_type, target_vm_id, target_host_id,
/// vm_type_index]`; only the fields relevant to the chosen variant are
/// read. A single-integer form exists for policies that do not manage the
/// fleet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Action {
    /// Do nothing this step.
    NoOp,
    /// Bind the head of the wait queue to the VM with this id.
    AssignToVm { vm_id: u32 },
    /// Create a VM of the given type on the given host.
    CreateVm { host_id: u32, vm_type: VmType },
    /// Destroy the VM at this index of the running list.
    DestroyVm { vm_index: usize },
}

impl Action {
    /// Decodes the 4-tuple form. Returns `None` when the tuple cannot name
    /// any variant (unknown action type, negative id, bad type index);
    /// such input counts as an invalid action for the reward.
    pub fn from_tuple(raw: [i64; 4]) -> Option<Action> {
        match raw[0] {
            0 => Some(Action::NoOp),
            1 => u32::try_from(raw[1]).ok().map(|vm_id| Action::AssignToVm { vm_id }),
            2 => {
                let host_id = u32::try_from(raw[2]).ok()?;
                let vm_type = VmType::from_index(raw[3])?;
                Some(Action::CreateVm { host_id, vm_type })
            }
            3 => usize::try_from(raw[1]).ok().map(|vm_index| Action::DestroyVm { vm_index }),
            _ => None,
        }
    }

    /// Decodes the single-integer form: −1 is a no-op, a non-negative value
    /// assigns the queue head to that VM id.
    pub fn from_index(raw: i64) -> Option<Action> {
        match raw {
            -1 => Some(Action::NoOp),
            id if id >= 0 => Some(Action::AssignToVm { vm_id: id as u32 }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_all_variants() {
        assert_eq!(Action::from_tuple([0, 0, 0, 0]), Some(Action::NoOp));
        assert_eq!(Action::from_tuple([1, 5, 0, 0]), Some(Action::AssignToVm { vm_id: 5 }));
        assert_eq!(
            Action::from_tuple([2, 0, 3, 2]),
            Some(Action::CreateVm {
                host_id: 3,
                vm_type: VmType::Large
            })
        );
        assert_eq!(Action::from_tuple([3, 1, 0, 0]), Some(Action::DestroyVm { vm_index: 1 }));
    }

    #[test]
    fn rejects_malformed_tuples() {
        assert_eq!(Action::from_tuple([4, 0, 0, 0]), None);
        assert_eq!(Action::from_tuple([1, -2, 0, 0]), None);
        assert_eq!(Action::from_tuple([2, 0, 0, 3]), None);
    }

    #[test]
    fn single_integer_form() {
        assert_eq!(Action::from_index(-1), Some(Action::NoOp));
        assert_eq!(Action::from_index(2), Some(Action::AssignToVm { vm_id: 2 }));
        assert_eq!(Action::from_index(-5), None);
    }
}

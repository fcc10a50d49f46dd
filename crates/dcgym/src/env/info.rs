//! Auxiliary per-step information returned alongside the observation.

use serde::Serialize;

/// The reward components of one step. All are penalties (≤ 0); the total
/// reward is exactly their sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RewardComponents {
    pub wait_time: f64,
    pub unutilization: f64,
    pub cost: f64,
    pub queue_penalty: f64,
    pub invalid_action: f64,
}

impl RewardComponents {
    pub fn total(&self) -> f64 {
        self.wait_time + self.unutilization + self.cost + self.queue_penalty + self.invalid_action
    }
}

/// Outcome record of a simulation step.
#[derive(Debug, Clone, Serialize)]
pub struct StepInfo {
    pub assignment_success: bool,
    pub create_vm_attempted: bool,
    pub create_vm_success: bool,
    pub destroy_vm_attempted: bool,
    pub destroy_vm_success: bool,
    pub invalid_action_taken: bool,
    /// Host touched by a create/destroy action, −1 when none.
    pub host_affected_id: i32,
    /// Cores added (positive) or removed (negative) by the action.
    pub cores_changed: i64,
    pub current_clock: f64,
    pub reward: RewardComponents,
    /// Flattened Host→VM→Cloudlet topology at the end of the step.
    pub observation_tree: Vec<i64>,
    /// Wait times of the cloudlets that finished during this step.
    pub completed_wait_times: Vec<f64>,
}

impl StepInfo {
    /// The observation tree as a JSON array, for transports that ship the
    /// info record as a flat dictionary.
    pub fn observation_tree_json(&self) -> String {
        serde_json::to_string(&self.observation_tree).unwrap_or_default()
    }

    /// The finished wait times as a JSON array.
    pub fn completed_wait_times_json(&self) -> String {
        serde_json::to_string(&self.completed_wait_times).unwrap_or_default()
    }

    /// Info for the reset result: no action has been taken yet.
    pub fn at_reset(clock: f64, observation_tree: Vec<i64>) -> Self {
        Self {
            assignment_success: false,
            create_vm_attempted: false,
            create_vm_success: false,
            destroy_vm_attempted: false,
            destroy_vm_success: false,
            invalid_action_taken: false,
            host_affected_id: -1,
            cores_changed: 0,
            current_clock: clock,
            reward: RewardComponents::default(),
            observation_tree,
            completed_wait_times: Vec::new(),
        }
    }
}

//! The step/reset interface exposed to an external learning agent.

pub mod action;
pub mod info;
pub mod observation;

use std::fmt::Write as _;

use thiserror::Error;

use simcore::RunStatus;

use crate::core::config::SimulationConfig;
use crate::simulation::{CloudSimulation, SimulationError};

pub use action::Action;
pub use info::{RewardComponents, StepInfo};
pub use observation::{observe, Observation};

/// Errors surfaced to the external caller. Only configuration and workload
/// problems ever land here; invalid agent actions are absorbed into the
/// reward instead.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment is not configured, call configure() first")]
    NotConfigured,
    #[error("environment holds no active episode, call reset() first")]
    NotReset,
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Everything one `step` call returns.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

#[derive(Default)]
struct ActionOutcome {
    assignment_success: bool,
    create_vm_attempted: bool,
    create_vm_success: bool,
    destroy_vm_attempted: bool,
    destroy_vm_success: bool,
    invalid: bool,
    host_affected_id: i32,
    cores_changed: i64,
}

impl ActionOutcome {
    fn new() -> Self {
        Self {
            host_affected_id: -1,
            ..Self::default()
        }
    }
}

/// Simulation environment for agent-directed cloudlet load balancing.
///
/// Usage is the classic control-plane loop: `configure` once, then any
/// number of `reset`/`step` episodes, then `close`.
pub struct LoadBalancingEnv {
    config: Option<SimulationConfig>,
    sim: Option<CloudSimulation>,
    current_step: u32,
    max_potential_vms: usize,
}

impl LoadBalancingEnv {
    pub fn new() -> Self {
        Self {
            config: None,
            sim: None,
            current_step: 0,
            max_potential_vms: 0,
        }
    }

    /// Stores and validates the configuration. Fails fast on anything that
    /// would make the simulation unbuildable; nothing is simulated yet.
    pub fn configure(&mut self, config: SimulationConfig) -> Result<(), EnvError> {
        config.validate().map_err(SimulationError::Config)?;
        self.config = Some(config);
        Ok(())
    }

    /// Tears down any previous episode and builds a fresh simulation from
    /// the stored configuration and the given seed. Returns the initial
    /// observation and an empty info record.
    pub fn reset(&mut self, seed: u64) -> Result<(Observation, StepInfo), EnvError> {
        let config = self.config.clone().ok_or(EnvError::NotConfigured)?;
        self.sim = None;
        self.current_step = 0;

        let sim = CloudSimulation::new(config.clone(), seed)?;
        self.max_potential_vms = Self::compute_max_potential_vms(&config, sim.total_host_cores());
        self.sim = Some(sim);

        let sim = self.sim.as_ref().unwrap();
        let observation = observe(sim, self.max_potential_vms);
        let info = StepInfo::at_reset(sim.time(), observation.infrastructure_tree.clone());
        Ok((observation, info))
    }

    /// Padding bound for the per-VM observation arrays: the configured
    /// override when present, otherwise how many smallest VMs the hosts
    /// could hold with 10% head-room for churn.
    fn compute_max_potential_vms(config: &SimulationConfig, total_host_cores: u64) -> usize {
        let derived = (1.1 * total_host_cores as f64 / config.small_vm_pes as f64).ceil() as usize;
        let bound = config.max_potential_vms.unwrap_or(derived);
        if bound == 0 {
            let initial =
                (config.initial_s_vm_count + config.initial_m_vm_count + config.initial_l_vm_count) as usize;
            return initial.max(10);
        }
        bound
    }

    /// Applies the decoded action, advances the simulation by one timestep
    /// and returns the new observation, the reward and the info record.
    pub fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        self.do_step(Some(action))
    }

    /// Accepts the raw 4-tuple form. A tuple that decodes to no action is
    /// executed as a penalized no-op.
    pub fn step_tuple(&mut self, raw: [i64; 4]) -> Result<StepResult, EnvError> {
        self.do_step(Action::from_tuple(raw))
    }

    /// Accepts the single-integer form (−1 = no-op, n = assign to VM n).
    pub fn step_index(&mut self, raw: i64) -> Result<StepResult, EnvError> {
        self.do_step(Action::from_index(raw))
    }

    fn do_step(&mut self, action: Option<Action>) -> Result<StepResult, EnvError> {
        if self.sim.is_none() {
            return Err(EnvError::NotReset);
        }
        self.current_step += 1;

        let max_potential_vms = self.max_potential_vms;
        let current_step = self.current_step;
        let sim = self.sim.as_mut().unwrap();
        let config = sim.config();

        sim.begin_timestep();
        let outcome = Self::apply_action(sim, action);
        let status = sim.advance_one_timestep();
        let engine_failed = status == RunStatus::BudgetExhausted;

        let reward = Self::compute_reward(sim, &config, outcome.invalid);
        let observation = observe(sim, max_potential_vms);

        let terminated = engine_failed || !sim.is_running();
        let truncated = !terminated && current_step >= config.max_episode_length;

        let info = StepInfo {
            assignment_success: outcome.assignment_success,
            create_vm_attempted: outcome.create_vm_attempted,
            create_vm_success: outcome.create_vm_success,
            destroy_vm_attempted: outcome.destroy_vm_attempted,
            destroy_vm_success: outcome.destroy_vm_success,
            invalid_action_taken: outcome.invalid,
            host_affected_id: outcome.host_affected_id,
            cores_changed: outcome.cores_changed,
            current_clock: sim.time(),
            reward,
            observation_tree: observation.infrastructure_tree.clone(),
            completed_wait_times: sim.finished_wait_times(),
        };

        Ok(StepResult {
            observation,
            reward: reward.total(),
            terminated,
            truncated,
            info,
        })
    }

    fn apply_action(sim: &mut CloudSimulation, action: Option<Action>) -> ActionOutcome {
        let mut outcome = ActionOutcome::new();
        match action {
            None => {
                // The raw action named no variant at all.
                outcome.invalid = true;
            }
            Some(Action::NoOp) => {
                // Doing nothing while work is queued is a wasted step.
                outcome.invalid = sim.broker().borrow().has_waiting_cloudlets();
            }
            Some(Action::AssignToVm { vm_id }) => {
                let has_waiting = sim.broker().borrow().has_waiting_cloudlets();
                if !has_waiting {
                    outcome.invalid = true;
                } else {
                    let result = sim.broker().borrow_mut().assign_next_to_vm(vm_id);
                    match result {
                        Ok(_) => outcome.assignment_success = true,
                        Err(_) => outcome.invalid = true,
                    }
                }
            }
            Some(Action::CreateVm { host_id, vm_type }) => {
                outcome.create_vm_attempted = true;
                match sim.create_vm_on_host(vm_type, host_id) {
                    Some((_, cores)) => {
                        outcome.create_vm_success = true;
                        outcome.host_affected_id = host_id as i32;
                        outcome.cores_changed = cores as i64;
                    }
                    None => outcome.invalid = true,
                }
            }
            Some(Action::DestroyVm { vm_index }) => {
                outcome.destroy_vm_attempted = true;
                match sim.destroy_vm_by_index(vm_index) {
                    Some((host_id, cores)) => {
                        outcome.destroy_vm_success = true;
                        outcome.host_affected_id = host_id as i32;
                        outcome.cores_changed = -(cores as i64);
                    }
                    None => outcome.invalid = true,
                }
            }
        }
        outcome
    }

    fn compute_reward(sim: &CloudSimulation, config: &SimulationConfig, invalid: bool) -> RewardComponents {
        let mut reward = RewardComponents::default();

        let waits = sim.finished_wait_times();
        if !waits.is_empty() {
            let mean = waits.iter().sum::<f64>() / waits.len() as f64;
            reward.wait_time = -config.reward_wait_time_coef * mean.ln_1p();
        }

        let registry = sim.vm_registry();
        let registry = registry.borrow();
        let utils: Vec<f64> = sim
            .broker()
            .borrow()
            .running_vms()
            .iter()
            .filter_map(|&id| registry.get(id))
            .map(|vm| vm.borrow().cpu_utilization())
            .collect();
        if !utils.is_empty() {
            let mean = utils.iter().sum::<f64>() / utils.len() as f64;
            let variance = utils.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / utils.len() as f64;
            reward.unutilization =
                -config.reward_unutilization_coef * (variance.sqrt() + (mean - 0.95).abs());
        }

        let arrived = sim.arrived_cloudlets_count();
        if arrived > 0 {
            let not_yet_running = sim.not_yet_running_cloudlets_count();
            reward.queue_penalty =
                -config.reward_queue_penalty_coef * (not_yet_running as f64 / arrived as f64);
        }

        if invalid {
            reward.invalid_action = -config.reward_invalid_action_coef;
        }

        if config.cost_reward_enabled {
            reward.cost = -config.reward_cost_coef
                * (sim.allocated_cores() as f64 / sim.total_host_cores() as f64);
        }

        reward
    }

    /// Human-readable dump of the current state, for debugging drivers.
    pub fn render(&self) -> String {
        let sim = match &self.sim {
            Some(sim) => sim,
            None => return "simulation not initialized".to_string(),
        };
        let observation = observe(sim, self.max_potential_vms);
        let mut out = String::new();
        let _ = writeln!(out, "Time: {:.3} | Step: {}", sim.time(), self.current_step);
        let _ = write!(out, "Hosts ({}): ", observation.actual_host_count);
        for i in 0..observation.actual_host_count {
            let _ = write!(
                out,
                "H{}[CPU:{:.1}% RAM:{:.1}%] ",
                i,
                observation.host_cpu_usage[i] * 100.0,
                observation.host_ram_usage[i] * 100.0
            );
        }
        let _ = writeln!(out);
        let _ = write!(
            out,
            "VMs ({} / {} potential): ",
            observation.actual_vm_count, self.max_potential_vms
        );
        for slot in 0..self.max_potential_vms {
            if observation.vm_types[slot] > 0 {
                let tag = match observation.vm_types[slot] {
                    1 => "S",
                    2 => "M",
                    3 => "L",
                    _ => "?",
                };
                let _ = write!(
                    out,
                    "V{}({}@H{})[CPU:{:.1}%] ",
                    slot,
                    tag,
                    observation.vm_host_map[slot],
                    observation.vm_cpu_usage[slot] * 100.0
                );
            }
        }
        if observation.actual_vm_count == 0 {
            let _ = write!(out, "(None)");
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Queue: {} waiting | Next cores: {}",
            observation.waiting_cloudlets, observation.next_cloudlet_cores
        );
        let _ = writeln!(out, "Infrastructure tree:");
        Self::render_tree(&mut out, &observation.infrastructure_tree);
        out
    }

    fn render_tree(out: &mut String, tree: &[i64]) {
        let mut idx = 0;
        let mut next = || {
            let value = tree.get(idx).copied().unwrap_or(0);
            idx += 1;
            value
        };
        let total_cores = next();
        let host_count = next();
        let _ = writeln!(out, "  Total cores: {}", total_cores);
        let _ = writeln!(out, "  Hosts: {}", host_count);
        for h in 0..host_count {
            let host_cores = next();
            let vm_count = next();
            let _ = writeln!(out, "    Host[{}]: cores={} VMs={}", h, host_cores, vm_count);
            for v in 0..vm_count {
                let vm_cores = next();
                let cloudlet_count = next();
                let _ = writeln!(out, "      VM[{}]: cores={} cloudlets={}", v, vm_cores, cloudlet_count);
                for c in 0..cloudlet_count {
                    let cloudlet_cores = next();
                    next(); // cloudlets have no children
                    let _ = writeln!(out, "        Cloudlet[{}]: cores={}", c, cloudlet_cores);
                }
            }
        }
    }

    /// Read access to the live simulation for drivers that need statistics
    /// beyond the observation.
    pub fn simulation(&self) -> Option<&CloudSimulation> {
        self.sim.as_ref()
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn max_potential_vms(&self) -> usize {
        self.max_potential_vms
    }

    /// Ends the episode and releases the simulation. Cloudlets still in
    /// flight are marked cancelled. Further `step` calls fail until the
    /// next `reset`.
    pub fn close(&mut self) {
        if let Some(sim) = self.sim.take() {
            let pool = sim.cloudlet_pool();
            for (_, cloudlet) in pool.borrow().iter() {
                let mut cloudlet = cloudlet.borrow_mut();
                if cloudlet.status() != crate::core::cloudlet::CloudletStatus::Success {
                    cloudlet.mark_cancelled();
                }
            }
            log::info!(
                "closing environment at clock {:.3}: {} of {} cloudlets finished",
                sim.time(),
                sim.broker().borrow().finished_count(),
                pool.borrow().len()
            );
        }
    }
}

impl Default for LoadBalancingEnv {
    fn default() -> Self {
        Self::new()
    }
}

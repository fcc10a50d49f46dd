//! Simulation configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Workload trace format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadMode {
    /// Standard Workload Format (whitespace-delimited job log).
    Swf,
    /// CSV with `job_id,arrival_time,mi,allocated_cores` columns.
    Csv,
}

/// Error raised when the configuration cannot describe a runnable
/// simulation. Detected eagerly, before any simulation state is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parameter `{0}` must be positive")]
    NonPositive(&'static str),
    #[error("cloudlet trace file is not set")]
    MissingTraceFile,
}

/// The full parameter record consumed by the simulation, the broker and the
/// agent bridge. Materialized once at configuration time; no component does
/// string-keyed lookups at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Name used in log prefixes and result artifacts.
    pub simulation_name: String,

    // Host fleet.
    pub hosts_count: u32,
    /// Processing elements (cores) per host.
    pub host_pes: u32,
    /// MIPS capacity of a single host core.
    pub host_pe_mips: u64,
    /// Host RAM in MB.
    pub host_ram: u64,
    /// Host bandwidth in Mbps.
    pub host_bw: u64,
    /// Host storage in MB.
    pub host_storage: u64,

    // Base (small) VM shape. Medium and large shapes are derived through
    // the multipliers below.
    pub small_vm_pes: u32,
    pub small_vm_ram: u64,
    pub small_vm_bw: u64,
    pub small_vm_storage: u64,
    pub medium_vm_multiplier: u32,
    pub large_vm_multiplier: u32,

    // Initial fleet submitted at reset.
    pub initial_s_vm_count: u32,
    pub initial_m_vm_count: u32,
    pub initial_l_vm_count: u32,

    // Workload ingestion.
    pub workload_mode: WorkloadMode,
    pub cloudlet_trace_file: String,
    /// MIPS reference used to convert SWF runtimes into lengths.
    pub workload_reader_mips: u64,
    pub max_cloudlets_to_create_from_workload_file: usize,
    pub split_large_cloudlets: bool,
    /// Core cap above which a cloudlet is split into pieces.
    pub max_cloudlet_pes: u32,

    // Time control.
    /// Agent-visible step interval in simulated seconds.
    pub simulation_timestep: f64,
    /// Lower bound on any event latency inside the engine.
    pub min_time_between_events: f64,
    pub vm_startup_delay: f64,
    pub vm_shutdown_delay: f64,

    // Episode control.
    pub max_episode_length: u32,
    /// Fixed size of the per-VM observation arrays. When unset it is derived
    /// at reset as `ceil(1.1 * total_host_cores / small_vm_pes)`.
    pub max_potential_vms: Option<usize>,

    // Reward shape.
    pub reward_wait_time_coef: f64,
    pub reward_unutilization_coef: f64,
    pub reward_cost_coef: f64,
    pub reward_queue_penalty_coef: f64,
    pub reward_invalid_action_coef: f64,
    /// Includes the allocated-cores cost term in the reward. Off by default;
    /// only meaningful when the agent manages the fleet size.
    pub cost_reward_enabled: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation_name: "datacenter".to_string(),
            hosts_count: 10,
            host_pes: 16,
            host_pe_mips: 2000,
            host_ram: 65536,
            host_bw: 10000,
            host_storage: 1_000_000,
            small_vm_pes: 2,
            small_vm_ram: 8192,
            small_vm_bw: 1000,
            small_vm_storage: 20000,
            medium_vm_multiplier: 2,
            large_vm_multiplier: 4,
            initial_s_vm_count: 2,
            initial_m_vm_count: 1,
            initial_l_vm_count: 1,
            workload_mode: WorkloadMode::Swf,
            cloudlet_trace_file: String::new(),
            workload_reader_mips: 2000,
            max_cloudlets_to_create_from_workload_file: usize::MAX,
            split_large_cloudlets: true,
            max_cloudlet_pes: 8,
            simulation_timestep: 1.0,
            min_time_between_events: 0.1,
            vm_startup_delay: 56.0,
            vm_shutdown_delay: 10.0,
            max_episode_length: 1000,
            max_potential_vms: None,
            reward_wait_time_coef: 0.1,
            reward_unutilization_coef: 0.85,
            reward_cost_coef: 0.5,
            reward_queue_penalty_coef: 0.05,
            reward_invalid_action_coef: 1.0,
            cost_reward_enabled: false,
        }
    }
}

impl SimulationConfig {
    /// Checks that the configuration describes a runnable simulation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts_count == 0 {
            return Err(ConfigError::NonPositive("hosts_count"));
        }
        if self.host_pes == 0 {
            return Err(ConfigError::NonPositive("host_pes"));
        }
        if self.host_pe_mips == 0 {
            return Err(ConfigError::NonPositive("host_pe_mips"));
        }
        if self.small_vm_pes == 0 {
            return Err(ConfigError::NonPositive("small_vm_pes"));
        }
        if self.medium_vm_multiplier == 0 {
            return Err(ConfigError::NonPositive("medium_vm_multiplier"));
        }
        if self.large_vm_multiplier == 0 {
            return Err(ConfigError::NonPositive("large_vm_multiplier"));
        }
        if self.workload_mode == WorkloadMode::Swf && self.workload_reader_mips == 0 {
            return Err(ConfigError::NonPositive("workload_reader_mips"));
        }
        if self.max_cloudlet_pes == 0 {
            return Err(ConfigError::NonPositive("max_cloudlet_pes"));
        }
        if self.simulation_timestep <= 0.0 {
            return Err(ConfigError::NonPositive("simulation_timestep"));
        }
        if self.min_time_between_events <= 0.0 {
            return Err(ConfigError::NonPositive("min_time_between_events"));
        }
        if self.cloudlet_trace_file.is_empty() {
            return Err(ConfigError::MissingTraceFile);
        }
        Ok(())
    }

    /// Total core count across all hosts.
    pub fn total_host_cores(&self) -> u64 {
        self.hosts_count as u64 * self.host_pes as u64
    }
}

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use dcgym::core::config::{SimulationConfig, WorkloadMode};

static TRACE_COUNTER: AtomicU32 = AtomicU32::new(0);

fn trace_path(name: &str, extension: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "dcgym-{}-{}-{}.{}",
        name,
        std::process::id(),
        TRACE_COUNTER.fetch_add(1, Ordering::Relaxed),
        extension
    ));
    path
}

/// Writes a CSV trace with the standard header. Rows are
/// `(job_id, arrival_time, mi, allocated_cores)`.
pub fn write_csv_trace(name: &str, rows: &[(u64, f64, u64, u32)]) -> String {
    let mut content = String::from("job_id,arrival_time,mi,allocated_cores\n");
    for (id, arrival, mi, cores) in rows {
        content.push_str(&format!("{},{},{},{}\n", id, arrival, mi, cores));
    }
    let path = trace_path(name, "csv");
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn write_raw_trace(name: &str, extension: &str, content: &str) -> String {
    let path = trace_path(name, extension);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

/// One host, one-core small VMs at 1000 MIPS, instant VM startup. Small
/// numbers keep the scenario arithmetic readable.
pub fn base_config(trace_file: String) -> SimulationConfig {
    SimulationConfig {
        hosts_count: 1,
        host_pes: 16,
        host_pe_mips: 1000,
        host_ram: 65536,
        host_bw: 10000,
        host_storage: 1_000_000,
        small_vm_pes: 1,
        small_vm_ram: 1024,
        small_vm_bw: 100,
        small_vm_storage: 10_000,
        initial_s_vm_count: 1,
        initial_m_vm_count: 0,
        initial_l_vm_count: 0,
        workload_mode: WorkloadMode::Csv,
        cloudlet_trace_file: trace_file,
        vm_startup_delay: 0.0,
        vm_shutdown_delay: 0.1,
        simulation_timestep: 1.0,
        min_time_between_events: 0.1,
        max_episode_length: 200,
        ..SimulationConfig::default()
    }
}

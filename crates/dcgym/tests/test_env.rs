mod common;

use common::{base_config, write_csv_trace};

use dcgym::core::cloudlet::CloudletStatus;
use dcgym::core::vm::VmType;
use dcgym::env::{Action, LoadBalancingEnv, StepResult};

fn env_with(config: dcgym::core::config::SimulationConfig, seed: u64) -> LoadBalancingEnv {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut env = LoadBalancingEnv::new();
    env.configure(config).unwrap();
    env.reset(seed).unwrap();
    env
}

fn assert_decomposition(result: &StepResult) {
    let sum = result.info.reward.wait_time
        + result.info.reward.unutilization
        + result.info.reward.cost
        + result.info.reward.queue_penalty
        + result.info.reward.invalid_action;
    assert!((result.reward - sum).abs() < 1e-12);
}

/// Steps with no-ops until the episode terminates, returning every result.
fn run_out(env: &mut LoadBalancingEnv, max_steps: usize) -> Vec<StepResult> {
    let mut results = Vec::new();
    for _ in 0..max_steps {
        let result = env.step(Action::NoOp).unwrap();
        let done = result.terminated || result.truncated;
        results.push(result);
        if done {
            return results;
        }
    }
    panic!("episode did not terminate within {} steps", max_steps);
}

#[test]
// Single cloudlet on a single VM: assigned at step 1, runs 10 seconds,
// finishes with (almost) no wait time.
fn single_cloudlet_single_vm() {
    let trace = write_csv_trace("s1", &[(1, 0.0, 10000, 1)]);
    let mut env = env_with(base_config(trace), 1);

    let result = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(result.info.assignment_success);
    assert!(!result.info.invalid_action_taken);
    assert_eq!(result.observation.waiting_cloudlets, 0);
    assert_decomposition(&result);

    let sim = env.simulation().unwrap();
    let cloudlet = sim.cloudlet_pool().borrow().get(1).unwrap();
    assert_eq!(cloudlet.borrow().status(), CloudletStatus::InExec);
    assert_eq!(cloudlet.borrow().vm_id(), Some(0));

    let results = run_out(&mut env, 30);
    let last = results.last().unwrap();
    assert!(last.terminated);
    assert!(!last.truncated);

    let sim = env.simulation().unwrap();
    assert_eq!(sim.broker().borrow().finished_count(), 1);
    let cloudlet = sim.cloudlet_pool().borrow().get(1).unwrap();
    assert_eq!(cloudlet.borrow().status(), CloudletStatus::Success);
    // Finished no earlier than its 10 seconds of work.
    assert!(cloudlet.borrow().finish_time().unwrap() >= 10.0);

    // The only wait time recorded is dispatch latency, far below a second.
    let waits: Vec<f64> = results
        .iter()
        .flat_map(|r| r.info.completed_wait_times.clone())
        .collect();
    assert_eq!(waits.len(), 1);
    assert!(waits[0] < 0.5);
}

#[test]
// Two cloudlets on a one-core VM: the second queues on the VM's scheduler
// and they finish in submission order.
fn two_cloudlets_fifo_on_one_vm() {
    let trace = write_csv_trace("s2", &[(1, 0.0, 5000, 1), (2, 0.0, 5000, 1)]);
    let mut env = env_with(base_config(trace), 1);

    let first = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(first.info.assignment_success);
    let second = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(second.info.assignment_success);

    {
        let sim = env.simulation().unwrap();
        let registry = sim.vm_registry();
        let registry = registry.borrow();
        let vm = registry.get(0).unwrap();
        assert_eq!(vm.borrow().scheduler().executing_count(), 1);
        assert_eq!(vm.borrow().scheduler().waiting_count(), 1);
    }

    run_out(&mut env, 30);

    let sim = env.simulation().unwrap();
    assert_eq!(sim.broker().borrow().finished_count(), 2);
    let pool = sim.cloudlet_pool();
    let pool = pool.borrow();
    let first_finish = pool.get(1).unwrap().borrow().finish_time().unwrap();
    let second_finish = pool.get(2).unwrap().borrow().finish_time().unwrap();
    assert!(first_finish < second_finish);
    // The second cloudlet started only once the first released the core.
    let second_start = pool.get(2).unwrap().borrow().exec_start_time().unwrap();
    assert!((second_start - first_finish).abs() < 1e-9);
}

#[test]
// Assigning to a VM id that does not exist is absorbed as an invalid
// action: the queue is untouched and only the invalid penalty applies.
fn invalid_vm_id_is_penalized() {
    let trace = write_csv_trace("s3", &[(1, 0.0, 10000, 1)]);
    let mut config = base_config(trace);
    config.reward_wait_time_coef = 0.0;
    config.reward_unutilization_coef = 0.0;
    config.reward_queue_penalty_coef = 0.0;
    config.reward_invalid_action_coef = 1.0;
    let mut env = env_with(config, 1);

    let result = env.step(Action::AssignToVm { vm_id: 99 }).unwrap();
    assert!(result.info.invalid_action_taken);
    assert!(!result.info.assignment_success);
    assert_eq!(result.observation.waiting_cloudlets, 1);
    assert_eq!(result.reward, -1.0);
    assert_eq!(result.info.reward.invalid_action, -1.0);
    assert_decomposition(&result);
}

#[test]
// Destroying a VM with in-flight work re-queues the cloudlet with exactly
// the remaining length; the finished part stays credited through to
// completion on a replacement VM.
fn destroy_vm_preserves_work() {
    let trace = write_csv_trace("s4", &[(1, 0.0, 7600, 1)]);
    let mut env = env_with(base_config(trace), 1);

    let result = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(result.info.assignment_success);
    let exec_start = {
        let sim = env.simulation().unwrap();
        let pool = sim.cloudlet_pool();
        let start = pool.borrow().get(1).unwrap().borrow().exec_start_time().unwrap();
        start
    };

    // Steps 2-4 idle; the destroy lands at step 5 with the clock at 4.0.
    for _ in 0..3 {
        env.step(Action::NoOp).unwrap();
    }
    let destroy = env.step(Action::DestroyVm { vm_index: 0 }).unwrap();
    assert!(destroy.info.destroy_vm_success);
    assert_eq!(destroy.info.host_affected_id, 0);
    assert_eq!(destroy.info.cores_changed, -1);

    {
        let sim = env.simulation().unwrap();
        let pool = sim.cloudlet_pool();
        let pool = pool.borrow();
        let cloudlet = pool.get(1).unwrap();
        let cloudlet = cloudlet.borrow();
        assert_eq!(cloudlet.status(), CloudletStatus::Waiting);
        assert_eq!(cloudlet.vm_id(), None);
        assert_eq!(cloudlet.submission_delay(), 0.0);
        // Destroyed at clock 4.0 after starting at `exec_start`: the
        // executed 1000 MIPS-seconds per second are no longer owed.
        let executed = (4.0 - exec_start) * 1000.0;
        assert!((cloudlet.length() - (7600.0 - executed)).abs() < 1e-6);
        assert!((cloudlet.length() - 3800.0).abs() < 1e-6);
    }

    // Replacement VM, then finish the remaining half.
    let create = env
        .step(Action::CreateVm {
            host_id: 0,
            vm_type: VmType::Small,
        })
        .unwrap();
    assert!(create.info.create_vm_success);
    assert_eq!(create.info.cores_changed, 1);

    let assign = env.step(Action::AssignToVm { vm_id: 1 }).unwrap();
    assert!(assign.info.assignment_success);

    run_out(&mut env, 30);
    let sim = env.simulation().unwrap();
    assert_eq!(sim.broker().borrow().finished_count(), 1);
    let pool = sim.cloudlet_pool();
    let pool = pool.borrow();
    let cloudlet = pool.get(1).unwrap();
    assert_eq!(cloudlet.borrow().status(), CloudletStatus::Success);
    assert!((cloudlet.borrow().finished_mi() - 3800.0).abs() < 1e-6);
}

#[test]
// Create-then-assign: the new VM accepts work only once its startup delay
// has elapsed.
fn create_then_assign_waits_for_startup() {
    let trace = write_csv_trace("s5", &[(1, 0.0, 3000, 1)]);
    let mut config = base_config(trace);
    config.initial_s_vm_count = 0;
    config.vm_startup_delay = 1.5;
    let mut env = env_with(config, 1);

    let create = env
        .step(Action::CreateVm {
            host_id: 0,
            vm_type: VmType::Small,
        })
        .unwrap();
    assert!(create.info.create_vm_attempted);
    assert!(create.info.create_vm_success);
    assert_eq!(create.info.host_affected_id, 0);

    // Still starting: the VM becomes Running at ~1.7, past this step's
    // action point (clock 1.0).
    let early = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(early.info.invalid_action_taken);
    assert!(!early.info.assignment_success);

    let late = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(late.info.assignment_success);

    run_out(&mut env, 30);
    assert_eq!(env.simulation().unwrap().broker().borrow().finished_count(), 1);
}

#[test]
// Creating a VM on an unsuitable or unknown host adds nothing.
fn create_vm_on_bad_host_is_invalid() {
    let trace = write_csv_trace("bad-host", &[(1, 50.0, 1000, 1)]);
    let mut config = base_config(trace);
    // A single one-core host: the initial small VM fills it up.
    config.host_pes = 1;
    let mut env = env_with(config, 1);

    let unknown = env
        .step(Action::CreateVm {
            host_id: 7,
            vm_type: VmType::Small,
        })
        .unwrap();
    assert!(unknown.info.create_vm_attempted);
    assert!(!unknown.info.create_vm_success);
    assert!(unknown.info.invalid_action_taken);

    let full = env
        .step(Action::CreateVm {
            host_id: 0,
            vm_type: VmType::Small,
        })
        .unwrap();
    assert!(!full.info.create_vm_success);
    assert!(full.info.invalid_action_taken);

    // The fleet is still just the initial VM.
    let sim = env.simulation().unwrap();
    assert_eq!(sim.broker().borrow().running_vms().len(), 1);
}

#[test]
// A no-op on an empty wait queue changes nothing except the clock.
fn noop_on_empty_queue_is_clean() {
    let trace = write_csv_trace("noop", &[(1, 100.0, 1000, 1)]);
    let mut env = env_with(base_config(trace), 1);

    let before_running = env.simulation().unwrap().broker().borrow().running_vms();
    let result = env.step(Action::NoOp).unwrap();
    assert!(!result.info.invalid_action_taken);
    assert_eq!(result.info.reward.invalid_action, 0.0);
    assert_eq!(result.observation.waiting_cloudlets, 0);
    let after_running = env.simulation().unwrap().broker().borrow().running_vms();
    assert_eq!(before_running, after_running);

    // With work queued the same action is flagged invalid.
    let trace = write_csv_trace("noop-queued", &[(1, 0.0, 1000, 1)]);
    let mut env = env_with(base_config(trace), 1);
    let result = env.step(Action::NoOp).unwrap();
    assert!(result.info.invalid_action_taken);
}

#[test]
// Identical configuration, seed and action sequence replay identically.
fn deterministic_replay() {
    let rows = [(1, 0.0, 4000, 1), (2, 1.0, 6000, 1), (3, 2.0, 2000, 1)];
    let script = [
        Action::AssignToVm { vm_id: 0 },
        Action::NoOp,
        Action::AssignToVm { vm_id: 0 },
        Action::AssignToVm { vm_id: 0 },
        Action::NoOp,
    ];

    let run = |trace: String| -> (Vec<f64>, Vec<dcgym::env::Observation>) {
        let mut env = env_with(base_config(trace), 42);
        let mut rewards = Vec::new();
        let mut observations = Vec::new();
        for action in script {
            let result = env.step(action).unwrap();
            rewards.push(result.reward);
            observations.push(result.observation);
        }
        (rewards, observations)
    };

    let a = run(write_csv_trace("det-a", &rows));
    let b = run(write_csv_trace("det-b", &rows));
    assert_eq!(a.0, b.0);
    assert_eq!(a.1, b.1);
}

#[test]
// The raw tuple and single-integer action forms reach the same dispatch
// logic; malformed raw input costs the invalid penalty.
fn raw_action_forms() {
    let trace = write_csv_trace("raw", &[(1, 0.0, 2000, 1), (2, 0.0, 2000, 1)]);
    let mut env = env_with(base_config(trace), 1);

    let result = env.step_tuple([1, 0, -1, -1]).unwrap();
    assert!(result.info.assignment_success);

    let result = env.step_index(0).unwrap();
    assert!(result.info.assignment_success);

    let result = env.step_tuple([9, 0, 0, 0]).unwrap();
    assert!(result.info.invalid_action_taken);

    let result = env.step_index(-1).unwrap();
    assert!(!result.info.invalid_action_taken);
}

#[test]
// The observation is padded to the fixed layout and the tree mirrors the
// Host -> VM -> Cloudlet topology.
fn observation_layout_and_tree() {
    let trace = write_csv_trace("obs", &[(1, 0.0, 8000, 1)]);
    let mut env = env_with(base_config(trace), 1);

    // 1 host * 16 cores / 1-core small VMs * 1.1 head-room.
    assert_eq!(env.max_potential_vms(), 18);

    let result = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    let observation = &result.observation;
    assert_eq!(observation.actual_host_count, 1);
    assert_eq!(observation.actual_vm_count, 1);
    assert_eq!(observation.vm_types[0], 1);
    assert_eq!(observation.vm_host_map[0], 0);
    assert_eq!(observation.vm_cpu_usage[0], 1.0);
    assert_eq!(observation.vm_available_cores[0], 0);
    // Padding beyond the only VM.
    assert!(observation.vm_types[1..].iter().all(|&t| t == 0));
    assert!(observation.vm_host_map[1..].iter().all(|&h| h == -1));
    assert!(observation.vm_cpu_usage[1..].iter().all(|&u| u == 0.0));

    // [total_cores, hosts, host_cores, vms, vm_cores, cloudlets, cores, 0]
    assert_eq!(observation.infrastructure_tree, vec![16, 1, 16, 1, 1, 1, 1, 0]);

    assert!(env.render().contains("Hosts (1)"));
}

#[test]
// An episode that outlives the step cap truncates instead of terminating.
fn truncation_at_max_episode_length() {
    let trace = write_csv_trace("trunc", &[(1, 0.0, 1_000_000, 1)]);
    let mut config = base_config(trace);
    config.max_episode_length = 5;
    let mut env = env_with(config, 1);

    env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    let mut last = None;
    for _ in 0..4 {
        last = Some(env.step(Action::NoOp).unwrap());
    }
    let last = last.unwrap();
    assert!(last.truncated);
    assert!(!last.terminated);
}

#[test]
// Closing mid-episode cancels in-flight cloudlets and invalidates the
// episode until the next reset.
fn close_cancels_unfinished_cloudlets() {
    let trace = write_csv_trace("close", &[(1, 0.0, 100_000, 1)]);
    let mut env = env_with(base_config(trace), 1);
    let result = env.step(Action::AssignToVm { vm_id: 0 }).unwrap();
    assert!(result.info.observation_tree_json().starts_with('['));
    assert_eq!(result.info.completed_wait_times_json(), "[]");

    let sim = env.simulation().unwrap();
    assert_eq!(sim.broker().borrow().submitted_count(), 1);
    let pool = sim.cloudlet_pool();

    env.close();
    assert_eq!(
        pool.borrow().get(1).unwrap().borrow().status(),
        CloudletStatus::Cancelled
    );
    assert!(env.step(Action::NoOp).is_err());
}

#[test]
// The cost term only participates when explicitly enabled.
fn cost_component_is_gated() {
    let rows = [(1, 50.0, 1000, 1)];
    let trace = write_csv_trace("cost-off", &[(1, 50.0, 1000, 1)]);
    let mut env = env_with(base_config(trace), 1);
    let result = env.step(Action::NoOp).unwrap();
    assert_eq!(result.info.reward.cost, 0.0);

    let trace = write_csv_trace("cost-on", &rows);
    let mut config = base_config(trace);
    config.cost_reward_enabled = true;
    config.reward_cost_coef = 0.5;
    let mut env = env_with(config, 1);
    let result = env.step(Action::NoOp).unwrap();
    // One running 1-core VM over 16 host cores.
    assert!((result.info.reward.cost - (-0.5 / 16.0)).abs() < 1e-12);
    assert_decomposition(&result);
}

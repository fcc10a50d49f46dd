//! Discrete-event cloud datacenter simulator driven by an external
//! learning agent.
//!
//! The crate models a datacenter of physical hosts running virtual machines
//! that execute cloudlets (compute tasks) read from a workload trace. A
//! custom broker keeps arrived-but-unassigned cloudlets in a wait queue and
//! performs only agent-directed dispatch: at every simulated timestep an
//! external policy decides which cloudlet goes to which VM and, optionally,
//! how to grow or shrink the VM fleet. The [`env`] module exposes the
//! step/reset interface consumed by such a policy.

pub mod core;
pub mod env;
pub mod extensions;
pub mod simulation;

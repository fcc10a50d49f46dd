//! Simulation component identifiers.

/// Identifier of a simulation component.
///
/// Identifiers are assigned sequentially starting from 0 as contexts and
/// handlers are registered in [`Simulation`](crate::Simulation).
pub type Id = u32;

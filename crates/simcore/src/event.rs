//! Simulation events.

use std::cmp::Ordering;

use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::{clone_trait_object, DynClone};
use serde::ser::Serialize;

use crate::component::Id;

/// Event identifier.
///
/// Identifiers are assigned sequentially in emission order, so they double
/// as the tie-breaker for events scheduled at the same time.
pub type EventId = u64;

/// Trait that must be implemented by event payloads.
pub trait EventData: Downcast + DynClone + erased_serde::Serialize {}

impl_downcast!(EventData);

clone_trait_object!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + DynClone + 'static> EventData for T {}

/// A scheduled event.
#[derive(Clone)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Time of event occurrence.
    pub time: f64,
    /// Identifier of the event source.
    pub src: Id,
    /// Identifier of the event destination.
    pub dst: Id,
    /// Event payload.
    pub data: Box<dyn EventData>,
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.total_cmp(&self.time).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

//! Observing the processed event stream.

use crate::event::Event;

/// Hook invoked by [`Simulation`](crate::Simulation) after every processed
/// event.
///
/// Listeners are not event destinations: they see each event after its
/// handler has run, and may emit follow-up events through their own
/// [`SimulationContext`](crate::SimulationContext). The engine itself never
/// removes listeners; they live as long as the simulation.
pub trait EventListener {
    /// Called after `event` has been dispatched to its handler.
    fn on_event_processed(&mut self, event: &Event);
}

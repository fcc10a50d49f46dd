//! Simulation configuration and execution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::Level::Trace;
use log::{log_enabled, trace, warn};
use rand::distributions::uniform::{SampleRange, SampleUniform};
use serde_json::json;
use serde_type_name::type_name;

use crate::component::Id;
use crate::context::SimulationContext;
use crate::event::EventId;
use crate::handler::EventHandler;
use crate::listener::EventListener;
use crate::log::log_undelivered_event;
use crate::state::SimulationState;
use crate::Event;

/// Outcome of [`Simulation::run_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every event with time at or before the target has been processed and
    /// the clock stands at or slightly beyond the target.
    ReachedTarget,
    /// The iteration budget ran out before the target time was crossed.
    BudgetExhausted,
}

/// Represents a simulation, provides methods for its configuration and
/// execution.
pub struct Simulation {
    sim_state: Rc<RefCell<SimulationState>>,
    name_to_id: HashMap<String, Id>,
    names: Rc<RefCell<Vec<String>>>,
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
    listeners: Vec<Rc<RefCell<dyn EventListener>>>,
}

impl Simulation {
    /// Creates a new simulation with the specified random seed and no lower
    /// bound on event delays.
    pub fn new(seed: u64) -> Self {
        Self::with_min_time_between_events(seed, 0.0)
    }

    /// Creates a new simulation with the specified random seed and minimum
    /// time between events.
    ///
    /// Every event delay requested by components is clamped to at least
    /// `min_time_between_events`, so the simulated latency of any
    /// interaction never degenerates to zero.
    pub fn with_min_time_between_events(seed: u64, min_time_between_events: f64) -> Self {
        Self {
            sim_state: Rc::new(RefCell::new(SimulationState::new(seed, min_time_between_events))),
            name_to_id: HashMap::new(),
            names: Rc::new(RefCell::new(Vec::new())),
            handlers: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.name_to_id.len() as Id;
        self.name_to_id.insert(name.to_owned(), id);
        self.names.borrow_mut().push(name.to_owned());
        self.handlers.push(None);
        id
    }

    /// Returns the identifier of the component by its name.
    ///
    /// Panics if a component with such name does not exist.
    pub fn lookup_id(&self, name: &str) -> Id {
        *self.name_to_id.get(name).unwrap()
    }

    /// Returns the name of the component by its identifier.
    ///
    /// Panics if a component with such id does not exist.
    pub fn lookup_name(&self, id: Id) -> String {
        self.names.borrow()[id as usize].clone()
    }

    /// Creates a new simulation context with the specified name.
    pub fn create_context<S>(&mut self, name: S) -> SimulationContext
    where
        S: AsRef<str>,
    {
        SimulationContext::new(
            self.register(name.as_ref()),
            name.as_ref(),
            self.sim_state.clone(),
            self.names.clone(),
        )
    }

    /// Registers the event handler implementation for the component with the
    /// specified name, returns the component id.
    pub fn add_handler<S>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        self.handlers[id as usize] = Some(handler);
        id
    }

    /// Removes the event handler for the component with the specified name.
    ///
    /// Subsequent events destined to this component are logged as
    /// undelivered and dropped.
    pub fn remove_handler<S>(&mut self, name: S)
    where
        S: AsRef<str>,
    {
        let id = self.lookup_id(name.as_ref());
        self.handlers[id as usize] = None;
    }

    /// Registers a listener invoked after every processed event.
    pub fn add_listener(&mut self, listener: Rc<RefCell<dyn EventListener>>) {
        self.listeners.push(listener);
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Performs a single step through the simulation.
    ///
    /// Takes the next event from the queue, advances the clock to the event
    /// time and invokes the [`EventHandler::on()`] method of the destination
    /// component. Undelivered events (no handler registered) are logged and
    /// discarded. After dispatch every registered listener observes the
    /// event.
    ///
    /// Returns `true` if some pending event was found and `false` otherwise.
    pub fn step(&mut self) -> bool {
        let next = self.sim_state.borrow_mut().next_event();
        if let Some(event) = next {
            if log_enabled!(Trace) {
                let src_name = self.lookup_name(event.src);
                let dst_name = self.lookup_name(event.dst);
                trace!(
                    target: &dst_name,
                    "[{:.3} {} {}] {}",
                    event.time,
                    crate::log::get_colored("EVENT", colored::Color::BrightBlack),
                    dst_name,
                    json!({"type": type_name(&event.data).unwrap(), "data": event.data, "src": src_name})
                );
            }
            let observed = event.clone();
            match self.handlers.get(event.dst as usize) {
                Some(Some(handler)) => handler.borrow_mut().on(event),
                _ => log_undelivered_event(event),
            }
            for listener in &self.listeners {
                listener.borrow_mut().on_event_processed(&observed);
            }
            true
        } else {
            false
        }
    }

    /// Performs the specified number of steps through the simulation.
    ///
    /// Returns `true` if there could be more pending events and `false`
    /// otherwise.
    pub fn steps(&mut self, step_count: u64) -> bool {
        for _ in 0..step_count {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Processes every event scheduled at or before `target_time`, then
    /// advances the clock to at least the target.
    ///
    /// The number of processed events is capped by `iteration_budget`; if the
    /// budget runs out before the target is crossed the method logs a
    /// warning and returns [`RunStatus::BudgetExhausted`] without touching
    /// the remaining events, so the caller can bail out instead of spinning.
    pub fn run_until(&mut self, target_time: f64, iteration_budget: u64) -> RunStatus {
        let mut processed: u64 = 0;
        loop {
            let next_time = self.sim_state.borrow_mut().peek_time();
            match next_time {
                Some(time) if time <= target_time => {
                    if processed >= iteration_budget {
                        warn!(
                            target: "simulation",
                            "[{:.3} {} simulation] run_until({:.3}) exhausted its budget of {} events",
                            self.time(),
                            crate::log::get_colored("WARN", colored::Color::Yellow),
                            target_time,
                            iteration_budget
                        );
                        return RunStatus::BudgetExhausted;
                    }
                    self.step();
                    processed += 1;
                }
                _ => break,
            }
        }
        self.sim_state.borrow_mut().advance_to(target_time);
        RunStatus::ReachedTarget
    }

    /// Returns a random float in the range _[0, 1)_ using the
    /// simulation-wide random number generator.
    pub fn rand(&mut self) -> f64 {
        self.sim_state.borrow_mut().rand()
    }

    /// Returns a random number in the specified range using the
    /// simulation-wide random number generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.sim_state.borrow_mut().gen_range(range)
    }

    /// Returns the total number of created events.
    ///
    /// Canceled events are counted here as well.
    pub fn event_count(&self) -> u64 {
        self.sim_state.borrow().event_count()
    }

    /// Returns the number of events waiting in the queue.
    pub fn pending_event_count(&self) -> usize {
        self.sim_state.borrow().pending_event_count()
    }

    /// Cancels events that satisfy the given predicate function.
    ///
    /// Already processed events cannot be canceled.
    pub fn cancel_events<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        self.sim_state.borrow_mut().cancel_events(pred);
    }

    /// Cancels a single event by its identifier.
    pub fn cancel_event(&mut self, id: EventId) {
        self.sim_state.borrow_mut().cancel_event(id);
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use simcore::{cast, Event, EventHandler, EventListener, RunStatus, Simulation, SimulationContext};

#[derive(Clone, Serialize)]
struct Ping {
    seq: u32,
}

struct Recorder {
    seen: Vec<(f64, u32)>,
}

impl EventHandler for Recorder {
    fn on(&mut self, event: Event) {
        let time = event.time;
        cast!(match event.data {
            Ping { seq } => {
                self.seen.push((time, seq));
            }
        })
    }
}

fn make_recorder(sim: &mut Simulation, name: &str) -> (Rc<RefCell<Recorder>>, u32) {
    let recorder = Rc::new(RefCell::new(Recorder { seen: Vec::new() }));
    let id = sim.add_handler(name, recorder.clone());
    (recorder, id)
}

#[test]
fn events_run_in_time_order_with_fifo_ties() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut sim = Simulation::new(42);
    let (recorder, id) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    ctx.emit(Ping { seq: 2 }, id, 5.0);
    ctx.emit(Ping { seq: 0 }, id, 1.0);
    // Same timestamp as seq 0: must run after it, in emission order.
    ctx.emit(Ping { seq: 1 }, id, 1.0);

    sim.step_until_no_events();

    assert_eq!(sim.time(), 5.0);
    assert_eq!(recorder.borrow().seen, vec![(1.0, 0), (1.0, 1), (5.0, 2)]);
}

#[test]
fn delay_floor_applies_to_every_emission() {
    let mut sim = Simulation::with_min_time_between_events(42, 0.1);
    let (recorder, id) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    ctx.emit_now(Ping { seq: 0 }, id);
    ctx.emit(Ping { seq: 1 }, id, 0.05);
    ctx.emit(Ping { seq: 2 }, id, 0.5);

    sim.step_until_no_events();

    let seen = recorder.borrow().seen.clone();
    assert_eq!(seen[0], (0.1, 0));
    assert_eq!(seen[1], (0.1, 1));
    assert_eq!(seen[2], (0.5, 2));
}

#[test]
fn run_until_advances_clock_past_drained_heap() {
    let mut sim = Simulation::new(42);
    let (recorder, id) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    ctx.emit(Ping { seq: 0 }, id, 1.0);
    ctx.emit(Ping { seq: 1 }, id, 7.5);

    let status = sim.run_until(5.0, 1000);
    assert_eq!(status, RunStatus::ReachedTarget);
    assert_eq!(sim.time(), 5.0);
    assert_eq!(recorder.borrow().seen.len(), 1);

    let status = sim.run_until(10.0, 1000);
    assert_eq!(status, RunStatus::ReachedTarget);
    assert_eq!(sim.time(), 10.0);
    assert_eq!(recorder.borrow().seen.len(), 2);
}

struct Echo {
    ctx: SimulationContext,
    bounces: u32,
}

impl EventHandler for Echo {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Ping { seq } => {
                self.bounces += 1;
                self.ctx.emit_self(Ping { seq: seq + 1 }, 0.001);
            }
        })
    }
}

#[test]
fn run_until_stops_on_budget_exhaustion() {
    let mut sim = Simulation::new(42);
    let ctx = sim.create_context("echo");
    let starter = sim.create_context("starter");
    let echo = Rc::new(RefCell::new(Echo { ctx, bounces: 0 }));
    let id = sim.add_handler("echo", echo.clone());

    starter.emit(Ping { seq: 0 }, id, 0.001);

    let status = sim.run_until(1.0, 50);
    assert_eq!(status, RunStatus::BudgetExhausted);
    assert_eq!(echo.borrow().bounces, 50);
    assert!(sim.time() < 1.0);
}

struct CountingListener {
    observed: u32,
}

impl EventListener for CountingListener {
    fn on_event_processed(&mut self, _event: &Event) {
        self.observed += 1;
    }
}

#[test]
fn listener_fires_after_every_event() {
    let mut sim = Simulation::new(42);
    let (_recorder, id) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");
    let listener = Rc::new(RefCell::new(CountingListener { observed: 0 }));
    sim.add_listener(listener.clone());

    for seq in 0..4 {
        ctx.emit(Ping { seq }, id, seq as f64 + 1.0);
    }
    sim.step_until_no_events();

    assert_eq!(listener.borrow().observed, 4);
}

#[test]
fn canceled_events_are_skipped() {
    let mut sim = Simulation::new(42);
    let (recorder, id) = make_recorder(&mut sim, "recorder");
    let ctx = sim.create_context("source");

    let first = ctx.emit(Ping { seq: 0 }, id, 1.0);
    ctx.emit(Ping { seq: 1 }, id, 2.0);
    ctx.cancel_event(first);

    assert_eq!(sim.pending_event_count(), 1);
    sim.step_until_no_events();

    assert_eq!(sim.time(), 2.0);
    assert_eq!(recorder.borrow().seen, vec![(2.0, 1)]);
}

#[test]
fn seeded_runs_are_deterministic() {
    let mut a = Simulation::new(123);
    let mut b = Simulation::new(123);
    for _ in 0..32 {
        assert_eq!(a.gen_range(0..1_000_000), b.gen_range(0..1_000_000));
    }
}

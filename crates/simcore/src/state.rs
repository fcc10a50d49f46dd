use std::collections::{BinaryHeap, HashSet};

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};

/// Tolerance used in floating-point time comparisons.
pub const EPSILON: f64 = 1e-12;

pub struct SimulationState {
    clock: f64,
    min_delay: f64,
    rand: Pcg64,
    events: BinaryHeap<Event>,
    canceled_events: HashSet<EventId>,
    event_count: u64,
}

impl SimulationState {
    pub fn new(seed: u64, min_delay: f64) -> Self {
        Self {
            clock: 0.0,
            min_delay,
            rand: Pcg64::seed_from_u64(seed),
            events: BinaryHeap::new(),
            canceled_events: HashSet::new(),
            event_count: 0,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    /// Moves the clock forward, never backward.
    pub fn advance_to(&mut self, time: f64) {
        if time > self.clock {
            self.clock = time;
        }
    }

    pub fn min_delay(&self) -> f64 {
        self.min_delay
    }

    pub fn rand(&mut self) -> f64 {
        self.rand.gen_range(0.0..1.0)
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.rand.gen_range(range)
    }

    pub fn sample_from_distribution<T, Dist: Distribution<T>>(&mut self, dist: &Dist) -> T {
        dist.sample(&mut self.rand)
    }

    pub fn add_event<T>(&mut self, data: T, src: Id, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        let event_id = self.event_count;
        let event = Event {
            id: event_id,
            time: self.clock + delay.max(self.min_delay),
            src,
            dst,
            data: Box::new(data),
        };
        self.events.push(event);
        self.event_count += 1;
        event_id
    }

    pub fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.events.pop() {
                if !self.canceled_events.remove(&event.id) {
                    self.clock = event.time;
                    return Some(event);
                }
            } else {
                return None;
            }
        }
    }

    /// Returns the time of the next non-canceled event, dropping canceled
    /// entries from the head of the heap along the way.
    pub fn peek_time(&mut self) -> Option<f64> {
        loop {
            match self.events.peek() {
                Some(event) if self.canceled_events.contains(&event.id) => {
                    let event = self.events.pop().unwrap();
                    self.canceled_events.remove(&event.id);
                }
                Some(event) => return Some(event.time),
                None => return None,
            }
        }
    }

    pub fn cancel_event(&mut self, id: EventId) {
        self.canceled_events.insert(id);
    }

    pub fn cancel_events<F>(&mut self, pred: F)
    where
        F: Fn(&Event) -> bool,
    {
        for event in self.events.iter() {
            if pred(event) {
                self.canceled_events.insert(event.id);
            }
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn pending_event_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| !self.canceled_events.contains(&event.id))
            .count()
    }
}

#![allow(dead_code)]

use paytrack::domain::payment::TransactionId;
use paytrack::domain::policy::PollingPolicy;
use paytrack::domain::ports::{ObserverBox, ReconciliationObserver};
use paytrack::domain::reconciliation::{Outcome, ReconciliationState};
use std::sync::{Arc, Mutex};

/// One observer callback, as recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    State(ReconciliationState),
    Resolved(Outcome),
}

/// Observer that records every callback. Clones share the same log.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> ObserverBox {
        Box::new(self.clone())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Resolved(outcome) => Some(outcome),
                Event::State(_) => None,
            })
            .collect()
    }

    /// Attempt counts of every published `Tracking` state, in order.
    pub fn attempts(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::State(ReconciliationState::Tracking(tracking)) => Some(tracking.attempts),
                _ => None,
            })
            .collect()
    }
}

impl ReconciliationObserver for Recorder {
    fn on_state_change(&mut self, state: &ReconciliationState) {
        self.events.lock().unwrap().push(Event::State(state.clone()));
    }

    fn on_resolved(&mut self, outcome: Outcome) {
        self.events.lock().unwrap().push(Event::Resolved(outcome));
    }
}

/// 1s interval, 5 attempts, 5s budget.
pub fn short_policy() -> PollingPolicy {
    PollingPolicy::from_millis(1000, 5, 5000).unwrap()
}

pub fn tx(id: &str) -> TransactionId {
    TransactionId::new(id).unwrap()
}

/// Lets spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

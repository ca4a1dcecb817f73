use crate::domain::types::EngineEvent;
use crate::ports::{Clock, EventSink};
use candid::CandidType;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Broadcasts every event to each subscribed sink in subscription order.
#[derive(Default)]
pub struct EventFanout {
    sinks: RefCell<Vec<Rc<dyn EventSink>>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Rc<dyn EventSink>) {
        self.sinks.borrow_mut().push(sink);
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.sinks.borrow().len()
    }
}

impl EventSink for EventFanout {
    fn publish(&self, event: &EngineEvent) {
        // Sinks may publish re-entrantly; iterate over a snapshot.
        let sinks = self.sinks.borrow().clone();
        for sink in sinks {
            sink.publish(event);
        }
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EngineNotice {
    pub sequence: u64,
    pub at_ms: u64,
    pub message: String,
    pub event: EngineEvent,
}

/// Bounded ring of rendered notifications, newest last.
pub struct RecentEventsSink {
    capacity: usize,
    clock: Rc<dyn Clock>,
    next_sequence: Cell<u64>,
    notices: RefCell<VecDeque<EngineNotice>>,
}

impl RecentEventsSink {
    pub fn new(capacity: usize, clock: Rc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            clock,
            next_sequence: Cell::new(0),
            notices: RefCell::new(VecDeque::new()),
        }
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<EngineNotice> {
        self.notices
            .borrow()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.notices.borrow().len()
    }
}

impl EventSink for RecentEventsSink {
    fn publish(&self, event: &EngineEvent) {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence.saturating_add(1));
        let mut notices = self.notices.borrow_mut();
        if notices.len() == self.capacity {
            notices.pop_front();
        }
        notices.push_back(EngineNotice {
            sequence,
            at_ms: self.clock.now_ms(),
            message: event.message(),
            event: event.clone(),
        });
    }
}

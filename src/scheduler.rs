use crate::domain::types::{
    EngineEvent, PreparedInvocation, ScheduledInvocationView, TransactionRecord,
};
use crate::error::EngineError;
use crate::ports::{Clock, EventSink, TimerDriver, TimerHandle};
use crate::tracker::TransactionTracker;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Shown to callers because pending schedules live only in heap memory.
pub const SCHEDULER_PERSISTENCE_NOTICE: &str =
    "scheduled invocations are held in memory only; an upgrade or restart cancels every pending schedule";

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum SchedulerLogPriority {
    #[log_level(capacity = 1000, name = "SCHEDULER_INFO")]
    Info,
    #[log_level(capacity = 500, name = "SCHEDULER_ERROR")]
    Error,
}

impl GetLogFilter for SchedulerLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

#[derive(Clone, Debug)]
pub struct ScheduledInvocation {
    pub id: String,
    pub prepared: PreparedInvocation,
    pub execute_at_ms: u64,
    pub timer: TimerHandle,
}

impl ScheduledInvocation {
    fn view(&self, now_ms: u64) -> ScheduledInvocationView {
        ScheduledInvocationView {
            id: self.id.clone(),
            request: self.prepared.request.clone(),
            execute_at_ms: self.execute_at_ms,
            remaining_ms: self.execute_at_ms.saturating_sub(now_ms),
        }
    }
}

#[derive(Clone)]
pub struct SchedulerPorts {
    pub clock: Rc<dyn Clock>,
    pub timers: Rc<dyn TimerDriver>,
    pub events: Rc<dyn EventSink>,
}

/// Holds validated invocations until their one-shot timer fires.
///
/// Each entry owns exactly one armed timer. An entry leaves the table in one
/// of three ways: cancellation (timer disarmed, record `Cancelled`), firing
/// (removed and its handle released before submission starts), or
/// [`DeferredScheduler::clear_all`].
pub struct DeferredScheduler {
    ports: SchedulerPorts,
    tracker: TransactionTracker,
    entries: RefCell<BTreeMap<String, ScheduledInvocation>>,
}

impl DeferredScheduler {
    pub fn new(ports: SchedulerPorts, tracker: TransactionTracker) -> Self {
        Self {
            ports,
            tracker,
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn schedule(
        &self,
        prepared: PreparedInvocation,
        execute_at_ms: u64,
    ) -> Result<String, EngineError> {
        let now_ms = self.ports.clock.now_ms();
        if execute_at_ms <= now_ms {
            return Err(EngineError::scheduling(format!(
                "execute_at_ms {execute_at_ms} is not in the future (now {now_ms})"
            )));
        }

        let record = self.tracker.record_scheduled(&prepared);
        let id = record.id;
        let timer = self
            .ports
            .timers
            .arm(&id, execute_at_ms.saturating_sub(now_ms));
        let function_signature = prepared.descriptor.signature.clone();
        self.entries.borrow_mut().insert(
            id.clone(),
            ScheduledInvocation {
                id: id.clone(),
                prepared,
                execute_at_ms,
                timer,
            },
        );

        log!(
            SchedulerLogPriority::Info,
            "scheduler_armed id={} signature={} execute_at_ms={} timer={}",
            id,
            function_signature,
            execute_at_ms,
            timer.0
        );
        self.ports.events.publish(&EngineEvent::InvocationScheduled {
            id: id.clone(),
            function_signature,
            execute_at_ms,
        });
        Ok(id)
    }

    /// `false` for unknown, already-fired or already-cancelled ids.
    pub fn cancel(&self, id: &str) -> bool {
        self.cancel_with_reason(id, None)
    }

    /// Cancels every pending entry and returns how many there were.
    pub fn clear_all(&self) -> u32 {
        let ids = self.entries.borrow().keys().cloned().collect::<Vec<_>>();
        let mut cleared = 0u32;
        for id in ids {
            if self.cancel_with_reason(&id, Some("cleared with all pending schedules".to_string())) {
                cleared = cleared.saturating_add(1);
            }
        }
        cleared
    }

    fn cancel_with_reason(&self, id: &str, reason: Option<String>) -> bool {
        let Some(entry) = self.entries.borrow_mut().remove(id) else {
            return false;
        };
        self.ports.timers.disarm(entry.timer);
        if let Err(error) = self.tracker.cancel_scheduled(id, reason) {
            log!(
                SchedulerLogPriority::Error,
                "scheduler_cancel_record_failed id={} error={}",
                id,
                error
            );
        }
        log!(SchedulerLogPriority::Info, "scheduler_cancelled id={}", id);
        self.ports
            .events
            .publish(&EngineEvent::ScheduleCancelled { id: id.to_string() });
        true
    }

    /// Pending entries ordered by execution time.
    pub fn list(&self) -> Vec<ScheduledInvocationView> {
        let now_ms = self.ports.clock.now_ms();
        let mut views = self
            .entries
            .borrow()
            .values()
            .map(|entry| entry.view(now_ms))
            .collect::<Vec<_>>();
        views.sort_by(|left, right| {
            left.execute_at_ms
                .cmp(&right.execute_at_ms)
                .then_with(|| left.id.cmp(&right.id))
        });
        views
    }

    pub fn view(&self, id: &str) -> Option<ScheduledInvocationView> {
        let now_ms = self.ports.clock.now_ms();
        self.entries.borrow().get(id).map(|entry| entry.view(now_ms))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a fired entry before its submission begins. A second fire for
    /// the same id finds nothing.
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    pub fn take_due(&self, id: &str) -> Option<ScheduledInvocation> {
        let entry = self.entries.borrow_mut().remove(id)?;
        // Already fired; this only releases the driver's handle.
        self.ports.timers.disarm(entry.timer);
        log!(
            SchedulerLogPriority::Info,
            "scheduler_fired id={} late_by_ms={}",
            id,
            self.ports.clock.now_ms().saturating_sub(entry.execute_at_ms)
        );
        self.ports
            .events
            .publish(&EngineEvent::ScheduleFired { id: id.to_string() });
        Some(entry)
    }

    /// Timer callback: takes the entry and submits it through the tracker.
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    pub async fn on_fire(&self, id: &str) -> Option<Result<TransactionRecord, EngineError>> {
        let entry = self.take_due(id)?;
        let result = self
            .tracker
            .submit_scheduled(&entry.id, &entry.prepared)
            .await;
        if let Err(error) = &result {
            log!(
                SchedulerLogPriority::Error,
                "scheduler_fire_failed id={} error={}",
                id,
                error
            );
        }
        Some(result)
    }
}

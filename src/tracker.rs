/// Transaction lifecycle tracking.
///
/// The tracker owns the most-recent-first transaction log. Every status change
/// goes through [`state_machine::transition`], replaces the persisted log
/// wholesale and publishes one [`EngineEvent::RecordUpdated`]. Receipt waits
/// run on the [`TaskSpawner`] so callers get control back at `Submitted`.
///
/// [`state_machine::transition`]: crate::domain::state_machine::transition
use crate::domain::state_machine::transition;
use crate::domain::types::{
    EngineEvent, LifecycleEvent, PendingTransaction, PreparedInvocation, ReceiptOutcome,
    SubmissionRequest, TransactionRecord, TransactionStatus,
};
use crate::error::EngineError;
use crate::ports::{Clock, EventSink, TaskSpawner, TransactionBroadcaster, TransactionLogStore};
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Failure cause for records whose broadcast was cut off by a restart.
pub const INTERRUPTED_BROADCAST_CAUSE: &str =
    "interrupted by an upgrade or restart before the broadcast returned";

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum TrackerLogPriority {
    #[log_level(capacity = 1000, name = "TRACKER_INFO")]
    Info,
    #[log_level(capacity = 500, name = "TRACKER_ERROR")]
    Error,
}

impl GetLogFilter for TrackerLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

#[derive(Clone)]
pub struct TrackerPorts {
    pub store: Rc<dyn TransactionLogStore>,
    pub broadcaster: Rc<dyn TransactionBroadcaster>,
    pub events: Rc<dyn EventSink>,
    pub spawner: Rc<dyn TaskSpawner>,
    pub clock: Rc<dyn Clock>,
}

struct TrackerInner {
    ports: TrackerPorts,
    log: RefCell<Vec<TransactionRecord>>,
    next_sequence: Cell<u64>,
}

#[derive(Clone)]
pub struct TransactionTracker {
    inner: Rc<TrackerInner>,
}

impl TransactionTracker {
    /// Restores the log from the store.
    pub fn load(ports: TrackerPorts) -> Self {
        let records = ports.store.read_all();
        let next_sequence = u64::try_from(records.len()).unwrap_or(u64::MAX);
        Self {
            inner: Rc::new(TrackerInner {
                ports,
                log: RefCell::new(records),
                next_sequence: Cell::new(next_sequence),
            }),
        }
    }

    #[cfg(test)]
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.inner.log.borrow().clone()
    }

    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        self.inner.log.borrow().iter().take(limit).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<TransactionRecord> {
        self.inner
            .log
            .borrow()
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Creates the `Scheduled` record whose id doubles as the schedule id.
    pub fn record_scheduled(&self, prepared: &PreparedInvocation) -> TransactionRecord {
        let record = self.new_record(prepared, TransactionStatus::Scheduled);
        self.append(record.clone());
        record
    }

    pub fn cancel_scheduled(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> Result<TransactionRecord, String> {
        self.apply(id, LifecycleEvent::Cancel { reason })
    }

    /// Appends a `Constructed` record, then broadcasts it.
    pub async fn submit_now(
        &self,
        prepared: &PreparedInvocation,
    ) -> Result<TransactionRecord, EngineError> {
        let record = self.new_record(prepared, TransactionStatus::Constructed);
        let id = record.id.clone();
        self.append(record);
        self.drive(&id, prepared).await
    }

    /// Moves a fired schedule from `Scheduled` to `Constructed`, then
    /// broadcasts it.
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    pub async fn submit_scheduled(
        &self,
        id: &str,
        prepared: &PreparedInvocation,
    ) -> Result<TransactionRecord, EngineError> {
        self.apply(id, LifecycleEvent::Fire)
            .map_err(EngineError::scheduling)?;
        self.drive(id, prepared).await
    }

    /// Cancels every record still `Scheduled`. Their timers did not survive
    /// the restart that preceded this call.
    pub fn reconcile_orphaned_schedules(&self, reason: &str) -> u32 {
        let orphaned = self.ids_with_status(TransactionStatus::Scheduled);

        let mut reconciled = 0u32;
        for id in orphaned {
            if self
                .apply(
                    &id,
                    LifecycleEvent::Cancel {
                        reason: Some(reason.to_string()),
                    },
                )
                .is_ok()
            {
                reconciled = reconciled.saturating_add(1);
            }
        }
        if reconciled > 0 {
            log!(
                TrackerLogPriority::Info,
                "tracker_reconciled_orphaned_schedules count={}",
                reconciled
            );
        }
        reconciled
    }

    /// Fails records left `Constructed` by a previous process. Their
    /// broadcast call never returned, so nothing will move them on.
    pub fn fail_interrupted_broadcasts(&self, cause: &str) -> u32 {
        let mut failed = 0u32;
        for id in self.ids_with_status(TransactionStatus::Constructed) {
            let event = LifecycleEvent::BroadcastRejected {
                cause: cause.to_string(),
            };
            if self.apply(&id, event).is_ok() {
                failed = failed.saturating_add(1);
            }
        }
        if failed > 0 {
            log!(
                TrackerLogPriority::Info,
                "tracker_failed_interrupted_broadcasts count={}",
                failed
            );
        }
        failed
    }

    /// Re-attaches a receipt watcher to every `Submitted` record. Watchers
    /// live on the heap and do not survive an upgrade.
    pub fn resume_receipt_watchers(&self) -> u32 {
        let pending = self
            .inner
            .log
            .borrow()
            .iter()
            .filter(|record| record.status == TransactionStatus::Submitted)
            .filter_map(|record| {
                let hash = record.network_hash.clone()?;
                Some((record.id.clone(), PendingTransaction { hash }))
            })
            .collect::<Vec<_>>();

        let resumed = u32::try_from(pending.len()).unwrap_or(u32::MAX);
        for (id, pending) in pending {
            self.watch_receipt(id, pending);
        }
        if resumed > 0 {
            log!(
                TrackerLogPriority::Info,
                "tracker_resumed_receipt_watchers count={}",
                resumed
            );
        }
        resumed
    }

    fn ids_with_status(&self, status: TransactionStatus) -> Vec<String> {
        self.inner
            .log
            .borrow()
            .iter()
            .filter(|record| record.status == status)
            .map(|record| record.id.clone())
            .collect()
    }

    async fn drive(
        &self,
        id: &str,
        prepared: &PreparedInvocation,
    ) -> Result<TransactionRecord, EngineError> {
        let request = SubmissionRequest::from(prepared);
        let broadcaster = self.inner.ports.broadcaster.clone();

        match broadcaster.submit(&request).await {
            Err(cause) => {
                log!(
                    TrackerLogPriority::Error,
                    "tracker_broadcast_failed id={} signature={} error={}",
                    id,
                    request.descriptor.signature,
                    cause
                );
                if let Err(error) = self.apply(
                    id,
                    LifecycleEvent::BroadcastRejected {
                        cause: cause.clone(),
                    },
                ) {
                    log!(
                        TrackerLogPriority::Error,
                        "tracker_transition_failed id={} error={}",
                        id,
                        error
                    );
                }
                Err(EngineError::Broadcast { cause })
            }
            Ok(pending) => {
                let record = self
                    .apply(
                        id,
                        LifecycleEvent::Broadcast {
                            hash: pending.hash.clone(),
                        },
                    )
                    .map_err(|cause| EngineError::Broadcast { cause })?;
                self.watch_receipt(id.to_string(), pending);
                Ok(record)
            }
        }
    }

    fn watch_receipt(&self, id: String, pending: PendingTransaction) {
        let tracker = self.clone();
        self.inner.ports.spawner.spawn(
            async move {
                tracker.resolve_receipt(&id, &pending).await;
            }
            .boxed_local(),
        );
    }

    async fn resolve_receipt(&self, id: &str, pending: &PendingTransaction) {
        let broadcaster = self.inner.ports.broadcaster.clone();
        let event = match broadcaster.await_receipt(pending).await {
            Ok(receipt) if receipt.outcome == ReceiptOutcome::Success => {
                LifecycleEvent::ReceiptSucceeded
            }
            Ok(receipt) => LifecycleEvent::ReceiptFailed {
                cause: EngineError::Confirmation {
                    cause: format!("transaction reverted ({})", receipt.detail),
                }
                .to_string(),
            },
            Err(cause) => LifecycleEvent::ReceiptFailed {
                cause: EngineError::Confirmation { cause }.to_string(),
            },
        };
        if let Err(error) = self.apply(id, event) {
            log!(
                TrackerLogPriority::Error,
                "tracker_transition_failed id={} hash={} error={}",
                id,
                pending.hash,
                error
            );
        }
    }

    /// Applies one lifecycle event to the record with `id`.
    pub fn apply(&self, id: &str, event: LifecycleEvent) -> Result<TransactionRecord, String> {
        let now_ms = self.inner.ports.clock.now_ms();
        let updated = {
            let mut log = self.inner.log.borrow_mut();
            let record = log
                .iter_mut()
                .find(|record| record.id == id)
                .ok_or_else(|| format!("unknown transaction {id}"))?;
            let next = transition(&record.status, &event).map_err(|error| error.to_string())?;

            match &event {
                LifecycleEvent::Fire => {}
                LifecycleEvent::Broadcast { hash } => {
                    record.network_hash = Some(hash.clone());
                    record.submitted_at_ms = Some(now_ms);
                }
                LifecycleEvent::BroadcastRejected { cause } => {
                    record.error_detail = Some(
                        EngineError::Broadcast {
                            cause: cause.clone(),
                        }
                        .to_string(),
                    );
                    record.resolved_at_ms = Some(now_ms);
                }
                LifecycleEvent::ReceiptSucceeded => {
                    record.resolved_at_ms = Some(now_ms);
                }
                LifecycleEvent::ReceiptFailed { cause } => {
                    record.error_detail = Some(cause.clone());
                    record.resolved_at_ms = Some(now_ms);
                }
                LifecycleEvent::Cancel { reason } => {
                    record.error_detail = reason.clone();
                    record.resolved_at_ms = Some(now_ms);
                }
            }
            record.status = next;
            record.clone()
        };

        log!(
            TrackerLogPriority::Info,
            "tracker_transition id={} event={} status={:?}",
            updated.id,
            event.label(),
            updated.status
        );
        self.persist();
        self.inner
            .ports
            .events
            .publish(&EngineEvent::RecordUpdated(updated.clone()));
        Ok(updated)
    }

    fn new_record(
        &self,
        prepared: &PreparedInvocation,
        status: TransactionStatus,
    ) -> TransactionRecord {
        let now_ms = self.inner.ports.clock.now_ms();
        let sequence = self.inner.next_sequence.get();
        self.inner.next_sequence.set(sequence.saturating_add(1));
        TransactionRecord {
            id: format!("tx-{now_ms:013}-{sequence:06}"),
            function_signature: prepared.descriptor.signature.clone(),
            contract_address: prepared.request.contract_address.clone(),
            chain_id: prepared.request.chain_id,
            native_amount: prepared.request.native_amount.clone(),
            status,
            network_hash: None,
            error_detail: None,
            created_at_ms: now_ms,
            submitted_at_ms: None,
            resolved_at_ms: None,
        }
    }

    fn append(&self, record: TransactionRecord) {
        log!(
            TrackerLogPriority::Info,
            "tracker_record_created id={} signature={} status={:?}",
            record.id,
            record.function_signature,
            record.status
        );
        self.inner.log.borrow_mut().insert(0, record.clone());
        self.persist();
        self.inner
            .ports
            .events
            .publish(&EngineEvent::RecordUpdated(record));
    }

    fn persist(&self) {
        let snapshot = self.inner.log.borrow().clone();
        if let Err(error) = self.inner.ports.store.write_all(&snapshot) {
            log!(
                TrackerLogPriority::Error,
                "tracker_persist_failed records={} error={}",
                snapshot.len(),
                error
            );
        }
    }
}

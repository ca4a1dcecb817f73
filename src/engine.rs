//! Invocation engine.
//!
//! One explicit object owning the catalog cache, the transaction tracker and
//! the deferred scheduler. Every entry point validates first: nothing reaches
//! the tracker until the request resolves to a bound write function on a
//! supported chain and its arguments coerce cleanly.
use crate::abi::coercion::{coerce_arguments, parse_address};
use crate::domain::chains::is_supported_chain;
use crate::domain::types::{
    FunctionCatalog, FunctionDescriptor, FunctionMutability, InvocationRequest,
    PreparedInvocation, ScheduledInvocationView, TransactionRecord,
};
use crate::error::EngineError;
use crate::ports::{
    Clock, EventSink, TaskSpawner, TimerDriver, TransactionBroadcaster, TransactionLogStore,
};
use crate::scheduler::{DeferredScheduler, SchedulerPorts, SCHEDULER_PERSISTENCE_NOTICE};
use crate::tracker::{TrackerPorts, TransactionTracker, INTERRUPTED_BROADCAST_CAUSE};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Clone)]
pub struct EnginePorts {
    pub clock: Rc<dyn Clock>,
    pub timers: Rc<dyn TimerDriver>,
    pub spawner: Rc<dyn TaskSpawner>,
    pub broadcaster: Rc<dyn TransactionBroadcaster>,
    pub store: Rc<dyn TransactionLogStore>,
    pub events: Rc<dyn EventSink>,
}

type CatalogKey = (u64, String);

struct EngineInner {
    broadcaster: Rc<dyn TransactionBroadcaster>,
    catalogs: RefCell<BTreeMap<CatalogKey, FunctionCatalog>>,
    tracker: TransactionTracker,
    scheduler: DeferredScheduler,
}

#[derive(Clone)]
pub struct InvocationEngine {
    inner: Rc<EngineInner>,
}

/// Which caller-facing error a missing contract or function becomes.
#[derive(Clone, Copy)]
enum Stage {
    Invoke,
    Schedule,
}

impl Stage {
    fn unbound(self, parameter: &str, reason: String) -> EngineError {
        match self {
            Self::Invoke => EngineError::validation(parameter, reason),
            Self::Schedule => EngineError::scheduling(reason),
        }
    }
}

impl InvocationEngine {
    pub fn new(ports: EnginePorts) -> Self {
        let tracker = TransactionTracker::load(TrackerPorts {
            store: ports.store,
            broadcaster: ports.broadcaster.clone(),
            events: ports.events.clone(),
            spawner: ports.spawner,
            clock: ports.clock.clone(),
        });
        let scheduler = DeferredScheduler::new(
            SchedulerPorts {
                clock: ports.clock,
                timers: ports.timers,
                events: ports.events,
            },
            tracker.clone(),
        );
        Self {
            inner: Rc::new(EngineInner {
                broadcaster: ports.broadcaster,
                catalogs: RefCell::new(BTreeMap::new()),
                tracker,
                scheduler,
            }),
        }
    }

    // ── Catalogs ─────────────────────────────────────────────────────────────

    /// Makes `catalog` the function set for a contract, replacing any
    /// previous binding.
    pub fn bind_catalog(
        &self,
        contract_address: &str,
        chain_id: u64,
        catalog: FunctionCatalog,
    ) -> Result<(), EngineError> {
        let key = catalog_key(contract_address, chain_id)?;
        self.inner.catalogs.borrow_mut().insert(key, catalog);
        Ok(())
    }

    pub fn catalog(&self, contract_address: &str, chain_id: u64) -> Option<FunctionCatalog> {
        let key = catalog_key(contract_address, chain_id).ok()?;
        self.inner.catalogs.borrow().get(&key).cloned()
    }

    // ── Validation ───────────────────────────────────────────────────────────

    /// Resolves and coerces a request without touching any record.
    #[cfg(test)]
    pub async fn prepare(
        &self,
        request: &InvocationRequest,
    ) -> Result<PreparedInvocation, EngineError> {
        self.prepare_for(request, Stage::Invoke).await
    }

    async fn prepare_for(
        &self,
        request: &InvocationRequest,
        stage: Stage,
    ) -> Result<PreparedInvocation, EngineError> {
        let (contract_address, descriptor) = self.resolve(request, stage)?;
        if !descriptor.mutability.is_write() {
            return Err(EngineError::validation(
                "function_signature",
                format!("{} is read-only and cannot be submitted", descriptor.signature),
            ));
        }

        let available_balance = if descriptor.mutability == FunctionMutability::Payable {
            let broadcaster = self.inner.broadcaster.clone();
            broadcaster.available_balance(request.chain_id).await
        } else {
            None
        };
        let coerced = coerce_arguments(
            &descriptor,
            &request.raw_arguments,
            &request.native_amount,
            available_balance,
        )?;

        let mut request = request.clone();
        request.contract_address = contract_address;
        request.function_signature = descriptor.signature.clone();
        Ok(PreparedInvocation {
            request,
            descriptor,
            coerced,
        })
    }

    fn resolve(
        &self,
        request: &InvocationRequest,
        stage: Stage,
    ) -> Result<(String, FunctionDescriptor), EngineError> {
        let (chain_id, contract_address) =
            catalog_key(&request.contract_address, request.chain_id)?;
        let catalogs = self.inner.catalogs.borrow();
        let catalog = catalogs
            .get(&(chain_id, contract_address.clone()))
            .ok_or_else(|| {
                stage.unbound(
                    "contract_address",
                    format!("no ABI loaded for {contract_address} on chain {chain_id}"),
                )
            })?;
        let descriptor = catalog
            .get(request.function_signature.trim())
            .cloned()
            .ok_or_else(|| {
                stage.unbound(
                    "function_signature",
                    format!(
                        "{} is not a function of {contract_address}",
                        request.function_signature.trim()
                    ),
                )
            })?;
        Ok((contract_address, descriptor))
    }

    // ── Submission ───────────────────────────────────────────────────────────

    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<TransactionRecord, EngineError> {
        let prepared = self.prepare_for(request, Stage::Invoke).await?;
        self.inner.tracker.submit_now(&prepared).await
    }

    pub async fn schedule(
        &self,
        request: &InvocationRequest,
        execute_at_ms: u64,
    ) -> Result<ScheduledInvocationView, EngineError> {
        let prepared = self.prepare_for(request, Stage::Schedule).await?;
        let id = self.inner.scheduler.schedule(prepared, execute_at_ms)?;
        self.inner
            .scheduler
            .view(&id)
            .ok_or_else(|| EngineError::scheduling(format!("schedule {id} vanished")))
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.inner.scheduler.cancel(id)
    }

    pub fn clear_scheduled(&self) -> u32 {
        self.inner.scheduler.clear_all()
    }

    pub fn list_scheduled(&self) -> Vec<ScheduledInvocationView> {
        self.inner.scheduler.list()
    }

    #[cfg(test)]
    pub fn scheduled(&self, id: &str) -> Option<ScheduledInvocationView> {
        self.inner.scheduler.view(id)
    }

    /// Timer entry point. `None` when the schedule was cancelled or already
    /// fired.
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    pub async fn fire(&self, id: &str) -> Option<Result<TransactionRecord, EngineError>> {
        self.inner.scheduler.on_fire(id).await
    }

    // ── Records ──────────────────────────────────────────────────────────────

    #[cfg(test)]
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.inner.tracker.records()
    }

    pub fn recent_transactions(&self, limit: usize) -> Vec<TransactionRecord> {
        self.inner.tracker.recent(limit)
    }

    pub fn transaction(&self, id: &str) -> Option<TransactionRecord> {
        self.inner.tracker.get(id)
    }

    /// Settles records a previous process left mid-flight: pending schedules
    /// are cancelled and unfinished broadcasts failed.
    pub fn reconcile_after_restart(&self) -> u32 {
        let tracker = &self.inner.tracker;
        tracker
            .reconcile_orphaned_schedules(SCHEDULER_PERSISTENCE_NOTICE)
            .saturating_add(tracker.fail_interrupted_broadcasts(INTERRUPTED_BROADCAST_CAUSE))
    }

    /// Restarts receipt polling for records still `Submitted`.
    pub fn resume_receipt_watchers(&self) -> u32 {
        self.inner.tracker.resume_receipt_watchers()
    }
}

/// Supported chain plus lowercased, validated contract address.
pub fn catalog_key(contract_address: &str, chain_id: u64) -> Result<CatalogKey, EngineError> {
    if !is_supported_chain(chain_id) {
        return Err(EngineError::validation(
            "chain_id",
            format!("chain {chain_id} is not supported"),
        ));
    }
    let address = parse_address(contract_address)
        .map_err(|reason| EngineError::validation("contract_address", reason))?;
    Ok((chain_id, format!("0x{}", hex::encode(address.as_slice()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::catalog::catalog_from_fragments;
    use crate::domain::types::{AbiFragment, EngineEvent, TransactionStatus, TypedValue};
    use crate::test_support::{
        block_on_with_spin, ManualClock, ManualTimerDriver, MemoryLogStore, QueuedSpawner,
        RecordingSink, ScriptedBroadcaster, TEST_CONTRACT,
    };
    use crate::features::timers::CanisterTimerDriver;
    use alloy_primitives::U256;

    const NOW: u64 = 1_700_000_000_000;

    struct Harness {
        engine: InvocationEngine,
        clock: Rc<ManualClock>,
        timers: Rc<ManualTimerDriver>,
        spawner: Rc<QueuedSpawner>,
        broadcaster: Rc<ScriptedBroadcaster>,
        store: Rc<MemoryLogStore>,
        sink: Rc<RecordingSink>,
    }

    fn harness_with_store(store: Rc<MemoryLogStore>) -> Harness {
        let clock = Rc::new(ManualClock::new(NOW));
        let timers = Rc::new(ManualTimerDriver::new(clock.clone()));
        let spawner = Rc::new(QueuedSpawner::default());
        let broadcaster = Rc::new(ScriptedBroadcaster::default());
        let sink = Rc::new(RecordingSink::default());
        let engine = InvocationEngine::new(EnginePorts {
            clock: clock.clone(),
            timers: timers.clone(),
            spawner: spawner.clone(),
            broadcaster: broadcaster.clone(),
            store: store.clone(),
            events: sink.clone(),
        });
        let catalog = catalog_from_fragments(&[
            AbiFragment::StringForm("function name() view returns (string)".to_string()),
            AbiFragment::StringForm("function purchase(uint256 quantity) payable".to_string()),
            AbiFragment::StringForm("function mint(uint256 amount)".to_string()),
            AbiFragment::StringForm("function mint(address to, uint256 amount)".to_string()),
        ])
        .catalog;
        engine
            .bind_catalog(TEST_CONTRACT, 1, catalog)
            .expect("catalog should bind");
        Harness {
            engine,
            clock,
            timers,
            spawner,
            broadcaster,
            store,
            sink,
        }
    }

    fn harness() -> Harness {
        harness_with_store(Rc::new(MemoryLogStore::default()))
    }

    fn request(signature: &str, args: &[&str], amount: &str) -> InvocationRequest {
        InvocationRequest {
            contract_address: TEST_CONTRACT.to_string(),
            chain_id: 1,
            function_signature: signature.to_string(),
            raw_arguments: args.iter().map(|arg| (*arg).to_string()).collect(),
            native_amount: amount.to_string(),
            priority_weight: 80,
        }
    }

    #[test]
    fn payable_purchase_checks_balance_before_any_record() {
        let h = harness();
        h.broadcaster
            .set_balance(Some(U256::from(100_000_000_000_000_000u128)));
        let prepared = block_on_with_spin(
            h.engine
                .prepare(&request("purchase(uint256)", &["3"], "0.05")),
        )
        .expect("funded purchase should validate");
        assert_eq!(
            prepared.coerced.typed_arguments,
            vec![TypedValue::Uint(U256::from(3u8))]
        );
        assert_eq!(
            prepared.coerced.base_unit_amount,
            U256::from(50_000_000_000_000_000u128)
        );

        h.broadcaster
            .set_balance(Some(U256::from(10_000_000_000_000_000u128)));
        let err = block_on_with_spin(
            h.engine
                .invoke(&request("purchase(uint256)", &["3"], "0.05")),
        )
        .expect_err("underfunded purchase should fail");
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert!(h.engine.transactions().is_empty());
        assert_eq!(h.broadcaster.submission_count(), 0);
    }

    #[test]
    fn invoke_submits_with_fee_weight_and_confirms_in_background() {
        let h = harness();
        let record = block_on_with_spin(
            h.engine
                .invoke(&request("mint(address,uint256)", &[TEST_CONTRACT, "2"], "")),
        )
        .expect("mint should submit");
        assert_eq!(record.status, TransactionStatus::Submitted);
        let submissions = h.broadcaster.submissions();
        assert_eq!(submissions[0].fees.priority_weight, 80);
        assert_eq!(submissions[0].base_unit_amount, U256::ZERO);

        h.broadcaster
            .succeed(record.network_hash.as_deref().expect("hash"));
        h.spawner.run_until_stalled();
        assert_eq!(
            h.engine.transaction(&record.id).map(|r| r.status),
            Some(TransactionStatus::Confirmed)
        );
        assert_eq!(h.store.snapshot(), h.engine.transactions());
    }

    #[test]
    fn unbound_targets_are_validation_on_invoke_and_scheduling_on_schedule() {
        let h = harness();
        let unknown_fn = request("burn(uint256)", &["1"], "");
        let err = block_on_with_spin(h.engine.invoke(&unknown_fn)).expect_err("unknown fn");
        assert_eq!(err.parameter(), Some("function_signature"));
        let err = block_on_with_spin(h.engine.schedule(&unknown_fn, NOW + 1_000))
            .expect_err("unknown fn schedule");
        assert!(matches!(err, EngineError::Scheduling { .. }));

        let mut other_contract = request("mint(uint256)", &["1"], "");
        other_contract.contract_address = "0x2222222222222222222222222222222222222222".to_string();
        let err = block_on_with_spin(h.engine.schedule(&other_contract, NOW + 1_000))
            .expect_err("unbound contract schedule");
        assert!(matches!(err, EngineError::Scheduling { .. }));

        let mut wrong_chain = request("mint(uint256)", &["1"], "");
        wrong_chain.chain_id = 999;
        let err = block_on_with_spin(h.engine.invoke(&wrong_chain)).expect_err("bad chain");
        assert_eq!(err.parameter(), Some("chain_id"));

        let err = block_on_with_spin(h.engine.invoke(&request("name()", &[], "")))
            .expect_err("read-only function");
        assert!(err.to_string().contains("read-only"));
        assert!(h.engine.transactions().is_empty());
        assert!(h.engine.list_scheduled().is_empty());
    }

    #[test]
    fn contract_address_lookup_ignores_case() {
        let h = harness();
        let upper = request("mint(uint256)", &["1"], "");
        let mut mixed = upper.clone();
        mixed.contract_address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string();
        h.engine
            .bind_catalog(
                &mixed.contract_address,
                1,
                h.engine.catalog(TEST_CONTRACT, 1).expect("bound catalog"),
            )
            .expect("bind should succeed");
        assert!(h
            .engine
            .catalog("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed", 1)
            .is_some());
        let prepared = block_on_with_spin(h.engine.prepare(&mixed)).expect("prepare");
        assert_eq!(
            prepared.request.contract_address,
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );
    }

    #[test]
    fn schedule_then_cancel_never_broadcasts() {
        let h = harness();
        let view = block_on_with_spin(
            h.engine
                .schedule(&request("mint(uint256)", &["1"], ""), NOW + 3_000),
        )
        .expect("schedule should succeed");
        assert_eq!(view.remaining_ms, 3_000);

        h.clock.advance(1_000);
        assert!(h.engine.cancel(&view.id));
        h.clock.advance(5_000);
        for id in h.timers.take_due(h.clock.now_ms()) {
            assert!(block_on_with_spin(h.engine.fire(&id)).is_none());
        }
        assert!(block_on_with_spin(h.engine.fire(&view.id)).is_none());

        assert_eq!(h.broadcaster.submission_count(), 0);
        assert!(!h.sink.events().iter().any(|event| matches!(
            event,
            EngineEvent::RecordUpdated(record) if record.status == TransactionStatus::Constructed
        )));
        assert_eq!(
            h.engine.transaction(&view.id).map(|r| r.status),
            Some(TransactionStatus::Cancelled)
        );
    }

    #[test]
    fn schedule_fires_through_the_timer_and_submits() {
        let h = harness();
        let view = block_on_with_spin(
            h.engine
                .schedule(&request("mint(uint256)", &["7"], ""), NOW + 2_000),
        )
        .expect("schedule should succeed");
        assert_eq!(h.engine.list_scheduled(), vec![view.clone()]);

        h.clock.advance(2_000);
        let fired = h.timers.take_due(h.clock.now_ms());
        assert_eq!(fired, vec![view.id.clone()]);
        let record = block_on_with_spin(h.engine.fire(&view.id))
            .expect("entry should exist")
            .expect("submission should succeed");
        assert_eq!(record.status, TransactionStatus::Submitted);
        assert!(h.engine.scheduled(&view.id).is_none());
        assert_eq!(h.engine.clear_scheduled(), 0);
    }

    #[test]
    fn past_due_schedule_is_rejected() {
        let h = harness();
        let err = block_on_with_spin(
            h.engine
                .schedule(&request("mint(uint256)", &["1"], ""), NOW - 1_000),
        )
        .expect_err("past-due schedule should fail");
        assert!(matches!(err, EngineError::Scheduling { .. }));
        assert!(h.engine.transactions().is_empty());
    }

    #[test]
    fn restart_cancels_orphaned_schedules_with_notice() {
        let store = Rc::new(MemoryLogStore::default());
        let before = harness_with_store(store.clone());
        let view = block_on_with_spin(
            before
                .engine
                .schedule(&request("mint(uint256)", &["1"], ""), NOW + 60_000),
        )
        .expect("schedule should succeed");

        let after = harness_with_store(store);
        assert!(after.engine.list_scheduled().is_empty());
        assert_eq!(after.engine.reconcile_after_restart(), 1);
        let record = after.engine.transaction(&view.id).expect("record persisted");
        assert_eq!(record.status, TransactionStatus::Cancelled);
        assert_eq!(
            record.error_detail.as_deref(),
            Some(SCHEDULER_PERSISTENCE_NOTICE)
        );
    }

    #[test]
    fn receipts_resume_after_restart_and_confirm() {
        let store = Rc::new(MemoryLogStore::default());
        let before = harness_with_store(store.clone());
        let record = block_on_with_spin(
            before
                .engine
                .invoke(&request("mint(uint256)", &["1"], "")),
        )
        .expect("mint should submit");

        let after = harness_with_store(Rc::new(MemoryLogStore::with_records(store.snapshot())));
        assert_eq!(after.engine.reconcile_after_restart(), 0);
        assert_eq!(after.engine.resume_receipt_watchers(), 1);
        after
            .broadcaster
            .succeed(record.network_hash.as_deref().expect("hash"));
        after.spawner.run_until_stalled();
        assert_eq!(
            after.engine.transaction(&record.id).map(|r| r.status),
            Some(TransactionStatus::Confirmed)
        );
    }

    #[test]
    fn fired_schedules_release_their_canister_timers() {
        let clock = Rc::new(ManualClock::new(NOW));
        let timers = Rc::new(CanisterTimerDriver::new());
        let engine = InvocationEngine::new(EnginePorts {
            clock: clock.clone(),
            timers: timers.clone(),
            spawner: Rc::new(QueuedSpawner::default()),
            broadcaster: Rc::new(ScriptedBroadcaster::default()),
            store: Rc::new(MemoryLogStore::default()),
            events: Rc::new(RecordingSink::default()),
        });
        engine
            .bind_catalog(
                TEST_CONTRACT,
                1,
                catalog_from_fragments(&[AbiFragment::StringForm(
                    "function mint(uint256 amount)".to_string(),
                )])
                .catalog,
            )
            .expect("catalog should bind");

        let ids = (0..3)
            .map(|_| {
                block_on_with_spin(
                    engine.schedule(&request("mint(uint256)", &["1"], ""), NOW + 1_000),
                )
                .expect("schedule should succeed")
                .id
            })
            .collect::<Vec<_>>();
        assert_eq!(timers.armed_count(), 3);

        clock.advance(1_000);
        for id in &ids {
            block_on_with_spin(engine.fire(id))
                .expect("entry should exist")
                .expect("submission should succeed");
        }
        assert_eq!(timers.armed_count(), 0);
    }
}

//! Deterministic collaborators for unit tests.
//!
//! Everything here is single-threaded and driven by hand: time moves only
//! when a test advances the [`ManualClock`], timers fire only when a test asks
//! the [`ManualTimerDriver`] which ids are due, and spawned receipt watchers
//! only make progress inside [`QueuedSpawner::run_until_stalled`].

use crate::abi::catalog::catalog_from_fragments;
use crate::abi::coercion::coerce_arguments;
use crate::domain::types::{
    AbiFragment, EngineEvent, FunctionDescriptor, InvocationRequest, PendingTransaction,
    PreparedInvocation, Receipt, ReceiptOutcome, SubmissionRequest, TransactionRecord,
    DEFAULT_PRIORITY_WEIGHT,
};
use crate::ports::{
    Clock, EventSink, TaskSpawner, TimerDriver, TimerHandle, TransactionBroadcaster,
    TransactionLogStore,
};
use alloy_primitives::U256;
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
#[cfg(not(target_arch = "wasm32"))]
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

fn noop_waker() -> Waker {
    unsafe fn clone(_ptr: *const ()) -> RawWaker {
        dummy_raw_waker()
    }
    unsafe fn wake(_ptr: *const ()) {}
    unsafe fn wake_by_ref(_ptr: *const ()) {}
    unsafe fn drop(_ptr: *const ()) {}

    fn dummy_raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    unsafe { Waker::from_raw(dummy_raw_waker()) }
}

pub(crate) fn block_on_with_spin<F: Future>(future: F) -> F::Output {
    let waker = noop_waker();
    let mut context = Context::from_waker(&waker);
    let mut future = Box::pin(future);

    for _ in 0..10_000 {
        match future.as_mut().poll(&mut context) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::hint::spin_loop(),
        }
    }

    panic!("future did not complete in test polling loop");
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub(crate) const TEST_CONTRACT: &str = "0x1111111111111111111111111111111111111111";

pub(crate) fn descriptor_for(fragment: &str) -> FunctionDescriptor {
    let build = catalog_from_fragments(&[AbiFragment::StringForm(fragment.to_string())]);
    build
        .catalog
        .read_functions
        .into_iter()
        .chain(build.catalog.write_functions)
        .next()
        .expect("fragment should produce a descriptor")
}

/// Validated invocation of `fragment` against [`TEST_CONTRACT`] on mainnet.
pub(crate) fn prepared_invocation(
    fragment: &str,
    raw_arguments: &[&str],
    native_amount: &str,
) -> PreparedInvocation {
    let descriptor = descriptor_for(fragment);
    let raw_arguments = raw_arguments
        .iter()
        .map(|value| (*value).to_string())
        .collect::<Vec<_>>();
    let coerced = coerce_arguments(&descriptor, &raw_arguments, native_amount, None)
        .expect("fixture arguments should coerce");
    PreparedInvocation {
        request: InvocationRequest {
            contract_address: TEST_CONTRACT.to_string(),
            chain_id: 1,
            function_signature: descriptor.signature.clone(),
            raw_arguments,
            native_amount: native_amount.to_string(),
            priority_weight: DEFAULT_PRIORITY_WEIGHT,
        },
        descriptor,
        coerced,
    }
}

// ── Clock ────────────────────────────────────────────────────────────────────

pub(crate) struct ManualClock {
    now_ms: Cell<u64>,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Cell::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.set(now_ms);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(delta_ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

// ── Timers ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ArmedTimer {
    pub handle: TimerHandle,
    pub schedule_id: String,
    pub due_at_ms: u64,
}

pub(crate) struct ManualTimerDriver {
    clock: Rc<ManualClock>,
    next_handle: Cell<u64>,
    armed: RefCell<Vec<ArmedTimer>>,
    disarmed: RefCell<Vec<TimerHandle>>,
}

impl ManualTimerDriver {
    pub fn new(clock: Rc<ManualClock>) -> Self {
        Self {
            clock,
            next_handle: Cell::new(1),
            armed: RefCell::new(Vec::new()),
            disarmed: RefCell::new(Vec::new()),
        }
    }

    pub fn armed(&self) -> Vec<ArmedTimer> {
        self.armed.borrow().clone()
    }

    pub fn disarmed(&self) -> Vec<TimerHandle> {
        self.disarmed.borrow().clone()
    }

    pub fn is_armed(&self, schedule_id: &str) -> bool {
        self.armed
            .borrow()
            .iter()
            .any(|timer| timer.schedule_id == schedule_id)
    }

    /// Removes and returns the ids whose timers have expired at `now_ms`,
    /// earliest first, the way one-shot timers fire.
    pub fn take_due(&self, now_ms: u64) -> Vec<String> {
        let mut armed = self.armed.borrow_mut();
        let (mut due, pending): (Vec<_>, Vec<_>) = armed
            .drain(..)
            .partition(|timer| timer.due_at_ms <= now_ms);
        *armed = pending;
        due.sort_by_key(|timer| timer.due_at_ms);
        due.into_iter().map(|timer| timer.schedule_id).collect()
    }
}

impl TimerDriver for ManualTimerDriver {
    fn arm(&self, schedule_id: &str, delay_ms: u64) -> TimerHandle {
        let handle = TimerHandle(self.next_handle.get());
        self.next_handle.set(handle.0.saturating_add(1));
        self.armed.borrow_mut().push(ArmedTimer {
            handle,
            schedule_id: schedule_id.to_string(),
            due_at_ms: self.clock.now_ms().saturating_add(delay_ms),
        });
        handle
    }

    fn disarm(&self, handle: TimerHandle) {
        self.armed.borrow_mut().retain(|timer| timer.handle != handle);
        self.disarmed.borrow_mut().push(handle);
    }
}

// ── Spawner ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct QueuedSpawner {
    tasks: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
}

impl QueuedSpawner {
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Polls queued tasks until a full round completes nothing and spawns
    /// nothing. Returns how many tasks finished.
    pub fn run_until_stalled(&self) -> usize {
        let waker = noop_waker();
        let mut context = Context::from_waker(&waker);
        let mut completed = 0usize;

        loop {
            let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
            if tasks.is_empty() {
                return completed;
            }
            let polled = tasks.len();
            let mut still_pending = Vec::new();
            for mut task in tasks {
                match task.as_mut().poll(&mut context) {
                    Poll::Ready(()) => completed = completed.saturating_add(1),
                    Poll::Pending => still_pending.push(task),
                }
            }

            let mut queue = self.tasks.borrow_mut();
            let spawned = std::mem::take(&mut *queue);
            let progressed = still_pending.len() < polled || !spawned.is_empty();
            *queue = still_pending;
            queue.extend(spawned);
            if !progressed {
                return completed;
            }
        }
    }
}

impl TaskSpawner for QueuedSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.tasks.borrow_mut().push(task);
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: RefCell<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.borrow().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.borrow().iter().map(EngineEvent::message).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &EngineEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

// ── Transaction log ──────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MemoryLogStore {
    records: RefCell<Vec<TransactionRecord>>,
}

impl MemoryLogStore {
    pub fn with_records(records: Vec<TransactionRecord>) -> Self {
        Self {
            records: RefCell::new(records),
        }
    }

    pub fn snapshot(&self) -> Vec<TransactionRecord> {
        self.records.borrow().clone()
    }
}

impl TransactionLogStore for MemoryLogStore {
    fn read_all(&self) -> Vec<TransactionRecord> {
        self.records.borrow().clone()
    }

    fn write_all(&self, records: &[TransactionRecord]) -> Result<(), String> {
        *self.records.borrow_mut() = records.to_vec();
        Ok(())
    }
}

// ── Broadcaster ──────────────────────────────────────────────────────────────

/// Hands out sequential hashes and holds each receipt until the test
/// resolves it.
#[derive(Default)]
pub(crate) struct ScriptedBroadcaster {
    submissions: RefCell<Vec<SubmissionRequest>>,
    submit_error: RefCell<Option<String>>,
    receipts: RefCell<BTreeMap<String, Result<Receipt, String>>>,
    balance: Cell<Option<U256>>,
}

impl ScriptedBroadcaster {
    pub fn submissions(&self) -> Vec<SubmissionRequest> {
        self.submissions.borrow().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.borrow().len()
    }

    pub fn fail_submissions_with(&self, cause: &str) {
        *self.submit_error.borrow_mut() = Some(cause.to_string());
    }

    pub fn set_balance(&self, balance: Option<U256>) {
        self.balance.set(balance);
    }

    pub fn resolve(&self, hash: &str, receipt: Result<Receipt, String>) {
        self.receipts.borrow_mut().insert(hash.to_string(), receipt);
    }

    pub fn succeed(&self, hash: &str) {
        self.resolve(
            hash,
            Ok(Receipt {
                outcome: ReceiptOutcome::Success,
                detail: "status 0x1".to_string(),
            }),
        );
    }

    pub fn hash_for(sequence: usize) -> String {
        format!("0x{sequence:064x}")
    }
}

#[async_trait(?Send)]
impl TransactionBroadcaster for ScriptedBroadcaster {
    async fn submit(&self, request: &SubmissionRequest) -> Result<PendingTransaction, String> {
        self.submissions.borrow_mut().push(request.clone());
        if let Some(cause) = self.submit_error.borrow().clone() {
            return Err(cause);
        }
        Ok(PendingTransaction {
            hash: Self::hash_for(self.submissions.borrow().len()),
        })
    }

    async fn await_receipt(&self, pending: &PendingTransaction) -> Result<Receipt, String> {
        futures::future::poll_fn(|_context| {
            match self.receipts.borrow_mut().remove(&pending.hash) {
                Some(receipt) => Poll::Ready(receipt),
                None => Poll::Pending,
            }
        })
        .await
    }

    async fn available_balance(&self, _chain_id: u64) -> Option<U256> {
        self.balance.get()
    }
}

// ── Host environment ─────────────────────────────────────────────────────────

/// Runs `f` with temporary host environment variable overrides under a global
/// process-wide lock to avoid cross-test races.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn with_locked_host_env<T>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("host env lock should not be poisoned");

    let previous = vars
        .iter()
        .map(|(name, _)| ((*name).to_string(), std::env::var(name).ok()))
        .collect::<Vec<_>>();

    for (name, value) in vars {
        set_or_remove_env(name, *value);
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    for (name, value) in previous {
        set_or_remove_env(&name, value.as_deref());
    }

    match result {
        Ok(output) => output,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn set_or_remove_env(name: &str, value: Option<&str>) {
    match value {
        Some(v) => {
            #[allow(unused_unsafe)]
            unsafe {
                std::env::set_var(name, v);
            }
        }
        None => {
            #[allow(unused_unsafe)]
            unsafe {
                std::env::remove_var(name);
            }
        }
    }
}

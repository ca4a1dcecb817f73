//! Canister-backed timer and task ports.
//!
//! On wasm32 schedules are one-shot `ic-cdk-timers` timers that call back into
//! [`crate::runtime::fire_scheduled`], and detached work runs on the ic-cdk
//! executor. Host builds have neither, so timers are only recorded and spawned
//! tasks are polled inline.
use crate::ports::{TaskSpawner, TimerDriver, TimerHandle};
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

#[cfg(target_arch = "wasm32")]
use ic_cdk_timers::TimerId;
#[cfg(target_arch = "wasm32")]
use std::time::Duration;

#[derive(Default)]
pub struct CanisterTimerDriver {
    next_handle: Cell<u64>,
    #[cfg(target_arch = "wasm32")]
    armed: RefCell<BTreeMap<TimerHandle, TimerId>>,
    #[cfg(not(target_arch = "wasm32"))]
    armed: RefCell<BTreeMap<TimerHandle, (String, u64)>>,
}

impl CanisterTimerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn armed_count(&self) -> usize {
        self.armed.borrow().len()
    }

    fn allocate_handle(&self) -> TimerHandle {
        let handle = self.next_handle.get().saturating_add(1);
        self.next_handle.set(handle);
        TimerHandle(handle)
    }
}

impl TimerDriver for CanisterTimerDriver {
    #[cfg(target_arch = "wasm32")]
    fn arm(&self, schedule_id: &str, delay_ms: u64) -> TimerHandle {
        let handle = self.allocate_handle();
        let schedule_id = schedule_id.to_string();
        let timer = ic_cdk_timers::set_timer(Duration::from_millis(delay_ms), async move {
            crate::runtime::fire_scheduled(&schedule_id).await;
        });
        self.armed.borrow_mut().insert(handle, timer);
        handle
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn arm(&self, schedule_id: &str, delay_ms: u64) -> TimerHandle {
        let handle = self.allocate_handle();
        self.armed
            .borrow_mut()
            .insert(handle, (schedule_id.to_string(), delay_ms));
        handle
    }

    #[cfg(target_arch = "wasm32")]
    fn disarm(&self, handle: TimerHandle) {
        if let Some(timer) = self.armed.borrow_mut().remove(&handle) {
            ic_cdk_timers::clear_timer(timer);
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn disarm(&self, handle: TimerHandle) {
        self.armed.borrow_mut().remove(&handle);
    }
}

#[derive(Default)]
pub struct CanisterSpawner {
    #[cfg(not(target_arch = "wasm32"))]
    parked: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
}

impl CanisterSpawner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskSpawner for CanisterSpawner {
    #[cfg(target_arch = "wasm32")]
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        ic_cdk::futures::spawn(task);
    }

    /// Polls the new task and any parked ones once each; unfinished tasks
    /// stay parked until the next spawn.
    #[cfg(not(target_arch = "wasm32"))]
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        use std::task::Context;

        let mut tasks = std::mem::take(&mut *self.parked.borrow_mut());
        tasks.push(task);
        let mut context = Context::from_waker(futures::task::noop_waker_ref());
        tasks.retain_mut(|task| task.as_mut().poll(&mut context).is_pending());
        self.parked.borrow_mut().extend(tasks);
    }
}

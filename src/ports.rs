use crate::domain::types::{
    AbiFragment, EngineEvent, PendingTransaction, Receipt, SubmissionRequest, TransactionRecord,
};
use alloy_primitives::U256;
use async_trait::async_trait;
use futures::future::LocalBoxFuture;

/// Builds, signs and broadcasts a prepared call, then waits for its receipt.
#[async_trait(?Send)]
pub trait TransactionBroadcaster {
    async fn submit(&self, request: &SubmissionRequest) -> Result<PendingTransaction, String>;
    async fn await_receipt(&self, pending: &PendingTransaction) -> Result<Receipt, String>;

    /// Spendable native balance of the signing account, when known.
    async fn available_balance(&self, _chain_id: u64) -> Option<U256> {
        None
    }
}

#[async_trait(?Send)]
pub trait AbiSource {
    /// `Ok(None)` when the source has nothing for this contract.
    async fn fetch(
        &self,
        contract_address: &str,
        chain_id: u64,
    ) -> Result<Option<Vec<AbiFragment>>, String>;
}

#[async_trait(?Send)]
pub trait SignerPort {
    async fn sign_message(&self, message_hash: &str) -> Result<String, String>;
}

pub trait TransactionLogStore {
    fn read_all(&self) -> Vec<TransactionRecord>;
    fn write_all(&self, records: &[TransactionRecord]) -> Result<(), String>;
}

pub trait EventSink {
    fn publish(&self, event: &EngineEvent);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// One-shot timers keyed by schedule id.
pub trait TimerDriver {
    fn arm(&self, schedule_id: &str, delay_ms: u64) -> TimerHandle;
    fn disarm(&self, handle: TimerHandle);
}

/// Runs detached work such as receipt watchers.
pub trait TaskSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

pub trait Clock {
    fn now_ms(&self) -> u64;
}

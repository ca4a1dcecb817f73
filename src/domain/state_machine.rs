use crate::domain::types::{LifecycleEvent, TransactionStatus, TransitionError};

pub fn transition(
    current: &TransactionStatus,
    event: &LifecycleEvent,
) -> Result<TransactionStatus, TransitionError> {
    match (current, event) {
        (TransactionStatus::Scheduled, LifecycleEvent::Fire) => Ok(TransactionStatus::Constructed),
        (TransactionStatus::Scheduled, LifecycleEvent::Cancel { .. }) => {
            Ok(TransactionStatus::Cancelled)
        }
        (TransactionStatus::Constructed, LifecycleEvent::Broadcast { .. }) => {
            Ok(TransactionStatus::Submitted)
        }
        (TransactionStatus::Constructed, LifecycleEvent::BroadcastRejected { .. }) => {
            Ok(TransactionStatus::Failed)
        }
        (TransactionStatus::Submitted, LifecycleEvent::ReceiptSucceeded) => {
            Ok(TransactionStatus::Confirmed)
        }
        (TransactionStatus::Submitted, LifecycleEvent::ReceiptFailed { .. }) => {
            Ok(TransactionStatus::Failed)
        }
        (TransactionStatus::Constructed, LifecycleEvent::Cancel { .. })
        | (TransactionStatus::Submitted, LifecycleEvent::Cancel { .. }) => Err(TransitionError {
            from: current.clone(),
            event: event.label().to_string(),
            reason: "only scheduled invocations can be cancelled".to_string(),
        }),
        _ => Err(TransitionError {
            from: current.clone(),
            event: event.label().to_string(),
            reason: "invalid transition".to_string(),
        }),
    }
}

/// Position of a status along the lifecycle; every accepted transition
/// strictly increases it.
#[cfg(test)]
pub fn lifecycle_rank(status: &TransactionStatus) -> u8 {
    match status {
        TransactionStatus::Scheduled => 0,
        TransactionStatus::Constructed => 1,
        TransactionStatus::Submitted => 2,
        TransactionStatus::Cancelled
        | TransactionStatus::Confirmed
        | TransactionStatus::Failed => 3,
    }
}

//! Centralised timing constants and the canister time source.
//!
//! Receipt polling and the recent-event ring are the only cadences the
//! engine owns. Scheduled invocations use one-shot timers whose delay is
//! derived from the caller's absolute `execute_at_ms`, so no heartbeat
//! exists.
//!
//! | Constant                               | Production | Test |
//! |----------------------------------------|------------|------|
//! | `DEFAULT_RECEIPT_POLL_INTERVAL_SECS`   | 4 s        | 1 s  |

use crate::ports::Clock;

// ── Receipt polling ─────────────────────────────────────────────────────────

/// Delay between `eth_getTransactionReceipt` attempts while a transaction is
/// `Submitted`. There is no upper bound on the number of attempts.
#[cfg(not(test))]
pub const DEFAULT_RECEIPT_POLL_INTERVAL_SECS: u64 = 4;
#[cfg(test)]
pub const DEFAULT_RECEIPT_POLL_INTERVAL_SECS: u64 = 1;

/// Controllers may tune the poll interval within these bounds.
pub const MIN_RECEIPT_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_RECEIPT_POLL_INTERVAL_SECS: u64 = 300;

// ── Notifications ───────────────────────────────────────────────────────────

/// Size of the bounded ring behind `list_recent_events`.
pub const RECENT_EVENT_CAPACITY: usize = 200;

/// Default page size for `list_transactions` and `list_recent_events`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Host-safe nanosecond time source.
///
/// - `wasm32`: IC replicated time via `ic_cdk::api::time()`
/// - non-`wasm32`: wall clock fallback for native/unit tests
pub fn current_time_ns() -> u64 {
    #[cfg(target_arch = "wasm32")]
    return ic_cdk::api::time();

    #[cfg(all(not(target_arch = "wasm32"), test))]
    if let Some(override_ns) = TEST_TIME_OVERRIDE_NS.with(|slot| slot.get()) {
        return override_ns;
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|dur| dur.as_nanos().try_into().unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

pub fn current_time_ms() -> u64 {
    current_time_ns() / NANOS_PER_MILLI
}

/// Canister clock handed to the engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

#[cfg(all(not(target_arch = "wasm32"), test))]
thread_local! {
    static TEST_TIME_OVERRIDE_NS: std::cell::Cell<Option<u64>> = const { std::cell::Cell::new(None) };
}

#[cfg(all(not(target_arch = "wasm32"), test))]
pub fn set_test_time_ns(now_ns: u64) {
    TEST_TIME_OVERRIDE_NS.with(|slot| slot.set(Some(now_ns)));
}

#[cfg(all(not(target_arch = "wasm32"), test))]
pub fn clear_test_time_ns() {
    TEST_TIME_OVERRIDE_NS.with(|slot| slot.set(None));
}

const NANOS_PER_MILLI: u64 = 1_000_000;

// ── Compile-time sanity checks ──────────────────────────────────────────────

const _: () = assert!(DEFAULT_RECEIPT_POLL_INTERVAL_SECS >= MIN_RECEIPT_POLL_INTERVAL_SECS);
const _: () = assert!(DEFAULT_RECEIPT_POLL_INTERVAL_SECS <= MAX_RECEIPT_POLL_INTERVAL_SECS);
const _: () = assert!(DEFAULT_LIST_LIMIT <= RECENT_EVENT_CAPACITY);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_follows_the_test_override() {
        set_test_time_ns(1_700_000_000_123_456_789);
        assert_eq!(SystemClock.now_ms(), 1_700_000_000_123);
        clear_test_time_ns();
        assert!(SystemClock.now_ms() > 1_700_000_000_123);
    }

    #[test]
    fn test_profile_polls_fast() {
        assert_eq!(DEFAULT_RECEIPT_POLL_INTERVAL_SECS, 1);
    }
}

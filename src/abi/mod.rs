//! ABI subsystem: turns raw contract ABIs into invocable, typed calls.
//!
//! The modules form a pipeline:
//!
//! 1. [`fragment`] normalises string and structured ABI fragments into
//!    [`NormalizedFragment`]s, dropping malformed entries with a diagnostic.
//! 2. [`catalog`]  partitions normalised fragments into read and write
//!    functions keyed by canonical signature, tagging acquisition functions
//!    as primary.
//! 3. [`coercion`] validates raw user strings against a chosen descriptor and
//!    produces typed values plus the payable base-unit amount.
//! 4. [`calldata`] encodes a descriptor and its typed values into EVM call
//!    data for the broadcaster.
//!
//! [`NormalizedFragment`]: crate::domain::types::NormalizedFragment
pub mod calldata;
pub mod catalog;
pub mod coercion;
pub mod fragment;

pub mod abi_source;
pub mod evm;
pub mod threshold_signer;
pub mod timers;

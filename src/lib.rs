mod abi;
mod domain;
mod engine;
mod error;
mod features;
mod notifications;
mod ports;
mod runtime;
mod scheduler;
mod storage;
#[cfg(test)]
mod test_support;
mod timing;
mod tracker;

use crate::domain::chains::{chain_by_id, supported_chains};
use crate::domain::types::{
    CatalogView, ChainInfo, EngineConfig, FunctionCatalog, InvocationRequest,
    ScheduledInvocationView, TransactionRecord,
};
use crate::error::EngineError;
use crate::features::threshold_signer::derive_and_cache_evm_address;
use crate::notifications::EngineNotice;
use crate::scheduler::SCHEDULER_PERSISTENCE_NOTICE;
use crate::storage::stable;
use crate::timing::DEFAULT_LIST_LIMIT;
use candid::CandidType;
use serde::Deserialize;
use std::time::Duration;

#[derive(CandidType, Deserialize)]
struct InitArgs {
    ecdsa_key_name: String,
    #[serde(default)]
    evm_rpc_url: Option<String>,
    #[serde(default)]
    evm_rpc_fallback_url: Option<String>,
    #[serde(default)]
    default_chain_id: Option<u64>,
    #[serde(default)]
    receipt_poll_interval_secs: Option<u64>,
    #[serde(default)]
    max_response_bytes: Option<u64>,
}

fn ensure_controller() -> Result<(), String> {
    #[cfg(target_arch = "wasm32")]
    {
        let caller = ic_cdk::api::msg_caller();
        if !ic_cdk::api::is_controller(&caller) {
            return Err("caller is not a controller".to_string());
        }
        Ok(())
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        Ok(())
    }
}

fn ensure_controller_or_trap() {
    if let Err(error) = ensure_controller() {
        ic_cdk::trap(&error);
    }
}

#[ic_cdk::init]
fn init(args: InitArgs) {
    apply_init_args(args);
    schedule_address_derivation();
}

fn apply_init_args(args: InitArgs) {
    stable::init_storage();
    let _ = stable::set_ecdsa_key_name(args.ecdsa_key_name)
        .unwrap_or_else(|error| ic_cdk::trap(&error));
    if let Some(rpc_url) = args.evm_rpc_url {
        let _ = stable::set_evm_rpc_url(rpc_url).unwrap_or_else(|error| ic_cdk::trap(&error));
    }
    let _ = stable::set_evm_rpc_fallback_url(args.evm_rpc_fallback_url)
        .unwrap_or_else(|error| ic_cdk::trap(&error));
    if let Some(chain_id) = args.default_chain_id {
        let _ =
            stable::set_default_chain_id(chain_id).unwrap_or_else(|error| ic_cdk::trap(&error));
    }
    if let Some(interval_secs) = args.receipt_poll_interval_secs {
        let _ = stable::set_receipt_poll_interval_secs(interval_secs)
            .unwrap_or_else(|error| ic_cdk::trap(&error));
    }
    if let Some(max_response_bytes) = args.max_response_bytes {
        let _ = stable::set_evm_rpc_max_response_bytes(max_response_bytes)
            .unwrap_or_else(|error| ic_cdk::trap(&error));
    }
    stable::set_evm_address(None);
}

#[ic_cdk::post_upgrade]
fn post_upgrade() {
    stable::init_storage();
    // Timers do not survive an upgrade, so neither do pending schedules.
    runtime::engine().reconcile_after_restart();
    schedule_receipt_resumption();
    if stable::evm_address().is_none() {
        schedule_address_derivation();
    }
}

/// Receipt polling issues HTTPS outcalls, which upgrade hooks cannot make.
fn schedule_receipt_resumption() {
    ic_cdk_timers::set_timer(Duration::ZERO, async {
        let _ = runtime::engine().resume_receipt_watchers();
    });
}

/// `ecdsa_public_key` is an inter-canister call, which init hooks cannot
/// await.
fn schedule_address_derivation() {
    ic_cdk_timers::set_timer(Duration::ZERO, async {
        let key_name = stable::engine_config().ecdsa_key_name;
        let _ = derive_and_cache_evm_address(&key_name).await;
    });
}

fn list_limit(limit: u32) -> usize {
    match usize::try_from(limit) {
        Ok(0) | Err(_) => DEFAULT_LIST_LIMIT,
        Ok(limit) => limit,
    }
}

// ── Contracts ────────────────────────────────────────────────────────────────

#[ic_cdk::update]
fn register_contract_abi(
    contract_address: String,
    chain_id: u64,
    abi_json: String,
) -> Result<CatalogView, EngineError> {
    ensure_controller_or_trap();
    runtime::register_contract_abi(&contract_address, chain_id, &abi_json)
}

#[ic_cdk::update]
async fn load_contract(
    contract_address: String,
    chain_id: u64,
    use_fallback_abi: bool,
) -> Result<CatalogView, EngineError> {
    runtime::load_contract(&contract_address, chain_id, use_fallback_abi).await
}

#[ic_cdk::query]
fn get_function_catalog(contract_address: String, chain_id: u64) -> Option<FunctionCatalog> {
    runtime::engine().catalog(&contract_address, chain_id)
}

// ── Invocation & scheduling ──────────────────────────────────────────────────

#[ic_cdk::update]
async fn invoke_function(request: InvocationRequest) -> Result<TransactionRecord, EngineError> {
    ensure_controller_or_trap();
    runtime::engine().invoke(&request).await
}

#[ic_cdk::update]
async fn schedule_invocation(
    request: InvocationRequest,
    execute_at_ms: u64,
) -> Result<ScheduledInvocationView, EngineError> {
    ensure_controller_or_trap();
    runtime::engine().schedule(&request, execute_at_ms).await
}

#[ic_cdk::update]
fn cancel_scheduled_invocation(id: String) -> bool {
    ensure_controller_or_trap();
    runtime::engine().cancel(&id)
}

#[ic_cdk::update]
fn clear_scheduled_invocations() -> u32 {
    ensure_controller_or_trap();
    runtime::engine().clear_scheduled()
}

#[ic_cdk::query]
fn list_scheduled_invocations() -> Vec<ScheduledInvocationView> {
    runtime::engine().list_scheduled()
}

#[ic_cdk::query]
fn scheduler_persistence_notice() -> String {
    SCHEDULER_PERSISTENCE_NOTICE.to_string()
}

// ── Records & notifications ──────────────────────────────────────────────────

#[ic_cdk::query]
fn list_transactions(limit: u32) -> Vec<TransactionRecord> {
    runtime::engine().recent_transactions(list_limit(limit))
}

#[ic_cdk::query]
fn get_transaction(id: String) -> Option<TransactionRecord> {
    runtime::engine().transaction(&id)
}

#[ic_cdk::query]
fn list_recent_events(limit: u32) -> Vec<EngineNotice> {
    runtime::recent_events(list_limit(limit))
}

// ── Chains & configuration ───────────────────────────────────────────────────

#[ic_cdk::query]
fn list_supported_chains() -> Vec<ChainInfo> {
    supported_chains()
}

#[ic_cdk::query]
fn get_chain(chain_id: u64) -> Option<ChainInfo> {
    chain_by_id(chain_id)
}

#[ic_cdk::query]
fn get_engine_config() -> EngineConfig {
    stable::engine_config()
}

#[ic_cdk::update]
fn set_evm_rpc_url(url: String) -> Result<String, String> {
    ensure_controller()?;
    stable::set_evm_rpc_url(url)
}

#[ic_cdk::update]
fn set_evm_rpc_fallback_url(url: Option<String>) -> Result<Option<String>, String> {
    ensure_controller()?;
    stable::set_evm_rpc_fallback_url(url)
}

#[ic_cdk::update]
fn set_evm_rpc_max_response_bytes(max_response_bytes: u64) -> Result<u64, String> {
    ensure_controller()?;
    stable::set_evm_rpc_max_response_bytes(max_response_bytes)
}

#[ic_cdk::update]
fn set_default_chain_id(chain_id: u64) -> Result<u64, String> {
    ensure_controller()?;
    stable::set_default_chain_id(chain_id)
}

#[ic_cdk::update]
fn set_receipt_poll_interval_secs(interval_secs: u64) -> Result<u64, String> {
    ensure_controller()?;
    stable::set_receipt_poll_interval_secs(interval_secs)
}

#[ic_cdk::query]
fn get_evm_address() -> Option<String> {
    stable::evm_address()
}

#[ic_cdk::update]
async fn derive_evm_address() -> Result<String, String> {
    ensure_controller()?;
    let key_name = stable::engine_config().ecdsa_key_name;
    derive_and_cache_evm_address(&key_name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::block_on_with_spin;

    fn init_args() -> InitArgs {
        InitArgs {
            ecdsa_key_name: "dfx_test_key".to_string(),
            evm_rpc_url: None,
            evm_rpc_fallback_url: None,
            default_chain_id: None,
            receipt_poll_interval_secs: None,
            max_response_bytes: None,
        }
    }

    #[test]
    fn apply_init_args_seeds_the_engine_config() {
        apply_init_args(InitArgs {
            evm_rpc_url: Some("https://base.example.com/".to_string()),
            default_chain_id: Some(8453),
            receipt_poll_interval_secs: Some(6),
            max_response_bytes: Some(8_192),
            ..init_args()
        });

        let config = get_engine_config();
        assert_eq!(config.ecdsa_key_name, "dfx_test_key");
        assert_eq!(config.evm_rpc_url, "https://base.example.com");
        assert_eq!(config.default_chain_id, 8453);
        assert_eq!(config.receipt_poll_interval_secs, 6);
        assert_eq!(config.evm_rpc_max_response_bytes, 8_192);
        assert_eq!(config.evm_address, None);
    }

    #[test]
    fn derive_evm_address_caches_the_host_address() {
        apply_init_args(init_args());
        assert_eq!(get_evm_address(), None);

        let address = block_on_with_spin(derive_evm_address()).expect("host derivation works");
        assert_eq!(get_evm_address(), Some(address));
    }

    #[test]
    fn list_limits_fall_back_to_the_default() {
        assert_eq!(list_limit(0), DEFAULT_LIST_LIMIT);
        assert_eq!(list_limit(7), 7);
    }

    #[test]
    fn chain_queries_use_the_registry() {
        assert_eq!(list_supported_chains().len(), 11);
        assert_eq!(
            get_chain(16_384).map(|chain| chain.native_symbol),
            Some("APE".to_string())
        );
        assert_eq!(get_chain(999), None);
    }

    #[test]
    fn post_upgrade_notice_is_exposed() {
        assert!(scheduler_persistence_notice().contains("restart"));
        assert!(list_scheduled_invocations().is_empty());
    }
}

ic_cdk::export_candid!();

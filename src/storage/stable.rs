use crate::domain::chains::is_supported_chain;
use crate::domain::types::{AbiFragment, EngineConfig, TransactionRecord};
use crate::ports::TransactionLogStore;
use crate::timing::{MAX_RECEIPT_POLL_INTERVAL_SECS, MIN_RECEIPT_POLL_INTERVAL_SECS};
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use ic_stable_structures::{
    memory_manager::{MemoryId, MemoryManager, VirtualMemory},
    DefaultMemoryImpl, StableBTreeMap,
};
use serde::{de::DeserializeOwned, Serialize};
use std::cell::RefCell;

const CONFIG_KEY: &str = "engine.config";
const TRANSACTION_LOG_KEY: &str = "transactions.log";

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum StorageLogPriority {
    #[log_level(capacity = 200, name = "STORAGE_ERROR")]
    Error,
}

impl GetLogFilter for StorageLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));
    static CONFIG_MAP: RefCell<StableBTreeMap<String, Vec<u8>, VirtualMemory<DefaultMemoryImpl>>> =
        RefCell::new(StableBTreeMap::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(0)))
        ));
    static TX_LOG_MAP: RefCell<StableBTreeMap<String, Vec<u8>, VirtualMemory<DefaultMemoryImpl>>> =
        RefCell::new(StableBTreeMap::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(1)))
        ));
    static ABI_MAP: RefCell<StableBTreeMap<String, Vec<u8>, VirtualMemory<DefaultMemoryImpl>>> =
        RefCell::new(StableBTreeMap::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(2)))
        ));
}

pub fn init_storage() {
    let _ = engine_config();
}

// ── Configuration ────────────────────────────────────────────────────────────

pub fn engine_config() -> EngineConfig {
    let payload = CONFIG_MAP.with(|map| map.borrow().get(&CONFIG_KEY.to_string()));
    read_json(payload.as_deref()).unwrap_or_default()
}

pub fn save_engine_config(config: &EngineConfig) {
    CONFIG_MAP.with(|map| {
        map.borrow_mut()
            .insert(CONFIG_KEY.to_string(), encode_json(config));
    });
}

pub fn set_ecdsa_key_name(key_name: String) -> Result<String, String> {
    if key_name.trim().is_empty() {
        return Err("ecdsa key name cannot be empty".to_string());
    }
    let mut config = engine_config();
    config.ecdsa_key_name = key_name.trim().to_string();
    let out = config.ecdsa_key_name.clone();
    save_engine_config(&config);
    Ok(out)
}

pub fn set_evm_rpc_url(url: String) -> Result<String, String> {
    let mut config = engine_config();
    config.evm_rpc_url = normalize_rpc_url(&url)?;
    let out = config.evm_rpc_url.clone();
    save_engine_config(&config);
    Ok(out)
}

pub fn set_evm_rpc_fallback_url(url: Option<String>) -> Result<Option<String>, String> {
    let mut config = engine_config();
    config.evm_rpc_fallback_url = match url {
        Some(url) if !url.trim().is_empty() => Some(normalize_rpc_url(&url)?),
        _ => None,
    };
    let out = config.evm_rpc_fallback_url.clone();
    save_engine_config(&config);
    Ok(out)
}

pub fn set_default_chain_id(chain_id: u64) -> Result<u64, String> {
    if !is_supported_chain(chain_id) {
        return Err(format!("chain {chain_id} is not supported"));
    }
    let mut config = engine_config();
    config.default_chain_id = chain_id;
    save_engine_config(&config);
    Ok(chain_id)
}

pub fn set_receipt_poll_interval_secs(interval_secs: u64) -> Result<u64, String> {
    if !(MIN_RECEIPT_POLL_INTERVAL_SECS..=MAX_RECEIPT_POLL_INTERVAL_SECS).contains(&interval_secs) {
        return Err(format!(
            "receipt poll interval must be between {MIN_RECEIPT_POLL_INTERVAL_SECS} and {MAX_RECEIPT_POLL_INTERVAL_SECS} seconds"
        ));
    }
    let mut config = engine_config();
    config.receipt_poll_interval_secs = interval_secs;
    save_engine_config(&config);
    Ok(interval_secs)
}

pub fn set_evm_rpc_max_response_bytes(max_response_bytes: u64) -> Result<u64, String> {
    if max_response_bytes == 0 {
        return Err("max response bytes must be positive".to_string());
    }
    let mut config = engine_config();
    config.evm_rpc_max_response_bytes = max_response_bytes;
    save_engine_config(&config);
    Ok(max_response_bytes)
}

pub fn set_evm_address(address: Option<String>) {
    let mut config = engine_config();
    config.evm_address = address.map(|value| value.trim().to_ascii_lowercase());
    save_engine_config(&config);
}

pub fn evm_address() -> Option<String> {
    engine_config().evm_address
}

fn normalize_rpc_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("evm rpc url cannot be empty".to_string());
    }
    if !trimmed.starts_with("https://") && !trimmed.starts_with("http://") {
        return Err("evm rpc url must use http or https".to_string());
    }
    Ok(trimmed.to_string())
}

// ── Transaction log ──────────────────────────────────────────────────────────

fn stored_transaction_log() -> Option<Vec<u8>> {
    TX_LOG_MAP.with(|map| map.borrow().get(&TRANSACTION_LOG_KEY.to_string()))
}

/// An undecodable log reads as empty but is left in place.
pub fn read_transaction_log() -> Vec<TransactionRecord> {
    let Some(raw) = stored_transaction_log() else {
        return Vec::new();
    };
    match serde_json::from_slice(&raw) {
        Ok(records) => records,
        Err(error) => {
            log!(
                StorageLogPriority::Error,
                "storage_transaction_log_undecodable bytes={} error={}",
                raw.len(),
                error
            );
            Vec::new()
        }
    }
}

/// Replaces the persisted log. Refuses to overwrite a stored log that no
/// longer decodes, so history is never silently dropped.
pub fn write_transaction_log(records: &[TransactionRecord]) -> Result<(), String> {
    if let Some(raw) = stored_transaction_log() {
        if let Err(error) = serde_json::from_slice::<Vec<TransactionRecord>>(&raw) {
            return Err(format!(
                "stored transaction log is undecodable, refusing to overwrite it: {error}"
            ));
        }
    }
    let payload = serde_json::to_vec(records)
        .map_err(|error| format!("failed to encode transaction log: {error}"))?;
    TX_LOG_MAP.with(|map| {
        map.borrow_mut()
            .insert(TRANSACTION_LOG_KEY.to_string(), payload);
    });
    Ok(())
}

/// The transaction log kept in stable memory as one JSON document.
#[derive(Clone, Copy, Debug, Default)]
pub struct StableTransactionLogStore;

impl TransactionLogStore for StableTransactionLogStore {
    fn read_all(&self) -> Vec<TransactionRecord> {
        read_transaction_log()
    }

    fn write_all(&self, records: &[TransactionRecord]) -> Result<(), String> {
        write_transaction_log(records)
    }
}

// ── Registered ABIs ──────────────────────────────────────────────────────────

fn abi_key(contract_address: &str, chain_id: u64) -> String {
    format!("{chain_id}:{}", contract_address.trim().to_ascii_lowercase())
}

pub fn save_contract_abi(contract_address: &str, chain_id: u64, fragments: &[AbiFragment]) {
    ABI_MAP.with(|map| {
        map.borrow_mut()
            .insert(abi_key(contract_address, chain_id), encode_json(fragments));
    });
}

pub fn contract_abi(contract_address: &str, chain_id: u64) -> Option<Vec<AbiFragment>> {
    let payload = ABI_MAP.with(|map| map.borrow().get(&abi_key(contract_address, chain_id)));
    read_json(payload.as_deref())
}

/// `(chain_id, contract_address)` for every registered ABI.
pub fn registered_contracts() -> Vec<(u64, String)> {
    ABI_MAP.with(|map| {
        map.borrow()
            .iter()
            .filter_map(|entry| {
                let (chain_id, address) = entry.key().split_once(':')?;
                Some((chain_id.parse::<u64>().ok()?, address.to_string()))
            })
            .collect()
    })
}

fn encode_json<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn read_json<T: DeserializeOwned>(value: Option<&[u8]>) -> Option<T> {
    value.and_then(|raw| serde_json::from_slice(raw).ok())
}

//! Process-wide engine wiring.
//!
//! The canister owns exactly one [`InvocationEngine`], built lazily on first
//! use from the canister-backed ports and kept in a thread-local slot. The
//! slot holds the engine by value; callers get a cheap clone and never keep a
//! borrow of the slot across an await.
use crate::abi::catalog::catalog_from_fragments;
use crate::abi::fragment::decode_abi_json;
use crate::domain::types::{CatalogSource, CatalogView};
use crate::engine::{catalog_key, EnginePorts, InvocationEngine};
use crate::error::EngineError;
use crate::features::abi_source::{fallback_erc721_fragments, StoredAbiSource};
use crate::features::evm::EvmRpcBroadcaster;
use crate::features::threshold_signer::ThresholdSigner;
use crate::features::timers::{CanisterSpawner, CanisterTimerDriver};
use crate::notifications::{EngineNotice, EventFanout, RecentEventsSink};
use crate::ports::{AbiSource, Clock};
use crate::storage::stable::{self, StableTransactionLogStore};
use crate::timing::{SystemClock, RECENT_EVENT_CAPACITY};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone)]
struct Runtime {
    engine: InvocationEngine,
    recent: Rc<RecentEventsSink>,
}

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

fn runtime() -> Runtime {
    if let Some(runtime) = RUNTIME.with(|slot| slot.borrow().clone()) {
        return runtime;
    }
    let runtime = build_runtime();
    RUNTIME.with(|slot| *slot.borrow_mut() = Some(runtime.clone()));
    rebind_registered_catalogs(&runtime.engine);
    runtime
}

fn build_runtime() -> Runtime {
    let config = stable::engine_config();
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let recent = Rc::new(RecentEventsSink::new(RECENT_EVENT_CAPACITY, clock.clone()));
    let events = Rc::new(EventFanout::new());
    events.subscribe(recent.clone());

    let signer = Rc::new(ThresholdSigner::new(config.ecdsa_key_name));
    let engine = InvocationEngine::new(EnginePorts {
        clock,
        timers: Rc::new(CanisterTimerDriver::new()),
        spawner: Rc::new(CanisterSpawner::new()),
        broadcaster: Rc::new(EvmRpcBroadcaster::new(signer)),
        store: Rc::new(StableTransactionLogStore),
        events,
    });
    Runtime { engine, recent }
}

/// Catalogs are not persisted; registered ABIs are rebuilt into the engine
/// when it is installed.
fn rebind_registered_catalogs(engine: &InvocationEngine) {
    for (chain_id, contract_address) in stable::registered_contracts() {
        if let Some(fragments) = stable::contract_abi(&contract_address, chain_id) {
            let build = catalog_from_fragments(&fragments);
            let _ = engine.bind_catalog(&contract_address, chain_id, build.catalog);
        }
    }
}

pub fn engine() -> InvocationEngine {
    runtime().engine
}

pub fn recent_events(limit: usize) -> Vec<EngineNotice> {
    runtime().recent.recent(limit)
}

/// Timer callback for a due schedule.
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
pub async fn fire_scheduled(schedule_id: &str) {
    let _ = engine().fire(schedule_id).await;
}

/// Stores a verified ABI for `(chain, address)` and binds its catalog.
pub fn register_contract_abi(
    contract_address: &str,
    chain_id: u64,
    abi_json: &str,
) -> Result<CatalogView, EngineError> {
    let (chain_id, contract_address) = catalog_key(contract_address, chain_id)?;
    let fragments = decode_abi_json(abi_json)
        .map_err(|reason| EngineError::validation("abi_json", reason))?;
    let build = catalog_from_fragments(&fragments);
    if build.catalog.is_empty() {
        return Err(EngineError::validation(
            "abi_json",
            "abi declares no callable functions",
        ));
    }

    stable::save_contract_abi(&contract_address, chain_id, &fragments);
    engine().bind_catalog(&contract_address, chain_id, build.catalog.clone())?;
    Ok(CatalogView {
        contract_address,
        chain_id,
        source: CatalogSource::Registered,
        catalog: build.catalog,
        diagnostics: build.diagnostics,
    })
}

/// Fetches a contract's ABI, builds its catalog and binds it to the engine.
pub async fn load_contract(
    contract_address: &str,
    chain_id: u64,
    use_fallback_abi: bool,
) -> Result<CatalogView, EngineError> {
    load_contract_from(&engine(), &StoredAbiSource, contract_address, chain_id, use_fallback_abi)
        .await
}

async fn load_contract_from(
    engine: &InvocationEngine,
    source: &dyn AbiSource,
    contract_address: &str,
    chain_id: u64,
    use_fallback_abi: bool,
) -> Result<CatalogView, EngineError> {
    let (chain_id, contract_address) = catalog_key(contract_address, chain_id)?;
    let fetched = source
        .fetch(&contract_address, chain_id)
        .await
        .map_err(|error| {
            EngineError::validation("contract_address", format!("abi lookup failed: {error}"))
        })?;

    let (source, fragments) = match fetched {
        Some(fragments) => (CatalogSource::Registered, fragments),
        None if use_fallback_abi => (CatalogSource::Fallback, fallback_erc721_fragments()),
        None => {
            return Err(EngineError::validation(
                "contract_address",
                format!("no ABI registered for {contract_address} on chain {chain_id}"),
            ))
        }
    };

    let build = catalog_from_fragments(&fragments);
    engine.bind_catalog(&contract_address, chain_id, build.catalog.clone())?;
    Ok(CatalogView {
        contract_address,
        chain_id,
        source,
        catalog: build.catalog,
        diagnostics: build.diagnostics,
    })
}

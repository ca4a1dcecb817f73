use std::path::Path;
use std::time::Duration;

use candid::{decode_one, encode_args, CandidType, Principal};
use pocket_ic::PocketIc;
use serde::{Deserialize, Serialize};

const WASM_PATH: &str = "target/wasm32-unknown-unknown/release/contract_invoker.wasm";
const CONTRACT: &str = "0x1111111111111111111111111111111111111111";
const CLAIM_ABI: &str = r#"["function claim(uint256 tokenId)", "function owner() view returns (address)"]"#;

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct InitArgs {
    ecdsa_key_name: String,
    evm_rpc_url: Option<String>,
    default_chain_id: Option<u64>,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct InvocationRequest {
    contract_address: String,
    chain_id: u64,
    function_signature: String,
    raw_arguments: Vec<String>,
    native_amount: String,
    priority_weight: u8,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
enum EngineError {
    Validation { parameter: String, reason: String },
    InsufficientFunds {
        parameter: String,
        requested: String,
        available: String,
    },
    Broadcast { cause: String },
    Confirmation { cause: String },
    Scheduling { reason: String },
}

#[derive(CandidType, Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
enum CatalogSource {
    Registered,
    Fallback,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct ObservedFunction {
    signature: String,
    primary: bool,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct ObservedCatalog {
    read_functions: Vec<ObservedFunction>,
    write_functions: Vec<ObservedFunction>,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct ObservedCatalogView {
    contract_address: String,
    chain_id: u64,
    source: CatalogSource,
    catalog: ObservedCatalog,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct ObservedSchedule {
    id: String,
    execute_at_ms: u64,
    remaining_ms: u64,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
enum TransactionStatus {
    Scheduled,
    Cancelled,
    Constructed,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(CandidType, Clone, Debug, Deserialize, Serialize)]
struct ObservedRecord {
    id: String,
    function_signature: String,
    status: TransactionStatus,
    network_hash: Option<String>,
    error_detail: Option<String>,
}

fn assert_wasm_artifact_present() -> Vec<u8> {
    if !Path::new(WASM_PATH).exists() {
        panic!("build artifact not found at {WASM_PATH}; build the canister before PocketIC tests");
    }
    std::fs::read(WASM_PATH).unwrap_or_else(|error| {
        panic!("cannot read PocketIC test artifact {WASM_PATH}: {error}");
    })
}

fn init_payload() -> Vec<u8> {
    encode_args((InitArgs {
        ecdsa_key_name: "dfx_test_key".to_string(),
        evm_rpc_url: Some("https://rpc.example.com".to_string()),
        default_chain_id: Some(1),
    },))
    .unwrap_or_else(|error| panic!("failed to encode init args: {error}"))
}

fn with_invoker_canister() -> (PocketIc, Principal) {
    let pic = PocketIc::new();
    let canister_id = pic.create_canister();
    let wasm = assert_wasm_artifact_present();

    pic.add_cycles(canister_id, 2_000_000_000_000);
    pic.install_canister(canister_id, wasm, init_payload(), None);

    (pic, canister_id)
}

fn call_update<T>(pic: &PocketIc, canister_id: Principal, method: &str, payload: Vec<u8>) -> T
where
    T: for<'de> Deserialize<'de> + CandidType,
{
    let response = pic
        .update_call(canister_id, Principal::anonymous(), method, payload)
        .unwrap_or_else(|error| panic!("update call {method} failed: {error:?}"));
    decode_one(&response)
        .unwrap_or_else(|error| panic!("failed decoding {method} response: {error:?}"))
}

fn call_query<T>(pic: &PocketIc, canister_id: Principal, method: &str, payload: Vec<u8>) -> T
where
    T: for<'de> Deserialize<'de> + CandidType,
{
    let response = pic
        .query_call(canister_id, Principal::anonymous(), method, payload)
        .unwrap_or_else(|error| panic!("query call {method} failed: {error:?}"));
    decode_one(&response)
        .unwrap_or_else(|error| panic!("failed decoding {method} response: {error:?}"))
}

fn register_claim_abi(pic: &PocketIc, canister_id: Principal) -> ObservedCatalogView {
    let payload = encode_args((CONTRACT.to_string(), 1u64, CLAIM_ABI.to_string()))
        .unwrap_or_else(|error| panic!("failed to encode register_contract_abi args: {error}"));
    let result: Result<ObservedCatalogView, EngineError> =
        call_update(pic, canister_id, "register_contract_abi", payload);
    result.unwrap_or_else(|error| panic!("register_contract_abi failed: {error:?}"))
}

fn claim_request(token_id: &str) -> InvocationRequest {
    InvocationRequest {
        contract_address: CONTRACT.to_string(),
        chain_id: 1,
        function_signature: "claim(uint256)".to_string(),
        raw_arguments: vec![token_id.to_string()],
        native_amount: String::new(),
        priority_weight: 50,
    }
}

fn now_ms(pic: &PocketIc) -> u64 {
    pic.get_time().as_nanos_since_unix_epoch() / 1_000_000
}

fn schedule(
    pic: &PocketIc,
    canister_id: Principal,
    request: InvocationRequest,
    execute_at_ms: u64,
) -> Result<ObservedSchedule, EngineError> {
    let payload = encode_args((request, execute_at_ms))
        .unwrap_or_else(|error| panic!("failed to encode schedule_invocation args: {error}"));
    call_update(pic, canister_id, "schedule_invocation", payload)
}

fn list_transactions(pic: &PocketIc, canister_id: Principal) -> Vec<ObservedRecord> {
    let payload = encode_args((50u32,))
        .unwrap_or_else(|error| panic!("failed to encode list_transactions args: {error}"));
    call_query(pic, canister_id, "list_transactions", payload)
}

fn list_schedules(pic: &PocketIc, canister_id: Principal) -> Vec<ObservedSchedule> {
    call_query(
        pic,
        canister_id,
        "list_scheduled_invocations",
        encode_args(()).expect("failed to encode empty args"),
    )
}

#[test]
#[ignore = "requires the built canister wasm and a PocketIC server"]
fn fallback_catalog_lists_mint_variants_first() {
    let (pic, canister_id) = with_invoker_canister();
    let payload = encode_args((CONTRACT.to_string(), 1u64, true))
        .unwrap_or_else(|error| panic!("failed to encode load_contract args: {error}"));
    let result: Result<ObservedCatalogView, EngineError> =
        call_update(&pic, canister_id, "load_contract", payload);
    let view = result.unwrap_or_else(|error| panic!("load_contract failed: {error:?}"));

    assert_eq!(view.source, CatalogSource::Fallback);
    assert_eq!(view.chain_id, 1);
    assert!(view
        .catalog
        .write_functions
        .iter()
        .any(|function| function.signature == "mint(uint256)" && function.primary));
    assert!(view
        .catalog
        .read_functions
        .iter()
        .any(|function| function.signature == "totalSupply()"));
}

#[test]
#[ignore = "requires the built canister wasm and a PocketIC server"]
fn invalid_arguments_never_create_records() {
    let (pic, canister_id) = with_invoker_canister();
    register_claim_abi(&pic, canister_id);

    let payload = encode_args((claim_request("-1"),))
        .unwrap_or_else(|error| panic!("failed to encode invoke_function args: {error}"));
    let result: Result<ObservedRecord, EngineError> =
        call_update(&pic, canister_id, "invoke_function", payload);
    match result {
        Err(EngineError::Validation { parameter, .. }) => assert_eq!(parameter, "tokenId"),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert!(list_transactions(&pic, canister_id).is_empty());
}

#[test]
#[ignore = "requires the built canister wasm and a PocketIC server"]
fn cancelled_schedule_never_broadcasts() {
    let (pic, canister_id) = with_invoker_canister();
    register_claim_abi(&pic, canister_id);

    let past = schedule(&pic, canister_id, claim_request("7"), now_ms(&pic) - 1_000);
    assert!(matches!(past, Err(EngineError::Scheduling { .. })));

    let scheduled = schedule(&pic, canister_id, claim_request("7"), now_ms(&pic) + 30_000)
        .unwrap_or_else(|error| panic!("schedule_invocation failed: {error:?}"));
    assert_eq!(list_schedules(&pic, canister_id).len(), 1);

    let payload = encode_args((scheduled.id.clone(),))
        .unwrap_or_else(|error| panic!("failed to encode cancel args: {error}"));
    let cancelled: bool = call_update(&pic, canister_id, "cancel_scheduled_invocation", payload);
    assert!(cancelled);

    pic.advance_time(Duration::from_secs(60));
    pic.tick();

    assert!(list_schedules(&pic, canister_id).is_empty());
    let records = list_transactions(&pic, canister_id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, scheduled.id);
    assert_eq!(records[0].status, TransactionStatus::Cancelled);
    assert_eq!(records[0].network_hash, None);
}

#[test]
#[ignore = "requires the built canister wasm and a PocketIC server"]
fn upgrade_cancels_pending_schedules_with_notice() {
    let (pic, canister_id) = with_invoker_canister();
    register_claim_abi(&pic, canister_id);

    let scheduled = schedule(&pic, canister_id, claim_request("9"), now_ms(&pic) + 600_000)
        .unwrap_or_else(|error| panic!("schedule_invocation failed: {error:?}"));

    let wasm = assert_wasm_artifact_present();
    pic.upgrade_canister(canister_id, wasm, init_payload(), None)
        .unwrap_or_else(|error| panic!("upgrade failed: {error:?}"));

    let notice: String = call_query(
        &pic,
        canister_id,
        "scheduler_persistence_notice",
        encode_args(()).expect("failed to encode empty args"),
    );
    assert!(list_schedules(&pic, canister_id).is_empty());
    let records = list_transactions(&pic, canister_id);
    let record = records
        .iter()
        .find(|record| record.id == scheduled.id)
        .expect("scheduled record should survive the upgrade");
    assert_eq!(record.status, TransactionStatus::Cancelled);
    assert_eq!(record.error_detail.as_deref(), Some(notice.as_str()));

    let catalog: Option<ObservedCatalog> = call_query(
        &pic,
        canister_id,
        "get_function_catalog",
        encode_args((CONTRACT.to_string(), 1u64)).expect("failed to encode catalog args"),
    );
    assert!(catalog.is_some(), "registered ABIs are rebound after upgrade");
}

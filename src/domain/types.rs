use alloy_primitives::{Address, I256, U256};
use candid::CandidType;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── ABI shapes ───────────────────────────────────────────────────────────────

/// One ABI entry exactly as it arrived from the ABI source.
#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AbiFragment {
    StringForm(String),
    StructuredForm(StructuredFragment),
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StructuredFragment {
    pub entry_type: Option<String>,
    pub name: Option<String>,
    pub inputs: Option<Vec<StructuredParam>>,
    pub outputs: Vec<StructuredParam>,
    pub state_mutability: Option<String>,
    pub constant: Option<bool>,
    pub payable: Option<bool>,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StructuredParam {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub components: Vec<StructuredParam>,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AbiParam {
    pub name: Option<String>,
    /// Canonical Solidity type; tuples keep `tuple` plus any array suffix.
    pub kind: String,
    pub components: Vec<AbiParam>,
}

impl AbiParam {
    #[cfg(test)]
    pub fn new(name: Option<&str>, kind: &str) -> Self {
        Self {
            name: name.map(str::to_string),
            kind: kind.to_string(),
            components: Vec::new(),
        }
    }

    /// Type string as it appears inside a signature, tuples expanded.
    pub fn canonical_type(&self) -> String {
        match self.kind.strip_prefix("tuple") {
            Some(suffix) => {
                let inner = self
                    .components
                    .iter()
                    .map(AbiParam::canonical_type)
                    .collect::<Vec<_>>();
                format!("({}){suffix}", inner.join(","))
            }
            None => self.kind.clone(),
        }
    }

    pub fn display_name(&self, position: usize) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Parameter #{}", position + 1),
        }
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMutability {
    Pure,
    View,
    NonPayable,
    Payable,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NormalizedFragment {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiParam>,
    pub state_mutability: StateMutability,
    /// Position of the originating fragment in the fetched ABI.
    pub source_index: u32,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CatalogBuildError {
    pub fragment_index: u32,
    pub reason: String,
}

impl fmt::Display for CatalogBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fragment #{}: {}", self.fragment_index, self.reason)
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

#[derive(CandidType, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionMutability {
    Read,
    Write,
    Payable,
}

impl FunctionMutability {
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub parameters: Vec<AbiParam>,
    pub outputs: Vec<AbiParam>,
    pub mutability: FunctionMutability,
    pub signature: String,
    pub selector: String,
    pub primary: bool,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionCatalog {
    pub read_functions: Vec<FunctionDescriptor>,
    pub write_functions: Vec<FunctionDescriptor>,
}

impl FunctionCatalog {
    pub fn get(&self, signature: &str) -> Option<&FunctionDescriptor> {
        self.read_functions
            .iter()
            .chain(self.write_functions.iter())
            .find(|descriptor| descriptor.signature == signature)
    }

    #[cfg(test)]
    pub fn contains(&self, signature: &str) -> bool {
        self.get(signature).is_some()
    }

    pub fn len(&self) -> usize {
        self.read_functions.len() + self.write_functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write functions split into (primary, others), ABI order kept in each.
    #[cfg(test)]
    pub fn write_groups(&self) -> (Vec<&FunctionDescriptor>, Vec<&FunctionDescriptor>) {
        self.write_functions
            .iter()
            .partition(|descriptor| descriptor.primary)
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogBuild {
    pub catalog: FunctionCatalog,
    pub diagnostics: Vec<CatalogBuildError>,
}

// ── Invocation ───────────────────────────────────────────────────────────────

pub const DEFAULT_PRIORITY_WEIGHT: u8 = 50;

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InvocationRequest {
    pub contract_address: String,
    pub chain_id: u64,
    pub function_signature: String,
    pub raw_arguments: Vec<String>,
    pub native_amount: String,
    pub priority_weight: u8,
}

/// A raw argument after coercion against its declared type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypedValue {
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
    PassThrough(String),
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}", address.to_checksum(None)),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::PassThrough(raw) => f.write_str(raw),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoercedArguments {
    pub typed_arguments: Vec<TypedValue>,
    pub base_unit_amount: U256,
}

/// A validated request ready for submission, now or later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedInvocation {
    pub request: InvocationRequest,
    pub descriptor: FunctionDescriptor,
    pub coerced: CoercedArguments,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeParameters {
    pub priority_weight: u8,
}

impl Default for FeeParameters {
    fn default() -> Self {
        Self {
            priority_weight: DEFAULT_PRIORITY_WEIGHT,
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Scheduled,
    Cancelled,
    Constructed,
    Submitted,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Confirmed | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Fire,
    Cancel { reason: Option<String> },
    Broadcast { hash: String },
    BroadcastRejected { cause: String },
    ReceiptSucceeded,
    ReceiptFailed { cause: String },
}

impl LifecycleEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Cancel { .. } => "cancel",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastRejected { .. } => "broadcast_rejected",
            Self::ReceiptSucceeded => "receipt_succeeded",
            Self::ReceiptFailed { .. } => "receipt_failed",
        }
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransitionError {
    pub from: TransactionStatus,
    pub event: String,
    pub reason: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} --{}--> rejected: {}", self.from, self.event, self.reason)
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: String,
    pub function_signature: String,
    pub contract_address: String,
    pub chain_id: u64,
    pub native_amount: String,
    pub status: TransactionStatus,
    pub network_hash: Option<String>,
    pub error_detail: Option<String>,
    pub created_at_ms: u64,
    pub submitted_at_ms: Option<u64>,
    pub resolved_at_ms: Option<u64>,
}

// ── Collaborator payloads ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub contract_address: String,
    pub chain_id: u64,
    pub descriptor: FunctionDescriptor,
    pub typed_arguments: Vec<TypedValue>,
    pub base_unit_amount: U256,
    pub fees: FeeParameters,
}

impl From<&PreparedInvocation> for SubmissionRequest {
    fn from(prepared: &PreparedInvocation) -> Self {
        Self {
            contract_address: prepared.request.contract_address.clone(),
            chain_id: prepared.request.chain_id,
            descriptor: prepared.descriptor.clone(),
            typed_arguments: prepared.coerced.typed_arguments.clone(),
            base_unit_amount: prepared.coerced.base_unit_amount,
            fees: FeeParameters {
                priority_weight: prepared.request.priority_weight,
            },
        }
    }
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: String,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success,
    Failure,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub outcome: ReceiptOutcome,
    pub detail: String,
}

// ── Scheduler views ──────────────────────────────────────────────────────────

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScheduledInvocationView {
    pub id: String,
    pub request: InvocationRequest,
    pub execute_at_ms: u64,
    pub remaining_ms: u64,
}

// ── Notifications ────────────────────────────────────────────────────────────

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    RecordUpdated(TransactionRecord),
    InvocationScheduled {
        id: String,
        function_signature: String,
        execute_at_ms: u64,
    },
    ScheduleCancelled {
        id: String,
    },
    ScheduleFired {
        id: String,
    },
}

impl EngineEvent {
    pub fn message(&self) -> String {
        match self {
            Self::RecordUpdated(record) => match record.status {
                TransactionStatus::Scheduled => {
                    format!("{} scheduled", record.function_signature)
                }
                TransactionStatus::Cancelled => match record.error_detail.as_deref() {
                    Some(detail) => {
                        format!("{} cancelled: {detail}", record.function_signature)
                    }
                    None => format!("{} cancelled", record.function_signature),
                },
                TransactionStatus::Constructed => {
                    format!("{} is being submitted", record.function_signature)
                }
                TransactionStatus::Submitted => format!(
                    "{} submitted as {}",
                    record.function_signature,
                    record.network_hash.as_deref().unwrap_or("unknown hash")
                ),
                TransactionStatus::Confirmed => {
                    format!("{} confirmed", record.function_signature)
                }
                TransactionStatus::Failed => format!(
                    "{} failed: {}",
                    record.function_signature,
                    record.error_detail.as_deref().unwrap_or("unknown error")
                ),
            },
            Self::InvocationScheduled {
                id,
                function_signature,
                execute_at_ms,
            } => format!("{function_signature} scheduled as {id} for {execute_at_ms}"),
            Self::ScheduleCancelled { id } => format!("scheduled invocation {id} cancelled"),
            Self::ScheduleFired { id } => format!("scheduled invocation {id} fired"),
        }
    }
}

// ── Chains ───────────────────────────────────────────────────────────────────

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub name: String,
    pub native_symbol: String,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CatalogSource {
    Registered,
    Fallback,
}

/// What `load_contract` hands back: the bound catalog plus any fragments
/// that were dropped while building it.
#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CatalogView {
    pub contract_address: String,
    pub chain_id: u64,
    pub source: CatalogSource,
    pub catalog: FunctionCatalog,
    pub diagnostics: Vec<CatalogBuildError>,
}

// ── Configuration ────────────────────────────────────────────────────────────

pub const DEFAULT_EVM_RPC_MAX_RESPONSE_BYTES: u64 = 65_536;

#[derive(CandidType, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub ecdsa_key_name: String,
    pub evm_rpc_url: String,
    #[serde(default)]
    pub evm_rpc_fallback_url: Option<String>,
    pub default_chain_id: u64,
    pub receipt_poll_interval_secs: u64,
    pub evm_rpc_max_response_bytes: u64,
    #[serde(default)]
    pub evm_address: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ecdsa_key_name: String::new(),
            evm_rpc_url: String::new(),
            evm_rpc_fallback_url: None,
            default_chain_id: 1,
            receipt_poll_interval_secs: crate::timing::DEFAULT_RECEIPT_POLL_INTERVAL_SECS,
            evm_rpc_max_response_bytes: DEFAULT_EVM_RPC_MAX_RESPONSE_BYTES,
            evm_address: None,
        }
    }
}

use crate::abi::calldata::encode_call;
use crate::domain::types::{
    EngineConfig, PendingTransaction, Receipt, ReceiptOutcome, SubmissionRequest,
};
use crate::ports::{SignerPort, TransactionBroadcaster};
use crate::storage::stable;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{length_of_length, BufMut, Encodable, Header};
use async_trait::async_trait;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use serde_json::{json, Value};
#[cfg(not(target_arch = "wasm32"))]
use std::io::Read;
use std::rc::Rc;
use std::str::FromStr;

#[cfg(target_arch = "wasm32")]
use candid::Nat;
#[cfg(target_arch = "wasm32")]
use ic_cdk::management_canister::{http_request, HttpHeader, HttpMethod, HttpRequestArgs};
#[cfg(target_arch = "wasm32")]
use sha3::{Digest, Keccak256};

const MAX_EVM_RPC_RESPONSE_BYTES: u64 = 2 * 1024 * 1024;
const CONTROL_PLANE_MAX_RESPONSE_BYTES: u64 = 4 * 1024;
const EMPTY_ACCESS_LIST_RLP_LEN: usize = 1;
const FALLBACK_GAS_LIMIT: u64 = 300_000;
const ONE_GWEI: u64 = 1_000_000_000;
const MIN_PRIORITY_WEIGHT: u8 = 1;
const MAX_PRIORITY_WEIGHT: u8 = 200;
const BASELINE_PRIORITY_WEIGHT: u64 = 50;
#[cfg(not(target_arch = "wasm32"))]
const HOST_EVM_RPC_MODE_ENV: &str = "CONTRACT_INVOKER_EVM_RPC_HOST_MODE";

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum RpcLogPriority {
    #[log_level(capacity = 1000, name = "RPC_INFO")]
    Info,
    #[log_level(capacity = 500, name = "RPC_ERROR")]
    Error,
}

impl GetLogFilter for RpcLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

#[derive(Clone, Debug)]
pub struct HttpEvmRpcClient {
    rpc_url: String,
    fallback_rpc_url: Option<String>,
    max_response_bytes: u64,
}

impl HttpEvmRpcClient {
    pub fn from_config(config: &EngineConfig) -> Result<Self, String> {
        let rpc_url = config.evm_rpc_url.trim();
        if rpc_url.is_empty() {
            return Err("evm rpc url is not configured".to_string());
        }
        Ok(Self {
            rpc_url: rpc_url.to_string(),
            fallback_rpc_url: config.evm_rpc_fallback_url.clone(),
            max_response_bytes: clamp_response_bytes(config.evm_rpc_max_response_bytes),
        })
    }

    fn control_plane_max_response_bytes(&self) -> u64 {
        CONTROL_PLANE_MAX_RESPONSE_BYTES.min(self.max_response_bytes)
    }

    pub async fn eth_get_balance(&self, address: &str) -> Result<U256, String> {
        let response = self
            .rpc_call(
                "eth_getBalance",
                json!([address, "latest"]),
                self.control_plane_max_response_bytes(),
            )
            .await
            .map_err(|error| format!("eth_getBalance failed: {error}"))?;
        let raw = result_str(&response, "eth_getBalance")?;
        parse_hex_u256(raw, "eth_getBalance result")
    }

    pub async fn eth_get_transaction_count(&self, address: &str) -> Result<u64, String> {
        let response = self
            .rpc_call(
                "eth_getTransactionCount",
                json!([address, "pending"]),
                self.control_plane_max_response_bytes(),
            )
            .await
            .map_err(|error| format!("eth_getTransactionCount failed: {error}"))?;
        parse_hex_u64(
            result_str(&response, "eth_getTransactionCount")?,
            "eth_getTransactionCount",
        )
    }

    pub async fn eth_gas_price(&self) -> Result<U256, String> {
        let response = self
            .rpc_call(
                "eth_gasPrice",
                json!([]),
                self.control_plane_max_response_bytes(),
            )
            .await
            .map_err(|error| format!("eth_gasPrice failed: {error}"))?;
        parse_hex_u256(result_str(&response, "eth_gasPrice")?, "eth_gasPrice")
    }

    pub async fn eth_estimate_gas(
        &self,
        from: &str,
        to: &str,
        value_wei: U256,
        data_hex: &str,
    ) -> Result<u64, String> {
        let response = self
            .rpc_call(
                "eth_estimateGas",
                json!([{
                    "from": from,
                    "to": to,
                    "value": format!("0x{value_wei:x}"),
                    "data": data_hex
                }]),
                self.control_plane_max_response_bytes(),
            )
            .await
            .map_err(|error| format!("eth_estimateGas failed: {error}"))?;
        parse_hex_u64(result_str(&response, "eth_estimateGas")?, "eth_estimateGas")
    }

    pub async fn eth_send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String, String> {
        let payload = format!("0x{}", hex::encode(raw_tx));
        let response = self
            .rpc_call(
                "eth_sendRawTransaction",
                json!([payload]),
                self.control_plane_max_response_bytes(),
            )
            .await
            .map_err(|error| format!("eth_sendRawTransaction failed: {error}"))?;
        normalize_hex_blob(
            result_str(&response, "eth_sendRawTransaction")?,
            "eth_sendRawTransaction result",
        )
    }

    /// `Ok(None)` while the transaction is still pending.
    pub async fn eth_get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>, String> {
        let response = self
            .rpc_call(
                "eth_getTransactionReceipt",
                json!([tx_hash]),
                self.max_response_bytes,
            )
            .await
            .map_err(|error| format!("eth_getTransactionReceipt failed: {error}"))?;
        match response.get("result") {
            None | Some(Value::Null) => Ok(None),
            Some(receipt @ Value::Object(_)) => Ok(Some(receipt.clone())),
            Some(other) => Err(format!(
                "eth_getTransactionReceipt returned unexpected result {other}"
            )),
        }
    }

    async fn rpc_call(
        &self,
        method: &str,
        params: Value,
        max_response_bytes: u64,
    ) -> Result<Value, String> {
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .map_err(|error| format!("failed to serialize {method} request: {error}"))?;

        let raw = self.http_post(&body, max_response_bytes).await?;
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|error| format!("failed to parse {method} response JSON: {error}"))?;
        if let Some(error) = value.get("error") {
            return Err(format!("rpc returned error for {method}: {error}"));
        }
        Ok(value)
    }

    async fn http_post(&self, body: &[u8], max_response_bytes: u64) -> Result<Vec<u8>, String> {
        let normalized_max = clamp_response_bytes(max_response_bytes);
        match self
            .try_http_post(&self.rpc_url, body, normalized_max)
            .await
        {
            Ok(body) => Ok(body),
            Err(primary_error) => match self.fallback_rpc_url.as_deref() {
                Some(fallback_url) => {
                    log!(
                        RpcLogPriority::Error,
                        "rpc_primary_failed error={} retrying=fallback",
                        primary_error
                    );
                    self.try_http_post(fallback_url, body, normalized_max)
                        .await
                        .map_err(|fallback_error| {
                            format!(
                                "primary rpc failed: {primary_error}; fallback rpc failed: {fallback_error}"
                            )
                        })
                }
                None => Err(primary_error),
            },
        }
    }

    #[cfg(target_arch = "wasm32")]
    async fn try_http_post(
        &self,
        url: &str,
        body: &[u8],
        max_response_bytes: u64,
    ) -> Result<Vec<u8>, String> {
        let request = HttpRequestArgs {
            url: url.to_string(),
            max_response_bytes: Some(max_response_bytes),
            method: HttpMethod::POST,
            headers: vec![HttpHeader {
                name: "content-type".to_string(),
                value: "application/json".to_string(),
            }],
            body: Some(body.to_vec()),
            transform: None,
            is_replicated: Some(false),
        };

        let response = http_request(&request)
            .await
            .map_err(|error| format!("evm rpc outcall failed: {error}"))?;
        let status = nat_to_u16(&response.status)?;
        if !(200..300).contains(&status) {
            return Err(format!("evm rpc returned status {status}"));
        }
        Ok(response.body)
    }

    #[cfg(not(target_arch = "wasm32"))]
    async fn try_http_post(
        &self,
        url: &str,
        body: &[u8],
        max_response_bytes: u64,
    ) -> Result<Vec<u8>, String> {
        if !host_rpc_real_mode_enabled() {
            return host_rpc_stub_response(body);
        }

        let response = ureq::post(url)
            .set("content-type", "application/json")
            .send_bytes(body)
            .map_err(|error| match error {
                ureq::Error::Status(status, _) => format!("evm rpc returned status {status}"),
                ureq::Error::Transport(transport) => {
                    format!("evm rpc host transport failed: {transport}")
                }
            })?;

        let mut raw = Vec::new();
        response
            .into_reader()
            .take(max_response_bytes.saturating_add(1))
            .read_to_end(&mut raw)
            .map_err(|error| format!("failed to read host rpc response body: {error}"))?;
        if u64::try_from(raw.len()).unwrap_or(u64::MAX) > max_response_bytes {
            return Err(format!(
                "host rpc response exceeded max_response_bytes={max_response_bytes}"
            ));
        }
        Ok(raw)
    }
}

/// Signs and broadcasts prepared calls as EIP-1559 transactions from the
/// canister's threshold-ECDSA account, then polls for their receipts.
///
/// Configuration is re-read from stable memory on every call so controller
/// updates take effect without rebuilding the engine.
#[derive(Clone)]
pub struct EvmRpcBroadcaster {
    signer: Rc<dyn SignerPort>,
}

impl EvmRpcBroadcaster {
    pub fn new(signer: Rc<dyn SignerPort>) -> Self {
        Self { signer }
    }

    /// Native balance of the canister's EVM account on the configured chain.
    pub async fn sender_balance(&self) -> Result<U256, String> {
        let config = stable::engine_config();
        let from_address = sender_address(&config)?;
        HttpEvmRpcClient::from_config(&config)?
            .eth_get_balance(&from_address)
            .await
    }
}

#[async_trait(?Send)]
impl TransactionBroadcaster for EvmRpcBroadcaster {
    async fn submit(&self, request: &SubmissionRequest) -> Result<PendingTransaction, String> {
        let config = stable::engine_config();
        ensure_served_chain(&config, request.chain_id)?;
        let from_address = sender_address(&config)?;
        let rpc = HttpEvmRpcClient::from_config(&config)?;

        let to = Address::from_str(request.contract_address.trim())
            .map_err(|error| format!("invalid contract address: {error}"))?;
        let data = encode_call(&request.descriptor, &request.typed_arguments)
            .map_err(|error| format!("failed to encode calldata: {error}"))?;
        let data_hex = format!("0x{}", hex::encode(&data));
        let value = request.base_unit_amount;

        let nonce = rpc.eth_get_transaction_count(&from_address).await?;
        let gas_limit = match rpc
            .eth_estimate_gas(&from_address, &request.contract_address, value, &data_hex)
            .await
        {
            Ok(estimate) => estimate,
            Err(error) => {
                log!(
                    RpcLogPriority::Error,
                    "gas_estimate_failed signature={} error={} fallback={}",
                    request.descriptor.signature,
                    error,
                    FALLBACK_GAS_LIMIT
                );
                FALLBACK_GAS_LIMIT
            }
        };
        let base_fee = rpc
            .eth_gas_price()
            .await
            .unwrap_or_else(|_| U256::from(ONE_GWEI));
        let max_priority_fee_per_gas = priority_fee_for_weight(request.fees.priority_weight);
        let max_fee_per_gas = base_fee.saturating_add(max_priority_fee_per_gas);

        let tx = Eip1559UnsignedTx {
            chain_id: U256::from(request.chain_id),
            nonce: U256::from(nonce),
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit: U256::from(gas_limit),
            to,
            value,
            data: Bytes::from(data),
        };

        let unsigned = encode_eip1559_unsigned(&tx);
        let tx_hash = keccak256(&unsigned);
        let message_hash = format!("0x{}", hex::encode(tx_hash.as_slice()));
        let signature = parse_compact_signature(&self.signer.sign_message(&message_hash).await?)?;
        let y_parity = recover_y_parity(&tx_hash, &signature, &from_address)?;
        let r = U256::from_be_slice(&signature[..32]);
        let s = U256::from_be_slice(&signature[32..]);
        let signed = encode_eip1559_signed(&tx, y_parity, r, s);

        let hash = rpc.eth_send_raw_transaction(&signed).await?;
        log!(
            RpcLogPriority::Info,
            "transaction_broadcast signature={} chain_id={} nonce={} hash={}",
            request.descriptor.signature,
            request.chain_id,
            nonce,
            hash
        );
        Ok(PendingTransaction { hash })
    }

    async fn await_receipt(&self, pending: &PendingTransaction) -> Result<Receipt, String> {
        loop {
            let config = stable::engine_config();
            let rpc = HttpEvmRpcClient::from_config(&config)?;
            match rpc.eth_get_transaction_receipt(&pending.hash).await {
                Ok(Some(receipt)) => {
                    let receipt = receipt_from_rpc(&receipt)?;
                    log!(
                        RpcLogPriority::Info,
                        "receipt_observed hash={} outcome={:?}",
                        pending.hash,
                        receipt.outcome
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(error) => log!(
                    RpcLogPriority::Error,
                    "receipt_poll_failed hash={} error={}",
                    pending.hash,
                    error
                ),
            }
            pause(config.receipt_poll_interval_secs).await;
        }
    }

    async fn available_balance(&self, chain_id: u64) -> Option<U256> {
        if chain_id != stable::engine_config().default_chain_id {
            return None;
        }
        match self.sender_balance().await {
            Ok(balance) => Some(balance),
            Err(error) => {
                log!(
                    RpcLogPriority::Error,
                    "balance_lookup_failed chain_id={} error={}",
                    chain_id,
                    error
                );
                None
            }
        }
    }
}

fn ensure_served_chain(config: &EngineConfig, chain_id: u64) -> Result<(), String> {
    if chain_id != config.default_chain_id {
        return Err(format!(
            "chain {chain_id} is not served by the configured rpc endpoint (chain {})",
            config.default_chain_id
        ));
    }
    Ok(())
}

fn sender_address(config: &EngineConfig) -> Result<String, String> {
    config
        .evm_address
        .clone()
        .ok_or_else(|| "evm address not derived yet".to_string())
}

/// `1 gwei * weight / 50`, weight clamped to `1..=200`.
fn priority_fee_for_weight(weight: u8) -> U256 {
    let weight = weight.clamp(MIN_PRIORITY_WEIGHT, MAX_PRIORITY_WEIGHT);
    U256::from(ONE_GWEI) * U256::from(weight) / U256::from(BASELINE_PRIORITY_WEIGHT)
}

fn receipt_from_rpc(receipt: &Value) -> Result<Receipt, String> {
    let status = receipt
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| "receipt status was missing".to_string())?;
    let block = receipt
        .get("blockNumber")
        .and_then(Value::as_str)
        .and_then(|raw| parse_hex_u64(raw, "blockNumber").ok());
    let outcome = match parse_hex_u64(status, "receipt status")? {
        1 => ReceiptOutcome::Success,
        _ => ReceiptOutcome::Failure,
    };
    let detail = match (outcome, block) {
        (ReceiptOutcome::Success, Some(block)) => format!("included in block {block}"),
        (ReceiptOutcome::Success, None) => "included".to_string(),
        (ReceiptOutcome::Failure, Some(block)) => format!("status {status} in block {block}"),
        (ReceiptOutcome::Failure, None) => format!("status {status}"),
    };
    Ok(Receipt { outcome, detail })
}

#[cfg(target_arch = "wasm32")]
async fn pause(interval_secs: u64) {
    let (sender, receiver) = futures::channel::oneshot::channel::<()>();
    ic_cdk_timers::set_timer(std::time::Duration::from_secs(interval_secs), async move {
        let _ = sender.send(());
    });
    let _ = receiver.await;
}

#[cfg(not(target_arch = "wasm32"))]
async fn pause(_interval_secs: u64) {
    futures::pending!();
}

fn result_str<'a>(response: &'a Value, method: &str) -> Result<&'a str, String> {
    response
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{method} result was missing"))
}

#[cfg(target_arch = "wasm32")]
fn nat_to_u16(status: &Nat) -> Result<u16, String> {
    status
        .to_string()
        .parse::<u16>()
        .map_err(|error| format!("invalid HTTP status {status}: {error}"))
}

fn clamp_response_bytes(max_response_bytes: u64) -> u64 {
    max_response_bytes.clamp(256, MAX_EVM_RPC_RESPONSE_BYTES)
}

#[cfg(not(target_arch = "wasm32"))]
fn host_rpc_real_mode_enabled() -> bool {
    std::env::var(HOST_EVM_RPC_MODE_ENV)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "real" | "1" | "true" | "yes")
        })
        .unwrap_or(false)
}

#[cfg(not(target_arch = "wasm32"))]
fn host_rpc_stub_response(body: &[u8]) -> Result<Vec<u8>, String> {
    let request: Value = serde_json::from_slice(body)
        .map_err(|error| format!("host rpc stub could not parse request JSON: {error}"))?;
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| "host rpc stub request is missing method".to_string())?;

    let response = match method {
        "eth_getBalance" => json!({"jsonrpc":"2.0","id":1,"result":"0xde0b6b3a7640000"}),
        "eth_getTransactionCount" => json!({"jsonrpc":"2.0","id":1,"result":"0x0"}),
        "eth_gasPrice" => json!({"jsonrpc":"2.0","id":1,"result":"0x3b9aca00"}),
        "eth_estimateGas" => json!({"jsonrpc":"2.0","id":1,"result":"0x186a0"}),
        "eth_sendRawTransaction" => json!({
            "jsonrpc":"2.0",
            "id":1,
            "result":"0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        }),
        "eth_getTransactionReceipt" => json!({
            "jsonrpc":"2.0",
            "id":1,
            "result": {"status":"0x1","blockNumber":"0x10"}
        }),
        unsupported => {
            return Err(format!(
                "host rpc stub does not support method {unsupported}"
            ));
        }
    };

    serde_json::to_vec(&response)
        .map_err(|error| format!("host rpc stub failed to serialize response: {error}"))
}

fn parse_hex_u64(raw: &str, field: &str) -> Result<u64, String> {
    let value = raw.trim();
    let without_prefix = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    u64::from_str_radix(without_prefix, 16)
        .map_err(|error| format!("failed to parse {field} as hex u64: {error}"))
}

fn normalize_hex_blob(raw: &str, field: &str) -> Result<String, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if without_prefix.len() % 2 != 0 {
        return Err(format!("{field} hex length must be even"));
    }
    if !without_prefix
        .as_bytes()
        .iter()
        .all(|byte| byte.is_ascii_hexdigit())
    {
        return Err(format!("{field} must be valid hex"));
    }
    Ok(trimmed)
}

fn parse_hex_u256(raw: &str, field: &str) -> Result<U256, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if without_prefix.is_empty() {
        return Ok(U256::ZERO);
    }
    if without_prefix.len() > 64 {
        return Err(format!("{field} exceeds 32 bytes"));
    }
    U256::from_str_radix(without_prefix, 16)
        .map_err(|error| format!("failed to parse {field} as hex: {error}"))
}

fn parse_compact_signature(raw: &str) -> Result<[u8; 64], String> {
    let normalized = normalize_hex_blob(raw, "signature")?;
    let without_prefix = normalized.trim_start_matches("0x");
    if without_prefix.len() != 128 {
        return Err("signature must be 64 bytes (r||s)".to_string());
    }
    let mut out = [0u8; 64];
    hex::decode_to_slice(without_prefix, &mut out)
        .map_err(|error| format!("failed to decode signature: {error}"))?;
    Ok(out)
}

#[derive(Clone, Debug)]
struct Eip1559UnsignedTx {
    chain_id: U256,
    nonce: U256,
    max_priority_fee_per_gas: U256,
    max_fee_per_gas: U256,
    gas_limit: U256,
    to: Address,
    value: U256,
    data: Bytes,
}

impl Eip1559UnsignedTx {
    fn fields_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
            + EMPTY_ACCESS_LIST_RLP_LEN
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
        Header {
            list: true,
            payload_length: 0,
        }
        .encode(out);
    }
}

impl Encodable for Eip1559UnsignedTx {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.fields_length(),
        }
        .encode(out);
        self.encode_fields(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.fields_length();
        payload_length + length_of_length(payload_length)
    }
}

struct Eip1559SignedTx<'a> {
    tx: &'a Eip1559UnsignedTx,
    y_parity: u8,
    r: U256,
    s: U256,
}

impl Eip1559SignedTx<'_> {
    fn payload_length(&self) -> usize {
        self.tx.fields_length() + self.y_parity.length() + self.r.length() + self.s.length()
    }
}

impl Encodable for Eip1559SignedTx<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx.encode_fields(out);
        self.y_parity.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

fn with_type_prefix(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(0x02);
    out.extend_from_slice(&payload);
    out
}

fn encode_eip1559_unsigned(tx: &Eip1559UnsignedTx) -> Vec<u8> {
    with_type_prefix(alloy_rlp::encode(tx))
}

fn encode_eip1559_signed(tx: &Eip1559UnsignedTx, y_parity: u8, r: U256, s: U256) -> Vec<u8> {
    with_type_prefix(alloy_rlp::encode(Eip1559SignedTx { tx, y_parity, r, s }))
}

#[cfg(not(target_arch = "wasm32"))]
fn recover_y_parity(
    _tx_hash: &B256,
    _signature_compact: &[u8; 64],
    _expected_address: &str,
) -> Result<u8, String> {
    Ok(0)
}

#[cfg(target_arch = "wasm32")]
fn recover_y_parity(
    tx_hash: &B256,
    signature_compact: &[u8; 64],
    expected_address: &str,
) -> Result<u8, String> {
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let signature = Signature::from_slice(signature_compact)
        .map_err(|error| format!("invalid compact signature bytes: {error}"))?;
    let expected = expected_address.trim().to_ascii_lowercase();

    for candidate in [0u8, 1u8] {
        let Some(recovery_id) = RecoveryId::from_byte(candidate) else {
            continue;
        };
        let Ok(recovered) =
            VerifyingKey::recover_from_prehash(tx_hash.as_slice(), &signature, recovery_id)
        else {
            continue;
        };
        let uncompressed = recovered.to_encoded_point(false);
        let bytes = uncompressed.as_bytes();
        if bytes.len() != 65 || bytes.first().copied() != Some(0x04) {
            continue;
        }
        let digest = Keccak256::digest(&bytes[1..]);
        let address = format!("0x{}", hex::encode(&digest[12..32]));
        if address == expected {
            return Ok(candidate);
        }
    }

    Err("failed to recover EIP-1559 y_parity for transaction signature".to_string())
}

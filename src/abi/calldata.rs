/// Contract call-data encoding.
///
/// Typed arguments from the coercion stage are lowered into JSON values and
/// written with the Solidity head/tail layout: dynamic types (`bytes`,
/// `string`, unsized arrays, tuples holding any of those) reserve one offset
/// word in the head and append their payload to the tail. Array and tuple
/// arguments arrive as JSON text and are parsed here.
use crate::domain::types::{AbiParam, FunctionDescriptor, TypedValue};
use alloy_primitives::{I256, U256};
use serde_json::Value;
use std::str::FromStr;

/// Selector followed by the encoded arguments.
pub fn encode_call(
    descriptor: &FunctionDescriptor,
    arguments: &[TypedValue],
) -> Result<Vec<u8>, String> {
    let selector = hex::decode(descriptor.selector.trim_start_matches("0x"))
        .map_err(|error| format!("invalid selector {}: {error}", descriptor.selector))?;
    if selector.len() != 4 {
        return Err(format!("selector {} must be 4 bytes", descriptor.selector));
    }
    if arguments.len() != descriptor.parameters.len() {
        return Err(format!(
            "argument count mismatch for {}: expected {} got {}",
            descriptor.signature,
            descriptor.parameters.len(),
            arguments.len()
        ));
    }

    let values = descriptor
        .parameters
        .iter()
        .zip(arguments.iter())
        .enumerate()
        .map(|(index, (param, argument))| {
            typed_value_to_json(param, argument, &param.display_name(index))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = selector;
    out.extend_from_slice(&encode_abi_params(&descriptor.parameters, &values)?);
    Ok(out)
}

fn typed_value_to_json(param: &AbiParam, value: &TypedValue, field: &str) -> Result<Value, String> {
    Ok(match value {
        TypedValue::Address(address) => Value::String(format!("0x{}", hex::encode(address.as_slice()))),
        TypedValue::Uint(number) => Value::String(number.to_string()),
        TypedValue::Int(number) => Value::String(number.to_string()),
        TypedValue::Bool(flag) => Value::Bool(*flag),
        TypedValue::PassThrough(raw) => {
            let kind = param.kind.as_str();
            if kind.ends_with(']') || kind.starts_with("tuple") {
                serde_json::from_str(raw.trim())
                    .map_err(|error| format!("{field} must be a JSON array: {error}"))?
            } else if kind == "string" {
                Value::String(raw.clone())
            } else {
                Value::String(raw.trim().to_string())
            }
        }
    })
}

fn is_dynamic_type(param: &AbiParam) -> Result<bool, String> {
    Ok(static_word_size(param)?.is_none())
}

fn element_param(param: &AbiParam, element_kind: String) -> AbiParam {
    AbiParam {
        name: param.name.clone(),
        kind: element_kind,
        components: param.components.clone(),
    }
}

fn split_array_type(kind: &str) -> Option<(String, Option<usize>)> {
    if !kind.ends_with(']') {
        return None;
    }
    let start = kind.rfind('[')?;
    let base = kind[..start].to_string();
    let len_raw = &kind[start + 1..kind.len().saturating_sub(1)];
    if len_raw.is_empty() {
        return Some((base, None));
    }
    len_raw.parse::<usize>().ok().map(|len| (base, Some(len)))
}

fn static_word_size(param: &AbiParam) -> Result<Option<usize>, String> {
    if let Some((element_kind, maybe_len)) = split_array_type(param.kind.trim()) {
        let Some(array_len) = maybe_len else {
            return Ok(None);
        };
        let Some(element_words) = static_word_size(&element_param(param, element_kind))? else {
            return Ok(None);
        };
        return Ok(Some(element_words.saturating_mul(array_len)));
    }

    match param.kind.trim() {
        "string" | "bytes" => Ok(None),
        "tuple" => {
            let mut words = 0usize;
            for component in &param.components {
                let Some(component_words) = static_word_size(component)? else {
                    return Ok(None);
                };
                words = words.saturating_add(component_words);
            }
            Ok(Some(words))
        }
        _ => Ok(Some(1)),
    }
}

fn encode_abi_params(params: &[AbiParam], values: &[Value]) -> Result<Vec<u8>, String> {
    if params.len() != values.len() {
        return Err(format!(
            "abi encode arity mismatch: expected {} values, got {}",
            params.len(),
            values.len()
        ));
    }

    let mut head_size_words = 0usize;
    for param in params {
        match static_word_size(param)? {
            Some(words) => head_size_words = head_size_words.saturating_add(words),
            None => head_size_words = head_size_words.saturating_add(1),
        }
    }

    let head_size_bytes = head_size_words.saturating_mul(32);
    let mut heads: Vec<Vec<u8>> = Vec::with_capacity(params.len());
    let mut tails: Vec<Vec<u8>> = Vec::new();
    let mut tail_size_bytes = 0usize;

    for (index, (param, value)) in params.iter().zip(values.iter()).enumerate() {
        let field = param.display_name(index);
        if is_dynamic_type(param)? {
            let tail = encode_abi_dynamic(param, value, &field)?;
            let offset = head_size_bytes.saturating_add(tail_size_bytes);
            heads.push(encode_u256_word(U256::from(offset)));
            tail_size_bytes = tail_size_bytes.saturating_add(tail.len());
            tails.push(tail);
        } else {
            heads.push(encode_abi_static(param, value, &field)?);
        }
    }

    let mut out = Vec::with_capacity(head_size_bytes.saturating_add(tail_size_bytes));
    for head in heads {
        out.extend_from_slice(&head);
    }
    for tail in tails {
        out.extend_from_slice(&tail);
    }
    Ok(out)
}

fn encode_abi_static(param: &AbiParam, value: &Value, field: &str) -> Result<Vec<u8>, String> {
    if let Some((element_kind, Some(array_len))) = split_array_type(param.kind.trim()) {
        let values = as_json_array(value, field)?;
        if values.len() != array_len {
            return Err(format!(
                "{field} length mismatch: expected {array_len} got {}",
                values.len()
            ));
        }
        let element = element_param(param, element_kind);
        let mut out = Vec::new();
        for (idx, item) in values.iter().enumerate() {
            out.extend_from_slice(&encode_abi_static(&element, item, &format!("{field}[{idx}]"))?);
        }
        return Ok(out);
    }

    let kind = param.kind.trim();
    if kind == "tuple" {
        let values = tuple_values(param, value, field)?;
        let mut out = Vec::new();
        for (idx, (component, component_value)) in
            param.components.iter().zip(values.iter()).enumerate()
        {
            out.extend_from_slice(&encode_abi_static(
                component,
                component_value,
                &format!("{field}.{idx}"),
            )?);
        }
        return Ok(out);
    }

    encode_abi_primitive_word(kind, value, field)
}

fn encode_abi_dynamic(param: &AbiParam, value: &Value, field: &str) -> Result<Vec<u8>, String> {
    if let Some((element_kind, maybe_len)) = split_array_type(param.kind.trim()) {
        let values = as_json_array(value, field)?;
        if let Some(expected_len) = maybe_len {
            if values.len() != expected_len {
                return Err(format!(
                    "{field} length mismatch: expected {expected_len} got {}",
                    values.len()
                ));
            }
        }
        let repeated = vec![element_param(param, element_kind); values.len()];
        let encoded_elements = encode_abi_params(&repeated, values)?;
        let mut out = Vec::new();
        if maybe_len.is_none() {
            out.extend_from_slice(&encode_u256_word(U256::from(values.len())));
        }
        out.extend_from_slice(&encoded_elements);
        return Ok(out);
    }

    match param.kind.trim() {
        "tuple" => {
            let values = tuple_values(param, value, field)?;
            encode_abi_params(&param.components, values)
        }
        "bytes" => {
            let raw = value
                .as_str()
                .ok_or_else(|| format!("{field} must be a 0x-prefixed hex string"))?;
            encode_dynamic_bytes(&decode_hex_blob(raw, field)?)
        }
        "string" => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("{field} must be a string"))?;
            encode_dynamic_bytes(text.as_bytes())
        }
        other => Err(format!("unsupported dynamic abi type: {other}")),
    }
}

fn as_json_array<'a>(value: &'a Value, field: &str) -> Result<&'a [Value], String> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| format!("{field} must be a JSON array"))
}

fn tuple_values<'a>(param: &AbiParam, value: &'a Value, field: &str) -> Result<&'a [Value], String> {
    let values = as_json_array(value, field)?;
    if values.len() != param.components.len() {
        return Err(format!(
            "{field} tuple arity mismatch: expected {} got {}",
            param.components.len(),
            values.len()
        ));
    }
    Ok(values)
}

fn encode_dynamic_bytes(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    out.extend_from_slice(&encode_u256_word(U256::from(bytes.len())));
    out.extend_from_slice(bytes);
    let padding = (32usize.saturating_sub(bytes.len() % 32)) % 32;
    out.extend(std::iter::repeat(0u8).take(padding));
    Ok(out)
}

fn decode_hex_blob(raw: &str, field: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let digits = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if digits.len() % 2 != 0 {
        return Err(format!("{field} hex length must be even"));
    }
    hex::decode(digits).map_err(|error| format!("{field} must be valid hex: {error}"))
}

fn encode_abi_primitive_word(kind: &str, value: &Value, field: &str) -> Result<Vec<u8>, String> {
    match kind {
        "address" => {
            let raw = value
                .as_str()
                .ok_or_else(|| format!("{field} address must be a string"))?;
            let bytes = decode_hex_blob(raw, field)?;
            if bytes.len() != 20 {
                return Err(format!("{field} address must be 20 bytes"));
            }
            let mut word = vec![0u8; 32];
            word[12..].copy_from_slice(&bytes);
            Ok(word)
        }
        "bool" => {
            let flag = match value {
                Value::Bool(flag) => *flag,
                Value::String(text) if text.trim() == "true" => true,
                Value::String(text) if text.trim() == "false" => false,
                _ => return Err(format!("{field} bool must be true/false")),
            };
            Ok(encode_u256_word(U256::from(u8::from(flag))))
        }
        _ if kind.starts_with("uint") => {
            let bits = integer_width(kind, "uint")?;
            let parsed = parse_u256_from_json(value, field)?;
            if parsed.bit_len() > bits {
                return Err(format!("{field} does not fit in {kind}"));
            }
            Ok(encode_u256_word(parsed))
        }
        _ if kind.starts_with("int") => {
            let bits = integer_width(kind, "int")?;
            let parsed = parse_i256_from_json(value, field)?;
            if bits < 256 {
                let limit = U256::from(1u8) << (bits - 1);
                let magnitude = parsed.unsigned_abs();
                let fits = if parsed.is_negative() {
                    magnitude <= limit
                } else {
                    magnitude < limit
                };
                if !fits {
                    return Err(format!("{field} does not fit in {kind}"));
                }
            }
            Ok(encode_u256_word(parsed.into_raw()))
        }
        _ if kind.starts_with("bytes") => {
            let width = kind
                .trim_start_matches("bytes")
                .parse::<usize>()
                .map_err(|_error| format!("unsupported abi type: {kind}"))?;
            if !(1..=32).contains(&width) {
                return Err(format!("fixed bytes width must be in 1..=32, got {width}"));
            }
            let raw = value
                .as_str()
                .ok_or_else(|| format!("{field} fixed bytes must be a hex string"))?;
            let bytes = decode_hex_blob(raw, field)?;
            if bytes.len() > width {
                return Err(format!(
                    "{field} length exceeds bytes{width}: {} bytes",
                    bytes.len()
                ));
            }
            let mut word = vec![0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(word)
        }
        _ => Err(format!("unsupported abi primitive type: {kind}")),
    }
}

fn integer_width(kind: &str, prefix: &str) -> Result<usize, String> {
    let digits = kind.trim_start_matches(prefix);
    if digits.is_empty() {
        return Ok(256);
    }
    digits
        .parse::<usize>()
        .ok()
        .filter(|bits| (8..=256).contains(bits) && bits % 8 == 0)
        .ok_or_else(|| format!("unsupported abi type: {kind}"))
}

fn parse_u256_from_json(value: &Value, field: &str) -> Result<U256, String> {
    if let Some(raw) = value.as_u64() {
        return Ok(U256::from(raw));
    }
    let raw = value
        .as_str()
        .ok_or_else(|| format!("{field} must be a string or unsigned integer"))?
        .trim();
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(format!("{field} must be a decimal string"));
    }
    U256::from_str(raw).map_err(|error| format!("failed to parse {field}: {error}"))
}

fn parse_i256_from_json(value: &Value, field: &str) -> Result<I256, String> {
    if let Some(raw) = value.as_i64() {
        return I256::from_dec_str(&raw.to_string())
            .map_err(|error| format!("failed to parse {field}: {error}"));
    }
    let raw = value
        .as_str()
        .ok_or_else(|| format!("{field} must be a string or integer"))?;
    I256::from_dec_str(raw.trim())
        .map_err(|error| format!("failed to parse {field} as signed integer: {error}"))
}

fn encode_u256_word(value: U256) -> Vec<u8> {
    value.to_be_bytes::<32>().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::catalog::catalog_from_fragments;
    use crate::abi::coercion::coerce_arguments;
    use crate::domain::types::AbiFragment;

    fn descriptor(text: &str) -> FunctionDescriptor {
        let build = catalog_from_fragments(&[AbiFragment::StringForm(text.to_string())]);
        build
            .catalog
            .read_functions
            .into_iter()
            .chain(build.catalog.write_functions)
            .next()
            .expect("fragment should produce a descriptor")
    }

    fn encode(text: &str, raw: &[&str]) -> Result<String, String> {
        let descriptor = descriptor(text);
        let raw = raw.iter().map(|value| (*value).to_string()).collect::<Vec<_>>();
        let coerced = coerce_arguments(&descriptor, &raw, "", None).map_err(|e| e.to_string())?;
        encode_call(&descriptor, &coerced.typed_arguments).map(|data| format!("0x{}", hex::encode(data)))
    }

    #[test]
    fn encodes_erc20_transfer() {
        let data = encode(
            "function transfer(address to, uint256 amount)",
            &["0x3333333333333333333333333333333333333333", "1000"],
        )
        .expect("transfer should encode");
        assert_eq!(
            data,
            format!(
                "0xa9059cbb{:0>64}{:064x}",
                "3333333333333333333333333333333333333333", 1000u64
            )
        );
    }

    #[test]
    fn negative_signed_values_use_twos_complement() {
        let data = encode("function adjust(int256 delta)", &["-1"]).expect("int should encode");
        assert_eq!(&data[10..], "f".repeat(64));

        let err = encode("function adjust(int8 delta)", &["-129"])
            .expect_err("int8 underflow should fail");
        assert!(err.contains("does not fit"), "{err}");
        assert!(encode("function adjust(int8 delta)", &["-128"]).is_ok());
    }

    #[test]
    fn unsigned_width_is_enforced() {
        assert!(encode("function setLimit(uint8 limit)", &["255"]).is_ok());
        let err = encode("function setLimit(uint8 limit)", &["256"])
            .expect_err("uint8 overflow should fail");
        assert!(err.contains("does not fit"), "{err}");
    }

    #[test]
    fn dynamic_array_argument_goes_to_the_tail() {
        let proof = format!("[\"0x{}\"]", "ab".repeat(32));
        let data = encode(
            "function presaleMint(uint256 amount, bytes32[] proof) payable",
            &["2", &proof],
        )
        .expect("presale mint should encode");
        let words = data[10..]
            .as_bytes()
            .chunks(64)
            .map(|chunk| String::from_utf8_lossy(chunk).to_string())
            .collect::<Vec<_>>();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0], format!("{:064x}", 2));
        assert_eq!(words[1], format!("{:064x}", 64));
        assert_eq!(words[2], format!("{:064x}", 1));
        assert_eq!(words[3], "ab".repeat(32));
    }

    #[test]
    fn string_argument_is_length_prefixed_and_padded() {
        let data = encode("function setBaseURI(string uri)", &["ipfs://x"])
            .expect("string should encode");
        let body = &data[10..];
        assert_eq!(&body[..64], format!("{:064x}", 32));
        assert_eq!(&body[64..128], format!("{:064x}", 8));
        assert_eq!(&body[128..144], hex::encode("ipfs://x"));
        assert_eq!(body.len(), 192);
    }

    #[test]
    fn malformed_array_text_is_reported() {
        let err = encode(
            "function presaleMint(uint256 amount, bytes32[] proof) payable",
            &["2", "not-json"],
        )
        .expect_err("bad JSON should fail");
        assert!(err.contains("proof"), "{err}");
    }
}

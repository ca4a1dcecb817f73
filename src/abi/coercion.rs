use crate::domain::types::{
    AbiParam, CoercedArguments, FunctionDescriptor, FunctionMutability, TypedValue,
};
use crate::error::EngineError;
use alloy_primitives::{Address, I256, U256};

/// Name used for the native amount in validation failures.
pub const AMOUNT_PARAMETER: &str = "amount";
/// Decimal places of the native currency's base unit.
pub const NATIVE_DECIMALS: usize = 18;

/// Converts raw user strings into typed values for `descriptor`.
///
/// Parameters are checked in declaration order and the first failure wins.
/// For payable functions the native amount is parsed into base units and,
/// when `available_balance` is known, checked against it; for every other
/// function the amount is forced to zero.
pub fn coerce_arguments(
    descriptor: &FunctionDescriptor,
    raw_arguments: &[String],
    native_amount: &str,
    available_balance: Option<U256>,
) -> Result<CoercedArguments, EngineError> {
    let expected = descriptor.parameters.len();
    let mut typed_arguments = Vec::with_capacity(expected);
    for (position, param) in descriptor.parameters.iter().enumerate() {
        let raw = raw_arguments.get(position).map(String::as_str).unwrap_or_default();
        typed_arguments.push(coerce_value(param, position, raw)?);
    }
    if raw_arguments.len() > expected {
        return Err(EngineError::validation(
            format!("Parameter #{}", expected + 1),
            format!(
                "unexpected argument, {} takes {expected}",
                descriptor.signature
            ),
        ));
    }

    let base_unit_amount = if descriptor.mutability == FunctionMutability::Payable {
        let amount = parse_native_amount(native_amount)?;
        if let Some(available) = available_balance {
            if amount > available {
                return Err(EngineError::InsufficientFunds {
                    parameter: AMOUNT_PARAMETER.to_string(),
                    requested: amount.to_string(),
                    available: available.to_string(),
                });
            }
        }
        amount
    } else {
        U256::ZERO
    };

    Ok(CoercedArguments {
        typed_arguments,
        base_unit_amount,
    })
}

pub fn coerce_value(param: &AbiParam, position: usize, raw: &str) -> Result<TypedValue, EngineError> {
    let label = param.display_name(position);
    let value = raw.trim();
    if value.is_empty() {
        return Err(EngineError::validation(label, "is required"));
    }

    let kind = param.kind.as_str();
    if kind.ends_with(']') || kind.starts_with("tuple") {
        return Ok(TypedValue::PassThrough(raw.to_string()));
    }
    match kind {
        "address" => parse_address(value)
            .map(TypedValue::Address)
            .map_err(|reason| EngineError::validation(label, reason)),
        "bool" => match value {
            "true" => Ok(TypedValue::Bool(true)),
            "false" => Ok(TypedValue::Bool(false)),
            _ => Err(EngineError::validation(label, "must be true or false")),
        },
        _ if kind.starts_with("uint") => parse_unsigned(value)
            .map(TypedValue::Uint)
            .map_err(|reason| EngineError::validation(label, reason)),
        _ if kind.starts_with("int") => parse_signed(value)
            .map(TypedValue::Int)
            .map_err(|reason| EngineError::validation(label, reason)),
        _ => Ok(TypedValue::PassThrough(raw.to_string())),
    }
}

/// `0x` followed by 40 hex digits; mixed-case input must carry a valid
/// EIP-55 checksum.
pub fn parse_address(raw: &str) -> Result<Address, String> {
    let value = raw.trim();
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| "must be a 0x-prefixed address".to_string())?;
    if digits.len() != 40 || !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err("must be a 0x-prefixed 20-byte hex address".to_string());
    }

    let has_upper = digits.bytes().any(|byte| byte.is_ascii_uppercase());
    let has_lower = digits.bytes().any(|byte| byte.is_ascii_lowercase());
    if has_upper && has_lower {
        return Address::parse_checksummed(value, None)
            .map_err(|_error| "has an invalid EIP-55 checksum".to_string());
    }
    value
        .parse::<Address>()
        .map_err(|error| format!("is not a valid address: {error}"))
}

fn parse_unsigned(value: &str) -> Result<U256, String> {
    if value.starts_with('-') {
        return Err("must not be negative".to_string());
    }
    if !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err("must be a decimal integer".to_string());
    }
    U256::from_str_radix(value, 10).map_err(|_error| "exceeds the 256-bit range".to_string())
}

fn parse_signed(value: &str) -> Result<I256, String> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err("must be a decimal integer".to_string());
    }
    I256::from_dec_str(value).map_err(|_error| "exceeds the signed 256-bit range".to_string())
}

/// Parses a decimal native-currency amount into base units without any
/// floating point step. An empty amount is zero.
pub fn parse_native_amount(raw: &str) -> Result<U256, EngineError> {
    let invalid = |reason: &str| EngineError::validation(AMOUNT_PARAMETER, reason);

    let value = raw.trim();
    if value.is_empty() {
        return Ok(U256::ZERO);
    }
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("is not a valid decimal amount"));
    }
    if !whole.bytes().all(|byte| byte.is_ascii_digit())
        || !fraction.bytes().all(|byte| byte.is_ascii_digit())
    {
        return Err(invalid("is not a valid decimal amount"));
    }
    if fraction.len() > NATIVE_DECIMALS {
        return Err(invalid("supports at most 18 decimal places"));
    }

    let scaled = format!("{whole}{fraction:0<width$}", width = NATIVE_DECIMALS);
    let amount = U256::from_str_radix(&scaled, 10).map_err(|_error| invalid("is too large"))?;
    if negative && !amount.is_zero() {
        return Err(invalid("cannot be negative"));
    }
    Ok(amount)
}

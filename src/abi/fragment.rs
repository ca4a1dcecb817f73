use crate::domain::types::{
    AbiFragment, AbiParam, CatalogBuildError, NormalizedFragment, StateMutability,
    StructuredFragment, StructuredParam,
};
use serde::Deserialize;
use serde_json::Value;

const NON_FUNCTION_KEYWORDS: &[&str] = &["event", "error", "constructor", "fallback", "receive"];
const PARAMETER_QUALIFIERS: &[&str] = &["memory", "calldata", "storage", "indexed", "payable"];
const VISIBILITY_MODIFIERS: &[&str] = &["external", "public"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizationOutcome {
    pub fragments: Vec<NormalizedFragment>,
    pub diagnostics: Vec<CatalogBuildError>,
}

pub fn normalize_fragments(fragments: &[AbiFragment]) -> NormalizationOutcome {
    let mut outcome = NormalizationOutcome::default();
    for (index, fragment) in fragments.iter().enumerate() {
        let source_index = u32::try_from(index).unwrap_or(u32::MAX);
        let parsed = match fragment {
            AbiFragment::StringForm(text) => parse_signature_text(text, source_index),
            AbiFragment::StructuredForm(entry) => normalize_structured(entry, source_index),
        };
        match parsed {
            Ok(Some(normalized)) if normalized.name.starts_with('_') => {}
            Ok(Some(normalized)) => outcome.fragments.push(normalized),
            Ok(None) => {}
            Err(reason) => outcome.diagnostics.push(CatalogBuildError {
                fragment_index: source_index,
                reason,
            }),
        }
    }
    outcome
}

/// Decodes ABI JSON: either an array of fragments (strings or objects) or an
/// object carrying an `abi` array, possibly itself JSON-encoded as a string.
pub fn decode_abi_json(abi_json: &str) -> Result<Vec<AbiFragment>, String> {
    let value: Value =
        serde_json::from_str(abi_json).map_err(|error| format!("invalid abi json: {error}"))?;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("abi") {
            Some(Value::Array(entries)) => entries,
            Some(Value::String(nested)) => return decode_abi_json(&nested),
            _ => {
                return Err(
                    "abi json must be an array or object containing an `abi` array".to_string(),
                )
            }
        },
        _ => {
            return Err("abi json must be an array or object containing an `abi` array".to_string())
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::String(text) => Ok(AbiFragment::StringForm(text)),
            Value::Object(_) => serde_json::from_value::<RawAbiEntry>(entry)
                .map(|raw| AbiFragment::StructuredForm(raw.into()))
                .map_err(|error| format!("abi entry #{index} is not a valid fragment: {error}")),
            other => Err(format!(
                "abi entry #{index} must be a string or object, got {other}"
            )),
        })
        .collect()
}

#[derive(Deserialize)]
struct RawAbiEntry {
    #[serde(rename = "type", default)]
    entry_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    inputs: Option<Vec<RawAbiParam>>,
    #[serde(default)]
    outputs: Vec<RawAbiParam>,
    #[serde(rename = "stateMutability", default)]
    state_mutability: Option<String>,
    #[serde(default)]
    constant: Option<bool>,
    #[serde(default)]
    payable: Option<bool>,
}

#[derive(Deserialize)]
struct RawAbiParam {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    components: Vec<RawAbiParam>,
}

impl From<RawAbiEntry> for StructuredFragment {
    fn from(raw: RawAbiEntry) -> Self {
        Self {
            entry_type: raw.entry_type,
            name: raw.name,
            inputs: raw
                .inputs
                .map(|inputs| inputs.into_iter().map(StructuredParam::from).collect()),
            outputs: raw.outputs.into_iter().map(StructuredParam::from).collect(),
            state_mutability: raw.state_mutability,
            constant: raw.constant,
            payable: raw.payable,
        }
    }
}

impl From<RawAbiParam> for StructuredParam {
    fn from(raw: RawAbiParam) -> Self {
        Self {
            name: raw.name,
            kind: raw.kind,
            components: raw.components.into_iter().map(StructuredParam::from).collect(),
        }
    }
}

// ── Structured form ──────────────────────────────────────────────────────────

fn normalize_structured(
    entry: &StructuredFragment,
    source_index: u32,
) -> Result<Option<NormalizedFragment>, String> {
    let entry_type = entry
        .entry_type
        .as_deref()
        .map(str::trim)
        .unwrap_or("function");
    if !entry_type.eq_ignore_ascii_case("function") {
        return Ok(None);
    }

    let name = entry
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| "function entry is missing a name".to_string())?;
    validate_identifier(name)?;

    let inputs = entry
        .inputs
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(normalize_structured_param)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| format!("{name}: {error}"))?;
    let outputs = entry
        .outputs
        .iter()
        .map(normalize_structured_param)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| format!("{name}: {error}"))?;

    Ok(Some(NormalizedFragment {
        name: name.to_string(),
        inputs,
        outputs,
        state_mutability: structured_mutability(entry)?,
        source_index,
    }))
}

fn structured_mutability(entry: &StructuredFragment) -> Result<StateMutability, String> {
    if let Some(raw) = entry.state_mutability.as_deref() {
        return match raw.trim().to_ascii_lowercase().as_str() {
            "pure" => Ok(StateMutability::Pure),
            "view" => Ok(StateMutability::View),
            "nonpayable" => Ok(StateMutability::NonPayable),
            "payable" => Ok(StateMutability::Payable),
            other => Err(format!("unknown stateMutability `{other}`")),
        };
    }
    if entry.constant == Some(true) {
        return Ok(StateMutability::View);
    }
    if entry.payable == Some(true) {
        return Ok(StateMutability::Payable);
    }
    Ok(StateMutability::NonPayable)
}

fn normalize_structured_param(param: &StructuredParam) -> Result<AbiParam, String> {
    let raw_kind = param
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .ok_or_else(|| "parameter is missing a type".to_string())?;
    let kind = normalize_raw_kind(raw_kind)?;
    let name = param
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    if kind.starts_with("tuple") {
        if param.components.is_empty() {
            return Err("tuple parameter must provide components".to_string());
        }
        let components = param
            .components
            .iter()
            .map(normalize_structured_param)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(AbiParam {
            name,
            kind,
            components,
        });
    }

    Ok(AbiParam {
        name,
        kind,
        components: Vec::new(),
    })
}

// ── String form ──────────────────────────────────────────────────────────────

fn parse_signature_text(
    text: &str,
    source_index: u32,
) -> Result<Option<NormalizedFragment>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("signature text is empty".to_string());
    }

    let leading = trimmed
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    let body = if leading == "function" {
        trimmed["function".len()..].trim_start()
    } else if NON_FUNCTION_KEYWORDS.contains(&leading) {
        return Ok(None);
    } else {
        trimmed
    };

    let open = body
        .find('(')
        .ok_or_else(|| format!("`{trimmed}` has no parameter list"))?;
    let name = body[..open].trim();
    validate_identifier(name)?;
    let close = matching_paren(body, open)?;
    let inputs = parse_param_list(&body[open + 1..close])?;

    let tail = body[close + 1..].trim();
    let (modifiers, returns) = match find_word(tail, "returns") {
        Some(position) => (&tail[..position], Some(tail[position + "returns".len()..].trim())),
        None => (tail, None),
    };

    let outputs = match returns {
        Some(list) => {
            if !list.starts_with('(') {
                return Err(format!("`{name}` returns clause must be parenthesised"));
            }
            let end = matching_paren(list, 0)?;
            if !list[end + 1..].trim().is_empty() {
                return Err(format!("unexpected text after returns clause of `{name}`"));
            }
            parse_param_list(&list[1..end])?
        }
        None => Vec::new(),
    };

    Ok(Some(NormalizedFragment {
        name: name.to_string(),
        inputs,
        outputs,
        state_mutability: modifier_mutability(name, modifiers)?,
        source_index,
    }))
}

fn modifier_mutability(name: &str, modifiers: &str) -> Result<StateMutability, String> {
    let mut mutability: Option<StateMutability> = None;
    for word in modifiers.split_whitespace() {
        let next = match word {
            "view" | "constant" => StateMutability::View,
            "pure" => StateMutability::Pure,
            "payable" => StateMutability::Payable,
            "nonpayable" => StateMutability::NonPayable,
            _ if VISIBILITY_MODIFIERS.contains(&word) => continue,
            other => return Err(format!("unknown modifier `{other}` on `{name}`")),
        };
        match mutability {
            Some(existing) if existing != next => {
                return Err(format!("conflicting state mutability on `{name}`"));
            }
            _ => mutability = Some(next),
        }
    }
    Ok(mutability.unwrap_or(StateMutability::NonPayable))
}

fn parse_param_list(text: &str) -> Result<Vec<AbiParam>, String> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    split_top_level(text)?
        .into_iter()
        .map(parse_param)
        .collect()
}

fn parse_param(piece: &str) -> Result<AbiParam, String> {
    let piece = piece.trim();
    if piece.is_empty() {
        return Err("empty parameter in list".to_string());
    }

    let tuple_open = if piece.starts_with('(') {
        Some(0)
    } else if piece.starts_with("tuple(") {
        Some("tuple".len())
    } else {
        None
    };

    let (param, remainder) = match tuple_open {
        Some(open) => {
            let close = matching_paren(piece, open)?;
            let suffix_end = array_suffix_end(piece, close + 1);
            let suffix = &piece[close + 1..suffix_end];
            validate_array_suffix(suffix)?;
            let components = parse_param_list(&piece[open + 1..close])?;
            if components.is_empty() {
                return Err(format!("tuple parameter `{piece}` has no components"));
            }
            let param = AbiParam {
                name: None,
                kind: format!("tuple{suffix}"),
                components,
            };
            (param, &piece[suffix_end..])
        }
        None => {
            let end = piece.find(char::is_whitespace).unwrap_or(piece.len());
            let param = AbiParam {
                name: None,
                kind: normalize_raw_kind(&piece[..end])?,
                components: Vec::new(),
            };
            (param, &piece[end..])
        }
    };

    let mut words = remainder
        .split_whitespace()
        .filter(|word| !PARAMETER_QUALIFIERS.contains(word));
    let name = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected token `{extra}` in parameter `{piece}`"));
    }
    if let Some(name) = name {
        validate_identifier(name)?;
    }

    Ok(AbiParam {
        name: name.map(str::to_string),
        ..param
    })
}

fn split_top_level(text: &str) -> Result<Vec<&str>, String> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, char) in text.char_indices() {
        match char {
            '(' => depth = depth.saturating_add(1),
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced `)` in `{text}`"))?;
            }
            ',' if depth == 0 => {
                pieces.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("unbalanced `(` in `{text}`"));
    }
    pieces.push(&text[start..]);
    Ok(pieces)
}

fn matching_paren(text: &str, open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    for (index, char) in text[open..].char_indices() {
        match char {
            '(' => depth = depth.saturating_add(1),
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(open + index);
                }
            }
            _ => {}
        }
    }
    Err(format!("unclosed parameter list in `{text}`"))
}

fn array_suffix_end(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut index = from;
    while index < bytes.len() && bytes[index] == b'[' {
        match text[index..].find(']') {
            Some(offset) => index += offset + 1,
            None => return bytes.len(),
        }
    }
    index
}

fn find_word(text: &str, word: &str) -> Option<usize> {
    let mut search_from = 0usize;
    while let Some(offset) = text[search_from..].find(word) {
        let start = search_from + offset;
        let end = start + word.len();
        let before_ok = start == 0 || text[..start].ends_with(char::is_whitespace);
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |next| next.is_whitespace() || next == '(');
        if before_ok && after_ok {
            return Some(start);
        }
        search_from = end;
    }
    None
}

fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .map(|head| head.is_ascii_alphabetic() || head == '_' || head == '$')
        .unwrap_or(false);
    if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(format!("`{name}` is not a valid identifier"));
    }
    Ok(())
}

// ── Type canonicalisation ────────────────────────────────────────────────────

pub(crate) fn normalize_raw_kind(raw_kind: &str) -> Result<String, String> {
    let compact = raw_kind
        .chars()
        .filter(|char| !char.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if compact.is_empty() {
        return Err("abi type must be non-empty".to_string());
    }

    if let Some(suffix) = compact.strip_prefix("tuple") {
        validate_array_suffix(suffix)?;
        return Ok(format!("tuple{suffix}"));
    }

    let (base, suffix) = split_base_and_suffix(&compact);
    validate_array_suffix(suffix)?;
    let canonical_base = match base {
        "uint" => "uint256",
        "int" => "int256",
        "byte" => "bytes1",
        other => other,
    };
    validate_elementary_type(canonical_base)?;
    Ok(format!("{canonical_base}{suffix}"))
}

fn validate_elementary_type(base: &str) -> Result<(), String> {
    let valid = match base {
        "address" | "bool" | "string" | "bytes" | "function" => true,
        _ if base.starts_with("uint") => valid_integer_width(&base["uint".len()..]),
        _ if base.starts_with("int") => valid_integer_width(&base["int".len()..]),
        _ if base.starts_with("bytes") => base["bytes".len()..]
            .parse::<u32>()
            .map(|width| (1..=32).contains(&width))
            .unwrap_or(false),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(format!("unknown abi type `{base}`"))
    }
}

fn valid_integer_width(raw: &str) -> bool {
    raw.parse::<u32>()
        .map(|bits| bits % 8 == 0 && (8..=256).contains(&bits))
        .unwrap_or(false)
}

fn split_base_and_suffix(kind: &str) -> (&str, &str) {
    if let Some(start) = kind.find('[') {
        (&kind[..start], &kind[start..])
    } else {
        (kind, "")
    }
}

fn validate_array_suffix(raw_suffix: &str) -> Result<(), String> {
    if raw_suffix.is_empty() {
        return Ok(());
    }
    let bytes = raw_suffix.as_bytes();
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] != b'[' {
            return Err(format!("invalid array suffix in abi type: {raw_suffix}"));
        }
        index = index.saturating_add(1);
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            index = index.saturating_add(1);
        }
        if index >= bytes.len() || bytes[index] != b']' {
            return Err(format!("invalid array suffix in abi type: {raw_suffix}"));
        }
        index = index.saturating_add(1);
    }
    Ok(())
}

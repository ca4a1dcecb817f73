use crate::abi::fragment::normalize_fragments;
use crate::domain::types::{
    AbiFragment, AbiParam, CatalogBuild, CatalogBuildError, FunctionDescriptor,
    FunctionMutability, NormalizedFragment, StateMutability,
};
use alloy_primitives::keccak256;
use canlog::{log, GetLogFilter, LogFilter, LogPriorityLevels};
use std::collections::BTreeSet;

const PRIMARY_NAME_FRAGMENTS: &[&str] = &["mint"];
const PRIMARY_EXACT_NAMES: &[&str] = &["buy", "purchase"];

#[derive(Clone, Copy, Debug, LogPriorityLevels)]
enum CatalogLogPriority {
    #[log_level(capacity = 500, name = "CATALOG_INFO")]
    Info,
    #[log_level(capacity = 500, name = "CATALOG_WARN")]
    Warn,
}

impl GetLogFilter for CatalogLogPriority {
    fn get_log_filter() -> LogFilter {
        LogFilter::ShowAll
    }
}

/// Normalises a fetched ABI and builds its catalog in one pass.
pub fn catalog_from_fragments(fragments: &[AbiFragment]) -> CatalogBuild {
    let normalized = normalize_fragments(fragments);
    let mut build = build_catalog(&normalized.fragments);
    let mut diagnostics = normalized.diagnostics;
    diagnostics.append(&mut build.diagnostics);
    diagnostics.sort_by_key(|diagnostic| diagnostic.fragment_index);
    build.diagnostics = diagnostics;

    for diagnostic in &build.diagnostics {
        log!(
            CatalogLogPriority::Warn,
            "catalog_fragment_skipped index={} reason={}",
            diagnostic.fragment_index,
            diagnostic.reason
        );
    }
    log!(
        CatalogLogPriority::Info,
        "catalog_built read={} write={} diagnostics={}",
        build.catalog.read_functions.len(),
        build.catalog.write_functions.len(),
        build.diagnostics.len()
    );
    build
}

pub fn build_catalog(fragments: &[NormalizedFragment]) -> CatalogBuild {
    let mut build = CatalogBuild::default();
    let mut seen = BTreeSet::new();

    for fragment in fragments {
        let signature = function_signature(&fragment.name, &fragment.inputs);
        if !seen.insert(signature.clone()) {
            build.diagnostics.push(CatalogBuildError {
                fragment_index: fragment.source_index,
                reason: format!("duplicate signature {signature} ignored"),
            });
            continue;
        }

        let mutability = match fragment.state_mutability {
            StateMutability::Pure | StateMutability::View => FunctionMutability::Read,
            StateMutability::NonPayable => FunctionMutability::Write,
            StateMutability::Payable => FunctionMutability::Payable,
        };
        let descriptor = FunctionDescriptor {
            name: fragment.name.clone(),
            parameters: fragment.inputs.clone(),
            outputs: fragment.outputs.clone(),
            mutability,
            selector: selector_hex(&signature),
            primary: mutability.is_write() && is_primary_name(&fragment.name),
            signature,
        };
        if mutability.is_write() {
            build.catalog.write_functions.push(descriptor);
        } else {
            build.catalog.read_functions.push(descriptor);
        }
    }

    build
}

pub fn function_signature(name: &str, parameters: &[AbiParam]) -> String {
    let types = parameters
        .iter()
        .map(AbiParam::canonical_type)
        .collect::<Vec<_>>();
    format!("{}({})", name.trim(), types.join(","))
}

pub fn selector_hex(signature: &str) -> String {
    let hash = keccak256(signature.as_bytes());
    format!("0x{}", hex::encode(&hash.as_slice()[..4]))
}

/// Acquisition-style names shown first in the write group.
pub fn is_primary_name(name: &str) -> bool {
    let lowered = name.to_lowercase();
    PRIMARY_NAME_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
        || PRIMARY_EXACT_NAMES.contains(&lowered.as_str())
}

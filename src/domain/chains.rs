use crate::domain::types::ChainInfo;

const SUPPORTED_CHAINS: &[(u64, &str, &str)] = &[
    (1, "Ethereum Mainnet", "ETH"),
    (5, "Goerli Testnet", "ETH"),
    (11_155_111, "Sepolia Testnet", "ETH"),
    (137, "Polygon Mainnet", "MATIC"),
    (80_001, "Mumbai Testnet", "MATIC"),
    (42_161, "Arbitrum One", "ETH"),
    (10, "Optimism", "ETH"),
    (56, "BSC Mainnet", "BNB"),
    (8_453, "Base Chain", "ETH"),
    (84_531, "Base Goerli", "ETH"),
    (16_384, "Ape Chain", "APE"),
];

pub fn supported_chains() -> Vec<ChainInfo> {
    SUPPORTED_CHAINS
        .iter()
        .map(|(chain_id, name, symbol)| ChainInfo {
            chain_id: *chain_id,
            name: (*name).to_string(),
            native_symbol: (*symbol).to_string(),
        })
        .collect()
}

pub fn chain_by_id(chain_id: u64) -> Option<ChainInfo> {
    supported_chains()
        .into_iter()
        .find(|chain| chain.chain_id == chain_id)
}

pub fn is_supported_chain(chain_id: u64) -> bool {
    SUPPORTED_CHAINS.iter().any(|(id, _, _)| *id == chain_id)
}

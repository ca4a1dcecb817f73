//! ABI sources for contract loading.
//!
//! Controllers register verified ABIs per `(chain, address)`; those live in
//! stable memory and are served by [`StoredAbiSource`]. Contracts nobody
//! registered can still be driven through the built-in ERC-721 fragment list
//! when the caller opts in.
use crate::domain::types::AbiFragment;
use crate::ports::AbiSource;
use crate::storage::stable;
use async_trait::async_trait;

const FALLBACK_ERC721_SIGNATURES: &[&str] = &[
    // ERC-721 core
    "function name() view returns (string)",
    "function symbol() view returns (string)",
    "function tokenURI(uint256 tokenId) view returns (string)",
    "function balanceOf(address owner) view returns (uint256)",
    "function ownerOf(uint256 tokenId) view returns (address)",
    "function approve(address to, uint256 tokenId)",
    "function getApproved(uint256 tokenId) view returns (address)",
    "function setApprovalForAll(address operator, bool approved)",
    "function isApprovedForAll(address owner, address operator) view returns (bool)",
    "function transferFrom(address from, address to, uint256 tokenId)",
    "function safeTransferFrom(address from, address to, uint256 tokenId)",
    "function safeTransferFrom(address from, address to, uint256 tokenId, bytes data)",
    // Common mint entry points
    "function mint(uint256 amount) payable",
    "function mint(address to, uint256 amount) payable",
    "function mintNFT(address recipient, uint256 tokenId) returns (uint256)",
    "function mintNFT(address recipient) returns (uint256)",
    "function mintTo(address to, uint256 amount) payable",
    "function publicMint(uint256 amount) payable",
    "function presaleMint(uint256 amount, bytes32[] proof) payable",
    // Sale state
    "function totalSupply() view returns (uint256)",
    "function maxSupply() view returns (uint256)",
    "function mintPrice() view returns (uint256)",
    "function maxMintAmount() view returns (uint256)",
    "function paused() view returns (bool)",
    "function saleIsActive() view returns (bool)",
    "function presaleIsActive() view returns (bool)",
];

pub fn fallback_erc721_fragments() -> Vec<AbiFragment> {
    FALLBACK_ERC721_SIGNATURES
        .iter()
        .map(|signature| AbiFragment::StringForm((*signature).to_string()))
        .collect()
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StoredAbiSource;

#[async_trait(?Send)]
impl AbiSource for StoredAbiSource {
    async fn fetch(
        &self,
        contract_address: &str,
        chain_id: u64,
    ) -> Result<Option<Vec<AbiFragment>>, String> {
        Ok(stable::contract_abi(contract_address, chain_id))
    }
}

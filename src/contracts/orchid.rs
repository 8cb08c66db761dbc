use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::DynProvider;
use alloy::sol;

use crate::error::{Result, WaterError};
use crate::rpc::EvmRpc;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract ICryptOrchids {
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
        function alive(uint256 tokenId, uint256 currentTime) external view returns (bool);
        function waterLevel(uint256 tokenId) external view returns (uint256);
        function getTokenMetadata(uint256 tokenId) external view returns (
            string memory species,
            uint256 plantedAt,
            uint256 waterLevel,
            uint8 stage
        );
        function GROWTH_CYCLE() external view returns (uint256);
        function water(uint256 tokenId, uint256 currentTime) external;
    }
}

/// Read and write access to the orchid NFT contract for one owner account
///
/// Implemented by [`CryptOrchids`] against a live chain; tests supply
/// in-memory fakes.
pub trait OrchidContract {
    /// The account whose orchids are tended
    fn owner(&self) -> Address;

    fn balance_of(&self) -> impl Future<Output = Result<u64>> + Send;

    fn token_of_owner_by_index(&self, index: u64) -> impl Future<Output = Result<U256>> + Send;

    fn alive(&self, token: U256, now: u64) -> impl Future<Output = Result<bool>> + Send;

    fn water_level(&self, token: U256) -> impl Future<Output = Result<u64>> + Send;

    /// Planting timestamp, the second field of `getTokenMetadata`
    fn planted_at(&self, token: U256) -> impl Future<Output = Result<u64>> + Send;

    fn growth_cycle(&self) -> impl Future<Output = Result<u64>> + Send;

    fn estimate_water_gas(&self, token: U256, now: u64) -> impl Future<Output = Result<u64>> + Send;

    /// Submit `water(token, now)` and wait for it to be mined
    ///
    /// Returns the transaction hash
    fn water(
        &self,
        token: U256,
        now: u64,
        gas_limit: u64,
    ) -> impl Future<Output = Result<B256>> + Send;
}

/// CryptOrchids contract client
pub struct CryptOrchids {
    rpc: EvmRpc,
    contract: ICryptOrchids::ICryptOrchidsInstance<DynProvider>,
    confirm_timeout: Duration,
}

impl CryptOrchids {
    /// Bind to a deployed CryptOrchids contract
    ///
    /// # Arguments
    /// * `rpc` - Connected RPC client whose signer owns the orchids
    /// * `contract_address` - The ERC-721 contract address
    /// * `confirm_timeout` - How long to wait for a watering transaction to be mined
    pub fn new(rpc: EvmRpc, contract_address: Address, confirm_timeout: Duration) -> Self {
        let contract = ICryptOrchids::new(contract_address, rpc.provider().clone());
        Self {
            rpc,
            contract,
            confirm_timeout,
        }
    }
}

impl OrchidContract for CryptOrchids {
    fn owner(&self) -> Address {
        self.rpc.owner()
    }

    async fn balance_of(&self) -> Result<u64> {
        let call = self.contract.balanceOf(self.rpc.owner());
        let balance = self.rpc.call("balanceOf", call.call()).await?;
        to_u64("balanceOf", balance)
    }

    async fn token_of_owner_by_index(&self, index: u64) -> Result<U256> {
        let call = self
            .contract
            .tokenOfOwnerByIndex(self.rpc.owner(), U256::from(index));
        self.rpc.call("tokenOfOwnerByIndex", call.call()).await
    }

    async fn alive(&self, token: U256, now: u64) -> Result<bool> {
        let call = self.contract.alive(token, U256::from(now));
        self.rpc.call("alive", call.call()).await
    }

    async fn water_level(&self, token: U256) -> Result<u64> {
        let call = self.contract.waterLevel(token);
        let level = self.rpc.call("waterLevel", call.call()).await?;
        to_u64("waterLevel", level)
    }

    async fn planted_at(&self, token: U256) -> Result<u64> {
        let call = self.contract.getTokenMetadata(token);
        let metadata = self.rpc.call("getTokenMetadata", call.call()).await?;
        to_u64("getTokenMetadata", metadata.plantedAt)
    }

    async fn growth_cycle(&self) -> Result<u64> {
        let call = self.contract.GROWTH_CYCLE();
        let cycle = self.rpc.call("GROWTH_CYCLE", call.call()).await?;
        to_u64("GROWTH_CYCLE", cycle)
    }

    async fn estimate_water_gas(&self, token: U256, now: u64) -> Result<u64> {
        let call = self.contract.water(token, U256::from(now));
        self.rpc
            .call("water", call.estimate_gas())
            .await
            .map_err(into_transaction_error)
    }

    async fn water(&self, token: U256, now: u64, gas_limit: u64) -> Result<B256> {
        let call = self.contract.water(token, U256::from(now)).gas(gas_limit);
        let pending = self
            .rpc
            .call("water", call.send())
            .await
            .map_err(into_transaction_error)?;

        tracing::info!(%token, tx_hash = %pending.tx_hash(), gas_limit, "Watering transaction submitted");

        self.rpc.confirm(pending, self.confirm_timeout).await
    }
}

fn into_transaction_error(err: WaterError) -> WaterError {
    match err {
        WaterError::ContractCall { reason, .. } => WaterError::Transaction(reason),
        other => other,
    }
}

fn to_u64(method: &'static str, value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| WaterError::contract_call(method, format!("{value} does not fit in u64")))
}

use std::future::IntoFuture;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;

use crate::error::{Result, WaterError};

/// General-purpose EVM RPC client bound to one signing account
pub struct EvmRpc {
    provider: DynProvider,
    owner: Address,
    call_timeout: Duration,
}

impl EvmRpc {
    /// Connect to an RPC endpoint with a local signer
    ///
    /// # Arguments
    /// * `rpc_url` - The JSON-RPC endpoint (http, https, ws or wss)
    /// * `signer` - Local key of the orchid owner, see [`parse_signer`]
    /// * `call_timeout` - Deadline applied to every call made through [`EvmRpc::call`]
    pub async fn connect(
        rpc_url: &str,
        signer: PrivateKeySigner,
        call_timeout: Duration,
    ) -> Result<Self> {
        let owner = signer.address();

        let provider = tokio::time::timeout(
            call_timeout,
            ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect(rpc_url),
        )
        .await
        .map_err(|_| WaterError::Timeout {
            operation: "connect",
            after: call_timeout,
        })?
        .map_err(|e| WaterError::Configuration(format!("Failed to connect to {rpc_url}: {e}")))?
        .erased();

        let rpc = Self {
            provider,
            owner,
            call_timeout,
        };

        let chain_id = rpc
            .call("eth_chainId", rpc.provider.get_chain_id())
            .await?;
        tracing::info!(%owner, chain_id, "Connected to RPC endpoint");

        Ok(rpc)
    }

    /// The account transactions are signed with
    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Await an RPC future under the call timeout, mapping failures to
    /// [`WaterError::ContractCall`]
    pub async fn call<T, E, F>(&self, method: &'static str, fut: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.call_timeout, fut.into_future()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(WaterError::contract_call(method, e)),
            Err(_) => Err(WaterError::Timeout {
                operation: method,
                after: self.call_timeout,
            }),
        }
    }

    /// Wait for a submitted transaction to be mined and check it succeeded
    ///
    /// Returns the transaction hash
    pub async fn confirm(
        &self,
        pending: PendingTransactionBuilder<alloy::network::Ethereum>,
        confirm_timeout: Duration,
    ) -> Result<B256> {
        let tx_hash = *pending.tx_hash();
        tracing::debug!(%tx_hash, "Waiting for confirmation");

        let receipt = pending
            .with_timeout(Some(confirm_timeout))
            .get_receipt()
            .await
            .map_err(|e| WaterError::Transaction(format!("{tx_hash}: {e}")))?;

        if !receipt.status() {
            return Err(WaterError::Transaction(format!("{tx_hash} reverted")));
        }

        Ok(receipt.transaction_hash)
    }
}

/// Parse a hex private key into a local signer
pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner> {
    let trimmed = private_key.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| WaterError::Configuration(format!("PRIVATE_KEY is not valid hex: {e}")))?;

    if bytes.len() != 32 {
        return Err(WaterError::Configuration(format!(
            "PRIVATE_KEY must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    PrivateKeySigner::from_slice(&bytes)
        .map_err(|e| WaterError::Configuration(format!("PRIVATE_KEY is not a valid key: {e}")))
}

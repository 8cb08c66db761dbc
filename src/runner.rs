//! Per-token watering loop.
//!
//! [`WateringRunner`] walks every orchid owned by the contract's signer,
//! waters the ones that are due and queues direct messages for dead and
//! freshly watered plants. Tokens are handled one at a time; a failure on
//! one token is logged and the loop moves on to the next.

use std::sync::Arc;

use alloy::primitives::{B256, U256};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::contracts::orchid::OrchidContract;
use crate::discord::Notifier;
use crate::error::{Result, WaterError};
use crate::readiness::{now_epoch_seconds, ready_for_watering, select_gas_limit, OrchidState};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Minimum gas limit for watering transactions
    pub gas_floor: Option<u64>,
    /// Block explorer base URL used in watering notifications
    pub explorer_url: String,
    /// Subtracted from the token id when reading `alive` and `waterLevel`
    pub state_id_offset: u64,
    pub dry_run: bool,
}

/// Who to notify and how
pub struct Recipient<N> {
    pub notifier: Arc<N>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Dead,
    NotReady,
    Watered { tx_hash: B256, gas_limit: u64 },
    /// Ready, but left alone because of `--dry-run`
    WouldWater { gas_limit: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub owned: u64,
    pub dead: u64,
    pub not_ready: u64,
    pub watered: u64,
    pub would_water: u64,
    pub failed: u64,
    /// Set when a shutdown signal stopped the loop early
    pub interrupted: bool,
}

pub struct WateringRunner<C, N> {
    contract: C,
    recipient: Option<Recipient<N>>,
    options: RunnerOptions,
    notifications: JoinSet<()>,
}

impl<C: OrchidContract, N: Notifier> WateringRunner<C, N> {
    pub fn new(contract: C, recipient: Option<Recipient<N>>, options: RunnerOptions) -> Self {
        Self {
            contract,
            recipient,
            options,
            notifications: JoinSet::new(),
        }
    }

    /// Process every owned orchid, then wait for queued notifications
    ///
    /// The shutdown flag is checked before each token. A token whose
    /// watering transaction is already submitted is always seen through.
    pub async fn run(&mut self, shutdown: &watch::Receiver<bool>) -> Result<RunSummary> {
        let owner = self.contract.owner();
        let owned = self.contract.balance_of().await?;
        let growth_cycle = self.contract.growth_cycle().await?;

        tracing::info!(%owner, owned, growth_cycle, "Checking orchids");

        let mut summary = RunSummary {
            owned,
            ..RunSummary::default()
        };

        for index in 0..owned {
            if *shutdown.borrow() {
                tracing::warn!(index, "Shutdown requested, skipping remaining orchids");
                summary.interrupted = true;
                break;
            }

            match self.process_token(index, growth_cycle).await {
                Ok(TokenOutcome::Dead) => summary.dead += 1,
                Ok(TokenOutcome::NotReady) => summary.not_ready += 1,
                Ok(TokenOutcome::WouldWater { .. }) => summary.would_water += 1,
                Ok(TokenOutcome::Watered { .. }) => summary.watered += 1,
                Err(e) if e.is_token_scoped() => {
                    tracing::error!(index, error = %e, "Failed to process orchid");
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.drain_notifications().await;

        tracing::info!(
            owned = summary.owned,
            dead = summary.dead,
            not_ready = summary.not_ready,
            watered = summary.watered,
            would_water = summary.would_water,
            failed = summary.failed,
            "Run complete"
        );

        Ok(summary)
    }

    /// Check a single orchid and water it if it is due
    pub async fn process_token(&mut self, index: u64, growth_cycle: u64) -> Result<TokenOutcome> {
        let token = self.contract.token_of_owner_by_index(index).await?;
        let state_id = self.state_id(token)?;

        let alive = self.contract.alive(state_id, now_epoch_seconds()).await?;
        if !alive {
            tracing::warn!(%token, "Orchid is dead");
            self.notify(format!(
                "CryptOrchid {token} is dead - please compost it so a new bulb can be planted."
            ));
            return Ok(TokenOutcome::Dead);
        }

        let water_level = self.contract.water_level(state_id).await?;
        let planted_at = self.contract.planted_at(token).await?;

        let orchid = OrchidState {
            token,
            alive,
            water_level,
            planted_at,
        };

        if !ready_for_watering(&orchid, growth_cycle, now_epoch_seconds()) {
            tracing::info!(%token, water_level, planted_at, "Orchid does not need water yet");
            return Ok(TokenOutcome::NotReady);
        }

        let now = now_epoch_seconds();
        let estimate = self.contract.estimate_water_gas(token, now).await?;
        let gas_limit = select_gas_limit(estimate, self.options.gas_floor);

        if self.options.dry_run {
            tracing::info!(%token, estimate, gas_limit, "Dry run, not watering");
            return Ok(TokenOutcome::WouldWater { gas_limit });
        }

        let tx_hash = self.contract.water(token, now, gas_limit).await?;
        tracing::info!(%token, %tx_hash, "Orchid watered");

        let explorer = self.options.explorer_url.trim_end_matches('/');
        self.notify(format!(
            "CryptOrchid {token} watered in transaction: {tx_hash}. View on etherscan: {explorer}/tx/{tx_hash}"
        ));

        Ok(TokenOutcome::Watered { tx_hash, gas_limit })
    }

    fn state_id(&self, token: U256) -> Result<U256> {
        token
            .checked_sub(U256::from(self.options.state_id_offset))
            .ok_or_else(|| {
                WaterError::contract_call(
                    "tokenOfOwnerByIndex",
                    format!(
                        "token {token} is below the state id offset {}",
                        self.options.state_id_offset
                    ),
                )
            })
    }

    /// Queue a direct message without waiting for it to be delivered
    fn notify(&mut self, content: String) {
        let Some(recipient) = &self.recipient else {
            return;
        };

        let notifier = Arc::clone(&recipient.notifier);
        let user_id = recipient.user_id.clone();

        self.notifications.spawn(async move {
            match notifier.send_direct_message(&user_id, &content).await {
                Ok(()) => tracing::debug!(%user_id, "Notification sent"),
                Err(e) => tracing::warn!(%user_id, error = %e, "Failed to send notification"),
            }
        });
    }

    async fn drain_notifications(&mut self) {
        while let Some(joined) = self.notifications.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Notification task panicked");
            }
        }
    }
}

//! `orchid-waterer` -- keeps CryptOrchids alive.
//!
//! Reads every orchid owned by the configured account, waters the ones
//! that have lived through more growth cycles than they have been watered,
//! and direct-messages the owner on Discord when an orchid dies or gets
//! watered. Meant to be run periodically (cron, systemd timer).
//!
//! Configuration comes from flags or the environment; a `.env` file in the
//! working directory is loaded first. See `orchid-waterer --help`.

mod config;
mod contracts;
mod discord;
mod error;
mod readiness;
mod rpc;
mod runner;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use contracts::orchid::CryptOrchids;
use discord::DiscordClient;
use rpc::EvmRpc;
use runner::{Recipient, WateringRunner};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchid_waterer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Watering run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    // Local configuration first, so a bad key fails before any network call
    let signer = rpc::parse_signer(&config.private_key)?;

    let recipient = notification_recipient(&config).await?;

    let rpc = EvmRpc::connect(&config.rpc_url, signer, config.rpc_timeout())
        .await
        .context("Failed to connect to RPC endpoint")?;
    let orchids = CryptOrchids::new(rpc, config.contract, config.confirm_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if watch_shutdown(tokio::signal::ctrl_c, shutdown_tx).await {
            tracing::error!("Received second Ctrl-C, exiting immediately");
            std::process::exit(130);
        }
    });

    let mut runner = WateringRunner::new(orchids, recipient, config.runner_options());
    runner
        .run(&shutdown_rx)
        .await
        .context("Failed to read orchids")?;

    Ok(())
}

/// Flag a graceful shutdown on the first signal
///
/// Returns `true` once a second signal arrives, `false` if the signal
/// stream fails.
async fn watch_shutdown<F, Fut>(mut next_signal: F, shutdown: watch::Sender<bool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    tracing::warn!("Received Ctrl-C, finishing current orchid (press again to abort)");
    let _ = shutdown.send(true);

    next_signal().await.is_ok()
}

/// Work out who gets notifications, logging in to Discord if needed
///
/// A configured username is resolved through the server's member list;
/// otherwise the fallback snowflake is used when a bot token is present.
async fn notification_recipient(config: &Config) -> anyhow::Result<Option<Recipient<DiscordClient>>> {
    let api_base = config.discord_api_url.as_str();

    if config.wants_lookup() {
        let (client, user_id) = discord::resolve_recipient(api_base, &config.recipient_settings())
            .await
            .context("Failed to resolve Discord recipient")?;
        return Ok(Some(Recipient {
            notifier: Arc::new(client),
            user_id,
        }));
    }

    let Some(user_id) = config.fallback_snowflake().map(str::to_string) else {
        tracing::info!("No Discord recipient configured, notifications disabled");
        return Ok(None);
    };

    let Some(token) = config.bot_token() else {
        tracing::warn!("DISCORD_SNOWFLAKE set without DISCORD_BOT_TOKEN, notifications disabled");
        return Ok(None);
    };

    let client = DiscordClient::login(api_base, token)
        .await
        .context("Failed to log in to Discord")?;

    match client.fetch_user(&user_id).await {
        Ok(user) => tracing::info!(user = %user.username, id = %user.id, "Notifying fallback recipient"),
        Err(e) => tracing::warn!(id = %user_id, error = %e, "Could not fetch fallback recipient"),
    }

    Ok(Some(Recipient {
        notifier: Arc::new(client),
        user_id,
    }))
}

use std::time::Duration;

use alloy::primitives::Address;
use clap::Parser;

use crate::discord::{self, RecipientSettings};
use crate::runner::RunnerOptions;

const DEFAULT_EXPLORER_URL: &str = "https://rinkeby.etherscan.io";

/// Water every CryptOrchid owned by an account that is due for water
#[derive(Debug, Clone, Parser)]
#[command(name = "orchid-waterer", version)]
pub struct Config {
    /// JSON-RPC endpoint of the chain the contract lives on
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// Hex private key of the orchid owner
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// CryptOrchids contract address
    #[arg(long, env = "ORCHID_CONTRACT")]
    pub contract: Address,

    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    pub discord_bot_token: Option<String>,

    /// Discord user to notify, looked up by name (a `#1234` suffix is ignored)
    #[arg(long, env = "DISCORD_USERNAME")]
    pub discord_username: Option<String>,

    /// Discord server the bot and the user share
    #[arg(long, env = "DISCORD_SERVER_ID")]
    pub discord_server_id: Option<String>,

    /// User id to notify when no username is configured
    #[arg(long, env = "DISCORD_SNOWFLAKE")]
    pub discord_snowflake: Option<String>,

    #[arg(long, env = "DISCORD_API_URL", default_value = discord::API_BASE)]
    pub discord_api_url: String,

    /// Minimum gas limit for watering transactions (empty or 0 for none)
    #[arg(long, env = "GAS_LIMIT", value_parser = parse_gas_limit)]
    pub gas_limit: Option<u64>,

    #[arg(long, env = "EXPLORER_URL", default_value = DEFAULT_EXPLORER_URL)]
    pub explorer_url: String,

    /// Subtracted from token ids when reading `alive` and `waterLevel`
    #[arg(long, env = "STATE_ID_OFFSET", default_value_t = 0)]
    pub state_id_offset: u64,

    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 30)]
    pub rpc_timeout_secs: u64,

    /// How long to wait for a watering transaction to be mined
    #[arg(long, env = "CONFIRM_TIMEOUT_SECS", default_value_t = 300)]
    pub confirm_timeout_secs: u64,

    /// Check orchids and estimate gas without sending transactions
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,
}

impl Config {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Whether the recipient should be looked up by name
    ///
    /// An empty `DISCORD_USERNAME=` line counts as unset.
    pub fn wants_lookup(&self) -> bool {
        non_empty(&self.discord_username).is_some()
    }

    pub fn fallback_snowflake(&self) -> Option<&str> {
        non_empty(&self.discord_snowflake)
    }

    pub fn bot_token(&self) -> Option<&str> {
        non_empty(&self.discord_bot_token)
    }

    pub fn recipient_settings(&self) -> RecipientSettings {
        RecipientSettings {
            server_id: self.discord_server_id.clone(),
            bot_token: self.discord_bot_token.clone(),
            username: self.discord_username.clone(),
        }
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            gas_floor: self.gas_limit.filter(|floor| *floor > 0),
            explorer_url: self.explorer_url.clone(),
            state_id_offset: self.state_id_offset,
            dry_run: self.dry_run,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Gas floor parser; a blank value means no floor
fn parse_gas_limit(value: &str) -> Result<u64, std::num::ParseIntError> {
    match value.trim() {
        "" => Ok(0),
        digits => digits.parse(),
    }
}

/// Parse the base arguments plus `extra` with the process environment ignored
#[cfg(test)]
pub fn parse_for_test(extra: &[&str]) -> Config {
    const ENV_VARS: [&str; 14] = [
        "RPC_URL",
        "PRIVATE_KEY",
        "ORCHID_CONTRACT",
        "DISCORD_BOT_TOKEN",
        "DISCORD_USERNAME",
        "DISCORD_SERVER_ID",
        "DISCORD_SNOWFLAKE",
        "DISCORD_API_URL",
        "GAS_LIMIT",
        "EXPLORER_URL",
        "STATE_ID_OFFSET",
        "RPC_TIMEOUT_SECS",
        "CONFIRM_TIMEOUT_SECS",
        "DRY_RUN",
    ];
    static CLEAR_ENV: std::sync::Once = std::sync::Once::new();
    CLEAR_ENV.call_once(|| {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    });

    let base = [
        "orchid-waterer",
        "--rpc-url",
        "http://localhost:8545",
        "--private-key",
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        "--contract",
        "0x5FbDB2315678afecb367f032d93F642f64180aa3",
    ];
    Config::try_parse_from(base.iter().chain(extra)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = parse_for_test(&[]);
        assert_eq!(config.explorer_url, DEFAULT_EXPLORER_URL);
        assert_eq!(config.discord_api_url, discord::API_BASE);
        assert_eq!(config.state_id_offset, 0);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(30));
        assert_eq!(config.confirm_timeout(), Duration::from_secs(300));
        assert!(!config.dry_run);
        assert!(!config.wants_lookup());
        assert_eq!(config.runner_options().gas_floor, None);
    }

    #[test]
    fn zero_gas_limit_means_no_floor() {
        let options = parse_for_test(&["--gas-limit", "0"]).runner_options();
        assert_eq!(options.gas_floor, None);

        let options = parse_for_test(&["--gas-limit", "250000"]).runner_options();
        assert_eq!(options.gas_floor, Some(250_000));
    }

    #[test]
    fn blank_gas_limit_means_no_floor() {
        let options = parse_for_test(&["--gas-limit", ""]).runner_options();
        assert_eq!(options.gas_floor, None);
    }

    #[test]
    fn garbage_gas_limit_is_rejected() {
        assert!(parse_gas_limit("lots").is_err());
        assert_eq!(parse_gas_limit(" 21000 ").unwrap(), 21_000);
    }

    #[test]
    fn username_triggers_lookup() {
        let config = parse_for_test(&["--discord-username", "name#1234"]);
        assert!(config.wants_lookup());
        assert_eq!(
            config.recipient_settings().username.as_deref(),
            Some("name#1234")
        );
    }

    #[test]
    fn blank_discord_settings_count_as_unset() {
        let config = parse_for_test(&[
            "--discord-username",
            "",
            "--discord-snowflake",
            " ",
            "--discord-bot-token",
            "",
        ]);
        assert!(!config.wants_lookup());
        assert_eq!(config.fallback_snowflake(), None);
        assert_eq!(config.bot_token(), None);
    }

    #[test]
    fn invalid_contract_address_is_rejected() {
        let args = [
            "orchid-waterer",
            "--rpc-url",
            "http://localhost:8545",
            "--private-key",
            "0x01",
            "--contract",
            "not-an-address",
        ];
        assert!(Config::try_parse_from(args).is_err());
    }
}

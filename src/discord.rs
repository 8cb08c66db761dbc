//! Discord REST client used to direct-message the orchid owner.
//!
//! Only the handful of endpoints the runner needs are wrapped: bot login,
//! guild lookup, member search, user lookup and direct messages.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaterError};

pub const API_BASE: &str = "https://discord.com/api/v10";

/// HTTP request timeout for a single Discord call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MEMBER_SEARCH_LIMIT: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Discord returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: User,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
}

#[derive(Serialize)]
struct CreateDm<'a> {
    recipient_id: &'a str,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

/// Something that can deliver a direct message to a user
pub trait Notifier: Send + Sync + 'static {
    fn send_direct_message(
        &self,
        user_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Authenticated Discord bot session
pub struct DiscordClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl DiscordClient {
    /// Log in with a bot token
    ///
    /// Verifies the token against `/users/@me` so a bad token fails the run
    /// before any transaction is sent. `api_base` is normally [`API_BASE`].
    pub async fn login(api_base: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WaterError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        let client = Self {
            http,
            token: token.to_string(),
            base_url: api_base.trim_end_matches('/').to_string(),
        };

        let bot: User = client
            .get("/users/@me")
            .await
            .map_err(|e| WaterError::Configuration(format!("Discord login failed: {e}")))?;
        tracing::info!(bot = %bot.username, "Logged in to Discord");

        Ok(client)
    }

    pub async fn fetch_guild(&self, guild_id: &str) -> Result<Guild, DiscordError> {
        self.get(&format!("/guilds/{guild_id}")).await
    }

    /// Search a guild's members whose username or nickname starts with `query`
    pub async fn search_members(
        &self,
        guild_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Member>, DiscordError> {
        let url = format!("{}/guilds/{guild_id}/members/search", self.base_url);
        let limit = limit.to_string();
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .query(&[("query", query), ("limit", limit.as_str())])
            .send()
            .await?;
        parse(response).await
    }

    pub async fn fetch_user(&self, user_id: &str) -> Result<User, DiscordError> {
        self.get(&format!("/users/{user_id}")).await
    }

    async fn post_message(&self, user_id: &str, content: &str) -> Result<(), DiscordError> {
        let channel: Channel = self
            .post("/users/@me/channels", &CreateDm { recipient_id: user_id })
            .await?;
        let _: serde_json::Value = self
            .post(
                &format!("/channels/{}/messages", channel.id),
                &CreateMessage { content },
            )
            .await?;
        Ok(())
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, DiscordError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;
        parse(response).await
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DiscordError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(body)
            .send()
            .await?;
        parse(response).await
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }
}

impl Notifier for DiscordClient {
    async fn send_direct_message(&self, user_id: &str, content: &str) -> Result<()> {
        self.post_message(user_id, content)
            .await
            .map_err(|e| WaterError::Notification(e.to_string()))
    }
}

async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, DiscordError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DiscordError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// Strip a trailing `#discriminator` from a Discord tag
pub fn member_query(username: &str) -> &str {
    match username.find('#') {
        Some(pos) => &username[..pos],
        None => username,
    }
}

/// Settings needed to look the recipient up by name
#[derive(Debug, Clone, Default)]
pub struct RecipientSettings {
    pub server_id: Option<String>,
    pub bot_token: Option<String>,
    pub username: Option<String>,
}

impl RecipientSettings {
    /// Fail on the first unset setting, in the order the variables are documented
    fn require(&self) -> Result<(&str, &str, &str)> {
        Ok((
            required(&self.server_id, "DISCORD_SERVER_ID")?,
            required(&self.bot_token, "DISCORD_BOT_TOKEN")?,
            required(&self.username, "DISCORD_USERNAME")?,
        ))
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WaterError::Configuration(format!("{name} not set")))
}

/// Log in and find the snowflake of the configured user
///
/// Returns the live session alongside the id so the same session can be
/// used to send notifications for the rest of the run.
pub async fn resolve_recipient(
    api_base: &str,
    settings: &RecipientSettings,
) -> Result<(DiscordClient, String)> {
    let (server_id, bot_token, username) = settings.require()?;

    let client = DiscordClient::login(api_base, bot_token).await?;

    let guild = client
        .fetch_guild(server_id)
        .await
        .map_err(|e| WaterError::Lookup(format!("Failed to fetch server {server_id}: {e}")))?;

    let query = member_query(username);
    tracing::debug!(guild = %guild.name, query, "Searching server members");

    let members = client
        .search_members(&guild.id, query, MEMBER_SEARCH_LIMIT)
        .await
        .map_err(|e| WaterError::Lookup(format!("Member search failed: {e}")))?;

    let member = members.into_iter().next().ok_or_else(|| {
        WaterError::Lookup(
            "User snowflake not found - make sure you've invited your bot to a server that you're in."
                .to_string(),
        )
    })?;

    tracing::info!(user = %member.user.username, id = %member.user.id, "Resolved notification recipient");

    Ok((client, member.user.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_is_dropped_from_query() {
        assert_eq!(member_query("name#1234"), "name");
    }

    #[test]
    fn plain_username_is_kept() {
        assert_eq!(member_query("orchidlover"), "orchidlover");
    }

    #[test]
    fn everything_after_first_hash_is_dropped() {
        assert_eq!(member_query("we#ird#0001"), "we");
    }

    fn full_settings() -> RecipientSettings {
        RecipientSettings {
            server_id: Some("81384788765712384".into()),
            bot_token: Some("token".into()),
            username: Some("name#1234".into()),
        }
    }

    #[tokio::test]
    async fn missing_server_id_is_a_configuration_error() {
        let settings = RecipientSettings {
            server_id: None,
            ..full_settings()
        };
        let err = resolve_recipient(API_BASE, &settings).await.err().unwrap();
        assert!(matches!(err, WaterError::Configuration(ref m) if m == "DISCORD_SERVER_ID not set"));
    }

    #[tokio::test]
    async fn missing_bot_token_is_a_configuration_error() {
        let settings = RecipientSettings {
            bot_token: None,
            ..full_settings()
        };
        let err = resolve_recipient(API_BASE, &settings).await.err().unwrap();
        assert!(matches!(err, WaterError::Configuration(ref m) if m == "DISCORD_BOT_TOKEN not set"));
    }

    #[test]
    fn empty_username_counts_as_unset() {
        let settings = RecipientSettings {
            username: Some(String::new()),
            ..full_settings()
        };
        let err = settings.require().unwrap_err();
        assert_eq!(err.to_string(), "DISCORD_USERNAME not set");
    }

    #[test]
    fn http_status_error_display() {
        let err = DiscordError::HttpStatus {
            status: 403,
            body: "Missing Access".into(),
        };
        assert_eq!(err.to_string(), "Discord returned HTTP 403: Missing Access");
    }

    async fn mock_login(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", "/users/@me")
            .match_header("authorization", "Bot token")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1","username":"waterbot"}"#)
            .create_async()
            .await
    }

    async fn mock_guild(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", "/guilds/81384788765712384")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"81384788765712384","name":"Orchid Growers"}"#)
            .create_async()
            .await
    }

    async fn mock_search(server: &mut mockito::ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("GET", "/guilds/81384788765712384/members/search")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("query".into(), "name".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "1".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn resolves_first_matching_member() {
        let mut server = mockito::Server::new_async().await;
        let login = mock_login(&mut server).await;
        let guild = mock_guild(&mut server).await;
        let search = mock_search(
            &mut server,
            r#"[{"user":{"id":"175928847299117063","username":"name"}}]"#,
        )
        .await;

        let (_client, user_id) = resolve_recipient(&server.url(), &full_settings())
            .await
            .unwrap();

        assert_eq!(user_id, "175928847299117063");
        login.assert_async().await;
        guild.assert_async().await;
        search.assert_async().await;
    }

    #[tokio::test]
    async fn no_matching_member_is_a_lookup_error() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _guild = mock_guild(&mut server).await;
        let search = mock_search(&mut server, "[]").await;

        let err = resolve_recipient(&server.url(), &full_settings())
            .await
            .err()
            .unwrap();

        search.assert_async().await;
        assert!(matches!(
            err,
            WaterError::Lookup(ref m)
                if m == "User snowflake not found - make sure you've invited your bot to a server that you're in."
        ));
    }

    #[tokio::test]
    async fn rejected_token_is_a_configuration_error() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("GET", "/users/@me")
            .with_status(401)
            .with_body(r#"{"message":"401: Unauthorized","code":0}"#)
            .create_async()
            .await;

        let err = DiscordClient::login(&server.url(), "bad").await.err().unwrap();

        assert!(matches!(err, WaterError::Configuration(ref m) if m.contains("HTTP 401")));
    }

    #[tokio::test]
    async fn direct_message_goes_to_created_channel() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let open_dm = server
            .mock("POST", "/users/@me/channels")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({ "recipient_id": "175928847299117063" }),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"999"}"#)
            .create_async()
            .await;
        let message = server
            .mock("POST", "/channels/999/messages")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({ "content": "CryptOrchid 3 is dead" }),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1000"}"#)
            .create_async()
            .await;

        let client = DiscordClient::login(&server.url(), "token").await.unwrap();
        client
            .send_direct_message("175928847299117063", "CryptOrchid 3 is dead")
            .await
            .unwrap();

        open_dm.assert_async().await;
        message.assert_async().await;
    }

    #[tokio::test]
    async fn failed_delivery_is_a_notification_error() {
        let mut server = mockito::Server::new_async().await;
        let _login = mock_login(&mut server).await;
        let _open_dm = server
            .mock("POST", "/users/@me/channels")
            .with_status(403)
            .with_body("Cannot send messages to this user")
            .create_async()
            .await;

        let client = DiscordClient::login(&server.url(), "token").await.unwrap();
        let err = client.send_direct_message("42", "hello").await.unwrap_err();

        assert!(matches!(err, WaterError::Notification(ref m) if m.contains("HTTP 403")));
    }
}

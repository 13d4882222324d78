use chrono::NaiveDate;
use log::warn;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{ComLensError, Result};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 5;
const MEMBER_PAGE_SIZE: usize = 1000;

// The analytics endpoints only answer to session-shaped requests.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Session-derived headers for the guild analytics endpoints. These come from
/// a logged-in developer-portal session, not a public API contract.
#[derive(Debug, Clone)]
pub struct SessionHeaders {
    pub authorization: String,
    pub cookie: String,
    pub x_track: String,
}

/// One channel-interval observation from the engagement analytics endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EngagementEntry {
    pub interval_start_timestamp: String,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(deserialize_with = "snowflake")]
    pub channel_id: i64,
    pub participators: i64,
    pub communicators: i64,
    pub messages_sent: f64,
    pub pct_participated_in_channel: f64,
    pub pct_communicated_in_channel: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRole {
    #[serde(deserialize_with = "snowflake")]
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMember {
    pub user: MemberUser,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberUser {
    pub id: String,
}

/// Discord ids arrive as strings in most payloads and numbers in a few;
/// accept both.
fn snowflake<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

pub struct DiscordClient {
    client: Client,
    base_url: Url,
}

impl DiscordClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ComLensError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| ComLensError::Config(format!("Invalid base URL: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Fetch channel engagement observations for one channel kind (`text` or
    /// `voice`) over a date window.
    pub async fn fetch_engagement(
        &self,
        guild_id: &str,
        kind: &str,
        start: NaiveDate,
        end: NaiveDate,
        session: &SessionHeaders,
    ) -> Result<Vec<EngagementEntry>> {
        let mut url = self
            .base_url
            .join(&format!(
                "api/v9/guilds/{guild_id}/analytics/engagement/{kind}-channels"
            ))
            .map_err(|e| ComLensError::Config(format!("Invalid engagement URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("start", &start.format("%Y-%m-%d").to_string())
            .append_pair("end", &end.format("%Y-%m-%d").to_string())
            .append_pair("interval", "1");

        let referer = format!(
            "{}developers/servers/{guild_id}/analytics/engagement",
            self.base_url
        );

        let response = self
            .get_with_retry(url, |request| {
                request
                    .header("Accept", "*/*")
                    .header("Authorization", &session.authorization)
                    .header("Cookie", &session.cookie)
                    .header("X-Track", &session.x_track)
                    .header("Referer", &referer)
                    .header("User-Agent", BROWSER_USER_AGENT)
            })
            .await?;

        Ok(response.json().await?)
    }

    /// Fetch every role defined in a guild (bot token endpoint).
    pub async fn fetch_roles(&self, guild_id: &str, bot_token: &Token) -> Result<Vec<GuildRole>> {
        let url = self
            .base_url
            .join(&format!("api/v10/guilds/{guild_id}/roles"))
            .map_err(|e| ComLensError::Config(format!("Invalid roles URL: {e}")))?;

        let auth = format!("Bot {}", bot_token.as_str());
        let response = self
            .get_with_retry(url, |request| request.header("Authorization", &auth))
            .await?;

        Ok(response.json().await?)
    }

    /// Fetch every guild member through the snowflake-cursor pagination of
    /// the members endpoint: each page's last user id becomes the `after`
    /// cursor, and a short page ends the loop.
    pub async fn fetch_members(
        &self,
        guild_id: &str,
        bot_token: &Token,
    ) -> Result<Vec<GuildMember>> {
        let auth = format!("Bot {}", bot_token.as_str());
        let mut members = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut url = self
                .base_url
                .join(&format!("api/v10/guilds/{guild_id}/members"))
                .map_err(|e| ComLensError::Config(format!("Invalid members URL: {e}")))?;
            url.query_pairs_mut()
                .append_pair("limit", &MEMBER_PAGE_SIZE.to_string());
            if let Some(after) = &after {
                url.query_pairs_mut().append_pair("after", after);
            }

            let response = self
                .get_with_retry(url, |request| request.header("Authorization", &auth))
                .await?;
            let page: Vec<GuildMember> = response.json().await?;
            let page_len = page.len();

            after = page.last().map(|member| member.user.id.clone());
            members.extend(page);

            if page_len < MEMBER_PAGE_SIZE {
                break;
            }
        }

        Ok(members)
    }

    async fn get_with_retry(
        &self,
        url: Url,
        decorate: impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempts = 0;
        loop {
            let request = decorate(self.client.get(url.clone()));

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!(
                        "Attempt {attempts}/{MAX_ATTEMPTS} failed ({e}). Retrying in {RETRY_DELAY_SECONDS}s..."
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if !status.is_success() {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(ComLensError::ApiAfterRetries {
                        status: status.as_u16(),
                        attempts: MAX_ATTEMPTS,
                    });
                }
                warn!(
                    "Attempt {attempts}/{MAX_ATTEMPTS} failed with status {status}. Retrying in {RETRY_DELAY_SECONDS}s..."
                );
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                continue;
            }

            return Ok(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn session() -> SessionHeaders {
        SessionHeaders {
            authorization: "session-auth".to_string(),
            cookie: "session-cookie".to_string(),
            x_track: "session-track".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_engagement_parses_entries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/api/v9/guilds/898/analytics/engagement/text-channels",
            )
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "2024-01-01".into()),
                Matcher::UrlEncoded("interval".into(), "1".into()),
            ]))
            .match_header("Authorization", "session-auth")
            .with_status(200)
            .with_body(
                json!([{
                    "interval_start_timestamp": "2024-01-01T00:00:00+00:00",
                    "channel_name": "💬・general",
                    "channel_id": "123456789",
                    "participators": 10,
                    "communicators": 4,
                    "messages_sent": 55.0,
                    "pct_participated_in_channel": 0.4,
                    "pct_communicated_in_channel": 0.2
                }])
                .to_string(),
            )
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url()).unwrap();
        let entries = client
            .fetch_engagement(
                "898",
                "text",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                &session(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].channel_id, 123456789);
        assert_eq!(entries[0].participators, 10);
    }

    #[tokio::test]
    async fn test_fetch_members_follows_snowflake_cursor() {
        let mut server = mockito::Server::new_async().await;

        let full_page: Vec<_> = (0..MEMBER_PAGE_SIZE)
            .map(|i| json!({"user": {"id": i.to_string()}, "roles": []}))
            .collect();
        let page1 = server
            .mock("GET", "/api/v10/guilds/898/members")
            .match_query(Matcher::Exact(format!("limit={MEMBER_PAGE_SIZE}")))
            .with_status(200)
            .with_body(json!(full_page).to_string())
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/api/v10/guilds/898/members")
            .match_query(Matcher::Exact(format!(
                "limit={MEMBER_PAGE_SIZE}&after=999"
            )))
            .with_status(200)
            .with_body(
                json!([
                    {"user": {"id": "1000"}, "roles": ["42"]},
                    {"user": {"id": "1001"}, "roles": []}
                ])
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url()).unwrap();
        let members = client
            .fetch_members("898", &Token::from("bot-token"))
            .await
            .unwrap();

        page1.assert_async().await;
        page2.assert_async().await;
        assert_eq!(members.len(), MEMBER_PAGE_SIZE + 2);
        assert_eq!(members.last().unwrap().user.id, "1001");
    }

    #[tokio::test]
    async fn test_fetch_roles_requires_bot_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v10/guilds/898/roles")
            .match_header("Authorization", "Bot bot-token")
            .with_status(200)
            .with_body(
                json!([
                    {"id": "898", "name": "@everyone"},
                    {"id": "42", "name": "builders"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = DiscordClient::new(&server.url()).unwrap();
        let roles = client
            .fetch_roles("898", &Token::from("bot-token"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[1].id, 42);
        assert_eq!(roles[1].name, "builders");
    }

    // One transient 502, then a healthy 200 on the retry. The healthy mock is
    // swapped in while the client sits out its 5s delay, so this test takes
    // about five seconds.
    #[tokio::test]
    async fn test_fetch_roles_recovers_after_transient_failure() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/api/v10/guilds/898/roles")
            .with_status(502)
            .with_body("Bad Gateway")
            .expect(1)
            .create_async()
            .await;

        let url = server.url();
        let handle = tokio::spawn(async move {
            let client = DiscordClient::new(&url).unwrap();
            client.fetch_roles("898", &Token::from("bot-token")).await
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        failing.assert_async().await;
        failing.remove_async().await;
        let healthy = server
            .mock("GET", "/api/v10/guilds/898/roles")
            .with_status(200)
            .with_body(json!([{"id": "42", "name": "builders"}]).to_string())
            .expect(1)
            .create_async()
            .await;

        let roles = handle.await.unwrap().unwrap();
        healthy.assert_async().await;
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "builders");
    }
}

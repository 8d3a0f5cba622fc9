use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// 2015-01-01T00:00:00Z in unix milliseconds; discord snowflakes count from
/// here rather than the unix epoch.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// One roster member's lookup outcome. A member the guild has never heard of
/// is recorded as an explicit miss so "looked up and absent" stays
/// distinguishable from "never looked up".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MemberRecord {
    Found(MemberData),
    Missing(MemberMiss),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberData {
    pub username: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "joinedAt")]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberMiss {
    pub error: MissReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    NotFound,
}

/// An authenticated channel to the discord REST api, scoped to one guild.
///
/// The session lives for exactly one fetch phase: establish, iterate the
/// member lookups, close. Establishing validates both the bot credential and
/// the configured guild up front so a bad deployment fails before any member
/// traffic is sent.
#[derive(Debug)]
pub struct DiscordSession {
    http: reqwest::Client,
    pub bot_username: String,
    pub guild_id: u64,
    pub guild_name: String,
}

impl DiscordSession {
    #[instrument(skip(token))]
    pub async fn establish(token: &str, guild_id: &str) -> DiscordResult<Self> {
        let guild_id: u64 = guild_id
            .parse()
            .map_err(|_| DiscordErr::InvalidGuildId(guild_id.to_string()))?;

        let mut headers = http::HeaderMap::new();
        let auth = http::HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| DiscordErr::AuthenticationFailed)?;
        headers.insert(http::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let me_res = http
            .get(format!("{DISCORD_API_BASE}/users/@me"))
            .send()
            .await?;
        if !me_res.status().is_success() {
            tracing::error!(code = %me_res.status(), "bot credential rejected");
            return Err(DiscordErr::AuthenticationFailed);
        }
        let me: BotUser = me_res.json().await?;

        let guild_res = http
            .get(format!("{DISCORD_API_BASE}/guilds/{guild_id}"))
            .send()
            .await?;
        if !guild_res.status().is_success() {
            tracing::error!(guild_id, code = %guild_res.status(), "guild lookup failed");
            return Err(DiscordErr::GuildNotFound(guild_id));
        }
        let guild: Guild = guild_res.json().await?;

        tracing::info!(
            bot = me.username,
            guild = guild.name,
            "discord session established"
        );

        Ok(Self {
            http,
            bot_username: me.username,
            guild_id,
            guild_name: guild.name,
        })
    }

    #[instrument(skip(self))]
    /// One membership lookup. A 404 is a "looked up and absent" result rather
    /// than an error; anything else non-2xx is a per-id transport failure.
    pub async fn fetch_member(&self, user_id: u64) -> DiscordResult<Option<MemberData>> {
        let uri = format!(
            "{DISCORD_API_BASE}/guilds/{}/members/{user_id}",
            self.guild_id
        );
        let res = self.http.get(uri).send().await?;
        let status = res.status();

        if status == StatusCode::NOT_FOUND {
            Ok(None)
        } else if status.is_success() {
            let member: GuildMember = res.json().await?;
            Ok(Some(member.into_data(user_id)))
        } else {
            Err(DiscordErr::FetchErr(status.to_string()))
        }
    }

    #[instrument(skip(self, target_ids), fields(target_count = target_ids.len()))]
    /// Iterates the target id set, one lookup per id, isolating every per-id
    /// failure so the loop always runs to the end of the set.
    pub async fn fetch_members(&self, target_ids: &[String]) -> HashMap<String, MemberRecord> {
        let mut members = HashMap::new();

        for raw_id in target_ids {
            let Ok(user_id) = raw_id.parse::<u64>() else {
                tracing::warn!(raw_id, "skipping non-numeric discord id");
                continue;
            };

            match self.fetch_member(user_id).await {
                Ok(Some(data)) => {
                    members.insert(raw_id.clone(), MemberRecord::Found(data));
                }
                Ok(None) => {
                    tracing::warn!(user_id, "member not found, they may have left the guild");
                    members.insert(
                        raw_id.clone(),
                        MemberRecord::Missing(MemberMiss {
                            error: MissReason::NotFound,
                        }),
                    );
                }
                Err(e) => {
                    tracing::error!(user_id, error = ?e, "member fetch failed, id left unresolved");
                }
            }
        }

        let found = members
            .values()
            .filter(|record| matches!(record, MemberRecord::Found(_)))
            .count();
        tracing::info!(
            found,
            total = target_ids.len(),
            "member fetch loop complete"
        );

        members
    }

    #[instrument(skip(self))]
    pub fn close(self) {
        tracing::info!(
            bot = self.bot_username,
            guild = self.guild_name,
            "discord session closed"
        );
    }
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Guild {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    user: GuildMemberUser,
    nick: Option<String>,
    joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GuildMemberUser {
    username: String,
    global_name: Option<String>,
}

impl GuildMember {
    /// Display precedence on discord: guild nickname over global name; the
    /// login username is carried separately.
    fn into_data(self, user_id: u64) -> MemberData {
        MemberData {
            display_name: self.nick.or(self.user.global_name),
            username: self.user.username,
            created_at: snowflake_created_at(user_id),
            joined_at: self.joined_at,
        }
    }
}

/// A discord snowflake carries its creation instant in the upper bits:
/// milliseconds since [`DISCORD_EPOCH_MS`], shifted left 22.
pub fn snowflake_created_at(id: u64) -> DateTime<Utc> {
    let ms = (id >> 22) as i64 + DISCORD_EPOCH_MS;

    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub type DiscordResult<T> = core::result::Result<T, DiscordErr>;

#[derive(Debug, Error)]
pub enum DiscordErr {
    #[error("failed to authenticate the bot credential with discord")]
    AuthenticationFailed,

    #[error("cannot find guild with id {0}")]
    GuildNotFound(u64),

    #[error("guild id '{0}' is not a numeric discord id")]
    InvalidGuildId(String),

    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("error during discord fetch: {0}")]
    FetchErr(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_snowflake_created_at() {
        // reference snowflake from the discord developer docs
        let created = snowflake_created_at(175_928_847_299_117_063);
        assert_eq!(created.to_rfc3339(), "2016-04-30T11:18:25.796+00:00");
    }

    #[test]
    fn test_display_name_precedence() {
        let member = GuildMember {
            user: GuildMemberUser {
                username: String::from("login_name"),
                global_name: Some(String::from("Global Name")),
            },
            nick: Some(String::from("Guild Nick")),
            joined_at: None,
        };
        assert_eq!(
            member.into_data(1).display_name.as_deref(),
            Some("Guild Nick")
        );

        let member = GuildMember {
            user: GuildMemberUser {
                username: String::from("login_name"),
                global_name: Some(String::from("Global Name")),
            },
            nick: None,
            joined_at: None,
        };
        assert_eq!(
            member.into_data(1).display_name.as_deref(),
            Some("Global Name")
        );

        let member = GuildMember {
            user: GuildMemberUser {
                username: String::from("login_name"),
                global_name: None,
            },
            nick: None,
            joined_at: None,
        };
        assert_eq!(member.into_data(1).display_name, None);
    }

    #[test]
    fn test_member_record_serde_round_trip() {
        let found = MemberRecord::Found(MemberData {
            username: String::from("alpha"),
            display_name: Some(String::from("Alpha")),
            created_at: snowflake_created_at(175_928_847_299_117_063),
            joined_at: None,
        });
        let missing = MemberRecord::Missing(MemberMiss {
            error: MissReason::NotFound,
        });

        let found_json = serde_json::to_string(&found).unwrap();
        let missing_json = serde_json::to_string(&missing).unwrap();

        assert_eq!(missing_json, r#"{"error":"not_found"}"#);
        assert_eq!(serde_json::from_str::<MemberRecord>(&found_json).unwrap(), found);
        assert_eq!(
            serde_json::from_str::<MemberRecord>(&missing_json).unwrap(),
            missing
        );
    }
}

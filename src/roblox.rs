use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

pub struct Roblox;
impl Roblox {
    #[instrument(skip(usernames), fields(username_count = usernames.len()))]
    /// Resolves roblox usernames to their numeric ids in one batched call.
    ///
    /// Matching is case-insensitive and the returned map is keyed by the
    /// lowercased requested username. Usernames the service does not know are
    /// simply absent from the result. A transport failure resolves to an empty
    /// map so the rest of the refresh proceeds without game-platform data.
    pub async fn resolve_usernames(usernames: &[String]) -> HashMap<String, u64> {
        if usernames.is_empty() {
            return HashMap::new();
        }

        match Self::request_ids(usernames).await {
            Ok(resolved) => {
                tracing::debug!(resolved_count = resolved.len(), "resolved roblox ids");
                resolved
            }
            Err(e) => {
                tracing::error!(error = ?e, "roblox id resolution failed, rows get no game id");
                HashMap::new()
            }
        }
    }

    #[instrument(skip(usernames))]
    async fn request_ids(usernames: &[String]) -> RobloxResult<HashMap<String, u64>> {
        let uri = format!("{ROBLOX_USERS_BASE}/usernames/users");
        let payload = json!({
            "usernames": usernames,
            "excludeBannedUsers": true,
        });

        let res = reqwest::Client::new()
            .post(uri)
            .json(&payload)
            .send()
            .await?;

        if res.status() != 200 {
            return Err(RobloxErr::FetchErr(res.status().to_string()));
        }

        let body: RobloxDataResponse<ResolvedUsername> = res.json().await?;
        Ok(body
            .data
            .into_iter()
            .map(|user| (user.requested_username.to_lowercase(), user.id))
            .collect())
    }

    #[instrument(skip(ids), fields(id_count = ids.len()))]
    /// Fetches avatar urls and creation dates for the given ids.
    ///
    /// Avatars arrive in batches of at most 100 ids; creation dates are one
    /// call per id. Both sides sleep briefly between requests to stay under
    /// the platform rate limits, and every per-id failure is isolated to that
    /// id. Empty input issues no calls at all.
    pub async fn fetch_profiles(ids: &[u64]) -> HashMap<u64, RobloxProfile> {
        if ids.is_empty() {
            return HashMap::new();
        }

        let avatars = Self::fetch_avatar_urls(ids).await;
        let mut profiles = HashMap::with_capacity(ids.len());

        for (i, id) in ids.iter().copied().enumerate() {
            if i > 0 {
                tokio::time::sleep(PROFILE_CALL_DELAY).await;
            }

            let created_at = match Self::fetch_creation_date(id).await {
                Ok(created) => created,
                Err(e) => {
                    tracing::warn!(id, error = ?e, "creation date fetch failed");
                    None
                }
            };

            profiles.insert(
                id,
                RobloxProfile {
                    id,
                    created_at,
                    avatar_url: avatars.get(&id).cloned(),
                },
            );
        }

        tracing::debug!(profile_count = profiles.len(), "roblox profiles fetched");
        profiles
    }

    #[instrument(skip(ids), fields(id_count = ids.len()))]
    async fn fetch_avatar_urls(ids: &[u64]) -> HashMap<u64, String> {
        let mut avatar_map = HashMap::new();
        let batches = build_avatar_batches(ids);

        for (i, params) in batches.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(AVATAR_BATCH_DELAY).await;
            }

            let uri = format!("{ROBLOX_THUMBNAILS_BASE}/users/avatar-headshot{params}");
            match Self::fetch::<RobloxDataResponse<AvatarEntry>>(uri).await {
                Ok(batch) => {
                    avatar_map.extend(
                        batch
                            .data
                            .into_iter()
                            .map(|avatar| (avatar.target_id, avatar.image_url)),
                    );
                }
                Err(e) => {
                    tracing::warn!(batch_idx = i, error = ?e, "avatar batch failed, its ids stay unresolved");
                }
            }
        }

        avatar_map
    }

    async fn fetch_creation_date(id: u64) -> RobloxResult<Option<DateTime<Utc>>> {
        let uri = format!("{ROBLOX_USERS_BASE}/users/{id}");
        let profile: UserDetails = Self::fetch(uri).await?;

        Ok(profile.created)
    }

    #[instrument(skip(uri))]
    /// Performs a GET request and parses the response into the specified `T`
    async fn fetch<T>(uri: String) -> RobloxResult<T>
    where
        T: DeserializeOwned,
    {
        let res = reqwest::Client::new().get(&uri).send().await?;

        if res.status() != 200 {
            let status_code = res.status();
            tracing::error!(code = %status_code, uri, "non-200/OK response");
            return Err(RobloxErr::FetchErr(status_code.to_string()));
        }

        Ok(res.json::<T>().await?)
    }
}

#[instrument(skip(ids), fields(id_count = ids.len()))]
/// Splits ids into avatar-endpoint query strings of at most 100 ids each,
/// carrying the fixed size/format parameters.
pub fn build_avatar_batches(ids: &[u64]) -> Vec<String> {
    ids.chunks(MAX_AVATAR_BATCH)
        .map(|chunk| {
            let joined = chunk
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");

            format!("?userIds={joined}&size={AVATAR_SIZE}&format=Png&isCircular=false")
        })
        .collect()
}

pub const ROBLOX_USERS_BASE: &str = "https://users.roblox.com/v1";
pub const ROBLOX_THUMBNAILS_BASE: &str = "https://thumbnails.roblox.com/v1";
pub const AVATAR_SIZE: &str = "150x150";

const MAX_AVATAR_BATCH: usize = 100;
const AVATAR_BATCH_DELAY: Duration = Duration::from_millis(250);
const PROFILE_CALL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Deserialize)]
pub struct RobloxDataResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedUsername {
    #[serde(rename = "requestedUsername")]
    pub requested_username: String,
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvatarEntry {
    #[serde(rename = "targetId")]
    pub target_id: u64,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UserDetails {
    created: Option<DateTime<Utc>>,
}

/// The per-id slice of game-platform data a refresh carries forward. Fetched
/// fresh on every refresh; a failed field is `None`, never stale.
#[derive(Debug, Clone, PartialEq)]
pub struct RobloxProfile {
    pub id: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub avatar_url: Option<String>,
}

pub type RobloxResult<T> = core::result::Result<T, RobloxErr>;

#[derive(Debug, Error)]
pub enum RobloxErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("error during roblox fetch: {0}")]
    FetchErr(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_avatar_batches_chunked_at_100() {
        let ids: Vec<u64> = (1..=250).collect();
        let batches = build_avatar_batches(&ids);

        assert_eq!(batches.len(), 3);

        let batch_sizes: Vec<usize> = batches
            .iter()
            .map(|batch| {
                let ids_param = batch
                    .strip_prefix("?userIds=")
                    .and_then(|rest| rest.split('&').next())
                    .unwrap();
                ids_param.split(',').count()
            })
            .collect();

        assert_eq!(batch_sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_avatar_batch_params() {
        let batches = build_avatar_batches(&[42, 7]);

        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            "?userIds=42,7&size=150x150&format=Png&isCircular=false"
        );
    }

    #[test]
    fn test_avatar_batches_empty_input() {
        assert!(build_avatar_batches(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_profiles_empty_input_issues_no_calls() {
        // nothing to resolve must be a pure no-op; a network call here would
        // hang the offline test runner
        let profiles = Roblox::fetch_profiles(&[]).await;
        assert!(profiles.is_empty());

        let resolved = Roblox::resolve_usernames(&[]).await;
        assert!(resolved.is_empty());
    }
}

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Json, debug_handler};
use serde::Deserialize;
use tracing::instrument;

use crate::api::server::{AppState, JsonResult, RouteError};
use crate::reconcile::MergedRecord;
use crate::refresh::{self, RefreshErr, RefreshSummary};

#[instrument(skip(state))]
pub async fn roster_all(State(state): State<Arc<AppState>>) -> JsonResult<Vec<MergedRecord>> {
    match state.store.read_combined()? {
        Some(records) => Ok(Json(records)),
        None => Err(RouteError::NoSnapshot),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
}

#[instrument(skip(state))]
pub async fn roster_search(
    Query(params): Query<SearchParams>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<Vec<MergedRecord>> {
    let records = state.store.read_combined()?.ok_or(RouteError::NoSnapshot)?;
    let query = params.q.to_lowercase();

    let matched: Vec<MergedRecord> = records
        .into_iter()
        .filter(|record| record_matches(record, &query))
        .collect();

    Ok(Json(matched))
}

/// Case-insensitive substring match over both usernames and the display name.
fn record_matches(record: &MergedRecord, query: &str) -> bool {
    record.discord_username.to_lowercase().contains(query)
        || record.discord_display_name.to_lowercase().contains(query)
        || record
            .roblox_username
            .as_ref()
            .is_some_and(|name| name.to_lowercase().contains(query))
}

#[instrument(skip(state))]
#[debug_handler]
/// Runs a full refresh synchronously; the triggering operator waits for the
/// summary (or the failure). A refresh already in flight is a 409, not a
/// second pipeline.
pub async fn trigger_refresh(State(state): State<Arc<AppState>>) -> JsonResult<RefreshSummary> {
    let Some(_permit) = state.refresh_gate.try_begin() else {
        return Err(RouteError::RefreshError(RefreshErr::AlreadyRunning));
    };

    let summary = refresh::run_refresh(&state.store).await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reconcile::AVATAR_PLACEHOLDER;

    fn record(discord: &str, display: &str, roblox: Option<&str>) -> MergedRecord {
        MergedRecord {
            discord_username: discord.to_string(),
            discord_display_name: display.to_string(),
            discord_id: String::from("1"),
            discord_join_date: None,
            discord_creation_date: None,
            roblox_username: roblox.map(str::to_string),
            roblox_id: None,
            roblox_creation_date: None,
            roblox_avatar_url: AVATAR_PLACEHOLDER.to_string(),
        }
    }

    #[test]
    fn test_record_matches_all_name_fields() {
        let rec = record("alpha", "The Boss", Some("AlphaRbx"));

        assert!(record_matches(&rec, "alph"));
        assert!(record_matches(&rec, "boss"));
        assert!(record_matches(&rec, "alpharbx"));
        assert!(!record_matches(&rec, "charlie"));
    }

    #[test]
    fn test_record_matches_handles_absent_roblox_name() {
        let rec = record("alpha", "Alpha", None);

        assert!(!record_matches(&rec, "rbx"));
        assert!(record_matches(&rec, ""));
    }
}

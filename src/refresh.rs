use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::discord::{DiscordErr, DiscordSession, MemberRecord};
use crate::roblox::Roblox;
use crate::roster::{self, RosterErr};
use crate::snapshot::{SnapshotErr, SnapshotStore};
use crate::util::env::{EnvErr, Var};
use crate::var;

/// What one refresh run did, reported back to the operator who triggered it.
/// Row-isolated failures show up here as count gaps, not as errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub roster_entries: usize,
    pub members_found: usize,
    pub members_missing: usize,
    pub roblox_resolved: usize,
    pub records_written: usize,
}

/// Hands out at most one refresh permit at a time. Two concurrent refreshes
/// would interleave writes to the snapshot files, so a second trigger is
/// rejected while a permit is live, never queued.
#[derive(Debug, Default)]
pub struct RefreshGate {
    busy: AtomicBool,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<RefreshPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshPermit { gate: self })
    }
}

#[derive(Debug)]
pub struct RefreshPermit<'a> {
    gate: &'a RefreshGate,
}

impl Drop for RefreshPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[instrument(skip(store))]
/// Runs the full pipeline: roster -> discord members -> roblox identities ->
/// merge -> snapshot. Everything before the final `write_combined` leaves the
/// previous snapshot untouched, so a fatal abort never half-updates the cache.
pub async fn run_refresh(store: &SnapshotStore) -> RefreshResult<RefreshSummary> {
    let run_id = Uuid::new_v4();
    tracing::info!(%run_id, "starting full roster refresh");

    let bot_token = var!(Var::BotToken).await?;
    let guild_id = var!(Var::GuildId).await?;
    let roster_path = var!(Var::RosterPath).await?;

    let entries = roster::load_roster(roster_path)?;
    let target_ids: Vec<String> = entries.iter().map(|e| e.discord_id.clone()).collect();

    tracing::info!(%run_id, member_count = target_ids.len(), "fetching discord members");
    let session = DiscordSession::establish(bot_token, guild_id).await?;
    let members = session.fetch_members(&target_ids).await;

    // teardown must happen whether or not the intermediate persist succeeds
    let persisted = store.write_members(&members);
    session.close();
    persisted?;

    tracing::info!(%run_id, "resolving roblox identities");
    let usernames = roster::roblox_usernames(&entries);
    let id_map = Roblox::resolve_usernames(&usernames).await;

    let mut resolved_ids: Vec<u64> = id_map.values().copied().collect();
    resolved_ids.sort_unstable();
    resolved_ids.dedup();

    let profiles = Roblox::fetch_profiles(&resolved_ids).await;

    tracing::info!(%run_id, "merging and persisting snapshot");
    let merged = crate::reconcile::merge_records(&entries, &members, &id_map, &profiles);
    store.write_combined(&merged)?;

    let members_found = members
        .values()
        .filter(|r| matches!(r, MemberRecord::Found(_)))
        .count();
    let summary = RefreshSummary {
        run_id,
        roster_entries: entries.len(),
        members_found,
        members_missing: members.len() - members_found,
        roblox_resolved: id_map.len(),
        records_written: merged.len(),
    };

    tracing::info!(
        %run_id,
        roster_entries = summary.roster_entries,
        members_found = summary.members_found,
        members_missing = summary.members_missing,
        roblox_resolved = summary.roblox_resolved,
        records_written = summary.records_written,
        "refresh complete"
    );

    Ok(summary)
}

pub type RefreshResult<T> = core::result::Result<T, RefreshErr>;

#[derive(Debug, Error)]
pub enum RefreshErr {
    #[error("a refresh is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Roster(#[from] RosterErr),

    #[error(transparent)]
    Discord(#[from] DiscordErr),

    #[error(transparent)]
    Snapshot(#[from] SnapshotErr),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gate_rejects_second_permit() {
        let gate = RefreshGate::new();

        let permit = gate.try_begin();
        assert!(permit.is_some());
        assert!(gate.try_begin().is_none());

        drop(permit);
        assert!(gate.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_gate_across_tasks() {
        let provider = crate::util::tracing::build_subscriber().await.unwrap();

        let gate = std::sync::Arc::new(RefreshGate::new());
        let permit = gate.try_begin().unwrap();

        let gate_clone = std::sync::Arc::clone(&gate);
        let second = tokio::spawn(async move { gate_clone.try_begin().is_some() })
            .await
            .unwrap();

        assert!(!second);
        drop(permit);

        crate::util::tracing::destroy_tracer(provider);
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::discord::{MemberData, MemberRecord};
use crate::roblox::RobloxProfile;
use crate::roster::RosterEntry;

/// Stands in for an avatar that could not be resolved.
pub const AVATAR_PLACEHOLDER: &str = "https://placehold.co/150x150/5865F2/FFFFFF?text=N/A";

/// Terminal fallback once every display-name source has come up empty.
pub const DISPLAY_NAME_FALLBACK: &str = "N/A";

/// Some guilds decorate display names with a role glyph before this
/// separator; only the part after it is the name proper.
const DISPLAY_NAME_DELIMITER: char = '・';

/// One persisted row of the merged roster. Field names follow the cached
/// artifact's json keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecord {
    pub discord_username: String,
    pub discord_display_name: String,
    pub discord_id: String,
    pub discord_join_date: Option<DateTime<Utc>>,
    pub discord_creation_date: Option<DateTime<Utc>>,
    pub roblox_username: Option<String>,
    pub roblox_id: Option<u64>,
    pub roblox_creation_date: Option<DateTime<Utc>>,
    pub roblox_avatar_url: String,
}

#[instrument(skip_all, fields(roster_count = roster.len()))]
/// Joins every roster entry against the member map and the resolved
/// game-platform data, one output record per entry in roster order.
///
/// Pure function of its inputs: no network, no clock, no randomness. Missing
/// data degrades field by field (roster-supplied username, null dates,
/// placeholder avatar) and never drops the row.
pub fn merge_records(
    roster: &[RosterEntry],
    members: &HashMap<String, MemberRecord>,
    roblox_ids: &HashMap<String, u64>,
    profiles: &HashMap<u64, RobloxProfile>,
) -> Vec<MergedRecord> {
    roster
        .iter()
        .map(|entry| {
            let member = match members.get(&entry.discord_id) {
                Some(MemberRecord::Found(data)) => Some(data),
                // an explicit miss degrades exactly like an absent entry
                Some(MemberRecord::Missing(_)) | None => None,
            };

            let roblox_id = entry
                .roblox_username
                .as_ref()
                .and_then(|name| roblox_ids.get(&name.to_lowercase()))
                .copied();
            let profile = roblox_id.and_then(|id| profiles.get(&id));

            MergedRecord {
                discord_username: member
                    .map(|m| m.username.clone())
                    .unwrap_or_else(|| entry.discord_username.clone()),
                discord_display_name: display_name(member, &entry.discord_username),
                discord_id: entry.discord_id.clone(),
                discord_join_date: member.and_then(|m| m.joined_at),
                discord_creation_date: member.map(|m| m.created_at),
                roblox_username: entry.roblox_username.clone(),
                roblox_id,
                roblox_creation_date: profile.and_then(|p| p.created_at),
                roblox_avatar_url: profile
                    .and_then(|p| p.avatar_url.clone())
                    .unwrap_or_else(|| AVATAR_PLACEHOLDER.to_string()),
            }
        })
        .collect()
}

/// Fallback chain: normalized member display name, member username, the
/// roster's raw username, then the `"N/A"` terminal.
fn display_name(member: Option<&MemberData>, roster_username: &str) -> String {
    member
        .and_then(|m| m.display_name.as_deref())
        .map(normalize_display_name)
        .filter(|name| !name.is_empty())
        .or_else(|| {
            member
                .map(|m| m.username.clone())
                .filter(|name| !name.is_empty())
        })
        .or_else(|| (!roster_username.is_empty()).then(|| roster_username.to_string()))
        .unwrap_or_else(|| DISPLAY_NAME_FALLBACK.to_string())
}

/// Strips the glyph-prefix convention: everything up to and including the
/// first `・` goes, the trimmed remainder stays. Names without the delimiter
/// pass through unchanged.
pub fn normalize_display_name(raw: &str) -> String {
    match raw.split_once(DISPLAY_NAME_DELIMITER) {
        Some((_prefix, rest)) => rest.trim().to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::discord::{MemberMiss, MissReason, snowflake_created_at};

    fn entry(id: &str, username: &str, roblox: Option<&str>) -> RosterEntry {
        RosterEntry {
            discord_id: id.to_string(),
            discord_username: username.to_string(),
            roblox_username: roblox.map(str::to_string),
        }
    }

    fn found(username: &str, display_name: Option<&str>) -> MemberRecord {
        MemberRecord::Found(MemberData {
            username: username.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: snowflake_created_at(175_928_847_299_117_063),
            joined_at: Some(snowflake_created_at(175_928_847_299_117_063)),
        })
    }

    #[test]
    fn test_display_name_prefix_split() {
        assert_eq!(normalize_display_name("🔰・CoolName"), "CoolName");
        assert_eq!(normalize_display_name("no delimiter"), "no delimiter");
        // only the first delimiter splits
        assert_eq!(normalize_display_name("a・b・c"), "b・c");
        assert_eq!(normalize_display_name("🔰・  padded  "), "padded");
    }

    #[test]
    fn test_display_name_fallback_chain() {
        let roster = vec![entry("1", "roster_name", None)];

        // no member at all: roster username
        let merged = merge_records(&roster, &HashMap::new(), &HashMap::new(), &HashMap::new());
        assert_eq!(merged[0].discord_display_name, "roster_name");

        // member present, no display name: member username
        let members = HashMap::from([("1".to_string(), found("member_name", None))]);
        let merged = merge_records(&roster, &members, &HashMap::new(), &HashMap::new());
        assert_eq!(merged[0].discord_display_name, "member_name");

        // nothing anywhere: the terminal fallback
        let roster_empty = vec![entry("1", "", None)];
        let merged = merge_records(
            &roster_empty,
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(merged[0].discord_display_name, DISPLAY_NAME_FALLBACK);
    }

    #[test]
    fn test_unmatched_member_falls_back_without_dates() {
        let roster = vec![entry("10", "fallback_user", Some("SomeRbx"))];
        let merged = merge_records(&roster, &HashMap::new(), &HashMap::new(), &HashMap::new());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].discord_username, "fallback_user");
        assert_eq!(merged[0].discord_join_date, None);
        assert_eq!(merged[0].discord_creation_date, None);
        assert_eq!(merged[0].roblox_id, None);
        assert_eq!(merged[0].roblox_avatar_url, AVATAR_PLACEHOLDER);
    }

    #[test]
    fn test_not_found_isolation() {
        let mut roster = Vec::new();
        let mut members = HashMap::new();

        for n in 0..10 {
            let id = format!("10{n}");
            roster.push(entry(&id, &format!("user{n}"), None));
            members.insert(id, found(&format!("user{n}"), None));
        }

        roster.push(entry("999", "left_user", None));
        members.insert(
            "999".to_string(),
            MemberRecord::Missing(MemberMiss {
                error: MissReason::NotFound,
            }),
        );

        let merged = merge_records(&roster, &members, &HashMap::new(), &HashMap::new());

        assert_eq!(merged.len(), 11);
        let missing = merged.iter().find(|r| r.discord_id == "999").unwrap();
        assert_eq!(missing.discord_username, "left_user");
        assert_eq!(missing.discord_creation_date, None);
    }

    #[test]
    fn test_roblox_join_is_case_insensitive() {
        let roster = vec![entry("1", "alpha", Some("AlphaRbx"))];
        let ids = HashMap::from([("alpharbx".to_string(), 777u64)]);
        let profiles = HashMap::from([(
            777u64,
            RobloxProfile {
                id: 777,
                created_at: Some(snowflake_created_at(175_928_847_299_117_063)),
                avatar_url: Some("https://example.test/avatar.png".to_string()),
            },
        )]);

        let merged = merge_records(&roster, &HashMap::new(), &ids, &profiles);

        assert_eq!(merged[0].roblox_id, Some(777));
        assert_eq!(
            merged[0].roblox_avatar_url,
            "https://example.test/avatar.png"
        );
        assert!(merged[0].roblox_creation_date.is_some());
    }

    #[test]
    fn test_merge_is_deterministic_and_order_preserving() {
        let roster = vec![
            entry("3", "c", Some("CRbx")),
            entry("1", "a", None),
            entry("2", "b", Some("BRbx")),
        ];
        let members = HashMap::from([
            ("1".to_string(), found("a_member", Some("🔰・A"))),
            ("2".to_string(), found("b_member", None)),
        ]);
        let ids = HashMap::from([("brbx".to_string(), 2u64)]);
        let profiles = HashMap::from([(
            2u64,
            RobloxProfile {
                id: 2,
                created_at: None,
                avatar_url: None,
            },
        )]);

        let first = merge_records(&roster, &members, &ids, &profiles);
        let second = merge_records(&roster, &members, &ids, &profiles);

        // byte-identical output on identical inputs
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );

        let order: Vec<&str> = first.iter().map(|r| r.discord_id.as_str()).collect();
        assert_eq!(order, vec!["3", "1", "2"]);
        assert_eq!(first[1].discord_display_name, "A");
    }
}

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tracing::instrument;

/// Column headers the roster source must carry. Anything else in the file is
/// ignored.
pub const DISCORD_ID_COLUMN: &str = "DiscordID";
pub const DISCORD_USERNAME_COLUMN: &str = "DiscordUsername";
pub const ROBLOX_USERNAME_COLUMN: &str = "RobloxUsername";

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub discord_id: String,
    pub discord_username: String,
    pub roblox_username: Option<String>,
}

/// Reads the operator-maintained roster file. A missing file is a distinct
/// error from a present-but-unusable one; both abort the refresh.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn load_roster<P: AsRef<Path>>(path: P) -> RosterResult<Vec<RosterEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RosterErr::SourceNotFound(path.display().to_string()));
    }

    let raw = std::fs::read_to_string(path)?;
    parse_roster(&raw)
}

/// Parses the raw roster text: header-indexed columns, trimmed fields, rows
/// without a usable discord id dropped, first occurrence wins on duplicates.
pub fn parse_roster(raw: &str) -> RosterResult<Vec<RosterEntry>> {
    let mut lines = raw.lines();
    let header = lines
        .next()
        .ok_or_else(|| RosterErr::MalformedSource(String::from("no header row")))?;

    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let id_idx = column_index(&columns, DISCORD_ID_COLUMN)?;
    let username_idx = column_index(&columns, DISCORD_USERNAME_COLUMN)?;
    let roblox_idx = column_index(&columns, ROBLOX_USERNAME_COLUMN)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let Some(discord_id) = fields.get(id_idx).copied().filter(|id| !id.is_empty()) else {
            tracing::warn!(line = line_no + 2, "roster row without a usable discord id");
            continue;
        };

        if !seen.insert(discord_id.to_string()) {
            tracing::debug!(discord_id, "duplicate roster row dropped");
            continue;
        }

        entries.push(RosterEntry {
            discord_id: discord_id.to_string(),
            discord_username: fields
                .get(username_idx)
                .copied()
                .unwrap_or_default()
                .to_string(),
            roblox_username: fields
                .get(roblox_idx)
                .copied()
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        });
    }

    tracing::info!(entry_count = entries.len(), "roster loaded");
    Ok(entries)
}

/// The deduplicated roblox usernames in roster order, for the downstream
/// batched id lookup. Dedup is case-insensitive to match the resolver.
pub fn roblox_usernames(entries: &[RosterEntry]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();

    entries
        .iter()
        .filter_map(|entry| entry.roblox_username.as_deref())
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn column_index(columns: &[&str], name: &'static str) -> RosterResult<usize> {
    columns
        .iter()
        .position(|col| *col == name)
        .ok_or_else(|| RosterErr::MalformedSource(format!("missing required column '{name}'")))
}

pub type RosterResult<T> = core::result::Result<T, RosterErr>;

#[derive(Debug, Error)]
pub enum RosterErr {
    #[error("roster source '{0}' does not exist")]
    SourceNotFound(String),

    #[error("malformed roster source: {0}")]
    MalformedSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
DiscordID,DiscordUsername,RobloxUsername
111,alpha,AlphaRbx
222,bravo,
111,alpha_dupe,ShadowedRbx
 333 , charlie , CharlieRbx
,nobody,GhostRbx
444,delta,alpharbx";

    #[test]
    fn test_parse_dedup_and_trim() {
        let entries = parse_roster(SAMPLE).unwrap();

        let ids: Vec<&str> = entries.iter().map(|e| e.discord_id.as_str()).collect();
        assert_eq!(ids, vec!["111", "222", "333", "444"]);

        // first occurrence of 111 wins
        assert_eq!(entries[0].discord_username, "alpha");
        assert_eq!(entries[0].roblox_username.as_deref(), Some("AlphaRbx"));

        // empty roblox cell is absent, not an empty string
        assert_eq!(entries[1].roblox_username, None);

        // whitespace trimmed on every field
        assert_eq!(entries[2].discord_id, "333");
        assert_eq!(entries[2].roblox_username.as_deref(), Some("CharlieRbx"));
    }

    #[test]
    fn test_roblox_usernames_case_insensitive_dedup() {
        let entries = parse_roster(SAMPLE).unwrap();
        let usernames = roblox_usernames(&entries);

        // "alpharbx" (row 444) collides with "AlphaRbx" case-insensitively
        assert_eq!(usernames, vec!["AlphaRbx", "CharlieRbx"]);
    }

    #[test]
    fn test_missing_column_is_malformed() {
        let raw = "DiscordID,DiscordUsername\n111,alpha";
        let err = parse_roster(raw).unwrap_err();

        assert!(matches!(err, RosterErr::MalformedSource(_)));
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_roster(dir.path().join("users.csv")).unwrap_err();

        assert!(matches!(err, RosterErr::SourceNotFound(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let entries = load_roster(&path).unwrap();
        assert_eq!(entries.len(), 4);
    }
}

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;

use crate::discord::MemberRecord;
use crate::reconcile::MergedRecord;

pub const COMBINED_SNAPSHOT_FILE: &str = "combined_roster.json";
pub const MEMBER_SNAPSHOT_FILE: &str = "discord_members.json";

/// Flat-file store for the refresh artifacts. The merged snapshot is the only
/// thing the read side ever consumes; the member snapshot is the intermediate
/// artifact the discord fetch phase leaves behind.
///
/// Writes are temp-file-then-rename so a concurrent reader sees either the
/// previous snapshot or the new one, never a torn file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    #[instrument(skip(self, records), fields(record_count = records.len()))]
    /// Replaces the merged snapshot wholesale.
    pub fn write_combined(&self, records: &[MergedRecord]) -> SnapshotResult<()> {
        self.write_atomic(COMBINED_SNAPSHOT_FILE, records)
    }

    #[instrument(skip(self))]
    /// `Ok(None)` when no snapshot has ever been written; `Corrupt` when one
    /// exists but cannot be parsed. The caller decides how to degrade.
    pub fn read_combined(&self) -> SnapshotResult<Option<Vec<MergedRecord>>> {
        self.read(COMBINED_SNAPSHOT_FILE)
    }

    #[instrument(skip(self, members), fields(member_count = members.len()))]
    pub fn write_members(&self, members: &HashMap<String, MemberRecord>) -> SnapshotResult<()> {
        self.write_atomic(MEMBER_SNAPSHOT_FILE, members)
    }

    #[instrument(skip(self))]
    pub fn read_members(&self) -> SnapshotResult<Option<HashMap<String, MemberRecord>>> {
        self.read(MEMBER_SNAPSHOT_FILE)
    }

    fn write_atomic<T>(&self, file: &str, value: &T) -> SnapshotResult<()>
    where
        T: Serialize + ?Sized,
    {
        fs::create_dir_all(&self.dir)?;

        // the temp file must live in the target directory; rename is only
        // atomic within one filesystem
        let tmp_path = self.dir.join(format!(".{file}.tmp"));
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;

        let live_path = self.dir.join(file);
        fs::rename(&tmp_path, &live_path)?;

        tracing::debug!(path = %live_path.display(), "snapshot written");
        Ok(())
    }

    fn read<T>(&self, file: &str) -> SnapshotResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&path)?);
        match serde_json::from_reader(reader) {
            Ok(value) => Ok(Some(value)),
            Err(source) => Err(SnapshotErr::Corrupt {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

pub type SnapshotResult<T> = core::result::Result<T, SnapshotErr>;

#[derive(Debug, Error)]
pub enum SnapshotErr {
    #[error("snapshot at '{path}' exists but cannot be parsed: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

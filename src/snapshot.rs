//! Periodic and shutdown snapshots of the added/live ticket sets and the
//! user voting preferences: one timestamped, versioned CBOR file per kind,
//! ten files of history per kind.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

use crate::prefs::UserVotingPrefs;
use crate::tickets::{PoolSnapshot, TicketMap};

pub const COMMON_VERSION: &str = "1.1.0";
pub const KIND_VERSION: &str = "1.0.0";

pub const KIND_ADDED: &str = "addedlowfeetickets";
pub const KIND_LIVE: &str = "livetickets";
pub const KIND_USER_CONFIG: &str = "uservotingconfig";

const FILE_EXT: &str = "cbor";
const RETAIN_PER_KIND: usize = 10;

/// Snapshot cadence while running without a preferences source, and the
/// preferences refresh cadence in `--no-rpc-listen` mode.
pub const SNAPSHOT_INTERVAL_SECS: u64 = 240;

#[derive(Debug, Serialize, serde::Deserialize)]
struct Envelope<T> {
    format: String,
    common_version: String,
    kind_version: String,
    saved_at: i64,
    data: T,
}

pub struct Snapshotter {
    dir: PathBuf,
}

impl Snapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn timestamp() -> Result<String> {
        let format =
            format_description!("[year]_[month]_[day]_[hour]_[minute]_[second]");
        OffsetDateTime::now_utc()
            .format(&format)
            .context("failed to format snapshot timestamp")
    }

    fn save_kind<T: Serialize>(&self, kind: &str, data: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self
            .dir
            .join(format!("{kind}-{}-{KIND_VERSION}.{FILE_EXT}", Self::timestamp()?));
        let envelope = Envelope {
            format: format!("stakevoted/{kind}"),
            common_version: COMMON_VERSION.to_string(),
            kind_version: KIND_VERSION.to_string(),
            saved_at: OffsetDateTime::now_utc().unix_timestamp(),
            data,
        };

        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        ciborium::ser::into_writer(&envelope, file)
            .with_context(|| format!("failed to encode {}", path.display()))?;
        Ok(path)
    }

    /// Write one file per non-empty mapping, then apply retention. Returns
    /// the number of files written.
    pub fn save(
        &self,
        pools: &PoolSnapshot,
        user_config: &HashMap<String, UserVotingPrefs>,
    ) -> Result<usize> {
        let mut written = 0;
        if !pools.added.is_empty() {
            self.save_kind(KIND_ADDED, &pools.added)?;
            written += 1;
        }
        if !pools.live.is_empty() {
            self.save_kind(KIND_LIVE, &pools.live)?;
            written += 1;
        }
        if !user_config.is_empty() {
            self.save_kind(KIND_USER_CONFIG, user_config)?;
            written += 1;
        }
        if written > 0 {
            info!(files = written, dir = %self.dir.display(), "saved state snapshot");
            self.prune()?;
        }
        Ok(written)
    }

    fn files_for_kind(&self, kind: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", self.dir.display()));
            }
        };
        for entry in entries {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name.starts_with(&format!("{kind}-")) && name.ends_with(&format!(".{FILE_EXT}")) {
                files.push(path);
            }
        }
        // Timestamps in the names sort lexicographically.
        files.sort();
        Ok(files)
    }

    /// Load the most recent snapshot of `kind`, if one exists and its schema
    /// versions match.
    pub fn load_latest<T: DeserializeOwned>(&self, kind: &str) -> Result<Option<T>> {
        let files = self.files_for_kind(kind)?;
        let path = match files.last() {
            Some(path) => path,
            None => return Ok(None),
        };

        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let envelope: Envelope<T> = ciborium::de::from_reader(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;

        if envelope.common_version != COMMON_VERSION || envelope.kind_version != KIND_VERSION {
            warn!(
                file = %path.display(),
                common = %envelope.common_version,
                kind = %envelope.kind_version,
                "snapshot schema version mismatch, ignoring file"
            );
            return Ok(None);
        }
        info!(file = %path.display(), "restored {kind} snapshot");
        Ok(Some(envelope.data))
    }

    /// Load the latest ticket map of `kind`, tolerating absence.
    pub fn load_ticket_map(&self, kind: &str) -> Result<TicketMap> {
        Ok(self.load_latest(kind)?.unwrap_or_default())
    }

    /// Delete everything but the newest ten files of each kind. Returns the
    /// number of files removed.
    pub fn prune(&self) -> Result<usize> {
        let mut removed = 0;
        for kind in [KIND_ADDED, KIND_LIVE, KIND_USER_CONFIG] {
            let files = self.files_for_kind(kind)?;
            if files.len() <= RETAIN_PER_KIND {
                continue;
            }
            for path in &files[..files.len() - RETAIN_PER_KIND] {
                fs::remove_file(path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

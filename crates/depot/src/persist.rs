use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::file_cache::FileCacheEntry;

/// File name of the saved entry table inside the cache root.
pub const STATE_FILE: &str = "saved_cache.json";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SavedState<'a> {
    entries: BTreeMap<&'a str, &'a FileCacheEntry>,
    seq:     u64,
}

pub(crate) fn encode<'a>(
    entries: impl Iterator<Item = (&'a str, &'a FileCacheEntry)>,
    seq: u64,
) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&SavedState {
        entries: entries.collect(),
        seq,
    })
}

#[derive(Debug, Default)]
pub(crate) struct Recovered {
    pub entries: Vec<(String, FileCacheEntry)>,
    pub seq:     u64,
}

/// Parse a saved table, keeping every entry that still deserializes.
pub(crate) fn decode(content: &[u8]) -> Recovered {
    let value: Value = match serde_json::from_slice(content) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable cache state");
            return Recovered::default();
        }
    };

    let seq = value.get("Seq").and_then(Value::as_u64).unwrap_or_default();
    let Some(entries) = value.get("Entries").and_then(Value::as_object) else {
        warn!("cache state has no entry table");
        return Recovered {
            entries: Vec::new(),
            seq,
        };
    };

    let entries = entries
        .iter()
        .filter_map(|(key, entry)| match FileCacheEntry::deserialize(entry) {
            Ok(entry) => Some((key.clone(), entry)),
            Err(e) => {
                warn!(cache_key = %key, error = %e, "skipping unreadable cache entry");
                None
            }
        })
        .collect();

    Recovered { entries, seq }
}

/// Write through a sibling temp file and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use depot_archive::extract_tar_to_directory;
use depot_fetch::CachingInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cached_file::CachedFile;
use crate::error::{Error, Result};
use crate::persist;

/// Reference count of an entry nobody outside the cache is using.
const UNREFERENCED: u32 = 1;

/// One cached artifact and, once expanded, its directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileCacheEntry {
    /// Bytes charged against the budget; doubled once expanded.
    pub size:                    u64,
    pub access:                  DateTime<Utc>,
    pub caching_info:            CachingInfo,
    pub file_path:               PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_directory_path: Option<PathBuf>,
    #[serde(skip, default = "unreferenced")]
    in_use:                      u32,
    #[serde(skip)]
    tick:                        u64,
}

fn unreferenced() -> u32 { UNREFERENCED }

impl FileCacheEntry {
    fn new(file_path: PathBuf, size: u64, caching_info: CachingInfo) -> Self {
        Self {
            size,
            access: Utc::now(),
            caching_info,
            file_path,
            expanded_directory_path: None,
            in_use: UNREFERENCED,
            tick: 0,
        }
    }

    /// Outstanding references, counting the cache's own hold.
    pub fn in_use(&self) -> u32 { self.in_use }

    fn remove_files(&self) {
        remove_path(&self.file_path);
        if let Some(dir) = &self.expanded_directory_path {
            remove_path(dir);
        }
    }
}

struct Slot {
    key:   String,
    entry: FileCacheEntry,
}

/// Entries live in an arena so that handles can outlive their key's mapping:
/// a replaced entry stays in `slots` until its last reference is released.
#[derive(Default)]
struct CacheState {
    slots:      HashMap<u64, Slot>,
    live:       HashMap<String, u64>,
    superseded: HashMap<(String, PathBuf), u64>,
    seq:        u64,
    next_id:    u64,
    tick:       u64,
}

impl CacheState {
    fn entry(&self, id: u64) -> Result<&FileCacheEntry> {
        self.slots.get(&id).map(|s| &s.entry).ok_or(Error::EntryNotFound)
    }

    fn entry_mut(&mut self, id: u64) -> Result<&mut FileCacheEntry> {
        self.slots.get_mut(&id).map(|s| &mut s.entry).ok_or(Error::EntryNotFound)
    }

    fn live_id(&self, key: &str) -> Result<u64> { self.live.get(key).copied().ok_or(Error::EntryNotFound) }

    fn touch(&mut self, id: u64) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.entry.access = Utc::now();
            slot.entry.tick = tick;
        }
    }

    fn used_space(&self) -> u64 {
        self.live
            .values()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| slot.entry.size)
            .sum()
    }

    /// Make `entry` the live entry for `key`, retiring whatever it replaces.
    fn install(&mut self, key: &str, entry: FileCacheEntry) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, Slot {
            key: key.to_string(),
            entry,
        });
        self.touch(id);

        if let Some(old) = self.live.insert(key.to_string(), id) {
            self.retire(key, old);
        }
        id
    }

    fn remove(&mut self, key: &str) {
        if let Some(id) = self.live.remove(key) {
            self.retire(key, id);
        }
    }

    /// Drop the cache's own hold on an entry that is no longer live.
    fn retire(&mut self, key: &str, id: u64) {
        self.release(id);
        let Some(slot) = self.slots.get(&id) else {
            return;
        };
        if let Some(dir) = &slot.entry.expanded_directory_path {
            debug!(cache_key = %key, path = ?dir, in_use = slot.entry.in_use, "keeping superseded directory");
            self.superseded.insert((key.to_string(), dir.clone()), id);
        }
    }

    fn release(&mut self, id: u64) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.entry.in_use = slot.entry.in_use.saturating_sub(1);
        if slot.entry.in_use > 0 {
            return;
        }

        if let Some(slot) = self.slots.remove(&id) {
            slot.entry.remove_files();
            if let Some(dir) = slot.entry.expanded_directory_path {
                self.superseded.remove(&(slot.key.clone(), dir));
            }
            if self.live.get(&slot.key) == Some(&id) {
                self.live.remove(&slot.key);
            }
        }
    }

    /// Evict least recently used, unreferenced entries until `size` more bytes
    /// fit. Running out of candidates is not an error.
    fn make_room(&mut self, max_size: u64, size: u64, excluded: Option<&str>) {
        while self.used_space().saturating_add(size) > max_size {
            let victim = self
                .live
                .iter()
                .filter(|(key, _)| Some(key.as_str()) != excluded)
                .filter_map(|(key, id)| self.slots.get(id).map(|slot| (key, &slot.entry)))
                .filter(|(_, entry)| entry.in_use <= UNREFERENCED)
                .min_by_key(|(_, entry)| (entry.access, entry.tick))
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else {
                debug!(requested = size, max_size, "no evictable entries left");
                return;
            };
            debug!(cache_key = %victim, "evicting cache entry");
            self.remove(&victim);
        }
    }

    /// Drop every live mapping without touching the disk. Referenced entries
    /// are retired as usual.
    fn forget_live(&mut self) {
        let live: Vec<(String, u64)> = self.live.drain().collect();
        for (key, id) in live {
            let referenced = self
                .slots
                .get(&id)
                .is_some_and(|slot| slot.entry.in_use > UNREFERENCED);
            if referenced {
                self.retire(&key, id);
            } else {
                self.slots.remove(&id);
            }
        }
    }

    fn tracked_paths(&self) -> HashSet<PathBuf> {
        self.slots
            .values()
            .flat_map(|slot| {
                std::iter::once(slot.entry.file_path.clone()).chain(slot.entry.expanded_directory_path.clone())
            })
            .collect()
    }
}

struct Shared {
    root:     PathBuf,
    max_size: u64,
    state:    Mutex<CacheState>,
}

/// A size-bounded, reference-counted store of downloaded files.
///
/// All operations are serialized by one mutex. Content is deleted from disk
/// only once nothing references it, so handles stay valid across replacement
/// and eviction.
#[derive(Clone)]
pub struct FileCache {
    shared: Arc<Shared>,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                root: root.into(),
                max_size,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn root(&self) -> &Path { &self.shared.root }

    pub fn max_size(&self) -> u64 { self.shared.max_size }

    /// Move `source` into the cache under `key` and open it.
    pub fn add(&self, key: &str, source: &Path, size: u64, caching_info: CachingInfo) -> Result<CachedFile> {
        let mut state = self.shared.state.lock();
        state.make_room(self.shared.max_size, size, None);

        let path = self.unique_path(&mut state, key);
        fs::rename(source, &path)?;
        let id = state.install(key, FileCacheEntry::new(path, size, caching_info));
        debug!(cache_key = %key, size, "added cache entry");

        self.open_reader(&mut state, id)
    }

    /// Like [`add`](Self::add), but budgets twice `size` and expands the
    /// archive, returning a referenced directory.
    pub fn add_directory(
        &self,
        key: &str,
        source: &Path,
        size: u64,
        caching_info: CachingInfo,
    ) -> Result<PathBuf> {
        let mut state = self.shared.state.lock();
        let reserved = size.saturating_mul(2);
        state.make_room(self.shared.max_size, reserved, None);

        let path = self.unique_path(&mut state, key);
        fs::rename(source, &path)?;
        let id = state.install(key, FileCacheEntry::new(path, reserved, caching_info));
        debug!(cache_key = %key, size = reserved, "added cache directory entry");

        expand(&mut state, id).inspect_err(|_| state.remove(key))
    }

    pub fn get(&self, key: &str) -> Result<(CachedFile, CachingInfo)> {
        let mut state = self.shared.state.lock();
        let id = state.live_id(key)?;
        state.touch(id);
        let caching_info = state.entry(id)?.caching_info.clone();
        let file = self.open_reader(&mut state, id)?;
        Ok((file, caching_info))
    }

    /// Expand the entry on first use; later calls reuse the same directory.
    pub fn get_directory(&self, key: &str) -> Result<(PathBuf, CachingInfo)> {
        let mut state = self.shared.state.lock();
        let id = state.live_id(key)?;

        let entry = state.entry(id)?;
        let first_expansion = entry.expanded_directory_path.is_none();
        if first_expansion {
            let size = entry.size;
            state.make_room(self.shared.max_size, size, Some(key));
        }

        let dir = expand(&mut state, id)?;
        let entry = state.entry_mut(id)?;
        if first_expansion {
            entry.size = entry.size.saturating_mul(2);
        }
        let caching_info = entry.caching_info.clone();
        state.touch(id);
        Ok((dir, caching_info))
    }

    /// Release a directory obtained from [`get_directory`](Self::get_directory)
    /// or [`add_directory`](Self::add_directory).
    pub fn close_directory(&self, key: &str, dir: &Path) -> Result<()> {
        let mut state = self.shared.state.lock();

        if let Some(&id) = state.live.get(key) {
            let entry = state.entry(id)?;
            if entry.expanded_directory_path.as_deref() == Some(dir) {
                if entry.in_use <= UNREFERENCED {
                    return Err(Error::AlreadyClosed);
                }
                state.release(id);
                return Ok(());
            }
        }

        let id = state
            .superseded
            .get(&(key.to_string(), dir.to_path_buf()))
            .copied()
            .ok_or(Error::EntryNotFound)?;
        state.release(id);
        Ok(())
    }

    /// Forget `key`. Content still referenced stays on disk until released.
    pub fn remove(&self, key: &str) { self.shared.state.lock().remove(key); }

    /// Evict down to the budget without reserving anything.
    pub fn prune(&self) {
        let mut state = self.shared.state.lock();
        state.make_room(self.shared.max_size, 0, None);
    }

    /// Bytes charged against the budget and the number of live entries.
    pub fn usage(&self) -> (u64, usize) {
        let state = self.shared.state.lock();
        (state.used_space(), state.live.len())
    }

    /// A copy of the live entry for `key`.
    pub fn entry(&self, key: &str) -> Option<FileCacheEntry> {
        let state = self.shared.state.lock();
        state.live_id(key).and_then(|id| state.entry(id).cloned()).ok()
    }

    /// Persist the live entries to `path`, replacing it atomically.
    pub fn save_state(&self, path: &Path) -> Result<()> {
        let content = {
            let state = self.shared.state.lock();
            let entries = state
                .live
                .iter()
                .filter_map(|(key, id)| state.slots.get(id).map(|slot| (key.as_str(), &slot.entry)));
            persist::encode(entries, state.seq)?
        };
        persist::write_atomic(path, &content)?;
        Ok(())
    }

    /// Load entries saved by [`save_state`](Self::save_state) and reconcile
    /// the cache root with them.
    ///
    /// A missing or unreadable state file yields an empty table. Every file
    /// under the root that no entry refers to is deleted, then the budget is
    /// enforced.
    pub fn recover_state(&self, path: &Path) -> Result<()> {
        let recovered = match fs::read(path) {
            Ok(content) => persist::decode(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => persist::Recovered::default(),
            Err(e) => return Err(e.into()),
        };

        let mut state = self.shared.state.lock();
        state.forget_live();
        state.seq = state.seq.max(recovered.seq);

        let mut entries = recovered.entries;
        entries.sort_by_key(|(_, entry)| entry.access);
        let mut restored = 0;
        for (key, mut entry) in entries {
            if !entry.file_path.exists() {
                warn!(cache_key = %key, path = ?entry.file_path, "dropping recovered entry with missing file");
                continue;
            }
            entry.in_use = UNREFERENCED;
            entry.expanded_directory_path = entry
                .expanded_directory_path
                .filter(|dir| !dir.as_os_str().is_empty());
            if let Some(dir) = &entry.expanded_directory_path
                && !dir.is_dir()
            {
                debug!(cache_key = %key, path = ?dir, "recovered directory is gone, will expand again");
                entry.expanded_directory_path = None;
                entry.size /= 2;
            }

            let access = entry.access;
            let id = state.install(&key, entry);
            if let Ok(entry) = state.entry_mut(id) {
                entry.access = access;
            }
            restored += 1;
        }

        let tracked = state.tracked_paths();
        match fs::read_dir(&self.shared.root) {
            Ok(children) => {
                for child in children {
                    let child = self.shared.root.join(child?.file_name());
                    if !tracked.contains(&child) {
                        debug!(path = ?child, "removing untracked cache file");
                        remove_path_strict(&child)?;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        state.make_room(self.shared.max_size, 0, None);
        debug!(restored, "recovered cache state");
        Ok(())
    }

    fn unique_path(&self, state: &mut CacheState, key: &str) -> PathBuf {
        state.seq += 1;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.shared.root.join(format!("{key}-{nanos}-{}", state.seq))
    }

    fn open_reader(&self, state: &mut CacheState, id: u64) -> Result<CachedFile> {
        let entry = state.entry_mut(id)?;
        let path = entry.file_path.clone();
        let file = File::open(&path)?;
        entry.in_use += 1;

        let shared = Arc::clone(&self.shared);
        Ok(CachedFile::new(file, path, move |_| shared.state.lock().release(id)))
    }
}

/// Reference the entry's directory, extracting the archive if needed.
fn expand(state: &mut CacheState, id: u64) -> Result<PathBuf> {
    let entry = state.entry_mut(id)?;
    let dir = match &entry.expanded_directory_path {
        Some(dir) => dir.clone(),
        None => {
            let dir = expanded_path(&entry.file_path);
            if let Err(e) = extract_tar_to_directory(&entry.file_path, &dir) {
                remove_path(&dir);
                return Err(e.into());
            }
            entry.expanded_directory_path = Some(dir.clone());
            dir
        }
    };
    entry.in_use += 1;
    Ok(dir)
}

fn expanded_path(file_path: &Path) -> PathBuf {
    let mut name = OsString::from(file_path.as_os_str());
    name.push(".d");
    PathBuf::from(name)
}

fn remove_path_strict(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_path(path: &Path) {
    if let Err(e) = remove_path_strict(path) {
        warn!(path = ?path, error = %e, "unable to delete cached file");
    }
}

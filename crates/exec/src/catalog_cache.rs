//! Catalog cache with filesystem-fingerprint invalidation.
//!
//! A cached answer stays valid only while the units directory and every
//! source file it was derived from keep the modification stamps captured
//! before the load. Reads and writes go through clones, so callers can
//! never mutate cached state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use stepwise_core::catalog::{CatalogProvider, UnitEntry, UnitInfo};
use stepwise_core::error::CatalogError;
use tracing::debug;

use crate::catalog::TrackedSources;

/// Modification stamps for a set of paths. A missing path stamps as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    stamps: Vec<(PathBuf, Option<SystemTime>)>,
}

impl Fingerprint {
    pub fn capture(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            stamps: paths
                .into_iter()
                .map(|p| {
                    let stamp = modified(&p);
                    (p, stamp)
                })
                .collect(),
        }
    }

    /// True while every path still has its captured stamp.
    pub fn is_current(&self) -> bool {
        self.stamps.iter().all(|(path, stamp)| modified(path) == *stamp)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

struct Cached<T> {
    value: T,
    fingerprint: Fingerprint,
}

type ListKey = (PathBuf, bool);
type InfoKey = (PathBuf, String);

/// Memoized catalog answers keyed by base directory.
#[derive(Default)]
pub struct CatalogCache {
    lists: RwLock<HashMap<ListKey, Cached<Vec<UnitEntry>>>>,
    infos: RwLock<HashMap<InfoKey, Cached<UnitInfo>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_list(&self, base_dir: &Path, include_details: bool) -> Option<Vec<UnitEntry>> {
        lookup(&self.lists, &(base_dir.to_path_buf(), include_details))
    }

    pub fn set_list(
        &self,
        base_dir: &Path,
        include_details: bool,
        entries: &[UnitEntry],
        fingerprint: Fingerprint,
    ) {
        store(
            &self.lists,
            (base_dir.to_path_buf(), include_details),
            entries.to_vec(),
            fingerprint,
        );
    }

    pub fn get_info(&self, base_dir: &Path, name: &str) -> Option<UnitInfo> {
        lookup(&self.infos, &info_key(base_dir, name))
    }

    pub fn set_info(&self, base_dir: &Path, name: &str, info: &UnitInfo, fingerprint: Fingerprint) {
        store(&self.infos, info_key(base_dir, name), info.clone(), fingerprint);
    }

    /// Drops every entry for `base_dir`.
    pub fn invalidate(&self, base_dir: &Path) {
        self.lists
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(dir, _), _| dir != base_dir);
        self.infos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(dir, _), _| dir != base_dir);
        debug!(dir = %base_dir.display(), "Catalog cache invalidated");
    }
}

fn info_key(base_dir: &Path, name: &str) -> InfoKey {
    (base_dir.to_path_buf(), name.trim().to_ascii_lowercase())
}

fn lookup<K, T>(map: &RwLock<HashMap<K, Cached<T>>>, key: &K) -> Option<T>
where
    K: std::hash::Hash + Eq,
    T: Clone,
{
    {
        let guard = map.read().unwrap_or_else(PoisonError::into_inner);
        match guard.get(key) {
            None => return None,
            Some(cached) if cached.fingerprint.is_current() => return Some(cached.value.clone()),
            Some(_) => {}
        }
    }
    let mut guard = map.write().unwrap_or_else(PoisonError::into_inner);
    // Another reader may have refreshed it meanwhile.
    if guard.get(key).is_some_and(|c| !c.fingerprint.is_current()) {
        guard.remove(key);
    }
    None
}

fn store<K, T>(map: &RwLock<HashMap<K, Cached<T>>>, key: K, value: T, fingerprint: Fingerprint)
where
    K: std::hash::Hash + Eq,
{
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, Cached { value, fingerprint });
}

/// A `CatalogProvider` that memoizes another one.
pub struct CachedCatalog<P> {
    inner: P,
    cache: CatalogCache,
}

impl<P> CachedCatalog<P>
where
    P: CatalogProvider + TrackedSources,
{
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: CatalogCache::new(),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn fingerprint(&self, base_dir: &Path) -> Fingerprint {
        Fingerprint::capture(self.inner.tracked_paths(base_dir))
    }
}

impl<P> CatalogProvider for CachedCatalog<P>
where
    P: CatalogProvider + TrackedSources,
{
    fn list_entries(
        &self,
        base_dir: &Path,
        include_details: bool,
    ) -> Result<Vec<UnitEntry>, CatalogError> {
        if let Some(entries) = self.cache.get_list(base_dir, include_details) {
            return Ok(entries);
        }
        let fingerprint = self.fingerprint(base_dir);
        let entries = self.inner.list_entries(base_dir, include_details)?;
        self.cache
            .set_list(base_dir, include_details, &entries, fingerprint);
        Ok(entries)
    }

    fn get_info(&self, base_dir: &Path, name: &str) -> Result<UnitInfo, CatalogError> {
        if let Some(info) = self.cache.get_info(base_dir, name) {
            return Ok(info);
        }
        let fingerprint = self.fingerprint(base_dir);
        let info = self.inner.get_info(base_dir, name)?;
        self.cache.set_info(base_dir, name, &info, fingerprint);
        Ok(info)
    }

    fn invalidate(&self, base_dir: &Path) {
        self.cache.invalidate(base_dir);
        self.inner.invalidate(base_dir);
    }
}

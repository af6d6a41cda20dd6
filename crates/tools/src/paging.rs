//! Result paging for listing tools.
//!
//! A listing is computed once and kept for a short while, so asking for
//! the next page re-slices the same results instead of rescanning disk.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use stepwise_core::decision::ArgMap;
use stepwise_core::tool::RunResult;

pub const PAGE_CACHE_TTL: Duration = Duration::from_secs(15);
pub const PAGE_CACHE_ENTRIES: usize = 8;

/// Short-lived LRU cache of full result lists.
pub struct PageCache<T> {
    entries: Mutex<LruCache<String, (Instant, Vec<T>)>>,
    ttl: Duration,
}

impl<T: Clone> PageCache<T> {
    pub fn new() -> Self {
        Self::with_limits(PAGE_CACHE_TTL, PAGE_CACHE_ENTRIES)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Returns the cached list for `key`, or runs `load` and caches it.
    pub fn get_or_load<E>(
        &self,
        key: &str,
        now: Instant,
        load: impl FnOnce() -> Result<Vec<T>, E>,
    ) -> Result<Vec<T>, E> {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some((stored, items)) if now.saturating_duration_since(*stored) <= self.ttl => {
                    return Ok(items.clone());
                }
                Some(_) => {
                    entries.pop(key);
                }
                None => {}
            }
        }
        let items = load()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key.to_string(), (now, items.clone()));
        Ok(items)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for PageCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `limit` and `offset` from tool arguments.
pub fn page_window(args: &ArgMap, default_limit: usize) -> (usize, usize) {
    let number = |key: &str| args.get(key).and_then(|v| v.trim().parse::<usize>().ok());
    let limit = number("limit").filter(|n| *n > 0).unwrap_or(default_limit);
    let offset = number("offset").unwrap_or(0);
    (limit, offset)
}

/// Renders one page of `items` and sets up the continuation.
pub fn paged_result<T>(
    items: &[T],
    args: &ArgMap,
    default_limit: usize,
    empty_message: &str,
    render: impl Fn(&T) -> String,
) -> RunResult {
    if items.is_empty() {
        return RunResult::ok(empty_message);
    }
    let (limit, offset) = page_window(args, default_limit);
    let start = offset.min(items.len());
    let end = start.saturating_add(limit).min(items.len());

    let mut lines: Vec<String> = items[start..end]
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{:>3}) {}", start + i + 1, render(item)))
        .collect();
    if start == end {
        lines.push(format!("No results past offset {offset} ({} total).", items.len()));
    }

    let remaining = items.len() - end;
    let mut result = RunResult::ok(String::new());
    if remaining > 0 {
        lines.push(format!("... and {remaining} more"));
        let mut next = args.clone();
        next.insert("offset".into(), end.to_string());
        next.insert("limit".into(), limit.to_string());
        result.can_continue = true;
        result.continue_prompt = format!("Show {} more of {remaining} remaining?", limit.min(remaining));
        result.continue_params = next;
    }
    result.output = lines.join("\n");
    result
}

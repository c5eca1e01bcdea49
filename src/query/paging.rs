//! Page-boundary memo for backends that can only continue a forward
//! cursor after a marker and cannot skip.
//!
//! For each `(signature, page_size)` the cache remembers the marker that
//! ends every page walked so far. Page `n` starts right after the end of
//! page `n - 1`; when that boundary is unknown the missing pages are walked
//! synchronously, recording each boundary on the way.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::types::Paging;

/// Where a requested page starts.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStart<M> {
    First,
    After(M),
    /// The result set ends before the requested page.
    Exhausted,
}

#[derive(Debug)]
struct PagingEntry<M> {
    page_end: HashMap<usize, M>,
    /// Boundaries of pages `0..walked` are all known.
    walked: usize,
}

impl<M> PagingEntry<M> {
    fn new() -> Self {
        PagingEntry {
            page_end: HashMap::new(),
            walked: 0,
        }
    }

    fn reset(&mut self) {
        self.page_end.clear();
        self.walked = 0;
    }
}

type Buckets<M> = HashMap<usize, Arc<Mutex<PagingEntry<M>>>>;

pub struct PagingCache<M> {
    entries: Mutex<HashMap<String, Buckets<M>>>,
}

impl<M: Clone> PagingCache<M> {
    pub fn new() -> Self {
        PagingCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, signature: &str, page_size: usize) -> Arc<Mutex<PagingEntry<M>>> {
        let mut entries = self.entries.lock();
        entries
            .entry(signature.to_string())
            .or_default()
            .entry(page_size)
            .or_insert_with(|| Arc::new(Mutex::new(PagingEntry::new())))
            .clone()
    }

    /// Resolve the start of `paging.page_num`.
    ///
    /// `fetch(after, limit)` reads up to `limit` documents following
    /// `after` (from the beginning when `None`) and returns how many it
    /// read and the marker of the last one.
    pub fn adapt_paging<F>(&self, signature: &str, paging: Paging, mut fetch: F) -> Result<PageStart<M>>
    where
        F: FnMut(Option<&M>, usize) -> Result<(usize, Option<M>)>,
    {
        if paging.page_size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "page size must be positive".to_string(),
            ));
        }
        let target = paging.page_num;
        if target == 0 {
            return Ok(PageStart::First);
        }

        let entry = self.entry(signature, paging.page_size);
        let mut entry = entry.lock();

        if target > entry.walked {
            log::debug!(
                "paging walk for {} (size {}): pages {}..{}",
                signature, paging.page_size, entry.walked, target
            );
        }
        while entry.walked < target {
            let page = entry.walked;
            let after = match page {
                0 => None,
                _ => entry.page_end.get(&(page - 1)).cloned(),
            };
            let (count, last) = fetch(after.as_ref(), paging.page_size)?;
            match last {
                Some(marker) if count >= paging.page_size => {
                    entry.page_end.insert(page, marker);
                    entry.walked = page + 1;
                }
                _ => return Ok(PageStart::Exhausted),
            }
        }

        match entry.page_end.get(&(target - 1)) {
            Some(marker) => Ok(PageStart::After(marker.clone())),
            None => Ok(PageStart::Exhausted),
        }
    }

    /// Remember the end of a page that was just served. Only a full page
    /// directly after the walked range extends it.
    pub fn record_page(&self, signature: &str, paging: Paging, count: usize, last: Option<M>) {
        if paging.page_size == 0 || count < paging.page_size {
            return;
        }
        let Some(marker) = last else { return };
        let entry = self.entry(signature, paging.page_size);
        let mut entry = entry.lock();
        if paging.page_num == entry.walked {
            entry.page_end.insert(paging.page_num, marker);
            entry.walked += 1;
        }
    }

    /// Forget every boundary recorded for `signature`, at every page size.
    pub fn clean(&self, signature: &str) {
        let buckets: Vec<_> = match self.entries.lock().get(signature) {
            Some(buckets) => buckets.values().cloned().collect(),
            None => return,
        };
        for entry in buckets {
            entry.lock().reset();
        }
    }

    pub fn walked(&self, signature: &str, page_size: usize) -> usize {
        let entries = self.entries.lock();
        entries
            .get(signature)
            .and_then(|b| b.get(&page_size))
            .map(|e| e.lock().walked)
            .unwrap_or(0)
    }

    /// Number of signatures with at least one bucket.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<M: Clone> Default for PagingCache<M> {
    fn default() -> Self {
        Self::new()
    }
}

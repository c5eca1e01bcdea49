//! Write-back of in-memory documents.
//!
//! Callers keep mutating a shared document and call [`Watcher::update`];
//! the watcher persists each dirty document at most once per sweep, in
//! transactional batches, once it has been quiet for `time_range`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::store::DocumentStore;
use crate::core::types::Document;
use crate::writer::batch::{BatchWriter, FlushReport};

pub const DEFAULT_BATCH_SIZE: usize = 150;

/// What happens to staged keys whose batch fails to commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Keys stay clean; the write is lost until the next update.
    #[default]
    AtMostOnce,
    /// Keys are marked dirty again and retried next sweep.
    AtLeastOnce,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub time_range: Duration,
    pub batch_size: usize,
    pub durability: Durability,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            time_range: Duration::from_secs(1),
            batch_size: DEFAULT_BATCH_SIZE,
            durability: Durability::AtMostOnce,
        }
    }
}

impl WatcherConfig {
    pub fn with_time_range(time_range: Duration) -> Self {
        WatcherConfig {
            time_range,
            ..Self::default()
        }
    }
}

/// Document shared between application code and the watcher.
pub type SharedDocument<D> = Arc<RwLock<D>>;

/// Anything the watcher can identify and serialize on demand.
pub trait Watchable: Send + Sync {
    fn watched_id(&self) -> String;
    fn snapshot(&self) -> Result<Value>;
}

impl<D: Document> Watchable for RwLock<D> {
    fn watched_id(&self) -> String {
        self.read().id()
    }

    fn snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(&*self.read())?)
    }
}

struct WatchedDocument {
    collection: String,
    id: String,
    document: Arc<dyn Watchable>,
}

#[derive(Debug, Clone, Copy)]
struct WatchState {
    last_touch: Instant,
    dirty: bool,
    /// Bumped by every update and every forced put.
    version: u64,
}

struct WatcherInner {
    store: Arc<dyn DocumentStore>,
    config: WatcherConfig,
    documents: Mutex<HashMap<String, WatchedDocument>>,
    states: Mutex<HashMap<String, WatchState>>,
    run_lock: Mutex<()>,
    running: AtomicBool,
}

fn watch_key(collection: &str, id: &str) -> String {
    format!("{}${}", collection, id)
}

fn same_document(a: &Arc<dyn Watchable>, b: &Arc<dyn Watchable>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Cheap to clone; clones share the same watch set.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    pub fn new(store: Arc<dyn DocumentStore>, config: WatcherConfig) -> Self {
        Watcher {
            inner: Arc::new(WatcherInner {
                store,
                config,
                documents: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                run_lock: Mutex::new(()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    /// Start tracking `document` in `collection` without persisting it.
    ///
    /// A key belongs to one shared document: watching a different handle
    /// under a key already in use is `AlreadyWatched`. Watching the same
    /// handle again is a no-op.
    pub fn watch<D: Document + 'static>(&self, collection: &str, document: &SharedDocument<D>) -> Result<()> {
        let document: Arc<dyn Watchable> = document.clone();
        let id = document.watched_id();
        let key = watch_key(collection, &id);

        {
            let mut documents = self.inner.documents.lock();
            if let Some(existing) = documents.get(&key) {
                if same_document(&existing.document, &document) {
                    return Ok(());
                }
                return Err(Error::new(
                    ErrorKind::AlreadyWatched,
                    format!("{} is watched through another handle", key),
                ));
            }
            documents.insert(key.clone(), WatchedDocument {
                collection: collection.to_string(),
                id,
                document,
            });
        }

        self.inner.states.lock().insert(key, WatchState {
            last_touch: Instant::now(),
            dirty: false,
            version: 0,
        });
        Ok(())
    }

    /// [`Watcher::watch`] followed by an immediate put.
    pub fn watch_put<D: Document + 'static>(&self, collection: &str, document: &SharedDocument<D>) -> Result<()> {
        self.watch(collection, document)?;
        let id = document.read().id();
        self.update_force(collection, &id)
    }

    /// Mark a watched document dirty. It is flushed by the first sweep
    /// that runs `time_range` after the last update.
    pub fn update(&self, collection: &str, id: &str) -> Result<()> {
        let key = watch_key(collection, id);
        let mut states = self.inner.states.lock();
        match states.get_mut(&key) {
            Some(state) => {
                state.last_touch = Instant::now();
                state.dirty = true;
                state.version += 1;
                Ok(())
            }
            None => Err(Error::not_found(format!("{} is not watched", key))),
        }
    }

    /// Persist a watched document now, outside the sweep. The key is clean
    /// afterwards unless it was updated while the put was in flight.
    pub fn update_force(&self, collection: &str, id: &str) -> Result<()> {
        let key = watch_key(collection, id);
        let document = self
            .inner
            .documents
            .lock()
            .get(&key)
            .map(|w| w.document.clone())
            .ok_or_else(|| Error::not_found(format!("{} is not watched", key)))?;

        let seen = self.inner.states.lock().get(&key).map(|s| s.version);
        let value = document.snapshot()?;
        self.inner.store.put_raw(collection, id, value)?;

        if let Some(state) = self.inner.states.lock().get_mut(&key) {
            if Some(state.version) == seen {
                state.dirty = false;
            }
            state.version += 1;
        }
        Ok(())
    }

    /// Forget a key whatever its state. Pending changes are dropped.
    pub fn stop_watch(&self, collection: &str, id: &str) {
        let key = watch_key(collection, id);
        self.inner.documents.lock().remove(&key);
        self.inner.states.lock().remove(&key);
    }

    pub fn is_watched(&self, collection: &str, id: &str) -> bool {
        self.inner.documents.lock().contains_key(&watch_key(collection, id))
    }

    pub fn is_dirty(&self, collection: &str, id: &str) -> bool {
        self.inner
            .states
            .lock()
            .get(&watch_key(collection, id))
            .is_some_and(|s| s.dirty)
    }

    pub fn len(&self) -> usize {
        self.inner.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn run_cycle(&self) -> FlushReport {
        self.inner.run_cycle_at(Instant::now())
    }

    /// One sweep as if the clock read `now`.
    pub fn run_cycle_at(&self, now: Instant) -> FlushReport {
        self.inner.run_cycle_at(now)
    }

    /// Spawn the timer thread: one sweep right away, then one every
    /// `time_range` until the handle is stopped or dropped. A zero
    /// `time_range` is `InvalidArgument`.
    pub fn start(&self) -> Result<WatcherHandle> {
        if self.inner.config.time_range.is_zero() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "watcher period must be positive".to_string(),
            ));
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "watcher is already running".to_string(),
            ));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("dbengine-watcher".to_string())
            .spawn(move || {
                let period = inner.config.time_range;
                log::info!("watcher started, period {:?}", period);
                loop {
                    inner.run_cycle_at(Instant::now());
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                inner.running.store(false, Ordering::SeqCst);
                log::info!("watcher stopped");
            });

        match spawned {
            Ok(join) => Ok(WatcherHandle {
                stop: Some(stop_tx),
                join: Some(join),
            }),
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl WatcherInner {
    fn run_cycle_at(&self, now: Instant) -> FlushReport {
        let _sweep = self.run_lock.lock();

        let Some(deadline) = now.checked_sub(self.config.time_range) else {
            return FlushReport::default();
        };

        // staged keys are marked clean before the commit
        let mut due: Vec<(String, u64)> = {
            let mut states = self.states.lock();
            states
                .iter_mut()
                .filter(|(_, s)| s.dirty && s.last_touch < deadline)
                .map(|(key, s)| {
                    s.dirty = false;
                    (key.clone(), s.version)
                })
                .collect()
        };
        if due.is_empty() {
            return FlushReport::default();
        }
        due.sort();
        let staged_versions: HashMap<String, u64> = due.iter().cloned().collect();

        let mut writer = BatchWriter::new(&*self.store, self.config.batch_size);
        let mut rejected = Vec::new();
        for (key, _) in due {
            let watched = self
                .documents
                .lock()
                .get(&key)
                .map(|w| (w.collection.clone(), w.id.clone(), w.document.clone()));
            let Some((collection, id, document)) = watched else { continue };

            let staged = document
                .snapshot()
                .and_then(|value| writer.add(key.clone(), &collection, &id, value));
            if let Err(err) = staged {
                log::error!("watcher could not stage {}: {}", key, err);
                rejected.push(key);
            }
        }

        let (mut report, mut failed) = writer.finish();
        report.failed += rejected.len();
        failed.append(&mut rejected);

        if !failed.is_empty() && self.config.durability == Durability::AtLeastOnce {
            let mut states = self.states.lock();
            for key in &failed {
                // a key touched since staging is either dirty already or was
                // persisted by a forced put
                if let Some(state) = states.get_mut(key) {
                    if staged_versions.get(key) == Some(&state.version) {
                        state.dirty = true;
                    }
                }
            }
        }

        log::debug!(
            "watcher sweep: {} staged, {} committed, {} failed",
            report.staged, report.committed, report.failed
        );
        report
    }
}

/// Running timer thread. Stopping takes effect between sweeps.
pub struct WatcherHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use crate::backend::cluster::ClusterDocumentStore;
    use crate::core::result::QueryResult;
    use crate::core::store::DocumentStoreExt;
    use crate::core::transaction::Transaction;
    use crate::query::builder::Query;

    type Hook = Box<dyn Fn() + Send + Sync>;

    /// Cluster store that runs a callback while a put or a batch is in
    /// flight, standing in for another thread.
    #[derive(Default)]
    struct InterleavedStore {
        inner: Option<ClusterDocumentStore>,
        on_put: Mutex<Option<Hook>>,
        on_transaction: Mutex<Option<Hook>>,
    }

    impl InterleavedStore {
        fn new() -> Self {
            InterleavedStore {
                inner: Some(ClusterDocumentStore::local("interleaved").unwrap()),
                ..Default::default()
            }
        }

        fn inner(&self) -> &ClusterDocumentStore {
            self.inner.as_ref().unwrap()
        }
    }

    impl DocumentStore for InterleavedStore {
        fn put_raw(&self, collection: &str, id: &str, value: Value) -> Result<()> {
            if let Some(hook) = self.on_put.lock().take() {
                hook();
            }
            self.inner().put_raw(collection, id, value)
        }

        fn get_raw(&self, collection: &str, id: &str) -> Result<Value> {
            self.inner().get_raw(collection, id)
        }

        fn del(&self, collection: &str, id: &str) -> Result<()> {
            self.inner().del(collection, id)
        }

        fn query(&self, query: &Query) -> QueryResult {
            self.inner().query(query)
        }

        fn make_transaction(&self) -> Transaction {
            if let Some(hook) = self.on_transaction.lock().as_ref() {
                hook();
            }
            self.inner().make_transaction()
        }

        fn clean_paging_info(&self, query: &Query) {
            self.inner().clean_paging_info(query)
        }

        fn del_collection(&self, collection: &str) -> Result<()> {
            self.inner().del_collection(collection)
        }

        fn create_collection(&self, collection: &str) -> Result<()> {
            self.inner().create_collection(collection)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Counter {
        id: String,
        hits: u32,
    }

    impl Document for Counter {
        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn counter(id: &str) -> SharedDocument<Counter> {
        Arc::new(RwLock::new(Counter { id: id.to_string(), hits: 0 }))
    }

    fn setup(config: WatcherConfig) -> (Arc<ClusterDocumentStore>, Watcher) {
        let store = Arc::new(ClusterDocumentStore::local("watch-db").unwrap());
        let watcher = Watcher::new(store.clone(), config);
        (store, watcher)
    }

    #[test]
    fn dirty_document_waits_for_quiet_period() {
        let (store, watcher) = setup(WatcherConfig::with_time_range(Duration::from_secs(5)));
        let doc = counter("c1");
        watcher.watch("counters", &doc).unwrap();
        assert!(!watcher.is_dirty("counters", "c1"));

        doc.write().hits = 7;
        watcher.update("counters", "c1").unwrap();
        let touched = Instant::now();

        assert_eq!(watcher.run_cycle_at(touched + Duration::from_secs(2)).staged, 0);
        assert!(store.get_raw("counters", "c1").is_err());

        let report = watcher.run_cycle_at(touched + Duration::from_secs(6));
        assert_eq!(report, FlushReport { staged: 1, committed: 1, failed: 0 });
        assert!(!watcher.is_dirty("counters", "c1"));
        let saved: Counter = store.get("counters", "c1").unwrap();
        assert_eq!(saved.hits, 7);

        assert_eq!(watcher.run_cycle_at(touched + Duration::from_secs(12)).staged, 0);
    }

    #[test]
    fn other_handle_for_same_key_is_refused() {
        let (_store, watcher) = setup(WatcherConfig::default());
        let first = counter("c1");
        watcher.watch("counters", &first).unwrap();
        watcher.watch("counters", &first).unwrap();
        let err = watcher.watch("counters", &counter("c1")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyWatched);
        watcher.watch("other", &counter("c1")).unwrap();
        assert_eq!(watcher.len(), 2);
    }

    #[test]
    fn update_force_and_stop_watch() {
        let (store, watcher) = setup(WatcherConfig::default());
        let doc = counter("c2");
        watcher.watch_put("counters", &doc).unwrap();
        assert!(store.get_raw("counters", "c2").is_ok());

        watcher.update("counters", "c2").unwrap();
        watcher.update_force("counters", "c2").unwrap();
        assert!(!watcher.is_dirty("counters", "c2"));

        watcher.update("counters", "c2").unwrap();
        watcher.stop_watch("counters", "c2");
        assert!(!watcher.is_watched("counters", "c2"));
        assert!(watcher.update("counters", "c2").unwrap_err().is_not_found());
        let report = watcher.run_cycle_at(Instant::now() + Duration::from_secs(60));
        assert_eq!(report.staged, 0);
    }

    #[test]
    fn large_sweeps_are_split_into_batches() {
        let (store, watcher) = setup(WatcherConfig {
            batch_size: 10,
            ..WatcherConfig::with_time_range(Duration::from_millis(1))
        });
        let docs: Vec<_> = (0..35).map(|i| counter(&format!("c{}", i))).collect();
        for doc in &docs {
            watcher.watch("counters", doc).unwrap();
            let id = doc.read().id();
            watcher.update("counters", &id).unwrap();
        }
        let report = watcher.run_cycle_at(Instant::now() + Duration::from_secs(1));
        assert_eq!(report, FlushReport { staged: 35, committed: 35, failed: 0 });
        assert_eq!(store.pool().first().document_count("counters"), 35);
    }

    #[test]
    fn at_most_once_drops_failed_writes() {
        let (store, watcher) = setup(WatcherConfig::with_time_range(Duration::from_millis(1)));
        let doc = counter("c3");
        watcher.watch("counters", &doc).unwrap();
        watcher.update("counters", "c3").unwrap();
        store.pool().first().set_offline(true);
        let report = watcher.run_cycle_at(Instant::now() + Duration::from_secs(1));
        assert_eq!(report.failed, 1);
        assert!(!watcher.is_dirty("counters", "c3"));
    }

    #[test]
    fn update_during_forced_put_is_not_lost() {
        let store = Arc::new(InterleavedStore::new());
        let watcher = Watcher::new(store.clone(), WatcherConfig::with_time_range(Duration::from_millis(1)));
        let doc = counter("c5");
        watcher.watch("counters", &doc).unwrap();
        doc.write().hits = 1;

        let (w, d) = (watcher.clone(), doc.clone());
        *store.on_put.lock() = Some(Box::new(move || {
            d.write().hits = 2;
            w.update("counters", "c5").unwrap();
        }));
        watcher.update_force("counters", "c5").unwrap();
        let saved: Counter = store.get("counters", "c5").unwrap();
        assert_eq!(saved.hits, 1);
        assert!(watcher.is_dirty("counters", "c5"));

        watcher.run_cycle_at(Instant::now() + Duration::from_secs(1));
        let saved: Counter = store.get("counters", "c5").unwrap();
        assert_eq!(saved.hits, 2);
        assert!(!watcher.is_dirty("counters", "c5"));
    }

    #[test]
    fn failed_batch_is_not_retried_after_forced_put() {
        let store = Arc::new(InterleavedStore::new());
        let watcher = Watcher::new(store.clone(), WatcherConfig {
            durability: Durability::AtLeastOnce,
            ..WatcherConfig::with_time_range(Duration::from_millis(1))
        });
        let doc = counter("c6");
        watcher.watch("counters", &doc).unwrap();
        doc.write().hits = 3;
        watcher.update("counters", "c6").unwrap();
        store.inner().pool().first().set_offline(true);

        // the second transaction is opened right after the failed commit
        let calls = AtomicUsize::new(0);
        let (w, s) = (watcher.clone(), store.clone());
        *store.on_transaction.lock() = Some(Box::new(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                s.inner().pool().first().set_offline(false);
                w.update_force("counters", "c6").unwrap();
            }
        }));
        let report = watcher.run_cycle_at(Instant::now() + Duration::from_secs(1));
        assert_eq!(report.failed, 1);
        assert!(!watcher.is_dirty("counters", "c6"));
        let saved: Counter = store.get("counters", "c6").unwrap();
        assert_eq!(saved.hits, 3);
    }

    #[test]
    fn zero_period_cannot_start() {
        let (_store, watcher) = setup(WatcherConfig::with_time_range(Duration::ZERO));
        assert_eq!(watcher.start().err().unwrap().kind, ErrorKind::InvalidArgument);
        assert!(!watcher.is_running());
    }

    #[test]
    fn second_start_is_rejected() {
        let (_store, watcher) = setup(WatcherConfig::with_time_range(Duration::from_millis(20)));
        let handle = watcher.start().unwrap();
        assert_eq!(watcher.start().err().unwrap().kind, ErrorKind::InvalidState);
        handle.stop();
        assert!(!watcher.is_running());
        watcher.start().unwrap().stop();
    }
}

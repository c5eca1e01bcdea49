pub mod core;
pub mod pool;
pub mod query;
pub mod backend;
pub mod writer;

pub use crate::core::config::{Config, DocumentBackend, MemBackend};
pub use crate::core::engine::Engine;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::result::QueryResult;
pub use crate::core::store::{DocumentStore, DocumentStoreExt, FileStore, MemStore};
pub use crate::core::transaction::{Transaction, TransactionState};
pub use crate::core::types::{Document, ID_FIELD};
pub use crate::query::{Operator, Query, RuleSet};
pub use crate::writer::watcher::{Durability, SharedDocument, Watcher, WatcherConfig, WatcherHandle};

/*
┌──────────────────────────────────────────────────────────────────────────────────────┐
│                              DBENGINE STRUCT ARCHITECTURE                            │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── FACADE LAYER ────────────────────────────────────┐
│                                                                                      │
│  ┌────────────────────────────────────────────────────────────────────────────┐     │
│  │                               struct Engine                                │     │
│  │  document: Arc<dyn DocumentStore>   // Cluster | Cursor | File             │     │
│  │  mem: Arc<dyn MemStore>             // MemPool<C: KeyValueConnection>      │     │
│  │  files: Arc<dyn FileStore>          // LocalFileStore                      │     │
│  │  watcher_config: WatcherConfig      // handed to every Watcher             │     │
│  └────────────────────────────────────────────────────────────────────────────┘     │
│                                                                                      │
│  ┌──────────────────┐  ┌────────────────────┐  ┌──────────────────────────────┐     │
│  │ struct Query     │  │ struct QueryResult │  │ struct Transaction           │     │
│  │ • collection     │  │ • documents        │  │ • id: u64                    │     │
│  │ • condition:     │  │ • total: i64       │  │ • state: Active/Committed/   │     │
│  │   RuleSet        │  │ • error            │  │   Aborted                    │     │
│  │ • sort, paging   │  │ • available        │  │ • sink: dyn TransactionSink  │     │
│  └──────────────────┘  └────────────────────┘  └──────────────────────────────┘     │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── QUERY LAYER ─────────────────────────────────────┐
│                                                                                      │
│  RuleSet ──compile(Dialect)──► DocumentDialect → JSON operator filter                │
│     │                          CursorDialect   → CursorFilter                        │
│     └──signature()──► CompiledQueryCache<F>  (LRU, signature → compiled filter)      │
│                       PagingCache<M>         ((signature, page_size) → page_end[])   │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────────── POOL LAYER ─────────────────────────────────────┐
│                                                                                      │
│  PoolRegistry<C>                                                                     │
│  connections: [a0 a1 a2 | b0 b1 | c0]      segment_begin: [0, 3, 5]                  │
│  first()           → round-robin in segment 0                                        │
│  select_robin()    → next segment, then round-robin inside it                        │
│  select_shading(k) → byte_sum(k) % segments, then round-robin inside it              │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── WRITER LAYER ────────────────────────────────────┐
│                                                                                      │
│  Watcher ── run_cycle ──► BatchWriter ── commit every batch_size ──► Transaction     │
│  documents: key → Arc<dyn Watchable>      states: key → (last_touch, dirty)          │
└──────────────────────────────────────────────────────────────────────────────────────┘
*/

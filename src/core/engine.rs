use std::fs;
use std::sync::Arc;
use std::time::Duration;
use crate::backend::cluster::ClusterDocumentStore;
use crate::backend::cursor::CursorDocumentStore;
use crate::backend::file::LocalFileStore;
use crate::backend::file_doc::FileDocumentStore;
use crate::backend::mem::{MemNodeConnector, MemPool};
use crate::backend::node::LocalClusterConnector;
use crate::core::config::{Config, DocumentBackend, MemBackend};
use crate::core::error::Result;
use crate::core::store::{DocumentStore, FileStore, MemStore};
use crate::pool::registry::PoolRegistry;
use crate::writer::watcher::{Watcher, WatcherConfig};

/// One pool of each kind, chosen once at open time.
pub struct Engine {
    document: Arc<dyn DocumentStore>,
    mem: Arc<dyn MemStore>,
    files: Arc<dyn FileStore>,
    watcher_config: WatcherConfig,
}

impl Engine {
    pub fn open(config: &Config) -> Result<Self> {
        let document: Arc<dyn DocumentStore> = match &config.document {
            DocumentBackend::Cluster(spec) => {
                let pool = PoolRegistry::init(spec, &LocalClusterConnector::new())?;
                Arc::new(ClusterDocumentStore::with_cache_capacity(pool, config.query_cache_capacity))
            }
            DocumentBackend::Cursor(spec) => {
                let pool = PoolRegistry::init(spec, &LocalClusterConnector::new())?;
                Arc::new(CursorDocumentStore::with_cache_capacity(pool, config.query_cache_capacity))
            }
            DocumentBackend::File(root) => {
                fs::create_dir_all(root)?;
                Arc::new(FileDocumentStore::open(root.clone())?)
            }
        };

        let mem: Arc<dyn MemStore> = match &config.mem {
            MemBackend::Local => Arc::new(MemPool::local()),
            MemBackend::Cluster(spec) => Arc::new(MemPool::connect(spec, &MemNodeConnector::new())?),
        };

        fs::create_dir_all(&config.file_root)?;
        let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(config.file_root.clone())?);

        log::info!("engine opened: {} document pool, {} mem pool", config.document.kind(), config.mem.kind());
        Ok(Engine::new(document, mem, files, config.watcher_config()))
    }

    /// Assemble an engine from pools built elsewhere, e.g. over custom
    /// connectors.
    pub fn new(
        document: Arc<dyn DocumentStore>,
        mem: Arc<dyn MemStore>,
        files: Arc<dyn FileStore>,
        watcher_config: WatcherConfig,
    ) -> Self {
        Engine {
            document,
            mem,
            files,
            watcher_config,
        }
    }

    pub fn document_pool(&self) -> &Arc<dyn DocumentStore> {
        &self.document
    }

    pub fn mem_pool(&self) -> &Arc<dyn MemStore> {
        &self.mem
    }

    pub fn file_pool(&self) -> &Arc<dyn FileStore> {
        &self.files
    }

    /// Watcher over the document pool with the configured settings.
    pub fn watcher(&self) -> Watcher {
        Watcher::new(self.document.clone(), self.watcher_config.clone())
    }

    pub fn watcher_with_range(&self, time_range: Duration) -> Watcher {
        Watcher::new(self.document.clone(), WatcherConfig {
            time_range,
            ..self.watcher_config.clone()
        })
    }
}

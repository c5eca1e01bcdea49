use std::collections::BTreeMap;
use std::sync::Arc;
use serde_json::Value;
use crate::backend::node::{document_key, ClusterNode, LocalClusterConnector, ShardedSink};
use crate::core::error::Result;
use crate::core::result::QueryResult;
use crate::core::store::DocumentStore;
use crate::core::transaction::Transaction;
use crate::core::types::{from_stored, to_stored, ID_FIELD};
use crate::pool::registry::{Connector, PoolRegistry};
use crate::query::builder::Query;
use crate::query::cache::{CacheStats, CompiledQueryCache, DEFAULT_CAPACITY};
use crate::query::compiler::{compile, compile_sort};
use crate::query::dialect::DocumentDialect;
use crate::query::matcher::{lookup, sort_documents, DocumentMatcher};

/// Document pool over a clustered store that can skip and count.
///
/// Documents are sharded over the pool's segments by collection and id;
/// queries read every segment and merge.
pub struct ClusterDocumentStore {
    pool: PoolRegistry<Arc<ClusterNode>>,
    compiled: CompiledQueryCache<Arc<DocumentMatcher>>,
}

impl ClusterDocumentStore {
    pub fn new(pool: PoolRegistry<Arc<ClusterNode>>) -> Self {
        Self::with_cache_capacity(pool, DEFAULT_CAPACITY)
    }

    pub fn with_cache_capacity(pool: PoolRegistry<Arc<ClusterNode>>, capacity: usize) -> Self {
        ClusterDocumentStore {
            pool,
            compiled: CompiledQueryCache::new(capacity),
        }
    }

    pub fn connect<K>(spec: &str, connector: &K) -> Result<Self>
    where
        K: Connector<Arc<ClusterNode>> + ?Sized,
    {
        Ok(Self::new(PoolRegistry::init(spec, connector)?))
    }

    /// Pool backed by in-process nodes.
    pub fn local(spec: &str) -> Result<Self> {
        Self::connect(spec, &LocalClusterConnector::new())
    }

    pub fn pool(&self) -> &PoolRegistry<Arc<ClusterNode>> {
        &self.pool
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.compiled.stats()
    }

    fn matcher(&self, query: &Query) -> Result<Arc<DocumentMatcher>> {
        self.compiled.get_or_compile(&query.signature(), || {
            let filter = compile(&DocumentDialect, &query.condition)?;
            Ok(Arc::new(DocumentMatcher::compile(&filter)?))
        })
    }

    fn matching(&self, query: &Query) -> Result<Vec<Value>> {
        let matcher = self.matcher(query)?;
        let mut docs = Vec::new();
        for segment in 0..self.pool.segment_count() {
            docs.extend(self.pool.select_id(segment).find(&query.collection, &matcher)?);
        }
        let mut order = compile_sort(&query.sort);
        order.push((ID_FIELD.to_string(), true));
        sort_documents(&mut docs, &order);
        Ok(docs)
    }

    fn run_query(&self, query: &Query) -> Result<QueryResult> {
        let docs = self.matching(query)?;

        if query.select_one {
            return Ok(QueryResult::one(docs.into_iter().next().map(from_stored)));
        }

        let total = docs.len() as i64;
        let page: Vec<Value> = match query.page() {
            Some(paging) => docs
                .into_iter()
                .skip(paging.skip())
                .take(paging.page_size)
                .map(from_stored)
                .collect(),
            None => docs.into_iter().map(from_stored).collect(),
        };
        Ok(QueryResult::many(page, total))
    }

    fn owner(&self, collection: &str, id: &str) -> &ClusterNode {
        self.pool.select_shading(&document_key(collection, id))
    }

    fn each_segment<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut(&ClusterNode) -> Result<()>,
    {
        for segment in 0..self.pool.segment_count() {
            op(self.pool.select_id(segment))?;
        }
        Ok(())
    }
}

impl DocumentStore for ClusterDocumentStore {
    fn put_raw(&self, collection: &str, id: &str, value: Value) -> Result<()> {
        let value = to_stored(id, value)?;
        self.owner(collection, id).upsert(collection, id, value)
    }

    fn get_raw(&self, collection: &str, id: &str) -> Result<Value> {
        self.owner(collection, id).get(collection, id).map(from_stored)
    }

    fn del(&self, collection: &str, id: &str) -> Result<()> {
        self.owner(collection, id).remove(collection, id)
    }

    fn query(&self, query: &Query) -> QueryResult {
        self.run_query(query).unwrap_or_else(QueryResult::failed)
    }

    fn make_transaction(&self) -> Transaction {
        Transaction::new(Arc::new(ShardedSink::from_pool(&self.pool)))
    }

    // offset paging keeps no cursor state
    fn clean_paging_info(&self, _query: &Query) {}

    fn del_collection(&self, collection: &str) -> Result<()> {
        self.each_segment(|node| node.drop_collection(collection))
    }

    fn create_collection(&self, collection: &str) -> Result<()> {
        self.each_segment(|node| node.create_collection(collection))
    }

    fn collect_distinct(&self, query: &Query, field: &str) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for doc in self.matching(query)? {
            let key = match lookup(&doc, field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

use std::cmp::Ordering;
use std::sync::Arc;
use serde_json::Value;
use crate::backend::node::{document_key, ClusterNode, LocalClusterConnector, ShardedSink};
use crate::core::error::{Error, Result};
use crate::core::result::QueryResult;
use crate::core::store::DocumentStore;
use crate::core::transaction::Transaction;
use crate::core::types::{from_stored, stored_id, to_stored, ID_FIELD};
use crate::pool::registry::{Connector, PoolRegistry};
use crate::query::builder::Query;
use crate::query::cache::{CompiledQueryCache, DEFAULT_CAPACITY};
use crate::query::compiler::{compile, compile_sort};
use crate::query::dialect::{CursorDialect, CursorFilter};
use crate::query::matcher::{compare_by, cursor_matches, lookup, total_order};
use crate::query::paging::{PageStart, PagingCache};

/// Position of a document in a query's total order: the values of its
/// sort fields followed by its id.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorMarker {
    pub keys: Vec<Value>,
    pub id: String,
}

impl CursorMarker {
    fn of(doc: &Value, order: &[(String, bool)]) -> Self {
        CursorMarker {
            keys: order
                .iter()
                .map(|(field, _)| lookup(doc, field).cloned().unwrap_or(Value::Null))
                .collect(),
            id: stored_id(doc).unwrap_or_default().to_string(),
        }
    }

    /// Ordering of `doc` relative to this marker under `order`.
    fn compare_doc(&self, doc: &Value, order: &[(String, bool)]) -> Ordering {
        for ((field, ascending), key) in order.iter().zip(&self.keys) {
            let ord = total_order(lookup(doc, field), Some(key));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        stored_id(doc).unwrap_or_default().cmp(self.id.as_str())
    }
}

/// Document pool over a store that only supports forward cursors: no
/// skip, no regex, no missing-field comparisons. Paging is emulated with
/// the boundary memo in [`PagingCache`]. Documents are sharded by
/// collection and id like the clustered store.
pub struct CursorDocumentStore {
    pool: PoolRegistry<Arc<ClusterNode>>,
    compiled: CompiledQueryCache<CursorFilter>,
    paging: PagingCache<CursorMarker>,
}

impl CursorDocumentStore {
    pub fn new(pool: PoolRegistry<Arc<ClusterNode>>) -> Self {
        Self::with_cache_capacity(pool, DEFAULT_CAPACITY)
    }

    pub fn with_cache_capacity(pool: PoolRegistry<Arc<ClusterNode>>, capacity: usize) -> Self {
        CursorDocumentStore {
            pool,
            compiled: CompiledQueryCache::new(capacity),
            paging: PagingCache::new(),
        }
    }

    pub fn connect<K>(spec: &str, connector: &K) -> Result<Self>
    where
        K: Connector<Arc<ClusterNode>> + ?Sized,
    {
        Ok(Self::new(PoolRegistry::init(spec, connector)?))
    }

    pub fn local(spec: &str) -> Result<Self> {
        Self::connect(spec, &LocalClusterConnector::new())
    }

    pub fn pool(&self) -> &PoolRegistry<Arc<ClusterNode>> {
        &self.pool
    }

    pub fn paging_cache(&self) -> &PagingCache<CursorMarker> {
        &self.paging
    }

    fn filter(&self, query: &Query) -> Result<CursorFilter> {
        self.compiled
            .get_or_compile(&query.signature(), || compile(&CursorDialect, &query.condition))
    }

    /// Requested sort plus the id tie-break that makes cursors well defined.
    fn order(query: &Query) -> Vec<(String, bool)> {
        let mut order = compile_sort(&query.sort);
        order.push((ID_FIELD.to_string(), true));
        order
    }

    /// One forward cursor read: up to `limit` documents after `after`.
    fn fetch(
        &self,
        query: &Query,
        filter: &CursorFilter,
        order: &[(String, bool)],
        after: Option<&CursorMarker>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut docs = Vec::new();
        for segment in 0..self.pool.segment_count() {
            docs.extend(
                self.pool
                    .select_id(segment)
                    .scan(&query.collection, |doc| cursor_matches(filter, doc))?,
            );
        }
        docs.sort_by(|a, b| compare_by(a, b, order));

        let start = match after {
            Some(marker) => docs.partition_point(|doc| marker.compare_doc(doc, order) != Ordering::Greater),
            None => 0,
        };
        let end = match limit {
            Some(limit) => (start + limit).min(docs.len()),
            None => docs.len(),
        };
        Ok(docs.drain(start..end).collect())
    }

    fn run_query(&self, query: &Query) -> Result<QueryResult> {
        let filter = self.filter(query)?;
        let order = Self::order(query);

        if query.select_one {
            let docs = self.fetch(query, &filter, &order, None, Some(1))?;
            return Ok(QueryResult::one(docs.into_iter().next().map(from_stored)));
        }

        let Some(paging) = query.page() else {
            let docs = self.fetch(query, &filter, &order, None, None)?;
            let total = docs.len() as i64;
            return Ok(QueryResult::many(docs.into_iter().map(from_stored).collect(), total));
        };

        let signature = query.signature();
        let start = self.paging.adapt_paging(&signature, paging, |after, limit| {
            let docs = self.fetch(query, &filter, &order, after, Some(limit))?;
            Ok((docs.len(), docs.last().map(|d| CursorMarker::of(d, &order))))
        })?;

        let after = match start {
            PageStart::First => None,
            PageStart::After(marker) => Some(marker),
            PageStart::Exhausted => {
                log::debug!("page {} of {} is past the end", paging.page_num, signature);
                return Ok(QueryResult::exhausted(false));
            }
        };

        let docs = self.fetch(query, &filter, &order, after.as_ref(), Some(paging.page_size))?;
        let last = docs.last().map(|d| CursorMarker::of(d, &order));
        self.paging.record_page(&signature, paging, docs.len(), last);

        // forward cursors cannot count; the total is what this page holds
        let total = docs.len() as i64;
        Ok(QueryResult::many(docs.into_iter().map(from_stored).collect(), total))
    }

    fn owner(&self, collection: &str, id: &str) -> &ClusterNode {
        self.pool.select_shading(&document_key(collection, id))
    }
}

impl DocumentStore for CursorDocumentStore {
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

    fn clean_paging_info(&self, query: &Query) {
        if query.get_paging().is_some() {
            self.paging.clean(&query.signature());
        }
    }

    fn del_collection(&self, _collection: &str) -> Result<()> {
        Err(Error::not_implemented("del_collection on a cursor store"))
    }

    fn create_collection(&self, collection: &str) -> Result<()> {
        for segment in 0..self.pool.segment_count() {
            self.pool.select_id(segment).create_collection(collection)?;
        }
        Ok(())
    }
}

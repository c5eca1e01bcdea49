use std::collections::BTreeMap;
use std::time::Duration;
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::core::error::{Error, Result};
use crate::core::result::QueryResult;
use crate::core::transaction::Transaction;
use crate::core::types::Document;
use crate::query::builder::Query;

/// Document pool: CRUD, filtered queries and transactional batches.
pub trait DocumentStore: Send + Sync {
    fn put_raw(&self, collection: &str, id: &str, value: Value) -> Result<()>;

    fn get_raw(&self, collection: &str, id: &str) -> Result<Value>;

    /// Deleting a missing document is `NotFound`.
    fn del(&self, collection: &str, id: &str) -> Result<()>;

    /// Compilation failures come back as an unavailable result carrying
    /// the error; no node is contacted in that case.
    fn query(&self, query: &Query) -> QueryResult;

    /// All operations of one transaction succeed or none do.
    fn make_transaction(&self) -> Transaction;

    fn is_no_record_error(&self, err: &Error) -> bool {
        err.is_not_found()
    }

    /// Forget cursor positions for the query's shape.
    fn clean_paging_info(&self, query: &Query);

    fn del_collection(&self, collection: &str) -> Result<()>;

    fn create_collection(&self, collection: &str) -> Result<()>;

    /// Count of matching documents per distinct value of `field`.
    fn collect_distinct(&self, _query: &Query, _field: &str) -> Result<BTreeMap<String, usize>> {
        Err(Error::not_implemented("collect_distinct"))
    }
}

/// Typed helpers over any [`DocumentStore`].
pub trait DocumentStoreExt: DocumentStore {
    fn put<D: Document>(&self, collection: &str, document: &D) -> Result<()> {
        let value = serde_json::to_value(document)?;
        self.put_raw(collection, &document.id(), value)
    }

    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<T> {
        let value = self.get_raw(collection, id)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

/// Key/counter pool. `*_shading` variants route by key so a key always
/// lands on the same cluster.
pub trait MemStore: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn set_int(&self, key: &str, value: i64) -> Result<()>;
    fn incr_int(&self, key: &str) -> Result<i64>;
    fn decr_int(&self, key: &str) -> Result<i64>;
    fn incr_int_by(&self, key: &str, num: i64) -> Result<i64>;
    fn decr_int_by(&self, key: &str, num: i64) -> Result<i64>;

    fn set_shading(&self, key: &str, value: &str) -> Result<()>;
    fn set_int_shading(&self, key: &str, value: i64) -> Result<()>;
    fn incr_int_shading(&self, key: &str) -> Result<i64>;
    fn decr_int_shading(&self, key: &str) -> Result<i64>;
    fn incr_int_by_shading(&self, key: &str, num: i64) -> Result<i64>;
    fn decr_int_by_shading(&self, key: &str, num: i64) -> Result<i64>;

    fn set_expire(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    fn set_int_expire(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;
    fn set_expire_shading(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    fn set_int_expire_shading(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    fn get(&self, key: &str) -> Result<String>;
    fn get_int(&self, key: &str) -> Result<i64>;
    fn get_shading(&self, key: &str) -> Result<String>;
    fn get_int_shading(&self, key: &str) -> Result<i64>;

    fn del(&self, key: &str) -> Result<()>;
    fn del_shading(&self, key: &str) -> Result<()>;

    /// Keys matching a glob pattern (`*`, `?`, `[...]`) across every segment.
    fn find_key(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Blob pool over absolute, root-relative paths.
pub trait FileStore: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    fn delete(&self, path: &str) -> Result<()>;
}

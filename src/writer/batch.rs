use serde_json::Value;
use crate::core::error::Result;
use crate::core::store::DocumentStore;
use crate::core::transaction::Transaction;

/// Outcome of one flush sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub staged: usize,
    pub committed: usize,
    pub failed: usize,
}

/// Batch writer for bulk puts: stages into a transaction and commits every
/// `batch_size` items. A failed commit is logged and its keys are kept so
/// the caller can decide what to do with them.
pub struct BatchWriter<'a, K> {
    store: &'a dyn DocumentStore,
    transaction: Transaction,
    pending: Vec<K>,
    failed: Vec<K>,
    batch_size: usize,
    report: FlushReport,
}

impl<'a, K> BatchWriter<'a, K> {
    pub fn new(store: &'a dyn DocumentStore, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        BatchWriter {
            store,
            transaction: store.make_transaction(),
            pending: Vec::with_capacity(batch_size),
            failed: Vec::new(),
            batch_size,
            report: FlushReport::default(),
        }
    }

    /// Stage a put tagged with `key`. Staging errors are returned before
    /// anything is buffered.
    pub fn add(&mut self, key: K, collection: &str, id: &str, value: Value) -> Result<()> {
        self.transaction.put_raw(collection, id, value)?;
        self.pending.push(key);
        self.report.staged += 1;

        if self.pending.len() >= self.batch_size {
            self.flush();
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let count = self.pending.len();
        match self.transaction.commit() {
            Ok(()) => {
                self.report.committed += count;
                self.pending.clear();
            }
            Err(err) => {
                log::error!("batch of {} puts failed to commit: {}", count, err);
                self.report.failed += count;
                self.failed.append(&mut self.pending);
            }
        }
        self.transaction = self.store.make_transaction();
    }

    /// Commit the remainder; returns the report and the keys whose batch
    /// failed.
    pub fn finish(mut self) -> (FlushReport, Vec<K>) {
        self.flush();
        (self.report, self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::backend::cluster::ClusterDocumentStore;

    #[test]
    fn commits_every_batch_size_items() {
        let store = ClusterDocumentStore::local("db").unwrap();
        let mut writer = BatchWriter::new(&store, 3);
        for i in 0..7 {
            writer.add(i, "c", &format!("d{}", i), json!({"n": i})).unwrap();
        }
        // two full batches are already visible before finish
        assert_eq!(store.pool().first().document_count("c"), 6);
        let (report, failed) = writer.finish();
        assert_eq!(report, FlushReport { staged: 7, committed: 7, failed: 0 });
        assert!(failed.is_empty());
    }

    #[test]
    fn failed_batches_return_their_keys() {
        let store = ClusterDocumentStore::local("db").unwrap();
        let mut writer = BatchWriter::new(&store, 2);
        writer.add("a", "c", "a", json!({})).unwrap();
        writer.add("b", "c", "b", json!({})).unwrap();
        store.pool().first().set_offline(true);
        writer.add("c", "c", "c", json!({})).unwrap();
        assert!(writer.add("bad", "c", "bad", json!(3)).is_err());
        let (report, failed) = writer.finish();
        assert_eq!(report, FlushReport { staged: 3, committed: 2, failed: 1 });
        assert_eq!(failed, vec!["c"]);
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use serde_json::Value;
use crate::backend::file::LocalFileStore;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::result::QueryResult;
use crate::core::store::{DocumentStore, FileStore};
use crate::core::transaction::{Transaction, TransactionOp, TransactionSink};
use crate::core::types::{from_stored, to_stored};
use crate::query::builder::Query;

const EXTENSION: &str = ".json";

fn document_path(collection: &str, id: &str) -> Result<String> {
    for part in [collection, id] {
        if part.is_empty() || part == "." || part == ".." || part.contains('/') {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("`{}` cannot be used as a path segment", part),
            ));
        }
    }
    Ok(format!("/{}/{}{}", collection, id, EXTENSION))
}

/// Last-resort document pool: one JSON file per document under
/// `/<collection>/<id>.json`. No query support.
pub struct FileDocumentStore {
    files: LocalFileStore,
}

impl FileDocumentStore {
    pub fn new(files: LocalFileStore) -> Self {
        FileDocumentStore { files }
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(LocalFileStore::new(root)?))
    }

    /// Ids of every document in `collection`, sorted.
    pub fn all_document_ids(&self, collection: &str) -> Result<Vec<String>> {
        let names = self.files.list(&format!("/{}", collection))?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_suffix(EXTENSION).map(str::to_string))
            .collect())
    }
}

impl DocumentStore for FileDocumentStore {
    fn put_raw(&self, collection: &str, id: &str, value: Value) -> Result<()> {
        let path = document_path(collection, id)?;
        let value = to_stored(id, value)?;
        self.files.write(&path, &serde_json::to_vec(&value)?)
    }

    fn get_raw(&self, collection: &str, id: &str) -> Result<Value> {
        let bytes = self.files.read(&document_path(collection, id)?)?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(from_stored(value))
    }

    fn del(&self, collection: &str, id: &str) -> Result<()> {
        self.files.delete(&document_path(collection, id)?)
    }

    fn query(&self, _query: &Query) -> QueryResult {
        QueryResult::failed(Error::not_implemented("query on the file document store"))
    }

    fn make_transaction(&self) -> Transaction {
        Transaction::new(Arc::new(FileTransactionSink {
            files: self.files.clone(),
        }))
    }

    fn clean_paging_info(&self, _query: &Query) {}

    fn del_collection(&self, collection: &str) -> Result<()> {
        self.files.delete_dir(&format!("/{}", collection))
    }

    fn create_collection(&self, collection: &str) -> Result<()> {
        self.files.create_dir(&format!("/{}", collection))
    }
}

struct FileTransactionSink {
    files: LocalFileStore,
}

impl FileTransactionSink {
    fn previous(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.files.read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn apply_one(&self, op: &TransactionOp, undo: &mut Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        match op {
            TransactionOp::Put { collection, id, value } => {
                let path = document_path(collection, id)?;
                let bytes = serde_json::to_vec(value)?;
                undo.push((path.clone(), self.previous(&path)?));
                self.files.write(&path, &bytes)
            }
            TransactionOp::Delete { collection, id } => {
                let path = document_path(collection, id)?;
                if let Some(previous) = self.previous(&path)? {
                    undo.push((path.clone(), Some(previous)));
                    self.files.delete(&path)?;
                }
                Ok(())
            }
            TransactionOp::DropCollection { .. } => Ok(()),
        }
    }

    fn restore(&self, undo: Vec<(String, Option<Vec<u8>>)>) {
        for (path, previous) in undo.into_iter().rev() {
            let restored = match previous {
                Some(bytes) => self.files.write(&path, &bytes),
                None => match self.files.delete(&path) {
                    Err(err) if err.is_not_found() => Ok(()),
                    other => other,
                },
            };
            if let Err(err) = restored {
                log::error!("could not restore {} after failed transaction: {}", path, err);
            }
        }
    }
}

impl TransactionSink for FileTransactionSink {
    fn apply(&self, ops: &[TransactionOp]) -> Result<()> {
        // dropping a directory cannot be undone file by file
        if let Some(op) = ops.iter().find(|op| matches!(op, TransactionOp::DropCollection { .. })) {
            return Err(Error::new(
                ErrorKind::TransactionFailure,
                format!("cannot drop `{}` inside a file transaction", op.collection()),
            ));
        }

        let mut undo = Vec::with_capacity(ops.len());
        for op in ops {
            if let Err(err) = self.apply_one(op, &mut undo) {
                self.restore(undo);
                return Err(Error::new(
                    ErrorKind::TransactionFailure,
                    format!("file transaction rolled back: {}", err),
                ));
            }
        }
        Ok(())
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{to_stored, Document};

/// Transaction ID generator
static TRANSACTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Staged operation. `Put` values already carry the reserved id field.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOp {
    Put { collection: String, id: String, value: Value },
    Delete { collection: String, id: String },
    DropCollection { collection: String },
}

impl TransactionOp {
    pub fn collection(&self) -> &str {
        match self {
            TransactionOp::Put { collection, .. } => collection,
            TransactionOp::Delete { collection, .. } => collection,
            TransactionOp::DropCollection { collection } => collection,
        }
    }
}

/// Backend side of a commit. `apply` must leave the store untouched when
/// it returns an error.
pub trait TransactionSink: Send + Sync {
    fn apply(&self, ops: &[TransactionOp]) -> Result<()>;
}

/// Batch of puts and deletes committed all-or-nothing through a sink.
pub struct Transaction {
    pub id: u64,
    state: TransactionState,
    operations: Vec<TransactionOp>,
    sink: Arc<dyn TransactionSink>,
}

impl Transaction {
    pub fn new(sink: Arc<dyn TransactionSink>) -> Self {
        Transaction {
            id: TRANSACTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            state: TransactionState::Active,
            operations: Vec::new(),
            sink,
        }
    }

    /// Start (or restart) staging. Anything staged before is discarded.
    pub fn begin(&mut self) {
        self.operations.clear();
        self.state = TransactionState::Active;
    }

    pub fn put<D: Document>(&mut self, collection: &str, document: &D) -> Result<()> {
        let value = serde_json::to_value(document)?;
        self.put_raw(collection, &document.id(), value)
    }

    pub fn put_raw(&mut self, collection: &str, id: &str, value: Value) -> Result<()> {
        self.check_active()?;
        let value = to_stored(id, value)?;
        self.operations.push(TransactionOp::Put {
            collection: collection.to_string(),
            id: id.to_string(),
            value,
        });
        Ok(())
    }

    pub fn del(&mut self, collection: &str, id: &str) -> Result<()> {
        self.check_active()?;
        self.operations.push(TransactionOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    pub fn del_collection(&mut self, collection: &str) -> Result<()> {
        self.check_active()?;
        self.operations.push(TransactionOp::DropCollection {
            collection: collection.to_string(),
        });
        Ok(())
    }

    /// Hand every staged operation to the sink in one call.
    pub fn commit(&mut self) -> Result<()> {
        self.check_active()?;

        if self.operations.is_empty() {
            self.state = TransactionState::Committed;
            return Ok(());
        }

        match self.sink.apply(&self.operations) {
            Ok(()) => {
                log::debug!("transaction {} committed {} operations", self.id, self.operations.len());
                self.state = TransactionState::Committed;
                self.operations.clear();
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::Aborted;
                self.operations.clear();
                Err(err)
            }
        }
    }

    /// Rollback/abort transaction
    pub fn rollback(&mut self) {
        self.state = TransactionState::Aborted;
        self.operations.clear();
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[TransactionOp] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("transaction {} is not active ({:?})", self.id, self.state),
            ));
        }
        Ok(())
    }
}

pub mod node;
pub mod cluster;
pub mod cursor;
pub mod file;
pub mod file_doc;
pub mod mem;

pub use cluster::ClusterDocumentStore;
pub use cursor::{CursorDocumentStore, CursorMarker};
pub use file::LocalFileStore;
pub use file_doc::FileDocumentStore;
pub use mem::{KeyValueConnection, MemNode, MemNodeConnector, MemPool};
pub use node::{ClusterNode, LocalClusterConnector};

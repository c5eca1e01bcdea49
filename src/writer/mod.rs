pub mod batch;
pub mod watcher;

pub use batch::{BatchWriter, FlushReport};
pub use watcher::{Durability, SharedDocument, Watchable, Watcher, WatcherConfig, WatcherHandle};

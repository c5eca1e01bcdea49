pub mod error;
pub mod types;
pub mod transaction;
pub mod result;
pub mod store;
pub mod config;
pub mod engine;

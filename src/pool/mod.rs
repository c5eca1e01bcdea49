pub mod descriptor;
pub mod registry;

pub use descriptor::{ClusterDescriptor, ConnectionSpec, TlsOptions};
pub use registry::{shading_hash, Connector, PoolRegistry};

use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::{Error, ErrorKind, Result};
use crate::pool::descriptor::{ClusterDescriptor, ConnectionSpec};

/// Establishes one connection to the cluster a descriptor names.
/// `replica` is the connection's index inside its segment.
pub trait Connector<C> {
    fn connect(&self, descriptor: &ClusterDescriptor, replica: usize) -> Result<C>;
}

impl<C, F> Connector<C> for F
where
    F: Fn(&ClusterDescriptor, usize) -> Result<C>,
{
    fn connect(&self, descriptor: &ClusterDescriptor, replica: usize) -> Result<C> {
        self(descriptor, replica)
    }
}

/// Segmented pool of equivalent connections.
///
/// Every cluster descriptor becomes one segment of `replicas` connections.
/// All connections live in one flat vector; `segment_begin[i]` is the
/// flattened index of segment `i`'s first connection.
pub struct PoolRegistry<C> {
    connections: Vec<C>,
    descriptors: Vec<ClusterDescriptor>,
    segment_len: Vec<usize>,
    segment_begin: Vec<usize>,
    segment_cursor: Vec<AtomicUsize>,
    robin_cursor: AtomicUsize,
}

impl<C> PoolRegistry<C> {
    /// Parse `spec` and connect every replica. The first transport
    /// failure aborts construction; there is no partially built pool.
    pub fn init<K>(spec: &str, connector: &K) -> Result<Self>
    where
        K: Connector<C> + ?Sized,
    {
        let spec = ConnectionSpec::parse(spec)?;
        Self::from_spec(&spec, connector)
    }

    /// Connect an already parsed spec. A descriptor asking for zero
    /// replicas gets one.
    pub fn from_spec<K>(spec: &ConnectionSpec, connector: &K) -> Result<Self>
    where
        K: Connector<C> + ?Sized,
    {
        if spec.clusters.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "connection spec names no cluster".to_string(),
            ));
        }
        let mut registry = PoolRegistry::empty();

        for descriptor in &spec.clusters {
            let descriptor = ClusterDescriptor {
                replicas: descriptor.replicas.max(1),
                ..descriptor.clone()
            };
            let mut segment = Vec::with_capacity(descriptor.replicas);
            for replica in 0..descriptor.replicas {
                let connection = connector.connect(&descriptor, replica).map_err(|err| {
                    log::error!("failed to connect to {}: {}", descriptor, err);
                    match err.kind {
                        ErrorKind::TransportFailure => err,
                        _ => Error::new(
                            ErrorKind::TransportFailure,
                            format!("{}: {}", descriptor, err.context),
                        ),
                    }
                })?;
                segment.push(connection);
            }
            registry.push_segment(descriptor, segment);
        }

        log::info!(
            "pool ready: {} connections in {} segments",
            registry.len(),
            registry.segment_count()
        );
        Ok(registry)
    }

    /// One-connection pool, for in-process nodes that need no descriptor.
    pub fn single(descriptor: ClusterDescriptor, connection: C) -> Self {
        let mut registry = PoolRegistry::empty();
        registry.push_segment(descriptor, vec![connection]);
        registry
    }

    fn empty() -> Self {
        PoolRegistry {
            connections: Vec::new(),
            descriptors: Vec::new(),
            segment_len: Vec::new(),
            segment_begin: Vec::new(),
            segment_cursor: Vec::new(),
            robin_cursor: AtomicUsize::new(0),
        }
    }

    fn push_segment(&mut self, descriptor: ClusterDescriptor, segment: Vec<C>) {
        self.segment_begin.push(self.connections.len());
        self.segment_len.push(segment.len());
        self.segment_cursor.push(AtomicUsize::new(0));
        self.descriptors.push(descriptor);
        self.connections.extend(segment);
    }

    /// Round-robin inside segment 0 only.
    pub fn first(&self) -> &C {
        self.advance(0)
    }

    /// Round-robin inside the given segment.
    pub fn select_id(&self, segment: usize) -> &C {
        self.advance(segment % self.segment_count())
    }

    /// Round-robin across segments, then within the chosen segment.
    pub fn select_robin(&self) -> &C {
        let segment = self.robin_cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
            % self.segment_count();
        self.advance(segment)
    }

    /// The same key always lands in the same segment; load is still
    /// spread over that segment's connections.
    pub fn select_shading(&self, key: &str) -> &C {
        self.advance(self.segment_of(key))
    }

    pub fn segment_of(&self, key: &str) -> usize {
        shading_hash(key) % self.segment_count()
    }

    fn advance(&self, segment: usize) -> &C {
        let round = self.segment_cursor[segment]
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
            % self.segment_len[segment];
        &self.connections[self.segment_begin[segment] + round]
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.segment_len.len()
    }

    pub fn segment_len(&self, segment: usize) -> usize {
        self.segment_len[segment]
    }

    pub fn segment_begin(&self, segment: usize) -> usize {
        self.segment_begin[segment]
    }

    pub fn descriptor(&self, segment: usize) -> &ClusterDescriptor {
        &self.descriptors[segment]
    }

    pub fn connections(&self) -> &[C] {
        &self.connections
    }
}

/// Additive byte sum. Kept deliberately simple so every process routes a
/// key the same way.
pub fn shading_hash(key: &str) -> usize {
    key.bytes().map(|b| b as usize).sum()
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::transaction::{TransactionOp, TransactionSink};
use crate::pool::descriptor::ClusterDescriptor;
use crate::pool::registry::{shading_hash, Connector, PoolRegistry};
use crate::query::matcher::DocumentMatcher;

type Collection = BTreeMap<String, Value>;

/// In-process document node standing in for one cluster's driver.
///
/// Documents are kept in their stored form (reserved id field included),
/// ordered by id inside each collection.
pub struct ClusterNode {
    address: String,
    collections: RwLock<HashMap<String, Collection>>,
    online: AtomicBool,
}

impl ClusterNode {
    pub fn new(address: impl Into<String>) -> Self {
        ClusterNode {
            address: address.into(),
            collections: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Simulate a dropped link: every call fails with `TransportFailure`
    /// until the node is brought back.
    pub fn set_offline(&self, offline: bool) {
        self.online.store(!offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::TransportFailure,
                format!("node {} is unreachable", self.address),
            ))
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Value> {
        self.check_online()?;
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{}/{}", collection, id)))
    }

    pub fn upsert(&self, collection: &str, id: &str, value: Value) -> Result<()> {
        self.check_online()?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    pub fn remove(&self, collection: &str, id: &str) -> Result<()> {
        self.check_online()?;
        self.collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("{}/{}", collection, id)))
    }

    pub fn create_collection(&self, collection: &str) -> Result<()> {
        self.check_online()?;
        self.collections.write().entry(collection.to_string()).or_default();
        Ok(())
    }

    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        self.check_online()?;
        self.collections.write().remove(collection);
        Ok(())
    }

    /// Documents of `collection` accepted by `keep`, in id order.
    pub fn scan<P>(&self, collection: &str, keep: P) -> Result<Vec<Value>>
    where
        P: Fn(&Value) -> bool,
    {
        self.check_online()?;
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().filter(|doc| keep(doc)).cloned().collect())
            .unwrap_or_default())
    }

    pub fn find(&self, collection: &str, matcher: &DocumentMatcher) -> Result<Vec<Value>> {
        self.scan(collection, |doc| matcher.matches(doc))
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

impl TransactionSink for ClusterNode {
    /// Applied under a single write lock; nothing after the reachability
    /// check can fail, so the batch lands whole or not at all.
    fn apply(&self, ops: &[TransactionOp]) -> Result<()> {
        self.check_online()?;
        let mut collections = self.collections.write();
        for op in ops {
            match op {
                TransactionOp::Put { collection, id, value } => {
                    collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), value.clone());
                }
                TransactionOp::Delete { collection, id } => {
                    if let Some(docs) = collections.get_mut(collection) {
                        docs.remove(id);
                    }
                }
                TransactionOp::DropCollection { collection } => {
                    collections.remove(collection);
                }
            }
        }
        Ok(())
    }
}

/// Shard key of a document. Every document op routes on it, so a put and
/// the get after it reach the same segment.
pub fn document_key(collection: &str, id: &str) -> String {
    format!("{}${}", collection, id)
}

/// Commit target for a pool of one or more segments.
///
/// Puts and deletes go to the segment owning their document key; a
/// collection drop goes to every segment. Each segment's share of the
/// batch is applied under that node's write lock, after every involved
/// node has been checked for reachability.
pub struct ShardedSink {
    segments: Vec<Arc<ClusterNode>>,
}

impl ShardedSink {
    pub fn new(segments: Vec<Arc<ClusterNode>>) -> Self {
        ShardedSink { segments }
    }

    /// One connection per segment, in segment order.
    pub fn from_pool(pool: &PoolRegistry<Arc<ClusterNode>>) -> Self {
        Self::new((0..pool.segment_count()).map(|segment| pool.select_id(segment).clone()).collect())
    }

    fn split(&self, ops: &[TransactionOp]) -> Vec<Vec<TransactionOp>> {
        let mut groups = vec![Vec::new(); self.segments.len()];
        for op in ops {
            match op {
                TransactionOp::Put { collection, id, .. } | TransactionOp::Delete { collection, id } => {
                    let segment = shading_hash(&document_key(collection, id)) % groups.len();
                    groups[segment].push(op.clone());
                }
                TransactionOp::DropCollection { .. } => {
                    for group in groups.iter_mut() {
                        group.push(op.clone());
                    }
                }
            }
        }
        groups
    }
}

impl TransactionSink for ShardedSink {
    fn apply(&self, ops: &[TransactionOp]) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::new(
                ErrorKind::TransactionFailure,
                "no segment to commit to".to_string(),
            ));
        }
        let groups = self.split(ops);
        for (node, group) in self.segments.iter().zip(&groups) {
            if !group.is_empty() {
                node.check_online()?;
            }
        }
        for (node, group) in self.segments.iter().zip(&groups) {
            if !group.is_empty() {
                node.apply(group)?;
            }
        }
        Ok(())
    }
}

/// Hands out one shared [`ClusterNode`] per address, so every replica of a
/// segment (and every pool built from the same connector) sees the same
/// data.
#[derive(Default)]
pub struct LocalClusterConnector {
    nodes: Mutex<HashMap<String, Arc<ClusterNode>>>,
}

impl LocalClusterConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, address: &str) -> Option<Arc<ClusterNode>> {
        self.nodes.lock().get(address).cloned()
    }
}

impl Connector<Arc<ClusterNode>> for LocalClusterConnector {
    fn connect(&self, descriptor: &ClusterDescriptor, replica: usize) -> Result<Arc<ClusterNode>> {
        if let Some(ca) = descriptor.tls.as_ref().and_then(|tls| tls.ca_bundle.as_ref()) {
            if !ca.exists() {
                return Err(Error::new(
                    ErrorKind::TransportFailure,
                    format!("CA bundle {} not found", ca.display()),
                ));
            }
        }

        log::debug!("connecting replica {} of {}", replica, descriptor);
        let mut nodes = self.nodes.lock();
        let node = nodes
            .entry(descriptor.address.clone())
            .or_insert_with(|| Arc::new(ClusterNode::new(descriptor.address.clone())));
        Ok(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::pool::registry::PoolRegistry;

    #[test]
    fn remove_missing_is_not_found() {
        let node = ClusterNode::new("n");
        node.upsert("c", "1", json!({"a": 1})).unwrap();
        node.remove("c", "1").unwrap();
        assert!(node.remove("c", "1").unwrap_err().is_not_found());
        assert!(node.get("c", "1").unwrap_err().is_not_found());
    }

    #[test]
    fn offline_node_rejects_batches_untouched() {
        let node = ClusterNode::new("n");
        node.set_offline(true);
        let ops = vec![TransactionOp::Put {
            collection: "c".to_string(),
            id: "1".to_string(),
            value: json!({}),
        }];
        assert_eq!(node.apply(&ops).unwrap_err().kind, ErrorKind::TransportFailure);
        node.set_offline(false);
        assert_eq!(node.document_count("c"), 0);
        node.apply(&ops).unwrap();
        assert_eq!(node.document_count("c"), 1);
    }

    #[test]
    fn replicas_share_one_node() {
        let connector = LocalClusterConnector::new();
        let pool: PoolRegistry<Arc<ClusterNode>> =
            PoolRegistry::init("alpha[3],beta", &connector).unwrap();
        pool.first().upsert("c", "x", json!({"v": 1})).unwrap();
        for _ in 0..3 {
            assert!(pool.first().get("c", "x").is_ok());
        }
        assert_eq!(connector.node("beta").unwrap().document_count("c"), 0);
    }

    #[test]
    fn sharded_sink_routes_by_document_key() {
        let connector = LocalClusterConnector::new();
        let pool: PoolRegistry<Arc<ClusterNode>> =
            PoolRegistry::init("left,right", &connector).unwrap();
        let sink = ShardedSink::from_pool(&pool);
        let ops: Vec<TransactionOp> = (0..10)
            .map(|i| TransactionOp::Put {
                collection: "c".to_string(),
                id: format!("d{}", i),
                value: json!({"i": i}),
            })
            .collect();
        sink.apply(&ops).unwrap();

        for i in 0..10 {
            let id = format!("d{}", i);
            assert!(pool.select_shading(&document_key("c", &id)).get("c", &id).is_ok());
        }
        let left = connector.node("left").unwrap().document_count("c");
        let right = connector.node("right").unwrap().document_count("c");
        assert_eq!(left + right, 10);
        assert!(left > 0 && right > 0);
    }

    #[test]
    fn sharded_sink_is_untouched_when_one_segment_is_down() {
        let connector = LocalClusterConnector::new();
        let pool: PoolRegistry<Arc<ClusterNode>> =
            PoolRegistry::init("left,right", &connector).unwrap();
        connector.node("right").unwrap().set_offline(true);
        let ops: Vec<TransactionOp> = (0..4)
            .map(|i| TransactionOp::Put {
                collection: "c".to_string(),
                id: format!("d{}", i),
                value: json!({}),
            })
            .collect();
        let err = ShardedSink::from_pool(&pool).apply(&ops).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportFailure);
        assert_eq!(connector.node("left").unwrap().document_count("c"), 0);
    }

    #[test]
    fn missing_ca_bundle_fails_pool_construction() {
        let connector = LocalClusterConnector::new();
        let result: Result<PoolRegistry<Arc<ClusterNode>>> =
            PoolRegistry::init("host?ssl=true&ssl_ca_certs=/definitely/missing.pem", &connector);
        assert_eq!(result.err().unwrap().kind, ErrorKind::TransportFailure);
    }
}

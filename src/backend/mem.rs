use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use regex::Regex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::store::MemStore;
use crate::pool::descriptor::ClusterDescriptor;
use crate::pool::registry::{Connector, PoolRegistry};

/// The handful of key/value primitives a cache driver must offer.
pub trait KeyValueConnection: Send + Sync {
    /// Missing or expired keys are `NotFound`.
    fn get(&self, key: &str) -> Result<String>;
    /// `ttl` of `None` keeps the key until deleted.
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    /// Atomic add; a missing key counts from zero.
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;
    /// Deleting a missing key is not an error.
    fn del(&self, key: &str) -> Result<()>;
    fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

impl<T: KeyValueConnection + ?Sized> KeyValueConnection for Arc<T> {
    fn get(&self, key: &str) -> Result<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        (**self).set(key, value, ttl)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).incr_by(key, delta)
    }

    fn del(&self, key: &str) -> Result<()> {
        (**self).del(key)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        (**self).keys(pattern)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache node. Expiry is checked lazily on access.
#[derive(Debug, Default)]
pub struct MemNode {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueConnection for MemNode {
    fn get(&self, key: &str) -> Result<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                Err(Error::not_found(format!("key {} expired", key)))
            }
            None => Err(Error::not_found(format!("key {}", key))),
        }
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if !e.is_live(now) {
                    *e = Entry { value: "0".to_string(), expires_at: None };
                }
            })
            .or_insert_with(|| Entry { value: "0".to_string(), expires_at: None });

        let current: i64 = entry.value.parse().map_err(|_| {
            Error::new(ErrorKind::InvalidArgument, format!("key {} does not hold an integer", key))
        })?;
        let next = current.checked_add(delta).ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, format!("counter {} would overflow", key))
        })?;
        entry.value = next.to_string();
        Ok(next)
    }

    fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Translate a cache-style glob (`*`, `?`, `[abc]`, `[^a-z]`, `\x`) into an
/// anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('^') | Some('!')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                if !closed {
                    return Err(Error::invalid_query(format!("unterminated class in `{}`", pattern)));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Ok(Regex::new(&out)?)
}

/// Hands out one shared [`MemNode`] per address.
#[derive(Default)]
pub struct MemNodeConnector {
    nodes: Mutex<HashMap<String, Arc<MemNode>>>,
}

impl MemNodeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, address: &str) -> Option<Arc<MemNode>> {
        self.nodes.lock().get(address).cloned()
    }
}

impl Connector<Arc<MemNode>> for MemNodeConnector {
    fn connect(&self, descriptor: &ClusterDescriptor, _replica: usize) -> Result<Arc<MemNode>> {
        Ok(self
            .nodes
            .lock()
            .entry(descriptor.address.clone())
            .or_default()
            .clone())
    }
}

/// Key/counter pool. Plain operations stay in the first segment; the
/// `_shading` variants route each key to a fixed segment.
pub struct MemPool<C> {
    pool: PoolRegistry<C>,
}

impl<C: KeyValueConnection> MemPool<C> {
    pub fn new(pool: PoolRegistry<C>) -> Self {
        MemPool { pool }
    }

    pub fn connect<K>(spec: &str, connector: &K) -> Result<Self>
    where
        K: Connector<C> + ?Sized,
    {
        Ok(Self::new(PoolRegistry::init(spec, connector)?))
    }

    pub fn pool(&self) -> &PoolRegistry<C> {
        &self.pool
    }

    fn negated(key: &str, num: i64) -> Result<i64> {
        num.checked_neg().ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, format!("cannot decrement {} by {}", key, num))
        })
    }

    fn parse_int(key: &str, raw: String) -> Result<i64> {
        raw.trim().parse().map_err(|_| {
            Error::new(ErrorKind::Parse, format!("key {} holds `{}`, not an integer", key, raw))
        })
    }
}

impl MemPool<Arc<MemNode>> {
    /// Single in-process node.
    pub fn local() -> Self {
        MemPool::new(PoolRegistry::single(
            ClusterDescriptor::new("local"),
            Arc::new(MemNode::new()),
        ))
    }
}

impl<C: KeyValueConnection> MemStore for MemPool<C> {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.pool.first().set(key, value.to_string(), None)
    }

    fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.pool.first().set(key, value.to_string(), None)
    }

    fn incr_int(&self, key: &str) -> Result<i64> {
        self.pool.first().incr_by(key, 1)
    }

    fn decr_int(&self, key: &str) -> Result<i64> {
        self.pool.first().incr_by(key, -1)
    }

    fn incr_int_by(&self, key: &str, num: i64) -> Result<i64> {
        self.pool.first().incr_by(key, num)
    }

    fn decr_int_by(&self, key: &str, num: i64) -> Result<i64> {
        self.pool.first().incr_by(key, Self::negated(key, num)?)
    }

    fn set_shading(&self, key: &str, value: &str) -> Result<()> {
        self.pool.select_shading(key).set(key, value.to_string(), None)
    }

    fn set_int_shading(&self, key: &str, value: i64) -> Result<()> {
        self.pool.select_shading(key).set(key, value.to_string(), None)
    }

    fn incr_int_shading(&self, key: &str) -> Result<i64> {
        self.pool.select_shading(key).incr_by(key, 1)
    }

    fn decr_int_shading(&self, key: &str) -> Result<i64> {
        self.pool.select_shading(key).incr_by(key, -1)
    }

    fn incr_int_by_shading(&self, key: &str, num: i64) -> Result<i64> {
        self.pool.select_shading(key).incr_by(key, num)
    }

    fn decr_int_by_shading(&self, key: &str, num: i64) -> Result<i64> {
        self.pool.select_shading(key).incr_by(key, Self::negated(key, num)?)
    }

    fn set_expire(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.pool.first().set(key, value.to_string(), Some(ttl))
    }

    fn set_int_expire(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.pool.first().set(key, value.to_string(), Some(ttl))
    }

    fn set_expire_shading(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.pool.select_shading(key).set(key, value.to_string(), Some(ttl))
    }

    fn set_int_expire_shading(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.pool.select_shading(key).set(key, value.to_string(), Some(ttl))
    }

    fn get(&self, key: &str) -> Result<String> {
        self.pool.first().get(key)
    }

    fn get_int(&self, key: &str) -> Result<i64> {
        Self::parse_int(key, self.pool.first().get(key)?)
    }

    fn get_shading(&self, key: &str) -> Result<String> {
        self.pool.select_shading(key).get(key)
    }

    fn get_int_shading(&self, key: &str) -> Result<i64> {
        Self::parse_int(key, self.pool.select_shading(key).get(key)?)
    }

    fn del(&self, key: &str) -> Result<()> {
        self.pool.first().del(key)
    }

    fn del_shading(&self, key: &str) -> Result<()> {
        self.pool.select_shading(key).del(key)
    }

    fn find_key(&self, pattern: &str) -> Result<Vec<String>> {
        let mut found = BTreeSet::new();
        for segment in 0..self.pool.segment_count() {
            found.extend(self.pool.select_id(segment).keys(pattern)?);
        }
        Ok(found.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn counters_start_from_zero() {
        let mem = MemPool::local();
        assert_eq!(mem.incr_int("hits").unwrap(), 1);
        assert_eq!(mem.incr_int_by("hits", 9).unwrap(), 10);
        assert_eq!(mem.decr_int_by("hits", 4).unwrap(), 6);
        assert_eq!(mem.decr_int("fresh").unwrap(), -1);
        assert_eq!(mem.get_int("hits").unwrap(), 6);
    }

    #[test]
    fn missing_and_expired_keys_are_not_found() {
        let mem = MemPool::local();
        assert!(mem.get("absent").unwrap_err().is_not_found());
        mem.set_expire("flash", "x", Duration::from_millis(20)).unwrap();
        assert_eq!(mem.get("flash").unwrap(), "x");
        thread::sleep(Duration::from_millis(40));
        assert!(mem.get("flash").unwrap_err().is_not_found());
        mem.del("absent").unwrap();
    }

    #[test]
    fn decrement_by_min_is_rejected() {
        let mem = MemPool::local();
        mem.set_int("k", 5).unwrap();
        assert_eq!(mem.decr_int_by("k", i64::MIN).unwrap_err().kind, ErrorKind::InvalidArgument);
        assert_eq!(
            mem.decr_int_by_shading("k", i64::MIN).unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
        assert_eq!(mem.get_int("k").unwrap(), 5);
        assert_eq!(mem.incr_int_by("k", i64::MAX).unwrap_err().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn non_integer_values() {
        let mem = MemPool::local();
        mem.set("name", "lan").unwrap();
        assert_eq!(mem.get_int("name").unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(mem.incr_int("name").unwrap_err().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn glob_patterns() {
        let re = glob_to_regex("user:[0-9]?:*").unwrap();
        assert!(re.is_match("user:12:profile"));
        assert!(!re.is_match("user:ab:profile"));
        assert!(glob_to_regex("a.b").unwrap().is_match("a.b"));
        assert!(!glob_to_regex("a.b").unwrap().is_match("axb"));
        assert!(glob_to_regex("[^x]y").unwrap().is_match("ay"));
        assert!(glob_to_regex("[abc").is_err());
    }

    #[test]
    fn sharded_keys_stay_on_their_segment() {
        let connector = MemNodeConnector::new();
        let mem: MemPool<Arc<MemNode>> = MemPool::connect("r1[2],r2[3],r3", &connector).unwrap();
        for i in 0..30 {
            mem.incr_int_shading(&format!("counter:{}", i)).unwrap();
            mem.incr_int_shading(&format!("counter:{}", i)).unwrap();
        }
        for i in 0..30 {
            let key = format!("counter:{}", i);
            assert_eq!(mem.get_int_shading(&key).unwrap(), 2);
            let owner = mem.pool().descriptor(mem.pool().segment_of(&key)).address.clone();
            for address in ["r1", "r2", "r3"] {
                let held = connector.node(address).unwrap().get(&key).is_ok();
                assert_eq!(held, address == owner);
            }
        }
        assert_eq!(mem.find_key("counter:*").unwrap().len(), 30);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let mem = Arc::new(MemPool::local());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mem = mem.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        mem.incr_int_shading("total").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mem.get_int_shading("total").unwrap(), 2000);
    }
}

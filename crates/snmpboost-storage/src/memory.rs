use crate::error::{Result, StoreError};
use crate::KvBackend;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local backend with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the backend: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the map after dropping expired entries.
    fn live(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend offline".into()));
        }
        let now = Instant::now();
        let mut map = self.lock();
        map.retain(|_, e| e.is_live(now));
        Ok(map)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: "operation against a key holding the wrong kind of value".into(),
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live()?.get(key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.live()?.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.live()?.remove(key).is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut map = self.live()?;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut map = self.live()?;
        let matches = matches!(map.get(key), Some(Entry { value: Value::Str(s), .. }) if s == value);
        if matches {
            map.remove(key);
        }
        Ok(matches)
    }

    async fn add_member(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<()> {
        let mut map = self.live()?;
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
            }
            Value::Str(_) => return Err(wrong_type(key)),
        }
        entry.expires_at = ttl.map(|t| Instant::now() + t);
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let mut map = self.live()?;
        let now_empty = match map.get_mut(key) {
            None => return Ok(()),
            Some(Entry { value: Value::Set(set), .. }) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            map.remove(key);
        }
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.live()?.get(key) {
            None => Ok(BTreeSet::new()),
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .live()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let kv = MemoryBackend::new();
        assert!(kv.set_if_absent("lock", "a", Duration::from_millis(30)).await.unwrap());
        assert!(!kv.set_if_absent("lock", "b", Duration::from_millis(30)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(kv.set_if_absent("lock", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_if_equals_checks_owner() {
        let kv = MemoryBackend::new();
        kv.set("lock", "a", None).await.unwrap();
        assert!(!kv.delete_if_equals("lock", "b").await.unwrap());
        assert!(kv.delete_if_equals("lock", "a").await.unwrap());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn sets_drop_when_emptied() {
        let kv = MemoryBackend::new();
        kv.add_member("s", "1", None).await.unwrap();
        kv.add_member("s", "2", None).await.unwrap();
        assert_eq!(kv.members("s").await.unwrap().len(), 2);
        kv.remove_member("s", "1").await.unwrap();
        kv.remove_member("s", "2").await.unwrap();
        assert!(kv.keys("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_backend_is_unreachable() {
        let kv = MemoryBackend::new();
        kv.set_offline(true);
        let err = kv.get("x").await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn string_ops_on_set_are_rejected() {
        let kv = MemoryBackend::new();
        kv.add_member("s", "1", None).await.unwrap();
        assert!(matches!(kv.get("s").await, Err(StoreError::Corrupt { .. })));
    }
}

//! 会话存储
//!
//! 短期状态（会话句柄、验证码、中继令牌）统一放在带 TTL 的键值存储里。
//! 存储在构造时注入，不使用任何全局状态。

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::AppResult;
use crate::infrastructure::clock::Clock;

/// 带 TTL 的键值存储
///
/// 过期的条目对 `get` / `take` 不可见。
pub trait SessionStore: Send + Sync + Debug {
    /// 写入（覆盖同名键）
    fn put(&self, key: &str, value: String, ttl: Duration) -> AppResult<()>;

    /// 读取未过期的值
    fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// 读取并删除，同一个值只会被取走一次
    fn take(&self, key: &str) -> AppResult<Option<String>>;

    fn forget(&self, key: &str) -> AppResult<()>;
}

/// JSON 读写的便捷方法
pub trait SessionStoreExt: SessionStore {
    fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> AppResult<()> {
        self.put(key, serde_json::to_string(value)?, ttl)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn take_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.take(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}

/// 计算过期时间点，超出范围时按永不过期处理
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

fn sweep(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let removed = before - entries.len();
    if removed > 0 {
        debug!("🧹 清理过期会话 {} 条", removed);
    }
    removed
}

/// 进程内存储
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// 清理已过期的条目
    ///
    /// # 返回
    /// 被清理的条目数
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        sweep(&mut entries, now)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // 没人回来读的条目只能在写入时顺手清掉
        sweep(&mut entries, now);
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entry = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.get(key).cloned()
        };
        match entry {
            Some(entry) if entry.expires_at > self.clock.now() => Ok(Some(entry.value)),
            Some(_) => {
                self.forget(key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn take(&self, key: &str) -> AppResult<Option<String>> {
        let entry = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.remove(key)
        };
        Ok(entry
            .filter(|entry| entry.expires_at > self.clock.now())
            .map(|entry| entry.value))
    }

    fn forget(&self, key: &str) -> AppResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemorySessionStore) {
        let clock = Arc::new(ManualClock::default());
        let store = MemorySessionStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_put_get_take() {
        let (_, store) = store();
        store.put("a", "1".to_string(), Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.take("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.take("a").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let (clock, store) = store();
        store.put("a", "1".to_string(), Duration::from_secs(60)).unwrap();
        store.put("b", "2".to_string(), Duration::from_secs(600)).unwrap();
        clock.advance(Duration::from_secs(61));
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));

        clock.advance(Duration::from_secs(600));
        assert_eq!(store.purge_expired(), 1);
    }

    #[test]
    fn test_abandoned_entries_are_swept_on_write() {
        let (clock, store) = store();
        for i in 0..100 {
            store.put(&format!("old-{}", i), "x".to_string(), Duration::from_secs(600)).unwrap();
        }
        clock.advance(Duration::from_secs(86_400));
        for i in 0..100 {
            store.put(&format!("new-{}", i), "y".to_string(), Duration::from_secs(600)).unwrap();
        }
        assert_eq!(store.len(), 100);
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn test_json_helpers() {
        let (_, store) = store();
        store
            .put_json("k", &vec![1u32, 2, 3], Duration::from_secs(10))
            .unwrap();
        let value: Option<Vec<u32>> = store.get_json("k").unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
        store.forget("k").unwrap();
        let value: Option<Vec<u32>> = store.take_json("k").unwrap();
        assert_eq!(value, None);
    }
}

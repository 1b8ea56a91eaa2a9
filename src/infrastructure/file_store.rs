//! 磁盘会话存储
//!
//! 每个键一个 JSON 文件，供分开运行的进程共享会话（先取验证码，再提交查询）。

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::session_store::{expiry, SessionStore};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    /// 保证 take 的读取和删除是一步完成的
    guard: Mutex<()>,
}

impl FileSessionStore {
    /// # 参数
    /// - `dir`: 存放会话文件的目录，不存在时自动创建
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| AppError::storage(dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            clock,
            guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 键里除字母数字和 `-` `_` 以外的字符都换成 `_`
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn read_entry(&self, path: &Path) -> AppResult<Option<StoredEntry>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::storage(path.display().to_string(), e)),
        };
        match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("⚠️ 会话文件损坏，已忽略: {} ({})", path.display(), e);
                self.remove_file(path)?;
                Ok(None)
            }
        }
    }

    fn remove_file(&self, path: &Path) -> AppResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::storage(path.display().to_string(), e)),
        }
    }

    /// 删除目录中已过期或损坏的会话文件
    ///
    /// # 返回
    /// 被删除的文件数
    pub fn purge_expired(&self) -> AppResult<usize> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep()
    }

    /// 调用方必须持有 `guard`
    fn sweep(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let listing = fs::read_dir(&self.dir)
            .map_err(|e| AppError::storage(self.dir.display().to_string(), e))?;
        let mut removed = 0;
        for item in listing.flatten() {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_entry(&path)? {
                Some(entry) if entry.expires_at > now => {}
                Some(_) => {
                    self.remove_file(&path)?;
                    removed += 1;
                }
                // 损坏的文件已经在 read_entry 里删掉了
                None => removed += 1,
            }
        }
        if removed > 0 {
            debug!("🧹 清理过期会话文件 {} 个", removed);
        }
        Ok(removed)
    }

    fn live_value(&self, path: &Path, entry: StoredEntry) -> AppResult<Option<String>> {
        if entry.expires_at > self.clock.now() {
            Ok(Some(entry.value))
        } else {
            debug!("会话文件已过期: {}", path.display());
            self.remove_file(path)?;
            Ok(None)
        }
    }
}

impl SessionStore for FileSessionStore {
    fn put(&self, key: &str, value: String, ttl: Duration) -> AppResult<()> {
        let path = self.path_for(key);
        let entry = StoredEntry {
            value,
            expires_at: expiry(self.clock.now(), ttl),
        };
        let body = serde_json::to_string(&entry)?;

        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| AppError::storage(tmp.display().to_string(), e))?;
        fs::rename(&tmp, &path).map_err(|e| AppError::storage(path.display().to_string(), e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let path = self.path_for(key);
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        match self.read_entry(&path)? {
            Some(entry) => self.live_value(&path, entry),
            None => Ok(None),
        }
    }

    fn take(&self, key: &str) -> AppResult<Option<String>> {
        let path = self.path_for(key);
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let entry = self.read_entry(&path)?;
        self.remove_file(&path)?;
        Ok(entry
            .filter(|entry| entry.expires_at > self.clock.now())
            .map(|entry| entry.value))
    }

    fn forget(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key);
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_file(&path)
    }
}

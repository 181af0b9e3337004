//! 本地键值持久化
//!
//! 恢复管线的输入文本来自这里，备份管理器也写到这里。提供：
//! - `KvStore` trait：同步的字符串键值接口
//! - `MemoryKv`：内存实现，可模拟配额上限，用于测试
//! - `SqliteKv`：SQLite 实现，单表 kv 存储

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use thiserror::Error;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储层错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("存储空间不足: {0}")]
    QuotaExceeded(String),

    #[error("锁获取失败: {0}")]
    LockError(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================
// KvStore trait
// ============================================================

/// 同步字符串键值存储
///
/// 核心只通过这个接口接触持久化；调用方负责避免对同一个键并发读写。
pub trait KvStore {
    /// 读取键值，不存在时返回 None
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 写入键值 (覆盖)
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// 删除键
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// 按前缀列出键，升序排列
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

// ============================================================
// MemoryKv - 内存实现
// ============================================================

/// 内存键值存储
///
/// 可选的容量上限用于在测试中模拟配额耗尽。
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: Mutex<BTreeMap<String, String>>,
    max_bytes: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带容量上限的内存存储
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            max_bytes: Some(max_bytes),
        }
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.map
            .lock()
            .map_err(|e| StoreError::LockError(e.to_string()))
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.lock()?;
        if let Some(max) = self.max_bytes {
            let current: usize = map
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if current + key.len() + value.len() > max {
                return Err(StoreError::QuotaExceeded(format!(
                    "write of {} bytes exceeds quota",
                    key.len() + value.len()
                )));
            }
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================
// SqliteKv - SQLite 实现
// ============================================================

/// 初始化 kv 表
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQLite 键值存储
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKv {
    /// 打开 (或创建) 数据库文件
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(KV_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 打开内存数据库
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KV_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_connection(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockError(e.to_string()))
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.get_connection()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.get_connection()?;
        // 备份键不含通配字符，LIKE 前缀匹配足够
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE key LIKE ?1 || '%' ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store<K: KvStore>(kv: &K) {
        assert!(kv.get("missing").unwrap().is_none());

        kv.set("a::1", "one").unwrap();
        kv.set("a::2", "two").unwrap();
        kv.set("b::1", "other").unwrap();
        assert_eq!(kv.get("a::1").unwrap().as_deref(), Some("one"));

        kv.set("a::1", "uno").unwrap();
        assert_eq!(kv.get("a::1").unwrap().as_deref(), Some("uno"));

        let keys = kv.keys_with_prefix("a::").unwrap();
        assert_eq!(keys, vec!["a::1", "a::2"]);

        kv.remove("a::1").unwrap();
        assert!(kv.get("a::1").unwrap().is_none());
        kv.remove("a::1").unwrap(); // 幂等
    }

    #[test]
    fn test_memory_kv_basic_ops() {
        exercise_store(&MemoryKv::new());
    }

    #[test]
    fn test_sqlite_kv_basic_ops() {
        exercise_store(&SqliteKv::open_in_memory().unwrap());
    }

    #[test]
    fn test_memory_kv_quota() {
        let kv = MemoryKv::with_quota(16);
        kv.set("k", "0123456789").unwrap();
        let err = kv.set("k2", "0123456789").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded(_)));
        // 覆盖已有键按替换后的大小计算
        kv.set("k", "x").unwrap();
    }
}

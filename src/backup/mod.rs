//! 备份管理器
//!
//! 迁移前的时间戳快照，带数量轮转和按天过期。备份是安全网而不是前置条件：
//! 写入失败 (例如配额耗尽) 只记录日志，绝不向上传播。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kv::KvStore;

/// 备份键前缀
pub const BACKUP_KEY_PREFIX: &str = "backup";

/// 每个 store 默认保留的备份数量
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// 默认保留天数
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// 一条备份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// 所属 store 名称
    pub store_name: String,
    /// 备份时文档的 schema 版本
    pub version: i32,
    /// 备份时间
    pub created_at: DateTime<Utc>,
    /// 迁移前的完整文档快照
    pub data: Value,
}

/// 备份管理器
///
/// 键格式为 `backup::{store}::{timestamp_ms}`，时间戳零填充到 13 位，
/// 字典序即时间序，多个 store 互不冲突。
pub struct BackupManager<K: KvStore> {
    kv: K,
    max_backups: usize,
    retention_days: i64,
}

impl<K: KvStore> BackupManager<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            max_backups: DEFAULT_MAX_BACKUPS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// 自定义轮转数量和保留天数
    pub fn with_limits(kv: K, max_backups: usize, retention_days: i64) -> Self {
        Self {
            kv,
            max_backups,
            retention_days,
        }
    }

    fn key_for(store_name: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}::{}::{:013}",
            BACKUP_KEY_PREFIX,
            store_name,
            now.timestamp_millis().max(0)
        )
    }

    fn prefix_for(store_name: &str) -> String {
        format!("{}::{}::", BACKUP_KEY_PREFIX, store_name)
    }

    /// 捕获一次快照 (尽力而为，吞掉所有存储错误)
    ///
    /// 成功写入后顺手做一次轮转和过期清理。
    pub fn capture(&self, store_name: &str, doc: &Value, version: i32, now: DateTime<Utc>) {
        let record = BackupRecord {
            store_name: store_name.to_string(),
            version,
            created_at: now,
            data: doc.clone(),
        };

        let text = match serde_json::to_string(&record) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("备份序列化失败 ({}): {}", store_name, e);
                return;
            }
        };

        let key = Self::key_for(store_name, now);
        if let Err(e) = self.kv.set(&key, &text) {
            log::warn!("备份写入失败 ({}): {}", store_name, e);
            return;
        }
        log::info!("备份已创建: {}", key);

        self.prune(store_name);
        self.expire(store_name, now);
    }

    /// 列出某个 store 的全部备份键，新的在前
    pub fn list(&self, store_name: &str) -> Vec<String> {
        match self.kv.keys_with_prefix(&Self::prefix_for(store_name)) {
            Ok(mut keys) => {
                keys.reverse();
                keys
            }
            Err(e) => {
                log::warn!("备份列举失败 ({}): {}", store_name, e);
                Vec::new()
            }
        }
    }

    /// 读回一条备份记录
    pub fn restore(&self, key: &str) -> Option<BackupRecord> {
        match self.kv.get(key) {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("备份记录损坏 ({}): {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("备份读取失败 ({}): {}", key, e);
                None
            }
        }
    }

    /// 轮转：只保留最近的 max_backups 条
    pub fn prune(&self, store_name: &str) {
        let keys = self.list(store_name);
        for key in keys.iter().skip(self.max_backups) {
            if let Err(e) = self.kv.remove(key) {
                log::warn!("备份轮转删除失败 ({}): {}", key, e);
            }
        }
    }

    /// 过期清理：删除早于保留窗口的备份，与数量轮转相互独立
    pub fn expire(&self, store_name: &str, now: DateTime<Utc>) {
        let cutoff_ms = (now - chrono::Duration::days(self.retention_days)).timestamp_millis();
        let prefix = Self::prefix_for(store_name);
        for key in self.list(store_name) {
            let ts: i64 = match key.strip_prefix(&prefix).and_then(|s| s.parse().ok()) {
                Some(ts) => ts,
                None => continue,
            };
            if ts < cutoff_ms {
                if let Err(e) = self.kv.remove(&key) {
                    log::warn!("过期备份删除失败 ({}): {}", key, e);
                }
            }
        }
    }
}

//! 数据恢复编排器
//!
//! 把任意持久化字节变成可用状态的唯一入口。流程：
//! JSON 修复 → 形状校验 → 字段清洗 + 条目级部分恢复 → schema 迁移。
//!
//! 失败尽可能就地消化 (字段级 → 条目级 → 区块级)；只有原始文本彻底
//! 无法解析时才返回 `success = false`。`recover` 对任意字符串都不会 panic。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backup::BackupManager;
use crate::kv::KvStore;
use crate::migrate::{self, StoreKind, CURRENT_SCHEMA_VERSION};
use crate::repair::parse_with_repair;
use crate::sanitize::{
    sanitize_daily_goal, sanitize_progress_map, sanitize_stats, sanitize_study_history,
};
use crate::stats::recompute_word_counts;
use crate::types::{SchedulePreset, StoreState, SyncMeta, UserStore};

/// 修复发生时附带的警告，提示语法级修复可能已经丢失数据
pub const REPAIR_WARNING: &str = "JSON was repaired - some data may be lost";

// ==================== RecoveryResult ====================

/// 一次恢复尝试的结果
///
/// 每次调用新建，自身从不持久化；被持久化的是 `recovered_data`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    pub recovered: bool,
    pub partial_recovery: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 被丢弃数据的人类可读描述 (聚合，不逐条)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lost_data: Vec<String>,
    /// 已应用迁移步骤的描述 (信息性，不是警告)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrations_applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_data: Option<UserStore>,
}

impl RecoveryResult {
    fn hard_failure(reason: String) -> Self {
        Self {
            success: false,
            recovered: false,
            errors: vec![reason],
            ..Self::default()
        }
    }
}

// ==================== 形状校验 ====================

/// 单个区块的校验结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionCheck {
    Valid,
    Missing,
    WrongType,
}

impl SectionCheck {
    fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::Object(_)) => Self::Valid,
            Some(_) => Self::WrongType,
        }
    }

    /// 是否需要整块替换为默认值
    pub fn needs_default(&self) -> bool {
        !matches!(self, Self::Valid)
    }
}

/// 解析值的整体形状报告
///
/// 显式、全函数的形状校验，结果供编排器分支使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeReport {
    pub root: SectionCheck,
    pub state: SectionCheck,
    pub stats: SectionCheck,
    pub progress: SectionCheck,
    pub study_history: SectionCheck,
}

/// 校验解析值是否具有用户存储的形状
pub fn check_shape(value: &Value) -> ShapeReport {
    let root = match value {
        Value::Object(_) => SectionCheck::Valid,
        _ => SectionCheck::WrongType,
    };
    let state_val = value.get("state");
    let state = SectionCheck::of(state_val);
    let (stats, progress, study_history) = match state_val {
        Some(Value::Object(map)) => (
            SectionCheck::of(map.get("stats")),
            SectionCheck::of(map.get("progress")),
            SectionCheck::of(map.get("studyHistory")),
        ),
        _ => (SectionCheck::Missing, SectionCheck::Missing, SectionCheck::Missing),
    };
    ShapeReport {
        root,
        state,
        stats,
        progress,
        study_history,
    }
}

// ==================== 恢复入口 ====================

/// 从原始文本恢复用户存储
pub fn recover(raw: &str, now: DateTime<Utc>) -> RecoveryResult {
    recover_inner(raw, now, None::<&BackupManager<crate::kv::MemoryKv>>)
}

/// 同 [`recover`]，迁移前额外做一次快照备份 (尽力而为)
pub fn recover_with_backup<K: KvStore>(
    raw: &str,
    now: DateTime<Utc>,
    backup: &BackupManager<K>,
) -> RecoveryResult {
    recover_inner(raw, now, Some(backup))
}

fn recover_inner<K: KvStore>(
    raw: &str,
    now: DateTime<Utc>,
    backup: Option<&BackupManager<K>>,
) -> RecoveryResult {
    // 1. JSON 修复：唯一的硬失败点
    let parsed = match parse_with_repair(raw) {
        Ok(doc) => doc,
        Err(e) => return RecoveryResult::hard_failure(e.to_string()),
    };

    let mut result = RecoveryResult {
        success: true,
        recovered: true,
        ..RecoveryResult::default()
    };

    // 2. 语法级修复发生过：数据保真度可能受损
    if parsed.repaired {
        result.warnings.push(REPAIR_WARNING.to_string());
        result.partial_recovery = true;
    }

    // 3. 形状校验，缺失或类型错误的区块整块替换为默认值
    let shape = check_shape(&parsed.value);

    let mut root = match parsed.value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if shape.root.needs_default() {
        result
            .warnings
            .push("document root was not an object - reset to defaults".to_string());
        result.partial_recovery = true;
    }
    if shape.stats.needs_default() && !shape.root.needs_default() {
        result
            .warnings
            .push("stats section was missing or invalid - reset to defaults".to_string());
        result.partial_recovery = true;
    }
    if shape.progress.needs_default() && !shape.root.needs_default() {
        result
            .warnings
            .push("progress section was missing or invalid - reset to empty".to_string());
        result.partial_recovery = true;
    }
    if shape.study_history == SectionCheck::WrongType {
        result
            .warnings
            .push("study history section was invalid - reset to empty".to_string());
        result.partial_recovery = true;
    }

    let state_val = root.get("state").cloned().unwrap_or(Value::Null);
    let stats_val = state_val.get("stats").cloned().unwrap_or(Value::Null);
    let progress_val = state_val.get("progress").cloned().unwrap_or(Value::Null);
    let history_val = state_val.get("studyHistory").cloned().unwrap_or(Value::Null);

    // 4. progress 条目级部分恢复：损坏条目单独丢弃，绝不放弃整个映射
    let progress = sanitize_progress_map(&progress_val);
    if progress.repaired_fields > 0 {
        result.warnings.push(format!(
            "repaired {} corrupted field(s) in word progress",
            progress.repaired_fields
        ));
        result.partial_recovery = true;
    }

    // 5. stats 整体清洗
    let stats = if shape.stats == SectionCheck::Valid {
        let out = sanitize_stats(&stats_val);
        if out.repaired_fields > 0 {
            result.warnings.push(format!(
                "repaired {} corrupted field(s) in user stats",
                out.repaired_fields
            ));
            result.partial_recovery = true;
        }
        out.stats
    } else {
        Default::default()
    };

    let history = sanitize_study_history(&history_val);
    if history.repaired_fields > 0 {
        result.warnings.push(format!(
            "repaired {} corrupted field(s) in study history",
            history.repaired_fields
        ));
        result.partial_recovery = true;
    }

    // 6. 聚合丢弃量
    if progress.dropped_entries > 0 {
        result
            .lost_data
            .push(format!("{} word progress entries", progress.dropped_entries));
        result.partial_recovery = true;
    }
    if history.dropped_entries > 0 {
        result
            .lost_data
            .push(format!("{} study history entries", history.dropped_entries));
        result.partial_recovery = true;
    }

    // 把清洗后的区块写回原文档 (保留未知字段)，再走迁移链
    let state_entry = root
        .entry("state".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !state_entry.is_object() {
        *state_entry = Value::Object(Map::new());
    }
    if let Value::Object(state_map) = state_entry {
        state_map.insert(
            "stats".to_string(),
            serde_json::to_value(&stats).unwrap_or(Value::Null),
        );
        state_map.insert(
            "progress".to_string(),
            serde_json::to_value(&progress.progress).unwrap_or(Value::Null),
        );
        state_map.insert(
            "studyHistory".to_string(),
            serde_json::to_value(&history.history).unwrap_or(Value::Null),
        );
    }

    // 7. schema 迁移 (含可选的迁移前备份)，应用步骤作为信息性条目返回
    let migrated = match backup {
        Some(mgr) => migrate::migrate_with_backup(StoreKind::User, Value::Object(root), mgr, now),
        None => migrate::migrate(StoreKind::User, Value::Object(root)),
    };
    result.migrations_applied = migrated.result.migrations_applied.clone();

    // 8. 组装当前 schema 的类型化文档
    let migrated_state = migrated.data.get("state").cloned().unwrap_or(Value::Null);
    let sync_meta: SyncMeta = migrated_state
        .get("syncMeta")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let schedule_preset: SchedulePreset = migrated_state
        .get("schedulePreset")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let daily_goal = sanitize_daily_goal(migrated_state.get("dailyGoal"));

    let mut store = UserStore {
        state: StoreState {
            stats,
            progress: progress.progress,
            study_history: history.history,
            sync_meta,
            daily_goal,
            schedule_preset,
        },
        migration_version: CURRENT_SCHEMA_VERSION,
    };
    // 展示缓存的唯一事实来源是 progress 映射
    recompute_word_counts(&mut store.state);

    result.recovered_data = Some(store);
    result
}

// ==================== 报告与导入导出 ====================

/// 把恢复结果渲染成多行文本摘要
///
/// 纯格式化，不含任何决策逻辑。
pub fn format_report(result: &RecoveryResult) -> String {
    let mut out = String::new();

    let banner = if !result.success {
        "=== Recovery failed ==="
    } else if result.partial_recovery {
        "=== Partial recovery ==="
    } else {
        "=== Recovery succeeded ==="
    };
    out.push_str(banner);
    out.push('\n');

    let mut section = |title: &str, items: &[String]| {
        if !items.is_empty() {
            out.push_str(title);
            out.push('\n');
            for item in items {
                out.push_str("- ");
                out.push_str(item);
                out.push('\n');
            }
        }
    };

    section("Warnings:", &result.warnings);
    section("Lost data:", &result.lost_data);
    section("Migrations applied:", &result.migrations_applied);
    section("Errors:", &result.errors);

    out
}

/// 把文档序列化成用户可下载的备份文本 (确定性输出)
pub fn export_document(store: &UserStore) -> String {
    serde_json::to_string_pretty(store).unwrap_or_else(|_| "{}".to_string())
}

/// 从用户提供的文件文本导入
///
/// 对任何输入 (包括零字节文件) 都返回 RecoveryResult，从不抛错。
pub fn import_from_text(text: &str, now: DateTime<Utc>) -> RecoveryResult {
    recover(text, now)
}

//! Schema 迁移模块
//!
//! 管理持久化文档的版本迁移，确保文档结构与应用版本保持一致。
//!
//! ## 迁移策略
//! - 线性的增量迁移链，每个版本边界一个纯函数步骤
//! - 步骤只增不删：为缺失字段补安全默认值，绝不删除或重命名已有字段
//! - 迁移永不抛错：无法计算的字段回退到步骤的默认值
//! - 三个持久化 store (user / session / homework) 各有独立迁移链，
//!   共享同一个当前版本常量

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::backup::BackupManager;
use crate::kv::KvStore;
use crate::sanitize::sanitize_progress_map;
use crate::srs::is_learned;
use crate::types::DEFAULT_DAILY_GOAL;

/// 当前 schema 版本
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// 持久化 store 的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    User,
    Session,
    Homework,
}

impl StoreKind {
    /// store 名称，用于备份键和日志
    pub fn store_name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Session => "session",
            Self::Homework => "homework",
        }
    }
}

/// 单个迁移步骤
pub struct MigrationStep {
    /// 目标版本号
    pub version: i32,
    /// 人类可读的步骤描述
    pub label: &'static str,
    apply: fn(&mut Map<String, Value>),
}

impl MigrationStep {
    fn new(version: i32, label: &'static str, apply: fn(&mut Map<String, Value>)) -> Self {
        Self {
            version,
            label,
            apply,
        }
    }
}

/// 迁移结果元信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub success: bool,
    /// 迁移后的版本号
    pub version: i32,
    /// 已应用步骤的描述，按应用顺序排列
    pub migrations_applied: Vec<String>,
}

/// 迁移输出：迁移后的文档 + 结果元信息
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub data: Value,
    pub result: MigrationResult,
}

/// 获取指定 store 的全部迁移定义
///
/// 返回按版本号排序的迁移列表
pub fn get_migrations(kind: StoreKind) -> Vec<MigrationStep> {
    match kind {
        StoreKind::User => vec![
            MigrationStep::new(1, "v0→v1: Added cloud sync tracking", user_v1_sync_meta),
            MigrationStep::new(
                2,
                "v1→v2: Added study history and daily goal",
                user_v2_history_and_goal,
            ),
            MigrationStep::new(
                3,
                "v2→v3: Added schedule preset and rebuilt word counts",
                user_v3_preset_and_counts,
            ),
        ],
        StoreKind::Session => vec![
            MigrationStep::new(1, "v0→v1: Added session timing fields", session_v1_timing),
            MigrationStep::new(2, "v1→v2: Added interruption counter", session_v2_interruptions),
            MigrationStep::new(3, "v2→v3: Added device label", session_v3_device),
        ],
        StoreKind::Homework => vec![
            MigrationStep::new(1, "v0→v1: Added assignment tracking", homework_v1_assignments),
            MigrationStep::new(2, "v1→v2: Added completion timestamps", homework_v2_completion),
            MigrationStep::new(3, "v2→v3: Added feedback field", homework_v3_feedback),
        ],
    }
}

// ==================== user store 步骤 ====================

fn state_section(root: &mut Map<String, Value>) -> &mut Map<String, Value> {
    let entry = root
        .entry("state".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(map) => map,
        _ => unreachable!("state forced to an object above"),
    }
}

fn ensure_field(obj: &mut Map<String, Value>, key: &str, default: Value) {
    if !obj.contains_key(key) {
        obj.insert(key.to_string(), default);
    }
}

fn user_v1_sync_meta(root: &mut Map<String, Value>) {
    let state = state_section(root);
    if !state.get("syncMeta").map(Value::is_object).unwrap_or(false) {
        state.insert(
            "syncMeta".to_string(),
            json!({"lastSyncedAt": null, "pendingSync": false, "cloudVersion": 0}),
        );
    }
}

fn user_v2_history_and_goal(root: &mut Map<String, Value>) {
    let state = state_section(root);
    if !state.get("studyHistory").map(Value::is_object).unwrap_or(false) {
        state.insert("studyHistory".to_string(), Value::Object(Map::new()));
    }
    let goal_valid = state
        .get("dailyGoal")
        .and_then(Value::as_f64)
        .map(|v| v.is_finite() && v >= 1.0)
        .unwrap_or(false);
    if !goal_valid {
        state.insert("dailyGoal".to_string(), json!(DEFAULT_DAILY_GOAL));
    }
}

fn user_v3_preset_and_counts(root: &mut Map<String, Value>) {
    let state = state_section(root);
    let preset_valid = matches!(
        state.get("schedulePreset").and_then(Value::as_str),
        Some("aggressive") | Some("standard") | Some("relaxed")
    );
    if !preset_valid {
        state.insert("schedulePreset".to_string(), json!("standard"));
    }

    // 从 progress 映射重建单词计数缓存；progress 损坏时回退为 0，绝不失败
    let sanitized = state
        .get("progress")
        .map(sanitize_progress_map)
        .unwrap_or_default();
    let learned = sanitized.progress.values().filter(|i| is_learned(i)).count() as u32;
    let in_progress = sanitized
        .progress
        .values()
        .filter(|i| !is_learned(i) && i.times_reviewed > 0)
        .count() as u32;

    if !state.get("stats").map(Value::is_object).unwrap_or(false) {
        state.insert("stats".to_string(), Value::Object(Map::new()));
    }
    if let Some(stats) = state.get_mut("stats").and_then(Value::as_object_mut) {
        stats.insert("wordsLearned".to_string(), json!(learned));
        stats.insert("wordsInProgress".to_string(), json!(in_progress));
    }
}

// ==================== session store 步骤 ====================

fn session_v1_timing(root: &mut Map<String, Value>) {
    let state = state_section(root);
    ensure_field(state, "startedAt", Value::Null);
    ensure_field(state, "durationMs", json!(0));
}

fn session_v2_interruptions(root: &mut Map<String, Value>) {
    let state = state_section(root);
    ensure_field(state, "interruptions", json!(0));
}

fn session_v3_device(root: &mut Map<String, Value>) {
    let state = state_section(root);
    ensure_field(state, "deviceLabel", Value::Null);
}

// ==================== homework store 步骤 ====================

fn homework_v1_assignments(root: &mut Map<String, Value>) {
    let state = state_section(root);
    ensure_field(state, "assignments", Value::Object(Map::new()));
}

fn homework_v2_completion(root: &mut Map<String, Value>) {
    let state = state_section(root);
    ensure_field(state, "completedAt", Value::Object(Map::new()));
}

fn homework_v3_feedback(root: &mut Map<String, Value>) {
    let state = state_section(root);
    ensure_field(state, "feedback", Value::Object(Map::new()));
}

// ==================== 迁移执行 ====================

fn document_version(root: &Map<String, Value>) -> i32 {
    match root.get("migrationVersion").and_then(Value::as_f64) {
        Some(v) if v.is_finite() && v >= 0.0 => v as i32,
        _ => 0,
    }
}

/// 将文档迁移到当前 schema 版本
///
/// 只运行版本号严格大于文档当前版本的步骤。文档已是当前版本时零步骤运行，
/// 原样返回 (幂等)。任何输入都不会导致错误。
pub fn migrate(kind: StoreKind, doc: Value) -> MigrationOutcome {
    let mut root = match doc {
        Value::Object(map) => map,
        // 结构完全损坏：从空文档开始，迁移链补出默认结构
        _ => Map::new(),
    };

    let from_version = document_version(&root);
    let mut applied = Vec::new();
    let mut final_version = from_version;

    if from_version < CURRENT_SCHEMA_VERSION {
        log::info!(
            "迁移 {} store: v{} → v{}",
            kind.store_name(),
            from_version,
            CURRENT_SCHEMA_VERSION
        );
        for step in get_migrations(kind) {
            if step.version <= from_version {
                continue;
            }
            (step.apply)(&mut root);
            applied.push(step.label.to_string());
            final_version = step.version;
            log::info!("迁移步骤完成: {}", step.label);
        }
        root.insert("migrationVersion".to_string(), json!(final_version));
    }

    MigrationOutcome {
        data: Value::Object(root),
        result: MigrationResult {
            success: true,
            version: final_version,
            migrations_applied: applied,
        },
    }
}

/// 迁移前先对旧文档做一次快照备份 (尽力而为)
///
/// 备份失败只记录日志，绝不阻塞迁移本身。已是当前版本的文档不做备份。
pub fn migrate_with_backup<K: KvStore>(
    kind: StoreKind,
    doc: Value,
    backup: &BackupManager<K>,
    now: DateTime<Utc>,
) -> MigrationOutcome {
    let from_version = doc
        .as_object()
        .map(document_version)
        .unwrap_or(0);
    if from_version < CURRENT_SCHEMA_VERSION {
        backup.capture(kind.store_name(), &doc, from_version, now);
    }
    migrate(kind, doc)
}

//! Common Types and Constants
//!
//! Shared data structures used across the scheduler, sanitizer, migration
//! and recovery modules. The serialized (camelCase) shape of these types is
//! the wire format for both local storage and cloud sync.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==================== Constants ====================

/// Minimum ease factor (SM-2 floor)
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Maximum ease factor
pub const MAX_EASE_FACTOR: f64 = 3.0;

/// Ease factor assigned to new words
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Ease penalty applied on a lapse
pub const EASE_LAPSE_PENALTY: f64 = 0.2;

/// Lowest quality rating
pub const MIN_QUALITY: u8 = 1;

/// Highest quality rating
pub const MAX_QUALITY: u8 = 5;

/// Ratings at or above this count as a successful recall
pub const SUCCESS_QUALITY: u8 = 3;

/// Interval after the first successful repetition (days)
pub const FIRST_INTERVAL_DAYS: f64 = 1.0;

/// Interval after the second successful repetition (days)
pub const SECOND_INTERVAL_DAYS: f64 = 6.0;

/// Interval after a lapse (days)
pub const LAPSE_INTERVAL_DAYS: f64 = 1.0;

/// Upper bound on any computed interval (days)
pub const MAX_INTERVAL_DAYS: f64 = 3650.0;

/// A word counts as learned once its repetition high-water mark reaches this
pub const MASTERY_REPETITIONS: u32 = 5;

/// Minimum reviews before a word can be flagged as a leech
pub const LEECH_MIN_REVIEWS: u32 = 8;

/// Accuracy below this flags a leech
pub const LEECH_ACCURACY_THRESHOLD: f64 = 0.5;

/// Single-slot undo window (seconds)
pub const UNDO_WINDOW_SECS: i64 = 30;

/// Default daily study goal (words)
pub const DEFAULT_DAILY_GOAL: u32 = 20;

/// Level cap
pub const MAX_LEVEL: u32 = 100;

// ==================== WordProgress ====================

/// 单词学习进度
///
/// 每个 (用户, 单词) 对应一条记录，由 SRS 调度器在每次复习时更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WordProgress {
    /// 单词唯一标识
    pub word_id: String,
    /// 难度系数 (SM-2 ease factor)
    pub ease_factor: f64,
    /// 距下次复习的天数
    pub interval_days: f64,
    /// 当前连续正确次数 (遗忘后清零)
    pub repetitions: u32,
    /// 历史最高连续正确次数 (单调不减)
    #[serde(rename = "maxRepetitionsEverReached")]
    pub max_repetitions: u32,
    /// 总复习次数
    pub times_reviewed: u32,
    /// 总正确次数
    pub times_correct: u32,
    /// 最近一次评分 (1-5)
    pub last_quality_rating: u8,
    /// 下次复习时间 (首次复习前为 None)
    pub next_review_at: Option<DateTime<Utc>>,
    /// 最近复习时间
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl Default for WordProgress {
    fn default() -> Self {
        Self {
            word_id: String::new(),
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0.0,
            repetitions: 0,
            max_repetitions: 0,
            times_reviewed: 0,
            times_correct: 0,
            last_quality_rating: 0,
            next_review_at: None,
            last_reviewed_at: None,
        }
    }
}

impl WordProgress {
    /// 创建新单词的初始进度
    pub fn new(word_id: impl Into<String>) -> Self {
        Self {
            word_id: word_id.into(),
            ..Self::default()
        }
    }
}

// ==================== UserStats ====================

/// 用户聚合统计
///
/// `words_learned` / `words_in_progress` 是展示用缓存，恢复和迁移后总是
/// 从 progress 映射重新推导。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    /// 经验值
    pub xp: i64,
    /// 等级 (由 xp 确定)
    pub level: u32,
    /// 当前连续学习天数
    pub streak: u32,
    /// 历史最长连续学习天数
    pub longest_streak: u32,
    /// 已掌握单词数
    pub words_learned: u32,
    /// 学习中单词数
    pub words_in_progress: u32,
    /// 总复习次数
    pub total_reviews: u32,
    /// 总正确次数
    pub correct_reviews: u32,
    /// 最近学习日期 (YYYY-MM-DD)
    pub last_study_date: Option<String>,
    /// 已解锁成就 (有序、去重)
    pub achievements: Vec<String>,
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            streak: 0,
            longest_streak: 0,
            words_learned: 0,
            words_in_progress: 0,
            total_reviews: 0,
            correct_reviews: 0,
            last_study_date: None,
            achievements: Vec::new(),
        }
    }
}

// ==================== DailyStudy ====================

/// 单日学习记录 (studyHistory 的值)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyStudy {
    /// 当日学习的单词数
    pub words_studied: u32,
    /// 当日复习次数
    pub reviews: u32,
    /// 当日正确次数
    pub correct: u32,
    /// 当日获得经验值
    pub xp_earned: u32,
}

// ==================== SyncMeta ====================

/// 云同步追踪信息 (schema v1 引入)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncMeta {
    /// 最近同步时间
    pub last_synced_at: Option<DateTime<Utc>>,
    /// 是否存在待上传的本地变更
    pub pending_sync: bool,
    /// 云端文档版本号
    pub cloud_version: i64,
}

// ==================== SchedulePreset ====================

/// 调度偏好 (schema v3 引入)
///
/// 控制 SM-2 间隔增长速度：aggressive 缩短间隔，relaxed 拉长间隔。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePreset {
    Aggressive,
    Standard,
    Relaxed,
}

impl Default for SchedulePreset {
    fn default() -> Self {
        Self::Standard
    }
}

impl SchedulePreset {
    /// 间隔增长系数
    pub fn interval_modifier(&self) -> f64 {
        match self {
            Self::Aggressive => 0.8,
            Self::Standard => 1.0,
            Self::Relaxed => 1.25,
        }
    }
}

// ==================== StoreState / UserStore ====================

/// 用户存储的 state 部分
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreState {
    /// 聚合统计
    pub stats: UserStats,
    /// 单词进度映射 (wordId -> WordProgress)
    pub progress: BTreeMap<String, WordProgress>,
    /// 每日学习记录 (YYYY-MM-DD -> DailyStudy)
    pub study_history: BTreeMap<String, DailyStudy>,
    /// 云同步追踪 (v1)
    pub sync_meta: SyncMeta,
    /// 每日学习目标 (v2)
    pub daily_goal: u32,
    /// 调度偏好 (v3)
    pub schedule_preset: SchedulePreset,
}

/// 持久化的根文档
///
/// 本文档是持久化、清洗和迁移的最小单位。任何一次成功的恢复或迁移之后
/// `migration_version` 都等于最新 schema 版本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStore {
    pub state: StoreState,
    pub migration_version: i32,
}

impl Default for UserStore {
    fn default() -> Self {
        Self {
            state: StoreState {
                daily_goal: DEFAULT_DAILY_GOAL,
                ..StoreState::default()
            },
            migration_version: crate::migrate::CURRENT_SCHEMA_VERSION,
        }
    }
}

impl UserStore {
    /// 创建全新的空文档 (当前 schema 版本)
    pub fn fresh() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_progress_new() {
        let item = WordProgress::new("word-1");
        assert_eq!(item.word_id, "word-1");
        assert_eq!(item.ease_factor, DEFAULT_EASE_FACTOR);
        assert_eq!(item.repetitions, 0);
        assert!(item.next_review_at.is_none());
    }

    #[test]
    fn test_fresh_store_is_current_version() {
        let store = UserStore::fresh();
        assert_eq!(store.migration_version, crate::migrate::CURRENT_SCHEMA_VERSION);
        assert!(store.state.progress.is_empty());
        assert_eq!(store.state.daily_goal, DEFAULT_DAILY_GOAL);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(WordProgress::new("w")).unwrap();
        assert!(json.get("wordId").is_some());
        assert!(json.get("easeFactor").is_some());
        assert!(json.get("maxRepetitionsEverReached").is_some());
        assert!(json.get("nextReviewAt").is_some());

        let json = serde_json::to_value(UserStore::fresh()).unwrap();
        assert!(json.get("migrationVersion").is_some());
        assert!(json["state"].get("studyHistory").is_some());
        assert!(json["state"].get("syncMeta").is_some());
    }

    #[test]
    fn test_preset_modifiers_ordered() {
        assert!(SchedulePreset::Aggressive.interval_modifier() < 1.0);
        assert_eq!(SchedulePreset::Standard.interval_modifier(), 1.0);
        assert!(SchedulePreset::Relaxed.interval_modifier() > 1.0);
    }

    #[test]
    fn test_current_schema_round_trip() {
        let mut store = UserStore::fresh();
        store
            .state
            .progress
            .insert("w1".into(), WordProgress::new("w1"));
        let text = serde_json::to_string(&store).unwrap();
        let back: UserStore = serde_json::from_str(&text).unwrap();
        assert_eq!(back, store);
    }
}

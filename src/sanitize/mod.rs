//! Data Sanitization
//!
//! Field-level repair for persisted documents.
//!
//! Functions:
//! - Scalar clamping (NaN / Infinity / out-of-range / wrong-type)
//! - Full WordProgress sanitization with per-entry drop semantics
//! - Full UserStats sanitization with cross-field invariants
//! - studyHistory mapping sanitization

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::stats::level_for_xp;
use crate::types::{
    DailyStudy, UserStats, WordProgress, DEFAULT_DAILY_GOAL, DEFAULT_EASE_FACTOR, MAX_EASE_FACTOR,
    MAX_INTERVAL_DAYS, MAX_LEVEL, MAX_QUALITY, MIN_EASE_FACTOR,
};

/// 计数器类字段的安全上限
pub const MAX_COUNTER: u32 = 10_000_000;

/// 经验值安全上限
pub const MAX_XP: i64 = 1_000_000_000_000;

/// 连续天数安全上限
pub const MAX_STREAK: u32 = 100_000;

/// 可接受的毫秒时间戳范围 (2000-01-01 .. 2100-01-01)
const MIN_EPOCH_MS: i64 = 946_684_800_000;
const MAX_EPOCH_MS: i64 = 4_102_444_800_000;

// ==================== Scalar helpers ====================

/// 将浮点数修复到 [min, max]；NaN/Inf/越界时返回安全值
pub fn clamp_finite(v: f64, min: f64, max: f64, default: f64) -> f64 {
    if v.is_nan() || v.is_infinite() {
        default
    } else if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

/// 修复 ease factor
pub fn sanitize_ease(v: f64) -> f64 {
    clamp_finite(v, MIN_EASE_FACTOR, MAX_EASE_FACTOR, DEFAULT_EASE_FACTOR)
}

/// 修复复习间隔 (天)
pub fn sanitize_interval(v: f64) -> f64 {
    clamp_finite(v, 0.0, MAX_INTERVAL_DAYS, 0.0)
}

// 缺失的键按默认值处理且不计数 (旧版本文档缺字段是常态)；
// 存在但无效的值才算一次修复。
fn f64_field(obj: &Map<String, Value>, key: &str, min: f64, max: f64, default: f64, repaired: &mut u32) -> f64 {
    let value = match obj.get(key) {
        None => return default,
        Some(v) => v,
    };
    match value.as_f64() {
        Some(v) if v.is_finite() && v >= min && v <= max => v,
        Some(v) if v.is_finite() => {
            *repaired += 1;
            clamp_finite(v, min, max, default)
        }
        _ => {
            *repaired += 1;
            default
        }
    }
}

fn u32_field(obj: &Map<String, Value>, key: &str, max: u32, repaired: &mut u32) -> u32 {
    let value = match obj.get(key) {
        None => return 0,
        Some(v) => v,
    };
    match value.as_f64() {
        Some(v) if v.is_finite() && v >= 0.0 && v <= max as f64 && v.trunc() == v => v as u32,
        Some(v) if v.is_finite() => {
            *repaired += 1;
            clamp_finite(v.trunc(), 0.0, max as f64, 0.0) as u32
        }
        _ => {
            *repaired += 1;
            0
        }
    }
}

fn i64_field(obj: &Map<String, Value>, key: &str, max: i64, repaired: &mut u32) -> i64 {
    let value = match obj.get(key) {
        None => return 0,
        Some(v) => v,
    };
    match value.as_f64() {
        Some(v) if v.is_finite() && v >= 0.0 && v <= max as f64 && v.trunc() == v => v as i64,
        Some(v) if v.is_finite() => {
            *repaired += 1;
            clamp_finite(v.trunc(), 0.0, max as f64, 0.0) as i64
        }
        _ => {
            *repaired += 1;
            0
        }
    }
}

/// 修复时间戳字段
///
/// 接受 RFC 3339 字符串或毫秒时间戳；null/缺失视为合法的 None；
/// 无法解析的值修复为 None 并计数。
pub fn datetime_field(obj: &Map<String, Value>, key: &str, repaired: &mut u32) -> Option<DateTime<Utc>> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(_) => {
                *repaired += 1;
                None
            }
        },
        Some(Value::Number(n)) => match n.as_f64() {
            Some(ms) if ms.is_finite() && (MIN_EPOCH_MS..=MAX_EPOCH_MS).contains(&(ms as i64)) => {
                Utc.timestamp_millis_opt(ms as i64).single().or_else(|| {
                    *repaired += 1;
                    None
                })
            }
            _ => {
                *repaired += 1;
                None
            }
        },
        Some(_) => {
            *repaired += 1;
            None
        }
    }
}

// ==================== WordProgress ====================

/// progress 映射的清洗结果
#[derive(Debug, Clone, Default)]
pub struct ProgressSanitation {
    /// 清洗后的进度映射
    pub progress: BTreeMap<String, WordProgress>,
    /// 被修复的字段总数
    pub repaired_fields: u32,
    /// 被丢弃的条目数 (无身份或结构损坏)
    pub dropped_entries: u32,
}

/// 清洗单个进度条目
///
/// 条目不是对象、或缺失 wordId 身份时返回 None (由调用方丢弃并计数)；
/// 其余字段逐个修复，非身份字段的损坏绝不导致条目被丢弃。
pub fn sanitize_progress_entry(value: &Value) -> Option<(WordProgress, u32)> {
    let obj = value.as_object()?;

    let word_id = match obj.get("wordId").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return None,
    };

    let mut repaired = 0u32;

    let ease_factor = f64_field(
        obj,
        "easeFactor",
        MIN_EASE_FACTOR,
        MAX_EASE_FACTOR,
        DEFAULT_EASE_FACTOR,
        &mut repaired,
    );
    let interval_days = f64_field(obj, "intervalDays", 0.0, MAX_INTERVAL_DAYS, 0.0, &mut repaired);
    let repetitions = u32_field(obj, "repetitions", MAX_COUNTER, &mut repaired);
    let max_repetitions = u32_field(obj, "maxRepetitionsEverReached", MAX_COUNTER, &mut repaired);
    let times_reviewed = u32_field(obj, "timesReviewed", MAX_COUNTER, &mut repaired);
    let times_correct = u32_field(obj, "timesCorrect", MAX_COUNTER, &mut repaired);
    let last_quality_rating = u32_field(obj, "lastQualityRating", MAX_QUALITY as u32, &mut repaired) as u8;
    let next_review_at = datetime_field(obj, "nextReviewAt", &mut repaired);
    let last_reviewed_at = datetime_field(obj, "lastReviewedAt", &mut repaired);

    let mut item = WordProgress {
        word_id,
        ease_factor,
        interval_days,
        repetitions,
        max_repetitions,
        times_reviewed,
        times_correct,
        last_quality_rating,
        next_review_at,
        last_reviewed_at,
    };

    // 交叉不变量：只向下修正依赖字段
    if item.times_correct > item.times_reviewed {
        item.times_correct = item.times_reviewed;
        repaired += 1;
    }
    // 高水位语义：max 覆盖当前值；字段本就缺失时是推导而非修复
    if item.max_repetitions < item.repetitions {
        item.max_repetitions = item.repetitions;
        if obj.contains_key("maxRepetitionsEverReached") {
            repaired += 1;
        }
    }

    Some((item, repaired))
}

/// 清洗整个 progress 映射
///
/// 条目之间相互独立：单个条目不可修复时丢弃该条目，绝不放弃整个映射。
pub fn sanitize_progress_map(value: &Value) -> ProgressSanitation {
    let mut out = ProgressSanitation::default();

    let obj = match value.as_object() {
        Some(o) => o,
        None => return out,
    };

    for entry in obj.values() {
        match sanitize_progress_entry(entry) {
            Some((item, repaired)) => {
                out.repaired_fields += repaired;
                if out.progress.insert(item.word_id.clone(), item).is_some() {
                    // 两个键指向同一 wordId，旧条目被覆盖
                    out.dropped_entries += 1;
                }
            }
            None => out.dropped_entries += 1,
        }
    }

    out
}

// ==================== UserStats ====================

/// stats 的清洗结果
#[derive(Debug, Clone, Default)]
pub struct StatsSanitation {
    pub stats: UserStats,
    pub repaired_fields: u32,
}

/// 清洗用户聚合统计
///
/// 整体不是对象时返回全新默认值；字段逐个修复后再跑一遍交叉不变量
/// (correctReviews ≤ totalReviews、longestStreak ≥ streak、level 由 xp 推导)。
pub fn sanitize_stats(value: &Value) -> StatsSanitation {
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            return StatsSanitation {
                stats: UserStats::default(),
                repaired_fields: 1,
            }
        }
    };

    let mut repaired = 0u32;

    let xp = i64_field(obj, "xp", MAX_XP, &mut repaired);
    let level = u32_field(obj, "level", MAX_LEVEL, &mut repaired).max(1);
    let streak = u32_field(obj, "streak", MAX_STREAK, &mut repaired);
    let longest_streak = u32_field(obj, "longestStreak", MAX_STREAK, &mut repaired);
    let words_learned = u32_field(obj, "wordsLearned", MAX_COUNTER, &mut repaired);
    let words_in_progress = u32_field(obj, "wordsInProgress", MAX_COUNTER, &mut repaired);
    let total_reviews = u32_field(obj, "totalReviews", MAX_COUNTER, &mut repaired);
    let correct_reviews = u32_field(obj, "correctReviews", MAX_COUNTER, &mut repaired);

    let last_study_date = match obj.get("lastStudyDate") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => {
            Some(s.clone())
        }
        Some(_) => {
            repaired += 1;
            None
        }
    };

    let achievements = match obj.get("achievements") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut seen = Vec::new();
            for item in items {
                match item.as_str() {
                    Some(s) if !s.is_empty() => {
                        if !seen.iter().any(|x| x == s) {
                            seen.push(s.to_string());
                        }
                    }
                    _ => repaired += 1,
                }
            }
            seen
        }
        Some(_) => {
            repaired += 1;
            Vec::new()
        }
    };

    let mut stats = UserStats {
        xp,
        level,
        streak,
        longest_streak,
        words_learned,
        words_in_progress,
        total_reviews,
        correct_reviews,
        last_study_date,
        achievements,
    };

    // 交叉不变量；字段本就缺失时按推导处理，不算修复
    if stats.correct_reviews > stats.total_reviews {
        stats.correct_reviews = stats.total_reviews;
        repaired += 1;
    }
    if stats.longest_streak < stats.streak {
        stats.longest_streak = stats.streak;
        if obj.contains_key("longestStreak") {
            repaired += 1;
        }
    }
    let derived_level = level_for_xp(stats.xp);
    if stats.level != derived_level {
        stats.level = derived_level;
        if obj.contains_key("level") {
            repaired += 1;
        }
    }

    StatsSanitation {
        stats,
        repaired_fields: repaired,
    }
}

// ==================== studyHistory ====================

/// studyHistory 映射的清洗结果
#[derive(Debug, Clone, Default)]
pub struct HistorySanitation {
    pub history: BTreeMap<String, DailyStudy>,
    pub repaired_fields: u32,
    pub dropped_entries: u32,
}

// JSON.stringify 将 NaN/Infinity 序列化为 null，因此显式 null 即非有限值的标记。
fn history_num(obj: &Map<String, Value>, key: &str) -> Result<(u32, u32), ()> {
    match obj.get(key) {
        None => Ok((0, 0)),
        Some(Value::Null) => Err(()),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => Ok((clamp_finite(v.trunc(), 0.0, MAX_COUNTER as f64, 0.0) as u32, 0)),
            _ => Err(()),
        },
        Some(_) => Ok((0, 1)),
    }
}

/// 清洗 studyHistory 映射
///
/// 键必须是 YYYY-MM-DD 日期字符串，值必须是对象且数值有限，否则整条丢弃；
/// 缺失或类型错误的字段修复为 0。
pub fn sanitize_study_history(value: &Value) -> HistorySanitation {
    let mut out = HistorySanitation::default();

    let obj = match value.as_object() {
        Some(o) => o,
        None => return out,
    };

    for (key, entry) in obj {
        if NaiveDate::parse_from_str(key, "%Y-%m-%d").is_err() {
            out.dropped_entries += 1;
            continue;
        }
        let entry_obj = match entry.as_object() {
            Some(o) => o,
            None => {
                out.dropped_entries += 1;
                continue;
            }
        };

        let fields = [
            history_num(entry_obj, "wordsStudied"),
            history_num(entry_obj, "reviews"),
            history_num(entry_obj, "correct"),
            history_num(entry_obj, "xpEarned"),
        ];
        if fields.iter().any(|f| f.is_err()) {
            // 非有限数值：整条丢弃
            out.dropped_entries += 1;
            continue;
        }
        let vals: Vec<(u32, u32)> = fields.into_iter().map(|f| f.unwrap_or((0, 0))).collect();

        let mut day = DailyStudy {
            words_studied: vals[0].0,
            reviews: vals[1].0,
            correct: vals[2].0,
            xp_earned: vals[3].0,
        };
        out.repaired_fields += vals.iter().map(|v| v.1).sum::<u32>();

        if day.correct > day.reviews {
            day.correct = day.reviews;
            out.repaired_fields += 1;
        }

        out.history.insert(key.clone(), day);
    }

    out
}

// ==================== Misc sections ====================

/// 修复 dailyGoal 字段
pub fn sanitize_daily_goal(value: Option<&Value>) -> u32 {
    match value.and_then(Value::as_f64) {
        Some(v) if v.is_finite() && v >= 1.0 => clamp_finite(v.trunc(), 1.0, 1000.0, DEFAULT_DAILY_GOAL as f64) as u32,
        _ => DEFAULT_DAILY_GOAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==================== clamp_finite 测试 ====================

    #[test]
    fn test_clamp_finite_passes_valid() {
        assert_eq!(clamp_finite(2.0, 1.3, 3.0, 2.5), 2.0);
        assert_eq!(clamp_finite(1.3, 1.3, 3.0, 2.5), 1.3);
    }

    #[test]
    fn test_clamp_finite_nan_and_infinity() {
        assert_eq!(clamp_finite(f64::NAN, 0.0, 1.0, 0.5), 0.5);
        assert_eq!(clamp_finite(f64::INFINITY, 0.0, 1.0, 0.5), 0.5);
        assert_eq!(clamp_finite(f64::NEG_INFINITY, 0.0, 1.0, 0.5), 0.5);
    }

    #[test]
    fn test_clamp_finite_out_of_range() {
        assert_eq!(clamp_finite(-3.0, 0.0, 10.0, 1.0), 0.0);
        assert_eq!(clamp_finite(99.0, 0.0, 10.0, 1.0), 10.0);
    }

    #[test]
    fn test_sanitize_ease_floor() {
        assert_eq!(sanitize_ease(0.4), MIN_EASE_FACTOR);
        assert_eq!(sanitize_ease(f64::NAN), DEFAULT_EASE_FACTOR);
        assert_eq!(sanitize_ease(2.1), 2.1);
    }

    // ==================== progress 条目测试 ====================

    #[test]
    fn test_entry_valid_survives_unchanged() {
        let v = json!({
            "wordId": "w1",
            "easeFactor": 2.5,
            "intervalDays": 6.0,
            "repetitions": 2,
            "maxRepetitionsEverReached": 4,
            "timesReviewed": 10,
            "timesCorrect": 8,
            "lastQualityRating": 4,
            "nextReviewAt": "2026-01-01T00:00:00Z",
            "lastReviewedAt": null
        });
        let (item, repaired) = sanitize_progress_entry(&v).unwrap();
        assert_eq!(repaired, 0);
        assert_eq!(item.word_id, "w1");
        assert_eq!(item.interval_days, 6.0);
        assert_eq!(item.times_correct, 8);
        assert!(item.next_review_at.is_some());
    }

    #[test]
    fn test_entry_missing_identity_dropped() {
        assert!(sanitize_progress_entry(&json!({"easeFactor": 2.5})).is_none());
        assert!(sanitize_progress_entry(&json!({"wordId": ""})).is_none());
        assert!(sanitize_progress_entry(&json!(42)).is_none());
        assert!(sanitize_progress_entry(&json!("text")).is_none());
    }

    #[test]
    fn test_entry_corrupt_fields_repaired_not_dropped() {
        let v = json!({
            "wordId": "w1",
            "easeFactor": "garbage",
            "intervalDays": -5.0,
            "repetitions": 1e18,
            "timesReviewed": 3,
            "timesCorrect": 7
        });
        let (item, repaired) = sanitize_progress_entry(&v).unwrap();
        assert!(repaired > 0);
        assert_eq!(item.ease_factor, DEFAULT_EASE_FACTOR);
        assert_eq!(item.interval_days, 0.0);
        assert_eq!(item.times_correct, 3); // clamped down to timesReviewed
    }

    #[test]
    fn test_entry_max_repetitions_high_water() {
        let v = json!({"wordId": "w1", "repetitions": 6, "maxRepetitionsEverReached": 2});
        let (item, _) = sanitize_progress_entry(&v).unwrap();
        assert_eq!(item.max_repetitions, 6);
    }

    #[test]
    fn test_entry_bad_dates_repaired_to_none() {
        let v = json!({
            "wordId": "w1",
            "nextReviewAt": "not-a-date",
            "lastReviewedAt": 123.5e40
        });
        let (item, repaired) = sanitize_progress_entry(&v).unwrap();
        assert!(item.next_review_at.is_none());
        assert!(item.last_reviewed_at.is_none());
        assert!(repaired >= 2);
    }

    #[test]
    fn test_entry_epoch_millis_accepted() {
        let v = json!({"wordId": "w1", "lastReviewedAt": 1700000000000i64});
        let (item, _) = sanitize_progress_entry(&v).unwrap();
        assert!(item.last_reviewed_at.is_some());
    }

    #[test]
    fn test_progress_map_mixed_entries() {
        let v = json!({
            "good": {"wordId": "good", "timesReviewed": 1, "timesCorrect": 1},
            "bad": {"easeFactor": 1.0},
            "worse": [1, 2, 3]
        });
        let out = sanitize_progress_map(&v);
        assert_eq!(out.progress.len(), 1);
        assert_eq!(out.dropped_entries, 2);
        assert!(out.progress.contains_key("good"));
    }

    // ==================== stats 测试 ====================

    #[test]
    fn test_stats_nan_and_infinity_sanitized() {
        let v = json!({"xp": f64::NAN, "level": "Infinity", "streak": 3});
        let out = sanitize_stats(&v);
        assert_eq!(out.stats.xp, 0);
        assert!(out.stats.level >= 1);
        assert_eq!(out.stats.streak, 3);
        assert!(out.repaired_fields > 0);
    }

    #[test]
    fn test_stats_correct_clamped_to_total() {
        let v = json!({"totalReviews": 10, "correctReviews": 25});
        let out = sanitize_stats(&v);
        assert_eq!(out.stats.correct_reviews, 10);
        assert_eq!(out.stats.total_reviews, 10);
    }

    #[test]
    fn test_stats_level_derived_from_xp() {
        let v = json!({"xp": 400, "level": 77});
        let out = sanitize_stats(&v);
        assert_eq!(out.stats.level, level_for_xp(400));
    }

    #[test]
    fn test_stats_longest_streak_covers_streak() {
        let v = json!({"streak": 9, "longestStreak": 2});
        let out = sanitize_stats(&v);
        assert_eq!(out.stats.longest_streak, 9);
    }

    #[test]
    fn test_stats_achievements_deduped_in_order() {
        let v = json!({"achievements": ["a", "b", "a", 7, "c"]});
        let out = sanitize_stats(&v);
        assert_eq!(out.stats.achievements, vec!["a", "b", "c"]);
        assert!(out.repaired_fields > 0);
    }

    #[test]
    fn test_stats_not_an_object() {
        let out = sanitize_stats(&json!("nonsense"));
        assert_eq!(out.stats, UserStats::default());
        assert_eq!(out.repaired_fields, 1);
    }

    #[test]
    fn test_stats_bad_date_dropped() {
        let v = json!({"lastStudyDate": "someday"});
        let out = sanitize_stats(&v);
        assert!(out.stats.last_study_date.is_none());

        let v = json!({"lastStudyDate": "2026-08-01"});
        let out = sanitize_stats(&v);
        assert_eq!(out.stats.last_study_date.as_deref(), Some("2026-08-01"));
    }

    // ==================== studyHistory 测试 ====================

    #[test]
    fn test_history_invalid_keys_dropped() {
        let v = json!({
            "2026-08-01": {"wordsStudied": 5, "reviews": 10, "correct": 8, "xpEarned": 40},
            "not-a-date": {"wordsStudied": 1},
            "2026-13-45": {"wordsStudied": 1}
        });
        let out = sanitize_study_history(&v);
        assert_eq!(out.history.len(), 1);
        assert_eq!(out.dropped_entries, 2);
        assert_eq!(out.history["2026-08-01"].reviews, 10);
    }

    #[test]
    fn test_history_non_finite_entry_dropped() {
        // JSON.stringify(NaN) == "null"
        let v = json!({
            "2026-08-01": {"wordsStudied": null},
            "2026-08-02": {"reviews": 3}
        });
        let out = sanitize_study_history(&v);
        assert!(!out.history.contains_key("2026-08-01"));
        assert!(out.history.contains_key("2026-08-02"));
        assert_eq!(out.dropped_entries, 1);
    }

    #[test]
    fn test_history_correct_clamped() {
        let v = json!({"2026-08-01": {"reviews": 2, "correct": 9}});
        let out = sanitize_study_history(&v);
        assert_eq!(out.history["2026-08-01"].correct, 2);
    }

    #[test]
    fn test_daily_goal_defaults() {
        assert_eq!(sanitize_daily_goal(None), DEFAULT_DAILY_GOAL);
        assert_eq!(sanitize_daily_goal(Some(&json!(f64::NAN))), DEFAULT_DAILY_GOAL);
        assert_eq!(sanitize_daily_goal(Some(&json!(0))), DEFAULT_DAILY_GOAL);
        assert_eq!(sanitize_daily_goal(Some(&json!(50))), 50);
    }
}

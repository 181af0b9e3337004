//! 用户统计运算
//!
//! 等级曲线、连续学习天数、聚合字段推导和成就解锁。
//! `words_learned` / `words_in_progress` 的唯一事实来源是 progress 映射，
//! stats 中的缓存仅用于展示，恢复和迁移后总是重新推导。

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::srs::is_learned;
use crate::types::{DailyStudy, StoreState, UserStats, MAX_LEVEL};

/// 每级经验基数：升到 level 需要 (level-1)^2 * 100 经验
const XP_CURVE_BASE: i64 = 100;

/// 由经验值确定等级 (确定、单调)
pub fn level_for_xp(xp: i64) -> u32 {
    if xp <= 0 {
        return 1;
    }
    let level = ((xp / XP_CURVE_BASE) as f64).sqrt() as u32 + 1;
    level.min(MAX_LEVEL)
}

/// 达到指定等级所需的最低经验值
pub fn xp_for_level(level: u32) -> i64 {
    let l = level.clamp(1, MAX_LEVEL) as i64;
    (l - 1) * (l - 1) * XP_CURVE_BASE
}

/// 单次复习的经验奖励
pub fn xp_for_quality(quality: u8) -> u32 {
    match quality {
        5 => 10,
        4 => 7,
        3 => 5,
        _ => 1,
    }
}

/// 从 progress 映射重新推导聚合单词计数
pub fn recompute_word_counts(state: &mut StoreState) {
    let mut learned = 0u32;
    let mut in_progress = 0u32;
    for item in state.progress.values() {
        if is_learned(item) {
            learned += 1;
        } else if item.times_reviewed > 0 {
            in_progress += 1;
        }
    }
    state.stats.words_learned = learned;
    state.stats.words_in_progress = in_progress;
}

/// 记录一次学习动作到当日历史，并维护连续学习天数
///
/// - 同一天的多次复习累加到同一个 DailyStudy；
/// - 与上次学习日期相差一天则连胜 +1，更久则重置为 1。
pub fn record_study(state: &mut StoreState, new_word: bool, correct: bool, xp: u32, now: DateTime<Utc>) {
    let today = now.date_naive();
    let key = today.format("%Y-%m-%d").to_string();

    let day = state.study_history.entry(key.clone()).or_insert_with(DailyStudy::default);
    if new_word {
        day.words_studied += 1;
    }
    day.reviews += 1;
    if correct {
        day.correct += 1;
    }
    day.xp_earned += xp;

    let stats = &mut state.stats;
    let prev = stats
        .last_study_date
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    match prev {
        Some(d) if d == today => {}
        Some(d) if today - d == Duration::days(1) => stats.streak += 1,
        _ => stats.streak = 1,
    }
    stats.longest_streak = stats.longest_streak.max(stats.streak);
    stats.last_study_date = Some(key);
}

// ==================== 成就 ====================

/// 根据当前状态返回应当处于解锁状态的成就 ID
fn earned_achievements(state: &StoreState) -> Vec<&'static str> {
    let stats = &state.stats;
    let mut earned = Vec::new();
    if stats.total_reviews >= 1 {
        earned.push("first_review");
    }
    if stats.total_reviews >= 100 {
        earned.push("reviews_100");
    }
    if stats.longest_streak >= 7 {
        earned.push("streak_7");
    }
    if stats.longest_streak >= 30 {
        earned.push("streak_30");
    }
    if stats.words_learned >= 10 {
        earned.push("words_learned_10");
    }
    if stats.words_learned >= 50 {
        earned.push("words_learned_50");
    }
    if stats.level >= 5 {
        earned.push("level_5");
    }
    if stats.level >= 10 {
        earned.push("level_10");
    }
    earned
}

/// 解锁新达成的成就，返回本次新增的 ID 列表
///
/// 列表保持有序且无重复；已解锁的成就不会被移除。
pub fn unlock_achievements(state: &mut StoreState) -> Vec<String> {
    let earned = earned_achievements(state);
    let mut newly = Vec::new();
    for id in earned {
        if !state.stats.achievements.iter().any(|a| a == id) {
            state.stats.achievements.push(id.to_string());
            newly.push(id.to_string());
        }
    }
    newly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WordProgress;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_level_curve_monotonic() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(-50), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(400), 3);
        let mut prev = 0;
        for xp in (0..100_000).step_by(137) {
            let l = level_for_xp(xp);
            assert!(l >= prev);
            prev = l;
        }
    }

    #[test]
    fn test_xp_for_level_round_trip() {
        for level in 1..=20u32 {
            assert_eq!(level_for_xp(xp_for_level(level)), level);
        }
        assert_eq!(level_for_xp(i64::MAX / 2), MAX_LEVEL);
    }

    #[test]
    fn test_recompute_word_counts() {
        let mut state = StoreState::default();

        let mut learned = WordProgress::new("a");
        learned.max_repetitions = 5;
        learned.times_reviewed = 12;
        let mut in_prog = WordProgress::new("b");
        in_prog.times_reviewed = 2;
        let untouched = WordProgress::new("c");

        for w in [learned, in_prog, untouched] {
            state.progress.insert(w.word_id.clone(), w);
        }
        state.stats.words_learned = 42; // 损坏的缓存
        state.stats.words_in_progress = 42;

        recompute_word_counts(&mut state);
        assert_eq!(state.stats.words_learned, 1);
        assert_eq!(state.stats.words_in_progress, 1);
    }

    #[test]
    fn test_streak_continuation_and_reset() {
        let mut state = StoreState::default();

        record_study(&mut state, true, true, 10, t0());
        assert_eq!(state.stats.streak, 1);

        // 同一天再学：连胜不变
        record_study(&mut state, false, false, 1, t0() + Duration::hours(2));
        assert_eq!(state.stats.streak, 1);

        // 第二天：连胜 +1
        record_study(&mut state, false, true, 5, t0() + Duration::days(1));
        assert_eq!(state.stats.streak, 2);
        assert_eq!(state.stats.longest_streak, 2);

        // 隔了三天：重置为 1，最长保留
        record_study(&mut state, false, true, 5, t0() + Duration::days(4));
        assert_eq!(state.stats.streak, 1);
        assert_eq!(state.stats.longest_streak, 2);
    }

    #[test]
    fn test_daily_rollup_accumulates() {
        let mut state = StoreState::default();
        record_study(&mut state, true, true, 10, t0());
        record_study(&mut state, false, false, 1, t0() + Duration::minutes(5));

        let day = &state.study_history["2026-08-01"];
        assert_eq!(day.words_studied, 1);
        assert_eq!(day.reviews, 2);
        assert_eq!(day.correct, 1);
        assert_eq!(day.xp_earned, 11);
    }

    #[test]
    fn test_achievements_unlock_once_in_order() {
        let mut state = StoreState::default();
        state.stats.total_reviews = 1;
        let newly = unlock_achievements(&mut state);
        assert_eq!(newly, vec!["first_review"]);

        // 重复调用不产生重复
        let newly = unlock_achievements(&mut state);
        assert!(newly.is_empty());
        assert_eq!(state.stats.achievements, vec!["first_review"]);

        state.stats.total_reviews = 150;
        state.stats.longest_streak = 8;
        let newly = unlock_achievements(&mut state);
        assert_eq!(newly, vec!["reviews_100", "streak_7"]);
        assert_eq!(
            state.stats.achievements,
            vec!["first_review", "reviews_100", "streak_7"]
        );
    }
}

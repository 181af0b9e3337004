//! SRS 调度器
//!
//! SM-2 系列的间隔重复状态机。`schedule` 是纯函数：给定当前进度、评分和
//! 间隔系数，计算下一个进度。无隐藏状态、无 I/O，时间由调用方注入。

use chrono::{DateTime, Duration, Utc};

use crate::sanitize::{clamp_finite, sanitize_ease, sanitize_interval};
use crate::types::{
    StoreState, WordProgress, EASE_LAPSE_PENALTY, FIRST_INTERVAL_DAYS, LAPSE_INTERVAL_DAYS,
    LEECH_ACCURACY_THRESHOLD, LEECH_MIN_REVIEWS, MASTERY_REPETITIONS, MAX_EASE_FACTOR,
    MAX_INTERVAL_DAYS, MAX_QUALITY, MIN_EASE_FACTOR, MIN_QUALITY, SECOND_INTERVAL_DAYS,
    SUCCESS_QUALITY,
};

/// 计算一次复习后的新进度
///
/// - 评分 < 3：遗忘。连续次数清零，间隔回到 1 天，难度系数扣减并触底；
///   `max_repetitions` 保持不变。
/// - 评分 ≥ 3：成功。连续次数 +1，难度系数按 SM-2 公式调整；第 1、2 次
///   使用固定短间隔，之后按 间隔 × 难度系数 × interval_modifier 增长。
///
/// 输入中的越界或非有限字段会先被就地修复，函数对任意输入都是全函数。
pub fn schedule(
    item: &WordProgress,
    quality: u8,
    interval_modifier: f64,
    now: DateTime<Utc>,
) -> WordProgress {
    let quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
    let modifier = if interval_modifier.is_finite() && interval_modifier > 0.0 {
        interval_modifier
    } else {
        1.0
    };

    let mut next = item.clone();
    next.ease_factor = sanitize_ease(item.ease_factor);
    next.interval_days = sanitize_interval(item.interval_days);

    if quality < SUCCESS_QUALITY {
        // 遗忘：清空连胜，短间隔重学
        next.repetitions = 0;
        next.interval_days = LAPSE_INTERVAL_DAYS;
        next.ease_factor = (next.ease_factor - EASE_LAPSE_PENALTY).max(MIN_EASE_FACTOR);
    } else {
        next.repetitions = item.repetitions.saturating_add(1);
        next.ease_factor = adjust_ease(next.ease_factor, quality);
        next.interval_days = match next.repetitions {
            1 => FIRST_INTERVAL_DAYS,
            2 => SECOND_INTERVAL_DAYS,
            _ => clamp_finite(
                next.interval_days.max(FIRST_INTERVAL_DAYS) * next.ease_factor * modifier,
                FIRST_INTERVAL_DAYS,
                MAX_INTERVAL_DAYS,
                MAX_INTERVAL_DAYS,
            ),
        };
        next.max_repetitions = next.max_repetitions.max(next.repetitions);
        next.times_correct = item.times_correct.saturating_add(1);
    }

    next.times_reviewed = item.times_reviewed.saturating_add(1);
    next.last_quality_rating = quality;
    next.last_reviewed_at = Some(now);
    next.next_review_at = Some(now + days_to_duration(next.interval_days));

    next
}

/// SM-2 难度系数公式
fn adjust_ease(ease: f64, quality: u8) -> f64 {
    let q = quality as f64;
    let delta = 0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02);
    clamp_finite(ease + delta, MIN_EASE_FACTOR, MAX_EASE_FACTOR, ease)
}

fn days_to_duration(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0).round() as i64)
}

// ==================== 查询 ====================

/// 是否到期：从未复习过、或 next_review_at 不晚于当前时间
pub fn is_due(item: &WordProgress, now: DateTime<Utc>) -> bool {
    match item.next_review_at {
        None => true,
        Some(t) => t <= now,
    }
}

/// 是否已学会：历史最高连续正确次数达到掌握阈值。
/// 之后的遗忘只清空连胜，不会取消"已学会"。
pub fn is_learned(item: &WordProgress) -> bool {
    item.max_repetitions >= MASTERY_REPETITIONS
}

/// 正确率，对损坏的计数器做防御性处理
pub fn accuracy(item: &WordProgress) -> f64 {
    if item.times_reviewed == 0 {
        return 0.0;
    }
    item.times_correct.min(item.times_reviewed) as f64 / item.times_reviewed as f64
}

/// 顽固词：复习次数多但正确率持续偏低
pub fn is_leech(item: &WordProgress) -> bool {
    item.times_reviewed >= LEECH_MIN_REVIEWS && accuracy(item) < LEECH_ACCURACY_THRESHOLD
}

/// 按到期程度取待复习单词
///
/// 从未复习过的排最前，其余按 next_review_at 升序 (最逾期的在前)。
pub fn due_words<'a>(state: &'a StoreState, now: DateTime<Utc>, limit: usize) -> Vec<&'a WordProgress> {
    let mut due: Vec<&WordProgress> = state
        .progress
        .values()
        .filter(|item| is_due(item, now))
        .collect();
    due.sort_by_key(|item| item.next_review_at);
    due.truncate(limit);
    due
}

/// 列出所有顽固词
pub fn leech_words(state: &StoreState) -> Vec<&WordProgress> {
    state.progress.values().filter(|item| is_leech(item)).collect()
}

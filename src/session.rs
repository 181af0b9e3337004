//! 复习会话服务
//!
//! 把一次复习原子地落到 单词进度 + 聚合统计 + 当日历史 上，并维护
//! 单槽位的撤销快照。显式构造、显式生命周期，可按用户会话实例化，
//! 不依赖任何全局可变状态。

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::srs;
use crate::stats::{
    level_for_xp, record_study, recompute_word_counts, unlock_achievements, xp_for_quality,
};
use crate::types::{
    DailyStudy, SchedulePreset, StoreState, UserStats, WordProgress, SUCCESS_QUALITY,
    UNDO_WINDOW_SECS,
};

/// 提交复习后的回执
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub word_id: String,
    /// 撤销令牌，在撤销窗口内有效
    pub undo_token: Uuid,
    pub interval_days: f64,
    pub next_review_at: Option<DateTime<Utc>>,
    /// 本次获得的经验值
    pub xp_awarded: u32,
    /// 本次新解锁的成就
    pub newly_unlocked: Vec<String>,
}

/// 单槽位撤销快照
#[derive(Debug, Clone)]
struct ReviewSnapshot {
    token: Uuid,
    word_id: String,
    /// None 表示该单词在本次复习前不存在
    item_before: Option<WordProgress>,
    stats_before: UserStats,
    day_key: String,
    day_before: Option<DailyStudy>,
    taken_at: DateTime<Utc>,
}

/// 复习会话
///
/// 撤销是乐观的单槽位机制：快照在每次调度变更前捕获，只能在固定时间窗口
/// 内回滚一次；下一次变更会丢弃上一个快照。
pub struct ReviewSession {
    preset: SchedulePreset,
    undo: Option<ReviewSnapshot>,
    undo_window: Duration,
}

impl ReviewSession {
    pub fn new(preset: SchedulePreset) -> Self {
        Self {
            preset,
            undo: None,
            undo_window: Duration::seconds(UNDO_WINDOW_SECS),
        }
    }

    /// 自定义撤销窗口 (测试用)
    pub fn with_undo_window(preset: SchedulePreset, window: Duration) -> Self {
        Self {
            preset,
            undo: None,
            undo_window: window,
        }
    }

    pub fn preset(&self) -> SchedulePreset {
        self.preset
    }

    /// 提交一次复习
    ///
    /// 首次接触的单词在这里创建初始进度。调度、统计、当日历史和成就
    /// 在同一次调用内完成更新。
    pub fn submit_review(
        &mut self,
        state: &mut StoreState,
        word_id: &str,
        quality: u8,
        now: DateTime<Utc>,
    ) -> ReviewOutcome {
        let day_key = now.date_naive().format("%Y-%m-%d").to_string();
        let snapshot = ReviewSnapshot {
            token: Uuid::new_v4(),
            word_id: word_id.to_string(),
            item_before: state.progress.get(word_id).cloned(),
            stats_before: state.stats.clone(),
            day_key: day_key.clone(),
            day_before: state.study_history.get(&day_key).cloned(),
            taken_at: now,
        };

        let is_new_word = snapshot.item_before.is_none();
        let current = snapshot
            .item_before
            .clone()
            .unwrap_or_else(|| WordProgress::new(word_id));

        let scheduled = srs::schedule(&current, quality, self.preset.interval_modifier(), now);
        let interval_days = scheduled.interval_days;
        let next_review_at = scheduled.next_review_at;
        state.progress.insert(word_id.to_string(), scheduled);

        let correct = quality.clamp(1, 5) >= SUCCESS_QUALITY;
        let xp = xp_for_quality(quality.clamp(1, 5));

        state.stats.total_reviews = state.stats.total_reviews.saturating_add(1);
        if correct {
            state.stats.correct_reviews = state.stats.correct_reviews.saturating_add(1);
        }
        state.stats.xp = state.stats.xp.saturating_add(xp as i64);
        state.stats.level = level_for_xp(state.stats.xp);

        record_study(state, is_new_word, correct, xp, now);
        recompute_word_counts(state);
        let newly_unlocked = unlock_achievements(state);

        let token = snapshot.token;
        // 新的变更覆盖上一个撤销槽位
        self.undo = Some(snapshot);

        ReviewOutcome {
            word_id: word_id.to_string(),
            undo_token: token,
            interval_days,
            next_review_at,
            xp_awarded: xp,
            newly_unlocked,
        }
    }

    /// 回滚最近一次复习
    ///
    /// 仅当令牌匹配当前槽位且仍在撤销窗口内时生效；成功与否都消耗槽位。
    pub fn undo_last(&mut self, state: &mut StoreState, token: Uuid, now: DateTime<Utc>) -> bool {
        let snapshot = match self.undo.take() {
            Some(s) => s,
            None => return false,
        };
        if snapshot.token != token || now - snapshot.taken_at > self.undo_window {
            return false;
        }

        match snapshot.item_before {
            Some(item) => {
                state.progress.insert(snapshot.word_id.clone(), item);
            }
            None => {
                state.progress.remove(&snapshot.word_id);
            }
        }
        state.stats = snapshot.stats_before;
        match snapshot.day_before {
            Some(day) => {
                state.study_history.insert(snapshot.day_key, day);
            }
            None => {
                state.study_history.remove(&snapshot.day_key);
            }
        }
        true
    }

    /// 清空撤销槽位，结束会话
    pub fn teardown(&mut self) {
        self.undo = None;
    }
}

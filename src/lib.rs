//! # danci-store - 词汇学习持久化韧性核心库
//!
//! 本 crate 提供纯 Rust 实现的持久化韧性层:
//!
//! - **SRS Scheduler** - SM-2 系列的间隔重复调度状态机
//! - **JSON Repair** - 对截断/畸形 JSON 的文本级修复与重试解析
//! - **Recovery** - 把任意持久化字节恢复成合法的当前 schema 文档
//! - **Migration** - 版本化的增量 schema 迁移链
//! - **Backup** - 迁移前快照、轮转与过期清理
//!
//! ## 设计理念
//!
//! 本 crate 的设计目标:
//! - **永不崩溃** - `recover` / `schedule` / `migrate` 对任意输入都是全函数
//! - **就地消化失败** - 字段级 → 条目级 → 区块级逐层修复，只有彻底无法
//!   解析的文本才报告硬失败
//! - **纯函数核心** - 无隐藏状态、无内部 I/O，时间由调用方注入
//! - **充分测试** - 不变量与故障路径都有完整的单元测试和属性测试
//!
//! ## 模块结构
//!
//! - [`types`] - 公共类型和常量
//! - [`sanitize`] - 字段级数据清洗 (NaN / Infinity / 越界 / 类型错误)
//! - [`repair`] - JSON 修复引擎
//! - [`srs`] - SM-2 调度器与到期/掌握/顽固词查询
//! - [`stats`] - 等级曲线、连续天数与聚合推导
//! - [`migrate`] - 版本化 schema 迁移
//! - [`recover`] - 恢复编排器、报告格式化、导入导出
//! - [`backup`] - 备份管理器
//! - [`kv`] - 本地键值持久化 (内存 / SQLite)
//! - [`session`] - 复习会话与单槽位撤销
//!
//! ## 使用示例
//!
//! ```rust
//! use chrono::Utc;
//! use danci_store::{recover, schedule, SchedulePreset, WordProgress};
//!
//! // 从损坏的持久化文本恢复
//! let result = recover(r#"{"state":{"stats":{"xp":100},"progress":{"#, Utc::now());
//! assert!(result.success);
//!
//! // 调度一次复习
//! let item = WordProgress::new("word-1");
//! let next = schedule(&item, 5, SchedulePreset::Standard.interval_modifier(), Utc::now());
//! assert_eq!(next.repetitions, 1);
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod backup;
pub mod kv;
pub mod migrate;
pub mod recover;
pub mod repair;
pub mod sanitize;
pub mod session;
pub mod srs;
pub mod stats;
pub mod types;

// ============================================================================
// 重新导出
// ============================================================================

/// 重新导出所有公共类型
pub use types::*;

/// 重新导出恢复入口
pub use recover::{
    check_shape, export_document, format_report, import_from_text, recover, recover_with_backup,
    RecoveryResult, SectionCheck, ShapeReport, REPAIR_WARNING,
};

/// 重新导出调度器
pub use srs::{accuracy, due_words, is_due, is_learned, is_leech, leech_words, schedule};

/// 重新导出迁移模块
pub use migrate::{
    get_migrations, migrate, migrate_with_backup, MigrationOutcome, MigrationResult,
    MigrationStep, StoreKind, CURRENT_SCHEMA_VERSION,
};

/// 重新导出备份管理器
pub use backup::{BackupManager, BackupRecord};

/// 重新导出键值存储
pub use kv::{KvStore, MemoryKv, SqliteKv, StoreError, StoreResult};

/// 重新导出复习会话
pub use session::{ReviewOutcome, ReviewSession};

/// 重新导出 JSON 修复引擎
pub use repair::{parse_with_repair, RepairError, RepairedDocument};

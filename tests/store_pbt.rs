//! Property-Based Tests for the persistence resilience core
//!
//! Tests the following invariants:
//! - No-Throw: recover() returns a result for any input string
//! - Idempotence: migrating a migrated document applies zero steps
//! - Invariant preservation: recovered counters satisfy their inequalities
//! - Monotone mastery: maxRepetitionsEverReached never decreases
//! - Round-Trip: export -> import preserves the document

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;

use danci_store::{
    export_document, migrate, recover, schedule, StoreKind, UserStore, WordProgress,
    CURRENT_SCHEMA_VERSION,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_json_leaf() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(json!(null)),
        any::<bool>().prop_map(|b| json!(b)),
        any::<i64>().prop_map(|n| json!(n)),
        (-1e12f64..1e12f64).prop_map(|f| json!(f)),
        "[a-zA-Z0-9 _:-]{0,24}".prop_map(|s| json!(s)),
    ]
}

fn arb_json_value() -> impl Strategy<Value = serde_json::Value> {
    arb_json_leaf().prop_recursive(3, 32, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,12}", inner, 0..6)
                .prop_map(|m| json!(m)),
        ]
    })
}

fn arb_progress_entry() -> impl Strategy<Value = serde_json::Value> {
    (
        proptest::option::of("[a-z]{1,8}"),
        any::<f64>(),
        any::<f64>(),
        0u32..1000,
        0u32..1000,
        0u32..1000,
        0u32..1000,
    )
        .prop_map(
            |(word_id, ease, interval, reps, max_reps, reviewed, correct)| {
                json!({
                    "wordId": word_id,
                    "easeFactor": if ease.is_finite() { json!(ease) } else { json!(null) },
                    "intervalDays": if interval.is_finite() { json!(interval) } else { json!(null) },
                    "repetitions": reps,
                    "maxRepetitionsEverReached": max_reps,
                    "timesReviewed": reviewed,
                    "timesCorrect": correct,
                })
            },
        )
}

fn arb_store_document() -> impl Strategy<Value = String> {
    (
        prop::collection::btree_map("[a-z0-9]{1,8}", arb_progress_entry(), 0..12),
        any::<i64>(),
        any::<i64>(),
        0i32..=6,
    )
        .prop_map(|(progress, xp, correct, version)| {
            json!({
                "state": {
                    "stats": {"xp": xp, "correctReviews": correct, "totalReviews": correct / 2},
                    "progress": progress,
                },
                "migrationVersion": version
            })
            .to_string()
        })
}

// ============================================================================
// No-Throw
// ============================================================================

proptest! {
    #[test]
    fn recover_never_panics_on_arbitrary_strings(s in ".{0,400}") {
        let result = recover(&s, t0());
        // 结果两态之一：硬失败无数据，或成功有数据
        prop_assert_eq!(result.success, result.recovered_data.is_some());
        prop_assert_eq!(result.success, result.errors.is_empty());
    }

    #[test]
    fn recover_never_panics_on_arbitrary_json(v in arb_json_value()) {
        let result = recover(&v.to_string(), t0());
        prop_assert!(result.success);
        prop_assert!(result.recovered_data.is_some());
    }

    #[test]
    fn recover_never_panics_on_truncated_documents(doc in arb_store_document(), cut in 0usize..200) {
        let truncated: String = doc.chars().take(cut).collect();
        let _ = recover(&truncated, t0());
    }
}

// ============================================================================
// Invariant preservation
// ============================================================================

proptest! {
    #[test]
    fn recovered_documents_satisfy_invariants(doc in arb_store_document()) {
        let result = recover(&doc, t0());
        prop_assert!(result.success);
        let store = result.recovered_data.unwrap();

        prop_assert!(store.state.stats.correct_reviews <= store.state.stats.total_reviews);
        prop_assert!(store.state.stats.level >= 1);
        prop_assert!(store.state.stats.xp >= 0);
        prop_assert_eq!(store.migration_version, CURRENT_SCHEMA_VERSION);

        for (key, item) in &store.state.progress {
            prop_assert_eq!(key, &item.word_id);
            prop_assert!(item.times_correct <= item.times_reviewed);
            prop_assert!(item.repetitions <= item.max_repetitions);
            prop_assert!(item.ease_factor.is_finite());
            prop_assert!(item.ease_factor >= 1.3);
            prop_assert!(item.interval_days.is_finite());
            prop_assert!(item.interval_days >= 0.0);
        }
    }
}

// ============================================================================
// Migration idempotence
// ============================================================================

proptest! {
    #[test]
    fn migration_is_idempotent(doc in arb_store_document()) {
        let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
        let first = migrate(StoreKind::User, parsed);
        let second = migrate(StoreKind::User, first.data.clone());

        prop_assert!(second.result.migrations_applied.is_empty());
        prop_assert_eq!(second.data, first.data);
    }

    #[test]
    fn migration_applies_exactly_the_missing_steps(version in 0i32..=CURRENT_SCHEMA_VERSION) {
        let doc = json!({"state": {}, "migrationVersion": version});
        let out = migrate(StoreKind::User, doc);
        // 应用的步骤数 = 旧版本到当前版本之间的全部步骤
        prop_assert_eq!(
            out.result.migrations_applied.len(),
            (CURRENT_SCHEMA_VERSION - version) as usize
        );
        prop_assert_eq!(out.result.version, CURRENT_SCHEMA_VERSION.max(version));
    }
}

// ============================================================================
// Monotone mastery
// ============================================================================

proptest! {
    #[test]
    fn max_repetitions_never_decreases(qualities in prop::collection::vec(1u8..=5, 1..40)) {
        let mut item = WordProgress::new("w");
        let mut now = t0();
        let mut prev_max = 0u32;

        for q in qualities {
            item = schedule(&item, q, 1.0, now);
            prop_assert!(item.max_repetitions >= prev_max);
            prop_assert!(item.times_correct <= item.times_reviewed);
            prop_assert!(item.ease_factor >= 1.3);
            prop_assert!(item.ease_factor.is_finite());
            prev_max = item.max_repetitions;
            now = now + chrono::Duration::days(1);
        }
    }
}

// ============================================================================
// Round-Trip
// ============================================================================

proptest! {
    #[test]
    fn clean_export_import_round_trip(qualities in prop::collection::vec(1u8..=5, 0..12)) {
        let mut store = UserStore::fresh();
        let mut now = t0();
        for (i, q) in qualities.iter().enumerate() {
            let word = format!("word-{}", i % 4);
            let item = store
                .state
                .progress
                .get(&word)
                .cloned()
                .unwrap_or_else(|| WordProgress::new(&word));
            let next = schedule(&item, *q, 1.0, now);
            store.state.progress.insert(word, next);
            now = now + chrono::Duration::hours(3);
        }

        let text = export_document(&store);
        let result = recover(&text, now);
        prop_assert!(result.success);
        prop_assert!(!result.partial_recovery);
        let roundtripped = result.recovered_data.unwrap();
        prop_assert_eq!(roundtripped.state.progress, store.state.progress);
    }
}

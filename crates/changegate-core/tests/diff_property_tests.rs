#![allow(clippy::unwrap_used)]

use changegate_core::diff::{apply_operations, compute_diff, diff_lines, LineTag};
use changegate_core::impact::try_analyze;
use changegate_core::policy::PolicyResult;
use changegate_core::risk::{score_risk, RiskInputs};
use chrono::Utc;
use proptest::prelude::*;
use serde_json::{Map, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-50i64..50).prop_map(|n| Value::Number(n.into())),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

fn document() -> impl Strategy<Value = Value> {
    let key = prop_oneof![
        Just("screens".to_string()),
        Just("auth".to_string()),
        Just("dataSources".to_string()),
        Just("flows".to_string()),
        Just("a/b".to_string()),
        "[a-z]{1,4}",
    ];
    leaf()
        .prop_recursive(3, 24, 4, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec((key.clone(), inner), 0..4).prop_map(|entries| {
                    let mut map = Map::new();
                    for (k, v) in entries {
                        map.insert(k, v);
                    }
                    Value::Object(map)
                }),
            ]
        })
        .prop_map(|v| match v {
            Value::Object(_) => v,
            other => {
                let mut map = Map::new();
                map.insert("root".to_string(), other);
                Value::Object(map)
            }
        })
}

proptest! {
    #[test]
    fn prop_counts_add_up(before in document(), after in document()) {
        let diff = compute_diff(&before, &after);
        prop_assert_eq!(diff.total_changes, diff.added + diff.modified + diff.deleted);
        prop_assert_eq!(diff.total_changes, diff.operations.len());
        let by_category: usize = diff.categories.values().map(|c| c.total).sum();
        prop_assert_eq!(by_category, diff.total_changes);
    }

    #[test]
    fn prop_self_diff_is_empty(doc in document()) {
        prop_assert!(compute_diff(&doc, &doc).is_empty());
    }

    #[test]
    fn prop_replay_reproduces_after(before in document(), after in document()) {
        let diff = compute_diff(&before, &after);
        let replayed = apply_operations(&before, &diff.operations).unwrap();
        prop_assert_eq!(replayed, after);
    }

    #[test]
    fn prop_diff_is_deterministic(before in document(), after in document()) {
        prop_assert_eq!(compute_diff(&before, &after), compute_diff(&before, &after));
    }

    #[test]
    fn prop_scoring_is_bounded_and_idempotent(before in document(), after in document()) {
        let diff = compute_diff(&before, &after);
        let impact = try_analyze(&diff, &[]).unwrap();
        prop_assert!(impact.complexity_score <= 100);
        prop_assert!(impact.breaking_changes as usize <= diff.total_changes);

        let policy = PolicyResult::passed();
        let at = Utc::now();
        let first = score_risk(&RiskInputs::new(&impact, &policy), at);
        let second = score_risk(&RiskInputs::new(&impact, &policy), at);
        prop_assert!(first.score <= 100);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_text_alignment_preserves_both_sides(
        a in prop::collection::vec("[a-c]{0,2}", 0..8),
        b in prop::collection::vec("[a-c]{0,2}", 0..8),
    ) {
        let before = a.join("\n");
        let after = b.join("\n");
        let lines = diff_lines(&before, &after).unwrap();
        let old: Vec<_> = lines.iter().filter(|l| l.tag != LineTag::Added).map(|l| l.text.clone()).collect();
        let new: Vec<_> = lines.iter().filter(|l| l.tag != LineTag::Removed).map(|l| l.text.clone()).collect();
        prop_assert_eq!(old, before.lines().map(str::to_string).collect::<Vec<_>>());
        prop_assert_eq!(new, after.lines().map(str::to_string).collect::<Vec<_>>());
    }
}

//! Property-based tests for the trigger condition matcher.
//!
//! No database or network access required; these always run.
//!
//! ```bash
//! cargo test --test property_tests
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! Each property is named `prop_<subject>_<invariant>`.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use tradeops::conditions::{matches, ConditionTree};

fn event(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z_]{0,12}".prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn prop_empty_condition_matches_everything(pnl in any::<i64>(), kind in "[a-z_]{1,12}") {
        let ev = event(&[("pnl", json!(pnl)), ("kind", json!(kind))]);
        let empty = json!({});
        prop_assert!(matches(&ev, &empty), "empty object must match");
        prop_assert!(matches(&ev, &Value::Null), "null condition must match");
    }

    #[test]
    fn prop_literal_matches_itself(value in scalar()) {
        let ev = event(&[("field", value.clone())]);
        let cond = json!({ "field": value });
        prop_assert!(matches(&ev, &cond), "literal should match its own value");
    }

    #[test]
    fn prop_literal_rejects_other_integers(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b);
        let ev = event(&[("pnl", json!(a))]);
        let cond = json!({ "pnl": b });
        prop_assert!(!matches(&ev, &cond), "{} matched literal {}", a, b);
    }

    #[test]
    fn prop_gt_lt_agree_with_f64_ordering(a in -1e9f64..1e9, b in -1e9f64..1e9) {
        let ev = event(&[("pnl", json!(a))]);
        let gt = matches(&ev, &json!({ "pnl": { "$gt": b } }));
        let lt = matches(&ev, &json!({ "pnl": { "$lt": b } }));
        let eq = matches(&ev, &json!({ "pnl": { "$eq": b } }));
        prop_assert_eq!(gt, a > b);
        prop_assert_eq!(lt, a < b);
        prop_assert_eq!(eq, a == b);
    }

    #[test]
    fn prop_integer_ordering_is_exact(a in any::<i64>(), b in any::<i64>()) {
        let ev = event(&[("id", json!(a))]);
        let gt = matches(&ev, &json!({ "id": { "$gt": b } }));
        let lt = matches(&ev, &json!({ "id": { "$lt": b } }));
        let eq = matches(&ev, &json!({ "id": b }));
        prop_assert_eq!(gt, a > b);
        prop_assert_eq!(lt, a < b);
        prop_assert_eq!(eq, a == b);
    }

    #[test]
    fn prop_gt_and_lt_on_same_bound_never_both_hold(a in any::<i32>(), b in any::<i32>()) {
        let ev = event(&[("pnl", json!(a))]);
        let cond = json!({ "pnl": { "$gt": b, "$lt": b } });
        prop_assert!(!matches(&ev, &cond), "{} is both above and below {}", a, b);
    }

    #[test]
    fn prop_range_is_open_interval(a in -1000i64..1000, lo in -1000i64..1000, hi in -1000i64..1000) {
        let ev = event(&[("pnl", json!(a))]);
        let cond = json!({ "pnl": { "$gt": lo, "$lt": hi } });
        let hit = matches(&ev, &cond);
        prop_assert_eq!(hit, lo < a && a < hi);
    }

    #[test]
    fn prop_integer_and_float_compare_numerically(n in -100_000i64..100_000) {
        let ev = event(&[("pnl", json!(n))]);
        let cond = json!({ "pnl": { "$eq": n as f64 } });
        prop_assert!(matches(&ev, &cond), "{} != {}.0", n, n);
    }

    #[test]
    fn prop_missing_fields_are_skipped(value in scalar(), other in scalar()) {
        let ev = event(&[("present", value.clone())]);
        let literal = json!({ "absent": other.clone() });
        let compare = json!({ "absent": { "$gt": 0 } });
        let mixed = json!({ "present": value, "absent": other });
        prop_assert!(matches(&ev, &literal), "missing literal field must pass");
        prop_assert!(matches(&ev, &compare), "missing compared field must pass");
        prop_assert!(matches(&ev, &mixed), "present field plus missing field must pass");
    }

    #[test]
    fn prop_conjunction_of_disjoint_fields(a in -50i64..50, b in -50i64..50, x in -50i64..50, y in -50i64..50) {
        let ev = event(&[("pnl", json!(a)), ("size", json!(b))]);
        let left = matches(&ev, &json!({ "pnl": { "$gt": x } }));
        let right = matches(&ev, &json!({ "size": { "$lt": y } }));
        let both = matches(&ev, &json!({ "pnl": { "$gt": x }, "size": { "$lt": y } }));
        prop_assert_eq!(both, left && right);
    }

    #[test]
    fn prop_mismatched_kinds_never_compare(s in "[a-z]{1,8}", n in any::<i32>()) {
        let ev = event(&[("field", json!(s))]);
        for op in ["$gt", "$lt", "$eq"] {
            let cond = json!({ "field": { op: n } });
            prop_assert!(!matches(&ev, &cond), "string compared to number via {}", op);
        }
    }

    #[test]
    fn prop_unknown_operator_never_parses(op in "\\$[a-z]{2,6}") {
        prop_assume!(op != "$gt" && op != "$lt" && op != "$eq");
        let cond = json!({ "pnl": { op.clone(): 1 } });
        let ev = event(&[("pnl", json!(5))]);
        prop_assert!(ConditionTree::parse(&cond).is_err(), "{} parsed", op);
        prop_assert!(!matches(&ev, &cond), "{} matched", op);
    }

    #[test]
    fn prop_parse_counts_top_level_fields(keys in proptest::collection::btree_set("[a-z]{1,6}", 0..8)) {
        let cond: Map<String, Value> = keys.iter().map(|k| (k.clone(), json!(1))).collect();
        let tree = ConditionTree::parse(&Value::Object(cond)).unwrap();
        prop_assert_eq!(tree.len(), keys.len());
        prop_assert_eq!(tree.is_empty(), keys.is_empty());
    }
}

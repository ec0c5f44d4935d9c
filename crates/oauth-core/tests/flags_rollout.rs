//! Deterministic percentage-rollout bucketing across a large user
//! population (spec §8's 10,000-user scenario).

use std::collections::HashMap;

use oauth_core::flag_engine::evaluate;
use oauth_core::{EvaluationContext, FlagDefinition};

fn rollout_flag(percentage: u32) -> FlagDefinition {
    let now = chrono::Utc::now();
    FlagDefinition {
        name: "new-dashboard".into(),
        flag_type: oauth_core::flags::FlagType::Percentage,
        enabled: true,
        default_value: serde_json::Value::Bool(true),
        rollout_percentage: percentage,
        rules: vec![],
        variants: vec![],
        user_overrides: HashMap::new(),
        server_overrides: HashMap::new(),
        rollout_config: None,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn percentage_rollout_lands_within_tolerance_across_ten_thousand_users() {
    let flag = rollout_flag(30);
    let mut included = 0u32;
    for i in 0..10_000 {
        let ctx = EvaluationContext::new(format!("user-{i}"));
        let result = evaluate(&flag, &ctx, std::time::Duration::from_secs(2)).unwrap();
        if result.enabled {
            included += 1;
        }
    }
    let ratio = f64::from(included) / 10_000.0;
    assert!((0.27..=0.33).contains(&ratio), "expected ~30% inclusion, got {ratio}");
}

#[test]
fn percentage_rollout_is_stable_per_user_across_repeated_runs() {
    let flag = rollout_flag(40);
    let ctx = EvaluationContext::new("user-consistent");
    let first = evaluate(&flag, &ctx, std::time::Duration::from_secs(2)).unwrap();
    for _ in 0..50 {
        let again = evaluate(&flag, &ctx, std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(first.enabled, again.enabled);
        assert_eq!(first.reason, again.reason);
    }
}

#[test]
fn zero_and_hundred_percent_are_absolute() {
    let none_included = rollout_flag(0);
    let all_included = rollout_flag(100);
    for i in 0..1_000 {
        let ctx = EvaluationContext::new(format!("user-{i}"));
        let excluded = evaluate(&none_included, &ctx, std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(excluded.reason, "percentage_excluded");
        assert!(!excluded.enabled);
        let included = evaluate(&all_included, &ctx, std::time::Duration::from_secs(2)).unwrap();
        assert_ne!(included.reason, "percentage_excluded");
        assert!(included.enabled);
    }
}

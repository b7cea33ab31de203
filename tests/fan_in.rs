// tests/fan_in.rs

mod common;

use ingestflow::exec::ScriptOutcome;
use ingestflow::workflow::{FanInPolicy, JobOutcome};
use proptest::prelude::*;

fn fail(code: i32) -> ScriptOutcome {
    ScriptOutcome::Failure { code, detail: None }
}

fn unknown(detail: &str) -> ScriptOutcome {
    ScriptOutcome::Indeterminate(detail.to_string())
}

#[test]
fn single_task_passes_through() {
    for policy in [FanInPolicy::FirstAbnormal, FanInPolicy::Highest, FanInPolicy::AnySuccess] {
        assert_eq!(policy.reduce(&[ScriptOutcome::Success]), JobOutcome::Code(0));
        assert_eq!(policy.reduce(&[fail(3)]), JobOutcome::Code(3));
        assert!(matches!(
            policy.reduce(&[unknown("timeout")]),
            JobOutcome::Indeterminate(d) if d == "timeout"
        ));
    }
}

#[test]
fn first_abnormal_takes_first_nonzero_in_task_order() {
    let outcomes = [ScriptOutcome::Success, fail(2), fail(1)];
    assert_eq!(FanInPolicy::FirstAbnormal.reduce(&outcomes), JobOutcome::Code(2));

    let all_ok = [ScriptOutcome::Success, ScriptOutcome::Success];
    assert_eq!(FanInPolicy::FirstAbnormal.reduce(&all_ok), JobOutcome::Code(0));
}

#[test]
fn highest_takes_maximum_code() {
    let outcomes = [fail(1), ScriptOutcome::Success, fail(4), fail(2)];
    assert_eq!(FanInPolicy::Highest.reduce(&outcomes), JobOutcome::Code(4));
}

#[test]
fn any_success_wins_when_one_task_succeeds() {
    let outcomes = [fail(1), ScriptOutcome::Success];
    assert_eq!(FanInPolicy::AnySuccess.reduce(&outcomes), JobOutcome::Code(0));

    let none_ok = [fail(5), fail(1)];
    assert_eq!(FanInPolicy::AnySuccess.reduce(&none_ok), JobOutcome::Code(5));
}

#[test]
fn indeterminate_dominates_every_policy_without_success() {
    let outcomes = [fail(1), unknown("lost"), fail(9)];
    for policy in [FanInPolicy::FirstAbnormal, FanInPolicy::Highest, FanInPolicy::AnySuccess] {
        assert!(
            matches!(policy.reduce(&outcomes), JobOutcome::Indeterminate(_)),
            "{policy:?} must not hide an indeterminate task"
        );
    }
}

#[test]
fn empty_outcome_set_is_indeterminate() {
    assert!(matches!(
        FanInPolicy::default().reduce(&[]),
        JobOutcome::Indeterminate(_)
    ));
}

fn outcome_strategy() -> impl Strategy<Value = ScriptOutcome> {
    prop_oneof![
        4 => Just(ScriptOutcome::Success),
        4 => (1i32..20).prop_map(fail),
        1 => "[a-z]{1,8}".prop_map(ScriptOutcome::Indeterminate),
    ]
}

fn policy_strategy() -> impl Strategy<Value = FanInPolicy> {
    prop_oneof![
        Just(FanInPolicy::FirstAbnormal),
        Just(FanInPolicy::Highest),
        Just(FanInPolicy::AnySuccess),
    ]
}

proptest! {
    #[test]
    fn reduced_code_comes_from_some_task(
        outcomes in prop::collection::vec(outcome_strategy(), 1..12),
        policy in policy_strategy(),
    ) {
        match policy.reduce(&outcomes) {
            JobOutcome::Code(code) => {
                prop_assert!(outcomes.iter().any(|o| o.code() == Some(code)));
            }
            JobOutcome::Indeterminate(_) => {
                prop_assert!(outcomes.iter().any(ScriptOutcome::is_indeterminate));
            }
        }
    }

    #[test]
    fn indeterminate_is_never_reported_as_success(
        outcomes in prop::collection::vec(outcome_strategy(), 1..12),
    ) {
        let has_unknown = outcomes.iter().any(ScriptOutcome::is_indeterminate);
        for policy in [FanInPolicy::FirstAbnormal, FanInPolicy::Highest] {
            let reduced = policy.reduce(&outcomes);
            if has_unknown {
                prop_assert!(!reduced.is_success());
            }
        }
    }
}

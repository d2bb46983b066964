//! End-to-end tests across recovery, scope control and replanning

use ratchet::plan::{compute_diff, load_plans, save_plans};
use ratchet::recovery::{RecoveryStrategy, RetryStrategy};
use ratchet::{
    DeferReason, Directive, Failure, FailureKind, IterationEngine, Plan, PlanVersioner,
    RatchetError, RecoveryManager, ReplanManager, RunConfig, StrategyType, TriggerType,
};
use std::path::PathBuf;
use tempfile::TempDir;

const TEST_FAILURE: &str = "running 4 tests\n\
test report::export_csv ... FAILED\n\
test result: FAILED. 3 passed; 1 failed; 0 ignored";

fn plans() -> Vec<Plan> {
    vec![
        Plan::new(5, "Project setup").mark_tested(),
        Plan::new(6, "Report model").mark_tested(),
        Plan::new(7, "Export report as CSV").with_steps(["Write exporter", "Add tests"]),
        Plan::new(8, "Email the exported report"),
    ]
}

fn plan_file() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plans.json");
    save_plans(&path, &plans()).unwrap();
    (dir, path)
}

// ============================================================================
// Tier 1 into Tier 2
// ============================================================================

#[tokio::test]
async fn test_repeated_test_failures_lead_to_review_replan() {
    let (_dir, path) = plan_file();
    let original = std::fs::read(&path).unwrap();

    let mut recovery = RecoveryManager::with_retry(2);
    let mut replan = ReplanManager::new(&path).unwrap().with_failure_threshold(2);

    // Iteration 1: retry.
    let (failure, result) = recovery.handle_failure(TEST_FAILURE, 101, 7, 1).unwrap();
    assert_eq!(failure.unwrap().kind, FailureKind::Test);
    assert!(result.should_retry);
    assert!(!result.should_skip);

    // Iteration 2: retries exhausted.
    let (_, result) = recovery.handle_failure(TEST_FAILURE, 101, 7, 2).unwrap();
    assert!(!result.should_retry);
    assert!(result.should_skip);
    assert_eq!(recovery.failure_count(7), 2);

    replan.update_state(7, recovery.failure_count(7), vec![FailureKind::Test; 2], plans());
    assert_eq!(replan.state().consecutive_failures, 2);
    assert_eq!(replan.check_triggers(), Some(TriggerType::TestFailure));

    let result = replan
        .execute_replan(StrategyType::Incremental, TriggerType::TestFailure)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.message.contains("feature 7 for review"));
    assert_eq!(replan.versions().len(), 1);
    assert_eq!(replan.versions()[0].version, 1);
    assert_eq!(std::fs::read(result.old_plan_path.as_ref().unwrap()).unwrap(), original);

    let written = load_plans(&path).unwrap();
    assert!(written[2].description.ends_with("[needs review]"));
    assert_eq!(compute_diff(&plans(), &written).modified_ids(), vec![7]);
}

#[tokio::test]
async fn test_engine_drives_the_same_scenario() {
    let (_dir, path) = plan_file();
    let config = RunConfig {
        max_retries: 2,
        replan_threshold: 2,
        auto_replan: true,
        ..RunConfig::default()
    };
    let mut engine = IterationEngine::from_config(&path, &config, None, None).unwrap();
    assert_eq!(engine.begin_feature(&plans()[2]), None);

    let first = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
    assert!(matches!(first.directive, Directive::Retry { .. }));
    assert_eq!(first.trigger, None);
    assert!(engine.maybe_replan().await.unwrap().is_none());

    let second = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
    assert_eq!(second.directive, Directive::Skip);
    assert_eq!(second.trigger, Some(TriggerType::TestFailure));

    let result = engine.maybe_replan().await.unwrap().unwrap();
    assert!(result.success);
    assert!(result.message.contains("Marked feature 7 for review"));
    assert_eq!(engine.replan().versions().len(), 1);

    // A third failure starts a fresh retry cycle.
    let third = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
    assert!(matches!(third.directive, Directive::Retry { .. }));
    assert_eq!(third.trigger, None);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_retry_budget_monotonicity() {
    let max = 4;
    let strategy = RetryStrategy::new(max);
    let failure = Failure::new(FailureKind::Test, "1 failed", 7, 1);

    for n in 0..max {
        let result = strategy.apply(&failure, n).unwrap();
        assert!(result.should_retry, "n = {n}");
        assert!(!result.should_skip, "n = {n}");
    }
    let result = strategy.apply(&failure, max).unwrap();
    assert!(!result.should_retry);
    assert!(result.should_skip);
}

#[test]
fn test_backup_idempotence_and_restore_bounds() {
    let (_dir, path) = plan_file();
    let mut versioner = PlanVersioner::new(&path).unwrap();

    let first = versioner.create_backup("manual").unwrap();
    let second = versioner.create_backup("manual").unwrap();
    assert_eq!(first, second);
    assert_eq!(versioner.versions().len(), 1);

    assert!(matches!(
        versioner.restore_version(0),
        Err(RatchetError::InvalidVersion { .. })
    ));
    assert!(matches!(
        versioner.restore_version(2),
        Err(RatchetError::InvalidVersion { .. })
    ));

    let backed_up = std::fs::read(&path).unwrap();
    save_plans(&path, &[Plan::new(1, "replaced")]).unwrap();
    versioner.restore_version(1).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), backed_up);
}

#[test]
fn test_diff_correctness() {
    let old = vec![Plan::new(1, "A"), Plan::new(2, "B"), Plan::new(3, "C")];
    let new = vec![Plan::new(1, "A2"), Plan::new(2, "B"), Plan::new(4, "D")];

    assert!(compute_diff(&old, &old).is_empty());

    let diff = compute_diff(&old, &new);
    assert_eq!(diff.added.iter().map(|p| p.id).collect::<Vec<_>>(), vec![4]);
    assert_eq!(diff.removed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3]);
    assert_eq!(diff.modified.len(), 1);
    assert_eq!(diff.modified[0].id, 1);
    assert_eq!(diff.modified[0].field, "description");
}

// ============================================================================
// Scope into Tier 2
// ============================================================================

#[tokio::test]
async fn test_iteration_limit_deferral_reaches_plan_file() {
    let (_dir, path) = plan_file();
    let config = RunConfig {
        scope_limit: 2,
        auto_replan: true,
        ..RunConfig::default()
    };
    let mut engine = IterationEngine::from_config(&path, &config, None, None).unwrap();
    engine.begin_feature(&plans()[3]);

    let first = engine.finish_iteration(8, "still working", 0, plans()).unwrap();
    assert_eq!(first.directive, Directive::Continue);

    let second = engine.finish_iteration(8, "still working", 0, plans()).unwrap();
    assert_eq!(second.directive, Directive::Defer(DeferReason::IterationLimit));
    assert_eq!(second.trigger, Some(TriggerType::BlockedFeature));

    let result = engine.maybe_replan().await.unwrap().unwrap();
    assert!(result.success);
    assert!(result.message.contains("next up: feature 7"));

    let written = load_plans(&path).unwrap();
    assert!(written[3].deferred);
    assert_eq!(written[3].defer_reason, Some(DeferReason::BlockedDuringExecution));
    assert!(engine.replan().state().blocked_features.is_empty());
}

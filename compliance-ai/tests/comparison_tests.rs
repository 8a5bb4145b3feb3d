//! Comparison orchestration against a fake AI service

mod helpers;

use compliance_ai::db::comparisons;
use compliance_ai::models::ComparisonJob;
use compliance_ai::services::Relay;
use compliance_ai::ApiError;
use compliance_common::events::{ComparisonStatus, SubjectKind};
use helpers::*;
use serde_json::json;
use uuid::Uuid;

async fn comparison_rows(ctx: &TestContext) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM comparisons")
        .fetch_one(ctx.db())
        .await
        .unwrap()
}

async fn wait_for_status(ctx: &TestContext, id: Uuid, status: ComparisonStatus) -> ComparisonJob {
    let db = ctx.db().clone();
    wait_until(&format!("comparison {}", status), || {
        let db = db.clone();
        async move {
            comparisons::load(&db, id)
                .await
                .unwrap()
                .is_some_and(|job| job.status == status)
        }
    })
    .await;
    comparisons::load(ctx.db(), id).await.unwrap().unwrap()
}

/// A completed user framework for alice and a completed expert framework
async fn completed_pair(ctx: &TestContext) -> (Uuid, Uuid) {
    let user_fw = ctx
        .completed_framework(ALICE, SubjectKind::User, "u1", vec![json!({"id": "c1"})])
        .await;
    let expert_fw = ctx
        .completed_framework(BOB, SubjectKind::Expert, "e1", vec![json!({"id": "c1"})])
        .await;
    (user_fw.id, expert_fw.id)
}

#[tokio::test]
async fn test_comparison_completes_with_mean_and_fan_out() {
    let ctx = TestContext::new(FakeAiScript {
        compare_frames: vec![
            frame(json!({"status": "processing"})),
            frame(json!({"status": "completed", "results": [
                {"control": "A.5.1", "score": 0.2},
                {"control": "A.5.2", "score": 0.6},
                {"control": "A.5.3", "score": 1.0},
            ]})),
        ],
        ..Default::default()
    })
    .await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;
    let (_, mut tab) = ctx.state.hub.registry(Relay::Comparisons).register(ALICE).await;

    let job = ctx.state.comparisons.start(ALICE, user_fw, expert_fw).await.unwrap();
    assert_eq!(job.status, ComparisonStatus::InProcess);

    let stored = wait_for_status(&ctx, job.id, ComparisonStatus::Completed).await;
    assert_eq!(stored.results_count, 3);
    assert!((stored.mean_score.unwrap() - 0.6).abs() < 1e-9);

    let user_record = ctx.load_framework(user_fw).await;
    assert_eq!(user_record.comparison_results.len(), 1);
    let summary = &user_record.comparison_results[0];
    assert_eq!(summary.comparison_id, job.id);
    assert_eq!(summary.expert_framework_id, expert_fw);
    assert_eq!(summary.results_count, 3);
    assert_eq!(summary.mean_score, stored.mean_score);
    assert_eq!(summary.results, stored.results);

    let queries = ctx.fake.compare_queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["user_job"], "u1");
    assert_eq!(queries[0]["expert_job"], "e1");

    let started = next_frame(&mut tab).await;
    assert_eq!(started["status"], "in-process");
    let progress = next_frame(&mut tab).await;
    assert_eq!(progress["status"], "in-process");
    let completed = next_frame(&mut tab).await;
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["resultsCount"], 3);
}

#[tokio::test]
async fn test_incomplete_source_rejected_before_insert() {
    let ctx = TestContext::new(FakeAiScript::default()).await;
    let user_fw = ctx.register_framework(ALICE, SubjectKind::User).await;
    let expert_fw = ctx
        .completed_framework(BOB, SubjectKind::Expert, "e1", vec![json!({})])
        .await;

    let err = ctx
        .state
        .comparisons
        .start(ALICE, user_fw.id, expert_fw.id)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::BadRequest(_)), "got {:?}", err);
    assert_eq!(comparison_rows(&ctx).await, 0);
    assert!(ctx.fake.compare_queries().is_empty());
}

#[tokio::test]
async fn test_wrong_kinds_rejected() {
    let ctx = TestContext::new(FakeAiScript::default()).await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;

    let err = ctx
        .state
        .comparisons
        .start(ALICE, user_fw, user_fw)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let err = ctx
        .state
        .comparisons
        .start(BOB, expert_fw, expert_fw)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert_eq!(comparison_rows(&ctx).await, 0);
}

#[tokio::test]
async fn test_active_comparison_blocks_duplicate() {
    let ctx = TestContext::new(FakeAiScript::default()).await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;

    ctx.state.comparisons.start(ALICE, user_fw, expert_fw).await.unwrap();
    let err = ctx
        .state
        .comparisons
        .start(ALICE, user_fw, expert_fw)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    assert_eq!(comparison_rows(&ctx).await, 1);
}

#[tokio::test]
async fn test_racing_inserts_one_wins() {
    let ctx = TestContext::new(FakeAiScript::default()).await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;

    let make = || {
        ComparisonJob::new(
            ALICE.to_string(),
            user_fw,
            expert_fw,
            "u1".to_string(),
            "e1".to_string(),
        )
    };
    let (first, second) = (make(), make());

    let (a, b) = tokio::join!(
        comparisons::insert(ctx.db(), &first),
        comparisons::insert(ctx.db(), &second)
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(compliance_common::Error::Conflict(_)))));
}

#[tokio::test]
async fn test_finished_comparison_does_not_block_new_one() {
    let ctx = TestContext::new(FakeAiScript {
        compare_frames: vec![frame(json!({"status": "error", "message": "model crashed"}))],
        ..Default::default()
    })
    .await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;

    let first = ctx.state.comparisons.start(ALICE, user_fw, expert_fw).await.unwrap();
    let failed = wait_for_status(&ctx, first.id, ComparisonStatus::Error).await;
    assert_eq!(failed.error_message.as_deref(), Some("model crashed"));

    let second = ctx.state.comparisons.start(ALICE, user_fw, expert_fw).await.unwrap();
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn test_close_before_completion_marks_error() {
    let ctx = TestContext::new(FakeAiScript {
        compare_frames: vec![frame(json!({"status": "processing"}))],
        compare_end: StreamEnd::Close,
        ..Default::default()
    })
    .await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;

    let job = ctx.state.comparisons.start(ALICE, user_fw, expert_fw).await.unwrap();
    let failed = wait_for_status(&ctx, job.id, ComparisonStatus::Error).await;

    let reason = failed.error_message.unwrap();
    assert!(reason.contains("closed before completion"), "reason: {}", reason);
    assert!(ctx.load_framework(user_fw).await.comparison_results.is_empty());
}

#[tokio::test]
async fn test_done_acknowledges_completed_only() {
    let ctx = TestContext::new(FakeAiScript {
        compare_frames: vec![frame(json!({"status": "done", "data": [{"score": 1}]}))],
        ..Default::default()
    })
    .await;
    let (user_fw, expert_fw) = completed_pair(&ctx).await;

    let job = ctx.state.comparisons.start(ALICE, user_fw, expert_fw).await.unwrap();
    wait_for_status(&ctx, job.id, ComparisonStatus::Completed).await;

    let err = ctx.state.comparisons.mark_done(BOB, job.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let done = ctx.state.comparisons.mark_done(ALICE, job.id).await.unwrap();
    assert_eq!(done.status, ComparisonStatus::Done);

    let err = ctx.state.comparisons.mark_done(ALICE, job.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

//! Block completion
//!
//! Completing a block is split in two:
//! - [`plan_completion`] decides, without side effects, whether the block can
//!   be completed and whether points should be granted.
//! - [`execute_completion`] applies the plan to local progress, persists it
//!   and reverts the local change when persistence fails.

use tracing::{info, warn};

use super::{LearningMap, ProgressState, UnlockEvaluator};
use crate::backend::LearningBackend;
use crate::error::{AppError, AppResult};
use crate::types::BlockId;

/// What completing a block will change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPlan {
    pub block_id: BlockId,
    /// Points to grant; `None` when the block was awarded before or is worth 0
    pub award_points: Option<u32>,
}

/// Outcome of planning a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionDecision {
    Apply(CompletionPlan),
    AlreadyCompleted,
    Locked,
    NotFound,
}

/// A completion that was applied and persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub block_id: BlockId,
    pub points_awarded: Option<u32>,
}

pub fn plan_completion(
    map: &LearningMap,
    progress: &ProgressState,
    block_id: &str,
    default_points: u32,
) -> CompletionDecision {
    let entry = match map.entry(block_id) {
        Some(entry) => entry,
        None => return CompletionDecision::NotFound,
    };
    if progress.is_completed(block_id) {
        return CompletionDecision::AlreadyCompleted;
    }
    if !UnlockEvaluator::new(map, progress).is_block_unlocked(block_id) {
        return CompletionDecision::Locked;
    }

    let points = entry.block.effective_points(default_points);
    let award_points = (points > 0 && !progress.is_awarded(block_id)).then_some(points);

    CompletionDecision::Apply(CompletionPlan { block_id: block_id.to_string(), award_points })
}

/// Apply a plan to local progress
pub fn apply_plan(progress: &mut ProgressState, plan: &CompletionPlan) {
    progress.mark_completed(&plan.block_id);
    if plan.award_points.is_some() {
        progress.mark_awarded(&plan.block_id);
    }
}

/// Undo [`apply_plan`]
pub fn revert_plan(progress: &mut ProgressState, plan: &CompletionPlan) {
    progress.unmark(&plan.block_id);
}

/// Apply a plan locally, then persist it.
///
/// The local change is visible before the first `.await`. If saving fails the
/// change is reverted. If granting points fails the change is reverted and
/// the previous progress is saved again.
pub async fn execute_completion<B>(
    backend: &B,
    user_id: &str,
    progress: &mut ProgressState,
    plan: CompletionPlan,
) -> AppResult<CompletionReport>
where
    B: LearningBackend + ?Sized,
{
    apply_plan(progress, &plan);

    if let Err(e) = backend.save_progress(user_id, &progress.snapshot()).await {
        warn!("Saving progress for block {} failed, rolling back: {}", plan.block_id, e);
        revert_plan(progress, &plan);
        return Err(AppError::mutation("progress", e));
    }

    if let Some(points) = plan.award_points {
        if let Err(e) = backend.award_points(user_id, points).await {
            warn!("Awarding {} points for block {} failed, rolling back: {}", points, plan.block_id, e);
            revert_plan(progress, &plan);
            if let Err(compensation) = backend.save_progress(user_id, &progress.snapshot()).await {
                warn!("Could not restore saved progress after failed award: {}", compensation);
            }
            return Err(AppError::mutation("points", e));
        }
    }

    info!("Block {} completed (points: {:?})", plan.block_id, plan.award_points);
    Ok(CompletionReport { block_id: plan.block_id, points_awarded: plan.award_points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockLearningBackend;
    use crate::error::BackendError;
    use crate::learning::{Block, Category, Chapter, Section};

    fn map() -> LearningMap {
        let blocks = vec![
            Block { id: "b1".into(), title: "1".into(), ..Default::default() },
            Block { id: "b2".into(), title: "2".into(), points: Some(0), ..Default::default() },
            Block { id: "b3".into(), title: "3".into(), points: Some(25), ..Default::default() },
        ];
        LearningMap::new(vec![Category {
            id: "c".into(),
            title: "C".into(),
            chapters: vec![Chapter {
                id: "ch".into(),
                title: "Ch".into(),
                sections: vec![Section { id: "s".into(), title: "S".into(), order: 1, blocks }],
                ..Default::default()
            }],
            ..Default::default()
        }])
    }

    #[test]
    fn test_plan_decisions() {
        let map = map();
        let mut progress = ProgressState::new();

        assert_eq!(plan_completion(&map, &progress, "zz", 10), CompletionDecision::NotFound);
        assert_eq!(plan_completion(&map, &progress, "b2", 10), CompletionDecision::Locked);
        assert_eq!(
            plan_completion(&map, &progress, "b1", 10),
            CompletionDecision::Apply(CompletionPlan { block_id: "b1".into(), award_points: Some(10) })
        );

        progress.mark_completed("b1");
        assert_eq!(plan_completion(&map, &progress, "b1", 10), CompletionDecision::AlreadyCompleted);
        assert_eq!(
            plan_completion(&map, &progress, "b2", 10),
            CompletionDecision::Apply(CompletionPlan { block_id: "b2".into(), award_points: None })
        );
    }

    #[test]
    fn test_block_points_override_default() {
        let map = map();
        let mut progress = ProgressState::new();
        progress.mark_completed("b1");
        progress.mark_completed("b2");
        match plan_completion(&map, &progress, "b3", 10) {
            CompletionDecision::Apply(plan) => assert_eq!(plan.award_points, Some(25)),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_persists_and_awards() {
        let mut backend = MockLearningBackend::new();
        backend
            .expect_save_progress()
            .withf(|user, snap| user == "u1" && snap.completed == vec!["b1".to_string()] && snap.awarded == vec!["b1".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));
        backend.expect_award_points().withf(|user, pts| user == "u1" && *pts == 10).times(1).returning(|_, _| Ok(()));

        let mut progress = ProgressState::new();
        let plan = CompletionPlan { block_id: "b1".into(), award_points: Some(10) };
        let report = execute_completion(&backend, "u1", &mut progress, plan).await.unwrap();

        assert_eq!(report.points_awarded, Some(10));
        assert!(progress.is_completed("b1"));
        assert!(progress.is_awarded("b1"));
    }

    #[tokio::test]
    async fn test_execute_rolls_back_on_save_failure() {
        let mut backend = MockLearningBackend::new();
        backend
            .expect_save_progress()
            .times(1)
            .returning(|_, _| Err(BackendError::Network("offline".into())));
        backend.expect_award_points().never();

        let mut progress = ProgressState::new();
        let plan = CompletionPlan { block_id: "b1".into(), award_points: Some(10) };
        let err = execute_completion(&backend, "u1", &mut progress, plan).await.unwrap_err();

        assert!(matches!(err, AppError::Mutation { what: "progress", .. }));
        assert_eq!(progress.completed_count(), 0);
        assert_eq!(progress.awarded_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_compensates_on_award_failure() {
        let mut backend = MockLearningBackend::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_save_progress()
            .withf(|_, snap| snap.completed.len() == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        backend
            .expect_award_points()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(BackendError::Status { status: 500, message: "rpc failed".into() }));
        backend
            .expect_save_progress()
            .withf(|_, snap| snap.completed.is_empty() && snap.awarded.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut progress = ProgressState::new();
        let plan = CompletionPlan { block_id: "b1".into(), award_points: Some(10) };
        let err = execute_completion(&backend, "u1", &mut progress, plan).await.unwrap_err();

        assert!(matches!(err, AppError::Mutation { what: "points", .. }));
        assert!(!progress.is_completed("b1"));
    }
}

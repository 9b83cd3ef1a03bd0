//! Gating and completion rules over the flattened curriculum

use questline::learning::completion::{apply_plan, plan_completion, CompletionDecision};
use questline::learning::flatten::flatten;
use questline::learning::{
    Block, Category, Chapter, EmptyPredecessorPolicy, LearningMap, ProgressState, Section, UnlockEvaluator,
};

fn block(id: &str, order: i64) -> Block {
    Block { id: id.into(), title: id.to_uppercase(), order, ..Default::default() }
}

fn section(id: &str, blocks: Vec<Block>) -> Section {
    Section { id: id.into(), title: id.into(), order: 1, blocks }
}

fn chapter(id: &str, sections: Vec<Section>) -> Chapter {
    Chapter { id: id.into(), title: id.into(), sections, ..Default::default() }
}

fn category(id: &str, chapters: Vec<Chapter>) -> Category {
    Category { id: id.into(), title: id.into(), chapters, ..Default::default() }
}

fn three_blocks() -> LearningMap {
    LearningMap::new(vec![category(
        "c1",
        vec![chapter("ch1", vec![section("s1", vec![block("b1", 1), block("b2", 2), block("b3", 3)])])],
    )])
}

fn two_categories() -> LearningMap {
    LearningMap::new(vec![
        category("c1", vec![chapter("ch1", vec![section("s1", vec![block("a1", 1), block("a2", 2)])])]),
        category("c2", vec![chapter("ch2", vec![section("s2", vec![block("z1", 1)])])]),
    ])
}

#[test]
fn test_flatten_keeps_delivered_order_without_duplicates() {
    let tree = vec![
        category(
            "c1",
            vec![
                chapter("ch1", vec![section("s1", vec![block("b1", 1), block("b2", 2)]), section("s2", vec![])]),
                chapter("ch2", vec![section("s3", vec![block("b3", 1)])]),
            ],
        ),
        category("empty", vec![]),
        // Out-of-order `order` fields are not re-sorted
        category("c2", vec![chapter("ch3", vec![section("s4", vec![block("b5", 9), block("b4", 1)])])]),
    ];

    let ids: Vec<String> = flatten(&tree).into_iter().map(|e| e.block.id).collect();
    assert_eq!(ids, vec!["b1", "b2", "b3", "b5", "b4"]);

    let map = LearningMap::new(tree);
    assert_eq!(map.total_blocks(), 5);
    let entry = map.entry("b3").unwrap();
    assert_eq!((entry.category_id.as_str(), entry.chapter_id.as_str(), entry.section_id.as_str()), ("c1", "ch2", "s3"));
}

#[test]
fn test_three_block_chain() {
    let map = three_blocks();
    let mut progress = ProgressState::new();

    let eval = UnlockEvaluator::new(&map, &progress);
    assert_eq!(eval.first_incomplete().map(|e| e.id()), Some("b1"));
    assert!(eval.is_block_unlocked("b1"));
    assert!(!eval.is_block_unlocked("b2"));

    progress.mark_completed("b1");
    let eval = UnlockEvaluator::new(&map, &progress);
    assert!(eval.is_block_unlocked("b2"));
    assert!(!eval.is_block_unlocked("b3"));
    assert_eq!(eval.first_incomplete().map(|e| e.id()), Some("b2"));
}

#[test]
fn test_unlock_follows_predecessor_only() {
    let map = three_blocks();
    let mut progress = ProgressState::new();
    // Completing a later block does not open the block after an incomplete one
    progress.mark_completed("b2");

    let eval = UnlockEvaluator::new(&map, &progress);
    for (i, entry) in map.flat().iter().enumerate() {
        let expected = i == 0 || progress.is_completed(map.flat()[i - 1].id());
        assert_eq!(eval.is_block_unlocked(entry.id()), expected, "block {}", entry.id());
    }
    assert!(eval.is_block_unlocked("b3"));
    assert!(!eval.is_block_unlocked("nope"));
}

#[test]
fn test_first_block_always_unlocked() {
    let map = three_blocks();
    let mut progress = ProgressState::new();
    for id in ["b1", "b2", "b3"] {
        progress.mark_completed(id);
        assert!(UnlockEvaluator::new(&map, &progress).is_block_unlocked("b1"));
    }
    assert!(UnlockEvaluator::new(&map, &progress).first_incomplete().is_none());
}

#[test]
fn test_category_gate() {
    let map = two_categories();
    let mut progress = ProgressState::new();

    let eval = UnlockEvaluator::new(&map, &progress);
    assert!(eval.is_category_unlocked("c1"));
    assert!(!eval.is_category_unlocked("c2"));
    assert!(!eval.is_category_unlocked("missing"));

    progress.mark_completed("a1");
    assert!(!UnlockEvaluator::new(&map, &progress).is_category_unlocked("c2"));

    progress.mark_completed("a2");
    let eval = UnlockEvaluator::new(&map, &progress);
    assert!(eval.is_category_unlocked("c2"));
    assert_eq!(eval.category_progress("c1"), 100);
    assert_eq!(eval.category_progress("c2"), 0);
}

#[test]
fn test_empty_predecessor_policy() {
    let map = LearningMap::new(vec![
        category("c1", vec![]),
        category("c2", vec![chapter("ch", vec![section("s", vec![block("b", 1)])])]),
    ]);
    let progress = ProgressState::new();

    assert!(UnlockEvaluator::new(&map, &progress).is_category_unlocked("c2"));
    assert!(!UnlockEvaluator::new(&map, &progress)
        .with_policy(EmptyPredecessorPolicy::Closed)
        .is_category_unlocked("c2"));
}

#[test]
fn test_completion_is_idempotent() {
    let map = three_blocks();
    let mut progress = ProgressState::new();

    let plan = match plan_completion(&map, &progress, "b1", 10) {
        CompletionDecision::Apply(plan) => plan,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(plan.award_points, Some(10));
    apply_plan(&mut progress, &plan);
    assert!(progress.is_completed("b1"));
    assert!(progress.is_awarded("b1"));

    assert_eq!(plan_completion(&map, &progress, "b1", 10), CompletionDecision::AlreadyCompleted);
    assert_eq!(progress.completed_count(), 1);
    assert_eq!(plan_completion(&map, &progress, "b3", 10), CompletionDecision::Locked);
    assert_eq!(plan_completion(&map, &progress, "zz", 10), CompletionDecision::NotFound);
}

#[test]
fn test_reset_then_redo_awards_again() {
    let map = three_blocks();
    let mut progress = ProgressState::new();

    if let CompletionDecision::Apply(plan) = plan_completion(&map, &progress, "b1", 10) {
        apply_plan(&mut progress, &plan);
    }
    progress.clear();
    assert_eq!(progress.completed_count(), 0);
    assert_eq!(progress.awarded_count(), 0);

    match plan_completion(&map, &progress, "b1", 10) {
        CompletionDecision::Apply(plan) => assert_eq!(plan.award_points, Some(10)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_zero_point_block_completes_without_award() {
    let mut free = block("b1", 1);
    free.points = Some(0);
    let map = LearningMap::new(vec![category("c1", vec![chapter("ch1", vec![section("s1", vec![free, block("b2", 2)])])])]);
    let mut progress = ProgressState::new();

    let plan = match plan_completion(&map, &progress, "b1", 10) {
        CompletionDecision::Apply(plan) => plan,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(plan.award_points, None);
    apply_plan(&mut progress, &plan);
    assert!(progress.is_completed("b1"));
    assert!(!progress.is_awarded("b1"));
    assert!(UnlockEvaluator::new(&map, &progress).is_block_unlocked("b2"));
}

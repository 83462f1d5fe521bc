use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use svcs_chunk::PayloadKind;
use svcs_graph::SnapshotGraph;
use svcs_index::{CellKey, Region};
use svcs_merge::{
    ConflictPolicy, MergeEngine, MergeError, MergeOptions, MergeOutcome, Resolution,
    ResolutionChoice, ResolutionState,
};
use svcs_test_utils::{commit_labels, fork, semantic_chunk, test_graph};

fn setup() -> (Arc<SnapshotGraph>, MergeEngine) {
    let graph = Arc::new(test_graph());
    let engine = MergeEngine::new(Arc::clone(&graph));
    (graph, engine)
}

fn semantic(x: i32, y: i32, z: i32) -> Region {
    Region::new(PayloadKind::Semantic, CellKey::new(x, y, z))
}

/// Base with "floor" at the origin, then main and feature diverge
fn diverged(graph: &SnapshotGraph, ours: &str, theirs: &str, cell: (i32, i32, i32)) {
    commit_labels(graph, "main", &[("floor", (0, 0, 0))]);
    fork(graph, "main", "feature");
    commit_labels(graph, "main", &[(ours, cell)]);
    commit_labels(graph, "feature", &[(theirs, cell)]);
}

#[test]
fn test_one_sided_change_fast_forwards() {
    let (graph, engine) = setup();
    commit_labels(&graph, "main", &[("floor", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    let change = commit_labels(&graph, "feature", &[("sofa", (3, 0, 0))]);

    let main = graph.branch("main").unwrap();
    let outcome = engine.propose(&main, change.id(), &MergeOptions::default()).unwrap();
    assert!(matches!(outcome, MergeOutcome::FastForward { .. }));
    assert_eq!(graph.branch("main").unwrap().tip, change.id());
}

#[test]
fn test_one_sided_change_auto_merges_into_commit() {
    let (graph, engine) = setup();
    commit_labels(&graph, "main", &[("floor", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    let change = commit_labels(&graph, "feature", &[("sofa", (3, 0, 0))]);
    let sofa = semantic_chunk("sofa", (3, 0, 0), 0).id();

    let main = graph.branch("main").unwrap();
    let options = MergeOptions::default().no_fast_forward();
    let outcome = engine.propose(&main, change.id(), &options).unwrap();

    let MergeOutcome::Merged { snapshot, resolved, branch } = outcome else {
        panic!("expected a merge commit");
    };
    assert!(resolved.is_empty());
    assert_eq!(snapshot.parents, vec![main.tip, change.id()]);
    assert_eq!(branch.tip, snapshot.id);
    let merged = graph.snapshot(&snapshot.id).unwrap();
    assert_eq!(merged.index().get(&semantic(3, 0, 0)).unwrap().chunk, sofa);
}

#[test]
fn test_disjoint_changes_merge_cleanly() {
    let (graph, engine) = setup();
    commit_labels(&graph, "main", &[("floor", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    commit_labels(&graph, "main", &[("lamp", (1, 0, 0))]);
    let theirs = commit_labels(&graph, "feature", &[("rug", (2, 0, 0))]);

    let main = graph.branch("main").unwrap();
    let outcome = engine.propose(&main, theirs.id(), &MergeOptions::default()).unwrap();
    let merged = graph.snapshot(&outcome.tip()).unwrap();
    assert!(merged.is_merge());
    for cell in [(0, 0, 0), (1, 0, 0), (2, 0, 0)] {
        assert!(merged.index().get(&semantic(cell.0, cell.1, cell.2)).is_some());
    }
}

#[test]
fn test_both_sides_changed_yields_single_conflict() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();
    let journal_len = graph.journal().len();
    let snapshots = graph.len();

    let (conflicts, ours, theirs) =
        match engine.propose(&main, feature.tip, &MergeOptions::default()) {
            Err(MergeError::ConflictsPending { conflicts, ours, theirs, .. }) => {
                (conflicts, ours, theirs)
            }
            other => panic!("expected ConflictsPending, got {other:?}"),
        };
    assert_eq!((ours, theirs), (main.tip, feature.tip));
    assert_eq!(conflicts.len(), 1);
    let record = &conflicts[0];
    assert_eq!(record.region, semantic(1, 0, 0));
    assert_eq!(record.base, None);
    assert_eq!(record.state, ResolutionState::Unresolved);

    let mut expected = vec![
        semantic_chunk("chair", (1, 0, 0), 0).id(),
        semantic_chunk("stool", (1, 0, 0), 0).id(),
    ];
    expected.sort();
    assert_eq!(record.candidates(), expected);

    // Nothing moved and nothing was published
    assert_eq!(graph.branch("main").unwrap(), main);
    assert_eq!(graph.journal().len(), journal_len);
    assert_eq!(graph.len(), snapshots);
}

#[test]
fn test_convergent_changes_do_not_conflict() {
    let (graph, engine) = setup();
    diverged(&graph, "vase", "vase", (4, 4, 0));
    let main = graph.branch("main").unwrap();
    let plan = engine.plan(main.tip, graph.branch("feature").unwrap().tip).unwrap();
    assert!(!plan.has_conflicts());
    assert_eq!(plan.convergent, 1);
}

#[test]
fn test_self_merge_is_noop() {
    let (graph, engine) = setup();
    let tip = commit_labels(&graph, "main", &[("desk", (0, 0, 0))]);
    let main = graph.branch("main").unwrap();
    let before = graph.len();

    let outcome = engine.propose(&main, tip.id(), &MergeOptions::default()).unwrap();
    assert_eq!(outcome, MergeOutcome::NoOp { branch: main.clone() });

    let outcome = engine.propose(&main, graph.root(), &MergeOptions::default()).unwrap();
    assert_eq!(outcome.tip(), tip.id());
    assert_eq!(graph.len(), before);
}

#[test]
fn test_resubmitted_resolution_commits() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();
    let stool = semantic_chunk("stool", (1, 0, 0), 0).id();

    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Keep(stool))];
    let outcome = engine
        .resolve(&main, feature.tip, &picks, &MergeOptions::default())
        .unwrap();
    let MergeOutcome::Merged { snapshot, resolved, .. } = outcome else {
        panic!("expected a merge commit");
    };
    assert_eq!(resolved[0].state, ResolutionState::ManuallyResolved);
    let merged = graph.snapshot(&snapshot.id).unwrap();
    assert_eq!(merged.index().get(&semantic(1, 0, 0)).unwrap().chunk, stool);
    assert!(graph.verify_references(merged.index()).is_ok());
}

#[test]
fn test_authored_resolution_is_stored() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();
    let bench = semantic_chunk("bench", (1, 0, 0), 0);
    assert!(!graph.store().exists(&bench.id()));

    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Author(bench.clone()))];
    let outcome = engine
        .resolve(&main, feature.tip, &picks, &MergeOptions::default())
        .unwrap();
    assert!(graph.store().exists(&bench.id()));
    let merged = graph.snapshot(&outcome.tip()).unwrap();
    assert_eq!(merged.index().get(&semantic(1, 0, 0)).unwrap().chunk, bench.id());
}

#[test]
fn test_clear_resolution_empties_region() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();

    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Clear)];
    let outcome = engine
        .resolve(&main, feature.tip, &picks, &MergeOptions::default())
        .unwrap();
    let merged = graph.snapshot(&outcome.tip()).unwrap();
    assert!(merged.index().get(&semantic(1, 0, 0)).is_none());
    assert!(merged.index().get(&semantic(0, 0, 0)).is_some());
}

#[test]
fn test_resolution_for_unconflicted_region_is_rejected() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();

    let picks = [
        Resolution::new(semantic(1, 0, 0), ResolutionChoice::Clear),
        Resolution::new(semantic(0, 0, 0), ResolutionChoice::Clear),
    ];
    assert!(matches!(
        engine.resolve(&main, feature.tip, &picks, &MergeOptions::default()),
        Err(MergeError::UnknownRegion(region)) if region == semantic(0, 0, 0)
    ));
    assert_eq!(graph.branch("main").unwrap(), main);
}

#[test]
fn test_keep_must_name_a_candidate() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();
    let stranger = semantic_chunk("floor", (0, 0, 0), 0).id();

    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Keep(stranger))];
    assert!(matches!(
        engine.resolve(&main, feature.tip, &picks, &MergeOptions::default()),
        Err(MergeError::InvalidResolution { .. })
    ));
}

#[test]
fn test_authored_chunk_must_occupy_its_region() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "stool", (1, 0, 0));
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();

    // Cell (2,0,0) only shares a face with the conflicted cell
    let neighbour = semantic_chunk("bench", (2, 0, 0), 7);
    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Author(neighbour))];
    assert!(matches!(
        engine.resolve(&main, feature.tip, &picks, &MergeOptions::default()),
        Err(MergeError::InvalidResolution { .. })
    ));
    assert_eq!(graph.branch("main").unwrap(), main);

    let inside = semantic_chunk("bench", (1, 0, 0), 7);
    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Author(inside))];
    let outcome = engine
        .resolve(&main, feature.tip, &picks, &MergeOptions::default())
        .unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
}

#[test]
fn test_missing_resolutions_stay_pending() {
    let (graph, engine) = setup();
    commit_labels(&graph, "main", &[("floor", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    commit_labels(&graph, "main", &[("a", (1, 0, 0)), ("b", (2, 0, 0))]);
    let theirs = commit_labels(&graph, "feature", &[("c", (1, 0, 0)), ("d", (2, 0, 0))]);
    let main = graph.branch("main").unwrap();

    let picks = [Resolution::new(semantic(1, 0, 0), ResolutionChoice::Clear)];
    match engine.resolve(&main, theirs.id(), &picks, &MergeOptions::default()) {
        Err(MergeError::ConflictsPending { conflicts, .. }) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].region, semantic(2, 0, 0));
        }
        other => panic!("expected pending conflicts, got {other:?}"),
    }
}

#[test]
fn test_policies_auto_resolve() {
    for (policy, winner) in [(ConflictPolicy::Ours, "chair"), (ConflictPolicy::Theirs, "stool")] {
        let (graph, engine) = setup();
        diverged(&graph, "chair", "stool", (1, 0, 0));
        let main = graph.branch("main").unwrap();
        let feature = graph.branch("feature").unwrap();

        let outcome = engine
            .propose(&main, feature.tip, &MergeOptions::with_policy(policy))
            .unwrap();
        let MergeOutcome::Merged { snapshot, resolved, .. } = outcome else {
            panic!("expected a merge commit");
        };
        assert_eq!(resolved[0].state, ResolutionState::AutoResolved);
        let merged = graph.snapshot(&snapshot.id).unwrap();
        assert_eq!(
            merged.index().get(&semantic(1, 0, 0)).unwrap().chunk,
            semantic_chunk(winner, (1, 0, 0), 0).id()
        );
    }
}

#[test]
fn test_stale_target_is_reported() {
    let (graph, engine) = setup();
    commit_labels(&graph, "main", &[("floor", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    let stale = graph.branch("main").unwrap();
    commit_labels(&graph, "main", &[("lamp", (1, 0, 0))]);
    let theirs = commit_labels(&graph, "feature", &[("rug", (2, 0, 0))]);

    let snapshots = graph.len();
    let err = engine
        .propose(&stale, theirs.id(), &MergeOptions::default())
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, MergeError::Graph(_)));
    assert_eq!(graph.len(), snapshots);
}

#[test]
fn test_stale_target_with_no_op_source_is_reported() {
    let (graph, engine) = setup();
    fork(&graph, "main", "feature");
    let stale = graph.branch("main").unwrap();
    let moved = commit_labels(&graph, "main", &[("lamp", (1, 0, 0))]);

    // feature still sits on the old tip, so this would be a no-op merge
    let feature = graph.branch("feature").unwrap().tip;
    let err = engine
        .propose(&stale, feature, &MergeOptions::default())
        .unwrap_err();
    let MergeError::Graph(svcs_graph::GraphError::StaleParent { current, .. }) = err else {
        panic!("expected a stale parent, got {err:?}");
    };
    assert_eq!(current, moved.id());
    assert_eq!(graph.branch("main").unwrap().tip, moved.id());
}

#[test]
fn test_stale_resolution_publishes_nothing() {
    let (graph, engine) = setup();
    diverged(&graph, "chair", "table", (1, 0, 0));
    let stale = graph.branch("main").unwrap();
    let theirs = graph.branch("feature").unwrap().tip;
    let resolution = Resolution::new(
        semantic(1, 0, 0),
        ResolutionChoice::Author(semantic_chunk("bench", (1, 0, 0), 9)),
    );
    commit_labels(&graph, "main", &[("lamp", (5, 0, 0))]);

    let (snapshots, chunks) = (graph.len(), graph.store().len());
    let err = engine
        .resolve(&stale, theirs, &[resolution], &MergeOptions::default())
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!((graph.len(), graph.store().len()), (snapshots, chunks));
}

#[test]
fn test_unrelated_snapshots_cannot_merge() {
    let (graph, engine) = setup();
    let chunk = semantic_chunk("alien", (0, 0, 0), 0);
    graph.store().put(&chunk).unwrap();
    let foreign = graph
        .import_root(&[chunk], svcs_test_utils::capture())
        .unwrap();
    let main = graph.branch("main").unwrap();
    let err = engine
        .propose(&main, foreign.id(), &MergeOptions::default())
        .unwrap_err();
    assert!(!err.is_retryable());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_conflict_regions_are_symmetric(
        ours in proptest::collection::vec((0i32..4, 0u8..3), 1..6),
        theirs in proptest::collection::vec((0i32..4, 0u8..3), 1..6),
    ) {
        let (graph, engine) = setup();
        commit_labels(&graph, "main", &[("base", (0, 0, 0))]);
        fork(&graph, "main", "feature");

        let labels = ["red", "green", "blue"];
        let to_labels = |cells: &[(i32, u8)]| -> Vec<(&str, (i32, i32, i32))> {
            cells.iter().map(|(x, l)| (labels[usize::from(*l)], (*x, 0, 0))).collect()
        };
        let a = commit_labels(&graph, "main", &to_labels(&ours));
        let b = commit_labels(&graph, "feature", &to_labels(&theirs));

        let forward = engine.plan(a.id(), b.id()).unwrap();
        let backward = engine.plan(b.id(), a.id()).unwrap();
        prop_assert_eq!(forward.conflict_regions(), backward.conflict_regions());
    }
}

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use svcs_graph::{BranchOp, GraphError, Provenance, ProvenanceKind, SnapshotGraph};
use svcs_index::SpatialIndex;
use svcs_test_utils::{capture, commit_labels, fork, semantic_chunk, test_graph};

#[test]
fn test_concurrent_advance_exactly_one_wins() {
    let graph = Arc::new(test_graph());
    let main = graph.branch("main").unwrap();

    // Two dashboards each prepare a child of the same tip
    let candidates: Vec<_> = ["left", "right"]
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let chunk = semantic_chunk(label, (i as i32, 0, 0), 0);
            graph.store().put(&chunk).unwrap();
            graph.prepare(main.tip, &[chunk], capture()).unwrap().id()
        })
        .collect();

    let barrier = Arc::new(Barrier::new(candidates.len()));
    let handles: Vec<_> = candidates
        .into_iter()
        .map(|candidate| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(&barrier);
            let main = main.clone();
            std::thread::spawn(move || {
                barrier.wait();
                graph.advance_branch(&main, candidate)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(GraphError::StaleParent { .. })))
        .count();
    assert_eq!((wins, stale), (1, 1));

    let winner = results.into_iter().find_map(Result::ok).unwrap();
    assert_eq!(graph.branch("main").unwrap().tip, winner.tip);
}

#[test]
fn test_commit_with_stale_ref_reports_current_tip() {
    let graph = test_graph();
    let stale = graph.branch("main").unwrap();
    let s1 = commit_labels(&graph, "main", &[("table", (0, 0, 0))]);

    let chunk = semantic_chunk("chair", (1, 0, 0), 0);
    graph.store().put(&chunk).unwrap();
    match graph.commit(&stale, &[chunk], capture()) {
        Err(GraphError::StaleParent { current, expected, .. }) => {
            assert_eq!(current, s1.id());
            assert_eq!(expected, graph.root());
        }
        other => panic!("expected StaleParent, got {other:?}"),
    }
}

#[test]
fn test_common_ancestor_of_forked_branches() {
    let graph = test_graph();
    let base = commit_labels(&graph, "main", &[("floor", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    let ours = commit_labels(&graph, "main", &[("lamp", (1, 0, 0))]);
    let theirs = commit_labels(&graph, "feature", &[("rug", (2, 0, 0))]);

    assert_eq!(graph.common_ancestor(ours.id(), theirs.id()).unwrap(), base.id());
    assert_eq!(graph.common_ancestor(theirs.id(), ours.id()).unwrap(), base.id());
    assert_eq!(graph.common_ancestor(ours.id(), base.id()).unwrap(), base.id());
    assert!(graph.is_ancestor(base.id(), ours.id()));
    assert!(!graph.is_ancestor(ours.id(), theirs.id()));
}

#[test]
fn test_common_ancestor_prefers_latest_merge_base() {
    let graph = test_graph();
    commit_labels(&graph, "main", &[("a", (0, 0, 0))]);
    fork(&graph, "main", "feature");
    commit_labels(&graph, "feature", &[("b", (1, 0, 0))]);

    // Fold feature into main with a two-parent snapshot
    let main = graph.branch("main").unwrap();
    let feature = graph.branch("feature").unwrap();
    let merged_index = graph.snapshot(&feature.tip).unwrap().index().clone();
    let merge = graph
        .publish(&[main.tip, feature.tip], merged_index, Provenance::of(ProvenanceKind::Merge))
        .unwrap();
    graph.advance_branch(&main, merge.id()).unwrap();

    let later_feature = commit_labels(&graph, "feature", &[("c", (2, 0, 0))]);
    let later_main = commit_labels(&graph, "main", &[("d", (3, 0, 0))]);
    assert_eq!(
        graph.common_ancestor(later_main.id(), later_feature.id()).unwrap(),
        feature.tip
    );
}

#[test]
fn test_tips_form_a_path() {
    let graph = test_graph();
    for i in 0..5 {
        commit_labels(&graph, "main", &[("step", (i, 0, 0))]);
    }
    graph.verify_journal().unwrap();

    let moves = graph.branch_journal("main");
    assert_eq!(moves[0].op, BranchOp::Created);
    for entry in &moves[1..] {
        let from = entry.from.unwrap();
        assert!(graph.is_ancestor(from, entry.to));
    }
    for pair in moves.windows(2) {
        assert_eq!(pair[1].from, Some(pair[0].to));
    }
}

#[test]
fn test_referential_integrity_of_every_snapshot() {
    let graph = test_graph();
    commit_labels(&graph, "main", &[("a", (0, 0, 0)), ("b", (1, 1, 1))]);
    fork(&graph, "main", "side");
    commit_labels(&graph, "side", &[("c", (0, 0, 0))]);

    for snapshot in graph.snapshots() {
        for id in snapshot.index().chunk_ids() {
            assert!(graph.store().exists(&id), "snapshot {} lost chunk {id}", snapshot.id());
        }
    }
}

#[test]
fn test_publish_rejects_unstored_chunks() {
    let graph = test_graph();
    let unstored = semantic_chunk("phantom", (0, 0, 0), 0);
    let index = SpatialIndex::build(&SpatialIndex::new(1.0).unwrap(), &[unstored]).unwrap();
    assert!(matches!(
        graph.publish(&[graph.root()], index, capture()),
        Err(GraphError::MissingChunk(_))
    ));
}

#[test]
fn test_history_is_topological() {
    let graph = test_graph();
    let s1 = commit_labels(&graph, "main", &[("x", (0, 0, 0))]);
    let s2 = commit_labels(&graph, "main", &[("y", (0, 0, 0))]);
    let order = graph.history(s2.id()).unwrap();
    assert_eq!(order, vec![graph.root(), s1.id(), s2.id()]);
}

fn arb_ops() -> impl Strategy<Value = Vec<(u8, u8)>> {
    proptest::collection::vec((0u8..3, 0u8..3), 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_random_commits_keep_history_acyclic(ops in arb_ops()) {
        let graph = test_graph();
        let names = ["main", "b1", "b2"];
        fork(&graph, "main", "b1");
        fork(&graph, "main", "b2");

        for (step, (branch, cell)) in ops.iter().enumerate() {
            let name = names[usize::from(*branch)];
            commit_labels(&graph, name, &[("p", (i32::from(*cell), step as i32, 0))]);
        }

        for branch in graph.list_branches() {
            let order = graph.history(branch.tip).unwrap();
            prop_assert_eq!(order.first().copied(), Some(graph.root()));
            prop_assert_eq!(order.last().copied(), Some(branch.tip));
            let ancestor = graph.common_ancestor(branch.tip, graph.branch("main").unwrap().tip).unwrap();
            prop_assert!(graph.is_ancestor(ancestor, branch.tip));
        }
        prop_assert!(graph.verify_journal().is_ok());
    }
}

#[test]
fn test_graph_rejects_bad_cell_size() {
    let store = svcs_test_utils::memory_store();
    assert!(matches!(
        SnapshotGraph::new(store, 0.0, "main"),
        Err(GraphError::Index(_))
    ));
}

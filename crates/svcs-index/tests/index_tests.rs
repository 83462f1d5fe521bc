use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;
use svcs_chunk::{Aabb, Chunk, ChunkPayload, Geometry, GeometryKind, PayloadKind, Point3, SemanticLabels};
use svcs_index::{CellKey, Region, SpatialIndex};

fn chunk_at(tag: u8, cell: (i8, i8, i8), seq: u64) -> Chunk {
    let min = Point3::new(f64::from(cell.0), f64::from(cell.1), f64::from(cell.2));
    let max = Point3::new(min.x + 1.0, min.y + 1.0, min.z + 1.0);
    Chunk::new(
        Aabb::new(min, max).unwrap(),
        ChunkPayload::Geometry(Geometry {
            kind: GeometryKind::PointCloud,
            data: vec![tag],
        }),
        seq,
    )
    .unwrap()
}

fn arb_chunks() -> impl Strategy<Value = Vec<Chunk>> {
    proptest::collection::vec((0u8..4, (-3i8..3, -3i8..3, 0i8..2), 0u64..100), 0..24)
        .prop_map(|specs| {
            specs
                .into_iter()
                .map(|(tag, cell, seq)| chunk_at(tag, cell, seq))
                .collect()
        })
}

proptest! {
    #[test]
    fn prop_diff_is_symmetric(left in arb_chunks(), right in arb_chunks(), shared in arb_chunks()) {
        let root = SpatialIndex::new(1.0).unwrap();
        let base = SpatialIndex::build(&root, &shared).unwrap();
        let a = SpatialIndex::build(&base, &left).unwrap();
        let b = SpatialIndex::build(&base, &right).unwrap();
        prop_assert_eq!(SpatialIndex::diff(&a, &b).unwrap(), SpatialIndex::diff(&b, &a).unwrap());
        prop_assert!(SpatialIndex::diff(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn prop_diff_from_parent_only_touches_new_cells(parent in arb_chunks(), extra in arb_chunks()) {
        let root = SpatialIndex::new(1.0).unwrap();
        let base = SpatialIndex::build(&root, &parent).unwrap();
        let child = SpatialIndex::build(&base, &extra).unwrap();
        let touched: BTreeSet<_> = extra
            .iter()
            .map(|c| {
                let min = c.bounds().min();
                #[allow(clippy::cast_possible_truncation)]
                let cell = CellKey::new(min.x as i32, min.y as i32, min.z as i32);
                Region::new(PayloadKind::Geometry, cell)
            })
            .collect();
        for region in SpatialIndex::diff(&base, &child).unwrap() {
            prop_assert!(touched.contains(&region));
        }
    }

    #[test]
    fn prop_every_indexed_chunk_is_queryable(chunks in arb_chunks()) {
        let root = SpatialIndex::new(1.0).unwrap();
        let index = SpatialIndex::build(&root, &chunks).unwrap();
        for (_, entry) in index.iter() {
            prop_assert!(index.query(&entry.bounds).contains(&entry.chunk));
        }
    }
}

#[test]
fn test_sequence_reorder_applies_in_source_order() {
    let root = SpatialIndex::new(1.0).unwrap();
    // Arrival order 3, 1, 2 in three different cells
    let arrivals = vec![
        chunk_at(3, (2, 0, 0), 3),
        chunk_at(1, (0, 0, 0), 1),
        chunk_at(2, (1, 0, 0), 2),
    ];
    let index = SpatialIndex::build(&root, &arrivals).unwrap();

    let mut applied: Vec<_> = index.iter().map(|(region, entry)| (entry.seq, region.cell.x)).collect();
    applied.sort_unstable();
    assert_eq!(applied, vec![(1, 0), (2, 1), (3, 2)]);
}

#[test]
fn test_modalities_do_not_overwrite_each_other() {
    let root = SpatialIndex::new(1.0).unwrap();
    let unit = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)).unwrap();
    let geometry = chunk_at(0, (0, 0, 0), 1);
    let label = Chunk::new(unit, ChunkPayload::Semantic(SemanticLabels::single("table", 0.7)), 2).unwrap();

    let index = SpatialIndex::build(&root, &[geometry.clone(), label.clone()]).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(
        index.query(&unit),
        [geometry.id(), label.id()].into_iter().collect::<BTreeSet<_>>()
    );
}

#[test]
fn test_structural_sharing_keeps_older_indices_intact() {
    let root = SpatialIndex::new(1.0).unwrap();
    let v1 = SpatialIndex::build(&root, &[chunk_at(1, (0, 0, 0), 1)]).unwrap();
    let v2 = SpatialIndex::build(&v1, &[chunk_at(2, (0, 0, 0), 1)]).unwrap();

    let cell = Region::new(PayloadKind::Geometry, CellKey::new(0, 0, 0));
    assert_eq!(v1.get(&cell).unwrap().chunk, chunk_at(1, (0, 0, 0), 0).id());
    assert_eq!(v2.get(&cell).unwrap().chunk, chunk_at(2, (0, 0, 0), 0).id());
    assert_eq!(SpatialIndex::diff(&v1, &v2).unwrap().len(), 1);
}

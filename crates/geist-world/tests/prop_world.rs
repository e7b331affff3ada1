use geist_world::{
    ChunkCoord, ChunkFingerprint, MemoryWorld, REGION_SIZE, RawChunk, RegionCoord, RegionDirWorld,
    WorldError, WorldSource, write_region,
};
use proptest::prelude::*;

fn arb_chunk() -> impl Strategy<Value = ChunkCoord> {
    (-5_000i32..5_000, -5_000i32..5_000).prop_map(|(x, z)| ChunkCoord::new(x, z))
}

proptest! {
    #[test]
    fn chunk_lies_inside_its_region(c in arb_chunk()) {
        let r = c.region();
        let min = r.min_chunk();
        prop_assert!(c.x >= min.x && c.x < min.x + REGION_SIZE);
        prop_assert!(c.z >= min.z && c.z < min.z + REGION_SIZE);
        prop_assert!(r.contains(c));
    }

    #[test]
    fn identical_payloads_share_fingerprint(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        prop_assert_eq!(ChunkFingerprint::of(&data), ChunkFingerprint::of(&data.clone()));
    }

    #[test]
    fn single_byte_change_alters_fingerprint(
        data in proptest::collection::vec(any::<u8>(), 1..512),
        idx in any::<prop::sample::Index>(),
    ) {
        let mut other = data.clone();
        let i = idx.index(other.len());
        other[i] = other[i].wrapping_add(1);
        prop_assert_ne!(ChunkFingerprint::of(&data), ChunkFingerprint::of(&other));
    }
}

#[test]
fn region_dir_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let coord = RegionCoord::new(-1, 2);
    let chunks = vec![
        RawChunk::new(ChunkCoord::new(-32, 64), vec![1, 2, 3]),
        RawChunk::new(ChunkCoord::new(-1, 95), vec![]),
        RawChunk::new(ChunkCoord::new(-10, 70), vec![9; 300]),
    ];
    write_region(dir.path(), coord, &chunks).unwrap();

    let world = RegionDirWorld::open(dir.path()).unwrap();
    assert_eq!(world.regions().unwrap(), vec![coord]);
    let mut region = world.open_region(coord).unwrap();
    let mut coords = region.chunk_coords();
    coords.sort();
    let mut expected: Vec<_> = chunks.iter().map(|c| c.coord).collect();
    expected.sort();
    assert_eq!(coords, expected);
    for chunk in &chunks {
        assert_eq!(region.load_chunk(chunk.coord).unwrap().as_ref(), Some(chunk));
    }
    assert_eq!(region.load_chunk(ChunkCoord::new(-2, 66)).unwrap(), None);
}

#[test]
fn write_rejects_foreign_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let err = write_region(
        dir.path(),
        RegionCoord::new(0, 0),
        &[RawChunk::new(ChunkCoord::new(32, 0), vec![1])],
    );
    assert!(matches!(err, Err(WorldError::CorruptRegion { .. })));
}

#[test]
fn garbage_region_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("r.0.0.region"), b"not a region").unwrap();
    let world = RegionDirWorld::open(dir.path()).unwrap();
    assert!(matches!(
        world.open_region(RegionCoord::new(0, 0)),
        Err(WorldError::CorruptRegion { .. })
    ));
    assert!(matches!(
        world.open_region(RegionCoord::new(5, 5)),
        Err(WorldError::MissingRegion(_))
    ));
}

#[test]
fn memory_world_groups_chunks_by_region() {
    let mut world = MemoryWorld::new();
    world.insert(ChunkCoord::new(0, 0), vec![1]);
    world.insert(ChunkCoord::new(31, 31), vec![2]);
    world.insert(ChunkCoord::new(-1, 0), vec![3]);
    world.insert(ChunkCoord::new(0, 40), vec![4]);
    assert_eq!(
        world.regions().unwrap(),
        vec![
            RegionCoord::new(-1, 0),
            RegionCoord::new(0, 0),
            RegionCoord::new(0, 1)
        ]
    );
    let region = world.open_region(RegionCoord::new(0, 0)).unwrap();
    assert_eq!(
        region.chunk_coords(),
        vec![ChunkCoord::new(0, 0), ChunkCoord::new(31, 31)]
    );
    drop(region);

    world.break_region(RegionCoord::new(0, 1));
    assert!(world.open_region(RegionCoord::new(0, 1)).is_err());
    world.repair_region(RegionCoord::new(0, 1));
    assert!(world.open_region(RegionCoord::new(0, 1)).is_ok());
}

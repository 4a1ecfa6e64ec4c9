use super::*;
use crate::{
    config::{Configs, RegionConfig, StrategyConfig},
    server::NullMessenger,
    test_util::{FixedShape, RecordingMessenger, TestWorld},
    world::WorldBorder,
};
use std::path::PathBuf;

const BUDGET: Duration = Duration::from_secs(1);

fn registries() -> (ShapeRegistry, VertRegistry) {
    let mut shapes = ShapeRegistry::default();
    shapes.register("fixed", |cfg| {
        Ok(Box::new(FixedShape(Vec2::new(
            cfg.params.get_i32("x", 0),
            cfg.params.get_i32("z", 0),
        ))))
    });
    (shapes, VertRegistry::default())
}

fn region_cfg(cache_cap: u64) -> RegionConfig {
    RegionConfig {
        name: "default".to_owned(),
        world: "overworld".to_owned(),
        shape: StrategyConfig::new("fixed"),
        vert: StrategyConfig::new("linear"),
        cache_cap,
        world_border_override: false,
        memory: false,
    }
}

fn build(
    world: TestWorld,
    configs: Configs,
    cfg: RegionConfig,
    messenger: Arc<dyn crate::server::Messenger>,
) -> (Region, Arc<ServerCtx>, Arc<TestWorld>) {
    let world = Arc::new(world);
    let ctx = Arc::new(ServerCtx::new(configs, messenger, PathBuf::from("/tmp")));
    let (shapes, verts) = registries();
    let region = Region::new(
        &cfg,
        Arc::clone(&world) as Arc<dyn RtpWorld>,
        Arc::clone(&ctx),
        &shapes,
        &verts,
    )
    .unwrap();
    (region, ctx, world)
}

#[test]
fn cache_converges_to_cap_and_stays() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(5),
        Arc::new(NullMessenger),
    );

    assert_eq!(region.public_queue_length(), 0);
    region.execute(BUDGET);
    assert_eq!(region.public_queue_length(), 5);

    // further cycles neither grow nor shrink the cache
    region.execute(BUDGET);
    region.execute(BUDGET);
    assert_eq!(region.public_queue_length(), 5);
}

#[test]
fn selection_lands_on_the_surface() {
    let (region, _ctx, world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let (location, attempts) = region.select_location(None);
    let location = location.unwrap();
    assert_eq!(location.pos, Vec3::new(7, 64, 7));
    assert_eq!(attempts, 1);
    assert_eq!(&*location.world, world.name());
}

#[test]
fn unsafe_terrain_exhausts_the_attempt_budget() {
    let mut configs = Configs::default();
    configs.safety.safety_radius = 1;
    let (region, _ctx, world) = build(
        TestWorld::flat("overworld").with_terrain(Vec2::new(0, 0), "LAVA"),
        configs,
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let (location, attempts) = region.select_location(None);
    assert!(location.is_none());
    assert_eq!(attempts, 20);
    // transient scan retention must be fully released
    assert!(world.all_released());
}

#[test]
fn lava_underfoot_is_rejected_at_zero_radius() {
    // default safety radius is 0; the block the candidate stands on still
    // counts
    let (region, _ctx, world) = build(
        TestWorld::flat("overworld").with_terrain(Vec2::new(0, 0), "LAVA"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let (location, attempts) = region.select_location(None);
    assert!(location.is_none());
    assert_eq!(attempts, 20);
    assert!(world.all_released());
}

#[test]
fn region_outside_border_fails_fast() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld").with_border(WorldBorder::new(|_| false)),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let (location, attempts) = region.select_location(None);
    assert!(location.is_none());
    // border failures don't burn the attempt budget, the whole call aborts
    // after the failure cap instead
    assert_eq!(attempts, MAX_BORDER_FAILS + 1);
}

#[test]
fn biome_mismatches_extend_the_budget() {
    let configs = Configs::default();
    let max_biome_checks =
        configs.performance.max_biome_checks_per_gen * configs.performance.max_attempts * 10;
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        configs,
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let filter: BTreeSet<String> = ["DESERT".to_owned()].into();
    let (location, attempts) = region.select_location(Some(&filter));
    assert!(location.is_none());
    // every retry was a biome mismatch, each one extended the budget
    assert_eq!(attempts, max_biome_checks + 1);
}

#[test]
fn custom_filter_selection_matches_the_filter() {
    let (region, _ctx, world) = build(
        TestWorld::flat("overworld").with_biome(Vec2::new(0, 0), "DESERT"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let filter: BTreeSet<String> = ["DESERT".to_owned()].into();
    let (location, _) = region.select_location(Some(&filter));
    let location = location.unwrap();
    assert_eq!(world.biome_at(location.pos), "DESERT");
}

#[test]
fn waiting_consumers_are_served_fifo() {
    let messenger = Arc::new(RecordingMessenger::default());
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::clone(&messenger) as Arc<dyn crate::server::Messenger>,
    );

    let a = PlayerId(1);
    let b = PlayerId(2);
    assert!(matches!(
        region.get_location(SenderCaps::default(), a, None),
        LocationResult::Queued { position: 1 },
    ));
    assert!(matches!(
        region.get_location(SenderCaps::default(), b, None),
        LocationResult::Queued { position: 2 },
    ));

    region.execute(BUDGET);

    let first = ctx.poll_delivery().unwrap();
    let second = ctx.poll_delivery().unwrap();
    assert_eq!(first.player, a);
    assert_eq!(second.player, b);
    assert!(ctx.poll_delivery().is_none());

    // b was renumbered to the front after a was served
    assert_eq!(messenger.positions_for(b), vec![2, 1]);
}

#[test]
fn waiting_consumer_is_not_queued_twice() {
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let player = PlayerId(5);
    assert!(matches!(
        region.get_location(SenderCaps::default(), player, None),
        LocationResult::Queued { position: 1 },
    ));
    // asking again keeps the existing membership and position
    assert!(matches!(
        region.get_location(SenderCaps::default(), player, None),
        LocationResult::Queued { position: 1 },
    ));
    assert_eq!(region.shared.player_queue.lock().len(), 1);

    region.execute(BUDGET);
    assert_eq!(ctx.poll_delivery().unwrap().player, player);
    assert!(ctx.poll_delivery().is_none());
    // served consumers may request again
    assert!(!ctx.consumers.is_processing(player));
}

#[test]
fn full_cache_still_serves_waiting_consumers() {
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(2),
        Arc::new(NullMessenger),
    );
    region.execute(BUDGET);
    assert_eq!(region.public_queue_length(), 2);

    // a consumer left waiting while the cache is already full must still be
    // matched on the next cycle
    let player = PlayerId(9);
    ctx.consumers.insert(player, TeleportData::new("default", SenderCaps::default()));
    region.shared.player_queue.lock().push_back(player);
    region.execute(BUDGET);
    assert_eq!(ctx.poll_delivery().unwrap().player, player);
}

#[test]
fn offline_consumers_are_dropped_from_the_queue() {
    let messenger = Arc::new(RecordingMessenger::default());
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::clone(&messenger) as Arc<dyn crate::server::Messenger>,
    );

    let gone = PlayerId(1);
    let here = PlayerId(2);
    region.get_location(SenderCaps::default(), gone, None);
    region.get_location(SenderCaps::default(), here, None);
    messenger.offline.lock().insert(gone);

    region.execute(BUDGET);
    assert_eq!(ctx.poll_delivery().unwrap().player, here);
    assert!(ctx.poll_delivery().is_none());
    // neither consumer is left marked as waiting
    assert!(!ctx.consumers.is_processing(gone));
    assert!(!ctx.consumers.is_processing(here));
}

#[test]
fn unqueued_sender_is_served_inline() {
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let caps = SenderCaps { unqueued: true, ..SenderCaps::default() };
    let player = PlayerId(4);
    ctx.consumers.insert(player, TeleportData::new("default", caps));
    match region.get_location(caps, player, None) {
        LocationResult::Immediate { location, attempts } => {
            assert!(location.is_some());
            assert_eq!(ctx.consumers.get(player).unwrap().attempts, attempts);
        }
        LocationResult::Queued { .. } => panic!("unqueued sender was queued"),
    }
}

#[test]
fn has_location_tracks_public_and_private_queues() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    let player = PlayerId(6);

    assert!(!region.has_location(None));
    assert!(!region.has_location(Some(player)));

    region.execute(BUDGET);
    assert!(region.has_location(None));
    // reporting is a read, asking twice changes nothing
    assert!(region.has_location(None));

    region.queue(player);
    region.execute(BUDGET);
    assert!(region.has_location(Some(player)));
}

#[test]
fn private_queue_is_preferred_and_survives_revalidation() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    let player = PlayerId(3);
    region.queue(player);
    region.execute(BUDGET);
    assert_eq!(region.personal_queue_length(player), 1);

    match region.get_location(SenderCaps::default(), player, None) {
        LocationResult::Immediate { location, .. } => assert!(location.is_some()),
        LocationResult::Queued { .. } => panic!("private queue should have served this"),
    }
    assert_eq!(region.personal_queue_length(player), 0);
}

#[test]
fn fast_queue_resolves_through_the_misc_pipe() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    let player = PlayerId(8);

    let promise = region.fast_queue(player);
    assert!(!promise.is_done());
    assert_eq!(region.personal_queue_length(player), 1);
    // same consumer, same promise
    assert!(region.fast_queue(player).is_done() == promise.is_done());

    region.execute(BUDGET);
    let (location, attempts) = promise.try_get().expect("fast promise unresolved");
    assert!(location.is_some());
    assert!(attempts >= 1);
}

#[test]
fn resolved_fast_promises_are_consumed() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    let player = PlayerId(11);

    let promise = region.fast_queue(player);
    region.execute(BUDGET);
    assert!(promise.is_done());
    // consumption empties the consumer's personal queue
    assert_eq!(region.personal_queue_length(player), 0);

    // the next call starts a fresh request instead of replaying the result
    let second = region.fast_queue(player);
    assert!(!second.is_done());
    region.execute(BUDGET);
    assert!(second.try_get().expect("second request unresolved").0.is_some());
}

#[test]
fn border_override_swaps_shape_and_drains_queues() {
    let border_shape: Arc<dyn Shape> = Arc::new(FixedShape(Vec2::new(9, 9)));
    let world = TestWorld::flat("overworld")
        .with_border(WorldBorder::unbounded().with_shape(Arc::clone(&border_shape)));
    let mut cfg = region_cfg(2);
    cfg.world_border_override = true;
    let (region, _ctx, _world) =
        build(world, Configs::default(), cfg, Arc::new(NullMessenger));

    // Note new regions adopt the border shape on first use; cached locations
    // produced before a border change would be drained here.
    let selector = region.selector();
    assert!(shape_eq(&*selector.shape, &*border_shape));

    region.execute(BUDGET);
    let (location, _) = region.select_location(None);
    assert_eq!(location.unwrap().chunk(), Vec2::new(9, 9));
    assert_eq!(region.public_queue_length(), 2);
}

#[test]
fn shut_down_releases_retained_chunks() {
    let (region, _ctx, world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(3),
        Arc::new(NullMessenger),
    );
    region.execute(BUDGET);
    assert!(region.public_queue_length() > 0);
    assert!(!world.all_released());

    region.shut_down();
    assert!(world.all_released());
    assert_eq!(region.public_queue_length(), 0);
    assert!(!region.has_location(None));
}

#[test]
fn shut_down_saves_shape_memory() {
    let data_dir = std::env::temp_dir().join("rtp-region-memory-test");
    let path = ShapeMemory::file_path(&data_dir, "default", "overworld");
    let _ = std::fs::remove_file(&path);

    let world = Arc::new(TestWorld::flat("overworld"));
    let ctx = Arc::new(ServerCtx::new(
        Configs::default(),
        Arc::new(NullMessenger),
        data_dir,
    ));
    let (shapes, verts) = registries();
    let mut cfg = region_cfg(1);
    cfg.memory = true;
    let region = Region::new(
        &cfg,
        Arc::clone(&world) as Arc<dyn RtpWorld>,
        Arc::clone(&ctx),
        &shapes,
        &verts,
    )
    .unwrap();

    let (location, _) = region.select_location(None);
    assert!(location.is_some());
    region.shut_down();
    assert!(path.exists());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn clone_region_shares_config_but_not_queues() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(2),
        Arc::new(NullMessenger),
    );
    region.execute(BUDGET);
    assert_eq!(region.public_queue_length(), 2);

    let copy = region.clone_region();
    assert_eq!(copy.name(), region.name());
    assert_eq!(copy.public_queue_length(), 0);

    // plain clone is a handle to the same region
    let handle = region.clone();
    assert_eq!(handle.public_queue_length(), 2);
}

#[test]
fn remembered_bad_marks_steer_sampling_away() {
    use rand::RngCore;
    use std::sync::atomic::{AtomicI32, Ordering};

    // deterministic walk along the x axis, one chunk per draw
    struct SteppingShape(AtomicI32);

    impl Shape for SteppingShape {
        fn name(&self) -> &'static str {
            "stepping"
        }

        fn select(&self, _rng: &mut dyn RngCore) -> Vec2<i32> {
            Vec2::new(self.0.fetch_add(1, Ordering::SeqCst), 0)
        }

        fn params(&self) -> Vec<(String, String)> {
            Vec::new()
        }

        fn clone_box(&self) -> Box<dyn Shape> {
            Box::new(SteppingShape(AtomicI32::new(self.0.load(Ordering::SeqCst))))
        }
    }

    let world = Arc::new(TestWorld::flat("overworld"));
    let ctx = Arc::new(ServerCtx::new(
        Configs::default(),
        Arc::new(NullMessenger),
        std::env::temp_dir().join("rtp-bad-steering-test"),
    ));
    let (mut shapes, verts) = registries();
    shapes.register("stepping", |_| Ok(Box::new(SteppingShape(AtomicI32::new(0)))));
    let mut cfg = region_cfg(1);
    cfg.shape = StrategyConfig::new("stepping");
    cfg.memory = true;
    let region = Region::new(
        &cfg,
        Arc::clone(&world) as Arc<dyn RtpWorld>,
        Arc::clone(&ctx),
        &shapes,
        &verts,
    )
    .unwrap();

    region.shared.memory.as_ref().unwrap().lock().add_bad(Vec2::new(0, 0));
    let (location, attempts) = region.select_location(None);
    // the first draw hits the bad mark and is resampled within the same
    // attempt
    assert_eq!(location.unwrap().chunk(), Vec2::new(1, 0));
    assert_eq!(attempts, 1);
}

#[test]
fn chunk_load_failure_aborts_selection() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld").with_failing_chunk(Vec2::new(0, 0)),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );

    let (location, attempts) = region.select_location(None);
    assert!(location.is_none());
    assert_eq!(attempts, 1);
}

#[test]
fn revalidation_drops_entries_for_unloadable_chunks() {
    let (region, _ctx, _world) = build(
        TestWorld::flat("overworld").with_failing_chunk(Vec2::new(2, 2)),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    let player = PlayerId(7);
    let stale = Location::new(
        "overworld",
        Vec3::new(2 * CHUNK_SIDE + 7, 64, 2 * CHUNK_SIDE + 7),
    );
    region.push_private(player, (stale, 1));

    // the stale entry cannot be revalidated, so the request falls through to
    // the waiting queue
    assert!(matches!(
        region.get_location(SenderCaps::default(), player, None),
        LocationResult::Queued { .. },
    ));
    assert_eq!(region.personal_queue_length(player), 0);
}

#[test]
fn failed_chunk_sets_fail_the_fast_promise() {
    let mut configs = Configs::default();
    configs.performance.view_distance_select = 1;
    let (region, _ctx, world) = build(
        TestWorld::flat("overworld").with_failing_chunk(Vec2::new(1, 1)),
        configs,
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    let player = PlayerId(2);

    let promise = region.fast_queue(player);
    region.execute(Duration::from_millis(50));
    let (location, attempts) = promise.try_get().expect("fast promise unresolved");
    assert!(location.is_none());
    assert!(attempts >= 1);
    // the partial chunk set was released, nothing stays retained
    assert!(world.all_released());
}

#[test]
fn verifier_vetoes_are_tallied_separately() {
    let mut configs = Configs::default();
    configs.logging.selection_failure = true;
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        configs,
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    ctx.verifiers.add(|_| false);

    let (location, attempts) = region.select_location(None);
    assert!(location.is_none());
    assert_eq!(attempts, 20);

    // vetoes and block-scan hits stay distinct causes in the breakdown
    let mut tally = FailTally::default();
    tally.record(FailKind::Safety, "material=LAVA".to_owned());
    tally.record(FailKind::Safety, "material=LAVA".to_owned());
    tally.record(FailKind::SafetyExternal, "location=(7,64,7)".to_owned());
    assert_eq!(
        tally.0.get(&FailKind::Safety).and_then(|details| details.get("material=LAVA")),
        Some(&2),
    );
    assert_eq!(tally.0.get(&FailKind::SafetyExternal).map(|details| details.len()), Some(1));
    assert!(tally.0.get(&FailKind::Misc).is_none());
}

#[test]
fn verifier_veto_rejects_selections() {
    let (region, ctx, _world) = build(
        TestWorld::flat("overworld"),
        Configs::default(),
        region_cfg(1),
        Arc::new(NullMessenger),
    );
    ctx.verifiers.add(|_| false);

    let (location, attempts) = region.select_location(None);
    assert!(location.is_none());
    assert_eq!(attempts, 20);

    ctx.verifiers.clear();
    let (location, _) = region.select_location(None);
    assert!(location.is_some());
}

//! Named sources of randomized safe locations, with caching.
//!
//! A `Region` owns one shape, one vertical adjustor, and the selection
//! algorithm, and fronts them with three consumer queues: a shared public
//! queue of pre-selected locations, per-consumer private queues, and
//! single-shot "fast" promises. Background cache tasks keep the public queue
//! topped up to `cache_cap`; `execute` is the per-cycle driver that runs the
//! pipes and matches waiting consumers to ready locations in FIFO order.

mod cache;

use crate::{
    chunk_set::ChunkSet,
    config::RegionConfig,
    promise::Promise,
    server::{Delivery, Message, PlayerId, SenderCaps, ServerCtx, TeleportData},
    shape::{Shape, ShapeRegistry, shape_eq, memory::ShapeMemory},
    vert::{VertRegistry, VerticalAdjustor},
    world::{CHUNK_SIDE, Location, RtpChunk, RtpWorld, chunk_of, local_of},
};
use self::cache::CacheTask;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use anyhow::*;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rand::Rng;
use task_pipe::TaskPipe;
use vek::*;


/// Consecutive border failures treated as a misconfigured region.
const MAX_BORDER_FAILS: u64 = 1000;

/// In-chunk column sampled for biome pre-checks and vertical placement.
const PROBE_COLUMN: Vec2<i32> = Vec2 { x: 7, y: 7 };

/// Resampling budget when a draw lands on a remembered bad coordinate.
const MAX_BAD_RESAMPLES: u32 = 16;


/// Immutable shape + adjustor pair, swapped whole when the world border
/// overrides the configured shape. In-flight selections finish against the
/// snapshot they hold.
pub struct Selector {
    pub shape: Arc<dyn Shape>,
    pub vert: Arc<dyn VerticalAdjustor>,
}

/// A selected location paired with the attempt count that produced it.
pub type LocationPair = (Location, u64);

/// Outcome of a consumer-facing location request.
#[derive(Debug, Clone)]
pub enum LocationResult {
    /// Served without queueing. `location` is `None` when selection exhausted
    /// its attempt budget.
    Immediate { location: Option<Location>, attempts: u64 },
    /// Enqueued behind other waiting consumers.
    Queued { position: u64 },
}


/// Cloneable handle to one region. Clones share all state; see
/// `clone_region` for a configuration-level copy with fresh queues.
#[derive(Clone)]
pub struct Region {
    shared: Arc<RegionShared>,
}

struct RegionShared {
    name: String,
    world: Arc<dyn RtpWorld>,
    ctx: Arc<ServerCtx>,
    cache_cap: u64,
    world_border_override: bool,
    selector: Mutex<Arc<Selector>>,
    // sampling history, shared across clone_region copies
    memory: Option<Arc<Mutex<ShapeMemory>>>,
    location_queue: SegQueue<LocationPair>,
    per_player: Mutex<HashMap<PlayerId, VecDeque<LocationPair>>>,
    fast: Mutex<HashMap<PlayerId, Promise<(Option<Location>, u64)>>>,
    player_queue: Mutex<VecDeque<PlayerId>>,
    chunk_sets: Mutex<HashMap<Location, ChunkSet>>,
    cache_pipe: TaskPipe,
    misc_pipe: TaskPipe,
    // serializes cache top-up against concurrent execute calls
    cache_guard: Mutex<()>,
}

impl Region {
    pub fn new(
        cfg: &RegionConfig,
        world: Arc<dyn RtpWorld>,
        ctx: Arc<ServerCtx>,
        shapes: &ShapeRegistry,
        verts: &VertRegistry,
    ) -> Result<Self> {
        let configs = ctx.configs();
        let detailed = configs.logging.detailed_region_init;

        let shape: Arc<dyn Shape> = Arc::from(shapes.build(&cfg.shape)?);
        let vert: Arc<dyn VerticalAdjustor> =
            Arc::from(verts.build(&cfg.vert, (world.min_y(), world.max_y()))?);
        if detailed {
            info!(
                region=%cfg.name, shape=%shape.name(), vert=%vert.name(),
                "region built",
            );
        }

        let memory = cfg.memory.then(|| {
            let path = ShapeMemory::file_path(&ctx.data_dir, &cfg.name, world.name());
            if detailed {
                info!(region=%cfg.name, path=%path.display(), "loading shape memory");
            }
            Arc::new(Mutex::new(ShapeMemory::load(path)))
        });

        let region = Region {
            shared: Arc::new(RegionShared {
                name: cfg.name.clone(),
                world,
                ctx,
                cache_cap: cfg.cache_cap,
                world_border_override: cfg.world_border_override,
                selector: Mutex::new(Arc::new(Selector { shape, vert })),
                memory,
                location_queue: SegQueue::new(),
                per_player: Mutex::new(HashMap::new()),
                fast: Mutex::new(HashMap::new()),
                player_queue: Mutex::new(VecDeque::new()),
                chunk_sets: Mutex::new(HashMap::new()),
                cache_pipe: TaskPipe::default(),
                misc_pipe: TaskPipe::default(),
                cache_guard: Mutex::new(()),
            }),
        };
        for _ in 0..cfg.cache_cap {
            region.shared.cache_pipe.add(CacheTask::shared(region.clone()));
        }
        Ok(region)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn world(&self) -> &Arc<dyn RtpWorld> {
        &self.shared.world
    }

    /// Current selector snapshot. When the region is configured to follow the
    /// world border's footprint and the border's shape has changed, the
    /// selector is swapped first and every queue of now-stale locations is
    /// drained.
    pub fn selector(&self) -> Arc<Selector> {
        let mut guard = self.shared.selector.lock();
        if self.shared.world_border_override {
            if let Some(border_shape) = self.shared.world.border().shape().cloned() {
                if !shape_eq(&*guard.shape, &*border_shape) {
                    info!(region=%self.shared.name, "world border changed, dropping cached locations");
                    *guard = Arc::new(Selector {
                        shape: border_shape,
                        vert: Arc::clone(&guard.vert),
                    });
                    self.drain_stale_locations();
                }
            }
        }
        Arc::clone(&guard)
    }

    fn drain_stale_locations(&self) {
        let mut per_player = self.shared.per_player.lock();
        for (_, queue) in per_player.drain() {
            for (location, _) in queue {
                self.remove_chunks(&location);
            }
        }
        drop(per_player);
        while let Some((location, _)) = self.shared.location_queue.pop() {
            self.remove_chunks(&location);
        }
    }

    /// Whether a request could be served without running a fresh selection.
    pub fn has_location(&self, player: Option<PlayerId>) -> bool {
        !self.shared.location_queue.is_empty()
            || player
                .map(|id| self.shared.per_player.lock().contains_key(&id))
                .unwrap_or(false)
    }

    /// Consumer-facing request entry point.
    ///
    /// Serving order: the consumer's private queue (entries are revalidated
    /// against current safety policy before use), then the shared public
    /// queue, then — for custom biome filters or unqueued-capable senders — a
    /// blocking inline selection. Anyone else joins the waiting queue and is
    /// notified of their position.
    pub fn get_location(
        &self,
        caps: SenderCaps,
        player: PlayerId,
        biome_filter: Option<&BTreeSet<String>>,
    ) -> LocationResult {
        // apply any pending world border override before touching caches
        self.selector();

        let custom = biome_filter.map(|set| !set.is_empty()).unwrap_or(false);

        if !custom {
            if let Some(pair) = self.poll_private(player) {
                return LocationResult::Immediate { location: Some(pair.0), attempts: pair.1 };
            }
            while let Some((location, attempts)) = self.shared.location_queue.pop() {
                if self.shared.ctx.verifiers.check(&location) {
                    return LocationResult::Immediate { location: Some(location), attempts };
                }
                self.remove_chunks(&location);
            }
        }

        if custom || caps.unqueued {
            let (location, attempts) = self.select_location(biome_filter);
            self.shared.ctx.consumers.with_mut(player, |data| {
                if !data.completed {
                    data.attempts = attempts;
                }
            });
            return LocationResult::Immediate { location, attempts };
        }

        let ctx = &self.shared.ctx;
        // a consumer waits in at most one queue at a time
        if ctx.consumers.is_processing(player) {
            let position = ctx
                .consumers
                .get(player)
                .map(|data| data.queue_position)
                .unwrap_or(0);
            return LocationResult::Queued { position };
        }
        ctx.consumers.mark_processing(player);
        ctx.consumers.ensure(player, || TeleportData::new(&self.shared.name, caps));
        let position = {
            let mut queue = self.shared.player_queue.lock();
            queue.push_back(player);
            queue.len() as u64
        };
        ctx.consumers.with_mut(player, |data| data.queue_position = position);
        ctx.messenger.send(player, Message::QueueUpdate { position });
        LocationResult::Queued { position }
    }

    /// Pop the consumer's private queue until an entry survives
    /// revalidation.
    fn poll_private(&self, player: PlayerId) -> Option<LocationPair> {
        loop {
            let pair = self.shared.per_player.lock().get_mut(&player)?.pop_front()?;
            let (ref location, _) = pair;

            let chunk = match &*self.shared.world.chunk_at(location.chunk()).wait_ref() {
                Some(chunk) => Arc::clone(chunk),
                None => {
                    warn!(region=%self.shared.name, "chunk load failed during revalidation");
                    return None;
                }
            };

            let configs = self.shared.ctx.configs();
            let unsafe_blocks = unsafe_block_set(&configs.safety.unsafe_blocks);
            let radius = configs.safety.safety_radius;
            let safe = match self.scan_safety(&chunk, location.pos, radius, &unsafe_blocks, None) {
                Some(safe) => safe,
                None => return None,
            };
            if safe && self.shared.ctx.verifiers.check(location) {
                return Some(pair);
            }
            self.remove_chunks(location);
        }
    }

    /// The core selection algorithm. Returns the selected location, or `None`
    /// on budget exhaustion or fatal misconfiguration, along with the number
    /// of attempts consumed.
    ///
    /// Biome mismatches are cheap retries: each one extends both the biome
    /// check counter and the attempt budget, bounded by
    /// `max_biome_checks_per_gen × attempts` (×10 under a custom filter), so
    /// a picky biome filter doesn't starve the other failure categories of
    /// attempts. That asymmetry is deliberate.
    pub fn select_location(
        &self,
        biome_filter: Option<&BTreeSet<String>>,
    ) -> (Option<Location>, u64) {
        let shared = &*self.shared;
        let configs = shared.ctx.configs();
        let world = &shared.world;
        let selector = self.selector();
        let vert = &selector.vert;

        let default_biomes = biome_filter.map(|set| set.is_empty()).unwrap_or(true);
        let accepted = match biome_filter {
            Some(filter) if !filter.is_empty() => {
                filter.iter().map(|b| b.to_uppercase()).collect::<BTreeSet<String>>()
            }
            _ => default_biome_set(&configs.safety.biomes, configs.safety.biome_whitelist, &**world),
        };

        let verbose = configs.logging.selection_failure;
        let unsafe_blocks = unsafe_block_set(&configs.safety.unsafe_blocks);
        let safety_radius = configs.safety.safety_radius;
        let recall = configs.performance.biome_recall;
        let recall_forced = configs.performance.biome_recall_forced;

        let max_attempts_base = configs.performance.max_attempts.max(1);
        let mut max_attempts = max_attempts_base;
        let mut max_biome_checks = configs.performance.max_biome_checks_per_gen * max_attempts;
        if !default_biomes {
            max_biome_checks *= 10;
        }
        let mut biome_checks = 0u64;

        let mut rng = rand::thread_rng();
        let mut tally = FailTally::default();
        let mut selections: Vec<Vec2<i32>> = Vec::new();
        let mut border_fails = 0u64;
        let world_name: Arc<str> = Arc::from(world.name());

        let mid_y = (vert.min_y() + vert.max_y()) / 2;
        let mut found: Option<Location> = None;
        let mut i = 1u64;

        'attempts: while i <= max_attempts {
            let mut cc = match self.sample(&selector, &accepted, default_biomes, recall, recall_forced, &mut rng) {
                Some(cc) => cc,
                None => return (None, i),
            };
            if verbose {
                selections.push(cc);
            }

            // cheap biome pre-check above unloaded terrain
            let mut biome = world
                .biome_at(Vec3::new(cc.x * CHUNK_SIDE + PROBE_COLUMN.x, mid_y, cc.y * CHUNK_SIDE + PROBE_COLUMN.y))
                .to_uppercase();
            while biome_checks < max_biome_checks && !accepted.contains(&biome) {
                biome_checks += 1;
                max_attempts += 1;
                i += 1;
                if default_biomes && recall {
                    self.observe_bad(cc);
                }
                if verbose {
                    tally.record(FailKind::Biome, format!("biome={biome}"));
                }
                cc = match self.sample(&selector, &accepted, default_biomes, recall, recall_forced, &mut rng) {
                    Some(cc) => cc,
                    None => return (None, i),
                };
                if verbose {
                    selections.push(cc);
                }
                biome = world
                    .biome_at(Vec3::new(cc.x * CHUNK_SIDE + PROBE_COLUMN.x, mid_y, cc.y * CHUNK_SIDE + PROBE_COLUMN.y))
                    .to_uppercase();
            }
            if biome_checks >= max_biome_checks {
                break;
            }

            let border_probe = Vec3::new(cc.x * CHUNK_SIDE, mid_y, cc.y * CHUNK_SIDE);
            if !world.border().is_inside(border_probe) {
                max_attempts += 1;
                border_fails += 1;
                tally.record(FailKind::WorldBorder, "OUTSIDE_BORDER".to_owned());
                if border_fails > MAX_BORDER_FAILS {
                    error!(
                        region=%shared.name,
                        "{MAX_BORDER_FAILS} world border checks failed, \
                        region is likely outside its world's border",
                    );
                    return (None, i);
                }
                i += 1;
                continue;
            }

            let chunk = match &*world.chunk_at(cc).wait_ref() {
                Some(chunk) => Arc::clone(chunk),
                None => {
                    error!(region=%shared.name, cc=?cc, "chunk load failed during selection");
                    if verbose {
                        tally.record(FailKind::Misc, "CHUNK_LOAD".to_owned());
                        tally.log_breakdown(&shared.name);
                    }
                    return (None, i);
                }
            };

            let y = match vert.adjust(&*chunk, PROBE_COLUMN) {
                Some(y) => y,
                None => {
                    if default_biomes && recall {
                        self.observe_bad(cc);
                    }
                    if verbose {
                        tally.record(FailKind::Vert, format!("biome={biome}"));
                    }
                    i += 1;
                    continue;
                }
            };
            let pos = Vec3::new(
                cc.x * CHUNK_SIDE + PROBE_COLUMN.x,
                y,
                cc.y * CHUNK_SIDE + PROBE_COLUMN.y,
            );
            let location = Location::new(Arc::clone(&world_name), pos);

            // terrain-accurate re-check at the adjusted point
            biome = world.biome_at(pos).to_uppercase();
            if !accepted.contains(&biome) {
                biome_checks += 1;
                max_attempts += 1;
                if default_biomes && recall {
                    self.observe_bad(cc);
                }
                if verbose {
                    tally.record(FailKind::Biome, format!("biome={biome}"));
                }
                i += 1;
                continue;
            }

            let tally_ref = verbose.then_some(&mut tally);
            let safe = match self.scan_safety(&chunk, pos, safety_radius, &unsafe_blocks, tally_ref) {
                Some(safe) => safe,
                None => {
                    if verbose {
                        tally.record(FailKind::Misc, "CHUNK_LOAD".to_owned());
                        tally.log_breakdown(&shared.name);
                    }
                    return (None, i);
                }
            };

            if safe {
                if shared.ctx.verifiers.check(&location) {
                    if let Some(memory) = &shared.memory {
                        memory.lock().add_biome_location(cc, &biome);
                    }
                    found = Some(location);
                    break 'attempts;
                }
                if verbose {
                    tally.record(
                        FailKind::SafetyExternal,
                        format!("location=({},{},{})", pos.x, pos.y, pos.z),
                    );
                }
            }
            self.observe_bad(cc);
            i += 1;
        }

        let runaway = i > max_attempts_base * configs.performance.max_biome_checks_per_gen;
        if found.is_none() && ((verbose && i >= max_attempts) || runaway) {
            warn!(
                region=%shared.name,
                "failed to select a location within {max_attempts} tries, \
                adjust the region configuration",
            );
            tally.log_breakdown(&shared.name);
            if verbose {
                info!(region=%shared.name, ?selections, "attempted selections");
            }
        }

        (found, i.min(max_attempts))
    }

    /// One horizontal draw, biased through remembered biome locations when
    /// recall applies and steered off remembered bad coordinates. `None`
    /// means a forced-recall miss, which fails the whole selection.
    fn sample(
        &self,
        selector: &Selector,
        accepted: &BTreeSet<String>,
        default_biomes: bool,
        recall: bool,
        recall_forced: bool,
        rng: &mut impl Rng,
    ) -> Option<Vec2<i32>> {
        if let Some(memory) = &self.shared.memory {
            if recall && !default_biomes {
                if let Some(cc) = memory.lock().recall(accepted, rng) {
                    return Some(cc);
                }
                if recall_forced {
                    error!(
                        region=%self.shared.name, biomes=?accepted,
                        "biome recall is forced but no remembered locations match",
                    );
                    return None;
                }
            }
            // steer away from coordinates that already failed, bounded so a
            // memory saturated with bad marks can't stall sampling
            let memory = memory.lock();
            let mut cc = selector.shape.select(rng);
            for _ in 0..MAX_BAD_RESAMPLES {
                if !memory.is_bad(cc) {
                    break;
                }
                cc = selector.shape.select(rng);
            }
            return Some(cc);
        }
        Some(selector.shape.select(rng))
    }

    fn observe_bad(&self, cc: Vec2<i32>) {
        if let Some(memory) = &self.shared.memory {
            memory.lock().add_bad(cc);
        }
    }

    /// Inspect every block within `radius` of `pos`, the floor block under
    /// the candidate included, for unsafe materials. A zero radius still
    /// checks the candidate's own column. Touched chunks are transiently
    /// retained for the duration of the scan. Returns `None` if a neighboring
    /// chunk failed to load.
    fn scan_safety(
        &self,
        center_chunk: &Arc<dyn RtpChunk>,
        pos: Vec3<i32>,
        radius: i32,
        unsafe_blocks: &BTreeSet<String>,
        mut tally: Option<&mut FailTally>,
    ) -> Option<bool> {
        let world = &self.shared.world;
        let mut chunks: HashMap<Vec2<i32>, Arc<dyn RtpChunk>> = HashMap::new();
        center_chunk.keep(true);
        chunks.insert(center_chunk.cc(), Arc::clone(center_chunk));

        let mut pass = true;
        let mut load_failed = false;
        'scan: for x in (pos.x - radius)..=(pos.x + radius) {
            for z in (pos.z - radius)..=(pos.z + radius) {
                let cc = chunk_of(x, z);
                let local = local_of(x, z);
                let chunk = match chunks.get(&cc) {
                    Some(chunk) => Arc::clone(chunk),
                    None => match &*world.chunk_at(cc).wait_ref() {
                        Some(chunk) => {
                            chunk.keep(true);
                            chunks.insert(cc, Arc::clone(chunk));
                            Arc::clone(chunk)
                        }
                        None => {
                            load_failed = true;
                            break 'scan;
                        }
                    },
                };
                for y in (pos.y - 1 - radius)..=(pos.y + radius) {
                    if y > world.max_y() || y < world.min_y() {
                        continue;
                    }
                    let material = chunk.material_at(Vec3::new(local.x, y, local.y));
                    if unsafe_blocks.contains(&material) {
                        if let Some(tally) = tally.as_deref_mut() {
                            tally.record(FailKind::Safety, format!("material={material}"));
                        }
                        pass = false;
                        break 'scan;
                    }
                }
            }
        }

        for chunk in chunks.values() {
            chunk.keep(false);
        }
        if load_failed {
            warn!(region=%self.shared.name, "chunk load failed during safety scan");
            return None;
        }
        Some(pass)
    }

    /// Per-cycle driver. Runs the misc pipe, tops the cache pipe up to the
    /// demand target, runs it under the remaining budget, then matches
    /// waiting consumers to ready locations FIFO and renumbers everyone still
    /// waiting.
    pub fn execute(&self, budget: Duration) {
        let start = Instant::now();
        let shared = &*self.shared;

        shared.misc_pipe.execute(budget);

        let cache_cap = shared.cache_cap.max(shared.player_queue.lock().len() as u64);
        {
            let _guard = shared.cache_guard.lock();
            if (shared.location_queue.len() as u64) < cache_cap {
                let demand = cache_cap + shared.player_queue.lock().len() as u64;
                while (shared.cache_pipe.size() + shared.location_queue.len()) < demand as usize {
                    shared.cache_pipe.add(CacheTask::shared(self.clone()));
                }
                let remaining = budget.saturating_sub(start.elapsed());
                // at least one replenishment even on cycles the misc pipe
                // consumed, so a lagging host can't starve the cache forever
                shared.cache_pipe.execute_min(remaining, 1);
            }
        }

        loop {
            let player = {
                let mut queue = shared.player_queue.lock();
                if queue.is_empty() || shared.location_queue.is_empty() {
                    break;
                }
                match queue.pop_front() {
                    Some(player) => player,
                    None => break,
                }
            };

            let data = shared.ctx.consumers.get(player);
            if data.as_ref().map(|d| d.completed).unwrap_or(true) {
                shared.ctx.consumers.unmark_processing(player);
                continue;
            }
            if !shared.ctx.messenger.is_online(player) {
                shared.ctx.consumers.unmark_processing(player);
                continue;
            }

            let (location, attempts) = match shared.location_queue.pop() {
                Some(pair) => pair,
                None => {
                    shared.player_queue.lock().push_back(player);
                    break;
                }
            };

            shared.ctx.consumers.with_mut(player, |data| data.attempts = attempts);
            shared.ctx.consumers.unmark_processing(player);
            shared.ctx.push_delivery(Delivery { player, location, attempts });

            // renumber everyone still waiting
            let waiting: Vec<PlayerId> = shared.player_queue.lock().iter().copied().collect();
            for (index, id) in waiting.into_iter().enumerate() {
                let position = index as u64 + 1;
                shared.ctx.consumers.mark_processing(id);
                shared.ctx.consumers.ensure(id, || TeleportData::new(&shared.name, SenderCaps::default()));
                shared.ctx.consumers.with_mut(id, |data| data.queue_position = position);
                shared.ctx.messenger.send(id, Message::QueueUpdate { position });
            }
        }
    }

    /// Retained chunk set covering `radius` chunks around a location.
    /// An existing smaller set for the same location is released and rebuilt.
    pub fn chunks(&self, location: &Location, radius: u32) -> ChunkSet {
        let side = radius as usize * 2 + 1;
        let wanted = side * side;
        {
            let mut sets = self.shared.chunk_sets.lock();
            if let Some(set) = sets.get(location) {
                if set.size() >= wanted {
                    return set.clone();
                }
                set.keep(false);
                sets.remove(location);
            }
        }

        let center = location.chunk();
        let radius = radius as i32;
        let mut futures = Vec::with_capacity(wanted);
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                futures.push(self.shared.world.chunk_at(center + Vec2::new(dx, dz)));
            }
        }
        let set = ChunkSet::new(futures);
        set.keep(true);
        self.shared.chunk_sets.lock().insert(location.clone(), set.clone());
        set
    }

    /// Release the retained chunk set for a location, if any.
    pub fn remove_chunks(&self, location: &Location) {
        if let Some(set) = self.shared.chunk_sets.lock().remove(location) {
            set.keep(false);
        }
    }

    /// Single-shot location request bypassing the shared queue. Calls while a
    /// request is pending return the same promise; a resolved promise is
    /// consumed, so the next call starts a fresh request.
    pub fn fast_queue(&self, player: PlayerId) -> Promise<(Option<Location>, u64)> {
        let mut fast = self.shared.fast.lock();
        if let Some(promise) = fast.get(&player) {
            return promise.clone();
        }
        let promise = Promise::new();
        fast.insert(player, promise.clone());
        drop(fast);
        self.shared.misc_pipe.add(CacheTask::for_player(self.clone(), player));
        promise
    }

    /// Reserve a private location queue for a consumer and start filling it.
    pub fn queue(&self, player: PlayerId) {
        self.shared.per_player.lock().entry(player).or_default();
        self.shared.misc_pipe.add(CacheTask::for_player(self.clone(), player));
    }

    pub fn total_queue_length(&self, player: PlayerId) -> u64 {
        self.public_queue_length() + self.personal_queue_length(player)
    }

    pub fn public_queue_length(&self) -> u64 {
        self.shared.location_queue.len() as u64
    }

    pub fn personal_queue_length(&self, player: PlayerId) -> u64 {
        let mut len = self
            .shared
            .per_player
            .lock()
            .get(&player)
            .map(|queue| queue.len() as u64)
            .unwrap_or(0);
        if self.shared.fast.lock().contains_key(&player) {
            len += 1;
        }
        len
    }

    /// Stop background work, flush shape memory, and release every retained
    /// chunk. Idempotent.
    pub fn shut_down(&self) {
        let shared = &*self.shared;
        if let Some(memory) = &shared.memory {
            let path = ShapeMemory::file_path(&shared.ctx.data_dir, &shared.name, shared.world.name());
            if let Err(e) = memory.lock().save(&path) {
                error!(region=%shared.name, error=%e, "failed to save shape memory");
            }
        }

        shared.cache_pipe.stop();
        shared.misc_pipe.stop();

        for player in shared.player_queue.lock().drain(..) {
            shared.ctx.consumers.unmark_processing(player);
        }
        shared.per_player.lock().clear();
        shared.fast.lock().clear();
        while shared.location_queue.pop().is_some() {}
        let mut sets = shared.chunk_sets.lock();
        for (_, set) in sets.drain() {
            set.keep(false);
        }
    }

    /// Swap in replacement selector components, keeping whichever side is
    /// `None`. Queued locations selected under the old components are
    /// dropped.
    pub fn override_selector(
        &self,
        shape: Option<Arc<dyn Shape>>,
        vert: Option<Arc<dyn VerticalAdjustor>>,
    ) {
        {
            let mut guard = self.shared.selector.lock();
            let next = Arc::new(Selector {
                shape: shape.unwrap_or_else(|| Arc::clone(&guard.shape)),
                vert: vert.unwrap_or_else(|| Arc::clone(&guard.vert)),
            });
            *guard = next;
        }
        self.drain_stale_locations();
    }

    /// Configuration-level copy: same world, selector, and shared memory,
    /// fresh empty queues and pipes.
    pub fn clone_region(&self) -> Region {
        let shared = &*self.shared;
        let selector = self.selector();
        Region {
            shared: Arc::new(RegionShared {
                name: shared.name.clone(),
                world: Arc::clone(&shared.world),
                ctx: Arc::clone(&shared.ctx),
                cache_cap: shared.cache_cap,
                world_border_override: shared.world_border_override,
                selector: Mutex::new(selector),
                memory: shared.memory.clone(),
                location_queue: SegQueue::new(),
                per_player: Mutex::new(HashMap::new()),
                fast: Mutex::new(HashMap::new()),
                player_queue: Mutex::new(VecDeque::new()),
                chunk_sets: Mutex::new(HashMap::new()),
                cache_pipe: TaskPipe::default(),
                misc_pipe: TaskPipe::default(),
                cache_guard: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn shared_ctx(&self) -> &Arc<ServerCtx> {
        &self.shared.ctx
    }

    pub(crate) fn cache_demand_met(&self) -> bool {
        let shared = &*self.shared;
        let waiting = shared.player_queue.lock().len() as u64;
        let demand = shared.cache_cap.max(waiting) + waiting;
        shared.cache_pipe.size() + shared.location_queue.len() >= demand as usize
    }

    pub(crate) fn push_public(&self, pair: LocationPair) {
        self.shared.location_queue.push(pair);
    }

    pub(crate) fn push_private(&self, player: PlayerId, pair: LocationPair) {
        // take the promise out of the lock before completing it, completion
        // runs callbacks
        let promise = {
            let mut fast = self.shared.fast.lock();
            match fast.remove(&player) {
                Some(promise) if !promise.is_done() => Some(promise),
                _ => None,
            }
        };
        if let Some(promise) = promise {
            promise.complete((Some(pair.0), pair.1));
            return;
        }
        self.shared.per_player.lock().entry(player).or_default().push_back(pair);
    }

    /// Resolve and consume a consumer's fast promise with a failed selection,
    /// so callers blocked on it don't wait forever.
    pub(crate) fn fail_private(&self, player: PlayerId, attempts: u64) {
        let promise = self.shared.fast.lock().remove(&player);
        if let Some(promise) = promise {
            promise.complete((None, attempts));
        }
    }

    pub(crate) fn drop_chunk_set(&self, location: &Location) {
        self.remove_chunks(location);
    }

    pub(crate) fn add_cache_task(&self) {
        self.shared.cache_pipe.add(CacheTask::shared(self.clone()));
    }
}

fn unsafe_block_set(configured: &[String]) -> BTreeSet<String> {
    configured.iter().map(|block| block.to_uppercase()).collect()
}

/// Effective accepted-biome set when no explicit filter is given: the
/// configured list as a whitelist, or the world's biomes minus the configured
/// list as a blacklist.
fn default_biome_set(
    configured: &[String],
    whitelist: bool,
    world: &dyn RtpWorld,
) -> BTreeSet<String> {
    let configured: BTreeSet<String> = configured.iter().map(|b| b.to_uppercase()).collect();
    if whitelist {
        configured
    } else {
        world
            .biomes()
            .into_iter()
            .map(|b| b.to_uppercase())
            .filter(|b| !configured.contains(b))
            .collect()
    }
}

/// Why an attempt failed, for the diagnostic breakdown.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum FailKind {
    Biome,
    WorldBorder,
    Vert,
    Safety,
    /// Vetoed by a registered verifier rather than the block scan.
    SafetyExternal,
    Misc,
}

/// Per-cause, per-detail failure counts for one selection call.
#[derive(Default)]
struct FailTally(BTreeMap<FailKind, BTreeMap<String, u64>>);

impl FailTally {
    fn record(&mut self, kind: FailKind, key: String) {
        *self.0.entry(kind).or_default().entry(key).or_insert(0) += 1;
    }

    fn log_breakdown(&self, region: &str) {
        for (kind, details) in &self.0 {
            let total: u64 = details.values().sum();
            info!(region=%region, cause=?kind, fails=total, "selection failure cause");
            for (key, count) in details {
                info!(region=%region, cause=?kind, %key, fails=count, "selection failure detail");
            }
        }
    }
}


#[cfg(test)]
mod tests;

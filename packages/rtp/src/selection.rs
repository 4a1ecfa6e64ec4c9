//! Engine facade: region lookup and lifecycle.
//!
//! Owns the strategy registries, the known worlds, and the named permanent
//! regions, plus per-consumer temporary regions derived from a permanent
//! base. The scheduler drives every live region through this.

use crate::{
    config::{RegionConfig, StrategyConfig},
    region::Region,
    server::{PlayerId, ServerCtx},
    shape::ShapeRegistry,
    vert::VertRegistry,
    world::RtpWorld,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use anyhow::*;
use parking_lot::Mutex;


pub const DEFAULT_REGION: &'static str = "default";


pub struct SelectionApi {
    ctx: Arc<ServerCtx>,
    shapes: ShapeRegistry,
    verts: VertRegistry,
    worlds: Mutex<BTreeMap<String, Arc<dyn RtpWorld>>>,
    permanent: Mutex<BTreeMap<String, Region>>,
    temporary: Mutex<HashMap<PlayerId, Region>>,
}

impl SelectionApi {
    pub fn new(ctx: Arc<ServerCtx>) -> Self {
        SelectionApi {
            ctx,
            shapes: ShapeRegistry::default(),
            verts: VertRegistry::default(),
            worlds: Mutex::new(BTreeMap::new()),
            permanent: Mutex::new(BTreeMap::new()),
            temporary: Mutex::new(HashMap::new()),
        }
    }

    pub fn ctx(&self) -> &Arc<ServerCtx> {
        &self.ctx
    }

    pub fn shapes_mut(&mut self) -> &mut ShapeRegistry {
        &mut self.shapes
    }

    pub fn verts_mut(&mut self) -> &mut VertRegistry {
        &mut self.verts
    }

    /// Make a world available for region construction.
    pub fn add_world(&self, world: Arc<dyn RtpWorld>) {
        self.worlds.lock().insert(world.name().to_owned(), world);
    }

    pub fn world(&self, name: &str) -> Option<Arc<dyn RtpWorld>> {
        self.worlds.lock().get(name).cloned()
    }

    pub fn region(&self, name: &str) -> Option<Region> {
        self.permanent.lock().get(name).cloned()
    }

    /// Region by name, falling back to the default region. Errors when
    /// neither exists.
    pub fn region_or_default(&self, name: &str) -> Result<Region> {
        let permanent = self.permanent.lock();
        permanent
            .get(name)
            .or_else(|| permanent.get(DEFAULT_REGION))
            .cloned()
            .ok_or_else(|| anyhow!("neither {name:?} nor {DEFAULT_REGION:?} are known regions"))
    }

    /// Build a region from config and install it under its name. A replaced
    /// region is shut down first.
    pub fn set_region(&self, cfg: &RegionConfig) -> Result<Region> {
        let world = self
            .world(&cfg.world)
            .ok_or_else(|| anyhow!("unknown world {:?} for region {:?}", cfg.world, cfg.name))?;
        let region = Region::new(cfg, world, Arc::clone(&self.ctx), &self.shapes, &self.verts)?;
        if let Some(old) = self.permanent.lock().insert(cfg.name.clone(), region.clone()) {
            old.shut_down();
        }
        Ok(region)
    }

    pub fn region_names(&self) -> Vec<String> {
        self.permanent.lock().keys().cloned().collect()
    }

    /// Per-consumer scratch region derived from a permanent base: same
    /// configuration, fresh queues. Replaces any previous temp region for the
    /// consumer.
    pub fn temp_region(&self, player: PlayerId, base: &str) -> Result<Region> {
        self.temp_region_with(player, base, None, None)
    }

    /// `temp_region` with shape and/or vertical-adjustor overrides, for
    /// one-off requests that deviate from the base region's configuration.
    pub fn temp_region_with(
        &self,
        player: PlayerId,
        base: &str,
        shape: Option<&StrategyConfig>,
        vert: Option<&StrategyConfig>,
    ) -> Result<Region> {
        let base_region = self.region_or_default(base)?;
        let region = base_region.clone_region();
        if shape.is_some() || vert.is_some() {
            let world = base_region.world();
            let shape = shape
                .map(|cfg| self.shapes.build(cfg))
                .transpose()?
                .map(Arc::from);
            let vert = vert
                .map(|cfg| self.verts.build(cfg, (world.min_y(), world.max_y())))
                .transpose()?
                .map(Arc::from);
            region.override_selector(shape, vert);
        }
        if let Some(old) = self.temporary.lock().insert(player, region.clone()) {
            old.shut_down();
        }
        Ok(region)
    }

    pub fn remove_temp_region(&self, player: PlayerId) {
        if let Some(region) = self.temporary.lock().remove(&player) {
            region.shut_down();
        }
    }

    /// Every region the scheduler must drive, permanent and temporary.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self.permanent.lock().values().cloned().collect();
        regions.extend(self.temporary.lock().values().cloned());
        regions
    }

    /// Shut every region down, flushing shape memory. Idempotent.
    pub fn shut_down_all(&self) {
        for region in self.regions() {
            region.shut_down();
        }
        self.permanent.lock().clear();
        self.temporary.lock().clear();
    }
}

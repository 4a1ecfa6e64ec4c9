//! Shared engine context and the host-facing consumer surfaces.
//!
//! The engine talks back to the host through `Messenger` (queue-position
//! notifications, presence checks) and through a delivery queue of finished
//! placements the host drains on its own schedule. Everything mutable that
//! regions share lives in one `ServerCtx`.

use crate::{
    config::Configs,
    verifier::Verifiers,
    world::Location,
};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;


/// Host-assigned consumer identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u64);

/// What the requesting sender is allowed to do, resolved by the host before
/// the request reaches the engine.
#[derive(Debug, Copy, Clone, Default)]
pub struct SenderCaps {
    /// May run a blocking selection inline instead of waiting in the shared
    /// queue.
    pub unqueued: bool,
    /// Host-imposed delay before the eventual teleport fires.
    pub delay: Duration,
}

/// Notification sent back to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Position in a region's waiting queue changed.
    QueueUpdate { position: u64 },
}

/// Host channel for consumer notifications and presence.
pub trait Messenger: Send + Sync {
    fn send(&self, player: PlayerId, message: Message);

    /// Whether the consumer is still connected. Absent consumers are dropped
    /// from waiting queues instead of being served.
    fn is_online(&self, player: PlayerId) -> bool;
}

/// Messenger for hosts that don't care about notifications.
pub struct NullMessenger;

impl Messenger for NullMessenger {
    fn send(&self, _player: PlayerId, _message: Message) {}

    fn is_online(&self, _player: PlayerId) -> bool {
        true
    }
}


/// Per-consumer request state. The engine fills in attempt counts and queue
/// positions; the host owns the rest of the teleport lifecycle.
#[derive(Debug, Clone)]
pub struct TeleportData {
    pub completed: bool,
    pub attempts: u64,
    pub queue_position: u64,
    /// When the request was made.
    pub started: Instant,
    pub delay: Duration,
    pub target_region: String,
    pub original_location: Option<Location>,
}

impl TeleportData {
    pub fn new(target_region: &str, caps: SenderCaps) -> Self {
        TeleportData {
            completed: false,
            attempts: 0,
            queue_position: 0,
            started: Instant::now(),
            delay: caps.delay,
            target_region: target_region.to_owned(),
            original_location: None,
        }
    }
}

/// Latest request per consumer, plus the set currently being processed.
#[derive(Default)]
pub struct ConsumerTable {
    data: Mutex<HashMap<PlayerId, TeleportData>>,
    processing: Mutex<HashSet<PlayerId>>,
}

impl ConsumerTable {
    pub fn get(&self, player: PlayerId) -> Option<TeleportData> {
        self.data.lock().get(&player).cloned()
    }

    /// Mutate the consumer's entry in place, if present. Returns whether an
    /// entry existed.
    pub fn with_mut(&self, player: PlayerId, f: impl FnOnce(&mut TeleportData)) -> bool {
        let mut data = self.data.lock();
        match data.get_mut(&player) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    pub fn insert(&self, player: PlayerId, entry: TeleportData) {
        self.data.lock().insert(player, entry);
    }

    /// Insert only if the consumer has no live entry, returning the entry now
    /// in place.
    pub fn ensure(&self, player: PlayerId, make: impl FnOnce() -> TeleportData) -> TeleportData {
        self.data.lock().entry(player).or_insert_with(make).clone()
    }

    pub fn remove(&self, player: PlayerId) -> Option<TeleportData> {
        self.data.lock().remove(&player)
    }

    pub fn mark_processing(&self, player: PlayerId) {
        self.processing.lock().insert(player);
    }

    pub fn unmark_processing(&self, player: PlayerId) {
        self.processing.lock().remove(&player);
    }

    pub fn is_processing(&self, player: PlayerId) -> bool {
        self.processing.lock().contains(&player)
    }
}


/// A matched consumer/location pair, ready for the host to act on.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub player: PlayerId,
    pub location: Location,
    pub attempts: u64,
}


/// Engine-wide shared state handed to every region.
pub struct ServerCtx {
    // whole-snapshot swap cell, readers clone the arc
    configs: Mutex<Arc<Configs>>,
    pub messenger: Arc<dyn Messenger>,
    pub verifiers: Verifiers,
    pub consumers: ConsumerTable,
    deliveries: SegQueue<Delivery>,
    /// Where shape memory files live.
    pub data_dir: PathBuf,
}

impl ServerCtx {
    pub fn new(configs: Configs, messenger: Arc<dyn Messenger>, data_dir: PathBuf) -> Self {
        ServerCtx {
            configs: Mutex::new(Arc::new(configs)),
            messenger,
            verifiers: Verifiers::default(),
            consumers: ConsumerTable::default(),
            deliveries: SegQueue::new(),
            data_dir,
        }
    }

    /// Current configuration snapshot.
    pub fn configs(&self) -> Arc<Configs> {
        Arc::clone(&self.configs.lock())
    }

    /// Swap in a new configuration. In-flight operations finish against the
    /// snapshot they already hold.
    pub fn set_configs(&self, configs: Configs) {
        *self.configs.lock() = Arc::new(configs);
    }

    pub fn push_delivery(&self, delivery: Delivery) {
        self.deliveries.push(delivery);
    }

    /// Drain one finished placement, host-side.
    pub fn poll_delivery(&self) -> Option<Delivery> {
        self.deliveries.pop()
    }
}

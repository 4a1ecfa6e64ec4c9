//! See `CacheTask`.

use crate::region::Region;
use crate::server::PlayerId;
use task_pipe::Task;


/// One replenishment step: run a selection, pair the result with a retained
/// chunk set, and route it to the right queue once its chunks finish loading.
/// Re-adds itself to the cache pipe while demand exceeds supply, so the pipe
/// winds down on its own once the queues are full.
pub(super) struct CacheTask {
    region: Region,
    /// Destination: the shared public queue, or a specific consumer's fast
    /// promise / private queue.
    player: Option<PlayerId>,
}

impl CacheTask {
    pub(super) fn shared(region: Region) -> Self {
        CacheTask { region, player: None }
    }

    pub(super) fn for_player(region: Region, player: PlayerId) -> Self {
        CacheTask { region, player: Some(player) }
    }
}

impl Task for CacheTask {
    fn run(self: Box<Self>) {
        let region = self.region;
        let player = self.player;

        let (location, attempts) = region.select_location(None);
        let Some(location) = location else {
            // a consumer-destined task must still resolve its fast promise
            if let Some(player) = player {
                region.fail_private(player, attempts);
            } else if !region.cache_demand_met() {
                region.add_cache_task();
            }
            return;
        };

        let radius = region.shared_ctx().configs().performance.view_distance_select;
        let chunk_set = region.chunks(&location, radius);

        let routed_region = region.clone();
        let routed_location = location.clone();
        chunk_set.when_complete(move |ok| {
            if !ok {
                routed_region.drop_chunk_set(&routed_location);
                match player {
                    None => {}
                    Some(player) => routed_region.fail_private(player, attempts),
                }
                return;
            }
            match player {
                None => routed_region.push_public((routed_location, attempts)),
                Some(player) => routed_region.push_private(player, (routed_location, attempts)),
            }
        });

        if player.is_none() && !region.cache_demand_met() {
            region.add_cache_task();
        }
    }
}

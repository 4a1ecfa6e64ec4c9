//! Cycle timing and the background selection driver.

use crate::selection::SelectionApi;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};


/// Desired duration of a scheduling cycle.
pub const CYCLE: Duration = Duration::from_millis(50);

/// Share of each cycle handed to selection work by default, leaving the rest
/// of the cycle to the host.
pub const DEFAULT_BUDGET: Duration = Duration::from_millis(25);


/// Manages cycles and the passage of time.
pub struct TickClock {
    cycle: u64,
    next_cycle: Instant,
}

impl TickClock {
    pub fn new() -> Self {
        TickClock {
            cycle: 0,
            next_cycle: Instant::now(),
        }
    }

    /// Number of the current cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// When the next cycle is scheduled to ideally begin.
    pub fn next_cycle(&self) -> Instant {
        self.next_cycle
    }

    /// Call after finishing a cycle's work to schedule the next one.
    pub fn on_cycle_done(&mut self) {
        self.cycle += 1;

        self.next_cycle += CYCLE;
        let now = Instant::now();
        if self.next_cycle < now {
            let behind_nanos = (now - self.next_cycle).as_nanos();
            // poor man's div_ceil
            let behind_cycles = match behind_nanos % CYCLE.as_nanos() {
                0 => behind_nanos / CYCLE.as_nanos(),
                _ => behind_nanos / CYCLE.as_nanos() + 1,
            };
            let behind_cycles = u32::try_from(behind_cycles).expect("time broke");
            warn!("running too slow, skipping {behind_cycles} cycles");
            self.next_cycle += CYCLE * behind_cycles;
        }
    }
}

/// One scheduling cycle: drive every live region under an even split of the
/// budget.
pub fn run_cycle(api: &SelectionApi, budget: Duration) {
    let regions = api.regions();
    if regions.is_empty() {
        return;
    }
    let share = budget / regions.len() as u32;
    for region in regions {
        region.execute(share);
    }
}


/// Background thread driving `run_cycle` on the cycle clock until stopped.
pub struct SelectionScheduler {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SelectionScheduler {
    pub fn spawn(api: Arc<SelectionApi>, budget: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut clock = TickClock::new();
                debug!("selection scheduler running");
                while !stop.load(Ordering::Relaxed) {
                    run_cycle(&api, budget);
                    clock.on_cycle_done();
                    let now = Instant::now();
                    if clock.next_cycle() > now {
                        std::thread::sleep(clock.next_cycle() - now);
                    }
                }
                debug!("selection scheduler stopped");
            })
        };
        SelectionScheduler { stop, thread: Some(thread) }
    }

    /// Stop the driver and wait for its thread to exit. Regions are left as
    /// they are; call `SelectionApi::shut_down_all` separately.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("selection scheduler thread panicked");
            }
        }
    }
}

impl Drop for SelectionScheduler {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

//! Reference-counted retention over a batch of loading chunks.

use crate::world::{ChunkFuture, RtpChunk};
use std::sync::Arc;
use parking_lot::Mutex;


/// Handle over a set of asynchronously loading chunks.
///
/// `keep(true)` raises every constituent chunk's retention count by one,
/// `keep(false)` lowers it; a chunk that resolves after a `keep` call has the
/// set's current balance applied on arrival, so retention is consistent
/// regardless of load order. `when_complete` observes the moment every load
/// has resolved, with a success flag that is false if any load failed.
#[derive(Clone)]
pub struct ChunkSet {
    state: Arc<Mutex<SetState>>,
    total: usize,
}

struct SetState {
    resolved: Vec<Arc<dyn RtpChunk>>,
    pending: usize,
    any_failed: bool,
    // net keep(true) minus keep(false) calls on the whole set
    keeps: i32,
    done: Option<bool>,
    callbacks: Vec<Box<dyn FnOnce(bool) + Send>>,
}

impl ChunkSet {
    /// Construct over in-flight loads. Completion fires once all of them
    /// resolve.
    pub fn new(futures: Vec<ChunkFuture>) -> Self {
        let total = futures.len();
        let state = Arc::new(Mutex::new(SetState {
            resolved: Vec::with_capacity(total),
            pending: total,
            any_failed: false,
            keeps: 0,
            done: if total == 0 { Some(true) } else { None },
            callbacks: Vec::new(),
        }));
        for future in &futures {
            let state = Arc::clone(&state);
            future.on_ready(move |result| on_chunk_resolved(&state, result.clone()));
        }
        ChunkSet { state, total }
    }

    /// Number of constituent chunks, resolved or not.
    pub fn size(&self) -> usize {
        self.total
    }

    /// Completion state: `None` while loading, else the success flag.
    pub fn is_complete(&self) -> Option<bool> {
        self.state.lock().done
    }

    /// Adjust retention across the whole set.
    pub fn keep(&self, keep: bool) {
        let mut state = self.state.lock();
        state.keeps += if keep { 1 } else { -1 };
        for chunk in &state.resolved {
            chunk.keep(keep);
        }
    }

    /// Run `f` with the success flag once every load has resolved. Fires
    /// exactly once per registration; immediately if already complete.
    pub fn when_complete(&self, f: impl FnOnce(bool) + Send + 'static) {
        let done = {
            let mut state = self.state.lock();
            match state.done {
                Some(done) => done,
                None => {
                    state.callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        f(done);
    }
}

fn on_chunk_resolved(state: &Mutex<SetState>, result: Option<Arc<dyn RtpChunk>>) {
    let callbacks = {
        let mut state = state.lock();
        match result {
            Some(chunk) => {
                // apply the set's current retention balance to the newcomer
                for _ in 0..state.keeps {
                    chunk.keep(true);
                }
                for _ in state.keeps..0 {
                    chunk.keep(false);
                }
                state.resolved.push(chunk);
            }
            None => state.any_failed = true,
        }
        state.pending -= 1;
        if state.pending > 0 {
            return;
        }
        state.done = Some(!state.any_failed);
        std::mem::take(&mut state.callbacks)
    };
    let ok = state.lock().done.unwrap_or(false);
    for callback in callbacks {
        callback(ok);
    }
}

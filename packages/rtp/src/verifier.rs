//! Global placement verifiers.

use crate::world::Location;
use std::panic::{catch_unwind, AssertUnwindSafe};
use parking_lot::Mutex;


pub type Verifier = Box<dyn Fn(&Location) -> bool + Send + Sync>;

/// Pluggable predicates run against every finished placement, engine-wide.
/// First veto wins. A panicking verifier is logged and skipped, never
/// propagated to the selection path.
#[derive(Default)]
pub struct Verifiers(Mutex<Vec<Verifier>>);

impl Verifiers {
    pub fn add(&self, verifier: impl Fn(&Location) -> bool + Send + Sync + 'static) {
        self.0.lock().push(Box::new(verifier));
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Whether every verifier accepts the location.
    pub fn check(&self, location: &Location) -> bool {
        let verifiers = self.0.lock();
        for verifier in verifiers.iter() {
            match catch_unwind(AssertUnwindSafe(|| verifier(location))) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(_) => warn!("placement verifier panicked, skipping it"),
            }
        }
        true
    }
}

//! Randomized safe-location selection and caching engine.
//!
//! Selects random, safe, in-bounds teleport destinations within configured
//! regions of a host's worlds, and pre-selects them in the background so
//! consumer requests are usually served from a cache instead of paying the
//! chunk-loading cost inline.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod logging;
pub mod promise;
pub mod world;
pub mod chunk_set;
pub mod shape;
pub mod vert;
pub mod verifier;
pub mod server;
pub mod region;
pub mod selection;
pub mod scheduler;

#[cfg(test)]
mod test_util;

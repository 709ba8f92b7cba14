//! Shared task primitives for the schema sync runtime.
//!
//! * [`TaskClass`]: observability classification for spawned work.
//! * [`spawn`]: classified task spawning that works with or without an ambient runtime.
//! * [`GenerationClock`] / [`GenerationToken`]: monotonic lifecycle generations with
//!   cancellation, used to retire socket supervisors and superseded instance loads.

#![warn(missing_docs)]

mod class;
mod spawn;
mod token;

pub use class::TaskClass;
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};

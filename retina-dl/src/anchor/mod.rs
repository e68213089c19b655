//! Anchor generation over a feature pyramid.

mod cache;
mod generator;

pub use cache::*;
pub use generator::*;

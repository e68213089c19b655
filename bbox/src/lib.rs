//! Safe bounding box types and functions.
//!
//! Boxes live in continuous pixel coordinates. The width of a box is `r - l`
//! and its height is `b - t`, without the `+1` of inclusive pixel ranges.

mod common;

pub use rect::*;
pub mod rect;

pub use tlbr::*;
pub mod tlbr;

pub use cycxhw::*;
pub mod cycxhw;

pub use hw::*;
pub mod hw;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}

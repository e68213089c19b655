//! The anchor, box coding and detection filtering building blocks of a RetinaNet detector.

mod common;
pub mod anchor;
pub mod assign;
pub mod coder;
pub mod config;
pub mod dataset;
pub mod generator;
pub mod inference;
pub mod nms;
pub mod pyramid;
pub mod registry;

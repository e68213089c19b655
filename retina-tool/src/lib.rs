//! Command line utilities around the RetinaNet anchor and detection pipeline.

mod common;
pub mod commands;
pub mod config;
pub mod io;

//! Helpers shared by the unit tests of every module.
mod common;
mod kv;

pub use common::*;
pub use kv::*;

//! V2X Safety Coordination Library
//!
//! A safety coordination engine for connected-vehicle traffic, plus a small
//! headless grid simulator to drive it.

pub mod demo;
pub mod engine;

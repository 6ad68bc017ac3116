//! # Configuration
//!
//! Controller-level settings. Per-resource behaviour lives on the CRDs.

mod controller;

pub use controller::{ControllerConfig, LogFormat};
